use std::fmt;

pub type Error = anyhow::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The stored lease record exists but could not be decoded.
pub struct MalformedRecord(String);

impl MalformedRecord {
    pub fn new(msg: &str) -> MalformedRecord {
        MalformedRecord(msg.to_owned())
    }
}

impl std::error::Error for MalformedRecord {}

impl fmt::Display for MalformedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed lease record: {}", self.0)
    }
}

impl fmt::Debug for MalformedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MalformedRecord({:?})", self.0)
    }
}

pub fn is_malformed(e: &Error) -> bool {
    // Attached as context rather than as a cause.
    if e.downcast_ref::<MalformedRecord>().is_some() {
        return true;
    }
    for cause in e.chain() {
        if cause.downcast_ref::<MalformedRecord>().is_some() {
            return true;
        }
    }
    false
}

/// The lease store could not be reached or refused service. Always transient.
#[derive(Debug)]
pub struct Unavailable(String);

impl Unavailable {
    pub fn new(msg: &str) -> Unavailable {
        Unavailable(msg.to_owned())
    }
}

impl std::error::Error for Unavailable {}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lease store unavailable: {}", self.0)
    }
}

pub fn is_unavailable(e: &Error) -> bool {
    // Attached as context rather than as a cause.
    if e.downcast_ref::<Unavailable>().is_some() {
        return true;
    }
    for cause in e.chain() {
        if cause.downcast_ref::<Unavailable>().is_some() {
            return true;
        }
    }
    false
}
