//! Lease model
//!
//! The persisted lease record and the pure predicates used to reason about
//! it. Nothing here reads a clock; `now` is always supplied by the caller in
//! unix seconds.

use std::fmt;

/// Partition key of the single row holding the lease.
pub const LOCK_NAME: &str = "Leader";

/// Attribute names of the persisted record.
pub const ATTR_LOCK_NAME: &str = "LockName";
pub const ATTR_LEADER_NAME: &str = "LeaderName";
pub const ATTR_LAST_UPDATE: &str = "LastUpdate";

/// The shared lease state.
///
/// A record with no owner means no leader has ever been elected (or the
/// record was reset); it is always claimable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseRecord {
    pub owner: Option<String>,
    pub last_renewal: i64,
}

impl LeaseRecord {
    pub fn unset() -> LeaseRecord {
        LeaseRecord::default()
    }

    /// A record naming `owner` as leader, renewed at `now`.
    pub fn held_by(owner: &str, now: i64) -> LeaseRecord {
        LeaseRecord {
            owner: Some(owner.to_owned()),
            last_renewal: now,
        }
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn is_unset(&self) -> bool {
        self.owner.is_none()
    }

    /// True once more than `timeout` seconds have passed since the last
    /// renewal. Exactly `timeout` seconds is still live.
    pub fn is_expired(&self, now: i64, timeout: i64) -> bool {
        self.is_unset() || now.saturating_sub(self.last_renewal) > timeout
    }

    pub fn is_owned_by(&self, id: &str) -> bool {
        self.owner() == Some(id)
    }
}

impl fmt::Display for LeaseRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.owner {
            Some(owner) => write!(f, "{}@{}", owner, self.last_renewal),
            None => f.write_str("<unset>"),
        }
    }
}

/// Precondition on the stored record, evaluated atomically by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Renewal: the stored owner is still `0`.
    OwnedBy(String),

    /// Claim: the stored record is unset, or it was last renewed at or
    /// before `expiry`.
    Claimable { expiry: i64 },
}

impl Condition {
    pub fn renewal(id: &str) -> Condition {
        Condition::OwnedBy(id.to_owned())
    }

    /// Claim precondition for a claim made at `now`.
    pub fn claim(now: i64, timeout: i64) -> Condition {
        Condition::Claimable {
            expiry: now.saturating_sub(timeout),
        }
    }

    pub fn holds(&self, current: &LeaseRecord) -> bool {
        match self {
            Condition::OwnedBy(id) => current.is_owned_by(id),
            Condition::Claimable { expiry } => {
                current.is_unset() || current.last_renewal <= *expiry
            }
        }
    }
}

/// Renders the condition in the expression syntax of conditional-put
/// key-value services, for logging.
impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::OwnedBy(id) => {
                write!(f, "{} = :name [:name={}]", ATTR_LEADER_NAME, id)
            }
            Condition::Claimable { expiry } => write!(
                f,
                "attribute_not_exists({}) OR {} <= :expiry [:expiry={}]",
                ATTR_LEADER_NAME, ATTR_LAST_UPDATE, expiry
            ),
        }
    }
}
