//! Lease-based leader election over a key-value store with conditional
//! writes.
//!
//! Every node runs the same [`Driver`] loop against one shared lease row.
//! Mutual exclusion rests entirely on the store evaluating write
//! preconditions atomically; nodes hold no locks of their own.

mod error;

pub mod clock;
pub mod config;
pub mod driver;
pub mod elector;
pub mod lease;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ElectionConfig};
pub use driver::Driver;
pub use elector::{Belief, Elector, Tick};
pub use error::{is_malformed, is_unavailable, Error, MalformedRecord, Result, Unavailable};
pub use lease::{Condition, LeaseRecord, LOCK_NAME};
pub use store::{LeaseStore, MemoryStore, SqliteStore, WriteOutcome};

#[cfg(test)]
pub mod tests;
