//! Lease store clients
//!
//! A lease store holds the single lease row and evaluates write
//! preconditions atomically. Every backend evaluates preconditions with
//! [`Condition::holds`] so they agree on the contract exactly.

use std::future::Future;

use crate::{
    lease::{Condition, LeaseRecord},
    Result,
};

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Result of a conditional write that reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Precondition held and the record was replaced.
    Written,
    /// Precondition did not hold; the stored record is unchanged.
    ConditionFailed,
}

pub trait LeaseStore: Clone + Send {
    /// Read the current lease. An absent row reads as [`LeaseRecord::unset`].
    /// A row that cannot be decoded fails with an error carrying
    /// [`crate::MalformedRecord`].
    fn read(&mut self) -> impl Future<Output = Result<LeaseRecord>> + Send;

    /// Replace the lease with `record` if `condition` holds for the stored
    /// record. A malformed stored record is evaluated as unset.
    fn conditional_write(
        &mut self,
        record: &LeaseRecord,
        condition: &Condition,
    ) -> impl Future<Output = Result<WriteOutcome>> + Send;
}
