use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::trace;

use crate::{
    error::{MalformedRecord, Unavailable},
    lease::{Condition, LeaseRecord},
    Error, Result,
};

use super::{LeaseStore, WriteOutcome};

#[derive(Debug, Clone, Default)]
enum Row {
    #[default]
    Absent,
    Stored(LeaseRecord),
    Malformed {
        owner: String,
        last_update: String,
    },
}

#[derive(Debug, Default)]
struct Inner {
    row: Row,
    fail_reads: u32,
    fail_writes: u32,
    reads: u64,
    writes: u64,
}

/// Linearizable in-memory lease store.
///
/// Clones share the same row, so several electors holding clones contend
/// exactly as separate processes would against one key. Faults can be
/// injected to exercise transient-error handling.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn with_record(record: LeaseRecord) -> MemoryStore {
        MemoryStore {
            inner: Arc::new(Mutex::new(Inner {
                row: Row::Stored(record),
                ..Default::default()
            })),
        }
    }

    /// The stored record, read outside any elector. `None` when the row is
    /// absent or malformed.
    pub async fn record(&self) -> Option<LeaseRecord> {
        match &self.inner.lock().await.row {
            Row::Stored(record) => Some(record.clone()),
            _ => None,
        }
    }

    /// Overwrite the row unconditionally.
    pub async fn set_record(&self, record: LeaseRecord) {
        self.inner.lock().await.row = Row::Stored(record);
    }

    pub async fn clear(&self) {
        self.inner.lock().await.row = Row::Absent;
    }

    /// Store a row whose LastUpdate cannot be parsed.
    pub async fn corrupt(&self, owner: &str, last_update: &str) {
        self.inner.lock().await.row = Row::Malformed {
            owner: owner.to_owned(),
            last_update: last_update.to_owned(),
        };
    }

    pub async fn fail_next_reads(&self, n: u32) {
        self.inner.lock().await.fail_reads = n;
    }

    pub async fn fail_next_writes(&self, n: u32) {
        self.inner.lock().await.fail_writes = n;
    }

    /// Number of read calls seen, including failed ones.
    pub async fn reads(&self) -> u64 {
        self.inner.lock().await.reads
    }

    /// Number of conditional writes seen, including failed ones.
    pub async fn writes(&self) -> u64 {
        self.inner.lock().await.writes
    }
}

impl Row {
    fn decode(&self) -> std::result::Result<LeaseRecord, MalformedRecord> {
        match self {
            Row::Absent => Ok(LeaseRecord::unset()),
            Row::Stored(record) => Ok(record.clone()),
            Row::Malformed { owner, last_update } => Err(MalformedRecord::new(&format!(
                "owner {} has LastUpdate {:?}",
                owner, last_update
            ))),
        }
    }
}

impl LeaseStore for MemoryStore {
    async fn read(&mut self) -> Result<LeaseRecord> {
        let mut inner = self.inner.lock().await;
        inner.reads += 1;
        if inner.fail_reads > 0 {
            inner.fail_reads -= 1;
            return Err(Unavailable::new("injected read fault").into());
        }
        inner.row.decode().map_err(Error::new)
    }

    async fn conditional_write(
        &mut self,
        record: &LeaseRecord,
        condition: &Condition,
    ) -> Result<WriteOutcome> {
        let mut inner = self.inner.lock().await;
        inner.writes += 1;
        if inner.fail_writes > 0 {
            inner.fail_writes -= 1;
            return Err(Unavailable::new("injected write fault").into());
        }
        let current = inner.row.decode().unwrap_or_default();
        if !condition.holds(&current) {
            trace!(%current, %condition, "condition failed");
            return Ok(WriteOutcome::ConditionFailed);
        }
        inner.row = Row::Stored(record.clone());
        Ok(WriteOutcome::Written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{is_malformed, is_unavailable};

    #[tokio::test]
    async fn test_absent_reads_unset() {
        let mut store = MemoryStore::new();
        assert_eq!(store.read().await.unwrap(), LeaseRecord::unset());
        assert_eq!(store.record().await, None);
    }

    #[tokio::test]
    async fn test_claim_on_empty_store() {
        let mut store = MemoryStore::new();
        let outcome = store
            .conditional_write(&LeaseRecord::held_by("x", 100), &Condition::claim(100, 60))
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Written);
        assert_eq!(store.record().await, Some(LeaseRecord::held_by("x", 100)));
    }

    #[tokio::test]
    async fn test_renewal_on_empty_store_fails() {
        let mut store = MemoryStore::new();
        let outcome = store
            .conditional_write(&LeaseRecord::held_by("x", 100), &Condition::renewal("x"))
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::ConditionFailed);
        assert_eq!(store.record().await, None);
    }

    #[tokio::test]
    async fn test_only_one_claim_per_state() {
        let store = MemoryStore::with_record(LeaseRecord::held_by("x", 0));
        let mut a = store.clone();
        let mut b = store.clone();
        let cond = Condition::claim(100, 60);
        let first = a
            .conditional_write(&LeaseRecord::held_by("a", 100), &cond)
            .await
            .unwrap();
        let second = b
            .conditional_write(&LeaseRecord::held_by("b", 100), &cond)
            .await
            .unwrap();
        assert_eq!(first, WriteOutcome::Written);
        assert_eq!(second, WriteOutcome::ConditionFailed);
        assert_eq!(store.record().await, Some(LeaseRecord::held_by("a", 100)));
    }

    #[tokio::test]
    async fn test_malformed_read_and_claim() {
        let mut store = MemoryStore::new();
        store.corrupt("x", "yesterday").await;
        let err = store.read().await.unwrap_err();
        assert!(is_malformed(&err));
        let outcome = store
            .conditional_write(&LeaseRecord::held_by("y", 5), &Condition::claim(5, 60))
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Written);
        assert_eq!(store.read().await.unwrap(), LeaseRecord::held_by("y", 5));
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let mut store = MemoryStore::new();
        store.fail_next_reads(1).await;
        store.fail_next_writes(1).await;
        assert!(is_unavailable(&store.read().await.unwrap_err()));
        assert!(store.read().await.is_ok());
        let err = store
            .conditional_write(&LeaseRecord::held_by("x", 1), &Condition::claim(1, 60))
            .await
            .unwrap_err();
        assert!(is_unavailable(&err));
        assert_eq!(store.record().await, None);
        assert_eq!(store.reads().await, 2);
        assert_eq!(store.writes().await, 1);
    }
}
