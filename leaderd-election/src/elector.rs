//! Election engine
//!
//! One [`Elector`] per node. Each tick either renews this node's lease or
//! observes the shared record and claims it once it has expired. Only the
//! store's evaluation of a write precondition moves the node into or out of
//! leadership; transient store errors never do.

use std::fmt;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    config::ElectionConfig,
    error::is_malformed,
    lease::{Condition, LeaseRecord},
    store::{LeaseStore, WriteOutcome},
    Result,
};

/// This node's cached view of who holds the lease.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Belief {
    /// No specific leader known: just started, lost leadership, or the
    /// record was found unset.
    #[default]
    Unknown,
    /// Another node was last observed holding the lease.
    Follower(String),
    /// This node holds the lease.
    Leader,
}

impl Belief {
    pub fn is_leader(&self) -> bool {
        matches!(self, Belief::Leader)
    }
}

impl fmt::Display for Belief {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Belief::Unknown => f.write_str("unknown"),
            Belief::Follower(owner) => write!(f, "following {}", owner),
            Belief::Leader => f.write_str("leader"),
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// Leader refreshed its lease.
    Renewed,
    /// Renewal precondition failed; someone else owns or reset the lease.
    LostLeadership,
    /// Found this node's own lease in the store and resumed leading.
    Resumed,
    /// Claimed an unset or expired lease.
    Claimed,
    /// Tried to claim an expired lease but another node got there first.
    ClaimLost,
    /// Observed a live lease held by another node, or nothing claimable.
    Following { owner: Option<String> },
}

pub struct Elector<S: LeaseStore> {
    config: ElectionConfig,
    store: S,
    belief_tx: watch::Sender<Belief>,
}

impl<S: LeaseStore> Elector<S> {
    pub fn new(config: ElectionConfig, store: S) -> Self {
        let (belief_tx, _) = watch::channel(Belief::Unknown);
        Self {
            config,
            store,
            belief_tx,
        }
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn belief(&self) -> Belief {
        self.belief_tx.borrow().clone()
    }

    pub fn is_leader(&self) -> bool {
        self.belief_tx.borrow().is_leader()
    }

    /// Receive belief changes as they happen.
    pub fn subscribe(&self) -> watch::Receiver<Belief> {
        self.belief_tx.subscribe()
    }

    /// Run one election step at wall-clock time `now` (unix seconds).
    ///
    /// An error is a transient store fault: belief is left as it was and the
    /// caller should try again next interval.
    #[tracing::instrument(skip(self), fields(node = %self.config.node_id))]
    pub async fn tick(&mut self, now: i64) -> Result<Tick> {
        if self.is_leader() {
            self.renew(now).await
        } else {
            self.observe(now).await
        }
    }

    async fn renew(&mut self, now: i64) -> Result<Tick> {
        let record = LeaseRecord::held_by(&self.config.node_id, now);
        let condition = Condition::renewal(&self.config.node_id);
        match self.store.conditional_write(&record, &condition).await? {
            WriteOutcome::Written => {
                debug!(now, "renewed lease");
                Ok(Tick::Renewed)
            }
            WriteOutcome::ConditionFailed => {
                warn!("lost leadership, lease no longer held by this node");
                self.set_belief(Belief::Unknown);
                Ok(Tick::LostLeadership)
            }
        }
    }

    async fn observe(&mut self, now: i64) -> Result<Tick> {
        let record = match self.store.read().await {
            Ok(record) => record,
            Err(err) if is_malformed(&err) => {
                warn!(%err, "lease record is malformed, treating as unset");
                LeaseRecord::unset()
            }
            Err(err) => return Err(err.context("querying current leader")),
        };

        let observed = match record.owner() {
            None => Belief::Unknown,
            Some(owner) if owner == self.config.node_id => Belief::Leader,
            Some(owner) => Belief::Follower(owner.to_owned()),
        };
        self.set_belief(observed);

        if record.is_owned_by(&self.config.node_id) {
            info!(lease = %record, "resuming leadership from stored lease");
            return Ok(Tick::Resumed);
        }

        let timeout = self.config.timeout_secs();
        if !record.is_expired(now, timeout) {
            return Ok(Tick::Following {
                owner: record.owner.clone(),
            });
        }

        info!(expired = %record, "attempting to claim expired lease");
        let claim = LeaseRecord::held_by(&self.config.node_id, now);
        match self
            .store
            .conditional_write(&claim, &Condition::claim(now, timeout))
            .await?
        {
            WriteOutcome::Written => {
                info!("claimed lease, this node is now the leader");
                self.set_belief(Belief::Leader);
                Ok(Tick::Claimed)
            }
            WriteOutcome::ConditionFailed => {
                info!("lease was renewed or claimed by another node first");
                Ok(Tick::ClaimLost)
            }
        }
    }

    fn set_belief(&self, belief: Belief) {
        self.belief_tx.send_if_modified(|current| {
            if *current == belief {
                return false;
            }
            info!(from = %current, to = %belief, "leader changed");
            *current = belief;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn elector(node: &str, store: &MemoryStore) -> Elector<MemoryStore> {
        Elector::new(ElectionConfig::new(node), store.clone())
    }

    #[tokio::test]
    async fn test_starts_unknown() {
        let store = MemoryStore::new();
        let e = elector("x", &store);
        assert_eq!(e.belief(), Belief::Unknown);
        assert!(!e.is_leader());
        assert_eq!(e.node_id(), "x");
    }

    #[tokio::test]
    async fn test_resumes_own_unexpired_lease() {
        let store = MemoryStore::with_record(LeaseRecord::held_by("x", 100));
        let mut e = elector("x", &store);

        assert_eq!(e.tick(110).await.unwrap(), Tick::Resumed);
        assert!(e.is_leader());

        assert_eq!(e.tick(120).await.unwrap(), Tick::Renewed);
        assert_eq!(store.record().await, Some(LeaseRecord::held_by("x", 120)));
    }

    #[tokio::test]
    async fn test_resumes_own_expired_lease_without_claiming() {
        let store = MemoryStore::with_record(LeaseRecord::held_by("x", 100));
        let mut e = elector("x", &store);

        assert_eq!(e.tick(1000).await.unwrap(), Tick::Resumed);
        assert_eq!(store.writes().await, 0);
        assert_eq!(e.tick(1010).await.unwrap(), Tick::Renewed);
        assert_eq!(store.record().await, Some(LeaseRecord::held_by("x", 1010)));
    }

    #[tokio::test]
    async fn test_malformed_record_is_claimed() {
        let store = MemoryStore::new();
        store.corrupt("x", "not-a-number").await;
        let mut e = elector("y", &store);

        assert_eq!(e.tick(500).await.unwrap(), Tick::Claimed);
        assert!(e.is_leader());
        assert_eq!(store.record().await, Some(LeaseRecord::held_by("y", 500)));
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let store = MemoryStore::with_record(LeaseRecord::held_by("x", 100));
        let mut e = elector("y", &store);
        let mut rx = e.subscribe();

        e.tick(101).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), Belief::Follower("x".to_owned()));

        // Same owner again does not notify.
        e.tick(102).await.unwrap();
        assert!(!rx.has_changed().unwrap());

        e.tick(200).await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Belief::Leader);
    }

    #[tokio::test]
    async fn test_renewal_write_error_keeps_leadership() {
        let store = MemoryStore::new();
        let mut e = elector("x", &store);
        assert_eq!(e.tick(10).await.unwrap(), Tick::Claimed);

        store.fail_next_writes(1).await;
        assert!(e.tick(20).await.is_err());
        assert!(e.is_leader());
        assert_eq!(store.record().await, Some(LeaseRecord::held_by("x", 10)));

        assert_eq!(e.tick(30).await.unwrap(), Tick::Renewed);
    }

    #[tokio::test]
    async fn test_claim_write_error_leaves_belief() {
        let store = MemoryStore::with_record(LeaseRecord::held_by("x", 0));
        let mut e = elector("y", &store);
        store.fail_next_writes(1).await;

        assert!(e.tick(1000).await.is_err());
        assert_eq!(e.belief(), Belief::Follower("x".to_owned()));
        assert_eq!(e.tick(1010).await.unwrap(), Tick::Claimed);
    }

    #[test]
    fn test_belief_display() {
        assert_eq!(Belief::Unknown.to_string(), "unknown");
        assert_eq!(Belief::Follower("x".into()).to_string(), "following x");
        assert_eq!(Belief::Leader.to_string(), "leader");
    }
}
