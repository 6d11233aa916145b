use backoff::backoff::{Backoff, Constant};
use tokio::{select, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    clock::Clock,
    elector::{Elector, Tick},
    error::is_unavailable,
    store::LeaseStore,
    Result,
};

/// Runs an [`Elector`] on a fixed interval.
///
/// Every tick is followed by the same delay whether it succeeded or hit a
/// store error, so the interval also serves as the retry backoff.
pub struct Driver<S: LeaseStore, C: Clock> {
    elector: Elector<S>,
    clock: C,
    pacing: Constant,
}

impl<S: LeaseStore, C: Clock> Driver<S, C> {
    pub fn new(elector: Elector<S>, clock: C) -> Self {
        let pacing = Constant::new(elector.config().interval);
        Self {
            elector,
            clock,
            pacing,
        }
    }

    pub fn elector(&self) -> &Elector<S> {
        &self.elector
    }

    pub fn into_elector(self) -> Elector<S> {
        self.elector
    }

    /// Run one tick at the clock's current time. Store errors are logged,
    /// not returned.
    pub async fn step(&mut self) -> Option<Tick> {
        let now = self.clock.now();
        match self.elector.tick(now).await {
            Ok(tick) => {
                debug!(now, ?tick, "tick");
                Some(tick)
            }
            Err(err) if is_unavailable(&err) => {
                warn!(
                    now,
                    err = format!("{:#}", err),
                    "lease store unavailable, retrying next interval"
                );
                None
            }
            Err(err) => {
                warn!(
                    now,
                    err = format!("{:#}", err),
                    "election tick failed, retrying next interval"
                );
                None
            }
        }
    }

    /// Tick until cancelled. Cancellation is observed between ticks only;
    /// a store call in flight always completes.
    #[tracing::instrument(skip_all, fields(node = %self.elector.node_id()), err)]
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        loop {
            self.step().await;
            let delay = self
                .pacing
                .next_backoff()
                .unwrap_or(self.elector.config().interval);
            select! {
                _ = cancel.cancelled() => {
                    debug!("election loop cancelled");
                    return Ok(())
                }
                _ = sleep(delay) => {}
            }
        }
    }

    /// Run exactly `n` ticks with the configured delay after each one,
    /// returning what each tick did.
    pub async fn run_ticks(&mut self, n: usize) -> Vec<Option<Tick>> {
        let mut ticks = Vec::with_capacity(n);
        for _ in 0..n {
            ticks.push(self.step().await);
            if let Some(delay) = self.pacing.next_backoff() {
                sleep(delay).await;
            }
        }
        ticks
    }
}
