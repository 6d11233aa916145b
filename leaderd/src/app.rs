use anyhow::{Error, Result};
use leaderd_election::{
    Belief, Clock, Driver, ElectionConfig, Elector, LeaseRecord, LeaseStore, SqliteStore,
    SystemClock,
};
use tokio::{select, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{cli::Commands, Cli};

pub struct App {
    cli: Cli,
}

impl App {
    pub fn new(cli: Cli) -> Result<App> {
        Ok(App { cli })
    }

    #[tracing::instrument(skip_all)]
    pub async fn run(&mut self) -> Result<()> {
        if self.cli.version() {
            println!("leaderd {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }

        // Fail fast on missing configuration, before touching the store.
        let table = self.cli.table()?;
        let res = match self.cli.command() {
            Commands::Run => {
                let config = self.cli.election_config()?;
                let store = SqliteStore::open(&self.cli.db, table)?;
                self.run_election(config, store, SystemClock, CancellationToken::new())
                    .await
            }
            Commands::Status => {
                let store = SqliteStore::open_existing(&self.cli.db, table)?;
                let status = self.status(store, &SystemClock).await?;
                println!("{}", status);
                Ok(())
            }
            Commands::Version => Ok(()),
        };
        if let Err(e) = &res {
            error!(err = format!("{:#}", e));
        }
        res
    }

    /// Take part in the election until `cancel` fires or ctrl-c is received.
    #[tracing::instrument(skip_all, fields(node = %config.node_id), err)]
    pub async fn run_election<S, C>(
        &self,
        config: ElectionConfig,
        store: S,
        clock: C,
        cancel: CancellationToken,
    ) -> Result<()>
    where
        S: LeaseStore + 'static,
        C: Clock + 'static,
    {
        let mut tasks = JoinSet::new();

        let elector = Elector::new(config, store);
        let mut belief_rx = elector.subscribe();

        // Report leadership transitions
        let monitor_cancel = cancel.clone();
        tasks.spawn(async move {
            let mut leading = false;
            loop {
                select! {
                    _ = monitor_cancel.cancelled() => {
                        return Ok::<(), Error>(());
                    }
                    res = belief_rx.changed() => {
                        if res.is_err() {
                            return Ok(());
                        }
                        let belief = belief_rx.borrow_and_update().clone();
                        match (leading, &belief) {
                            (false, Belief::Leader) => info!("this node is now the leader"),
                            (true, _) if !belief.is_leader() => {
                                warn!(%belief, "this node is no longer the leader")
                            }
                            _ => {}
                        }
                        leading = belief.is_leader();
                    }
                }
            }
        });

        // Set up ctrl-c handler
        let ctrl_c_cancel = cancel.clone();
        tasks.spawn(async move {
            select! {
                _ = ctrl_c_cancel.cancelled() => {
                    Ok::<(), Error>(())
                }
                res = tokio::signal::ctrl_c() => {
                    res?;
                    info!("Received ctrl-c, shutting down...");
                    ctrl_c_cancel.cancel();
                    Ok(())
                }
            }
        });

        let mut driver = Driver::new(elector, clock);
        let driver_cancel = cancel.clone();
        tasks.spawn(async move { driver.run(driver_cancel).await });

        let mut res = Ok(());
        while let Some(joined) = tasks.join_next().await {
            // Any task ending brings the rest down with it.
            cancel.cancel();
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => res = Err(e),
                Err(e) => res = Err(e.into()),
            }
        }
        res
    }

    /// Describe the current lease holder from a single read of the store.
    pub async fn status<S: LeaseStore, C: Clock>(&self, mut store: S, clock: &C) -> Result<String> {
        let record = store.read().await?;
        Ok(describe_lease(&record, clock.now(), i64::try_from(self.cli.timeout)?))
    }
}

fn describe_lease(record: &LeaseRecord, now: i64, timeout: i64) -> String {
    match record.owner() {
        None => "no leader".to_owned(),
        Some(owner) => {
            let age = now - record.last_renewal;
            let state = if record.is_expired(now, timeout) {
                "expired"
            } else {
                "live"
            };
            format!(
                "leader {} (last renewed at {}, {}s ago, {})",
                owner, record.last_renewal, age, state
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::Parser;
    use leaderd_election::{ManualClock, MemoryStore};

    use super::*;

    fn app(args: &[&str]) -> App {
        let cli = Cli::try_parse_from(std::iter::once("leaderd").chain(args.iter().copied()))
            .unwrap();
        App::new(cli).unwrap()
    }

    #[test]
    fn test_describe_lease() {
        assert_eq!(describe_lease(&LeaseRecord::unset(), 100, 60), "no leader");
        assert_eq!(
            describe_lease(&LeaseRecord::held_by("a", 90), 100, 60),
            "leader a (last renewed at 90, 10s ago, live)"
        );
        assert_eq!(
            describe_lease(&LeaseRecord::held_by("a", 30), 100, 60),
            "leader a (last renewed at 30, 70s ago, expired)"
        );
    }

    #[tokio::test]
    async fn test_status_reads_store() {
        let app = app(&["--table", "leader", "status"]);
        let store = MemoryStore::with_record(LeaseRecord::held_by("b", 1000));
        let status = app.status(store, &ManualClock::new(1005)).await.unwrap();
        assert_eq!(status, "leader b (last renewed at 1000, 5s ago, live)");
    }

    #[tokio::test]
    async fn test_missing_table_fails_before_store() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("lease.sqlite");
        let mut app = app(&["--name", "a", "--db", db.to_str().unwrap()]);
        let err = app.run().await.unwrap_err();
        assert_eq!(err.to_string(), "required argument table not provided");
        assert!(!db.exists());
    }

    #[tokio::test]
    async fn test_missing_name_fails_before_store() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("lease.sqlite");
        let mut app = app(&["--table", "leader", "--db", db.to_str().unwrap()]);
        let err = app.run().await.unwrap_err();
        assert_eq!(err.to_string(), "required argument name not provided");
        assert!(!db.exists());
    }

    #[tokio::test]
    async fn test_status_leaves_missing_database_alone() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("typo.sqlite");
        let mut app = app(&["--table", "leader", "--db", db.to_str().unwrap(), "status"]);
        assert!(app.run().await.is_err());
        assert!(!db.exists());
    }

    #[tokio::test]
    async fn test_status_after_run_reads_existing_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("lease.sqlite");
        SqliteStore::open(&db, "leader").unwrap();
        let mut app = app(&["--table", "leader", "--db", db.to_str().unwrap(), "status"]);
        app.run().await.unwrap();
    }

    #[tokio::test]
    async fn test_run_election_claims_and_stops_on_cancel() {
        let app = app(&["--table", "leader", "--name", "a", "--interval", "1"]);
        let config = app.cli.election_config().unwrap();
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();

        let stop = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stop.cancel();
        });
        app.run_election(config, store.clone(), ManualClock::new(1000), cancel)
            .await
            .unwrap();

        assert_eq!(store.record().await, Some(LeaseRecord::held_by("a", 1000)));
    }
}
