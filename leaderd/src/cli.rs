use std::{path::PathBuf, time::Duration};

use anyhow::{Error, Result};
use clap::{Parser, Subcommand};
use leaderd_election::ElectionConfig;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "leaderd")]
#[command(bin_name = "leaderd")]
pub struct Cli {
    /// Table holding the lease row
    #[arg(long, env = "LEADERD_TABLE")]
    pub table: Option<String>,

    /// Name for this node
    #[arg(long, env = "LEADERD_NAME")]
    pub name: Option<String>,

    /// Lease database shared by all nodes
    #[arg(long, env = "LEADERD_DB", default_value = "leaderd.sqlite")]
    pub db: PathBuf,

    /// How often (seconds) to check if the leader can be replaced, or to
    /// renew the lease when leading
    #[arg(long, env = "LEADERD_INTERVAL", default_value = "10")]
    pub interval: u64,

    /// Seconds without renewal before the lease may be claimed
    #[arg(long, env = "LEADERD_TIMEOUT", default_value = "60")]
    pub timeout: u64,

    #[command(subcommand)]
    pub commands: Option<Commands>,
}

impl Cli {
    pub fn command(&self) -> &Commands {
        self.commands.as_ref().unwrap_or(&Commands::Run)
    }

    pub fn version(&self) -> bool {
        matches!(self.command(), Commands::Version)
    }

    pub fn table(&self) -> Result<&str> {
        match self.table.as_deref() {
            Some(table) if !table.is_empty() => Ok(table),
            _ => Err(Error::msg("required argument table not provided")),
        }
    }

    pub fn election_config(&self) -> Result<ElectionConfig> {
        let name = match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => return Err(Error::msg("required argument name not provided")),
        };
        let config = ElectionConfig::new(name)
            .with_interval(Duration::from_secs(self.interval))
            .with_timeout(Duration::from_secs(self.timeout));
        config.validate()?;
        debug!(?config);
        Ok(config)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Take part in the election until interrupted (default)
    Run,
    /// Print the current lease holder and exit
    Status,
    Version,
}
