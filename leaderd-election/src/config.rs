use std::time::Duration;

use tracing::warn;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("node name must not be empty")]
    MissingNodeId,
    #[error("interval must be at least one second")]
    ZeroInterval,
    #[error("timeout must be at least one second")]
    ZeroTimeout,
}

/// Election parameters for one node.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Identity written into the lease when this node leads.
    pub node_id: String,

    /// Time between ticks; also the delay before retrying after a store error.
    pub interval: Duration,

    /// Seconds without renewal after which a lease may be claimed.
    pub timeout: Duration,
}

impl ElectionConfig {
    pub fn new(node_id: &str) -> ElectionConfig {
        ElectionConfig {
            node_id: node_id.to_owned(),
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> ElectionConfig {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> ElectionConfig {
        self.timeout = timeout;
        self
    }

    pub fn timeout_secs(&self) -> i64 {
        i64::try_from(self.timeout.as_secs()).unwrap_or(i64::MAX)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.node_id.trim().is_empty() {
            return Err(ConfigError::MissingNodeId);
        }
        if self.interval.as_secs() == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.timeout.as_secs() == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.timeout <= self.interval {
            warn!(
                interval = ?self.interval,
                timeout = ?self.timeout,
                "timeout does not exceed interval, a live leader may lose its lease between renewals"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ElectionConfig::new("a");
        assert_eq!(config.interval, Duration::from_secs(10));
        assert_eq!(config.timeout_secs(), 60);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_rejects_empty_node() {
        assert_eq!(
            ElectionConfig::new("  ").validate(),
            Err(ConfigError::MissingNodeId)
        );
    }

    #[test]
    fn test_rejects_zero_durations() {
        let config = ElectionConfig::new("a").with_interval(Duration::from_millis(500));
        assert_eq!(config.validate(), Err(ConfigError::ZeroInterval));
        let config = ElectionConfig::new("a").with_timeout(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::ZeroTimeout));
    }

    #[test]
    fn test_short_timeout_is_allowed() {
        let config = ElectionConfig::new("a")
            .with_interval(Duration::from_secs(30))
            .with_timeout(Duration::from_secs(30));
        assert_eq!(config.validate(), Ok(()));
    }
}
