use std::path::PathBuf;
use std::time::Duration;

use crate::identifier::LocalDomain;

/// Controller settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub local_domain: String,
    pub data_dir: PathBuf,
    pub cleanup_interval: Duration,
    /// Journal records appended before the compactor rewrites the journal.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            local_domain: "localhost".into(),
            data_dir: PathBuf::from("./data"),
            cleanup_interval: Duration::from_secs(60),
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl ControllerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        Self {
            local_domain: lookup("SHONGO_LOCAL_DOMAIN")
                .filter(|d| !d.is_empty())
                .unwrap_or(defaults.local_domain),
            data_dir: lookup("SHONGO_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            cleanup_interval: parsed("SHONGO_CLEANUP_INTERVAL_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.cleanup_interval),
            compact_threshold: parsed("SHONGO_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            metrics_port: lookup("SHONGO_METRICS_PORT").and_then(|p| p.trim().parse().ok()),
        }
    }

    pub fn domain(&self) -> LocalDomain {
        LocalDomain::new(self.local_domain.clone())
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("controller.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> ControllerConfig {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ControllerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(config(&[]), ControllerConfig::default());
    }

    #[test]
    fn reads_every_key() {
        let c = config(&[
            ("SHONGO_LOCAL_DOMAIN", "cz.cesnet"),
            ("SHONGO_DATA_DIR", "/var/lib/shongo"),
            ("SHONGO_CLEANUP_INTERVAL_SECS", "15"),
            ("SHONGO_COMPACT_THRESHOLD", "50"),
            ("SHONGO_METRICS_PORT", "9100"),
        ]);
        assert_eq!(c.domain().name(), "cz.cesnet");
        assert_eq!(c.wal_path(), PathBuf::from("/var/lib/shongo/controller.wal"));
        assert_eq!(c.cleanup_interval, Duration::from_secs(15));
        assert_eq!(c.compact_threshold, 50);
        assert_eq!(c.metrics_port, Some(9100));
    }

    #[test]
    fn garbage_falls_back() {
        let c = config(&[
            ("SHONGO_CLEANUP_INTERVAL_SECS", "0"),
            ("SHONGO_COMPACT_THRESHOLD", "lots"),
            ("SHONGO_METRICS_PORT", "70000"),
        ]);
        assert_eq!(c.cleanup_interval, Duration::from_secs(60));
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.metrics_port, None);
    }
}
