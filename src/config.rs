use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Runtime settings, read from `TOOLSHED_*` environment variables.
/// Missing or unparseable values fall back to the defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// WAL appends before the compactor rewrites the log.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub store_timeout: Duration,
    pub retry: RetryPolicy,
    /// Application name carried by every notification.
    pub brand: String,
    pub reconcile_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(30),
            store_timeout: Duration::from_millis(2000),
            retry: RetryPolicy::default(),
            brand: "Toolshed".into(),
            reconcile_interval: Duration::from_secs(10),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|s| s.trim().parse().ok())
        }

        let defaults = Self::default();
        Self {
            data_dir: lookup("TOOLSHED_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: parsed(&lookup, "TOOLSHED_METRICS_PORT"),
            compact_threshold: parsed(&lookup, "TOOLSHED_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            compact_interval: parsed(&lookup, "TOOLSHED_COMPACT_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.compact_interval),
            store_timeout: parsed(&lookup, "TOOLSHED_STORE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
            retry: RetryPolicy {
                max_retries: parsed(&lookup, "TOOLSHED_STORE_RETRIES")
                    .unwrap_or(defaults.retry.max_retries),
                backoff: parsed(&lookup, "TOOLSHED_RETRY_BACKOFF_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.backoff),
            },
            brand: lookup("TOOLSHED_BRAND")
                .filter(|b| !b.trim().is_empty())
                .unwrap_or(defaults.brand),
            reconcile_interval: parsed(&lookup, "TOOLSHED_RECONCILE_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconcile_interval),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(config(&[]), Config::default());
    }

    #[test]
    fn reads_overrides() {
        let c = config(&[
            ("TOOLSHED_DATA_DIR", "/var/lib/toolshed"),
            ("TOOLSHED_METRICS_PORT", "9100"),
            ("TOOLSHED_STORE_TIMEOUT_MS", "750"),
            ("TOOLSHED_STORE_RETRIES", "5"),
            ("TOOLSHED_BRAND", "Barrio Tools"),
            ("TOOLSHED_RECONCILE_INTERVAL_SECS", "3"),
        ]);
        assert_eq!(c.wal_path(), PathBuf::from("/var/lib/toolshed/bookings.wal"));
        assert_eq!(c.metrics_port, Some(9100));
        assert_eq!(c.store_timeout, Duration::from_millis(750));
        assert_eq!(c.retry.max_retries, 5);
        assert_eq!(c.brand, "Barrio Tools");
        assert_eq!(c.reconcile_interval, Duration::from_secs(3));
    }

    #[test]
    fn garbage_falls_back() {
        let c = config(&[
            ("TOOLSHED_METRICS_PORT", "ninety"),
            ("TOOLSHED_COMPACT_THRESHOLD", "-4"),
            ("TOOLSHED_BRAND", "   "),
        ]);
        assert_eq!(c.metrics_port, None);
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.brand, "Toolshed");
    }
}
