use std::path::PathBuf;
use std::time::Duration;

/// Daemon settings, read from `MOTORPOOL_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub reconcile_interval: Duration,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            reconcile_interval: Duration::from_millis(30_000),
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let reconcile_ms: Option<u64> = lookup("MOTORPOOL_RECONCILE_INTERVAL_MS")
            .and_then(|s| s.parse().ok())
            .filter(|&ms| ms > 0);
        Self {
            data_dir: lookup("MOTORPOOL_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            reconcile_interval: reconcile_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconcile_interval),
            compact_threshold: lookup("MOTORPOOL_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
            metrics_port: lookup("MOTORPOOL_METRICS_PORT").and_then(|s| s.parse().ok()),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("motorpool.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config, Config::default());
        assert_eq!(config.wal_path(), PathBuf::from("./data/motorpool.wal"));
    }

    #[test]
    fn reads_every_variable() {
        let config = Config::from_lookup(lookup(&[
            ("MOTORPOOL_DATA_DIR", "/var/lib/motorpool"),
            ("MOTORPOOL_RECONCILE_INTERVAL_MS", "500"),
            ("MOTORPOOL_COMPACT_THRESHOLD", "42"),
            ("MOTORPOOL_METRICS_PORT", "9100"),
        ]));
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/motorpool"));
        assert_eq!(config.reconcile_interval, Duration::from_millis(500));
        assert_eq!(config.compact_threshold, 42);
        assert_eq!(config.metrics_port, Some(9100));
    }

    #[test]
    fn garbage_falls_back() {
        let config = Config::from_lookup(lookup(&[
            ("MOTORPOOL_RECONCILE_INTERVAL_MS", "0"),
            ("MOTORPOOL_COMPACT_THRESHOLD", "lots"),
            ("MOTORPOOL_METRICS_PORT", "99999"),
        ]));
        assert_eq!(config.reconcile_interval, Duration::from_millis(30_000));
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.metrics_port, None);
    }
}
