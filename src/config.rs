use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// File-backed log under `data_dir`.
    Wal,
    Memory,
}

/// Process configuration, read once from `ROOMBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub store: StoreKind,
    pub store_timeout: Duration,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3001,
            data_dir: PathBuf::from("./data"),
            store: StoreKind::Wal,
            store_timeout: Duration::from_millis(5000),
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        let store = match lookup("ROOMBOOK_STORE").as_deref().map(str::trim) {
            Some("memory") => StoreKind::Memory,
            Some("wal") | None => StoreKind::Wal,
            Some(other) => {
                tracing::warn!("unknown ROOMBOOK_STORE {other:?}, using wal");
                StoreKind::Wal
            }
        };

        Self {
            bind: lookup("ROOMBOOK_BIND").unwrap_or(defaults.bind),
            port: lookup("ROOMBOOK_PORT")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.port),
            data_dir: lookup("ROOMBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            store,
            store_timeout: parsed("ROOMBOOK_STORE_TIMEOUT_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
            compact_threshold: parsed("ROOMBOOK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: lookup("ROOMBOOK_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}
