//! Indexer configuration.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Amount of time unreferenced entries are allowed to sit in the index
/// before they are discarded. Making this too short makes operations which
/// temporarily unreference a file (classpath edits, closing and reopening
/// projects) expensive; making it too long wastes space in the store.
pub const DEFAULT_GC_TIMEOUT: Duration = Duration::from_millis(1000 * 60 * 60 * 24 * 3);

/// Environment variable overriding the garbage-collection timeout, in
/// milliseconds.
pub const GC_TIMEOUT_ENV: &str = "JARINDEX_GC_TIMEOUT_MS";

#[derive(Clone, Debug)]
pub struct IndexerConfig {
    pub gc_timeout: Duration,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            gc_timeout: DEFAULT_GC_TIMEOUT,
        }
    }
}

impl IndexerConfig {
    /// Default configuration with the garbage-collection timeout taken from
    /// the environment when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = std::env::var(GC_TIMEOUT_ENV)
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
        {
            config.gc_timeout = Duration::from_millis(ms);
        }
        config
    }

    pub fn with_gc_timeout(mut self, gc_timeout: Duration) -> Self {
        self.gc_timeout = gc_timeout;
        self
    }

    pub fn gc_timeout_ms(&self) -> u64 {
        self.gc_timeout.as_millis() as u64
    }

    /// Amount of time before the "used" timestamp on an entry is refreshed.
    /// Timestamps are not rewritten on every rescan; any timestamp older
    /// than this period gets refreshed so garbage collection never removes
    /// live entries solely due to lazy timestamping.
    pub fn usage_timestamp_update_period_ms(&self) -> u64 {
        self.gc_timeout_ms() / 4
    }
}

/// Returns the current Unix timestamp in milliseconds.
pub fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_millis() as u64)
        .unwrap_or(0)
}
