//! Configuration types for the cachepatch daemon
//!
//! Deserialized from a TOML file; every field has a default so a partial
//! (or absent) file still yields a runnable configuration. The cache root
//! and client log directory are the only values with no usable default on
//! their own — the daemon treats failure to resolve them as fatal.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for the daemon
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Cache layout configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Game client observation configuration
    #[serde(default)]
    pub client: ClientConfig,
    /// Content index configuration
    #[serde(default)]
    pub index: IndexConfig,
    /// Watcher and tailer timing configuration
    #[serde(default)]
    pub watch: WatchConfig,
    /// Patch pipeline configuration
    #[serde(default)]
    pub patch: PatchConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cache directory layout (consumed, not owned by the daemon).
///
/// The expected shape is
/// `<root>/<stable name>/<hex version>/{marker, payload}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache root directory; when unset the daemon refuses to start.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Noise subdirectory under the root that is never scanned
    #[serde(default = "default_skip_dir")]
    pub skip_dir: String,
    /// Companion marker file name within a version directory
    #[serde(default = "default_marker_file")]
    pub marker_file: String,
    /// Payload file name within a version directory
    #[serde(default = "default_payload_file")]
    pub payload_file: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: None,
            skip_dir: default_skip_dir(),
            marker_file: default_marker_file(),
            payload_file: default_payload_file(),
        }
    }
}

/// Where the client writes its rotating log files and which lines flip the
/// load-state gate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Directory containing the client's log files
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Log file name prefix; the newest match is tailed
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    /// Substring marking the start of asset preparation (gate -> Loading)
    #[serde(default = "default_loading_marker")]
    pub loading_marker: String,
    /// Substring marking world entry (gate -> Idle)
    #[serde(default = "default_idle_marker")]
    pub idle_marker: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            log_prefix: default_log_prefix(),
            loading_marker: default_loading_marker(),
            idle_marker: default_idle_marker(),
        }
    }
}

/// Content index configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Path of the persistent index database
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    /// Seconds between periodic index persistence
    #[serde(default = "default_persist_interval_secs")]
    pub persist_interval_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            persist_interval_secs: default_persist_interval_secs(),
        }
    }
}

/// Watcher and tailer timing configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Delay between decode retries for partially written payloads
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Poll interval for appended log lines
    #[serde(default = "default_tail_poll_ms")]
    pub tail_poll_ms: u64,
    /// Seconds between checks for a rotated (newer) log file
    #[serde(default = "default_rotation_poll_secs")]
    pub rotation_poll_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
            tail_poll_ms: default_tail_poll_ms(),
            rotation_poll_secs: default_rotation_poll_secs(),
        }
    }
}

/// Patch pipeline configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PatchConfig {
    /// Optional JSON file mapping artifact ids to byte replacements
    #[serde(default)]
    pub blocklist_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (overridden by `RUST_LOG`)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_skip_dir() -> String {
    "__tmp".to_string()
}

fn default_marker_file() -> String {
    "__info".to_string()
}

fn default_payload_file() -> String {
    "__data".to_string()
}

fn default_log_prefix() -> String {
    "output_log".to_string()
}

fn default_loading_marker() -> String {
    "Preparing assets".to_string()
}

fn default_idle_marker() -> String {
    "Entering world".to_string()
}

fn default_index_path() -> PathBuf {
    PathBuf::from("cachepatch-index.redb")
}

fn default_persist_interval_secs() -> u64 {
    60
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_tail_poll_ms() -> u64 {
    250
}

fn default_rotation_poll_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cache.marker_file, "__info");
        assert_eq!(config.cache.payload_file, "__data");
        assert_eq!(config.index.persist_interval_secs, 60);
        assert!(config.cache.root.is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [cache]
            root = "/var/cache/client"

            [watch]
            retry_delay_ms = 100
            "#,
        )
        .unwrap();
        assert_eq!(
            config.cache.root.as_deref(),
            Some(std::path::Path::new("/var/cache/client"))
        );
        assert_eq!(config.cache.skip_dir, "__tmp");
        assert_eq!(config.watch.retry_delay_ms, 100);
        assert_eq!(config.watch.tail_poll_ms, 250);
        assert_eq!(config.client.loading_marker, "Preparing assets");
    }
}
