//! Configuration types for info-fetcher

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path, path::PathBuf, time::Duration};

/// Record store settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "info-fetcher.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Fetch pipeline settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// How long a single identifier may wait for metadata (default: 300 seconds)
    ///
    /// Bounds total run time against absent or very slow swarms. Measured from
    /// registration, so time spent waiting for a worker slot does not count.
    #[serde(default = "default_metadata_timeout", with = "duration_serde")]
    pub metadata_timeout: Duration,

    /// Maximum number of identifiers fetched at once (None = one unit per identifier)
    #[serde(default)]
    pub max_concurrent_fetches: Option<usize>,

    /// Trackers attached to every registered identifier
    #[serde(default = "default_trackers")]
    pub trackers: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            metadata_timeout: default_metadata_timeout(),
            max_concurrent_fetches: None,
            trackers: default_trackers(),
        }
    }
}

/// Swarm client settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Port advertised to trackers (default: 42069)
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// TCP connect timeout per peer (default: 10 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Upper bound on a whole metadata exchange with one peer (default: 30 seconds)
    #[serde(default = "default_peer_timeout", with = "duration_serde")]
    pub peer_timeout: Duration,

    /// Timeout for a single tracker announce (default: 15 seconds)
    #[serde(default = "default_tracker_timeout", with = "duration_serde")]
    pub tracker_timeout: Duration,

    /// Peers contacted in parallel per identifier (default: 8)
    #[serde(default = "default_max_peer_connections")]
    pub max_peer_connections: usize,

    /// Delay between announce rounds when no peer delivered metadata (default: 60 seconds)
    #[serde(default = "default_reannounce_interval", with = "duration_serde")]
    pub reannounce_interval: Duration,

    /// Largest metadata size accepted from a peer (default: 16 MiB)
    #[serde(default = "default_max_metadata_size")]
    pub max_metadata_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            connect_timeout: default_connect_timeout(),
            peer_timeout: default_peer_timeout(),
            tracker_timeout: default_tracker_timeout(),
            max_peer_connections: default_max_peer_connections(),
            reannounce_interval: default_reannounce_interval(),
            max_metadata_size: default_max_metadata_size(),
        }
    }
}

/// Status endpoint settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Serve the status endpoint while fetching (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind (default: 127.0.0.1:6881)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_bind_address(),
        }
    }
}

/// Main configuration for [`crate::MetadataFetcher`]
///
/// Every section and field has a default, so `{}` is a valid config file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Record store settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Fetch pipeline settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Swarm client settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Status endpoint settings
    #[serde(default)]
    pub status: StatusConfig,
}

impl Config {
    /// Load a JSON config file and validate it
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(
                "config",
                format!("failed to read {}: {}", path.display(), e),
            )
        })?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.fetch.metadata_timeout.is_zero() {
            return Err(Error::config(
                "fetch.metadata_timeout",
                "metadata timeout must be greater than zero",
            ));
        }
        if self.fetch.max_concurrent_fetches == Some(0) {
            return Err(Error::config(
                "fetch.max_concurrent_fetches",
                "max concurrent fetches must be at least 1 when set",
            ));
        }
        for tracker in &self.fetch.trackers {
            let url = url::Url::parse(tracker).map_err(|e| {
                Error::config("fetch.trackers", format!("invalid tracker {tracker}: {e}"))
            })?;
            if !matches!(url.scheme(), "http" | "https" | "udp") {
                return Err(Error::config(
                    "fetch.trackers",
                    format!("unsupported tracker scheme {}", url.scheme()),
                ));
            }
        }
        if self.client.max_peer_connections == 0 {
            return Err(Error::config(
                "client.max_peer_connections",
                "max peer connections must be at least 1",
            ));
        }
        if self.client.max_metadata_size == 0 {
            return Err(Error::config(
                "client.max_metadata_size",
                "max metadata size must be greater than zero",
            ));
        }
        Ok(())
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("info-fetcher.db")
}

fn default_metadata_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_trackers() -> Vec<String> {
    vec![
        "udp://tracker.coppersurfer.tk:6969/announce".into(),
        "http://tracker.opentrackr.org:1337/announce".into(),
    ]
}

fn default_listen_port() -> u16 {
    42069
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_peer_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_tracker_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_max_peer_connections() -> usize {
    8
}

fn default_reannounce_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_max_metadata_size() -> usize {
    16 * 1024 * 1024
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6881))
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
