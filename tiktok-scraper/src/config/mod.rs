//! Scraper configuration.
//!
//! [`ScraperConfig`] is read from a JSON file (created with defaults when missing) and
//! validated once at startup. The streamer list lives in its own text file, see
//! [`streamers`].

pub mod streamers;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tiktok_live::DEFAULT_BRIDGE_URL;
use tracing::{info, warn};

use crate::utils::fs;
use crate::{Error, Result};

pub use streamers::{StreamerTarget, load_streamers, parse_streamers};

/// Default stats file name, placed in the output directory.
pub const DEFAULT_STATS_FILE: &str = "scraper_stats.json";

/// Runtime configuration for the capture loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// First reconnect delay after a failure
    pub reconnect_baseline_seconds: u64,
    /// Upper bound for the exponential reconnect delay
    pub reconnect_max_seconds: u64,
    /// Minimum wait after a rate-limited attempt
    pub rate_limit_floor_seconds: u64,
    /// Cooldown applied to every streamer after any rate limit (0 disables)
    pub global_rate_limit_seconds: u64,
    /// Fingerprints remembered per streamer
    pub dedup_capacity: usize,
    /// How long a fingerprint suppresses repeats (0 = until evicted)
    pub dedup_window_seconds: u64,
    /// A session must stay live this long to reset the failure count
    pub stability_seconds: u64,
    pub stats_interval_seconds: u64,
    /// Multiplicative jitter on backoff sleeps, e.g. 0.2 = x[0.8, 1.2]
    pub reconnect_jitter: f64,
    pub connect_timeout_seconds: u64,
    pub shutdown_grace_seconds: u64,
    pub max_concurrent_connections: usize,
    pub min_connection_interval_seconds: u64,
    /// Drop comments made only of emoji and whitespace
    pub skip_emoji_only: bool,
    /// Write `author: text` instead of the bare comment text
    pub include_author: bool,
    /// Put each streamer's files in `output_dir/<username>/`
    pub per_streamer_dirs: bool,
    pub output_dir: PathBuf,
    /// Stats file; defaults to `output_dir/scraper_stats.json`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats_file: Option<PathBuf>,
    /// Bridge endpoint template with a `{username}` placeholder
    pub bridge_url: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            reconnect_baseline_seconds: 15,
            reconnect_max_seconds: 1800,
            rate_limit_floor_seconds: 3600,
            global_rate_limit_seconds: 1800,
            dedup_capacity: 1000,
            dedup_window_seconds: 30,
            stability_seconds: 60,
            stats_interval_seconds: 60,
            reconnect_jitter: 0.2,
            connect_timeout_seconds: 45,
            shutdown_grace_seconds: 10,
            max_concurrent_connections: 2,
            min_connection_interval_seconds: 5,
            skip_emoji_only: true,
            include_author: false,
            per_streamer_dirs: false,
            output_dir: PathBuf::from("output"),
            stats_file: None,
            bridge_url: DEFAULT_BRIDGE_URL.to_string(),
        }
    }
}

impl ScraperConfig {
    /// Load the config file, creating it with defaults when it does not exist.
    ///
    /// An unreadable or malformed file is an error; it is never silently replaced.
    /// Values are not range-checked here; call [`ScraperConfig::validate`] once any
    /// overrides have been applied.
    pub async fn load_or_create(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => {
                let config: Self = serde_json::from_str(&contents).map_err(|e| {
                    Error::config(format!("invalid config file {}: {}", path.display(), e))
                })?;
                info!(path = %path.display(), "Loaded configuration");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                warn!(path = %path.display(), "Config file not found, creating defaults");
                fs::ensure_parent_dir_with_op("creating config directory", path).await?;
                let json = serde_json::to_string_pretty(&config)?;
                tokio::fs::write(path, json)
                    .await
                    .map_err(|e| fs::io_error("writing default config", path, e))?;
                Ok(config)
            }
            Err(e) => Err(Error::config(format!(
                "cannot read config file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.reconnect_baseline_seconds == 0 {
            return Err(Error::config("reconnect_baseline_seconds must be > 0"));
        }
        if self.reconnect_max_seconds < self.reconnect_baseline_seconds {
            return Err(Error::config(
                "reconnect_max_seconds must be >= reconnect_baseline_seconds",
            ));
        }
        if self.dedup_capacity == 0 {
            return Err(Error::config("dedup_capacity must be > 0"));
        }
        if self.stats_interval_seconds == 0 {
            return Err(Error::config("stats_interval_seconds must be > 0"));
        }
        if !(0.0..1.0).contains(&self.reconnect_jitter) {
            return Err(Error::config("reconnect_jitter must be in [0, 1)"));
        }
        if self.max_concurrent_connections == 0 {
            return Err(Error::config("max_concurrent_connections must be > 0"));
        }
        if self.connect_timeout_seconds == 0 {
            return Err(Error::config("connect_timeout_seconds must be > 0"));
        }
        if !self.bridge_url.contains("{username}") {
            return Err(Error::config("bridge_url must contain {username}"));
        }
        Ok(())
    }

    pub fn reconnect_baseline(&self) -> Duration {
        Duration::from_secs(self.reconnect_baseline_seconds)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_seconds)
    }

    pub fn rate_limit_floor(&self) -> Duration {
        Duration::from_secs(self.rate_limit_floor_seconds)
    }

    pub fn global_rate_limit(&self) -> Duration {
        Duration::from_secs(self.global_rate_limit_seconds)
    }

    /// Dedup window, `None` for a pure capacity policy.
    pub fn dedup_window(&self) -> Option<Duration> {
        (self.dedup_window_seconds > 0).then(|| Duration::from_secs(self.dedup_window_seconds))
    }

    pub fn stability(&self) -> Duration {
        Duration::from_secs(self.stability_seconds)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    pub fn min_connection_interval(&self) -> Duration {
        Duration::from_secs(self.min_connection_interval_seconds)
    }

    /// Resolved stats file path.
    pub fn stats_path(&self) -> PathBuf {
        self.stats_file
            .clone()
            .unwrap_or_else(|| self.output_dir.join(DEFAULT_STATS_FILE))
    }

    /// Directory that receives a streamer's session files.
    pub fn streamer_output_dir(&self, username: &str) -> PathBuf {
        if self.per_streamer_dirs {
            self.output_dir.join(username)
        } else {
            self.output_dir.clone()
        }
    }
}
