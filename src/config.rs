//! Application-level configuration loading: tracker cadence, rate limits and credential policy.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationSeconds, serde_as};
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "SERIES_TRACKER_CONFIG_PATH";

#[derive(Debug, Clone, Default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    pub tracker: TrackerConfig,
    pub rate_limit: RateLimitConfig,
    pub credentials: CredentialConfig,
}

/// Polling cadence, backoff and pause policy applied by every series tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Delay between two regular polls of an active tracker.
    pub poll_interval: Duration,
    /// Minimum delay between two probes of a tracker paused by errors.
    pub probe_interval: Duration,
    /// Backoff applied after the first consecutive failure.
    pub backoff_base_minutes: u64,
    /// Ceiling for the doubling backoff.
    pub backoff_cap_minutes: u64,
    /// Consecutive failures after which an active tracker pauses.
    pub pause_threshold: u32,
    /// How far before `last_updated` each fetch window starts.
    pub fetch_overlap: Duration,
    /// Upper bound of the random delay added before a new tracker's first poll.
    pub initial_stagger: Duration,
    /// Retention of archived snapshots of stopped and completed trackers.
    pub archive_ttl: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(120),
            probe_interval: Duration::from_secs(15 * 60),
            backoff_base_minutes: 1,
            backoff_cap_minutes: 30,
            pause_threshold: 5,
            fetch_overlap: Duration::from_secs(60 * 60),
            initial_stagger: Duration::from_secs(10),
            archive_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl TrackerConfig {
    /// Backoff in minutes after `consecutive_errors` failures: doubling from the base, capped.
    pub fn backoff_minutes(&self, consecutive_errors: u32) -> u64 {
        if consecutive_errors == 0 {
            return 0;
        }
        let factor = 1u64
            .checked_shl(consecutive_errors - 1)
            .unwrap_or(u64::MAX);
        self.backoff_base_minutes
            .saturating_mul(factor)
            .min(self.backoff_cap_minutes)
    }

    /// Delay before the next probe of a tracker paused by errors.
    pub fn probe_delay(&self, consecutive_errors: u32) -> Duration {
        let backoff = Duration::from_secs(self.backoff_minutes(consecutive_errors) * 60);
        self.probe_interval.max(backoff)
    }
}

/// Admission-control budget shared by every call to the stats provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_calls: usize,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: 10,
            window: Duration::from_secs(10),
        }
    }
}

/// Refresh policy for the stats provider credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialConfig {
    /// Tokens expiring within this margin are refreshed ahead of time.
    pub safety_margin: Duration,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            safety_margin: Duration::from_secs(60),
        }
    }
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|err| {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to parse config; falling back to defaults"
                );
                Self::default()
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document; omitted keys keep their default values.
    pub fn parse(contents: &str) -> serde_json::Result<Self> {
        let raw = serde_json::from_str::<RawConfig>(contents)?;
        let config: Self = raw.into();
        info!(
            poll_interval_secs = config.tracker.poll_interval.as_secs(),
            max_calls = config.rate_limit.max_calls,
            "loaded tracker configuration"
        );
        Ok(config)
    }
}

#[derive(Debug, Default, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde(default)]
    tracker: RawTracker,
    #[serde(default)]
    rate_limit: RawRateLimit,
    #[serde(default)]
    credentials: RawCredentials,
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
struct RawTracker {
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default)]
    poll_interval: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default)]
    probe_interval: Option<Duration>,
    backoff_base_minutes: Option<u64>,
    backoff_cap_minutes: Option<u64>,
    pause_threshold: Option<u32>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default)]
    fetch_overlap: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default)]
    initial_stagger: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default)]
    archive_ttl: Option<Duration>,
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
struct RawRateLimit {
    max_calls: Option<usize>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default)]
    window: Option<Duration>,
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
struct RawCredentials {
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default)]
    safety_margin: Option<Duration>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let tracker_defaults = TrackerConfig::default();
        let t = value.tracker;
        let tracker = TrackerConfig {
            poll_interval: t.poll_interval.unwrap_or(tracker_defaults.poll_interval),
            probe_interval: t.probe_interval.unwrap_or(tracker_defaults.probe_interval),
            backoff_base_minutes: t
                .backoff_base_minutes
                .unwrap_or(tracker_defaults.backoff_base_minutes)
                .max(1),
            backoff_cap_minutes: t
                .backoff_cap_minutes
                .unwrap_or(tracker_defaults.backoff_cap_minutes),
            pause_threshold: t
                .pause_threshold
                .unwrap_or(tracker_defaults.pause_threshold)
                .max(1),
            fetch_overlap: t.fetch_overlap.unwrap_or(tracker_defaults.fetch_overlap),
            initial_stagger: t.initial_stagger.unwrap_or(tracker_defaults.initial_stagger),
            archive_ttl: t.archive_ttl.unwrap_or(tracker_defaults.archive_ttl),
        };

        let limit_defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            max_calls: value
                .rate_limit
                .max_calls
                .unwrap_or(limit_defaults.max_calls)
                .max(1),
            window: value.rate_limit.window.unwrap_or(limit_defaults.window),
        };

        let credentials = CredentialConfig {
            safety_margin: value
                .credentials
                .safety_margin
                .unwrap_or(CredentialConfig::default().safety_margin),
        };

        Self {
            tracker,
            rate_limit,
            credentials,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
