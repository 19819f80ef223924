//! Configuration file handling for playship.
//!
//! Settings live in a `playship.toml` file, searched upward from the working
//! directory. Every publishing setting is an optional override; defaults are
//! applied by the pure [`PublishConfig::resolve`] step.
//!
//! # Example
//!
//! ```
//! use playship_config::{Config, load_config};
//! use std::path::Path;
//!
//! let config = load_config(Path::new(".")).expect("load config");
//! let resolved = config.resolve().expect("valid config");
//! println!("publishing to {}", resolved.track);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use playship_retry::RetryStrategyConfig;
use playship_types::{ReleaseStatus, ResolutionStrategy, VersionCode};
use serde::{Deserialize, Serialize};

/// Default configuration file name
pub const CONFIG_FILE: &str = "playship.toml";

pub const DEFAULT_TRACK: &str = "internal";
pub const DEFAULT_USER_FRACTION: f64 = 0.1;
pub const DEFAULT_RESOURCE_DIR: &str = "src/main/play";
pub const DEFAULT_API_BASE: &str = "https://androidpublisher.googleapis.com";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Get the config file path for a directory
pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Complete playship configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Publishing settings
    #[serde(default)]
    pub publish: PublishConfig,
    /// Retry settings for store calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryStrategyConfig>,
    /// HTTP backend settings
    #[serde(default)]
    pub http: HttpConfig,
    /// Where event logs and receipts are written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retry_config(&self) -> RetryStrategyConfig {
        self.retry.clone().unwrap_or_default()
    }

    pub fn api_base(&self) -> &str {
        self.http.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    }

    pub fn http_timeout(&self) -> Duration {
        self.http.timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT)
    }

    pub fn state_dir(&self) -> Option<&Path> {
        self.state_dir.as_deref()
    }

    /// Apply defaults to the publishing settings.
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        self.publish.resolve()
    }

    /// Check every section, including the ones `resolve` does not touch.
    pub fn validate(&self) -> Result<()> {
        self.resolve().context("invalid [publish] settings")?;

        if let Some(retry) = &self.retry {
            if retry.max_attempts == 0 {
                bail!("retry.maxAttempts must be at least 1");
            }
            if !(0.0..=1.0).contains(&retry.jitter) {
                bail!("retry.jitter must be between 0.0 and 1.0 (got {})", retry.jitter);
            }
        }

        if self.http.timeout.is_some_and(|t| t.is_zero()) {
            bail!("http.timeout must be greater than zero");
        }

        Ok(())
    }

    /// Merge this config with another (other takes precedence)
    pub fn merge(&self, other: &Config) -> Config {
        Config {
            publish: self.publish.merge(&other.publish),
            retry: other.retry.clone().or_else(|| self.retry.clone()),
            http: HttpConfig {
                api_base: other
                    .http
                    .api_base
                    .clone()
                    .or_else(|| self.http.api_base.clone()),
                timeout: other.http.timeout.or(self.http.timeout),
            },
            state_dir: other.state_dir.clone().or_else(|| self.state_dir.clone()),
        }
    }
}

/// HTTP backend configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    /// Store API base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Per-request timeout, e.g. `"90s"`
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

/// Raw publishing settings. Every field is an optional override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Path to the service-account key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_credentials: Option<PathBuf>,
    /// Account email, required when the key is not JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_to_app_bundles: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_track: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_fraction: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_obb: Option<String>,
    /// Version code whose expansion file should be reused; negative means none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attach_obb: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_strategy: Option<ResolutionStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_status: Option<ReleaseStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_dir: Option<PathBuf>,
    /// Application id, used by the HTTP backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
}

/// Rejected publishing settings.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("userFraction must be in (0, 1] (got {0})")]
    UserFraction(f64),
    #[error("an inProgress release needs a userFraction below 1.0; use releaseStatus 'completed' for a full rollout")]
    FullRolloutInProgress,
    #[error("{setting} must not be empty")]
    EmptyTrack { setting: &'static str },
    #[error("serviceAccountCredentials is not set")]
    MissingCredentials,
    #[error("packageName is not set")]
    MissingPackageName,
}

impl PublishConfig {
    /// Apply defaults and check cross-field constraints.
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        let track = non_empty(self.track.as_deref(), "track")?
            .unwrap_or(DEFAULT_TRACK)
            .to_string();
        let from_track = non_empty(self.from_track.as_deref(), "fromTrack")?
            .map(str::to_string)
            .unwrap_or_else(|| track.clone());
        let track_obb = non_empty(self.track_obb.as_deref(), "trackObb")?
            .map(str::to_string)
            .unwrap_or_else(|| track.clone());

        let user_fraction = self.user_fraction.unwrap_or(DEFAULT_USER_FRACTION);
        if !(user_fraction > 0.0 && user_fraction <= 1.0) {
            return Err(ConfigError::UserFraction(user_fraction));
        }

        let release_status = self.release_status.unwrap_or_default();
        if release_status == ReleaseStatus::InProgress && user_fraction >= 1.0 {
            return Err(ConfigError::FullRolloutInProgress);
        }

        Ok(ResolvedConfig {
            enabled: self.enabled.unwrap_or(true),
            service_account_credentials: self.service_account_credentials.clone(),
            service_account_email: self.service_account_email.clone(),
            default_to_app_bundles: self.default_to_app_bundles.unwrap_or(false),
            commit: self.commit.unwrap_or(true),
            track,
            from_track,
            user_fraction,
            track_obb,
            attach_obb: self
                .attach_obb
                .and_then(|code| VersionCode::try_from(code).ok()),
            resolution_strategy: self.resolution_strategy.unwrap_or_default(),
            release_status,
            artifact_dir: self.artifact_dir.clone(),
            resource_dir: self
                .resource_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RESOURCE_DIR)),
            package_name: self.package_name.clone(),
        })
    }

    /// Merge this config with another (other takes precedence)
    pub fn merge(&self, other: &PublishConfig) -> PublishConfig {
        PublishConfig {
            enabled: other.enabled.or(self.enabled),
            service_account_credentials: other
                .service_account_credentials
                .clone()
                .or_else(|| self.service_account_credentials.clone()),
            service_account_email: other
                .service_account_email
                .clone()
                .or_else(|| self.service_account_email.clone()),
            default_to_app_bundles: other.default_to_app_bundles.or(self.default_to_app_bundles),
            commit: other.commit.or(self.commit),
            track: other.track.clone().or_else(|| self.track.clone()),
            from_track: other.from_track.clone().or_else(|| self.from_track.clone()),
            user_fraction: other.user_fraction.or(self.user_fraction),
            track_obb: other.track_obb.clone().or_else(|| self.track_obb.clone()),
            attach_obb: other.attach_obb.or(self.attach_obb),
            resolution_strategy: other.resolution_strategy.or(self.resolution_strategy),
            release_status: other.release_status.or(self.release_status),
            artifact_dir: other.artifact_dir.clone().or_else(|| self.artifact_dir.clone()),
            resource_dir: other.resource_dir.clone().or_else(|| self.resource_dir.clone()),
            package_name: other.package_name.clone().or_else(|| self.package_name.clone()),
        }
    }
}

fn non_empty<'a>(
    value: Option<&'a str>,
    setting: &'static str,
) -> Result<Option<&'a str>, ConfigError> {
    match value {
        Some(v) if v.trim().is_empty() => Err(ConfigError::EmptyTrack { setting }),
        other => Ok(other),
    }
}

/// Publishing settings with every default applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    pub enabled: bool,
    pub service_account_credentials: Option<PathBuf>,
    pub service_account_email: Option<String>,
    pub default_to_app_bundles: bool,
    pub commit: bool,
    pub track: String,
    pub from_track: String,
    pub user_fraction: f64,
    pub track_obb: String,
    pub attach_obb: Option<VersionCode>,
    pub resolution_strategy: ResolutionStrategy,
    pub release_status: ReleaseStatus,
    pub artifact_dir: Option<PathBuf>,
    pub resource_dir: PathBuf,
    pub package_name: Option<String>,
}

impl ResolvedConfig {
    /// Whether releases are read from another track.
    pub fn is_promotion(&self) -> bool {
        self.from_track != self.track
    }

    /// Fraction carried on the new release; only staged rollouts have one.
    pub fn effective_user_fraction(&self) -> Option<f64> {
        (self.release_status == ReleaseStatus::InProgress).then_some(self.user_fraction)
    }

    pub fn require_credentials(&self) -> Result<&Path, ConfigError> {
        self.service_account_credentials
            .as_deref()
            .ok_or(ConfigError::MissingCredentials)
    }

    pub fn require_package_name(&self) -> Result<&str, ConfigError> {
        self.package_name
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::MissingPackageName)
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_account_credentials: None,
            service_account_email: None,
            default_to_app_bundles: false,
            commit: true,
            track: DEFAULT_TRACK.to_string(),
            from_track: DEFAULT_TRACK.to_string(),
            user_fraction: DEFAULT_USER_FRACTION,
            track_obb: DEFAULT_TRACK.to_string(),
            attach_obb: None,
            resolution_strategy: ResolutionStrategy::default(),
            release_status: ReleaseStatus::default(),
            artifact_dir: None,
            resource_dir: PathBuf::from(DEFAULT_RESOURCE_DIR),
            package_name: None,
        }
    }
}

/// Load configuration from a directory
pub fn load_config(dir: &Path) -> Result<Config> {
    load_config_from_file(&config_path(dir))
}

/// Load configuration from a specific file path
pub fn load_config_from_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Find configuration file by walking up the directory tree
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir;

    loop {
        let config_file = current.join(CONFIG_FILE);
        if config_file.exists() {
            return Some(config_file);
        }

        match current.parent() {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}
