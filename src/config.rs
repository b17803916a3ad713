//! Configuration for devops-promote.
//!
//! Loaded in the following order (later sources override earlier):
//! 1. Default values
//! 2. `<config_dir>/devops-promote/config.toml`, or an explicit file
//! 3. Environment variables with the `DEVOPS_PROMOTE_` prefix, nested keys
//!    split on `__` (e.g. `DEVOPS_PROMOTE_ORG__ACCESS_TOKEN`)

use crate::error::PromoteError;
use crate::promotion::RetryPolicy;
use crate::workflow::WorkflowConfig;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "DEVOPS_PROMOTE_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Org connection settings.
    #[serde(default)]
    pub org: OrgConfig,

    /// Promotion request and watch settings.
    #[serde(default)]
    pub promotion: PromotionConfig,

    /// Local job cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    /// Load from the default file location and the environment.
    pub fn load() -> Result<Self, PromoteError> {
        Self::from_figment(Self::figment(None))
    }

    /// Load from a specific TOML file and the environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PromoteError> {
        Self::from_figment(Self::figment(Some(path.as_ref())))
    }

    /// Provider chain used by [`Config::load`] and [`Config::from_file`].
    pub fn figment(path: Option<&Path>) -> Figment {
        let file = path.map(Path::to_path_buf).or_else(default_config_path);
        let mut figment = Figment::new();
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, PromoteError> {
        figment
            .extract()
            .map_err(|e| PromoteError::Config(e.to_string()))
    }

    /// Reject configurations that cannot reach an org.
    pub fn validate(&self) -> Result<(), PromoteError> {
        if self.org.instance_url.trim().is_empty() {
            return Err(PromoteError::Config(format!(
                "org.instance_url is not set (config file or {}ORG__INSTANCE_URL)",
                ENV_PREFIX
            )));
        }
        if self.org.access_token.trim().is_empty() {
            return Err(PromoteError::Config(format!(
                "org.access_token is not set (config file or {}ORG__ACCESS_TOKEN)",
                ENV_PREFIX
            )));
        }
        if self.promotion.min_wait_minutes > self.promotion.default_wait_minutes {
            return Err(PromoteError::Config(
                "promotion.default_wait_minutes is below promotion.min_wait_minutes".into(),
            ));
        }
        Ok(())
    }

    pub fn workflow_config(&self) -> WorkflowConfig {
        WorkflowConfig {
            retry: self.promotion.retry_policy(),
            named_credential: self.org.named_credential.clone(),
            min_wait: minutes(self.promotion.min_wait_minutes),
            default_wait: minutes(self.promotion.default_wait_minutes),
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("devops-promote").join("config.toml"))
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

/// Org connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct OrgConfig {
    /// Base URL of the org, e.g. `https://example.my.salesforce.com`.
    #[serde(default)]
    pub instance_url: String,

    /// OAuth access token sent as a bearer token.
    #[serde(default)]
    pub access_token: String,

    /// REST API version without the leading `v`.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Named credential fronting the promotion API.
    #[serde(default = "default_named_credential")]
    pub named_credential: String,
}

fn default_api_version() -> String {
    "58.0".to_owned()
}

fn default_named_credential() -> String {
    "sf_devops_NamedCredential".to_owned()
}

impl Default for OrgConfig {
    fn default() -> Self {
        Self {
            instance_url: String::new(),
            access_token: String::new(),
            api_version: default_api_version(),
            named_credential: default_named_credential(),
        }
    }
}

/// Promotion request and watch settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PromotionConfig {
    /// Conflict retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Sleep between conflict retries in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Wait used by synchronous commands when none is given.
    #[serde(default = "default_wait_minutes")]
    pub default_wait_minutes: u64,

    /// Lower bound for `--wait`.
    #[serde(default = "default_min_wait_minutes")]
    pub min_wait_minutes: u64,
}

const fn default_max_retries() -> u32 {
    50
}

const fn default_retry_backoff_ms() -> u64 {
    2000
}

const fn default_wait_minutes() -> u64 {
    33
}

const fn default_min_wait_minutes() -> u64 {
    3
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            default_wait_minutes: default_wait_minutes(),
            min_wait_minutes: default_min_wait_minutes(),
        }
    }
}

impl PromotionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

/// Local job cache settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Cache file. Defaults to `~/.devops-promote/job-cache.json`.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Days before an entry stops counting as a recent job.
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u64,
}

const fn default_ttl_days() -> u64 {
    3
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            ttl_days: default_ttl_days(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_days * 24 * 60 * 60)
    }
}
