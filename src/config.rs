//! Configuration for prship.
//!
//! Loaded with the `config` crate: built-in defaults, then an optional TOML
//! file, then environment variables such as `PRSHIP__DELIVERY__AUTO_MERGE`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::host::MergeMethod;
use crate::timeout::WaitConfig;

/// Config file read from the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "prship.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "PRSHIP";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub github: GitHubSettings,

    #[serde(default)]
    pub delivery: DeliverySettings,

    #[serde(default)]
    pub verification: VerificationSettings,

    #[serde(default)]
    pub merge: MergeSettings,

    #[serde(default)]
    pub paths: PathSettings,

    #[serde(default)]
    pub git: GitSettings,

    #[serde(default)]
    pub failures: FailureSettings,
}

/// Hosted repository and credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubSettings {
    #[serde(default)]
    pub owner: String,

    #[serde(default)]
    pub repo: String,

    /// Environment variable holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// API base URL for GitHub Enterprise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            token_env: default_token_env(),
            api_url: None,
        }
    }
}

/// How a change request is opened and finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySettings {
    #[serde(default = "default_base_branch")]
    pub base_branch: String,

    #[serde(default = "default_remote")]
    pub remote: String,

    /// Wait for verification and merge. When off, the request is left for review.
    #[serde(default)]
    pub auto_merge: bool,

    #[serde(default)]
    pub merge_method: MergeMethod,

    #[serde(default = "default_labels")]
    pub labels: Vec<String>,

    /// Color for labels that have to be created, as six hex digits.
    #[serde(default = "default_label_color")]
    pub label_color: String,

    #[serde(default)]
    pub reviewers: Vec<String>,

    #[serde(default = "default_true")]
    pub delete_remote_branch: bool,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            base_branch: default_base_branch(),
            remote: default_remote(),
            auto_merge: false,
            merge_method: MergeMethod::default(),
            labels: default_labels(),
            label_color: default_label_color(),
            reviewers: Vec::new(),
            delete_remote_branch: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,

    /// Re-runs of failed checks before escalating.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_wait_secs: default_max_wait(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSettings {
    #[serde(default = "default_mergeability_recheck")]
    pub mergeability_recheck_secs: u64,

    /// Maximum merge commit message length in characters.
    #[serde(default = "default_commit_message_limit")]
    pub commit_message_limit: usize,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            mergeability_recheck_secs: default_mergeability_recheck(),
            commit_message_limit: default_commit_message_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSettings {
    #[serde(default = "default_ledger_path")]
    pub ledger: PathBuf,

    /// Directory for failure records and other local state.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default = "default_worktrees_dir")]
    pub worktrees_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            ledger: default_ledger_path(),
            state_dir: default_state_dir(),
            worktrees_dir: default_worktrees_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSettings {
    #[serde(default = "default_git_timeout")]
    pub timeout_secs: u64,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_git_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSettings {
    /// Days to keep failure records (0 keeps them forever).
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

impl Default for FailureSettings {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_labels() -> Vec<String> {
    vec!["automated".to_string()]
}

fn default_label_color() -> String {
    "ededed".to_string()
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    30
}

fn default_max_wait() -> u64 {
    1800
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay() -> u64 {
    60
}

fn default_mergeability_recheck() -> u64 {
    5
}

fn default_commit_message_limit() -> usize {
    1000
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("sprint-status.yaml")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".prship")
}

fn default_worktrees_dir() -> PathBuf {
    PathBuf::from(".worktrees")
}

fn default_git_timeout() -> u64 {
    60
}

fn default_retention_days() -> u64 {
    crate::failure::DEFAULT_RETENTION_DAYS
}

impl DeliveryConfig {
    /// Load configuration. An explicit `path` must exist; otherwise
    /// [`DEFAULT_CONFIG_FILE`] is read if present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (file, required) = match path {
            Some(path) => (path.to_string_lossy().into_owned(), true),
            None => (DEFAULT_CONFIG_FILE.to_string(), false),
        };

        let config: Self = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::new(&file, config::FileFormat::Toml).required(required))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("delivery.labels")
                    .with_list_parse_key("delivery.reviewers"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make waits or merges meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.verification.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "verification.poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.merge.commit_message_limit == 0 {
            return Err(ConfigError::Invalid(
                "merge.commit_message_limit must be greater than zero".to_string(),
            ));
        }
        let color = &self.delivery.label_color;
        if color.len() != 6 || !color.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ConfigError::Invalid(format!(
                "delivery.label_color '{}' must be six hex digits",
                color
            )));
        }
        Ok(())
    }

    /// Owner and repository name, which have no defaults.
    pub fn require_repository(&self) -> Result<(&str, &str), ConfigError> {
        if self.github.owner.trim().is_empty() || self.github.repo.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "github.owner and github.repo must be set".to_string(),
            ));
        }
        Ok((&self.github.owner, &self.github.repo))
    }

    /// Timing of verification waits, merges and git commands.
    pub fn wait_config(&self) -> WaitConfig {
        WaitConfig::new()
            .with_poll_interval(Duration::from_secs(self.verification.poll_interval_secs))
            .with_max_wait(Duration::from_secs(self.verification.max_wait_secs))
            .with_max_retries(self.verification.max_retries)
            .with_retry_delay(Duration::from_secs(self.verification.retry_delay_secs))
            .with_mergeability_recheck(Duration::from_secs(self.merge.mergeability_recheck_secs))
            .with_git_timeout(Duration::from_secs(self.git.timeout_secs))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the defaults to `path`. Refuses to replace an existing file.
    pub fn write_default(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Err(ConfigError::Invalid(format!(
                "{} already exists",
                path.display()
            )));
        }
        let content = Self::default().to_toml()?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
