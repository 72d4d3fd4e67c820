//! TOML-based configuration system for mergestage.
//!
//! Sensitive values are stored as `_env` fields that reference environment
//! variable names. The actual secrets are resolved at runtime via
//! [`AppConfig::resolve_env_vars`]. Every section is optional so the tool can
//! also run from command-line flags alone.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

/// Environment variable GitHub Actions uses for `owner/repo`.
const GITHUB_REPOSITORY_ENV: &str = "GITHUB_REPOSITORY";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// GitHub repository and API settings.
    #[serde(default)]
    pub github: GitHubConfig,

    /// Integration pipeline settings.
    #[serde(default)]
    pub integration: IntegrationConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// GitHub
// ---------------------------------------------------------------------------

/// GitHub repository and API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// GitHub API base URL (default `https://api.github.com`).
    #[serde(default = "default_github_api_url")]
    pub api_url: String,

    /// Repository in `owner/repo` format. Falls back to `$GITHUB_REPOSITORY`.
    #[serde(default)]
    pub repo: String,

    /// Environment variable holding the GitHub token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Explicit clone URL, mainly for mirrors and local testing.
    #[serde(default)]
    pub clone_url: Option<String>,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_github_api_url() -> String {
    "https://api.github.com".into()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".into()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            repo: String::new(),
            token_env: default_token_env(),
            clone_url: None,
            token: None,
        }
    }
}

impl GitHubConfig {
    /// URL the base branch is cloned from.
    ///
    /// The token is embedded as `x-access-token` basic credentials, so the
    /// result must never be logged.
    pub fn clone_url(&self) -> String {
        if let Some(url) = &self.clone_url {
            return url.clone();
        }
        let host = web_host(&self.api_url);
        match &self.token {
            Some(token) => format!("https://x-access-token:{}@{}/{}.git", token, host, self.repo),
            None => format!("https://{}/{}.git", host, self.repo),
        }
    }
}

/// Map an API base URL to the host serving git over HTTPS.
fn web_host(api_url: &str) -> String {
    let without_scheme = api_url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    if without_scheme == "api.github.com" {
        return "github.com".into();
    }
    // GitHub Enterprise serves the API under `<host>/api/v3`.
    without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
        .to_string()
}

// ---------------------------------------------------------------------------
// Integration
// ---------------------------------------------------------------------------

/// Integration pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationConfig {
    /// Branch the integration branch is rebuilt from (default `main`).
    #[serde(default = "default_base_branch")]
    pub base_branch: String,

    /// Branch receiving the squash-merged proposals (default `stage`).
    #[serde(default = "default_integration_branch")]
    pub integration_branch: String,

    /// Label a proposal must carry to be integrated.
    #[serde(default = "default_approve_label")]
    pub approve_label: String,

    /// Label applied to proposals merged into the integration branch.
    #[serde(default = "default_integrated_label")]
    pub integrated_label: String,

    /// Conflict rules document, relative to the repository root.
    #[serde(default)]
    pub rules_file: Option<PathBuf>,

    /// Dependency manifest handled by the version-conflict strategy.
    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,

    /// Rewrite the manifest version to a timestamped pre-release tag.
    #[serde(default = "default_true")]
    pub stamp_version: bool,

    /// Prefix of the stamped version (`<prefix>.0.<millis>`).
    #[serde(default = "default_version_prefix")]
    pub version_prefix: String,

    /// File listing the integrated proposal titles.
    #[serde(default = "default_notes_file")]
    pub notes_file: String,

    /// Upper bound on proposals considered per run, oldest first.
    #[serde(default = "default_max_proposals")]
    pub max_proposals: usize,

    /// Name recorded on integration commits.
    #[serde(default = "default_committer_name")]
    pub committer_name: String,

    /// Email recorded on integration commits.
    #[serde(default = "default_committer_email")]
    pub committer_email: String,
}

fn default_base_branch() -> String {
    "main".into()
}
fn default_integration_branch() -> String {
    "stage".into()
}
fn default_approve_label() -> String {
    "Approved".into()
}
fn default_integrated_label() -> String {
    "Integrated".into()
}
fn default_manifest_file() -> String {
    "package.json".into()
}
fn default_true() -> bool {
    true
}
fn default_version_prefix() -> String {
    "stage".into()
}
fn default_notes_file() -> String {
    "integrated_prs.txt".into()
}
fn default_max_proposals() -> usize {
    25
}
fn default_committer_name() -> String {
    "GitHub".into()
}
fn default_committer_email() -> String {
    "noreply@github.com".into()
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            base_branch: default_base_branch(),
            integration_branch: default_integration_branch(),
            approve_label: default_approve_label(),
            integrated_label: default_integrated_label(),
            rules_file: None,
            manifest_file: default_manifest_file(),
            stamp_version: default_true(),
            version_prefix: default_version_prefix(),
            notes_file: default_notes_file(),
            max_proposals: default_max_proposals(),
            committer_name: default_committer_name(),
            committer_email: default_committer_email(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level or `EnvFilter` directive.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Resolve the token and the repository fallback from the environment.
    ///
    /// A missing token only logs a warning; [`validate`](Self::validate)
    /// decides whether it is required.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        self.github.token = resolve_optional_env(&self.github.token_env, "github.token_env");

        if self.github.repo.is_empty() {
            if let Some(repo) = resolve_optional_env(GITHUB_REPOSITORY_ENV, "github.repo") {
                self.github.repo = repo;
            }
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.github.repo.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "github.repo".into(),
                detail: "GitHub repo must not be empty".into(),
            });
        }
        if !self.github.repo.contains('/') {
            return Err(ConfigError::InvalidValue {
                field: "github.repo".into(),
                detail: "GitHub repo must be in 'owner/repo' format".into(),
            });
        }
        if self.github.token.is_none() {
            return Err(ConfigError::EnvVarMissing {
                var: self.github.token_env.clone(),
                field: "github.token_env".into(),
            });
        }

        let integration = &self.integration;
        for (field, value) in [
            ("integration.base_branch", &integration.base_branch),
            ("integration.integration_branch", &integration.integration_branch),
            ("integration.approve_label", &integration.approve_label),
            ("integration.integrated_label", &integration.integrated_label),
            ("integration.notes_file", &integration.notes_file),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    detail: "must not be empty".into(),
                });
            }
        }
        if integration.base_branch == integration.integration_branch {
            return Err(ConfigError::InvalidValue {
                field: "integration.integration_branch".into(),
                detail: "must differ from the base branch".into(),
            });
        }
        if integration.max_proposals == 0 {
            return Err(ConfigError::InvalidValue {
                field: "integration.max_proposals".into(),
                detail: "must be > 0".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Commented default configuration, as written by `mergestage init`.
    pub fn default_toml() -> &'static str {
        r#"# mergestage configuration

[github]
api_url = "https://api.github.com"
repo = "owner/repo"
token_env = "GITHUB_TOKEN"

[integration]
base_branch = "main"
integration_branch = "stage"
approve_label = "Approved"
integrated_label = "Integrated"
# rules_file = ".github/merge-rules.toml"
manifest_file = "package.json"
stamp_version = true
version_prefix = "stage"
notes_file = "integrated_prs.txt"
max_proposals = 25

[logging]
level = "info"
"#
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
