//! Error types for the mergestage core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Rules(#[from] RulesError),

    #[error(transparent)]
    Integration(#[from] IntegrationError),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from local Git operations (CLI and `git2`).
#[derive(Debug, Error)]
pub enum GitError {
    /// The `git` binary could not be spawned.
    #[error("git binary not found: {0}")]
    BinaryNotFound(String),

    /// A `git` command exited with a non-zero status.
    #[error("git command failed (exit {exit_code}): {command}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// A merge left unresolved conflict markers behind.
    #[error("git merge conflict: {0}")]
    MergeConflict(String),

    /// The working directory is not a git repository.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// The requested index stage holds no entry for the path.
    #[error("no stage {stage} entry for '{path}'")]
    StageEntryMissing { stage: u8, path: String },

    /// Command output could not be interpreted.
    #[error("unexpected git output: {0}")]
    UnexpectedOutput(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl GitError {
    /// Whether this error is a merge conflict rather than a hard failure.
    pub fn is_merge_conflict(&self) -> bool {
        matches!(self, Self::MergeConflict(_))
    }
}

// ---------------------------------------------------------------------------
// GitHub API errors
// ---------------------------------------------------------------------------

/// Errors from GitHub REST API interactions.
#[derive(Debug, Error)]
pub enum GitHubError {
    /// HTTP-level transport error (network, TLS, etc.).
    #[error("GitHub HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The API returned a non-success status code.
    #[error("GitHub API error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },

    /// Authentication token is missing or invalid.
    #[error("GitHub authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Rate limit exceeded.
    #[error("GitHub rate limit exceeded, resets at {reset_at}")]
    RateLimited { reset_at: String },

    /// The requested resource (or label) does not exist.
    #[error("GitHub resource not found: {0}")]
    NotFound(String),

    /// JSON deserialization failure.
    #[error("GitHub response parse error: {0}")]
    ParseError(String),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Conflict rule errors
// ---------------------------------------------------------------------------

/// Errors from loading the conflict-resolution rule document.
#[derive(Debug, Error)]
pub enum RulesError {
    /// The document could not be parsed.
    #[error("conflict rules parse error in '{path}': {detail}")]
    ParseError { path: String, detail: String },

    /// An ignore-line pattern is not a valid regular expression.
    #[error("invalid ignore pattern for '{file}': {pattern}: {detail}")]
    InvalidPattern {
        file: String,
        pattern: String,
        detail: String,
    },

    /// Generic I/O error reading the rules file.
    #[error("conflict rules I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A rule lookup was needed but the session's document failed to load.
    #[error("conflict rules unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Integration session errors
// ---------------------------------------------------------------------------

/// Errors that abort an integration session.
///
/// Per-proposal failures never surface here; they are recorded in the
/// session report instead.
#[derive(Debug, Error)]
pub enum IntegrationError {
    /// Clone or initial branch creation failed.
    #[error("integration setup failed during {step}: {source}")]
    Setup {
        step: &'static str,
        #[source]
        source: Box<CoreError>,
    },

    /// Listing proposals from the hosting provider failed.
    #[error("failed to list proposals: {0}")]
    Listing(#[source] GitHubError),

    /// The idempotency check could not be completed.
    #[error("idempotency check failed: {0}")]
    Idempotency(#[source] GitError),

    /// Writing bookkeeping, committing or pushing the integration branch failed.
    #[error("failed to finalize integration branch '{branch}': {source}")]
    Finalize {
        branch: String,
        #[source]
        source: GitError,
    },

    /// Working directory provisioning failed.
    #[error("failed to provision working directory: {0}")]
    WorkingDirectory(#[from] std::io::Error),
}

impl IntegrationError {
    /// Wrap a lower-level error as a setup failure of `step`.
    pub fn setup(step: &'static str, source: impl Into<CoreError>) -> Self {
        Self::Setup {
            step,
            source: Box::new(source.into()),
        }
    }
}
