//! mergestage core library.
//!
//! This crate provides the building blocks for rebuilding an integration
//! branch from approved pull requests: configuration, repository and hosting
//! clients, conflict rules and resolution, idempotency detection, and the
//! integration pipeline itself.

pub mod config;
pub mod conflict;
pub mod errors;
pub mod git;
pub mod idempotency;
pub mod integrator;
pub mod models;

// Re-exports for convenience.
pub use config::AppConfig;
pub use conflict::{ConflictResolver, RuleSet};
pub use git::{GitClient, GitHubClient, ProposalHost, VersionControl};
pub use integrator::Integrator;
pub use models::IntegrationReport;
