//! Conflict rules and per-file resolution.
//!
//! The conflict subsystem is responsible for:
//! 1. **Rules** -- the declarative per-file hints loaded once per session.
//! 2. **Resolution** -- line substitution and three-way retry per file.
//! 3. **Manifest** -- the version-normalizing strategy for the package manifest.

pub mod manifest;
pub mod resolver;
pub mod rules;

pub use resolver::ConflictResolver;
pub use rules::{ConflictRule, RuleSet};
