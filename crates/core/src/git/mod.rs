//! Git and hosting-provider operations for mergestage.
//!
//! The integration pipeline talks to two narrow seams: [`VersionControl`]
//! for everything that touches the working directory, and [`ProposalHost`]
//! for the pull-request API. [`GitClient`] and [`GitHubClient`] are the
//! production implementations.

pub mod client;
pub mod github;

use std::path::Path;

use async_trait::async_trait;

use crate::errors::{GitError, GitHubError};
use crate::models::ProposalCandidate;

pub use client::GitClient;
pub use github::GitHubClient;

/// Conflict bookkeeping slot of a file during an unresolved merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Common ancestor (index stage 1).
    Base,
    /// Integration side (index stage 2).
    Ours,
    /// Incoming proposal side (index stage 3).
    Theirs,
}

impl Stage {
    pub fn index_stage(self) -> u8 {
        match self {
            Self::Base => 1,
            Self::Ours => 2,
            Self::Theirs => 3,
        }
    }
}

/// Side of a conflicted merge that can be checked out wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Ours,
    Theirs,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ours => write!(f, "ours"),
            Self::Theirs => write!(f, "theirs"),
        }
    }
}

/// Primitive version-control operations used by the integration pipeline.
///
/// Every operation either succeeds with its output or fails with a typed
/// [`GitError`]. Merge operations report unresolved content as
/// [`GitError::MergeConflict`] so callers can branch on it explicitly.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Clone `branch` of `url` into `dest`.
    async fn clone_repo(&self, url: &str, dest: &Path, branch: &str) -> Result<(), GitError>;

    /// Fetch `remote_ref` from `origin` into the local branch `local_branch`.
    async fn fetch_ref(&self, dir: &Path, remote_ref: &str, local_branch: &str)
        -> Result<(), GitError>;

    /// Create (or with `force`, reset) branch `name` at `base`.
    async fn create_branch(&self, dir: &Path, name: &str, base: &str, force: bool)
        -> Result<(), GitError>;

    async fn checkout(&self, dir: &Path, branch: &str) -> Result<(), GitError>;

    /// Squash-merge `branch` into the checked-out branch without committing.
    async fn squash_merge(&self, dir: &Path, branch: &str) -> Result<(), GitError>;

    async fn commit(&self, dir: &Path, message: &str) -> Result<(), GitError>;

    async fn push(&self, dir: &Path, force: bool, from: &str, to: &str) -> Result<(), GitError>;

    /// Paths with unresolved conflicts, in index order.
    async fn list_conflicted_files(&self, dir: &Path) -> Result<Vec<String>, GitError>;

    /// Content of `file` at the given conflict stage.
    async fn read_staged_file(&self, dir: &Path, stage: Stage, file: &str)
        -> Result<String, GitError>;

    /// Merge the changes from `base` to `incoming` into the working file `target`.
    async fn three_way_merge_file(
        &self,
        dir: &Path,
        target: &str,
        base: &Path,
        incoming: &Path,
    ) -> Result<(), GitError>;

    /// Discard staged and working-tree changes back to `HEAD`.
    async fn reset_hard(&self, dir: &Path) -> Result<(), GitError>;

    /// Subjects of the newest `count` commits on `branch`, newest first.
    async fn list_recent_commit_messages(&self, dir: &Path, branch: &str, count: usize)
        -> Result<Vec<String>, GitError>;

    async fn branch_exists(&self, dir: &Path, branch: &str) -> Result<bool, GitError>;

    /// Number of commits reachable from `from` but not from `to`.
    async fn commit_distance(&self, dir: &Path, from: &str, to: &str) -> Result<usize, GitError>;

    async fn stage_file(&self, dir: &Path, file: &str) -> Result<(), GitError>;

    /// Replace a conflicted file with one side's version.
    async fn checkout_file_from_side(&self, dir: &Path, file: &str, side: Side)
        -> Result<(), GitError>;
}

/// Pull-request operations of the hosting provider.
#[async_trait]
pub trait ProposalHost: Send + Sync {
    /// Open proposals, oldest first, at most `limit`.
    async fn list_open_proposals(&self, limit: usize)
        -> Result<Vec<ProposalCandidate>, GitHubError>;

    async fn add_label(&self, number: u64, label: &str) -> Result<(), GitHubError>;

    /// Remove `label`; an absent label is not an error.
    async fn remove_label(&self, number: u64, label: &str) -> Result<(), GitHubError>;
}
