//! Domain model types used throughout mergestage.
//!
//! These types bridge the hosting client, the conflict resolver and the
//! integration pipeline.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Length of the short revision tag embedded in commit messages.
pub const SHORT_REV_LEN: usize = 7;

// ---------------------------------------------------------------------------
// Proposals
// ---------------------------------------------------------------------------

/// An open pull request considered for integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalCandidate {
    pub number: u64,
    pub title: String,
    pub head_sha: String,
    pub labels: BTreeSet<String>,
    pub state: String,
    pub merged: bool,
    pub created_at: DateTime<Utc>,
}

impl ProposalCandidate {
    /// First seven characters of the head revision.
    pub fn short_rev(&self) -> &str {
        short_rev(&self.head_sha)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    pub fn is_open(&self) -> bool {
        self.state == "open"
    }

    /// Remote ref holding the proposal head.
    pub fn head_ref(&self) -> String {
        format!("pull/{}/head", self.number)
    }

    /// Disposable local branch the head is fetched into.
    pub fn local_branch(&self) -> String {
        format!("pr{}", self.number)
    }

    /// Squash commit message: title, public identifier and short revision tag.
    pub fn commit_message(&self) -> String {
        format!("{} (#{}) (sha:{})", self.title, self.number, self.short_rev())
    }

    /// Line written to the integration notes file.
    pub fn notes_line(&self) -> String {
        format!("{} (#{})", self.title, self.number)
    }

    /// Reason this proposal is not eligible, or `None` when it is.
    pub fn skip_reason(&self, approve_label: &str) -> Option<SkipReason> {
        if !self.is_open() {
            Some(SkipReason::NotOpen(self.state.clone()))
        } else if self.merged {
            Some(SkipReason::AlreadyMerged)
        } else if !self.has_label(approve_label) {
            Some(SkipReason::MissingLabel(approve_label.to_string()))
        } else {
            None
        }
    }
}

/// Truncate a revision to its short tag. Shorter input is returned unchanged.
pub fn short_rev(sha: &str) -> &str {
    match sha.char_indices().nth(SHORT_REV_LEN) {
        Some((idx, _)) => &sha[..idx],
        None => sha,
    }
}

/// Why a candidate was filtered out before the merge loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotOpen(String),
    AlreadyMerged,
    MissingLabel(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOpen(state) => write!(f, "state is not open: {}", state),
            Self::AlreadyMerged => write!(f, "already merged"),
            Self::MissingLabel(label) => write!(f, "required label '{}' missing", label),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution & verdicts
// ---------------------------------------------------------------------------

/// Per-file result of the conflict resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    Resolved,
    Unresolved,
}

impl ResolutionOutcome {
    pub fn is_resolved(self) -> bool {
        self == Self::Resolved
    }
}

/// Per-proposal result of one merge-loop step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ProposalVerdict {
    Merged,
    Failed { reason: String },
}

impl std::fmt::Display for ProposalVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Merged => write!(f, "merged"),
            Self::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

// ---------------------------------------------------------------------------
// Session report
// ---------------------------------------------------------------------------

/// Summary of one integration session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrationReport {
    /// Eligible proposals, in processing order.
    pub attempted: Vec<u64>,
    pub merged: Vec<u64>,
    pub failed: Vec<u64>,
    /// Set when the remote branch already reflected the desired set.
    pub already_integrated: bool,
    /// Whether the integration branch was pushed.
    pub pushed: bool,
    pub started_at: String,
    pub completed_at: Option<String>,
}

impl IntegrationReport {
    /// The session result contract: whether new integration content was produced.
    pub fn has_updates(&self) -> bool {
        self.pushed
    }
}
