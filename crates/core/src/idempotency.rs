//! Detection of an already up-to-date integration branch.
//!
//! A rebuild is skipped when the remote integration branch still sits on the
//! current base tip and its newest proposal commits carry exactly the short
//! revision tags of the desired proposals. Tags are compared as sets, so a
//! reordering of the same proposals is not a change.

use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

use regex_lite::Regex;
use tracing::{debug, info};

use crate::errors::GitError;
use crate::git::VersionControl;
use crate::models::ProposalCandidate;

/// Subject of the commit recording the integration notes.
pub const BOOKKEEPING_COMMIT_MESSAGE: &str = "PR integration notes";

fn sha_marker() -> &'static Regex {
    static SHA_MARKER: OnceLock<Regex> = OnceLock::new();
    SHA_MARKER.get_or_init(|| Regex::new(r"\(sha:(.{7})").expect("sha marker pattern is valid"))
}

/// What the detector concluded about the remote integration branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrationState {
    /// The remote integration branch does not exist.
    BranchMissing,
    /// The base branch gained this many commits since the branch point.
    BaseAdvanced(usize),
    /// The recorded tags differ from the desired proposals.
    TagsDiffer { recorded: Vec<String> },
    /// Nothing to do.
    AlreadyIntegrated,
}

impl IntegrationState {
    pub fn is_integrated(&self) -> bool {
        matches!(self, Self::AlreadyIntegrated)
    }
}

/// Every short revision tag embedded in `messages`, in order.
pub fn extract_short_revs<S: AsRef<str>>(messages: &[S]) -> Vec<String> {
    messages
        .iter()
        .flat_map(|message| {
            sha_marker()
                .captures_iter(message.as_ref())
                .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Unordered comparison: equal size and equal content.
pub fn tags_match<A: AsRef<str>, B: AsRef<str>>(desired: &[A], recorded: &[B]) -> bool {
    if desired.len() != recorded.len() {
        return false;
    }
    let desired: HashSet<&str> = desired.iter().map(AsRef::as_ref).collect();
    let recorded: HashSet<&str> = recorded.iter().map(AsRef::as_ref).collect();
    desired == recorded
}

/// Inspect `origin/<integration_branch>` against the desired proposals.
pub async fn check_integration_state(
    vcs: &dyn VersionControl,
    dir: &Path,
    proposals: &[&ProposalCandidate],
    base_branch: &str,
    integration_branch: &str,
) -> Result<IntegrationState, GitError> {
    let remote_branch = format!("origin/{}", integration_branch);

    if !vcs.branch_exists(dir, &remote_branch).await? {
        info!(branch = %remote_branch, "integration branch doesn't exist");
        return Ok(IntegrationState::BranchMissing);
    }

    let advanced = vcs.commit_distance(dir, base_branch, &remote_branch).await?;
    if advanced != 0 {
        info!(
            base = base_branch,
            commits = advanced,
            "base branch has updates, integration branch needs a rebuild"
        );
        return Ok(IntegrationState::BaseAdvanced(advanced));
    }

    // One extra message covers the bookkeeping commit on top of the branch.
    let messages = vcs
        .list_recent_commit_messages(dir, &remote_branch, proposals.len() + 1)
        .await?;
    let proposal_messages: Vec<String> = messages
        .into_iter()
        .filter(|m| m != BOOKKEEPING_COMMIT_MESSAGE)
        .take(proposals.len())
        .collect();

    let recorded = extract_short_revs(&proposal_messages);
    let desired: Vec<&str> = proposals.iter().map(|pr| pr.short_rev()).collect();
    debug!(?desired, ?recorded, "comparing revision tags");

    if tags_match(&desired, &recorded) {
        Ok(IntegrationState::AlreadyIntegrated)
    } else {
        Ok(IntegrationState::TagsDiffer { recorded })
    }
}
