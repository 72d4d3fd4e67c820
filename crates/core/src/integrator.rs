//! Ordered squash-merge integration pipeline.
//!
//! The [`Integrator`] drives one integration session through a small state
//! machine:
//!
//! 1. List open proposals and keep the approved ones, oldest first.
//! 2. Clone the base branch into a fresh working directory.
//! 3. Skip the session when the remote integration branch is up to date.
//! 4. Reset the integration branch to the base tip and squash-merge every
//!    proposal in order, resolving conflicts file by file.
//! 5. Commit the integration notes, force-push and synchronize labels.
//!
//! A failure scoped to one proposal only fails that proposal; the working
//! tree is rolled back to the last clean commit and the loop continues.
//! The working directory is removed on every exit path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

use crate::config::IntegrationConfig;
use crate::conflict::manifest;
use crate::conflict::{ConflictResolver, RuleSet};
use crate::errors::{CoreError, GitError, IntegrationError, RulesError};
use crate::git::{ProposalHost, VersionControl};
use crate::idempotency::{self, BOOKKEEPING_COMMIT_MESSAGE};
use crate::models::{IntegrationReport, ProposalCandidate, ProposalVerdict};

/// Name of the clone inside the session's temporary directory.
const WORKTREE_DIR: &str = "worktree";

// ---------------------------------------------------------------------------
// Session state machine
// ---------------------------------------------------------------------------

/// States of an integration session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Init,
    Cloned,
    IdempotencyChecked,
    BranchReset,
    MergeLoop,
    Finalize,
    Done,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Cloned => write!(f, "cloned"),
            Self::IdempotencyChecked => write!(f, "idempotency_checked"),
            Self::BranchReset => write!(f, "branch_reset"),
            Self::MergeLoop => write!(f, "merge_loop"),
            Self::Finalize => write!(f, "finalize"),
            Self::Done => write!(f, "done"),
        }
    }
}

fn transition(from: SessionState, to: SessionState) -> SessionState {
    debug!(%from, %to, "session state");
    to
}

// ---------------------------------------------------------------------------
// Integrator
// ---------------------------------------------------------------------------

/// Rebuilds the integration branch from approved proposals.
pub struct Integrator {
    config: IntegrationConfig,
    clone_url: String,
    vcs: Arc<dyn VersionControl>,
    host: Arc<dyn ProposalHost>,
    /// Parent of the per-session temporary directory; system default if unset.
    work_root: Option<PathBuf>,
}

impl Integrator {
    pub fn new(
        config: IntegrationConfig,
        clone_url: impl Into<String>,
        vcs: Arc<dyn VersionControl>,
        host: Arc<dyn ProposalHost>,
    ) -> Self {
        info!(
            base = %config.base_branch,
            integration = %config.integration_branch,
            "initializing integrator"
        );
        Self {
            config,
            clone_url: clone_url.into(),
            vcs,
            host,
            work_root: None,
        }
    }

    /// Allocate session working directories under `root`.
    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(root.into());
        self
    }

    // -----------------------------------------------------------------------
    // Main entry point
    // -----------------------------------------------------------------------

    /// Run one integration session.
    ///
    /// Per-proposal failures are recorded in the report; only setup,
    /// idempotency and finalize failures abort the session.
    pub async fn run(&self) -> Result<IntegrationReport, IntegrationError> {
        let mut report = IntegrationReport {
            started_at: Utc::now().to_rfc3339(),
            ..Default::default()
        };

        let result = self.run_session(&mut report).await;
        report.completed_at = Some(Utc::now().to_rfc3339());

        match &result {
            Ok(()) => info!(
                attempted = report.attempted.len(),
                merged = report.merged.len(),
                failed = report.failed.len(),
                pushed = report.pushed,
                "integration session completed"
            ),
            Err(e) => error!(error = %e, "integration session failed"),
        }
        result.map(|()| report)
    }

    async fn run_session(&self, report: &mut IntegrationReport) -> Result<(), IntegrationError> {
        let mut state = SessionState::Init;

        let candidates = self
            .host
            .list_open_proposals(self.config.max_proposals)
            .await
            .map_err(IntegrationError::Listing)?;
        let proposals = self.select_proposals(&candidates);
        report.attempted = proposals.iter().map(|pr| pr.number).collect();

        if proposals.is_empty() {
            info!("no approved proposals, nothing to integrate");
            return Ok(());
        }
        info!(count = proposals.len(), "found approved proposals");

        // Dropped on every return below, which removes the clone.
        let workdir = self.provision_workdir()?;
        let dir = workdir.path().join(WORKTREE_DIR);

        info!(base = %self.config.base_branch, path = %dir.display(), "cloning base branch");
        self.vcs
            .clone_repo(&self.clone_url, &dir, &self.config.base_branch)
            .await
            .map_err(|e| IntegrationError::setup("clone", e))?;
        state = transition(state, SessionState::Cloned);

        let rules = self.load_rules(&dir);
        if let Err(e) = &rules {
            warn!(error = %e, "conflict rules unusable, proposals needing them will fail");
        }

        let integration_state = idempotency::check_integration_state(
            self.vcs.as_ref(),
            &dir,
            &proposals,
            &self.config.base_branch,
            &self.config.integration_branch,
        )
        .await
        .map_err(IntegrationError::Idempotency)?;
        state = transition(state, SessionState::IdempotencyChecked);

        if integration_state.is_integrated() {
            info!("all proposals already integrated");
            report.already_integrated = true;
            transition(state, SessionState::Done);
            return Ok(());
        }
        debug!(?integration_state, "integration branch needs a rebuild");

        self.reset_integration_branch(&dir).await?;
        state = transition(state, SessionState::BranchReset);
        state = transition(state, SessionState::MergeLoop);

        let resolver = ConflictResolver::new(&rules).with_manifest_file(&self.config.manifest_file);
        let verdicts = self.merge_proposals(&dir, &proposals, &resolver).await;

        let mut merged = Vec::new();
        for (pr, verdict) in proposals.iter().zip(&verdicts) {
            match verdict {
                ProposalVerdict::Merged => {
                    report.merged.push(pr.number);
                    merged.push(*pr);
                }
                ProposalVerdict::Failed { .. } => report.failed.push(pr.number),
            }
        }

        if merged.is_empty() {
            info!("no proposals merged, nothing to push");
            transition(state, SessionState::Done);
            return Ok(());
        }

        state = transition(state, SessionState::Finalize);
        self.finalize_branch(&dir, &merged)
            .await
            .map_err(|source| IntegrationError::Finalize {
                branch: self.config.integration_branch.clone(),
                source,
            })?;
        report.pushed = true;

        self.sync_labels(&candidates, &report.merged).await;
        transition(state, SessionState::Done);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Setup
    // -----------------------------------------------------------------------

    /// Approved, open, unmerged proposals ordered by creation time.
    fn select_proposals<'c>(&self, candidates: &'c [ProposalCandidate]) -> Vec<&'c ProposalCandidate> {
        let mut ordered: Vec<&ProposalCandidate> = candidates.iter().collect();
        ordered.sort_by_key(|pr| (pr.created_at, pr.number));
        ordered.truncate(self.config.max_proposals);

        ordered
            .into_iter()
            .filter(|pr| match pr.skip_reason(&self.config.approve_label) {
                Some(reason) => {
                    info!(number = pr.number, %reason, "skipping proposal");
                    false
                }
                None => true,
            })
            .collect()
    }

    fn provision_workdir(&self) -> Result<TempDir, IntegrationError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("mergestage-");
        let workdir = match &self.work_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        Ok(workdir)
    }

    /// Rules are read from the freshly cloned base branch.
    fn load_rules(&self, dir: &Path) -> Result<RuleSet, RulesError> {
        let Some(rules_file) = &self.config.rules_file else {
            return Ok(RuleSet::empty());
        };
        let path = dir.join(rules_file);
        if !path.exists() {
            warn!(path = %rules_file.display(), "conflict rules file not found, continuing without rules");
            return Ok(RuleSet::empty());
        }
        RuleSet::load(path)
    }

    async fn reset_integration_branch(&self, dir: &Path) -> Result<(), IntegrationError> {
        let integration = &self.config.integration_branch;
        let base = &self.config.base_branch;

        info!(integration = %integration, base = %base, "resetting integration branch");
        self.vcs
            .create_branch(dir, integration, base, true)
            .await
            .map_err(|e| IntegrationError::setup("branch reset", e))?;
        self.vcs
            .checkout(dir, integration)
            .await
            .map_err(|e| IntegrationError::setup("checkout", e))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Merge loop
    // -----------------------------------------------------------------------

    /// Merge every proposal in order; one verdict per proposal.
    async fn merge_proposals(
        &self,
        dir: &Path,
        proposals: &[&ProposalCandidate],
        resolver: &ConflictResolver<'_>,
    ) -> Vec<ProposalVerdict> {
        let mut verdicts = Vec::with_capacity(proposals.len());
        for pr in proposals {
            info!(number = pr.number, message = %pr.commit_message(), "processing proposal");

            let verdict = match self.merge_proposal(dir, pr, resolver).await {
                Ok(verdict) => verdict,
                Err(e) => ProposalVerdict::Failed {
                    reason: e.to_string(),
                },
            };

            if let ProposalVerdict::Failed { reason } = &verdict {
                error!(number = pr.number, %reason, "proposal merge failed, skipping");
                // Leave the next proposal a clean tree.
                if let Err(e) = self.vcs.reset_hard(dir).await {
                    warn!(number = pr.number, error = %e, "failed to reset working tree");
                }
            } else {
                info!(number = pr.number, "proposal merged");
            }
            verdicts.push(verdict);
        }
        verdicts
    }

    async fn merge_proposal(
        &self,
        dir: &Path,
        pr: &ProposalCandidate,
        resolver: &ConflictResolver<'_>,
    ) -> Result<ProposalVerdict, CoreError> {
        let local_branch = pr.local_branch();
        self.vcs.fetch_ref(dir, &pr.head_ref(), &local_branch).await?;

        match self.vcs.squash_merge(dir, &local_branch).await {
            Ok(()) => {}
            Err(e) if e.is_merge_conflict() => {
                let files = self.vcs.list_conflicted_files(dir).await?;
                info!(number = pr.number, ?files, "merge conflicts");
                for file in &files {
                    if !resolver.resolve(self.vcs.as_ref(), dir, file).await?.is_resolved() {
                        return Ok(ProposalVerdict::Failed {
                            reason: format!("unresolved conflict in {}", file),
                        });
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }

        self.vcs.commit(dir, &pr.commit_message()).await?;
        Ok(ProposalVerdict::Merged)
    }

    // -----------------------------------------------------------------------
    // Finalize
    // -----------------------------------------------------------------------

    /// Commit the bookkeeping files and force-push the integration branch.
    async fn finalize_branch(
        &self,
        dir: &Path,
        merged: &[&ProposalCandidate],
    ) -> Result<(), GitError> {
        let notes = merged
            .iter()
            .map(|pr| pr.notes_line())
            .collect::<Vec<_>>()
            .join("\n");
        info!(file = %self.config.notes_file, "writing integration notes");
        tokio::fs::write(dir.join(&self.config.notes_file), notes).await?;
        self.vcs.stage_file(dir, &self.config.notes_file).await?;

        if self.config.stamp_version {
            self.stamp_manifest(dir).await?;
        }

        self.vcs.commit(dir, BOOKKEEPING_COMMIT_MESSAGE).await?;

        let branch = &self.config.integration_branch;
        info!(branch = %branch, "pushing integration branch");
        self.vcs.push(dir, true, branch, branch).await
    }

    async fn stamp_manifest(&self, dir: &Path) -> Result<(), GitError> {
        let file = &self.config.manifest_file;
        let path = dir.join(file);
        if !path.exists() {
            debug!(file = %file, "no manifest to stamp");
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let millis = Utc::now().timestamp_millis();
        match manifest::stamp_version(&content, &self.config.version_prefix, millis) {
            Some(stamped) => {
                tokio::fs::write(&path, stamped).await?;
                self.vcs.stage_file(dir, file).await?;
                info!(file = %file, millis, "stamped manifest version");
            }
            None => warn!(file = %file, "manifest has no version field, not stamped"),
        }
        Ok(())
    }

    /// Mark merged proposals and unmark every other labeled candidate.
    async fn sync_labels(&self, candidates: &[ProposalCandidate], merged: &[u64]) {
        let label = &self.config.integrated_label;
        info!(label = %label, "synchronizing integrated labels");

        for pr in candidates {
            if merged.contains(&pr.number) || !pr.has_label(label) {
                continue;
            }
            if let Err(e) = self.host.remove_label(pr.number, label).await {
                warn!(number = pr.number, error = %e, "failed to remove label");
            }
        }

        for number in merged {
            if let Err(e) = self.host.add_label(*number, label).await {
                warn!(number, error = %e, "failed to add label");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::IdempotencyChecked.to_string(), "idempotency_checked");
        assert_eq!(SessionState::MergeLoop.to_string(), "merge_loop");
        assert_eq!(SessionState::Done.to_string(), "done");
    }

    #[test]
    fn test_transition_returns_target() {
        assert_eq!(
            transition(SessionState::Init, SessionState::Cloned),
            SessionState::Cloned
        );
    }
}
