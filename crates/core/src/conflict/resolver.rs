//! Per-file conflict resolution.
//!
//! The [`ConflictResolver`] tries, in order:
//! 1. the manifest-version strategy for the configured manifest file,
//! 2. rule-based line substitution when a rule with ignore patterns exists,
//! 3. a three-way retry of the incoming content against the current file.
//!
//! Anything else is reported as [`ResolutionOutcome::Unresolved`], which
//! fails the whole proposal. So does a rule lookup when the session's rule
//! document failed to load.

use std::io::Write;
use std::ops::RangeInclusive;
use std::path::Path;

use regex_lite::Regex;
use tracing::{debug, info};

use super::manifest;
use super::rules::{ConflictRule, RuleSet};
use crate::errors::{CoreError, GitError, RulesError};
use crate::git::{Stage, VersionControl};
use crate::models::ResolutionOutcome;

/// Inclusive, 1-indexed line range of the first match of `pattern` in `content`.
pub fn matched_line_range(content: &str, pattern: &Regex) -> Option<RangeInclusive<usize>> {
    let m = pattern.find(content)?;
    let start = content[..m.start()].matches('\n').count() + 1;
    let match_lines = m.as_str().matches('\n').count() + 1;
    Some(start..=start + match_lines - 1)
}

/// Replace the given line ranges of `ours` with the same-numbered lines of
/// `theirs`. Lines `theirs` does not have are left as they are in `ours`.
pub fn substitute_lines(ours: &str, theirs: &str, ranges: &[RangeInclusive<usize>]) -> String {
    let theirs_lines: Vec<&str> = theirs.split('\n').collect();
    let mut lines: Vec<&str> = ours.split('\n').collect();
    for range in ranges {
        for number in range.clone() {
            let idx = number - 1;
            if let (Some(slot), Some(line)) = (lines.get_mut(idx), theirs_lines.get(idx)) {
                *slot = *line;
            }
        }
    }
    lines.join("\n")
}

/// Resolves conflicted files of one integration session.
pub struct ConflictResolver<'a> {
    rules: Result<&'a RuleSet, &'a RulesError>,
    manifest_file: Option<String>,
}

impl<'a> ConflictResolver<'a> {
    /// Build from the session's load result; a load error only surfaces
    /// once a conflict needs a rule lookup.
    pub fn new(rules: &'a Result<RuleSet, RulesError>) -> Self {
        Self {
            rules: rules.as_ref(),
            manifest_file: None,
        }
    }

    /// Route conflicts in `file` through the manifest-version strategy.
    pub fn with_manifest_file(mut self, file: impl Into<String>) -> Self {
        self.manifest_file = Some(file.into());
        self
    }

    /// Resolve the conflict in `file` and stage the result.
    ///
    /// Errors are reserved for unexpected version-control failures and
    /// unusable rules; a file that simply cannot be merged is
    /// `Ok(Unresolved)`.
    pub async fn resolve(
        &self,
        vcs: &dyn VersionControl,
        dir: &Path,
        file: &str,
    ) -> Result<ResolutionOutcome, CoreError> {
        if self.manifest_file.as_deref() == Some(file) {
            return Ok(manifest::resolve_manifest_conflict(vcs, dir, file).await);
        }

        let rules = self
            .rules
            .map_err(|e| RulesError::Unavailable(e.to_string()))?;
        let outcome = match rules.get(file) {
            Some(rule) if rule.has_ignore_lines() => {
                self.apply_ignore_lines(vcs, dir, file, rule).await?
            }
            _ => self.retry_three_way(vcs, dir, file).await?,
        };

        match outcome {
            ResolutionOutcome::Resolved => info!(file, "resolved merge conflicts"),
            ResolutionOutcome::Unresolved => info!(file, "could not resolve merge conflicts"),
        }
        Ok(outcome)
    }

    /// Overwrite the rule's matched line ranges of "ours" with "theirs".
    async fn apply_ignore_lines(
        &self,
        vcs: &dyn VersionControl,
        dir: &Path,
        file: &str,
        rule: &ConflictRule,
    ) -> Result<ResolutionOutcome, GitError> {
        let (ours, theirs) = match read_both_sides(vcs, dir, file).await? {
            Some(sides) => sides,
            None => return Ok(ResolutionOutcome::Unresolved),
        };

        let ranges: Vec<RangeInclusive<usize>> = rule
            .ignore_lines
            .iter()
            .filter_map(|pattern| matched_line_range(&ours, pattern))
            .collect();
        debug!(file, ?ranges, "substituting ignored lines");

        let resolved = substitute_lines(&ours, &theirs, &ranges);
        tokio::fs::write(dir.join(file), resolved).await?;
        vcs.stage_file(dir, file).await?;
        Ok(ResolutionOutcome::Resolved)
    }

    /// Merge the incoming content into the current file once more.
    async fn retry_three_way(
        &self,
        vcs: &dyn VersionControl,
        dir: &Path,
        file: &str,
    ) -> Result<ResolutionOutcome, GitError> {
        let theirs = match vcs.read_staged_file(dir, Stage::Theirs, file).await {
            Ok(content) => content,
            Err(GitError::StageEntryMissing { .. }) => return Ok(ResolutionOutcome::Unresolved),
            Err(e) => return Err(e),
        };

        // Lives outside the working tree and is removed on drop.
        let mut scratch = tempfile::Builder::new()
            .prefix("mergestage-")
            .suffix(".theirs")
            .tempfile()?;
        scratch.write_all(theirs.as_bytes())?;
        scratch.flush()?;

        // The current file doubles as the merge base.
        let current = dir.join(file);
        match vcs
            .three_way_merge_file(dir, file, &current, scratch.path())
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_merge_conflict() => return Ok(ResolutionOutcome::Unresolved),
            Err(e) => return Err(e),
        }
        vcs.stage_file(dir, file).await?;
        Ok(ResolutionOutcome::Resolved)
    }
}

/// Read "ours" and "theirs"; `None` when either side has no entry
/// (add/delete conflicts have nothing to substitute).
async fn read_both_sides(
    vcs: &dyn VersionControl,
    dir: &Path,
    file: &str,
) -> Result<Option<(String, String)>, GitError> {
    let ours = vcs.read_staged_file(dir, Stage::Ours, file).await;
    let theirs = vcs.read_staged_file(dir, Stage::Theirs, file).await;
    match (ours, theirs) {
        (Ok(ours), Ok(theirs)) => Ok(Some((ours, theirs))),
        (Err(GitError::StageEntryMissing { .. }), _) | (_, Err(GitError::StageEntryMissing { .. })) => {
            Ok(None)
        }
        (Err(e), _) | (_, Err(e)) => Err(e),
    }
}
