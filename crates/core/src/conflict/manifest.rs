//! Version-field conflicts in the dependency manifest.
//!
//! Integration branches stamp the manifest with a generated version, so the
//! manifest conflicts on nearly every rebuild. Both sides are normalized to a
//! sentinel version before merging them against the equally normalized common
//! ancestor; if they still conflict the incoming side wins.

use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;

use regex_lite::Regex;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::errors::GitError;
use crate::git::{Side, Stage, VersionControl};
use crate::models::ResolutionOutcome;

/// Version every side is normalized to before merging.
pub const SENTINEL_VERSION: &str = "0.0.0";

fn version_field() -> &'static Regex {
    static VERSION_FIELD: OnceLock<Regex> = OnceLock::new();
    VERSION_FIELD.get_or_init(|| {
        Regex::new(r#""version"\s*:\s*"[^"]*""#).expect("version field pattern is valid")
    })
}

/// Replace every `"version": "..."` assignment with the sentinel.
pub fn normalize_version(content: &str) -> String {
    let replacement = format!(r#""version": "{}""#, SENTINEL_VERSION);
    version_field()
        .replace_all(content, replacement.as_str())
        .into_owned()
}

/// Rewrite the first version field to `<prefix>.0.<millis>`.
///
/// Returns `None` when the manifest has no version field.
pub fn stamp_version(content: &str, prefix: &str, timestamp_millis: i64) -> Option<String> {
    let m = version_field().find(content)?;
    let stamped = format!(r#""version": "{}.0.{}""#, prefix, timestamp_millis);
    let mut result = String::with_capacity(content.len() + stamped.len());
    result.push_str(&content[..m.start()]);
    result.push_str(&stamped);
    result.push_str(&content[m.end()..]);
    Some(result)
}

/// Resolve a manifest conflict. Always resolves unless even taking the
/// incoming side fails.
pub async fn resolve_manifest_conflict(
    vcs: &dyn VersionControl,
    dir: &Path,
    file: &str,
) -> ResolutionOutcome {
    match merge_normalized(vcs, dir, file).await {
        Ok(true) => {
            info!(file, "resolved manifest after version normalization");
            return ResolutionOutcome::Resolved;
        }
        Ok(false) => info!(file, "manifest still conflicts, taking incoming side"),
        Err(e) => warn!(file, error = %e, "manifest normalization failed, taking incoming side"),
    }

    match take_incoming(vcs, dir, file).await {
        Ok(()) => ResolutionOutcome::Resolved,
        Err(e) => {
            warn!(file, error = %e, "could not take incoming manifest");
            ResolutionOutcome::Unresolved
        }
    }
}

/// `Ok(true)` when the normalized sides merged cleanly and were staged.
async fn merge_normalized(
    vcs: &dyn VersionControl,
    dir: &Path,
    file: &str,
) -> Result<bool, GitError> {
    let ours = vcs.read_staged_file(dir, Stage::Ours, file).await?;
    let theirs = vcs.read_staged_file(dir, Stage::Theirs, file).await?;
    // Both sides added the file: the normalized integration side stands in.
    let base = match vcs.read_staged_file(dir, Stage::Base, file).await {
        Ok(base) => base,
        Err(GitError::StageEntryMissing { .. }) => ours.clone(),
        Err(e) => return Err(e),
    };

    tokio::fs::write(dir.join(file), normalize_version(&ours)).await?;
    let base_scratch = scratch_file(".base", &normalize_version(&base))?;
    let theirs_scratch = scratch_file(".theirs", &normalize_version(&theirs))?;

    match vcs
        .three_way_merge_file(dir, file, base_scratch.path(), theirs_scratch.path())
        .await
    {
        Ok(()) => {
            vcs.stage_file(dir, file).await?;
            Ok(true)
        }
        Err(e) if e.is_merge_conflict() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Scratch copy outside the working tree, removed on drop.
fn scratch_file(suffix: &str, content: &str) -> Result<NamedTempFile, GitError> {
    let mut scratch = tempfile::Builder::new()
        .prefix("mergestage-")
        .suffix(suffix)
        .tempfile()?;
    scratch.write_all(content.as_bytes())?;
    scratch.flush()?;
    Ok(scratch)
}

async fn take_incoming(vcs: &dyn VersionControl, dir: &Path, file: &str) -> Result<(), GitError> {
    vcs.checkout_file_from_side(dir, file, Side::Theirs).await?;
    vcs.stage_file(dir, file).await
}
