//! Local Git operations via the `git` CLI and `git2`.
//!
//! Mutating operations (clone, merge, commit, push...) shell out to `git` so
//! that merge behaviour matches what developers see locally. Read-only
//! queries against the object database and index go through `git2`.

use std::path::Path;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use git2::Repository;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::{Side, Stage, VersionControl};
use crate::errors::GitError;

/// Highest exit status `git merge-file` uses to report a conflict count.
const MERGE_FILE_MAX_CONFLICTS: i32 = 127;

/// Version-control client for an integration working directory.
#[derive(Debug, Clone)]
pub struct GitClient {
    committer_name: String,
    committer_email: String,
}

impl GitClient {
    /// Create a client committing as `committer_name <committer_email>`.
    pub fn new(committer_name: impl Into<String>, committer_email: impl Into<String>) -> Self {
        let client = Self {
            committer_name: committer_name.into(),
            committer_email: committer_email.into(),
        };
        info!(
            name = %client.committer_name,
            email = %client.committer_email,
            "created GitClient"
        );
        client
    }

    fn open(dir: &Path) -> Result<Repository, GitError> {
        Repository::open(dir).map_err(|_| GitError::RepositoryNotFound(dir.display().to_string()))
    }

    /// Spawn `git` with the committer identity and return the raw output.
    async fn exec(&self, dir: Option<&Path>, args: &[&str]) -> Result<Output, GitError> {
        let mut cmd = Command::new("git");
        cmd.arg("-c")
            .arg(format!("user.name={}", self.committer_name))
            .arg("-c")
            .arg(format!("user.email={}", self.committer_email))
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }

        debug!(command = %describe(args), "executing");
        cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GitError::BinaryNotFound(e.to_string())
            } else {
                GitError::IoError(e)
            }
        })
    }

    /// Run `git` and return stdout, failing on a non-zero exit.
    async fn run_git(&self, dir: Option<&Path>, args: &[&str]) -> Result<String, GitError> {
        let output = self.exec(dir, args).await?;
        if !output.status.success() {
            return Err(command_failed(args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Printable form of a command line. Clone URLs may embed a token, so clone
/// arguments are never shown.
fn describe(args: &[&str]) -> String {
    if args.contains(&"clone") {
        "git clone".to_string()
    } else {
        format!("git {}", args.join(" "))
    }
}

fn command_failed(args: &[&str], output: &Output) -> GitError {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let exit_code = output.status.code().unwrap_or(-1);
    warn!(command = %describe(args), exit_code, %stderr, "git command failed");
    GitError::CommandFailed {
        command: describe(args),
        exit_code,
        stderr,
    }
}

#[async_trait]
impl VersionControl for GitClient {
    #[instrument(skip(self, url), fields(dest = %dest.display()))]
    async fn clone_repo(&self, url: &str, dest: &Path, branch: &str) -> Result<(), GitError> {
        info!("cloning git repository");
        let dest_str = dest.to_string_lossy().to_string();
        self.run_git(
            None,
            &[
                "clone",
                "--quiet",
                "--shallow-submodules",
                "--no-tags",
                "--branch",
                branch,
                url,
                &dest_str,
            ],
        )
        .await?;
        info!("clone completed");
        Ok(())
    }

    #[instrument(skip(self, dir))]
    async fn fetch_ref(
        &self,
        dir: &Path,
        remote_ref: &str,
        local_branch: &str,
    ) -> Result<(), GitError> {
        let refspec = format!("{}:{}", remote_ref, local_branch);
        self.run_git(Some(dir), &["fetch", "--quiet", "origin", &refspec])
            .await?;
        debug!("fetch completed");
        Ok(())
    }

    #[instrument(skip(self, dir))]
    async fn create_branch(
        &self,
        dir: &Path,
        name: &str,
        base: &str,
        force: bool,
    ) -> Result<(), GitError> {
        let mut args = vec!["branch"];
        if force {
            args.push("--force");
        }
        args.extend([name, base]);
        self.run_git(Some(dir), &args).await?;
        info!(name, base, "created branch");
        Ok(())
    }

    #[instrument(skip(self, dir))]
    async fn checkout(&self, dir: &Path, branch: &str) -> Result<(), GitError> {
        self.run_git(Some(dir), &["checkout", "--quiet", branch])
            .await?;
        Ok(())
    }

    #[instrument(skip(self, dir))]
    async fn squash_merge(&self, dir: &Path, branch: &str) -> Result<(), GitError> {
        let args = ["merge", "--quiet", "--squash", branch];
        let output = self.exec(Some(dir), &args).await?;
        if output.status.success() {
            return Ok(());
        }

        // A non-zero exit is only a conflict if the index holds unmerged paths.
        let conflicted = self.list_conflicted_files(dir).await?;
        if conflicted.is_empty() {
            return Err(command_failed(&args, &output));
        }
        debug!(count = conflicted.len(), "squash merge left conflicts");
        Err(GitError::MergeConflict(conflicted.join(", ")))
    }

    #[instrument(skip(self, dir))]
    async fn commit(&self, dir: &Path, message: &str) -> Result<(), GitError> {
        self.run_git(
            Some(dir),
            &["commit", "--quiet", "--allow-empty", "-m", message],
        )
        .await?;
        info!("created commit");
        Ok(())
    }

    #[instrument(skip(self, dir))]
    async fn push(&self, dir: &Path, force: bool, from: &str, to: &str) -> Result<(), GitError> {
        info!("pushing");
        let refspec = format!("{}:{}", from, to);
        let mut args = vec!["push", "--quiet"];
        if force {
            args.push("--force-with-lease");
        }
        args.extend(["origin", refspec.as_str()]);
        self.run_git(Some(dir), &args).await?;
        info!("push completed");
        Ok(())
    }

    async fn list_conflicted_files(&self, dir: &Path) -> Result<Vec<String>, GitError> {
        let output = self
            .run_git(
                Some(dir),
                &["diff", "--name-only", "--diff-filter=U", "-z"],
            )
            .await?;
        Ok(output
            .split('\0')
            .filter(|path| !path.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn read_staged_file(
        &self,
        dir: &Path,
        stage: Stage,
        file: &str,
    ) -> Result<String, GitError> {
        let repo = Self::open(dir)?;
        let index = repo.index()?;
        let entry = index
            .get_path(Path::new(file), i32::from(stage.index_stage()))
            .ok_or_else(|| GitError::StageEntryMissing {
                stage: stage.index_stage(),
                path: file.to_string(),
            })?;
        let blob = repo.find_blob(entry.id)?;
        String::from_utf8(blob.content().to_vec())
            .map_err(|_| GitError::UnexpectedOutput(format!("'{}' is not valid UTF-8", file)))
    }

    #[instrument(skip(self, dir, base, incoming))]
    async fn three_way_merge_file(
        &self,
        dir: &Path,
        target: &str,
        base: &Path,
        incoming: &Path,
    ) -> Result<(), GitError> {
        let base_str = base.to_string_lossy().to_string();
        let incoming_str = incoming.to_string_lossy().to_string();
        let args = ["merge-file", target, base_str.as_str(), incoming_str.as_str()];
        let output = self.exec(Some(dir), &args).await?;
        match output.status.code() {
            Some(0) => Ok(()),
            Some(conflicts @ 1..=MERGE_FILE_MAX_CONFLICTS) => {
                debug!(conflicts, "merge-file left conflicts");
                Err(GitError::MergeConflict(target.to_string()))
            }
            _ => Err(command_failed(&args, &output)),
        }
    }

    #[instrument(skip(self, dir))]
    async fn reset_hard(&self, dir: &Path) -> Result<(), GitError> {
        self.run_git(Some(dir), &["reset", "--quiet", "--hard", "HEAD"])
            .await?;
        info!("reset working tree to HEAD");
        Ok(())
    }

    async fn list_recent_commit_messages(
        &self,
        dir: &Path,
        branch: &str,
        count: usize,
    ) -> Result<Vec<String>, GitError> {
        let repo = Self::open(dir)?;
        let tip = repo
            .revparse_single(branch)
            .map_err(|_| GitError::RefNotFound(branch.to_string()))?
            .peel_to_commit()?;

        let mut revwalk = repo.revwalk()?;
        revwalk.push(tip.id())?;
        revwalk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::TIME)?;

        let mut messages = Vec::with_capacity(count);
        for oid in revwalk.take(count) {
            let commit = repo.find_commit(oid?)?;
            messages.push(commit.summary().unwrap_or("").to_string());
        }
        debug!(branch, count = messages.len(), "collected commit messages");
        Ok(messages)
    }

    async fn branch_exists(&self, dir: &Path, branch: &str) -> Result<bool, GitError> {
        let repo = Self::open(dir)?;
        let exists = repo.revparse_single(branch).is_ok();
        Ok(exists)
    }

    async fn commit_distance(&self, dir: &Path, from: &str, to: &str) -> Result<usize, GitError> {
        let repo = Self::open(dir)?;
        let resolve = |name: &str| -> Result<git2::Oid, GitError> {
            Ok(repo
                .revparse_single(name)
                .map_err(|_| GitError::RefNotFound(name.to_string()))?
                .peel_to_commit()?
                .id())
        };
        let (ahead, _behind) = repo.graph_ahead_behind(resolve(from)?, resolve(to)?)?;
        debug!(from, to, ahead, "computed commit distance");
        Ok(ahead)
    }

    async fn stage_file(&self, dir: &Path, file: &str) -> Result<(), GitError> {
        self.run_git(Some(dir), &["add", "--", file]).await?;
        Ok(())
    }

    async fn checkout_file_from_side(
        &self,
        dir: &Path,
        file: &str,
        side: Side,
    ) -> Result<(), GitError> {
        let flag = format!("--{}", side);
        self.run_git(Some(dir), &["checkout", &flag, "--", file])
            .await?;
        Ok(())
    }
}
