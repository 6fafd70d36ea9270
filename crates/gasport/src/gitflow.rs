//! The feature-branch workflow over a project's local mirror repository.
//!
//! The write path never commits on mainline: before mutating files it calls
//! [`GitWorkflow::ensure_feature_branch`], which reuses the current
//! `llm-feature-*` branch or creates a timestamped one. Every git call is
//! argv-only; branch and remote names are validated before use and commit
//! messages travel as a single `-m` argument.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use gasport_git::{
    FEATURE_BRANCH_PREFIX, branch_exists, current_branch, default_branch, ensure_clean, git_ok,
    init_repo, is_clean, is_feature_branch, is_git_repo, list_branches, remote_exists, run_git,
    validate_branch_name, validate_remote_name,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchInfo {
    pub name: String,
    pub current: bool,
    pub feature: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsureBranchOutcome {
    pub branch: String,
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitOutcome {
    pub commit: String,
    pub branch: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushOutcome {
    pub remote: String,
    pub branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishOutcome {
    pub feature_branch: String,
    pub merged_into: String,
    pub squash_commit: String,
    pub pushed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_branch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOutcome {
    pub deleted: String,
    pub lost_changes: bool,
}

/// Options for [`GitWorkflow::finish`].
#[derive(Debug, Clone)]
pub struct FinishOptions {
    pub branch: Option<String>,
    pub delete_after_merge: bool,
    pub push_to_remote: bool,
    pub remote: String,
}

impl Default for FinishOptions {
    fn default() -> Self {
        Self {
            branch: None,
            delete_after_merge: true,
            push_to_remote: false,
            remote: "origin".to_string(),
        }
    }
}

pub struct GitWorkflow {
    repo_root: PathBuf,
}

impl GitWorkflow {
    /// Open the workflow over an existing repository.
    pub fn open(repo_root: impl Into<PathBuf>) -> Result<Self> {
        let repo_root = repo_root.into();
        if !is_git_repo(&repo_root) {
            bail!(
                "{} is not a git repository; initialize the mirror first",
                repo_root.display()
            );
        }
        Ok(Self { repo_root })
    }

    /// Open the workflow, initializing a repository when none exists.
    pub fn open_or_init(repo_root: impl Into<PathBuf>) -> Result<Self> {
        let repo_root = repo_root.into();
        init_repo(&repo_root)?;
        Ok(Self { repo_root })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Reuse the current feature branch or create a timestamped one.
    ///
    /// Uncommitted changes block branch creation; the caller must commit or
    /// stash first. Reusing the current feature branch needs no clean tree.
    pub fn ensure_feature_branch(&self) -> Result<EnsureBranchOutcome> {
        let current = current_branch(&self.repo_root)?;
        if let Some(branch) = &current
            && is_feature_branch(branch)
        {
            return Ok(EnsureBranchOutcome {
                branch: branch.clone(),
                created: false,
            });
        }

        ensure_clean(&self.repo_root)?;
        let name = format!(
            "{FEATURE_BRANCH_PREFIX}auto-{}",
            Utc::now().format("%Y%m%d%H%M%S")
        );
        git_ok(&self.repo_root, &["checkout", "-b", &name])
            .with_context(|| format!("failed to create feature branch {name}"))?;
        Ok(EnsureBranchOutcome {
            branch: name,
            created: true,
        })
    }

    /// Start a named feature branch from the current mainline position.
    pub fn start(&self, name: &str) -> Result<EnsureBranchOutcome> {
        validate_branch_name(name)?;
        ensure_clean(&self.repo_root)?;

        let current = current_branch(&self.repo_root)?;
        if current.as_deref().is_some_and(is_feature_branch) {
            bail!(
                "already on feature branch {}; finish or roll it back first",
                current.unwrap_or_default()
            );
        }

        let branch = format!("{FEATURE_BRANCH_PREFIX}{name}");
        if branch_exists(&self.repo_root, &branch) {
            bail!("branch {branch} already exists; switch to it or pick another name");
        }
        git_ok(&self.repo_root, &["checkout", "-b", &branch])?;
        Ok(EnsureBranchOutcome {
            branch,
            created: true,
        })
    }

    /// Stage everything and commit with the message byte-for-byte.
    pub fn commit(&self, message: &str) -> Result<CommitOutcome> {
        if message.trim().is_empty() {
            bail!("commit message must not be empty");
        }
        let Some(branch) = current_branch(&self.repo_root)? else {
            bail!("HEAD is detached; check out a branch before committing");
        };
        if is_clean(&self.repo_root)? {
            bail!("nothing to commit; the working tree is clean");
        }

        git_ok(&self.repo_root, &["add", "-A"])?;
        git_ok(&self.repo_root, &["commit", "-m", message])?;
        let commit = git_ok(&self.repo_root, &["rev-parse", "HEAD"])?;
        Ok(CommitOutcome {
            commit,
            branch,
            message: message.to_string(),
        })
    }

    /// Push the current (or given) branch, setting its upstream.
    pub fn push(&self, remote: &str, branch: Option<&str>) -> Result<PushOutcome> {
        validate_remote_name(remote)?;
        let branch = match branch {
            Some(b) => {
                validate_branch_name(b)?;
                b.to_string()
            }
            None => current_branch(&self.repo_root)?
                .context("HEAD is detached; name the branch to push")?,
        };
        if !remote_exists(&self.repo_root, remote) {
            bail!("remote {remote} is not configured; add it with `git remote add` first");
        }

        let out = run_git(&self.repo_root, &["push", "-u", remote, &branch])?;
        if !out.success() {
            bail!("{}", Self::describe_push_failure(&out.stderr, remote, &branch));
        }
        Ok(PushOutcome {
            remote: remote.to_string(),
            branch,
        })
    }

    fn describe_push_failure(stderr: &str, remote: &str, branch: &str) -> String {
        let lower = stderr.to_lowercase();
        if lower.contains("[rejected]") || lower.contains("non-fast-forward") {
            format!(
                "push of {branch} to {remote} was rejected; pull or rebase onto the remote branch and retry"
            )
        } else if lower.contains("no upstream") {
            format!("branch {branch} has no upstream on {remote}; pushing with -u should set it")
        } else if lower.contains("authentication")
            || lower.contains("permission denied")
            || lower.contains("could not read username")
        {
            format!("authentication to {remote} failed; refresh your git credentials")
        } else {
            format!("push to {remote} failed: {}", stderr.trim())
        }
    }

    /// Squash-merge a feature branch into the detected default branch.
    ///
    /// Push failure after a successful merge is a partial success:
    /// `pushed:false` plus the error text, never an Err. The squash commit
    /// exists locally either way and the caller owns the retry decision.
    pub fn finish(&self, opts: FinishOptions) -> Result<FinishOutcome> {
        let feature = match &opts.branch {
            Some(b) => {
                validate_branch_name(b)?;
                b.clone()
            }
            None => current_branch(&self.repo_root)?
                .context("HEAD is detached; name the feature branch to finish")?,
        };
        if !is_feature_branch(&feature) {
            bail!("{feature} is not a feature branch (expected {FEATURE_BRANCH_PREFIX}*)");
        }
        if !branch_exists(&self.repo_root, &feature) {
            bail!("feature branch {feature} does not exist");
        }
        ensure_clean(&self.repo_root)?;

        let mainline = default_branch(&self.repo_root)?;
        if mainline == feature {
            bail!("refusing to finish: {feature} resolved as the default branch");
        }

        git_ok(&self.repo_root, &["checkout", &mainline])?;
        git_ok(&self.repo_root, &["merge", "--squash", &feature])?;

        let derived = feature
            .strip_prefix(FEATURE_BRANCH_PREFIX)
            .unwrap_or(&feature);
        let message = format!("Feature: {derived}");
        git_ok(&self.repo_root, &["commit", "-m", &message])?;
        let squash_commit = git_ok(&self.repo_root, &["rev-parse", "HEAD"])?;

        let (pushed, push_error) = if opts.push_to_remote {
            match self.push(&opts.remote, Some(&mainline)) {
                Ok(_) => (true, None),
                Err(e) => (false, Some(format!("{e:#}"))),
            }
        } else {
            (false, None)
        };

        let deleted_branch = if opts.delete_after_merge {
            git_ok(&self.repo_root, &["branch", "-D", &feature])?;
            Some(feature.clone())
        } else {
            None
        };

        Ok(FinishOutcome {
            feature_branch: feature,
            merged_into: mainline,
            squash_commit,
            pushed,
            push_error,
            deleted_branch,
        })
    }

    /// Delete a feature branch, discarding its commits.
    pub fn rollback(&self, branch: &str) -> Result<RollbackOutcome> {
        validate_branch_name(branch)?;
        if !is_feature_branch(branch) {
            bail!("{branch} is not a feature branch; refusing to delete it");
        }
        if !branch_exists(&self.repo_root, branch) {
            bail!("feature branch {branch} does not exist");
        }

        let mut lost_changes = false;
        if current_branch(&self.repo_root)?.as_deref() == Some(branch) {
            lost_changes = !is_clean(&self.repo_root)?;
            let mainline = default_branch(&self.repo_root)?;
            git_ok(&self.repo_root, &["checkout", "-f", &mainline])?;
        }
        git_ok(&self.repo_root, &["branch", "-D", branch])?;
        Ok(RollbackOutcome {
            deleted: branch.to_string(),
            lost_changes,
        })
    }

    /// List local branches with current/feature flags.
    pub fn list(&self) -> Result<Vec<BranchInfo>> {
        let current = current_branch(&self.repo_root)?;
        Ok(list_branches(&self.repo_root)?
            .into_iter()
            .map(|name| BranchInfo {
                current: current.as_deref() == Some(name.as_str()),
                feature: is_feature_branch(&name),
                name,
            })
            .collect())
    }

    /// Switch to an existing branch; requires a clean tree.
    pub fn switch(&self, branch: &str) -> Result<()> {
        validate_branch_name(branch)?;
        if !branch_exists(&self.repo_root, branch) {
            bail!("branch {branch} does not exist");
        }
        ensure_clean(&self.repo_root)?;
        git_ok(&self.repo_root, &["checkout", branch])?;
        Ok(())
    }
}
