//! Low-level git operations for gasport.
//!
//! This crate wraps the `git` binary with argv-only invocations: branch
//! queries, cleanliness checks, default-branch resolution, and the name
//! validation that the higher-level workflow relies on. Nothing here ever
//! interpolates user input into a shell.
//!
//! # Example
//!
//! ```
//! use gasport_git::validate_branch_name;
//!
//! assert!(validate_branch_name("llm-feature-login").is_ok());
//! assert!(validate_branch_name("-rf").is_err());
//! ```

use std::path::Path;

use anyhow::{Context, Result, bail};
use gasport_process::CommandOutput;
use serde::{Deserialize, Serialize};

/// Prefix that marks a branch as a gasport feature branch.
pub const FEATURE_BRANCH_PREFIX: &str = "llm-feature-";

/// Snapshot of a repository's state for responses and audit trails.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoState {
    /// Current commit hash.
    pub commit: Option<String>,
    /// Current branch name (None when detached).
    pub branch: Option<String>,
    /// Whether the working tree has uncommitted changes.
    pub dirty: Option<bool>,
}

impl RepoState {
    /// Whether HEAD is detached.
    pub fn is_detached(&self) -> bool {
        self.commit.is_some() && self.branch.is_none()
    }

    /// Whether the current branch is a feature branch.
    pub fn on_feature_branch(&self) -> bool {
        self.branch
            .as_deref()
            .is_some_and(is_feature_branch)
    }
}

/// Whether a branch name marks a feature branch.
pub fn is_feature_branch(name: &str) -> bool {
    name.starts_with(FEATURE_BRANCH_PREFIX)
}

/// Validate a branch name: `[A-Za-z0-9_-]+`, no leading `-`, no `--`.
///
/// The charset alone keeps names out of option territory for every git
/// subcommand used here; the extra two rules close the remaining argv
/// ambiguities.
pub fn validate_branch_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("branch name must not be empty");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        bail!("branch name {name:?} contains characters outside [A-Za-z0-9_-]");
    }
    if name.starts_with('-') {
        bail!("branch name {name:?} must not start with '-'");
    }
    if name.contains("--") {
        bail!("branch name {name:?} must not contain '--'");
    }
    Ok(())
}

/// Validate a remote name: `[A-Za-z0-9_-]+`.
pub fn validate_remote_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("remote name must not be empty");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        bail!("remote name {name:?} contains characters outside [A-Za-z0-9_-]");
    }
    Ok(())
}

/// Run `git` with the given argv in `dir`.
pub fn run_git(dir: &Path, args: &[&str]) -> Result<CommandOutput> {
    gasport_process::run_in_dir("git", args, dir)
        .with_context(|| format!("failed to run git {args:?}"))
}

/// Run `git` and fail on non-zero exit, returning trimmed stdout.
pub fn git_ok(dir: &Path, args: &[&str]) -> Result<String> {
    let out = run_git(dir, args)?;
    if !out.success() {
        bail!("git {} failed: {}", args.join(" "), out.stderr.trim());
    }
    Ok(out.stdout.trim().to_string())
}

/// Check if `dir` is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    run_git(dir, &["rev-parse", "--is-inside-work-tree"])
        .map(|o| o.success())
        .unwrap_or(false)
}

/// Initialize a repository in `dir` if one does not exist.
pub fn init_repo(dir: &Path) -> Result<()> {
    if is_git_repo(dir) {
        return Ok(());
    }
    git_ok(dir, &["init"])?;
    Ok(())
}

/// Check if the working tree is clean (no staged or unstaged changes).
pub fn is_clean(dir: &Path) -> Result<bool> {
    let out = run_git(dir, &["status", "--porcelain"])?;
    if !out.success() {
        bail!("git status failed: {}", out.stderr.trim());
    }
    Ok(out.stdout.trim().is_empty())
}

/// Ensure the working tree is clean.
pub fn ensure_clean(dir: &Path) -> Result<()> {
    if !is_clean(dir)? {
        bail!("git working tree has uncommitted changes; commit or stash them first");
    }
    Ok(())
}

/// Get the current branch name, or None when HEAD is detached.
pub fn current_branch(dir: &Path) -> Result<Option<String>> {
    let out = run_git(dir, &["rev-parse", "--abbrev-ref", "HEAD"])?;
    if !out.success() {
        return Ok(None);
    }
    let branch = out.stdout.trim().to_string();
    if branch == "HEAD" {
        return Ok(None);
    }
    Ok(Some(branch))
}

/// Get the current commit hash, if any commit exists.
pub fn head_commit(dir: &Path) -> Option<String> {
    run_git(dir, &["rev-parse", "HEAD"])
        .ok()
        .filter(|o| o.success())
        .map(|o| o.stdout.trim().to_string())
}

/// Whether a local branch exists.
pub fn branch_exists(dir: &Path, name: &str) -> bool {
    run_git(
        dir,
        &["show-ref", "--verify", "--quiet", &format!("refs/heads/{name}")],
    )
    .map(|o| o.success())
    .unwrap_or(false)
}

/// Whether a remote is configured.
pub fn remote_exists(dir: &Path, name: &str) -> bool {
    run_git(dir, &["remote", "get-url", name])
        .map(|o| o.success())
        .unwrap_or(false)
}

/// List local branch names.
pub fn list_branches(dir: &Path) -> Result<Vec<String>> {
    let out = git_ok(dir, &["for-each-ref", "--format=%(refname:short)", "refs/heads"])?;
    Ok(out.lines().map(|l| l.trim().to_string()).collect())
}

/// Resolve the mainline branch.
///
/// Order: `origin/HEAD` symref, then a local `main`, then `master`, then
/// whatever branch is currently checked out.
pub fn default_branch(dir: &Path) -> Result<String> {
    if let Ok(out) = run_git(dir, &["symbolic-ref", "refs/remotes/origin/HEAD"])
        && out.success()
        && let Some(name) = out.stdout.trim().strip_prefix("refs/remotes/origin/")
        && !name.is_empty()
    {
        return Ok(name.to_string());
    }

    for candidate in ["main", "master"] {
        if branch_exists(dir, candidate) {
            return Ok(candidate.to_string());
        }
    }

    current_branch(dir)?
        .context("cannot resolve a default branch: HEAD is detached and no main/master exists")
}

/// Collect the full repository state snapshot.
pub fn repo_state(dir: &Path) -> RepoState {
    RepoState {
        commit: head_commit(dir),
        branch: current_branch(dir).ok().flatten(),
        dirty: is_clean(dir).ok().map(|c| !c),
    }
}
