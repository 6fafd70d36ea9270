//! Drift detection between the local mirror and remote content.
//!
//! Files are compared by SHA-256 over normalized text (LF line endings, no
//! trailing newline). Only `local_stale` blocks execution; `local_only`
//! files may simply be in progress and are reported without blocking.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::mirror::LocalFile;
use crate::shim;
use crate::types::RemoteFile;

/// Per-file comparison outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    InSync,
    LocalStale,
    RemoteOnly,
    LocalOnly,
}

/// One file's drift record, carried inside `SyncDrift` errors and
/// `collision` response fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDrift {
    pub name: String,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_sha: Option<String>,
    /// Line diff for stale files, truncated to [`MAX_DIFF_LINES`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    /// Content preview for new files, truncated to [`MAX_PREVIEW_CHARS`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

/// Full sync report for one project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub files: Vec<FileDrift>,
    /// CommonJS load-order violations. Warnings, never blocking.
    pub order_warnings: Vec<String>,
}

impl SyncReport {
    /// The drift records that block execution.
    pub fn blocking(&self) -> Vec<FileDrift> {
        self.files
            .iter()
            .filter(|f| f.status == FileStatus::LocalStale)
            .cloned()
            .collect()
    }

    pub fn has_blocking_drift(&self) -> bool {
        self.files.iter().any(|f| f.status == FileStatus::LocalStale)
    }

    /// Everything that differs in any direction, for the `collision` field.
    pub fn drifted(&self) -> Vec<FileDrift> {
        self.files
            .iter()
            .filter(|f| f.status != FileStatus::InSync)
            .cloned()
            .collect()
    }
}

/// At most this many drift records carry content (diff or preview).
pub const MAX_CONTENT_FILES: usize = 5;
/// Diffs are truncated to this many lines.
pub const MAX_DIFF_LINES: usize = 200;
/// New-file previews are truncated to this many characters.
pub const MAX_PREVIEW_CHARS: usize = 2000;

/// Normalize content for hashing: CRLF to LF, no trailing newline.
pub fn normalize(content: &str) -> String {
    let unified = content.replace("\r\n", "\n");
    unified.trim_end_matches('\n').to_string()
}

/// SHA-256 of normalized content, hex-encoded.
pub fn content_sha(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(content).as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare the local mirror against remote content.
///
/// System files (the shim, its HTML pages, the manifest, `common-js/`) are
/// excluded from drift classification; the infrastructure layer owns them.
pub fn check(local: &[LocalFile], remote: &[RemoteFile]) -> SyncReport {
    let mut files = Vec::new();
    let mut content_budget = MAX_CONTENT_FILES;

    for lf in local {
        if shim::is_system_file(&lf.name) {
            continue;
        }
        match remote.iter().find(|rf| rf.name == lf.name) {
            Some(rf) => {
                let local_sha = content_sha(&lf.content);
                let remote_sha = content_sha(&rf.source);
                if local_sha == remote_sha {
                    files.push(FileDrift {
                        name: lf.name.clone(),
                        status: FileStatus::InSync,
                        local_sha: Some(local_sha),
                        remote_sha: Some(remote_sha),
                        diff: None,
                        preview: None,
                    });
                } else {
                    let diff = if content_budget > 0 {
                        content_budget -= 1;
                        Some(line_diff(&lf.content, &rf.source))
                    } else {
                        None
                    };
                    files.push(FileDrift {
                        name: lf.name.clone(),
                        status: FileStatus::LocalStale,
                        local_sha: Some(local_sha),
                        remote_sha: Some(remote_sha),
                        diff,
                        preview: None,
                    });
                }
            }
            None => {
                let preview = if content_budget > 0 {
                    content_budget -= 1;
                    Some(truncate_chars(&lf.content, MAX_PREVIEW_CHARS))
                } else {
                    None
                };
                files.push(FileDrift {
                    name: lf.name.clone(),
                    status: FileStatus::LocalOnly,
                    local_sha: Some(content_sha(&lf.content)),
                    remote_sha: None,
                    diff: None,
                    preview,
                });
            }
        }
    }

    for rf in remote {
        if shim::is_system_file(&rf.name) {
            continue;
        }
        if !local.iter().any(|lf| lf.name == rf.name) {
            files.push(FileDrift {
                name: rf.name.clone(),
                status: FileStatus::RemoteOnly,
                local_sha: None,
                remote_sha: Some(content_sha(&rf.source)),
                diff: None,
                preview: None,
            });
        }
    }

    SyncReport {
        files,
        order_warnings: validate_module_order(remote),
    }
}

/// A minimal local/remote line diff.
///
/// Skips the common prefix and suffix and lists the differing middle as
/// removed (`-`, local) and added (`+`, remote) lines, truncated to
/// [`MAX_DIFF_LINES`].
fn line_diff(local: &str, remote: &str) -> String {
    let local_norm = normalize(local);
    let remote_norm = normalize(remote);
    let l: Vec<&str> = local_norm.lines().collect();
    let r: Vec<&str> = remote_norm.lines().collect();

    let mut start = 0;
    while start < l.len() && start < r.len() && l[start] == r[start] {
        start += 1;
    }

    let mut end_l = l.len();
    let mut end_r = r.len();
    while end_l > start && end_r > start && l[end_l - 1] == r[end_r - 1] {
        end_l -= 1;
        end_r -= 1;
    }

    let mut lines = Vec::new();
    for line in &l[start..end_l] {
        lines.push(format!("-{line}"));
    }
    for line in &r[start..end_r] {
        lines.push(format!("+{line}"));
    }

    let total = lines.len();
    if total > MAX_DIFF_LINES {
        lines.truncate(MAX_DIFF_LINES);
        lines.push(format!("… {} more lines", total - MAX_DIFF_LINES));
    }
    lines.join("\n")
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{truncated}…")
    }
}

/// CommonJS files that must appear in this relative order in the project
/// listing. The runtime resolves `require` from files loaded earlier, and
/// the platform loads files in list order.
pub const CRITICAL_FILE_ORDER: [&str; 3] = ["appsscript", "common-js/runtime", shim::SHIM_FILE];

/// Validate critical-file ordering. Returns warnings, never errors.
pub fn validate_module_order(remote: &[RemoteFile]) -> Vec<String> {
    let positions: Vec<(usize, &str)> = CRITICAL_FILE_ORDER
        .iter()
        .filter_map(|name| {
            remote
                .iter()
                .position(|f| f.name == *name)
                .map(|pos| (pos, *name))
        })
        .collect();

    let mut warnings = Vec::new();
    for pair in positions.windows(2) {
        if pair[0].0 > pair[1].0 {
            warnings.push(format!(
                "file {:?} is listed after {:?}; module resolution may fail at load time",
                pair[0].1, pair[1].1
            ));
        }
    }
    warnings
}
