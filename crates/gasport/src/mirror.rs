//! The local mirror: mapping between remote files and the on-disk tree.
//!
//! This is the only component that touches mirror source content on disk.
//! Remote names are extension-less, `/`-separated paths; locally each file
//! gains the extension of its type under `<root>/<script_id>/`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::GasError;
use crate::types::{FileType, RemoteFile, ScriptId};

/// Marker file that identifies a workspace root during the upward walk.
pub const WORKSPACE_MARKER: &str = ".mcp-gas-root";

/// Directory under a workspace or home dir that holds mirrored projects.
const PROJECTS_SUBDIR: &str = ".mcp-gas/projects";

/// Per-project scratch directory for event logs and spilled responses.
pub const SCRATCH_SUBDIR: &str = ".gasport";

/// A source file read from the local mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Remote-form name: extension-less, `/`-separated.
    pub name: String,
    pub file_type: FileType,
    pub content: String,
}

/// Map a remote name to its mirror-relative path.
pub fn to_local_rel(name: &str, file_type: FileType) -> PathBuf {
    let normalized = name.replace('\\', "/");
    PathBuf::from(format!("{normalized}.{}", file_type.extension()))
}

/// Map a mirror-relative path back to a remote name and type.
///
/// Returns None for unsupported extensions; separators are normalized to
/// `/` so Windows-produced paths map identically.
pub fn to_gas_name(rel: &Path) -> Option<(String, FileType)> {
    let ext = rel.extension()?.to_str()?;
    let file_type = FileType::from_extension(ext)?;
    let without_ext = rel.with_extension("");
    let name = without_ext.to_str()?.replace('\\', "/");
    if name.is_empty() {
        return None;
    }
    Some((name, file_type))
}

#[derive(Debug, Clone)]
pub struct LocalMirror {
    root: PathBuf,
}

impl LocalMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the projects root.
    ///
    /// Order: `MCP_GAS_PROJECTS_ROOT`; the configured root; a workspace
    /// named by `MCP_GAS_WORKSPACE` or `MCP_GAS_WORKING_DIR`; an upward walk
    /// from the current directory looking for [`WORKSPACE_MARKER`]; finally
    /// the per-user fallback under the home directory.
    pub fn resolve_root(configured: Option<&Path>) -> PathBuf {
        if let Ok(root) = std::env::var("MCP_GAS_PROJECTS_ROOT")
            && !root.is_empty()
        {
            return PathBuf::from(root);
        }

        if let Some(root) = configured {
            return root.to_path_buf();
        }

        for var in ["MCP_GAS_WORKSPACE", "MCP_GAS_WORKING_DIR"] {
            if let Ok(dir) = std::env::var(var)
                && !dir.is_empty()
            {
                return PathBuf::from(dir).join(PROJECTS_SUBDIR);
            }
        }

        if let Ok(cwd) = std::env::current_dir() {
            let mut dir: Option<&Path> = Some(cwd.as_path());
            while let Some(d) = dir {
                if d.join(WORKSPACE_MARKER).exists() {
                    return d.join(PROJECTS_SUBDIR);
                }
                dir = d.parent();
            }
        }

        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(PROJECTS_SUBDIR)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The mirror directory for one project.
    pub fn project_dir(&self, script_id: &ScriptId) -> PathBuf {
        self.root.join(script_id.as_str())
    }

    /// The per-project scratch directory (event logs, spilled payloads).
    pub fn scratch_dir(&self, script_id: &ScriptId) -> PathBuf {
        self.project_dir(script_id).join(SCRATCH_SUBDIR)
    }

    /// Write one remote file into the mirror, creating directories.
    pub fn write_remote_file(
        &self,
        script_id: &ScriptId,
        file: &RemoteFile,
    ) -> Result<PathBuf, GasError> {
        self.write_source(script_id, &file.name, file.file_type, &file.source)
    }

    /// Write source content for a remote name, creating directories.
    pub fn write_source(
        &self,
        script_id: &ScriptId,
        name: &str,
        file_type: FileType,
        content: &str,
    ) -> Result<PathBuf, GasError> {
        let path = self
            .project_dir(script_id)
            .join(to_local_rel(name, file_type));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| GasError::fs(parent, e))?;
        }
        fs::write(&path, content).map_err(|e| GasError::fs(&path, e))?;
        Ok(path)
    }

    /// Read every mirrored source file of a project.
    ///
    /// Skips dotfiles, dot-directories (including the scratch dir), and
    /// files whose extension has no remote type. A missing project
    /// directory reads as empty.
    pub fn read_all(&self, script_id: &ScriptId) -> Result<Vec<LocalFile>, GasError> {
        let dir = self.project_dir(script_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        Self::walk(&dir, &dir, &mut files)?;
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    fn walk(base: &Path, dir: &Path, out: &mut Vec<LocalFile>) -> Result<(), GasError> {
        let entries = fs::read_dir(dir).map_err(|e| GasError::fs(dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| GasError::fs(dir, e))?;
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if file_name.starts_with('.') {
                continue;
            }
            if path.is_dir() {
                Self::walk(base, &path, out)?;
                continue;
            }
            let rel = path
                .strip_prefix(base)
                .map_err(|_| GasError::Internal("walk escaped mirror root".to_string()))?;
            let Some((name, file_type)) = to_gas_name(rel) else {
                continue;
            };
            let content = fs::read_to_string(&path).map_err(|e| GasError::fs(&path, e))?;
            out.push(LocalFile {
                name,
                file_type,
                content,
            });
        }
        Ok(())
    }
}
