//! Process-wide shared state, each piece behind a single owner.
//!
//! The session URL cache maps script ids to previously constructed web-app
//! URLs for the current authorization principal. It is never persisted, and
//! replacing the principal drops every entry at once. The project lock
//! registry serializes git-tree mutations per project directory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::types::ScriptId;

#[derive(Debug, Default)]
struct CacheInner {
    urls: HashMap<String, String>,
    auth_epoch: u64,
}

/// Session-scoped `script id → deployment URL` cache.
#[derive(Debug, Default)]
pub struct SessionCache {
    inner: Mutex<CacheInner>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a cached execution URL.
    pub fn url_for(&self, script_id: &ScriptId) -> Option<String> {
        let inner = self.inner.lock().expect("cache lock");
        inner.urls.get(script_id.as_str()).cloned()
    }

    /// Store a URL after a successful construction.
    pub fn store(&self, script_id: &ScriptId, url: impl Into<String>) {
        let mut inner = self.inner.lock().expect("cache lock");
        inner.urls.insert(script_id.as_str().to_string(), url.into());
    }

    /// Drop every cached URL. Called when the principal changes or on an
    /// explicit reset.
    pub fn invalidate_all(&self) {
        let mut inner = self.inner.lock().expect("cache lock");
        inner.urls.clear();
        inner.auth_epoch += 1;
    }

    /// Monotonic counter of auth replacements, for diagnostics.
    pub fn auth_epoch(&self) -> u64 {
        self.inner.lock().expect("cache lock").auth_epoch
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock").urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-project mutexes serializing git working-tree mutations.
///
/// Cross-project operations run in parallel; within one project the write
/// path holds this lock across its branch/commit sequence.
#[derive(Debug, Default)]
pub struct ProjectLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the lock for a project.
    pub fn lock_for(&self, script_id: &ScriptId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("registry lock");
        locks
            .entry(script_id.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
