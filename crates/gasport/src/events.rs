//! Append-only JSONL event log for execution requests.
//!
//! When verbose logging is enabled, each `exec` appends its lifecycle
//! events under the project's scratch directory. The log is diagnostic
//! evidence, never consulted by the engine itself.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default events file name inside the scratch directory.
pub const EVENTS_FILE: &str = "events.jsonl";

pub fn events_path(scratch_dir: &Path) -> PathBuf {
    scratch_dir.join(EVENTS_FILE)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event_type: ExecEventType,
    pub script_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecEventType {
    ExecStarted {
        environment: String,
        statement_len: usize,
    },
    SyncChecked {
        drifted: usize,
        blocking: usize,
    },
    UrlResolved {
        source: UrlSource,
    },
    RequestIssued {
        attempt: u32,
    },
    ResponseClassified {
        kind: String,
    },
    InfraRepaired {
        shim_created: bool,
    },
    WarmupPoll {
        attempt: u32,
        ready: bool,
    },
    CookieAuthUsed,
    ExecFinished {
        status: String,
        duration_ms: u64,
    },
}

/// Where the execution URL came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UrlSource {
    EnvironmentDeployment,
    SessionCache,
    Constructed,
}

/// In-memory event buffer flushed to JSONL at request end.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<ExecEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, script_id: &str, event_type: ExecEventType) {
        self.events.push(ExecEvent {
            timestamp: Utc::now(),
            event_type,
            script_id: script_id.to_string(),
        });
    }

    pub fn events(&self) -> &[ExecEvent] {
        &self.events
    }

    /// Append all recorded events to the log file.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create events dir {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        let mut writer = std::io::BufWriter::new(file);

        for event in &self.events {
            let line = serde_json::to_string(event).context("failed to serialize event")?;
            writeln!(writer, "{}", line).context("failed to write event line")?;
        }
        writer.flush().context("failed to flush events file")?;
        Ok(())
    }
}
