//! Subprocess execution for gasport.
//!
//! Every invocation passes arguments as an argv list; nothing here ever
//! builds a shell string. Output is captured as UTF-8 (lossy), and an
//! optional wall-clock timeout kills the child and marks the result.
//!
//! # Example
//!
//! ```ignore
//! use gasport_process::run_in_dir;
//! use std::path::Path;
//!
//! let out = run_in_dir("git", &["status", "--porcelain"], Path::new(".")).expect("run");
//! assert_eq!(out.exit_code, 0);
//! ```

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Result of a command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit code (-1 when not available, e.g. killed).
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Whether execution exceeded the timeout and the child was killed.
    pub timed_out: bool,
    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    /// Whether the command exited successfully.
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Turn a non-zero exit into an error carrying stderr.
    pub fn ok(&self) -> Result<&Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(anyhow::anyhow!(
                "command failed with exit code {}: {}",
                self.exit_code,
                self.stderr.trim()
            ))
        }
    }
}

/// Check that a program is resolvable on PATH.
pub fn program_available(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Run a command in a directory and capture its output.
pub fn run_in_dir(program: &str, args: &[&str], dir: &Path) -> Result<CommandOutput> {
    run_with_timeout(program, args, dir, None)
}

/// Run a command in a directory with an optional wall-clock timeout.
///
/// With a timeout, the child is spawned with piped output and polled via
/// `try_wait`; on deadline it is killed and the result is marked
/// `timed_out`. Output captured up to that point is preserved.
pub fn run_with_timeout(
    program: &str,
    args: &[&str],
    dir: &Path,
    timeout: Option<Duration>,
) -> Result<CommandOutput> {
    let start = Instant::now();
    let mut command = Command::new(program);
    command.args(args).current_dir(dir);

    let (exit_code, stdout, stderr, timed_out) = if let Some(timeout_dur) = timeout {
        let mut child = command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;

        let deadline = Instant::now() + timeout_dur;
        loop {
            match child.try_wait().context("failed to poll command")? {
                Some(status) => {
                    let (out, err) = drain_pipes(&mut child);
                    break (status.code().unwrap_or(-1), out, err, false);
                }
                None => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();

                        let (out, mut err) = drain_pipes(&mut child);
                        err.push_str(&format!(
                            "\ncommand timed out after {}",
                            humantime::format_duration(timeout_dur)
                        ));
                        break (-1, out, err, true);
                    }

                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    } else {
        let output = command
            .output()
            .with_context(|| format!("failed to execute {program} {args:?}"))?;

        (
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stdout).to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
            false,
        )
    };

    Ok(CommandOutput {
        exit_code,
        stdout,
        stderr,
        timed_out,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

fn drain_pipes(child: &mut std::process::Child) -> (String, String) {
    let mut stdout_bytes = Vec::new();
    let mut stderr_bytes = Vec::new();
    if let Some(mut out) = child.stdout.take() {
        let _ = out.read_to_end(&mut stdout_bytes);
    }
    if let Some(mut err) = child.stderr.take() {
        let _ = err.read_to_end(&mut stderr_bytes);
    }
    (
        String::from_utf8_lossy(&stdout_bytes).to_string(),
        String::from_utf8_lossy(&stderr_bytes).to_string(),
    )
}
