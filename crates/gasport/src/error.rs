//! The structured error taxonomy.
//!
//! Components below the execution engine return these; the engine is the
//! only place that converts them into response envelopes. Each variant maps
//! to one error kind in the tool response (`error.type`).

use std::path::PathBuf;
use std::time::Duration;

use crate::sync::FileDrift;

#[derive(Debug, thiserror::Error)]
pub enum GasError {
    /// Input failed validation; no side effects happened.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Missing or rejected credentials. Never retried in-process.
    #[error("authentication required: {0}")]
    Authentication(String),

    /// Local mirror and remote content disagree on files present in both.
    #[error("local mirror differs from remote content for {} file(s)", .0.len())]
    SyncDrift(Vec<FileDrift>),

    /// No web-app entry point exists to construct an execution URL from.
    #[error("no web-app deployment exists for this project")]
    NoDeployment,

    /// The execution endpoint answered with a not-yet-servable response.
    #[error("deployment is not ready: {0}")]
    DeploymentNotReady(String),

    /// Infrastructure is missing and the caller disabled auto-redeploy.
    #[error("infrastructure is missing and autoRedeploy is disabled: {0}")]
    AutoRedeployDisabled(String),

    /// The script itself threw; carries the remote error and logger output.
    #[error("script threw {}: {}", .error.name, .error.message)]
    Execution {
        error: crate::types::ScriptError,
        logger_output: String,
    },

    /// The overall execution deadline elapsed.
    #[error("execution timed out after {}", humantime::format_duration(.0.to_owned()))]
    Timeout(Duration),

    /// The response body stalled past its own deadline.
    #[error("response read timed out after {}", humantime::format_duration(.0.to_owned()))]
    ResponseReadTimeout(Duration),

    /// A remote API call failed; carries status and body for classification.
    #[error("API call failed with HTTP {status}: {body}")]
    Api { status: u16, body: String },

    /// Local I/O failure, with the path that failed.
    #[error("filesystem error at {}: {source}", .path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A bug or unexpected condition.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GasError {
    /// The error kind name carried in response envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            GasError::Validation(_) => "Validation",
            GasError::Authentication(_) => "Authentication",
            GasError::SyncDrift(_) => "SyncDrift",
            GasError::NoDeployment => "NoDeployment",
            GasError::DeploymentNotReady(_) => "DeploymentNotReady",
            GasError::AutoRedeployDisabled(_) => "AutoRedeployDisabled",
            GasError::Execution { .. } => "ExecutionError",
            GasError::Timeout(_) => "Timeout",
            GasError::ResponseReadTimeout(_) => "ResponseReadTimeout",
            GasError::Api { .. } => "ApiError",
            GasError::FileSystem { .. } => "FileSystem",
            GasError::Internal(_) => "Internal",
        }
    }

    /// Whether this failure means the project lacks usable exec infrastructure.
    pub fn needs_infrastructure(&self) -> bool {
        match self {
            GasError::NoDeployment | GasError::DeploymentNotReady(_) => true,
            GasError::Api { status, .. } => *status == 404,
            _ => false,
        }
    }

    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GasError::FileSystem {
            path: path.into(),
            source,
        }
    }
}
