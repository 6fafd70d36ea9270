use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The script project identifier Google assigns (typically 44 characters).
///
/// Treated as opaque; validation only rejects strings that could not be a
/// project id (wrong length, path separators, whitespace).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptId(String);

impl ScriptId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ScriptId {
    type Err = crate::error::GasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() < 20 || s.len() > 60 {
            return Err(crate::error::GasError::Validation(format!(
                "script id has implausible length {} (expected ~44 characters)",
                s.len()
            )));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(crate::error::GasError::Validation(
                "script id contains characters outside [A-Za-z0-9_-]".to_string(),
            ));
        }
        Ok(ScriptId(s.to_string()))
    }
}

/// Remote file type as the Apps Script API names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    #[serde(rename = "SERVER_JS")]
    ServerJs,
    #[serde(rename = "HTML")]
    Html,
    #[serde(rename = "JSON")]
    Json,
}

impl FileType {
    /// The local file extension for this type.
    pub fn extension(&self) -> &'static str {
        match self {
            FileType::ServerJs => "js",
            FileType::Html => "html",
            FileType::Json => "json",
        }
    }

    /// Map a local extension back to a remote type.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "js" => Some(FileType::ServerJs),
            "html" => Some(FileType::Html),
            "json" => Some(FileType::Json),
            _ => None,
        }
    }
}

/// Name of the manifest file every project carries exactly once.
pub const MANIFEST_FILE: &str = "appsscript";

/// A file in the remote project: extension-less name, type, and source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    #[serde(default)]
    pub source: String,
}

impl RemoteFile {
    pub fn new(name: impl Into<String>, file_type: FileType, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_type,
            source: source.into(),
        }
    }

    pub fn is_manifest(&self) -> bool {
        self.file_type == FileType::Json && self.name == MANIFEST_FILE
    }
}

/// Project content as returned by the content endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectContent {
    pub script_id: String,
    #[serde(default)]
    pub files: Vec<RemoteFile>,
}

/// A project header from the projects listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectHeader {
    pub script_id: String,
    #[serde(default)]
    pub title: String,
}

/// An immutable numbered snapshot of all files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptVersion {
    pub version_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Deployment environments, keyed by a description-prefix tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Dev,
    Staging,
    Prod,
}

impl Environment {
    /// The literal description prefix carried by deployments of this environment.
    pub fn tag(&self) -> &'static str {
        match self {
            Environment::Dev => "[DEV]",
            Environment::Staging => "[STAGING]",
            Environment::Prod => "[PROD]",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Staging => "staging",
            Environment::Prod => "prod",
        }
    }

    pub const ALL: [Environment; 3] = [Environment::Dev, Environment::Staging, Environment::Prod];

    /// Extract the environment from a deployment description.
    pub fn from_description(description: &str) -> Option<Self> {
        let trimmed = description.trim_start();
        Self::ALL
            .into_iter()
            .find(|env| trimmed.starts_with(env.tag()))
    }
}

impl FromStr for Environment {
    type Err = crate::error::GasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Environment::Dev),
            "staging" => Ok(Environment::Staging),
            "prod" => Ok(Environment::Prod),
            other => Err(crate::error::GasError::Validation(format!(
                "unknown environment {other:?} (expected dev, staging, or prod)"
            ))),
        }
    }
}

/// Deployment configuration: description and optional pinned version.
///
/// `version_number: None` is a HEAD deployment serving current source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_number: Option<u64>,
}

/// A web-app (or API-executable) entry point on a deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPoint {
    #[serde(default)]
    pub entry_point_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_app: Option<WebAppEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebAppEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A deployment record as the deployments endpoint returns it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub deployment_id: String,
    #[serde(default)]
    pub deployment_config: DeploymentConfig,
    #[serde(default)]
    pub entry_points: Vec<EntryPoint>,
}

impl Deployment {
    pub fn description(&self) -> &str {
        &self.deployment_config.description
    }

    /// None for HEAD deployments.
    pub fn version_number(&self) -> Option<u64> {
        self.deployment_config.version_number
    }

    /// The environment this deployment is tagged with, if any.
    pub fn environment(&self) -> Option<Environment> {
        Environment::from_description(self.description())
    }

    /// The first web-app URL on this deployment, if any.
    pub fn web_app_url(&self) -> Option<&str> {
        self.entry_points
            .iter()
            .filter(|e| e.entry_point_type == "WEB_APP")
            .find_map(|e| e.web_app.as_ref().and_then(|w| w.url.as_deref()))
    }

    /// Whether this deployment serves current source at every invocation.
    pub fn is_head(&self) -> bool {
        self.version_number().is_none()
    }
}

/// A JavaScript error captured by the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptError {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub stack: String,
}

/// The tagged JSON envelope the dispatcher returns.
#[derive(Debug, Clone, PartialEq)]
pub enum ShimEnvelope {
    Data {
        payload: Value,
        logger_output: String,
    },
    Exception {
        error: ScriptError,
        logger_output: String,
    },
}

impl ShimEnvelope {
    /// Parse an envelope from a response body.
    ///
    /// Accepts the tagged `{"type":"data"|"exception"}` shapes and the
    /// legacy `{"error":true,"message":...}` shape, which is mapped onto
    /// the exception variant.
    pub fn parse(body: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(body.trim()).ok()?;
        let obj = value.as_object()?;

        match obj.get("type").and_then(Value::as_str) {
            Some("data") => Some(ShimEnvelope::Data {
                payload: obj.get("payload").cloned().unwrap_or(Value::Null),
                logger_output: obj
                    .get("logger_output")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            Some("exception") => {
                let payload = obj.get("payload").and_then(Value::as_object);
                let error = payload
                    .and_then(|p| p.get("error"))
                    .and_then(|e| serde_json::from_value::<ScriptError>(e.clone()).ok())
                    .unwrap_or_default();
                let logger_output = payload
                    .and_then(|p| p.get("logger_output"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Some(ShimEnvelope::Exception {
                    error,
                    logger_output,
                })
            }
            _ => {
                // Legacy error shape predating the tagged envelopes.
                if obj.get("error").and_then(Value::as_bool) == Some(true) {
                    let message = obj
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown script error")
                        .to_string();
                    Some(ShimEnvelope::Exception {
                        error: ScriptError {
                            name: "Error".to_string(),
                            message,
                            stack: String::new(),
                        },
                        logger_output: obj
                            .get("logger_output")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    })
                } else {
                    None
                }
            }
        }
    }
}
