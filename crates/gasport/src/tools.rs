//! The tool surface the MCP transport dispatches into.
//!
//! Each tool has a JSON-schema-described input and returns a structured
//! JSON envelope. The transport (stdio JSON-RPC in the CLI) stays thin:
//! it forwards `tools/list` and `tools/call` here and never interprets
//! payloads.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::cache::ProjectLocks;
use crate::config::ServerConfig;
use crate::engine::{ExecOptions, ExecOutcome, ExecutionEngine};
use crate::error::GasError;
use crate::gateway::GasClient;
use crate::gitflow::{FinishOptions, GitWorkflow};
use crate::promote::PromotionController;
use crate::report::Reporter;
use crate::types::{Environment, ScriptId};

/// A named tool with its input schema, as advertised to clients.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// Optional knobs shared by `exec` and `exec_api`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecTuning {
    pub environment: Option<Environment>,
    pub auto_redeploy: Option<bool>,
    /// Seconds, 780..=3600.
    pub execution_timeout: Option<u64>,
    /// Seconds, 780..=3600.
    pub response_timeout: Option<u64>,
    pub log_filter: Option<String>,
    pub log_tail: Option<usize>,
    pub skip_sync_check: Option<bool>,
    pub access_token: Option<String>,
}

impl ExecTuning {
    fn to_options(&self) -> ExecOptions {
        let defaults = ExecOptions::default();
        ExecOptions {
            environment: self.environment.unwrap_or_default(),
            auto_redeploy: self.auto_redeploy.unwrap_or(true),
            execution_timeout: self
                .execution_timeout
                .map(Duration::from_secs)
                .unwrap_or(defaults.execution_timeout),
            response_timeout: self
                .response_timeout
                .map(Duration::from_secs)
                .unwrap_or(defaults.response_timeout),
            log_filter: self.log_filter.clone(),
            log_tail: self.log_tail,
            skip_sync_check: self.skip_sync_check.unwrap_or(false),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecInput {
    script_id: String,
    #[serde(rename = "js_statement")]
    js_statement: String,
    #[serde(flatten)]
    tuning: ExecTuning,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecApiInput {
    script_id: String,
    function_name: String,
    module_name: Option<String>,
    #[serde(default)]
    parameters: Vec<Value>,
    #[serde(flatten)]
    tuning: ExecTuning,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionDeployInput {
    operation: String,
    script_id: String,
    environment: Option<Environment>,
    description: Option<String>,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GitFeatureInput {
    operation: String,
    script_id: String,
    feature_name: Option<String>,
    branch: Option<String>,
    message: Option<String>,
    remote: Option<String>,
    push_to_remote: Option<bool>,
    delete_after_merge: Option<bool>,
    project_path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectInitInput {
    script_id: Option<String>,
    title: Option<String>,
    access_token: Option<String>,
}

/// Build the statement `exec_api` delegates to `exec`.
pub fn build_require_call(module: Option<&str>, function: &str, params: &[Value]) -> String {
    let args: Vec<String> = params
        .iter()
        .map(|p| serde_json::to_string(p).unwrap_or_else(|_| "null".to_string()))
        .collect();
    let args = args.join(", ");
    match module {
        Some(module) => format!(
            "require({}).{function}({args})",
            serde_json::to_string(module).unwrap_or_else(|_| format!("\"{module}\""))
        ),
        None => format!("{function}({args})"),
    }
}

/// The tools this server advertises.
pub fn list_tools() -> Vec<ToolDescriptor> {
    let timeout_schema = json!({
        "type": "integer", "minimum": 780, "maximum": 3600,
        "description": "seconds"
    });

    vec![
        ToolDescriptor {
            name: "exec",
            description: "Execute a JavaScript statement in the live Apps Script runtime",
            input_schema: json!({
                "type": "object",
                "required": ["scriptId", "js_statement"],
                "properties": {
                    "scriptId": {"type": "string"},
                    "js_statement": {"type": "string"},
                    "environment": {"enum": ["dev", "staging", "prod"]},
                    "autoRedeploy": {"type": "boolean", "default": true},
                    "executionTimeout": timeout_schema,
                    "responseTimeout": timeout_schema,
                    "logFilter": {"type": "string", "description": "per-line regex"},
                    "logTail": {"type": "integer", "minimum": 0},
                    "skipSyncCheck": {"type": "boolean", "default": false},
                    "accessToken": {"type": "string"},
                },
            }),
        },
        ToolDescriptor {
            name: "exec_api",
            description: "Call a module function: require(\"<module>\").<fn>(<args>)",
            input_schema: json!({
                "type": "object",
                "required": ["scriptId", "functionName"],
                "properties": {
                    "scriptId": {"type": "string"},
                    "functionName": {"type": "string"},
                    "moduleName": {"type": "string"},
                    "parameters": {"type": "array"},
                    "environment": {"enum": ["dev", "staging", "prod"]},
                    "autoRedeploy": {"type": "boolean", "default": true},
                    "executionTimeout": timeout_schema,
                    "responseTimeout": timeout_schema,
                    "logFilter": {"type": "string"},
                    "logTail": {"type": "integer", "minimum": 0},
                    "skipSyncCheck": {"type": "boolean", "default": false},
                    "accessToken": {"type": "string"},
                },
            }),
        },
        ToolDescriptor {
            name: "version_deploy",
            description: "Inspect, reset, or promote the dev/staging/prod deployments",
            input_schema: json!({
                "type": "object",
                "required": ["operation", "scriptId"],
                "properties": {
                    "operation": {"enum": ["status", "reset", "promote"]},
                    "scriptId": {"type": "string"},
                    "environment": {"enum": ["dev", "staging", "prod"]},
                    "description": {"type": "string"},
                    "accessToken": {"type": "string"},
                },
            }),
        },
        ToolDescriptor {
            name: "git_feature",
            description: "Feature-branch workflow over the project's local mirror",
            input_schema: json!({
                "type": "object",
                "required": ["operation", "scriptId"],
                "properties": {
                    "operation": {
                        "enum": ["ensure", "start", "commit", "push", "finish",
                                 "rollback", "list", "switch"]
                    },
                    "scriptId": {"type": "string"},
                    "featureName": {"type": "string"},
                    "branch": {"type": "string"},
                    "message": {"type": "string"},
                    "remote": {"type": "string", "default": "origin"},
                    "pushToRemote": {"type": "boolean", "default": false},
                    "deleteAfterMerge": {"type": "boolean", "default": true},
                    "projectPath": {"type": "string"},
                },
            }),
        },
        ToolDescriptor {
            name: "project_init",
            description: "Create or adopt a project: remote creation, mirror pull, git init",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "scriptId": {"type": "string"},
                    "title": {"type": "string"},
                    "accessToken": {"type": "string"},
                },
            }),
        },
    ]
}

pub struct Toolbox {
    client: GasClient,
    engine: ExecutionEngine,
    locks: ProjectLocks,
    config: ServerConfig,
}

impl Toolbox {
    pub fn new(client: GasClient, engine: ExecutionEngine, config: ServerConfig) -> Self {
        Self {
            client,
            engine,
            locks: ProjectLocks::new(),
            config,
        }
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// Dispatch one tool call. Never panics and never returns Err: every
    /// failure becomes an error envelope.
    pub fn dispatch(&self, tool: &str, args: Value, reporter: &mut dyn Reporter) -> Value {
        match tool {
            "exec" => self.run_exec(args, reporter),
            "exec_api" => self.run_exec_api(args, reporter),
            "version_deploy" => self.run_version_deploy(args, reporter),
            "git_feature" => self.run_git_feature(args, reporter),
            "project_init" => self.run_project_init(args, reporter),
            other => error_envelope(
                None,
                None,
                &GasError::Validation(format!("unknown tool {other:?}")),
            ),
        }
    }

    fn token_for<'a>(&'a self, supplied: Option<&'a str>) -> Option<&'a str> {
        supplied.or(self.config.auth_token.as_deref())
    }

    fn run_exec(&self, args: Value, reporter: &mut dyn Reporter) -> Value {
        let input: ExecInput = match parse_input(args) {
            Ok(i) => i,
            Err(e) => return error_envelope(None, None, &e),
        };
        self.exec_statement(&input.script_id, &input.js_statement, &input.tuning, reporter)
    }

    fn run_exec_api(&self, args: Value, reporter: &mut dyn Reporter) -> Value {
        let input: ExecApiInput = match parse_input(args) {
            Ok(i) => i,
            Err(e) => return error_envelope(None, None, &e),
        };
        let statement = build_require_call(
            input.module_name.as_deref(),
            &input.function_name,
            &input.parameters,
        );
        let mut envelope =
            self.exec_statement(&input.script_id, &statement, &input.tuning, reporter);
        if let Some(obj) = envelope.as_object_mut() {
            obj.insert(
                "function_called".to_string(),
                json!(input.function_name),
            );
        }
        envelope
    }

    fn exec_statement(
        &self,
        script_id: &str,
        statement: &str,
        tuning: &ExecTuning,
        reporter: &mut dyn Reporter,
    ) -> Value {
        let id: ScriptId = match script_id.parse() {
            Ok(id) => id,
            Err(e) => return error_envelope(Some(script_id), Some(statement), &e),
        };
        let opts = tuning.to_options();
        let token = self.token_for(tuning.access_token.as_deref());

        match self.engine.execute(&id, statement, token, &opts, reporter) {
            Ok(outcome) => success_envelope(&id, statement, outcome),
            Err(e) => error_envelope(Some(script_id), Some(statement), &e),
        }
    }

    fn run_version_deploy(&self, args: Value, reporter: &mut dyn Reporter) -> Value {
        let input: VersionDeployInput = match parse_input(args) {
            Ok(i) => i,
            Err(e) => return error_envelope(None, None, &e),
        };
        let id: ScriptId = match input.script_id.parse() {
            Ok(id) => id,
            Err(e) => return error_envelope(Some(&input.script_id), None, &e),
        };
        let Some(token) = self.token_for(input.access_token.as_deref()) else {
            return error_envelope(
                Some(&input.script_id),
                None,
                &GasError::Authentication("version_deploy needs an access token".to_string()),
            );
        };

        let controller = PromotionController::new(&self.client);
        let result: Result<Value, GasError> = match input.operation.as_str() {
            "status" => controller
                .status(&id, token, reporter)
                .map(|table| json!({ "environments": table })),
            "reset" => controller.reset(&id, token, reporter).map(|deployments| {
                json!({
                    "deployments": deployments
                        .iter()
                        .map(|d| json!({
                            "deploymentId": d.deployment_id,
                            "description": d.description(),
                            "versionNumber": d.version_number(),
                        }))
                        .collect::<Vec<_>>()
                })
            }),
            "promote" => {
                let Some(env) = input.environment else {
                    return error_envelope(
                        Some(&input.script_id),
                        None,
                        &GasError::Validation(
                            "promote requires an environment".to_string(),
                        ),
                    );
                };
                controller
                    .promote(&id, env, input.description.as_deref(), token, reporter)
                    .map(|outcome| serde_json::to_value(outcome).unwrap_or(Value::Null))
            }
            other => Err(GasError::Validation(format!(
                "unknown version_deploy operation {other:?}"
            ))),
        };

        match result {
            Ok(mut body) => {
                if let Some(obj) = body.as_object_mut() {
                    obj.insert("status".to_string(), json!("success"));
                    obj.insert("scriptId".to_string(), json!(id.as_str()));
                    obj.insert("operation".to_string(), json!(input.operation));
                }
                body
            }
            Err(e) => error_envelope(Some(&input.script_id), None, &e),
        }
    }

    fn run_git_feature(&self, args: Value, reporter: &mut dyn Reporter) -> Value {
        let input: GitFeatureInput = match parse_input(args) {
            Ok(i) => i,
            Err(e) => return error_envelope(None, None, &e),
        };
        let id: ScriptId = match input.script_id.parse() {
            Ok(id) => id,
            Err(e) => return error_envelope(Some(&input.script_id), None, &e),
        };

        // One writer per project directory.
        let lock = self.locks.lock_for(&id);
        let _guard = lock.lock().expect("project lock");

        let repo_root = match &input.project_path {
            Some(path) => std::path::PathBuf::from(path),
            None => self.engine.mirror().project_dir(&id),
        };

        let workflow = match GitWorkflow::open_or_init(&repo_root) {
            Ok(wf) => wf,
            Err(e) => {
                return git_error_envelope(&input.script_id, &input.operation, &e);
            }
        };

        let remote = input.remote.clone().unwrap_or_else(|| "origin".to_string());
        let result: anyhow::Result<Value> = match input.operation.as_str() {
            "ensure" => workflow.ensure_feature_branch().map(|out| {
                json!({ "branch": out.branch, "branchCreated": out.created })
            }),
            "start" => match &input.feature_name {
                Some(name) => workflow.start(name).map(|out| {
                    json!({ "branch": out.branch, "branchCreated": out.created })
                }),
                None => Err(anyhow::anyhow!("start requires featureName")),
            },
            "commit" => match &input.message {
                Some(message) => workflow.commit(message).map(|out| {
                    json!({
                        "commit": out.commit,
                        "branch": out.branch,
                        "message": out.message,
                    })
                }),
                None => Err(anyhow::anyhow!("commit requires a message")),
            },
            "push" => workflow
                .push(&remote, input.branch.as_deref())
                .map(|out| json!({ "remote": out.remote, "branch": out.branch, "pushed": true })),
            "finish" => workflow
                .finish(FinishOptions {
                    branch: input.branch.clone(),
                    delete_after_merge: input.delete_after_merge.unwrap_or(true),
                    push_to_remote: input.push_to_remote.unwrap_or(false),
                    remote,
                })
                .map(|out| serde_json::to_value(out).unwrap_or(Value::Null)),
            "rollback" => match &input.branch {
                Some(branch) => workflow
                    .rollback(branch)
                    .map(|out| serde_json::to_value(out).unwrap_or(Value::Null)),
                None => Err(anyhow::anyhow!("rollback requires a branch")),
            },
            "list" => workflow
                .list()
                .map(|branches| json!({ "branches": branches })),
            "switch" => match &input.branch {
                Some(branch) => workflow
                    .switch(branch)
                    .map(|_| json!({ "branch": branch })),
                None => Err(anyhow::anyhow!("switch requires a branch")),
            },
            other => Err(anyhow::anyhow!("unknown git_feature operation {other:?}")),
        };

        match result {
            Ok(mut body) => {
                reporter.info(&format!(
                    "git_feature {} completed in {}",
                    input.operation,
                    repo_root.display()
                ));
                if let Some(obj) = body.as_object_mut() {
                    obj.insert("status".to_string(), json!("success"));
                    obj.insert("scriptId".to_string(), json!(input.script_id));
                    obj.insert("operation".to_string(), json!(input.operation));
                }
                body
            }
            Err(e) => git_error_envelope(&input.script_id, &input.operation, &e),
        }
    }

    fn run_project_init(&self, args: Value, reporter: &mut dyn Reporter) -> Value {
        let input: ProjectInitInput = match parse_input(args) {
            Ok(i) => i,
            Err(e) => return error_envelope(None, None, &e),
        };
        let Some(token) = self.token_for(input.access_token.as_deref()) else {
            return error_envelope(
                None,
                None,
                &GasError::Authentication("project_init needs an access token".to_string()),
            );
        };

        let result: Result<Value, GasError> = (|| {
            let id: ScriptId = match &input.script_id {
                Some(id) => id.parse()?,
                None => {
                    let title = input.title.as_deref().unwrap_or("gasport project");
                    let header = self.client.create_project(title, token)?;
                    reporter.info(&format!("created project {}", header.script_id));
                    header.script_id.parse()?
                }
            };

            let content = self.client.get_project_content(&id, token)?;
            for file in &content.files {
                self.engine.mirror().write_remote_file(&id, file)?;
            }
            let project_dir = self.engine.mirror().project_dir(&id);
            std::fs::create_dir_all(&project_dir)
                .map_err(|e| GasError::fs(&project_dir, e))?;
            GitWorkflow::open_or_init(&project_dir)
                .map_err(|e| GasError::Internal(format!("git init failed: {e:#}")))?;

            Ok(json!({
                "status": "success",
                "scriptId": id.as_str(),
                "projectPath": project_dir.display().to_string(),
                "files": content.files.len(),
            }))
        })();

        match result {
            Ok(body) => body,
            Err(e) => error_envelope(input.script_id.as_deref(), None, &e),
        }
    }
}

fn parse_input<T: for<'de> Deserialize<'de>>(args: Value) -> Result<T, GasError> {
    serde_json::from_value(args)
        .map_err(|e| GasError::Validation(format!("invalid tool input: {e}")))
}

fn success_envelope(script_id: &ScriptId, statement: &str, outcome: ExecOutcome) -> Value {
    let mut body = json!({
        "status": "success",
        "scriptId": script_id.as_str(),
        "js_statement": statement,
        "result": outcome.result,
        "logger_output": outcome.logger_output,
        "executedAt": outcome.executed_at.to_rfc3339(),
        "environment": outcome.environment.as_str(),
        "ide_url_hint": format!(
            "https://script.google.com/home/projects/{}/edit",
            script_id.as_str()
        ),
    });
    let obj = body.as_object_mut().expect("object");
    if let Some(v) = outcome.version_number {
        obj.insert("versionNumber".to_string(), json!(v));
    }
    if outcome.cookie_auth_used {
        obj.insert("cookieAuthUsed".to_string(), json!(true));
    }
    if let Some(collision) = outcome.collision {
        obj.insert("collision".to_string(), json!(collision));
    }
    if let Some(infra) = outcome.infrastructure {
        obj.insert("infrastructure".to_string(), json!(infra));
    }
    if !outcome.hints.is_empty() {
        obj.insert("hints".to_string(), json!(outcome.hints));
    }
    if let Some(path) = outcome.payload_file {
        obj.insert(
            "payload_file".to_string(),
            json!(path.display().to_string()),
        );
    }
    body
}

fn error_envelope(script_id: Option<&str>, statement: Option<&str>, error: &GasError) -> Value {
    let mut error_body = json!({
        "type": error.kind(),
        "message": error.to_string(),
    });
    let error_obj = error_body.as_object_mut().expect("object");
    match error {
        GasError::Execution {
            error: script_error,
            ..
        } => {
            error_obj.insert("stack".to_string(), json!(script_error.stack));
        }
        GasError::Api { status, .. } => {
            error_obj.insert("statusCode".to_string(), json!(status));
        }
        GasError::SyncDrift(files) => {
            error_obj.insert("files".to_string(), json!(files));
        }
        _ => {}
    }

    let logger_output = match error {
        GasError::Execution { logger_output, .. } => logger_output.clone(),
        _ => String::new(),
    };

    let mut body = json!({
        "status": "error",
        "error": error_body,
        "logger_output": logger_output,
    });
    let obj = body.as_object_mut().expect("object");
    if let Some(id) = script_id {
        obj.insert("scriptId".to_string(), json!(id));
    }
    if let Some(statement) = statement {
        obj.insert("js_statement".to_string(), json!(statement));
    }
    body
}

fn git_error_envelope(script_id: &str, operation: &str, error: &anyhow::Error) -> Value {
    json!({
        "status": "error",
        "scriptId": script_id,
        "operation": operation,
        "error": {
            "type": "Validation",
            "message": format!("{error:#}"),
        },
        "logger_output": "",
    })
}

/// Build a toolbox wired for production defaults.
pub fn default_toolbox(config: ServerConfig) -> Result<Toolbox, GasError> {
    let client = GasClient::new()?;
    let mirror = crate::mirror::LocalMirror::new(config.effective_projects_root());
    let cache = Arc::new(crate::cache::SessionCache::new());
    let supervisor = Arc::new(crate::infra::Supervisor::new());
    let engine = ExecutionEngine::new(client.clone(), mirror, cache, supervisor)?
        .with_inline_limit(config.inline_response_limit)
        .with_time_zone(config.time_zone.clone())
        .with_verbose_logging(config.verbose_logging_enabled());
    Ok(Toolbox::new(client, engine, config))
}
