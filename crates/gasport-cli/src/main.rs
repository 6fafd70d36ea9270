use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{Value, json};

use gasport::cache::SessionCache;
use gasport::config::ServerConfig;
use gasport::engine::ExecutionEngine;
use gasport::gateway::GasClient;
use gasport::infra::Supervisor;
use gasport::mirror::LocalMirror;
use gasport::report::Reporter;
use gasport::tools::{Toolbox, list_tools};

#[derive(Parser, Debug)]
#[command(name = "gasport", version)]
#[command(about = "Expose a Google Apps Script project as an executable MCP workspace")]
struct Cli {
    /// Apps Script API base URL (override for testing).
    #[arg(long, default_value = gasport::gateway::DEFAULT_API_BASE)]
    api_base: String,

    /// Local projects root (overrides config and environment resolution).
    #[arg(long)]
    projects_root: Option<PathBuf>,

    /// Config file path (default: the user config directory).
    #[arg(long)]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the MCP server: newline-delimited JSON-RPC over stdio.
    Serve,
    /// Print the advertised tool surface.
    Tools,
    /// Show or update the persisted configuration.
    Config {
        /// Set the local projects root.
        #[arg(long)]
        set_root: Option<PathBuf>,
    },
}

struct StderrReporter;

impl Reporter for StderrReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[gasport] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[gasport] warning: {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[gasport] error: {msg}");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config_path
        .clone()
        .unwrap_or_else(ServerConfig::default_path);
    let mut config = ServerConfig::load_from(&config_path)?;
    if let Some(root) = &cli.projects_root {
        config.projects_root = Some(root.clone());
    }

    match &cli.command {
        Commands::Serve => {
            let toolbox = build_toolbox(&cli.api_base, config)?;
            serve(&toolbox)
        }
        Commands::Tools => {
            for tool in list_tools() {
                println!("{}\t{}", tool.name, tool.description);
            }
            Ok(())
        }
        Commands::Config { set_root } => {
            if let Some(root) = set_root {
                config.projects_root = Some(root.clone());
                config.save_to(&config_path)?;
                println!("projects root set to {}", root.display());
            } else {
                println!("config file:   {}", config_path.display());
                println!(
                    "projects root: {}",
                    config.effective_projects_root().display()
                );
                println!(
                    "auth token:    {}",
                    if config.auth_token.is_some() {
                        "configured"
                    } else {
                        "not configured"
                    }
                );
                println!("verbose:       {}", config.verbose_logging_enabled());
            }
            Ok(())
        }
    }
}

fn build_toolbox(api_base: &str, config: ServerConfig) -> Result<Toolbox> {
    let client = GasClient::with_base(api_base).context("failed to build API client")?;
    let mirror = LocalMirror::new(config.effective_projects_root());
    let cache = Arc::new(SessionCache::new());
    let supervisor = Arc::new(Supervisor::new());
    let engine = ExecutionEngine::new(client.clone(), mirror, cache, supervisor)
        .context("failed to build execution engine")?
        .with_inline_limit(config.inline_response_limit)
        .with_time_zone(config.time_zone.clone())
        .with_verbose_logging(config.verbose_logging_enabled());
    Ok(Toolbox::new(client, engine, config))
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

fn serve(toolbox: &Toolbox) -> Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();

    for line in stdin.lock().lines() {
        let line = line.context("failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        if let Some(response) = handle_line(toolbox, &line) {
            let mut out = stdout.lock();
            serde_json::to_writer(&mut out, &response).context("failed to write response")?;
            out.write_all(b"\n").context("failed to write newline")?;
            out.flush().context("failed to flush stdout")?;
        }
    }

    // Give detached background repairs a moment before the process exits.
    toolbox
        .engine()
        .supervisor()
        .shutdown(std::time::Duration::from_secs(2));
    Ok(())
}

/// Handle one JSON-RPC line. Returns None for notifications.
fn handle_line(toolbox: &Toolbox, line: &str) -> Option<Value> {
    let request: RpcRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            return Some(rpc_error(Value::Null, -32700, &format!("parse error: {e}")));
        }
    };
    let id = request.id.clone()?;

    match request.method.as_str() {
        "initialize" => Some(rpc_result(
            id,
            json!({
                "protocolVersion": "2024-11-05",
                "serverInfo": {
                    "name": "gasport",
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": { "tools": {} },
            }),
        )),
        "tools/list" => {
            let tools: Vec<Value> = list_tools()
                .into_iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "inputSchema": t.input_schema,
                    })
                })
                .collect();
            Some(rpc_result(id, json!({ "tools": tools })))
        }
        "tools/call" => {
            let name = request.params.get("name").and_then(Value::as_str);
            let Some(name) = name else {
                return Some(rpc_error(id, -32602, "tools/call requires a name"));
            };
            let arguments = request
                .params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));

            let mut reporter = StderrReporter;
            let outcome = toolbox.dispatch(name, arguments, &mut reporter);
            let is_error = outcome.get("status").and_then(Value::as_str) == Some("error");
            Some(rpc_result(
                id,
                json!({
                    "content": [{
                        "type": "text",
                        "text": outcome.to_string(),
                    }],
                    "isError": is_error,
                }),
            ))
        }
        other => Some(rpc_error(id, -32601, &format!("method not found: {other}"))),
    }
}

fn rpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn rpc_error(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}
