//! A stateful fake of the Apps Script API plus its web-app exec endpoint.
//!
//! One tiny_http server carries both surfaces: `/v1/projects/...` for the
//! gateway and `/macros/s/<deployment>/{dev,exec}` for executions. The
//! project state (files, version snapshots, deployments) lives behind a
//! mutex so tests can seed and inspect it.

// Each test binary compiles this module separately; not every binary uses
// every helper.
#![allow(dead_code)]

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use serde_json::{Value, json};
use tiny_http::{Method, Response, Server, StatusCode};

pub const SCRIPT_ID: &str = "1a2B3c4D5e6F7g8H9i0JkLmNoPqRsTuVwXyZ_-abcdEF";

#[derive(Debug, Clone)]
pub struct FileRec {
    pub name: String,
    pub kind: String,
    pub source: String,
}

impl FileRec {
    pub fn new(name: &str, kind: &str, source: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            source: source.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DepRec {
    pub id: String,
    pub description: String,
    pub version: Option<u64>,
}

#[derive(Debug, Default)]
pub struct State {
    pub files: Vec<FileRec>,
    /// 1-indexed snapshots: versions[0] is version 1.
    pub versions: Vec<Vec<FileRec>>,
    pub deployments: Vec<DepRec>,
    pub next_dep: u32,
    /// Exec responses to serve as "deployment warming up" before real ones.
    pub not_ready: u32,
    /// Hard override for the next exec response.
    pub force_exec: Option<(u16, String)>,
    pub base: String,
}

impl State {
    pub fn fresh_project() -> Self {
        Self {
            files: vec![FileRec::new("appsscript", "JSON", r#"{"timeZone":"Etc/UTC"}"#)],
            ..Self::default()
        }
    }

    /// A project with working exec infrastructure: manifest, dispatcher,
    /// HTML templates, and a `[DEV]` HEAD deployment.
    pub fn provisioned() -> Self {
        let mut state = Self::fresh_project();
        let manifest = gasport::shim::manifest(gasport::shim::DEFAULT_TIME_ZONE);
        state.files[0].source = manifest.source.clone();
        let dispatcher = gasport::shim::dispatcher();
        state
            .files
            .push(FileRec::new(&dispatcher.name, "SERVER_JS", &dispatcher.source));
        for template in gasport::shim::html_templates() {
            state
                .files
                .push(FileRec::new(&template.name, "HTML", &template.source));
        }
        state.deployments.push(DepRec {
            id: "AKfycb-000".to_string(),
            description: "[DEV] gasport dev".to_string(),
            version: None,
        });
        state.next_dep = 1;
        state
    }
}

pub struct FakeGas {
    pub base: String,
    pub state: Arc<Mutex<State>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FakeGas {
    pub fn start(mut initial: State) -> Self {
        let server = Server::http("127.0.0.1:0").expect("server");
        let base = format!("http://{}", server.server_addr());
        initial.base = base.clone();

        let state = Arc::new(Mutex::new(initial));
        let stop = Arc::new(AtomicBool::new(false));
        let thread_state = Arc::clone(&state);
        let thread_stop = Arc::clone(&stop);

        let handle = std::thread::spawn(move || {
            while !thread_stop.load(Ordering::Relaxed) {
                match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => route(req, &thread_state),
                    Ok(None) => {}
                    Err(_) => break,
                }
            }
        });

        Self {
            base,
            state,
            stop,
            handle: Some(handle),
        }
    }

    pub fn file_source(&self, name: &str) -> Option<String> {
        let state = self.state.lock().expect("state");
        state
            .files
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.source.clone())
    }

    pub fn deployment_count(&self) -> usize {
        self.state.lock().expect("state").deployments.len()
    }
}

impl Drop for FakeGas {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn json_response(status: u16, body: String) -> Response<std::io::Cursor<Vec<u8>>> {
    Response::from_string(body)
        .with_status_code(StatusCode(status))
        .with_header(
            tiny_http::Header::from_bytes("Content-Type", "application/json").expect("header"),
        )
}

fn html_response(status: u16, body: &str) -> Response<std::io::Cursor<Vec<u8>>> {
    Response::from_string(body)
        .with_status_code(StatusCode(status))
        .with_header(tiny_http::Header::from_bytes("Content-Type", "text/html").expect("header"))
}

fn route(mut req: tiny_http::Request, state: &Arc<Mutex<State>>) {
    let method = req.method().clone();
    let url = req.url().to_string();
    let mut body = String::new();
    let _ = req.as_reader().read_to_string(&mut body);

    let (path, query) = match url.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (url.clone(), String::new()),
    };

    let mut state = state.lock().expect("state");

    if let Some(rest) = path.strip_prefix("/v1/projects") {
        let response = api_route(&mut state, &method, rest, &body);
        let _ = req.respond(response);
        return;
    }

    if let Some(rest) = path.strip_prefix("/macros/s/") {
        let (status, body) = exec_route(&mut state, rest, &query);
        let response = if body.trim_start().starts_with('{') {
            json_response(status, body)
        } else {
            html_response(status, &body)
        };
        let _ = req.respond(response);
        return;
    }

    let _ = req.respond(Response::empty(StatusCode(404)));
}

fn api_route(
    state: &mut State,
    method: &Method,
    rest: &str,
    body: &str,
) -> Response<std::io::Cursor<Vec<u8>>> {
    // POST /v1/projects creates a project.
    if rest.is_empty() || rest == "/" {
        if *method == Method::Post {
            let parsed: Value = serde_json::from_str(body).unwrap_or(json!({}));
            state.files = vec![FileRec::new(
                "appsscript",
                "JSON",
                r#"{"timeZone":"Etc/UTC"}"#,
            )];
            return json_response(
                200,
                json!({
                    "scriptId": SCRIPT_ID,
                    "title": parsed.get("title").cloned().unwrap_or(json!("untitled")),
                })
                .to_string(),
            );
        }
        return json_response(200, json!({ "projects": [] }).to_string());
    }

    let rest = rest.trim_start_matches('/');
    let Some((_script_id, tail)) = rest.split_once('/') else {
        return json_response(404, json!({"error": "unknown project route"}).to_string());
    };

    match (method, tail) {
        (&Method::Get, "content") => {
            let files: Vec<Value> = state
                .files
                .iter()
                .map(|f| json!({"name": f.name, "type": f.kind, "source": f.source}))
                .collect();
            json_response(
                200,
                json!({"scriptId": SCRIPT_ID, "files": files}).to_string(),
            )
        }
        (&Method::Put, "content") => {
            let parsed: Value = match serde_json::from_str(body) {
                Ok(v) => v,
                Err(_) => return json_response(400, json!({"error": "bad json"}).to_string()),
            };
            let files = parsed["files"].as_array().cloned().unwrap_or_default();
            state.files = files
                .iter()
                .map(|f| {
                    FileRec::new(
                        f["name"].as_str().unwrap_or_default(),
                        f["type"].as_str().unwrap_or_default(),
                        f["source"].as_str().unwrap_or_default(),
                    )
                })
                .collect();
            json_response(200, "{}".to_string())
        }
        (&Method::Get, "deployments") => {
            let deployments: Vec<Value> = state
                .deployments
                .iter()
                .map(|d| deployment_json(d, &state.base))
                .collect();
            json_response(200, json!({ "deployments": deployments }).to_string())
        }
        (&Method::Post, "deployments") => {
            let parsed: Value = serde_json::from_str(body).unwrap_or(json!({}));
            let id = format!("AKfycb-{:03}", state.next_dep);
            state.next_dep += 1;
            let dep = DepRec {
                id,
                description: parsed["description"].as_str().unwrap_or_default().to_string(),
                version: parsed["versionNumber"].as_u64(),
            };
            let rendered = deployment_json(&dep, &state.base);
            state.deployments.push(dep);
            json_response(200, rendered.to_string())
        }
        (&Method::Post, "versions") => {
            state.versions.push(state.files.clone());
            json_response(
                200,
                json!({ "versionNumber": state.versions.len() as u64 }).to_string(),
            )
        }
        (&Method::Put, tail) if tail.starts_with("deployments/") => {
            let dep_id = tail.trim_start_matches("deployments/").to_string();
            let parsed: Value = serde_json::from_str(body).unwrap_or(json!({}));
            let config = &parsed["deploymentConfig"];
            match state.deployments.iter_mut().find(|d| d.id == dep_id) {
                Some(dep) => {
                    if let Some(desc) = config["description"].as_str() {
                        dep.description = desc.to_string();
                    }
                    dep.version = config["versionNumber"].as_u64();
                    json_response(200, "{}".to_string())
                }
                None => json_response(404, json!({"error": "no such deployment"}).to_string()),
            }
        }
        _ => json_response(404, json!({"error": "unknown route"}).to_string()),
    }
}

fn deployment_json(dep: &DepRec, base: &str) -> Value {
    let suffix = if dep.version.is_none() { "dev" } else { "exec" };
    let mut config = json!({ "description": dep.description });
    if let Some(v) = dep.version {
        config["versionNumber"] = json!(v);
    }
    json!({
        "deploymentId": dep.id,
        "deploymentConfig": config,
        "entryPoints": [{
            "entryPointType": "WEB_APP",
            "webApp": { "url": format!("{base}/macros/s/{}/{suffix}", dep.id) },
        }],
    })
}

fn exec_route(state: &mut State, rest: &str, query: &str) -> (u16, String) {
    if let Some(forced) = state.force_exec.take() {
        return forced;
    }

    let dep_id = rest.split('/').next().unwrap_or_default().to_string();
    let Some(dep) = state.deployments.iter().find(|d| d.id == dep_id).cloned() else {
        return (404, "Not Found".to_string());
    };

    if state.not_ready > 0 {
        state.not_ready -= 1;
        return (
            500,
            "<!DOCTYPE html><html><body>This deployment is warming up</body></html>".to_string(),
        );
    }

    // The snapshot a pinned deployment observes is frozen at promote time.
    let snapshot: Vec<FileRec> = match dep.version {
        None => state.files.clone(),
        Some(v) => state
            .versions
            .get((v - 1) as usize)
            .cloned()
            .unwrap_or_default(),
    };

    if !snapshot.iter().any(|f| f.name == "__mcp_exec") {
        return (
            200,
            "<!DOCTYPE html><html><body>No dispatcher installed</body></html>".to_string(),
        );
    }

    let func = query_param(query, "func").unwrap_or_default();
    evaluate(&func, &snapshot)
}

/// A tiny evaluator covering the statements the scenarios use.
fn evaluate(func: &str, snapshot: &[FileRec]) -> (u16, String) {
    let data = |payload: Value, logger: &str| {
        (
            200,
            json!({"type": "data", "payload": payload, "logger_output": logger}).to_string(),
        )
    };

    match func {
        "2+3" => data(json!(5), ""),
        "1" => data(json!(1), ""),
        "new Date().getTime()" => data(json!(1_700_000_000_000u64), ""),
        "bigPayload()" => data(json!("B".repeat(5000)), ""),
        "logs()" => data(
            json!("done"),
            "debug: one\ninfo: two\ndebug: three\ninfo: four",
        ),
        "v()" => match snapshot.iter().find(|f| f.name == "Ver") {
            Some(ver) => {
                // Pull the literal out of `function v(){return "<marker>";}`.
                let marker = ver
                    .source
                    .split("return \"")
                    .nth(1)
                    .and_then(|rest| rest.split('"').next())
                    .unwrap_or("unparsed");
                data(json!(marker), "")
            }
            None => (
                200,
                json!({
                    "type": "exception",
                    "payload": {
                        "error": {
                            "name": "ReferenceError",
                            "message": "v is not defined",
                            "stack": "at __gasportRun",
                        },
                        "logger_output": "",
                    },
                })
                .to_string(),
            ),
        },
        other => (
            200,
            json!({
                "type": "exception",
                "payload": {
                    "error": {
                        "name": "ReferenceError",
                        "message": format!("{other} is not defined"),
                        "stack": "at __gasportRun",
                    },
                    "logger_output": "",
                },
            })
            .to_string(),
        ),
    }
}

fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        if k == name {
            Some(percent_decode(v))
        } else {
            None
        }
    })
}

/// Decode percent-escapes and `+` (form encoding) back into text.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = &s[i + 1..i + 3];
                if let Ok(byte) = u8::from_str_radix(hex, 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(b'%');
                    i += 1;
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).to_string()
}
