//! Typed operations over the Apps Script REST surface.
//!
//! This is a narrow wrapper: every call takes a bearer token and returns a
//! parsed result or a structured [`GasError`] carrying the HTTP status and
//! body. Retries are the caller's policy, never this layer's.

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde_json::json;

use crate::error::GasError;
use crate::types::{
    Deployment, MANIFEST_FILE, ProjectContent, ProjectHeader, RemoteFile, ScriptId, ScriptVersion,
};

/// Default base URL for the Apps Script API.
pub const DEFAULT_API_BASE: &str = "https://script.googleapis.com";

#[derive(Debug, Clone)]
pub struct GasClient {
    api_base: String,
    http: Client,
}

impl GasClient {
    pub fn new() -> Result<Self, GasError> {
        Self::with_base(DEFAULT_API_BASE)
    }

    /// Build a client against a specific API base (tests point this at a
    /// local fake).
    pub fn with_base(api_base: impl Into<String>) -> Result<Self, GasError> {
        let http = Client::builder()
            .user_agent(format!("gasport/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GasError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn project_url(&self, script_id: &ScriptId, suffix: &str) -> String {
        format!("{}/v1/projects/{}{}", self.api_base, script_id, suffix)
    }

    /// Read a response body that should be JSON.
    ///
    /// The API serves `application/json`, but envelopes occasionally arrive
    /// as JSON in a `text/plain` body; both parse. A 2xx body that is not
    /// JSON at all is a protocol error, not something to paper over.
    fn read_json<T: for<'de> Deserialize<'de>>(
        resp: Response,
        what: &'static str,
    ) -> Result<T, GasError> {
        let status = resp.status();
        let body = resp
            .text()
            .map_err(|e| GasError::Internal(format!("failed to read {what} response: {e}")))?;

        if !status.is_success() {
            return Err(Self::status_error(status, body));
        }

        serde_json::from_str(&body).map_err(|e| {
            GasError::Internal(format!("non-JSON {what} response at a 2xx boundary: {e}"))
        })
    }

    fn check_status(resp: Response, what: &'static str) -> Result<(), GasError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp
            .text()
            .map_err(|e| GasError::Internal(format!("failed to read {what} response: {e}")))?;
        Err(Self::status_error(status, body))
    }

    fn status_error(status: StatusCode, body: String) -> GasError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GasError::Authentication(format!(
                "the API rejected the access token (HTTP {}); re-authenticate and retry",
                status.as_u16()
            )),
            _ => GasError::Api {
                status: status.as_u16(),
                body,
            },
        }
    }

    fn transport(e: reqwest::Error, what: &'static str) -> GasError {
        GasError::Internal(format!("{what} request failed: {e}"))
    }

    /// Fetch all files of a project.
    pub fn get_project_content(
        &self,
        script_id: &ScriptId,
        token: &str,
    ) -> Result<ProjectContent, GasError> {
        let resp = self
            .http
            .get(self.project_url(script_id, "/content"))
            .bearer_auth(token)
            .send()
            .map_err(|e| Self::transport(e, "content"))?;
        Self::read_json(resp, "content")
    }

    /// Replace the full file set of a project.
    pub fn update_project_content(
        &self,
        script_id: &ScriptId,
        files: &[RemoteFile],
        token: &str,
    ) -> Result<(), GasError> {
        let resp = self
            .http
            .put(self.project_url(script_id, "/content"))
            .bearer_auth(token)
            .json(&json!({ "files": files }))
            .send()
            .map_err(|e| Self::transport(e, "content update"))?;
        Self::check_status(resp, "content update")
    }

    /// Upsert a single file by reading, merging, and writing the project.
    ///
    /// The remote service has no single-file endpoint. When the name already
    /// exists, its type and source are replaced; otherwise the file is
    /// appended.
    pub fn update_file(
        &self,
        script_id: &ScriptId,
        name: &str,
        source: &str,
        token: &str,
        file_type: crate::types::FileType,
    ) -> Result<(), GasError> {
        let mut content = self.get_project_content(script_id, token)?;

        match content.files.iter().position(|f| f.name == name) {
            Some(idx) => {
                let existing = &mut content.files[idx];
                existing.file_type = file_type;
                existing.source = source.to_string();
            }
            None => content
                .files
                .push(RemoteFile::new(name, file_type, source)),
        }

        self.update_project_content(script_id, &content.files, token)
    }

    /// List all deployments of a project.
    pub fn list_deployments(
        &self,
        script_id: &ScriptId,
        token: &str,
    ) -> Result<Vec<Deployment>, GasError> {
        #[derive(Deserialize)]
        struct Listing {
            #[serde(default)]
            deployments: Vec<Deployment>,
        }

        let resp = self
            .http
            .get(self.project_url(script_id, "/deployments"))
            .bearer_auth(token)
            .send()
            .map_err(|e| Self::transport(e, "deployments"))?;
        let listing: Listing = Self::read_json(resp, "deployments")?;
        Ok(listing.deployments)
    }

    /// Create a deployment. `version_number: None` creates a HEAD deployment.
    pub fn create_deployment(
        &self,
        script_id: &ScriptId,
        description: &str,
        version_number: Option<u64>,
        token: &str,
    ) -> Result<Deployment, GasError> {
        let mut body = json!({
            "manifestFileName": MANIFEST_FILE,
            "description": description,
        });
        if let Some(v) = version_number {
            body["versionNumber"] = json!(v);
        }

        let resp = self
            .http
            .post(self.project_url(script_id, "/deployments"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .map_err(|e| Self::transport(e, "deployment create"))?;
        Self::read_json(resp, "deployment create")
    }

    /// Retarget or re-describe an existing deployment.
    pub fn update_deployment(
        &self,
        script_id: &ScriptId,
        deployment_id: &str,
        version_number: Option<u64>,
        description: &str,
        token: &str,
    ) -> Result<(), GasError> {
        let mut config = json!({
            "manifestFileName": MANIFEST_FILE,
            "description": description,
        });
        if let Some(v) = version_number {
            config["versionNumber"] = json!(v);
        }

        let resp = self
            .http
            .put(self.project_url(
                script_id,
                &format!("/deployments/{deployment_id}"),
            ))
            .bearer_auth(token)
            .json(&json!({ "deploymentConfig": config }))
            .send()
            .map_err(|e| Self::transport(e, "deployment update"))?;
        Self::check_status(resp, "deployment update")
    }

    /// Create an immutable version snapshot of current HEAD.
    pub fn create_version(
        &self,
        script_id: &ScriptId,
        description: &str,
        token: &str,
    ) -> Result<ScriptVersion, GasError> {
        let resp = self
            .http
            .post(self.project_url(script_id, "/versions"))
            .bearer_auth(token)
            .json(&json!({ "description": description }))
            .send()
            .map_err(|e| Self::transport(e, "version create"))?;
        Self::read_json(resp, "version create")
    }

    /// List script projects visible to the principal.
    pub fn list_projects(
        &self,
        page_size: u32,
        token: &str,
    ) -> Result<Vec<ProjectHeader>, GasError> {
        #[derive(Deserialize)]
        struct Listing {
            #[serde(default)]
            projects: Vec<ProjectHeader>,
        }

        let resp = self
            .http
            .get(format!("{}/v1/projects", self.api_base))
            .query(&[("pageSize", page_size.to_string())])
            .bearer_auth(token)
            .send()
            .map_err(|e| Self::transport(e, "projects"))?;
        let listing: Listing = Self::read_json(resp, "projects")?;
        Ok(listing.projects)
    }

    /// Create a fresh, empty script project.
    pub fn create_project(&self, title: &str, token: &str) -> Result<ProjectHeader, GasError> {
        let resp = self
            .http
            .post(format!("{}/v1/projects", self.api_base))
            .bearer_auth(token)
            .json(&json!({ "title": title }))
            .send()
            .map_err(|e| Self::transport(e, "project create"))?;
        Self::read_json(resp, "project create")
    }

    /// Resolve an execution URL from existing web-app entry points.
    ///
    /// HEAD deployments win: their `/dev` URL is the only one that accepts
    /// dynamic `func=` evaluation. Fails with [`GasError::NoDeployment`]
    /// when no entry point carries a URL.
    pub fn construct_run_url(
        &self,
        script_id: &ScriptId,
        token: &str,
    ) -> Result<String, GasError> {
        let deployments = self.list_deployments(script_id, token)?;

        let head_url = deployments
            .iter()
            .filter(|d| d.is_head())
            .find_map(|d| d.web_app_url());
        if let Some(url) = head_url {
            return Ok(url.to_string());
        }

        deployments
            .iter()
            .find_map(|d| d.web_app_url())
            .map(str::to_string)
            .ok_or(GasError::NoDeployment)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::thread;
    use std::time::Duration;

    use tiny_http::{Response, Server, StatusCode};

    use super::*;
    use crate::types::FileType;

    fn with_server<F>(handler: F) -> (String, thread::JoinHandle<()>)
    where
        F: FnOnce(tiny_http::Request) + Send + 'static,
    {
        let server = Server::http("127.0.0.1:0").expect("server");
        let addr = format!("http://{}", server.server_addr());
        let handle = thread::spawn(move || {
            let req = server.recv().expect("request");
            handler(req);
        });
        (addr, handle)
    }

    fn with_multi_server<F>(handler: F, request_count: usize) -> (String, thread::JoinHandle<()>)
    where
        F: Fn(tiny_http::Request) + Send + 'static,
    {
        let server = Server::http("127.0.0.1:0").expect("server");
        let addr = format!("http://{}", server.server_addr());
        let handle = thread::spawn(move || {
            for _ in 0..request_count {
                match server.recv_timeout(Duration::from_secs(5)) {
                    Ok(Some(req)) => handler(req),
                    _ => break,
                }
            }
        });
        (addr, handle)
    }

    fn json_response(body: &str) -> Response<std::io::Cursor<Vec<u8>>> {
        Response::from_string(body)
            .with_status_code(StatusCode(200))
            .with_header(
                tiny_http::Header::from_bytes("Content-Type", "application/json").expect("header"),
            )
    }

    fn test_id() -> ScriptId {
        "1a2B3c4D5e6F7g8H9i0JkLmNoPqRsTuVwXyZ_-abcdEF"
            .parse()
            .expect("id")
    }

    #[test]
    fn get_project_content_parses_files_and_sends_bearer() {
        let (base, handle) = with_server(|req| {
            assert_eq!(
                req.url(),
                "/v1/projects/1a2B3c4D5e6F7g8H9i0JkLmNoPqRsTuVwXyZ_-abcdEF/content"
            );
            let auth = req
                .headers()
                .iter()
                .find(|h| h.field.equiv("Authorization"))
                .map(|h| h.value.as_str().to_string());
            assert_eq!(auth.as_deref(), Some("Bearer tok-1"));

            let body = r#"{"scriptId":"1a2B3c4D5e6F7g8H9i0JkLmNoPqRsTuVwXyZ_-abcdEF","files":[{"name":"appsscript","type":"JSON","source":"{}"},{"name":"Code","type":"SERVER_JS","source":"function f(){}"}]}"#;
            req.respond(json_response(body)).expect("respond");
        });

        let cli = GasClient::with_base(base).expect("client");
        let content = cli.get_project_content(&test_id(), "tok-1").expect("content");
        assert_eq!(content.files.len(), 2);
        assert_eq!(content.files[1].name, "Code");
        handle.join().expect("join");
    }

    #[test]
    fn content_tolerates_json_served_as_text() {
        let (base, handle) = with_server(|req| {
            let resp = Response::from_string(
                r#"{"scriptId":"x","files":[]}"#,
            )
            .with_status_code(StatusCode(200))
            .with_header(
                tiny_http::Header::from_bytes("Content-Type", "text/plain").expect("header"),
            );
            req.respond(resp).expect("respond");
        });

        let cli = GasClient::with_base(base).expect("client");
        let content = cli.get_project_content(&test_id(), "tok").expect("content");
        assert!(content.files.is_empty());
        handle.join().expect("join");
    }

    #[test]
    fn non_json_2xx_is_a_protocol_error() {
        let (base, handle) = with_server(|req| {
            req.respond(Response::from_string("<html>login</html>"))
                .expect("respond");
        });

        let cli = GasClient::with_base(base).expect("client");
        let err = cli
            .get_project_content(&test_id(), "tok")
            .expect_err("must fail");
        assert!(format!("{err:#}").contains("non-JSON"));
        handle.join().expect("join");
    }

    #[test]
    fn unauthorized_maps_to_authentication() {
        let (base, handle) = with_server(|req| {
            req.respond(Response::empty(StatusCode(401))).expect("respond");
        });

        let cli = GasClient::with_base(base).expect("client");
        let err = cli
            .get_project_content(&test_id(), "expired")
            .expect_err("must fail");
        assert_eq!(err.kind(), "Authentication");
        handle.join().expect("join");
    }

    #[test]
    fn other_statuses_carry_status_and_body() {
        let (base, handle) = with_server(|req| {
            req.respond(
                Response::from_string(r#"{"error":{"message":"quota"}}"#)
                    .with_status_code(StatusCode(429)),
            )
            .expect("respond");
        });

        let cli = GasClient::with_base(base).expect("client");
        let err = cli
            .get_project_content(&test_id(), "tok")
            .expect_err("must fail");
        match err {
            GasError::Api { status, body } => {
                assert_eq!(status, 429);
                assert!(body.contains("quota"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        handle.join().expect("join");
    }

    #[test]
    fn update_file_merges_into_existing_content() {
        let (base, handle) = with_multi_server(
            |mut req| {
                if req.method() == &tiny_http::Method::Get {
                    let body = r#"{"scriptId":"x","files":[{"name":"appsscript","type":"JSON","source":"{}"},{"name":"Code","type":"SERVER_JS","source":"old"}]}"#;
                    req.respond(json_response(body)).expect("respond");
                } else {
                    let mut body = String::new();
                    req.as_reader().read_to_string(&mut body).expect("read");
                    let parsed: serde_json::Value = serde_json::from_str(&body).expect("json");
                    let files = parsed["files"].as_array().expect("files");
                    assert_eq!(files.len(), 2);
                    assert_eq!(files[1]["name"], "Code");
                    assert_eq!(files[1]["source"], "new");
                    req.respond(json_response("{}")).expect("respond");
                }
            },
            2,
        );

        let cli = GasClient::with_base(base).expect("client");
        cli.update_file(&test_id(), "Code", "new", "tok", FileType::ServerJs)
            .expect("update");
        handle.join().expect("join");
    }

    #[test]
    fn update_file_appends_missing_files() {
        let (base, handle) = with_multi_server(
            |mut req| {
                if req.method() == &tiny_http::Method::Get {
                    let body = r#"{"scriptId":"x","files":[{"name":"appsscript","type":"JSON","source":"{}"}]}"#;
                    req.respond(json_response(body)).expect("respond");
                } else {
                    let mut body = String::new();
                    req.as_reader().read_to_string(&mut body).expect("read");
                    let parsed: serde_json::Value = serde_json::from_str(&body).expect("json");
                    let files = parsed["files"].as_array().expect("files");
                    assert_eq!(files.len(), 2);
                    assert_eq!(files[1]["name"], "util/new");
                    assert_eq!(files[1]["type"], "HTML");
                    req.respond(json_response("{}")).expect("respond");
                }
            },
            2,
        );

        let cli = GasClient::with_base(base).expect("client");
        cli.update_file(&test_id(), "util/new", "<p/>", "tok", FileType::Html)
            .expect("update");
        handle.join().expect("join");
    }

    #[test]
    fn list_deployments_parses_listing() {
        let (base, handle) = with_server(|req| {
            let body = r#"{"deployments":[
                {"deploymentId":"AKfycb-a","deploymentConfig":{"description":"[DEV] head"}},
                {"deploymentId":"AKfycb-b","deploymentConfig":{"description":"[PROD] v1","versionNumber":1}}
            ]}"#;
            req.respond(json_response(body)).expect("respond");
        });

        let cli = GasClient::with_base(base).expect("client");
        let deployments = cli.list_deployments(&test_id(), "tok").expect("list");
        assert_eq!(deployments.len(), 2);
        assert!(deployments[0].is_head());
        assert_eq!(deployments[1].version_number(), Some(1));
        handle.join().expect("join");
    }

    #[test]
    fn create_deployment_omits_version_for_head() {
        let (base, handle) = with_server(|mut req| {
            let mut body = String::new();
            req.as_reader().read_to_string(&mut body).expect("read");
            let parsed: serde_json::Value = serde_json::from_str(&body).expect("json");
            assert_eq!(parsed["description"], "[DEV] head deployment");
            assert_eq!(parsed["manifestFileName"], "appsscript");
            assert!(parsed.get("versionNumber").is_none());

            req.respond(json_response(
                r#"{"deploymentId":"AKfycb-new","deploymentConfig":{"description":"[DEV] head deployment"}}"#,
            ))
            .expect("respond");
        });

        let cli = GasClient::with_base(base).expect("client");
        let d = cli
            .create_deployment(&test_id(), "[DEV] head deployment", None, "tok")
            .expect("create");
        assert_eq!(d.deployment_id, "AKfycb-new");
        assert!(d.is_head());
        handle.join().expect("join");
    }

    #[test]
    fn update_deployment_pins_version() {
        let (base, handle) = with_server(|mut req| {
            assert!(req.url().ends_with("/deployments/AKfycb-b"));
            let mut body = String::new();
            req.as_reader().read_to_string(&mut body).expect("read");
            let parsed: serde_json::Value = serde_json::from_str(&body).expect("json");
            assert_eq!(parsed["deploymentConfig"]["versionNumber"], 9);
            assert_eq!(parsed["deploymentConfig"]["description"], "[STAGING] v9");
            req.respond(json_response("{}")).expect("respond");
        });

        let cli = GasClient::with_base(base).expect("client");
        cli.update_deployment(&test_id(), "AKfycb-b", Some(9), "[STAGING] v9", "tok")
            .expect("update");
        handle.join().expect("join");
    }

    #[test]
    fn create_version_returns_number() {
        let (base, handle) = with_server(|req| {
            req.respond(json_response(r#"{"versionNumber":4,"description":"v4"}"#))
                .expect("respond");
        });

        let cli = GasClient::with_base(base).expect("client");
        let v = cli.create_version(&test_id(), "v4", "tok").expect("version");
        assert_eq!(v.version_number, 4);
        handle.join().expect("join");
    }

    #[test]
    fn construct_run_url_prefers_head_deployment() {
        let (base, handle) = with_server(|req| {
            let body = r#"{"deployments":[
                {"deploymentId":"AKfycb-pinned","deploymentConfig":{"description":"[PROD] v1","versionNumber":1},
                 "entryPoints":[{"entryPointType":"WEB_APP","webApp":{"url":"https://script.google.com/macros/s/P/exec"}}]},
                {"deploymentId":"AKfycb-head","deploymentConfig":{"description":"[DEV] head"},
                 "entryPoints":[{"entryPointType":"WEB_APP","webApp":{"url":"https://script.google.com/macros/s/H/dev"}}]}
            ]}"#;
            req.respond(json_response(body)).expect("respond");
        });

        let cli = GasClient::with_base(base).expect("client");
        let url = cli.construct_run_url(&test_id(), "tok").expect("url");
        assert_eq!(url, "https://script.google.com/macros/s/H/dev");
        handle.join().expect("join");
    }

    #[test]
    fn construct_run_url_fails_without_web_app() {
        let (base, handle) = with_server(|req| {
            req.respond(json_response(r#"{"deployments":[]}"#)).expect("respond");
        });

        let cli = GasClient::with_base(base).expect("client");
        let err = cli
            .construct_run_url(&test_id(), "tok")
            .expect_err("must fail");
        assert!(matches!(err, GasError::NoDeployment));
        handle.join().expect("join");
    }

    #[test]
    fn list_projects_sends_page_size() {
        let (base, handle) = with_server(|req| {
            assert!(req.url().contains("pageSize=25"));
            req.respond(json_response(
                r#"{"projects":[{"scriptId":"1a2B3c4D5e6F7g8H9i0JkLmNoPqRsTuVwXyZ_-abcdEF","title":"Demo"}]}"#,
            ))
            .expect("respond");
        });

        let cli = GasClient::with_base(base).expect("client");
        let projects = cli.list_projects(25, "tok").expect("projects");
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].title, "Demo");
        handle.join().expect("join");
    }

    #[test]
    fn create_project_posts_title() {
        let (base, handle) = with_server(|mut req| {
            let mut body = String::new();
            req.as_reader().read_to_string(&mut body).expect("read");
            assert!(body.contains("\"title\":\"Fresh\""));
            req.respond(json_response(
                r#"{"scriptId":"1a2B3c4D5e6F7g8H9i0JkLmNoPqRsTuVwXyZ_-abcdEF","title":"Fresh"}"#,
            ))
            .expect("respond");
        });

        let cli = GasClient::with_base(base).expect("client");
        let p = cli.create_project("Fresh", "tok").expect("project");
        assert_eq!(p.title, "Fresh");
        handle.join().expect("join");
    }
}
