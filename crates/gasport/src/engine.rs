//! The execution engine: runs a JavaScript statement against a project's
//! environment-pinned deployment.
//!
//! One `execute` call moves through the phases: pre-flight sync check,
//! URL resolution (environment deployment, then session cache, then
//! construction), the HTTP request under two independent deadlines,
//! envelope interpretation, an optional one-shot domain-cookie retry, and
//! infrastructure repair with a bounded warm-up loop. Everything below this
//! module throws structured [`GasError`]s; this module is the only place
//! that turns them into caller-facing outcomes.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;

use gasport_retry::{PollBudget, PollOutcome, poll_until};

use crate::cache::SessionCache;
use crate::deployments::DeploymentRegistry;
use crate::error::GasError;
use crate::events::{EventLog, ExecEventType, UrlSource, events_path};
use crate::gateway::GasClient;
use crate::infra::{InfraStatus, InfrastructureManager, Supervisor};
use crate::mirror::LocalMirror;
use crate::report::Reporter;
use crate::sync::{self, FileDrift};
use crate::types::{Environment, ScriptId, ScriptError, ShimEnvelope};

/// Lower bound for both timeouts (seconds). Apps Script executions can
/// legitimately run for minutes; anything shorter aborts healthy calls.
pub const MIN_TIMEOUT: Duration = Duration::from_secs(780);
/// Upper bound for both timeouts.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(3600);

/// Warm-up retry budget after infrastructure repair.
///
/// A freshly created web-app deployment becomes servable within about a
/// minute and answers 500 or an HTML page until then. 60s total at a 2s
/// cadence reflects that observed platform behavior; these are constants,
/// not configuration, because tuning them per call would only hide real
/// infrastructure failures.
pub const WARMUP_BUDGET: PollBudget = PollBudget {
    total: Duration::from_secs(60),
    interval: Duration::from_secs(2),
};

/// Trivial expression the warm-up probe evaluates to confirm readiness.
const PROBE_STATEMENT: &str = "new Date().getTime()";

/// Caller-tunable knobs for one execution.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub environment: Environment,
    pub auto_redeploy: bool,
    pub execution_timeout: Duration,
    pub response_timeout: Duration,
    /// Per-line regex filter applied to logger output.
    pub log_filter: Option<String>,
    /// Keep only the last N logger lines (after filtering).
    pub log_tail: Option<usize>,
    pub skip_sync_check: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            environment: Environment::Dev,
            auto_redeploy: true,
            execution_timeout: MIN_TIMEOUT,
            response_timeout: MIN_TIMEOUT,
            log_filter: None,
            log_tail: None,
            skip_sync_check: false,
        }
    }
}

impl ExecOptions {
    pub fn validate(&self) -> Result<(), GasError> {
        for (name, value) in [
            ("executionTimeout", self.execution_timeout),
            ("responseTimeout", self.response_timeout),
        ] {
            if value < MIN_TIMEOUT || value > MAX_TIMEOUT {
                return Err(GasError::Validation(format!(
                    "{name} must be between {} and {} seconds, got {}",
                    MIN_TIMEOUT.as_secs(),
                    MAX_TIMEOUT.as_secs(),
                    value.as_secs()
                )));
            }
        }
        if let Some(filter) = &self.log_filter {
            Regex::new(filter)
                .map_err(|e| GasError::Validation(format!("invalid logFilter regex: {e}")))?;
        }
        Ok(())
    }
}

/// A successful execution.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub result: Value,
    pub logger_output: String,
    pub executed_at: DateTime<Utc>,
    pub environment: Environment,
    /// The snapshot observed, when the deployment pins one.
    pub version_number: Option<u64>,
    pub cookie_auth_used: bool,
    /// Non-fatal drift attached when `skip_sync_check` bypassed blocking.
    pub collision: Option<Vec<FileDrift>>,
    /// Present when this call repaired infrastructure.
    pub infrastructure: Option<InfraStatus>,
    pub hints: Vec<String>,
    /// Set when the payload exceeded the inline ceiling and was spilled.
    pub payload_file: Option<PathBuf>,
}

/// Hook for the interactive domain-cookie authorization fallback.
///
/// Workspace domains sometimes answer web-app requests with a cookie-gated
/// redirect instead of JSON. The engine asks this hook once per execution
/// to establish domain cookies, then retries the original request.
pub trait DomainAuthorizer: Send + Sync {
    /// Attempt interactive authorization; Ok(true) means a retry is worth it.
    fn authorize(&self, script_id: &ScriptId) -> anyhow::Result<bool>;
}

/// Default hook: never authorizes.
#[derive(Debug, Default)]
pub struct NoDomainAuth;

impl DomainAuthorizer for NoDomainAuth {
    fn authorize(&self, _script_id: &ScriptId) -> anyhow::Result<bool> {
        Ok(false)
    }
}

/// How the engine read one HTTP exchange with the exec endpoint.
#[derive(Debug, Clone, PartialEq)]
enum Interpretation {
    Success {
        payload: Value,
        logger_output: String,
    },
    ScriptFailure {
        error: ScriptError,
        logger_output: String,
    },
    Auth(String),
    NeedsInfrastructure(String),
    NeedsCookieAuth(String),
}

impl Interpretation {
    fn kind(&self) -> &'static str {
        match self {
            Interpretation::Success { .. } => "success",
            Interpretation::ScriptFailure { .. } => "script_failure",
            Interpretation::Auth(_) => "auth",
            Interpretation::NeedsInfrastructure(_) => "needs_infrastructure",
            Interpretation::NeedsCookieAuth(_) => "needs_cookie_auth",
        }
    }
}

pub struct ExecutionEngine {
    client: GasClient,
    http: reqwest::blocking::Client,
    cache: Arc<SessionCache>,
    mirror: LocalMirror,
    supervisor: Arc<Supervisor>,
    authorizer: Box<dyn DomainAuthorizer>,
    inline_limit: usize,
    time_zone: String,
    verbose: bool,
    warmup: PollBudget,
}

impl ExecutionEngine {
    pub fn new(
        client: GasClient,
        mirror: LocalMirror,
        cache: Arc<SessionCache>,
        supervisor: Arc<Supervisor>,
    ) -> Result<Self, GasError> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(format!("gasport/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GasError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            http,
            cache,
            mirror,
            supervisor,
            authorizer: Box::new(NoDomainAuth),
            inline_limit: crate::config::DEFAULT_INLINE_RESPONSE_LIMIT,
            time_zone: crate::shim::DEFAULT_TIME_ZONE.to_string(),
            verbose: false,
            warmup: WARMUP_BUDGET,
        })
    }

    pub fn with_authorizer(mut self, authorizer: Box<dyn DomainAuthorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn with_inline_limit(mut self, limit: usize) -> Self {
        self.inline_limit = limit;
        self
    }

    pub fn with_time_zone(mut self, tz: impl Into<String>) -> Self {
        self.time_zone = tz.into();
        self
    }

    pub fn with_verbose_logging(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Shrink the warm-up budget. Intended for tests; production keeps
    /// [`WARMUP_BUDGET`].
    pub fn with_warmup_budget(mut self, budget: PollBudget) -> Self {
        self.warmup = budget;
        self
    }

    pub fn mirror(&self) -> &LocalMirror {
        &self.mirror
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Run one statement. See the module docs for the phase walk-through.
    pub fn execute(
        &self,
        script_id: &ScriptId,
        js_statement: &str,
        token: Option<&str>,
        opts: &ExecOptions,
        reporter: &mut dyn Reporter,
    ) -> Result<ExecOutcome, GasError> {
        opts.validate()?;
        if js_statement.trim().is_empty() {
            return Err(GasError::Validation(
                "js_statement must not be empty".to_string(),
            ));
        }

        let started = Instant::now();
        let mut events = EventLog::new();
        events.record(
            script_id.as_str(),
            ExecEventType::ExecStarted {
                environment: opts.environment.as_str().to_string(),
                statement_len: js_statement.len(),
            },
        );

        let result = self.execute_inner(script_id, js_statement, token, opts, reporter, &mut events);

        events.record(
            script_id.as_str(),
            ExecEventType::ExecFinished {
                status: match &result {
                    Ok(_) => "success".to_string(),
                    Err(e) => e.kind().to_string(),
                },
                duration_ms: started.elapsed().as_millis() as u64,
            },
        );
        if self.verbose {
            let path = events_path(&self.mirror.scratch_dir(script_id));
            if let Err(e) = events.write_to_file(&path) {
                reporter.warn(&format!("failed to write event log: {e:#}"));
            }
        }

        result
    }

    fn execute_inner(
        &self,
        script_id: &ScriptId,
        js_statement: &str,
        token: Option<&str>,
        opts: &ExecOptions,
        reporter: &mut dyn Reporter,
        events: &mut EventLog,
    ) -> Result<ExecOutcome, GasError> {
        let mut hints = Vec::new();
        let mut collision = None;
        let mut infrastructure: Option<InfraStatus> = None;

        // Phase A: pre-flight. Without a token every remote phase is
        // skipped; resolution below fails cleanly if the cache is cold.
        if let Some(token) = token {
            let content = self.client.get_project_content(script_id, token)?;
            let local = self.mirror.read_all(script_id)?;
            let report = sync::check(&local, &content.files);

            for warning in &report.order_warnings {
                reporter.warn(warning);
                hints.push(warning.clone());
            }
            events.record(
                script_id.as_str(),
                ExecEventType::SyncChecked {
                    drifted: report.drifted().len(),
                    blocking: report.blocking().len(),
                },
            );

            if report.has_blocking_drift() {
                if opts.skip_sync_check {
                    reporter.warn(&format!(
                        "{} stale file(s) bypassed by skipSyncCheck",
                        report.blocking().len()
                    ));
                    collision = Some(report.drifted());
                } else {
                    return Err(GasError::SyncDrift(report.blocking()));
                }
            }

            // Fire-and-forget: absent HTML templates repair in the
            // background, never blocking this execution. Only when the shim
            // itself verifies: a full repair pass writes the templates
            // inline, and a concurrent read-merge-write would race it.
            if InfrastructureManager::verify_shim(&content).verified {
                InfrastructureManager::spawn_template_repair(
                    self.client.clone(),
                    script_id.clone(),
                    token.to_string(),
                    InfrastructureManager::missing_templates(&content),
                    &self.supervisor,
                );
            }
        }

        // Phase B: URL resolution. A missing deployment is not fatal here;
        // it is exactly what the repair path exists for.
        let mut cookie_auth_used = false;
        let mut version_number = None;
        let mut interpretation =
            match self.resolve_url(script_id, token, opts.environment, reporter) {
                Ok((url, url_source, resolved_version)) => {
                    version_number = resolved_version;
                    events.record(
                        script_id.as_str(),
                        ExecEventType::UrlResolved { source: url_source },
                    );

                    // Phase C/D: request and interpretation, with the
                    // one-shot cookie retry.
                    events.record(script_id.as_str(), ExecEventType::RequestIssued { attempt: 1 });
                    let mut interpretation = self.attempt(&url, js_statement, token, opts)?;
                    events.record(
                        script_id.as_str(),
                        ExecEventType::ResponseClassified {
                            kind: interpretation.kind().to_string(),
                        },
                    );

                    if let Interpretation::NeedsCookieAuth(reason) = &interpretation {
                        let reason = reason.clone();
                        match self.authorizer.authorize(script_id) {
                            Ok(true) => {
                                reporter.info("retrying after domain-cookie authorization");
                                events.record(script_id.as_str(), ExecEventType::CookieAuthUsed);
                                interpretation = self.attempt(&url, js_statement, token, opts)?;
                                cookie_auth_used =
                                    matches!(interpretation, Interpretation::Success { .. });
                            }
                            Ok(false) => {
                                interpretation = Interpretation::NeedsInfrastructure(reason);
                            }
                            Err(e) => {
                                return Err(GasError::Authentication(format!(
                                    "domain-cookie authorization failed: {e:#}"
                                )));
                            }
                        }
                    }
                    interpretation
                }
                Err(e) if e.needs_infrastructure() => {
                    Interpretation::NeedsInfrastructure(e.to_string())
                }
                Err(e) => return Err(e),
            };

        if let Interpretation::NeedsInfrastructure(reason) = &interpretation {
            let reason = reason.clone();
            if !opts.auto_redeploy {
                return Err(GasError::AutoRedeployDisabled(reason));
            }
            let Some(token) = token else {
                return Err(GasError::Authentication(
                    "infrastructure repair needs an access token".to_string(),
                ));
            };

            let infra = InfrastructureManager::new(&self.client, self.time_zone.clone());
            let status = infra.ensure(script_id, token, reporter)?;
            events.record(
                script_id.as_str(),
                ExecEventType::InfraRepaired {
                    shim_created: status.exec_shim.was_created,
                },
            );
            infrastructure = Some(status);

            // The deployment set may have changed; resolve again and drop
            // any cached URL that pointed at the old world.
            self.cache.invalidate_all();
            let (fresh_url, _, fresh_version) =
                self.resolve_url(script_id, Some(token), opts.environment, reporter)?;
            version_number = fresh_version;

            interpretation =
                self.warm_up(script_id, &fresh_url, js_statement, Some(token), opts, events)?;
        }

        match interpretation {
            Interpretation::Success {
                payload,
                logger_output,
            } => {
                let (logger_output, filter_note) =
                    apply_log_filter(&logger_output, opts.log_filter.as_deref(), opts.log_tail)?;
                if let Some(note) = filter_note {
                    hints.push(note);
                }
                let (result, payload_file) = self.spill_if_oversized(script_id, payload)?;
                Ok(ExecOutcome {
                    result,
                    logger_output,
                    executed_at: Utc::now(),
                    environment: opts.environment,
                    version_number,
                    cookie_auth_used,
                    collision,
                    infrastructure,
                    hints,
                    payload_file,
                })
            }
            Interpretation::ScriptFailure {
                error,
                logger_output,
            } => Err(GasError::Execution {
                error,
                logger_output,
            }),
            Interpretation::Auth(msg) => Err(GasError::Authentication(msg)),
            Interpretation::NeedsCookieAuth(reason)
            | Interpretation::NeedsInfrastructure(reason) => {
                Err(GasError::DeploymentNotReady(reason))
            }
        }
    }

    /// Phase B: environment deployment first, then the session cache, then
    /// URL construction (cached on success).
    fn resolve_url(
        &self,
        script_id: &ScriptId,
        token: Option<&str>,
        environment: Environment,
        reporter: &mut dyn Reporter,
    ) -> Result<(String, UrlSource, Option<u64>), GasError> {
        if let Some(token) = token {
            let registry = DeploymentRegistry::new(&self.client);
            if let Some(deployment) = registry.find(script_id, environment, token, reporter)?
                && let Some(url) = deployment.web_app_url()
            {
                return Ok((
                    url.to_string(),
                    UrlSource::EnvironmentDeployment,
                    deployment.version_number(),
                ));
            }
        }

        if let Some(url) = self.cache.url_for(script_id) {
            return Ok((url, UrlSource::SessionCache, None));
        }

        let Some(token) = token else {
            return Err(GasError::Authentication(
                "no cached execution URL and no access token to construct one".to_string(),
            ));
        };
        let url = self.client.construct_run_url(script_id, token)?;
        self.cache.store(script_id, url.clone());
        Ok((url, UrlSource::Constructed, None))
    }

    /// Phase C: one GET against the exec URL under both deadlines.
    ///
    /// The whole exchange runs on a worker thread; `recv_timeout` enforces
    /// the execution deadline, and the request's own timeout guards a
    /// stalled response body independently.
    fn issue_request(
        &self,
        url: &str,
        js_statement: &str,
        token: Option<&str>,
        opts: &ExecOptions,
    ) -> Result<(u16, String), GasError> {
        let request = self
            .http
            .get(url)
            .query(&[("_mcp_run", "true"), ("func", js_statement)])
            .header("Accept", "application/json")
            .timeout(opts.response_timeout);
        let request = match token {
            Some(t) => request.bearer_auth(t),
            None => request,
        };

        let response_timeout = opts.response_timeout;
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let result = request.send().map_err(|e| (e.is_timeout(), e.to_string()));
            let result = result.and_then(|resp| {
                let status = resp.status().as_u16();
                resp.text()
                    .map(|body| (status, body))
                    .map_err(|e| (e.is_timeout(), e.to_string()))
            });
            let _ = tx.send(result);
        });

        match rx.recv_timeout(opts.execution_timeout) {
            Ok(Ok((status, body))) => Ok((status, body)),
            Ok(Err((true, _))) => Err(GasError::ResponseReadTimeout(response_timeout)),
            Ok(Err((false, msg))) => {
                Err(GasError::Internal(format!("exec request failed: {msg}")))
            }
            Err(_) => Err(GasError::Timeout(opts.execution_timeout)),
        }
    }

    fn attempt(
        &self,
        url: &str,
        js_statement: &str,
        token: Option<&str>,
        opts: &ExecOptions,
    ) -> Result<Interpretation, GasError> {
        let (status, body) = self.issue_request(url, js_statement, token, opts)?;
        Ok(interpret(status, &body))
    }

    /// Phase E: bounded warm-up after infrastructure repair.
    ///
    /// Each round re-runs the user statement; when it still looks
    /// infrastructure-shaped, a probe evaluates a trivial expression to
    /// confirm readiness before the statement is tried again. Any non-500
    /// probe failure aborts the loop and propagates.
    fn warm_up(
        &self,
        script_id: &ScriptId,
        url: &str,
        js_statement: &str,
        token: Option<&str>,
        opts: &ExecOptions,
        events: &mut EventLog,
    ) -> Result<Interpretation, GasError> {
        let mut aborted: Option<Result<Interpretation, GasError>> = None;

        let outcome = poll_until(&self.warmup, |attempt| {
            let user = match self.attempt(url, js_statement, token, opts) {
                Ok(i) => i,
                Err(e) => {
                    aborted = Some(Err(e));
                    return PollOutcome::Abort;
                }
            };
            events.record(
                script_id.as_str(),
                ExecEventType::WarmupPoll {
                    attempt,
                    ready: matches!(user, Interpretation::Success { .. }),
                },
            );
            match user {
                Interpretation::NeedsInfrastructure(_) | Interpretation::NeedsCookieAuth(_) => {}
                ready => return PollOutcome::Ready(ready),
            }

            let probe = match self.attempt(url, PROBE_STATEMENT, token, opts) {
                Ok(i) => i,
                Err(e) => {
                    aborted = Some(Err(e));
                    return PollOutcome::Abort;
                }
            };
            match probe {
                Interpretation::Success { .. } => {
                    // Ready now; the statement gets its retry on the spot.
                    match self.attempt(url, js_statement, token, opts) {
                        Ok(i) => PollOutcome::Ready(i),
                        Err(e) => {
                            aborted = Some(Err(e));
                            PollOutcome::Abort
                        }
                    }
                }
                Interpretation::NeedsInfrastructure(_) | Interpretation::NeedsCookieAuth(_) => {
                    PollOutcome::NotReady
                }
                other => {
                    aborted = Some(Ok(other));
                    PollOutcome::Abort
                }
            }
        });

        match (outcome, aborted) {
            (Some(interpretation), _) => Ok(interpretation),
            (None, Some(result)) => result,
            (None, None) => Ok(Interpretation::NeedsInfrastructure(format!(
                "deployment did not become ready within the {}s warm-up budget",
                self.warmup.total.as_secs()
            ))),
        }
    }

    /// Phase D post-processing: spill oversized payloads to a scratch file.
    fn spill_if_oversized(
        &self,
        script_id: &ScriptId,
        payload: Value,
    ) -> Result<(Value, Option<PathBuf>), GasError> {
        let serialized = serde_json::to_string(&payload)
            .map_err(|e| GasError::Internal(format!("failed to serialize payload: {e}")))?;
        if serialized.len() <= self.inline_limit {
            return Ok((payload, None));
        }

        let dir = self.mirror.scratch_dir(script_id).join("responses");
        std::fs::create_dir_all(&dir).map_err(|e| GasError::fs(&dir, e))?;
        let digest = sync::content_sha(&serialized);
        let path = dir.join(format!("{}.json", &digest[..12]));
        std::fs::write(&path, &serialized).map_err(|e| GasError::fs(&path, e))?;

        let reference = Value::String(format!(
            "payload of {} bytes exceeds the {} byte inline ceiling; full payload written to {}",
            serialized.len(),
            self.inline_limit,
            path.display()
        ));
        Ok((reference, Some(path)))
    }
}

/// Classify one HTTP exchange with the exec endpoint.
fn interpret(status: u16, body: &str) -> Interpretation {
    // A parseable envelope wins regardless of status code.
    if let Some(envelope) = ShimEnvelope::parse(body) {
        return match envelope {
            ShimEnvelope::Data {
                payload,
                logger_output,
            } => Interpretation::Success {
                payload,
                logger_output,
            },
            ShimEnvelope::Exception {
                error,
                logger_output,
            } => Interpretation::ScriptFailure {
                error,
                logger_output,
            },
        };
    }

    match status {
        401 | 403 => Interpretation::Auth(format!(
            "the execution endpoint rejected the request (HTTP {status}); re-authenticate and retry"
        )),
        404 => Interpretation::NeedsInfrastructure(
            "the deployment endpoint no longer exists (HTTP 404)".to_string(),
        ),
        _ if looks_like_html(body) => Interpretation::NeedsInfrastructure(format!(
            "the deployment answered with an HTML page (HTTP {status}) instead of an envelope"
        )),
        500 if parse_js_error(body).is_some() => Interpretation::ScriptFailure {
            error: parse_js_error(body).unwrap_or_default(),
            logger_output: String::new(),
        },
        // 302, opaque 200, and non-JS-error 500 share one shape: a
        // cookie-gated response. The one-shot domain-auth retry comes first;
        // only its failure escalates to infrastructure repair.
        _ => Interpretation::NeedsCookieAuth(format!(
            "unrecognized non-JSON response (HTTP {status}): {}",
            truncate(body, 200)
        )),
    }
}

fn looks_like_html(body: &str) -> bool {
    let head = body.trim_start().get(..15).unwrap_or(body.trim_start());
    let lower = head.to_lowercase();
    lower.starts_with("<!doctype") || lower.starts_with("<html")
}

/// Parse a bare JavaScript error dump (`ReferenceError: x is not defined`).
fn parse_js_error(body: &str) -> Option<ScriptError> {
    let trimmed = body.trim();
    for name in ["ReferenceError", "SyntaxError", "TypeError", "RangeError"] {
        if let Some(rest) = trimmed.strip_prefix(name)
            && let Some(message) = rest.strip_prefix(':')
        {
            let mut lines = message.trim().splitn(2, '\n');
            let message = lines.next().unwrap_or_default().trim().to_string();
            let stack = lines.next().unwrap_or_default().trim().to_string();
            return Some(ScriptError {
                name: name.to_string(),
                message,
                stack,
            });
        }
    }
    None
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}…")
    }
}

/// Apply the per-line regex filter, then the tail, and describe what was
/// dropped. The unfiltered log is never mutated anywhere it persists.
fn apply_log_filter(
    logger: &str,
    filter: Option<&str>,
    tail: Option<usize>,
) -> Result<(String, Option<String>), GasError> {
    if filter.is_none() && tail.is_none() {
        return Ok((logger.to_string(), None));
    }

    let mut lines: Vec<&str> = logger.lines().collect();
    let total = lines.len();

    if let Some(pattern) = filter {
        let re = Regex::new(pattern)
            .map_err(|e| GasError::Validation(format!("invalid logFilter regex: {e}")))?;
        lines.retain(|line| re.is_match(line));
    }
    let filtered_out = total - lines.len();

    let mut trimmed = 0;
    if let Some(n) = tail
        && lines.len() > n
    {
        trimmed = lines.len() - n;
        lines = lines.split_off(trimmed);
    }

    let note = if filtered_out > 0 || trimmed > 0 {
        Some(format!(
            "logger: {filtered_out} line(s) filtered, {trimmed} line(s) trimmed of {total}"
        ))
    } else {
        None
    };
    Ok((lines.join("\n"), note))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_validate_timeout_range() {
        let mut opts = ExecOptions::default();
        assert!(opts.validate().is_ok());

        opts.execution_timeout = Duration::from_secs(779);
        assert!(opts.validate().is_err());

        opts.execution_timeout = Duration::from_secs(3600);
        opts.response_timeout = Duration::from_secs(3601);
        assert!(opts.validate().is_err());

        opts.response_timeout = Duration::from_secs(900);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn options_validate_rejects_bad_regex() {
        let opts = ExecOptions {
            log_filter: Some("([unclosed".to_string()),
            ..ExecOptions::default()
        };
        let err = opts.validate().expect_err("bad regex");
        assert_eq!(err.kind(), "Validation");
    }

    #[test]
    fn interpret_data_envelope_is_success() {
        let i = interpret(200, r#"{"type":"data","payload":5,"logger_output":""}"#);
        assert!(matches!(i, Interpretation::Success { .. }));
    }

    #[test]
    fn interpret_exception_envelope_is_script_failure() {
        let i = interpret(
            200,
            r#"{"type":"exception","payload":{"error":{"name":"TypeError","message":"nope","stack":""},"logger_output":""}}"#,
        );
        match i {
            Interpretation::ScriptFailure { error, .. } => assert_eq!(error.name, "TypeError"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn interpret_envelope_wins_over_error_status() {
        // Some proxies rewrite the status; the envelope is authoritative.
        let i = interpret(500, r#"{"type":"data","payload":"ok","logger_output":""}"#);
        assert!(matches!(i, Interpretation::Success { .. }));
    }

    #[test]
    fn interpret_legacy_error_shape() {
        let i = interpret(200, r#"{"error":true,"message":"legacy boom","logger_output":""}"#);
        match i {
            Interpretation::ScriptFailure { error, .. } => {
                assert_eq!(error.message, "legacy boom");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn interpret_html_page_needs_infrastructure() {
        for status in [200u16, 500] {
            let i = interpret(status, "<!DOCTYPE html><html><body>Sorry</body></html>");
            assert!(
                matches!(i, Interpretation::NeedsInfrastructure(_)),
                "status {status}"
            );
        }
    }

    #[test]
    fn interpret_auth_statuses() {
        assert!(matches!(interpret(401, ""), Interpretation::Auth(_)));
        assert!(matches!(interpret(403, ""), Interpretation::Auth(_)));
    }

    #[test]
    fn interpret_404_needs_infrastructure() {
        assert!(matches!(
            interpret(404, "Not Found"),
            Interpretation::NeedsInfrastructure(_)
        ));
    }

    #[test]
    fn interpret_500_js_error_dump() {
        let i = interpret(
            500,
            "ReferenceError: frobnicate is not defined\n    at __gasportRun (Code:12)",
        );
        match i {
            Interpretation::ScriptFailure { error, .. } => {
                assert_eq!(error.name, "ReferenceError");
                assert_eq!(error.message, "frobnicate is not defined");
                assert!(error.stack.contains("__gasportRun"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn interpret_opaque_response_requests_cookie_auth() {
        let i = interpret(302, "Moved Temporarily");
        assert!(matches!(i, Interpretation::NeedsCookieAuth(_)));
        let i = interpret(200, "plain text that is not an envelope");
        assert!(matches!(i, Interpretation::NeedsCookieAuth(_)));
        // A 500 whose body is neither an envelope, HTML, nor a JS error
        // dump takes the same fallback as 302/200.
        let i = interpret(500, "upstream connect error or disconnect");
        assert!(matches!(i, Interpretation::NeedsCookieAuth(_)));
    }

    #[test]
    fn log_filter_keeps_matching_lines_and_notes_drops() {
        let logger = "debug: a\ninfo: b\ndebug: c\nerror: d";
        let (out, note) = apply_log_filter(logger, Some("^debug"), None).expect("filter");
        assert_eq!(out, "debug: a\ndebug: c");
        assert!(note.expect("note").contains("2 line(s) filtered"));
    }

    #[test]
    fn log_tail_keeps_last_lines() {
        let logger = "1\n2\n3\n4\n5";
        let (out, note) = apply_log_filter(logger, None, Some(2)).expect("tail");
        assert_eq!(out, "4\n5");
        assert!(note.expect("note").contains("3 line(s) trimmed"));
    }

    #[test]
    fn log_filter_then_tail_composes() {
        let logger = "keep 1\ndrop\nkeep 2\nkeep 3";
        let (out, note) = apply_log_filter(logger, Some("^keep"), Some(2)).expect("both");
        assert_eq!(out, "keep 2\nkeep 3");
        let note = note.expect("note");
        assert!(note.contains("1 line(s) filtered"));
        assert!(note.contains("1 line(s) trimmed"));
    }

    #[test]
    fn log_filter_untouched_when_no_knobs() {
        let (out, note) = apply_log_filter("a\nb", None, None).expect("noop");
        assert_eq!(out, "a\nb");
        assert!(note.is_none());
    }

    #[test]
    fn parse_js_error_requires_known_prefix() {
        assert!(parse_js_error("Something broke").is_none());
        assert!(parse_js_error("TypeError: x").is_some());
        assert!(parse_js_error("SyntaxError: unexpected token").is_some());
    }

    #[test]
    fn html_detection_is_prefix_based() {
        assert!(looks_like_html("<!DOCTYPE html><html>"));
        assert!(looks_like_html("  <html lang=\"en\">"));
        assert!(!looks_like_html(r#"{"type":"data"}"#));
        assert!(!looks_like_html("plain text with <html> later"));
    }
}
