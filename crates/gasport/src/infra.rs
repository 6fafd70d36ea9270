//! Infrastructure verification and repair.
//!
//! Guarantees a project is executable through the dispatcher: the shim file
//! and HTML templates are present with the expected content fingerprints,
//! the manifest carries both entry points, and a `[DEV]` deployment exists.
//! Repair is idempotent and re-enterable from any failure path.

use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::deployments::DeploymentRegistry;
use crate::error::GasError;
use crate::gateway::GasClient;
use crate::report::Reporter;
use crate::shim;
use crate::types::{Environment, ProjectContent, RemoteFile, ScriptId};

/// Evidence about the shim file's state, forwarded to callers so they can
/// reason about warm-up delays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShimVerification {
    pub verified: bool,
    pub was_created: bool,
    pub expected_sha: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of an infrastructure pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraStatus {
    pub in_sync: bool,
    pub exec_shim: ShimVerification,
}

/// Owner of detached background work.
///
/// Fire-and-forget tasks (HTML template repair) register here so process
/// shutdown can briefly wait for them instead of tearing down mid-write.
#[derive(Debug, Default)]
pub struct Supervisor {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn adopt(&self, handle: JoinHandle<()>) {
        self.handles.lock().expect("supervisor lock").push(handle);
    }

    /// Join finished tasks until the budget elapses; the rest stay detached.
    pub fn shutdown(&self, budget: Duration) {
        let deadline = Instant::now() + budget;
        let mut handles = std::mem::take(&mut *self.handles.lock().expect("supervisor lock"));
        while !handles.is_empty() && Instant::now() < deadline {
            handles.retain(|h| !h.is_finished());
            if handles.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        for handle in handles.into_iter().filter(|h| h.is_finished()) {
            let _ = handle.join();
        }
    }

    /// Number of tasks still tracked (finished or not).
    pub fn tracked(&self) -> usize {
        self.handles.lock().expect("supervisor lock").len()
    }
}

pub struct InfrastructureManager<'a> {
    client: &'a GasClient,
    time_zone: String,
}

impl<'a> InfrastructureManager<'a> {
    pub fn new(client: &'a GasClient, time_zone: impl Into<String>) -> Self {
        Self {
            client,
            time_zone: time_zone.into(),
        }
    }

    /// Verify the shim against fetched content without touching the remote.
    pub fn verify_shim(content: &ProjectContent) -> ShimVerification {
        let expected = shim::dispatcher();
        let expected_sha = shim::fingerprint(&expected.source);

        match content.files.iter().find(|f| f.name == shim::SHIM_FILE) {
            Some(existing) => {
                let actual_sha = shim::fingerprint(&existing.source);
                ShimVerification {
                    verified: actual_sha == expected_sha
                        && existing.file_type == expected.file_type,
                    was_created: false,
                    expected_sha,
                    actual_sha: Some(actual_sha),
                    error: None,
                }
            }
            None => ShimVerification {
                verified: false,
                was_created: false,
                expected_sha,
                actual_sha: None,
                error: Some("dispatcher file is missing".to_string()),
            },
        }
    }

    /// Which of the two HTML templates are absent from fetched content.
    pub fn missing_templates(content: &ProjectContent) -> Vec<RemoteFile> {
        shim::html_templates()
            .into_iter()
            .filter(|t| !content.files.iter().any(|f| f.name == t.name))
            .collect()
    }

    /// Make the project executable, repairing whatever is missing or stale.
    ///
    /// Every write is a full-file upsert: a partial failure leaves the
    /// previous content intact and the next call repeats the repair.
    pub fn ensure(
        &self,
        script_id: &ScriptId,
        token: &str,
        reporter: &mut dyn Reporter,
    ) -> Result<InfraStatus, GasError> {
        let content = self.client.get_project_content(script_id, token)?;

        let mut verification = Self::verify_shim(&content);
        if !verification.verified {
            let dispatcher = shim::dispatcher();
            reporter.info(&format!("installing dispatcher {}", shim::SHIM_FILE));
            match self.client.update_file(
                script_id,
                &dispatcher.name,
                &dispatcher.source,
                token,
                dispatcher.file_type,
            ) {
                Ok(()) => {
                    verification.was_created = true;
                    verification.verified = true;
                    verification.actual_sha = Some(verification.expected_sha.clone());
                    verification.error = None;
                }
                Err(e) => {
                    verification.error = Some(e.to_string());
                    return Err(e);
                }
            }
        }

        let manifest_ok = content
            .files
            .iter()
            .find(|f| f.is_manifest())
            .is_some_and(|m| shim::manifest_has_entry_points(&m.source));
        if !manifest_ok {
            let manifest = shim::manifest(&self.time_zone);
            reporter.info("rewriting manifest with webapp and executionApi entry points");
            self.client.update_file(
                script_id,
                &manifest.name,
                &manifest.source,
                token,
                manifest.file_type,
            )?;
        }

        for template in Self::missing_templates(&content) {
            reporter.info(&format!("installing template {}", template.name));
            self.client.update_file(
                script_id,
                &template.name,
                &template.source,
                token,
                template.file_type,
            )?;
        }

        let registry = DeploymentRegistry::new(self.client);
        if registry
            .find(script_id, Environment::Dev, token, reporter)?
            .is_none()
        {
            let description = format!("{} gasport dev", Environment::Dev.tag());
            let created = self
                .client
                .create_deployment(script_id, &description, None, token)?;
            reporter.info(&format!(
                "created [DEV] head deployment {}",
                created.deployment_id
            ));
        }

        let in_sync = !verification.was_created && manifest_ok;
        Ok(InfraStatus {
            in_sync,
            exec_shim: verification,
        })
    }

    /// Fire-and-forget repair of absent HTML templates.
    ///
    /// Never blocks an execution path: the thread is detached and only
    /// registered with the supervisor so shutdown can wait briefly.
    pub fn spawn_template_repair(
        client: GasClient,
        script_id: ScriptId,
        token: String,
        missing: Vec<RemoteFile>,
        supervisor: &Supervisor,
    ) {
        if missing.is_empty() {
            return;
        }
        let handle = std::thread::spawn(move || {
            for template in missing {
                // Best effort; the next ensure() pass repairs any failure.
                let _ = client.update_file(
                    &script_id,
                    &template.name,
                    &template.source,
                    &token,
                    template.file_type,
                );
            }
        });
        supervisor.adopt(handle);
    }
}
