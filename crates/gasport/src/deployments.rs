//! The deployment registry: one authoritative deployment per environment.
//!
//! Environments are identified by a literal description prefix (`[DEV]`,
//! `[STAGING]`, `[PROD]`). The registry finds, creates, and reports tagged
//! deployments; it never deletes user-created untagged ones.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::GasError;
use crate::gateway::GasClient;
use crate::report::Reporter;
use crate::types::{Deployment, Environment, ScriptId};

/// Per-environment slot in a [`status`](DeploymentRegistry::status) report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentStatus {
    pub deployment_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

pub struct DeploymentRegistry<'a> {
    client: &'a GasClient,
}

impl<'a> DeploymentRegistry<'a> {
    pub fn new(client: &'a GasClient) -> Self {
        Self { client }
    }

    /// Find the authoritative deployment for an environment.
    ///
    /// When several deployments carry the same tag (manual reuse), the one
    /// with the lexicographically smallest id wins: the API's list order is
    /// not stable, the smallest id is. A warning is reported so the
    /// operator can clean up.
    pub fn find(
        &self,
        script_id: &ScriptId,
        env: Environment,
        token: &str,
        reporter: &mut dyn Reporter,
    ) -> Result<Option<Deployment>, GasError> {
        let deployments = self.client.list_deployments(script_id, token)?;
        Ok(Self::pick(deployments, env, reporter))
    }

    fn pick(
        deployments: Vec<Deployment>,
        env: Environment,
        reporter: &mut dyn Reporter,
    ) -> Option<Deployment> {
        let mut tagged: Vec<Deployment> = deployments
            .into_iter()
            .filter(|d| d.environment() == Some(env))
            .collect();

        if tagged.len() > 1 {
            reporter.warn(&format!(
                "{} deployments carry the {} tag; using the lowest id {}",
                tagged.len(),
                env.tag(),
                tagged
                    .iter()
                    .map(|d| d.deployment_id.as_str())
                    .min()
                    .unwrap_or_default(),
            ));
        }

        tagged.sort_by(|a, b| a.deployment_id.cmp(&b.deployment_id));
        tagged.into_iter().next()
    }

    /// Guarantee a tagged deployment exists for every environment.
    ///
    /// Missing environments get a HEAD deployment carrying the tag.
    /// Idempotent: a second call finds all three and creates nothing.
    pub fn reset(
        &self,
        script_id: &ScriptId,
        token: &str,
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<Deployment>, GasError> {
        let existing = self.client.list_deployments(script_id, token)?;
        let mut result = Vec::new();

        for env in Environment::ALL {
            match Self::pick(existing.clone(), env, reporter) {
                Some(d) => result.push(d),
                None => {
                    let description = format!("{} gasport {}", env.tag(), env.as_str());
                    let created =
                        self.client
                            .create_deployment(script_id, &description, None, token)?;
                    reporter.info(&format!(
                        "created {} deployment {}",
                        env.as_str(),
                        created.deployment_id
                    ));
                    result.push(created);
                }
            }
        }

        Ok(result)
    }

    /// The full environment → (id, version, url) table.
    pub fn status(
        &self,
        script_id: &ScriptId,
        token: &str,
        reporter: &mut dyn Reporter,
    ) -> Result<BTreeMap<&'static str, EnvironmentStatus>, GasError> {
        let deployments = self.client.list_deployments(script_id, token)?;
        let mut table = BTreeMap::new();

        for env in Environment::ALL {
            if let Some(d) = Self::pick(deployments.clone(), env, reporter) {
                table.insert(
                    env.as_str(),
                    EnvironmentStatus {
                        deployment_id: d.deployment_id.clone(),
                        version_number: d.version_number(),
                        url: d.web_app_url().map(str::to_string),
                    },
                );
            }
        }

        Ok(table)
    }
}
