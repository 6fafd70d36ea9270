//! Promotion of code snapshots across dev/staging/prod.
//!
//! `promote(staging|prod)` creates an immutable version of current HEAD and
//! retargets the environment's tagged deployment to it, strictly in that
//! order. If the retarget fails the version survives and the next promote
//! retries; a superseding promote is the repair, never a rollback.
//! `promote(dev)` only refreshes the description: dev always observes HEAD.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::deployments::{DeploymentRegistry, EnvironmentStatus};
use crate::error::GasError;
use crate::gateway::GasClient;
use crate::report::Reporter;
use crate::types::{Deployment, Environment, ScriptId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionOutcome {
    pub environment: Environment,
    pub deployment_id: String,
    /// None when the environment tracks HEAD (dev).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_number: Option<u64>,
    pub description: String,
}

pub struct PromotionController<'a> {
    client: &'a GasClient,
}

impl<'a> PromotionController<'a> {
    pub fn new(client: &'a GasClient) -> Self {
        Self { client }
    }

    /// Guarantee all three tagged deployments exist at HEAD.
    pub fn reset(
        &self,
        script_id: &ScriptId,
        token: &str,
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<Deployment>, GasError> {
        DeploymentRegistry::new(self.client).reset(script_id, token, reporter)
    }

    /// The environment → deployment table.
    pub fn status(
        &self,
        script_id: &ScriptId,
        token: &str,
        reporter: &mut dyn Reporter,
    ) -> Result<BTreeMap<&'static str, EnvironmentStatus>, GasError> {
        DeploymentRegistry::new(self.client).status(script_id, token, reporter)
    }

    /// Promote current HEAD into an environment.
    pub fn promote(
        &self,
        script_id: &ScriptId,
        env: Environment,
        description: Option<&str>,
        token: &str,
        reporter: &mut dyn Reporter,
    ) -> Result<PromotionOutcome, GasError> {
        let registry = DeploymentRegistry::new(self.client);

        if env == Environment::Dev {
            // Dev never snapshots; it tracks HEAD by definition.
            let label = description.unwrap_or("head");
            let full_description = format!("{} {}", env.tag(), label);
            let deployment = match registry.find(script_id, env, token, reporter)? {
                Some(d) => {
                    self.client.update_deployment(
                        script_id,
                        &d.deployment_id,
                        None,
                        &full_description,
                        token,
                    )?;
                    d
                }
                None => self
                    .client
                    .create_deployment(script_id, &full_description, None, token)?,
            };
            return Ok(PromotionOutcome {
                environment: env,
                deployment_id: deployment.deployment_id,
                version_number: None,
                description: full_description,
            });
        }

        // Snapshot strictly before retarget.
        let version_label = description.unwrap_or("gasport promote");
        let version = self
            .client
            .create_version(script_id, version_label, token)?;
        reporter.info(&format!(
            "created version {} of {}",
            version.version_number, script_id
        ));

        let full_description = format!(
            "{} v{} {}",
            env.tag(),
            version.version_number,
            version_label
        );

        let deployment_id = match registry.find(script_id, env, token, reporter)? {
            Some(d) => {
                self.client.update_deployment(
                    script_id,
                    &d.deployment_id,
                    Some(version.version_number),
                    &full_description,
                    token,
                )?;
                d.deployment_id
            }
            None => {
                // No tagged deployment yet: create one pinned at the snapshot.
                self.client
                    .create_deployment(
                        script_id,
                        &full_description,
                        Some(version.version_number),
                        token,
                    )?
                    .deployment_id
            }
        };

        reporter.info(&format!(
            "{} now serves version {}",
            env.as_str(),
            version.version_number
        ));

        Ok(PromotionOutcome {
            environment: env,
            deployment_id,
            version_number: Some(version.version_number),
            description: full_description,
        })
    }
}
