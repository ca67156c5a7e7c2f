//! Approval chain configuration: which roles approve a submission, in order.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::error::KycError;
use crate::ports::{ChainConfigStore, Result, RoleDirectory};
use crate::types::{ApprovalChainConfig, RoleId};

/// Which rung of the fallback ladder produced a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChainSource {
    /// The submitter's own role has a config
    Exact,
    /// Fell back to the default role's config
    DefaultRole,
    /// Fell back to whichever config exists
    AnyConfigured,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedChain {
    pub submitting_role_id: RoleId,
    pub config_role_id: RoleId,
    pub approvers: Vec<String>,
    pub source: ChainSource,
}

/// Parse the persisted JSON array form of a chain.
pub fn chain_from_json(raw: Value) -> Result<Vec<String>> {
    serde_json::from_value(raw)
        .map_err(|e| KycError::Validation(format!("approval chain is not a JSON string array: {e}")))
}

/// The JSON array form stored alongside the role, order preserved.
pub fn chain_to_json(chain: &[String]) -> Value {
    Value::from(chain.to_vec())
}

/// A usable chain is non-empty with distinct, non-blank role names.
pub fn validate_chain(chain: &[String]) -> Result<()> {
    if chain.is_empty() {
        return Err(KycError::Validation("approval chain must not be empty".into()));
    }
    let mut seen = HashSet::new();
    for name in chain {
        if name.trim().is_empty() {
            return Err(KycError::Validation("approval chain contains a blank role".into()));
        }
        if name.trim() != name {
            return Err(KycError::Validation(format!(
                "role name '{name}' has surrounding whitespace"
            )));
        }
        if !seen.insert(name.as_str()) {
            return Err(KycError::Validation(format!(
                "role '{name}' appears twice in the approval chain"
            )));
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct ChainResolver {
    chains: Arc<dyn ChainConfigStore>,
    roles: Arc<dyn RoleDirectory>,
    default_role: String,
}

impl ChainResolver {
    pub fn new(
        chains: Arc<dyn ChainConfigStore>,
        roles: Arc<dyn RoleDirectory>,
        default_role: impl Into<String>,
    ) -> Self {
        Self {
            chains,
            roles,
            default_role: default_role.into(),
        }
    }

    /// Resolve the chain governing submissions by `submitting_role_id`.
    ///
    /// Falls back to the default role's config, then to any config. Either
    /// fallback is logged as a warning since it changes who approves.
    pub async fn resolve_chain(&self, submitting_role_id: RoleId) -> Result<ResolvedChain> {
        if let Some(config) = usable(self.chains.get_chain(submitting_role_id).await?) {
            return Ok(resolved(submitting_role_id, config, ChainSource::Exact));
        }

        if let Some(default_role) = self.roles.role_by_name(&self.default_role).await? {
            if default_role.id != submitting_role_id {
                if let Some(config) = usable(self.chains.get_chain(default_role.id).await?) {
                    tracing::warn!(
                        submitting_role_id,
                        fallback_role_id = default_role.id,
                        fallback_role = %default_role.name,
                        "no approval chain for submitting role; using default role's chain"
                    );
                    return Ok(resolved(submitting_role_id, config, ChainSource::DefaultRole));
                }
            }
        }

        if let Some(config) = usable(self.chains.first_chain().await?) {
            tracing::warn!(
                submitting_role_id,
                fallback_role_id = config.role_id,
                "no approval chain for submitting or default role; using first configured chain"
            );
            return Ok(resolved(submitting_role_id, config, ChainSource::AnyConfigured));
        }

        tracing::error!(submitting_role_id, "no approval chain configured at all");
        Err(KycError::ConfigurationMissing(format!(
            "no approval chain resolvable for role {submitting_role_id}"
        )))
    }

    /// Create or replace the chain for a role.
    pub async fn upsert_chain(
        &self,
        role_id: RoleId,
        approvers: Vec<String>,
    ) -> Result<ApprovalChainConfig> {
        validate_chain(&approvers)?;
        if self.roles.role_by_id(role_id).await?.is_none() {
            return Err(KycError::RoleNotFound(format!("role {role_id}")));
        }
        let config = ApprovalChainConfig {
            role_id,
            approvers,
            updated_at: Utc::now(),
        };
        self.chains.upsert_chain(&config).await?;
        tracing::info!(role_id, approvers = ?config.approvers, "approval chain updated");
        Ok(config)
    }

    pub async fn list_chains(&self) -> Result<Vec<ApprovalChainConfig>> {
        self.chains.list_chains().await
    }
}

fn usable(config: Option<ApprovalChainConfig>) -> Option<ApprovalChainConfig> {
    match config {
        Some(c) if c.approvers.is_empty() => {
            tracing::warn!(role_id = c.role_id, "ignoring empty approval chain");
            None
        }
        other => other,
    }
}

fn resolved(
    submitting_role_id: RoleId,
    config: ApprovalChainConfig,
    source: ChainSource,
) -> ResolvedChain {
    ResolvedChain {
        submitting_role_id,
        config_role_id: config.role_id,
        approvers: config.approvers,
        source,
    }
}
