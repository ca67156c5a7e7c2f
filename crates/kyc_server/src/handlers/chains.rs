//! Approval chain configuration. Admin only.
//!
//! GET /api/approval-chains
//! PUT /api/approval-chains/:role_id   — `{approvers: [roleName, ...]}`

use std::sync::Arc;

use axum::{extract::Path, Extension, Json};
use kyc_core::types::{ApprovalChainConfig, RoleId};
use kyc_core::{KycServices, Principal};
use serde::Deserialize;

use crate::error::AppError;

pub async fn list_chains(
    Extension(services): Extension<Arc<KycServices>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<ApprovalChainConfig>>, AppError> {
    services.require_admin(&principal)?;
    Ok(Json(services.chains.list_chains().await?))
}

#[derive(Debug, Deserialize)]
pub struct UpsertChainRequest {
    pub approvers: Vec<String>,
}

pub async fn upsert_chain(
    Extension(services): Extension<Arc<KycServices>>,
    Extension(principal): Extension<Principal>,
    Path(role_id): Path<RoleId>,
    Json(request): Json<UpsertChainRequest>,
) -> Result<Json<ApprovalChainConfig>, AppError> {
    services.require_admin(&principal)?;
    let config = services
        .chains
        .upsert_chain(role_id, request.approvers)
        .await?;
    tracing::info!(role_id, actor = %principal.actor_id, "approval chain updated");
    Ok(Json(config))
}
