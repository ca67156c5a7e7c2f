//! Workflow handlers. All require a bearer principal; reads and staff
//! submissions additionally require a staff role.
//!
//! POST /api/workflow/sessions/:session_id/initiate
//! GET  /api/workflow/sessions/:session_id         — latest instance for a session
//! GET  /api/workflow/pending/:role_id             — InReview queue of a role
//! GET  /api/workflow/:workflow_id
//! POST /api/workflow/:workflow_id/approve
//! POST /api/workflow/:workflow_id/reject
//! GET  /api/workflow/:workflow_id/history

use std::sync::Arc;

use axum::{extract::Path, Extension, Json};
use kyc_core::types::{ApprovalLogEntry, RoleId, SessionId, WorkflowId, WorkflowInstance, WorkflowStatus};
use kyc_core::{KycServices, Principal};
use serde::Deserialize;

use super::ActionResponse;
use crate::error::AppError;

pub async fn initiate(
    Extension(services): Extension<Arc<KycServices>>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<ActionResponse>, AppError> {
    let outcome = services
        .workflow
        .initiate_as_staff(session_id, &principal)
        .await?;
    let message = if outcome.created {
        "workflow initiated"
    } else {
        "already in review"
    };
    Ok(Json(
        ActionResponse::ok(message).with_workflow(outcome.instance.id),
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    pub remarks: Option<String>,
}

pub async fn approve(
    Extension(services): Extension<Arc<KycServices>>,
    Extension(principal): Extension<Principal>,
    Path(workflow_id): Path<WorkflowId>,
    body: Option<Json<ApproveRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let updated = services
        .workflow
        .approve(workflow_id, &principal, request.remarks)
        .await?;
    let message = match updated.status {
        WorkflowStatus::Approved => "workflow approved",
        _ => "approved, forwarded to next role",
    };
    Ok(Json(ActionResponse::ok(message).with_workflow(updated.id)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectRequest {
    pub remarks: Option<String>,
    #[serde(default)]
    pub return_to_previous: bool,
}

pub async fn reject(
    Extension(services): Extension<Arc<KycServices>>,
    Extension(principal): Extension<Principal>,
    Path(workflow_id): Path<WorkflowId>,
    body: Option<Json<RejectRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let updated = services
        .workflow
        .reject(
            workflow_id,
            &principal,
            request.remarks,
            request.return_to_previous,
        )
        .await?;
    let message = if request.return_to_previous {
        "returned to previous role"
    } else {
        "workflow rejected"
    };
    Ok(Json(ActionResponse::ok(message).with_workflow(updated.id)))
}

pub async fn pending(
    Extension(services): Extension<Arc<KycServices>>,
    Extension(principal): Extension<Principal>,
    Path(role_id): Path<RoleId>,
) -> Result<Json<Vec<WorkflowInstance>>, AppError> {
    Ok(Json(
        services.workflow.pending_for_role(role_id, &principal).await?,
    ))
}

pub async fn history(
    Extension(services): Extension<Arc<KycServices>>,
    Extension(principal): Extension<Principal>,
    Path(workflow_id): Path<WorkflowId>,
) -> Result<Json<Vec<ApprovalLogEntry>>, AppError> {
    services.workflow.require_staff(&principal).await?;
    Ok(Json(services.workflow.history(workflow_id).await?))
}

pub async fn get_workflow(
    Extension(services): Extension<Arc<KycServices>>,
    Extension(principal): Extension<Principal>,
    Path(workflow_id): Path<WorkflowId>,
) -> Result<Json<WorkflowInstance>, AppError> {
    services.workflow.require_staff(&principal).await?;
    Ok(Json(services.workflow.get(workflow_id).await?))
}

pub async fn latest_for_session(
    Extension(services): Extension<Arc<KycServices>>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<WorkflowInstance>, AppError> {
    services.workflow.require_staff(&principal).await?;
    Ok(Json(services.workflow.latest_for_session(session_id).await?))
}
