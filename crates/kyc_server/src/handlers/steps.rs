//! Step handlers.
//!
//! PUT  /api/kyc/sessions/:session_token/steps/:step           — save a step payload
//! POST /api/kyc/sessions/:session_token/steps/:step/complete  — mark a step completed

use std::sync::Arc;

use axum::{extract::Path, Extension, Json};
use kyc_core::guard::SessionAccess;
use kyc_core::progress::StepOutcome;
use kyc_core::KycServices;
use serde::Deserialize;
use serde_json::Value;

use super::guarded_session;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveStepRequest {
    pub payload: Value,
    #[serde(default)]
    pub mark_completed: bool,
}

pub async fn save_step(
    Extension(services): Extension<Arc<KycServices>>,
    Extension(access): Extension<SessionAccess>,
    Path((session_token, step)): Path<(String, i32)>,
    Json(request): Json<SaveStepRequest>,
) -> Result<Json<StepOutcome>, AppError> {
    let session = guarded_session(&services, &access, &session_token).await?;
    let outcome = services
        .steps
        .save_step(session.id, step, &request.payload, request.mark_completed)
        .await?;
    Ok(Json(outcome))
}

pub async fn complete_step(
    Extension(services): Extension<Arc<KycServices>>,
    Extension(access): Extension<SessionAccess>,
    Path((session_token, step)): Path<(String, i32)>,
) -> Result<Json<StepOutcome>, AppError> {
    let session = guarded_session(&services, &access, &session_token).await?;
    Ok(Json(services.steps.complete_step(session.id, step).await?))
}
