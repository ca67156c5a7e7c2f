//! Session handlers.
//!
//! POST /api/kyc/sessions                        — open (or reopen) a public session, send email OTP
//! POST /api/kyc/sessions/mine                   — open (or reopen) the caller's own session
//! GET  /api/kyc/sessions/:session_token/progress
//! POST /api/kyc/sessions/:session_token/resume
//! POST /api/kyc/sessions/:session_token/submit  — start approval

use std::sync::Arc;

use axum::{extract::Path, http::HeaderMap, Extension, Json};
use kyc_core::guard::SessionAccess;
use kyc_core::progress::FormProgress;
use kyc_core::session::{SessionHandle, SessionRequest};
use kyc_core::types::{KycSession, OtpType};
use kyc_core::{KycError, KycServices, Principal};
use serde::Serialize;

use super::{guarded_session, ActionResponse};
use crate::error::AppError;
use crate::middleware::session_guard::header_value;

pub async fn create_session(
    Extension(services): Extension<Arc<KycServices>>,
    headers: HeaderMap,
    Json(mut request): Json<SessionRequest>,
) -> Result<Json<SessionHandle>, AppError> {
    request.user_id = None;
    if request.user_agent.is_none() {
        request.user_agent = header_value(&headers, "user-agent");
    }
    let session = services.sessions.get_or_create_session(request).await?;
    if !session.email_verified {
        // A reopened session inside the resend window keeps its live code.
        match services.otp.issue(session.id, OtpType::Email).await {
            Ok(_) | Err(KycError::RateLimited(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Json(SessionHandle::from(&session)))
}

pub async fn my_session(
    Extension(services): Extension<Arc<KycServices>>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    body: Option<Json<SessionRequest>>,
) -> Result<Json<SessionHandle>, AppError> {
    let mut request = body.map(|Json(r)| r).unwrap_or_default();
    request.user_id = Some(principal.actor_id.clone());
    if request.email.is_none() {
        request.email = principal.email.clone();
    }
    if request.user_agent.is_none() {
        request.user_agent = header_value(&headers, "user-agent");
    }
    let session = services.sessions.get_or_create_session(request).await?;
    Ok(Json(SessionHandle::from(&session)))
}

pub async fn get_progress(
    Extension(services): Extension<Arc<KycServices>>,
    Extension(access): Extension<SessionAccess>,
    Path(session_token): Path<String>,
) -> Result<Json<FormProgress>, AppError> {
    let session = guarded_session(&services, &access, &session_token).await?;
    Ok(Json(services.steps.get_progress(session.id).await?))
}

#[derive(Debug, Serialize)]
pub struct ResumeResponse {
    pub session: KycSession,
}

pub async fn resume(
    Extension(services): Extension<Arc<KycServices>>,
    Extension(access): Extension<SessionAccess>,
    Path(session_token): Path<String>,
) -> Result<Json<ResumeResponse>, AppError> {
    let session = guarded_session(&services, &access, &session_token).await?;
    let session = services.steps.resume(session.id).await?;
    Ok(Json(ResumeResponse { session }))
}

pub async fn submit(
    Extension(services): Extension<Arc<KycServices>>,
    Extension(access): Extension<SessionAccess>,
    Path(session_token): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    let session = guarded_session(&services, &access, &session_token).await?;
    let outcome = services
        .workflow
        .initiate(session.id, access.principal())
        .await?;
    let message = if outcome.created {
        "submitted for approval"
    } else {
        "already in review"
    };
    Ok(Json(
        ActionResponse::ok(message).with_workflow(outcome.instance.id),
    ))
}
