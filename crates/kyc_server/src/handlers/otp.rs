//! OTP handlers.
//!
//! POST /api/kyc/otp/send    — issue a fresh code
//! POST /api/kyc/otp/verify  — check a code, returns the verification token

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::ConnectInfo, http::HeaderMap, Extension, Json};
use chrono::{DateTime, Utc};
use kyc_core::otp::{VerifiedSession, VerifyOtpRequest};
use kyc_core::types::{OtpType, SessionId};
use kyc_core::KycServices;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::middleware::session_guard::{client_ip, header_value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOtpRequest {
    pub session_id: SessionId,
    pub otp_type: OtpType,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOtpResponse {
    pub success: bool,
    pub message: String,
    pub expires_at: DateTime<Utc>,
}

pub async fn send_otp(
    Extension(services): Extension<Arc<KycServices>>,
    Json(request): Json<SendOtpRequest>,
) -> Result<Json<SendOtpResponse>, AppError> {
    let expires_at = services
        .otp
        .issue(request.session_id, request.otp_type)
        .await?;
    Ok(Json(SendOtpResponse {
        success: true,
        message: format!("{} code sent", request.otp_type.as_str()),
        expires_at,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpResponse {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub verified: VerifiedSession,
}

pub async fn verify_otp(
    Extension(services): Extension<Arc<KycServices>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<VerifyOtpRequest>,
) -> Result<Json<VerifyOtpResponse>, AppError> {
    let ip = client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr));
    let user_agent = header_value(&headers, "user-agent");
    let verified = services
        .otp
        .verify(&request, ip.as_deref(), user_agent.as_deref())
        .await?;
    Ok(Json(VerifyOtpResponse {
        success: true,
        message: "verified".to_string(),
        verified,
    }))
}
