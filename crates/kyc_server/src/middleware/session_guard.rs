//! Session credential guard as axum middleware.
//!
//! Layered with `route_layer` on the `/api/kyc/sessions/:session_token/...`
//! routes, after [`super::jwt::optional_jwt`] has had a chance to attach a
//! principal. On success the [`SessionAccess`] is inserted as an extension.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, Request},
    http::{header::USER_AGENT, HeaderMap},
    middleware::Next,
    response::Response,
    Extension,
};
use kyc_core::guard::{GuardRequest, SessionAccess, VERIFICATION_HEADER};
use kyc_core::{KycServices, Principal};

use crate::error::AppError;

pub async fn session_guard(
    Extension(services): Extension<Arc<KycServices>>,
    Path(params): Path<HashMap<String, String>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let principal = req.extensions().get::<Principal>().cloned();
    let headers = req.headers();
    let client_ip = client_ip(headers, connect_info.map(|ConnectInfo(addr)| addr));
    let user_agent = header_value(headers, USER_AGENT.as_str());
    let verification = header_value(headers, VERIFICATION_HEADER);

    let access = services
        .guard
        .authorize(GuardRequest {
            principal: principal.as_ref(),
            session_token: params.get("session_token").map(String::as_str),
            verification_token: verification.as_deref(),
            client_ip: client_ip.as_deref(),
            user_agent: user_agent.as_deref(),
        })
        .await?;

    req.extensions_mut().insert(access);
    Ok(next.run(req).await)
}

pub(crate) fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// First hop of `X-Forwarded-For`, then `X-Real-IP`, then the socket peer.
pub(crate) fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    header_value(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
        .filter(|v| !v.is_empty())
        .or_else(|| header_value(headers, "x-real-ip"))
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}
