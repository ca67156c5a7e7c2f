//! Router construction for the KYC server.

use std::sync::Arc;

use axum::{
    http::{header, HeaderName, Method},
    middleware as axum_mw,
    routing::{get, post, put},
    Extension, Router,
};
use kyc_core::guard::VERIFICATION_HEADER;
use kyc_core::KycServices;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers;
use crate::middleware::jwt::{jwt_auth, optional_jwt, JwtConfig};
use crate::middleware::session_guard::session_guard;

/// Build the full axum router with all routes and middleware.
pub fn build_router(services: Arc<KycServices>, jwt_config: JwtConfig) -> Router {
    // Staff and account-holder routes: bearer token required
    let protected = Router::new()
        .route("/api/kyc/sessions/mine", post(handlers::sessions::my_session))
        .route(
            "/api/workflow/sessions/:session_id/initiate",
            post(handlers::workflow::initiate),
        )
        .route(
            "/api/workflow/sessions/:session_id",
            get(handlers::workflow::latest_for_session),
        )
        .route(
            "/api/workflow/pending/:role_id",
            get(handlers::workflow::pending),
        )
        .route("/api/workflow/:workflow_id", get(handlers::workflow::get_workflow))
        .route(
            "/api/workflow/:workflow_id/approve",
            post(handlers::workflow::approve),
        )
        .route(
            "/api/workflow/:workflow_id/reject",
            post(handlers::workflow::reject),
        )
        .route(
            "/api/workflow/:workflow_id/history",
            get(handlers::workflow::history),
        )
        .route("/api/approval-chains", get(handlers::chains::list_chains))
        .route(
            "/api/approval-chains/:role_id",
            put(handlers::chains::upsert_chain),
        )
        .layer(axum_mw::from_fn(jwt_auth))
        .layer(Extension(jwt_config.clone()));

    // Applicant routes: bearer principal or session + verification token
    let session_scoped = Router::new()
        .route(
            "/api/kyc/sessions/:session_token/progress",
            get(handlers::sessions::get_progress),
        )
        .route(
            "/api/kyc/sessions/:session_token/resume",
            post(handlers::sessions::resume),
        )
        .route(
            "/api/kyc/sessions/:session_token/submit",
            post(handlers::sessions::submit),
        )
        .route(
            "/api/kyc/sessions/:session_token/steps/:step",
            put(handlers::steps::save_step),
        )
        .route(
            "/api/kyc/sessions/:session_token/steps/:step/complete",
            post(handlers::steps::complete_step),
        )
        .route_layer(axum_mw::from_fn(session_guard))
        .route_layer(axum_mw::from_fn(optional_jwt))
        .layer(Extension(jwt_config));

    // Public routes (no auth)
    let public = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api/kyc/sessions", post(handlers::sessions::create_session))
        .route("/api/kyc/otp/send", post(handlers::otp::send_otp))
        .route("/api/kyc/otp/verify", post(handlers::otp::verify_otp));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(VERIFICATION_HEADER),
        ]);

    public
        .merge(session_scoped)
        .merge(protected)
        .layer(Extension(services))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}
