//! HTTP-level tests for the KYC server contract: session credential guard,
//! OTP verification, step saving, submission and the approval workflow.
//!
//! Runs against the in-memory stores, no database needed.

use std::sync::Arc;

use axum::body::Body;
use chrono::Duration;
use http_body_util::BodyExt;
use hyper::{Request, StatusCode};
use jsonwebtoken::{encode, EncodingKey, Header};
use kyc_core::memory::{MemoryStore, RecordingDelivery};
use kyc_core::settings::KycSettings;
use kyc_core::KycServices;
use kyc_server::middleware::jwt::JwtConfig;
use kyc_server::router::build_router;
use serde::Serialize;
use serde_json::{json, Value};
use tower::ServiceExt;

// ── Test JWT helpers ───────────────────────────────────────────

const TEST_JWT_SECRET: &[u8] = b"test-secret-for-kyc-http-tests";

#[derive(Debug, Serialize)]
struct TestClaims {
    sub: String,
    roles: Vec<String>,
    exp: usize,
}

fn make_jwt(actor_id: &str, roles: &[&str]) -> String {
    let claims = TestClaims {
        sub: actor_id.into(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET),
    )
    .expect("failed to encode test JWT")
}

// ── Test app builder ───────────────────────────────────────────

struct TestApp {
    router: axum::Router,
    delivery: Arc<RecordingDelivery>,
}

async fn build_test_app_with(settings: KycSettings) -> TestApp {
    let store = Arc::new(MemoryStore::with_demo_roles().await);
    let delivery = Arc::new(RecordingDelivery::default());
    let services = Arc::new(KycServices::new(store.stores(), delivery.clone(), settings));
    TestApp {
        router: build_router(services, JwtConfig::from_secret(TEST_JWT_SECRET)),
        delivery,
    }
}

async fn build_test_app() -> TestApp {
    build_test_app_with(KycSettings::default()).await
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

async fn call(
    app: &TestApp,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    (status, body_json(resp).await)
}

/// Open a public session and verify its email OTP. Returns
/// `(session_id, session_token, verification_token)`.
async fn verified_session(app: &TestApp, email: &str) -> (i64, String, String) {
    let (status, body) = call(
        app,
        "POST",
        "/api/kyc/sessions",
        &[],
        Some(json!({ "email": email })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let session_id = body["sessionId"].as_i64().unwrap();
    let session_token = body["sessionToken"].as_str().unwrap().to_string();
    assert_eq!(body["emailVerified"], false);

    let code = app.delivery.last_code(session_id).await.expect("OTP sent");
    let (status, body) = call(
        app,
        "POST",
        "/api/kyc/otp/verify",
        &[("user-agent", "test-agent/1.0")],
        Some(json!({ "sessionId": session_id, "otpCode": code, "otpType": "Email" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["sessionToken"], session_token.as_str());
    let verification = body["verificationToken"].as_str().unwrap().to_string();
    (session_id, session_token, verification)
}

fn address() -> Value {
    json!({ "line1": "12 Lake Road", "city": "Kathmandu", "country": "NP" })
}

// ── Public surface ─────────────────────────────────────────────

#[tokio::test]
async fn health_is_public() {
    let app = build_test_app().await;
    let (status, body) = call(&app, "GET", "/health", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn reopening_returns_same_session() {
    let app = build_test_app().await;
    let body = json!({ "email": "Same@Example.com" });
    let (_, first) = call(&app, "POST", "/api/kyc/sessions", &[], Some(body.clone())).await;
    let (_, second) = call(&app, "POST", "/api/kyc/sessions", &[], Some(body)).await;
    assert_eq!(first["sessionToken"], second["sessionToken"]);
}

#[tokio::test]
async fn wrong_otp_is_rejected() {
    let app = build_test_app().await;
    let (_, body) = call(
        &app,
        "POST",
        "/api/kyc/sessions",
        &[],
        Some(json!({ "email": "wrong@example.com" })),
    )
    .await;
    let session_id = body["sessionId"].as_i64().unwrap();
    let real = app.delivery.last_code(session_id).await.unwrap();
    let wrong = if real == "000000" { "111111" } else { "000000" };
    let (status, body) = call(
        &app,
        "POST",
        "/api/kyc/otp/verify",
        &[],
        Some(json!({ "sessionId": session_id, "otpCode": wrong, "otpType": "Email" })),
    )
    .await;
    assert!(status.is_client_error(), "{status}");
    assert_eq!(body["success"], false);
}

async fn open_session(app: &TestApp, email: &str) -> i64 {
    let (_, body) = call(
        app,
        "POST",
        "/api/kyc/sessions",
        &[],
        Some(json!({ "email": email })),
    )
    .await;
    body["sessionId"].as_i64().unwrap()
}

#[tokio::test]
async fn resend_inside_cooldown_is_429() {
    let app = build_test_app().await;
    let session_id = open_session(&app, "resend@example.com").await;
    let first = app.delivery.last_code(session_id).await.unwrap();
    let (status, body) = call(
        &app,
        "POST",
        "/api/kyc/otp/send",
        &[],
        Some(json!({ "sessionId": session_id, "otpType": "Email" })),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "RATE_LIMITED");
    assert_eq!(app.delivery.last_code(session_id).await.unwrap(), first);
}

#[tokio::test]
async fn resend_after_cooldown_replaces_code() {
    let settings = KycSettings {
        otp_resend_cooldown: Duration::zero(),
        ..Default::default()
    };
    let app = build_test_app_with(settings).await;
    let session_id = open_session(&app, "resend-later@example.com").await;
    let (status, body) = call(
        &app,
        "POST",
        "/api/kyc/otp/send",
        &[],
        Some(json!({ "sessionId": session_id, "otpType": "Email" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["expiresAt"].is_string());
}

// ── Session credential guard ───────────────────────────────────

#[tokio::test]
async fn unverified_request_is_denied() {
    let app = build_test_app().await;
    let (_, body) = call(
        &app,
        "POST",
        "/api/kyc/sessions",
        &[],
        Some(json!({ "email": "anon@example.com" })),
    )
    .await;
    let token = body["sessionToken"].as_str().unwrap();
    let uri = format!("/api/kyc/sessions/{token}/progress");

    let (status, body) = call(&app, "GET", &uri, &[], None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "MISSING_VERIFICATION");

    let (status, body) = call(
        &app,
        "GET",
        &uri,
        &[("x-kyc-verification", "not-the-token")],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "INVALID_CREDENTIALS");
}

#[tokio::test]
async fn malformed_session_token_is_denied() {
    let app = build_test_app().await;
    let (status, body) = call(
        &app,
        "GET",
        "/api/kyc/sessions/not-a-uuid/progress",
        &[("x-kyc-verification", "whatever")],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "MISSING_IDENTIFIER");
}

#[tokio::test]
async fn expired_verification_is_denied() {
    let settings = KycSettings {
        verification_ttl: Duration::minutes(-1),
        ..Default::default()
    };
    let app = build_test_app_with(settings).await;
    let (_, token, verification) = verified_session(&app, "late@example.com").await;
    let (status, body) = call(
        &app,
        "GET",
        &format!("/api/kyc/sessions/{token}/progress"),
        &[("x-kyc-verification", verification.as_str())],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "SESSION_EXPIRED");
}

#[tokio::test]
async fn bearer_is_let_through_without_verification() {
    let app = build_test_app().await;
    let (_, body) = call(
        &app,
        "POST",
        "/api/kyc/sessions",
        &[],
        Some(json!({ "email": "staff-view@example.com" })),
    )
    .await;
    let token = body["sessionToken"].as_str().unwrap();
    let bearer = format!("Bearer {}", make_jwt("checker-1", &["Checker"]));
    let (status, body) = call(
        &app,
        "GET",
        &format!("/api/kyc/sessions/{token}/progress"),
        &[("authorization", bearer.as_str())],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["steps"].as_array().unwrap().len(), 14);
}

#[tokio::test]
async fn invalid_bearer_falls_back_to_session_credentials() {
    let app = build_test_app().await;
    let (_, token, verification) = verified_session(&app, "fallback@example.com").await;
    let (status, _) = call(
        &app,
        "GET",
        &format!("/api/kyc/sessions/{token}/progress"),
        &[
            ("authorization", "Bearer garbage"),
            ("x-kyc-verification", verification.as_str()),
        ],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

// ── Steps ──────────────────────────────────────────────────────

#[tokio::test]
async fn step_progress_round_trip() {
    let app = build_test_app().await;
    let (_, token, verification) = verified_session(&app, "steps@example.com").await;
    let auth = [("x-kyc-verification", verification.as_str())];

    let (status, body) = call(
        &app,
        "PUT",
        &format!("/api/kyc/sessions/{token}/steps/2"),
        &auth,
        Some(json!({ "payload": address(), "markCompleted": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["step"]["isSaved"], true);
    assert_eq!(body["step"]["isCompleted"], true);
    assert_eq!(body["formStatus"], "InProgress");

    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/kyc/sessions/{token}/steps/1/complete"),
        &auth,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        "GET",
        &format!("/api/kyc/sessions/{token}/progress"),
        &auth,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let steps = body["steps"].as_array().unwrap();
    let step2 = steps.iter().find(|s| s["stepNumber"] == 2).unwrap();
    assert_eq!(step2["isSaved"], true);
    let step3 = steps.iter().find(|s| s["stepNumber"] == 3).unwrap();
    assert_eq!(step3["isSaved"], false);

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/kyc/sessions/{token}/resume"),
        &auth,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["currentStep"], 3);
    assert!(body["session"].get("verificationToken").is_none());
}

#[tokio::test]
async fn invalid_step_payload_is_400() {
    let app = build_test_app().await;
    let (_, token, verification) = verified_session(&app, "bad-step@example.com").await;
    let (status, body) = call(
        &app,
        "PUT",
        &format!("/api/kyc/sessions/{token}/steps/2"),
        &[("x-kyc-verification", verification.as_str())],
        Some(json!({ "payload": { "line1": "", "city": "X", "country": "NP" } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/kyc/sessions/{token}/steps/99/complete"),
        &[("x-kyc-verification", verification.as_str())],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "UNSUPPORTED_STEP");
}

// ── Submission and approval ────────────────────────────────────

#[tokio::test]
async fn submit_then_two_level_approval() {
    let app = build_test_app().await;
    let (session_id, token, verification) = verified_session(&app, "flow@example.com").await;
    let auth = [("x-kyc-verification", verification.as_str())];

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/kyc/sessions/{token}/submit"),
        &auth,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let workflow_id = body["workflowId"].as_i64().unwrap();

    // Idempotent
    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/kyc/sessions/{token}/submit"),
        &auth,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["workflowId"].as_i64(), Some(workflow_id));

    // Form is locked while in review
    let (status, _) = call(
        &app,
        "PUT",
        &format!("/api/kyc/sessions/{token}/steps/2"),
        &auth,
        Some(json!({ "payload": address() })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let approve = format!("/api/workflow/{workflow_id}/approve");
    let (status, _) = call(&app, "POST", &approve, &[], None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let rbbsec = format!("Bearer {}", make_jwt("rbbsec-1", &["RBBSec"]));
    let (status, _) = call(&app, "POST", &approve, &[("authorization", rbbsec.as_str())], None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let checker = format!("Bearer {}", make_jwt("checker-1", &["Checker"]));
    let (status, body) = call(
        &app,
        "GET",
        "/api/workflow/pending/2",
        &[("authorization", checker.as_str())],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = call(
        &app,
        "POST",
        &approve,
        &[("authorization", checker.as_str())],
        Some(json!({ "remarks": "documents fine" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);

    let (status, _) = call(&app, "POST", &approve, &[("authorization", rbbsec.as_str())], None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        "GET",
        &format!("/api/workflow/{workflow_id}"),
        &[("authorization", checker.as_str())],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Approved");
    assert_eq!(body["sessionId"].as_i64(), Some(session_id));

    let (status, body) = call(
        &app,
        "GET",
        &format!("/api/workflow/{workflow_id}/history"),
        &[("authorization", checker.as_str())],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let actions: Vec<_> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(actions, ["Submitted", "Approved", "Approved"]);

    // Terminal
    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/workflow/{workflow_id}/reject"),
        &[("authorization", rbbsec.as_str())],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    let (status, body) = call(
        &app,
        "GET",
        &format!("/api/kyc/sessions/{token}/progress"),
        &auth,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["formStatus"], "FullyApproved");
}

#[tokio::test]
async fn default_reject_returns_form_to_applicant() {
    let app = build_test_app().await;
    let (_, token, verification) = verified_session(&app, "reject@example.com").await;
    let auth = [("x-kyc-verification", verification.as_str())];
    let (_, body) = call(
        &app,
        "POST",
        &format!("/api/kyc/sessions/{token}/submit"),
        &auth,
        None,
    )
    .await;
    let workflow_id = body["workflowId"].as_i64().unwrap();

    let checker = format!("Bearer {}", make_jwt("checker-1", &["Checker"]));
    // Checker is first in the chain, nothing to return to
    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/workflow/{workflow_id}/reject"),
        &[("authorization", checker.as_str())],
        Some(json!({ "returnToPrevious": true })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "NO_PREVIOUS_STEP");

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/workflow/{workflow_id}/reject"),
        &[("authorization", checker.as_str())],
        Some(json!({ "remarks": "blurry ID" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    // Editable again
    let (status, _) = call(
        &app,
        "PUT",
        &format!("/api/kyc/sessions/{token}/steps/2"),
        &auth,
        Some(json!({ "payload": address() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Resubmission opens a fresh instance
    let (_, body) = call(
        &app,
        "POST",
        &format!("/api/kyc/sessions/{token}/submit"),
        &auth,
        None,
    )
    .await;
    assert_ne!(body["workflowId"].as_i64(), Some(workflow_id));
}

#[tokio::test]
async fn staff_initiate_needs_staff_role_and_verified_session() {
    let app = build_test_app().await;
    let user = format!("Bearer {}", make_jwt("user-1", &["User"]));
    let checker = format!("Bearer {}", make_jwt("checker-1", &["Checker"]));

    let unverified = open_session(&app, "staff-submit@example.com").await;
    let initiate = format!("/api/workflow/sessions/{unverified}/initiate");
    let (status, body) = call(&app, "POST", &initiate, &[("authorization", user.as_str())], None).await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");

    let (status, body) =
        call(&app, "POST", &initiate, &[("authorization", checker.as_str())], None).await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert_eq!(body["code"], "INVALID_STATE");

    let (session_id, _, _) = verified_session(&app, "staff-verified@example.com").await;
    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/workflow/sessions/{session_id}/initiate"),
        &[("authorization", checker.as_str())],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let workflow_id = body["workflowId"].as_i64().unwrap();

    let latest = format!("/api/workflow/sessions/{session_id}");
    let (status, _) = call(&app, "GET", &latest, &[("authorization", user.as_str())], None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    for uri in [format!("/api/workflow/{workflow_id}"), format!("/api/workflow/{workflow_id}/history")] {
        let (status, _) = call(&app, "GET", &uri, &[("authorization", user.as_str())], None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
    }

    let (status, body) = call(&app, "GET", &latest, &[("authorization", checker.as_str())], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"].as_i64(), Some(workflow_id));
    assert_eq!(body["submittedBy"], "checker-1");
}

#[tokio::test]
async fn my_session_needs_bearer() {
    let app = build_test_app().await;
    let (status, _) = call(&app, "POST", "/api/kyc/sessions/mine", &[], None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let user = format!("Bearer {}", make_jwt("user-7", &["User"]));
    let (status, body) = call(
        &app,
        "POST",
        "/api/kyc/sessions/mine",
        &[("authorization", user.as_str())],
        Some(json!({ "email": "mine@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let first = body["sessionToken"].clone();

    let (_, body) = call(
        &app,
        "POST",
        "/api/kyc/sessions/mine",
        &[("authorization", user.as_str())],
        Some(json!({ "email": "mine@example.com" })),
    )
    .await;
    assert_eq!(body["sessionToken"], first);
}

// ── Chain configuration ────────────────────────────────────────

#[tokio::test]
async fn chain_config_is_admin_only() {
    let app = build_test_app().await;
    let checker = format!("Bearer {}", make_jwt("checker-1", &["Checker"]));
    let admin = format!("Bearer {}", make_jwt("admin-1", &["Admin"]));

    let (status, _) = call(
        &app,
        "GET",
        "/api/approval-chains",
        &[("authorization", checker.as_str())],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &app,
        "PUT",
        "/api/approval-chains/2",
        &[("authorization", admin.as_str())],
        Some(json!({ "approvers": ["RBBSec"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["approvers"], json!(["RBBSec"]));

    let (status, body) = call(
        &app,
        "GET",
        "/api/approval-chains",
        &[("authorization", admin.as_str())],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = call(
        &app,
        "PUT",
        "/api/approval-chains/2",
        &[("authorization", admin.as_str())],
        Some(json!({ "approvers": [] })),
    )
    .await;
    assert!(status.is_client_error(), "{status} {body}");
}
