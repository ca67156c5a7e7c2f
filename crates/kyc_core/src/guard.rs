//! Credential guard for session-scoped KYC endpoints.
//!
//! A request is let through when it either carries an authenticated bearer
//! principal, or presents a session token (route) plus a verification token
//! (header) that match a verified, unexpired session. The decision itself is
//! [`decide`], a pure function; [`CredentialGuard`] adds the lookup, anomaly
//! logging and activity telemetry around it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{GuardDenial, KycError};
use crate::ports::SessionStore;
use crate::principal::Principal;
use crate::types::KycSession;

/// Header carrying the verification token on anonymous requests.
pub const VERIFICATION_HEADER: &str = "x-kyc-verification";

/// Credentials as presented by one inbound request.
#[derive(Debug, Default, Clone, Copy)]
pub struct GuardRequest<'a> {
    pub principal: Option<&'a Principal>,
    pub session_token: Option<&'a str>,
    pub verification_token: Option<&'a str>,
    pub client_ip: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

/// How an allowed request was authorised.
#[derive(Debug, Clone)]
pub enum SessionAccess {
    Bearer(Principal),
    Verified(KycSession),
}

impl SessionAccess {
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Self::Bearer(p) => Some(p),
            Self::Verified(_) => None,
        }
    }
}

/// Session tokens are UUIDs; anything else is rejected before any lookup.
pub fn parse_session_token(raw: Option<&str>) -> Result<Uuid, GuardDenial> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or(GuardDenial::MissingIdentifier)
}

/// Steps 4-5 of the guard: the candidate found by session token must carry
/// the presented verification token, be email-verified and be unexpired.
pub fn decide(
    presented_verification: &str,
    candidate: Option<&KycSession>,
    now: DateTime<Utc>,
) -> Result<(), GuardDenial> {
    let session = candidate.ok_or(GuardDenial::InvalidCredentials)?;
    let stored = session
        .verification_token
        .as_deref()
        .ok_or(GuardDenial::InvalidCredentials)?;
    if !session.email_verified || !tokens_match(stored, presented_verification) {
        return Err(GuardDenial::InvalidCredentials);
    }
    match session.verification_token_expiry {
        Some(expiry) if expiry < now => Err(GuardDenial::Expired),
        _ => Ok(()),
    }
}

/// Names of fingerprint fields that differ from those captured at verification.
/// Fields that were never captured are not compared.
pub fn fingerprint_mismatches(
    session: &KycSession,
    client_ip: Option<&str>,
    user_agent: Option<&str>,
) -> Vec<&'static str> {
    let mut mismatches = Vec::new();
    if let (Some(expected), Some(actual)) = (session.verified_from_ip.as_deref(), client_ip) {
        if expected != actual {
            mismatches.push("ip");
        }
    }
    if let (Some(expected), Some(actual)) = (session.verified_user_agent.as_deref(), user_agent) {
        if expected != actual {
            mismatches.push("user_agent");
        }
    }
    mismatches
}

fn tokens_match(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Clone)]
pub struct CredentialGuard {
    sessions: Arc<dyn SessionStore>,
}

impl CredentialGuard {
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self { sessions }
    }

    pub async fn authorize(&self, request: GuardRequest<'_>) -> Result<SessionAccess, KycError> {
        if let Some(principal) = request.principal {
            return Ok(SessionAccess::Bearer(principal.clone()));
        }

        let token = parse_session_token(request.session_token)?;
        let verification = request
            .verification_token
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(GuardDenial::MissingVerification)?;

        let candidate = self.sessions.find_by_token(&token.to_string()).await?;
        let now = Utc::now();
        if let Err(denial) = decide(verification, candidate.as_ref(), now) {
            tracing::info!(session_token = %token, reason = denial.code(), "KYC session access denied");
            return Err(denial.into());
        }
        let Some(mut session) = candidate else {
            return Err(GuardDenial::InvalidCredentials.into());
        };

        let mismatches = fingerprint_mismatches(&session, request.client_ip, request.user_agent);
        if !mismatches.is_empty() {
            tracing::warn!(
                target: "kyc_security",
                session_id = session.id,
                fields = ?mismatches,
                expected_ip = ?session.verified_from_ip,
                actual_ip = ?request.client_ip,
                "KYC session used from a different fingerprint than it was verified on"
            );
        }

        // Telemetry only: a failed write must not deny the request.
        match self.sessions.touch_activity(session.id, now).await {
            Ok(()) => session.last_activity_date = now,
            Err(e) => tracing::warn!(session_id = session.id, error = %e, "failed to record session activity"),
        }

        Ok(SessionAccess::Verified(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::ports::SessionStore;
    use crate::types::{NewSession, OtpType, VerificationGrant};
    use chrono::Duration;

    async fn verified_session(
        store: &MemoryStore,
        expires_in: Duration,
    ) -> (KycSession, String) {
        let session = store
            .create_session(NewSession {
                session_token: Uuid::new_v4().to_string(),
                user_id: None,
                email: "applicant@example.com".into(),
                mobile_no: None,
                device_fingerprint: None,
            })
            .await
            .unwrap();
        let grant = VerificationGrant {
            otp_type: OtpType::Email,
            verification_token: "v-token-1".into(),
            expires_at: Utc::now() + expires_in,
            client_ip: Some("10.0.0.1".into()),
            user_agent: Some("agent/1".into()),
        };
        store.record_verification(session.id, &grant).await.unwrap();
        let session = store.get_session(session.id).await.unwrap().unwrap();
        (session, grant.verification_token)
    }

    fn guard(store: &Arc<MemoryStore>) -> CredentialGuard {
        CredentialGuard::new(store.clone())
    }

    #[tokio::test]
    async fn bearer_principal_is_allowed_without_session_credentials() {
        let store = Arc::new(MemoryStore::new());
        let principal = Principal::in_process("staff-1", vec!["Checker".into()]);
        let access = guard(&store)
            .authorize(GuardRequest {
                principal: Some(&principal),
                session_token: Some("not-a-uuid"),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(matches!(access, SessionAccess::Bearer(p) if p.actor_id == "staff-1"));
    }

    #[tokio::test]
    async fn missing_or_malformed_identifier_is_denied() {
        let store = Arc::new(MemoryStore::new());
        for token in [None, Some(""), Some("abc")] {
            let err = guard(&store)
                .authorize(GuardRequest {
                    session_token: token,
                    verification_token: Some("x"),
                    ..Default::default()
                })
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                KycError::AuthorizationDenied(GuardDenial::MissingIdentifier)
            ));
        }
    }

    #[tokio::test]
    async fn missing_verification_header_is_denied() {
        let store = Arc::new(MemoryStore::new());
        let (session, _) = verified_session(&store, Duration::minutes(30)).await;
        let err = guard(&store)
            .authorize(GuardRequest {
                session_token: Some(&session.session_token),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KycError::AuthorizationDenied(GuardDenial::MissingVerification)
        ));
    }

    #[tokio::test]
    async fn valid_pair_is_allowed_and_touches_activity() {
        let store = Arc::new(MemoryStore::new());
        let (session, verification) = verified_session(&store, Duration::minutes(30)).await;
        let before = session.last_activity_date;

        let access = guard(&store)
            .authorize(GuardRequest {
                session_token: Some(&session.session_token),
                verification_token: Some(&verification),
                client_ip: Some("10.0.0.1"),
                user_agent: Some("agent/1"),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(matches!(access, SessionAccess::Verified(ref s) if s.id == session.id));

        let stored = store.get_session(session.id).await.unwrap().unwrap();
        assert!(stored.last_activity_date >= before);
    }

    #[tokio::test]
    async fn wrong_verification_token_is_invalid_credentials() {
        let store = Arc::new(MemoryStore::new());
        let (session, _) = verified_session(&store, Duration::minutes(30)).await;
        let err = guard(&store)
            .authorize(GuardRequest {
                session_token: Some(&session.session_token),
                verification_token: Some("v-token-2"),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KycError::AuthorizationDenied(GuardDenial::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn expired_token_is_denied_even_when_values_match() {
        let store = Arc::new(MemoryStore::new());
        let (session, verification) = verified_session(&store, Duration::minutes(-1)).await;
        let err = guard(&store)
            .authorize(GuardRequest {
                session_token: Some(&session.session_token),
                verification_token: Some(&verification),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KycError::AuthorizationDenied(GuardDenial::Expired)
        ));
    }

    #[tokio::test]
    async fn fingerprint_mismatch_is_logged_not_denied() {
        let store = Arc::new(MemoryStore::new());
        let (session, verification) = verified_session(&store, Duration::minutes(30)).await;
        let result = guard(&store)
            .authorize(GuardRequest {
                session_token: Some(&session.session_token),
                verification_token: Some(&verification),
                client_ip: Some("192.168.1.50"),
                user_agent: Some("other-agent"),
                ..Default::default()
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(
            fingerprint_mismatches(&session, Some("192.168.1.50"), Some("other-agent")),
            vec!["ip", "user_agent"]
        );
    }

    #[test]
    fn unverified_email_never_passes() {
        let now = Utc::now();
        let session = KycSession {
            id: 1,
            session_token: Uuid::new_v4().to_string(),
            user_id: None,
            email: "a@b.c".into(),
            mobile_no: None,
            verification_token: Some("tok".into()),
            verification_token_expiry: Some(now + Duration::hours(1)),
            email_verified: false,
            mobile_verified: true,
            current_step: 1,
            last_saved_step: 0,
            form_status: Default::default(),
            verified_from_ip: None,
            verified_user_agent: None,
            device_fingerprint: None,
            created_at: now,
            last_activity_date: now,
        };
        assert_eq!(
            decide("tok", Some(&session), now),
            Err(GuardDenial::InvalidCredentials)
        );
    }

    #[test]
    fn no_candidate_is_invalid_credentials() {
        assert_eq!(
            decide("tok", None, Utc::now()),
            Err(GuardDenial::InvalidCredentials)
        );
    }
}
