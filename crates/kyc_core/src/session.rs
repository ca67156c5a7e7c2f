//! Session store service: opening and re-opening KYC sessions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::KycError;
use crate::ports::{Result, SessionStore};
use crate::types::{KycSession, NewSession, SessionId};

/// Who is opening the form.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    #[serde(skip)]
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub mobile_no: Option<String>,
    pub user_agent: Option<String>,
    pub device_fingerprint: Option<String>,
}

/// Response body of the initiate-session endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub session_token: String,
    pub email_verified: bool,
    pub current_step: i32,
}

impl From<&KycSession> for SessionHandle {
    fn from(session: &KycSession) -> Self {
        Self {
            session_id: session.id,
            session_token: session.session_token.clone(),
            email_verified: session.email_verified,
            current_step: session.current_step,
        }
    }
}

#[derive(Clone)]
pub struct SessionService {
    sessions: Arc<dyn SessionStore>,
}

impl SessionService {
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self { sessions }
    }

    /// Return the caller's open session, creating one if none exists.
    ///
    /// Idempotent by user id when present, otherwise by email. Sessions that
    /// were already fully approved are never reused.
    pub async fn get_or_create_session(&self, request: SessionRequest) -> Result<KycSession> {
        let email = request.email.as_deref().map(normalize_email).transpose()?;

        if let Some(user_id) = request.user_id.as_deref() {
            if let Some(existing) = self.sessions.find_open_by_user(user_id).await? {
                return Ok(existing);
            }
        } else if let Some(email) = email.as_deref() {
            if let Some(existing) = self.sessions.find_open_by_email(email).await? {
                return Ok(existing);
            }
        } else {
            return Err(KycError::Validation(
                "either an authenticated user or an email is required".into(),
            ));
        }

        let email = email.ok_or_else(|| KycError::Validation("email is required".into()))?;
        let session = self
            .sessions
            .create_session(NewSession {
                session_token: Uuid::new_v4().to_string(),
                user_id: request.user_id.clone(),
                email,
                mobile_no: request.mobile_no.filter(|m| !m.trim().is_empty()),
                device_fingerprint: request.device_fingerprint,
            })
            .await?;

        tracing::info!(
            session_id = session.id,
            authenticated = session.user_id.is_some(),
            user_agent = ?request.user_agent,
            "KYC session created"
        );
        Ok(session)
    }

    pub async fn get(&self, id: SessionId) -> Result<KycSession> {
        self.sessions
            .get_session(id)
            .await?
            .ok_or_else(|| KycError::not_found(format!("session {id}")))
    }

    pub async fn get_by_token(&self, session_token: &str) -> Result<KycSession> {
        self.sessions
            .find_by_token(session_token)
            .await?
            .ok_or_else(|| KycError::not_found("session"))
    }
}

fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(KycError::Validation(format!("invalid email address: {raw}"))),
    }
}
