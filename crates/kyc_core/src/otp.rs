//! One-time-code verification of email / mobile ownership.
//!
//! A successful check rotates the session's verification token, which is what
//! the credential guard later accepts alongside the session token.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::KycError;
use crate::ports::{OtpDelivery, OtpStore, Result, SessionStore};
use crate::settings::KycSettings;
use crate::types::{KycSession, OtpAttempt, OtpChallenge, OtpType, SessionId, VerificationGrant};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpRequest {
    pub session_id: SessionId,
    pub otp_code: String,
    pub otp_type: OtpType,
}

/// Returned to the applicant after a successful check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedSession {
    pub session_id: SessionId,
    pub session_token: String,
    pub verification_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct OtpService {
    sessions: Arc<dyn SessionStore>,
    otps: Arc<dyn OtpStore>,
    delivery: Arc<dyn OtpDelivery>,
    settings: KycSettings,
}

impl OtpService {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        otps: Arc<dyn OtpStore>,
        delivery: Arc<dyn OtpDelivery>,
        settings: KycSettings,
    ) -> Self {
        Self {
            sessions,
            otps,
            delivery,
            settings,
        }
    }

    /// Issue a fresh code, replacing any outstanding one of the same type.
    /// An unused code younger than the resend cooldown is left in place and
    /// the call fails with `RateLimited`.
    pub async fn issue(&self, session_id: SessionId, otp_type: OtpType) -> Result<DateTime<Utc>> {
        let session = self.load_session(session_id).await?;
        if otp_type == OtpType::Mobile && session.mobile_no.is_none() {
            return Err(KycError::Validation(
                "session has no mobile number to verify".into(),
            ));
        }

        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32));
        let now = Utc::now();
        let expires_at = now + self.settings.otp_ttl;
        let stored = self
            .otps
            .put_challenge(
                &OtpChallenge {
                    session_id,
                    otp_type,
                    code_hash: hash_code(&code),
                    expires_at,
                    attempts: 0,
                    consumed: false,
                    created_at: now,
                },
                now - self.settings.otp_resend_cooldown,
            )
            .await?;
        if !stored {
            tracing::info!(session_id, otp_type = otp_type.as_str(), "OTP resend inside cooldown");
            return Err(KycError::RateLimited(format!(
                "a code was sent recently, wait {} seconds before requesting another",
                self.settings.otp_resend_cooldown.num_seconds()
            )));
        }
        self.delivery.deliver(&session, otp_type, &code).await?;

        tracing::info!(session_id, otp_type = otp_type.as_str(), "OTP issued");
        Ok(expires_at)
    }

    /// Check a code and, on success, rotate the verification token and
    /// capture the caller's fingerprint.
    pub async fn verify(
        &self,
        request: &VerifyOtpRequest,
        client_ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<VerifiedSession> {
        let session = self.load_session(request.session_id).await?;
        let now = Utc::now();
        let outcome = self
            .otps
            .attempt(
                request.session_id,
                request.otp_type,
                &hash_code(request.otp_code.trim()),
                self.settings.otp_max_attempts,
                now,
            )
            .await?;
        let refusal = match outcome {
            OtpAttempt::Accepted => None,
            OtpAttempt::Mismatch { attempts } => {
                tracing::info!(session_id = request.session_id, attempts, "OTP mismatch");
                Some("incorrect verification code")
            }
            OtpAttempt::NotIssued => Some("no verification code was issued"),
            OtpAttempt::AlreadyUsed => Some("verification code already used"),
            OtpAttempt::Expired => Some("verification code expired"),
            OtpAttempt::Locked => Some("too many attempts, request a new code"),
        };
        if let Some(message) = refusal {
            return Err(KycError::Validation(message.into()));
        }

        let grant = VerificationGrant {
            otp_type: request.otp_type,
            verification_token: new_verification_token(),
            expires_at: now + self.settings.verification_ttl,
            client_ip: client_ip.map(String::from),
            user_agent: user_agent.map(String::from),
        };
        self.sessions
            .record_verification(session.id, &grant)
            .await?;

        tracing::info!(
            session_id = session.id,
            otp_type = request.otp_type.as_str(),
            "KYC session verified"
        );
        Ok(VerifiedSession {
            session_id: session.id,
            session_token: session.session_token,
            verification_token: grant.verification_token,
            expires_at: grant.expires_at,
        })
    }

    async fn load_session(&self, id: SessionId) -> Result<KycSession> {
        self.sessions
            .get_session(id)
            .await?
            .ok_or_else(|| KycError::not_found(format!("session {id}")))
    }
}

fn hash_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

fn new_verification_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Delivery used when no mail/SMS gateway is wired: records that a code was
/// issued without ever logging the code itself.
pub struct LogOnlyDelivery;

#[async_trait]
impl OtpDelivery for LogOnlyDelivery {
    async fn deliver(&self, session: &KycSession, otp_type: OtpType, _code: &str) -> Result<()> {
        tracing::warn!(
            session_id = session.id,
            otp_type = otp_type.as_str(),
            "no OTP delivery gateway configured; code was not sent"
        );
        Ok(())
    }
}
