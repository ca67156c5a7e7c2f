use serde::Serialize;
use thiserror::Error;

/// Why the credential guard refused a session-scoped request.
///
/// Each kind is surfaced to the caller with its own code so the frontend can
/// branch (an `Expired` denial re-triggers the OTP flow, for instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardDenial {
    MissingIdentifier,
    MissingVerification,
    InvalidCredentials,
    Expired,
}

impl GuardDenial {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingIdentifier => "MISSING_IDENTIFIER",
            Self::MissingVerification => "MISSING_VERIFICATION",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::Expired => "SESSION_EXPIRED",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::MissingIdentifier => "session identifier missing or invalid",
            Self::MissingVerification => "verification credentials required",
            Self::InvalidCredentials => "invalid session credentials",
            Self::Expired => "session expired, verify again",
        }
    }
}

impl std::fmt::Display for GuardDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, Error)]
pub enum KycError {
    #[error("access denied: {0}")]
    AuthorizationDenied(GuardDenial),

    #[error("authentication required")]
    Unauthenticated,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("unsupported step: {0}")]
    UnsupportedStep(i32),

    #[error("no approval chain configured: {0}")]
    ConfigurationMissing(String),

    #[error("role not found: {0}")]
    RoleNotFound(String),

    #[error("role '{role}' is not part of the approval chain")]
    RoleNotInChain { role: String },

    #[error("no approval step precedes '{role}'")]
    NoPreviousStep { role: String },

    #[error("too many requests: {0}")]
    RateLimited(String),

    #[error("invalid workflow state: {0}")]
    InvalidState(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<GuardDenial> for KycError {
    fn from(denial: GuardDenial) -> Self {
        Self::AuthorizationDenied(denial)
    }
}

impl KycError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::AuthorizationDenied(_) | Self::Unauthenticated => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) | Self::InvalidState(_) => 409,
            Self::Validation(_) | Self::UnsupportedStep(_) => 400,
            Self::RoleNotFound(_) | Self::RoleNotInChain { .. } | Self::NoPreviousStep { .. } => {
                422
            }
            Self::RateLimited(_) => 429,
            Self::ConfigurationMissing(_) => 503,
            Self::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code for the failure envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthorizationDenied(denial) => denial.code(),
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Validation(_) => "VALIDATION",
            Self::UnsupportedStep(_) => "UNSUPPORTED_STEP",
            Self::ConfigurationMissing(_) => "CONFIGURATION_MISSING",
            Self::RoleNotFound(_) => "ROLE_NOT_FOUND",
            Self::RoleNotInChain { .. } => "ROLE_NOT_IN_CHAIN",
            Self::NoPreviousStep { .. } => "NO_PREVIOUS_STEP",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::RateLimited(_) => "RATE_LIMITED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── http_status ──────────────────────────────────────────────

    #[test]
    fn guard_denials_are_401() {
        for denial in [
            GuardDenial::MissingIdentifier,
            GuardDenial::MissingVerification,
            GuardDenial::InvalidCredentials,
            GuardDenial::Expired,
        ] {
            assert_eq!(KycError::AuthorizationDenied(denial).http_status(), 401);
        }
    }

    #[test]
    fn configuration_missing_is_not_a_user_error() {
        let err = KycError::ConfigurationMissing("role 7".into());
        assert_eq!(err.http_status(), 503);
        assert_eq!(err.code(), "CONFIGURATION_MISSING");
    }

    #[test]
    fn conflict_and_invalid_state_are_409() {
        assert_eq!(KycError::Conflict("x".into()).http_status(), 409);
        assert_eq!(KycError::InvalidState("x".into()).http_status(), 409);
    }

    #[test]
    fn rate_limited_is_429() {
        let err = KycError::RateLimited("wait".into());
        assert_eq!(err.http_status(), 429);
        assert_eq!(err.code(), "RATE_LIMITED");
    }

    #[test]
    fn internal_is_500() {
        assert_eq!(KycError::Internal(anyhow::anyhow!("boom")).http_status(), 500);
    }

    // ── codes and display ────────────────────────────────────────

    #[test]
    fn guard_denial_codes_are_distinct() {
        let codes = [
            GuardDenial::MissingIdentifier.code(),
            GuardDenial::MissingVerification.code(),
            GuardDenial::InvalidCredentials.code(),
            GuardDenial::Expired.code(),
        ];
        let mut deduped = codes.to_vec();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), codes.len());
    }

    #[test]
    fn display_authorization_denied() {
        let err: KycError = GuardDenial::Expired.into();
        assert_eq!(err.to_string(), "access denied: session expired, verify again");
    }

    #[test]
    fn display_role_not_in_chain() {
        let err = KycError::RoleNotInChain {
            role: "Checker".into(),
        };
        assert_eq!(
            err.to_string(),
            "role 'Checker' is not part of the approval chain"
        );
    }
}
