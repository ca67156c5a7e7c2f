use std::collections::HashMap;

use crate::error::KycError;

/// An authenticated caller, built from a validated bearer token.
///
/// The server middleware constructs this; core logic never reads raw JWTs.
#[derive(Debug, Clone)]
pub struct Principal {
    pub actor_id: String,
    /// Role names, primary role first.
    pub roles: Vec<String>,
    pub email: Option<String>,
    pub claims: HashMap<String, String>,
}

impl Principal {
    /// Construct from validated JWT claims at the server boundary.
    pub fn from_jwt_claims(claims: &JwtClaims) -> Result<Self, KycError> {
        let actor_id = claims
            .sub
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or(KycError::Unauthenticated)?;
        Ok(Self {
            actor_id,
            roles: claims.roles.clone().unwrap_or_default(),
            email: claims.email.clone(),
            claims: claims
                .extra
                .iter()
                .map(|(k, v)| match v {
                    serde_json::Value::String(s) => (k.clone(), s.clone()),
                    other => (k.clone(), other.to_string()),
                })
                .collect(),
        })
    }

    /// Construct explicitly for in-process callers and tests.
    pub fn in_process(actor_id: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            roles,
            email: None,
            claims: HashMap::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// The role a submission made by this caller is filed under.
    pub fn primary_role(&self) -> Option<&str> {
        self.roles.first().map(String::as_str)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn require_role(&self, role: &str) -> Result<(), KycError> {
        if self.has_role(role) {
            Ok(())
        } else {
            Err(KycError::Forbidden(format!(
                "{} does not hold role {}",
                self.actor_id, role
            )))
        }
    }
}

/// JWT claims shape expected from the identity provider.
#[derive(Debug, serde::Deserialize)]
pub struct JwtClaims {
    pub sub: Option<String>,
    pub roles: Option<Vec<String>>,
    pub email: Option<String>,
    /// Everything else (`exp`, `iat`, ...), kept for auditing
    #[serde(flatten, default)]
    pub extra: HashMap<String, serde_json::Value>,
}
