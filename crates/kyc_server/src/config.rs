//! Server configuration from the environment.
//!
//!   KYC_DATABASE_URL              Postgres URL; unset runs on in-memory stores
//!   KYC_DB_MAX_CONNECTIONS        pool size (default 10)
//!   KYC_JWT_SECRET                HMAC secret for bearer tokens (required)
//!   KYC_BIND_ADDR                 listen address (default 0.0.0.0:4200)
//!   KYC_VERIFICATION_TTL_MINUTES  verification token lifetime (default 120)
//!   KYC_OTP_TTL_MINUTES           OTP code lifetime (default 10)
//!   KYC_OTP_MAX_ATTEMPTS          wrong guesses per code (default 5)
//!   KYC_OTP_RESEND_COOLDOWN_SECONDS  gap before an unused code is replaced (default 60, 0 disables)
//!   KYC_PUBLIC_SUBMITTER_ROLE     role for anonymous submissions (default User)
//!   KYC_DEFAULT_CHAIN_ROLE        fallback chain role (default User)
//!   KYC_ADMIN_ROLE                role allowed to edit chains (default Admin)

use std::str::FromStr;

use anyhow::{bail, Context};
use chrono::Duration;
use kyc_core::settings::KycSettings;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:4200";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    pub bind_addr: String,
    pub settings: KycSettings,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = get("KYC_JWT_SECRET").context("KYC_JWT_SECRET must be set")?;
        let defaults = KycSettings::default();
        let settings = KycSettings {
            verification_ttl: minutes(
                get("KYC_VERIFICATION_TTL_MINUTES"),
                "KYC_VERIFICATION_TTL_MINUTES",
                defaults.verification_ttl,
            )?,
            otp_ttl: minutes(get("KYC_OTP_TTL_MINUTES"), "KYC_OTP_TTL_MINUTES", defaults.otp_ttl)?,
            otp_max_attempts: parsed(
                get("KYC_OTP_MAX_ATTEMPTS"),
                "KYC_OTP_MAX_ATTEMPTS",
                defaults.otp_max_attempts,
            )?,
            otp_resend_cooldown: seconds(
                get("KYC_OTP_RESEND_COOLDOWN_SECONDS"),
                "KYC_OTP_RESEND_COOLDOWN_SECONDS",
                defaults.otp_resend_cooldown,
            )?,
            public_submitter_role: get("KYC_PUBLIC_SUBMITTER_ROLE")
                .unwrap_or(defaults.public_submitter_role),
            default_chain_role: get("KYC_DEFAULT_CHAIN_ROLE").unwrap_or(defaults.default_chain_role),
            admin_role: get("KYC_ADMIN_ROLE").unwrap_or(defaults.admin_role),
        };

        Ok(Self {
            database_url: get("KYC_DATABASE_URL"),
            db_max_connections: parsed(get("KYC_DB_MAX_CONNECTIONS"), "KYC_DB_MAX_CONNECTIONS", 10)?,
            jwt_secret,
            bind_addr: get("KYC_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            settings,
        })
    }
}

fn parsed<T>(raw: Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(v) => v
            .trim()
            .parse()
            .with_context(|| format!("{key} is not a valid number: {v}")),
        None => Ok(default),
    }
}

fn minutes(raw: Option<String>, key: &str, default: Duration) -> anyhow::Result<Duration> {
    match raw {
        Some(_) => {
            let n: i64 = parsed(raw, key, 0)?;
            if n <= 0 {
                bail!("{key} must be positive, got {n}");
            }
            Ok(Duration::minutes(n))
        }
        None => Ok(default),
    }
}

fn seconds(raw: Option<String>, key: &str, default: Duration) -> anyhow::Result<Duration> {
    match raw {
        Some(_) => {
            let n: i64 = parsed(raw, key, 0)?;
            if n < 0 {
                bail!("{key} must not be negative, got {n}");
            }
            Ok(Duration::seconds(n))
        }
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> anyhow::Result<ServerConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_apply() {
        let cfg = config(&[("KYC_JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(cfg.bind_addr, DEFAULT_BIND_ADDR);
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.db_max_connections, 10);
        assert_eq!(cfg.settings.verification_ttl, Duration::minutes(120));
        assert_eq!(cfg.settings.otp_ttl, Duration::minutes(10));
        assert_eq!(cfg.settings.admin_role, "Admin");
        assert_eq!(cfg.settings.otp_resend_cooldown, Duration::seconds(60));
    }

    #[test]
    fn resend_cooldown_may_be_disabled_but_not_negative() {
        let cfg = config(&[
            ("KYC_JWT_SECRET", "s3cret"),
            ("KYC_OTP_RESEND_COOLDOWN_SECONDS", "0"),
        ])
        .unwrap();
        assert_eq!(cfg.settings.otp_resend_cooldown, Duration::zero());
        assert!(config(&[
            ("KYC_JWT_SECRET", "s3cret"),
            ("KYC_OTP_RESEND_COOLDOWN_SECONDS", "-5"),
        ])
        .is_err());
    }

    #[test]
    fn secret_is_required() {
        let err = config(&[]).unwrap_err();
        assert!(err.to_string().contains("KYC_JWT_SECRET"));
        assert!(config(&[("KYC_JWT_SECRET", "  ")]).is_err());
    }

    #[test]
    fn overrides_are_read() {
        let cfg = config(&[
            ("KYC_JWT_SECRET", "s3cret"),
            ("KYC_DATABASE_URL", "postgres://localhost/kyc"),
            ("KYC_VERIFICATION_TTL_MINUTES", "30"),
            ("KYC_PUBLIC_SUBMITTER_ROLE", "Applicant"),
        ])
        .unwrap();
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/kyc"));
        assert_eq!(cfg.settings.verification_ttl, Duration::minutes(30));
        assert_eq!(cfg.settings.public_submitter_role, "Applicant");
    }

    #[test]
    fn bad_numbers_are_rejected() {
        assert!(config(&[("KYC_JWT_SECRET", "x"), ("KYC_OTP_TTL_MINUTES", "ten")]).is_err());
        assert!(config(&[("KYC_JWT_SECRET", "x"), ("KYC_OTP_TTL_MINUTES", "0")]).is_err());
    }
}
