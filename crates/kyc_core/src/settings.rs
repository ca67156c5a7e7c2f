use chrono::Duration;

/// Deployment knobs consumed by the core services.
#[derive(Debug, Clone)]
pub struct KycSettings {
    /// Lifetime of a verification token after a successful OTP check
    pub verification_ttl: Duration,
    /// Lifetime of an issued OTP code
    pub otp_ttl: Duration,
    /// Wrong guesses allowed before a code is burned
    pub otp_max_attempts: i32,
    /// Minimum gap before an unused code may be replaced by a new one
    pub otp_resend_cooldown: Duration,
    /// Role a submission is filed under when nobody is logged in
    pub public_submitter_role: String,
    /// Role whose chain is used when the submitter's role has none
    pub default_chain_role: String,
    /// Role allowed to act on any queue and edit chain configs
    pub admin_role: String,
}

impl Default for KycSettings {
    fn default() -> Self {
        Self {
            verification_ttl: Duration::minutes(120),
            otp_ttl: Duration::minutes(10),
            otp_max_attempts: 5,
            otp_resend_cooldown: Duration::seconds(60),
            public_submitter_role: "User".to_string(),
            default_chain_role: "User".to_string(),
            admin_role: "Admin".to_string(),
        }
    }
}
