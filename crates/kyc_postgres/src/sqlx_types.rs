//! Row types decoded by sqlx and converted into kyc_core domain types.
//! Enum-ish columns are stored as text / smallint and validated on the way out.

use chrono::{DateTime, Utc};

use kyc_core::chain::chain_from_json;
use kyc_core::types::*;

pub(crate) const SESSION_COLUMNS: &str = r#"
    session_id, session_token, user_id, email, mobile_no,
    verification_token, verification_token_expiry,
    email_verified, mobile_verified, current_step, last_saved_step, form_status,
    verified_from_ip, verified_user_agent, device_fingerprint,
    created_at, last_activity_date
"#;

pub(crate) const WORKFLOW_COLUMNS: &str = r#"
    workflow_id, session_id, submitted_role_id, current_role_id, pending_level,
    status, last_remarks, submitted_by, version, created_at, updated_at
"#;

pub(crate) const COMPLETION_COLUMNS: &str = r#"
    session_id, step_number, is_saved, is_completed, saved_date, completed_date, record_id
"#;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PgSessionRow {
    pub session_id: i64,
    pub session_token: String,
    pub user_id: Option<String>,
    pub email: String,
    pub mobile_no: Option<String>,
    pub verification_token: Option<String>,
    pub verification_token_expiry: Option<DateTime<Utc>>,
    pub email_verified: bool,
    pub mobile_verified: bool,
    pub current_step: i32,
    pub last_saved_step: i32,
    pub form_status: i16,
    pub verified_from_ip: Option<String>,
    pub verified_user_agent: Option<String>,
    pub device_fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_date: DateTime<Utc>,
}

impl TryFrom<PgSessionRow> for KycSession {
    type Error = String;

    fn try_from(r: PgSessionRow) -> Result<Self, Self::Error> {
        let form_status = FormStatus::from_code(r.form_status)
            .ok_or_else(|| format!("unknown form_status code {}", r.form_status))?;
        Ok(Self {
            id: r.session_id,
            session_token: r.session_token,
            user_id: r.user_id,
            email: r.email,
            mobile_no: r.mobile_no,
            verification_token: r.verification_token,
            verification_token_expiry: r.verification_token_expiry,
            email_verified: r.email_verified,
            mobile_verified: r.mobile_verified,
            current_step: r.current_step,
            last_saved_step: r.last_saved_step,
            form_status,
            verified_from_ip: r.verified_from_ip,
            verified_user_agent: r.verified_user_agent,
            device_fingerprint: r.device_fingerprint,
            created_at: r.created_at,
            last_activity_date: r.last_activity_date,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PgStepDefinitionRow {
    pub step_number: i32,
    pub step_name: String,
    pub display_order: i32,
    pub is_required: bool,
}

impl From<PgStepDefinitionRow> for StepDefinition {
    fn from(r: PgStepDefinitionRow) -> Self {
        Self {
            step_number: r.step_number,
            step_name: r.step_name,
            display_order: r.display_order,
            is_required: r.is_required,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PgCompletionRow {
    pub session_id: i64,
    pub step_number: i32,
    pub is_saved: bool,
    pub is_completed: bool,
    pub saved_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub record_id: Option<i64>,
}

impl From<PgCompletionRow> for StepCompletion {
    fn from(r: PgCompletionRow) -> Self {
        Self {
            session_id: r.session_id,
            step_number: r.step_number,
            is_saved: r.is_saved,
            is_completed: r.is_completed,
            saved_date: r.saved_date,
            completed_date: r.completed_date,
            record_id: r.record_id,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PgChainRow {
    pub role_id: i64,
    pub approvers: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PgChainRow> for ApprovalChainConfig {
    type Error = String;

    fn try_from(r: PgChainRow) -> Result<Self, Self::Error> {
        let approvers = chain_from_json(r.approvers)
            .map_err(|e| format!("approval chain for role {} is malformed: {e}", r.role_id))?;
        Ok(Self {
            role_id: r.role_id,
            approvers,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PgWorkflowRow {
    pub workflow_id: i64,
    pub session_id: i64,
    pub submitted_role_id: i64,
    pub current_role_id: Option<i64>,
    pub pending_level: i32,
    pub status: String,
    pub last_remarks: Option<String>,
    pub submitted_by: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PgWorkflowRow> for WorkflowInstance {
    type Error = String;

    fn try_from(r: PgWorkflowRow) -> Result<Self, Self::Error> {
        let status = WorkflowStatus::parse(&r.status)
            .ok_or_else(|| format!("unknown workflow status '{}'", r.status))?;
        Ok(Self {
            id: r.workflow_id,
            session_id: r.session_id,
            submitted_role_id: r.submitted_role_id,
            current_role_id: r.current_role_id,
            pending_level: r.pending_level,
            status,
            last_remarks: r.last_remarks,
            submitted_by: r.submitted_by,
            version: r.version,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PgLogRow {
    pub log_id: i64,
    pub workflow_id: i64,
    pub action: String,
    pub actor_user_id: Option<String>,
    pub from_role_id: Option<i64>,
    pub to_role_id: Option<i64>,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PgLogRow> for ApprovalLogEntry {
    type Error = String;

    fn try_from(r: PgLogRow) -> Result<Self, Self::Error> {
        let action = ApprovalAction::parse(&r.action)
            .ok_or_else(|| format!("unknown approval action '{}'", r.action))?;
        Ok(Self {
            id: r.log_id,
            workflow_id: r.workflow_id,
            action,
            actor_user_id: r.actor_user_id,
            from_role_id: r.from_role_id,
            to_role_id: r.to_role_id,
            remarks: r.remarks,
            created_at: r.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PgOtpRow {
    pub session_id: i64,
    pub otp_type: String,
    pub code_hash: String,
    pub expires_at: DateTime<Utc>,
    pub attempts: i32,
    pub consumed: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PgOtpRow> for OtpChallenge {
    type Error = String;

    fn try_from(r: PgOtpRow) -> Result<Self, Self::Error> {
        let otp_type =
            OtpType::parse(&r.otp_type).ok_or_else(|| format!("unknown otp type '{}'", r.otp_type))?;
        Ok(Self {
            session_id: r.session_id,
            otp_type,
            code_hash: r.code_hash,
            expires_at: r.expires_at,
            attempts: r.attempts,
            consumed: r.consumed,
            created_at: r.created_at,
        })
    }
}
