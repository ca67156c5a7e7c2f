//! Domain types shared by the guard, the step tracker and the workflow engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type SessionId = i64;
pub type WorkflowId = i64;
pub type RoleId = i64;

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle of the KYC form itself, persisted as its numeric code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormStatus {
    #[default]
    Draft,
    InProgress,
    Submitted,
    UnderReview,
    FullyApproved,
}

impl FormStatus {
    pub fn code(&self) -> i16 {
        match self {
            Self::Draft => 0,
            Self::InProgress => 1,
            Self::Submitted => 2,
            Self::UnderReview => 3,
            Self::FullyApproved => 4,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Self::Draft),
            1 => Some(Self::InProgress),
            2 => Some(Self::Submitted),
            3 => Some(Self::UnderReview),
            4 => Some(Self::FullyApproved),
            _ => None,
        }
    }

    /// Whether the applicant may still edit step data.
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Draft | Self::InProgress)
    }
}

/// One applicant's attempt at the KYC form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KycSession {
    pub id: SessionId,
    /// Opaque handle, safe in URLs, immutable for the session's lifetime
    pub session_token: String,
    /// Set when the session was opened by an authenticated account holder
    pub user_id: Option<String>,
    pub email: String,
    pub mobile_no: Option<String>,
    /// Secret proving email ownership; rotated on every verification
    #[serde(skip_serializing)]
    pub verification_token: Option<String>,
    pub verification_token_expiry: Option<DateTime<Utc>>,
    pub email_verified: bool,
    pub mobile_verified: bool,
    /// 1-based cursor into the step catalog
    pub current_step: i32,
    pub last_saved_step: i32,
    pub form_status: FormStatus,
    /// Fingerprint captured at verification time, used only for anomaly logging
    pub verified_from_ip: Option<String>,
    pub verified_user_agent: Option<String>,
    pub device_fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_date: DateTime<Utc>,
}

/// Fields supplied when a session is first opened.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_token: String,
    pub user_id: Option<String>,
    pub email: String,
    pub mobile_no: Option<String>,
    pub device_fingerprint: Option<String>,
}

/// Result of a successful OTP check, written onto the session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationGrant {
    pub otp_type: OtpType,
    pub verification_token: String,
    pub expires_at: DateTime<Utc>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Steps
// ─────────────────────────────────────────────────────────────────────────────

/// One entry in the global step catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    pub step_number: i32,
    pub step_name: String,
    pub display_order: i32,
    pub is_required: bool,
}

/// Save/completion state of one step for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepCompletion {
    pub session_id: SessionId,
    pub step_number: i32,
    pub is_saved: bool,
    pub is_completed: bool,
    pub saved_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    /// Pointer to the step's domain record, owned by the record sink
    pub record_id: Option<i64>,
}

/// Flags merged into a `StepCompletion` row. Flags only ever turn on.
#[derive(Debug, Clone, Copy)]
pub struct StepUpdate {
    pub mark_saved: bool,
    pub mark_completed: bool,
    pub record_id: Option<i64>,
    pub at: DateTime<Utc>,
}

impl StepCompletion {
    pub fn empty(session_id: SessionId, step_number: i32) -> Self {
        Self {
            session_id,
            step_number,
            is_saved: false,
            is_completed: false,
            saved_date: None,
            completed_date: None,
            record_id: None,
        }
    }

    /// Apply an upsert. Never clears a flag.
    pub fn merge(&mut self, update: &StepUpdate) {
        if update.mark_saved {
            self.is_saved = true;
            self.saved_date = Some(update.at);
        }
        if update.mark_completed && !self.is_completed {
            self.is_completed = true;
            self.completed_date = Some(update.at);
        }
        if update.record_id.is_some() {
            self.record_id = update.record_id;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Roles and approval chains
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: RoleId,
    pub name: String,
}

/// Ordered approver role names for one submitting role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalChainConfig {
    pub role_id: RoleId,
    /// Order is the approval order
    pub approvers: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Workflow
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    InReview,
    Approved,
    Rejected,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InReview => "InReview",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "InReview" => Some(Self::InReview),
            "Approved" => Some(Self::Approved),
            "Rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// One approval run bound to a submitted session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    pub id: WorkflowId,
    pub session_id: SessionId,
    /// Role of the original submitter; selects the governing chain
    pub submitted_role_id: RoleId,
    /// Role whose queue holds the item; `None` only once approved
    pub current_role_id: Option<RoleId>,
    /// Remaining approval hops
    pub pending_level: i32,
    pub status: WorkflowStatus,
    pub last_remarks: Option<String>,
    pub submitted_by: Option<String>,
    /// Optimistic concurrency token, bumped on every committed transition
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a freshly initiated workflow.
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub session_id: SessionId,
    pub submitted_role_id: RoleId,
    pub current_role_id: RoleId,
    pub pending_level: i32,
    pub submitted_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalAction {
    Submitted,
    Approved,
    Rejected,
    Returned,
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "Submitted",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::Returned => "Returned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Submitted" => Some(Self::Submitted),
            "Approved" => Some(Self::Approved),
            "Rejected" => Some(Self::Rejected),
            "Returned" => Some(Self::Returned),
            _ => None,
        }
    }
}

/// Append-only audit row. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalLogEntry {
    pub id: i64,
    pub workflow_id: WorkflowId,
    pub action: ApprovalAction,
    /// `None` for public or system actions
    pub actor_user_id: Option<String>,
    pub from_role_id: Option<RoleId>,
    pub to_role_id: Option<RoleId>,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A log row before the store assigns its id and workflow.
#[derive(Debug, Clone)]
pub struct NewApprovalLog {
    pub action: ApprovalAction,
    pub actor_user_id: Option<String>,
    pub from_role_id: Option<RoleId>,
    pub to_role_id: Option<RoleId>,
    pub remarks: Option<String>,
}

/// Everything one workflow transition writes, committed atomically.
#[derive(Debug, Clone)]
pub struct TransitionCommit {
    /// Target state; `version` must still equal the stored version
    pub next: WorkflowInstance,
    pub log: NewApprovalLog,
    pub session_status: Option<FormStatus>,
}

/// Result of an initiate request against the store.
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    Created(WorkflowInstance),
    AlreadyInReview(WorkflowInstance),
}

// ─────────────────────────────────────────────────────────────────────────────
// OTP
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OtpType {
    Email,
    Mobile,
}

impl OtpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "Email",
            Self::Mobile => "Mobile",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Email" => Some(Self::Email),
            "Mobile" => Some(Self::Mobile),
            _ => None,
        }
    }
}

/// An outstanding one-time code. Only the hash of the code is stored.
#[derive(Debug, Clone)]
pub struct OtpChallenge {
    pub session_id: SessionId,
    pub otp_type: OtpType,
    pub code_hash: String,
    pub expires_at: DateTime<Utc>,
    pub attempts: i32,
    pub consumed: bool,
    pub created_at: DateTime<Utc>,
}

/// Outcome of one check-and-count against a stored challenge. The store
/// evaluates a guess and bumps the counter in a single atomic step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpAttempt {
    Accepted,
    Mismatch { attempts: i32 },
    NotIssued,
    AlreadyUsed,
    Expired,
    Locked,
}

impl OtpChallenge {
    /// Why a guess against this challenge is refused before comparing codes.
    pub fn refusal(&self, max_attempts: i32, now: DateTime<Utc>) -> Option<OtpAttempt> {
        if self.consumed {
            Some(OtpAttempt::AlreadyUsed)
        } else if self.expires_at < now {
            Some(OtpAttempt::Expired)
        } else if self.attempts >= max_attempts {
            Some(OtpAttempt::Locked)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_status_codes_round_trip() {
        for status in [
            FormStatus::Draft,
            FormStatus::InProgress,
            FormStatus::Submitted,
            FormStatus::UnderReview,
            FormStatus::FullyApproved,
        ] {
            assert_eq!(FormStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(FormStatus::from_code(9), None);
    }

    #[test]
    fn step_merge_never_clears_flags() {
        let t0 = Utc::now();
        let mut row = StepCompletion::empty(1, 5);
        row.merge(&StepUpdate {
            mark_saved: true,
            mark_completed: true,
            record_id: Some(42),
            at: t0,
        });
        row.merge(&StepUpdate {
            mark_saved: false,
            mark_completed: false,
            record_id: None,
            at: t0 + chrono::Duration::minutes(5),
        });
        assert!(row.is_saved);
        assert!(row.is_completed);
        assert_eq!(row.record_id, Some(42));
        assert_eq!(row.saved_date, Some(t0));
        assert_eq!(row.completed_date, Some(t0));
    }

    #[test]
    fn verification_token_is_never_serialized() {
        let now = Utc::now();
        let session = KycSession {
            id: 1,
            session_token: "tok".into(),
            user_id: None,
            email: "a@b.c".into(),
            mobile_no: None,
            verification_token: Some("secret".into()),
            verification_token_expiry: None,
            email_verified: true,
            mobile_verified: false,
            current_step: 1,
            last_saved_step: 0,
            form_status: FormStatus::Draft,
            verified_from_ip: None,
            verified_user_agent: None,
            device_fingerprint: None,
            created_at: now,
            last_activity_date: now,
        };
        let json = serde_json::to_string(&session).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("sessionToken"));
    }

    #[test]
    fn challenge_refusals_follow_used_then_expired_then_locked() {
        let now = Utc::now();
        let live = OtpChallenge {
            session_id: 1,
            otp_type: OtpType::Email,
            code_hash: "h".into(),
            expires_at: now + chrono::Duration::minutes(1),
            attempts: 4,
            consumed: false,
            created_at: now,
        };
        assert_eq!(live.refusal(5, now), None);
        assert_eq!(
            OtpChallenge { attempts: 5, ..live.clone() }.refusal(5, now),
            Some(OtpAttempt::Locked)
        );
        let stale = OtpChallenge {
            expires_at: now - chrono::Duration::seconds(1),
            attempts: 5,
            ..live.clone()
        };
        assert_eq!(stale.refusal(5, now), Some(OtpAttempt::Expired));
        let used = OtpChallenge { consumed: true, ..stale };
        assert_eq!(used.refusal(5, now), Some(OtpAttempt::AlreadyUsed));
    }
}
