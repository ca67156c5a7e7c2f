//! Storage port traits.
//! Implemented by `kyc_postgres` and by [`crate::memory::MemoryStore`]; core
//! logic depends only on these traits.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::KycError;
use crate::step_mapping::StepRecord;
use crate::types::*;

pub type Result<T> = std::result::Result<T, KycError>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a Draft session at step 1.
    async fn create_session(&self, new: NewSession) -> Result<KycSession>;

    async fn get_session(&self, id: SessionId) -> Result<Option<KycSession>>;

    async fn find_by_token(&self, session_token: &str) -> Result<Option<KycSession>>;

    /// Latest session for a user that has not been fully approved.
    async fn find_open_by_user(&self, user_id: &str) -> Result<Option<KycSession>>;

    /// Latest session for an email that has not been fully approved.
    async fn find_open_by_email(&self, email: &str) -> Result<Option<KycSession>>;

    async fn touch_activity(&self, id: SessionId, at: DateTime<Utc>) -> Result<()>;

    /// Store a rotated verification token and the caller fingerprint, and
    /// flip the verified flag matching the OTP type.
    async fn record_verification(&self, id: SessionId, grant: &VerificationGrant) -> Result<()>;

    /// Move the cursor forward on an editable session. Both steps only grow,
    /// and a Draft session becomes InProgress. The status check and the write
    /// happen together; a session that left the editable states in between
    /// fails with `InvalidState` and is left untouched.
    async fn advance_cursor(
        &self,
        id: SessionId,
        current_step: i32,
        last_saved_step: i32,
    ) -> Result<KycSession>;

    /// Raise `current_step` to at least `current_step`, whatever the status.
    async fn resume_cursor(&self, id: SessionId, current_step: i32) -> Result<KycSession>;
}

#[async_trait]
pub trait StepStore: Send + Sync {
    /// The global step catalog, ordered by `display_order`.
    async fn list_steps(&self) -> Result<Vec<StepDefinition>>;

    /// Idempotent upsert keyed by (session, step). Only written while the
    /// session is Draft or InProgress, otherwise `InvalidState`.
    async fn upsert_step(
        &self,
        session_id: SessionId,
        step_number: i32,
        update: StepUpdate,
    ) -> Result<StepCompletion>;

    async fn list_completions(&self, session_id: SessionId) -> Result<Vec<StepCompletion>>;
}

/// Persists mapped step payloads into the applicant record. The record layout
/// belongs to an external collaborator; only the returned id is tracked here.
/// Writes are refused with `InvalidState` once the session is not editable.
#[async_trait]
pub trait StepRecordSink: Send + Sync {
    async fn store_step_record(
        &self,
        session_id: SessionId,
        step_number: i32,
        record: &StepRecord,
    ) -> Result<i64>;
}

/// Read-only view of the role table (role CRUD lives elsewhere).
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn role_by_id(&self, id: RoleId) -> Result<Option<Role>>;

    /// Exact, case-sensitive name match.
    async fn role_by_name(&self, name: &str) -> Result<Option<Role>>;
}

#[async_trait]
pub trait ChainConfigStore: Send + Sync {
    async fn get_chain(&self, role_id: RoleId) -> Result<Option<ApprovalChainConfig>>;

    /// The config with the lowest role id, if any exists.
    async fn first_chain(&self) -> Result<Option<ApprovalChainConfig>>;

    async fn upsert_chain(&self, config: &ApprovalChainConfig) -> Result<()>;

    async fn list_chains(&self) -> Result<Vec<ApprovalChainConfig>>;
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Atomically create an InReview instance, append its first log row and
    /// write the session status. If the session already has an InReview
    /// instance nothing is written and that instance is returned.
    async fn create_in_review(
        &self,
        new: NewWorkflow,
        log: NewApprovalLog,
        session_status: FormStatus,
    ) -> Result<CreateOutcome>;

    async fn get_workflow(&self, id: WorkflowId) -> Result<Option<WorkflowInstance>>;

    /// Most recently created instance for a session, in any status.
    async fn latest_for_session(&self, session_id: SessionId)
        -> Result<Option<WorkflowInstance>>;

    /// Atomically apply a transition. Fails with `Conflict` when the stored
    /// version no longer equals `commit.next.version`; nothing is written then.
    async fn commit_transition(&self, commit: &TransitionCommit) -> Result<WorkflowInstance>;

    /// InReview instances queued at a role, oldest first.
    async fn pending_for_role(&self, role_id: RoleId) -> Result<Vec<WorkflowInstance>>;

    /// Log rows for a workflow in insertion order.
    async fn history(&self, workflow_id: WorkflowId) -> Result<Vec<ApprovalLogEntry>>;
}

#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Store a fresh challenge. An outstanding challenge of the same type is
    /// only replaced when it is consumed or was created at or before
    /// `replace_before`; otherwise nothing is written and `false` is returned.
    async fn put_challenge(
        &self,
        challenge: &OtpChallenge,
        replace_before: DateTime<Utc>,
    ) -> Result<bool>;

    /// Check a guess and count it in one step. A matching hash consumes the
    /// challenge, so two racing correct guesses yield one `Accepted`.
    async fn attempt(
        &self,
        session_id: SessionId,
        otp_type: OtpType,
        code_hash: &str,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<OtpAttempt>;
}

/// Sends a one-time code to the applicant (SMTP/SMS live elsewhere).
#[async_trait]
pub trait OtpDelivery: Send + Sync {
    async fn deliver(&self, session: &KycSession, otp_type: OtpType, code: &str) -> Result<()>;
}

/// Every port the core needs, bundled for wiring at startup.
#[derive(Clone)]
pub struct KycStores {
    pub sessions: Arc<dyn SessionStore>,
    pub steps: Arc<dyn StepStore>,
    pub records: Arc<dyn StepRecordSink>,
    pub roles: Arc<dyn RoleDirectory>,
    pub chains: Arc<dyn ChainConfigStore>,
    pub workflows: Arc<dyn WorkflowStore>,
    pub otps: Arc<dyn OtpStore>,
}
