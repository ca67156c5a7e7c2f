//! In-memory implementation of every storage port.
//!
//! Backs the unit tests and the server's dev mode (no database URL). All
//! tables sit behind one `RwLock`, so each port call is atomic just like a
//! Postgres transaction.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::error::KycError;
use crate::ports::*;
use crate::progress::default_step_catalog;
use crate::step_mapping::StepRecord;
use crate::types::*;

#[derive(Default)]
struct Sequences {
    session: i64,
    record: i64,
    role: i64,
    workflow: i64,
    log: i64,
}

fn next(seq: &mut i64) -> i64 {
    *seq += 1;
    *seq
}

#[derive(Default)]
struct MemoryState {
    seq: Sequences,
    sessions: BTreeMap<SessionId, KycSession>,
    steps: Vec<StepDefinition>,
    completions: BTreeMap<(SessionId, i32), StepCompletion>,
    records: HashMap<(SessionId, i32), (i64, StepRecord)>,
    roles: BTreeMap<RoleId, Role>,
    chains: BTreeMap<RoleId, ApprovalChainConfig>,
    workflows: BTreeMap<WorkflowId, WorkflowInstance>,
    log: Vec<ApprovalLogEntry>,
    otps: HashMap<(SessionId, OtpType), OtpChallenge>,
}

impl MemoryState {
    fn session_mut(&mut self, id: SessionId) -> Result<&mut KycSession> {
        self.sessions
            .get_mut(&id)
            .ok_or_else(|| KycError::not_found(format!("session {id}")))
    }

    fn editable_mut(&mut self, id: SessionId) -> Result<&mut KycSession> {
        let session = self.session_mut(id)?;
        if !session.form_status.is_editable() {
            return Err(KycError::InvalidState(format!(
                "session {id} is {:?} and can no longer be edited",
                session.form_status
            )));
        }
        Ok(session)
    }

    fn append_log(&mut self, workflow_id: WorkflowId, log: &NewApprovalLog, at: DateTime<Utc>) {
        let id = next(&mut self.seq.log);
        self.log.push(ApprovalLogEntry {
            id,
            workflow_id,
            action: log.action,
            actor_user_id: log.actor_user_id.clone(),
            from_role_id: log.from_role_id,
            to_role_id: log.to_role_id,
            remarks: log.remarks.clone(),
            created_at: at,
        });
    }

    fn latest_open(&self, matches: impl Fn(&KycSession) -> bool) -> Option<KycSession> {
        self.sessions
            .values()
            .rev()
            .find(|s| s.form_status != FormStatus::FullyApproved && matches(s))
            .cloned()
    }
}

pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Empty store seeded with the default step catalog.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState {
                steps: default_step_catalog(),
                ..Default::default()
            }),
        }
    }

    /// Seeds roles `User`, `Checker`, `RBBSec`, `Admin` (ids 1..=4) and the
    /// chain `User -> [Checker, RBBSec]`.
    pub async fn with_demo_roles() -> Self {
        let store = Self::new();
        for name in ["User", "Checker", "RBBSec", "Admin"] {
            store.add_role(name).await;
        }
        store
            .put_chain(1, vec!["Checker".into(), "RBBSec".into()])
            .await;
        store
    }

    pub async fn add_role(&self, name: &str) -> Role {
        let mut state = self.state.write().await;
        let role = Role {
            id: next(&mut state.seq.role),
            name: name.to_string(),
        };
        state.roles.insert(role.id, role.clone());
        role
    }

    pub async fn rename_role(&self, id: RoleId, name: &str) {
        if let Some(role) = self.state.write().await.roles.get_mut(&id) {
            role.name = name.to_string();
        }
    }

    pub async fn remove_role(&self, id: RoleId) {
        self.state.write().await.roles.remove(&id);
    }

    /// Write a chain without validation, e.g. to seed broken configs.
    pub async fn put_chain(&self, role_id: RoleId, approvers: Vec<String>) {
        self.state.write().await.chains.insert(
            role_id,
            ApprovalChainConfig {
                role_id,
                approvers,
                updated_at: Utc::now(),
            },
        );
    }

    /// Force a session's status, e.g. to put it out of the applicant's reach.
    pub async fn set_form_status(&self, id: SessionId, status: FormStatus) {
        if let Some(session) = self.state.write().await.sessions.get_mut(&id) {
            session.form_status = status;
        }
    }

    /// The mapped record last stored for a step.
    pub async fn step_record(&self, session_id: SessionId, step_number: i32) -> Option<StepRecord> {
        self.state
            .read()
            .await
            .records
            .get(&(session_id, step_number))
            .map(|(_, record)| record.clone())
    }

    /// Every port, backed by this one store.
    pub fn stores(self: Arc<Self>) -> KycStores {
        KycStores {
            sessions: self.clone(),
            steps: self.clone(),
            records: self.clone(),
            roles: self.clone(),
            chains: self.clone(),
            workflows: self.clone(),
            otps: self,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, new: NewSession) -> Result<KycSession> {
        let mut state = self.state.write().await;
        if state
            .sessions
            .values()
            .any(|s| s.session_token == new.session_token)
        {
            return Err(KycError::Conflict("session token already in use".into()));
        }
        let now = Utc::now();
        let session = KycSession {
            id: next(&mut state.seq.session),
            session_token: new.session_token,
            user_id: new.user_id,
            email: new.email,
            mobile_no: new.mobile_no,
            verification_token: None,
            verification_token_expiry: None,
            email_verified: false,
            mobile_verified: false,
            current_step: 1,
            last_saved_step: 0,
            form_status: FormStatus::Draft,
            verified_from_ip: None,
            verified_user_agent: None,
            device_fingerprint: new.device_fingerprint,
            created_at: now,
            last_activity_date: now,
        };
        state.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<KycSession>> {
        Ok(self.state.read().await.sessions.get(&id).cloned())
    }

    async fn find_by_token(&self, session_token: &str) -> Result<Option<KycSession>> {
        Ok(self
            .state
            .read()
            .await
            .sessions
            .values()
            .find(|s| s.session_token == session_token)
            .cloned())
    }

    async fn find_open_by_user(&self, user_id: &str) -> Result<Option<KycSession>> {
        Ok(self
            .state
            .read()
            .await
            .latest_open(|s| s.user_id.as_deref() == Some(user_id)))
    }

    async fn find_open_by_email(&self, email: &str) -> Result<Option<KycSession>> {
        Ok(self.state.read().await.latest_open(|s| s.email == email))
    }

    async fn touch_activity(&self, id: SessionId, at: DateTime<Utc>) -> Result<()> {
        self.state.write().await.session_mut(id)?.last_activity_date = at;
        Ok(())
    }

    async fn record_verification(&self, id: SessionId, grant: &VerificationGrant) -> Result<()> {
        let mut state = self.state.write().await;
        let session = state.session_mut(id)?;
        session.verification_token = Some(grant.verification_token.clone());
        session.verification_token_expiry = Some(grant.expires_at);
        session.verified_from_ip = grant.client_ip.clone();
        session.verified_user_agent = grant.user_agent.clone();
        match grant.otp_type {
            OtpType::Email => session.email_verified = true,
            OtpType::Mobile => session.mobile_verified = true,
        }
        session.last_activity_date = Utc::now();
        Ok(())
    }

    async fn advance_cursor(
        &self,
        id: SessionId,
        current_step: i32,
        last_saved_step: i32,
    ) -> Result<KycSession> {
        let mut state = self.state.write().await;
        let session = state.editable_mut(id)?;
        session.current_step = session.current_step.max(current_step);
        session.last_saved_step = session.last_saved_step.max(last_saved_step);
        session.form_status = FormStatus::InProgress;
        session.last_activity_date = Utc::now();
        Ok(session.clone())
    }

    async fn resume_cursor(&self, id: SessionId, current_step: i32) -> Result<KycSession> {
        let mut state = self.state.write().await;
        let session = state.session_mut(id)?;
        session.current_step = session.current_step.max(current_step);
        Ok(session.clone())
    }
}

#[async_trait]
impl StepStore for MemoryStore {
    async fn list_steps(&self) -> Result<Vec<StepDefinition>> {
        let mut steps = self.state.read().await.steps.clone();
        steps.sort_by_key(|s| s.display_order);
        Ok(steps)
    }

    async fn upsert_step(
        &self,
        session_id: SessionId,
        step_number: i32,
        update: StepUpdate,
    ) -> Result<StepCompletion> {
        let mut state = self.state.write().await;
        state.editable_mut(session_id)?;
        let row = state
            .completions
            .entry((session_id, step_number))
            .or_insert_with(|| StepCompletion::empty(session_id, step_number));
        row.merge(&update);
        Ok(row.clone())
    }

    async fn list_completions(&self, session_id: SessionId) -> Result<Vec<StepCompletion>> {
        Ok(self
            .state
            .read()
            .await
            .completions
            .range((session_id, i32::MIN)..=(session_id, i32::MAX))
            .map(|(_, row)| row.clone())
            .collect())
    }
}

#[async_trait]
impl StepRecordSink for MemoryStore {
    async fn store_step_record(
        &self,
        session_id: SessionId,
        step_number: i32,
        record: &StepRecord,
    ) -> Result<i64> {
        let mut state = self.state.write().await;
        state.editable_mut(session_id)?;
        let existing = state
            .records
            .get(&(session_id, step_number))
            .map(|(id, _)| *id);
        let id = match existing {
            Some(id) => id,
            None => next(&mut state.seq.record),
        };
        state
            .records
            .insert((session_id, step_number), (id, record.clone()));
        Ok(id)
    }
}

#[async_trait]
impl RoleDirectory for MemoryStore {
    async fn role_by_id(&self, id: RoleId) -> Result<Option<Role>> {
        Ok(self.state.read().await.roles.get(&id).cloned())
    }

    async fn role_by_name(&self, name: &str) -> Result<Option<Role>> {
        Ok(self
            .state
            .read()
            .await
            .roles
            .values()
            .find(|r| r.name == name)
            .cloned())
    }
}

#[async_trait]
impl ChainConfigStore for MemoryStore {
    async fn get_chain(&self, role_id: RoleId) -> Result<Option<ApprovalChainConfig>> {
        Ok(self.state.read().await.chains.get(&role_id).cloned())
    }

    async fn first_chain(&self) -> Result<Option<ApprovalChainConfig>> {
        Ok(self.state.read().await.chains.values().next().cloned())
    }

    async fn upsert_chain(&self, config: &ApprovalChainConfig) -> Result<()> {
        self.state
            .write()
            .await
            .chains
            .insert(config.role_id, config.clone());
        Ok(())
    }

    async fn list_chains(&self) -> Result<Vec<ApprovalChainConfig>> {
        Ok(self.state.read().await.chains.values().cloned().collect())
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn create_in_review(
        &self,
        new: NewWorkflow,
        log: NewApprovalLog,
        session_status: FormStatus,
    ) -> Result<CreateOutcome> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .workflows
            .values()
            .find(|w| w.session_id == new.session_id && w.status == WorkflowStatus::InReview)
        {
            return Ok(CreateOutcome::AlreadyInReview(existing.clone()));
        }
        state.session_mut(new.session_id)?.form_status = session_status;

        let now = Utc::now();
        let instance = WorkflowInstance {
            id: next(&mut state.seq.workflow),
            session_id: new.session_id,
            submitted_role_id: new.submitted_role_id,
            current_role_id: Some(new.current_role_id),
            pending_level: new.pending_level,
            status: WorkflowStatus::InReview,
            last_remarks: None,
            submitted_by: new.submitted_by,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        state.workflows.insert(instance.id, instance.clone());
        state.append_log(instance.id, &log, now);
        Ok(CreateOutcome::Created(instance))
    }

    async fn get_workflow(&self, id: WorkflowId) -> Result<Option<WorkflowInstance>> {
        Ok(self.state.read().await.workflows.get(&id).cloned())
    }

    async fn latest_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Option<WorkflowInstance>> {
        Ok(self
            .state
            .read()
            .await
            .workflows
            .values()
            .rev()
            .find(|w| w.session_id == session_id)
            .cloned())
    }

    async fn commit_transition(&self, commit: &TransitionCommit) -> Result<WorkflowInstance> {
        let mut state = self.state.write().await;
        let id = commit.next.id;
        let stored_version = state
            .workflows
            .get(&id)
            .map(|w| w.version)
            .ok_or_else(|| KycError::not_found(format!("workflow {id}")))?;
        if stored_version != commit.next.version {
            return Err(KycError::Conflict(format!(
                "workflow {id} was modified concurrently"
            )));
        }
        if let Some(status) = commit.session_status {
            state.session_mut(commit.next.session_id)?.form_status = status;
        }

        let now = Utc::now();
        let mut next = commit.next.clone();
        next.version += 1;
        next.updated_at = now;
        state.workflows.insert(id, next.clone());
        state.append_log(id, &commit.log, now);
        Ok(next)
    }

    async fn pending_for_role(&self, role_id: RoleId) -> Result<Vec<WorkflowInstance>> {
        let mut pending: Vec<_> = self
            .state
            .read()
            .await
            .workflows
            .values()
            .filter(|w| {
                w.status == WorkflowStatus::InReview && w.current_role_id == Some(role_id)
            })
            .cloned()
            .collect();
        pending.sort_by_key(|w| (w.created_at, w.id));
        Ok(pending)
    }

    async fn history(&self, workflow_id: WorkflowId) -> Result<Vec<ApprovalLogEntry>> {
        Ok(self
            .state
            .read()
            .await
            .log
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OtpStore for MemoryStore {
    async fn put_challenge(
        &self,
        challenge: &OtpChallenge,
        replace_before: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let key = (challenge.session_id, challenge.otp_type);
        if let Some(existing) = state.otps.get(&key) {
            if !existing.consumed && existing.created_at > replace_before {
                return Ok(false);
            }
        }
        state.otps.insert(key, challenge.clone());
        Ok(true)
    }

    async fn attempt(
        &self,
        session_id: SessionId,
        otp_type: OtpType,
        code_hash: &str,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<OtpAttempt> {
        let mut state = self.state.write().await;
        let Some(challenge) = state.otps.get_mut(&(session_id, otp_type)) else {
            return Ok(OtpAttempt::NotIssued);
        };
        if let Some(refusal) = challenge.refusal(max_attempts, now) {
            return Ok(refusal);
        }
        challenge.attempts += 1;
        if challenge.code_hash == code_hash {
            challenge.consumed = true;
            Ok(OtpAttempt::Accepted)
        } else {
            Ok(OtpAttempt::Mismatch {
                attempts: challenge.attempts,
            })
        }
    }
}

/// Delivery that keeps the last code per session so tests can read it back.
#[derive(Default)]
pub struct RecordingDelivery {
    codes: Mutex<HashMap<SessionId, String>>,
}

impl RecordingDelivery {
    pub async fn last_code(&self, session_id: SessionId) -> Option<String> {
        self.codes.lock().await.get(&session_id).cloned()
    }
}

#[async_trait]
impl OtpDelivery for RecordingDelivery {
    async fn deliver(&self, session: &KycSession, _otp_type: OtpType, code: &str) -> Result<()> {
        self.codes
            .lock()
            .await
            .insert(session.id, code.to_string());
        Ok(())
    }
}
