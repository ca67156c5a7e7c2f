//! Postgres implementations of all kyc_core port traits.
//!
//! Each adapter is a newtype wrapping PgPool. All SQL is runtime-checked
//! (sqlx::query, not sqlx::query!) to avoid compile-time DB requirement.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use kyc_core::chain::chain_to_json;
use kyc_core::error::KycError;
use kyc_core::ports::*;
use kyc_core::step_mapping::StepRecord;
use kyc_core::types::*;

use crate::sqlx_types::*;

fn decode<R, T>(row: R) -> Result<T>
where
    T: TryFrom<R, Error = String>,
{
    T::try_from(row).map_err(|e| KycError::Internal(anyhow!(e)))
}

fn decode_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = String>,
{
    rows.into_iter().map(decode).collect()
}

/// Explain why a write gated on an editable session matched no row.
async fn not_editable(pool: &PgPool, id: SessionId) -> KycError {
    let status = sqlx::query_scalar::<_, i16>("SELECT form_status FROM kyc.sessions WHERE session_id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await;
    match status {
        Ok(Some(code)) => KycError::InvalidState(format!(
            "session {id} is {:?} and can no longer be edited",
            FormStatus::from_code(code).unwrap_or(FormStatus::Submitted)
        )),
        Ok(None) => KycError::not_found(format!("session {id}")),
        Err(e) => KycError::Internal(anyhow!(e)),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Bundle every Postgres adapter over one pool.
pub fn pg_stores(pool: PgPool) -> KycStores {
    KycStores {
        sessions: Arc::new(PgSessionStore::new(pool.clone())),
        steps: Arc::new(PgStepStore::new(pool.clone())),
        records: Arc::new(PgStepRecordSink::new(pool.clone())),
        roles: Arc::new(PgRoleDirectory::new(pool.clone())),
        chains: Arc::new(PgChainConfigStore::new(pool.clone())),
        workflows: Arc::new(PgWorkflowStore::new(pool.clone())),
        otps: Arc::new(PgOtpStore::new(pool)),
    }
}

// ── PgSessionStore ────────────────────────────────────────────

pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        predicate: &str,
        value: &str,
    ) -> Result<Option<KycSession>> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM kyc.sessions WHERE {predicate} \
             ORDER BY session_id DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, PgSessionRow>(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        row.map(decode).transpose()
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create_session(&self, new: NewSession) -> Result<KycSession> {
        let query = format!(
            "INSERT INTO kyc.sessions (session_token, user_id, email, mobile_no, device_fingerprint) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PgSessionRow>(&query)
            .bind(&new.session_token)
            .bind(&new.user_id)
            .bind(&new.email)
            .bind(&new.mobile_no)
            .bind(&new.device_fingerprint)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    KycError::Conflict("session token already in use".into())
                } else {
                    KycError::Internal(anyhow!(e))
                }
            })?;
        decode(row)
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<KycSession>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM kyc.sessions WHERE session_id = $1");
        let row = sqlx::query_as::<_, PgSessionRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        row.map(decode).transpose()
    }

    async fn find_by_token(&self, session_token: &str) -> Result<Option<KycSession>> {
        self.fetch_one_where("session_token = $1", session_token).await
    }

    async fn find_open_by_user(&self, user_id: &str) -> Result<Option<KycSession>> {
        self.fetch_one_where("user_id = $1 AND form_status <> 4", user_id)
            .await
    }

    async fn find_open_by_email(&self, email: &str) -> Result<Option<KycSession>> {
        self.fetch_one_where("email = $1 AND form_status <> 4", email)
            .await
    }

    async fn touch_activity(&self, id: SessionId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE kyc.sessions SET last_activity_date = $2 WHERE session_id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn record_verification(&self, id: SessionId, grant: &VerificationGrant) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE kyc.sessions
            SET verification_token = $2,
                verification_token_expiry = $3,
                verified_from_ip = $4,
                verified_user_agent = $5,
                email_verified = email_verified OR $6,
                mobile_verified = mobile_verified OR $7,
                last_activity_date = now()
            WHERE session_id = $1
            "#,
        )
        .bind(id)
        .bind(&grant.verification_token)
        .bind(grant.expires_at)
        .bind(&grant.client_ip)
        .bind(&grant.user_agent)
        .bind(grant.otp_type == OtpType::Email)
        .bind(grant.otp_type == OtpType::Mobile)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        if result.rows_affected() == 0 {
            return Err(KycError::not_found(format!("session {id}")));
        }
        Ok(())
    }

    async fn advance_cursor(
        &self,
        id: SessionId,
        current_step: i32,
        last_saved_step: i32,
    ) -> Result<KycSession> {
        let query = format!(
            r#"
            UPDATE kyc.sessions
            SET current_step = GREATEST(current_step, $2),
                last_saved_step = GREATEST(last_saved_step, $3),
                form_status = $4,
                last_activity_date = now()
            WHERE session_id = $1 AND form_status IN ($5, $4)
            RETURNING {SESSION_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, PgSessionRow>(&query)
            .bind(id)
            .bind(current_step)
            .bind(last_saved_step)
            .bind(FormStatus::InProgress.code())
            .bind(FormStatus::Draft.code())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        match row {
            Some(row) => decode(row),
            None => Err(not_editable(&self.pool, id).await),
        }
    }

    async fn resume_cursor(&self, id: SessionId, current_step: i32) -> Result<KycSession> {
        let query = format!(
            r#"
            UPDATE kyc.sessions
            SET current_step = GREATEST(current_step, $2)
            WHERE session_id = $1
            RETURNING {SESSION_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, PgSessionRow>(&query)
            .bind(id)
            .bind(current_step)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        row.map(decode)
            .transpose()?
            .ok_or_else(|| KycError::not_found(format!("session {id}")))
    }
}

// ── PgStepStore ───────────────────────────────────────────────

pub struct PgStepStore {
    pool: PgPool,
}

impl PgStepStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StepStore for PgStepStore {
    async fn list_steps(&self) -> Result<Vec<StepDefinition>> {
        let rows = sqlx::query_as::<_, PgStepDefinitionRow>(
            r#"
            SELECT step_number, step_name, display_order, is_required
            FROM kyc.step_definitions
            ORDER BY display_order, step_number
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn upsert_step(
        &self,
        session_id: SessionId,
        step_number: i32,
        update: StepUpdate,
    ) -> Result<StepCompletion> {
        // Flags only ever turn on; the first completion date sticks. The
        // share lock holds off a status change until this row is written.
        let query = format!(
            r#"
            WITH editable AS (
                SELECT session_id FROM kyc.sessions
                WHERE session_id = $1 AND form_status IN ($8, $9)
                FOR SHARE
            )
            INSERT INTO kyc.step_completions AS sc
                (session_id, step_number, is_saved, is_completed, saved_date, completed_date, record_id)
            SELECT editable.session_id, $2, $3, $4, $5, $6, $7 FROM editable
            ON CONFLICT (session_id, step_number) DO UPDATE SET
                is_saved = sc.is_saved OR EXCLUDED.is_saved,
                saved_date = COALESCE(EXCLUDED.saved_date, sc.saved_date),
                is_completed = sc.is_completed OR EXCLUDED.is_completed,
                completed_date = CASE WHEN sc.is_completed THEN sc.completed_date
                                      ELSE EXCLUDED.completed_date END,
                record_id = COALESCE(EXCLUDED.record_id, sc.record_id)
            RETURNING {COMPLETION_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, PgCompletionRow>(&query)
            .bind(session_id)
            .bind(step_number)
            .bind(update.mark_saved)
            .bind(update.mark_completed)
            .bind(update.mark_saved.then_some(update.at))
            .bind(update.mark_completed.then_some(update.at))
            .bind(update.record_id)
            .bind(FormStatus::Draft.code())
            .bind(FormStatus::InProgress.code())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        match row {
            Some(row) => Ok(row.into()),
            None => Err(not_editable(&self.pool, session_id).await),
        }
    }

    async fn list_completions(&self, session_id: SessionId) -> Result<Vec<StepCompletion>> {
        let query = format!(
            "SELECT {COMPLETION_COLUMNS} FROM kyc.step_completions \
             WHERE session_id = $1 ORDER BY step_number"
        );
        let rows = sqlx::query_as::<_, PgCompletionRow>(&query)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// ── PgStepRecordSink ──────────────────────────────────────────

/// Stores mapped step payloads as JSONB, one row per (session, step).
pub struct PgStepRecordSink {
    pool: PgPool,
}

impl PgStepRecordSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StepRecordSink for PgStepRecordSink {
    async fn store_step_record(
        &self,
        session_id: SessionId,
        step_number: i32,
        record: &StepRecord,
    ) -> Result<i64> {
        let record_id = sqlx::query_scalar::<_, i64>(
            r#"
            WITH editable AS (
                SELECT session_id FROM kyc.sessions
                WHERE session_id = $1 AND form_status IN ($4, $5)
                FOR SHARE
            )
            INSERT INTO kyc.step_records (session_id, step_number, fields)
            SELECT editable.session_id, $2, $3 FROM editable
            ON CONFLICT (session_id, step_number)
            DO UPDATE SET fields = EXCLUDED.fields, updated_at = now()
            RETURNING record_id
            "#,
        )
        .bind(session_id)
        .bind(step_number)
        .bind(serde_json::Value::Object(record.clone()))
        .bind(FormStatus::Draft.code())
        .bind(FormStatus::InProgress.code())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        match record_id {
            Some(id) => Ok(id),
            None => Err(not_editable(&self.pool, session_id).await),
        }
    }
}

// ── PgRoleDirectory ───────────────────────────────────────────

pub struct PgRoleDirectory {
    pool: PgPool,
}

impl PgRoleDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleDirectory for PgRoleDirectory {
    async fn role_by_id(&self, id: RoleId) -> Result<Option<Role>> {
        let row = sqlx::query_as::<_, (i64, String)>(
            "SELECT role_id, role_name FROM kyc.roles WHERE role_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(row.map(|(id, name)| Role { id, name }))
    }

    async fn role_by_name(&self, name: &str) -> Result<Option<Role>> {
        let row = sqlx::query_as::<_, (i64, String)>(
            "SELECT role_id, role_name FROM kyc.roles WHERE role_name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(row.map(|(id, name)| Role { id, name }))
    }
}

// ── PgChainConfigStore ────────────────────────────────────────

pub struct PgChainConfigStore {
    pool: PgPool,
}

impl PgChainConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChainConfigStore for PgChainConfigStore {
    async fn get_chain(&self, role_id: RoleId) -> Result<Option<ApprovalChainConfig>> {
        let row = sqlx::query_as::<_, PgChainRow>(
            "SELECT role_id, approvers, updated_at FROM kyc.approval_chains WHERE role_id = $1",
        )
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        row.map(decode).transpose()
    }

    async fn first_chain(&self) -> Result<Option<ApprovalChainConfig>> {
        let row = sqlx::query_as::<_, PgChainRow>(
            "SELECT role_id, approvers, updated_at FROM kyc.approval_chains \
             ORDER BY role_id LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        row.map(decode).transpose()
    }

    async fn upsert_chain(&self, config: &ApprovalChainConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kyc.approval_chains (role_id, approvers, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (role_id)
            DO UPDATE SET approvers = EXCLUDED.approvers, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(config.role_id)
        .bind(chain_to_json(&config.approvers))
        .bind(config.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn list_chains(&self) -> Result<Vec<ApprovalChainConfig>> {
        let rows = sqlx::query_as::<_, PgChainRow>(
            "SELECT role_id, approvers, updated_at FROM kyc.approval_chains ORDER BY role_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        decode_all(rows)
    }
}

// ── PgWorkflowStore ───────────────────────────────────────────

/// Workflow instances and the append-only approval log. Every write path
/// runs in one transaction together with the session status update.
pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn in_review_for_session(&self, session_id: SessionId) -> Result<Option<WorkflowInstance>> {
        let query = format!(
            "SELECT {WORKFLOW_COLUMNS} FROM kyc.workflow_instances \
             WHERE session_id = $1 AND status = 'InReview'"
        );
        let row = sqlx::query_as::<_, PgWorkflowRow>(&query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        row.map(decode).transpose()
    }
}

async fn append_log(
    tx: &mut Transaction<'_, Postgres>,
    workflow_id: WorkflowId,
    log: &NewApprovalLog,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO kyc.approval_log
            (workflow_id, action, actor_user_id, from_role_id, to_role_id, remarks)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(workflow_id)
    .bind(log.action.as_str())
    .bind(&log.actor_user_id)
    .bind(log.from_role_id)
    .bind(log.to_role_id)
    .bind(&log.remarks)
    .execute(&mut **tx)
    .await
    .map_err(|e| anyhow!(e))?;
    Ok(())
}

async fn set_form_status(
    tx: &mut Transaction<'_, Postgres>,
    session_id: SessionId,
    status: FormStatus,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE kyc.sessions SET form_status = $2, last_activity_date = now() WHERE session_id = $1",
    )
    .bind(session_id)
    .bind(status.code())
    .execute(&mut **tx)
    .await
    .map_err(|e| anyhow!(e))?;
    if result.rows_affected() == 0 {
        return Err(KycError::not_found(format!("session {session_id}")));
    }
    Ok(())
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn create_in_review(
        &self,
        new: NewWorkflow,
        log: NewApprovalLog,
        session_status: FormStatus,
    ) -> Result<CreateOutcome> {
        if let Some(existing) = self.in_review_for_session(new.session_id).await? {
            return Ok(CreateOutcome::AlreadyInReview(existing));
        }

        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;
        let query = format!(
            r#"
            INSERT INTO kyc.workflow_instances
                (session_id, submitted_role_id, current_role_id, pending_level, status, submitted_by)
            VALUES ($1, $2, $3, $4, 'InReview', $5)
            RETURNING {WORKFLOW_COLUMNS}
            "#
        );
        let inserted = sqlx::query_as::<_, PgWorkflowRow>(&query)
            .bind(new.session_id)
            .bind(new.submitted_role_id)
            .bind(new.current_role_id)
            .bind(new.pending_level)
            .bind(&new.submitted_by)
            .fetch_one(&mut *tx)
            .await;
        let row = match inserted {
            Ok(row) => row,
            Err(e) if is_unique_violation(&e) => {
                // Lost the race against a concurrent initiate: report theirs.
                drop(tx);
                return match self.in_review_for_session(new.session_id).await? {
                    Some(existing) => Ok(CreateOutcome::AlreadyInReview(existing)),
                    None => Err(KycError::Conflict(format!(
                        "session {} changed while initiating",
                        new.session_id
                    ))),
                };
            }
            Err(e) => return Err(KycError::Internal(anyhow!(e))),
        };
        let instance: WorkflowInstance = decode(row)?;

        append_log(&mut tx, instance.id, &log).await?;
        set_form_status(&mut tx, new.session_id, session_status).await?;
        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(CreateOutcome::Created(instance))
    }

    async fn get_workflow(&self, id: WorkflowId) -> Result<Option<WorkflowInstance>> {
        let query = format!(
            "SELECT {WORKFLOW_COLUMNS} FROM kyc.workflow_instances WHERE workflow_id = $1"
        );
        let row = sqlx::query_as::<_, PgWorkflowRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        row.map(decode).transpose()
    }

    async fn latest_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Option<WorkflowInstance>> {
        let query = format!(
            "SELECT {WORKFLOW_COLUMNS} FROM kyc.workflow_instances \
             WHERE session_id = $1 ORDER BY workflow_id DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, PgWorkflowRow>(&query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        row.map(decode).transpose()
    }

    async fn commit_transition(&self, commit: &TransitionCommit) -> Result<WorkflowInstance> {
        let next = &commit.next;
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;

        let query = format!(
            r#"
            UPDATE kyc.workflow_instances
            SET current_role_id = $2, pending_level = $3, status = $4, last_remarks = $5,
                version = version + 1, updated_at = now()
            WHERE workflow_id = $1 AND version = $6
            RETURNING {WORKFLOW_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, PgWorkflowRow>(&query)
            .bind(next.id)
            .bind(next.current_role_id)
            .bind(next.pending_level)
            .bind(next.status.as_str())
            .bind(&next.last_remarks)
            .bind(next.version)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;
        let Some(row) = row else {
            drop(tx);
            return match self.get_workflow(next.id).await? {
                Some(_) => Err(KycError::Conflict(format!(
                    "workflow {} was modified concurrently",
                    next.id
                ))),
                None => Err(KycError::not_found(format!("workflow {}", next.id))),
            };
        };
        let updated: WorkflowInstance = decode(row)?;

        append_log(&mut tx, updated.id, &commit.log).await?;
        if let Some(status) = commit.session_status {
            set_form_status(&mut tx, updated.session_id, status).await?;
        }
        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(updated)
    }

    async fn pending_for_role(&self, role_id: RoleId) -> Result<Vec<WorkflowInstance>> {
        let query = format!(
            "SELECT {WORKFLOW_COLUMNS} FROM kyc.workflow_instances \
             WHERE current_role_id = $1 AND status = 'InReview' \
             ORDER BY created_at, workflow_id"
        );
        let rows = sqlx::query_as::<_, PgWorkflowRow>(&query)
            .bind(role_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        decode_all(rows)
    }

    async fn history(&self, workflow_id: WorkflowId) -> Result<Vec<ApprovalLogEntry>> {
        let rows = sqlx::query_as::<_, PgLogRow>(
            r#"
            SELECT log_id, workflow_id, action, actor_user_id,
                   from_role_id, to_role_id, remarks, created_at
            FROM kyc.approval_log
            WHERE workflow_id = $1
            ORDER BY log_id
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        decode_all(rows)
    }
}

// ── PgOtpStore ────────────────────────────────────────────────

pub struct PgOtpStore {
    pool: PgPool,
}

impl PgOtpStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OtpStore for PgOtpStore {
    async fn put_challenge(
        &self,
        challenge: &OtpChallenge,
        replace_before: DateTime<Utc>,
    ) -> Result<bool> {
        let stored = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO kyc.otp_challenges AS oc
                (session_id, otp_type, code_hash, expires_at, attempts, consumed, created_at)
            VALUES ($1, $2, $3, $4, 0, FALSE, $5)
            ON CONFLICT (session_id, otp_type) DO UPDATE SET
                code_hash = EXCLUDED.code_hash,
                expires_at = EXCLUDED.expires_at,
                attempts = 0,
                consumed = FALSE,
                created_at = EXCLUDED.created_at
            WHERE oc.consumed OR oc.created_at <= $6
            RETURNING session_id
            "#,
        )
        .bind(challenge.session_id)
        .bind(challenge.otp_type.as_str())
        .bind(&challenge.code_hash)
        .bind(challenge.expires_at)
        .bind(challenge.created_at)
        .bind(replace_before)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(stored.is_some())
    }

    async fn attempt(
        &self,
        session_id: SessionId,
        otp_type: OtpType,
        code_hash: &str,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<OtpAttempt> {
        // The row lock taken by the UPDATE serializes racing guesses; each
        // one sees the counter left by the previous.
        let counted = sqlx::query_as::<_, (i32, bool)>(
            r#"
            UPDATE kyc.otp_challenges
            SET attempts = attempts + 1, consumed = (code_hash = $3)
            WHERE session_id = $1 AND otp_type = $2
              AND NOT consumed AND attempts < $4 AND expires_at >= $5
            RETURNING attempts, consumed
            "#,
        )
        .bind(session_id)
        .bind(otp_type.as_str())
        .bind(code_hash)
        .bind(max_attempts)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;

        match counted {
            Some((_, true)) => Ok(OtpAttempt::Accepted),
            Some((attempts, false)) => Ok(OtpAttempt::Mismatch { attempts }),
            None => match self.get_challenge(session_id, otp_type).await? {
                None => Ok(OtpAttempt::NotIssued),
                // A fresh code replaced the one this guess was aimed at.
                Some(challenge) => Ok(challenge
                    .refusal(max_attempts, now)
                    .unwrap_or(OtpAttempt::Expired)),
            },
        }
    }
}

impl PgOtpStore {
    async fn get_challenge(
        &self,
        session_id: SessionId,
        otp_type: OtpType,
    ) -> Result<Option<OtpChallenge>> {
        let row = sqlx::query_as::<_, PgOtpRow>(
            r#"
            SELECT session_id, otp_type, code_hash, expires_at, attempts, consumed, created_at
            FROM kyc.otp_challenges
            WHERE session_id = $1 AND otp_type = $2
            "#,
        )
        .bind(session_id)
        .bind(otp_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        row.map(decode).transpose()
    }
}
