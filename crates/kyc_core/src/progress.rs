//! Step progress tracking for a KYC session.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::KycError;
use crate::ports::{Result, SessionStore, StepRecordSink, StepStore};
use crate::step_mapping::StepMapperRegistry;
use crate::types::{FormStatus, KycSession, SessionId, StepCompletion, StepDefinition, StepUpdate};

/// The individual KYC form: (step number, name, required).
const DEFAULT_STEPS: &[(i32, &str, bool)] = &[
    (1, "Personal Information", true),
    (2, "Current Address", true),
    (3, "Permanent Address", true),
    (4, "Family Details", true),
    (5, "Occupation", true),
    (6, "Financial Details", true),
    (7, "Bank Account", true),
    (8, "Nominee", false),
    (9, "Identity Document", true),
    (10, "Photo and Signature", true),
    (11, "Beneficial Owner", false),
    (12, "PEP Declaration", true),
    (13, "Consent", true),
    (14, "Review and Submit", true),
];

pub fn default_step_catalog() -> Vec<StepDefinition> {
    DEFAULT_STEPS
        .iter()
        .map(|&(step_number, name, is_required)| StepDefinition {
            step_number,
            step_name: name.to_string(),
            display_order: step_number,
            is_required,
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub session_token: String,
    pub email: String,
    pub email_verified: bool,
    pub mobile_verified: bool,
    pub current_step: i32,
    pub last_saved_step: i32,
    pub form_status: FormStatus,
    pub completed_steps: usize,
    pub total_steps: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepProgress {
    pub step_number: i32,
    pub step_name: String,
    pub display_order: i32,
    pub is_required: bool,
    pub is_saved: bool,
    pub is_completed: bool,
    pub saved_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub record_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FormProgress {
    pub session: SessionSummary,
    pub steps: Vec<StepProgress>,
}

/// Result of a save or complete call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub step: StepCompletion,
    pub current_step: i32,
    pub last_saved_step: i32,
    pub form_status: FormStatus,
}

/// Join the catalog with a session's completion rows, in display order.
/// Steps without a row are reported as neither saved nor completed.
pub fn build_progress(
    session: &KycSession,
    catalog: &[StepDefinition],
    completions: &[StepCompletion],
) -> FormProgress {
    let by_step: HashMap<i32, &StepCompletion> =
        completions.iter().map(|c| (c.step_number, c)).collect();
    let mut ordered: Vec<&StepDefinition> = catalog.iter().collect();
    ordered.sort_by_key(|d| d.display_order);

    let steps: Vec<StepProgress> = ordered
        .into_iter()
        .map(|def| {
            let row = by_step.get(&def.step_number);
            StepProgress {
                step_number: def.step_number,
                step_name: def.step_name.clone(),
                display_order: def.display_order,
                is_required: def.is_required,
                is_saved: row.is_some_and(|r| r.is_saved),
                is_completed: row.is_some_and(|r| r.is_completed),
                saved_date: row.and_then(|r| r.saved_date),
                completed_date: row.and_then(|r| r.completed_date),
                record_id: row.and_then(|r| r.record_id),
            }
        })
        .collect();

    FormProgress {
        session: SessionSummary {
            session_id: session.id,
            session_token: session.session_token.clone(),
            email: session.email.clone(),
            email_verified: session.email_verified,
            mobile_verified: session.mobile_verified,
            current_step: session.current_step,
            last_saved_step: session.last_saved_step,
            form_status: session.form_status,
            completed_steps: steps.iter().filter(|s| s.is_completed).count(),
            total_steps: steps.len(),
        },
        steps,
    }
}

/// `max(stored cursor, highest completed step + 1)`, clamped to the last step.
pub fn resume_step(current_step: i32, completions: &[StepCompletion], last_step: i32) -> i32 {
    let after_completed = completions
        .iter()
        .filter(|c| c.is_completed)
        .map(|c| c.step_number + 1)
        .max()
        .unwrap_or(1);
    current_step.max(after_completed).clamp(1, last_step.max(1))
}

/// The step a cursor moves to after completing `step_number`.
fn step_after(catalog: &[StepDefinition], step_number: i32) -> i32 {
    let mut ordered: Vec<&StepDefinition> = catalog.iter().collect();
    ordered.sort_by_key(|d| d.display_order);
    ordered
        .iter()
        .position(|d| d.step_number == step_number)
        .and_then(|i| ordered.get(i + 1))
        .map_or(step_number, |d| d.step_number)
}

#[derive(Clone)]
pub struct StepTracker {
    sessions: Arc<dyn SessionStore>,
    steps: Arc<dyn StepStore>,
    records: Arc<dyn StepRecordSink>,
    mappers: Arc<StepMapperRegistry>,
}

impl StepTracker {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        steps: Arc<dyn StepStore>,
        records: Arc<dyn StepRecordSink>,
        mappers: Arc<StepMapperRegistry>,
    ) -> Self {
        Self {
            sessions,
            steps,
            records,
            mappers,
        }
    }

    /// Map and persist one step's payload, then mark the step saved (and
    /// optionally completed).
    pub async fn save_step(
        &self,
        session_id: SessionId,
        step_number: i32,
        payload: &Value,
        mark_completed: bool,
    ) -> Result<StepOutcome> {
        self.ensure_editable(session_id).await?;
        let catalog = self.catalog_with(step_number).await?;

        let record = self.mappers.map(step_number, payload)?;
        let record_id = self
            .records
            .store_step_record(session_id, step_number, &record)
            .await?;

        let step = self
            .steps
            .upsert_step(
                session_id,
                step_number,
                StepUpdate {
                    mark_saved: true,
                    mark_completed,
                    record_id: Some(record_id),
                    at: Utc::now(),
                },
            )
            .await?;
        tracing::debug!(session_id, step_number, record_id, fields = record.len(), "step saved");

        self.advance(session_id, &catalog, step).await
    }

    pub async fn complete_step(&self, session_id: SessionId, step_number: i32) -> Result<StepOutcome> {
        self.ensure_editable(session_id).await?;
        let catalog = self.catalog_with(step_number).await?;
        let step = self
            .steps
            .upsert_step(
                session_id,
                step_number,
                StepUpdate {
                    mark_saved: false,
                    mark_completed: true,
                    record_id: None,
                    at: Utc::now(),
                },
            )
            .await?;
        tracing::debug!(session_id, step_number, "step completed");

        self.advance(session_id, &catalog, step).await
    }

    pub async fn get_progress(&self, session_id: SessionId) -> Result<FormProgress> {
        let session = self.load_session(session_id).await?;
        let catalog = self.steps.list_steps().await?;
        let completions = self.steps.list_completions(session_id).await?;
        Ok(build_progress(&session, &catalog, &completions))
    }

    /// Move the cursor past every completed step and persist it if it moved.
    pub async fn resume(&self, session_id: SessionId) -> Result<KycSession> {
        let mut session = self.load_session(session_id).await?;
        let catalog = self.steps.list_steps().await?;
        let completions = self.steps.list_completions(session_id).await?;
        let last_step = catalog.iter().map(|d| d.step_number).max().unwrap_or(1);

        let resumed = resume_step(session.current_step, &completions, last_step);
        if resumed != session.current_step {
            let from = session.current_step;
            session = self.sessions.resume_cursor(session_id, resumed).await?;
            tracing::info!(session_id, from, to = session.current_step, "session cursor resumed");
        }
        Ok(session)
    }

    /// The stored session is re-checked by the cursor write, so a submission
    /// that lands between the editability check and here wins.
    async fn advance(
        &self,
        session_id: SessionId,
        catalog: &[StepDefinition],
        step: StepCompletion,
    ) -> Result<StepOutcome> {
        let target = if step.is_completed {
            step_after(catalog, step.step_number)
        } else {
            step.step_number
        };
        let saved = if step.is_saved { step.step_number } else { 0 };
        let session = self
            .sessions
            .advance_cursor(session_id, target, saved)
            .await?;
        Ok(StepOutcome {
            step,
            current_step: session.current_step,
            last_saved_step: session.last_saved_step,
            form_status: session.form_status,
        })
    }

    async fn load_session(&self, id: SessionId) -> Result<KycSession> {
        self.sessions
            .get_session(id)
            .await?
            .ok_or_else(|| KycError::not_found(format!("session {id}")))
    }

    /// Early refusal before mapping a payload. The writes re-check the status.
    async fn ensure_editable(&self, id: SessionId) -> Result<()> {
        let session = self.load_session(id).await?;
        if !session.form_status.is_editable() {
            return Err(KycError::InvalidState(format!(
                "session {id} is {:?} and can no longer be edited",
                session.form_status
            )));
        }
        Ok(())
    }

    async fn catalog_with(&self, step_number: i32) -> Result<Vec<StepDefinition>> {
        let catalog = self.steps.list_steps().await?;
        if !catalog.iter().any(|d| d.step_number == step_number) {
            return Err(KycError::UnsupportedStep(step_number));
        }
        Ok(catalog)
    }
}
