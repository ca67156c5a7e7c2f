//! Multi-level approval workflow over submitted KYC sessions.
//!
//! ```text
//!            initiate                 approve (last role)
//!  (none) ──────────────► InReview ─────────────────────► Approved
//!                          │  ▲  │
//!          approve (next)  └──┘  │ reject
//!          return to previous    ▼
//!                              Rejected ──(resubmit: new instance)──► InReview
//! ```
//!
//! Every transition is computed here and handed to the store as one
//! [`TransitionCommit`], which applies it atomically or not at all.

use std::sync::Arc;

use serde::Serialize;

use crate::chain::ChainResolver;
use crate::error::KycError;
use crate::ports::{Result, RoleDirectory, SessionStore, WorkflowStore};
use crate::principal::Principal;
use crate::settings::KycSettings;
use crate::types::*;

/// Where an approval at a given chain position leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalHop<'a> {
    Advance { to: &'a str },
    Final,
}

/// Index of `role_name` in the chain, by exact match.
pub fn chain_position(chain: &[String], role_name: &str) -> Result<usize> {
    chain
        .iter()
        .position(|r| r == role_name)
        .ok_or_else(|| KycError::RoleNotInChain {
            role: role_name.to_string(),
        })
}

pub fn approval_hop(chain: &[String], position: usize) -> ApprovalHop<'_> {
    match chain.get(position + 1) {
        Some(next) => ApprovalHop::Advance { to: next },
        None => ApprovalHop::Final,
    }
}

/// The role one position back, or `NoPreviousStep` at the head of the chain.
pub fn previous_role<'a>(chain: &'a [String], position: usize) -> Result<&'a str> {
    match position.checked_sub(1).and_then(|i| chain.get(i)) {
        Some(prev) => Ok(prev),
        None => Err(KycError::NoPreviousStep {
            role: chain.get(position).cloned().unwrap_or_default(),
        }),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateOutcome {
    pub instance: WorkflowInstance,
    /// `false` when an InReview instance already existed
    pub created: bool,
}

#[derive(Clone)]
pub struct WorkflowEngine {
    workflows: Arc<dyn WorkflowStore>,
    sessions: Arc<dyn SessionStore>,
    roles: Arc<dyn RoleDirectory>,
    chains: ChainResolver,
    settings: KycSettings,
}

impl WorkflowEngine {
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        sessions: Arc<dyn SessionStore>,
        roles: Arc<dyn RoleDirectory>,
        chains: ChainResolver,
        settings: KycSettings,
    ) -> Self {
        Self {
            workflows,
            sessions,
            roles,
            chains,
            settings,
        }
    }

    /// Start approval for a submitted session.
    ///
    /// The submitting role is the caller's primary role, or the public
    /// submitter role for anonymous submissions. If the session is already
    /// in review, the existing instance is returned unchanged.
    pub async fn initiate(
        &self,
        session_id: SessionId,
        actor: Option<&Principal>,
    ) -> Result<InitiateOutcome> {
        let session = self
            .sessions
            .get_session(session_id)
            .await?
            .ok_or_else(|| KycError::not_found(format!("session {session_id}")))?;

        if let Some(existing) = self.workflows.latest_for_session(session_id).await? {
            if existing.status == WorkflowStatus::InReview {
                return Ok(InitiateOutcome {
                    instance: existing,
                    created: false,
                });
            }
        }
        if session.form_status == FormStatus::FullyApproved {
            return Err(KycError::InvalidState(format!(
                "session {session_id} is already fully approved"
            )));
        }

        let submitter_name = actor
            .and_then(Principal::primary_role)
            .unwrap_or(self.settings.public_submitter_role.as_str());
        let submitter = self.role_named(submitter_name).await?;
        let chain = self.chains.resolve_chain(submitter.id).await?;
        let first = match chain.approvers.first() {
            Some(name) => self.role_named(name).await?,
            None => {
                return Err(KycError::ConfigurationMissing(format!(
                    "approval chain for role {} is empty",
                    chain.config_role_id
                )))
            }
        };

        let actor_id = actor.map(|p| p.actor_id.clone());
        let outcome = self
            .workflows
            .create_in_review(
                NewWorkflow {
                    session_id,
                    submitted_role_id: submitter.id,
                    current_role_id: first.id,
                    pending_level: chain.approvers.len() as i32,
                    submitted_by: actor_id.clone(),
                },
                NewApprovalLog {
                    action: ApprovalAction::Submitted,
                    actor_user_id: actor_id,
                    from_role_id: Some(submitter.id),
                    to_role_id: Some(first.id),
                    remarks: None,
                },
                FormStatus::Submitted,
            )
            .await?;

        Ok(match outcome {
            CreateOutcome::Created(instance) => {
                tracing::info!(
                    workflow_id = instance.id,
                    session_id,
                    submitter = %submitter.name,
                    first_approver = %first.name,
                    levels = instance.pending_level,
                    "KYC workflow initiated"
                );
                InitiateOutcome {
                    instance,
                    created: true,
                }
            }
            CreateOutcome::AlreadyInReview(instance) => InitiateOutcome {
                instance,
                created: false,
            },
        })
    }

    /// Staff-side submission of an applicant's session. Only staff may file
    /// on someone else's behalf, and only once the applicant has proven
    /// ownership of the email address.
    pub async fn initiate_as_staff(
        &self,
        session_id: SessionId,
        actor: &Principal,
    ) -> Result<InitiateOutcome> {
        self.require_staff(actor).await?;
        let session = self
            .sessions
            .get_session(session_id)
            .await?
            .ok_or_else(|| KycError::not_found(format!("session {session_id}")))?;
        if !session.email_verified {
            return Err(KycError::InvalidState(format!(
                "session {session_id} has not verified its email address"
            )));
        }
        self.initiate(session_id, Some(actor)).await
    }

    /// Staff are admins and holders of any role that appears in an approval
    /// chain. Workflow reads and staff submissions are limited to them.
    pub async fn require_staff(&self, actor: &Principal) -> Result<()> {
        if actor.has_role(&self.settings.admin_role) {
            return Ok(());
        }
        let chains = self.chains.list_chains().await?;
        if chains
            .iter()
            .flat_map(|c| c.approvers.iter())
            .any(|name| actor.has_role(name))
        {
            return Ok(());
        }
        Err(KycError::Forbidden(format!(
            "{} holds no approver role",
            actor.actor_id
        )))
    }

    /// Approve at the current role: advance to the next chain role, or
    /// finish the workflow when the current role is last.
    pub async fn approve(
        &self,
        workflow_id: WorkflowId,
        actor: &Principal,
        remarks: Option<String>,
    ) -> Result<WorkflowInstance> {
        let (instance, current) = self.load_actionable(workflow_id, actor).await?;
        let chain = self
            .chains
            .resolve_chain(instance.submitted_role_id)
            .await?
            .approvers;
        let position = chain_position(&chain, &current.name)?;

        let commit = match approval_hop(&chain, position) {
            ApprovalHop::Final => TransitionCommit {
                next: WorkflowInstance {
                    status: WorkflowStatus::Approved,
                    current_role_id: None,
                    pending_level: 0,
                    last_remarks: remarks.clone(),
                    ..instance
                },
                log: NewApprovalLog {
                    action: ApprovalAction::Approved,
                    actor_user_id: Some(actor.actor_id.clone()),
                    from_role_id: Some(current.id),
                    to_role_id: None,
                    remarks,
                },
                session_status: Some(FormStatus::FullyApproved),
            },
            ApprovalHop::Advance { to } => {
                let next_role = self.role_named(to).await?;
                TransitionCommit {
                    next: WorkflowInstance {
                        current_role_id: Some(next_role.id),
                        pending_level: instance.pending_level - 1,
                        last_remarks: remarks.clone(),
                        ..instance
                    },
                    log: NewApprovalLog {
                        action: ApprovalAction::Approved,
                        actor_user_id: Some(actor.actor_id.clone()),
                        from_role_id: Some(current.id),
                        to_role_id: Some(next_role.id),
                        remarks,
                    },
                    session_status: Some(FormStatus::UnderReview),
                }
            }
        };

        let updated = self.workflows.commit_transition(&commit).await?;
        tracing::info!(
            workflow_id,
            actor = %actor.actor_id,
            from_role = %current.name,
            status = updated.status.as_str(),
            pending_level = updated.pending_level,
            "KYC workflow approved"
        );
        Ok(updated)
    }

    /// Reject at the current role. By default the workflow ends Rejected and
    /// the form goes back to the submitter; with `return_to_previous` it
    /// moves one role back along the chain instead.
    pub async fn reject(
        &self,
        workflow_id: WorkflowId,
        actor: &Principal,
        remarks: Option<String>,
        return_to_previous: bool,
    ) -> Result<WorkflowInstance> {
        let (instance, current) = self.load_actionable(workflow_id, actor).await?;

        let commit = if return_to_previous {
            let chain = self
                .chains
                .resolve_chain(instance.submitted_role_id)
                .await?
                .approvers;
            let position = chain_position(&chain, &current.name)?;
            let previous = self.role_named(previous_role(&chain, position)?).await?;
            TransitionCommit {
                next: WorkflowInstance {
                    current_role_id: Some(previous.id),
                    pending_level: instance.pending_level + 1,
                    last_remarks: remarks.clone(),
                    ..instance
                },
                log: NewApprovalLog {
                    action: ApprovalAction::Returned,
                    actor_user_id: Some(actor.actor_id.clone()),
                    from_role_id: Some(current.id),
                    to_role_id: Some(previous.id),
                    remarks,
                },
                session_status: None,
            }
        } else {
            let submitted_role_id = instance.submitted_role_id;
            TransitionCommit {
                next: WorkflowInstance {
                    status: WorkflowStatus::Rejected,
                    current_role_id: Some(submitted_role_id),
                    pending_level: 0,
                    last_remarks: remarks.clone(),
                    ..instance
                },
                log: NewApprovalLog {
                    action: ApprovalAction::Rejected,
                    actor_user_id: Some(actor.actor_id.clone()),
                    from_role_id: Some(current.id),
                    to_role_id: Some(submitted_role_id),
                    remarks,
                },
                session_status: Some(FormStatus::InProgress),
            }
        };

        let updated = self.workflows.commit_transition(&commit).await?;
        tracing::info!(
            workflow_id,
            actor = %actor.actor_id,
            from_role = %current.name,
            returned = return_to_previous,
            status = updated.status.as_str(),
            "KYC workflow rejected"
        );
        Ok(updated)
    }

    /// InReview items queued at a role, oldest first. Callers see only the
    /// queues of roles they hold, unless they are admins.
    pub async fn pending_for_role(
        &self,
        role_id: RoleId,
        actor: &Principal,
    ) -> Result<Vec<WorkflowInstance>> {
        let role = self
            .roles
            .role_by_id(role_id)
            .await?
            .ok_or_else(|| KycError::RoleNotFound(format!("role {role_id}")))?;
        self.authorize_role(actor, &role)?;
        self.workflows.pending_for_role(role_id).await
    }

    pub async fn history(&self, workflow_id: WorkflowId) -> Result<Vec<ApprovalLogEntry>> {
        self.get(workflow_id).await?;
        self.workflows.history(workflow_id).await
    }

    pub async fn get(&self, workflow_id: WorkflowId) -> Result<WorkflowInstance> {
        self.workflows
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| KycError::not_found(format!("workflow {workflow_id}")))
    }

    pub async fn latest_for_session(&self, session_id: SessionId) -> Result<WorkflowInstance> {
        self.workflows
            .latest_for_session(session_id)
            .await?
            .ok_or_else(|| KycError::not_found(format!("workflow for session {session_id}")))
    }

    async fn load_actionable(
        &self,
        workflow_id: WorkflowId,
        actor: &Principal,
    ) -> Result<(WorkflowInstance, Role)> {
        let instance = self.get(workflow_id).await?;
        if instance.status != WorkflowStatus::InReview {
            return Err(KycError::InvalidState(format!(
                "workflow {workflow_id} is {} and cannot be acted on",
                instance.status.as_str()
            )));
        }
        let current_role_id = instance.current_role_id.ok_or_else(|| {
            KycError::InvalidState(format!("workflow {workflow_id} has no current role"))
        })?;
        let current = self
            .roles
            .role_by_id(current_role_id)
            .await?
            .ok_or_else(|| KycError::RoleNotFound(format!("role {current_role_id}")))?;
        self.authorize_role(actor, &current)?;
        Ok((instance, current))
    }

    fn authorize_role(&self, actor: &Principal, role: &Role) -> Result<()> {
        if actor.has_role(&role.name) || actor.has_role(&self.settings.admin_role) {
            Ok(())
        } else {
            Err(KycError::Forbidden(format!(
                "{} does not hold role {}",
                actor.actor_id, role.name
            )))
        }
    }

    async fn role_named(&self, name: &str) -> Result<Role> {
        self.roles
            .role_by_name(name)
            .await?
            .ok_or_else(|| KycError::RoleNotFound(name.to_string()))
    }
}
