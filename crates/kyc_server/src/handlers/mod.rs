pub mod chains;
pub mod health;
pub mod otp;
pub mod sessions;
pub mod steps;
pub mod workflow;

use kyc_core::guard::SessionAccess;
use kyc_core::types::{KycSession, WorkflowId};
use kyc_core::{KycError, KycServices};
use serde::Serialize;

/// `{success, message, workflowId?}` acknowledgement used by the action
/// endpoints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<WorkflowId>,
}

impl ActionResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            workflow_id: None,
        }
    }

    pub fn with_workflow(mut self, workflow_id: WorkflowId) -> Self {
        self.workflow_id = Some(workflow_id);
        self
    }
}

/// The session a guarded request addresses. Verified callers already carry
/// it; bearer callers are looked up by the route token.
pub(crate) async fn guarded_session(
    services: &KycServices,
    access: &SessionAccess,
    session_token: &str,
) -> Result<KycSession, KycError> {
    match access {
        SessionAccess::Verified(session) => Ok(session.clone()),
        SessionAccess::Bearer(_) => services.sessions.get_by_token(session_token).await,
    }
}
