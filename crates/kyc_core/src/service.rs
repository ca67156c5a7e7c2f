//! KycServices: every core service wired over one set of store ports.
//!
//! The server holds one `Arc<KycServices>`; the same wiring runs against the
//! Postgres stores in production and [`crate::memory::MemoryStore`] in dev
//! mode and tests.

use std::sync::Arc;

use crate::chain::ChainResolver;
use crate::guard::CredentialGuard;
use crate::otp::OtpService;
use crate::ports::{KycStores, OtpDelivery, Result};
use crate::principal::Principal;
use crate::progress::StepTracker;
use crate::session::SessionService;
use crate::settings::KycSettings;
use crate::step_mapping::StepMapperRegistry;
use crate::workflow::WorkflowEngine;

#[derive(Clone)]
pub struct KycServices {
    pub guard: CredentialGuard,
    pub sessions: SessionService,
    pub otp: OtpService,
    pub steps: StepTracker,
    pub chains: ChainResolver,
    pub workflow: WorkflowEngine,
    pub settings: KycSettings,
}

impl KycServices {
    pub fn new(stores: KycStores, delivery: Arc<dyn OtpDelivery>, settings: KycSettings) -> Self {
        let chains = ChainResolver::new(
            stores.chains.clone(),
            stores.roles.clone(),
            settings.default_chain_role.clone(),
        );
        Self {
            guard: CredentialGuard::new(stores.sessions.clone()),
            sessions: SessionService::new(stores.sessions.clone()),
            otp: OtpService::new(
                stores.sessions.clone(),
                stores.otps.clone(),
                delivery,
                settings.clone(),
            ),
            steps: StepTracker::new(
                stores.sessions.clone(),
                stores.steps.clone(),
                stores.records.clone(),
                Arc::new(StepMapperRegistry::standard()),
            ),
            workflow: WorkflowEngine::new(
                stores.workflows.clone(),
                stores.sessions.clone(),
                stores.roles.clone(),
                chains.clone(),
                settings.clone(),
            ),
            chains,
            settings,
        }
    }

    /// Chain configuration is an operator action.
    pub fn require_admin(&self, principal: &Principal) -> Result<()> {
        principal.require_role(&self.settings.admin_role)
    }
}
