//! KYC onboarding core.
//!
//! Session-scoped credential guard, session and step progress tracking, OTP
//! verification, approval chain configuration and the multi-level approval
//! workflow. Storage is reached only through the traits in [`ports`]; this
//! crate has no database dependency.

pub mod chain;
pub mod error;
pub mod guard;
pub mod memory;
pub mod otp;
pub mod ports;
pub mod principal;
pub mod progress;
pub mod service;
pub mod session;
pub mod settings;
pub mod step_mapping;
pub mod types;
pub mod workflow;

pub use error::{GuardDenial, KycError};
pub use principal::Principal;
pub use service::KycServices;
