//! kyc_server — REST surface for the KYC onboarding core.
//!
//! Exposed as a library so integration tests can build the router without a
//! listener.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
