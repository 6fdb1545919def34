//! `keystone-core` — identifiers and error types shared by the policy engine.
//!
//! This crate carries no policy semantics of its own.

pub mod error;
pub mod ids;

pub use error::{PolicyError, PolicyResult};
pub use ids::{AgentId, LicenseId, LicensePolicyId, PolicyId};
