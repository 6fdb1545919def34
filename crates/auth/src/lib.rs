//! `keystone-auth` — credential model, policy evaluation and the authorization service.
//!
//! Evaluation is pure and synchronous. Storage, transport and caching sit
//! behind the types in [`policy`] and [`cache`].

pub mod cache;
pub mod credential;
pub mod evaluate;
pub mod inheritance;
pub mod policy;
pub mod privilege;
pub mod rules;
pub mod service;
pub mod verified_credential;

pub use cache::{DecisionCache, DecisionKey, InMemoryDecisionCache, NoDecisionCache};
pub use credential::{Actor, Credential, CredentialType, credential_fingerprint};
pub use evaluate::{
    AccessExplanation, AuthzError, DenialKind, DenialReason, explain_access, grant_access_or_fail,
    granted_privileges, is_access_granted,
};
pub use inheritance::{InheritanceRule, InheritanceStrategy, InheritanceTable, NoInheritance};
pub use policy::{AuthorizationPolicy, PolicyRecord, ResourceType};
pub use privilege::{Privilege, PrivilegeSet};
pub use rules::{CredentialRule, PrivilegeRule, ResourceMatch, VerifiedCredentialRule};
pub use service::{AuthorizationConfig, AuthorizationService, PolicyChain};
pub use verified_credential::{Claim, CredentialValidityError, VerifiedCredential, parse_claims};
