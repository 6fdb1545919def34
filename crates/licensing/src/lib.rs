//! `keystone-licensing` — license policies, entitlement resolution and feature gates.
//!
//! Resolution is pure: it turns the license credentials an owner holds into
//! entitlement limits. Usage accounting stays outside this crate.

pub mod entitlement;
pub mod error;
pub mod gate;
pub mod license;
pub mod policy;
pub mod resolve;

pub use entitlement::{EntitlementDataType, EntitlementType, GrantedEntitlement, LicenseEntitlement};
pub use error::EntitlementError;
pub use gate::{EntitlementGate, UsageCounter};
pub use license::License;
pub use policy::{LicenseCredentialRule, LicensePolicy, LicensePolicyRecord};
pub use resolve::{ResolvedEntitlements, resolve_entitlements, resolve_entitlements_from_json};
