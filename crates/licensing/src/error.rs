use thiserror::Error;

use keystone_core::LicenseId;

use crate::EntitlementType;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EntitlementError {
    #[error("license {license_id} has no entitlement of type '{entitlement}'")]
    NotFound {
        license_id: LicenseId,
        entitlement: EntitlementType,
    },

    #[error("entitlement '{entitlement}' is not enabled for license {license_id}")]
    NotEnabled {
        license_id: LicenseId,
        entitlement: EntitlementType,
    },

    #[error("entitlement '{entitlement}' on license {license_id} is used up ({usage} of {limit})")]
    LimitReached {
        license_id: LicenseId,
        entitlement: EntitlementType,
        limit: u32,
        usage: u32,
    },
}
