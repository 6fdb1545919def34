//! Feature gates: compare current usage against an entitlement's limit.

use tracing::debug;

use crate::{EntitlementDataType, EntitlementError, EntitlementType, License};

/// Usage accounting port (how many of an entitlement are currently consumed).
pub trait UsageCounter: Send + Sync {
    fn current_usage(&self, license: &License, entitlement_type: &EntitlementType) -> u32;
}

impl<F> UsageCounter for F
where
    F: Fn(&License, &EntitlementType) -> u32 + Send + Sync,
{
    fn current_usage(&self, license: &License, entitlement_type: &EntitlementType) -> u32 {
        self(license, entitlement_type)
    }
}

#[derive(Debug, Clone)]
pub struct EntitlementGate<U> {
    usage: U,
}

impl<U: UsageCounter> EntitlementGate<U> {
    pub fn new(usage: U) -> Self {
        Self { usage }
    }

    /// Flags are available when enabled; limits also need usage below the limit.
    pub fn check_available(&self, license: &License, entitlement_type: &EntitlementType) -> Result<(), EntitlementError> {
        let entitlement = license.entitlement(entitlement_type)?;
        if !entitlement.enabled {
            return Err(EntitlementError::NotEnabled {
                license_id: license.id,
                entitlement: entitlement_type.clone(),
            });
        }
        if entitlement.data_type == EntitlementDataType::Flag {
            return Ok(());
        }

        let usage = self.usage.current_usage(license, entitlement_type);
        debug!(license_id = %license.id, entitlement = %entitlement_type, usage, limit = entitlement.limit, "entitlement usage");
        if usage < entitlement.limit {
            Ok(())
        } else {
            Err(EntitlementError::LimitReached {
                license_id: license.id,
                entitlement: entitlement_type.clone(),
                limit: entitlement.limit,
                usage,
            })
        }
    }

    pub fn is_available(&self, license: &License, entitlement_type: &EntitlementType) -> bool {
        self.check_available(license, entitlement_type).is_ok()
    }

    /// Every entitlement type on `license` that can be used right now.
    pub fn available_entitlements(&self, license: &License) -> Vec<EntitlementType> {
        license
            .entitlements
            .iter()
            .filter(|e| self.is_available(license, &e.entitlement_type))
            .map(|e| e.entitlement_type.clone())
            .collect()
    }
}
