use serde::{Deserialize, Serialize};
use tracing::debug;

use keystone_core::{LicenseId, PolicyId};

use crate::{EntitlementDataType, EntitlementError, EntitlementType, LicenseEntitlement, ResolvedEntitlements};

/// A license owned by an account or space, with its materialized entitlements.
///
/// `authorization_policy_id` is the license's own authorization policy; any
/// change to the entitlements must invalidate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct License {
    pub id: LicenseId,
    #[serde(rename = "authorizationPolicyID")]
    pub authorization_policy_id: PolicyId,
    pub entitlements: Vec<LicenseEntitlement>,
}

impl License {
    pub fn new(id: LicenseId, authorization_policy_id: PolicyId, entitlements: Vec<LicenseEntitlement>) -> Self {
        Self {
            id,
            authorization_policy_id,
            entitlements,
        }
    }

    /// Disable every entitlement and zero its limit.
    pub fn reset(&mut self) {
        self.entitlements.iter_mut().for_each(LicenseEntitlement::reset);
    }

    /// Materialize `resolved` onto this license.
    ///
    /// Everything is reset first, then each resolved type is enabled with its
    /// limit; types the license did not carry yet are added as limit
    /// entitlements. Returns whether any entitlement changed.
    pub fn apply_policy(&mut self, resolved: &ResolvedEntitlements) -> bool {
        let before = self.entitlements.clone();
        self.reset();

        for (entitlement_type, limit) in resolved {
            match self
                .entitlements
                .iter_mut()
                .find(|e| &e.entitlement_type == entitlement_type)
            {
                Some(entitlement) => {
                    entitlement.enabled = true;
                    entitlement.limit = *limit;
                }
                None => self.entitlements.push(LicenseEntitlement::enabled(
                    entitlement_type.clone(),
                    EntitlementDataType::Limit,
                    *limit,
                )),
            }
        }

        let changed = self.entitlements != before;
        debug!(license_id = %self.id, entitlements = resolved.len(), changed, "applied license policy");
        changed
    }

    pub fn entitlement(&self, entitlement_type: &EntitlementType) -> Result<&LicenseEntitlement, EntitlementError> {
        self.entitlements
            .iter()
            .find(|e| &e.entitlement_type == entitlement_type)
            .ok_or_else(|| EntitlementError::NotFound {
                license_id: self.id,
                entitlement: entitlement_type.clone(),
            })
    }

    pub fn entitlement_limit(&self, entitlement_type: &EntitlementType) -> Result<u32, EntitlementError> {
        Ok(self.entitlement(entitlement_type)?.limit)
    }

    pub fn is_entitlement_enabled(&self, entitlement_type: &EntitlementType) -> Result<bool, EntitlementError> {
        Ok(self.entitlement(entitlement_type)?.enabled)
    }

    pub fn is_entitlement_enabled_or_fail(&self, entitlement_type: &EntitlementType) -> Result<(), EntitlementError> {
        if self.is_entitlement_enabled(entitlement_type)? {
            Ok(())
        } else {
            Err(EntitlementError::NotEnabled {
                license_id: self.id,
                entitlement: entitlement_type.clone(),
            })
        }
    }

    /// Copy each entitlement's settings from the same type on `parent`.
    ///
    /// Fails without modifying anything if `parent` lacks one of the types.
    pub fn inherit_entitlements_from(&mut self, parent: &License) -> Result<(), EntitlementError> {
        let sources = self
            .entitlements
            .iter()
            .map(|child| {
                parent
                    .entitlements
                    .iter()
                    .find(|p| p.entitlement_type == child.entitlement_type)
                    .cloned()
                    .ok_or_else(|| EntitlementError::NotFound {
                        license_id: parent.id,
                        entitlement: child.entitlement_type.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (child, source) in self.entitlements.iter_mut().zip(&sources) {
            child.copy_from(source);
        }
        Ok(())
    }

    /// Highest enabled space tier: premium, then plus, then free.
    pub fn space_level(&self) -> Option<EntitlementType> {
        [
            EntitlementType::SPACE_PREMIUM,
            EntitlementType::SPACE_PLUS,
            EntitlementType::SPACE_FREE,
        ]
        .into_iter()
        .find(|tier| self.entitlements.iter().any(|e| &e.entitlement_type == tier && e.enabled))
    }
}
