use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Entitlement type identifier: a licensed feature or quota.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntitlementType(Cow<'static, str>);

impl EntitlementType {
    pub const SPACE_FREE: EntitlementType = EntitlementType::from_static("space-free");
    pub const SPACE_PLUS: EntitlementType = EntitlementType::from_static("space-plus");
    pub const SPACE_PREMIUM: EntitlementType = EntitlementType::from_static("space-premium");
    pub const SPACE_FLAG_SAVE_AS_TEMPLATE: EntitlementType = EntitlementType::from_static("space-flag-save-as-template");
    pub const SPACE_FLAG_WHITEBOARD_MULTI_USER: EntitlementType =
        EntitlementType::from_static("space-flag-whiteboard-multi-user");
    pub const SPACE_FLAG_VIRTUAL_CONTRIBUTOR_ACCESS: EntitlementType =
        EntitlementType::from_static("space-flag-virtual-contributor-access");
    pub const ACCOUNT_SPACE_FREE: EntitlementType = EntitlementType::from_static("account-space-free");
    pub const ACCOUNT_SPACE_PLUS: EntitlementType = EntitlementType::from_static("account-space-plus");
    pub const ACCOUNT_SPACE_PREMIUM: EntitlementType = EntitlementType::from_static("account-space-premium");
    pub const ACCOUNT_VIRTUAL_CONTRIBUTOR: EntitlementType = EntitlementType::from_static("account-virtual-contributor");
    pub const ACCOUNT_INNOVATION_HUB: EntitlementType = EntitlementType::from_static("account-innovation-hub");
    pub const ACCOUNT_INNOVATION_PACK: EntitlementType = EntitlementType::from_static("account-innovation-pack");

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for EntitlementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for EntitlementType {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

/// One grant inside a license credential rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrantedEntitlement {
    #[serde(rename = "type")]
    pub entitlement_type: EntitlementType,
    pub limit: u32,
}

impl GrantedEntitlement {
    pub fn new(entitlement_type: impl Into<EntitlementType>, limit: u32) -> Self {
        Self {
            entitlement_type: entitlement_type.into(),
            limit,
        }
    }
}

/// Whether an entitlement is a counted quota or an on/off feature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntitlementDataType {
    #[default]
    Limit,
    Flag,
}

/// Materialized entitlement attached to a license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseEntitlement {
    #[serde(rename = "type")]
    pub entitlement_type: EntitlementType,
    #[serde(default)]
    pub data_type: EntitlementDataType,
    pub limit: u32,
    pub enabled: bool,
}

impl LicenseEntitlement {
    /// A disabled entitlement with limit 0.
    pub fn disabled(entitlement_type: EntitlementType, data_type: EntitlementDataType) -> Self {
        Self {
            entitlement_type,
            data_type,
            limit: 0,
            enabled: false,
        }
    }

    pub fn enabled(entitlement_type: EntitlementType, data_type: EntitlementDataType, limit: u32) -> Self {
        Self {
            entitlement_type,
            data_type,
            limit,
            enabled: true,
        }
    }

    pub fn reset(&mut self) {
        self.limit = 0;
        self.enabled = false;
    }

    /// Take over limit, enabled flag and data type from `parent`.
    pub fn copy_from(&mut self, parent: &LicenseEntitlement) {
        self.limit = parent.limit;
        self.enabled = parent.enabled;
        self.data_type = parent.data_type;
    }
}
