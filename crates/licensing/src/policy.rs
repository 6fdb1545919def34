//! License policy: which license credentials grant which entitlements.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use keystone_auth::CredentialType;
use keystone_core::{LicensePolicyId, PolicyError, PolicyResult};

use crate::GrantedEntitlement;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseCredentialRule {
    pub credential_type: CredentialType,
    pub granted_entitlements: Vec<GrantedEntitlement>,
    #[serde(default)]
    pub name: String,
}

impl LicenseCredentialRule {
    pub fn new(
        credential_type: impl Into<CredentialType>,
        granted_entitlements: impl IntoIterator<Item = GrantedEntitlement>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            credential_type: credential_type.into(),
            granted_entitlements: granted_entitlements.into_iter().collect(),
            name: name.into(),
        }
    }

    fn validate(&self) -> PolicyResult<()> {
        if self.credential_type.as_str().trim().is_empty() {
            return Err(PolicyError::malformed("license credential rule has an empty credentialType"));
        }
        if self
            .granted_entitlements
            .iter()
            .any(|g| g.entitlement_type.as_str().trim().is_empty())
        {
            return Err(PolicyError::malformed(format!(
                "license credential rule '{}' grants an empty entitlement type",
                self.name
            )));
        }
        Ok(())
    }
}

/// Persisted shape: `credentialRules` is a JSON text column (or an array).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicensePolicyRecord {
    pub id: LicensePolicyId,
    #[serde(default)]
    pub credential_rules: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicensePolicy {
    id: LicensePolicyId,
    credential_rules: Vec<LicenseCredentialRule>,
}

impl LicensePolicy {
    pub fn new(id: LicensePolicyId, credential_rules: Vec<LicenseCredentialRule>) -> PolicyResult<Self> {
        credential_rules.iter().try_for_each(LicenseCredentialRule::validate)?;
        Ok(Self { id, credential_rules })
    }

    pub fn from_record(record: LicensePolicyRecord) -> PolicyResult<Self> {
        let rules = match record.credential_rules {
            JsonValue::Null => Vec::new(),
            JsonValue::String(text) if text.trim().is_empty() => Vec::new(),
            JsonValue::String(text) => serde_json::from_str(&text)?,
            value @ JsonValue::Array(_) => serde_json::from_value(value)?,
            other => {
                return Err(PolicyError::malformed(format!(
                    "credentialRules: expected a JSON array or string, got {other}"
                )));
            }
        };
        Self::new(record.id, rules)
    }

    pub fn from_json(json: &str) -> PolicyResult<Self> {
        Self::from_record(serde_json::from_str(json)?)
    }

    pub fn to_record(&self) -> PolicyResult<LicensePolicyRecord> {
        Ok(LicensePolicyRecord {
            id: self.id,
            credential_rules: JsonValue::String(serde_json::to_string(&self.credential_rules)?),
        })
    }

    pub fn id(&self) -> LicensePolicyId {
        self.id
    }

    pub fn credential_rules(&self) -> &[LicenseCredentialRule] {
        &self.credential_rules
    }

    pub fn append_credential_rule(&mut self, rule: LicenseCredentialRule) -> PolicyResult<&mut Self> {
        rule.validate()?;
        self.credential_rules.push(rule);
        Ok(self)
    }
}
