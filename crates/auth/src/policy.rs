//! Authorization policy aggregate and its persisted record shape.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use keystone_core::{PolicyError, PolicyId, PolicyResult};

use crate::{
    CredentialRule, CredentialType, Privilege, PrivilegeRule, PrivilegeSet, ResourceMatch,
    VerifiedCredentialRule,
};

/// Kind of resource a policy protects (e.g. `"space"`, `"callout"`).
///
/// Used by inheritance strategies to decide whether a child inherits from its
/// parent. The set of kinds is open-ended.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceType(Cow<'static, str>);

impl ResourceType {
    pub const PLATFORM: ResourceType = ResourceType(Cow::Borrowed("platform"));
    pub const ACCOUNT: ResourceType = ResourceType(Cow::Borrowed("account"));
    pub const SPACE: ResourceType = ResourceType(Cow::Borrowed("space"));
    pub const COLLABORATION: ResourceType = ResourceType(Cow::Borrowed("collaboration"));
    pub const CALLOUT: ResourceType = ResourceType(Cow::Borrowed("callout"));
    pub const LICENSE: ResourceType = ResourceType(Cow::Borrowed("license"));
    /// Policies built on the fly and never persisted.
    pub const IN_MEMORY: ResourceType = ResourceType(Cow::Borrowed("in-memory"));
    pub const UNKNOWN: ResourceType = ResourceType(Cow::Borrowed("unknown"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ResourceType {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

/// Persisted shape of an authorization policy.
///
/// Rule lists are stored as JSON text columns; older rows may hold a JSON array
/// directly, and a missing column means "no rules".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRecord {
    pub id: PolicyId,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(rename = "resourceID", default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub credential_rules: JsonValue,
    #[serde(default)]
    pub verified_credential_rules: JsonValue,
    #[serde(default)]
    pub privilege_rules: JsonValue,
    #[serde(default)]
    pub anonymous_read_access: bool,
}

/// A resource's authorization record with its rules parsed and validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationPolicy {
    id: PolicyId,
    resource_type: ResourceType,
    resource_id: Option<String>,
    credential_rules: Vec<CredentialRule>,
    verified_credential_rules: Vec<VerifiedCredentialRule>,
    privilege_rules: Vec<PrivilegeRule>,
    anonymous_read_access: bool,
}

impl AuthorizationPolicy {
    pub fn new(id: PolicyId, resource_type: ResourceType, resource_id: Option<String>) -> Self {
        Self {
            id,
            resource_type,
            resource_id: resource_id.filter(|r| !r.is_empty()),
            credential_rules: Vec::new(),
            verified_credential_rules: Vec::new(),
            privilege_rules: Vec::new(),
            anonymous_read_access: false,
        }
    }

    /// Parse a persisted record. Any malformed rule list rejects the whole record.
    pub fn from_record(record: PolicyRecord) -> PolicyResult<Self> {
        let credential_rules: Vec<CredentialRule> = parse_rule_list(record.credential_rules, "credentialRules")?;
        let verified_credential_rules: Vec<VerifiedCredentialRule> =
            parse_rule_list(record.verified_credential_rules, "verifiedCredentialRules")?;
        let privilege_rules: Vec<PrivilegeRule> = parse_rule_list(record.privilege_rules, "privilegeRules")?;

        credential_rules.iter().try_for_each(CredentialRule::validate)?;
        verified_credential_rules.iter().try_for_each(VerifiedCredentialRule::validate)?;
        privilege_rules.iter().try_for_each(PrivilegeRule::validate)?;

        Ok(Self {
            credential_rules,
            verified_credential_rules,
            privilege_rules,
            anonymous_read_access: record.anonymous_read_access,
            ..Self::new(record.id, record.resource_type, record.resource_id)
        })
    }

    /// Parse a record from its JSON text.
    pub fn from_json(json: &str) -> PolicyResult<Self> {
        Self::from_record(serde_json::from_str(json)?)
    }

    /// Inverse of [`from_record`](Self::from_record); rule lists are written as JSON text.
    pub fn to_record(&self) -> PolicyResult<PolicyRecord> {
        Ok(PolicyRecord {
            id: self.id,
            resource_type: self.resource_type.clone(),
            resource_id: self.resource_id.clone(),
            credential_rules: JsonValue::String(serde_json::to_string(&self.credential_rules)?),
            verified_credential_rules: JsonValue::String(serde_json::to_string(&self.verified_credential_rules)?),
            privilege_rules: JsonValue::String(serde_json::to_string(&self.privilege_rules)?),
            anonymous_read_access: self.anonymous_read_access,
        })
    }

    /// In-memory policy granting `privileges` to holders of any of the given global roles.
    pub fn global_roles_policy(
        credential_types: impl IntoIterator<Item = CredentialType>,
        privileges: &[Privilege],
        name: &str,
    ) -> Self {
        let mut policy = Self::new(PolicyId::new(), ResourceType::IN_MEMORY, None);
        policy.credential_rules = credential_types
            .into_iter()
            .map(|credential_type| {
                CredentialRule::new(credential_type, privileges.iter().cloned(), ResourceMatch::Any).with_name(name)
            })
            .collect();
        policy
    }

    pub fn id(&self) -> PolicyId {
        self.id
    }

    pub fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    pub fn credential_rules(&self) -> &[CredentialRule] {
        &self.credential_rules
    }

    pub fn verified_credential_rules(&self) -> &[VerifiedCredentialRule] {
        &self.verified_credential_rules
    }

    pub fn privilege_rules(&self) -> &[PrivilegeRule] {
        &self.privilege_rules
    }

    pub fn anonymous_read_access(&self) -> bool {
        self.anonymous_read_access
    }

    /// Every privilege any rule of this policy can grant.
    pub fn privilege_vocabulary(&self) -> PrivilegeSet {
        let mut all = PrivilegeSet::new();
        for rule in &self.credential_rules {
            all.extend(rule.granted_privileges.iter().cloned());
        }
        for rule in &self.verified_credential_rules {
            all.extend(rule.granted_privileges.iter().cloned());
        }
        for rule in &self.privilege_rules {
            all.insert(rule.source_privilege.clone());
            all.extend(rule.granted_privileges.iter().cloned());
        }
        if self.anonymous_read_access {
            all.insert(Privilege::READ);
        }
        all
    }

    pub fn set_anonymous_read_access(&mut self, enabled: bool) -> &mut Self {
        self.anonymous_read_access = enabled;
        self
    }

    pub fn append_credential_rule(&mut self, rule: CredentialRule) -> PolicyResult<&mut Self> {
        rule.validate()?;
        self.credential_rules.push(rule);
        Ok(self)
    }

    pub fn append_credential_rules(
        &mut self,
        rules: impl IntoIterator<Item = CredentialRule>,
    ) -> PolicyResult<&mut Self> {
        for rule in rules {
            self.append_credential_rule(rule)?;
        }
        Ok(self)
    }

    pub fn append_verified_credential_rule(&mut self, rule: VerifiedCredentialRule) -> PolicyResult<&mut Self> {
        rule.validate()?;
        self.verified_credential_rules.push(rule);
        Ok(self)
    }

    pub fn append_privilege_rule(&mut self, rule: PrivilegeRule) -> PolicyResult<&mut Self> {
        rule.validate()?;
        self.privilege_rules.push(rule);
        Ok(self)
    }

    pub fn append_privilege_rules(&mut self, rules: impl IntoIterator<Item = PrivilegeRule>) -> PolicyResult<&mut Self> {
        for rule in rules {
            self.append_privilege_rule(rule)?;
        }
        Ok(self)
    }

    /// Add the cascade edge `source -> granted`.
    pub fn append_privilege_mapping(
        &mut self,
        source: Privilege,
        granted: impl IntoIterator<Item = Privilege>,
        name: impl Into<String>,
    ) -> PolicyResult<&mut Self> {
        self.append_privilege_rule(PrivilegeRule::new(source, granted, name))
    }

    /// Drop every rule and anonymous access.
    pub fn reset(&mut self) -> &mut Self {
        self.credential_rules.clear();
        self.verified_credential_rules.clear();
        self.privilege_rules.clear();
        self.anonymous_read_access = false;
        self
    }

    /// Reset, then take over the parent's cascading credential rules and anonymous access.
    ///
    /// Copied `self` rules now refer to this policy's own resource.
    pub fn inherit_from(&mut self, parent: &AuthorizationPolicy) -> &mut Self {
        self.reset();
        self.credential_rules = parent
            .credential_rules
            .iter()
            .filter(|rule| rule.cascade)
            .cloned()
            .collect();
        self.anonymous_read_access = parent.anonymous_read_access;
        self
    }
}

impl TryFrom<PolicyRecord> for AuthorizationPolicy {
    type Error = PolicyError;

    fn try_from(record: PolicyRecord) -> Result<Self, Self::Error> {
        Self::from_record(record)
    }
}

fn parse_rule_list<T: DeserializeOwned>(raw: JsonValue, field: &str) -> PolicyResult<Vec<T>> {
    let parsed = match raw {
        JsonValue::Null => return Ok(Vec::new()),
        JsonValue::String(text) if text.trim().is_empty() => return Ok(Vec::new()),
        JsonValue::String(text) => serde_json::from_str(&text),
        value @ JsonValue::Array(_) => serde_json::from_value(value),
        other => {
            return Err(PolicyError::malformed(format!(
                "{field}: expected a JSON array or string, got {other}"
            )));
        }
    };
    parsed.map_err(|err| PolicyError::malformed(format!("{field}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space_policy() -> AuthorizationPolicy {
        let mut policy = AuthorizationPolicy::new(PolicyId::new(), ResourceType::SPACE, Some("S1".into()));
        policy
            .append_credential_rule(
                CredentialRule::new("space-admin", [Privilege::UPDATE], ResourceMatch::Own)
                    .with_cascade(true)
                    .with_name("space admins"),
            )
            .unwrap()
            .append_credential_rule(CredentialRule::new("space-member", [Privilege::READ], ResourceMatch::Own))
            .unwrap()
            .append_privilege_mapping(Privilege::UPDATE, [Privilege::READ], "update implies read")
            .unwrap()
            .set_anonymous_read_access(true);
        policy
    }

    #[test]
    fn record_accepts_text_and_array_rule_columns() {
        let json = format!(
            r#"{{
                "id": "{}",
                "type": "space",
                "resourceID": "S1",
                "credentialRules": "[{{\"credentialType\":\"space-admin\",\"grantedPrivileges\":[\"UPDATE\"],\"resourceIDMatch\":\"self\"}}]",
                "privilegeRules": [{{"sourcePrivilege":"UPDATE","grantedPrivileges":["READ"]}}],
                "anonymousReadAccess": false
            }}"#,
            PolicyId::new()
        );

        let policy = AuthorizationPolicy::from_json(&json).unwrap();

        assert_eq!(policy.resource_id(), Some("S1"));
        assert_eq!(policy.credential_rules().len(), 1);
        assert_eq!(policy.privilege_rules().len(), 1);
        assert!(policy.verified_credential_rules().is_empty());
    }

    #[test]
    fn missing_resource_match_is_malformed() {
        let record = PolicyRecord {
            id: PolicyId::new(),
            resource_type: ResourceType::SPACE,
            resource_id: None,
            credential_rules: JsonValue::String(r#"[{"credentialType":"x","grantedPrivileges":["READ"]}]"#.into()),
            verified_credential_rules: JsonValue::Null,
            privilege_rules: JsonValue::Null,
            anonymous_read_access: false,
        };

        assert!(matches!(AuthorizationPolicy::from_record(record), Err(PolicyError::Malformed(_))));
    }

    #[test]
    fn non_list_rule_column_is_malformed() {
        let record = PolicyRecord {
            id: PolicyId::new(),
            resource_type: ResourceType::SPACE,
            resource_id: None,
            credential_rules: JsonValue::Bool(true),
            verified_credential_rules: JsonValue::Null,
            privilege_rules: JsonValue::Null,
            anonymous_read_access: false,
        };

        let err = AuthorizationPolicy::from_record(record).unwrap_err();
        assert!(err.is_data_integrity());
    }

    #[test]
    fn record_round_trips_through_text_columns() {
        let policy = space_policy();
        let record = policy.to_record().unwrap();

        assert!(record.credential_rules.is_string());
        assert_eq!(AuthorizationPolicy::from_record(record).unwrap(), policy);
    }

    #[test]
    fn inherit_from_copies_only_cascading_rules() {
        let parent = space_policy();
        let mut child = AuthorizationPolicy::new(PolicyId::new(), ResourceType::COLLABORATION, Some("C1".into()));
        child
            .append_credential_rule(CredentialRule::new("stale", [Privilege::DELETE], ResourceMatch::Any))
            .unwrap();

        child.inherit_from(&parent);

        assert_eq!(child.credential_rules().len(), 1);
        assert_eq!(child.credential_rules()[0].name, "space admins");
        assert!(child.privilege_rules().is_empty());
        assert!(child.anonymous_read_access());
    }

    #[test]
    fn reset_clears_everything() {
        let mut policy = space_policy();
        policy.reset();

        assert!(policy.credential_rules().is_empty());
        assert!(policy.privilege_rules().is_empty());
        assert!(!policy.anonymous_read_access());
        assert!(policy.privilege_vocabulary().is_empty());
    }

    #[test]
    fn global_roles_policy_uses_any_match() {
        let policy = AuthorizationPolicy::global_roles_policy(
            [CredentialType::from("global-admin"), CredentialType::from("global-support")],
            &[Privilege::PLATFORM_ADMIN],
            "platform admins",
        );

        assert_eq!(policy.resource_type(), &ResourceType::IN_MEMORY);
        assert_eq!(policy.credential_rules().len(), 2);
        assert!(policy
            .credential_rules()
            .iter()
            .all(|r| r.resource_id_match == ResourceMatch::Any && r.name == "platform admins"));
    }

    #[test]
    fn appending_an_invalid_rule_is_rejected() {
        let mut policy = space_policy();
        let before = policy.credential_rules().len();

        assert!(policy
            .append_credential_rule(CredentialRule::new("", [Privilege::READ], ResourceMatch::Any))
            .is_err());
        assert_eq!(policy.credential_rules().len(), before);
    }
}
