use std::borrow::Cow;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize};

use keystone_core::AgentId;

use crate::VerifiedCredential;

/// Credential type identifier (e.g. `"space-admin"`, `"global-admin"`).
///
/// Types are opaque strings at this layer; which types exist is decided by the
/// membership and licensing flows that issue them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialType(Cow<'static, str>);

impl CredentialType {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for CredentialType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for CredentialType {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CredentialType {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// An issued grant: "agent X holds credential type Y on resource Z".
///
/// A credential without a resource ID is global. On the wire an empty
/// `resourceID` also means global.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "type")]
    credential_type: CredentialType,

    #[serde(rename = "resourceID", default, deserialize_with = "empty_as_none")]
    resource_id: Option<String>,

    #[serde(rename = "agentID")]
    agent_id: AgentId,
}

impl Credential {
    /// A global credential (not scoped to any resource).
    pub fn global(credential_type: impl Into<CredentialType>, agent_id: AgentId) -> Self {
        Self {
            credential_type: credential_type.into(),
            resource_id: None,
            agent_id,
        }
    }

    /// A credential scoped to a single resource.
    pub fn scoped(
        credential_type: impl Into<CredentialType>,
        resource_id: impl Into<String>,
        agent_id: AgentId,
    ) -> Self {
        let resource_id = resource_id.into();
        Self {
            credential_type: credential_type.into(),
            resource_id: (!resource_id.is_empty()).then_some(resource_id),
            agent_id,
        }
    }

    pub fn credential_type(&self) -> &CredentialType {
        &self.credential_type
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    pub fn is_global(&self) -> bool {
        self.resource_id.is_none()
    }
}

impl core::fmt::Display for Credential {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.resource_id {
            Some(resource) => write!(f, "{}@{}", self.credential_type, resource),
            None => write!(f, "{}", self.credential_type),
        }
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// The authenticated principal making a request, as seen by the engine.
///
/// Construction is decoupled from storage and transport: callers assemble it
/// from whatever identity layer they use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    agent_id: AgentId,
    credentials: Vec<Credential>,
    verified_credentials: Vec<VerifiedCredential>,
}

impl Actor {
    pub fn new(agent_id: AgentId, credentials: Vec<Credential>) -> Self {
        Self {
            agent_id,
            credentials,
            verified_credentials: Vec::new(),
        }
    }

    pub fn with_verified_credentials(mut self, verified: Vec<VerifiedCredential>) -> Self {
        self.verified_credentials = verified;
        self
    }

    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    pub fn verified_credentials(&self) -> &[VerifiedCredential] {
        &self.verified_credentials
    }

    /// Compact `type@resource` listing for audit logs.
    pub fn credential_summary(&self) -> Vec<String> {
        self.credentials.iter().map(ToString::to_string).collect()
    }
}

/// Order-independent hash of a credential set.
///
/// Two actors presenting the same credentials (in any order) get the same
/// value, so cached decisions are shared between them. Agent IDs are left out:
/// decisions depend on what is held, not on who holds it.
pub fn credential_fingerprint(credentials: &[Credential], verified: &[VerifiedCredential]) -> u64 {
    let mut held: Vec<(&str, Option<&str>)> = credentials
        .iter()
        .map(|c| (c.credential_type().as_str(), c.resource_id()))
        .collect();
    held.sort_unstable();
    held.dedup();

    let mut presented: Vec<String> = verified.iter().map(VerifiedCredential::fingerprint_key).collect();
    presented.sort_unstable();
    presented.dedup();

    let mut hasher = DefaultHasher::new();
    held.hash(&mut hasher);
    presented.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_resource_id_deserializes_as_global() {
        let agent = AgentId::new();
        let json = format!(r#"{{"type":"global-admin","resourceID":"","agentID":"{agent}"}}"#);

        let credential: Credential = serde_json::from_str(&json).unwrap();

        assert!(credential.is_global());
        assert_eq!(credential, Credential::global("global-admin", agent));
    }

    #[test]
    fn scoped_with_empty_resource_is_global() {
        assert!(Credential::scoped("space-member", "", AgentId::new()).is_global());
    }

    #[test]
    fn fingerprint_ignores_order_duplicates_and_agent() {
        let a = AgentId::new();
        let b = AgentId::new();
        let first = vec![
            Credential::scoped("space-admin", "S1", a),
            Credential::global("global-registered", a),
        ];
        let second = vec![
            Credential::global("global-registered", b),
            Credential::scoped("space-admin", "S1", b),
            Credential::scoped("space-admin", "S1", b),
        ];

        assert_eq!(credential_fingerprint(&first, &[]), credential_fingerprint(&second, &[]));
    }

    #[test]
    fn fingerprint_distinguishes_resource_scope() {
        let a = AgentId::new();
        let s1 = vec![Credential::scoped("space-admin", "S1", a)];
        let s2 = vec![Credential::scoped("space-admin", "S2", a)];

        assert_ne!(credential_fingerprint(&s1, &[]), credential_fingerprint(&s2, &[]));
    }
}
