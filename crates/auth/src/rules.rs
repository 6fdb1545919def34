//! Declarative rule types attached to an authorization policy.
//!
//! Rules are parsed once at the storage boundary (see
//! [`AuthorizationPolicy::from_record`](crate::AuthorizationPolicy::from_record))
//! and validated there, so evaluation never meets malformed data.

use serde::{Deserialize, Serialize};

use keystone_core::{PolicyError, PolicyResult};

use crate::{Claim, Credential, CredentialType, Privilege, VerifiedCredential};

/// How a credential's resource scope is compared with the policy's resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceMatch {
    /// The credential must be scoped to the policy's own resource.
    #[serde(rename = "self")]
    Own,
    /// Any credential of the type matches, global or scoped.
    #[serde(rename = "any")]
    Any,
}

/// Holding a credential of `credential_type` grants `granted_privileges`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRule {
    pub credential_type: CredentialType,
    pub granted_privileges: Vec<Privilege>,
    #[serde(rename = "resourceIDMatch")]
    pub resource_id_match: ResourceMatch,
    /// Copied onto child policies by [`AuthorizationPolicy::inherit_from`](crate::AuthorizationPolicy::inherit_from).
    #[serde(default)]
    pub cascade: bool,
    #[serde(default)]
    pub name: String,
}

impl CredentialRule {
    pub fn new(
        credential_type: impl Into<CredentialType>,
        granted_privileges: impl IntoIterator<Item = Privilege>,
        resource_id_match: ResourceMatch,
    ) -> Self {
        Self {
            credential_type: credential_type.into(),
            granted_privileges: granted_privileges.into_iter().collect(),
            resource_id_match,
            cascade: false,
            name: String::new(),
        }
    }

    pub fn with_cascade(mut self, cascade: bool) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Whether `credential` satisfies this rule on a policy owned by `policy_resource`.
    ///
    /// Global credentials never satisfy a `self` rule.
    pub fn matches(&self, credential: &Credential, policy_resource: Option<&str>) -> bool {
        if credential.credential_type() != &self.credential_type {
            return false;
        }
        match self.resource_id_match {
            ResourceMatch::Any => true,
            ResourceMatch::Own => match (credential.resource_id(), policy_resource) {
                (Some(held), Some(owner)) => held == owner,
                _ => false,
            },
        }
    }

    pub fn grants(&self, privilege: &Privilege) -> bool {
        self.granted_privileges.contains(privilege)
    }

    pub(crate) fn validate(&self) -> PolicyResult<()> {
        if self.credential_type.as_str().trim().is_empty() {
            return Err(PolicyError::malformed("credential rule has an empty credentialType"));
        }
        validate_privileges(&self.granted_privileges, "credential rule")
    }
}

/// Presenting a verified credential of `credential_type` (from `issuer`, carrying
/// every listed claim) grants `granted_privileges`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedCredentialRule {
    #[serde(rename = "type")]
    pub credential_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default)]
    pub claims: Vec<Claim>,
    pub granted_privileges: Vec<Privilege>,
    #[serde(default)]
    pub name: String,
}

impl VerifiedCredentialRule {
    pub fn new(credential_type: impl Into<String>, granted_privileges: impl IntoIterator<Item = Privilege>) -> Self {
        Self {
            credential_type: credential_type.into(),
            issuer: None,
            claims: Vec::new(),
            granted_privileges: granted_privileges.into_iter().collect(),
            name: String::new(),
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_claim(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.push(Claim::new(name, value));
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn matches(&self, credential: &VerifiedCredential) -> bool {
        if credential.credential_type != self.credential_type {
            return false;
        }
        if let Some(issuer) = &self.issuer {
            if &credential.issuer != issuer {
                return false;
            }
        }
        self.claims
            .iter()
            .all(|required| credential.claim(&required.name) == Some(required.value.as_str()))
    }

    pub(crate) fn validate(&self) -> PolicyResult<()> {
        if self.credential_type.trim().is_empty() {
            return Err(PolicyError::malformed("verified credential rule has an empty type"));
        }
        validate_privileges(&self.granted_privileges, "verified credential rule")
    }
}

/// Holding `source_privilege` implies also holding `granted_privileges`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivilegeRule {
    pub source_privilege: Privilege,
    pub granted_privileges: Vec<Privilege>,
    #[serde(default)]
    pub name: String,
}

impl PrivilegeRule {
    pub fn new(
        source_privilege: Privilege,
        granted_privileges: impl IntoIterator<Item = Privilege>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            source_privilege,
            granted_privileges: granted_privileges.into_iter().collect(),
            name: name.into(),
        }
    }

    pub(crate) fn validate(&self) -> PolicyResult<()> {
        validate_privileges(std::slice::from_ref(&self.source_privilege), "privilege rule source")?;
        validate_privileges(&self.granted_privileges, "privilege rule")
    }
}

fn validate_privileges(privileges: &[Privilege], context: &str) -> PolicyResult<()> {
    if privileges.iter().any(|p| p.as_str().trim().is_empty()) {
        return Err(PolicyError::malformed(format!("{context} names an empty privilege")));
    }
    Ok(())
}
