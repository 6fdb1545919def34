//! Policy evaluation: the pure "is access granted" predicate and its audit trail.
//!
//! Evaluation never performs IO and never fails; every parsing concern is
//! settled before a policy reaches this module.

use serde::Serialize;
use thiserror::Error;

use keystone_core::{AgentId, PolicyError, PolicyId};

use crate::{Actor, AuthorizationPolicy, Credential, Privilege, PrivilegeSet, VerifiedCredential};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: agent {agent_id} lacks '{privilege}' on policy {policy_id}: {reason}")]
    Forbidden {
        policy_id: PolicyId,
        agent_id: AgentId,
        privilege: Privilege,
        reason: String,
    },

    #[error("no authorization policy supplied: {0}")]
    MissingPolicy(String),

    #[error(transparent)]
    Malformed(#[from] PolicyError),
}

/// Whether `privilege` is granted on `policy` to the holder of the given credentials.
///
/// - Anonymous READ short-circuits.
/// - Direct grants come from credential and verified-credential rules.
/// - Privilege rules then cascade to a fixed point.
pub fn is_access_granted(
    credentials: &[Credential],
    verified_credentials: &[VerifiedCredential],
    policy: &AuthorizationPolicy,
    privilege: &Privilege,
) -> bool {
    if privilege.is_read() && policy.anonymous_read_access() {
        return true;
    }
    let direct = direct_privileges(credentials, verified_credentials, policy);
    if direct.contains(privilege) {
        return true;
    }
    cascade_privileges(policy, direct).contains(privilege)
}

/// Full set of privileges granted on `policy` ("my privileges").
pub fn granted_privileges(
    credentials: &[Credential],
    verified_credentials: &[VerifiedCredential],
    policy: &AuthorizationPolicy,
) -> PrivilegeSet {
    granted_privileges_with(credentials, verified_credentials, policy, &PrivilegeSet::new())
}

/// Like [`granted_privileges`], seeding the cascade with privileges inherited
/// from an ancestor policy.
pub fn granted_privileges_with(
    credentials: &[Credential],
    verified_credentials: &[VerifiedCredential],
    policy: &AuthorizationPolicy,
    inherited: &PrivilegeSet,
) -> PrivilegeSet {
    let mut seed = direct_privileges(credentials, verified_credentials, policy);
    seed.extend(inherited.iter().cloned());

    let mut granted = cascade_privileges(policy, seed);
    if policy.anonymous_read_access() {
        granted.insert(Privilege::READ);
    }
    granted
}

/// Privileges granted directly by credential and verified-credential rules.
pub fn direct_privileges(
    credentials: &[Credential],
    verified_credentials: &[VerifiedCredential],
    policy: &AuthorizationPolicy,
) -> PrivilegeSet {
    let resource = policy.resource_id();
    let mut granted = PrivilegeSet::new();

    for rule in policy.credential_rules() {
        if credentials.iter().any(|c| rule.matches(c, resource)) {
            granted.extend(rule.granted_privileges.iter().cloned());
        }
    }
    for rule in policy.verified_credential_rules() {
        if verified_credentials.iter().any(|vc| rule.matches(vc)) {
            granted.extend(rule.granted_privileges.iter().cloned());
        }
    }
    granted
}

/// Close `granted` under the policy's privilege rules.
///
/// Terminates on cyclic rules: each pass either adds a privilege from the
/// finite vocabulary or stops.
pub fn cascade_privileges(policy: &AuthorizationPolicy, mut granted: PrivilegeSet) -> PrivilegeSet {
    loop {
        let before = granted.len();
        for rule in policy.privilege_rules() {
            if granted.contains(&rule.source_privilege) {
                granted.extend(rule.granted_privileges.iter().cloned());
            }
        }
        if granted.len() == before {
            return granted;
        }
    }
}

/// Check access for `actor` or fail with [`AuthzError::Forbidden`].
pub fn grant_access_or_fail(
    actor: &Actor,
    policy: &AuthorizationPolicy,
    privilege: &Privilege,
    reason: &str,
) -> Result<(), AuthzError> {
    if is_access_granted(actor.credentials(), actor.verified_credentials(), policy, privilege) {
        Ok(())
    } else {
        Err(forbidden(actor, policy, privilege, reason))
    }
}

pub(crate) fn forbidden(actor: &Actor, policy: &AuthorizationPolicy, privilege: &Privilege, reason: &str) -> AuthzError {
    AuthzError::Forbidden {
        policy_id: policy.id(),
        agent_id: actor.agent_id(),
        privilege: privilege.clone(),
        reason: reason.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Access Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of an access decision.
#[derive(Debug, Clone, Serialize)]
pub struct AccessExplanation {
    pub policy_id: PolicyId,
    pub resource_type: String,
    pub required_privilege: String,
    pub granted: bool,
    /// Human-readable reason for the decision.
    pub reason: String,
    pub actor: ActorState,
    pub matched_rules: Vec<MatchedRule>,
    /// The cascaded privilege set, sorted.
    pub effective_privileges: Vec<String>,
    pub denial_reason: Option<DenialReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActorState {
    pub agent_id: AgentId,
    pub credentials: Vec<String>,
    pub verified_credentials: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchedRule {
    pub kind: RuleKind,
    pub name: String,
    pub granted_privileges: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Credential,
    VerifiedCredential,
    Inherited,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    /// No rule matched any presented credential.
    NoMatchingCredential,
    /// Some rules matched but none of them leads to the privilege.
    MissingPrivilege,
}

/// Explain why `privilege` is (or would be) granted or denied on `policy`.
pub fn explain_access(actor: &Actor, policy: &AuthorizationPolicy, privilege: &Privilege) -> AccessExplanation {
    explain_access_with(actor, policy, privilege, &PrivilegeSet::new())
}

/// [`explain_access`] for a policy that also receives `inherited` privileges.
pub fn explain_access_with(
    actor: &Actor,
    policy: &AuthorizationPolicy,
    privilege: &Privilege,
    inherited: &PrivilegeSet,
) -> AccessExplanation {
    let resource = policy.resource_id();
    let mut matched_rules = Vec::new();

    for rule in policy.credential_rules() {
        if actor.credentials().iter().any(|c| rule.matches(c, resource)) {
            matched_rules.push(MatchedRule {
                kind: RuleKind::Credential,
                name: rule_label(&rule.name, rule.credential_type.as_str()),
                granted_privileges: names(&rule.granted_privileges),
            });
        }
    }
    for rule in policy.verified_credential_rules() {
        if actor.verified_credentials().iter().any(|vc| rule.matches(vc)) {
            matched_rules.push(MatchedRule {
                kind: RuleKind::VerifiedCredential,
                name: rule_label(&rule.name, &rule.credential_type),
                granted_privileges: names(&rule.granted_privileges),
            });
        }
    }
    if !inherited.is_empty() {
        matched_rules.push(MatchedRule {
            kind: RuleKind::Inherited,
            name: "parent policy".to_string(),
            granted_privileges: inherited.iter().map(ToString::to_string).collect(),
        });
    }

    let effective = granted_privileges_with(actor.credentials(), actor.verified_credentials(), policy, inherited);
    let anonymous = privilege.is_read() && policy.anonymous_read_access();
    let granted = anonymous || effective.contains(privilege);

    let actor_state = ActorState {
        agent_id: actor.agent_id(),
        credentials: actor.credential_summary(),
        verified_credentials: actor
            .verified_credentials()
            .iter()
            .map(|vc| format!("{} ({})", vc.credential_type, vc.issuer))
            .collect(),
    };

    let (reason, denial_reason) = if anonymous {
        ("Policy allows anonymous read access".to_string(), None)
    } else if granted {
        (
            format!("Privilege '{privilege}' granted by {} matching rule(s)", matched_rules.len()),
            None,
        )
    } else {
        let kind = if matched_rules.is_empty() {
            DenialKind::NoMatchingCredential
        } else {
            DenialKind::MissingPrivilege
        };
        let effective_list: Vec<String> = effective.iter().map(ToString::to_string).collect();
        (
            format!("Privilege '{privilege}' not granted. Effective privileges: {effective_list:?}"),
            Some(DenialReason {
                kind,
                message: format!("Missing required privilege: '{privilege}'"),
                suggestions: suggestions(policy, privilege),
            }),
        )
    };

    AccessExplanation {
        policy_id: policy.id(),
        resource_type: policy.resource_type().to_string(),
        required_privilege: privilege.to_string(),
        granted,
        reason,
        actor: actor_state,
        matched_rules,
        effective_privileges: effective.iter().map(ToString::to_string).collect(),
        denial_reason,
    }
}

/// Credentials that would lead to `privilege`, directly or through the cascade.
fn suggestions(policy: &AuthorizationPolicy, privilege: &Privilege) -> Vec<String> {
    let leads_to = |granted: &[Privilege]| {
        cascade_privileges(policy, granted.iter().cloned().collect()).contains(privilege)
    };

    let mut out: Vec<String> = Vec::new();
    for rule in policy.credential_rules().iter().filter(|r| leads_to(&r.granted_privileges)) {
        let scope = match (rule.resource_id_match, policy.resource_id()) {
            (crate::ResourceMatch::Own, Some(resource)) => format!(" scoped to resource '{resource}'"),
            (crate::ResourceMatch::Own, None) => " scoped to this resource".to_string(),
            (crate::ResourceMatch::Any, _) => String::new(),
        };
        out.push(format!("Hold credential '{}'{scope}", rule.credential_type));
    }
    for rule in policy
        .verified_credential_rules()
        .iter()
        .filter(|r| leads_to(&r.granted_privileges))
    {
        out.push(format!("Present a verified credential of type '{}'", rule.credential_type));
    }
    if out.is_empty() {
        out.push(format!("No rule on this policy grants '{privilege}'; add a credential rule"));
    }
    out.dedup();
    out
}

fn rule_label(name: &str, fallback: &str) -> String {
    if name.is_empty() { fallback.to_string() } else { name.to_string() }
}

fn names(privileges: &[Privilege]) -> Vec<String> {
    privileges.iter().map(ToString::to_string).collect()
}
