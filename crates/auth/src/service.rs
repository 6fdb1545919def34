//! Authorization service: the request-path entry point.
//!
//! Wraps the pure evaluator with ancestor inheritance, a decision cache, the
//! development-mode switch, and audit logging. All collaborators are passed in
//! at construction.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use keystone_core::PolicyId;

use crate::cache::{DecisionCache, DecisionKey, NoDecisionCache};
use crate::evaluate::{self, AccessExplanation, AuthzError};
use crate::inheritance::{InheritanceStrategy, NoInheritance};
use crate::{Actor, AuthorizationPolicy, Privilege, PrivilegeSet, VerifiedCredential, credential_fingerprint};

/// Authorization service settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationConfig {
    /// When `false`, every check is granted (development only).
    pub enabled: bool,
    /// Upper bound on how long a cached decision may be served.
    pub decision_ttl: Duration,
    pub cache_capacity: usize,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            decision_ttl: Duration::from_secs(300),
            cache_capacity: 10_000,
        }
    }
}

impl AuthorizationConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_decision_ttl(mut self, ttl: Duration) -> Self {
        self.decision_ttl = ttl;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }
}

/// A target policy together with its ancestors, nearest parent first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyChain {
    policy: AuthorizationPolicy,
    ancestors: Vec<AuthorizationPolicy>,
}

impl PolicyChain {
    pub fn new(policy: AuthorizationPolicy) -> Self {
        Self {
            policy,
            ancestors: Vec::new(),
        }
    }

    pub fn with_ancestors(mut self, ancestors: Vec<AuthorizationPolicy>) -> Self {
        self.ancestors = ancestors;
        self
    }

    /// Append the next ancestor up the tree.
    pub fn with_parent(mut self, parent: AuthorizationPolicy) -> Self {
        self.ancestors.push(parent);
        self
    }

    pub fn policy(&self) -> &AuthorizationPolicy {
        &self.policy
    }

    pub fn ancestors(&self) -> &[AuthorizationPolicy] {
        &self.ancestors
    }

    /// Target first, then ancestors while `strategy` keeps inheriting.
    fn inheriting_levels<S>(&self, strategy: &S) -> Vec<&AuthorizationPolicy>
    where
        S: InheritanceStrategy + ?Sized,
    {
        let mut levels = vec![&self.policy];
        for parent in &self.ancestors {
            let child = levels[levels.len() - 1];
            if !strategy.inherits_from(child.resource_type(), parent.resource_type()) {
                break;
            }
            levels.push(parent);
        }
        levels
    }
}

impl From<AuthorizationPolicy> for PolicyChain {
    fn from(policy: AuthorizationPolicy) -> Self {
        Self::new(policy)
    }
}

/// Privileges flowing into the target policy from its inheriting ancestors.
struct Resolution {
    inherited: PrivilegeSet,
    dependencies: Vec<PolicyId>,
}

#[derive(Debug)]
pub struct AuthorizationService<S = NoInheritance, C = NoDecisionCache> {
    config: AuthorizationConfig,
    strategy: S,
    cache: C,
}

impl AuthorizationService<NoInheritance, NoDecisionCache> {
    /// Standalone policies, no caching.
    pub fn uncached(config: AuthorizationConfig) -> Self {
        Self::new(config, NoInheritance, NoDecisionCache)
    }
}

impl<S, C> AuthorizationService<S, C>
where
    S: InheritanceStrategy,
    C: DecisionCache,
{
    pub fn new(config: AuthorizationConfig, strategy: S, cache: C) -> Self {
        Self { config, strategy, cache }
    }

    pub fn config(&self) -> &AuthorizationConfig {
        &self.config
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Whether `actor` holds `privilege` on the chain's target policy.
    ///
    /// Only a missing policy is an error; a denial is `Ok(false)`.
    pub fn is_access_granted(
        &self,
        actor: &Actor,
        chain: Option<&PolicyChain>,
        privilege: &Privilege,
    ) -> Result<bool, AuthzError> {
        let chain = require_chain(chain, privilege)?;
        let policy = chain.policy();

        if !self.config.enabled {
            debug!(policy_id = %policy.id(), %privilege, "authorization disabled; granting");
            return Ok(true);
        }
        if privilege.is_read() && policy.anonymous_read_access() {
            return Ok(true);
        }

        let verified = valid_verified_credentials(actor);
        let key = DecisionKey::new(
            policy.id(),
            credential_fingerprint(actor.credentials(), &verified),
            privilege.clone(),
        );
        if let Some(granted) = self.cache.get(&key) {
            debug!(policy_id = %policy.id(), %privilege, granted, "decision cache hit");
            return Ok(granted);
        }
        let epoch = self.cache.epoch();

        let resolution = self.resolve_inherited(actor, &verified, chain);
        let granted = evaluate::granted_privileges_with(actor.credentials(), &verified, policy, &resolution.inherited)
            .contains(privilege);
        self.cache.insert(key, granted, &resolution.dependencies, epoch);

        debug!(
            policy_id = %policy.id(),
            agent_id = %actor.agent_id(),
            %privilege,
            granted,
            "access evaluated"
        );
        Ok(granted)
    }

    /// Like [`is_access_granted`](Self::is_access_granted), turning a denial into
    /// [`AuthzError::Forbidden`] and recording it in the audit log.
    pub fn grant_access_or_fail(
        &self,
        actor: &Actor,
        chain: Option<&PolicyChain>,
        privilege: &Privilege,
        reason: &str,
    ) -> Result<(), AuthzError> {
        if self.is_access_granted(actor, chain, privilege)? {
            return Ok(());
        }
        let chain = require_chain(chain, privilege)?;
        let policy = chain.policy();

        warn!(
            policy_id = %policy.id(),
            agent_id = %actor.agent_id(),
            %privilege,
            reason,
            credentials = ?actor.credential_summary(),
            "authorization denied"
        );
        Err(evaluate::forbidden(actor, policy, privilege, reason))
    }

    /// The full privilege set `actor` holds on the chain's target policy.
    ///
    /// With authorization disabled this is every privilege the target policy mentions.
    pub fn granted_privileges(&self, actor: &Actor, chain: Option<&PolicyChain>) -> Result<PrivilegeSet, AuthzError> {
        let chain = chain.ok_or_else(|| AuthzError::MissingPolicy("granted privileges".to_string()))?;
        let policy = chain.policy();

        if !self.config.enabled {
            let mut all = policy.privilege_vocabulary();
            all.insert(Privilege::READ);
            return Ok(all);
        }

        let verified = valid_verified_credentials(actor);
        let resolution = self.resolve_inherited(actor, &verified, chain);
        Ok(evaluate::granted_privileges_with(
            actor.credentials(),
            &verified,
            policy,
            &resolution.inherited,
        ))
    }

    /// Audit explanation of a decision, inheritance included.
    pub fn explain(
        &self,
        actor: &Actor,
        chain: Option<&PolicyChain>,
        privilege: &Privilege,
    ) -> Result<AccessExplanation, AuthzError> {
        let chain = require_chain(chain, privilege)?;
        let verified = valid_verified_credentials(actor);
        let resolution = self.resolve_inherited(actor, &verified, chain);
        let filtered = actor.clone().with_verified_credentials(verified);
        Ok(evaluate::explain_access_with(
            &filtered,
            chain.policy(),
            privilege,
            &resolution.inherited,
        ))
    }

    /// Walk from the top-most inheriting ancestor down to the target's parent,
    /// carrying each level's effective set into the next.
    fn resolve_inherited(&self, actor: &Actor, verified: &[VerifiedCredential], chain: &PolicyChain) -> Resolution {
        let levels = chain.inheriting_levels(&self.strategy);
        let dependencies = levels.iter().map(|p| p.id()).collect();

        let mut inherited = PrivilegeSet::new();
        for depth in (1..levels.len()).rev() {
            let parent = levels[depth];
            let child = levels[depth - 1];
            let effective = evaluate::granted_privileges_with(actor.credentials(), verified, parent, &inherited);
            inherited = self
                .strategy
                .inherited_privileges(child.resource_type(), parent.resource_type(), &effective);
        }

        Resolution { inherited, dependencies }
    }
}

fn require_chain<'a>(chain: Option<&'a PolicyChain>, privilege: &Privilege) -> Result<&'a PolicyChain, AuthzError> {
    chain.ok_or_else(|| AuthzError::MissingPolicy(format!("checking privilege '{privilege}'")))
}

/// Verified credentials valid right now; the rest are ignored.
fn valid_verified_credentials(actor: &Actor) -> Vec<VerifiedCredential> {
    let now = Utc::now();
    actor
        .verified_credentials()
        .iter()
        .filter(|vc| match vc.validate_at(now) {
            Ok(()) => true,
            Err(err) => {
                debug!(credential_type = %vc.credential_type, issuer = %vc.issuer, error = %err, "ignoring verified credential");
                false
            }
        })
        .cloned()
        .collect()
}
