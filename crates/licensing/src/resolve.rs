//! Entitlement resolution: held license credentials -> entitlement limits.

use std::collections::BTreeMap;

use tracing::warn;

use keystone_auth::Credential;

use crate::{EntitlementType, LicensePolicy};

/// Resolved entitlements by type, with their limits.
pub type ResolvedEntitlements = BTreeMap<EntitlementType, u32>;

/// Apply every rule whose credential type the holder has.
///
/// License credentials match on type alone; their resource scope is ignored.
/// When several rules grant the same entitlement the largest limit wins, so
/// the result does not depend on rule or credential order.
pub fn resolve_entitlements(credentials: &[Credential], policy: &LicensePolicy) -> ResolvedEntitlements {
    let mut resolved = ResolvedEntitlements::new();

    for rule in policy.credential_rules() {
        if !credentials.iter().any(|c| c.credential_type() == &rule.credential_type) {
            continue;
        }
        for grant in &rule.granted_entitlements {
            resolved
                .entry(grant.entitlement_type.clone())
                .and_modify(|limit| *limit = (*limit).max(grant.limit))
                .or_insert(grant.limit);
        }
    }
    resolved
}

/// Resolve against a license policy still in its stored JSON form.
///
/// A policy that fails to parse resolves to no entitlements.
pub fn resolve_entitlements_from_json(credentials: &[Credential], raw_policy: &str) -> ResolvedEntitlements {
    match LicensePolicy::from_json(raw_policy) {
        Ok(policy) => resolve_entitlements(credentials, &policy),
        Err(err) => {
            warn!(error = %err, data_integrity = true, "malformed license policy; resolving no entitlements");
            ResolvedEntitlements::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use keystone_core::{AgentId, LicensePolicyId};
    use proptest::prelude::*;

    use super::*;
    use crate::{GrantedEntitlement, LicenseCredentialRule};

    fn plans() -> LicensePolicy {
        LicensePolicy::new(
            LicensePolicyId::new(),
            vec![
                LicenseCredentialRule::new(
                    "space-license-plus",
                    [
                        GrantedEntitlement::new(EntitlementType::SPACE_PLUS, 3),
                        GrantedEntitlement::new(EntitlementType::SPACE_FLAG_SAVE_AS_TEMPLATE, 1),
                    ],
                    "Space Plus",
                ),
                LicenseCredentialRule::new(
                    "space-license-premium",
                    [GrantedEntitlement::new(EntitlementType::SPACE_PLUS, 5)],
                    "Space Premium",
                ),
                LicenseCredentialRule::new(
                    "account-license-plus",
                    [GrantedEntitlement::new(EntitlementType::ACCOUNT_SPACE_PLUS, 2)],
                    "Account Plus",
                ),
            ],
        )
        .unwrap()
    }

    #[test]
    fn collisions_keep_the_larger_limit() {
        let agent = AgentId::new();
        let credentials = vec![
            Credential::global("space-license-plus", agent),
            Credential::global("space-license-premium", agent),
        ];

        let resolved = resolve_entitlements(&credentials, &plans());

        assert_eq!(resolved.get(&EntitlementType::SPACE_PLUS), Some(&5));
        assert_eq!(resolved.get(&EntitlementType::SPACE_FLAG_SAVE_AS_TEMPLATE), Some(&1));
        assert_eq!(resolved.get(&EntitlementType::ACCOUNT_SPACE_PLUS), None);
    }

    #[test]
    fn scoped_license_credentials_match_on_type() {
        let credentials = vec![Credential::scoped("account-license-plus", "A1", AgentId::new())];

        let resolved = resolve_entitlements(&credentials, &plans());

        assert_eq!(resolved, ResolvedEntitlements::from([(EntitlementType::ACCOUNT_SPACE_PLUS, 2)]));
    }

    #[test]
    fn malformed_policy_resolves_to_nothing() {
        let credentials = vec![Credential::global("space-license-plus", AgentId::new())];

        assert!(resolve_entitlements_from_json(&credentials, "{not json").is_empty());
        assert!(resolve_entitlements_from_json(&credentials, r#"{"id":"nope","credentialRules":[]}"#).is_empty());
    }

    #[test]
    fn stored_policy_resolves() {
        let raw = serde_json::to_string(&plans().to_record().unwrap()).unwrap();
        let credentials = vec![Credential::global("space-license-premium", AgentId::new())];

        let resolved = resolve_entitlements_from_json(&credentials, &raw);

        assert_eq!(resolved, ResolvedEntitlements::from([(EntitlementType::SPACE_PLUS, 5)]));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

        #[test]
        fn resolution_ignores_rule_and_credential_order(
            held in prop::collection::vec(
                prop::sample::select(vec!["space-license-plus", "space-license-premium", "account-license-plus"]),
                0..5,
            ),
            rotation in 0usize..3,
        ) {
            let agent = AgentId::new();
            let credentials: Vec<Credential> = held.iter().map(|t| Credential::global(*t, agent)).collect();
            let mut reversed = credentials.clone();
            reversed.reverse();

            let policy = plans();
            let mut rules = policy.credential_rules().to_vec();
            rules.rotate_left(rotation);
            let rotated = LicensePolicy::new(policy.id(), rules).unwrap();

            prop_assert_eq!(
                resolve_entitlements(&credentials, &policy),
                resolve_entitlements(&reversed, &rotated)
            );
        }
    }
}
