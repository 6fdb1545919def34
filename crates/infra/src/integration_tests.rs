//! Integration tests for the invalidation pipeline.
//!
//! Tests: write path → InvalidationPublisher → bus → InvalidationSubscriber → decision cache
//!
//! Verifies:
//! - A mutation evicts cached decisions in every engine on the bus
//! - Stale decisions are served until the invalidation arrives
//! - License entitlement changes invalidate the license's policy

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use keystone_auth::{
        Actor, AuthorizationConfig, AuthorizationPolicy, Credential, CredentialRule, DecisionCache, NoInheritance,
        PolicyChain, Privilege, ResourceMatch, ResourceType,
    };
    use keystone_core::{AgentId, LicenseId, LicensePolicyId, PolicyId};
    use keystone_events::{DispatchMode, InMemoryBus, InvalidationMessage, MessageBus, PublisherConfig};
    use keystone_licensing::{
        EntitlementType, GrantedEntitlement, License, LicenseCredentialRule, LicensePolicy,
    };

    use crate::config::EngineConfig;
    use crate::engine::Engine;

    type Bus = InMemoryBus<InvalidationMessage>;

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn engine_on(bus: &Arc<Bus>) -> Engine<Bus> {
        Engine::start(EngineConfig::default(), Arc::clone(bus), Arc::new(NoInheritance)).unwrap()
    }

    fn space_chain(resource: &str) -> PolicyChain {
        let mut policy = AuthorizationPolicy::new(PolicyId::new(), ResourceType::SPACE, Some(resource.into()));
        policy
            .append_credential_rule(CredentialRule::new(
                "space-admin",
                [Privilege::READ, Privilege::UPDATE],
                ResourceMatch::Own,
            ))
            .unwrap();
        PolicyChain::new(policy)
    }

    fn space_admin(resource: &str) -> Actor {
        let agent = AgentId::new();
        Actor::new(agent, vec![Credential::scoped("space-admin", resource, agent)])
    }

    #[test]
    fn invalidation_evicts_every_engine_on_the_bus() {
        let bus = Arc::new(Bus::new());
        let writer = engine_on(&bus);
        let reader = engine_on(&bus);
        let chain = space_chain("S1");
        let actor = space_admin("S1");

        for engine in [&writer, &reader] {
            assert!(engine
                .service()
                .is_access_granted(&actor, Some(&chain), &Privilege::UPDATE)
                .unwrap());
            assert_eq!(engine.cache().len(), 1);
        }

        writer.invalidate_policies([chain.policy().id()]);

        wait_for(|| {
            writer.subscriber_stats().entries_evicted() == 1 && reader.subscriber_stats().entries_evicted() == 1
        });
        assert!(writer.cache().is_empty() && reader.cache().is_empty());

        writer.shutdown();
        reader.shutdown();
    }

    #[test]
    fn stale_decision_is_served_until_invalidated() {
        let bus = Arc::new(Bus::new());
        let engine = engine_on(&bus);
        let mut chain = space_chain("S1");
        let actor = space_admin("S1");
        let policy_id = chain.policy().id();

        assert!(engine.service().is_access_granted(&actor, Some(&chain), &Privilege::UPDATE).unwrap());

        // Administrative reset without announcing it yet.
        let mut revoked = chain.policy().clone();
        revoked.reset();
        chain = PolicyChain::new(revoked);
        assert!(engine.service().is_access_granted(&actor, Some(&chain), &Privilege::UPDATE).unwrap());

        engine.invalidate_policies([policy_id]);
        wait_for(|| engine.cache().is_empty());

        assert!(!engine.service().is_access_granted(&actor, Some(&chain), &Privilege::UPDATE).unwrap());
        engine.shutdown();
    }

    #[test]
    fn large_mutations_arrive_in_bounded_batches() {
        let bus = Arc::new(Bus::new());
        let engine = engine_on(&bus);
        let observer = bus.subscribe();

        let ids: Vec<PolicyId> = (0..450).map(|_| PolicyId::new()).collect();
        engine.invalidate_policies(ids);

        let sizes: Vec<usize> = (0..3)
            .map(|_| observer.recv_timeout(Duration::from_secs(2)).unwrap().len())
            .collect();
        assert_eq!(sizes, vec![200, 200, 50]);
        wait_for(|| engine.subscriber_stats().messages_received() == 3);
        engine.shutdown();
    }

    #[test]
    fn license_changes_invalidate_the_license_policy() {
        let bus = Arc::new(Bus::new());
        let engine = engine_on(&bus);
        let observer = bus.subscribe();

        let license_policy = LicensePolicy::new(
            LicensePolicyId::new(),
            vec![LicenseCredentialRule::new(
                "account-license-plus",
                [GrantedEntitlement::new(EntitlementType::ACCOUNT_SPACE_PLUS, 2)],
                "Account Plus",
            )],
        )
        .unwrap();
        let mut license = License::new(LicenseId::new(), PolicyId::new(), Vec::new());
        let credentials = vec![Credential::scoped("account-license-plus", "A1", AgentId::new())];

        let resolved = engine.apply_license_policy(&mut license, &credentials, &license_policy);
        assert_eq!(resolved.get(&EntitlementType::ACCOUNT_SPACE_PLUS), Some(&2));
        assert_eq!(license.entitlement_limit(&EntitlementType::ACCOUNT_SPACE_PLUS), Ok(2));

        let message = observer.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(message.policy_ids(), &[license.authorization_policy_id.to_string()]);

        // Re-applying the same resolution changes nothing and publishes nothing.
        engine.apply_license_policy(&mut license, &credentials, &license_policy);
        engine.shutdown();
        assert!(observer.try_recv().is_err());
    }

    #[test]
    fn disabled_authorization_bypasses_the_cache() {
        let config = EngineConfig::default().with_authorization(AuthorizationConfig::default().with_enabled(false));
        let engine = Engine::in_memory(config, Arc::new(NoInheritance)).unwrap();

        let stranger = Actor::new(AgentId::new(), Vec::new());
        assert!(engine
            .service()
            .is_access_granted(&stranger, Some(&space_chain("S1")), &Privilege::DELETE)
            .unwrap());
        assert!(engine.cache().is_empty());
        assert_eq!(engine.cache().evict_policy(&PolicyId::new()), 0);
        engine.shutdown();
    }

    #[test]
    fn inline_dispatch_publishes_on_the_calling_thread() {
        let bus = Arc::new(Bus::new());
        let observer = bus.subscribe();
        let config = EngineConfig::default()
            .with_publisher(PublisherConfig::default().with_dispatch(DispatchMode::Inline).with_batch_size(2));
        let engine = Engine::start(config, Arc::clone(&bus), Arc::new(NoInheritance)).unwrap();

        engine.invalidate_policies([PolicyId::new(), PolicyId::new(), PolicyId::new()]);

        let sizes: Vec<usize> = observer.drain().iter().map(InvalidationMessage::len).collect();
        assert_eq!(sizes, vec![2, 1]);
        engine.shutdown();
    }
}
