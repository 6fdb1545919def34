//! Composition root: wires the authorization service, the decision cache and
//! the invalidation publisher/subscriber pair around one message bus.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use keystone_auth::{
    AuthorizationService, Credential, InMemoryDecisionCache, InheritanceStrategy, NoInheritance,
};
use keystone_core::PolicyId;
use keystone_events::{
    InMemoryBus, InvalidationMessage, InvalidationPublisher, InvalidationSubscriber, MessageBus, SubscriberHandle,
    SubscriberStats,
};
use keystone_licensing::{License, LicensePolicy, ResolvedEntitlements, resolve_entitlements};

use crate::config::EngineConfig;

/// Authorization service as assembled by the engine.
pub type EngineService = AuthorizationService<Arc<dyn InheritanceStrategy>, Arc<InMemoryDecisionCache>>;

/// One serving process's view of the policy engine.
///
/// Mutations announced through [`invalidate_policies`](Self::invalidate_policies)
/// reach every engine subscribed to the same bus, including this one.
pub struct Engine<B>
where
    B: MessageBus<InvalidationMessage> + 'static,
{
    service: EngineService,
    cache: Arc<InMemoryDecisionCache>,
    publisher: InvalidationPublisher<Arc<B>>,
    subscriber: SubscriberHandle,
}

impl<B> Engine<B>
where
    B: MessageBus<InvalidationMessage> + 'static,
{
    pub fn start(config: EngineConfig, bus: Arc<B>, strategy: Arc<dyn InheritanceStrategy>) -> anyhow::Result<Self> {
        let cache = Arc::new(InMemoryDecisionCache::new(
            config.authorization.decision_ttl,
            config.authorization.cache_capacity,
        ));

        let subscriber = InvalidationSubscriber::spawn("policy-cache-evictor", bus.as_ref(), Arc::clone(&cache))
            .context("failed to spawn invalidation subscriber")?;
        let publisher = InvalidationPublisher::new(Arc::clone(&bus), config.publisher.clone())
            .context("failed to spawn invalidation dispatcher")?;
        let service = AuthorizationService::new(config.authorization.clone(), strategy, Arc::clone(&cache));

        info!(
            authorization_enabled = config.authorization.enabled,
            decision_ttl_secs = config.authorization.decision_ttl.as_secs(),
            cache_capacity = config.authorization.cache_capacity,
            subject = %config.publisher.subject,
            batch_size = config.publisher.batch_size,
            "policy engine started"
        );

        Ok(Self {
            service,
            cache,
            publisher,
            subscriber,
        })
    }

    pub fn service(&self) -> &EngineService {
        &self.service
    }

    pub fn cache(&self) -> &InMemoryDecisionCache {
        &self.cache
    }

    pub fn publisher(&self) -> &InvalidationPublisher<Arc<B>> {
        &self.publisher
    }

    pub fn subscriber_stats(&self) -> &SubscriberStats {
        self.subscriber.stats()
    }

    /// Announce that the given policies changed. Returns without waiting on the bus.
    pub fn invalidate_policies<I>(&self, policy_ids: I)
    where
        I: IntoIterator<Item = PolicyId>,
    {
        self.publisher
            .publish_policy_invalidations(policy_ids.into_iter().map(|id| id.to_string()));
    }

    /// Re-resolve a license's entitlements from its owner's credentials.
    ///
    /// When the materialized entitlements change, the license's authorization
    /// policy is invalidated.
    pub fn apply_license_policy(
        &self,
        license: &mut License,
        credentials: &[Credential],
        policy: &LicensePolicy,
    ) -> ResolvedEntitlements {
        let resolved = resolve_entitlements(credentials, policy);
        if license.apply_policy(&resolved) {
            self.invalidate_policies([license.authorization_policy_id]);
        }
        resolved
    }

    /// Flush pending invalidations and stop the background threads.
    pub fn shutdown(self) {
        self.publisher.shutdown();
        self.subscriber.shutdown();
        info!("policy engine stopped");
    }
}

impl Engine<InMemoryBus<InvalidationMessage>> {
    /// Single-process engine on an in-memory bus.
    pub fn in_memory(config: EngineConfig, strategy: Arc<dyn InheritanceStrategy>) -> anyhow::Result<Self> {
        Self::start(config, Arc::new(InMemoryBus::new()), strategy)
    }
}

#[cfg(feature = "redis")]
impl Engine<crate::event_bus::RedisInvalidationBus> {
    /// Engine whose invalidations travel over Redis pub/sub (`config.redis_url`).
    pub fn redis(config: EngineConfig, strategy: Arc<dyn InheritanceStrategy>) -> anyhow::Result<Self> {
        let url = config
            .redis_url
            .clone()
            .context("KEYSTONE_REDIS_URL must be set for the redis transport")?;
        let bus = crate::event_bus::RedisInvalidationBus::new(&url, config.publisher.subject.clone())
            .context("failed to open redis client")?;
        Self::start(config, Arc::new(bus), strategy)
    }
}

/// Initialize tracing, read the environment and start an in-memory engine
/// without ancestor inheritance.
pub fn bootstrap_in_memory() -> anyhow::Result<Engine<InMemoryBus<InvalidationMessage>>> {
    keystone_observability::init();
    let config = EngineConfig::from_env().context("invalid engine configuration")?;
    Engine::in_memory(config, Arc::new(NoInheritance))
}
