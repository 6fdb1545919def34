//! Engine configuration loaded from the environment.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use keystone_auth::AuthorizationConfig;
use keystone_events::PublisherConfig;

pub const ENV_AUTHZ_ENABLED: &str = "KEYSTONE_AUTHZ_ENABLED";
pub const ENV_DECISION_TTL_SECS: &str = "KEYSTONE_DECISION_TTL_SECS";
pub const ENV_DECISION_CACHE_CAPACITY: &str = "KEYSTONE_DECISION_CACHE_CAPACITY";
pub const ENV_INVALIDATION_SUBJECT: &str = "KEYSTONE_INVALIDATION_SUBJECT";
pub const ENV_INVALIDATION_BATCH_SIZE: &str = "KEYSTONE_INVALIDATION_BATCH_SIZE";
pub const ENV_REDIS_URL: &str = "KEYSTONE_REDIS_URL";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything needed to assemble an [`Engine`](crate::engine::Engine).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub authorization: AuthorizationConfig,
    pub publisher: PublisherConfig,
    /// Set to route invalidations over Redis pub/sub (feature `redis`).
    pub redis_url: Option<String>,
}

impl EngineConfig {
    /// Read `KEYSTONE_*` variables; unset ones keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(enabled) = parse::<bool, _>(&lookup, ENV_AUTHZ_ENABLED)? {
            config.authorization = config.authorization.with_enabled(enabled);
        }
        if let Some(secs) = parse::<u64, _>(&lookup, ENV_DECISION_TTL_SECS)? {
            config.authorization = config.authorization.with_decision_ttl(Duration::from_secs(secs));
        }
        if let Some(capacity) = parse::<usize, _>(&lookup, ENV_DECISION_CACHE_CAPACITY)? {
            config.authorization = config.authorization.with_cache_capacity(capacity);
        }
        if let Some(subject) = non_empty(&lookup, ENV_INVALIDATION_SUBJECT) {
            config.publisher = config.publisher.with_subject(subject);
        }
        if let Some(batch_size) = parse::<usize, _>(&lookup, ENV_INVALIDATION_BATCH_SIZE)? {
            config.publisher = config.publisher.with_batch_size(batch_size);
        }
        config.redis_url = non_empty(&lookup, ENV_REDIS_URL);

        Ok(config)
    }

    pub fn with_authorization(mut self, authorization: AuthorizationConfig) -> Self {
        self.authorization = authorization;
        self
    }

    pub fn with_publisher(mut self, publisher: PublisherConfig) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_redis_url(mut self, redis_url: impl Into<String>) -> Self {
        self.redis_url = Some(redis_url.into());
        self
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = non_empty(lookup, key) else {
        return Ok(None);
    };
    raw.parse::<T>().map(Some).map_err(|err| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason: err.to_string(),
    })
}
