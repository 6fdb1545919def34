//! Infrastructure layer: configuration, transports and the engine composition root.

pub mod config;
pub mod engine;
pub mod event_bus;

mod integration_tests;

pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, EngineService, bootstrap_in_memory};
