//! Core shared types for corral
//!
//! This crate contains the discovery-store abstraction, the cluster key
//! namespace and the configuration loading shared by the corral node
//! agent.

pub mod config;
pub mod error;
pub mod keys;
pub mod store;

pub use config::{ClusterConfig, InitConfig, KvStoreConfig};
pub use error::{ConfigError, StoreError};
pub use store::{spawn_registration, DiscoveryStore, EtcdStore, MemoryStore, MIN_REGISTRATION_TTL};
