//! Error taxonomy
//!
//! `StoreError` covers the discovery store; absence of a key is not an
//! error (`get` returns `Ok(None)`), only transport and misuse are.
//! `ConfigError` covers the declarative files required at startup and
//! is always fatal.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by the discovery store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Operation attempted on a client whose connection is gone.
    #[error("discovery store client is not connected")]
    NotConnected,

    /// Registration TTLs must leave room for the `ttl - 10s` renewal
    /// interval.
    #[error("registration ttl of {0:?} is below the {min:?} minimum", min = crate::store::MIN_REGISTRATION_TTL)]
    TtlTooShort(Duration),

    /// Transport or protocol failure. Polling loops treat this as
    /// transient and retry on the next tick.
    #[error("discovery store transport error: {0}")]
    Transport(String),
}

impl From<etcd_client::Error> for StoreError {
    fn from(err: etcd_client::Error) -> Self {
        StoreError::Transport(err.to_string())
    }
}

/// Failures loading the declarative startup files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{path} does not define a cluster configuration")]
    MissingClusterSection { path: PathBuf },

    #[error("dependency file does not declare service {service}")]
    ServiceNotDeclared { service: String },
}
