//! Corral node agent
//!
//! Coordination layer for containerized cluster nodes: registers the
//! node in the discovery store, resolves cluster names over DNS, keeps
//! a local host table in sync with membership, and gates startup on
//! declared service dependencies.

pub mod config;
pub mod deps;
pub mod dns;
pub mod hooks;
pub mod netutil;
pub mod poller;
pub mod targets;
pub mod watcher;
