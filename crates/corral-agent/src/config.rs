//! Agent runtime settings
//!
//! Tunables for the agent's loops, with defaults matching production
//! deployments. Paths derive from the run directory and the
//! `/etc/corral` convention.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings with production defaults.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Membership poll interval.
    pub poll_interval: Duration,

    /// Quiet period required before a membership change is applied.
    pub settle_window: Duration,

    /// Dependency-wait poll interval.
    pub dependency_poll_interval: Duration,

    /// TTL for host and service registrations.
    pub registration_ttl: Duration,

    /// Resolver port, tried first. Needs privilege.
    pub dns_port: u16,

    /// Resolver port used when binding the privileged port fails.
    pub dns_fallback_port: u16,

    /// TTL stamped on answer records.
    pub record_ttl: u32,

    /// Host table written on every settled membership change.
    pub hosts_path: PathBuf,

    /// Scripts run (no arguments) on every settled membership change.
    pub cluster_hook_dir: PathBuf,

    /// Scripts named `<dependency>.sh`, run with the provider hostname
    /// once all dependencies resolve.
    pub service_hook_dir: PathBuf,

    /// The dependency spec, `service -> {depends, providers}`.
    pub dependency_file: PathBuf,

    /// Directory holding `services-<service>.yml` target files.
    pub service_dir: PathBuf,

    /// System resolver configuration to prepend ourselves to.
    pub resolv_conf: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            settle_window: Duration::from_secs(10),
            dependency_poll_interval: Duration::from_secs(2),
            registration_ttl: Duration::from_secs(60),
            dns_port: 53,
            dns_fallback_port: 10053,
            record_ttl: 16,
            hosts_path: corral_core::config::run_dir().join("hosts.corral"),
            cluster_hook_dir: PathBuf::from("/etc/corral/cluster-hooks.d"),
            service_hook_dir: PathBuf::from("/etc/corral/service-hooks.d"),
            dependency_file: PathBuf::from("/etc/corral/dependencies.yml"),
            service_dir: PathBuf::from("/etc/corral"),
            resolv_conf: PathBuf::from("/etc/resolv.conf"),
        }
    }
}
