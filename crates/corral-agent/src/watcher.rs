//! Cluster membership watcher
//!
//! Tracks the discovery store's host list through the debounced poller.
//! Once a membership change has been quiet for the settle window, the
//! host table is rewritten wholesale and the change handlers run in
//! declared order. The host table is a pure function of the settled
//! snapshot: same snapshot, same bytes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use corral_core::{keys, DiscoveryStore};

use crate::config::AgentConfig;
use crate::hooks;
use crate::poller::DebouncedPoller;

/// Sorted host snapshot, hostname to address.
pub type HostSnapshot = BTreeMap<String, String>;

/// Render a snapshot in hosts(5) line format, sorted by hostname.
pub fn render_hosts(hosts: &HostSnapshot) -> String {
    let mut out = String::new();
    for (hostname, address) in hosts {
        out.push_str(address);
        out.push(' ');
        out.push_str(hostname);
        out.push('\n');
    }
    out
}

/// Write the host table atomically: temp file in the same directory,
/// then rename over the target.
pub async fn write_hosts_file(path: &Path, hosts: &HostSnapshot) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, render_hosts(hosts)).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Watches cluster membership and materializes the host table.
pub struct ClusterWatcher {
    store: Arc<dyn DiscoveryStore>,
    cluster: String,
    hosts_path: PathBuf,
    hook_dir: PathBuf,
    poller: DebouncedPoller,
}

impl ClusterWatcher {
    pub fn new(store: Arc<dyn DiscoveryStore>, cluster: &str, config: &AgentConfig) -> Self {
        Self {
            store,
            cluster: cluster.to_string(),
            hosts_path: config.hosts_path.clone(),
            hook_dir: config.cluster_hook_dir.clone(),
            poller: DebouncedPoller::new(config.poll_interval, config.settle_window),
        }
    }

    /// Poll until cancelled. Never returns early: store failures are
    /// logged and retried on the next tick.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(cluster = %self.cluster, "watching cluster membership");
        let prefix = keys::hosts_prefix(&self.cluster);
        self.poller
            .run(
                || {
                    let store = self.store.clone();
                    let prefix = prefix.clone();
                    async move {
                        let hosts = store.list(&prefix).await?;
                        debug!(count = hosts.len(), "hosts in cluster");
                        Ok(hosts)
                    }
                },
                |snapshot| self.apply(snapshot),
                cancel,
            )
            .await;
    }

    /// Apply one settled snapshot: host table first, then handlers.
    /// Returns false (baseline not advanced) when the write fails, so
    /// the next settle retries it.
    async fn apply(&self, snapshot: HostSnapshot) -> bool {
        if let Err(e) = write_hosts_file(&self.hosts_path, &snapshot).await {
            error!(path = %self.hosts_path.display(), error = %e, "could not write host table");
            return false;
        }
        debug!(path = %self.hosts_path.display(), hosts = snapshot.len(), "host table written");

        let sum = hooks::run_hook_dir(&self.hook_dir).await;
        if sum > 0 {
            warn!(sum, "cluster hooks reported failures");
        }
        info!(hosts = snapshot.len(), "membership change applied");
        true
    }
}
