//! Dependency gate
//!
//! Blocks node startup until every cluster service this node depends on
//! has a registered provider, then runs one hook per dependency with
//! the provider hostname, and finally registers the services this node
//! provides. Cluster bring-up order is not guaranteed, so the wait has
//! no retry limit; progress is visible through periodic log lines.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use corral_core::{keys, spawn_registration, ConfigError, DiscoveryStore, StoreError};

use crate::hooks;

/// One service's entry in the dependency spec.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceDeclaration {
    /// Cluster services that must have a provider before we start.
    #[serde(default)]
    pub depends: Vec<String>,

    /// Cluster services this node provides once its targets are ready.
    #[serde(default)]
    pub providers: Vec<String>,
}

/// Load the declaration for `service` from the dependency spec file.
///
/// The file maps service names to declarations. A missing file or an
/// undeclared service is fatal: the node must not start in an undefined
/// state.
pub fn load_dependency_spec(path: &Path, service: &str) -> Result<ServiceDeclaration, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let spec: BTreeMap<String, ServiceDeclaration> =
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    spec.get(service)
        .cloned()
        .ok_or_else(|| ConfigError::ServiceNotDeclared {
            service: service.to_string(),
        })
}

/// Polls the discovery store until all dependencies have providers.
pub struct DependencyWaiter {
    store: Arc<dyn DiscoveryStore>,
    cluster: String,
    depends: Vec<String>,
    poll_interval: Duration,
}

impl DependencyWaiter {
    pub fn new(
        store: Arc<dyn DiscoveryStore>,
        cluster: &str,
        depends: Vec<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            cluster: cluster.to_string(),
            depends,
            poll_interval,
        }
    }

    /// Wait until every dependency resolves to a provider hostname.
    ///
    /// Each poll cycle looks every outstanding dependency up
    /// concurrently and decides only once all lookups return. Not-found
    /// and transport errors both count as unsatisfied; neither aborts
    /// the cycle. Returns `None` when cancelled first.
    pub async fn wait(&self, cancel: CancellationToken) -> Option<BTreeMap<String, String>> {
        let mut satisfied: BTreeMap<String, String> = BTreeMap::new();
        if self.depends.is_empty() {
            debug!("no cluster service dependencies");
            return Some(satisfied);
        }
        info!(depends = ?self.depends, "waiting for cluster service dependencies");

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("dependency wait cancelled");
                    return None;
                }
                _ = ticker.tick() => {
                    let outstanding: Vec<String> = self
                        .depends
                        .iter()
                        .filter(|dep| !satisfied.contains_key(*dep))
                        .cloned()
                        .collect();

                    let lookups = outstanding.iter().map(|dep| {
                        let store = self.store.clone();
                        let key = keys::service_key(&self.cluster, dep);
                        async move { (dep.clone(), store.get(&key).await) }
                    });

                    for (dep, result) in join_all(lookups).await {
                        match result {
                            Ok(Some(provider)) => {
                                info!(service = %dep, provider = %provider, "found service provider");
                                satisfied.insert(dep, provider);
                            }
                            Ok(None) => {}
                            Err(e) => {
                                debug!(service = %dep, error = %e, "lookup failed, still unsatisfied");
                            }
                        }
                    }

                    if satisfied.len() == self.depends.len() {
                        info!("cluster service dependencies satisfied");
                        return Some(satisfied);
                    }

                    let waiting: Vec<&String> = self
                        .depends
                        .iter()
                        .filter(|dep| !satisfied.contains_key(*dep))
                        .collect();
                    info!(waiting = ?waiting, "still waiting on cluster service dependencies");
                }
            }
        }
    }
}

/// Run one hook per satisfied dependency, `<dependency>.sh <provider>`,
/// all in parallel, and sum the exit codes. A missing hook satisfies
/// its slot immediately.
pub async fn run_service_hooks(hook_dir: &Path, resolved: &BTreeMap<String, String>) -> i32 {
    let runs = resolved.iter().map(|(dep, provider)| {
        let script = hook_dir.join(format!("{}.sh", dep));
        async move {
            match tokio::fs::try_exists(&script).await {
                Ok(true) => {
                    debug!(service = %dep, provider = %provider, "running service hook");
                    hooks::run_hook(&script, Some(provider)).await
                }
                Ok(false) => {
                    warn!(service = %dep, "no service hook installed");
                    0
                }
                Err(e) => {
                    warn!(service = %dep, error = %e, "could not stat service hook");
                    0
                }
            }
        }
    });

    let sum: i32 = join_all(runs).await.into_iter().sum();
    if sum > 0 {
        warn!(sum, "some service hooks did not run successfully");
    } else {
        debug!("service hooks finished");
    }
    sum
}

/// Register every provided service under a renewing lease. Invoked by
/// the supervisor integration once local provider targets are ready.
pub fn register_providers(
    store: Arc<dyn DiscoveryStore>,
    cluster: &str,
    providers: &[String],
    myhostname: &str,
    ttl: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<JoinHandle<()>>, StoreError> {
    let mut handles = Vec::with_capacity(providers.len());
    for service in providers {
        info!(service = %service, host = %myhostname, "registering service");
        handles.push(spawn_registration(
            store.clone(),
            keys::service_key(cluster, service),
            myhostname.to_string(),
            ttl,
            cancel.clone(),
        )?);
    }
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use corral_core::MemoryStore;

    const DEPENDENCIES_YML: &str = "\
headnode:
  depends: []
  providers: [db]
workernode:
  depends: [db]
";

    fn write_spec(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("dependencies.yml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(DEPENDENCIES_YML.as_bytes()).unwrap();
        path
    }

    #[test]
    fn spec_declares_depends_and_providers() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_spec(dir.path());

        let headnode = load_dependency_spec(&path, "headnode").unwrap();
        assert!(headnode.depends.is_empty());
        assert_eq!(headnode.providers, ["db"]);

        let workernode = load_dependency_spec(&path, "workernode").unwrap();
        assert_eq!(workernode.depends, ["db"]);
        assert!(workernode.providers.is_empty());
    }

    #[test]
    fn missing_spec_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_dependency_spec(&dir.path().join("doesntexist.yml"), "headnode");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn undeclared_service_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_spec(dir.path());
        let result = load_dependency_spec(&path, "notourservice");
        assert!(matches!(
            result,
            Err(ConfigError::ServiceNotDeclared { service }) if service == "notourservice"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn provider_registered_before_wait_resolves_within_one_poll() {
        let store = Arc::new(MemoryStore::new());
        store
            .set("/cluster/test/services/db", "headnode-host", None)
            .await
            .unwrap();

        let waiter = DependencyWaiter::new(
            store,
            "test",
            vec!["db".into()],
            Duration::from_secs(2),
        );
        let resolved = waiter.wait(CancellationToken::new()).await.unwrap();
        assert_eq!(resolved["db"], "headnode-host");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_unblocks_only_when_last_dependency_appears() {
        let store = Arc::new(MemoryStore::new());
        let waiter = Arc::new(DependencyWaiter::new(
            store.clone() as Arc<dyn DiscoveryStore>,
            "test",
            vec!["db".into(), "queue".into()],
            Duration::from_secs(2),
        ));

        let wait = {
            let waiter = waiter.clone();
            tokio::spawn(async move { waiter.wait(CancellationToken::new()).await })
        };
        tokio::task::yield_now().await;
        assert!(!wait.is_finished());

        store
            .set("/cluster/test/services/db", "host-a", None)
            .await
            .unwrap();
        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
        }
        assert!(!wait.is_finished(), "one of two dependencies must not unblock");

        store
            .set("/cluster/test/services/queue", "host-b", None)
            .await
            .unwrap();
        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
        }

        let resolved = wait.await.unwrap().unwrap();
        assert_eq!(resolved["db"], "host-a");
        assert_eq!(resolved["queue"], "host-b");
    }

    #[tokio::test]
    async fn no_dependencies_resolves_immediately() {
        let store = Arc::new(MemoryStore::new());
        let waiter = DependencyWaiter::new(store, "test", vec![], Duration::from_secs(2));
        let resolved = waiter.wait(CancellationToken::new()).await.unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn missing_service_hook_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolved = BTreeMap::new();
        resolved.insert("db".to_string(), "headnode-host".to_string());
        assert_eq!(run_service_hooks(dir.path(), &resolved).await, 0);
    }

    #[tokio::test]
    async fn service_hook_gets_provider_and_codes_are_summed() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let db_hook = dir.path().join("db.sh");
        std::fs::write(
            &db_hook,
            format!("#!/bin/sh\nprintf '%s' \"$1\" > {}\n", out.display()),
        )
        .unwrap();
        std::fs::set_permissions(&db_hook, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::write(dir.path().join("queue.sh"), "#!/bin/sh\nexit 2\n").unwrap();

        let mut resolved = BTreeMap::new();
        resolved.insert("db".to_string(), "headnode-host".to_string());
        resolved.insert("queue".to_string(), "host-b".to_string());

        assert_eq!(run_service_hooks(dir.path(), &resolved).await, 2);
        assert_eq!(std::fs::read_to_string(out).unwrap(), "headnode-host");
    }

    #[tokio::test(start_paused = true)]
    async fn registered_providers_are_readable() {
        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        let handles = register_providers(
            store.clone() as Arc<dyn DiscoveryStore>,
            "test",
            &["db".to_string(), "queue".to_string()],
            "headnode-host",
            Duration::from_secs(60),
            &cancel,
        )
        .unwrap();
        tokio::task::yield_now().await;

        assert_eq!(
            store
                .get("/cluster/test/services/db")
                .await
                .unwrap()
                .as_deref(),
            Some("headnode-host")
        );
        assert_eq!(
            store
                .get("/cluster/test/services/queue")
                .await
                .unwrap()
                .as_deref(),
            Some("headnode-host")
        );

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
