//! Corral node agent entrypoint
//!
//! Wires the coordination loops together: discovers the node's network
//! identity, registers it in the discovery store, and runs the
//! resolver, membership watcher and dependency gate as independent
//! tasks sharing one store handle.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use corral_core::{config, keys, spawn_registration, DiscoveryStore, EtcdStore, InitConfig};

use corral_agent::config::AgentConfig;
use corral_agent::deps::{self, DependencyWaiter};
use corral_agent::dns::{self, ClusterDns};
use corral_agent::netutil;
use corral_agent::targets;
use corral_agent::watcher::ClusterWatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    info!("starting corral agent");

    let agent = AgentConfig::default();
    let run_dir = config::run_dir();
    let mut init = InitConfig::load(&run_dir).context("loading init.yml")?;
    let mut cluster = init.cluster().context("reading cluster configuration")?;

    // Settle our network identity before anything registers.
    cluster.myhostname = netutil::local_hostname(&cluster.myhostname);
    cluster.myaddress = netutil::discover_address(
        &cluster.myaddress,
        &cluster.kvstore.host,
        cluster.kvstore.port,
    )
    .await
    .context("discovering local address")?;
    info!(
        cluster = %cluster.cluster,
        hostname = %cluster.myhostname,
        address = %cluster.myaddress,
        service = %cluster.service,
        "node identity"
    );

    // The dependency spec supersedes whatever the image tooling left in
    // the cluster section; both it and the identity are persisted for
    // the other tools sharing init.yml.
    let declaration = deps::load_dependency_spec(&agent.dependency_file, &cluster.service)
        .context("loading dependency spec")?;
    cluster.depends = declaration.depends.clone();
    cluster.providers = declaration.providers.clone();
    init.write_cluster(&cluster).context("writing init.yml")?;

    let store: Arc<dyn DiscoveryStore> = Arc::new(
        EtcdStore::connect(&cluster.kvstore.host, cluster.kvstore.port)
            .await
            .context("connecting to discovery store")?,
    );
    info!(
        host = %cluster.kvstore.host,
        port = cluster.kvstore.port,
        "connected to discovery store"
    );

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    // Keep our host key alive for the process lifetime.
    tasks.push(spawn_registration(
        store.clone(),
        keys::host_key(&cluster.cluster, &cluster.myhostname),
        cluster.myaddress.clone(),
        agent.registration_ttl,
        cancel.clone(),
    )?);

    if cluster.nodns {
        info!("resolver disabled by configuration");
    } else {
        match dns::ensure_local_nameserver(&agent.resolv_conf).await {
            Ok(true) => info!("local resolver prepended to resolv.conf"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "could not update resolv.conf, continuing without it"),
        }

        let socket = ClusterDns::bind(agent.dns_port, agent.dns_fallback_port)
            .await
            .context("binding resolver socket")?;
        let resolver = ClusterDns::new(store.clone(), &cluster.cluster, agent.record_ttl);
        let resolver_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = resolver.listen(socket, resolver_cancel).await {
                warn!(error = %e, "resolver stopped with error");
            }
        }));
    }

    let watcher = ClusterWatcher::new(store.clone(), &cluster.cluster, &agent);
    let watcher_cancel = cancel.clone();
    tasks.push(tokio::spawn(
        async move { watcher.run(watcher_cancel).await },
    ));

    // Dependency gate: wait, run the service hooks, then provide.
    {
        let store = store.clone();
        let cluster = cluster.clone();
        let agent = agent.clone();
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            let waiter = DependencyWaiter::new(
                store.clone(),
                &cluster.cluster,
                cluster.depends.clone(),
                agent.dependency_poll_interval,
            );
            let Some(resolved) = waiter.wait(cancel.clone()).await else {
                return;
            };

            let sum = deps::run_service_hooks(&agent.service_hook_dir, &resolved).await;
            if sum > 0 {
                warn!(sum, "service hooks reported failures");
            }

            if cluster.providers.is_empty() {
                info!("no services to register");
                return;
            }
            match targets::load_targets(&agent.service_dir, &cluster.service) {
                Ok(map) if targets::targets_ready(&map) => {}
                Ok(map) => {
                    // Target readiness is flipped by the supervisor;
                    // registration proceeds once the gate above has run.
                    info!(outstanding = map.len(), "provider targets declared");
                }
                Err(e) => {
                    warn!(error = %e, "no provider target file, registering anyway");
                }
            }
            match deps::register_providers(
                store,
                &cluster.cluster,
                &cluster.providers,
                &cluster.myhostname,
                agent.registration_ttl,
                &cancel,
            ) {
                Ok(handles) => {
                    for handle in handles {
                        let _ = handle.await;
                    }
                }
                Err(e) => warn!(error = %e, "could not register provided services"),
            }
        }));
    }

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    info!("shutdown signal received");
    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
    info!("corral agent stopped");
    Ok(())
}
