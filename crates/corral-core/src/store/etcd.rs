//! Etcd-backed discovery store
//!
//! TTL'd writes grant a fresh lease per write, giving the same
//! semantics as a TTL-on-set store: the key lives until the TTL elapses
//! unless it is written again.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use etcd_client::{Client, EventType, GetOptions, PutOptions};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::keys;
use crate::store::DiscoveryStore;

/// Discovery store client backed by an etcd cluster.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// Connect to etcd, retrying with exponential backoff until the
    /// endpoint answers or the backoff gives up.
    pub async fn connect(host: &str, port: u16) -> Result<Self, StoreError> {
        let endpoints = vec![format!("http://{}:{}", host, port)];
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(10),
            max_elapsed_time: Some(Duration::from_secs(120)),
            ..Default::default()
        };

        let client = retry(backoff, || async {
            match Client::connect(&endpoints, None).await {
                Ok(client) => {
                    debug!(endpoint = %endpoints[0], "connected to etcd");
                    Ok(client)
                }
                Err(e) => {
                    warn!(error = %e, "etcd connection failed, retrying");
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await
        .map_err(|e| StoreError::Transport(format!("failed to connect to etcd: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl DiscoveryStore for EtcdStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut client = self.client.clone();
        let response = client.get(key, None).await?;
        match response.kvs().first() {
            Some(kv) => Ok(Some(kv.value_str()?.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        let options = match ttl {
            Some(ttl) => {
                let lease = client.lease_grant(ttl.as_secs() as i64, None).await?;
                Some(PutOptions::new().with_lease(lease.id()))
            }
            None => None,
        };
        client.put(key, value, options).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<BTreeMap<String, String>, StoreError> {
        let mut client = self.client.clone();
        let response = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;
        let mut children = BTreeMap::new();
        for kv in response.kvs() {
            children.insert(
                keys::basename(kv.key_str()?).to_string(),
                kv.value_str()?.to_string(),
            );
        }
        Ok(children)
    }

    async fn watch(&self, key: &str) -> Result<watch::Receiver<Option<String>>, StoreError> {
        let mut client = self.client.clone();
        let initial = self.get(key).await?;
        let (tx, rx) = watch::channel(initial);
        let (_watcher, mut stream) = client.watch(key, None).await?;
        let key = key.to_string();

        tokio::spawn(async move {
            loop {
                match stream.message().await {
                    Ok(Some(response)) => {
                        for event in response.events() {
                            let update = match event.event_type() {
                                EventType::Put => event
                                    .kv()
                                    .and_then(|kv| kv.value_str().ok())
                                    .map(str::to_string),
                                EventType::Delete => None,
                            };
                            if tx.send(update).is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => {
                        debug!(key = %key, "watch stream closed");
                        return;
                    }
                    Err(e) => {
                        // Advisory channel only; pollers stay correct.
                        warn!(key = %key, error = %e, "watch stream failed");
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}
