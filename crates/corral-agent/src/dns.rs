//! Cluster DNS resolver
//!
//! Answers A-record queries for cluster hostnames and service names out
//! of the discovery store. Resolution candidates, in priority order:
//! local cache (reserved, always empty), host key, then service key
//! indirected through the provider's host key. The first positive
//! answer wins and exactly one response is sent per query.
//!
//! A query carrying more than one question is answered with zero
//! answers; that is an input-shape constraint of this resolver, not a
//! protocol error.

use std::io;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;

use hickory_proto::op::{Message, MessageType, OpCode};
use hickory_proto::rr::{RData, Record, RecordType};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use corral_core::{keys, DiscoveryStore};

/// Reserved extension point. Always empty in this design; it exists so
/// the candidate chain keeps its shape when a cache is added.
#[derive(Debug, Default)]
struct LocalCache;

impl LocalCache {
    fn lookup(&self, _name: &str) -> Option<Ipv4Addr> {
        None
    }
}

/// DNS server answering cluster name lookups from the discovery store.
pub struct ClusterDns {
    store: Arc<dyn DiscoveryStore>,
    cluster: String,
    record_ttl: u32,
    cache: LocalCache,
}

impl ClusterDns {
    pub fn new(store: Arc<dyn DiscoveryStore>, cluster: &str, record_ttl: u32) -> Self {
        Self {
            store,
            cluster: cluster.to_string(),
            record_ttl,
            cache: LocalCache,
        }
    }

    /// Bind the resolver socket: the privileged port first, the
    /// fallback when permission is denied.
    pub async fn bind(port: u16, fallback_port: u16) -> io::Result<UdpSocket> {
        match UdpSocket::bind(("127.0.0.1", port)).await {
            Ok(socket) => Ok(socket),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!(
                    port,
                    fallback_port, "not privileged to bind resolver port, using fallback"
                );
                UdpSocket::bind(("127.0.0.1", fallback_port)).await
            }
            Err(e) => Err(e),
        }
    }

    /// Serve queries until cancelled.
    pub async fn listen(&self, socket: UdpSocket, cancel: CancellationToken) -> io::Result<()> {
        info!(addr = %socket.local_addr()?, cluster = %self.cluster, "resolver listening");
        let mut buf = [0u8; 4096];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("resolver stopped");
                    return Ok(());
                }
                received = socket.recv_from(&mut buf) => {
                    let (len, peer) = match received {
                        Ok(received) => received,
                        Err(e) => {
                            warn!(error = %e, "resolver receive failed");
                            continue;
                        }
                    };
                    let request = match Message::from_vec(&buf[..len]) {
                        Ok(request) => request,
                        Err(e) => {
                            warn!(error = %e, "dropping undecodable query");
                            continue;
                        }
                    };
                    let response = self.handle_query(&request).await;
                    match response.to_vec() {
                        Ok(bytes) => {
                            if let Err(e) = socket.send_to(&bytes, peer).await {
                                warn!(error = %e, "resolver send failed");
                            }
                        }
                        Err(e) => warn!(error = %e, "could not encode response"),
                    }
                }
            }
        }
    }

    /// Answer one query. Always produces exactly one response message:
    /// qr=1, ra=1, rd=0, the original questions echoed, and zero or one
    /// A answers.
    pub async fn handle_query(&self, request: &Message) -> Message {
        let mut response = Message::new();
        response
            .set_id(request.id())
            .set_message_type(MessageType::Response)
            .set_op_code(OpCode::Query)
            .set_recursion_available(true)
            .set_recursion_desired(false);
        for query in request.queries() {
            response.add_query(query.clone());
        }

        if request.queries().len() != 1 {
            warn!(
                questions = request.queries().len(),
                "query must carry exactly one question, answering empty"
            );
            return response;
        }

        let query = &request.queries()[0];
        if query.query_type() != RecordType::A {
            debug!(qtype = %query.query_type(), "only address records are served");
            return response;
        }

        let qname = query.name().to_utf8();
        let qname = qname.trim_end_matches('.');
        debug!(name = %qname, "query received");

        if let Some(address) = self.lookup(qname).await {
            info!(name = %qname, address = %address, "resolved");
            response.add_answer(Record::from_rdata(
                query.name().clone(),
                self.record_ttl,
                RData::A(address.into()),
            ));
        } else {
            debug!(name = %qname, "no record, answering empty");
        }
        response
    }

    /// Candidate chain: cache, host key, service indirection. A
    /// candidate's not-found or store error yields to the next, never
    /// aborting the chain.
    async fn lookup(&self, qname: &str) -> Option<Ipv4Addr> {
        // Virtual-node aliases resolve to their backing host.
        let host = qname.strip_prefix("vnode_").unwrap_or(qname);

        if let Some(address) = self.cache.lookup(host) {
            return Some(address);
        }
        if let Some(address) = self.lookup_host(host).await {
            return Some(address);
        }
        self.lookup_service(qname).await
    }

    async fn lookup_host(&self, hostname: &str) -> Option<Ipv4Addr> {
        match self.store.get(&keys::host_key(&self.cluster, hostname)).await {
            Ok(Some(value)) => match value.parse() {
                Ok(address) => Some(address),
                Err(_) => {
                    warn!(host = %hostname, value = %value, "stored address is not an IPv4 address");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(host = %hostname, error = %e, "host lookup failed, treating as no answer");
                None
            }
        }
    }

    async fn lookup_service(&self, service: &str) -> Option<Ipv4Addr> {
        let provider = match self
            .store
            .get(&keys::service_key(&self.cluster, service))
            .await
        {
            Ok(Some(provider)) => provider,
            Ok(None) => return None,
            Err(e) => {
                warn!(service = %service, error = %e, "service lookup failed, treating as no answer");
                return None;
            }
        };
        debug!(service = %service, provider = %provider, "service resolves through provider");
        self.lookup_host(&provider).await
    }
}

/// Make the local resolver the first nameserver consulted.
///
/// Prepends `nameserver 127.0.0.1` unless it is already the first
/// entry. Privileged; callers log and skip on permission errors.
pub async fn ensure_local_nameserver(path: &Path) -> io::Result<bool> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let first_nameserver = contents
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("nameserver"));
    if first_nameserver == Some("nameserver 127.0.0.1") {
        return Ok(false);
    }

    tokio::fs::write(path, format!("nameserver 127.0.0.1\n{}", contents)).await?;
    Ok(true)
}
