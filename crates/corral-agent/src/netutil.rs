//! Local network identity
//!
//! Picks the address and hostname this node advertises, once, before
//! any core component starts. An explicit config value always wins.

use std::io;
use std::net::IpAddr;

use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// Address this node should advertise.
///
/// Uses the configured address when set; otherwise asks the routing
/// table which local address would reach the discovery store (a
/// connected UDP socket makes the routing decision without sending
/// a packet).
pub async fn discover_address(
    configured: &str,
    store_host: &str,
    store_port: u16,
) -> io::Result<String> {
    if !configured.is_empty() {
        debug!(address = %configured, "using configured address");
        return Ok(configured.to_string());
    }

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect((store_host, store_port)).await?;
    let address = socket.local_addr()?.ip();
    if let IpAddr::V4(v4) = address {
        if v4.is_loopback() {
            warn!("selected address is loopback; is the discovery store local?");
        }
    }
    debug!(address = %address, "address discovered");
    Ok(address.to_string())
}

/// Hostname this node registers under: configured value, then the
/// container environment, then a last-resort default.
pub fn local_hostname(configured: &str) -> String {
    if !configured.is_empty() {
        return configured.to_string();
    }
    match std::env::var("HOSTNAME") {
        Ok(hostname) if !hostname.is_empty() => hostname,
        _ => {
            warn!("no HOSTNAME in environment, registering as localhost");
            "localhost".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn configured_address_wins() {
        let address = discover_address("10.1.2.3", "localhost", 2379).await.unwrap();
        assert_eq!(address, "10.1.2.3");
    }

    #[tokio::test]
    async fn discovers_a_routable_address() {
        let address = discover_address("", "127.0.0.1", 2379).await.unwrap();
        assert_eq!(address, "127.0.0.1");
    }

    #[test]
    fn configured_hostname_wins() {
        assert_eq!(local_hostname("node-1"), "node-1");
    }
}
