//! Cluster key namespace
//!
//! All discovery state lives under `/cluster/<name>/`. Hosts map a
//! hostname to its IPv4 address, services map a service name to the
//! hostname currently providing it.

/// Key holding the address of a single host.
pub fn host_key(cluster: &str, hostname: &str) -> String {
    format!("/cluster/{}/hosts/{}", cluster, hostname)
}

/// Prefix under which every host of the cluster is registered.
pub fn hosts_prefix(cluster: &str) -> String {
    format!("/cluster/{}/hosts/", cluster)
}

/// Key holding the provider hostname of a single service.
pub fn service_key(cluster: &str, service: &str) -> String {
    format!("/cluster/{}/services/{}", cluster, service)
}

/// Last path segment of a key. `list()` results are keyed by it.
pub fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_cluster_scoped() {
        assert_eq!(host_key("test", "node-1"), "/cluster/test/hosts/node-1");
        assert_eq!(service_key("test", "db"), "/cluster/test/services/db");
        assert_eq!(hosts_prefix("test"), "/cluster/test/hosts/");
    }

    #[test]
    fn basename_takes_last_segment() {
        assert_eq!(basename("/cluster/test/hosts/node-1"), "node-1");
        assert_eq!(basename("plain"), "plain");
    }
}
