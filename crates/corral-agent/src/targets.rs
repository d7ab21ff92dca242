//! Provider target files
//!
//! A node that provides cluster services declares the local sub-targets
//! backing them in `services-<service>.yml` (target name to ready
//! flag). The supervisor integration flips the flags; the agent
//! registers its provided services only once every target is ready.

use std::collections::BTreeMap;
use std::path::Path;

use corral_core::ConfigError;

/// Load the target map for `service` from `<service_dir>/services-<service>.yml`.
pub fn load_targets(service_dir: &Path, service: &str) -> Result<BTreeMap<String, bool>, ConfigError> {
    let path = service_dir.join(format!("services-{}.yml", service));
    let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })
}

/// All targets confirmed ready. An empty map counts as ready: nothing
/// is outstanding.
pub fn targets_ready(targets: &BTreeMap<String, bool>) -> bool {
    targets.values().all(|ready| *ready)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_target_map() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("services-headnode.yml"),
            "postgres: true\nscheduler: false\n",
        )
        .unwrap();

        let targets = load_targets(dir.path(), "headnode").unwrap();
        assert_eq!(targets.len(), 2);
        assert!(targets["postgres"]);
        assert!(!targets["scheduler"]);
        assert!(!targets_ready(&targets));
    }

    #[test]
    fn all_true_targets_are_ready() {
        let mut targets = BTreeMap::new();
        targets.insert("postgres".to_string(), true);
        assert!(targets_ready(&targets));
        assert!(targets_ready(&BTreeMap::new()));
    }

    #[test]
    fn missing_target_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_targets(dir.path(), "headnode"),
            Err(ConfigError::Io { .. })
        ));
    }
}
