//! Cluster configuration
//!
//! The node's identity and wiring live in the `cluster:` section of
//! `<run_dir>/init.yml`, written by the image tooling before the agent
//! starts. The run directory comes from `INIT_RUN_DIR` and defaults to
//! `/run`. The rest of `init.yml` belongs to the process supervisor and
//! is preserved verbatim when the cluster section is written back.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

/// Location of the discovery store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvStoreConfig {
    pub host: String,
    pub port: u16,
}

/// The `cluster:` section of `init.yml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Name of the cluster this node joins.
    pub cluster: String,

    /// Hostname this node registers under. Filled from the environment
    /// when the image tooling leaves it empty.
    #[serde(default)]
    pub myhostname: String,

    /// Address this node advertises. Discovered at startup when empty.
    #[serde(default)]
    pub myaddress: String,

    /// Local service identity, used to look up the dependency spec.
    pub service: String,

    /// Cluster services this node requires before starting.
    #[serde(default)]
    pub depends: Vec<String>,

    /// Cluster services this node provides once its targets are ready.
    #[serde(default)]
    pub providers: Vec<String>,

    pub kvstore: KvStoreConfig,

    /// Disable the embedded resolver.
    #[serde(default)]
    pub nodns: bool,
}

/// Directory holding `init.yml`.
pub fn run_dir() -> PathBuf {
    match std::env::var("INIT_RUN_DIR") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            warn!("no INIT_RUN_DIR in environment, assuming /run");
            PathBuf::from("/run")
        }
    }
}

/// Handle on the full `init.yml` document.
pub struct InitConfig {
    path: PathBuf,
    document: serde_yaml::Value,
}

impl InitConfig {
    /// Load `init.yml` from the given run directory.
    pub fn load(run_dir: &Path) -> Result<Self, ConfigError> {
        let path = run_dir.join("init.yml");
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let document = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, document })
    }

    /// Extract the cluster section. Missing section is fatal.
    pub fn cluster(&self) -> Result<ClusterConfig, ConfigError> {
        let section = self
            .document
            .get("cluster")
            .ok_or_else(|| ConfigError::MissingClusterSection {
                path: self.path.clone(),
            })?;
        serde_yaml::from_value(section.clone()).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Replace the cluster section and persist the whole document,
    /// leaving every other section untouched.
    pub fn write_cluster(&mut self, cluster: &ClusterConfig) -> Result<(), ConfigError> {
        let section = serde_yaml::to_value(cluster).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?;
        if let serde_yaml::Value::Mapping(document) = &mut self.document {
            document.insert(serde_yaml::Value::from("cluster"), section);
        }
        let text = serde_yaml::to_string(&self.document).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&self.path, text).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const INIT_YML: &str = "\
supervisor:
  services: [sshd]
cluster:
  cluster: test
  myhostname: testhost
  myaddress: 127.0.0.1
  service: workernode
  depends: [db]
  kvstore:
    host: localhost
    port: 2379
";

    fn write_init(dir: &Path, contents: &str) {
        let mut file = std::fs::File::create(dir.join("init.yml")).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn loads_cluster_section() {
        let dir = tempfile::tempdir().unwrap();
        write_init(dir.path(), INIT_YML);

        let init = InitConfig::load(dir.path()).unwrap();
        let cluster = init.cluster().unwrap();
        assert_eq!(cluster.cluster, "test");
        assert_eq!(cluster.service, "workernode");
        assert_eq!(cluster.depends, ["db"]);
        assert_eq!(cluster.kvstore.port, 2379);
        assert!(cluster.providers.is_empty());
        assert!(!cluster.nodns);
    }

    #[test]
    fn missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            InitConfig::load(dir.path()),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn missing_cluster_section_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_init(dir.path(), "supervisor:\n  services: [sshd]\n");

        let init = InitConfig::load(dir.path()).unwrap();
        assert!(matches!(
            init.cluster(),
            Err(ConfigError::MissingClusterSection { .. })
        ));
    }

    #[test]
    fn write_cluster_preserves_other_sections() {
        let dir = tempfile::tempdir().unwrap();
        write_init(dir.path(), INIT_YML);

        let mut init = InitConfig::load(dir.path()).unwrap();
        let mut cluster = init.cluster().unwrap();
        cluster.myaddress = "10.0.0.7".to_string();
        init.write_cluster(&cluster).unwrap();

        let reloaded = InitConfig::load(dir.path()).unwrap();
        assert_eq!(reloaded.cluster().unwrap().myaddress, "10.0.0.7");
        assert!(reloaded.document.get("supervisor").is_some());
    }
}
