//! Configuration handling for the mesh node.
//!
//! Settings come from an optional YAML file, then environment variables, then
//! command line flags, each layer overriding the previous one.

use anyhow::{Context, Result};
use mesh_session::MeshConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::{info, warn};

/// Node configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node id; drawn at random when absent
    pub node_id: Option<u32>,
    /// Whether this node is the designated root
    pub root: bool,
    /// Address to accept links on
    pub listen: Option<SocketAddr>,
    /// Peers to keep a station link to
    pub connect: Vec<SocketAddr>,
    /// Engine tunables
    pub mesh: MeshConfig,
}

impl NodeConfig {
    /// Load configuration from file and environment variables
    ///
    /// A missing file means defaults; a file that does not parse is an error.
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => {
                let config: NodeConfig = serde_yaml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file {:?}", path))?;
                info!("Loaded configuration from {:?}", path);
                config
            }
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
        };

        config.apply_environment_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        if let Ok(node_id) = std::env::var("MESH_NODE_ID") {
            match node_id.parse::<u32>() {
                Ok(id) if id != 0 => {
                    self.node_id = Some(id);
                    info!("Node ID overridden by environment: {}", id);
                }
                _ => warn!("Ignoring invalid MESH_NODE_ID {:?}", node_id),
            }
        }

        if let Ok(root) = std::env::var("MESH_ROOT") {
            self.root = matches!(root.to_lowercase().as_str(), "1" | "true" | "yes");
            info!("Root flag overridden by environment: {}", self.root);
        }

        if let Ok(listen) = std::env::var("MESH_LISTEN") {
            match listen.parse::<SocketAddr>() {
                Ok(addr) => {
                    self.listen = Some(addr);
                    info!("Listen address overridden by environment: {}", addr);
                }
                Err(e) => warn!("Ignoring invalid MESH_LISTEN {:?}: {}", listen, e),
            }
        }

        if let Ok(connect) = std::env::var("MESH_CONNECT") {
            let peers: Vec<SocketAddr> = connect
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(|s| match s.parse() {
                    Ok(addr) => Some(addr),
                    Err(e) => {
                        warn!("Ignoring invalid peer {:?} in MESH_CONNECT: {}", s, e);
                        None
                    }
                })
                .collect();
            info!("Peers overridden by environment: {:?}", peers);
            self.connect = peers;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.node_id, None);
        assert!(!config.root);
        assert!(config.connect.is_empty());
        assert_eq!(config.mesh, MeshConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
node_id: 2001
root: true
listen: 0.0.0.0:5555
connect:
  - 10.0.0.2:5555
mesh:
  node_sync_interval_ms: 30000
  max_message_queue: 8
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = NodeConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.node_id, Some(2001));
        assert!(config.root);
        assert_eq!(config.listen, Some("0.0.0.0:5555".parse().unwrap()));
        assert_eq!(config.connect, vec!["10.0.0.2:5555".parse::<SocketAddr>().unwrap()]);
        assert_eq!(config.mesh.node_sync_interval_ms, 30_000);
        assert_eq!(config.mesh.max_message_queue, 8);
        // Unset tunables keep their defaults
        assert_eq!(config.mesh.node_timeout_ms, MeshConfig::default().node_timeout_ms);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig::load_from_file(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.mesh, MeshConfig::default());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"node_id: [not, a, number]").unwrap();
        assert!(NodeConfig::load_from_file(temp_file.path()).is_err());
    }
}
