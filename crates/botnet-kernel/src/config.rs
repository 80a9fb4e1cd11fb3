//! Configuration loading from `~/.botnet/config.toml` with defaults.

use botnet_types::config::{botnet_home, NodeConfig};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Load node configuration, falling back to defaults.
///
/// A missing file is normal on first start. An unreadable or invalid file
/// is logged and the node still boots on defaults.
pub fn load_config(path: Option<&Path>) -> NodeConfig {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        info!(path = %path.display(), "No config file, using defaults");
        return NodeConfig::default();
    }
    match read_config(&path) {
        Ok(config) => {
            info!(path = %path.display(), node_id = %config.node_id, "Loaded configuration");
            config
        }
        Err(reason) => {
            warn!(path = %path.display(), %reason, "Ignoring config file, using defaults");
            NodeConfig::default()
        }
    }
}

fn read_config(path: &Path) -> Result<NodeConfig, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("read: {e}"))?;
    toml::from_str(&text).map_err(|e| format!("parse: {e}"))
}

/// `~/.botnet/config.toml`.
pub fn default_config_path() -> PathBuf {
    botnet_home().join("config.toml")
}
