//! Discovery sidecar: a JSON file the hub writes at startup so children that
//! are not handed a broker URL can find the running broker.
//!
//! The file lives at `<system temp>/pi-hive/broker.json`, is written exactly
//! once at startup and removed at shutdown. Its absence is not fatal to a
//! running broker, only to a client with no other way to connect.

use crate::error::DiscoveryError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const SIDECAR_DIR: &str = "pi-hive";
const SIDECAR_FILE: &str = "broker.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerSidecar {
    pub port: u16,
    pub pid: u32,
    pub hub_id: String,
    /// Epoch millis at broker startup.
    pub started_at: i64,
}

impl BrokerSidecar {
    pub fn new(port: u16, hub_id: impl Into<String>) -> Self {
        Self {
            port,
            pid: std::process::id(),
            hub_id: hub_id.into(),
            started_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Loopback WebSocket URL for the advertised port.
    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }
}

/// Canonical sidecar path under the system temp directory.
pub fn sidecar_path() -> PathBuf {
    sidecar_path_in(&std::env::temp_dir())
}

fn sidecar_path_in(base: &Path) -> PathBuf {
    base.join(SIDECAR_DIR).join(SIDECAR_FILE)
}

pub fn write_sidecar(sidecar: &BrokerSidecar) -> Result<PathBuf, DiscoveryError> {
    write_sidecar_in(&std::env::temp_dir(), sidecar)
}

fn write_sidecar_in(base: &Path, sidecar: &BrokerSidecar) -> Result<PathBuf, DiscoveryError> {
    let path = sidecar_path_in(base);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(sidecar)
        .map_err(|err| DiscoveryError::Unreadable(err.to_string()))?;
    std::fs::write(&path, json)?;
    Ok(path)
}

pub fn read_sidecar() -> Result<BrokerSidecar, DiscoveryError> {
    read_sidecar_in(&std::env::temp_dir())
}

fn read_sidecar_in(base: &Path) -> Result<BrokerSidecar, DiscoveryError> {
    let path = sidecar_path_in(base);
    if !path.exists() {
        return Err(DiscoveryError::NotFound(path));
    }
    let raw = std::fs::read_to_string(&path)?;
    serde_json::from_str(&raw).map_err(|err| DiscoveryError::Unreadable(err.to_string()))
}

/// Best-effort removal at shutdown.
pub fn remove_sidecar() {
    remove_sidecar_in(&std::env::temp_dir());
}

fn remove_sidecar_in(base: &Path) {
    let path = sidecar_path_in(base);
    if let Err(err) = std::fs::remove_file(&path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("failed to remove sidecar {}: {err}", path.display());
        }
    }
}
