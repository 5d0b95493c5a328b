//! Controller configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const CONTROLLER_NAME: &str = "promotion-controller";

/// Promotion controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Shard this controller is responsible for
    #[serde(default)]
    pub shard_name: Option<String>,

    /// Also handle objects that carry no shard label
    #[serde(default = "default_true")]
    pub is_default_controller: bool,

    /// Base URL of the API server, passed to steps for building links
    #[serde(default)]
    pub api_server_base_url: String,

    /// Number of Promotions reconciled concurrently
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: usize,

    /// Directory under which per-Promotion workspaces are created
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,

    /// Re-poll interval for running Promotions, in seconds
    #[serde(default = "default_requeue_interval_secs")]
    pub default_requeue_interval_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            shard_name: None,
            is_default_controller: true,
            api_server_base_url: String::new(),
            max_concurrent_reconciles: default_max_concurrent_reconciles(),
            workspace_root: default_workspace_root(),
            default_requeue_interval_secs: default_requeue_interval_secs(),
        }
    }
}

impl ControllerConfig {
    /// Controller name, suffixed with the shard when sharded
    pub fn name(&self) -> String {
        match self.shard_name.as_deref().filter(|s| !s.is_empty()) {
            Some(shard) => format!("{CONTROLLER_NAME}-{shard}"),
            None => CONTROLLER_NAME.to_string(),
        }
    }

    pub fn default_requeue_interval(&self) -> Duration {
        Duration::from_secs(self.default_requeue_interval_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_reconciles() -> usize {
    4
}

fn default_workspace_root() -> PathBuf {
    std::env::temp_dir()
}

fn default_requeue_interval_secs() -> u64 {
    300
}
