use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{HarnessError, HarnessResult};
use crate::rpc::CompletionMode;

pub const CONFIG_ENV: &str = "CHAIN_HARNESS_CONFIG";
pub const NODE_BINARY_ENV: &str = "CHAIN_HARNESS_NODE_BIN";
pub const LOG_DIR_ENV: &str = "TEST_OUTPUT_DIR";

const DEFAULT_NODE_BINARY: &str = "../target/release/tfchain";
const DEFAULT_LOG_DIR: &str = "_output_tests";
const DEFAULT_DATA_ROOT: &str = "/tmp";
const DEFAULT_READINESS_MARKER: &str = "Running JSON-RPC WS server";
const DEFAULT_TELEMETRY_URL: &str = "wss://telemetry.polkadot.io/submit/ 0";
const DEFAULT_LEADER_NODE_KEY: &str =
    "0000000000000000000000000000000000000000000000000000000000000001";
const DEFAULT_LEADER_PEER_ID: &str = "12D3KooWEyoppNCUx8Yx66oV9fJnriXwCcXwDDUA2kj6vnc6iDEp";

/// Port bases; node `i` of a topology listens on `base + i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortBases {
    pub peer: u16,
    pub ws: u16,
    pub rpc: u16,
}

impl Default for PortBases {
    fn default() -> Self {
        Self {
            peer: 30333,
            ws: 9945,
            rpc: 9933,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub node_binary: PathBuf,
    pub log_dir: PathBuf,
    pub data_root: PathBuf,
    pub chain: String,
    pub telemetry_url: String,
    pub ports: PortBases,
    pub readiness_marker: String,
    pub startup_timeout_ms: u64,
    pub terminate_grace_ms: u64,
    pub poll_interval_ms: u64,
    pub max_log_scan_bytes: u64,
    pub leader_node_key: String,
    pub leader_peer_id: String,
    pub completion_mode: CompletionMode,
    pub block_timeout_ms: u64,
    pub height_poll_interval_ms: u64,
    pub rpc_timeout_ms: u64,
    pub signing_slots: Vec<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            node_binary: PathBuf::from(DEFAULT_NODE_BINARY),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            data_root: PathBuf::from(DEFAULT_DATA_ROOT),
            chain: "local".to_string(),
            telemetry_url: DEFAULT_TELEMETRY_URL.to_string(),
            ports: PortBases::default(),
            readiness_marker: DEFAULT_READINESS_MARKER.to_string(),
            startup_timeout_ms: 600_000,
            terminate_grace_ms: 1_000,
            poll_interval_ms: 500,
            max_log_scan_bytes: 1024 * 1024,
            leader_node_key: DEFAULT_LEADER_NODE_KEY.to_string(),
            leader_peer_id: DEFAULT_LEADER_PEER_ID.to_string(),
            completion_mode: CompletionMode::default(),
            block_timeout_ms: 6_000,
            height_poll_interval_ms: 1_000,
            rpc_timeout_ms: 30_000,
            signing_slots: vec!["tft!".to_string(), "smct".to_string()],
        }
    }
}

impl HarnessConfig {
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|err| {
            HarnessError::Config(format!("failed to parse {}: {err}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> HarnessResult<()> {
        self.validate()?;
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let encoded = toml::to_string_pretty(self)
            .map_err(|err| HarnessError::Config(format!("unable to encode config: {err}")))?;
        fs::write(path, encoded)?;
        Ok(())
    }

    /// Loads the file named by `CHAIN_HARNESS_CONFIG` (or defaults) and applies
    /// the binary and log directory overrides from the environment.
    pub fn from_env() -> HarnessResult<Self> {
        let mut config = match env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => Self::load(Path::new(&path))?,
            _ => Self::default(),
        };
        config.apply_overrides(
            env::var(NODE_BINARY_ENV).ok(),
            env::var(LOG_DIR_ENV).ok(),
        );
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&mut self, node_binary: Option<String>, log_dir: Option<String>) {
        if let Some(binary) = node_binary.filter(|value| !value.is_empty()) {
            self.node_binary = PathBuf::from(binary);
        }
        if let Some(dir) = log_dir.filter(|value| !value.is_empty()) {
            self.log_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.readiness_marker.trim().is_empty() {
            return Err(HarnessError::Config(
                "readiness_marker must not be empty".into(),
            ));
        }
        if self.poll_interval_ms == 0 || self.height_poll_interval_ms == 0 {
            return Err(HarnessError::Config(
                "poll intervals must be greater than zero".into(),
            ));
        }
        if self.max_log_scan_bytes == 0 {
            return Err(HarnessError::Config(
                "max_log_scan_bytes must be greater than zero".into(),
            ));
        }
        if !matches!(hex::decode(&self.leader_node_key), Ok(key) if key.len() == 32) {
            return Err(HarnessError::Config(
                "leader_node_key must be 32 hex-encoded bytes".into(),
            ));
        }
        if self.leader_peer_id.is_empty() {
            return Err(HarnessError::Config("leader_peer_id must be set".into()));
        }
        Ok(())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }

    pub fn height_poll_interval(&self) -> Duration {
        Duration::from_millis(self.height_poll_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn log_file(&self, name: &str) -> PathBuf {
        self.log_dir.join(format!("node_{name}.log"))
    }

    pub fn data_dir(&self, name: &str) -> PathBuf {
        self.data_root.join(name)
    }

    pub fn leader_bootnode(&self, peer_port: u16) -> String {
        format!("/ip4/127.0.0.1/tcp/{peer_port}/p2p/{}", self.leader_peer_id)
    }
}
