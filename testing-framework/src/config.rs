// File: testing-framework/src/config.rs
//
// Harness configuration, loaded from YAML and overridden from the command line.

use crate::chain::ChainBuilder;
use crate::error::{HarnessError, HarnessResult};
use crate::node::{MockNodeConfig, NodeLauncher, NodeSpec, ProcessLauncherConfig, RpcCredentials};
use crate::orchestrator::VirtualClock;
use crate::scenarios::ScenarioConfig;
use crate::topology::TopologyBuilder;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default values for configuration
pub mod defaults {
    pub const MINER_NAME: &str = "miner";
    pub const SUBJECT_NAME: &str = "subject";
    pub const SUBJECT_PRUNE_MIB: u64 = 550;

    pub const LIGHT_BLOCKS: usize = 288;
    pub const LARGE_BLOCKS: usize = 600;
    pub const EXTRA_BLOCKS: usize = 5;
    pub const BLOCK_SPACING_SECS: u64 = crate::chain::DEFAULT_BLOCK_SPACING;
    pub const LARGE_PAYLOAD_LEN: usize = crate::chain::DEFAULT_LARGE_PAYLOAD;

    pub const EARLY_WALLET: &str = "wallet_init";
    pub const TIP_WALLET: &str = "wallet";
    pub const IMPORT_WALLET: &str = "wallet_import";

    pub const SYNC_TIMEOUT_SECS: u64 = 120;
    pub const POLL_INTERVAL_MS: u64 = 250;

    pub const NODE_BINARY: &str = "bitcoind";
    pub const P2P_PORT_BASE: u16 = 18_444;
    pub const RPC_PORT_BASE: u16 = 18_543;
    pub const RPC_USER: &str = "harness";
    pub const RPC_PASSWORD: &str = "harness";
    pub const READY_TIMEOUT_SECS: u64 = 60;
    pub const STOP_GRACE_SECS: u64 = 30;
    pub const REQUEST_TIMEOUT_SECS: u64 = 120;

    pub const REPORT_DIR: &str = "reports";
}

/// One node of the topology
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    /// Pruning budget in MiB; absent means no pruning
    #[serde(default)]
    pub prune_mib: Option<u64>,
    /// Exact budget in bytes, for scaled-down mock runs; wins over `prune_mib`
    #[serde(default)]
    pub prune_bytes: Option<u64>,
    /// Extra startup flags passed verbatim
    #[serde(default)]
    pub flags: Vec<String>,
}

impl NodeConfig {
    /// Budget in bytes, if the node prunes
    pub fn prune_target_bytes(&self) -> Option<u64> {
        self.to_spec().prune_target_bytes
    }

    pub fn to_spec(&self) -> NodeSpec {
        let mut spec = match self.prune_mib {
            Some(mib) => NodeSpec::pruned(self.name.clone(), mib),
            None => NodeSpec::archival(self.name.clone()),
        };
        if let Some(bytes) = self.prune_bytes {
            spec.prune_target_bytes = Some(bytes);
        }
        self.flags.iter().fold(spec, |spec, f| spec.with_flag(f.clone()))
    }
}

fn default_nodes() -> Vec<NodeConfig> {
    vec![
        NodeConfig {
            name: defaults::MINER_NAME.to_string(),
            prune_mib: None,
            prune_bytes: None,
            flags: Vec::new(),
        },
        NodeConfig {
            name: defaults::SUBJECT_NAME.to_string(),
            prune_mib: Some(defaults::SUBJECT_PRUNE_MIB),
            prune_bytes: None,
            flags: Vec::new(),
        },
    ]
}

/// Chain shape
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_light_blocks")]
    pub light_blocks: usize,
    #[serde(default = "default_large_blocks")]
    pub large_blocks: usize,
    #[serde(default = "default_extra_blocks")]
    pub extra_blocks: usize,
    #[serde(default = "default_block_spacing_secs")]
    pub block_spacing_secs: u64,
    /// `OP_TRUE` bytes in a large coinbase script
    #[serde(default = "default_large_payload_len")]
    pub large_payload_len: usize,
    /// Initial virtual time; 0 leaves the clock unset until the first block
    #[serde(default)]
    pub start_time: u64,
}

/// Wallet names
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletConfig {
    #[serde(default = "default_early_wallet")]
    pub early: String,
    #[serde(default = "default_tip_wallet")]
    pub tip: String,
    #[serde(default = "default_import_wallet")]
    pub import: String,
    #[serde(default)]
    pub descriptors: bool,
}

/// Real node processes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfig {
    #[serde(default = "default_node_binary")]
    pub node_binary: PathBuf,
    #[serde(default = "default_p2p_port_base")]
    pub p2p_port_base: u16,
    #[serde(default = "default_rpc_port_base")]
    pub rpc_port_base: u16,
    #[serde(default = "default_rpc_user")]
    pub rpc_user: String,
    #[serde(default = "default_rpc_password")]
    pub rpc_password: String,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Complete harness configuration
///
/// # Example
///
/// ```rust
/// use wallet_pruning_harness::config::HarnessConfig;
///
/// let config = HarnessConfig::from_yaml_str("chain:\n  large_blocks: 10\n").unwrap();
/// assert_eq!(config.chain.large_blocks, 10);
/// assert_eq!(config.chain.light_blocks, 288);
/// assert_eq!(config.nodes.len(), 2);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default = "default_nodes")]
    pub nodes: Vec<NodeConfig>,
    /// Index of the unpruned miner in `nodes`
    #[serde(default)]
    pub miner: usize,
    /// Index of the pruning node in `nodes`
    #[serde(default = "default_subject")]
    pub subject: usize,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub wallets: WalletConfig,
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub process: ProcessConfig,
    /// Storage model of the in-process mock nodes
    #[serde(default)]
    pub mock: MockNodeConfig,
    #[serde(default)]
    pub keep_datadirs: bool,
    /// Parent of the per-run data root; system temp dir when absent
    #[serde(default)]
    pub datadir_root: Option<PathBuf>,
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
}

// Default functions for serde
fn default_subject() -> usize {
    1
}
fn default_light_blocks() -> usize {
    defaults::LIGHT_BLOCKS
}
fn default_large_blocks() -> usize {
    defaults::LARGE_BLOCKS
}
fn default_extra_blocks() -> usize {
    defaults::EXTRA_BLOCKS
}
fn default_block_spacing_secs() -> u64 {
    defaults::BLOCK_SPACING_SECS
}
fn default_large_payload_len() -> usize {
    defaults::LARGE_PAYLOAD_LEN
}
fn default_early_wallet() -> String {
    defaults::EARLY_WALLET.to_string()
}
fn default_tip_wallet() -> String {
    defaults::TIP_WALLET.to_string()
}
fn default_import_wallet() -> String {
    defaults::IMPORT_WALLET.to_string()
}
fn default_sync_timeout_secs() -> u64 {
    defaults::SYNC_TIMEOUT_SECS
}
fn default_poll_interval_ms() -> u64 {
    defaults::POLL_INTERVAL_MS
}
fn default_node_binary() -> PathBuf {
    PathBuf::from(defaults::NODE_BINARY)
}
fn default_p2p_port_base() -> u16 {
    defaults::P2P_PORT_BASE
}
fn default_rpc_port_base() -> u16 {
    defaults::RPC_PORT_BASE
}
fn default_rpc_user() -> String {
    defaults::RPC_USER.to_string()
}
fn default_rpc_password() -> String {
    defaults::RPC_PASSWORD.to_string()
}
fn default_ready_timeout_secs() -> u64 {
    defaults::READY_TIMEOUT_SECS
}
fn default_stop_grace_secs() -> u64 {
    defaults::STOP_GRACE_SECS
}
fn default_request_timeout_secs() -> u64 {
    defaults::REQUEST_TIMEOUT_SECS
}
fn default_report_dir() -> PathBuf {
    PathBuf::from(defaults::REPORT_DIR)
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            light_blocks: default_light_blocks(),
            large_blocks: default_large_blocks(),
            extra_blocks: default_extra_blocks(),
            block_spacing_secs: default_block_spacing_secs(),
            large_payload_len: default_large_payload_len(),
            start_time: 0,
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            early: default_early_wallet(),
            tip: default_tip_wallet(),
            import: default_import_wallet(),
            descriptors: false,
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            node_binary: default_node_binary(),
            p2p_port_base: default_p2p_port_base(),
            rpc_port_base: default_rpc_port_base(),
            rpc_user: default_rpc_user(),
            rpc_password: default_rpc_password(),
            ready_timeout_secs: default_ready_timeout_secs(),
            stop_grace_secs: default_stop_grace_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            miner: 0,
            subject: default_subject(),
            chain: ChainConfig::default(),
            wallets: WalletConfig::default(),
            sync_timeout_secs: default_sync_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            process: ProcessConfig::default(),
            mock: MockNodeConfig::default(),
            keep_datadirs: false,
            datadir_root: None,
            report_dir: default_report_dir(),
        }
    }
}

impl HarnessConfig {
    /// Parse YAML; missing keys take their defaults
    pub fn from_yaml_str(yaml: &str) -> HarnessResult<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| HarnessError::Config(format!("failed to parse configuration: {e}")))
    }

    /// Load and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> HarnessResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("failed to read '{}': {e}", path.display()))
        })?;
        let config = Self::from_yaml_str(&content)?;
        config.validate()?;

        if log::log_enabled!(log::Level::Info) {
            info!("Configuration loaded from {}", path.display());
        }
        Ok(config)
    }

    pub fn to_yaml(&self) -> HarnessResult<String> {
        serde_yaml::to_string(self)
            .map_err(|e| HarnessError::Config(format!("failed to serialize configuration: {e}")))
    }

    /// Reject configurations that cannot produce a meaningful run
    pub fn validate(&self) -> HarnessResult<()> {
        let invalid = |msg: String| Err(HarnessError::Config(msg));

        if self.miner >= self.nodes.len() || self.subject >= self.nodes.len() {
            return invalid(format!(
                "miner ({}) and subject ({}) must index the {} configured nodes",
                self.miner,
                self.subject,
                self.nodes.len()
            ));
        }
        if self.miner == self.subject {
            return invalid("miner and subject must be different nodes".to_string());
        }
        if self.nodes[self.miner].prune_target_bytes().is_some() {
            return invalid(format!(
                "miner '{}' must not prune",
                self.nodes[self.miner].name
            ));
        }
        match self.nodes[self.subject].prune_target_bytes() {
            None => {
                return invalid(format!(
                    "subject '{}' needs a prune budget",
                    self.nodes[self.subject].name
                ))
            }
            Some(0) => return invalid("subject prune budget must be positive".to_string()),
            Some(_) => {}
        }
        if self.sync_timeout_secs == 0 || self.poll_interval_ms == 0 {
            return invalid("sync timeout and poll interval must be positive".to_string());
        }
        if self.wallets.early.is_empty()
            || self.wallets.tip.is_empty()
            || self.wallets.import.is_empty()
        {
            return invalid("wallet names must not be empty".to_string());
        }
        if self.wallets.early == self.wallets.tip {
            return invalid("early and tip wallets must differ".to_string());
        }
        if self.mock.block_file_size == 0 {
            return invalid("mock block file size must be positive".to_string());
        }

        self.chain_builder(Arc::new(VirtualClock::new(self.chain.start_time)))
            .validate()
    }

    pub fn node_specs(&self) -> Vec<NodeSpec> {
        self.nodes.iter().map(NodeConfig::to_spec).collect()
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn scenario(&self) -> ScenarioConfig {
        ScenarioConfig {
            name: "wallet_pruning".to_string(),
            miner: self.miner,
            subject: self.subject,
            light_blocks: self.chain.light_blocks,
            large_blocks: self.chain.large_blocks,
            extra_blocks: self.chain.extra_blocks,
            early_wallet: self.wallets.early.clone(),
            tip_wallet: self.wallets.tip.clone(),
            import_wallet: self.wallets.import.clone(),
            descriptors: self.wallets.descriptors,
            sync_timeout: self.sync_timeout(),
        }
    }

    pub fn chain_builder(&self, clock: Arc<VirtualClock>) -> ChainBuilder {
        ChainBuilder::new(clock)
            .with_spacing(self.chain.block_spacing_secs)
            .with_large_payload_len(self.chain.large_payload_len)
    }

    /// Topology with every configured node, sharing `clock` with the chain builder
    pub fn topology_builder(
        &self,
        launcher: Arc<dyn NodeLauncher>,
        clock: Arc<VirtualClock>,
    ) -> TopologyBuilder {
        let builder = TopologyBuilder::new()
            .with_nodes(self.node_specs())
            .with_launcher(launcher)
            .with_virtual_clock(clock)
            .with_poll_interval(self.poll_interval())
            .keep_datadirs(self.keep_datadirs);
        match &self.datadir_root {
            Some(root) => builder.with_data_root(root.clone()),
            None => builder,
        }
    }

    pub fn process_launcher(&self) -> ProcessLauncherConfig {
        ProcessLauncherConfig {
            binary: self.process.node_binary.clone(),
            p2p_port_base: self.process.p2p_port_base,
            rpc_port_base: self.process.rpc_port_base,
            credentials: RpcCredentials {
                user: self.process.rpc_user.clone(),
                password: self.process.rpc_password.clone(),
            },
            ready_timeout: Duration::from_secs(self.process.ready_timeout_secs),
            stop_grace: Duration::from_secs(self.process.stop_grace_secs),
            request_timeout: Duration::from_secs(self.process.request_timeout_secs),
            ..ProcessLauncherConfig::default()
        }
    }
}
