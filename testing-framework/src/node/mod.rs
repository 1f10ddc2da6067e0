// File: testing-framework/src/node/mod.rs
//
// Node Capability Interface
//
// The harness talks to nodes only through `NodeRpc`, and brings them up and
// down only through `NodeLauncher`. Two implementations exist for each:
// a JSON-RPC client plus process launcher for a real node binary, and an
// in-process mock network used by the test suite.

pub mod client;
pub mod mock;
pub mod process;

pub use client::{RpcClient, RpcCredentials};
pub use mock::{MockNetwork, MockNode, MockNodeConfig};
pub use process::{ProcessLauncher, ProcessLauncherConfig};

use crate::error::NodeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Height, hash and timestamp of one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// Block height
    pub height: u64,
    /// Block hash in display (reversed hex) order
    pub hash: String,
    /// Header timestamp in seconds
    pub time: u64,
}

/// Subset of `getblockchaininfo` the harness inspects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    /// Height of the active tip
    pub blocks: u64,
    /// Hash of the active tip
    pub best_hash: String,
    /// Whether the node runs with pruning enabled
    pub pruned: bool,
    /// Lowest height with block data still on disk, if pruning is enabled
    pub prune_height: Option<u64>,
}

/// Result of a block submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The block extended the chain
    Accepted,
    /// The node refused the block, with its reason string
    Rejected(String),
}

impl SubmitOutcome {
    /// Whether the block was accepted
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Requests the harness sends to a node.
///
/// Implementations must pass node failures through untouched: the scenario
/// assertions compare error codes and message text literally.
///
/// # Implementation Note
///
/// The harness never has more than one request in flight per node.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Get height, hash and time of the active tip.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is unreachable or the query fails.
    async fn get_best_block(&self) -> Result<BlockSummary, NodeError>;

    /// Get the hash of the active-chain block at `height`.
    ///
    /// # Errors
    ///
    /// Returns an RPC error if the height is above the tip.
    async fn get_block_hash(&self, height: u64) -> Result<String, NodeError>;

    /// Get a block by hash.
    ///
    /// # Errors
    ///
    /// Returns `Block not available (pruned data)` (code -1) when the header
    /// is known but the block data was pruned.
    async fn get_block(&self, hash: &str) -> Result<BlockSummary, NodeError>;

    /// Submit a hex-serialized block.
    ///
    /// A refusal is not an error; it is reported as [`SubmitOutcome::Rejected`].
    async fn submit_block(&self, block_hex: &str) -> Result<SubmitOutcome, NodeError>;

    /// Set the node's notion of "now" in seconds.
    async fn set_mock_time(&self, time: u64) -> Result<(), NodeError>;

    /// Get chain state including the prune horizon.
    async fn get_chain_info(&self) -> Result<ChainInfo, NodeError>;

    /// Ask the node to connect once to `addr`.
    async fn add_peer(&self, addr: &str) -> Result<(), NodeError>;

    /// Create and load a wallet named `name`.
    async fn create_wallet(&self, name: &str, descriptors: bool) -> Result<(), NodeError>;

    /// Write a text backup of `wallet` to `path` on the node's filesystem.
    ///
    /// # Errors
    ///
    /// Returns code -8 if `path` already exists.
    async fn dump_wallet(&self, wallet: &str, path: &Path) -> Result<(), NodeError>;

    /// Import a text backup into `wallet`, rescanning from its birth height.
    ///
    /// # Errors
    ///
    /// Returns code -4 with `Pruned blocks from height <h> required to import
    /// keys...` when the rescan needs pruned history.
    async fn import_wallet(&self, wallet: &str, path: &Path) -> Result<(), NodeError>;
}

/// Startup configuration of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Human-readable name used in logs and reports
    pub name: String,
    /// Pruning budget in bytes; `None` disables pruning
    pub prune_target_bytes: Option<u64>,
    /// Extra behavior flags passed verbatim
    pub flags: Vec<String>,
}

impl NodeSpec {
    /// An unpruned node with no extra flags
    pub fn archival(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prune_target_bytes: None,
            flags: Vec::new(),
        }
    }

    /// A node pruning down to `mib` mebibytes
    pub fn pruned(name: impl Into<String>, mib: u64) -> Self {
        Self {
            name: name.into(),
            prune_target_bytes: Some(mib * 1024 * 1024),
            flags: Vec::new(),
        }
    }

    /// Append a behavior flag
    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    /// Pruning budget in whole mebibytes, as the node's `-prune` option expects
    pub fn prune_mib(&self) -> Option<u64> {
        self.prune_target_bytes.map(|b| b / (1024 * 1024))
    }
}

/// A node that finished starting up
pub struct LaunchedNode {
    /// Request handle
    pub rpc: Arc<dyn NodeRpc>,
    /// Address other nodes pass to `add_peer`
    pub p2p_addr: String,
}

/// Brings node processes up and down
#[async_trait]
pub trait NodeLauncher: Send + Sync {
    /// Start node `index` with `spec`, storing its data under `datadir`.
    ///
    /// Returns once the node answers requests.
    async fn launch(
        &self,
        index: usize,
        spec: &NodeSpec,
        datadir: &Path,
    ) -> Result<LaunchedNode, NodeError>;

    /// Stop node `index` and wait for it to exit.
    async fn halt(&self, index: usize) -> Result<(), NodeError>;
}

/// Location of a wallet backup inside a node's data directory
pub fn backup_path(datadir: &Path, wallet: &str) -> PathBuf {
    datadir.join(format!("{wallet}.dat"))
}
