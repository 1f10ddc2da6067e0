// File: testing-framework/src/node/mock.rs
//
// In-process mock node network
//
// Models a node at its request boundary: block acceptance with the node's
// reject reasons, block-file based pruning, peer relay, and text wallet
// backups. Nothing here validates transactions or keeps real keys.
//
// Every node's state sits behind a `parking_lot::Mutex`. Locks are never
// held across an `.await`, and a node never holds its own lock while
// touching another node, so relay between peers cannot deadlock.

use super::{BlockSummary, ChainInfo, LaunchedNode, NodeLauncher, NodeRpc, NodeSpec, SubmitOutcome};
use crate::chain::{
    decode_block, Block, BlockHash, DecodedBlock, PayloadKind, MAX_BLOCK_SERIALIZED_SIZE,
};
use crate::error::{
    pruned_import_message, NodeError, PRUNED_BLOCK_MESSAGE, RPC_DESERIALIZATION_ERROR,
    RPC_INVALID_ADDRESS_OR_KEY, RPC_INVALID_PARAMETER, RPC_MISC_ERROR, RPC_WALLET_ERROR,
    RPC_WALLET_NOT_FOUND,
};
use crate::wallet::{parse_birth_height, BACKUP_HEADER_PREFIX};
use async_trait::async_trait;
use log::{debug, info, log_enabled, warn, Level};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Weak};
use tokio::io::AsyncWriteExt;

/// Bytes of per-block framing in a block file (magic + length)
pub const BLOCK_RECORD_OVERHEAD: u64 = 8;

/// Prefix of mock peer addresses
pub const MOCK_ADDR_PREFIX: &str = "mock:";

const MEDIAN_TIME_SPAN: usize = 11;

/// Storage and timing model of every mock node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockNodeConfig {
    /// Size at which a block file is closed and a new one started
    pub block_file_size: u64,
    /// Headroom kept free below the prune target
    pub prune_buffer: u64,
    /// Most recent blocks never pruned
    pub min_blocks_to_keep: u64,
    /// How far past its clock a block timestamp may be
    pub max_future_block_time: u64,
    /// Timestamp of the shared genesis block
    pub genesis_time: u32,
}

impl Default for MockNodeConfig {
    fn default() -> Self {
        Self {
            block_file_size: 128 * 1024 * 1024,
            prune_buffer: 17 * 1024 * 1024,
            min_blocks_to_keep: 288,
            max_future_block_time: 2 * 60 * 60,
            genesis_time: 1_296_688_602,
        }
    }
}

struct StoredBlock {
    hash: BlockHash,
    time: u32,
    file: usize,
    // None once pruned
    data: Option<Arc<[u8]>>,
}

#[derive(Debug, Clone)]
struct BlockFile {
    bytes: u64,
    first_height: u64,
    last_height: u64,
    pruned: bool,
}

#[derive(Debug, Default)]
struct MockWallet {
    rescan_height: Option<u64>,
    imports: u32,
}

struct NodeState {
    running: bool,
    spec: NodeSpec,
    datadir: PathBuf,
    mock_time: u64,
    chain: Vec<StoredBlock>,
    heights: HashMap<BlockHash, u64>,
    files: Vec<BlockFile>,
    prune_horizon: u64,
    peers: BTreeSet<usize>,
    wallets: HashMap<String, MockWallet>,
}

impl NodeState {
    fn tip_height(&self) -> u64 {
        self.chain.len() as u64 - 1
    }

    fn tip(&self) -> &StoredBlock {
        &self.chain[self.chain.len() - 1]
    }

    fn summary(&self, height: u64) -> Option<BlockSummary> {
        let block = self.chain.get(height as usize)?;
        Some(BlockSummary {
            height,
            hash: block.hash.to_hex(),
            time: block.time as u64,
        })
    }

    fn now(&self) -> u64 {
        if self.mock_time != 0 {
            return self.mock_time;
        }
        u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
    }

    fn median_time_past(&self) -> u32 {
        let mut times: Vec<u32> = self
            .chain
            .iter()
            .rev()
            .take(MEDIAN_TIME_SPAN)
            .map(|b| b.time)
            .collect();
        times.sort_unstable();
        times[times.len() / 2]
    }

    fn is_pruned_mode(&self) -> bool {
        self.spec.prune_target_bytes.is_some()
    }

    fn usage(&self) -> u64 {
        self.files.iter().filter(|f| !f.pruned).map(|f| f.bytes).sum()
    }

    /// Reject reason for `block`, checked in the node's order
    fn check(&self, block: &DecodedBlock, config: &MockNodeConfig) -> Option<&'static str> {
        let header = &block.header;
        let hash = header.hash();

        if self.heights.contains_key(&hash) {
            return Some("duplicate");
        }
        if !header.has_valid_pow() {
            return Some("high-hash");
        }
        if !self.heights.contains_key(&header.prev_hash) {
            return Some("prev-blk-not-found");
        }
        if header.prev_hash != self.tip().hash {
            // Side chains would need a reorganization, which is not modeled
            return Some("inconclusive");
        }
        if header.time <= self.median_time_past() {
            return Some("time-too-old");
        }
        if header.time as u64 > self.now().saturating_add(config.max_future_block_time) {
            return Some("time-too-new");
        }
        if !block.merkle_matches {
            return Some("bad-txnmrklroot");
        }
        if block.size > MAX_BLOCK_SERIALIZED_SIZE {
            return Some("bad-blk-length");
        }
        if block.coinbase_height != Some(self.tip_height() + 1) {
            return Some("bad-cb-height");
        }
        None
    }

    fn connect(&mut self, hash: BlockHash, time: u32, data: Arc<[u8]>, config: &MockNodeConfig) {
        let height = self.chain.len() as u64;
        let cost = data.len() as u64 + BLOCK_RECORD_OVERHEAD;

        let start_new_file = match self.files.last() {
            Some(file) => file.bytes > 0 && file.bytes + cost > config.block_file_size,
            None => true,
        };
        if start_new_file {
            self.files.push(BlockFile {
                bytes: 0,
                first_height: height,
                last_height: height,
                pruned: false,
            });
        }
        let file_index = self.files.len() - 1;
        let file = &mut self.files[file_index];
        file.bytes += cost;
        file.last_height = height;

        self.chain.push(StoredBlock {
            hash,
            time,
            file: file_index,
            data: Some(data),
        });
        self.heights.insert(hash, height);

        self.prune(config);
    }

    /// Delete whole block files, oldest first, until usage fits the target
    fn prune(&mut self, config: &MockNodeConfig) {
        let Some(target) = self.spec.prune_target_bytes else {
            return;
        };
        let tip = self.tip_height();
        if tip <= config.min_blocks_to_keep {
            return;
        }
        let last_prunable = tip - config.min_blocks_to_keep;

        let mut usage = self.usage();
        if usage + config.prune_buffer < target {
            return;
        }

        // The file being written to is never pruned
        let closed_files = self.files.len().saturating_sub(1);
        let mut pruned_files = 0;
        for index in 0..closed_files {
            if usage + config.prune_buffer < target {
                break;
            }
            let file = &mut self.files[index];
            if file.pruned || file.last_height > last_prunable {
                continue;
            }
            file.pruned = true;
            usage -= file.bytes;
            pruned_files += 1;

            let (first, last) = (file.first_height as usize, file.last_height as usize);
            for block in &mut self.chain[first..=last] {
                block.data = None;
            }
        }

        if pruned_files > 0 {
            self.prune_horizon = self
                .files
                .iter()
                .find(|f| !f.pruned)
                .map(|f| f.first_height)
                .unwrap_or(tip);
            debug!(
                "Pruned {} block files at tip {}, horizon now {} ({} bytes in use)",
                pruned_files, tip, self.prune_horizon, usage
            );
        }
    }
}

/// Render a text wallet backup in the node's dump format
pub fn render_wallet_dump(wallet: &str, tip: &BlockSummary, created_at: u64) -> String {
    let mut out = String::new();
    out.push_str("# Wallet dump created by mock node\n");
    out.push_str(&format!("# * Created on {}\n", iso8601(created_at)));
    out.push_str(&format!(
        "{}{} ({}),\n",
        BACKUP_HEADER_PREFIX, tip.height, tip.hash
    ));
    out.push_str(&format!("#   mined on {}\n", iso8601(tip.time)));
    out.push('\n');
    out.push_str(&format!(
        "mock-key-{wallet}-0 {} hdseed=1 # addr=mock1{}\n",
        iso8601(created_at),
        &tip.hash[..tip.hash.len().min(16)]
    ));
    out.push('\n');
    out.push_str("# End of dump\n");
    out
}

fn iso8601(t: u64) -> String {
    i64::try_from(t)
        .ok()
        .and_then(|t| chrono::DateTime::from_timestamp(t, 0))
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_default()
}

fn wallet_not_found() -> NodeError {
    NodeError::rpc(
        RPC_WALLET_NOT_FOUND,
        "Requested wallet does not exist or is not loaded",
    )
}

/// One in-process node
///
/// State survives `halt` and a later `launch`, like a data directory does.
pub struct MockNode {
    index: usize,
    config: MockNodeConfig,
    network: Weak<MockNetwork>,
    state: Mutex<NodeState>,
}

impl MockNode {
    fn new(
        index: usize,
        spec: NodeSpec,
        datadir: PathBuf,
        config: MockNodeConfig,
        network: Weak<MockNetwork>,
    ) -> Self {
        let mut genesis = Block::new(
            0,
            BlockHash::ZERO,
            config.genesis_time,
            &PayloadKind::Light.script_pubkey(0),
        );
        genesis.solve();
        let data: Arc<[u8]> = genesis.serialize().into();

        let mut state = NodeState {
            running: false,
            spec,
            datadir,
            mock_time: 0,
            chain: Vec::new(),
            heights: HashMap::new(),
            files: Vec::new(),
            prune_horizon: 0,
            peers: BTreeSet::new(),
            wallets: HashMap::new(),
        };
        state.connect(genesis.hash(), genesis.time(), data, &config);

        Self {
            index,
            config,
            network,
            state: Mutex::new(state),
        }
    }

    /// Index of this node in its network
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Height of the active tip
    pub fn tip_height(&self) -> u64 {
        self.state.lock().tip_height()
    }

    /// Lowest height whose block data is still stored
    pub fn prune_horizon(&self) -> u64 {
        self.state.lock().prune_horizon
    }

    /// Bytes of block files currently on "disk"
    pub fn storage_usage(&self) -> u64 {
        self.state.lock().usage()
    }

    /// Mock time last set on this node, 0 when unset
    pub fn mock_time(&self) -> u64 {
        self.state.lock().mock_time
    }

    /// Connected peer indexes
    pub fn peers(&self) -> Vec<usize> {
        self.state.lock().peers.iter().copied().collect()
    }

    /// Height the last successful import of `wallet` rescanned from
    pub fn wallet_rescan_height(&self, wallet: &str) -> Option<u64> {
        self.state
            .lock()
            .wallets
            .get(wallet)
            .and_then(|w| w.rescan_height)
    }

    /// Number of successful imports into `wallet`
    pub fn wallet_imports(&self, wallet: &str) -> u32 {
        self.state
            .lock()
            .wallets
            .get(wallet)
            .map(|w| w.imports)
            .unwrap_or(0)
    }

    /// Whether the block file holding `height` is still on disk
    pub fn has_block_data(&self, height: u64) -> bool {
        let state = self.state.lock();
        state
            .chain
            .get(height as usize)
            .is_some_and(|b| b.data.is_some() && !state.files[b.file].pruned)
    }

    fn ensure_running(&self) -> Result<(), NodeError> {
        if self.state.lock().running {
            Ok(())
        } else {
            Err(NodeError::NotRunning)
        }
    }

    fn start(&self) -> Result<(), NodeError> {
        let mut state = self.state.lock();
        if state.running {
            return Err(NodeError::Launch(format!(
                "mock node {} is already running",
                self.index
            )));
        }
        state.running = true;
        Ok(())
    }

    fn stop(&self) -> Result<Vec<usize>, NodeError> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(NodeError::NotRunning);
        }
        state.running = false;
        // Mock time is process state, not chain state
        state.mock_time = 0;
        Ok(std::mem::take(&mut state.peers).into_iter().collect())
    }

    fn drop_peer(&self, index: usize) {
        self.state.lock().peers.remove(&index);
    }

    fn link_peer(&self, index: usize) {
        self.state.lock().peers.insert(index);
    }

    /// Validate and connect one block without relaying it
    fn accept(&self, raw: Arc<[u8]>) -> Result<SubmitOutcome, NodeError> {
        let decoded = decode_block(&raw)
            .map_err(|_| NodeError::rpc(RPC_DESERIALIZATION_ERROR, "Block decode failed"))?;

        let mut state = self.state.lock();
        if !state.running {
            return Err(NodeError::NotRunning);
        }
        if let Some(reason) = state.check(&decoded, &self.config) {
            debug!(
                "Mock node {} rejected block {}: {}",
                self.index,
                decoded.header.hash(),
                reason
            );
            return Ok(SubmitOutcome::Rejected(reason.to_string()));
        }

        state.connect(decoded.header.hash(), decoded.header.time, raw, &self.config);
        if log_enabled!(Level::Debug) {
            debug!(
                "Mock node {} connected block {} at height {}",
                self.index,
                state.tip().hash,
                state.tip_height()
            );
        }
        Ok(SubmitOutcome::Accepted)
    }

    /// Fetch every block `source` has above this node's tip
    ///
    /// Stops at a fork (no reorganization) or at data the source has pruned.
    fn pull_from(&self, source: &MockNode) -> usize {
        let mut connected = 0;
        loop {
            let (next_height, tip_hash) = {
                let state = self.state.lock();
                if !state.running {
                    return connected;
                }
                (state.tip_height() + 1, state.tip().hash)
            };

            let raw = {
                let src = source.state.lock();
                if !src.running {
                    return connected;
                }
                let Some(block) = src.chain.get(next_height as usize) else {
                    return connected;
                };
                if src.chain[next_height as usize - 1].hash != tip_hash {
                    debug!(
                        "Mock node {} diverges from node {} below height {}",
                        self.index, source.index, next_height
                    );
                    return connected;
                }
                match &block.data {
                    Some(data) => data.clone(),
                    None => {
                        warn!(
                            "Mock node {} cannot serve pruned block {} to node {}",
                            source.index, next_height, self.index
                        );
                        return connected;
                    }
                }
            };

            match self.accept(raw) {
                Ok(SubmitOutcome::Accepted) => connected += 1,
                Ok(SubmitOutcome::Rejected(reason)) => {
                    warn!(
                        "Mock node {} refused block {} from node {}: {}",
                        self.index, next_height, source.index, reason
                    );
                    return connected;
                }
                Err(e) => {
                    warn!("Mock node {} failed to pull from node {}: {}", self.index, source.index, e);
                    return connected;
                }
            }
        }
    }

    /// Let every running peer (except `skip`) catch up with this node
    fn relay(&self, skip: Option<usize>) {
        let Some(network) = self.network.upgrade() else {
            return;
        };
        let peers: Vec<usize> = self.state.lock().peers.iter().copied().collect();
        for peer_index in peers {
            if Some(peer_index) == skip {
                continue;
            }
            if let Some(peer) = network.node(peer_index) {
                let pulled = peer.pull_from(self);
                if pulled > 0 {
                    peer.relay(Some(self.index));
                }
            }
        }
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.state.lock().datadir.join(path)
        }
    }
}

#[async_trait]
impl NodeRpc for MockNode {
    async fn get_best_block(&self) -> Result<BlockSummary, NodeError> {
        let state = self.state.lock();
        if !state.running {
            return Err(NodeError::NotRunning);
        }
        state
            .summary(state.tip_height())
            .ok_or_else(|| NodeError::invalid("getbestblockhash", "empty chain"))
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, NodeError> {
        let state = self.state.lock();
        if !state.running {
            return Err(NodeError::NotRunning);
        }
        state
            .chain
            .get(height as usize)
            .map(|b| b.hash.to_hex())
            .ok_or_else(|| NodeError::rpc(RPC_INVALID_PARAMETER, "Block height out of range"))
    }

    async fn get_block(&self, hash: &str) -> Result<BlockSummary, NodeError> {
        let hash = BlockHash::from_str(hash).map_err(|_| {
            NodeError::rpc(
                RPC_INVALID_PARAMETER,
                format!("blockhash must be of length 64 (not {}, for '{}')", hash.len(), hash),
            )
        })?;

        let state = self.state.lock();
        if !state.running {
            return Err(NodeError::NotRunning);
        }
        let height = *state
            .heights
            .get(&hash)
            .ok_or_else(|| NodeError::rpc(RPC_INVALID_ADDRESS_OR_KEY, "Block not found"))?;
        let block = &state.chain[height as usize];
        if block.data.is_none() {
            return Err(NodeError::rpc(RPC_MISC_ERROR, PRUNED_BLOCK_MESSAGE));
        }
        state
            .summary(height)
            .ok_or_else(|| NodeError::invalid("getblock", "height index out of sync"))
    }

    async fn submit_block(&self, block_hex: &str) -> Result<SubmitOutcome, NodeError> {
        let bytes = hex::decode(block_hex.trim())
            .map_err(|_| NodeError::rpc(RPC_DESERIALIZATION_ERROR, "Block decode failed"))?;
        let outcome = self.accept(bytes.into())?;
        if outcome.is_accepted() {
            self.relay(None);
        }
        Ok(outcome)
    }

    async fn set_mock_time(&self, time: u64) -> Result<(), NodeError> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(NodeError::NotRunning);
        }
        state.mock_time = time;
        Ok(())
    }

    async fn get_chain_info(&self) -> Result<ChainInfo, NodeError> {
        let state = self.state.lock();
        if !state.running {
            return Err(NodeError::NotRunning);
        }
        let pruned = state.is_pruned_mode();
        Ok(ChainInfo {
            blocks: state.tip_height(),
            best_hash: state.tip().hash.to_hex(),
            pruned,
            prune_height: pruned.then_some(state.prune_horizon),
        })
    }

    async fn add_peer(&self, addr: &str) -> Result<(), NodeError> {
        self.ensure_running()?;
        let peer_index = addr
            .strip_prefix(MOCK_ADDR_PREFIX)
            .and_then(|i| i.parse::<usize>().ok())
            .ok_or_else(|| {
                NodeError::rpc(RPC_INVALID_PARAMETER, format!("Unknown peer address '{addr}'"))
            })?;
        if peer_index == self.index {
            return Err(NodeError::rpc(RPC_INVALID_PARAMETER, "Cannot connect to self"));
        }

        let peer = self
            .network
            .upgrade()
            .and_then(|n| n.node(peer_index))
            .filter(|p| p.is_running());
        let Some(peer) = peer else {
            // A one-shot connection attempt to an unreachable peer fails silently
            debug!("Mock node {} could not reach {}", self.index, addr);
            return Ok(());
        };

        self.link_peer(peer_index);
        peer.link_peer(self.index);

        let pulled = self.pull_from(&peer);
        let pushed = peer.pull_from(self);
        info!(
            "Mock node {} connected to node {} (received {} blocks, sent {})",
            self.index, peer_index, pulled, pushed
        );
        if pulled > 0 {
            self.relay(Some(peer_index));
        }
        if pushed > 0 {
            peer.relay(Some(self.index));
        }
        Ok(())
    }

    async fn create_wallet(&self, name: &str, _descriptors: bool) -> Result<(), NodeError> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(NodeError::NotRunning);
        }
        if state.wallets.contains_key(name) {
            return Err(NodeError::rpc(
                RPC_WALLET_ERROR,
                format!("Wallet \"{name}\" is already loaded."),
            ));
        }
        state.wallets.insert(name.to_string(), MockWallet::default());
        Ok(())
    }

    async fn dump_wallet(&self, wallet: &str, path: &Path) -> Result<(), NodeError> {
        let path = self.resolve_path(path);
        let contents = {
            let state = self.state.lock();
            if !state.running {
                return Err(NodeError::NotRunning);
            }
            if !state.wallets.contains_key(wallet) {
                return Err(wallet_not_found());
            }
            let tip = state
                .summary(state.tip_height())
                .ok_or_else(|| NodeError::invalid("dumpwallet", "empty chain"))?;
            render_wallet_dump(wallet, &tip, state.now())
        };

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(NodeError::rpc(
                    RPC_INVALID_PARAMETER,
                    format!(
                        "{} already exists. If you are sure this is what you want, move it out of the way first",
                        path.display()
                    ),
                ));
            }
            Err(e) => {
                return Err(NodeError::rpc(
                    RPC_INVALID_PARAMETER,
                    format!("Cannot open wallet dump file: {e}"),
                ))
            }
        };
        file.write_all(contents.as_bytes())
            .await
            .map_err(|e| NodeError::rpc(RPC_MISC_ERROR, e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| NodeError::rpc(RPC_MISC_ERROR, e.to_string()))?;

        debug!("Mock node {} dumped wallet {} to {}", self.index, wallet, path.display());
        Ok(())
    }

    async fn import_wallet(&self, wallet: &str, path: &Path) -> Result<(), NodeError> {
        {
            let state = self.state.lock();
            if !state.running {
                return Err(NodeError::NotRunning);
            }
            if !state.wallets.contains_key(wallet) {
                return Err(wallet_not_found());
            }
        }

        let path = self.resolve_path(path);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| NodeError::rpc(RPC_INVALID_PARAMETER, "Cannot open wallet dump file"))?;
        let birth = parse_birth_height(&text).ok_or_else(|| {
            NodeError::rpc(RPC_INVALID_PARAMETER, "Wallet dump has no best block line")
        })?;

        let mut state = self.state.lock();
        let rescan_from = birth.min(state.tip_height());
        if state.is_pruned_mode() && rescan_from < state.prune_horizon {
            return Err(NodeError::rpc(
                RPC_WALLET_ERROR,
                pruned_import_message(rescan_from),
            ));
        }
        let entry = state
            .wallets
            .get_mut(wallet)
            .ok_or_else(wallet_not_found)?;
        entry.rescan_height = Some(rescan_from);
        entry.imports += 1;

        debug!(
            "Mock node {} imported {} into {}, rescanning from {}",
            self.index,
            path.display(),
            wallet,
            rescan_from
        );
        Ok(())
    }
}

/// A set of mock nodes that can reach each other
///
/// # Example
///
/// ```rust
/// use std::path::Path;
/// use wallet_pruning_harness::node::{MockNetwork, MockNodeConfig, NodeLauncher, NodeSpec};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let network = MockNetwork::new(MockNodeConfig::default());
/// let node = network.launch(0, &NodeSpec::archival("miner"), Path::new("/tmp/mock0")).await?;
/// assert_eq!(node.p2p_addr, "mock:0");
/// # Ok(())
/// # }
/// ```
pub struct MockNetwork {
    config: MockNodeConfig,
    nodes: Mutex<HashMap<usize, Arc<MockNode>>>,
    me: Weak<MockNetwork>,
}

impl MockNetwork {
    pub fn new(config: MockNodeConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            config,
            nodes: Mutex::new(HashMap::new()),
            me: me.clone(),
        })
    }

    /// Node `index`, if it was ever launched
    pub fn node(&self, index: usize) -> Option<Arc<MockNode>> {
        self.nodes.lock().get(&index).cloned()
    }

    /// Peer address of node `index`
    pub fn address(index: usize) -> String {
        format!("{MOCK_ADDR_PREFIX}{index}")
    }
}

#[async_trait]
impl NodeLauncher for MockNetwork {
    async fn launch(
        &self,
        index: usize,
        spec: &NodeSpec,
        datadir: &Path,
    ) -> Result<LaunchedNode, NodeError> {
        tokio::fs::create_dir_all(datadir)
            .await
            .map_err(|e| NodeError::Launch(format!("cannot create {}: {e}", datadir.display())))?;

        let node = self
            .nodes
            .lock()
            .entry(index)
            .or_insert_with(|| {
                Arc::new(MockNode::new(
                    index,
                    spec.clone(),
                    datadir.to_path_buf(),
                    self.config.clone(),
                    self.me.clone(),
                ))
            })
            .clone();
        node.start()?;
        info!("Mock node {} ({}) started at height {}", index, spec.name, node.tip_height());

        Ok(LaunchedNode {
            rpc: node,
            p2p_addr: Self::address(index),
        })
    }

    async fn halt(&self, index: usize) -> Result<(), NodeError> {
        let node = self.node(index).ok_or(NodeError::NotRunning)?;
        let peers = node.stop()?;
        for peer in peers.into_iter().filter_map(|i| self.node(i)) {
            peer.drop_peer(index);
        }
        info!("Mock node {} stopped", index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> MockNodeConfig {
        MockNodeConfig {
            block_file_size: 40_000,
            prune_buffer: 0,
            min_blocks_to_keep: 10,
            ..Default::default()
        }
    }

    async fn launch(network: &Arc<MockNetwork>, index: usize, spec: NodeSpec) -> Arc<MockNode> {
        let dir = std::env::temp_dir().join(format!("mock-node-test-{}-{index}", std::process::id()));
        network.launch(index, &spec, &dir).await.unwrap();
        network.node(index).unwrap()
    }

    fn next_block(node: &MockNode, kind: PayloadKind, large_len: usize) -> Block {
        let (height, prev, time) = {
            let state = node.state.lock();
            (state.tip_height() + 1, state.tip().hash, state.tip().time + 600)
        };
        let mut block = Block::new(height, prev, time, &kind.script_pubkey(large_len));
        block.solve();
        block
    }

    async fn mine(node: &MockNode, count: usize, kind: PayloadKind, large_len: usize) {
        for _ in 0..count {
            let block = next_block(node, kind, large_len);
            node.set_mock_time(block.time() as u64).await.unwrap();
            assert_eq!(
                node.submit_block(&block.to_hex()).await.unwrap(),
                SubmitOutcome::Accepted
            );
        }
    }

    #[tokio::test]
    async fn test_genesis_is_shared() {
        let network = MockNetwork::new(MockNodeConfig::default());
        let a = launch(&network, 0, NodeSpec::archival("a")).await;
        let b = launch(&network, 1, NodeSpec::archival("b")).await;
        assert_eq!(
            a.get_best_block().await.unwrap(),
            b.get_best_block().await.unwrap()
        );
        assert_eq!(a.get_best_block().await.unwrap().height, 0);
    }

    #[tokio::test]
    async fn test_reject_reasons() {
        let network = MockNetwork::new(MockNodeConfig::default());
        let node = launch(&network, 0, NodeSpec::archival("a")).await;

        let block = next_block(&node, PayloadKind::Light, 0);
        node.set_mock_time(block.time() as u64).await.unwrap();
        assert!(node.submit_block(&block.to_hex()).await.unwrap().is_accepted());
        assert_eq!(
            node.submit_block(&block.to_hex()).await.unwrap(),
            SubmitOutcome::Rejected("duplicate".to_string())
        );

        // Unknown parent
        let mut orphan = Block::new(2, BlockHash::ZERO, block.time() + 600, &[0x51]);
        orphan.solve();
        assert_eq!(
            node.submit_block(&orphan.to_hex()).await.unwrap(),
            SubmitOutcome::Rejected("prev-blk-not-found".to_string())
        );

        // Wrong committed height
        let tip = node.get_best_block().await.unwrap();
        let prev: BlockHash = tip.hash.parse().unwrap();
        let mut wrong_height = Block::new(7, prev, block.time() + 600, &[0x51]);
        wrong_height.solve();
        node.set_mock_time(wrong_height.time() as u64).await.unwrap();
        assert_eq!(
            node.submit_block(&wrong_height.to_hex()).await.unwrap(),
            SubmitOutcome::Rejected("bad-cb-height".to_string())
        );

        // Too far ahead of the node's clock
        let mut future = Block::new(2, prev, block.time() + 600 + 7_201, &[0x51]);
        future.solve();
        node.set_mock_time(block.time() as u64 + 600).await.unwrap();
        assert_eq!(
            node.submit_block(&future.to_hex()).await.unwrap(),
            SubmitOutcome::Rejected("time-too-new".to_string())
        );

        // Not above median time past
        let mut stale = Block::new(2, prev, block.time(), &[0x51]);
        stale.solve();
        assert_eq!(
            node.submit_block(&stale.to_hex()).await.unwrap(),
            SubmitOutcome::Rejected("time-too-old".to_string())
        );

        let err = node.submit_block("zz").await.unwrap_err();
        assert_eq!(err.code(), Some(RPC_DESERIALIZATION_ERROR));
    }

    #[tokio::test]
    async fn test_fork_is_inconclusive() {
        let network = MockNetwork::new(MockNodeConfig::default());
        let node = launch(&network, 0, NodeSpec::archival("a")).await;
        let genesis = node.get_best_block().await.unwrap();

        mine(&node, 2, PayloadKind::Light, 0).await;

        let mut fork = Block::new(1, genesis.hash.parse().unwrap(), genesis.time as u32 + 1_200, &[0x51]);
        fork.solve();
        assert_eq!(
            node.submit_block(&fork.to_hex()).await.unwrap(),
            SubmitOutcome::Rejected("inconclusive".to_string())
        );
    }

    #[tokio::test]
    async fn test_oversized_block_rejected() {
        let network = MockNetwork::new(MockNodeConfig::default());
        let node = launch(&network, 0, NodeSpec::archival("a")).await;
        let block = next_block(&node, PayloadKind::Large, MAX_BLOCK_SERIALIZED_SIZE);
        node.set_mock_time(block.time() as u64).await.unwrap();
        assert_eq!(
            node.submit_block(&block.to_hex()).await.unwrap(),
            SubmitOutcome::Rejected("bad-blk-length".to_string())
        );
    }

    #[tokio::test]
    async fn test_pruning_removes_whole_old_files() {
        let network = MockNetwork::new(small_config());
        let node = launch(&network, 0, NodeSpec {
            name: "subject".to_string(),
            prune_target_bytes: Some(100_000),
            flags: Vec::new(),
        })
        .await;

        mine(&node, 20, PayloadKind::Light, 0).await;
        assert_eq!(node.prune_horizon(), 0);

        mine(&node, 60, PayloadKind::Large, 4_000).await;
        let horizon = node.prune_horizon();
        assert!(horizon > 20, "horizon {horizon}");
        assert!(horizon <= 80 - 10);
        assert!(node.storage_usage() < 100_000);

        // Everything below the horizon is gone, everything above is kept
        assert!(!node.has_block_data(horizon - 1));
        assert!(node.has_block_data(horizon));
        assert!(node.has_block_data(80));

        let hash = node.get_block_hash(horizon - 1).await.unwrap();
        let err = node.get_block(&hash).await.unwrap_err();
        assert_eq!(err, NodeError::rpc(RPC_MISC_ERROR, PRUNED_BLOCK_MESSAGE));

        let info = node.get_chain_info().await.unwrap();
        assert!(info.pruned);
        assert_eq!(info.prune_height, Some(horizon));
    }

    #[tokio::test]
    async fn test_archival_node_never_prunes() {
        let network = MockNetwork::new(small_config());
        let node = launch(&network, 0, NodeSpec::archival("miner")).await;
        mine(&node, 30, PayloadKind::Large, 4_000).await;
        assert_eq!(node.prune_horizon(), 0);
        assert!(node.has_block_data(1));
        assert_eq!(node.get_chain_info().await.unwrap().prune_height, None);
    }

    #[tokio::test]
    async fn test_peers_sync_on_connect_and_relay() {
        let network = MockNetwork::new(MockNodeConfig::default());
        let a = launch(&network, 0, NodeSpec::archival("a")).await;
        mine(&a, 5, PayloadKind::Light, 0).await;

        let b = launch(&network, 1, NodeSpec::archival("b")).await;
        b.set_mock_time(a.get_best_block().await.unwrap().time).await.unwrap();
        b.add_peer(&MockNetwork::address(0)).await.unwrap();
        assert_eq!(b.tip_height(), 5);
        assert_eq!(a.peers(), vec![1]);

        let block = next_block(&a, PayloadKind::Light, 0);
        a.set_mock_time(block.time() as u64).await.unwrap();
        b.set_mock_time(block.time() as u64).await.unwrap();
        a.submit_block(&block.to_hex()).await.unwrap();
        assert_eq!(b.tip_height(), 6);

        network.halt(1).await.unwrap();
        assert!(a.peers().is_empty());
        assert_eq!(b.get_best_block().await.unwrap_err(), NodeError::NotRunning);
    }

    #[tokio::test]
    async fn test_restart_keeps_chain_and_clears_time() {
        let network = MockNetwork::new(MockNodeConfig::default());
        let node = launch(&network, 0, NodeSpec::archival("a")).await;
        mine(&node, 3, PayloadKind::Light, 0).await;
        assert!(node.mock_time() > 0);

        network.halt(0).await.unwrap();
        assert_eq!(network.halt(0).await.unwrap_err(), NodeError::NotRunning);

        let node = launch(&network, 0, NodeSpec::archival("a")).await;
        assert_eq!(node.tip_height(), 3);
        assert_eq!(node.mock_time(), 0);

        let again = network
            .launch(0, &NodeSpec::archival("a"), &std::env::temp_dir())
            .await;
        assert!(matches!(again, Err(NodeError::Launch(_))));
    }

    #[tokio::test]
    async fn test_wallet_dump_and_import() {
        let dir = tempfile::tempdir().unwrap();
        let network = MockNetwork::new(MockNodeConfig::default());
        network
            .launch(0, &NodeSpec::archival("a"), dir.path())
            .await
            .unwrap();
        let node = network.node(0).unwrap();
        mine(&node, 4, PayloadKind::Light, 0).await;

        let path = dir.path().join("w.dat");
        assert_eq!(
            node.dump_wallet("w", &path).await.unwrap_err().code(),
            Some(RPC_WALLET_NOT_FOUND)
        );

        node.create_wallet("w", false).await.unwrap();
        node.dump_wallet("w", &path).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(parse_birth_height(&text), Some(4));

        // Refuses to overwrite
        assert_eq!(
            node.dump_wallet("w", &path).await.unwrap_err().code(),
            Some(RPC_INVALID_PARAMETER)
        );

        node.import_wallet("w", &path).await.unwrap();
        assert_eq!(node.wallet_rescan_height("w"), Some(4));
        assert_eq!(node.wallet_imports("w"), 1);

        let missing = dir.path().join("missing.dat");
        assert_eq!(
            node.import_wallet("w", &missing).await.unwrap_err().code(),
            Some(RPC_INVALID_PARAMETER)
        );
    }

    #[test]
    fn test_render_wallet_dump_header() {
        let tip = BlockSummary {
            height: 888,
            hash: "ab".repeat(32),
            time: 1_296_700_000,
        };
        let text = render_wallet_dump("w", &tip, 1_296_700_600);
        assert!(text.contains(&format!(
            "# * Best block at time of backup was 888 ({}),\n",
            "ab".repeat(32)
        )));
        assert!(text.ends_with("# End of dump\n"));
    }
}
