// File: testing-framework/src/chain/builder.rs
//
// Grows a node's chain with synthetic blocks under the virtual clock.

use super::block::{
    serialized_block_size, Block, BlockHash, PayloadKind, DEFAULT_LARGE_PAYLOAD,
    MAX_BLOCK_SERIALIZED_SIZE,
};
use crate::error::{HarnessError, HarnessResult, NodeError};
use crate::node::{BlockSummary, SubmitOutcome};
use crate::orchestrator::VirtualClock;
use crate::topology::Topology;
use log::{debug, info};
use std::str::FromStr;
use std::sync::Arc;

/// Default seconds between consecutive block timestamps
pub const DEFAULT_BLOCK_SPACING: u64 = 600;

/// Builds, solves and submits blocks on top of a node's tip
///
/// Every block is stamped `spacing` seconds after its parent, and the shared
/// [`VirtualClock`] is raised to at least that stamp and broadcast before the
/// block is submitted, so no node ever sees a block from its future.
pub struct ChainBuilder {
    clock: Arc<VirtualClock>,
    spacing: u64,
    large_payload_len: usize,
}

impl ChainBuilder {
    pub fn new(clock: Arc<VirtualClock>) -> Self {
        Self {
            clock,
            spacing: DEFAULT_BLOCK_SPACING,
            large_payload_len: DEFAULT_LARGE_PAYLOAD,
        }
    }

    pub fn with_spacing(mut self, seconds: u64) -> Self {
        self.spacing = seconds;
        self
    }

    /// Number of `OP_TRUE` bytes in a large coinbase script
    pub fn with_large_payload_len(mut self, len: usize) -> Self {
        self.large_payload_len = len;
        self
    }

    pub fn spacing(&self) -> u64 {
        self.spacing
    }

    pub fn large_payload_len(&self) -> usize {
        self.large_payload_len
    }

    /// Reject settings that could never produce a valid block
    pub fn validate(&self) -> HarnessResult<()> {
        if self.spacing == 0 {
            return Err(HarnessError::Config(
                "block spacing must be positive".to_string(),
            ));
        }
        // Coinbase height push grows with height; u32::MAX bounds it
        let worst = serialized_block_size(u32::MAX as u64, PayloadKind::Large, self.large_payload_len);
        if worst > MAX_BLOCK_SERIALIZED_SIZE {
            return Err(HarnessError::Config(format!(
                "large payload of {} bytes makes {}-byte blocks, above the {}-byte limit",
                self.large_payload_len, worst, MAX_BLOCK_SERIALIZED_SIZE
            )));
        }
        Ok(())
    }

    /// Mine `count` blocks carrying `kind` on node `index`
    ///
    /// # Errors
    ///
    /// - `Config` if the payload cannot fit in a block (nothing is submitted)
    /// - `BlockRejected` with the node's reason for the first refused block
    /// - `Node`/`NotRunning` if the node cannot be reached
    pub async fn mine(
        &self,
        topology: &mut Topology,
        index: usize,
        count: usize,
        kind: PayloadKind,
    ) -> HarnessResult<Vec<BlockSummary>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        if kind == PayloadKind::Large {
            self.validate()?;
        }

        let rpc = topology.rpc(index)?;
        let tip = rpc
            .get_best_block()
            .await
            .map_err(|e| HarnessError::node(index, e))?;
        let mut prev_hash = BlockHash::from_str(&tip.hash).map_err(|e| {
            HarnessError::node(index, NodeError::invalid("getbestblockhash", e.to_string()))
        })?;
        let mut height = tip.height;
        let mut time = tip.time;

        info!(
            "Mining {} {:?} blocks on node {} from height {}",
            count, kind, index, height
        );

        self.clock.advance_to(time + self.spacing);
        topology.broadcast_time().await?;

        let script = kind.script_pubkey(self.large_payload_len);
        let mut mined = Vec::with_capacity(count);
        for _ in 0..count {
            height += 1;
            time += self.spacing;
            let header_time = u32::try_from(time).map_err(|_| {
                HarnessError::Config(format!("block time {time} does not fit a header"))
            })?;

            let mut block = Block::new(height, prev_hash, header_time, &script);
            let attempts = block.solve();
            let hash = block.hash();

            match rpc
                .submit_block(&block.to_hex())
                .await
                .map_err(|e| HarnessError::node(index, e))?
            {
                SubmitOutcome::Accepted => {}
                SubmitOutcome::Rejected(reason) => {
                    return Err(HarnessError::BlockRejected {
                        index,
                        height,
                        reason,
                    })
                }
            }
            debug!(
                "Block {} accepted at height {} ({} bytes, {} attempts)",
                hash,
                height,
                block.size(),
                attempts
            );

            mined.push(BlockSummary {
                height,
                hash: hash.to_hex(),
                time: block.time() as u64,
            });
            prev_hash = hash;
            // The solver may bump the stamp when it exhausts the nonce space
            time = block.time() as u64;

            self.clock.advance(self.spacing);
            topology.broadcast_time().await?;
        }

        info!("Node {} now at height {}", index, height);
        Ok(mined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{MockNetwork, MockNodeConfig, NodeSpec};
    use crate::topology::TopologyBuilder;

    async fn single_node(start: u64) -> (Arc<VirtualClock>, Topology) {
        let clock = Arc::new(VirtualClock::new(start));
        let mut topology = TopologyBuilder::new()
            .with_node(NodeSpec::archival("miner"))
            .with_launcher(MockNetwork::new(MockNodeConfig::default()))
            .with_virtual_clock(clock.clone())
            .build()
            .unwrap();
        topology.start(0).await.unwrap();
        (clock, topology)
    }

    #[tokio::test]
    async fn test_mine_light_blocks() {
        let (clock, mut topology) = single_node(0).await;
        let builder = ChainBuilder::new(clock.clone());

        let blocks = builder
            .mine(&mut topology, 0, 5, PayloadKind::Light)
            .await
            .unwrap();
        assert_eq!(blocks.len(), 5);
        assert_eq!(blocks.last().unwrap().height, 5);
        for pair in blocks.windows(2) {
            assert_eq!(pair[1].time, pair[0].time + DEFAULT_BLOCK_SPACING);
        }

        // Clock stays one spacing ahead of the tip
        assert_eq!(clock.now(), blocks[4].time + DEFAULT_BLOCK_SPACING);
        assert_eq!(topology.node(0).unwrap().acknowledged_time(), clock.now());
    }

    #[tokio::test]
    async fn test_mine_zero_blocks() {
        let (clock, mut topology) = single_node(0).await;
        let builder = ChainBuilder::new(clock.clone());
        let blocks = builder
            .mine(&mut topology, 0, 0, PayloadKind::Large)
            .await
            .unwrap();
        assert!(blocks.is_empty());
        assert_eq!(clock.now(), 0);
    }

    #[tokio::test]
    async fn test_oversized_payload_is_config_error() {
        let (clock, mut topology) = single_node(0).await;
        let builder = ChainBuilder::new(clock).with_large_payload_len(MAX_BLOCK_SERIALIZED_SIZE);
        let result = builder.mine(&mut topology, 0, 1, PayloadKind::Large).await;
        assert!(matches!(result, Err(HarnessError::Config(_))));

        let tip = topology.rpc(0).unwrap().get_best_block().await.unwrap();
        assert_eq!(tip.height, 0);
    }

    #[tokio::test]
    async fn test_clock_never_moves_backwards() {
        // A clock already far past the tip is not lowered
        let (clock, mut topology) = single_node(2_000_000_000).await;
        let builder = ChainBuilder::new(clock.clone());
        let blocks = builder
            .mine(&mut topology, 0, 2, PayloadKind::Light)
            .await
            .unwrap();
        assert!(blocks[1].time < 2_000_000_000);
        assert_eq!(clock.now(), 2_000_000_000 + 2 * DEFAULT_BLOCK_SPACING);
    }

    #[tokio::test]
    async fn test_stopped_node_cannot_mine() {
        let (clock, mut topology) = single_node(0).await;
        topology.stop(0).await.unwrap();
        let builder = ChainBuilder::new(clock);
        let result = builder.mine(&mut topology, 0, 1, PayloadKind::Light).await;
        assert!(matches!(result, Err(HarnessError::NotRunning(0))));
    }

    #[test]
    fn test_default_payload_is_valid() {
        let builder = ChainBuilder::new(Arc::new(VirtualClock::default()));
        assert!(builder.validate().is_ok());
        assert!(builder.with_spacing(0).validate().is_err());
    }
}
