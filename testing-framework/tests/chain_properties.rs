// Property tests for block production against the mock network

use proptest::prelude::*;
use std::sync::Arc;
use wallet_pruning_harness::chain::{decode_block_hex, ChainBuilder, PayloadKind};
use wallet_pruning_harness::node::{MockNetwork, MockNodeConfig, NodeRpc, NodeSpec};
use wallet_pruning_harness::topology::TopologyBuilder;
use wallet_pruning_harness::VirtualClock;

/// Mine `count` light blocks with `spacing` and return (height, times, clock)
fn mine_light(count: usize, spacing: u64, start: u64) -> (u64, Vec<u64>, u64) {
    tokio_test::block_on(async {
        let network = MockNetwork::new(MockNodeConfig::default());
        let clock = Arc::new(VirtualClock::new(start));
        let mut topology = TopologyBuilder::new()
            .with_node(NodeSpec::archival("miner"))
            .with_launcher(network.clone())
            .with_virtual_clock(clock.clone())
            .build()
            .unwrap();
        topology.start(0).await.unwrap();

        let mined = ChainBuilder::new(clock.clone())
            .with_spacing(spacing)
            .mine(&mut topology, 0, count, PayloadKind::Light)
            .await
            .unwrap();
        let height = network.node(0).unwrap().get_best_block().await.unwrap().height;
        topology.shutdown().await.unwrap();

        (height, mined.iter().map(|b| b.time).collect(), clock.now())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_light_mining_extends_tip_by_count(count in 0usize..12, spacing in 1u64..5_000) {
        let genesis = MockNodeConfig::default().genesis_time as u64;
        let (height, times, now) = mine_light(count, spacing, 0);

        prop_assert_eq!(height, count as u64);
        prop_assert_eq!(times.len(), count);
        for (i, time) in times.iter().enumerate() {
            prop_assert_eq!(*time, genesis + (i as u64 + 1) * spacing);
        }
        if let Some(last) = times.last() {
            prop_assert!(now > *last);
        }
    }

    #[test]
    fn prop_clock_never_moves_backwards(count in 1usize..6, start in 0u64..2_000_000_000) {
        let (_, times, now) = mine_light(count, 600, start);
        prop_assert!(now >= start);
        prop_assert!(times.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn prop_light_blocks_decode(height in 1u64..500_000, time in 1_296_688_602u32..2_000_000_000) {
        let script = PayloadKind::Light.script_pubkey(0);
        let mut block = wallet_pruning_harness::chain::Block::new(
            height,
            wallet_pruning_harness::chain::BlockHash::ZERO,
            time,
            &script,
        );
        block.solve();
        let decoded = decode_block_hex(&block.to_hex()).unwrap();
        prop_assert_eq!(decoded.coinbase_height, Some(height));
        prop_assert!(decoded.merkle_matches);
        prop_assert_eq!(decoded.size, block.size());
        prop_assert!(decoded.header.has_valid_pow());
    }
}
