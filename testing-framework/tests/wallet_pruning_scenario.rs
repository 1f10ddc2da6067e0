// Scenario tests against the in-process mock network
//
// Uses the scaled configuration in configs/scaled-mock.yaml: 20 light blocks,
// 60 large blocks and 5 extra, with a subject budget small enough that its
// prune horizon lands at 65.

use std::path::Path;
use std::sync::Arc;
use tokio::time::Duration;
use tokio_test::{assert_err, assert_ok};
use wallet_pruning_harness::chain::PayloadKind;
use wallet_pruning_harness::error::{
    pruned_import_message, ErrorClass, HarnessError, RPC_WALLET_ERROR,
};
use wallet_pruning_harness::node::mock::render_wallet_dump;
use wallet_pruning_harness::node::{BlockSummary, MockNetwork, NodeRpc, NodeSpec};
use wallet_pruning_harness::scenarios::{ExecutionReport, HarnessContext, ScenarioRunner};
use wallet_pruning_harness::topology::TopologyBuilder;
use wallet_pruning_harness::wallet::{WalletBackup, WalletSnapshot};
use wallet_pruning_harness::{HarnessConfig, ScenarioState, VirtualClock};

const SCALED_CONFIG: &str = include_str!("../configs/scaled-mock.yaml");

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn scaled_config() -> HarnessConfig {
    let config = HarnessConfig::from_yaml_str(SCALED_CONFIG).unwrap();
    config.validate().unwrap();
    config
}

fn runner(config: &HarnessConfig) -> (Arc<MockNetwork>, ScenarioRunner) {
    let network = MockNetwork::new(config.mock.clone());
    let clock = Arc::new(VirtualClock::new(config.chain.start_time));
    let topology = config
        .topology_builder(network.clone(), clock.clone())
        .build()
        .unwrap();
    let ctx = HarnessContext::new(config.scenario(), topology, config.chain_builder(clock));
    (network, ScenarioRunner::new(ctx))
}

async fn write_backup(dir: &Path, subject: &MockNetwork, birth: u64) -> WalletBackup {
    let node = subject.node(1).unwrap();
    let tip = BlockSummary {
        height: birth,
        hash: node.get_block_hash(birth).await.unwrap(),
        time: 0,
    };
    let path = dir.join(format!("birth_{birth}.dat"));
    tokio::fs::write(&path, render_wallet_dump("wallet", &tip, 0))
        .await
        .unwrap();
    WalletBackup {
        wallet: "wallet".to_string(),
        source: 0,
        path,
        birth_height: birth,
    }
}

#[tokio::test]
async fn test_full_scenario_reaches_done() {
    init_logging();
    let config = scaled_config();
    let (network, mut runner) = runner(&config);

    runner.run().await.unwrap();

    let ctx = runner.context();
    assert_eq!(ctx.state(), ScenarioState::Done);
    assert_eq!(ctx.early_backup().unwrap().birth_height, 20);
    assert_eq!(ctx.tip_backup().unwrap().birth_height, 80);
    assert_eq!(ctx.subject_horizon(), Some(65));

    let report = runner.report();
    assert!(report.success);
    assert!(report.failure.is_none());
    assert_eq!(report.final_state, ScenarioState::Done);
    assert_eq!(report.transitions.len(), 6);
    assert_eq!(report.backups.len(), 2);

    let synced = report.transition(ScenarioState::SubjectSynced).unwrap();
    assert_eq!(synced.nodes[1].height, Some(80));
    assert_eq!(synced.nodes[1].prune_height, Some(65));
    assert_eq!(synced.nodes[0].prune_height, None);

    // Scenario A imported the near-tip backup twice, from its own birth height
    let subject = network.node(1).unwrap();
    assert_eq!(subject.wallet_imports("wallet_import"), 2);
    assert_eq!(subject.wallet_rescan_height("wallet_import"), Some(80));
    assert_eq!(subject.tip_height(), 85);

    // Every node was stopped at the end
    assert!(!subject.is_running());
    assert!(!network.node(0).unwrap().is_running());
}

#[tokio::test]
async fn test_block_timestamps_follow_the_clock() {
    let config = scaled_config();
    let (network, mut runner) = runner(&config);
    runner.run_until(ScenarioState::ChainBuilt).await.unwrap();

    let spacing = config.chain.block_spacing_secs;
    let miner = network.node(0).unwrap();
    let tip = miner.get_best_block().await.unwrap();
    assert_eq!(tip.height, 80);
    assert_eq!(tip.time, config.mock.genesis_time as u64 + 80 * spacing);
    assert!(runner.context().topology.clock().now() >= tip.time);
    assert_eq!(miner.mock_time(), runner.context().topology.clock().now());

    runner.context_mut().topology.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_import_boundary_at_prune_horizon() {
    init_logging();
    let config = scaled_config();
    let (network, mut runner) = runner(&config);
    runner
        .run_until(ScenarioState::ImportWhileRetainedVerified)
        .await
        .unwrap();

    let horizon = runner.context().subject_horizon().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let topology = &runner.context().topology;

    let at_horizon = write_backup(dir.path(), &network, horizon).await;
    assert_ok!(WalletSnapshot::import(topology, 1, "wallet_import", &at_horizon).await);
    assert_eq!(
        network.node(1).unwrap().wallet_rescan_height("wallet_import"),
        Some(horizon)
    );

    let below = write_backup(dir.path(), &network, horizon - 1).await;
    let err = assert_err!(WalletSnapshot::import(topology, 1, "wallet_import", &below).await);
    let node_err = err.node_error().unwrap();
    assert_eq!(node_err.code(), Some(RPC_WALLET_ERROR));
    assert_eq!(
        node_err.message(),
        Some(pruned_import_message(horizon - 1).as_str())
    );
    assert_eq!(
        node_err.classify(),
        ErrorClass::InsufficientHistory {
            required_height: horizon - 1
        }
    );

    runner.run().await.unwrap();
}

#[tokio::test]
async fn test_unpruned_subject_fails_at_sync() {
    let mut config = scaled_config();
    // Budget large enough that nothing is ever pruned
    config.nodes[1].prune_bytes = Some(10_000_000);
    let (network, mut runner) = runner(&config);

    let err = runner.run().await.unwrap_err();
    match &err {
        HarnessError::ScenarioAssertion { state, .. } => {
            assert_eq!(*state, ScenarioState::SubjectSynced)
        }
        other => panic!("unexpected error {other:?}"),
    }

    let report = runner.report();
    assert!(!report.success);
    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.last_state, ScenarioState::ChainBuilt);
    assert_eq!(failure.attempted, Some(ScenarioState::SubjectSynced));
    assert_eq!(runner.context().state(), ScenarioState::ChainBuilt);

    // Nodes are stopped on failure too
    assert!(!network.node(0).unwrap().is_running());
    assert!(!network.node(1).unwrap().is_running());

    let dir = tempfile::tempdir().unwrap();
    let path = report.save(dir.path()).await.unwrap();
    let loaded = ExecutionReport::load(&path).await.unwrap();
    assert_eq!(loaded.failure, report.failure);
}

#[tokio::test]
async fn test_sync_timeout_lists_observed_tips() {
    let config = scaled_config();
    let network = MockNetwork::new(config.mock.clone());
    let clock = Arc::new(VirtualClock::new(0));
    let mut topology = TopologyBuilder::new()
        .with_node(NodeSpec::archival("miner"))
        .with_node(NodeSpec::archival("isolated"))
        .with_launcher(network)
        .with_virtual_clock(clock.clone())
        .with_poll_interval(Duration::from_millis(10))
        .build()
        .unwrap();
    topology.start(0).await.unwrap();
    topology.start(1).await.unwrap();

    config
        .chain_builder(clock)
        .mine(&mut topology, 0, 3, PayloadKind::Light)
        .await
        .unwrap();

    // Never connected, so the nodes cannot converge
    let err = topology.sync(Duration::from_millis(100)).await.unwrap_err();
    match &err {
        HarnessError::SyncTimeout { observed, .. } => {
            let heights: Vec<(usize, u64)> =
                observed.iter().map(|t| (t.index, t.height)).collect();
            assert_eq!(heights, vec![(0, 3), (1, 0)]);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.to_string().contains("node0=3@"));

    topology.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_time_reaches_late_started_node() {
    let config = scaled_config();
    let network = MockNetwork::new(config.mock.clone());
    let clock = Arc::new(VirtualClock::new(0));
    let mut topology = TopologyBuilder::new()
        .with_node(NodeSpec::archival("miner"))
        .with_node(NodeSpec::archival("late"))
        .with_launcher(network.clone())
        .with_virtual_clock(clock.clone())
        .build()
        .unwrap();
    topology.start(0).await.unwrap();

    config
        .chain_builder(clock.clone())
        .mine(&mut topology, 0, 2, PayloadKind::Light)
        .await
        .unwrap();

    // The stopped node was skipped by every broadcast
    assert_eq!(topology.node(1).unwrap().acknowledged_time(), 0);
    assert_eq!(topology.broadcast_time().await.unwrap(), 1);

    topology.start(1).await.unwrap();
    assert_eq!(network.node(1).unwrap().mock_time(), clock.now());
    assert_eq!(topology.node(1).unwrap().acknowledged_time(), clock.now());

    topology.connect(1, 0).await.unwrap();
    assert_eq!(topology.sync(Duration::from_secs(5)).await.unwrap(), 2);
    topology.shutdown().await.unwrap();
}
