// File: testing-framework/src/prelude.rs
//
// Prelude
//
// Everything a scenario test usually needs, in one import.

pub use crate::chain::{Block, BlockHash, ChainBuilder, PayloadKind};
pub use crate::config::HarnessConfig;
pub use crate::error::{
    pruned_import_message, ErrorClass, HarnessError, HarnessResult, NodeError,
    PRUNED_BLOCK_MESSAGE,
};
pub use crate::node::{
    BlockSummary, ChainInfo, MockNetwork, MockNodeConfig, NodeLauncher, NodeRpc, NodeSpec,
    ProcessLauncher, ProcessLauncherConfig,
};
pub use crate::orchestrator::{Clock, PausedClock, SystemClock, VirtualClock, VirtualTime};
pub use crate::scenarios::{
    ExecutionReport, HarnessContext, ScenarioConfig, ScenarioRunner, ScenarioState,
};
pub use crate::topology::{Topology, TopologyBuilder};
pub use crate::wallet::{WalletBackup, WalletSnapshot};

pub use std::sync::Arc;
pub use tokio::time::Duration;
