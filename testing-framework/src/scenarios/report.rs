// File: testing-framework/src/scenarios/report.rs
//
// Execution Report
//
// JSON record of a scenario run: every state transition with the heights
// seen on each node, the backups taken, and the failure if there was one.

use super::ScenarioState;
use crate::error::HarnessError;
use crate::orchestrator::VirtualTime;
use crate::topology::Topology;
use crate::wallet::WalletBackup;
use log::info;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// What one node reported at a transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeObservation {
    pub index: usize,
    pub name: String,
    pub running: bool,
    /// Tip height, if the node answered
    pub height: Option<u64>,
    /// Prune horizon, if the node prunes
    pub prune_height: Option<u64>,
}

/// A state the run reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub state: ScenarioState,
    pub virtual_time: VirtualTime,
    /// Wall-clock time of the transition (RFC 3339)
    pub timestamp: String,
    pub nodes: Vec<NodeObservation>,
}

/// A backup taken during the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub wallet: String,
    pub source: usize,
    pub birth_height: u64,
    pub path: PathBuf,
}

/// Why a run stopped early
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Last state reached
    pub last_state: ScenarioState,
    /// State the run was working toward
    pub attempted: Option<ScenarioState>,
    pub error: String,
}

/// Complete record of a scenario run
///
/// # Example
///
/// ```rust
/// use wallet_pruning_harness::scenarios::ExecutionReport;
///
/// let mut report = ExecutionReport::new("wallet_pruning");
/// report.log("Generating a long chain of blocks");
/// assert!(!report.success);
/// assert_eq!(report.log.len(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub scenario: String,
    /// Wall-clock start (RFC 3339)
    pub started_at: String,
    pub duration_ms: u64,
    pub success: bool,
    pub final_state: ScenarioState,
    pub failure: Option<FailureRecord>,
    pub transitions: Vec<StateRecord>,
    pub backups: Vec<BackupRecord>,
    pub log: Vec<String>,
    #[serde(skip)]
    start_time: Option<Instant>,
}

impl ExecutionReport {
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            started_at: chrono::Utc::now().to_rfc3339(),
            duration_ms: 0,
            success: false,
            final_state: ScenarioState::Init,
            failure: None,
            transitions: Vec::new(),
            backups: Vec::new(),
            log: Vec::new(),
            start_time: Some(Instant::now()),
        }
    }

    /// Append a milestone to the report and the log output
    pub fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.log.push(message);
    }

    /// Record that `state` was reached
    pub fn record_transition(
        &mut self,
        state: ScenarioState,
        virtual_time: VirtualTime,
        nodes: Vec<NodeObservation>,
    ) {
        self.final_state = state;
        self.transitions.push(StateRecord {
            state,
            virtual_time,
            timestamp: chrono::Utc::now().to_rfc3339(),
            nodes,
        });
    }

    pub fn record_backup(&mut self, backup: &WalletBackup) {
        self.backups.push(BackupRecord {
            wallet: backup.wallet.clone(),
            source: backup.source,
            birth_height: backup.birth_height,
            path: backup.path.clone(),
        });
    }

    /// Mark the run as failed
    pub fn record_failure(&mut self, attempted: Option<ScenarioState>, error: &HarnessError) {
        self.success = false;
        self.failure = Some(FailureRecord {
            last_state: self.final_state,
            attempted,
            error: error.to_string(),
        });
        self.stamp_duration();
    }

    /// Mark the run as complete
    pub fn record_success(&mut self) {
        self.success = true;
        self.failure = None;
        self.stamp_duration();
    }

    fn stamp_duration(&mut self) {
        if let Some(start) = self.start_time {
            self.duration_ms = start.elapsed().as_millis() as u64;
        }
    }

    /// Last record for `state`, if it was reached
    pub fn transition(&self, state: ScenarioState) -> Option<&StateRecord> {
        self.transitions.iter().rev().find(|r| r.state == state)
    }

    /// Save the report as pretty JSON under `output_dir`
    ///
    /// The file name carries the scenario name and a timestamp. Returns the
    /// path written.
    pub async fn save(&self, output_dir: impl AsRef<Path>) -> io::Result<PathBuf> {
        let output_dir = output_dir.as_ref();
        fs::create_dir_all(output_dir).await?;

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S%.3f");
        let filepath = output_dir.join(format!("{}_{}.json", self.scenario, timestamp));

        let json = serde_json::to_string_pretty(self)?;
        let mut file = fs::File::create(&filepath).await?;
        file.write_all(json.as_bytes()).await?;
        file.flush().await?;

        Ok(filepath)
    }

    /// Load a report saved by [`ExecutionReport::save`]
    pub async fn load(filepath: impl AsRef<Path>) -> io::Result<Self> {
        let content = fs::read_to_string(filepath.as_ref()).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Observe every node of `topology`
///
/// Nodes that fail to answer are recorded without heights; observation never
/// fails the run.
pub async fn observe(topology: &Topology) -> Vec<NodeObservation> {
    let mut nodes = Vec::with_capacity(topology.len());
    for node in topology.nodes() {
        let info = match node.rpc() {
            Ok(rpc) => rpc.get_chain_info().await.ok(),
            Err(_) => None,
        };
        nodes.push(NodeObservation {
            index: node.index(),
            name: node.name().to_string(),
            running: node.is_running(),
            height: info.as_ref().map(|i| i.blocks),
            prune_height: info.and_then(|i| i.prune_height),
        });
    }
    nodes
}
