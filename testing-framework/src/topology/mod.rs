// File: testing-framework/src/topology/mod.rs
//
// Node Topology
//
// A fixed set of node handles with staggered startup, peer connections and
// the tip-synchronization barrier. The topology owns the only blocking wait
// in the harness (`sync`), and it goes through the wait `Clock` so tests can
// run it under paused time.

pub mod builder;

pub use builder::TopologyBuilder;

use crate::error::{HarnessError, HarnessResult, ObservedTip};
use crate::node::{NodeLauncher, NodeRpc, NodeSpec};
use crate::orchestrator::{Clock, VirtualClock, VirtualTime};
use crate::utilities::TempDataDir;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::Duration;

/// Handle to one node
pub struct NodeHandle {
    index: usize,
    spec: NodeSpec,
    datadir: PathBuf,
    p2p_addr: Option<String>,
    rpc: Option<Arc<dyn NodeRpc>>,
    acknowledged_time: VirtualTime,
}

impl NodeHandle {
    fn new(index: usize, spec: NodeSpec, datadir: PathBuf) -> Self {
        Self {
            index,
            spec,
            datadir,
            p2p_addr: None,
            rpc: None,
            acknowledged_time: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    pub fn datadir(&self) -> &Path {
        &self.datadir
    }

    /// Peer address, known once the node has been started
    pub fn p2p_addr(&self) -> Option<&str> {
        self.p2p_addr.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.rpc.is_some()
    }

    /// Last virtual time this node accepted
    pub fn acknowledged_time(&self) -> VirtualTime {
        self.acknowledged_time
    }

    /// Request handle of a running node
    pub fn rpc(&self) -> HarnessResult<&Arc<dyn NodeRpc>> {
        self.rpc.as_ref().ok_or(HarnessError::NotRunning(self.index))
    }

    /// Hand virtual time `t` to the node
    pub async fn receive_time(&mut self, t: VirtualTime) -> HarnessResult<()> {
        let rpc = self.rpc()?.clone();
        rpc.set_mock_time(t)
            .await
            .map_err(|e| HarnessError::node(self.index, e))?;
        self.acknowledged_time = t;
        Ok(())
    }
}

/// The nodes taking part in a run
///
/// Nodes are identified by their index in the order they were added to the
/// builder. Nothing is started by construction.
pub struct Topology {
    nodes: Vec<NodeHandle>,
    launcher: Arc<dyn NodeLauncher>,
    clock: Arc<VirtualClock>,
    wait_clock: Arc<dyn Clock>,
    poll_interval: Duration,
    root: TempDataDir,
}

impl Topology {
    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Shared virtual clock
    pub fn clock(&self) -> &Arc<VirtualClock> {
        &self.clock
    }

    /// Data root holding every node directory
    pub fn data_root(&self) -> &Path {
        self.root.path()
    }

    pub fn node(&self, index: usize) -> HarnessResult<&NodeHandle> {
        self.nodes.get(index).ok_or(HarnessError::UnknownNode(index))
    }

    pub fn node_mut(&mut self, index: usize) -> HarnessResult<&mut NodeHandle> {
        self.nodes
            .get_mut(index)
            .ok_or(HarnessError::UnknownNode(index))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeHandle> {
        self.nodes.iter()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut NodeHandle> {
        self.nodes.iter_mut()
    }

    /// Request handle of running node `index`
    pub fn rpc(&self, index: usize) -> HarnessResult<Arc<dyn NodeRpc>> {
        self.node(index)?.rpc().cloned()
    }

    /// Push the current virtual time to every running node
    pub async fn broadcast_time(&mut self) -> HarnessResult<usize> {
        let clock = self.clock.clone();
        clock.broadcast(self.nodes.iter_mut()).await
    }

    /// Launch a stopped node and hand it the current virtual time
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` if the node is up, `UnknownNode` for a bad index, or
    /// the launcher's failure.
    pub async fn start(&mut self, index: usize) -> HarnessResult<()> {
        let launcher = self.launcher.clone();
        let now = self.clock.now();
        let node = self.node_mut(index)?;
        if node.is_running() {
            return Err(HarnessError::AlreadyRunning(index));
        }

        info!("Starting node {} ({})", index, node.name());
        let launched = launcher
            .launch(index, &node.spec, &node.datadir)
            .await
            .map_err(|e| HarnessError::node(index, e))?;
        node.rpc = Some(launched.rpc);
        node.p2p_addr = Some(launched.p2p_addr);

        if now != 0 {
            node.receive_time(now).await?;
        }
        Ok(())
    }

    /// Halt a running node
    pub async fn stop(&mut self, index: usize) -> HarnessResult<()> {
        let launcher = self.launcher.clone();
        let node = self.node_mut(index)?;
        if !node.is_running() {
            return Err(HarnessError::NotRunning(index));
        }

        info!("Stopping node {} ({})", index, node.name());
        // The handle counts as stopped even if the halt itself failed
        node.rpc = None;
        launcher
            .halt(index)
            .await
            .map_err(|e| HarnessError::node(index, e))
    }

    /// Ask node `a` to connect to node `b`
    pub async fn connect(&mut self, a: usize, b: usize) -> HarnessResult<()> {
        let addr = {
            let target = self.node(b)?;
            if !target.is_running() {
                return Err(HarnessError::NotRunning(b));
            }
            target
                .p2p_addr()
                .map(str::to_string)
                .ok_or(HarnessError::NotRunning(b))?
        };
        let rpc = self.rpc(a)?;

        debug!("Connecting node {} to node {} at {}", a, b, addr);
        rpc.add_peer(&addr)
            .await
            .map_err(|e| HarnessError::node(a, e))
    }

    /// Best block of every running node
    pub async fn tips(&self) -> HarnessResult<Vec<ObservedTip>> {
        let mut tips = Vec::new();
        for node in self.nodes.iter().filter(|n| n.is_running()) {
            let best = node
                .rpc()?
                .get_best_block()
                .await
                .map_err(|e| HarnessError::node(node.index, e))?;
            tips.push(ObservedTip {
                index: node.index,
                height: best.height,
                hash: best.hash,
            });
        }
        Ok(tips)
    }

    /// Wait until every running node reports the same best block
    ///
    /// Returns the agreed height.
    ///
    /// # Errors
    ///
    /// `SyncTimeout` with the last tip seen on each running node if they do
    /// not converge within `timeout`.
    pub async fn sync(&self, timeout: Duration) -> HarnessResult<u64> {
        let deadline = self.wait_clock.now() + timeout;
        loop {
            let tips = self.tips().await?;
            if let Some(first) = tips.first() {
                if tips.iter().all(|t| t.hash == first.hash) {
                    debug!("{} nodes agree on height {}", tips.len(), first.height);
                    return Ok(first.height);
                }
            } else {
                return Ok(0);
            }

            if self.wait_clock.now() >= deadline {
                warn!("Nodes did not converge within {:?}", timeout);
                return Err(HarnessError::SyncTimeout {
                    timeout,
                    observed: tips,
                });
            }
            self.wait_clock.sleep(self.poll_interval).await;
        }
    }

    /// Stop every running node
    ///
    /// All nodes are attempted; the first failure is returned.
    pub async fn shutdown(&mut self) -> HarnessResult<()> {
        let running: Vec<usize> = self
            .nodes
            .iter()
            .filter(|n| n.is_running())
            .map(|n| n.index)
            .collect();

        let mut first_error = None;
        for index in running {
            if let Err(e) = self.stop(index).await {
                warn!("Failed to stop node {}: {}", index, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
