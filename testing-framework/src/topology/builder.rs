//! TopologyBuilder - Fluent API for assembling a node topology

use super::{NodeHandle, Topology};
use crate::error::{HarnessError, HarnessResult};
use crate::node::{NodeLauncher, NodeSpec};
use crate::orchestrator::{Clock, SystemClock, VirtualClock};
use crate::utilities::TempDataDir;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;

/// Default delay between sync polling rounds
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Builder for [`Topology`] instances with fluent API
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use wallet_pruning_harness::node::{MockNetwork, MockNodeConfig, NodeSpec};
/// use wallet_pruning_harness::orchestrator::VirtualClock;
/// use wallet_pruning_harness::topology::TopologyBuilder;
///
/// let topology = TopologyBuilder::new()
///     .with_node(NodeSpec::archival("miner"))
///     .with_node(NodeSpec::pruned("subject", 550))
///     .with_launcher(MockNetwork::new(MockNodeConfig::default()))
///     .with_virtual_clock(Arc::new(VirtualClock::new(1_296_688_602)))
///     .build()
///     .unwrap();
/// assert_eq!(topology.len(), 2);
/// ```
pub struct TopologyBuilder {
    specs: Vec<NodeSpec>,
    launcher: Option<Arc<dyn NodeLauncher>>,
    clock: Option<Arc<VirtualClock>>,
    wait_clock: Option<Arc<dyn Clock>>,
    poll_interval: Duration,
    data_root: Option<PathBuf>,
    keep_datadirs: bool,
}

impl TopologyBuilder {
    /// Create new builder with defaults
    ///
    /// Default configuration:
    /// - no nodes
    /// - `SystemClock` for waits, polling every 250ms
    /// - a fresh virtual clock that was never set
    /// - data directories under the system temp dir, removed on drop
    pub fn new() -> Self {
        Self {
            specs: Vec::new(),
            launcher: None,
            clock: None,
            wait_clock: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            data_root: None,
            keep_datadirs: false,
        }
    }

    /// Add a node; indexes follow insertion order
    pub fn with_node(mut self, spec: NodeSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Add several nodes
    pub fn with_nodes(mut self, specs: impl IntoIterator<Item = NodeSpec>) -> Self {
        self.specs.extend(specs);
        self
    }

    /// Set the launcher used by `start`/`stop`. Required.
    pub fn with_launcher(mut self, launcher: Arc<dyn NodeLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Share a virtual clock with the rest of the harness
    pub fn with_virtual_clock(mut self, clock: Arc<VirtualClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the clock `sync` waits on
    ///
    /// If not set, uses `SystemClock` by default.
    pub fn with_wait_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.wait_clock = Some(clock);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Create data directories under `root` instead of the system temp dir
    pub fn with_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.data_root = Some(root.into());
        self
    }

    /// Keep data directories after the topology is dropped
    pub fn keep_datadirs(mut self, keep: bool) -> Self {
        self.keep_datadirs = keep;
        self
    }

    /// Build the topology. Nothing is started.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - no launcher was set, or no node was added
    /// - the data root cannot be created
    pub fn build(self) -> HarnessResult<Topology> {
        let launcher = self
            .launcher
            .ok_or_else(|| HarnessError::Config("topology needs a node launcher".to_string()))?;
        if self.specs.is_empty() {
            return Err(HarnessError::Config(
                "topology needs at least one node".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(HarnessError::Config(
                "poll interval must be positive".to_string(),
            ));
        }

        let root = TempDataDir::new(self.data_root.as_deref(), self.keep_datadirs)?;
        let nodes = self
            .specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| NodeHandle::new(index, spec, root.node_dir(index)))
            .collect();

        Ok(Topology {
            nodes,
            launcher,
            clock: self.clock.unwrap_or_default(),
            wait_clock: self.wait_clock.unwrap_or_else(|| Arc::new(SystemClock)),
            poll_interval: self.poll_interval,
            root,
        })
    }
}

impl Default for TopologyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
