// File: testing-framework/src/node/process.rs
//
// Launches real node binaries in regtest mode.

use super::client::{RpcClient, RpcCredentials};
use super::{LaunchedNode, NodeLauncher, NodeRpc, NodeSpec};
use crate::error::{NodeError, RPC_IN_WARMUP};
use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::time::{self, Duration, Instant};

/// Settings shared by every node the launcher starts
#[derive(Debug, Clone)]
pub struct ProcessLauncherConfig {
    /// Node executable
    pub binary: PathBuf,
    /// P2P port of node 0; node `i` listens on `p2p_port_base + i`
    pub p2p_port_base: u16,
    /// RPC port of node 0; node `i` answers on `rpc_port_base + i`
    pub rpc_port_base: u16,
    pub credentials: RpcCredentials,
    /// How long a node may take to answer its first request
    pub ready_timeout: Duration,
    /// Delay between readiness probes
    pub ready_poll_interval: Duration,
    /// How long `halt` waits after `stop` before killing the process
    pub stop_grace: Duration,
    pub request_timeout: Duration,
}

impl Default for ProcessLauncherConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("bitcoind"),
            p2p_port_base: 18_444,
            rpc_port_base: 18_543,
            credentials: RpcCredentials::default(),
            ready_timeout: Duration::from_secs(60),
            ready_poll_interval: Duration::from_millis(250),
            stop_grace: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
        }
    }
}

struct RunningProcess {
    child: Child,
    client: Arc<RpcClient>,
}

/// Spawns one node process per index
pub struct ProcessLauncher {
    config: ProcessLauncherConfig,
    processes: Mutex<HashMap<usize, RunningProcess>>,
}

impl ProcessLauncher {
    pub fn new(config: ProcessLauncherConfig) -> Self {
        Self {
            config,
            processes: Mutex::new(HashMap::new()),
        }
    }

    fn port(base: u16, index: usize) -> Result<u16, NodeError> {
        u16::try_from(index)
            .ok()
            .and_then(|i| base.checked_add(i))
            .ok_or_else(|| NodeError::Launch(format!("no port available for node {index}")))
    }

    /// Command line for node `index`
    pub fn arguments(
        &self,
        index: usize,
        spec: &NodeSpec,
        datadir: &Path,
    ) -> Result<Vec<String>, NodeError> {
        let p2p_port = Self::port(self.config.p2p_port_base, index)?;
        let rpc_port = Self::port(self.config.rpc_port_base, index)?;

        let mut args = vec![
            "-regtest".to_string(),
            "-server=1".to_string(),
            "-listen=1".to_string(),
            "-discover=0".to_string(),
            "-dnsseed=0".to_string(),
            "-printtoconsole=0".to_string(),
            format!("-datadir={}", datadir.display()),
            format!("-port={p2p_port}"),
            format!("-rpcport={rpc_port}"),
            format!("-rpcuser={}", self.config.credentials.user),
            format!("-rpcpassword={}", self.config.credentials.password),
        ];
        if let Some(mib) = spec.prune_mib() {
            args.push(format!("-prune={mib}"));
        }
        args.extend(spec.flags.iter().cloned());
        Ok(args)
    }

    async fn wait_ready(&self, index: usize, child: &mut Child, client: &RpcClient) -> Result<(), NodeError> {
        let deadline = Instant::now() + self.config.ready_timeout;
        loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|e| NodeError::Launch(e.to_string()))?
            {
                return Err(NodeError::Launch(format!(
                    "node {index} exited during startup with {status}"
                )));
            }

            match client.get_chain_info().await {
                Ok(info) => {
                    debug!("Node {} ready at height {}", index, info.blocks);
                    return Ok(());
                }
                Err(NodeError::Rpc { code, .. }) if code == RPC_IN_WARMUP => {}
                Err(NodeError::Transport(_)) => {}
                Err(e) => return Err(e),
            }

            if Instant::now() >= deadline {
                return Err(NodeError::Launch(format!(
                    "node {index} not ready after {:?}",
                    self.config.ready_timeout
                )));
            }
            time::sleep(self.config.ready_poll_interval).await;
        }
    }
}

#[async_trait]
impl NodeLauncher for ProcessLauncher {
    async fn launch(
        &self,
        index: usize,
        spec: &NodeSpec,
        datadir: &Path,
    ) -> Result<LaunchedNode, NodeError> {
        tokio::fs::create_dir_all(datadir)
            .await
            .map_err(|e| NodeError::Launch(format!("cannot create {}: {e}", datadir.display())))?;

        let args = self.arguments(index, spec, datadir)?;
        info!(
            "Launching node {} ({}) from {}",
            index,
            spec.name,
            self.config.binary.display()
        );
        debug!("Node {} arguments: {:?}", index, args);

        let mut child = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                NodeError::Launch(format!("cannot spawn {}: {e}", self.config.binary.display()))
            })?;

        let rpc_port = Self::port(self.config.rpc_port_base, index)?;
        let client = Arc::new(RpcClient::new(
            &format!("127.0.0.1:{rpc_port}"),
            self.config.credentials.clone(),
            self.config.request_timeout,
        )?);

        if let Err(e) = self.wait_ready(index, &mut child, &client).await {
            let _ = child.kill().await;
            return Err(e);
        }

        let p2p_port = Self::port(self.config.p2p_port_base, index)?;
        self.processes.lock().insert(
            index,
            RunningProcess {
                child,
                client: client.clone(),
            },
        );

        Ok(LaunchedNode {
            rpc: client as Arc<dyn NodeRpc>,
            p2p_addr: format!("127.0.0.1:{p2p_port}"),
        })
    }

    async fn halt(&self, index: usize) -> Result<(), NodeError> {
        let RunningProcess { mut child, client } = self
            .processes
            .lock()
            .remove(&index)
            .ok_or(NodeError::NotRunning)?;

        if let Err(e) = client.stop().await {
            warn!("Node {} did not accept stop: {}", index, e);
        }

        match time::timeout(self.config.stop_grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Node {} exited with {}", index, status);
                Ok(())
            }
            Ok(Err(e)) => Err(NodeError::Launch(e.to_string())),
            Err(_) => {
                warn!(
                    "Node {} still running {:?} after stop, killing",
                    index, self.config.stop_grace
                );
                child
                    .kill()
                    .await
                    .map_err(|e| NodeError::Launch(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments_include_prune_and_ports() {
        let launcher = ProcessLauncher::new(ProcessLauncherConfig::default());
        let spec = NodeSpec::pruned("subject", 550).with_flag("-fastprune");
        let args = launcher
            .arguments(1, &spec, Path::new("/tmp/node1"))
            .unwrap();

        assert!(args.contains(&"-regtest".to_string()));
        assert!(args.contains(&"-prune=550".to_string()));
        assert!(args.contains(&"-port=18445".to_string()));
        assert!(args.contains(&"-rpcport=18544".to_string()));
        assert!(args.contains(&"-datadir=/tmp/node1".to_string()));
        assert_eq!(args.last(), Some(&"-fastprune".to_string()));
    }

    #[test]
    fn test_archival_node_has_no_prune_flag() {
        let launcher = ProcessLauncher::new(ProcessLauncherConfig::default());
        let args = launcher
            .arguments(0, &NodeSpec::archival("miner"), Path::new("/tmp/node0"))
            .unwrap();
        assert!(!args.iter().any(|a| a.starts_with("-prune")));
    }

    #[test]
    fn test_port_overflow() {
        let config = ProcessLauncherConfig {
            p2p_port_base: u16::MAX,
            ..Default::default()
        };
        let launcher = ProcessLauncher::new(config);
        let result = launcher.arguments(1, &NodeSpec::archival("x"), Path::new("/tmp"));
        assert!(matches!(result, Err(NodeError::Launch(_))));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_launch() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ProcessLauncher::new(ProcessLauncherConfig {
            binary: dir.path().join("no-such-node"),
            ..Default::default()
        });
        let result = launcher
            .launch(0, &NodeSpec::archival("miner"), &dir.path().join("node0"))
            .await;
        assert!(matches!(result, Err(NodeError::Launch(_))));
    }

    #[tokio::test]
    async fn test_halt_unknown_index() {
        let launcher = ProcessLauncher::new(ProcessLauncherConfig::default());
        assert_eq!(launcher.halt(3).await, Err(NodeError::NotRunning));
    }
}
