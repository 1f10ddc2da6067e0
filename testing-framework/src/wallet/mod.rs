// File: testing-framework/src/wallet/mod.rs
//
// Wallet Backups
//
// Export/import of text wallet backups and extraction of the birth height
// recorded in the backup header.

use crate::error::{HarnessError, HarnessResult};
use crate::node::backup_path;
use crate::topology::Topology;
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Header line prefix that carries the birth height
pub const BACKUP_HEADER_PREFIX: &str = "# * Best block at time of backup was ";

/// Birth height from backup text
///
/// Only the first line with the exact prefix counts; a malformed number
/// there yields `None`.
///
/// ```rust
/// use wallet_pruning_harness::wallet::parse_birth_height;
///
/// let text = "# Wallet dump\n# * Best block at time of backup was 288 (0f9188f1),\n";
/// assert_eq!(parse_birth_height(text), Some(288));
/// assert_eq!(parse_birth_height("# Wallet dump\n"), None);
/// ```
pub fn parse_birth_height(text: &str) -> Option<u64> {
    let rest = text
        .lines()
        .find_map(|line| line.strip_prefix(BACKUP_HEADER_PREFIX))?;
    rest.split(' ').next()?.parse().ok()
}

/// Read the birth height from the backup at `path`
///
/// # Errors
///
/// `MissingBirthHeight` if the header line is absent or malformed, `Io` if
/// the file cannot be read.
pub async fn birth_height(path: &Path) -> HarnessResult<u64> {
    let text = tokio::fs::read_to_string(path).await?;
    parse_birth_height(&text).ok_or_else(|| HarnessError::MissingBirthHeight {
        path: path.to_path_buf(),
    })
}

/// A backup file and the height it was taken at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletBackup {
    /// Wallet the backup was taken from
    pub wallet: String,
    /// Node that produced the backup
    pub source: usize,
    pub path: PathBuf,
    /// Tip height when the backup was written
    pub birth_height: u64,
}

/// Wallet export/import against nodes of a topology
pub struct WalletSnapshot;

impl WalletSnapshot {
    /// Dump `wallet` on node `index` to `<datadir>/<wallet>.dat`
    pub async fn export(
        topology: &Topology,
        index: usize,
        wallet: &str,
    ) -> HarnessResult<WalletBackup> {
        let path = backup_path(topology.node(index)?.datadir(), wallet);
        Self::export_to(topology, index, wallet, &path).await
    }

    /// Dump `wallet` on node `index` to `path`
    ///
    /// # Errors
    ///
    /// The node's error verbatim (for example when `path` already exists),
    /// or `MissingBirthHeight` if the written file has no usable header.
    pub async fn export_to(
        topology: &Topology,
        index: usize,
        wallet: &str,
        path: &Path,
    ) -> HarnessResult<WalletBackup> {
        let rpc = topology.rpc(index)?;
        rpc.dump_wallet(wallet, path)
            .await
            .map_err(|e| HarnessError::node(index, e))?;

        let birth_height = birth_height(path).await?;
        info!(
            "Exported wallet {} from node {} at birth height {}",
            wallet, index, birth_height
        );
        Ok(WalletBackup {
            wallet: wallet.to_string(),
            source: index,
            path: path.to_path_buf(),
            birth_height,
        })
    }

    /// Load `backup` into `wallet` on node `index`
    ///
    /// Node failures are returned untouched so callers can match the code and
    /// message exactly.
    pub async fn import(
        topology: &Topology,
        index: usize,
        wallet: &str,
        backup: &WalletBackup,
    ) -> HarnessResult<()> {
        let rpc = topology.rpc(index)?;
        debug!(
            "Importing {} (birth {}) into wallet {} on node {}",
            backup.path.display(),
            backup.birth_height,
            wallet,
            index
        );
        rpc.import_wallet(wallet, &backup.path)
            .await
            .map_err(|e| HarnessError::node(index, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainBuilder, PayloadKind};
    use crate::error::{ErrorClass, RPC_WALLET_NOT_FOUND};
    use crate::node::{MockNetwork, MockNodeConfig, NodeSpec};
    use crate::orchestrator::VirtualClock;
    use crate::topology::TopologyBuilder;
    use std::sync::Arc;

    #[test]
    fn test_parse_birth_height_variants() {
        let header = "# Wallet dump created by Bitcoin v0.21\n\
                      # * Created on 2011-02-02T23:16:42Z\n\
                      # * Best block at time of backup was 876 (000abc),\n\
                      #   mined on 2011-02-08T00:06:42Z\n";
        assert_eq!(parse_birth_height(header), Some(876));

        // Malformed number
        assert_eq!(
            parse_birth_height("# * Best block at time of backup was x12 (ab),"),
            None
        );
        // Prefix must match exactly
        assert_eq!(
            parse_birth_height("# * Best block at backup was 12 (ab),"),
            None
        );
        // First matching line wins
        let twice = "# * Best block at time of backup was 5 (a),\n\
                     # * Best block at time of backup was 9 (b),\n";
        assert_eq!(parse_birth_height(twice), Some(5));
    }

    #[tokio::test]
    async fn test_birth_height_missing_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.dat");
        tokio::fs::write(&path, "# Wallet dump\n").await.unwrap();
        assert!(matches!(
            birth_height(&path).await,
            Err(HarnessError::MissingBirthHeight { .. })
        ));
        assert!(matches!(
            birth_height(&dir.path().join("absent.dat")).await,
            Err(HarnessError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_export_is_idempotent_without_chain_change() {
        let clock = Arc::new(VirtualClock::default());
        let mut topology = TopologyBuilder::new()
            .with_node(NodeSpec::archival("miner"))
            .with_launcher(MockNetwork::new(MockNodeConfig::default()))
            .with_virtual_clock(clock.clone())
            .build()
            .unwrap();
        topology.start(0).await.unwrap();
        ChainBuilder::new(clock)
            .mine(&mut topology, 0, 3, PayloadKind::Light)
            .await
            .unwrap();

        topology.rpc(0).unwrap().create_wallet("w", false).await.unwrap();
        let first = WalletSnapshot::export(&topology, 0, "w").await.unwrap();
        let second_path = topology.node(0).unwrap().datadir().join("w-again.dat");
        let second = WalletSnapshot::export_to(&topology, 0, "w", &second_path)
            .await
            .unwrap();

        assert_eq!(first.birth_height, 3);
        assert_eq!(first.birth_height, second.birth_height);
        assert!(first.path.ends_with("w.dat"));

        WalletSnapshot::import(&topology, 0, "w", &first).await.unwrap();
    }

    #[tokio::test]
    async fn test_import_errors_pass_through() {
        let mut topology = TopologyBuilder::new()
            .with_node(NodeSpec::archival("miner"))
            .with_launcher(MockNetwork::new(MockNodeConfig::default()))
            .build()
            .unwrap();
        topology.start(0).await.unwrap();
        topology.rpc(0).unwrap().create_wallet("w", false).await.unwrap();
        let backup = WalletSnapshot::export(&topology, 0, "w").await.unwrap();

        let err = WalletSnapshot::import(&topology, 0, "missing", &backup)
            .await
            .unwrap_err();
        let node_err = err.node_error().unwrap();
        assert_eq!(node_err.code(), Some(RPC_WALLET_NOT_FOUND));
        assert_eq!(node_err.classify(), ErrorClass::Other);
    }
}
