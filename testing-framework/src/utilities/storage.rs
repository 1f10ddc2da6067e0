// File: testing-framework/src/utilities/storage.rs
//
// Storage Utilities
//
// RAII-managed root directory holding one data directory per node. The root
// is removed on drop unless the caller asked to keep it for inspection.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Prefix of every harness data root
pub const DATA_ROOT_PREFIX: &str = "wallet_pruning_";

/// RAII wrapper for the per-run data root.
///
/// # Example
///
/// ```rust
/// use wallet_pruning_harness::utilities::TempDataDir;
///
/// let root = TempDataDir::new(None, false).unwrap();
/// let node0 = root.node_dir(0);
/// assert!(node0.starts_with(root.path()));
/// // root is deleted here (Drop)
/// ```
///
/// # Cleanup Behavior
///
/// The directory is deleted when the `TempDataDir` is dropped, including on
/// panic, unless it was created with `keep = true`. Cleanup cannot happen if
/// the process is killed with SIGKILL.
pub struct TempDataDir {
    /// Temporary directory handle (manages cleanup)
    _temp_dir: TempDir,
    path: PathBuf,
    kept: bool,
}

impl TempDataDir {
    /// Create a new data root, under `parent` or the system temp directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, typically due to
    /// missing permissions or a full disk.
    pub fn new(parent: Option<&Path>, keep: bool) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(DATA_ROOT_PREFIX).keep(keep);
        let temp_dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };

        let path = temp_dir.path().to_path_buf();
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("Created data root at: {:?} (keep: {})", path, keep);
        }

        Ok(Self {
            _temp_dir: temp_dir,
            path,
            kept: keep,
        })
    }

    /// Root path, valid until drop
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data directory of node `index`
    pub fn node_dir(&self, index: usize) -> PathBuf {
        self.path.join(format!("node{index}"))
    }

    /// Whether the root survives drop
    pub fn is_kept(&self) -> bool {
        self.kept
    }
}

impl Drop for TempDataDir {
    fn drop(&mut self) {
        if self.kept {
            log::info!("Keeping node data directories at: {:?}", self.path);
        } else if log::log_enabled!(log::Level::Debug) {
            log::debug!("Cleaning up data root at: {:?}", self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_data_root_creation() {
        let root = TempDataDir::new(None, false).unwrap();
        assert!(root.path().is_dir());
        let name = root.path().file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(DATA_ROOT_PREFIX));

        let node_dir = root.node_dir(1);
        fs::create_dir_all(&node_dir).unwrap();
        assert_eq!(node_dir.file_name().unwrap(), "node1");
    }

    #[test]
    fn test_data_root_cleanup() {
        let path;
        {
            let root = TempDataDir::new(None, false).unwrap();
            path = root.path().to_path_buf();
            fs::write(path.join("marker"), b"x").unwrap();
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_kept_data_root_survives() {
        let parent = tempfile::tempdir().unwrap();
        let path;
        {
            let root = TempDataDir::new(Some(parent.path()), true).unwrap();
            assert!(root.is_kept());
            path = root.path().to_path_buf();
        }
        assert!(path.exists());
        assert!(path.starts_with(parent.path()));
    }

    #[test]
    fn test_unique_roots() {
        let a = TempDataDir::new(None, false).unwrap();
        let b = TempDataDir::new(None, false).unwrap();
        assert_ne!(a.path(), b.path());
    }
}
