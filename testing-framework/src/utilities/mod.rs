// File: testing-framework/src/utilities/mod.rs
//
// Utilities
//
// Helpers shared by the topology and the tests.

/// Per-run data directories
pub mod storage;

pub use storage::{TempDataDir, DATA_ROOT_PREFIX};
