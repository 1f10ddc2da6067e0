//! # Wallet Pruning Harness
//!
//! Scenario harness that checks how a node's wallet import behaves once the
//! node has pruned the block history the import would need to rescan.
//!
//! ## Architecture Overview
//!
//! - **chain**: regtest block construction and proof-of-work solving
//! - **node**: the `NodeRpc` capability, a JSON-RPC client and process
//!   launcher for a real node binary, and an in-process mock network
//! - **topology**: node lifecycle, peer wiring and height synchronization
//! - **wallet**: backup export and import, birth height extraction
//! - **scenarios**: the state machine driving the run, assertions and reports
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wallet_pruning_harness::prelude::*;
//!
//! #[tokio::test]
//! async fn test_wallet_pruning() {
//!     let config = HarnessConfig::default();
//!     let clock = Arc::new(VirtualClock::new(config.chain.start_time));
//!     let topology = config
//!         .topology_builder(MockNetwork::new(config.mock.clone()), clock.clone())
//!         .build()
//!         .unwrap();
//!     let ctx = HarnessContext::new(config.scenario(), topology, config.chain_builder(clock));
//!     ScenarioRunner::new(ctx).run().await.unwrap();
//! }
//! ```
//!
//! ## Design Principles
//!
//! 1. **One clock**: every block timestamp and every node's mock time come
//!    from a single virtual clock that never moves backwards
//! 2. **Exact failures**: node errors are compared by code and message
//! 3. **Fail fast**: the first failed check ends the run, nodes are always
//!    stopped

#![warn(clippy::all)]

/// Regtest block construction
pub mod chain;

/// YAML configuration
pub mod config;

/// Harness and node error types
pub mod error;

/// Node capability interface and implementations
pub mod node;

/// Time control
pub mod orchestrator;

// Convenient re-exports for common usage
pub mod prelude;

/// Wallet import scenarios against a pruning node
pub mod scenarios;

/// Node set, lifecycle and synchronization
pub mod topology;

/// Shared utilities
pub mod utilities;

/// Wallet backup handling
pub mod wallet;

// Re-export commonly used types at crate root
pub use config::HarnessConfig;
pub use error::{HarnessError, HarnessResult, NodeError};
pub use orchestrator::{Clock, SystemClock, VirtualClock};
pub use scenarios::{HarnessContext, ScenarioRunner, ScenarioState};

/// Harness version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
