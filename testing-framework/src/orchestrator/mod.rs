// File: testing-framework/src/orchestrator/mod.rs
//
// Orchestrator Module
//
// Time control for the harness: the wall clock used for bounded waits and
// the virtual chain clock broadcast to nodes.

/// Clock abstractions for deterministic time control
pub mod clock;

pub use clock::{Clock, PausedClock, SystemClock, VirtualClock, VirtualTime};
