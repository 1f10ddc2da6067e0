// File: testing-framework/src/orchestrator/clock.rs
//
// Clock Abstractions
//
// Two kinds of time flow through the harness:
// - wall-clock time used for bounded waits (Clock / SystemClock / PausedClock)
// - simulated chain time pushed to every node (VirtualClock)

use crate::error::HarnessResult;
use crate::topology::NodeHandle;
use log::debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::{self, Duration, Instant};

/// Simulated wall-clock time in seconds, as handed to nodes
pub type VirtualTime = u64;

/// Wall-clock abstraction used for polling and timeouts
///
/// Harness code never calls `tokio::time` directly when it waits; it goes
/// through this trait so tests can run with paused time.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use tokio::time::Duration;
/// use wallet_pruning_harness::orchestrator::clock::{Clock, PausedClock};
///
/// #[tokio::test]
/// async fn test_with_paused_time() {
///     let clock = Arc::new(PausedClock::new());
///     let start = clock.now();
///     clock.advance(Duration::from_secs(120)).await;
///     assert_eq!(clock.now() - start, Duration::from_secs(120));
/// }
/// ```
pub trait Clock: Send + Sync {
    /// Returns the current instant
    fn now(&self) -> Instant;

    /// Sleeps for the specified duration
    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Real tokio time
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        time::Instant::now()
    }

    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(time::sleep(d))
    }
}

/// Paused tokio time
///
/// Time only moves through `advance()`, or automatically while the runtime
/// has nothing else to do. Sync polling against mock nodes therefore
/// completes without any real delay.
///
/// # Important Notes
///
/// 1. Must run inside a current-thread runtime (the `#[tokio::test]` default)
/// 2. Do not combine with `start_paused = true`: `new()` pauses time itself
pub struct PausedClock;

impl PausedClock {
    /// Creates a new PausedClock and pauses tokio time
    pub fn new() -> Self {
        time::pause();
        Self
    }

    /// Manually advance time by the specified duration
    pub async fn advance(&self, d: Duration) {
        time::advance(d).await
    }
}

impl Clock for PausedClock {
    fn now(&self) -> Instant {
        time::Instant::now()
    }

    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(time::sleep(d))
    }
}

impl Default for PausedClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Harness-controlled chain time shared by every node
///
/// The harness is the only writer. The value never decreases, and it is
/// pushed to running nodes through [`VirtualClock::broadcast`] so a node
/// never sees a block timestamp beyond its own notion of "now".
///
/// A value of `0` means the clock was never set; it is not broadcast because
/// nodes interpret a mock time of zero as "use the system time".
///
/// # Example
///
/// ```rust
/// use wallet_pruning_harness::orchestrator::VirtualClock;
///
/// let clock = VirtualClock::new(1_296_688_602);
/// clock.advance(600);
/// clock.advance_to(1_296_688_000); // never moves backwards
/// assert_eq!(clock.now(), 1_296_689_202);
/// ```
#[derive(Debug, Default)]
pub struct VirtualClock {
    seconds: AtomicU64,
}

impl VirtualClock {
    /// Create a clock starting at `start`
    pub fn new(start: VirtualTime) -> Self {
        Self {
            seconds: AtomicU64::new(start),
        }
    }

    /// Current virtual time
    pub fn now(&self) -> VirtualTime {
        self.seconds.load(Ordering::SeqCst)
    }

    /// Move the clock forward by `delta` seconds, returning the new value
    pub fn advance(&self, delta: u64) -> VirtualTime {
        let previous = self
            .seconds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                Some(t.saturating_add(delta))
            })
            .unwrap_or_else(|t| t);
        previous.saturating_add(delta)
    }

    /// Raise the clock to at least `t`, returning the resulting value
    pub fn advance_to(&self, t: VirtualTime) -> VirtualTime {
        let previous = self.seconds.fetch_max(t, Ordering::SeqCst);
        previous.max(t)
    }

    /// Push the current value to every running node
    ///
    /// Stopped nodes are skipped without error; they pick the value up when
    /// they are next started. Returns the number of nodes notified.
    pub async fn broadcast<'a, I>(&self, nodes: I) -> HarnessResult<usize>
    where
        I: IntoIterator<Item = &'a mut NodeHandle>,
    {
        let now = self.now();
        if now == 0 {
            return Ok(0);
        }

        let mut notified = 0;
        for node in nodes {
            if !node.is_running() {
                debug!("Virtual time {} deferred for stopped node {}", now, node.index());
                continue;
            }
            node.receive_time(now).await?;
            notified += 1;
        }
        Ok(notified)
    }
}
