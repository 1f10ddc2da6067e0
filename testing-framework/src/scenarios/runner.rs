//! Scenario driver
//!
//! A linear state machine over [`HarnessContext`]. Each transition is a plain
//! async function; the driver only sequences them and records the outcome.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut runner = ScenarioRunner::new(HarnessContext::new(config, topology, chain));
//! let result = runner.run().await;
//! runner.report().save("./reports").await?;
//! result?;
//! ```

use super::assertions::{
    assert_tip_height, ensure_eq, expect_node_error, expect_success, failure, ExpectedNodeError,
};
use super::report::{observe, ExecutionReport};
use super::{ScenarioConfig, ScenarioState};
use crate::chain::{ChainBuilder, PayloadKind};
use crate::error::{
    pruned_import_message, ErrorClass, HarnessError, HarnessResult, PRUNED_BLOCK_MESSAGE,
    RPC_MISC_ERROR, RPC_WALLET_ERROR,
};
use crate::topology::Topology;
use crate::wallet::{WalletBackup, WalletSnapshot};
use log::{error, warn};

/// Everything a scenario step works on
pub struct HarnessContext {
    pub config: ScenarioConfig,
    pub topology: Topology,
    pub chain: ChainBuilder,
    pub report: ExecutionReport,
    state: ScenarioState,
    early_backup: Option<WalletBackup>,
    tip_backup: Option<WalletBackup>,
    subject_horizon: Option<u64>,
}

impl HarnessContext {
    pub fn new(config: ScenarioConfig, topology: Topology, chain: ChainBuilder) -> Self {
        let report = ExecutionReport::new(config.name.clone());
        Self {
            config,
            topology,
            chain,
            report,
            state: ScenarioState::Init,
            early_backup: None,
            tip_backup: None,
            subject_horizon: None,
        }
    }

    /// Last state reached
    pub fn state(&self) -> ScenarioState {
        self.state
    }

    /// Backup taken right after the light blocks
    pub fn early_backup(&self) -> Option<&WalletBackup> {
        self.early_backup.as_ref()
    }

    /// Backup taken near the tip
    pub fn tip_backup(&self) -> Option<&WalletBackup> {
        self.tip_backup.as_ref()
    }

    /// Subject prune horizon observed once it synced
    pub fn subject_horizon(&self) -> Option<u64> {
        self.subject_horizon
    }

    async fn enter(&mut self, state: ScenarioState) {
        self.state = state;
        let nodes = observe(&self.topology).await;
        let now = self.topology.clock().now();
        self.report.record_transition(state, now, nodes);
        self.report.log(format!("Reached {state}"));
    }

    fn early(&self, state: ScenarioState) -> HarnessResult<WalletBackup> {
        self.early_backup
            .clone()
            .ok_or_else(|| failure(state, "early backup", "exported", "missing"))
    }
}

/// INIT -> CHAIN_BUILT
///
/// Starts the miner, backs up the early wallet once the light blocks are in,
/// then buries that height under large blocks.
pub async fn build_chain(ctx: &mut HarnessContext) -> HarnessResult<()> {
    const STATE: ScenarioState = ScenarioState::ChainBuilt;
    let miner = ctx.config.miner;

    ctx.topology.start(miner).await?;
    ctx.topology
        .rpc(miner)?
        .create_wallet(&ctx.config.early_wallet, ctx.config.descriptors)
        .await
        .map_err(|e| HarnessError::node(miner, e))?;

    ctx.report.log("Generating a long chain of blocks...");
    ctx.chain
        .mine(
            &mut ctx.topology,
            miner,
            ctx.config.light_blocks,
            PayloadKind::Light,
        )
        .await?;

    let early = WalletSnapshot::export(&ctx.topology, miner, &ctx.config.early_wallet).await?;
    ensure_eq(
        STATE,
        "early backup birth height",
        ctx.config.light_blocks as u64,
        early.birth_height,
    )?;
    ctx.report.record_backup(&early);
    ctx.early_backup = Some(early);

    ctx.chain
        .mine(
            &mut ctx.topology,
            miner,
            ctx.config.large_blocks,
            PayloadKind::Large,
        )
        .await?;
    assert_tip_height(&ctx.topology, STATE, miner, ctx.config.built_height()).await
}

/// CHAIN_BUILT -> SUBJECT_SYNCED
///
/// Brings the subject up late so it receives the whole backlog at once, and
/// checks that pruning already discarded the early backup's birth block.
pub async fn sync_subject(ctx: &mut HarnessContext) -> HarnessResult<()> {
    const STATE: ScenarioState = ScenarioState::SubjectSynced;
    let (miner, subject) = (ctx.config.miner, ctx.config.subject);
    let early = ctx.early(STATE)?;

    ctx.topology.start(subject).await?;
    ctx.topology.connect(subject, miner).await?;
    let height = ctx.topology.sync(ctx.config.sync_timeout).await?;
    ensure_eq(STATE, "synced height", ctx.config.built_height(), height)?;
    assert_tip_height(&ctx.topology, STATE, subject, ctx.config.built_height()).await?;

    let rpc = ctx.topology.rpc(subject)?;
    rpc.create_wallet(&ctx.config.import_wallet, ctx.config.descriptors)
        .await
        .map_err(|e| HarnessError::node(subject, e))?;

    let info = rpc
        .get_chain_info()
        .await
        .map_err(|e| HarnessError::node(subject, e))?;
    if !info.pruned {
        return Err(failure(STATE, "subject pruning mode", "pruned", "not pruned"));
    }
    let horizon = info
        .prune_height
        .ok_or_else(|| failure(STATE, "subject prune height", "reported", "absent"))?;
    if horizon <= early.birth_height {
        return Err(failure(
            STATE,
            "subject prune horizon above early backup birth height",
            format!("> {}", early.birth_height),
            horizon,
        ));
    }

    ctx.subject_horizon = Some(horizon);
    ctx.report.log(format!(
        "Subject synced at height {height} with prune horizon {horizon}"
    ));
    Ok(())
}

/// SUBJECT_SYNCED -> IMPORT_WHILE_RETAINED_VERIFIED
///
/// A backup taken near the tip imports on the pruned subject, and still
/// imports after more blocks arrive.
pub async fn import_while_retained(ctx: &mut HarnessContext) -> HarnessResult<()> {
    const STATE: ScenarioState = ScenarioState::ImportWhileRetainedVerified;
    let (miner, subject) = (ctx.config.miner, ctx.config.subject);

    ctx.report.log(
        "Make sure we can import wallet when pruned and required blocks are still available",
    );
    ctx.topology
        .rpc(miner)?
        .create_wallet(&ctx.config.tip_wallet, ctx.config.descriptors)
        .await
        .map_err(|e| HarnessError::node(miner, e))?;
    let backup = WalletSnapshot::export(&ctx.topology, miner, &ctx.config.tip_wallet).await?;
    ctx.report.record_backup(&backup);

    let import_wallet = ctx.config.import_wallet.clone();
    expect_success(
        STATE,
        "import of near-tip backup",
        WalletSnapshot::import(&ctx.topology, subject, &import_wallet, &backup).await,
    )?;

    ctx.chain
        .mine(
            &mut ctx.topology,
            miner,
            ctx.config.extra_blocks,
            PayloadKind::Large,
        )
        .await?;
    let height = ctx.topology.sync(ctx.config.sync_timeout).await?;
    ensure_eq(STATE, "synced height", ctx.config.final_height(), height)?;

    expect_success(
        STATE,
        "second import of near-tip backup",
        WalletSnapshot::import(&ctx.topology, subject, &import_wallet, &backup).await,
    )?;

    ctx.report.log("Wallet successfully imported on pruned node");
    ctx.tip_backup = Some(backup);
    Ok(())
}

/// IMPORT_WHILE_RETAINED_VERIFIED -> IMPORT_WHILE_PRUNED_VERIFIED
///
/// The early backup's birth block is gone on the subject: reading it and
/// importing the backup must both fail with the node's exact messages.
pub async fn import_while_pruned(ctx: &mut HarnessContext) -> HarnessResult<()> {
    const STATE: ScenarioState = ScenarioState::ImportWhilePrunedVerified;
    let subject = ctx.config.subject;
    let early = ctx.early(STATE)?;

    ctx.report.log(
        "Make sure we cannot import wallet when pruned and required blocks are not available",
    );
    let rpc = ctx.topology.rpc(subject)?;
    let hash = rpc
        .get_block_hash(early.birth_height)
        .await
        .map_err(|e| HarnessError::node(subject, e))?;

    let read = rpc
        .get_block(&hash)
        .await
        .map_err(|e| HarnessError::node(subject, e));
    expect_node_error(
        STATE,
        "read of early birth block",
        read,
        &ExpectedNodeError {
            code: RPC_MISC_ERROR,
            message: PRUNED_BLOCK_MESSAGE,
            class: ErrorClass::DataUnavailable,
        },
    )?;

    let message = pruned_import_message(early.birth_height);
    let import_wallet = ctx.config.import_wallet.clone();
    let import = WalletSnapshot::import(&ctx.topology, subject, &import_wallet, &early).await;
    expect_node_error(
        STATE,
        "import of early backup",
        import,
        &ExpectedNodeError {
            code: RPC_WALLET_ERROR,
            message: &message,
            class: ErrorClass::InsufficientHistory {
                required_height: early.birth_height,
            },
        },
    )
}

/// Drives a [`HarnessContext`] through every state
pub struct ScenarioRunner {
    ctx: HarnessContext,
}

impl ScenarioRunner {
    pub fn new(ctx: HarnessContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &HarnessContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut HarnessContext {
        &mut self.ctx
    }

    pub fn report(&self) -> &ExecutionReport {
        &self.ctx.report
    }

    pub fn into_context(self) -> HarnessContext {
        self.ctx
    }

    /// Perform the next transition
    ///
    /// Returns the state reached, or `None` if the run was already done.
    /// A failure is recorded in the report before it is returned.
    pub async fn step(&mut self) -> HarnessResult<Option<ScenarioState>> {
        if self.ctx.report.transitions.is_empty() {
            self.ctx.enter(ScenarioState::Init).await;
        }
        let Some(next) = self.ctx.state.next() else {
            return Ok(None);
        };

        let result = match next {
            ScenarioState::ChainBuilt => build_chain(&mut self.ctx).await,
            ScenarioState::SubjectSynced => sync_subject(&mut self.ctx).await,
            ScenarioState::ImportWhileRetainedVerified => import_while_retained(&mut self.ctx).await,
            ScenarioState::ImportWhilePrunedVerified => import_while_pruned(&mut self.ctx).await,
            ScenarioState::Init | ScenarioState::Done => Ok(()),
        };

        if let Err(e) = result {
            error!("Scenario failed while entering {}: {}", next, e);
            self.ctx.report.record_failure(Some(next), &e);
            return Err(e);
        }
        self.ctx.enter(next).await;
        Ok(Some(next))
    }

    /// Step until a state `target` is reached
    pub async fn run_until(&mut self, target: ScenarioState) -> HarnessResult<()> {
        while self.ctx.state != target {
            if self.step().await?.is_none() {
                break;
            }
        }
        Ok(())
    }

    /// Run every remaining transition, then stop all nodes
    ///
    /// Nodes are stopped on failure too. A shutdown failure is only reported
    /// when the scenario itself succeeded.
    pub async fn run(&mut self) -> HarnessResult<()> {
        let result = self.run_until(ScenarioState::Done).await;
        if result.is_ok() {
            self.ctx.report.record_success();
        }

        if let Err(e) = self.ctx.topology.shutdown().await {
            warn!("Shutdown after scenario failed: {}", e);
            if result.is_ok() {
                self.ctx.report.record_failure(None, &e);
                return Err(e);
            }
        }
        result
    }
}
