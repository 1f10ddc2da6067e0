//! Assertion helpers for scenario steps
//!
//! Every helper fails with [`HarnessError::ScenarioAssertion`] carrying the
//! state being worked toward, so the report says exactly where a run broke.

use super::ScenarioState;
use crate::error::{ErrorClass, HarnessError, HarnessResult};
use crate::topology::Topology;
use std::fmt::Display;

/// Build an assertion failure
pub fn failure(
    state: ScenarioState,
    what: impl Into<String>,
    expected: impl Display,
    actual: impl Display,
) -> HarnessError {
    HarnessError::ScenarioAssertion {
        state,
        what: what.into(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

/// Assert that two values are equal
///
/// # Example
///
/// ```rust
/// use wallet_pruning_harness::scenarios::assertions::ensure_eq;
/// use wallet_pruning_harness::scenarios::ScenarioState;
///
/// assert!(ensure_eq(ScenarioState::ChainBuilt, "miner height", 888u64, 888u64).is_ok());
/// assert!(ensure_eq(ScenarioState::ChainBuilt, "miner height", 888u64, 887u64).is_err());
/// ```
pub fn ensure_eq<T: PartialEq + Display>(
    state: ScenarioState,
    what: &str,
    expected: T,
    actual: T,
) -> HarnessResult<()> {
    if expected != actual {
        return Err(failure(state, what, expected, actual));
    }
    Ok(())
}

/// Assert that node `index` is at `expected_height`
///
/// # Errors
///
/// Returns an error if:
/// - the node cannot be queried
/// - the actual height differs
pub async fn assert_tip_height(
    topology: &Topology,
    state: ScenarioState,
    index: usize,
    expected_height: u64,
) -> HarnessResult<()> {
    let actual = topology
        .rpc(index)?
        .get_best_block()
        .await
        .map_err(|e| HarnessError::node(index, e))?
        .height;
    ensure_eq(
        state,
        &format!("tip height of node {index}"),
        expected_height,
        actual,
    )
}

/// Require an operation to succeed
///
/// A node failure becomes an assertion failure quoting the node's answer;
/// harness-level failures pass through unchanged.
pub fn expect_success<T>(
    state: ScenarioState,
    what: &str,
    result: HarnessResult<T>,
) -> HarnessResult<T> {
    match result {
        Ok(value) => Ok(value),
        Err(HarnessError::Node { index, source }) => Err(failure(
            state,
            what,
            "success",
            format!("node {index}: {source}"),
        )),
        Err(e) => Err(e),
    }
}

/// Expected shape of a node failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedNodeError<'a> {
    pub code: i64,
    pub message: &'a str,
    pub class: ErrorClass,
}

/// Require an operation to fail with exactly the given code, message and class
pub fn expect_node_error<T>(
    state: ScenarioState,
    what: &str,
    result: HarnessResult<T>,
    expected: &ExpectedNodeError<'_>,
) -> HarnessResult<()> {
    let expected_text = format!("RPC error {}: {}", expected.code, expected.message);
    let error = match result {
        Ok(_) => return Err(failure(state, what, &expected_text, "success")),
        Err(HarnessError::Node { source, .. }) => source,
        Err(e) => return Err(e),
    };

    if error.code() != Some(expected.code) || error.message() != Some(expected.message) {
        return Err(failure(state, what, &expected_text, &error));
    }
    let class = error.classify();
    if class != expected.class {
        return Err(failure(
            state,
            what,
            format!("{:?}", expected.class),
            format!("{class:?}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NodeError, PRUNED_BLOCK_MESSAGE, RPC_MISC_ERROR};

    const STATE: ScenarioState = ScenarioState::ImportWhilePrunedVerified;

    fn pruned() -> ExpectedNodeError<'static> {
        ExpectedNodeError {
            code: RPC_MISC_ERROR,
            message: PRUNED_BLOCK_MESSAGE,
            class: ErrorClass::DataUnavailable,
        }
    }

    #[test]
    fn test_expect_node_error_matches() {
        let result: HarnessResult<()> = Err(HarnessError::node(
            1,
            NodeError::rpc(RPC_MISC_ERROR, PRUNED_BLOCK_MESSAGE),
        ));
        assert!(expect_node_error(STATE, "getblock", result, &pruned()).is_ok());
    }

    #[test]
    fn test_expect_node_error_rejects_success() {
        let err = expect_node_error(STATE, "getblock", Ok(()), &pruned()).unwrap_err();
        match err {
            HarnessError::ScenarioAssertion { actual, state, .. } => {
                assert_eq!(actual, "success");
                assert_eq!(state, STATE);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_expect_node_error_rejects_paraphrase() {
        let result: HarnessResult<()> = Err(HarnessError::node(
            1,
            NodeError::rpc(RPC_MISC_ERROR, "Block not available"),
        ));
        let err = expect_node_error(STATE, "getblock", result, &pruned()).unwrap_err();
        assert!(err.to_string().contains("Block not available (pruned data)"));
    }

    #[test]
    fn test_expect_success_wraps_node_errors() {
        let result: HarnessResult<()> =
            Err(HarnessError::node(1, NodeError::rpc(-4, "wallet locked")));
        let err = expect_success(STATE, "import", result).unwrap_err();
        assert!(matches!(err, HarnessError::ScenarioAssertion { .. }));
        assert!(err.to_string().contains("wallet locked"));

        let result: HarnessResult<()> = Err(HarnessError::NotRunning(1));
        assert!(matches!(
            expect_success(STATE, "import", result),
            Err(HarnessError::NotRunning(1))
        ));
    }
}
