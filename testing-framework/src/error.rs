// File: testing-framework/src/error.rs
//
// Error taxonomy for the harness.
//
// Node failures are kept verbatim (code + message) in `NodeError` and only
// classified on demand, so assertions can match the literal text the node
// produced. Harness-level failures live in `HarnessError`.

use crate::scenarios::ScenarioState;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Generic RPC failure (`RPC_MISC_ERROR`), used for pruned block reads
pub const RPC_MISC_ERROR: i64 = -1;
/// Wallet failure (`RPC_WALLET_ERROR`), used for pruned-history imports
pub const RPC_WALLET_ERROR: i64 = -4;
/// Unknown block or address (`RPC_INVALID_ADDRESS_OR_KEY`)
pub const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;
/// Invalid parameter (`RPC_INVALID_PARAMETER`)
pub const RPC_INVALID_PARAMETER: i64 = -8;
/// Wallet not loaded (`RPC_WALLET_NOT_FOUND`)
pub const RPC_WALLET_NOT_FOUND: i64 = -18;
/// Undecodable payload (`RPC_DESERIALIZATION_ERROR`)
pub const RPC_DESERIALIZATION_ERROR: i64 = -22;
/// Node still starting up (`RPC_IN_WARMUP`)
pub const RPC_IN_WARMUP: i64 = -28;

/// Exact message a node returns when block data below its prune horizon is requested
pub const PRUNED_BLOCK_MESSAGE: &str = "Block not available (pruned data)";

const PRUNED_IMPORT_PREFIX: &str = "Pruned blocks from height ";
const PRUNED_IMPORT_SUFFIX: &str =
    " required to import keys. Use RPC call getblockchaininfo to determine your pruned height.";

/// Render the message a node returns when an import needs pruned history
///
/// ```rust
/// use wallet_pruning_harness::error::pruned_import_message;
///
/// assert_eq!(
///     pruned_import_message(876),
///     "Pruned blocks from height 876 required to import keys. \
///      Use RPC call getblockchaininfo to determine your pruned height."
/// );
/// ```
pub fn pruned_import_message(height: u64) -> String {
    format!("{PRUNED_IMPORT_PREFIX}{height}{PRUNED_IMPORT_SUFFIX}")
}

/// Extract the missing-height boundary from a pruned-history import message
pub fn parse_required_height(message: &str) -> Option<u64> {
    let rest = message.strip_prefix(PRUNED_IMPORT_PREFIX)?;
    let digits: &str = rest
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .filter(|d| !d.is_empty())?;
    if !rest[digits.len()..].starts_with(" required to import keys") {
        return None;
    }
    digits.parse().ok()
}

/// Classification of a node failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Requested block data was discarded by pruning
    DataUnavailable,
    /// An import needs history below the prune horizon
    InsufficientHistory {
        /// Lowest height the import needs, as reported by the node
        required_height: u64,
    },
    /// Anything else
    Other,
}

/// Failure reported by (or while talking to) a node
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The node answered with a JSON-RPC error object
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    /// The request never produced a JSON-RPC answer
    #[error("transport error: {0}")]
    Transport(String),
    /// The answer did not have the expected shape
    #[error("invalid response for '{method}': {reason}")]
    InvalidResponse { method: String, reason: String },
    /// The node process is stopped
    #[error("node is not running")]
    NotRunning,
    /// The node process could not be brought up
    #[error("launch failed: {0}")]
    Launch(String),
}

impl NodeError {
    /// Build an RPC error from a code and message
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
        }
    }

    /// Build an invalid-response error
    pub fn invalid(method: &str, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            method: method.to_string(),
            reason: reason.into(),
        }
    }

    /// RPC error code, if the node answered with one
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// RPC error message, if the node answered with one
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Rpc { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Classify the failure by code and literal message
    pub fn classify(&self) -> ErrorClass {
        match self {
            Self::Rpc { code, message }
                if *code == RPC_MISC_ERROR && message == PRUNED_BLOCK_MESSAGE =>
            {
                ErrorClass::DataUnavailable
            }
            Self::Rpc { code, message } if *code == RPC_WALLET_ERROR => {
                match parse_required_height(message) {
                    Some(required_height) => ErrorClass::InsufficientHistory { required_height },
                    None => ErrorClass::Other,
                }
            }
            _ => ErrorClass::Other,
        }
    }
}

/// Last tip observed on a node while waiting for synchronization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedTip {
    /// Node index in the topology
    pub index: usize,
    /// Best block height
    pub height: u64,
    /// Best block hash (display order)
    pub hash: String,
}

fn format_tips(tips: &[ObservedTip]) -> String {
    tips.iter()
        .map(|t| format!("node{}={}@{}", t.index, t.height, t.hash))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Harness failure
#[derive(Error, Debug)]
pub enum HarnessError {
    /// An expected condition did not hold
    #[error("assertion failed in {state}: {what} (expected: {expected}, actual: {actual})")]
    ScenarioAssertion {
        state: ScenarioState,
        what: String,
        expected: String,
        actual: String,
    },
    /// Running nodes did not agree on a tip in time
    #[error("nodes did not converge within {timeout:?}: [{}]", format_tips(.observed))]
    SyncTimeout {
        timeout: Duration,
        observed: Vec<ObservedTip>,
    },
    /// A node request failed
    #[error("node {index}: {source}")]
    Node {
        index: usize,
        #[source]
        source: NodeError,
    },
    /// A submitted block was refused
    #[error("node {index} rejected block at height {height}: {reason}")]
    BlockRejected {
        index: usize,
        height: u64,
        reason: String,
    },
    #[error("node {0} is already running")]
    AlreadyRunning(usize),
    #[error("node {0} is not running")]
    NotRunning(usize),
    #[error("no node with index {0}")]
    UnknownNode(usize),
    /// The backup has no parsable birth height header
    #[error("backup {} has no valid birth height header", .path.display())]
    MissingBirthHeight { path: PathBuf },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Wrap a node error with the index of the node that produced it
    pub fn node(index: usize, source: NodeError) -> Self {
        Self::Node { index, source }
    }

    /// Underlying node error, if any
    pub fn node_error(&self) -> Option<&NodeError> {
        match self {
            Self::Node { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result alias for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pruned_block_classification() {
        let err = NodeError::rpc(RPC_MISC_ERROR, PRUNED_BLOCK_MESSAGE);
        assert_eq!(err.classify(), ErrorClass::DataUnavailable);

        // Same text, different code is not the pruned classification
        let err = NodeError::rpc(RPC_WALLET_ERROR, PRUNED_BLOCK_MESSAGE);
        assert_eq!(err.classify(), ErrorClass::Other);

        // Paraphrased text is not accepted
        let err = NodeError::rpc(RPC_MISC_ERROR, "Block not available (pruned)");
        assert_eq!(err.classify(), ErrorClass::Other);
    }

    #[test]
    fn test_insufficient_history_classification() {
        let err = NodeError::rpc(RPC_WALLET_ERROR, pruned_import_message(876));
        assert_eq!(
            err.classify(),
            ErrorClass::InsufficientHistory {
                required_height: 876
            }
        );
    }

    #[test]
    fn test_parse_required_height() {
        assert_eq!(parse_required_height(&pruned_import_message(0)), Some(0));
        assert_eq!(
            parse_required_height(&pruned_import_message(123_456)),
            Some(123_456)
        );
        assert_eq!(parse_required_height("Pruned blocks from height x"), None);
        assert_eq!(parse_required_height("Pruned blocks from height 5"), None);
        assert_eq!(parse_required_height("Error: wallet locked"), None);
    }

    #[test]
    fn test_transport_errors_have_no_code() {
        let err = NodeError::Transport("connection refused".to_string());
        assert_eq!(err.code(), None);
        assert_eq!(err.message(), None);
        assert_eq!(err.classify(), ErrorClass::Other);
    }

    #[test]
    fn test_sync_timeout_display_lists_tips() {
        let err = HarnessError::SyncTimeout {
            timeout: Duration::from_secs(120),
            observed: vec![
                ObservedTip {
                    index: 0,
                    height: 888,
                    hash: "aa".to_string(),
                },
                ObservedTip {
                    index: 1,
                    height: 300,
                    hash: "bb".to_string(),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("node0=888@aa"));
        assert!(text.contains("node1=300@bb"));
    }
}
