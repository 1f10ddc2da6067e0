// File: testing-framework/src/node/client.rs
//
// JSON-RPC client for a real node.
//
// Speaks JSON-RPC 1.0 over HTTP with basic auth. The node reports application
// errors with non-2xx statuses (404, 500) and a JSON error body, so the body
// is always parsed before the status is considered.

use super::{BlockSummary, ChainInfo, NodeRpc, SubmitOutcome};
use crate::error::NodeError;
use async_trait::async_trait;
use log::{debug, trace};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Basic-auth credentials for the RPC interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcCredentials {
    pub user: String,
    pub password: String,
}

impl Default for RpcCredentials {
    fn default() -> Self {
        Self {
            user: "harness".to_string(),
            password: "harness".to_string(),
        }
    }
}

/// JSON-RPC request structure
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u32,
    method: &'a str,
    params: Value,
}

/// JSON-RPC response structure
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// JSON-RPC error structure
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct GetBlockResult {
    hash: String,
    height: u64,
    time: u64,
}

#[derive(Debug, Deserialize)]
struct BlockchainInfoResult {
    blocks: u64,
    bestblockhash: String,
    #[serde(default)]
    pruned: bool,
    #[serde(default)]
    pruneheight: Option<u64>,
}

/// JSON-RPC client bound to one node
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use wallet_pruning_harness::node::{NodeRpc, RpcClient, RpcCredentials};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = RpcClient::new("127.0.0.1:18443", RpcCredentials::default(), Duration::from_secs(30))?;
/// let tip = client.get_best_block().await?;
/// println!("tip {} at {}", tip.hash, tip.height);
/// # Ok(())
/// # }
/// ```
pub struct RpcClient {
    client: Client,
    base_url: Url,
    credentials: RpcCredentials,
}

impl RpcClient {
    /// Create a client for the node listening at `address`
    ///
    /// `address` may omit the scheme, in which case `http://` is assumed.
    pub fn new(
        address: &str,
        credentials: RpcCredentials,
        request_timeout: Duration,
    ) -> Result<Self, NodeError> {
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            Url::parse(address)
        } else {
            Url::parse(&format!("http://{address}"))
        }
        .map_err(|e| NodeError::Launch(format!("invalid RPC address '{address}': {e}")))?;

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| NodeError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn wallet_url(&self, wallet: &str) -> Result<Url, NodeError> {
        self.base_url
            .join(&format!("wallet/{wallet}"))
            .map_err(|e| NodeError::invalid("wallet", format!("bad wallet name '{wallet}': {e}")))
    }

    async fn call_at(&self, url: Url, method: &str, params: Value) -> Result<Value, NodeError> {
        let request = JsonRpcRequest {
            jsonrpc: "1.0",
            id: rand::random::<u32>(),
            method,
            params,
        };
        debug!("RPC {} -> {}", method, url);

        let response = self
            .client
            .post(url)
            .basic_auth(&self.credentials.user, Some(&self.credentials.password))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NodeError::Transport(format!("'{method}' timed out"))
                } else if e.is_connect() {
                    NodeError::Transport(format!("connection failed: {e}"))
                } else {
                    NodeError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(NodeError::Transport(
                "RPC credentials rejected (HTTP 401)".to_string(),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))?;
        trace!("RPC {} <- {} {}", method, status, body);

        let parsed: JsonRpcResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => return Err(NodeError::invalid(method, e.to_string())),
            Err(_) => {
                return Err(NodeError::Transport(format!(
                    "HTTP {} without a JSON-RPC body",
                    status.as_u16()
                )))
            }
        };

        if let Some(error) = parsed.error {
            return Err(NodeError::rpc(error.code, error.message));
        }
        if !status.is_success() {
            return Err(NodeError::Transport(format!("HTTP {}", status.as_u16())));
        }
        Ok(parsed.result)
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, NodeError> {
        self.call_at(self.base_url.clone(), method, params).await
    }

    async fn call_wallet(&self, wallet: &str, method: &str, params: Value) -> Result<Value, NodeError> {
        let url = self.wallet_url(wallet)?;
        self.call_at(url, method, params).await
    }

    /// Ask the node to shut down
    pub async fn stop(&self) -> Result<(), NodeError> {
        self.call("stop", json!([])).await.map(|_| ())
    }
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, NodeError> {
    serde_json::from_value(value).map_err(|e| NodeError::invalid(method, e.to_string()))
}

fn path_param(method: &str, path: &Path) -> Result<String, NodeError> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| NodeError::invalid(method, format!("non UTF-8 path {}", path.display())))
}

#[async_trait]
impl NodeRpc for RpcClient {
    async fn get_best_block(&self) -> Result<BlockSummary, NodeError> {
        let hash: String = decode("getbestblockhash", self.call("getbestblockhash", json!([])).await?)?;
        self.get_block(&hash).await
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, NodeError> {
        decode("getblockhash", self.call("getblockhash", json!([height])).await?)
    }

    async fn get_block(&self, hash: &str) -> Result<BlockSummary, NodeError> {
        let block: GetBlockResult = decode("getblock", self.call("getblock", json!([hash, 1])).await?)?;
        Ok(BlockSummary {
            height: block.height,
            hash: block.hash,
            time: block.time,
        })
    }

    async fn submit_block(&self, block_hex: &str) -> Result<SubmitOutcome, NodeError> {
        match self.call("submitblock", json!([block_hex])).await? {
            Value::Null => Ok(SubmitOutcome::Accepted),
            Value::String(reason) => Ok(SubmitOutcome::Rejected(reason)),
            other => Err(NodeError::invalid(
                "submitblock",
                format!("unexpected result {other}"),
            )),
        }
    }

    async fn set_mock_time(&self, time: u64) -> Result<(), NodeError> {
        self.call("setmocktime", json!([time])).await.map(|_| ())
    }

    async fn get_chain_info(&self) -> Result<ChainInfo, NodeError> {
        let info: BlockchainInfoResult =
            decode("getblockchaininfo", self.call("getblockchaininfo", json!([])).await?)?;
        Ok(ChainInfo {
            blocks: info.blocks,
            best_hash: info.bestblockhash,
            pruned: info.pruned,
            prune_height: if info.pruned { info.pruneheight } else { None },
        })
    }

    async fn add_peer(&self, addr: &str) -> Result<(), NodeError> {
        self.call("addnode", json!([addr, "onetry"])).await.map(|_| ())
    }

    async fn create_wallet(&self, name: &str, descriptors: bool) -> Result<(), NodeError> {
        // name, disable_private_keys, blank, passphrase, avoid_reuse, descriptors
        self.call("createwallet", json!([name, false, false, "", false, descriptors]))
            .await
            .map(|_| ())
    }

    async fn dump_wallet(&self, wallet: &str, path: &Path) -> Result<(), NodeError> {
        let path = path_param("dumpwallet", path)?;
        self.call_wallet(wallet, "dumpwallet", json!([path])).await.map(|_| ())
    }

    async fn import_wallet(&self, wallet: &str, path: &Path) -> Result<(), NodeError> {
        let path = path_param("importwallet", path)?;
        self.call_wallet(wallet, "importwallet", json!([path])).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_without_scheme() {
        let client = RpcClient::new(
            "127.0.0.1:18443",
            RpcCredentials::default(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.base_url().as_str(), "http://127.0.0.1:18443/");
        assert_eq!(
            client.wallet_url("w1").unwrap().as_str(),
            "http://127.0.0.1:18443/wallet/w1"
        );
    }

    #[test]
    fn test_invalid_address() {
        let result = RpcClient::new("http://[::1", RpcCredentials::default(), Duration::from_secs(5));
        assert!(matches!(result, Err(NodeError::Launch(_))));
    }

    #[test]
    fn test_error_body_parsing() {
        let body = r#"{"result":null,"error":{"code":-1,"message":"Block not available (pruned data)"},"id":7}"#;
        let parsed: JsonRpcResponse = serde_json::from_str(body).unwrap();
        let error = parsed.error.unwrap();
        assert_eq!(error.code, -1);
        assert_eq!(error.message, "Block not available (pruned data)");

        let body = r#"{"result":"duplicate","error":null,"id":8}"#;
        let parsed: JsonRpcResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.error.is_none());
        assert_eq!(parsed.result, Value::String("duplicate".to_string()));
    }

    #[test]
    fn test_chain_info_without_prune_height() {
        let value = json!({"blocks": 10, "bestblockhash": "ab", "pruned": false, "chain": "regtest"});
        let info: BlockchainInfoResult = decode("getblockchaininfo", value).unwrap();
        assert_eq!(info.blocks, 10);
        assert!(!info.pruned);
        assert_eq!(info.pruneheight, None);
    }

    #[test]
    fn test_decode_reports_method() {
        let err = decode::<GetBlockResult>("getblock", json!({"hash": 1})).unwrap_err();
        match err {
            NodeError::InvalidResponse { method, .. } => assert_eq!(method, "getblock"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
