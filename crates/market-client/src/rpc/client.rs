//! JSON-RPC client for an Ethereum node or wallet endpoint
//!
//! # Methods
//! - `eth_call` - contract reads (latest block, or replay at a block)
//! - `eth_chainId` / `eth_accounts` / `eth_requestAccounts` - session discovery
//! - `eth_sendTransaction` - wallet-signed writes
//! - `eth_getTransactionReceipt` - confirmation polling

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy_primitives::{Address, Bytes, TxHash, U256, U64};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use super::abi::decode_revert;

/// EIP-1193 "user rejected request"
const USER_REJECTED_CODE: i64 = 4001;

#[derive(Error, Debug, Clone)]
pub enum RpcError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("json-rpc error {code}: {message}")]
    Rpc { code: i64, message: String, data: Option<Value> },

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl RpcError {
    /// Raw revert payload attached to the error, if the node supplied one.
    /// Some nodes nest it as `{"data": {"data": "0x..."}}`.
    pub fn revert_data(&self) -> Option<Bytes> {
        let RpcError::Rpc { data: Some(data), .. } = self else {
            return None;
        };
        let hex = match data {
            Value::String(s) => s.as_str(),
            Value::Object(map) => map.get("data")?.as_str()?,
            _ => return None,
        };
        hex.parse::<Bytes>().ok()
    }

    /// Best available explanation of a revert: decoded reason, else the node's message
    pub fn revert_reason(&self) -> String {
        if let Some(reason) = self.revert_data().and_then(|d| decode_revert(&d)) {
            return reason;
        }
        match self {
            RpcError::Rpc { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Node or wallet refused the call itself (revert, rejection), as opposed to transport
    pub fn is_rejection(&self) -> bool {
        matches!(self, RpcError::Rpc { .. })
    }

    pub fn is_user_rejection(&self) -> bool {
        matches!(self, RpcError::Rpc { code, .. } if *code == USER_REJECTED_CODE)
    }
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Transaction handed to the wallet for signing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
}

impl TransactionRequest {
    pub fn new(from: Address, to: Address, data: impl Into<Bytes>) -> Self {
        Self { from, to, data: data.into(), value: None }
    }
}

/// Subset of `eth_getTransactionReceipt` the client relies on
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: TxHash,
    #[serde(default)]
    pub block_number: Option<U64>,
    /// 1 = success, 0 = reverted (absent on pre-Byzantium chains)
    #[serde(default)]
    pub status: Option<U64>,
}

impl TransactionReceipt {
    pub fn succeeded(&self) -> bool {
        self.status.map(|s| s == U64::from(1u64)).unwrap_or(true)
    }
}

/// JSON-RPC 2.0 client over HTTP
#[derive(Clone)]
pub struct RpcClient {
    client: Client,
    url: String,
    next_id: Arc<AtomicU64>,
}

impl RpcClient {
    pub fn new(url: &str) -> Result<Self, RpcError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| RpcError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, url: url.trim_end_matches('/').to_string(), next_id: Arc::new(AtomicU64::new(1)) })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one request and decode its `result`
    pub async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        debug!("RPC {} #{} -> {}", method, id, self.url);

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::Transport(format!("{} request failed: {}", method, e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RpcError::Transport(format!("{} body unreadable: {}", method, e)))?;

        // Nodes disagree on whether JSON-RPC errors carry a non-2xx status, so parse first
        let parsed: RpcResponse = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => {
                return Err(RpcError::Decode(format!("{}: {}", method, e)));
            }
            Err(_) => {
                return Err(RpcError::Transport(format!("HTTP {} for {}: {}", status, method, text)));
            }
        };

        if let Some(err) = parsed.error {
            debug!("RPC {} #{} error {}: {}", method, id, err.code, err.message);
            return Err(RpcError::Rpc { code: err.code, message: err.message, data: err.data });
        }

        serde_json::from_value(parsed.result).map_err(|e| RpcError::Decode(format!("{}: {}", method, e)))
    }

    /// `eth_call` against the latest block
    pub async fn call(&self, to: Address, data: impl Into<Bytes>) -> Result<Bytes, RpcError> {
        let data: Bytes = data.into();
        self.request("eth_call", json!([{ "to": to, "data": data }, "latest"])).await
    }

    /// Replay a transaction as a call, used to recover a revert reason after the fact
    pub async fn call_as(&self, tx: &TransactionRequest, block: Option<U64>) -> Result<Bytes, RpcError> {
        let block = match block {
            Some(n) => json!(n),
            None => json!("latest"),
        };
        self.request("eth_call", json!([tx, block])).await
    }

    pub async fn chain_id(&self) -> Result<u64, RpcError> {
        let id: U64 = self.request("eth_chainId", json!([])).await?;
        Ok(id.to::<u64>())
    }

    pub async fn accounts(&self) -> Result<Vec<Address>, RpcError> {
        self.request("eth_accounts", json!([])).await
    }

    /// Prompts the wallet to authorize accounts
    pub async fn request_accounts(&self) -> Result<Vec<Address>, RpcError> {
        self.request("eth_requestAccounts", json!([])).await
    }

    pub async fn send_transaction(&self, tx: &TransactionRequest) -> Result<TxHash, RpcError> {
        self.request("eth_sendTransaction", json!([tx])).await
    }

    /// `None` while the transaction is still pending
    pub async fn get_transaction_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>, RpcError> {
        self.request("eth_getTransactionReceipt", json!([hash])).await
    }
}
