//! Ethereum-style JSON-RPC oracle.
//!
//! Uses `eth_blockNumber` for the current height and `eth_getBlockByNumber`
//! for block timestamps. Quantities are `0x`-prefixed hex strings.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::oracle::BlockHeightOracle;
use strongbox_common::{Error, Result};

/// Configuration for the JSON-RPC oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcConfig {
    /// JSON-RPC endpoint (e.g., a local node or hosted gateway).
    pub rpc_url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    timestamp: String,
}

/// Parse a JSON-RPC hex quantity (`"0x1b4"`).
pub fn parse_quantity(value: &str) -> Result<u64> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| Error::Serialization(format!("Quantity is not 0x-prefixed: {}", value)))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| Error::Serialization(format!("Invalid quantity '{}': {}", value, e)))
}

/// Block-height oracle backed by a JSON-RPC node.
pub struct JsonRpcOracle {
    client: Client,
    rpc_url: String,
}

impl JsonRpcOracle {
    /// Create an oracle for the node at `config.rpc_url`.
    pub fn new(config: JsonRpcConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            rpc_url: config.rpc_url,
        })
    }

    async fn rpc_call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<Option<T>> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("RPC {} failed: {}", method, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Network(format!("RPC {} error: {} - {}", method, status, body)));
        }

        let parsed: JsonRpcResponse<T> = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("RPC response parse error: {}", e)))?;

        if let Some(err) = parsed.error {
            return Err(Error::Network(format!(
                "RPC {} error {}: {}",
                method, err.code, err.message
            )));
        }

        Ok(parsed.result)
    }
}

#[async_trait]
impl BlockHeightOracle for JsonRpcOracle {
    fn name(&self) -> &str {
        "jsonrpc"
    }

    async fn current_height(&self) -> Result<u64> {
        let quantity: String = self
            .rpc_call("eth_blockNumber", json!([]))
            .await?
            .ok_or_else(|| Error::Network("Empty eth_blockNumber response".to_string()))?;

        let height = parse_quantity(&quantity)?;
        debug!(height, "Read chain height");
        Ok(height)
    }

    async fn block_timestamp(&self, height: u64) -> Result<DateTime<Utc>> {
        let header: BlockHeader = self
            .rpc_call("eth_getBlockByNumber", json!([format!("0x{:x}", height), false]))
            .await?
            .ok_or_else(|| Error::NotFound(format!("Block {} not found", height)))?;

        let seconds = parse_quantity(&header.timestamp)?;
        let seconds = i64::try_from(seconds)
            .map_err(|_| Error::Serialization(format!("Timestamp out of range: {}", seconds)))?;

        Utc.timestamp_opt(seconds, 0)
            .single()
            .ok_or_else(|| Error::Serialization(format!("Invalid block timestamp: {}", seconds)))
    }
}
