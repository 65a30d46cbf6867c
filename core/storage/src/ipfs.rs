//! IPFS content store via the node HTTP API (`/api/v0/*`).
//!
//! Addresses are CIDs chosen by the node. IPFS does not guarantee
//! persistence; objects are pinned on add and unpinned on remove.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::provider::{ContentStore, ObjectStat};
use strongbox_common::{Error, Result};

/// Configuration for the IPFS HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpfsConfig {
    /// API endpoint (e.g., "http://127.0.0.1:5001").
    pub api_url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for IpfsConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:5001".to_string(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddResponse {
    hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlockStatResponse {
    key: String,
    size: u64,
}

/// IPFS content store.
pub struct IpfsStore {
    client: Client,
    api: Url,
}

impl IpfsStore {
    /// Create a store for the node at `config.api_url`.
    ///
    /// # Errors
    /// - `InvalidInput` if the URL does not parse
    /// - `Network` if the HTTP client cannot be built
    pub fn new(config: IpfsConfig) -> Result<Self> {
        let api = Url::parse(&config.api_url)
            .map_err(|e| Error::InvalidInput(format!("Invalid IPFS API URL: {}", e)))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, api })
    }

    fn endpoint(&self, command: &str) -> Result<Url> {
        self.api
            .join(&format!("api/v0/{}", command))
            .map_err(|e| Error::InvalidInput(format!("Invalid IPFS endpoint: {}", e)))
    }

    async fn call(&self, command: &str, arg: &str) -> Result<reqwest::Response> {
        self.client
            .post(self.endpoint(command)?)
            .query(&[("arg", arg)])
            .send()
            .await
            .map_err(|e| Error::Network(format!("IPFS {} failed: {}", command, e)))
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND || body.contains("not found") {
            Err(Error::NotFound(format!("{}: {}", what, body.trim())))
        } else {
            Err(Error::Network(format!("IPFS {} error: {} - {}", what, status, body.trim())))
        }
    }
}

#[async_trait]
impl ContentStore for IpfsStore {
    fn name(&self) -> &str {
        "ipfs"
    }

    async fn add(&self, data: Vec<u8>) -> Result<String> {
        let size = data.len();
        let form = Form::new().part("file", Part::bytes(data).file_name("data"));

        let response = self
            .client
            .post(self.endpoint("add")?)
            .query(&[("pin", "true"), ("cid-version", "1")])
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Network(format!("IPFS add failed: {}", e)))?;

        let added: AddResponse = Self::check(response, "add")
            .await?
            .json()
            .await
            .map_err(|e| Error::Network(format!("Failed to parse IPFS add response: {}", e)))?;

        debug!(cid = %added.hash, size, "Added object to IPFS");
        Ok(added.hash)
    }

    async fn cat(&self, address: &str) -> Result<Vec<u8>> {
        let response = self.call("cat", address).await?;
        let bytes = Self::check(response, "cat")
            .await?
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("IPFS cat read failed: {}", e)))?;
        Ok(bytes.to_vec())
    }

    async fn stat(&self, address: &str) -> Result<Option<ObjectStat>> {
        let response = self.call("block/stat", address).await?;
        match Self::check(response, "block/stat").await {
            Ok(response) => {
                let stat: BlockStatResponse = response.json().await.map_err(|e| {
                    Error::Network(format!("Failed to parse IPFS stat response: {}", e))
                })?;
                Ok(Some(ObjectStat {
                    address: stat.key,
                    size: stat.size,
                    stored_at: None,
                }))
            }
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn remove(&self, address: &str) -> Result<()> {
        let response = self.call("pin/rm", address).await?;
        if let Err(e) = Self::check(response, "pin/rm").await {
            // Unpinning something that is not pinned is not an error.
            warn!(cid = %address, error = %e, "IPFS unpin failed");
        }
        Ok(())
    }
}
