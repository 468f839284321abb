//! HTTP access to the remote registry.

use crate::config::{LibraryConfig, RegistryConfig};
use crate::error::{Result, SdcmError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

/// Outcome of a registry fetch that reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryResponse {
    /// Raw document bytes.
    Found(Vec<u8>),
    /// The registry no longer serves this resource.
    NotFound,
}

/// Fetches raw registry documents.
///
/// Implementations return [`RegistryResponse::NotFound`] for a missing
/// resource and an error for every other failure.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn fetch_model(&self, model_id: i64) -> Result<RegistryResponse>;

    async fn fetch_version(&self, version_id: i64) -> Result<RegistryResponse>;

    async fn fetch_version_by_hash(&self, hash: &str) -> Result<RegistryResponse>;

    /// Raw bytes of a gallery image at its download URL.
    async fn fetch_image(&self, url: &str) -> Result<RegistryResponse>;
}

/// [`RegistryClient`] for the Civitai REST API.
#[derive(Debug, Clone)]
pub struct CivitaiClient {
    client: Client,
    base_url: String,
}

impl CivitaiClient {
    /// Build a client honouring the configured base URL and proxy.
    pub fn new(config: &LibraryConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(RegistryConfig::REQUEST_TIMEOUT)
            .user_agent(RegistryConfig::USER_AGENT);

        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| SdcmError::Config {
                message: format!("Invalid proxy {}: {}", proxy, e),
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|e| SdcmError::Network {
            message: format!("Failed to create HTTP client: {}", e),
            source: Some(e),
        })?;

        Ok(Self {
            client,
            base_url: config.registry_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get(&self, url: &str) -> Result<RegistryResponse> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SdcmError::Network {
                message: format!("GET {} failed: {}", url, e),
                source: Some(e),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(RegistryResponse::NotFound);
        }
        if !status.is_success() {
            return Err(SdcmError::RegistryStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| SdcmError::Network {
            message: format!("Failed to read body of {}: {}", url, e),
            source: Some(e),
        })?;
        Ok(RegistryResponse::Found(bytes.to_vec()))
    }
}

#[async_trait]
impl RegistryClient for CivitaiClient {
    async fn fetch_model(&self, model_id: i64) -> Result<RegistryResponse> {
        self.get(&format!("{}/models/{}", self.base_url, model_id))
            .await
    }

    async fn fetch_version(&self, version_id: i64) -> Result<RegistryResponse> {
        self.get(&format!("{}/model-versions/{}", self.base_url, version_id))
            .await
    }

    async fn fetch_version_by_hash(&self, hash: &str) -> Result<RegistryResponse> {
        self.get(&format!(
            "{}/model-versions/by-hash/{}",
            self.base_url,
            hash.to_uppercase()
        ))
        .await
    }

    async fn fetch_image(&self, url: &str) -> Result<RegistryResponse> {
        self.get(url).await
    }
}
