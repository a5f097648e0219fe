//! HTTP capability used by the fetcher and the mutation layer.
//!
//! The engine only needs `get` and `patch`; both take paths relative to the
//! API base URL and return the decoded JSON body. [`ReqwestHttpClient`] is the
//! production implementation, tests inject fakes.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use crate::error::{Result, SyncError};

/// Minimal JSON-over-HTTP client.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// `GET {base}{path}?{query}`.
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value>;

    /// `PATCH {base}{path}` with a JSON body.
    async fn patch(&self, path: &str, body: &Value) -> Result<Value>;
}

/// Settings for [`ReqwestHttpClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// API base, e.g. `https://dashboard.example.com/api`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Optional bearer token sent as `Authorization`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

fn default_base_url() -> String {
    "http://localhost:5000/api".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            bearer_token: None,
        }
    }
}

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl ReqwestHttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        install_rustls_provider();

        // Validate early so a typo fails at construction, not on first fetch.
        Url::parse(&config.base_url)?;

        let mut builder = Client::builder();
        if config.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_secs));
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token: config.bearer_token.clone(),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        let path = path.trim_start_matches('/');
        Ok(Url::parse(&format!("{}/{}", self.base_url, path))?)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let response = self
            .authorize(request)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        trace!(status = status.as_u16(), len = body.len(), "HTTP response");

        if !status.is_success() {
            return Err(SyncError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = self.url(path)?;
        debug!(%url, "GET");
        self.send(self.client.get(url).query(query)).await
    }

    async fn patch(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.url(path)?;
        debug!(%url, "PATCH");
        self.send(self.client.patch(url).json(body)).await
    }
}
