//! Request Client Module
//!
//! The engine never talks to the network directly. It hands a data kind to
//! a `RequestClient` and gets JSON back. Calls must be safe to deduplicate
//! and retry.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::Value;
use tracing::debug;

use crate::error::{FetchError, Result, SyncError};
use crate::kind::DataKind;

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 200;

// == Request Client Trait ==
/// Performs the network call for one data kind.
#[async_trait]
pub trait RequestClient: Send + Sync {
    async fn fetch(&self, kind: &DataKind) -> std::result::Result<Value, FetchError>;
}

// == HTTP Request Client ==
/// Fetches `GET {base_url}/{kind}`; a parameter suffix becomes the query string.
/// Clone is cheap - reqwest::Client shares its connection pool.
#[derive(Debug, Clone)]
pub struct HttpRequestClient {
    client: Client,
    base_url: String,
}

impl HttpRequestClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| SyncError::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// URL a kind is fetched from.
    pub fn url_for(&self, kind: &DataKind) -> String {
        match kind.params() {
            Some(params) => format!("{}/{}?{}", self.base_url, kind.base(), params),
            None => format!("{}/{}", self.base_url, kind.base()),
        }
    }
}

#[async_trait]
impl RequestClient for HttpRequestClient {
    async fn fetch(&self, kind: &DataKind) -> std::result::Result<Value, FetchError> {
        let url = self.url_for(kind);
        debug!(%kind, %url, "fetching data kind");

        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FetchError::new(kind.clone(), format!("network error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(
                FetchError::new(kind.clone(), format!("HTTP {}: {}", status, truncate(&body)))
                    .with_status(status.as_u16()),
            );
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::new(kind.clone(), format!("invalid JSON: {e}")))
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes)", &body[..end], body.len())
}
