//! Graph API picture download client.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::debug;

use crate::domain::entities::CacheKey;
use crate::domain::errors::FetchError;
use crate::domain::ports::PictureFetcherPort;

/// Default graph endpoint.
pub const GRAPH_API_BASE: &str = "https://graph.facebook.com";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const USER_AGENT: &str = concat!("profile-pictures/", env!("CARGO_PKG_VERSION"));

/// Fetches profile pictures over HTTP, following the graph endpoint's
/// redirect to the image CDN.
#[derive(Debug, Clone)]
pub struct GraphPictureFetcher {
    client: Client,
    base_url: String,
}

impl GraphPictureFetcher {
    /// Creates a fetcher for `base_url`.
    ///
    /// # Errors
    /// Returns error if HTTP client creation fails.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(client, base_url))
    }

    /// Creates a fetcher reusing an existing client.
    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// URL of the picture for `key`.
    #[must_use]
    pub fn picture_url(&self, key: &CacheKey) -> String {
        format!(
            "{}/{}/picture?type={}",
            self.base_url,
            key.profile_id(),
            key.cropping().as_query_value()
        )
    }
}

impl Default for GraphPictureFetcher {
    fn default() -> Self {
        Self::with_client(Client::new(), GRAPH_API_BASE)
    }
}

#[async_trait]
impl PictureFetcherPort for GraphPictureFetcher {
    async fn fetch(&self, key: &CacheKey) -> Result<Bytes, FetchError> {
        let url = self.picture_url(key);
        debug!(key = %key, url = %url, "Requesting profile picture");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::network(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
            });
        }

        response
            .bytes()
            .await
            .map_err(|e| FetchError::network(format!("failed to read body: {e}")))
    }
}
