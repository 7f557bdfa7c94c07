//! Outbound media downloads.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use pairbot_core::{Error, Result};

/// Plain HTTP GET of a media URL.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Download the body of `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// [`MediaFetcher`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpMediaFetcher {
    client: Client,
}

impl HttpMediaFetcher {
    /// Create a fetcher whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }
}

impl Default for HttpMediaFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!("Fetching media: {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Fetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::Fetch(e.to_string()))?;
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Fetch(e.to_string()))?;
        Ok(body.to_vec())
    }
}
