use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::LibraryError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Where poster and backdrop bytes come from.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, LibraryError>;
}

/// Downloads artwork over HTTP.
pub struct HttpImageSource {
    client: Client,
}

impl HttpImageSource {
    pub fn new() -> Result<Self, LibraryError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("shelfsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LibraryError::Misconfigured(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, LibraryError> {
        let download_err = |reason: String| LibraryError::Download {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| download_err(e.to_string()))?;

        if !response.status().is_success() {
            return Err(download_err(format!("HTTP {}", response.status())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| download_err(e.to_string()))?;
        if bytes.is_empty() {
            return Err(download_err("empty body".to_string()));
        }
        Ok(bytes.to_vec())
    }
}

/// Never downloads anything. Used when artwork is disabled.
pub struct NoImages;

#[async_trait]
impl ImageSource for NoImages {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, LibraryError> {
        Err(LibraryError::Download {
            url: url.to_string(),
            reason: "image downloads are disabled".to_string(),
        })
    }
}
