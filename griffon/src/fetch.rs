//! HTTP downloads of boot artifacts and network descriptors.

use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::{ImagingError, ImagingResult};

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Stream `url` into `dest`, replacing any existing file.
    async fn download(&self, url: &str, dest: &Path) -> ImagingResult<u64>;

    /// Fetch a small document into memory.
    async fn fetch(&self, url: &str) -> ImagingResult<Vec<u8>>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> ImagingResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    /// GET `url`. A 404 is [`ImagingError::NotFound`]; any other non-success
    /// status is [`ImagingError::Http`].
    async fn get(&self, url: &str) -> ImagingResult<reqwest::Response> {
        let response = self.client.get(url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ImagingError::NotFound(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }
        Ok(response.error_for_status()?)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn download(&self, url: &str, dest: &Path) -> ImagingResult<u64> {
        tracing::info!(url, dest = %dest.display(), "Downloading");
        let response = self.get(url).await?;

        let mut file = fs::File::create(dest).await?;
        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.sync_all().await?;

        tracing::info!(url, bytes = written, "Download complete");
        Ok(written)
    }

    async fn fetch(&self, url: &str) -> ImagingResult<Vec<u8>> {
        let response = self.get(url).await?;
        Ok(response.bytes().await?.to_vec())
    }
}
