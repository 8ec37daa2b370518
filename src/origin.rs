//! Origin fetcher for retrieving source content on cache misses

use crate::body::ByteStream;
use crate::error::{Result, StorageError};
use futures_util::TryStreamExt;
use reqwest::Client;
use std::io;
use tracing::{debug, warn};

/// An open origin response
pub struct OriginResponse {
    /// Length announced by the origin, if any
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

/// OriginFetcher issues plain GET requests against source URLs
///
/// Every failure it reports is a `StorageError::Origin`, so callers can
/// tell an unreachable origin apart from an unreachable cache backend.
#[derive(Clone)]
pub struct OriginFetcher {
    client: Client,
}

impl OriginFetcher {
    pub fn new(client: Client) -> Self {
        OriginFetcher { client }
    }

    /// Open `url` for reading
    ///
    /// # Returns
    /// * `Ok(OriginResponse)` for a 2xx answer
    /// * `Err(StorageError::Origin)` with `status: None` when the request
    ///   could not be sent, or with the status for any other answer
    pub async fn fetch(&self, url: &str) -> Result<OriginResponse> {
        debug!("Fetching origin content for url={}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            warn!("GET request failed for url={}: {}", url, e);
            StorageError::origin_failure(format!("GET {} failed: {}", url, e))
        })?;

        let status = response.status();
        debug!("Received GET response for url={}, status={}", url, status);

        if status.is_client_error() {
            warn!("Origin returned 4xx error for url={}: status={}", url, status);
            return Err(StorageError::origin_status_error(status.as_u16(), url));
        }

        if status.is_server_error() {
            warn!("Origin returned 5xx error for url={}: status={}", url, status);
            return Err(StorageError::origin_status_error(status.as_u16(), url));
        }

        if !status.is_success() {
            warn!("Unexpected status code for url={}: status={}", url, status);
            return Err(StorageError::origin_status_error(status.as_u16(), url));
        }

        let content_length = response.content_length().filter(|len| *len > 0);
        let body = Box::pin(response.bytes_stream().map_err(io::Error::other));

        Ok(OriginResponse { content_length, body })
    }
}
