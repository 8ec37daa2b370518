//! Plain PUT/GET against signed object store URLs

use crate::body::ByteStream;
use crate::error::{Result, StorageError};
use futures_util::TryStreamExt;
use http::header::{HeaderValue, CONTENT_LENGTH};
use reqwest::{Body, Client};
use std::io;
use tracing::{debug, info, warn};

/// Header carrying a caller supplied base64 MD5 of the body
pub const CONTENT_MD5: &str = "content-md5";

/// Transfers bytes to and from signed URLs
///
/// Signed URLs are pre-authorized, so no credentials are attached. The
/// only headers sent are `Content-Length` and, optionally, `Content-MD5`.
#[derive(Clone)]
pub struct SignedUrlTransport {
    client: Client,
    verbose: bool,
}

impl SignedUrlTransport {
    /// Create a transport
    ///
    /// # Arguments
    /// * `client` - HTTP client to use
    /// * `verbose` - Log each request and response at info level instead of debug
    pub fn new(client: Client, verbose: bool) -> Self {
        SignedUrlTransport { client, verbose }
    }

    fn trace(&self, message: String) {
        if self.verbose {
            info!("{}", message);
        } else {
            debug!("{}", message);
        }
    }

    /// Upload `body` with a fixed length
    ///
    /// The `Content-Length` header is always set so the body is never sent
    /// chunked. Any non-2xx answer is a `StorageError::Transport`.
    pub async fn put(
        &self,
        signed_url: &str,
        body: ByteStream,
        length: u64,
        checksum: Option<&str>,
    ) -> Result<()> {
        self.trace(format!("PUT {} length={}", redact(signed_url), length));

        let mut request = self
            .client
            .put(signed_url)
            .header(CONTENT_LENGTH, HeaderValue::from(length))
            .body(Body::wrap_stream(body));

        if let Some(checksum) = checksum {
            request = request.header(CONTENT_MD5, checksum);
        }

        let response = request.send().await.map_err(|e| StorageError::Transport {
            status: e.status().map(|s| s.as_u16()),
            message: format!("failed to upload artifact: {}", e),
        })?;

        let status = response.status();
        self.trace(format!("PUT {} status={}", redact(signed_url), status));

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Upload rejected: status={}, body={}",
                status,
                body.chars().take(512).collect::<String>()
            );
            return Err(StorageError::transport_status_error("upload", status.as_u16()));
        }

        Ok(())
    }

    /// Open a download stream
    pub async fn get(&self, signed_url: &str) -> Result<ByteStream> {
        self.trace(format!("GET {}", redact(signed_url)));

        let response = self
            .client
            .get(signed_url)
            .send()
            .await
            .map_err(|e| StorageError::Transport {
                status: e.status().map(|s| s.as_u16()),
                message: format!("failed to download artifact: {}", e),
            })?;

        let status = response.status();
        self.trace(format!(
            "GET {} status={} content_length={:?}",
            redact(signed_url),
            status,
            response.content_length()
        ));

        if !status.is_success() {
            return Err(StorageError::transport_status_error("download", status.as_u16()));
        }

        Ok(Box::pin(response.bytes_stream().map_err(io::Error::other)))
    }
}

/// Strip the query string, which carries the signature
fn redact(signed_url: &str) -> &str {
    signed_url.split('?').next().unwrap_or(signed_url)
}
