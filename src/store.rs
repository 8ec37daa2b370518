//! Artifact upload and resolve engines
//!
//! Uploads negotiate a signed write location, stream the content to it
//! while hashing and then finalize the write with the digest attached as
//! a label. Resolves negotiate a signed read location and hand the live
//! download stream back to the caller.

use crate::body::{ByteStream, Content};
use crate::config::StowageConfig;
use crate::digest::DigestStream;
use crate::error::Result;
use crate::length_resolver::resolve_length;
use crate::metadata::{CreateWriteRequest, FinalizeRequest, MetadataService};
use crate::models::{ArtifactInfo, UploadOptions, DIGEST_LABEL};
use crate::transport::SignedUrlTransport;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Client for the signed-URL artifact store
#[derive(Clone)]
pub struct ArtifactStore {
    metadata: Arc<dyn MetadataService>,
    transport: SignedUrlTransport,
    max_memory_buffer: usize,
    spool_dir: Option<PathBuf>,
}

impl ArtifactStore {
    /// Create a store from a metadata service and the shared configuration
    pub fn new(metadata: Arc<dyn MetadataService>, config: &StowageConfig) -> Result<Self> {
        let transport = SignedUrlTransport::new(config.http_client()?, config.verbose_transport);
        Ok(Self::with_transport(metadata, transport, config))
    }

    pub fn with_transport(
        metadata: Arc<dyn MetadataService>,
        transport: SignedUrlTransport,
        config: &StowageConfig,
    ) -> Self {
        ArtifactStore {
            metadata,
            transport,
            max_memory_buffer: config.max_memory_buffer,
            spool_dir: config.spool_dir.clone(),
        }
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataService> {
        &self.metadata
    }

    /// Upload `content` as `namespace`/`path`
    ///
    /// Performs exactly one create, one PUT and one finalize. Nothing is
    /// retried; metadata service errors are returned unchanged.
    ///
    /// # Returns
    /// The creation time and digest reported by the finalize call. The
    /// locally computed digest is used if the response carries none.
    pub async fn upload(
        &self,
        namespace: &str,
        path: &str,
        content: Content,
        options: UploadOptions,
    ) -> Result<ArtifactInfo> {
        let location = self
            .metadata
            .create_write(CreateWriteRequest {
                namespace: namespace.to_string(),
                path: path.to_string(),
                labels: options.labels.clone(),
                expires_at: options.expires_at,
            })
            .await?;
        debug!("Created write: namespace={}, path={}, write_id={}", namespace, path, location.write_id);

        let (content, length) = resolve_length(
            content,
            options.length,
            self.max_memory_buffer,
            self.spool_dir.as_deref(),
        )
        .await?;

        let (body, digest) = DigestStream::new(content.into_stream());
        self.transport
            .put(&location.signed_url, Box::pin(body), length, options.checksum.as_deref())
            .await?;

        let computed = digest.hex_digest();
        let mut add_labels = BTreeMap::new();
        add_labels.insert(DIGEST_LABEL.to_string(), computed.clone());

        let artifact = self
            .metadata
            .finalize(FinalizeRequest {
                namespace: namespace.to_string(),
                path: path.to_string(),
                write_id: location.write_id,
                add_labels,
            })
            .await?;

        info!(
            "Uploaded artifact: namespace={}, path={}, bytes={}, digest={}",
            namespace,
            path,
            digest.bytes_processed(),
            computed
        );

        Ok(ArtifactInfo {
            created_at: artifact.created_at,
            digest: Some(artifact.digest().map(str::to_string).unwrap_or(computed)),
        })
    }

    /// Open `namespace`/`path` for reading
    ///
    /// The returned stream is live; dropping it closes the connection.
    pub async fn resolve(&self, namespace: &str, path: &str) -> Result<(ByteStream, ArtifactInfo)> {
        let location = self.metadata.create_read(namespace, path).await?;
        let stream = self.transport.get(&location.signed_url).await?;

        debug!(
            "Resolved artifact: namespace={}, path={}, created_at={}",
            namespace, path, location.artifact.created_at
        );

        let info = ArtifactInfo {
            created_at: location.artifact.created_at,
            digest: location.artifact.digest().map(str::to_string),
        };
        Ok((stream, info))
    }
}
