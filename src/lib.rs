//! Stowage
//!
//! A client-side cache for immutable remote content, layered on top of a
//! signed-URL object store.
//!
//! # Overview
//!
//! Artifacts are immutable blobs identified by a `(namespace, path)` pair.
//! A remote metadata service hands out short-lived signed URLs for
//! writing and reading them; the bytes themselves move through plain
//! HTTP PUT/GET against those URLs. Every uploaded artifact is labelled
//! with the SHA-256 of its content.
//!
//! On top of that, [`UrlCache`] serves arbitrary source URLs: the first
//! request fetches from the origin and stores the content as an artifact,
//! later requests are answered from the store without touching the origin.
//!
//! # Features
//!
//! - **Upload / Resolve**: [`ArtifactStore`] streams content to and from
//!   signed URLs, computing the digest on the way
//! - **Length resolution**: uploads always carry an explicit
//!   `Content-Length`, buffering unknown-length streams when needed
//! - **URL caching**: freshness thresholds and expected digests per call
//! - **Error attribution**: origin failures are distinguishable from
//!   cache backend failures, see [`StorageError::is_origin_error`]
//! - **Opt-in retries**: [`RetryPolicy`] only retries what
//!   [`StorageError::should_retry`] allows
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stowage::{
//!     ArtifactStore, CacheUrlOptions, ConnectMetadataClient, StaticTokenSource,
//!     StowageConfig, UrlCache,
//! };
//!
//! # async fn run() -> stowage::Result<()> {
//! let config = StowageConfig::from_file("stowage.yaml")?;
//! let tokens = Arc::new(StaticTokenSource::new("token"));
//! let metadata = Arc::new(ConnectMetadataClient::new(&config, tokens)?);
//! let store = ArtifactStore::new(metadata, &config)?;
//! let cache = UrlCache::new(store, &config)?;
//!
//! let (stream, info) = cache
//!     .cache_url("https://example.com/tool.tar.gz", CacheUrlOptions::default())
//!     .await?;
//! println!("cached at {} (hit: {})", info.cached_at, info.from_cache);
//! let bytes = stowage::body::read_to_bytes(stream).await?;
//! # let _ = bytes;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! ```yaml
//! endpoint: "https://storage.example.com"
//! token_file: "/var/run/stowage/token"
//! request_timeout_secs: 300
//! verbose_transport: false
//! max_memory_buffer: 8388608
//! cache_ttl_secs: 604800
//! ```
//!
//! See [`StowageConfig`] for all options.

pub mod body;
pub mod config;
pub mod credentials;
pub mod digest;
pub mod error;
pub mod length_resolver;
pub mod metadata;
pub mod metadata_client;
pub mod metrics;
pub mod models;
pub mod origin;
pub mod retry;
pub mod store;
pub mod transport;
pub mod url_cache;

// Re-export commonly used types
pub use body::{ByteStream, Content};
pub use config::StowageConfig;
pub use credentials::{FileTokenSource, StaticTokenSource, TokenSource};
pub use digest::{DigestHandle, DigestStream};
pub use error::{Result, StorageError};
pub use metadata::MetadataService;
pub use metadata_client::ConnectMetadataClient;
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use models::{
    Artifact, ArtifactInfo, CacheEvent, CacheInfo, CacheUrlOptions, LabelFilter, UploadOptions,
    CACHE_NAMESPACE, DIGEST_LABEL, SOURCE_URL_LABEL,
};
pub use retry::RetryPolicy;
pub use store::ArtifactStore;
pub use url_cache::UrlCache;
