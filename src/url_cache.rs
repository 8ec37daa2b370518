//! URL cache orchestrator
//!
//! `UrlCache::cache_url` serves the content of a source URL, going to the
//! origin only when no fresh enough cache entry exists. A cache entry is
//! an artifact in [`CACHE_NAMESPACE`] labelled with its source URL and the
//! digest of its content.
//!
//! On a miss the origin body is teed: every chunk is written to an
//! anonymous spool file and handed to the upload. Once the upload is
//! finalized the spool file is rewound and returned to the caller, so the
//! caller reads from local disk rather than from memory.
//!
//! Concurrent misses for the same URL are not coordinated; each one
//! fetches and writes its own entry.

use crate::body::{reader_stream, ByteStream, Content};
use crate::config::StowageConfig;
use crate::error::{Result, StorageError};
use crate::metrics::CacheMetrics;
use crate::models::{
    normalize_digest, Artifact, CacheEvent, CacheInfo, CacheUrlOptions, LabelFilter,
    UploadOptions, CACHE_NAMESPACE, DIGEST_LABEL, SOURCE_URL_LABEL,
};
use crate::origin::OriginFetcher;
use crate::retry::RetryPolicy;
use crate::store::ArtifactStore;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

/// First failure seen by the tee, reported in place of whatever error the
/// upload surfaces for it
type TeeFailure = Arc<Mutex<Option<StorageError>>>;

/// Client-side cache for immutable remote content
pub struct UrlCache {
    store: ArtifactStore,
    origin: OriginFetcher,
    metrics: Arc<CacheMetrics>,
    default_ttl: Option<Duration>,
    spool_dir: Option<PathBuf>,
}

impl UrlCache {
    /// Create a cache on top of `store`, fetching origins with a client
    /// built from `config`
    pub fn new(store: ArtifactStore, config: &StowageConfig) -> Result<Self> {
        let origin = OriginFetcher::new(config.http_client()?);
        Ok(Self::with_origin(store, origin, config))
    }

    pub fn with_origin(store: ArtifactStore, origin: OriginFetcher, config: &StowageConfig) -> Self {
        UrlCache {
            store,
            origin,
            metrics: Arc::new(CacheMetrics::new()),
            default_ttl: config.cache_ttl(),
            spool_dir: config.spool_dir.clone(),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn metrics(&self) -> Arc<CacheMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Return the content of `source_url`, from the cache when possible
    ///
    /// The URL is validated before any network call. `options.timeout`
    /// bounds everything up to the moment the stream is returned; reading
    /// the stream is not covered.
    ///
    /// # Errors
    /// * `InvalidUrl` - `source_url` is not an absolute http(s) URL
    /// * `Origin` - the origin could not be reached, answered non-2xx, or
    ///   failed mid-body
    /// * `DigestMismatch` - fetched content differs from `expected_digest`;
    ///   the entry written for it is left in place
    /// * `DeadlineExceeded` - `options.timeout` elapsed
    /// * anything the metadata service or the object store report
    pub async fn cache_url(
        &self,
        source_url: &str,
        options: CacheUrlOptions,
    ) -> Result<(ByteStream, CacheInfo)> {
        let url = parse_source_url(source_url)?;

        self.metrics.record_request();
        let start = Instant::now();

        let result = match options.timeout {
            Some(limit) => tokio::time::timeout(limit, self.lookup(source_url, &url, &options))
                .await
                .unwrap_or(Err(StorageError::DeadlineExceeded(limit))),
            None => self.lookup(source_url, &url, &options).await,
        };

        self.metrics.record_request_duration(start.elapsed());

        if let Err(ref e) = result {
            if e.is_precondition_violation() {
                self.metrics.record_digest_mismatch();
            } else {
                self.metrics.record_failure(e.is_origin_error());
            }
            warn!("cache_url failed: url={}, error={}", source_url, e);
        }

        result
    }

    /// `cache_url`, re-run while `policy` allows and the error is retryable
    pub async fn cache_url_with_retry(
        &self,
        source_url: &str,
        options: CacheUrlOptions,
        policy: &RetryPolicy,
    ) -> Result<(ByteStream, CacheInfo)> {
        let mut attempt = 0;

        loop {
            match self.cache_url(source_url, options.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !policy.should_retry(attempt, &e) {
                        return Err(e);
                    }

                    let backoff = policy.backoff_duration(attempt);
                    warn!(
                        "cache_url failed for {} (attempt {}), retrying after {:?}: {}",
                        source_url,
                        attempt + 1,
                        backoff,
                        e
                    );
                    sleep(backoff).await;

                    attempt += 1;
                }
            }
        }
    }

    async fn lookup(
        &self,
        source_url: &str,
        url: &Url,
        options: &CacheUrlOptions,
    ) -> Result<(ByteStream, CacheInfo)> {
        let expected = options.expected_digest.as_deref().map(normalize_digest);

        let mut filter = LabelFilter::new().equals(SOURCE_URL_LABEL, source_url);
        if let Some(ref digest) = expected {
            filter = filter.equals(DIGEST_LABEL, digest.clone());
        }

        options.emit(CacheEvent::Listing {
            url: source_url.to_string(),
        });
        let entries = self
            .store
            .metadata()
            .list(&[CACHE_NAMESPACE.to_string()], &filter)
            .await?;
        debug!("Listed cache entries: url={}, count={}", source_url, entries.len());

        let mut stale = false;
        if let Some(latest) = select_latest(entries) {
            if is_fresh(latest.created_at, options.fresh_after) {
                return self.serve_cached(latest, options).await;
            }

            stale = true;
            if let Some(fresh_after) = options.fresh_after {
                info!(
                    "Cache entry too old: path={}, created_at={}, fresh_after={}",
                    latest.path, latest.created_at, fresh_after
                );
                options.emit(CacheEvent::TooOld {
                    path: latest.path,
                    created_at: latest.created_at,
                    fresh_after,
                });
            }
        }

        self.metrics.record_cache_miss(stale);
        self.fetch_and_store(source_url, url, expected, options).await
    }

    async fn serve_cached(
        &self,
        artifact: Artifact,
        options: &CacheUrlOptions,
    ) -> Result<(ByteStream, CacheInfo)> {
        info!(
            "Cache hit: path={}, created_at={}",
            artifact.path, artifact.created_at
        );
        options.emit(CacheEvent::LoadingFromCache {
            path: artifact.path.clone(),
            created_at: artifact.created_at,
        });

        let (stream, info) = self.store.resolve(CACHE_NAMESPACE, &artifact.path).await?;
        self.metrics.record_cache_hit();

        options.emit(CacheEvent::Done {
            path: artifact.path.clone(),
            from_cache: true,
        });

        Ok((
            stream,
            CacheInfo {
                cached_at: info.created_at,
                path: artifact.path,
                digest: info.digest,
                from_cache: true,
            },
        ))
    }

    async fn fetch_and_store(
        &self,
        source_url: &str,
        url: &Url,
        expected: Option<String>,
        options: &CacheUrlOptions,
    ) -> Result<(ByteStream, CacheInfo)> {
        let now = Utc::now();
        let path = cache_path(url, now);

        options.emit(CacheEvent::Fetching {
            url: source_url.to_string(),
        });
        self.metrics.record_origin_fetch();
        let response = self.origin.fetch(url.as_str()).await?;

        // unlinked at creation; released on every exit path when dropped
        let spool = match self.spool_dir {
            Some(ref dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        let writer = File::from_std(spool.try_clone()?);
        let mut reader = File::from_std(spool);

        let failure: TeeFailure = Arc::new(Mutex::new(None));
        let body = tee_to_spool(
            response.body,
            writer,
            Arc::clone(&failure),
            Arc::clone(&self.metrics),
        );

        let mut upload_options = UploadOptions::default().label(SOURCE_URL_LABEL, source_url);
        if let Some(length) = response.content_length {
            upload_options = upload_options.length(length);
        }
        if let Some(expires_at) = options
            .expires_in
            .or(self.default_ttl)
            .and_then(|ttl| expiry(now, ttl))
        {
            upload_options = upload_options.expires_at(expires_at);
        }

        options.emit(CacheEvent::Uploading { path: path.clone() });
        let uploaded = self
            .store
            .upload(CACHE_NAMESPACE, &path, Content::from_stream(body), upload_options)
            .await;

        if let Some(err) = take_failure(&failure) {
            return Err(err);
        }
        let info = uploaded?;

        if let Some(expected) = expected {
            let actual = info.digest.clone().unwrap_or_default();
            if actual != expected {
                warn!(
                    "Digest mismatch for {}: expected={}, actual={}, path={}",
                    source_url, expected, actual, path
                );
                return Err(StorageError::DigestMismatch { expected, actual });
            }
        }

        reader.seek(SeekFrom::Start(0)).await?;

        info!(
            "Cached origin content: url={}, path={}, created_at={}",
            source_url, path, info.created_at
        );
        options.emit(CacheEvent::Done {
            path: path.clone(),
            from_cache: false,
        });

        Ok((
            reader_stream(reader),
            CacheInfo {
                cached_at: info.created_at,
                path,
                digest: info.digest,
                from_cache: false,
            },
        ))
    }
}

/// Parse and check a source URL
pub fn parse_source_url(source_url: &str) -> Result<Url> {
    let url = Url::parse(source_url)
        .map_err(|e| StorageError::InvalidUrl(format!("{}: {}", source_url, e)))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(StorageError::InvalidUrl(format!(
                "{}: unsupported scheme {}",
                source_url, other
            )))
        }
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(StorageError::InvalidUrl(format!("{}: missing host", source_url)));
    }

    Ok(url)
}

/// Pick the newest entry; ties are broken arbitrarily
pub fn select_latest(entries: Vec<Artifact>) -> Option<Artifact> {
    entries.into_iter().max_by_key(|a| a.created_at)
}

/// An entry is fresh unless it was created before `fresh_after`
pub fn is_fresh(created_at: DateTime<Utc>, fresh_after: Option<DateTime<Utc>>) -> bool {
    fresh_after.map_or(true, |threshold| created_at >= threshold)
}

/// Build the cache path `{host}/{timestamp}/{sanitized path and query}`
pub fn cache_path(url: &Url, now: DateTime<Utc>) -> String {
    let host = url.host_str().unwrap_or_default();
    let host = match url.port() {
        Some(port) => sanitize_segment(&format!("{}_{}", host, port)),
        None => sanitize_segment(host),
    };

    let mut raw = url.path().to_string();
    if let Some(query) = url.query() {
        raw.push('?');
        raw.push_str(query);
    }

    format!(
        "{}/{}/{}",
        host,
        now.format("%Y%m%dT%H%M%S%.9fZ"),
        sanitize_path(&raw)
    )
}

/// Reduce a URL path to `/`-separated segments of `[A-Za-z0-9._-]`
///
/// Each run of other characters becomes a single `_`. Empty, `.` and `..`
/// segments are dropped, so the result has no leading, trailing or
/// doubled `/`. An empty result becomes `index`.
pub fn sanitize_path(path: &str) -> String {
    let segments: Vec<String> = path
        .split('/')
        .map(sanitize_segment)
        .filter(|s| !s.is_empty() && s != "." && s != "..")
        .collect();

    if segments.is_empty() {
        "index".to_string()
    } else {
        segments.join("/")
    }
}

fn sanitize_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut in_run = false;

    for c in segment.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }

    out
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
}

fn record_failure(failure: &TeeFailure, err: StorageError) {
    if let Ok(mut slot) = failure.lock() {
        slot.get_or_insert(err);
    }
}

fn take_failure(failure: &TeeFailure) -> Option<StorageError> {
    failure.lock().ok().and_then(|mut slot| slot.take())
}

/// Forward origin chunks unchanged, writing each one to `spool` before it
/// is yielded
///
/// Origin read errors are recorded as `StorageError::Origin` and spool
/// write errors as `StorageError::IoError`; either ends the stream.
fn tee_to_spool(
    origin: ByteStream,
    spool: File,
    failure: TeeFailure,
    metrics: Arc<CacheMetrics>,
) -> ByteStream {
    Box::pin(stream::unfold(Some((origin, spool)), move |state| {
        let failure = Arc::clone(&failure);
        let metrics = Arc::clone(&metrics);
        async move {
            let (mut origin, mut spool) = state?;
            match origin.next().await {
                None => None,
                Some(Ok(chunk)) => {
                    if let Err(e) = write_chunk(&mut spool, &chunk).await {
                        record_failure(
                            &failure,
                            StorageError::IoError(format!("failed to write spool file: {}", e)),
                        );
                        return Some((Err(e), None));
                    }
                    metrics.record_bytes_from_origin(chunk.len() as u64);
                    Some((Ok(chunk), Some((origin, spool))))
                }
                Some(Err(e)) => {
                    warn!("Origin body read failed: {}", e);
                    record_failure(
                        &failure,
                        StorageError::origin_failure(format!("failed to read origin body: {}", e)),
                    );
                    Some((Err(e), None))
                }
            }
        }
    }))
}

async fn write_chunk(spool: &mut File, chunk: &Bytes) -> std::io::Result<()> {
    spool.write_all(chunk).await?;
    spool.flush().await
}
