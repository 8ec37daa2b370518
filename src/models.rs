//! Core data models for stowage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Label carrying the lower-case hex SHA-256 of an artifact's content
pub const DIGEST_LABEL: &str = "stowage.dev/digest";

/// Label carrying the origin URL of a URL cache entry
pub const SOURCE_URL_LABEL: &str = "stowage.dev/source-url";

/// Reserved namespace holding URL cache entries
pub const CACHE_NAMESPACE: &str = "stowage-url-cache";

/// An immutable blob tracked by the metadata service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub namespace: String,
    pub path: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Artifact {
    /// Digest recorded on the artifact, if any
    pub fn digest(&self) -> Option<&str> {
        self.labels.get(DIGEST_LABEL).map(String::as_str)
    }
}

/// Result of an upload or a resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub created_at: DateTime<Utc>,
    /// Lower-case hex SHA-256. `None` when a resolved artifact was stored
    /// without a digest label.
    pub digest: Option<String>,
}

/// Per-call upload options
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Labels attached when the write is created
    pub labels: BTreeMap<String, String>,
    /// Instant after which the store may drop the artifact
    pub expires_at: Option<DateTime<Utc>>,
    /// Declared content length. `None` and `Some(0)` both mean unknown.
    pub length: Option<u64>,
    /// Base64 MD5 of the content, sent as `Content-MD5`
    pub checksum: Option<String>,
}

impl UploadOptions {
    pub fn label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    pub fn length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }
}

/// A single equality condition of a label filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMatch {
    pub name: String,
    pub value: String,
}

/// Conjunction of label equalities used when listing artifacts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelFilter {
    pub matches: Vec<LabelMatch>,
}

impl LabelFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.matches.push(LabelMatch {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Check whether a label set satisfies every condition
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.matches
            .iter()
            .all(|m| labels.get(&m.name).map(|v| v == &m.value).unwrap_or(false))
    }
}

/// Diagnostic narration emitted by the URL cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// Listing existing entries for a URL
    Listing { url: String },
    /// Serving a cached entry
    LoadingFromCache { path: String, created_at: DateTime<Utc> },
    /// The newest entry is older than the freshness threshold
    TooOld {
        path: String,
        created_at: DateTime<Utc>,
        fresh_after: DateTime<Utc>,
    },
    /// Fetching from the origin
    Fetching { url: String },
    /// Writing the fetched content into the cache
    Uploading { path: String },
    /// The call finished and content is ready to be read
    Done { path: String, from_cache: bool },
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheEvent::Listing { url } => write!(f, "Looking up cached copies of {}", url),
            CacheEvent::LoadingFromCache { path, created_at } => {
                write!(f, "Loading from cache: {} (cached at {})", path, created_at)
            }
            CacheEvent::TooOld {
                path,
                created_at,
                fresh_after,
            } => write!(
                f,
                "Cached content {} is too old ({} < {})",
                path, created_at, fresh_after
            ),
            CacheEvent::Fetching { url } => write!(f, "Fetching {}", url),
            CacheEvent::Uploading { path } => write!(f, "Caching as {}", path),
            CacheEvent::Done { path, from_cache } => {
                write!(f, "Ready: {} (from cache: {})", path, from_cache)
            }
        }
    }
}

/// Callback receiving cache diagnostics
pub type EventSink = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

/// Options for a single `UrlCache::cache_url` call
#[derive(Clone, Default)]
pub struct CacheUrlOptions {
    /// Reject cache entries created before this instant
    pub fresh_after: Option<DateTime<Utc>>,
    /// Expected SHA-256, bare hex or `sha256:<hex>`
    pub expected_digest: Option<String>,
    /// Expiry of a newly written cache entry; falls back to the configured TTL
    pub expires_in: Option<Duration>,
    /// Upper bound on the whole call
    pub timeout: Option<Duration>,
    /// Diagnostic sink
    pub on_event: Option<EventSink>,
}

impl fmt::Debug for CacheUrlOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheUrlOptions")
            .field("fresh_after", &self.fresh_after)
            .field("expected_digest", &self.expected_digest)
            .field("expires_in", &self.expires_in)
            .field("timeout", &self.timeout)
            .field("on_event", &self.on_event.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl CacheUrlOptions {
    pub fn fresh_after(mut self, instant: DateTime<Utc>) -> Self {
        self.fresh_after = Some(instant);
        self
    }

    pub fn expected_digest(mut self, digest: impl Into<String>) -> Self {
        self.expected_digest = Some(digest.into());
        self
    }

    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn on_event(mut self, sink: impl Fn(&CacheEvent) + Send + Sync + 'static) -> Self {
        self.on_event = Some(Arc::new(sink));
        self
    }

    pub(crate) fn emit(&self, event: CacheEvent) {
        if let Some(ref sink) = self.on_event {
            sink(&event);
        }
    }
}

/// Description of the content served by `UrlCache::cache_url`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheInfo {
    /// Creation time of the artifact that was served
    pub cached_at: DateTime<Utc>,
    /// Path of that artifact inside the cache namespace
    pub path: String,
    pub digest: Option<String>,
    /// True when an existing entry was served, false after a fresh fetch
    pub from_cache: bool,
}

/// Normalize a user supplied digest to bare lower-case hex
///
/// Accepts `sha256:<hex>` or `<hex>`.
pub fn normalize_digest(digest: &str) -> String {
    let digest = digest.trim();
    let hex_part = match digest.split_once(':') {
        Some((algo, rest)) if algo.eq_ignore_ascii_case("sha256") => rest,
        _ => digest,
    };
    hex_part.to_ascii_lowercase()
}
