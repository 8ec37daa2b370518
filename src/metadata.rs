//! Artifact metadata service contract
//!
//! The metadata service hands out signed URLs for reading and writing
//! artifacts and keeps their descriptions (creation time, labels). Only
//! the four calls below are used; implementations map their own failures
//! to [`StorageError::Metadata`](crate::StorageError::Metadata).

use crate::error::Result;
use crate::models::{Artifact, LabelFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Request for a new write location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateWriteRequest {
    pub namespace: String,
    pub path: String,
    pub labels: BTreeMap<String, String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Signed upload URL plus the id used to finalize the write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteLocation {
    pub signed_url: String,
    pub write_id: String,
}

/// Request to seal a completed write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeRequest {
    pub namespace: String,
    pub path: String,
    pub write_id: String,
    /// Labels added on top of those given at creation
    pub add_labels: BTreeMap<String, String>,
}

/// Signed download URL plus the artifact description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadLocation {
    pub signed_url: String,
    pub artifact: Artifact,
}

#[async_trait]
pub trait MetadataService: Send + Sync {
    async fn create_write(&self, request: CreateWriteRequest) -> Result<WriteLocation>;

    async fn finalize(&self, request: FinalizeRequest) -> Result<Artifact>;

    async fn create_read(&self, namespace: &str, path: &str) -> Result<ReadLocation>;

    /// List finalized artifacts in `namespaces` whose labels satisfy `filter`
    async fn list(&self, namespaces: &[String], filter: &LabelFilter) -> Result<Vec<Artifact>>;
}
