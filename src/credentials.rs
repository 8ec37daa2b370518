//! Bearer token suppliers for the metadata service

use crate::error::{Result, StorageError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// Issues bearer tokens on demand
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Return a token valid for at least `min_duration`. When `force` is
    /// true any cached token must be bypassed.
    async fn issue_token(&self, min_duration: Duration, force: bool) -> Result<String>;
}

/// A fixed token, mostly useful for tests and short-lived tools
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn issue_token(&self, _min_duration: Duration, _force: bool) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// Reads the token from a file on every call so external refreshers are
/// picked up without a restart
#[derive(Debug, Clone)]
pub struct FileTokenSource {
    path: PathBuf,
}

impl FileTokenSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TokenSource for FileTokenSource {
    async fn issue_token(&self, _min_duration: Duration, _force: bool) -> Result<String> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            StorageError::Credentials(format!("failed to read {}: {}", self.path.display(), e))
        })?;

        let token = raw.trim();
        if token.is_empty() {
            return Err(StorageError::Credentials(format!(
                "token file {} is empty",
                self.path.display()
            )));
        }
        Ok(token.to_string())
    }
}
