//! Remote metadata service client speaking the Connect unary JSON protocol
//!
//! Every call is a `POST {endpoint}/{SERVICE_PATH}/{Method}` with a JSON
//! body and a bearer token. Failures come back as Connect error documents
//! (`{"code": ..., "message": ...}`) and are reported as
//! [`StorageError::MetadataRejected`] carrying the Connect code. Answers
//! without such a document get a code derived from the HTTP status.
//! Calls that never got an answer are [`StorageError::Metadata`].

use crate::config::StowageConfig;
use crate::credentials::TokenSource;
use crate::error::{Result, StorageError};
use crate::metadata::{
    CreateWriteRequest, FinalizeRequest, MetadataService, ReadLocation, WriteLocation,
};
use crate::models::{Artifact, LabelFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Fully qualified service name used in request paths
pub const SERVICE_PATH: &str = "storage.v1beta.ArtifactsService";

/// Minimum validity requested for bearer tokens
const TOKEN_MIN_VALIDITY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireLabel {
    name: String,
    value: String,
}

#[derive(Debug, Clone, Serialize)]
struct WireLabelFilter {
    name: String,
    value: String,
    op: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireArtifact {
    namespace: String,
    path: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    labels: Vec<WireLabel>,
}

impl From<WireArtifact> for Artifact {
    fn from(wire: WireArtifact) -> Self {
        Artifact {
            namespace: wire.namespace,
            path: wire.path,
            created_at: wire.created_at,
            labels: from_wire_labels(wire.labels),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateArtifactRequest {
    namespace: String,
    path: String,
    labels: Vec<WireLabel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateArtifactResponse {
    signed_upload_url: String,
    upload_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FinalizeArtifactRequest {
    namespace: String,
    path: String,
    upload_id: String,
    add_labels: Vec<WireLabel>,
}

#[derive(Debug, Deserialize)]
struct FinalizeArtifactResponse {
    artifact: WireArtifact,
}

#[derive(Debug, Serialize)]
struct ResolveArtifactRequest<'a> {
    namespace: &'a str,
    path: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveArtifactResponse {
    signed_download_url: String,
    artifact: WireArtifact,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListArtifactsRequest<'a> {
    namespaces: &'a [String],
    label_filter: Vec<WireLabelFilter>,
}

#[derive(Debug, Deserialize)]
struct ListArtifactsResponse {
    #[serde(default)]
    artifacts: Vec<WireArtifact>,
}

#[derive(Debug, Deserialize)]
struct ConnectError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

fn to_wire_labels(labels: BTreeMap<String, String>) -> Vec<WireLabel> {
    labels
        .into_iter()
        .map(|(name, value)| WireLabel { name, value })
        .collect()
}

fn from_wire_labels(labels: Vec<WireLabel>) -> BTreeMap<String, String> {
    labels.into_iter().map(|l| (l.name, l.value)).collect()
}

/// Metadata service reached over HTTP
pub struct ConnectMetadataClient {
    client: Client,
    endpoint: String,
    tokens: Arc<dyn TokenSource>,
}

impl ConnectMetadataClient {
    /// Create a client for the configured endpoint
    pub fn new(config: &StowageConfig, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        Ok(Self::with_client(config.http_client()?, &config.endpoint, tokens))
    }

    pub fn with_client(client: Client, endpoint: &str, tokens: Arc<dyn TokenSource>) -> Self {
        ConnectMetadataClient {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}/{}", self.endpoint, SERVICE_PATH, method)
    }

    /// Perform a unary call. A 401 answer is retried once with a freshly
    /// issued token.
    async fn call<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned + Send,
    {
        let mut force_token = false;

        loop {
            let token = self.tokens.issue_token(TOKEN_MIN_VALIDITY, force_token).await?;

            debug!("Calling metadata service: method={}", method);
            let response = self
                .client
                .post(self.method_url(method))
                .bearer_auth(token)
                .json(request)
                .send()
                .await
                .map_err(|e| StorageError::Metadata(format!("{} request failed: {}", method, e)))?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && !force_token {
                warn!("Metadata service rejected token, reissuing: method={}", method);
                force_token = true;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Self::error_from_body(method, status, &body));
            }

            return response.json::<Resp>().await.map_err(|e| {
                StorageError::Metadata(format!("{}: failed to decode response: {}", method, e))
            });
        }
    }

    fn error_from_body(method: &str, status: StatusCode, body: &str) -> StorageError {
        match serde_json::from_str::<ConnectError>(body) {
            Ok(err) if !err.code.is_empty() => StorageError::MetadataRejected {
                code: err.code,
                message: format!("{}: {} (status {})", method, err.message, status.as_u16()),
            },
            _ => StorageError::MetadataRejected {
                code: code_for_status(status).to_string(),
                message: format!("{}: status {}", method, status.as_u16()),
            },
        }
    }
}

/// Connect code implied by an HTTP status when the body carries none
fn code_for_status(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "internal",
        401 => "unauthenticated",
        403 => "permission_denied",
        404 => "unimplemented",
        408 => "deadline_exceeded",
        429 | 502 | 503 | 504 => "unavailable",
        _ => "unknown",
    }
}

#[async_trait]
impl MetadataService for ConnectMetadataClient {
    async fn create_write(&self, request: CreateWriteRequest) -> Result<WriteLocation> {
        let wire = CreateArtifactRequest {
            namespace: request.namespace,
            path: request.path,
            labels: to_wire_labels(request.labels),
            expires_at: request.expires_at,
        };
        let response: CreateArtifactResponse = self.call("CreateArtifact", &wire).await?;
        Ok(WriteLocation {
            signed_url: response.signed_upload_url,
            write_id: response.upload_id,
        })
    }

    async fn finalize(&self, request: FinalizeRequest) -> Result<Artifact> {
        let wire = FinalizeArtifactRequest {
            namespace: request.namespace,
            path: request.path,
            upload_id: request.write_id,
            add_labels: to_wire_labels(request.add_labels),
        };
        let response: FinalizeArtifactResponse = self.call("FinalizeArtifact", &wire).await?;
        Ok(response.artifact.into())
    }

    async fn create_read(&self, namespace: &str, path: &str) -> Result<ReadLocation> {
        let wire = ResolveArtifactRequest { namespace, path };
        let response: ResolveArtifactResponse = self.call("ResolveArtifact", &wire).await?;
        Ok(ReadLocation {
            signed_url: response.signed_download_url,
            artifact: response.artifact.into(),
        })
    }

    async fn list(&self, namespaces: &[String], filter: &LabelFilter) -> Result<Vec<Artifact>> {
        let wire = ListArtifactsRequest {
            namespaces,
            label_filter: filter
                .matches
                .iter()
                .map(|m| WireLabelFilter {
                    name: m.name.clone(),
                    value: m.value.clone(),
                    op: "EQUAL",
                })
                .collect(),
        };
        let response: ListArtifactsResponse = self.call("ListArtifacts", &wire).await?;
        Ok(response.artifacts.into_iter().map(Artifact::from).collect())
    }
}
