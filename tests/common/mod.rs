//! Shared fixtures: an in-memory metadata service whose signed URLs point
//! at a wiremock object store

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use stowage::metadata::{
    CreateWriteRequest, FinalizeRequest, MetadataService, ReadLocation, WriteLocation,
};
use stowage::{Artifact, ArtifactStore, LabelFilter, Result, StorageError, StowageConfig};
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Objects held by the fake object store, keyed by URL path
pub type ObjectMap = Arc<Mutex<HashMap<String, Vec<u8>>>>;

#[derive(Default)]
struct FakeState {
    next_id: u64,
    pending: HashMap<String, (u64, CreateWriteRequest)>,
    artifacts: Vec<(u64, Artifact)>,
    last_created_at: Option<DateTime<Utc>>,
}

/// In-memory `MetadataService`
pub struct FakeMetadata {
    object_store: String,
    state: Mutex<FakeState>,
    pub list_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub finalize_calls: AtomicUsize,
    pub fail_all: AtomicBool,
}

impl FakeMetadata {
    pub fn new(object_store: &str) -> Self {
        FakeMetadata {
            object_store: object_store.to_string(),
            state: Mutex::new(FakeState::default()),
            list_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            finalize_calls: AtomicUsize::new(0),
            fail_all: AtomicBool::new(false),
        }
    }

    fn object_url(&self, id: u64) -> String {
        format!("{}/objects/{}?X-Signature=test", self.object_store, id)
    }

    fn check_available(&self) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(StorageError::Metadata("service unavailable".to_string()));
        }
        Ok(())
    }

    /// Finalized artifacts in creation order
    pub fn artifacts(&self) -> Vec<Artifact> {
        let state = self.state.lock().unwrap();
        state.artifacts.iter().map(|(_, a)| a.clone()).collect()
    }

    /// Rewrite the creation time of every artifact under `namespace`
    pub fn backdate(&self, namespace: &str, created_at: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        for (_, artifact) in state.artifacts.iter_mut() {
            if artifact.namespace == namespace {
                artifact.created_at = created_at;
            }
        }
    }

    /// Remove a label from every artifact
    pub fn strip_label(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        for (_, artifact) in state.artifacts.iter_mut() {
            artifact.labels.remove(name);
        }
    }
}

#[async_trait]
impl MetadataService for FakeMetadata {
    async fn create_write(&self, request: CreateWriteRequest) -> Result<WriteLocation> {
        self.check_available()?;
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        let write_id = format!("write-{}", id);
        state.pending.insert(write_id.clone(), (id, request));

        Ok(WriteLocation {
            signed_url: self.object_url(id),
            write_id,
        })
    }

    async fn finalize(&self, request: FinalizeRequest) -> Result<Artifact> {
        self.check_available()?;
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();
        let (id, created) = state
            .pending
            .remove(&request.write_id)
            .ok_or_else(|| StorageError::Metadata(format!("unknown write {}", request.write_id)))?;

        if created.namespace != request.namespace || created.path != request.path {
            return Err(StorageError::Metadata("write does not match artifact".to_string()));
        }

        // strictly increasing so "latest" is well defined in tests
        let mut created_at = Utc::now();
        if let Some(last) = state.last_created_at {
            if created_at <= last {
                created_at = last + chrono::Duration::microseconds(1);
            }
        }
        state.last_created_at = Some(created_at);

        let mut labels: BTreeMap<String, String> = created.labels;
        labels.extend(request.add_labels);

        let artifact = Artifact {
            namespace: request.namespace,
            path: request.path,
            created_at,
            labels,
        };
        state.artifacts.push((id, artifact.clone()));
        Ok(artifact)
    }

    async fn create_read(&self, namespace: &str, path: &str) -> Result<ReadLocation> {
        self.check_available()?;

        let state = self.state.lock().unwrap();
        let (id, artifact) = state
            .artifacts
            .iter()
            .rev()
            .find(|(_, a)| a.namespace == namespace && a.path == path)
            .cloned()
            .ok_or_else(|| StorageError::Metadata(format!("{}/{} not found", namespace, path)))?;

        Ok(ReadLocation {
            signed_url: self.object_url(id),
            artifact,
        })
    }

    async fn list(&self, namespaces: &[String], filter: &LabelFilter) -> Result<Vec<Artifact>> {
        self.check_available()?;
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let state = self.state.lock().unwrap();
        Ok(state
            .artifacts
            .iter()
            .map(|(_, a)| a)
            .filter(|a| namespaces.contains(&a.namespace) && filter.matches(&a.labels))
            .cloned()
            .collect())
    }
}

/// Mount PUT/GET handlers emulating a signed-URL object store
pub async fn mount_object_store(server: &MockServer) -> ObjectMap {
    let objects: ObjectMap = Arc::new(Mutex::new(HashMap::new()));

    let store = Arc::clone(&objects);
    Mock::given(method("PUT"))
        .and(path_regex("^/objects/[0-9]+$"))
        .respond_with(move |req: &wiremock::Request| {
            store
                .lock()
                .unwrap()
                .insert(req.url.path().to_string(), req.body.clone());
            ResponseTemplate::new(200)
        })
        .mount(server)
        .await;

    let store = Arc::clone(&objects);
    Mock::given(method("GET"))
        .and(path_regex("^/objects/[0-9]+$"))
        .respond_with(move |req: &wiremock::Request| {
            match store.lock().unwrap().get(req.url.path()) {
                Some(body) => ResponseTemplate::new(200).set_body_bytes(body.clone()),
                None => ResponseTemplate::new(404),
            }
        })
        .mount(server)
        .await;

    objects
}

/// Everything needed to drive an `ArtifactStore` against fakes
pub struct Harness {
    pub object_server: MockServer,
    pub objects: ObjectMap,
    pub metadata: Arc<FakeMetadata>,
    pub config: StowageConfig,
    pub store: ArtifactStore,
}

pub async fn harness() -> Harness {
    harness_with_config(StowageConfig::default()).await
}

pub async fn harness_with_config(config: StowageConfig) -> Harness {
    let object_server = MockServer::start().await;
    let objects = mount_object_store(&object_server).await;
    let metadata = Arc::new(FakeMetadata::new(&object_server.uri()));
    let store = ArtifactStore::new(metadata.clone(), &config).unwrap();

    Harness {
        object_server,
        objects,
        metadata,
        config,
        store,
    }
}
