//! Integration tests for ArtifactStore upload and resolve

mod common;

use bytes::Bytes;
use common::harness;
use futures_util::stream;
use std::sync::atomic::Ordering;
use stowage::body::read_to_bytes;
use stowage::digest::sha256_hex;
use stowage::{Content, StorageError, StowageConfig, UploadOptions, DIGEST_LABEL};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_upload_then_resolve_round_trip() {
    let h = harness().await;
    let data = b"immutable release payload".to_vec();

    let uploaded = h
        .store
        .upload(
            "releases",
            "tool/v1.tar.gz",
            Content::from_bytes(data.clone()),
            UploadOptions::default().label("team", "infra"),
        )
        .await
        .unwrap();

    assert_eq!(uploaded.digest.as_deref(), Some(sha256_hex(&data).as_str()));

    let (stream, resolved) = h.store.resolve("releases", "tool/v1.tar.gz").await.unwrap();
    let bytes = read_to_bytes(stream).await.unwrap();

    assert_eq!(bytes.as_ref(), data.as_slice());
    assert_eq!(resolved.digest, uploaded.digest);
    assert_eq!(resolved.created_at, uploaded.created_at);

    let artifact = &h.metadata.artifacts()[0];
    assert_eq!(artifact.labels.get("team").map(String::as_str), Some("infra"));
    assert_eq!(artifact.digest(), uploaded.digest.as_deref());
}

#[tokio::test]
async fn test_upload_performs_one_create_and_one_finalize() {
    let h = harness().await;

    h.store
        .upload("ns", "a", Content::from_bytes(&b"abc"[..]), UploadOptions::default())
        .await
        .unwrap();

    assert_eq!(h.metadata.create_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.metadata.finalize_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.objects.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_non_seekable_upload_sends_exact_length() {
    let h = harness().await;
    let chunks: Vec<std::io::Result<Bytes>> = vec![
        Ok(Bytes::from_static(b"streamed ")),
        Ok(Bytes::from_static(b"without ")),
        Ok(Bytes::from_static(b"a length")),
    ];
    let expected: Vec<u8> = b"streamed without a length".to_vec();

    // takes priority over the generic PUT handler; anything else answers 404
    Mock::given(method("PUT"))
        .and(path("/objects/1"))
        .and(header("content-length", expected.len().to_string().as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .with_priority(1)
        .mount(&h.object_server)
        .await;

    let info = h
        .store
        .upload(
            "ns",
            "streamed",
            Content::from_stream(stream::iter(chunks)),
            UploadOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(info.digest.as_deref(), Some(sha256_hex(&expected).as_str()));
}

#[tokio::test]
async fn test_stream_upload_spills_past_memory_limit() {
    let config = StowageConfig {
        max_memory_buffer: 16,
        ..Default::default()
    };
    let h = common::harness_with_config(config).await;

    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let chunks: Vec<std::io::Result<Bytes>> = data
        .chunks(1000)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();

    let info = h
        .store
        .upload(
            "ns",
            "large",
            Content::from_stream(stream::iter(chunks)),
            UploadOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(info.digest.as_deref(), Some(sha256_hex(&data).as_str()));
    let (stream, _) = h.store.resolve("ns", "large").await.unwrap();
    assert_eq!(read_to_bytes(stream).await.unwrap().as_ref(), data.as_slice());
}

#[tokio::test]
async fn test_rejected_put_is_transport_error() {
    let h = harness().await;

    Mock::given(method("PUT"))
        .and(path("/objects/1"))
        .respond_with(ResponseTemplate::new(403).set_body_string("signature expired"))
        .with_priority(1)
        .mount(&h.object_server)
        .await;

    let result = h
        .store
        .upload("ns", "a", Content::from_bytes(&b"abc"[..]), UploadOptions::default())
        .await;

    match result {
        Err(StorageError::Transport { status, message }) => {
            assert_eq!(status, Some(403));
            assert!(message.contains("403"));
        }
        other => panic!("expected transport error, got {:?}", other.map(|_| ())),
    }
    // nothing is finalized after a failed PUT
    assert_eq!(h.metadata.finalize_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_metadata_errors_propagate_unchanged() {
    let h = harness().await;
    h.metadata.fail_all.store(true, Ordering::SeqCst);

    let result = h
        .store
        .upload("ns", "a", Content::from_bytes(&b"abc"[..]), UploadOptions::default())
        .await;
    assert!(matches!(result, Err(StorageError::Metadata(ref m)) if m == "service unavailable"));

    let result = h.store.resolve("ns", "a").await;
    assert!(matches!(result, Err(StorageError::Metadata(_))));
}

#[tokio::test]
async fn test_resolve_missing_object_is_transport_error() {
    let h = harness().await;
    h.store
        .upload("ns", "a", Content::from_bytes(&b"abc"[..]), UploadOptions::default())
        .await
        .unwrap();
    h.objects.lock().unwrap().clear();

    let result = h.store.resolve("ns", "a").await;
    assert!(matches!(
        result,
        Err(StorageError::Transport { status: Some(404), .. })
    ));
}

#[tokio::test]
async fn test_resolve_without_digest_label() {
    let h = harness().await;
    h.store
        .upload("ns", "a", Content::from_bytes(&b"abc"[..]), UploadOptions::default())
        .await
        .unwrap();

    // an artifact written by another client without a digest label
    h.metadata.strip_label(DIGEST_LABEL);

    let (_, info) = h.store.resolve("ns", "a").await.unwrap();
    assert!(info.digest.is_none());
}
