//! Streaming SHA-256 over content as it passes through
//!
//! A [`DigestStream`] hashes every chunk it yields. Because the stream is
//! usually moved into an HTTP request body, the running state lives behind
//! a [`DigestHandle`] that the caller keeps and reads once the stream is
//! exhausted.

use crate::body::ByteStream;
use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

#[derive(Default)]
struct DigestState {
    hasher: Sha256,
    bytes: u64,
}

/// Read side of a [`DigestStream`]
#[derive(Clone)]
pub struct DigestHandle {
    state: Arc<Mutex<DigestState>>,
}

impl DigestHandle {
    fn lock(&self) -> MutexGuard<'_, DigestState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of bytes hashed so far
    pub fn bytes_processed(&self) -> u64 {
        self.lock().bytes
    }

    /// Lower-case hex digest of everything hashed so far
    pub fn hex_digest(&self) -> String {
        hex::encode(self.lock().hasher.clone().finalize())
    }
}

/// Stream adapter computing a SHA-256 of the bytes it yields
pub struct DigestStream {
    inner: ByteStream,
    handle: DigestHandle,
}

impl DigestStream {
    pub fn new(inner: ByteStream) -> (Self, DigestHandle) {
        let handle = DigestHandle {
            state: Arc::new(Mutex::new(DigestState::default())),
        };
        (
            Self {
                inner,
                handle: handle.clone(),
            },
            handle,
        )
    }
}

impl Stream for DigestStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.poll_next_unpin(cx);
        if let Poll::Ready(Some(Ok(ref chunk))) = polled {
            let mut state = self.handle.lock();
            state.hasher.update(chunk);
            state.bytes += chunk.len() as u64;
        }
        polled
    }
}

/// Hex SHA-256 of an in-memory buffer
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
