//! Byte stream and upload content types

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, Stream, StreamExt};
use std::io;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek};

/// Chunk size used when turning readers into streams
pub const CHUNK_SIZE: usize = 64 * 1024;

/// A boxed stream of content chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'static>>;

/// Readers that support random access
pub trait SeekableSource: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> SeekableSource for T {}

/// Content handed to an upload
pub enum Content {
    /// Random access source; its length can be computed by seeking
    Seekable(Box<dyn SeekableSource>),
    /// Forward-only stream
    Stream(ByteStream),
}

impl Content {
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Content::Seekable(Box::new(io::Cursor::new(data.into())))
    }

    pub fn from_file(file: tokio::fs::File) -> Self {
        Content::Seekable(Box::new(file))
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Content::Stream(reader_stream(reader))
    }

    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Content::Stream(Box::pin(stream))
    }

    /// Turn the content into a chunk stream, starting at its current position
    pub fn into_stream(self) -> ByteStream {
        match self {
            Content::Seekable(reader) => reader_stream(reader),
            Content::Stream(stream) => stream,
        }
    }
}

/// Adapt an `AsyncRead` into a `ByteStream` of up to `CHUNK_SIZE` chunks
pub fn reader_stream<R>(reader: R) -> ByteStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    Box::pin(stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        match reader.read_buf(&mut buf).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(buf.freeze()), Some(reader))),
            // stop after surfacing the error once
            Err(e) => Some((Err(e), None)),
        }
    }))
}

/// Drain a stream into memory
pub async fn read_to_bytes(mut stream: ByteStream) -> io::Result<Bytes> {
    let mut out = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out.freeze())
}
