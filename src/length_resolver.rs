//! Content length resolution ahead of an upload
//!
//! Signed upload URLs require a fixed `Content-Length` and reject chunked
//! transfers, so the length has to be known before the first byte is sent:
//!
//! 1. a positive declared length is trusted as-is
//! 2. seekable content is measured by seeking to the end and back
//! 3. anything else is buffered, in memory up to a limit and in an
//!    anonymous temp file beyond it

use crate::body::Content;
use crate::error::Result;
use bytes::BytesMut;
use futures_util::StreamExt;
use std::io::{Cursor, SeekFrom};
use std::path::Path;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

/// Determine the number of bytes `content` will yield
///
/// # Arguments
/// * `content` - The content to measure
/// * `declared` - Caller supplied length; `None` or `Some(0)` means unknown
/// * `memory_limit` - Bytes buffered in memory before spilling to disk
/// * `spool_dir` - Directory for the spill file (system temp dir if `None`)
///
/// # Returns
/// The content to send (the buffered copy if buffering was needed) and
/// its length.
pub async fn resolve_length(
    content: Content,
    declared: Option<u64>,
    memory_limit: usize,
    spool_dir: Option<&Path>,
) -> Result<(Content, u64)> {
    // zero is the default of an unset option, not an empty body
    if let Some(length) = declared.filter(|&n| n > 0) {
        return Ok((content, length));
    }

    match content {
        Content::Seekable(mut reader) => {
            let start = reader.stream_position().await?;
            let end = reader.seek(SeekFrom::End(0)).await?;
            reader.seek(SeekFrom::Start(start)).await?;
            let length = end.saturating_sub(start);
            debug!("Measured seekable content: length={}", length);
            Ok((Content::Seekable(reader), length))
        }
        Content::Stream(stream) => buffer_stream(stream, memory_limit, spool_dir).await,
    }
}

async fn buffer_stream(
    mut stream: crate::body::ByteStream,
    memory_limit: usize,
    spool_dir: Option<&Path>,
) -> Result<(Content, u64)> {
    let mut memory = BytesMut::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if memory.len() + chunk.len() <= memory_limit {
            memory.extend_from_slice(&chunk);
            continue;
        }

        // over the limit: move what we have to disk and keep going there
        let spill = match spool_dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        let mut file = tokio::fs::File::from_std(spill);
        file.write_all(&memory).await?;
        file.write_all(&chunk).await?;
        let mut length = (memory.len() + chunk.len()) as u64;
        drop(memory);

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            length += chunk.len() as u64;
        }

        file.flush().await?;
        file.seek(SeekFrom::Start(0)).await?;
        debug!("Buffered stream to disk: length={}", length);
        return Ok((Content::from_file(file), length));
    }

    let length = memory.len() as u64;
    debug!("Buffered stream in memory: length={}", length);
    Ok((Content::Seekable(Box::new(Cursor::new(memory.freeze()))), length))
}
