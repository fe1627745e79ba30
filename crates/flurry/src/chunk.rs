//! Bounded, resumable reads of growing blobs with head/tail framing.
//!
//! Blobs such as `{"records":[ ... ]}` carry framing that appears once: a head
//! at the start and a tail at the end. When a writer appends, the old tail is
//! overwritten by new content followed by a new tail. Reads therefore:
//!
//! - skip the head; it is fetched separately and cached per blob
//! - resume `tail_bytes` before the committed offset, where the old tail was
//! - strip the tail from the last chunk of the blob
//!
//! Committed offsets include the tail allowance, so resuming lands exactly on
//! the first byte that was not consumed.

use bytes::Bytes;
use snafu::prelude::*;
use std::collections::HashMap;
use tracing::debug;

use crate::config::FramingConfig;
use crate::error::{FetchSnafu, ReadError};
use crate::store::BlobStoreRef;

/// One fetched window of a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub path: String,
    /// Registry offset the read resumed from.
    pub start_offset: u64,
    /// Blob offset of `data[0]`.
    pub data_start: u64,
    /// Fetched bytes, without head and, on the final chunk, without tail.
    pub data: Bytes,
    /// Blob length observed by the fetch.
    pub content_length: u64,
    pub etag: String,
    /// The fetch reached the end of the blob.
    pub is_final: bool,
    /// Head framing, when requested.
    pub head: Bytes,
    /// Tail framing, when requested.
    pub tail: Bytes,
    tail_bytes: u64,
}

impl Chunk {
    /// Offset to commit once `consumed` bytes of `data` were delivered.
    ///
    /// Never lower than `start_offset`.
    pub fn next_offset(&self, consumed: usize) -> u64 {
        if self.is_final && consumed >= self.data.len() {
            self.content_length
        } else if consumed == 0 {
            self.start_offset
        } else {
            (self.data_start + consumed as u64 + self.tail_bytes).min(self.content_length)
        }
    }

    /// Whether the tail was cut off this chunk.
    pub fn tail_stripped(&self) -> bool {
        self.is_final && self.tail_bytes > 0
    }
}

/// Reads chunks and caches per-blob framing.
pub struct ChunkReader {
    store: BlobStoreRef,
    framing: FramingConfig,
    /// Fetch head/tail bytes for each chunk.
    with_framing: bool,
    heads: HashMap<String, Bytes>,
    tails: HashMap<String, Bytes>,
}

impl ChunkReader {
    pub fn new(store: BlobStoreRef, framing: FramingConfig, with_framing: bool) -> Self {
        Self {
            store,
            framing,
            with_framing,
            heads: HashMap::new(),
            tails: HashMap::new(),
        }
    }

    /// Where data reading starts for a registry offset.
    ///
    /// The tail rewind is clamped to `head_bytes`, not 0, so the head is
    /// never read as data.
    pub fn effective_start(&self, start_offset: u64) -> u64 {
        start_offset
            .saturating_sub(self.framing.tail_bytes)
            .max(self.framing.head_bytes)
    }

    /// Read the next chunk of `path` from `start_offset`.
    ///
    /// `known_length` is the length reported by the listing and bounds the
    /// fetch; the blob may have grown since, which makes the chunk non-final.
    pub async fn read(
        &mut self,
        path: &str,
        start_offset: u64,
        known_length: u64,
    ) -> Result<Chunk, ReadError> {
        let head_bytes = self.framing.head_bytes;
        let tail_bytes = self.framing.tail_bytes;
        let data_start = self.effective_start(start_offset);

        let (content_length, etag, mut data) = if data_start >= known_length {
            // Only framing so far.
            (known_length, String::new(), Bytes::new())
        } else {
            let mut fetch_end = data_start
                .saturating_add(self.framing.max_buffer_size as u64)
                .min(known_length);
            // A window ending inside the tail would leave framing in the data.
            if known_length - fetch_end <= tail_bytes {
                fetch_end = known_length;
            }
            let (meta, bytes) = self
                .store
                .get_range(path, data_start..fetch_end)
                .await
                .context(FetchSnafu {
                    path,
                    offset: data_start,
                })?;
            (meta.content_length, meta.etag, bytes)
        };

        let fetch_end = data_start + data.len() as u64;
        let is_final = fetch_end >= content_length;

        if is_final && tail_bytes > 0 {
            let tail_start = content_length.saturating_sub(tail_bytes);
            let keep = tail_start.saturating_sub(data_start).min(data.len() as u64) as usize;
            let tail = data.split_off(keep);
            if tail.len() as u64 == tail_bytes {
                self.tails.insert(path.to_string(), tail);
            }
        }

        let (head, tail) = if self.with_framing {
            (
                self.head(path, head_bytes).await?,
                self.tail(path, content_length).await?,
            )
        } else {
            (Bytes::new(), Bytes::new())
        };

        debug!(
            blob = %path,
            start_offset,
            data_start,
            len = data.len(),
            content_length,
            is_final,
            "Read chunk"
        );

        Ok(Chunk {
            path: path.to_string(),
            start_offset,
            data_start,
            data,
            content_length,
            etag,
            is_final,
            head,
            tail,
            tail_bytes,
        })
    }

    /// Drop cached framing for a blob.
    pub fn forget(&mut self, path: &str) {
        self.heads.remove(path);
        self.tails.remove(path);
    }

    async fn head(&mut self, path: &str, head_bytes: u64) -> Result<Bytes, ReadError> {
        if head_bytes == 0 {
            return Ok(Bytes::new());
        }
        if let Some(head) = self.heads.get(path) {
            return Ok(head.clone());
        }
        let (_, head) = self
            .store
            .get_range(path, 0..head_bytes)
            .await
            .context(FetchSnafu { path, offset: 0u64 })?;
        self.heads.insert(path.to_string(), head.clone());
        Ok(head)
    }

    async fn tail(&mut self, path: &str, content_length: u64) -> Result<Bytes, ReadError> {
        let tail_bytes = self.framing.tail_bytes;
        if tail_bytes == 0 || content_length < self.framing.head_bytes + tail_bytes {
            return Ok(Bytes::new());
        }
        if let Some(tail) = self.tails.get(path) {
            return Ok(tail.clone());
        }
        let start = content_length - tail_bytes;
        let (_, tail) = self
            .store
            .get_range(path, start..content_length)
            .await
            .context(FetchSnafu {
                path,
                offset: start,
            })?;
        self.tails.insert(path.to_string(), tail.clone());
        Ok(tail)
    }
}
