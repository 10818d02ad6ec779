use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use crate::chunk_store::ChunkStore;
use crate::error::{StoreError, StoreResult};

/// Fixed chunk size. Bounds per-write memory so blobs larger than RAM
/// can be stored without buffering them whole.
pub const CHUNK_SIZE: usize = 256 * 1024;

const META_SUFFIX: &str = ".meta";

/// One record per committed blob. Immutable after commit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub id: Uuid,
    pub key: String,
    pub length: u64,
    /// Store-wide monotonic commit counter. Repeated uploads under one
    /// key accumulate records; lookup returns the highest revision.
    pub revision: u64,
    pub created_at_ms: u64,
}

impl BlobMetadata {
    fn chunk_count(&self) -> u64 {
        self.length.div_ceil(CHUNK_SIZE as u64)
    }
}

/// Blob storage that splits content into fixed-size chunks behind a
/// `ChunkStore` backend and keeps a key index of committed metadata.
///
/// The metadata record is persisted only after every chunk, so a lookup
/// can never observe a partially written blob.
pub struct ChunkedBlobStore {
    chunks: Arc<dyn ChunkStore>,
    index: DashMap<String, Vec<BlobMetadata>>,
    next_revision: AtomicU64,
}

impl ChunkedBlobStore {
    /// Opens the store over `chunks`, rebuilding the key index from the
    /// metadata records already persisted in the backend.
    pub async fn open(chunks: Arc<dyn ChunkStore>) -> StoreResult<Self> {
        let index: DashMap<String, Vec<BlobMetadata>> = DashMap::new();
        let mut max_revision = 0u64;

        for chunk_id in chunks.list_chunk_ids().await? {
            if !chunk_id.ends_with(META_SUFFIX) {
                continue;
            }
            let raw = chunks.get_chunk(&chunk_id).await?;
            let meta: BlobMetadata = match serde_json::from_slice(&raw) {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!("skipping unreadable metadata record {}: {}", chunk_id, e);
                    continue;
                }
            };
            max_revision = max_revision.max(meta.revision);
            index.entry(meta.key.clone()).or_default().push(meta);
        }

        Ok(Self {
            chunks,
            index,
            next_revision: AtomicU64::new(max_revision + 1),
        })
    }

    /// Consumes `source` to completion, persisting its bytes as chunks
    /// followed by a metadata record tagged with `key`.
    ///
    /// On any write failure the already-written chunks are deleted
    /// best-effort and no metadata becomes visible to lookups.
    pub async fn store<R>(&self, key: &str, mut source: R) -> StoreResult<BlobMetadata>
    where
        R: AsyncRead + Unpin + Send,
    {
        let id = Uuid::new_v4();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut seq = 0u64;
        let mut length = 0u64;

        loop {
            let filled = match fill_buf(&mut source, &mut buf).await {
                Ok(filled) => filled,
                Err(e) => {
                    self.abort(id, seq).await;
                    return Err(StoreError::Source(e));
                }
            };
            if filled == 0 {
                break;
            }
            if let Err(e) = self
                .chunks
                .put_chunk(&chunk_id(id, seq), &buf[..filled])
                .await
            {
                self.abort(id, seq).await;
                return Err(e);
            }
            length += filled as u64;
            seq += 1;
        }

        let meta = BlobMetadata {
            id,
            key: key.to_string(),
            length,
            revision: self.next_revision.fetch_add(1, Ordering::SeqCst),
            created_at_ms: now_ms(),
        };
        let raw = serde_json::to_vec(&meta)?;
        if let Err(e) = self.chunks.put_chunk(&meta_id(id), &raw).await {
            self.abort(id, seq).await;
            return Err(e);
        }

        self.index
            .entry(key.to_string())
            .or_default()
            .push(meta.clone());
        tracing::info!(
            "committed blob {} under key {} ({} bytes, {} chunks)",
            id,
            key,
            length,
            seq
        );
        Ok(meta)
    }

    /// Returns the most recently committed record for `key`, if any.
    pub fn find_by_key(&self, key: &str) -> Option<BlobMetadata> {
        self.index
            .get(key)?
            .iter()
            .max_by_key(|meta| meta.revision)
            .cloned()
    }

    /// Opens a forward-only stream over the blob's chunks, in order.
    pub fn open_read_stream(&self, metadata: &BlobMetadata) -> BlobReadStream {
        BlobReadStream {
            chunks: self.chunks.clone(),
            id: metadata.id,
            next_seq: 0,
            chunk_count: metadata.chunk_count(),
        }
    }

    async fn abort(&self, id: Uuid, written: u64) {
        for seq in 0..written {
            if let Err(e) = self.chunks.delete_chunk(&chunk_id(id, seq)).await {
                tracing::error!("failed to remove orphan chunk {}.{}: {}", id, seq, e);
            }
        }
        tracing::warn!("aborted store of blob {}, removed {} chunks", id, written);
    }
}

/// Sequential reader over one blob's chunks.
pub struct BlobReadStream {
    chunks: Arc<dyn ChunkStore>,
    id: Uuid,
    next_seq: u64,
    chunk_count: u64,
}

impl BlobReadStream {
    /// Yields the next chunk, or `None` once the blob is fully read.
    pub async fn next_chunk(&mut self) -> StoreResult<Option<Bytes>> {
        if self.next_seq == self.chunk_count {
            return Ok(None);
        }
        let data = self.chunks.get_chunk(&chunk_id(self.id, self.next_seq)).await?;
        self.next_seq += 1;
        Ok(Some(data))
    }
}

fn chunk_id(id: Uuid, seq: u64) -> String {
    format!("{}.{}", id, seq)
}

fn meta_id(id: Uuid) -> String {
    format!("{}{}", id, META_SUFFIX)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Reads from `source` until `buf` is full or the stream ends, returning
/// the number of bytes read.
async fn fill_buf<R>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
