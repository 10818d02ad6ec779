use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use tokio::fs;

use crate::error::{StoreError, StoreResult};

/// Trait for storing and fetching chunks by their IDs.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Stores a chunk by its id.
    async fn put_chunk(&self, chunk_id: &str, data: &[u8]) -> StoreResult<()>;

    /// Retrieves a chunk by its id.
    async fn get_chunk(&self, chunk_id: &str) -> StoreResult<Bytes>;

    /// Removes a chunk. Missing chunks are not an error.
    async fn delete_chunk(&self, chunk_id: &str) -> StoreResult<()>;

    /// Lists every chunk id currently persisted.
    async fn list_chunk_ids(&self) -> StoreResult<Vec<String>>;
}

/// A `ChunkStore` that writes each chunk as one file in a local directory.
#[derive(Clone, Debug)]
pub struct LocalChunkStore {
    directory: PathBuf,
}

impl LocalChunkStore {
    /// Opens a chunk store rooted at `directory`, creating it if absent.
    pub async fn open(directory: PathBuf) -> StoreResult<Self> {
        fs::create_dir_all(&directory)
            .await
            .map_err(|source| StoreError::ChunkWrite {
                chunk_id: directory.display().to_string(),
                source,
            })?;
        Ok(Self { directory })
    }
}

#[async_trait]
impl ChunkStore for LocalChunkStore {
    async fn put_chunk(&self, chunk_id: &str, data: &[u8]) -> StoreResult<()> {
        let path = self.directory.join(chunk_id);
        fs::write(path, data)
            .await
            .map_err(|source| StoreError::ChunkWrite {
                chunk_id: chunk_id.to_string(),
                source,
            })
    }

    async fn get_chunk(&self, chunk_id: &str) -> StoreResult<Bytes> {
        let path = self.directory.join(chunk_id);
        let data = fs::read(path)
            .await
            .map_err(|source| StoreError::ChunkRead {
                chunk_id: chunk_id.to_string(),
                source,
            })?;
        Ok(Bytes::from(data))
    }

    async fn delete_chunk(&self, chunk_id: &str) -> StoreResult<()> {
        let path = self.directory.join(chunk_id);
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::ChunkWrite {
                chunk_id: chunk_id.to_string(),
                source,
            }),
        }
    }

    async fn list_chunk_ids(&self) -> StoreResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries =
            fs::read_dir(&self.directory)
                .await
                .map_err(|source| StoreError::ChunkRead {
                    chunk_id: self.directory.display().to_string(),
                    source,
                })?;
        while let Some(entry) =
            entries
                .next_entry()
                .await
                .map_err(|source| StoreError::ChunkRead {
                    chunk_id: self.directory.display().to_string(),
                    source,
                })?
        {
            if let Some(name) = entry.file_name().to_str() {
                ids.push(name.to_string());
            }
        }
        Ok(ids)
    }
}
