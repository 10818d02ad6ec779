use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write chunk {chunk_id}: {source}")]
    ChunkWrite {
        chunk_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read chunk {chunk_id}: {source}")]
    ChunkRead {
        chunk_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read source stream: {0}")]
    Source(#[source] std::io::Error),

    #[error("invalid metadata record: {0}")]
    Metadata(#[from] serde_json::Error),
}
