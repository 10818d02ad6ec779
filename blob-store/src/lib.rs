mod chunk_store;
mod error;
mod store;

pub use chunk_store::{ChunkStore, LocalChunkStore};
pub use error::{StoreError, StoreResult};
pub use store::{BlobMetadata, BlobReadStream, ChunkedBlobStore, CHUNK_SIZE};
