use std::path::Path;

use actix_files::NamedFile;
use actix_multipart::MultipartError;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use blob_store::{BlobMetadata, ChunkedBlobStore};
use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

use crate::errors::AttachmentError;

/// Filename advertised on every download, matching the fixed
/// `attachment; filename=parallel.png` disposition of the service.
const DOWNLOAD_FILENAME: &str = "parallel.png";

/// Stages the inbound byte stream to a local temp file, then commits the
/// staged content to the blob store under `key`.
///
/// The staging file is removed when this call returns, on success and on
/// every failure path (drop semantics of `NamedTempFile`).
pub async fn upload(
    store: &ChunkedBlobStore,
    staging_dir: &Path,
    key: &str,
    mut source: impl Stream<Item = Result<Bytes, MultipartError>> + Unpin,
) -> Result<BlobMetadata, AttachmentError> {
    let staging = NamedTempFile::new_in(staging_dir).map_err(AttachmentError::Staging)?;

    let mut out =
        tokio::fs::File::from_std(staging.reopen().map_err(AttachmentError::Staging)?);
    while let Some(chunk) = source.try_next().await? {
        out.write_all(&chunk)
            .await
            .map_err(AttachmentError::Staging)?;
    }
    out.flush().await.map_err(AttachmentError::Staging)?;

    // The full payload is staged; only now does the store see any of it.
    let reader = tokio::fs::File::open(staging.path())
        .await
        .map_err(AttachmentError::Staging)?;
    let meta = store.store(key, reader).await?;
    Ok(meta)
}

/// Resolves `key`, stages the full blob to a local temp file and opens it
/// for a sendfile-backed transfer with the fixed attachment headers.
///
/// `Ok(None)` is a lookup miss, not an error. The staging file is
/// unlinked before returning; the open descriptor inside the returned
/// `NamedFile` keeps the bytes readable until the transfer completes.
pub async fn download(
    store: &ChunkedBlobStore,
    staging_dir: &Path,
    key: &str,
) -> Result<Option<NamedFile>, AttachmentError> {
    let Some(meta) = store.find_by_key(key) else {
        tracing::error!("stored file {} not exists", key);
        return Ok(None);
    };

    let staging = NamedTempFile::new_in(staging_dir).map_err(AttachmentError::Staging)?;
    let mut out =
        tokio::fs::File::from_std(staging.reopen().map_err(AttachmentError::Staging)?);
    let mut stream = store.open_read_stream(&meta);
    while let Some(chunk) = stream.next_chunk().await? {
        out.write_all(&chunk)
            .await
            .map_err(AttachmentError::Staging)?;
    }
    out.flush().await.map_err(AttachmentError::Staging)?;

    let file = NamedFile::open_async(staging.path())
        .await
        .map_err(AttachmentError::Staging)?
        .set_content_type(mime::IMAGE_PNG)
        .set_content_disposition(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(DOWNLOAD_FILENAME.to_string())],
        });
    Ok(Some(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use blob_store::{ChunkedBlobStore, LocalChunkStore, CHUNK_SIZE};
    use futures_util::stream;
    use std::io::Read;
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn open_store(dir: &Path) -> ChunkedBlobStore {
        let chunks = LocalChunkStore::open(dir.to_path_buf()).await.unwrap();
        ChunkedBlobStore::open(Arc::new(chunks)).await.unwrap()
    }

    fn body_stream(
        parts: Vec<Vec<u8>>,
    ) -> impl Stream<Item = Result<Bytes, MultipartError>> + Unpin {
        stream::iter(parts.into_iter().map(|p| Ok(Bytes::from(p))))
    }

    fn read_named_file(file: &NamedFile) -> Vec<u8> {
        let mut out = Vec::new();
        let mut f = file.file();
        f.read_to_end(&mut out).unwrap();
        out
    }

    #[tokio::test]
    async fn upload_then_download_round_trips() {
        let data_dir = tempdir().unwrap();
        let staging_dir = tempdir().unwrap();
        let store = open_store(data_dir.path()).await;

        let content: Vec<u8> = (0..CHUNK_SIZE + 17).map(|i| (i % 256) as u8).collect();
        let meta = upload(
            &store,
            staging_dir.path(),
            "pic",
            body_stream(content.chunks(4096).map(|c| c.to_vec()).collect()),
        )
        .await
        .unwrap();
        assert_eq!(meta.length, content.len() as u64);

        let file = download(&store, staging_dir.path(), "pic")
            .await
            .unwrap()
            .expect("stored key must resolve");
        assert_eq!(read_named_file(&file), content);
    }

    #[tokio::test]
    async fn download_miss_is_none() {
        let data_dir = tempdir().unwrap();
        let staging_dir = tempdir().unwrap();
        let store = open_store(data_dir.path()).await;

        let result = download(&store, staging_dir.path(), "never-uploaded")
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn staging_files_are_released() {
        let data_dir = tempdir().unwrap();
        let staging_dir = tempdir().unwrap();
        let store = open_store(data_dir.path()).await;

        upload(
            &store,
            staging_dir.path(),
            "k",
            body_stream(vec![b"payload".to_vec()]),
        )
        .await
        .unwrap();
        let file = download(&store, staging_dir.path(), "k").await.unwrap();
        drop(file);

        // Both pipelines have finished; their staging files are gone.
        assert_eq!(
            std::fs::read_dir(staging_dir.path()).unwrap().count(),
            0,
            "staging dir must be empty after the exchanges"
        );
    }

    #[tokio::test]
    async fn staging_released_when_upload_source_fails() {
        let data_dir = tempdir().unwrap();
        let staging_dir = tempdir().unwrap();
        let store = open_store(data_dir.path()).await;

        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(MultipartError::Incomplete),
        ]);
        let err = upload(&store, staging_dir.path(), "k", source)
            .await
            .unwrap_err();
        assert!(matches!(err, AttachmentError::Multipart(_)));

        assert_eq!(
            std::fs::read_dir(staging_dir.path()).unwrap().count(),
            0,
            "staging file must be released on upload failure"
        );
        assert!(store.find_by_key("k").is_none());
    }

    #[tokio::test]
    async fn staging_released_when_download_read_fails() {
        let data_dir = tempdir().unwrap();
        let staging_dir = tempdir().unwrap();
        let store = open_store(data_dir.path()).await;

        upload(
            &store,
            staging_dir.path(),
            "k",
            body_stream(vec![b"payload".to_vec()]),
        )
        .await
        .unwrap();

        // Remove the chunk files behind the store's back so the staged
        // read fails partway through.
        for entry in std::fs::read_dir(data_dir.path()).unwrap() {
            let entry = entry.unwrap();
            if !entry.file_name().to_string_lossy().ends_with(".meta") {
                std::fs::remove_file(entry.path()).unwrap();
            }
        }

        let err = download(&store, staging_dir.path(), "k")
            .await
            .unwrap_err();
        assert!(matches!(err, AttachmentError::Storage(_)));
        assert_eq!(
            std::fs::read_dir(staging_dir.path()).unwrap().count(),
            0,
            "staging file must be released on download failure"
        );
    }

    #[tokio::test]
    async fn download_survives_staging_unlink() {
        // The staging file is unlinked before the NamedFile is consumed;
        // the descriptor must still serve the bytes.
        let data_dir = tempdir().unwrap();
        let staging_dir = tempdir().unwrap();
        let store = open_store(data_dir.path()).await;

        upload(
            &store,
            staging_dir.path(),
            "k",
            body_stream(vec![vec![0xAB; 1024]]),
        )
        .await
        .unwrap();

        let file = download(&store, staging_dir.path(), "k")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(std::fs::read_dir(staging_dir.path()).unwrap().count(), 0);
        assert_eq!(read_named_file(&file), vec![0xAB; 1024]);
    }
}
