use actix_web::{HttpResponse, ResponseError};
use blob_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("Failed to stage attachment locally")]
    Staging(#[source] std::io::Error),

    #[error("Attachment storage failed")]
    Storage(#[from] StoreError),

    #[error("Failed to parse multipart payload")]
    Multipart(#[from] actix_multipart::MultipartError),

    #[error("Multipart body has no file part")]
    MissingFilePart,
}

impl ResponseError for AttachmentError {
    fn error_response(&self) -> HttpResponse {
        match self {
            AttachmentError::Multipart(_) | AttachmentError::MissingFilePart => {
                HttpResponse::BadRequest().body(self.to_string())
            }
            AttachmentError::Staging(_) | AttachmentError::Storage(_) => {
                HttpResponse::InternalServerError().body(self.to_string())
            }
        }
    }
}
