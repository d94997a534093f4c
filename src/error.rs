use thiserror::Error;

use crate::model::{ModelError, PreprocessError};

/// Why an `/identify` request ended back on the upload form.
#[derive(Debug, Error)]
pub enum IdentifyError {
    #[error("model not loaded")]
    ModelUnavailable,

    #[error("no image field in upload")]
    MissingImage,

    #[error("malformed multipart body: {0}")]
    Multipart(#[from] axum::extract::multipart::MultipartError),

    #[error(transparent)]
    UnreadableImage(#[from] PreprocessError),

    #[error("failed to store upload: {0}")]
    Storage(#[from] std::io::Error),

    #[error("inference failed: {0}")]
    Inference(#[from] ModelError),

    #[error("inference worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl IdentifyError {
    /// Text shown to the user; internal detail stays in the logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            IdentifyError::ModelUnavailable => "Model not loaded",
            IdentifyError::MissingImage => "No image uploaded",
            IdentifyError::Multipart(_) => "The upload could not be read. Please try again.",
            IdentifyError::UnreadableImage(_) => {
                "The uploaded file is not an image we can read. Please upload a JPEG or PNG photo."
            }
            IdentifyError::Storage(_) => "The image could not be saved. Please try again.",
            IdentifyError::Inference(_) | IdentifyError::Worker(_) => {
                "The leaf could not be analysed. Please try again later."
            }
        }
    }

    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            IdentifyError::MissingImage | IdentifyError::Multipart(_) | IdentifyError::UnreadableImage(_)
        )
    }
}
