//! Pipeline errors

use std::path::PathBuf;
use thiserror::Error;

use kestrel_net::FetchError;
use kestrel_store::StoreError;

/// Errors that end a collector or scorer run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Model file not found: {}. Run the train command to create a model.", .0.display())]
    ModelNotFound(PathBuf),

    #[error("Invalid model {}: {reason}", .path.display())]
    InvalidModel { path: PathBuf, reason: String },

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Malformed page: {0}")]
    MalformedPage(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
