use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("I/O error: {0}")]
    StdIoError(#[from] std::io::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Path already exists: {0}")]
    AlreadyExists(String),

    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("Git error: {0}")]
    GitError(String),

    #[error("Dialog error: {0}")]
    DialogError(String),

    #[error("No folder selected")]
    NoFolderSelected,

    #[error("Edit error: {0}")]
    EditError(String),

    #[error("Serde JSON error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    #[error("Invalid input argument: {0}")]
    InvalidInputArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            AppError::Internal("handler panicked".to_string())
        } else {
            AppError::Internal(format!("handler task cancelled: {}", err))
        }
    }
}

impl From<regex::Error> for AppError {
    fn from(err: regex::Error) -> Self {
        AppError::EditError(err.to_string())
    }
}
