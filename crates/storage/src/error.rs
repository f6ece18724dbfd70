use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("outing not found: {0}")]
    OutingNotFound(String),

    #[error("outing already exists: {0}")]
    OutingExists(String),

    #[error("core error: {0}")]
    Core(#[from] debrief_core::CoreError),
}
