use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid feature id: {0}")]
    InvalidId(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}
