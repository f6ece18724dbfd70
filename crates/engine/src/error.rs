use debrief_core::CoreError;
use debrief_storage::StorageError;
use thiserror::Error;

use crate::session::SessionError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("map session error: {0}")]
    Session(#[from] SessionError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("nothing to print for outing: {0}")]
    NothingToPrint(String),

    #[error("event channel closed")]
    ChannelClosed,
}
