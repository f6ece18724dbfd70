pub mod error;
pub mod records;
pub mod state_file;
pub mod store;

pub use error::StorageError;
pub use records::*;
pub use state_file::StateFile;
pub use store::CorrespondenceStore;
