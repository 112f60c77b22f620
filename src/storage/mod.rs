mod directories;
mod files;
pub mod models;
pub mod snapshot;
pub mod store;

pub use models::{DirectoryRecord, FileRecord, FileStatus, MediaClass, Settings};
pub use snapshot::Snapshot;
pub use store::{Store, StoreError};
