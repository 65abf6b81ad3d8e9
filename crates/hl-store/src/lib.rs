pub mod blob_store;
pub mod change_feed;
pub mod queue;
pub mod record_store;

pub use blob_store::{BlobStore, MemoryBlobStore};
pub use change_feed::{ChangeFeed, ChangeKind, ChangeRecord};
pub use queue::TaskQueue;
pub use record_store::{CompletionProgress, MemoryRecordStore, RecordStore, StoreError};
