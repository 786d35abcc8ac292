//! Reconciles locally minted job ids with the ids the remote document store
//! assigns once a job is persisted.
//!
//! The mapping is advisory: reads that fail look like "not mapped" and writes
//! that fail are dropped, so callers must treat it as a best-effort cache.

pub mod config;
pub mod record;
pub mod storage;
pub mod store;

pub use config::{ConfigError, StoreConfig};
pub use record::{EMPTY_COLLECTION_TEXT, MappingRecord, NewMapping};
#[cfg(target_arch = "wasm32")]
pub use storage::LocalStorage;
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage, StorageError};
pub use store::{JobIdMappingStore, Lookup, MappingStoreError, StoreFailure};
