//! # TaskGenius Cache
//!
//! Persistent key-value storage used by the task index to survive restarts.
//!
//! ## Features
//!
//! - **Pluggable backends**: in-memory and on-disk storage behind one async trait
//! - **Compression**: optional gzip for large blobs on disk
//! - **Versioned envelopes**: every stored blob carries a format version, and a
//!   blob written by an incompatible version is discarded instead of migrated

pub mod error;
pub mod storage;
pub mod store;

pub use error::{CacheError, CacheResult};
pub use storage::{CacheStorage, DiskStorage, MemoryStorage};
pub use store::{CacheEnvelope, PersistentStore, VersionedStore};
