//! I/O abstraction layer for reading load sources

pub mod blob;

pub use blob::{BlobStore, LocalBlobStore};
