//! Storage layers beneath `BlobService`: content on disk, sidecar
//! records, the in-memory namespace and per-key locks.

pub mod engine;
pub mod error;
pub mod index;
pub mod locks;
pub mod metadata_store;
