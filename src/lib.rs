//! blob-store: a file-backed container/blob store.
//!
//! Containers hold named blobs with content types and user metadata.
//! Content lives on local disk, published atomically; an in-memory index
//! answers lookups and listings and is rebuilt from sidecar files when the
//! store is opened. [`BlobService`] is the in-process API; [`app`] wraps it
//! in an axum router.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod storage;

pub use services::blob_service::{BlobService, DownloadedBlob, ServiceConfig, UploadOptions};
pub use storage::error::{ErrorKind, StorageError, StorageResult};

/// Router with all routes, bound to `service`.
pub fn app(service: BlobService) -> axum::Router {
    routes::routes::routes().with_state(service)
}
