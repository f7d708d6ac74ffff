//! Defines routes for all container and blob operations.
//!
//! ## Structure
//! - **Service-level endpoints**
//!   - `GET    /`: list containers
//!   - `GET    /_healthz`, `GET /_readyz`: liveness and readiness
//!
//! - **Container-level endpoints**
//!   - `PUT    /{container}`: create container (`?comp=metadata` sets metadata)
//!   - `GET    /{container}`: list blobs (`?prefix=`; `?comp=properties` for properties)
//!   - `HEAD   /{container}`: container properties as headers
//!   - `DELETE /{container}`: delete container and its blobs
//!
//! - **Blob-level endpoints**
//!   - `PUT    /{container}/{*blob}`: upload blob (`?comp=metadata` sets metadata)
//!   - `GET    /{container}/{*blob}`: download blob
//!   - `HEAD   /{container}/{*blob}`: blob properties only
//!   - `DELETE /{container}/{*blob}`: delete blob
//!
//! The wildcard `*blob` allows nested names like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        blob_handlers::{delete_blob, get_blob, head_blob, put_blob},
        container_handlers::{
            delete_container, get_container, head_container, list_containers, put_container,
        },
        health_handlers::{healthz, readyz},
    },
    services::blob_service::BlobService,
};
use axum::{
    Router,
    routing::{get, put},
};

/// Build and return the router for all blob store routes.
///
/// The router carries shared state (`BlobService`) to all handlers.
pub fn routes() -> Router<BlobService> {
    Router::new()
        // health endpoints; `_` keeps them out of the container namespace
        .route("/_healthz", get(healthz))
        .route("/_readyz", get(readyz))
        .route("/", get(list_containers))
        // Blob-level routes
        .route(
            "/{container}/{*blob}",
            put(put_blob)
                .get(get_blob)
                .head(head_blob)
                .delete(delete_blob),
        )
        // Container-level routes
        .route(
            "/{container}",
            get(get_container)
                .put(put_container)
                .head(head_container)
                .delete(delete_container),
        )
}
