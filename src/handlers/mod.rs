pub mod blob_handlers;
pub mod container_handlers;
pub mod headers;
pub mod health_handlers;
