//! Core data models for the blob store.
//!
//! These entities describe containers and blobs as the service sees them.
//! They serialize as JSON via `serde`, both in API responses and in the
//! sidecar files persisted next to blob content.

pub mod blob;
pub mod container;
pub mod metadata;
