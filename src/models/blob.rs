//! Represents a blob (named byte sequence) stored in a container.

use crate::models::metadata::Metadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A blob record, persisted as the blob's sidecar file.
///
/// The record describes the content, it does not hold the bytes. The bytes
/// live in `content_file`, which sits next to the sidecar on disk.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Blob {
    /// Id of the owning container.
    pub container_id: Uuid,

    /// Blob name, unique within the container. May contain `/`.
    pub name: String,

    /// Content type (MIME type).
    pub content_type: String,

    /// Size of the stored content in bytes.
    pub size_bytes: u64,

    /// Hex MD5 of the content.
    pub etag: String,

    /// Base64 MD5 of the content, as reported in `Content-MD5`.
    pub content_md5: String,

    /// When the blob was first uploaded. Overwrites keep this value.
    pub created_at: DateTime<Utc>,

    /// Bumped on every content or metadata change.
    pub last_modified: DateTime<Utc>,

    /// User-defined metadata.
    #[serde(default)]
    pub metadata: Metadata,

    /// File name of the current content version inside the blob's shard directory.
    pub content_file: String,
}

/// Returned by a successful upload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UploadReceipt {
    pub uri: String,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}
