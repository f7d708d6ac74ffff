use std::{io, path::PathBuf};
use thiserror::Error;

/// Caller-facing classification of a [`StorageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidName,
    IoFailure,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("container `{0}` not found")]
    ContainerNotFound(String),
    #[error("container `{0}` already exists")]
    ContainerAlreadyExists(String),
    #[error("container `{name}` invalid: {reason}")]
    InvalidContainerName { name: String, reason: String },
    #[error("blob `{blob}` not found in container `{container}`")]
    BlobNotFound { container: String, blob: String },
    #[error("blob name invalid: {0}")]
    InvalidBlobName(String),
    #[error("metadata key `{key}` invalid: {reason}")]
    InvalidMetadata { key: String, reason: String },
    #[error("content file {} is missing", .0.display())]
    ContentNotFound(PathBuf),
    #[error("operation cancelled: {0}")]
    Cancelled(String),
    #[error("sidecar {} is corrupt: {source}", .path.display())]
    CorruptSidecar {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::ContainerNotFound(_)
            | StorageError::BlobNotFound { .. }
            | StorageError::ContentNotFound(_) => ErrorKind::NotFound,
            StorageError::ContainerAlreadyExists(_) => ErrorKind::AlreadyExists,
            StorageError::InvalidContainerName { .. }
            | StorageError::InvalidBlobName(_)
            | StorageError::InvalidMetadata { .. } => ErrorKind::InvalidName,
            StorageError::Cancelled(_) => ErrorKind::Cancelled,
            StorageError::CorruptSidecar { .. } | StorageError::Io(_) => ErrorKind::IoFailure,
        }
    }

    /// Stable machine-readable code, reported alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::ContainerNotFound(_) => "ContainerNotFound",
            StorageError::ContainerAlreadyExists(_) => "ContainerAlreadyExists",
            StorageError::InvalidContainerName { .. } => "InvalidContainerName",
            StorageError::BlobNotFound { .. } | StorageError::ContentNotFound(_) => "BlobNotFound",
            StorageError::InvalidBlobName(_) => "InvalidBlobName",
            StorageError::InvalidMetadata { .. } => "InvalidMetadata",
            StorageError::Cancelled(_) => "Cancelled",
            StorageError::CorruptSidecar { .. } | StorageError::Io(_) => "IoFailure",
        }
    }
}
