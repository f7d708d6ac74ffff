//! Represents a container: the top-level namespace for blobs.

use crate::models::metadata::Metadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Anonymous read access granted on a container.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PublicAccess {
    /// No anonymous access.
    #[default]
    Private,
    /// Anonymous read access to blobs, but not to the container listing.
    Blob,
    /// Anonymous read access to blobs and to the container listing.
    Container,
}

impl PublicAccess {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublicAccess::Private => "private",
            PublicAccess::Blob => "blob",
            PublicAccess::Container => "container",
        }
    }
}

impl fmt::Display for PublicAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PublicAccess {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "private" | "off" | "none" => Ok(PublicAccess::Private),
            "blob" => Ok(PublicAccess::Blob),
            "container" => Ok(PublicAccess::Container),
            other => Err(format!("unknown public access level `{other}`")),
        }
    }
}

/// A container record, persisted as the container's sidecar file.
///
/// `id` names the container directory on disk. Re-creating a container
/// under a previously used name yields a new `id`, so the two are distinct
/// entities even though they share a name.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Container {
    /// Internal identifier, also the on-disk directory name.
    pub id: Uuid,

    /// Unique container name (3–63 lowercase letters, digits and hyphens).
    pub name: String,

    /// Anonymous access level requested at creation.
    pub public_access: PublicAccess,

    /// When this container was created.
    pub created_at: DateTime<Utc>,

    /// Bumped whenever the container's metadata changes.
    pub last_modified: DateTime<Utc>,

    /// User-defined metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Container {
    pub fn new(name: impl Into<String>, public_access: PublicAccess) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            public_access,
            created_at: now,
            last_modified: now,
            metadata: Metadata::new(),
        }
    }

    pub fn properties(&self) -> ContainerProperties {
        ContainerProperties {
            public_access: self.public_access,
            last_modified: self.last_modified,
            metadata: self.metadata.clone(),
        }
    }
}

/// Properties reported by `get_container_properties`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ContainerProperties {
    pub public_access: PublicAccess,
    pub last_modified: DateTime<Utc>,
    pub metadata: Metadata,
}
