//! Sidecar persistence for container and blob records.
//!
//! Each container keeps a `.container.json` in its directory; each blob
//! keeps a `{stem}.meta.json` next to its content. Sidecars hold the
//! system properties and the user metadata, never the content. Writes go
//! through [`publish_file`], so a sidecar is always either the old or the
//! new version. Writing a blob sidecar is the commit point of an upload.

use crate::{
    models::{blob::Blob, container::Container},
    storage::{
        engine::{CONTENT_SUFFIX, ContentEngine, TMP_PREFIX, TRASH_PREFIX, publish_file},
        error::{StorageError, StorageResult},
    },
};
use serde::{Serialize, de::DeserializeOwned};
use std::{
    collections::HashSet,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CONTAINER_SIDECAR: &str = ".container.json";
pub const BLOB_SIDECAR_SUFFIX: &str = ".meta.json";

/// A container and its blobs as found on disk, in creation order.
#[derive(Debug)]
pub struct StoredContainer {
    pub container: Container,
    pub blobs: Vec<Blob>,
}

#[derive(Debug, Clone)]
pub struct MetadataStore {
    engine: ContentEngine,
}

impl MetadataStore {
    pub fn new(engine: ContentEngine) -> Self {
        Self { engine }
    }

    pub fn container_sidecar(&self, container_id: Uuid) -> PathBuf {
        self.engine
            .container_root(container_id)
            .join(CONTAINER_SIDECAR)
    }

    pub fn blob_sidecar(&self, container_id: Uuid, blob_name: &str) -> PathBuf {
        self.engine.shard_dir(container_id, blob_name).join(format!(
            "{}{BLOB_SIDECAR_SUFFIX}",
            ContentEngine::blob_stem(blob_name)
        ))
    }

    pub async fn save_container(&self, container: &Container) -> StorageResult<()> {
        let path = self.container_sidecar(container.id);
        publish_file(&path, &encode(container)?).await
    }

    pub async fn save_blob(&self, blob: &Blob) -> StorageResult<()> {
        let path = self.blob_sidecar(blob.container_id, &blob.name);
        publish_file(&path, &encode(blob)?).await
    }

    /// Remove a blob sidecar. Removing a missing sidecar is not an error.
    pub async fn remove_blob(&self, blob: &Blob) -> StorageResult<()> {
        let path = self.blob_sidecar(blob.container_id, &blob.name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// Rebuild every container and blob record from disk.
    ///
    /// Also sweeps what interrupted operations leave behind:
    /// - trash directories of deleted containers
    /// - container directories without a sidecar (creation never committed)
    /// - temp files and content versions no sidecar references
    /// - blob sidecars whose content file is missing
    /// - empty shard directories
    pub async fn load(&self) -> StorageResult<Vec<StoredContainer>> {
        let base = self.engine.base_path();
        fs::create_dir_all(base).await?;

        let mut containers = Vec::new();
        let mut entries = fs::read_dir(base).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();

            if name.starts_with(TRASH_PREFIX) {
                info!("sweeping trash directory {}", path.display());
                remove_dir_best_effort(&path).await;
                continue;
            }
            if name.starts_with(TMP_PREFIX) {
                remove_file_best_effort(&path).await;
                continue;
            }
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Ok(container_id) = Uuid::parse_str(&name) else {
                warn!("ignoring unexpected directory {}", path.display());
                continue;
            };

            let sidecar = self.container_sidecar(container_id);
            let Some(mut container) = read_sidecar::<Container>(&sidecar).await? else {
                info!(
                    "removing container directory {} without sidecar",
                    path.display()
                );
                remove_dir_best_effort(&path).await;
                continue;
            };
            container.id = container_id;

            let mut blobs = self.load_blobs(container_id, &path).await?;
            blobs.sort_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.name.cmp(&b.name))
            });
            debug!(
                "loaded container `{}` with {} blobs",
                container.name,
                blobs.len()
            );
            containers.push(StoredContainer { container, blobs });
        }

        containers.sort_by(|a, b| {
            a.container
                .created_at
                .cmp(&b.container.created_at)
                .then_with(|| a.container.name.cmp(&b.container.name))
        });
        Ok(containers)
    }

    async fn load_blobs(&self, container_id: Uuid, root: &Path) -> StorageResult<Vec<Blob>> {
        let mut blobs = Vec::new();
        for level_a in subdirectories(root).await? {
            for leaf in subdirectories(&level_a).await? {
                blobs.extend(self.load_leaf(container_id, &leaf).await?);
                remove_if_empty(&leaf).await;
            }
            remove_if_empty(&level_a).await;
        }
        Ok(blobs)
    }

    /// Load the blob sidecars of one shard directory and drop debris.
    async fn load_leaf(&self, container_id: Uuid, leaf: &Path) -> StorageResult<Vec<Blob>> {
        let mut sidecars = Vec::new();
        let mut others = Vec::new();
        let mut entries = fs::read_dir(leaf).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(BLOB_SIDECAR_SUFFIX) {
                sidecars.push(entry.path());
            } else {
                others.push((name, entry.path()));
            }
        }

        let present: HashSet<&str> = others.iter().map(|(name, _)| name.as_str()).collect();
        let mut blobs = Vec::new();
        for path in sidecars {
            let Some(mut blob) = read_sidecar::<Blob>(&path).await? else {
                continue;
            };
            if !present.contains(blob.content_file.as_str()) {
                warn!(
                    "blob `{}` has no content file {}, dropping its sidecar",
                    blob.name, blob.content_file
                );
                remove_file_best_effort(&path).await;
                continue;
            }
            blob.container_id = container_id;
            blobs.push(blob);
        }

        let referenced: HashSet<&str> = blobs.iter().map(|b| b.content_file.as_str()).collect();
        for (name, path) in &others {
            let debris = name.starts_with(TMP_PREFIX)
                || (name.ends_with(CONTENT_SUFFIX) && !referenced.contains(name.as_str()));
            if debris {
                debug!("removing unreferenced file {}", path.display());
                remove_file_best_effort(path).await;
            }
        }
        Ok(blobs)
    }
}

fn encode<T: Serialize>(value: &T) -> StorageResult<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|err| StorageError::Io(err.into()))
}

/// Read and decode a sidecar. `Ok(None)` when the file does not exist.
async fn read_sidecar<T: DeserializeOwned>(path: &Path) -> StorageResult<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StorageError::Io(err)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StorageError::CorruptSidecar {
            path: path.to_path_buf(),
            source,
        })
}

async fn subdirectories(path: &Path) -> StorageResult<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    let mut entries = fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

async fn remove_if_empty(path: &Path) {
    match fs::remove_dir(path).await {
        Ok(()) => debug!("pruned empty directory {}", path.display()),
        Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => debug!("failed to prune directory {}: {}", path.display(), err),
    }
}

async fn remove_file_best_effort(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        warn!("failed to remove {}: {}", path.display(), err);
    }
}

async fn remove_dir_best_effort(path: &Path) {
    if let Err(err) = fs::remove_dir_all(path).await {
        warn!("failed to remove {}: {}", path.display(), err);
    }
}
