//! Content storage on local disk.
//!
//! Layout beneath `base_path`:
//!
//! ```text
//! {container-id}/
//!     .container.json                 container sidecar
//!     {aa}/{bb}/{stem}.{version}.blob content of one blob version
//!     {aa}/{bb}/{stem}.meta.json      blob sidecar
//! ```
//!
//! `stem` is the hex MD5 of the blob name and `aa`/`bb` its first two bytes,
//! which keeps the file count per directory low and keeps arbitrary blob
//! names (including `/`) out of the filesystem path.

use crate::storage::error::{StorageError, StorageResult};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::{debug, warn};
use uuid::Uuid;

pub(crate) const TMP_PREFIX: &str = ".tmp-";
pub(crate) const TRASH_PREFIX: &str = ".trash-";
pub(crate) const CONTENT_SUFFIX: &str = ".blob";

/// Result of staging content for a blob.
#[derive(Debug, Clone)]
pub struct StagedContent {
    /// File name of the new content version inside the shard directory.
    pub content_file: String,
    pub size_bytes: u64,
    pub md5: [u8; 16],
}

/// Durable byte storage for blob content, keyed by (container id, blob name).
#[derive(Debug, Clone)]
pub struct ContentEngine {
    base_path: PathBuf,
}

impl ContentEngine {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Directory holding everything that belongs to one container.
    pub fn container_root(&self, container_id: Uuid) -> PathBuf {
        self.base_path.join(container_id.to_string())
    }

    /// Hex MD5 of the blob name, shared by its content and sidecar files.
    pub fn blob_stem(blob_name: &str) -> String {
        format!("{:x}", md5::compute(blob_name))
    }

    /// Two-level shard directory of a blob. Parent directories may not exist yet.
    pub fn shard_dir(&self, container_id: Uuid, blob_name: &str) -> PathBuf {
        let digest = md5::compute(blob_name);
        let mut path = self.container_root(container_id);
        path.push(format!("{:02x}", digest[0]));
        path.push(format!("{:02x}", digest[1]));
        path
    }

    pub fn content_path(&self, container_id: Uuid, blob_name: &str, content_file: &str) -> PathBuf {
        self.shard_dir(container_id, blob_name).join(content_file)
    }

    pub async fn create_container_dir(&self, container_id: Uuid) -> StorageResult<()> {
        fs::create_dir_all(self.container_root(container_id)).await?;
        Ok(())
    }

    /// Remove a container directory with everything in it.
    ///
    /// The directory is first renamed into the trash, which is the point at
    /// which the container is gone from disk. Removing the trash afterwards
    /// is best-effort; leftovers are swept on the next startup.
    pub async fn remove_container_dir(&self, container_id: Uuid) -> StorageResult<()> {
        let root = self.container_root(container_id);
        let trash = self
            .base_path
            .join(format!("{TRASH_PREFIX}{}", Uuid::new_v4()));
        match fs::rename(&root, &trash).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(StorageError::Io(err)),
        }
        if let Err(err) = fs::remove_dir_all(&trash).await {
            warn!("failed to remove trash directory {}: {}", trash.display(), err);
        }
        Ok(())
    }

    /// Stream content into a new version file.
    ///
    /// - Writes chunks to a temporary file in the blob's shard directory.
    /// - Computes size and MD5 while streaming.
    /// - Flushes and fsyncs, then renames to a fresh `{stem}.{version}.blob`.
    ///
    /// The version file is never visible under its final name until it is
    /// complete. If the stream yields an error or this future is dropped,
    /// the temporary file is removed.
    pub async fn write_content<S>(
        &self,
        container_id: Uuid,
        blob_name: &str,
        stream: S,
    ) -> StorageResult<StagedContent>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let dir = self.shard_dir(container_id, blob_name);
        fs::create_dir_all(&dir).await?;

        let tmp = TempPath::new(dir.join(format!("{TMP_PREFIX}{}", Uuid::new_v4())));
        let mut file = File::create(tmp.path()).await?;

        let mut size_bytes: u64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| StorageError::Cancelled(err.to_string()))?;
            size_bytes += chunk.len() as u64;
            digest.consume(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let content_file = format!(
            "{}.{}{CONTENT_SUFFIX}",
            Self::blob_stem(blob_name),
            Uuid::new_v4().simple()
        );
        fs::rename(tmp.path(), dir.join(&content_file)).await?;
        tmp.disarm();

        debug!(
            "staged {} bytes for blob `{}` as {}",
            size_bytes, blob_name, content_file
        );
        Ok(StagedContent {
            content_file,
            size_bytes,
            md5: digest.compute().0,
        })
    }

    /// Open a content version for streaming out.
    pub async fn open_content(
        &self,
        container_id: Uuid,
        blob_name: &str,
        content_file: &str,
    ) -> StorageResult<File> {
        let path = self.content_path(container_id, blob_name, content_file);
        File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::ContentNotFound(path)
            } else {
                StorageError::Io(err)
            }
        })
    }

    /// Read a whole content version into memory.
    pub async fn read_content(
        &self,
        container_id: Uuid,
        blob_name: &str,
        content_file: &str,
    ) -> StorageResult<Bytes> {
        let mut file = self
            .open_content(container_id, blob_name, content_file)
            .await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Remove a content version. Removing a missing file is not an error.
    pub async fn delete_content(
        &self,
        container_id: Uuid,
        blob_name: &str,
        content_file: &str,
    ) -> StorageResult<()> {
        let path = self.content_path(container_id, blob_name, content_file);
        match fs::remove_file(&path).await {
            Ok(()) => debug!("removed content file {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("content file {} already missing", path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }
        Ok(())
    }

    /// Write/read/delete a scratch file under `base_path`.
    pub async fn probe(&self) -> StorageResult<()> {
        let path = self
            .base_path
            .join(format!("{TMP_PREFIX}probe-{}", Uuid::new_v4()));
        let tmp = TempPath::new(path);
        fs::write(tmp.path(), b"probe").await?;
        let read = fs::read(tmp.path()).await?;
        if read != b"probe" {
            return Err(StorageError::Io(io::Error::new(
                ErrorKind::InvalidData,
                "probe file content mismatch",
            )));
        }
        fs::remove_file(tmp.path()).await?;
        tmp.disarm();
        Ok(())
    }
}

/// Write `bytes` to `path` atomically: temp file in the same directory,
/// fsync, then rename over the target.
pub(crate) async fn publish_file(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let parent = path.parent().ok_or_else(|| {
        StorageError::Io(io::Error::other("publish target has no parent directory"))
    })?;
    fs::create_dir_all(parent).await?;

    let tmp = TempPath::new(parent.join(format!("{TMP_PREFIX}{}", Uuid::new_v4())));
    let mut file = File::create(tmp.path()).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(tmp.path(), path).await?;
    tmp.disarm();
    Ok(())
}

/// A temporary file that is removed when dropped unless disarmed.
///
/// Dropping happens on error returns and when the owning future is
/// cancelled, so staged bytes never outlive an aborted write.
struct TempPath {
    path: Option<PathBuf>,
}

impl TempPath {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    fn disarm(mut self) {
        self.path = None;
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != ErrorKind::NotFound {
                    warn!("failed to remove temp file {}: {}", path.display(), err);
                }
            }
        }
    }
}
