//! src/services/blob_service.rs
//!
//! BlobService: container and blob operations over the namespace index,
//! the content engine and the sidecar metadata store.
//!
//! Write paths follow one ordering rule: content is durable on disk before
//! the sidecar that references it is published, and the sidecar is
//! published before the index makes the entity visible. Once the bytes of
//! an upload are staged, the remaining steps run in a spawned task so an
//! impatient caller cannot leave disk and index disagreeing.

use crate::{
    models::{
        blob::{Blob, DEFAULT_CONTENT_TYPE, UploadReceipt},
        container::{Container, ContainerProperties, PublicAccess},
        metadata::{Metadata, validate_metadata},
    },
    storage::{
        engine::{ContentEngine, StagedContent},
        error::{StorageError, StorageResult},
        index::{ContainerEntry, NamespaceIndex, Snapshot},
        locks::KeyLocks,
        metadata_store::MetadataStore,
    },
};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, stream};
use std::{future::Future, io, path::PathBuf, sync::Arc};
use tokio::{fs::File, io::AsyncReadExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

const MAX_BLOB_NAME_LEN: usize = 1024;
const CONTAINER_NAME_MIN_LEN: usize = 3;
const CONTAINER_NAME_MAX_LEN: usize = 63;
/// Attempts to open a blob whose content version is swapped underneath the reader.
const OPEN_ATTEMPTS: usize = 3;

/// Explicit configuration handed to the service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root directory for container directories.
    pub data_dir: PathBuf,
    /// Base URL blob URIs are built from, e.g. `http://127.0.0.1:10000`.
    pub public_url: String,
}

/// Optional properties supplied with an upload.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    pub metadata: Metadata,
}

/// A downloaded blob: its properties and its full content.
#[derive(Debug, Clone)]
pub struct DownloadedBlob {
    pub properties: Blob,
    pub content: Bytes,
}

/// BlobService provides the blob store operations:
/// - container create / properties / metadata / list / delete
/// - blob upload / download / properties / metadata / list / delete
///
/// Cloning is cheap; all clones share the same state.
#[derive(Clone)]
pub struct BlobService {
    inner: Arc<Inner>,
}

struct Inner {
    config: ServiceConfig,
    engine: ContentEngine,
    metadata: MetadataStore,
    index: NamespaceIndex,
    /// Serializes create, delete and metadata writes per container name.
    container_locks: KeyLocks<String>,
    /// Serializes writes per (container id, blob name).
    blob_locks: KeyLocks<(Uuid, String)>,
}

impl BlobService {
    /// Open the store at `config.data_dir`, rebuilding the index from the
    /// sidecars on disk.
    pub async fn open(config: ServiceConfig) -> StorageResult<Self> {
        let engine = ContentEngine::new(config.data_dir.clone());
        let metadata = MetadataStore::new(engine.clone());
        let index = NamespaceIndex::new();

        let stored = metadata.load().await?;
        let mut blob_total = 0;
        for item in stored {
            let name = item.container.name.clone();
            let entry = match index.create_container(item.container) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("skipping container directory for `{}`: {}", name, err);
                    continue;
                }
            };
            blob_total += item.blobs.len();
            for blob in item.blobs {
                entry.put_blob_ref(blob);
            }
        }
        info!(
            "opened blob store at {} with {} containers and {} blobs",
            config.data_dir.display(),
            index.container_count(),
            blob_total
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                engine,
                metadata,
                index,
                container_locks: KeyLocks::new(),
                blob_locks: KeyLocks::new(),
            }),
        })
    }

    /// Create a container. Fails with `ContainerAlreadyExists` if the name is taken.
    pub async fn create_container(
        &self,
        name: &str,
        public_access: PublicAccess,
    ) -> StorageResult<Container> {
        let (container, _) = self.create_container_inner(name, public_access, false).await?;
        Ok(container)
    }

    /// Create a container unless one with this name exists.
    ///
    /// Returns the container and whether this call created it. An existing
    /// container is returned as is; `public_access` is not applied to it.
    pub async fn create_container_if_not_exists(
        &self,
        name: &str,
        public_access: PublicAccess,
    ) -> StorageResult<(Container, bool)> {
        self.create_container_inner(name, public_access, true).await
    }

    async fn create_container_inner(
        &self,
        name: &str,
        public_access: PublicAccess,
        allow_existing: bool,
    ) -> StorageResult<(Container, bool)> {
        ensure_container_name_safe(name)?;
        let guard = self.inner.container_locks.acquire(&name.to_string()).await;
        if let Ok(entry) = self.inner.index.get_container(name) {
            if allow_existing {
                return Ok((entry.record(), false));
            }
            return Err(StorageError::ContainerAlreadyExists(name.to_string()));
        }

        let container = Container::new(name, public_access);
        let this = self.clone();
        run_to_completion(async move {
            let _guard = guard;
            let inner = &this.inner;
            inner.engine.create_container_dir(container.id).await?;
            if let Err(err) = inner.metadata.save_container(&container).await {
                if let Err(cleanup) = inner.engine.remove_container_dir(container.id).await {
                    warn!("failed to roll back container directory: {}", cleanup);
                }
                return Err(err);
            }
            inner.index.create_container(container.clone())?;
            info!("created container `{}` ({})", container.name, container.id);
            Ok((container, true))
        })
        .await
    }

    pub async fn get_container(&self, name: &str) -> StorageResult<Container> {
        Ok(self.live_container(name)?.record())
    }

    /// Public access, last-modified time and metadata of a container.
    pub async fn get_container_properties(&self, name: &str) -> StorageResult<ContainerProperties> {
        Ok(self.get_container(name).await?.properties())
    }

    /// Current metadata of a container; empty if none was set.
    pub async fn get_container_metadata(&self, name: &str) -> StorageResult<Metadata> {
        Ok(self.get_container(name).await?.metadata)
    }

    /// Replace the full metadata map of a container.
    pub async fn set_container_metadata(
        &self,
        name: &str,
        metadata: Metadata,
    ) -> StorageResult<ContainerProperties> {
        ensure_container_name_safe(name)?;
        validate_metadata(&metadata)?;
        let guard = self.inner.container_locks.acquire(&name.to_string()).await;
        let entry = self.inner.index.get_container(name)?;

        let mut updated = entry.record();
        updated.metadata = metadata;
        updated.last_modified = Utc::now();

        let this = self.clone();
        run_to_completion(async move {
            let _guard = guard;
            this.inner.metadata.save_container(&updated).await?;
            let properties = updated.properties();
            entry.replace_record(updated);
            debug!("replaced metadata of container `{}`", entry.name());
            Ok(properties)
        })
        .await
    }

    /// Containers in creation order.
    pub fn list_containers(&self) -> Snapshot<Container> {
        self.inner.index.list_containers()
    }

    /// Delete a container and every blob in it.
    ///
    /// Waits for in-flight blob operations on the container to finish.
    pub async fn delete_container(&self, name: &str) -> StorageResult<()> {
        ensure_container_name_safe(name)?;
        let guard = self.inner.container_locks.acquire(&name.to_string()).await;
        let entry = self.inner.index.get_container(name)?;
        let gate = entry.gate().write_owned().await;

        let this = self.clone();
        let name = name.to_string();
        run_to_completion(async move {
            let _held = (guard, gate);
            let blobs = entry.blob_count();
            entry.mark_deleted();
            if let Err(err) = this.inner.engine.remove_container_dir(entry.id()).await {
                entry.restore();
                return Err(err);
            }
            this.inner.index.delete_container(&name)?;
            info!("deleted container `{}` with {} blobs", name, blobs);
            Ok(())
        })
        .await
    }

    /// Upload a blob from memory, overwriting any existing blob of that name.
    pub async fn upload_blob(
        &self,
        container: &str,
        blob_name: &str,
        content: impl Into<Bytes>,
        content_type: &str,
    ) -> StorageResult<UploadReceipt> {
        let options = UploadOptions {
            content_type: Some(content_type.to_string()),
            metadata: Metadata::new(),
        };
        let body = stream::iter([Ok::<_, io::Error>(content.into())]);
        self.upload_blob_stream(container, blob_name, options, body)
            .await
    }

    /// Stream-upload a blob, overwriting any existing blob of that name.
    ///
    /// - Stages the bytes into a new content version.
    /// - Publishes the blob sidecar (the commit point).
    /// - Swaps the index entry and removes the replaced version.
    ///
    /// An error from `stream` is reported as `Cancelled`; neither an error
    /// nor dropping this future before staging completes leaves anything
    /// visible.
    pub async fn upload_blob_stream<S>(
        &self,
        container: &str,
        blob_name: &str,
        options: UploadOptions,
        stream: S,
    ) -> StorageResult<UploadReceipt>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        ensure_blob_name_safe(blob_name)?;
        validate_metadata(&options.metadata)?;
        let entry = self.live_container(container)?;
        let gate = entry.gate().read_owned().await;
        ensure_not_deleted(&entry)?;
        let guard = self
            .inner
            .blob_locks
            .acquire(&(entry.id(), blob_name.to_string()))
            .await;

        let staged = self
            .inner
            .engine
            .write_content(entry.id(), blob_name, stream)
            .await?;

        let this = self.clone();
        let name = blob_name.to_string();
        run_to_completion(async move {
            let _held = (gate, guard);
            this.commit_upload(&entry, name, options, staged).await
        })
        .await
    }

    async fn commit_upload(
        &self,
        entry: &ContainerEntry,
        name: String,
        options: UploadOptions,
        staged: StagedContent,
    ) -> StorageResult<UploadReceipt> {
        let previous = entry.get_blob_ref(&name).ok();
        let now = Utc::now();
        let content_type = options
            .content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let blob = Blob {
            container_id: entry.id(),
            name,
            content_type,
            size_bytes: staged.size_bytes,
            etag: format!("{:x}", md5::Digest(staged.md5)),
            content_md5: general_purpose::STANDARD.encode(staged.md5),
            created_at: previous.as_ref().map_or(now, |p| p.created_at),
            last_modified: now,
            metadata: options.metadata,
            content_file: staged.content_file,
        };

        if let Err(err) = self.inner.metadata.save_blob(&blob).await {
            self.discard_content(&blob).await;
            return Err(err);
        }

        let receipt = UploadReceipt {
            uri: self.blob_uri(entry.name(), &blob.name),
            etag: blob.etag.clone(),
            last_modified: blob.last_modified,
        };
        debug!(
            "committed blob `{}` in `{}` ({} bytes)",
            blob.name,
            entry.name(),
            blob.size_bytes
        );
        if let Some(replaced) = entry.put_blob_ref(blob) {
            self.discard_content(&replaced).await;
        }
        Ok(receipt)
    }

    /// Blobs of a container in creation order, optionally filtered by name prefix.
    pub fn list_blobs(
        &self,
        container: &str,
        prefix: Option<&str>,
    ) -> StorageResult<Snapshot<Blob>> {
        let entry = self.live_container(container)?;
        let snapshot = entry.list_blobs(prefix);
        // A deletion may have emptied the table after the liveness check.
        ensure_not_deleted(&entry)?;
        Ok(snapshot)
    }

    /// Whether a blob exists. Fails only when the container is missing.
    pub async fn blob_exists(&self, container: &str, blob_name: &str) -> StorageResult<bool> {
        let entry = self.live_container(container)?;
        let exists = entry.contains_blob(blob_name);
        ensure_not_deleted(&entry)?;
        Ok(exists)
    }

    pub async fn get_blob_properties(
        &self,
        container: &str,
        blob_name: &str,
    ) -> StorageResult<Blob> {
        ensure_blob_name_safe(blob_name)?;
        let entry = self.live_container(container)?;
        entry
            .get_blob_ref(blob_name)
            .map_err(|err| container_gone_or(&entry, err))
    }

    /// Current metadata of a blob; empty if none was set.
    pub async fn get_blob_metadata(
        &self,
        container: &str,
        blob_name: &str,
    ) -> StorageResult<Metadata> {
        Ok(self.get_blob_properties(container, blob_name).await?.metadata)
    }

    /// Replace the full metadata map of a blob. Content is untouched.
    pub async fn set_blob_metadata(
        &self,
        container: &str,
        blob_name: &str,
        metadata: Metadata,
    ) -> StorageResult<Blob> {
        ensure_blob_name_safe(blob_name)?;
        validate_metadata(&metadata)?;
        let entry = self.live_container(container)?;
        let gate = entry.gate().read_owned().await;
        ensure_not_deleted(&entry)?;
        let guard = self
            .inner
            .blob_locks
            .acquire(&(entry.id(), blob_name.to_string()))
            .await;

        let mut updated = entry.get_blob_ref(blob_name)?;
        updated.metadata = metadata;
        updated.last_modified = Utc::now();

        let this = self.clone();
        run_to_completion(async move {
            let _held = (gate, guard);
            this.inner.metadata.save_blob(&updated).await?;
            entry.put_blob_ref(updated.clone());
            Ok(updated)
        })
        .await
    }

    /// Open a blob for streaming out.
    ///
    /// Readers take no lock. If a concurrent overwrite removes the content
    /// version between the lookup and the open, the lookup is retried.
    pub async fn open_blob(
        &self,
        container: &str,
        blob_name: &str,
    ) -> StorageResult<(Blob, File)> {
        ensure_blob_name_safe(blob_name)?;
        let entry = self.live_container(container)?;
        for _ in 0..OPEN_ATTEMPTS {
            let blob = entry
                .get_blob_ref(blob_name)
                .map_err(|err| container_gone_or(&entry, err))?;
            match self
                .inner
                .engine
                .open_content(entry.id(), &blob.name, &blob.content_file)
                .await
            {
                Ok(file) => return Ok((blob, file)),
                Err(StorageError::ContentNotFound(path)) => {
                    debug!("content {} replaced during open, retrying", path.display());
                    ensure_not_deleted(&entry)?;
                }
                Err(err) => return Err(container_gone_or(&entry, err)),
            }
        }
        ensure_not_deleted(&entry)?;
        Err(StorageError::BlobNotFound {
            container: container.to_string(),
            blob: blob_name.to_string(),
        })
    }

    /// Download a blob's full content and properties.
    pub async fn download_blob(
        &self,
        container: &str,
        blob_name: &str,
    ) -> StorageResult<DownloadedBlob> {
        let (properties, mut file) = self.open_blob(container, blob_name).await?;
        let mut buf = Vec::with_capacity(properties.size_bytes as usize);
        file.read_to_end(&mut buf).await?;
        Ok(DownloadedBlob {
            properties,
            content: Bytes::from(buf),
        })
    }

    /// Download a blob addressed by a URI previously returned from an upload.
    pub async fn download_blob_by_uri(&self, uri: &str) -> StorageResult<DownloadedBlob> {
        let (container, blob) = self.parse_blob_uri(uri)?;
        self.download_blob(&container, &blob).await
    }

    /// Delete a blob. Fails with `BlobNotFound` if it does not exist.
    pub async fn delete_blob(&self, container: &str, blob_name: &str) -> StorageResult<()> {
        ensure_blob_name_safe(blob_name)?;
        let entry = self.live_container(container)?;
        let gate = entry.gate().read_owned().await;
        ensure_not_deleted(&entry)?;
        let guard = self
            .inner
            .blob_locks
            .acquire(&(entry.id(), blob_name.to_string()))
            .await;
        let blob = entry.get_blob_ref(blob_name)?;

        let this = self.clone();
        run_to_completion(async move {
            let _held = (gate, guard);
            this.inner.metadata.remove_blob(&blob).await?;
            entry.delete_blob_ref(&blob.name)?;
            this.discard_content(&blob).await;
            debug!("deleted blob `{}` in `{}`", blob.name, entry.name());
            Ok(())
        })
        .await
    }

    /// URI of a blob: `{public_url}/{container}/{blob}` with each path
    /// segment percent-encoded.
    pub fn blob_uri(&self, container: &str, blob_name: &str) -> String {
        let path = blob_name
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/{}/{}",
            self.inner.config.public_url.trim_end_matches('/'),
            container,
            path
        )
    }

    /// Split a blob URI into container and blob name.
    pub fn parse_blob_uri(&self, uri: &str) -> StorageResult<(String, String)> {
        let foreign =
            || StorageError::InvalidBlobName(format!("uri `{uri}` is not served by this store"));
        let base = self.inner.config.public_url.trim_end_matches('/');
        let path = uri
            .strip_prefix(base)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(foreign)?;
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let (container, blob) = path.split_once('/').ok_or_else(foreign)?;

        let blob = blob
            .split('/')
            .map(|segment| urlencoding::decode(segment).map(|s| s.into_owned()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| foreign())?
            .join("/");
        Ok((container.to_string(), blob))
    }

    /// Write/read/delete probe of the data directory.
    pub async fn probe_storage(&self) -> StorageResult<()> {
        self.inner.engine.probe().await
    }

    fn live_container(&self, name: &str) -> StorageResult<Arc<ContainerEntry>> {
        ensure_container_name_safe(name)?;
        let entry = self.inner.index.get_container(name)?;
        ensure_not_deleted(&entry)?;
        Ok(entry)
    }

    /// Remove a content version that is no longer referenced.
    ///
    /// Failure only leaves an unreferenced file, which the next startup
    /// sweeps, so it is logged rather than returned.
    async fn discard_content(&self, blob: &Blob) {
        if let Err(err) = self
            .inner
            .engine
            .delete_content(blob.container_id, &blob.name, &blob.content_file)
            .await
        {
            warn!(
                "failed to remove content {} of blob `{}`: {}",
                blob.content_file, blob.name, err
            );
        }
    }
}

/// Report a deleted container in place of `err`, so container absence
/// always wins over blob-level errors.
fn container_gone_or(entry: &ContainerEntry, err: StorageError) -> StorageError {
    match ensure_not_deleted(entry) {
        Err(gone) => gone,
        Ok(()) => err,
    }
}

fn ensure_not_deleted(entry: &ContainerEntry) -> StorageResult<()> {
    if entry.is_deleted() {
        return Err(StorageError::ContainerNotFound(entry.name().to_string()));
    }
    Ok(())
}

/// Drive `fut` on its own task so it completes even if the caller is dropped.
async fn run_to_completion<T, F>(fut: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(err) => Err(StorageError::Io(io::Error::other(err))),
    }
}

/// Validate a blob name.
///
/// Names are 1–1024 bytes and may contain `/` but no control characters
/// or backslashes. Names never reach the filesystem directly.
fn ensure_blob_name_safe(name: &str) -> StorageResult<()> {
    if name.is_empty() {
        return Err(StorageError::InvalidBlobName("name cannot be empty".into()));
    }
    if name.len() > MAX_BLOB_NAME_LEN {
        return Err(StorageError::InvalidBlobName(format!(
            "name exceeds {MAX_BLOB_NAME_LEN} bytes"
        )));
    }
    if name.chars().any(|c| c.is_control() || c == '\\') {
        return Err(StorageError::InvalidBlobName(
            "name cannot contain control characters or backslashes".into(),
        ));
    }
    Ok(())
}

/// Validate container name format.
///
/// - 3–63 characters
/// - lowercase letters, digits and hyphens only
/// - starts and ends with a letter or digit
/// - no consecutive hyphens
fn ensure_container_name_safe(name: &str) -> StorageResult<()> {
    let invalid = |reason: &str| StorageError::InvalidContainerName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let len = name.len();
    if !(CONTAINER_NAME_MIN_LEN..=CONTAINER_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, and hyphens",
        ));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }
    if name.contains("--") {
        return Err(invalid("cannot contain consecutive hyphens"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::error::ErrorKind;
    use futures::StreamExt;
    use std::{path::Path, time::Duration};
    use tempfile::TempDir;

    const BASE_URL: &str = "http://127.0.0.1:10000";

    async fn open_at(dir: &Path) -> BlobService {
        BlobService::open(ServiceConfig {
            data_dir: dir.to_path_buf(),
            public_url: BASE_URL.to_string(),
        })
        .await
        .unwrap()
    }

    async fn service() -> (TempDir, BlobService) {
        let dir = TempDir::new().unwrap();
        let svc = open_at(dir.path()).await;
        (dir, svc)
    }

    fn md(entries: &[(&str, &str)]) -> Metadata {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn file_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn docs_scenario() {
        let (_dir, svc) = service().await;
        svc.create_container("docs", PublicAccess::Private).await.unwrap();
        svc.upload_blob("docs", "a.txt", "hello", "text/plain").await.unwrap();

        let listing = svc.list_blobs("docs", None).unwrap();
        assert_eq!(listing.names().collect::<Vec<_>>(), vec!["a.txt"]);

        let downloaded = svc.download_blob("docs", "a.txt").await.unwrap();
        assert_eq!(&downloaded.content[..], b"hello");
        assert_eq!(downloaded.properties.content_type, "text/plain");

        svc.delete_container("docs").await.unwrap();
        assert!(!svc.list_containers().names().any(|n| n == "docs"));
    }

    #[tokio::test]
    async fn create_then_properties_reports_requested_access() {
        let (_dir, svc) = service().await;
        let longest = "a".repeat(63);
        let cases = [
            ("abc", PublicAccess::Private),
            ("wtblob-0d7e2f", PublicAccess::Blob),
            ("local-container-tn204", PublicAccess::Container),
            (longest.as_str(), PublicAccess::Blob),
        ];
        for (name, access) in cases {
            let created = svc.create_container(name, access).await.unwrap();
            assert_eq!(created.name, name);
            let fetched = svc.get_container(name).await.unwrap();
            assert_eq!(fetched.name, name);
            let props = svc.get_container_properties(name).await.unwrap();
            assert_eq!(props.public_access, access);
            assert!(props.metadata.is_empty());
        }
    }

    #[tokio::test]
    async fn rejects_invalid_container_names() {
        let (_dir, svc) = service().await;
        let too_long = "a".repeat(64);
        let names = [
            "ab",
            "Docs",
            "-docs",
            "docs-",
            "do--cs",
            "do.cs",
            "do_cs",
            too_long.as_str(),
        ];
        for name in names {
            let err = svc
                .create_container(name, PublicAccess::Private)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidName, "{name}");
        }
    }

    #[tokio::test]
    async fn duplicate_create_fails_and_if_not_exists_reuses() {
        let (_dir, svc) = service().await;
        let first = svc.create_container("docs", PublicAccess::Blob).await.unwrap();
        let err = svc
            .create_container("docs", PublicAccess::Blob)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ContainerAlreadyExists(_)));
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let (existing, created) = svc
            .create_container_if_not_exists("docs", PublicAccess::Container)
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(existing.id, first.id);
        assert_eq!(existing.public_access, PublicAccess::Blob);

        let (_, created) = svc
            .create_container_if_not_exists("other", PublicAccess::Private)
            .await
            .unwrap();
        assert!(created);
    }

    #[tokio::test]
    async fn missing_container_errors() {
        let (_dir, svc) = service().await;
        assert!(matches!(
            svc.get_container_properties("nope").await,
            Err(StorageError::ContainerNotFound(_))
        ));
        assert!(matches!(
            svc.set_container_metadata("nope", Metadata::new()).await,
            Err(StorageError::ContainerNotFound(_))
        ));
        assert!(matches!(
            svc.upload_blob("nope", "a", "x", "text/plain").await,
            Err(StorageError::ContainerNotFound(_))
        ));
        assert!(matches!(
            svc.list_blobs("nope", None),
            Err(StorageError::ContainerNotFound(_))
        ));
        assert!(matches!(
            svc.download_blob("nope", "a").await,
            Err(StorageError::ContainerNotFound(_))
        ));
        assert!(matches!(
            svc.delete_container("nope").await,
            Err(StorageError::ContainerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn round_trips_arbitrary_bytes() {
        let (_dir, svc) = service().await;
        svc.create_container("data", PublicAccess::Private).await.unwrap();

        let binary: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
        for (name, bytes) in [("empty", Vec::new()), ("binary.bin", binary)] {
            let receipt = svc
                .upload_blob("data", name, bytes.clone(), "application/octet-stream")
                .await
                .unwrap();
            assert_eq!(receipt.etag, format!("{:x}", md5::compute(&bytes)));
            let downloaded = svc.download_blob("data", name).await.unwrap();
            assert_eq!(downloaded.content.to_vec(), bytes);
            assert_eq!(downloaded.properties.size_bytes, bytes.len() as u64);
        }
    }

    #[tokio::test]
    async fn missing_blob_is_not_found() {
        let (_dir, svc) = service().await;
        svc.create_container("docs", PublicAccess::Private).await.unwrap();
        let err = svc.download_blob("docs", "ghost.txt").await.unwrap_err();
        assert!(matches!(err, StorageError::BlobNotFound { .. }));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!svc.blob_exists("docs", "ghost.txt").await.unwrap());
    }

    #[tokio::test]
    async fn container_metadata_is_replaced_not_merged() {
        let (_dir, svc) = service().await;
        let created = svc.create_container("docs", PublicAccess::Private).await.unwrap();

        let first = md(&[("docType", "textDocuments"), ("category", "guidance")]);
        svc.set_container_metadata("docs", first.clone()).await.unwrap();
        let props = svc.set_container_metadata("docs", first.clone()).await.unwrap();
        assert_eq!(props.metadata, first);
        assert!(props.last_modified >= created.last_modified);
        assert_eq!(svc.get_container_metadata("docs").await.unwrap(), first);

        let second = md(&[("owner", "ops")]);
        svc.set_container_metadata("docs", second.clone()).await.unwrap();
        assert_eq!(svc.get_container_metadata("docs").await.unwrap(), second);

        let err = svc
            .set_container_metadata("docs", md(&[("bad-key", "v")]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidMetadata { .. }));
        assert_eq!(svc.get_container_metadata("docs").await.unwrap(), second);
    }

    #[tokio::test]
    async fn lists_each_uploaded_name_once() {
        let (_dir, svc) = service().await;
        svc.create_container("many", PublicAccess::Private).await.unwrap();
        let names: Vec<String> = (0..25).map(|i| format!("dir/file-{i:02}.txt")).collect();
        for name in &names {
            svc.upload_blob("many", name, name.clone(), "text/plain").await.unwrap();
        }
        let listing = svc.list_blobs("many", None).unwrap();
        assert_eq!(listing.names().collect::<Vec<_>>(), names);

        let filtered = svc.list_blobs("many", Some("dir/file-2")).unwrap();
        assert_eq!(filtered.len(), 5);
    }

    #[tokio::test]
    async fn overwrite_replaces_content_and_old_version() {
        let (_dir, svc) = service().await;
        svc.create_container("docs", PublicAccess::Private).await.unwrap();
        svc.upload_blob("docs", "first", "1", "text/plain").await.unwrap();
        svc.upload_blob("docs", "a.txt", "old", "text/plain").await.unwrap();
        let before = svc.get_blob_properties("docs", "a.txt").await.unwrap();
        svc.upload_blob("docs", "a.txt", "newer", "text/markdown").await.unwrap();

        let after = svc.get_blob_properties("docs", "a.txt").await.unwrap();
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.size_bytes, 5);
        assert_eq!(after.content_type, "text/markdown");
        let downloaded = svc.download_blob("docs", "a.txt").await.unwrap();
        assert_eq!(&downloaded.content[..], b"newer");

        let listing = svc.list_blobs("docs", None).unwrap();
        assert_eq!(listing.names().collect::<Vec<_>>(), vec!["first", "a.txt"]);

        let shard = svc.inner.engine.shard_dir(after.container_id, "a.txt");
        assert!(!shard.join(&before.content_file).exists());
        // One content version plus the sidecar.
        assert_eq!(file_count(&shard), 2);
    }

    #[tokio::test]
    async fn delete_container_removes_blobs() {
        let (dir, svc) = service().await;
        let container = svc.create_container("docs", PublicAccess::Private).await.unwrap();
        for name in ["a.txt", "b.txt"] {
            svc.upload_blob("docs", name, "x", "text/plain").await.unwrap();
        }
        svc.delete_container("docs").await.unwrap();

        assert!(matches!(
            svc.get_container_properties("docs").await,
            Err(StorageError::ContainerNotFound(_))
        ));
        for name in ["a.txt", "b.txt"] {
            let err = svc.download_blob("docs", name).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound);
        }
        assert!(!dir.path().join(container.id.to_string()).exists());
    }

    #[tokio::test]
    async fn recreated_container_is_fresh() {
        let (_dir, svc) = service().await;
        let first = svc.create_container("docs", PublicAccess::Blob).await.unwrap();
        svc.set_container_metadata("docs", md(&[("k", "v")])).await.unwrap();
        svc.upload_blob("docs", "a.txt", "x", "text/plain").await.unwrap();
        svc.delete_container("docs").await.unwrap();

        let second = svc.create_container("docs", PublicAccess::Private).await.unwrap();
        assert_ne!(first.id, second.id);
        assert!(second.created_at >= first.created_at);
        assert!(svc.get_container_metadata("docs").await.unwrap().is_empty());
        assert!(svc.list_blobs("docs", None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_uploads_to_different_blobs() {
        let (_dir, svc) = service().await;
        svc.create_container("docs", PublicAccess::Private).await.unwrap();

        let a = svc.clone();
        let b = svc.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.upload_blob("docs", "left", "L", "text/plain").await }),
            tokio::spawn(async move { b.upload_blob("docs", "right", "R", "text/plain").await }),
        );
        ra.unwrap().unwrap();
        rb.unwrap().unwrap();

        let mut names: Vec<String> = svc
            .list_blobs("docs", None)
            .unwrap()
            .names()
            .map(str::to_string)
            .collect();
        names.sort();
        assert_eq!(names, vec!["left", "right"]);
    }

    #[tokio::test]
    async fn concurrent_uploads_to_same_blob_serialize() {
        let (_dir, svc) = service().await;
        svc.create_container("docs", PublicAccess::Private).await.unwrap();

        let bodies: Vec<Vec<u8>> = (0..8u8).map(|i| vec![i; 4096]).collect();
        let tasks: Vec<_> = bodies
            .iter()
            .cloned()
            .map(|body| {
                let svc = svc.clone();
                tokio::spawn(async move {
                    svc.upload_blob("docs", "hot", body, "application/octet-stream")
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let downloaded = svc.download_blob("docs", "hot").await.unwrap();
        assert!(bodies.iter().any(|b| b[..] == downloaded.content[..]));
        assert_eq!(svc.list_blobs("docs", None).unwrap().len(), 1);
        let shard = svc
            .inner
            .engine
            .shard_dir(downloaded.properties.container_id, "hot");
        assert_eq!(file_count(&shard), 2);
    }

    #[tokio::test]
    async fn failed_stream_is_cancelled_and_invisible() {
        let (_dir, svc) = service().await;
        let container = svc.create_container("docs", PublicAccess::Private).await.unwrap();

        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::ConnectionAborted, "caller aborted")),
        ]);
        let err = svc
            .upload_blob_stream("docs", "a.txt", UploadOptions::default(), body)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);

        assert!(svc.list_blobs("docs", None).unwrap().is_empty());
        assert_eq!(file_count(&svc.inner.engine.shard_dir(container.id, "a.txt")), 0);
    }

    #[tokio::test]
    async fn dropped_upload_leaves_no_trace() {
        let (_dir, svc) = service().await;
        let container = svc.create_container("docs", PublicAccess::Private).await.unwrap();

        let body = stream::iter(vec![Ok(Bytes::from_static(b"half"))])
            .chain(stream::pending::<io::Result<Bytes>>());
        let upload = svc.upload_blob_stream("docs", "a.txt", UploadOptions::default(), body);
        assert!(tokio::time::timeout(Duration::from_millis(50), upload).await.is_err());

        assert!(!svc.blob_exists("docs", "a.txt").await.unwrap());
        assert_eq!(file_count(&svc.inner.engine.shard_dir(container.id, "a.txt")), 0);

        // The blob lock was released with the dropped future.
        svc.upload_blob("docs", "a.txt", "whole", "text/plain").await.unwrap();
        let downloaded = svc.download_blob("docs", "a.txt").await.unwrap();
        assert_eq!(&downloaded.content[..], b"whole");
    }

    #[tokio::test]
    async fn blob_metadata_and_delete() {
        let (_dir, svc) = service().await;
        svc.create_container("docs", PublicAccess::Private).await.unwrap();
        let options = UploadOptions {
            content_type: None,
            metadata: md(&[("author", "me")]),
        };
        svc.upload_blob_stream(
            "docs",
            "a.txt",
            options,
            stream::iter([Ok(Bytes::from_static(b"hi"))]),
        )
        .await
        .unwrap();
        let props = svc.get_blob_properties("docs", "a.txt").await.unwrap();
        assert_eq!(props.content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(props.metadata, md(&[("author", "me")]));

        let updated = svc
            .set_blob_metadata("docs", "a.txt", md(&[("reviewed", "yes")]))
            .await
            .unwrap();
        assert_eq!(updated.metadata, md(&[("reviewed", "yes")]));
        assert!(updated.last_modified >= props.last_modified);
        assert_eq!(updated.content_file, props.content_file);
        let downloaded = svc.download_blob("docs", "a.txt").await.unwrap();
        assert_eq!(&downloaded.content[..], b"hi");

        svc.delete_blob("docs", "a.txt").await.unwrap();
        assert!(!svc.blob_exists("docs", "a.txt").await.unwrap());
        assert!(matches!(
            svc.delete_blob("docs", "a.txt").await,
            Err(StorageError::BlobNotFound { .. })
        ));
        assert!(svc.get_blob_metadata("docs", "a.txt").await.is_err());
    }

    #[tokio::test]
    async fn download_by_uri() {
        let (_dir, svc) = service().await;
        svc.create_container("docs", PublicAccess::Blob).await.unwrap();
        let receipt = svc
            .upload_blob("docs", "reports/q1 summary.txt", "numbers", "text/plain")
            .await
            .unwrap();
        assert_eq!(
            receipt.uri,
            format!("{BASE_URL}/docs/reports/q1%20summary.txt")
        );

        let downloaded = svc.download_blob_by_uri(&receipt.uri).await.unwrap();
        assert_eq!(&downloaded.content[..], b"numbers");

        let err = svc
            .download_blob_by_uri("http://elsewhere/docs/a.txt")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidName);
    }

    #[tokio::test]
    async fn reopen_recovers_state() {
        let dir = TempDir::new().unwrap();
        {
            let svc = open_at(dir.path()).await;
            svc.create_container("zeta", PublicAccess::Container).await.unwrap();
            svc.create_container("alpha", PublicAccess::Private).await.unwrap();
            svc.set_container_metadata("zeta", md(&[("docType", "textDocuments")]))
                .await
                .unwrap();
            svc.upload_blob("zeta", "second", "2", "text/plain").await.unwrap();
            svc.upload_blob("zeta", "first", "1", "text/plain").await.unwrap();
            svc.upload_blob("zeta", "second", "22", "text/plain").await.unwrap();
            svc.create_container("gone", PublicAccess::Private).await.unwrap();
            svc.delete_container("gone").await.unwrap();
        }

        let svc = open_at(dir.path()).await;
        assert_eq!(
            svc.list_containers().names().collect::<Vec<_>>(),
            vec!["zeta", "alpha"]
        );
        let props = svc.get_container_properties("zeta").await.unwrap();
        assert_eq!(props.public_access, PublicAccess::Container);
        assert_eq!(props.metadata, md(&[("docType", "textDocuments")]));
        assert_eq!(
            svc.list_blobs("zeta", None).unwrap().names().collect::<Vec<_>>(),
            vec!["second", "first"]
        );
        let downloaded = svc.download_blob("zeta", "second").await.unwrap();
        assert_eq!(&downloaded.content[..], b"22");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn downloads_during_overwrite_see_whole_versions() {
        let (_dir, svc) = service().await;
        svc.create_container("docs", PublicAccess::Private).await.unwrap();
        let versions: Vec<Vec<u8>> = (0..6u8)
            .map(|i| vec![b'a' + i; 16 * 1024 + usize::from(i) * 512])
            .collect();
        svc.upload_blob("docs", "hot", versions[0].clone(), "application/octet-stream")
            .await
            .unwrap();

        let writer = {
            let svc = svc.clone();
            let versions = versions.clone();
            tokio::spawn(async move {
                for body in versions.iter().cycle().skip(1).take(40) {
                    svc.upload_blob("docs", "hot", body.clone(), "application/octet-stream")
                        .await
                        .unwrap();
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let svc = svc.clone();
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    for _ in 0..50 {
                        seen.push(svc.download_blob("docs", "hot").await.unwrap());
                        tokio::task::yield_now().await;
                    }
                    seen
                })
            })
            .collect();

        writer.await.unwrap();
        for reader in readers {
            for downloaded in reader.await.unwrap() {
                assert!(versions.iter().any(|v| v[..] == downloaded.content[..]));
                assert_eq!(
                    downloaded.properties.size_bytes,
                    downloaded.content.len() as u64
                );
            }
        }
    }

    #[tokio::test]
    async fn vanished_content_reports_blob_not_found() {
        let (_dir, svc) = service().await;
        svc.create_container("docs", PublicAccess::Private).await.unwrap();
        svc.upload_blob("docs", "a.txt", "hello", "text/plain").await.unwrap();
        let props = svc.get_blob_properties("docs", "a.txt").await.unwrap();
        let path = svc
            .inner
            .engine
            .content_path(props.container_id, "a.txt", &props.content_file);
        std::fs::remove_file(path).unwrap();

        let err = svc.download_blob("docs", "a.txt").await.unwrap_err();
        assert!(matches!(err, StorageError::BlobNotFound { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn downloads_racing_container_delete_report_the_container() {
        let (_dir, svc) = service().await;
        for round in 0..20 {
            svc.create_container("docs", PublicAccess::Private).await.unwrap();
            for i in 0..4 {
                svc.upload_blob("docs", &format!("blob-{i}"), "payload", "text/plain")
                    .await
                    .unwrap();
            }

            let readers: Vec<_> = (0..8)
                .map(|i| {
                    let svc = svc.clone();
                    tokio::spawn(async move {
                        let name = format!("blob-{}", i % 4);
                        let mut results = Vec::new();
                        for _ in 0..10 {
                            results.push(svc.download_blob("docs", &name).await.map(|_| ()));
                        }
                        results
                    })
                })
                .collect();
            svc.delete_container("docs").await.unwrap();

            for reader in readers {
                for result in reader.await.unwrap() {
                    if let Err(err) = result {
                        assert!(
                            matches!(err, StorageError::ContainerNotFound(_)),
                            "round {round}: {err}"
                        );
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn delete_container_waits_for_inflight_upload() {
        let (_dir, svc) = service().await;
        let container = svc.create_container("docs", PublicAccess::Private).await.unwrap();
        let entry = svc.inner.index.get_container("docs").unwrap();

        let (tx, rx) = futures::channel::mpsc::unbounded::<io::Result<Bytes>>();
        tx.unbounded_send(Ok(Bytes::from_static(b"first half, "))).unwrap();
        let upload = {
            let svc = svc.clone();
            tokio::spawn(async move {
                svc.upload_blob_stream("docs", "big.bin", UploadOptions::default(), rx)
                    .await
            })
        };
        // Wait until the upload holds the container gate.
        while entry.gate().try_write().is_ok() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let delete = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.delete_container("docs").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!delete.is_finished());
        assert!(svc.get_container("docs").await.is_ok());

        // Queued behind the pending delete.
        let late = {
            let svc = svc.clone();
            tokio::spawn(async move {
                svc.upload_blob("docs", "late.txt", "late", "text/plain").await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!late.is_finished());

        tx.unbounded_send(Ok(Bytes::from_static(b"second half"))).unwrap();
        drop(tx);
        let receipt = upload.await.unwrap().unwrap();
        assert!(receipt.uri.ends_with("/docs/big.bin"));
        delete.await.unwrap().unwrap();

        let err = late.await.unwrap().unwrap_err();
        assert!(matches!(err, StorageError::ContainerNotFound(name) if name == "docs"));
        assert!(!svc.list_containers().names().any(|n| n == "docs"));
        assert!(!svc.inner.engine.container_root(container.id).exists());
    }

    #[test]
    fn blob_name_rules() {
        assert!(ensure_blob_name_safe("a").is_ok());
        assert!(ensure_blob_name_safe("photos/2025/img.jpg").is_ok());
        assert!(ensure_blob_name_safe("../escape").is_ok());
        assert!(ensure_blob_name_safe("").is_err());
        assert!(ensure_blob_name_safe("tab\there").is_err());
        assert!(ensure_blob_name_safe("back\\slash").is_err());
        assert!(ensure_blob_name_safe(&"x".repeat(1025)).is_err());
    }
}
