//! In-memory namespace of containers and blob references.
//!
//! The index maps names to records and keeps creation order. Every lookup
//! and mutation happens under a short synchronous lock that is never held
//! across I/O; listings copy a point-in-time snapshot out of the lock.

use crate::{
    models::{blob::Blob, container::Container},
    storage::error::{StorageError, StorageResult},
};
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tokio::sync::RwLock as AsyncRwLock;
use uuid::Uuid;

/// An immutable, restartable view of a listing.
///
/// Iterating a snapshot never observes writes made after it was taken, and
/// it can be iterated any number of times.
#[derive(Debug)]
pub struct Snapshot<T> {
    items: Arc<[T]>,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> Snapshot<T> {
    fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<'a, T> IntoIterator for &'a Snapshot<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Entities that can be listed by name.
pub trait Named {
    fn name(&self) -> &str;
}

impl Named for Container {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for Blob {
    fn name(&self) -> &str {
        &self.name
    }
}

impl<T: Named> Snapshot<T> {
    /// Names in listing order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.items.iter().map(Named::name)
    }
}

#[derive(Debug, Default)]
struct ContainerTable {
    by_name: HashMap<String, Arc<ContainerEntry>>,
    order: BTreeMap<u64, String>,
}

/// Registry of live containers.
#[derive(Debug, Default)]
pub struct NamespaceIndex {
    table: RwLock<ContainerTable>,
    next_seq: AtomicU64,
}

impl NamespaceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new, empty container.
    pub fn create_container(&self, container: Container) -> StorageResult<Arc<ContainerEntry>> {
        let mut table = self.table.write();
        if table.by_name.contains_key(&container.name) {
            return Err(StorageError::ContainerAlreadyExists(container.name));
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let name = container.name.clone();
        let entry = Arc::new(ContainerEntry::new(seq, container));
        table.by_name.insert(name.clone(), Arc::clone(&entry));
        table.order.insert(seq, name);
        Ok(entry)
    }

    pub fn get_container(&self, name: &str) -> StorageResult<Arc<ContainerEntry>> {
        self.table
            .read()
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::ContainerNotFound(name.to_string()))
    }

    /// Containers in creation order.
    pub fn list_containers(&self) -> Snapshot<Container> {
        let table = self.table.read();
        let items = table
            .order
            .values()
            .filter_map(|name| table.by_name.get(name))
            .map(|entry| entry.record())
            .collect();
        Snapshot::new(items)
    }

    /// Unregister a container. Its blob references go with it.
    ///
    /// The returned entry is marked deleted, so holders of a stale handle
    /// observe the deletion.
    pub fn delete_container(&self, name: &str) -> StorageResult<Arc<ContainerEntry>> {
        let mut table = self.table.write();
        let entry = table
            .by_name
            .remove(name)
            .ok_or_else(|| StorageError::ContainerNotFound(name.to_string()))?;
        table.order.remove(&entry.seq);
        entry.deleted.store(true, Ordering::Release);
        entry.blobs.write().clear();
        Ok(entry)
    }

    pub fn container_count(&self) -> usize {
        self.table.read().by_name.len()
    }
}

#[derive(Debug)]
struct BlobSlot {
    seq: u64,
    blob: Blob,
}

#[derive(Debug, Default)]
struct BlobTable {
    by_name: HashMap<String, BlobSlot>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl BlobTable {
    fn clear(&mut self) {
        self.by_name.clear();
        self.order.clear();
    }
}

/// Handle to one container: its record, its blob references and its gate.
///
/// The gate is held shared by blob operations and exclusively by container
/// deletion.
#[derive(Debug)]
pub struct ContainerEntry {
    id: Uuid,
    name: String,
    seq: u64,
    record: RwLock<Container>,
    blobs: RwLock<BlobTable>,
    gate: Arc<AsyncRwLock<()>>,
    deleted: AtomicBool,
}

impl ContainerEntry {
    fn new(seq: u64, container: Container) -> Self {
        Self {
            id: container.id,
            name: container.name.clone(),
            seq,
            record: RwLock::new(container),
            blobs: RwLock::new(BlobTable::default()),
            gate: Arc::new(AsyncRwLock::new(())),
            deleted: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record(&self) -> Container {
        self.record.read().clone()
    }

    pub fn replace_record(&self, container: Container) {
        *self.record.write() = container;
    }

    pub fn gate(&self) -> Arc<AsyncRwLock<()>> {
        Arc::clone(&self.gate)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Mark the container deleted while it is still registered, so readers
    /// racing its removal report the container rather than its blobs.
    pub fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    /// Undo [`mark_deleted`](Self::mark_deleted) after a failed removal.
    pub fn restore(&self) {
        self.deleted.store(false, Ordering::Release);
    }

    /// Insert or overwrite a blob reference, returning the one it replaced.
    ///
    /// An overwrite keeps the blob's original position in listings.
    pub fn put_blob_ref(&self, blob: Blob) -> Option<Blob> {
        let mut table = self.blobs.write();
        if let Some(slot) = table.by_name.get_mut(&blob.name) {
            return Some(std::mem::replace(&mut slot.blob, blob));
        }
        let seq = table.next_seq;
        table.next_seq += 1;
        table.order.insert(seq, blob.name.clone());
        table.by_name.insert(blob.name.clone(), BlobSlot { seq, blob });
        None
    }

    pub fn get_blob_ref(&self, name: &str) -> StorageResult<Blob> {
        self.blobs
            .read()
            .by_name
            .get(name)
            .map(|slot| slot.blob.clone())
            .ok_or_else(|| self.blob_not_found(name))
    }

    pub fn contains_blob(&self, name: &str) -> bool {
        self.blobs.read().by_name.contains_key(name)
    }

    /// Blobs in creation order, optionally restricted to names with `prefix`.
    pub fn list_blobs(&self, prefix: Option<&str>) -> Snapshot<Blob> {
        let table = self.blobs.read();
        let items = table
            .order
            .values()
            .filter(|name| prefix.is_none_or(|p| name.starts_with(p)))
            .filter_map(|name| table.by_name.get(name))
            .map(|slot| slot.blob.clone())
            .collect();
        Snapshot::new(items)
    }

    pub fn delete_blob_ref(&self, name: &str) -> StorageResult<Blob> {
        let mut table = self.blobs.write();
        let slot = table
            .by_name
            .remove(name)
            .ok_or_else(|| self.blob_not_found(name))?;
        table.order.remove(&slot.seq);
        Ok(slot.blob)
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.read().by_name.len()
    }

    fn blob_not_found(&self, name: &str) -> StorageError {
        StorageError::BlobNotFound {
            container: self.name.clone(),
            blob: name.to_string(),
        }
    }
}
