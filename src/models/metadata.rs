//! User-defined key/value metadata attached to containers and blobs.

use crate::storage::error::{StorageError, StorageResult};
use std::collections::{BTreeMap, HashSet};

/// Metadata map of an entity.
///
/// Keys are unique; inserting an existing key overwrites the previous value,
/// so the last write wins when a caller supplies a key twice.
pub type Metadata = BTreeMap<String, String>;

const MAX_METADATA_KEY_LEN: usize = 256;

/// Validate every entry of a metadata map.
///
/// Keys follow identifier rules: they start with an ASCII letter or `_` and
/// continue with ASCII alphanumerics or `_`. Values must be printable ASCII
/// so they can travel in HTTP headers. Keys are compared case-insensitively,
/// matching the header names they are sent as, so two keys differing only
/// in case are rejected.
pub fn validate_metadata(metadata: &Metadata) -> StorageResult<()> {
    let mut seen = HashSet::with_capacity(metadata.len());
    for (key, value) in metadata {
        validate_key(key)?;
        if !seen.insert(key.to_ascii_lowercase()) {
            return Err(StorageError::InvalidMetadata {
                key: key.clone(),
                reason: "key differs from another key only in case".into(),
            });
        }
        if !value.bytes().all(|b| b == b' ' || b.is_ascii_graphic()) {
            return Err(StorageError::InvalidMetadata {
                key: key.clone(),
                reason: "value must contain printable ASCII only".into(),
            });
        }
    }
    Ok(())
}

fn validate_key(key: &str) -> StorageResult<()> {
    let invalid = |reason: &str| StorageError::InvalidMetadata {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    let mut chars = key.chars();
    match chars.next() {
        None => return Err(invalid("key cannot be empty")),
        Some(c) if !(c.is_ascii_alphabetic() || c == '_') => {
            return Err(invalid("key must start with a letter or underscore"));
        }
        Some(_) => {}
    }
    if key.len() > MAX_METADATA_KEY_LEN {
        return Err(invalid("key is too long"));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid("key may contain letters, digits and underscores only"));
    }
    Ok(())
}
