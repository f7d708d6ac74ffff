//! Header conventions shared by container and blob handlers.
//!
//! User metadata travels as `x-ms-meta-{key}` headers in both directions.
//! Header names are case-insensitive, so keys arriving over HTTP are
//! lowercase.

use crate::{
    errors::AppError,
    models::{container::PublicAccess, metadata::Metadata},
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use chrono::{DateTime, Utc};

pub const META_PREFIX: &str = "x-ms-meta-";
pub const PUBLIC_ACCESS: &str = "x-ms-blob-public-access";
pub const CREATION_TIME: &str = "x-ms-creation-time";

/// Collect `x-ms-meta-*` headers. A repeated key keeps its last value.
pub fn metadata_from_headers(headers: &HeaderMap) -> Result<Metadata, AppError> {
    let mut metadata = Metadata::new();
    for (name, value) in headers {
        let Some(key) = name.as_str().strip_prefix(META_PREFIX) else {
            continue;
        };
        let value = value.to_str().map_err(|_| {
            AppError::bad_request(
                "InvalidMetadata",
                format!("metadata `{key}` must be visible ASCII"),
            )
        })?;
        metadata.insert(key.to_string(), value.to_string());
    }
    Ok(metadata)
}

pub fn public_access_from_headers(headers: &HeaderMap) -> Result<PublicAccess, AppError> {
    match headers.get(PUBLIC_ACCESS) {
        None => Ok(PublicAccess::Private),
        Some(value) => value
            .to_str()
            .map_err(|_| AppError::bad_request("InvalidHeaderValue", "unreadable access level"))?
            .parse()
            .map_err(|msg: String| AppError::bad_request("InvalidHeaderValue", msg)),
    }
}

pub fn insert_metadata_headers(headers: &mut HeaderMap, metadata: &Metadata) {
    for (key, value) in metadata {
        let name = HeaderName::try_from(format!("{META_PREFIX}{}", key.to_ascii_lowercase()));
        if let (Ok(name), Ok(value)) = (name, HeaderValue::from_str(value)) {
            headers.append(name, value);
        }
    }
}

pub fn insert_last_modified(headers: &mut HeaderMap, at: &DateTime<Utc>) {
    if let Ok(value) = HeaderValue::from_str(&http_date(at)) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

/// IMF-fixdate, e.g. `Tue, 15 Nov 1994 08:12:31 GMT`.
pub fn http_date(at: &DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
