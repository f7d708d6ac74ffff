//! HTTP handlers for blob operations.
//! Streams blob bodies to avoid buffering in memory and delegates storage
//! concerns to `BlobService`.

use crate::{
    errors::AppError,
    handlers::headers::{
        CREATION_TIME, http_date, insert_last_modified, insert_metadata_headers,
        metadata_from_headers,
    },
    models::{blob::Blob, metadata::Metadata},
    services::blob_service::{BlobService, UploadOptions},
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::io;
use tokio_util::io::ReaderStream;

/// Query params accepted on `/{container}/{*blob}`.
#[derive(Debug, Default, Deserialize)]
pub struct BlobQuery {
    /// `metadata` on PUT replaces the blob's metadata without touching content.
    pub comp: Option<String>,
}

/// Public view of a blob in listings.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct BlobItem {
    pub name: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub etag: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub metadata: Metadata,
}

impl From<&Blob> for BlobItem {
    fn from(blob: &Blob) -> Self {
        Self {
            name: blob.name.clone(),
            content_type: blob.content_type.clone(),
            size_bytes: blob.size_bytes,
            etag: blob.etag.clone(),
            created_at: blob.created_at,
            last_modified: blob.last_modified,
            metadata: blob.metadata.clone(),
        }
    }
}

/// PUT `/{container}/{*blob}`: upload a blob, or replace its metadata with `?comp=metadata`.
pub async fn put_blob(
    State(service): State<BlobService>,
    Path((container, blob)): Path<(String, String)>,
    Query(q): Query<BlobQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let metadata = metadata_from_headers(&headers)?;
    match q.comp.as_deref() {
        None => {
            let content_type = headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string());

            let stream = body.into_data_stream().map(|chunk| chunk.map_err(io::Error::other));

            let options = UploadOptions {
                content_type,
                metadata,
            };
            let receipt = service
                .upload_blob_stream(&container, &blob, options, stream)
                .await?;

            let mut response = (StatusCode::CREATED, Json(&receipt)).into_response();
            let resp_headers = response.headers_mut();
            insert_etag(resp_headers, &receipt.etag);
            insert_last_modified(resp_headers, &receipt.last_modified);
            Ok(response)
        }
        Some("metadata") => {
            let updated = service.set_blob_metadata(&container, &blob, metadata).await?;
            let mut response = Response::new(Body::empty());
            insert_etag(response.headers_mut(), &updated.etag);
            insert_last_modified(response.headers_mut(), &updated.last_modified);
            Ok(response)
        }
        Some(other) => Err(AppError::bad_request(
            "UnsupportedQueryParameter",
            format!("comp={other} is not supported"),
        )),
    }
}

/// GET `/{container}/{*blob}`: download a blob as a streaming response.
pub async fn get_blob(
    State(service): State<BlobService>,
    Path((container, blob)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (meta, file) = service.open_blob(&container, &blob).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_blob_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// HEAD `/{container}/{*blob}`: same headers as GET but no body.
pub async fn head_blob(
    State(service): State<BlobService>,
    Path((container, blob)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let meta = service.get_blob_properties(&container, &blob).await?;
    let mut response = Response::new(Body::empty());
    set_blob_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// DELETE `/{container}/{*blob}`
pub async fn delete_blob(
    State(service): State<BlobService>,
    Path((container, blob)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    service.delete_blob(&container, &blob).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn set_blob_headers(headers: &mut HeaderMap, meta: &Blob) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&meta.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size_bytes));
    insert_etag(headers, &meta.etag);
    if let Ok(value) = HeaderValue::from_str(&meta.content_md5) {
        headers.insert(HeaderName::from_static("content-md5"), value);
    }
    if let Ok(value) = HeaderValue::from_str(&http_date(&meta.created_at)) {
        headers.insert(HeaderName::from_static(CREATION_TIME), value);
    }
    insert_last_modified(headers, &meta.last_modified);
    insert_metadata_headers(headers, &meta.metadata);
}

fn insert_etag(headers: &mut HeaderMap, etag: &str) {
    if let Ok(value) = HeaderValue::from_str(&format!("\"{etag}\"")) {
        headers.insert(header::ETAG, value);
    }
}
