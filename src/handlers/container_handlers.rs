//! HTTP handlers for container operations.

use crate::{
    errors::AppError,
    handlers::{
        blob_handlers::BlobItem,
        headers::{
            PUBLIC_ACCESS, insert_last_modified, insert_metadata_headers, metadata_from_headers,
            public_access_from_headers,
        },
    },
    models::container::{Container, ContainerProperties},
    services::blob_service::BlobService,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

/// Query params accepted on `/{container}`.
#[derive(Debug, Default, Deserialize)]
pub struct ContainerQuery {
    /// `metadata` on PUT, `properties` on GET.
    pub comp: Option<String>,
    /// Accepted for client compatibility; always `container`.
    pub restype: Option<String>,
    /// Name prefix filter for blob listings.
    pub prefix: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ContainerList {
    pub containers: Vec<Container>,
}

#[derive(Debug, Serialize)]
pub struct BlobList {
    pub container: String,
    pub prefix: Option<String>,
    pub blobs: Vec<BlobItem>,
}

/// GET `/`: list containers in creation order.
pub async fn list_containers(State(service): State<BlobService>) -> Json<ContainerList> {
    let containers = service.list_containers().iter().cloned().collect();
    Json(ContainerList { containers })
}

/// PUT `/{container}`: create a container, or replace its metadata with `?comp=metadata`.
pub async fn put_container(
    State(service): State<BlobService>,
    Path(container): Path<String>,
    Query(q): Query<ContainerQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    match q.comp.as_deref() {
        None => {
            let access = public_access_from_headers(&headers)?;
            let created = service.create_container(&container, access).await?;
            let mut response = (StatusCode::CREATED, Json(&created)).into_response();
            insert_last_modified(response.headers_mut(), &created.last_modified);
            Ok(response)
        }
        Some("metadata") => {
            let metadata = metadata_from_headers(&headers)?;
            let props = service.set_container_metadata(&container, metadata).await?;
            let mut response = Response::new(Body::empty());
            insert_last_modified(response.headers_mut(), &props.last_modified);
            Ok(response)
        }
        Some(other) => Err(unsupported_comp(other)),
    }
}

/// GET `/{container}`: list blobs (`?prefix=`), or properties with `?comp=properties`.
pub async fn get_container(
    State(service): State<BlobService>,
    Path(container): Path<String>,
    Query(q): Query<ContainerQuery>,
) -> Result<Response, AppError> {
    match q.comp.as_deref() {
        None | Some("list") => {
            let listing = service.list_blobs(&container, q.prefix.as_deref())?;
            let blobs = listing.iter().map(BlobItem::from).collect();
            Ok(Json(BlobList {
                container,
                prefix: q.prefix,
                blobs,
            })
            .into_response())
        }
        Some("properties") | Some("metadata") => {
            let props = service.get_container_properties(&container).await?;
            Ok(properties_response(Json(&props).into_response(), &props))
        }
        Some(other) => Err(unsupported_comp(other)),
    }
}

/// HEAD `/{container}`: container properties as headers only.
pub async fn head_container(
    State(service): State<BlobService>,
    Path(container): Path<String>,
) -> Result<Response, AppError> {
    let props = service.get_container_properties(&container).await?;
    Ok(properties_response(Response::new(Body::empty()), &props))
}

/// DELETE `/{container}`: delete a container and all of its blobs.
pub async fn delete_container(
    State(service): State<BlobService>,
    Path(container): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    service.delete_container(&container).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn properties_response(mut response: Response, props: &ContainerProperties) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        PUBLIC_ACCESS,
        HeaderValue::from_static(props.public_access.as_str()),
    );
    insert_last_modified(headers, &props.last_modified);
    insert_metadata_headers(headers, &props.metadata);
    response
}

fn unsupported_comp(comp: &str) -> AppError {
    AppError::bad_request("UnsupportedQueryParameter", format!("comp={comp} is not supported"))
}
