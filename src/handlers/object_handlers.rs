//! HTTP handlers for object operations.
//! Streams file bodies in both directions and delegates everything else to
//! `ObjectService`.

use crate::{
    errors::AppError,
    models::permissions::PermissionsUpdate,
    services::{
        object_factory::CreateObjectRequest,
        object_service::{
            BulkDeleteReport, DeleteOutcome, DetailsUpdate, FileWriteResult, ListObjectsParams,
            ListObjectsResult, ObjectDetail, ObjectService, ObjectSummary,
        },
    },
};
use axum::{
    Json,
    body::Body,
    extract::{FromRequestParts, Path, Query, State},
    http::{HeaderName, HeaderValue, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

/// Header naming the email a request acts as.
pub const REQUESTER_HEADER: &str = "x-syft-user";

/// Email the request acts as: `x-syft-user`, else the configured local user.
#[derive(Debug, Clone)]
pub struct Requester(pub String);

impl FromRequestParts<ObjectService> for Requester {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        service: &ObjectService,
    ) -> Result<Self, Self::Rejection> {
        match parts.headers.get(REQUESTER_HEADER) {
            Some(value) => {
                let email = value
                    .to_str()
                    .map_err(|_| AppError::bad_request("x-syft-user must be visible ASCII"))?
                    .trim();
                if email.is_empty() {
                    return Err(AppError::bad_request("x-syft-user must not be empty"));
                }
                Ok(Self(email.to_string()))
            }
            None => Ok(Self(service.user_email.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    pub uids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub syft_url: String,
}

#[derive(Debug, Serialize)]
pub struct PermissionsResponse {
    pub uid: Uuid,
    pub changed: Vec<&'static str>,
    pub permissions: crate::models::permissions::Permissions,
    pub updated_at: DateTime<Utc>,
}

/// GET `/api/objects`
pub async fn list_objects(
    State(service): State<ObjectService>,
    Requester(requester): Requester,
    Query(params): Query<ListObjectsParams>,
) -> Result<Json<ListObjectsResult>, AppError> {
    Ok(Json(service.list_objects(&requester, params).await?))
}

/// POST `/api/objects`
pub async fn create_object(
    State(service): State<ObjectService>,
    Requester(requester): Requester,
    Json(request): Json<CreateObjectRequest>,
) -> Result<(StatusCode, Json<ObjectSummary>), AppError> {
    let manifest = service.create_object(&requester, request).await?;
    Ok((
        StatusCode::CREATED,
        Json(service.summarize(&manifest, &requester, 1)),
    ))
}

/// GET `/api/objects/refresh`
pub async fn refresh_objects(
    State(service): State<ObjectService>,
    Requester(requester): Requester,
) -> Result<impl IntoResponse, AppError> {
    let count = service.refresh(&requester).await?;
    Ok(Json(json!({
        "message": format!("refreshed {} objects", count),
        "count": count,
    })))
}

/// POST `/api/objects/delete`. 500 only when every unit failed.
pub async fn delete_objects(
    State(service): State<ObjectService>,
    Requester(requester): Requester,
    Json(request): Json<BulkDeleteRequest>,
) -> Result<(StatusCode, Json<BulkDeleteReport>), AppError> {
    if request.uids.is_empty() {
        return Err(AppError::bad_request("no uids given"));
    }
    let report = service.delete_objects(&requester, request.uids).await?;
    let status = if report.all_failed() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    Ok((status, Json(report)))
}

/// GET `/api/objects/{uid}`
pub async fn get_object(
    State(service): State<ObjectService>,
    Requester(requester): Requester,
    Path(uid): Path<String>,
) -> Result<Json<ObjectDetail>, AppError> {
    Ok(Json(service.get_object(&requester, &uid).await?))
}

/// PATCH `/api/objects/{uid}`
pub async fn update_details(
    State(service): State<ObjectService>,
    Requester(requester): Requester,
    Path(uid): Path<String>,
    Json(update): Json<DetailsUpdate>,
) -> Result<Json<ObjectDetail>, AppError> {
    Ok(Json(service.update_details(&requester, &uid, update).await?))
}

/// DELETE `/api/objects/{uid}`
pub async fn delete_object(
    State(service): State<ObjectService>,
    Requester(requester): Requester,
    Path(uid): Path<String>,
) -> Result<Json<DeleteOutcome>, AppError> {
    Ok(Json(service.delete_object(&requester, &uid).await?))
}

/// PUT `/api/objects/{uid}/file/{side}` with the new content as the body.
pub async fn update_file(
    State(service): State<ObjectService>,
    Requester(requester): Requester,
    Path((uid, side)): Path<(String, String)>,
    body: Body,
) -> Result<Json<FileWriteResult>, AppError> {
    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));
    Ok(Json(
        service
            .write_artifact_stream(&requester, &uid, &side, stream)
            .await?,
    ))
}

/// PUT `/api/objects/{uid}/permissions`
pub async fn update_permissions(
    State(service): State<ObjectService>,
    Requester(requester): Requester,
    Path(uid): Path<String>,
    Json(update): Json<PermissionsUpdate>,
) -> Result<Json<PermissionsResponse>, AppError> {
    let (manifest, changed) = service
        .update_permissions(&requester, &uid, update)
        .await?;
    Ok(Json(PermissionsResponse {
        uid: manifest.uid,
        changed,
        permissions: manifest.permissions,
        updated_at: manifest.updated_at,
    }))
}

/// GET `/api/metadata/emails`
pub async fn unique_emails(
    State(service): State<ObjectService>,
    Requester(requester): Requester,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(service.unique_emails(&requester).await?))
}

/// GET `/api/metadata/names`
pub async fn unique_names(
    State(service): State<ObjectService>,
    Requester(requester): Requester,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(service.unique_names(&requester).await?))
}

/// GET `/api/file?syft_url=...` as a streaming response.
pub async fn get_file(
    State(service): State<ObjectService>,
    Requester(requester): Requester,
    Query(query): Query<FileQuery>,
) -> Result<Response, AppError> {
    let artifact = service.open_artifact(&requester, &query.syft_url).await?;
    let content_type = content_type_for(&artifact.path);

    let mut response = Response::new(Body::from_stream(ReaderStream::new(artifact.file)));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(artifact.len));
    if let Ok(value) = HeaderValue::from_str(&artifact.uid.to_string()) {
        headers.insert(HeaderName::from_static("x-syft-object-uid"), value);
    }
    headers.insert(
        HeaderName::from_static("x-syft-file-type"),
        HeaderValue::from_static(artifact.kind.as_str()),
    );
    Ok(response)
}

fn content_type_for(path: &std::path::Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "md" | "log" => "text/plain; charset=utf-8",
        "csv" => "text/csv; charset=utf-8",
        "json" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "html" | "htm" => "text/html; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}
