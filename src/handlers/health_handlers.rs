//! Health & readiness handlers.
//!
//! - GET /health      -> simple liveness ("ok")
//! - GET /readyz      -> readiness that checks disk I/O under the datasites root
//! - GET /api/status  -> service identity, visible object count and scan time

use crate::{
    errors::AppError, handlers::object_handlers::Requester, services::object_service::ObjectService,
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::HashMap, path::PathBuf};
use tokio::fs;
use uuid::Uuid;

/// `GET /health`
///
/// Liveness check; never touches the filesystem.
pub async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Writes, reads back and removes a temp file under the datasites root.
/// HTTP 200 when that works, HTTP 503 otherwise.
pub async fn readyz(State(service): State<ObjectService>) -> impl IntoResponse {
    let tmp_path = service
        .datasites_root()
        .join(format!(".readyz-{}", Uuid::new_v4()));
    let disk_check = match fs::write(&tmp_path, b"readyz").await {
        Ok(_) => match fs::read(&tmp_path).await {
            Ok(bytes) if bytes == b"readyz" => match fs::remove_file(&tmp_path).await {
                Ok(_) => (true, None::<String>),
                Err(e) => (true, Some(format!("could not remove tmp file: {}", e))),
            },
            Ok(_) => {
                let _ = fs::remove_file(&tmp_path).await;
                (false, Some("file content mismatch".to_string()))
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                (false, Some(format!("could not read tmp file: {}", e)))
            }
        },
        Err(e) => (false, Some(format!("could not write tmp file: {}", e))),
    };

    let disk_ok = disk_check.0;
    let mut checks = HashMap::new();
    checks.insert(
        "disk",
        CheckStatus {
            ok: disk_ok,
            error: disk_check.1,
        },
    );

    let body = ReadyResponse {
        status: if disk_ok { "ok".into() } else { "error".into() },
        checks,
    };
    let status = if disk_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

/// `GET /api/status`
pub async fn status(
    State(service): State<ObjectService>,
    Requester(requester): Requester,
) -> Result<Json<StatusResponse>, AppError> {
    let snapshot = service.snapshot().await?;
    let object_count = snapshot.visible_to(&requester).len();
    Ok(Json(StatusResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        user_email: service.user_email.to_string(),
        requester,
        datasites_root: service.datasites_root().to_path_buf(),
        object_count,
        scanned_at: snapshot.loaded_at(),
    }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    user_email: String,
    requester: String,
    datasites_root: PathBuf,
    object_count: usize,
    scanned_at: DateTime<Utc>,
}
