//! Defines routes for health checks and the object API.
//!
//! ## Structure
//! - **Health**
//!   - `GET    /health`, `GET /readyz`, `GET /api/status`
//!
//! - **Collection endpoints**
//!   - `GET    /api/objects` — list (search, email_filter, sort, order, limit, offset)
//!   - `POST   /api/objects` — create
//!   - `GET    /api/objects/refresh` — rescan the datasites
//!   - `POST   /api/objects/delete` — bulk delete
//!
//! - **Object endpoints**
//!   - `GET    /api/objects/{uid}` — details and previews
//!   - `PATCH  /api/objects/{uid}` — rename / describe
//!   - `DELETE /api/objects/{uid}` — delete
//!   - `PUT    /api/objects/{uid}/file/{side}` — replace private or mock content
//!   - `PUT    /api/objects/{uid}/permissions` — replace access lists
//!
//! - **Lookups**
//!   - `GET    /api/metadata/emails`, `GET /api/metadata/names`
//!   - `GET    /api/file?syft_url=...` — raw file content
//!
//! Static segments (`refresh`, `delete`) are matched before `{uid}`.

use crate::{
    handlers::{
        health_handlers::{health, readyz, status},
        object_handlers::{
            create_object, delete_object, delete_objects, get_file, get_object, list_objects,
            refresh_objects, unique_emails, unique_names, update_details, update_file,
            update_permissions,
        },
    },
    services::object_service::ObjectService,
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build the router; handlers share `ObjectService` as state.
pub fn routes() -> Router<ObjectService> {
    Router::new()
        .route("/health", get(health))
        .route("/readyz", get(readyz))
        .route("/api/status", get(status))
        .route("/api/objects", get(list_objects).post(create_object))
        .route("/api/objects/refresh", get(refresh_objects))
        .route("/api/objects/delete", post(delete_objects))
        .route(
            "/api/objects/{uid}",
            get(get_object).patch(update_details).delete(delete_object),
        )
        .route("/api/objects/{uid}/file/{side}", put(update_file))
        .route("/api/objects/{uid}/permissions", put(update_permissions))
        .route("/api/metadata/emails", get(unique_emails))
        .route("/api/metadata/names", get(unique_names))
        .route("/api/file", get(get_file))
}
