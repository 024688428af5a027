//! Browse and manage syft objects: manifests that pair a private artifact
//! with a shareable mock, stored in per-user SyftBox datasites.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

use axum::Router;
use services::object_service::ObjectService;

/// Router with state applied, ready for `axum::serve` or `oneshot` tests.
pub fn app(service: ObjectService) -> Router {
    routes::routes::routes().with_state(service)
}
