//! Core data model for syft objects.
//!
//! An object is a private artifact paired with a mock artifact, described by a
//! single YAML manifest and addressed by its UUID. These types serialize to the
//! manifest format via `serde` and to JSON for the HTTP API.

pub mod locator;
pub mod manifest;
pub mod options;
pub mod permissions;
