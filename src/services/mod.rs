//! Object discovery, path resolution and the operations built on them.

pub mod object_factory;
pub mod object_service;
pub mod registry;
pub mod resolver;
