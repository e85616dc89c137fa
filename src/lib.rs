//! dockmap - Declarative container map orchestration
//!
//! dockmap manages groups of related containers described by a container
//! map. It provides:
//!
//! - Container maps with volume and host path alias tables
//! - Dependency resolution with cycle detection and deterministic ordering
//! - Attachment (data-only) containers for shared volumes
//! - Volume inheritance through `volumes_from`
//! - An orchestration client driving a Docker-compatible engine

pub mod client;
pub mod engine;
pub mod error;
pub mod map;
pub mod resolver;

pub use error::{MapError, Result};
