//! Container map definitions
//!
//! A container map is the declarative description of a container topology:
//! named container assignments plus the volume and host alias tables their
//! shared volumes and binds are resolved against.

pub mod assignment;
pub mod container_map;
pub mod parser;

pub use assignment::{Assignment, BindSpec, DependencyRef, LinkSpec, PortBinding, Protocol};
pub use container_map::{ContainerMap, HostPath, HostTable};
pub use parser::MapParser;
