//! Shared services for the refract workspace: logging setup and collection aliases.

pub mod collections;
pub mod log;
