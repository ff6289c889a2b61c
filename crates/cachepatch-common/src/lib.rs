//! Shared foundations for cachepatch.
//!
//! This crate defines the identity types used across the system, the
//! version codec for hex directory-name tokens and the daemon
//! configuration structures.

pub mod config;
pub mod types;
pub mod version;

pub use types::{ArtifactId, ArtifactIdError, ArtifactType, StableName};
pub use version::{decode_version, VersionError};
