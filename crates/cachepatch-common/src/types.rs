//! Core type definitions for cachepatch
//!
//! Identity in the cache is split in two: the filesystem-level
//! [`StableName`] that groups all versions of one logical artifact under a
//! single directory, and the [`ArtifactId`] embedded in the artifact's
//! payload, which identifies the content across the wider ecosystem and is
//! never derived from the filesystem.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Globally unique identity string embedded inside an artifact's payload.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Create a new artifact id (rejects empty identities).
    pub fn new(id: impl Into<String>) -> Result<Self, ArtifactIdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ArtifactIdError::Empty);
        }
        Ok(Self(id))
    }

    /// Get the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArtifactId({:?})", self.0)
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur when creating an artifact id
#[derive(Debug, Clone, thiserror::Error)]
pub enum ArtifactIdError {
    #[error("artifact id must not be empty")]
    Empty,
}

/// Directory-level grouping key identifying one logical artifact across all
/// of its versions.
///
/// Used only for directory correlation; it is never exposed as content
/// identity (that is [`ArtifactId`]'s job).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StableName(String);

impl StableName {
    /// Create a stable name from a raw directory name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Resolve the stable name from a version directory path
    /// (`<root>/<stable>/<hexversion>`).
    #[must_use]
    pub fn from_version_dir(dir: &Path) -> Option<Self> {
        let stable = dir.parent()?.file_name()?.to_str()?;
        Some(Self(stable.to_string()))
    }

    /// Resolve the stable name from a payload-relative path
    /// (`<root>/<stable>/<hexversion>/<file>`).
    #[must_use]
    pub fn from_payload_path(path: &Path) -> Option<Self> {
        Self::from_version_dir(path.parent()?)
    }

    /// Get the stable name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StableName({:?})", self.0)
    }
}

impl fmt::Display for StableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of content an artifact carries.
///
/// The payload's content-type field is an opaque integer at the parser
/// boundary; only these two codes are recognized. Anything else excludes
/// the artifact from indexing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactType {
    /// Wearable content; never gated on the client's load state.
    Avatar,
    /// World content; byte mutation is gated while the client is loading.
    World,
}

impl ArtifactType {
    /// Content-type code for avatars.
    pub const AVATAR_CODE: i32 = 1;
    /// Content-type code for worlds.
    pub const WORLD_CODE: i32 = 2;

    /// Map a decoded content-type code to an artifact type.
    ///
    /// Returns `None` for unrecognized codes; callers treat that as a
    /// decode anomaly and discard the candidate.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            Self::AVATAR_CODE => Some(Self::Avatar),
            Self::WORLD_CODE => Some(Self::World),
            _ => None,
        }
    }

    /// The wire code for this artifact type.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Avatar => Self::AVATAR_CODE,
            Self::World => Self::WORLD_CODE,
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Avatar => write!(f, "avatar"),
            Self::World => write!(f, "world"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_artifact_id_rejects_empty() {
        assert!(ArtifactId::new("").is_err());
        assert!(ArtifactId::new("avtr_x").is_ok());
    }

    #[test]
    fn test_stable_name_from_version_dir() {
        let dir = PathBuf::from("/cache/StableA/0001");
        let name = StableName::from_version_dir(&dir).unwrap();
        assert_eq!(name.as_str(), "StableA");
    }

    #[test]
    fn test_stable_name_from_payload_path() {
        let path = PathBuf::from("/cache/StableA/0001/__data");
        let name = StableName::from_payload_path(&path).unwrap();
        assert_eq!(name.as_str(), "StableA");
    }

    #[test]
    fn test_artifact_type_codes() {
        assert_eq!(ArtifactType::from_code(1), Some(ArtifactType::Avatar));
        assert_eq!(ArtifactType::from_code(2), Some(ArtifactType::World));
        assert_eq!(ArtifactType::from_code(0), None);
        assert_eq!(ArtifactType::from_code(99), None);
        assert_eq!(ArtifactType::World.code(), 2);
    }
}
