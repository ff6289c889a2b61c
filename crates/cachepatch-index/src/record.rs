//! Record types stored in the content index.

use cachepatch_common::{ArtifactId, ArtifactType, StableName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Metadata for the current highest known version of an artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMeta {
    /// Version number decoded from the directory name (monotonic per
    /// stable name).
    pub version: i32,
    /// Filesystem location of this version's payload file.
    pub path: PathBuf,
    /// Names of handlers that have already completed a pass against this
    /// exact version.
    pub patched_by: BTreeSet<String>,
}

impl VersionMeta {
    /// Fresh metadata for a newly observed version; nothing has patched a
    /// new version yet.
    #[must_use]
    pub fn new(version: i32, path: PathBuf) -> Self {
        Self {
            version,
            path,
            patched_by: BTreeSet::new(),
        }
    }
}

/// One indexed artifact. Exactly one record exists per stable name, and it
/// always reflects the highest version observed, never older ones.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Identity embedded in the payload.
    pub id: ArtifactId,
    /// Recognized content kind.
    pub artifact_type: ArtifactType,
    /// Filesystem grouping key.
    pub stable_name: StableName,
    /// Highest-version metadata.
    pub version_meta: VersionMeta,
}

impl ContentRecord {
    /// Replace the version metadata with a strictly newer version,
    /// clearing the patch history.
    pub fn upgrade(&mut self, version: i32, path: PathBuf) {
        debug_assert!(version > self.version_meta.version);
        self.version_meta = VersionMeta::new(version, path);
    }
}
