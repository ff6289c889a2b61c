//! Built-in blocklist handler.
//!
//! Applies fixed byte replacements, keyed by artifact id, directly against
//! the payload file on disk. Replacements are equal-length so surrounding
//! bundle offsets stay intact; all occurrences of a pattern are rewritten.

use crate::handler::{
    Applicability, BundleRef, HandlerError, PatchHandler, PatchOutcome,
};
use cachepatch_common::ArtifactId;
use cachepatch_index::ContentRecord;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Name the blocklist handler records in patch histories.
pub const BLOCKLIST_HANDLER_NAME: &str = "Blocklist";

/// Errors loading blocklist data
#[derive(Debug, Error)]
pub enum BlocklistError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid blocklist json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid hex in blocklist entry for {id}: {source}")]
    Hex {
        id: String,
        #[source]
        source: hex::FromHexError,
    },

    #[error("replacement for {id} changes length ({find} -> {replace} bytes)")]
    LengthMismatch {
        id: String,
        find: usize,
        replace: usize,
    },

    #[error("blocklist entry has empty artifact id")]
    EmptyId,
}

/// One equal-length find/replace pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ByteReplacement {
    /// Bytes to search for.
    pub find: Vec<u8>,
    /// Bytes written over every occurrence.
    pub replace: Vec<u8>,
}

/// Serialized form: hex strings keyed by artifact id.
#[derive(Debug, Deserialize)]
struct RawReplacement {
    find: String,
    replace: String,
}

/// Mapping from artifact id to its ordered byte replacements.
#[derive(Clone, Debug, Default)]
pub struct Blocklist {
    entries: HashMap<ArtifactId, Vec<ByteReplacement>>,
}

impl Blocklist {
    /// An empty blocklist (applies to nothing).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load blocklist data from a JSON file of the shape
    /// `{ "<artifact id>": [ { "find": "<hex>", "replace": "<hex>" } ] }`.
    pub fn from_json_file(path: &Path) -> Result<Self, BlocklistError> {
        let raw: HashMap<String, Vec<RawReplacement>> =
            serde_json::from_str(&fs::read_to_string(path)?)?;

        let mut blocklist = Self::empty();
        for (id, raws) in raw {
            let artifact_id =
                ArtifactId::new(id.clone()).map_err(|_| BlocklistError::EmptyId)?;
            let mut replacements = Vec::with_capacity(raws.len());
            for r in raws {
                let find = hex::decode(&r.find).map_err(|source| BlocklistError::Hex {
                    id: id.clone(),
                    source,
                })?;
                let replace =
                    hex::decode(&r.replace).map_err(|source| BlocklistError::Hex {
                        id: id.clone(),
                        source,
                    })?;
                if find.len() != replace.len() {
                    return Err(BlocklistError::LengthMismatch {
                        id,
                        find: find.len(),
                        replace: replace.len(),
                    });
                }
                replacements.push(ByteReplacement { find, replace });
            }
            blocklist.entries.insert(artifact_id, replacements);
        }
        Ok(blocklist)
    }

    /// Add replacements for an artifact id (equal lengths required).
    pub fn insert(
        &mut self,
        id: ArtifactId,
        replacements: Vec<ByteReplacement>,
    ) -> Result<(), BlocklistError> {
        for r in &replacements {
            if r.find.len() != r.replace.len() {
                return Err(BlocklistError::LengthMismatch {
                    id: id.to_string(),
                    find: r.find.len(),
                    replace: r.replace.len(),
                });
            }
        }
        self.entries.insert(id, replacements);
        Ok(())
    }

    /// Replacements for an artifact id, if any.
    #[must_use]
    pub fn get(&self, id: &ArtifactId) -> Option<&[ByteReplacement]> {
        self.entries.get(id).map(Vec::as_slice)
    }

    /// Number of blocklisted artifact ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no ids are blocklisted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ids(&self) -> HashSet<ArtifactId> {
        self.entries.keys().cloned().collect()
    }
}

/// The built-in handler applying [`Blocklist`] data. Scoped to exactly the
/// blocklisted artifact ids.
pub struct BlocklistHandler {
    blocklist: Blocklist,
    scoped: HashSet<ArtifactId>,
}

impl BlocklistHandler {
    /// Wrap blocklist data in its handler.
    #[must_use]
    pub fn new(blocklist: Blocklist) -> Self {
        let scoped = blocklist.ids();
        Self { blocklist, scoped }
    }
}

impl PatchHandler for BlocklistHandler {
    fn name(&self) -> &str {
        BLOCKLIST_HANDLER_NAME
    }

    fn applicability(&self) -> Applicability {
        Applicability::Scoped
    }

    fn scoped_ids(&self) -> Option<&HashSet<ArtifactId>> {
        Some(&self.scoped)
    }

    fn patch(
        &self,
        record: &ContentRecord,
        bundle: &BundleRef<'_>,
    ) -> Result<PatchOutcome, HandlerError> {
        let Some(replacements) = self.blocklist.get(&record.id) else {
            return Ok(PatchOutcome::Skipped);
        };

        let mut bytes = fs::read(bundle.payload)?;
        if !apply_replacements(&mut bytes, replacements) {
            debug!("blocklist: no occurrences in {}", record.id);
            return Ok(PatchOutcome::Skipped);
        }
        fs::write(bundle.payload, &bytes)?;
        info!("blocklist: rewrote payload bytes for {}", record.id);
        Ok(PatchOutcome::Applied)
    }
}

/// Overwrite every occurrence of each pattern in place. Returns whether
/// anything changed.
fn apply_replacements(bytes: &mut [u8], replacements: &[ByteReplacement]) -> bool {
    let mut changed = false;
    for rep in replacements {
        if rep.find.is_empty() || rep.find == rep.replace {
            continue;
        }
        let mut i = 0;
        while i + rep.find.len() <= bytes.len() {
            if bytes[i..i + rep.find.len()] == rep.find[..] {
                bytes[i..i + rep.find.len()].copy_from_slice(&rep.replace);
                changed = true;
                i += rep.find.len();
            } else {
                i += 1;
            }
        }
    }
    changed
}
