//! Asset-bundle parser boundary.
//!
//! The binary bundle format itself is an external concern: this crate only
//! fixes the seam. A [`BundleParser`] takes a payload file path and returns
//! a [`FieldTree`] exposing, per embedded descriptor, the identity string
//! and an integer content-type code — or fails with a [`ParseError`].
//!
//! [`DescriptorTableParser`] is the built-in reference implementation used
//! by the daemon and the test suites; any real client format plugs in
//! behind `Arc<dyn BundleParser>` without touching the index or pipeline.

pub mod descriptor;

pub use descriptor::DescriptorTableParser;

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors a bundle parser can fail with.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The payload is not a recognized bundle format at all.
    #[error("unsupported bundle format")]
    UnsupportedFormat,

    /// The bundle decoded but contains no loadable descriptor segment.
    #[error("bundle has no loadable segment")]
    NoLoadableSegment,

    /// The payload ended before the declared data was read. This is the
    /// transient signature of a payload still being written by the client;
    /// callers retry rather than discard.
    #[error("unexpected end of payload data")]
    UnexpectedEof,

    /// The payload is structurally invalid.
    #[error("bundle decode error: {0}")]
    Decode(String),

    #[error("i/o error reading payload: {0}")]
    Io(#[from] std::io::Error),
}

impl ParseError {
    /// True when the error indicates a partially written payload that may
    /// succeed on a later read.
    #[must_use]
    pub fn is_truncation(&self) -> bool {
        match self {
            Self::UnexpectedEof => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}

/// One embedded content descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Identity string embedded in the payload (may be empty in malformed
    /// bundles; the index rejects those).
    pub identity: String,
    /// Opaque content-type code; mapped to an artifact type by the caller.
    pub content_type: i32,
}

/// Structured field tree returned by a successful parse.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldTree {
    /// Descriptors in bundle order.
    pub descriptors: Vec<Descriptor>,
}

impl FieldTree {
    /// The descriptor that identifies the artifact (the first one).
    #[must_use]
    pub fn primary(&self) -> Option<&Descriptor> {
        self.descriptors.first()
    }
}

/// Capability boundary for decoding a payload file into a field tree.
pub trait BundleParser: Send + Sync {
    /// Parse the payload file at `path`.
    fn parse(&self, path: &Path) -> Result<FieldTree, ParseError>;
}
