//! The patch-handler capability interface.
//!
//! Handlers are statically known objects injected into the pipeline in a
//! fixed order; there is no runtime discovery. The lifecycle for an
//! applicable handler is `verify` -> `initialize` -> `patch` ->
//! `post_patch` -> `post_disk_write`, and `patch` is the only step
//! permitted to mutate the artifact's bytes.

use cachepatch_common::ArtifactId;
use cachepatch_index::ContentRecord;
use cachepatch_parser::FieldTree;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// How a handler selects the artifacts it acts on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applicability {
    /// Applies to every artifact.
    Global,
    /// Applies only to the artifact ids the handler declares.
    Scoped,
}

/// Result of a handler's verification step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The handler may proceed to its patch lifecycle.
    Success,
    /// The handler is not applicable to this artifact after all; the
    /// patch steps are skipped for this pass.
    Rejected(String),
}

/// Result of a handler's patch step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Bytes were rewritten.
    Applied,
    /// Nothing needed doing.
    Skipped,
}

/// Errors raised by handler lifecycle steps
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handler failed: {0}")]
    Failed(String),
}

impl HandlerError {
    /// Create a failure with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Borrowed view of the artifact a handler operates on: the payload file
/// on disk and its parsed field tree.
#[derive(Clone, Copy, Debug)]
pub struct BundleRef<'a> {
    /// Payload file location.
    pub payload: &'a Path,
    /// Parsed field tree for the payload.
    pub tree: &'a FieldTree,
}

/// A capability-polymorphic unit implementing the verify/patch lifecycle
/// against one artifact.
pub trait PatchHandler: Send + Sync {
    /// Stable handler name, recorded in the artifact's patch history.
    fn name(&self) -> &str;

    /// Whether this handler applies globally or to a declared id set.
    fn applicability(&self) -> Applicability;

    /// The artifact ids a scoped handler declares. Ignored for global
    /// handlers.
    fn scoped_ids(&self) -> Option<&HashSet<ArtifactId>> {
        None
    }

    /// True when this handler takes over blocklist handling for the given
    /// artifact identity, suppressing the built-in blocklist pass.
    fn overrides_blocklist(&self, _id: &ArtifactId) -> bool {
        false
    }

    /// Handlers that must run on every pass (non-deterministic or
    /// re-entrant behavior) opt out of patch-history tracking.
    fn wants_tracking(&self) -> bool {
        true
    }

    /// Verification step; a rejection forces non-applicability for this
    /// pass regardless of mode.
    fn verify(&self, _record: &ContentRecord, _bundle: &BundleRef<'_>) -> VerifyOutcome {
        VerifyOutcome::Success
    }

    /// Pre-patch setup.
    fn initialize(&self, _record: &ContentRecord) -> Result<(), HandlerError> {
        Ok(())
    }

    /// The one step allowed to mutate the artifact's bytes.
    fn patch(
        &self,
        record: &ContentRecord,
        bundle: &BundleRef<'_>,
    ) -> Result<PatchOutcome, HandlerError>;

    /// Runs after a successful patch step.
    fn post_patch(&self, _record: &ContentRecord) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Runs after the patched bytes have reached disk.
    fn post_disk_write(&self, _record: &ContentRecord) -> Result<(), HandlerError> {
        Ok(())
    }
}
