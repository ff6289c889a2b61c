//! Patch pipeline for cachepatch.
//!
//! Dispatches an ordered set of capability-polymorphic patch handlers over
//! an indexed artifact, records which handlers have acted on each version,
//! and finishes with the built-in blocklist handler.

pub mod blocklist;
pub mod handler;
pub mod pipeline;

pub use blocklist::{Blocklist, BlocklistError, BlocklistHandler, ByteReplacement, BLOCKLIST_HANDLER_NAME};
pub use handler::{
    Applicability, BundleRef, HandlerError, PatchHandler, PatchOutcome, VerifyOutcome,
};
pub use pipeline::PatchPipeline;
