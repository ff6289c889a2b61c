//! Handler dispatch over one artifact.
//!
//! Iterates the registered handlers in order, skipping those already
//! recorded against the record's current version, then finishes with the
//! built-in blocklist handler. A handler failure is isolated: it is logged
//! and the pipeline proceeds to the next handler.

use crate::blocklist::{BlocklistHandler, BLOCKLIST_HANDLER_NAME};
use crate::handler::{
    Applicability, BundleRef, PatchHandler, PatchOutcome, VerifyOutcome,
};
use cachepatch_index::{ContentIndex, ContentRecord};
use cachepatch_parser::FieldTree;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Orchestrates patch handlers over indexed artifacts.
pub struct PatchPipeline {
    handlers: Vec<Arc<dyn PatchHandler>>,
    blocklist: Arc<BlocklistHandler>,
}

impl PatchPipeline {
    /// Build a pipeline from an ordered handler list and the built-in
    /// blocklist handler.
    #[must_use]
    pub fn new(handlers: Vec<Arc<dyn PatchHandler>>, blocklist: BlocklistHandler) -> Self {
        Self {
            handlers,
            blocklist: Arc::new(blocklist),
        }
    }

    /// Run one pass over an artifact.
    ///
    /// `record` is the caller's view from discovery time; the pass is
    /// abandoned when the index has meanwhile moved the stable name to a
    /// different version (the watcher will come back for the new one).
    pub fn run(&self, index: &ContentIndex, record: &ContentRecord, tree: &FieldTree) {
        let Some(current) = index.get(&record.stable_name) else {
            debug!("{} no longer indexed, skipping patch pass", record.stable_name);
            return;
        };
        if current.version_meta.version != record.version_meta.version {
            debug!(
                "{} moved to version {} mid-dispatch, skipping pass for {}",
                record.stable_name,
                current.version_meta.version,
                record.version_meta.version
            );
            return;
        }

        let bundle = BundleRef {
            payload: &current.version_meta.path,
            tree,
        };

        for handler in &self.handlers {
            if current.version_meta.patched_by.contains(handler.name()) {
                debug!(
                    "handler {} already recorded for {} v{}",
                    handler.name(),
                    current.stable_name,
                    current.version_meta.version
                );
                continue;
            }
            self.run_handler(index, handler.as_ref(), &current, &bundle);
        }

        self.run_blocklist(index, &current, &bundle);
        info!(
            "patch pass complete for {} v{}",
            current.stable_name, current.version_meta.version
        );
    }

    fn run_blocklist(
        &self,
        index: &ContentIndex,
        record: &ContentRecord,
        bundle: &BundleRef<'_>,
    ) {
        if record
            .version_meta
            .patched_by
            .contains(BLOCKLIST_HANDLER_NAME)
        {
            return;
        }
        if let Some(overriding) = self
            .handlers
            .iter()
            .find(|h| h.overrides_blocklist(&record.id))
        {
            debug!(
                "handler {} overrides blocklist handling for {}",
                overriding.name(),
                record.id
            );
            return;
        }
        self.run_handler(index, self.blocklist.as_ref(), record, bundle);
    }

    /// One handler's pass over one artifact, with per-handler error
    /// isolation. Lifecycle order is fixed: verify, initialize, patch,
    /// post_patch, post_disk_write.
    fn run_handler(
        &self,
        index: &ContentIndex,
        handler: &dyn PatchHandler,
        record: &ContentRecord,
        bundle: &BundleRef<'_>,
    ) {
        let applicable = match handler.applicability() {
            Applicability::Global => true,
            Applicability::Scoped => handler
                .scoped_ids()
                .is_some_and(|ids| ids.contains(&record.id)),
        };
        if !applicable {
            return;
        }

        match handler.verify(record, bundle) {
            VerifyOutcome::Success => {}
            VerifyOutcome::Rejected(reason) => {
                debug!(
                    "handler {} verify rejected {}: {}",
                    handler.name(),
                    record.id,
                    reason
                );
                // Verified-and-skipped still counts as a completed pass.
                self.track(index, handler, record);
                return;
            }
        }

        if let Err(e) = handler.initialize(record) {
            error!("handler {} initialize failed for {}: {}", handler.name(), record.id, e);
            return;
        }
        match handler.patch(record, bundle) {
            Ok(PatchOutcome::Applied) => {
                debug!("handler {} patched {}", handler.name(), record.id);
            }
            Ok(PatchOutcome::Skipped) => {
                debug!("handler {} skipped {}", handler.name(), record.id);
            }
            Err(e) => {
                error!("handler {} patch failed for {}: {}", handler.name(), record.id, e);
                return;
            }
        }
        if let Err(e) = handler.post_patch(record) {
            error!("handler {} post_patch failed for {}: {}", handler.name(), record.id, e);
            return;
        }
        if let Err(e) = handler.post_disk_write(record) {
            error!(
                "handler {} post_disk_write failed for {}: {}",
                handler.name(),
                record.id,
                e
            );
            return;
        }

        self.track(index, handler, record);
    }

    fn track(&self, index: &ContentIndex, handler: &dyn PatchHandler, record: &ContentRecord) {
        if !handler.wants_tracking() {
            return;
        }
        index.record_patched(
            &record.stable_name,
            record.version_meta.version,
            handler.name(),
        );
    }
}
