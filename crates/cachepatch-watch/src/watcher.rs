//! The artifact watcher.
//!
//! Subscribes to filesystem creation events under the cache root, scoped
//! to the companion marker file, and turns each qualifying event into an
//! index insert-or-upgrade followed by a patch pass.
//!
//! Contract: the watcher observes the *companion marker* file, not the
//! payload itself — the payload's own creation event is unreliable on at
//! least one target platform, while the marker is guaranteed to appear
//! whenever a payload is created. A producer that writes a payload
//! without its companion is invisible here and is only picked up by the
//! next reconciliation pass.
//!
//! A payload still being written parses as a truncation; the event task
//! retries at a fixed delay, without bound, until the producer finishes.
//! Write completion time is externally controlled, so an abandoned write
//! retries forever (see DESIGN notes).

use crate::gate::LoadGate;
use cachepatch_common::ArtifactType;
use cachepatch_index::{ContentIndex, IndexError};
use cachepatch_parser::{BundleParser, FieldTree};
use cachepatch_pipeline::PatchPipeline;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Errors starting the artifact watcher
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("filesystem watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Artifact watcher settings.
#[derive(Clone, Debug)]
pub struct WatcherConfig {
    /// Companion marker file name whose creation signals a new artifact.
    pub marker_file: String,
    /// Payload file name the marker path is translated to.
    pub payload_file: String,
    /// Delay between decode retries for partially written payloads.
    pub retry_delay: Duration,
}

/// Watches the cache root and feeds new artifacts to the index and the
/// patch pipeline.
pub struct ArtifactWatcher {
    _watcher: RecommendedWatcher,
    dispatcher: JoinHandle<()>,
}

impl ArtifactWatcher {
    /// Start watching `cache_root` recursively.
    pub fn spawn(
        cache_root: &Path,
        config: WatcherConfig,
        index: Arc<ContentIndex>,
        parser: Arc<dyn BundleParser>,
        gate: LoadGate,
        pipeline: Arc<PatchPipeline>,
    ) -> Result<Self, WatchError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();

        let marker_file = config.marker_file.clone();
        let mut watcher =
            notify::recommended_watcher(move |result: Result<Event, notify::Error>| {
                match result {
                    Ok(event) => {
                        if !matches!(event.kind, EventKind::Create(_)) {
                            return;
                        }
                        for path in event.paths {
                            if path.file_name().and_then(|n| n.to_str())
                                == Some(marker_file.as_str())
                            {
                                if let Some(version_dir) = path.parent() {
                                    // Receiver gone means we are shutting down.
                                    let _ = tx.send(version_dir.to_path_buf());
                                }
                            }
                        }
                    }
                    Err(e) => warn!("filesystem watch error: {}", e),
                }
            })?;
        watcher.watch(cache_root, RecursiveMode::Recursive)?;
        info!("watching {} for new artifacts", cache_root.display());

        let dispatcher = tokio::spawn(async move {
            // One lightweight task per creation event.
            while let Some(version_dir) = rx.recv().await {
                let index = index.clone();
                let parser = parser.clone();
                let gate = gate.clone();
                let pipeline = pipeline.clone();
                let payload_file = config.payload_file.clone();
                let retry_delay = config.retry_delay;
                tokio::spawn(async move {
                    process_artifact(
                        &version_dir,
                        &payload_file,
                        retry_delay,
                        &index,
                        parser.as_ref(),
                        &gate,
                        &pipeline,
                    )
                    .await;
                });
            }
        });

        Ok(Self {
            _watcher: watcher,
            dispatcher,
        })
    }

    /// Stop observing events and wait for the dispatcher to drain.
    pub async fn stop(self) {
        drop(self._watcher);
        let _ = self.dispatcher.await;
    }
}

/// Handle one newly created artifact version.
async fn process_artifact(
    version_dir: &Path,
    payload_file: &str,
    retry_delay: Duration,
    index: &ContentIndex,
    parser: &dyn BundleParser,
    gate: &LoadGate,
    pipeline: &PatchPipeline,
) {
    // Insert or upgrade, waiting out a payload that is still being
    // written.
    let outcome = loop {
        match index.add_or_upgrade(version_dir) {
            Ok(outcome) => break outcome,
            Err(IndexError::Parse(e)) if e.is_truncation() => {
                debug!(
                    "{} still being written, retrying in {:?}",
                    version_dir.display(),
                    retry_delay
                );
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => {
                warn!("dropping event for {}: {}", version_dir.display(), e);
                return;
            }
        }
    };
    let Some(record) = outcome.record().cloned() else {
        debug!("no index change for {}", version_dir.display());
        return;
    };

    // The pipeline needs the parsed field tree; the upgrade path skips
    // decoding, so the payload may still be mid-write here too.
    let payload = version_dir.join(payload_file);
    let tree: FieldTree = loop {
        match parser.parse(&payload) {
            Ok(tree) => break tree,
            Err(e) if e.is_truncation() => {
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => {
                warn!("cannot re-decode {} for patching: {}", payload.display(), e);
                return;
            }
        }
    };

    // World bytes must not be touched while the client is loading.
    if record.artifact_type == ArtifactType::World {
        gate.wait_until_idle().await;
    }
    pipeline.run(index, &record, &tree);
}
