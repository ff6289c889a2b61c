//! The content index.
//!
//! In-memory map of [`ContentRecord`]s (one per stable name) over a
//! persistent [`IndexStore`]. Mutations to the same stable name are
//! serialized by the map's per-key entries; discoveries for different
//! stable names proceed in parallel. Persistence is snapshot-then-write
//! and never blocks mutators for the duration of the disk write.

use crate::record::{ContentRecord, VersionMeta};
use crate::scanner::{self, scan_highest_versions};
use crate::store::{IndexStore, IndexStoreError};
use cachepatch_common::{decode_version, ArtifactId, ArtifactType, StableName, VersionError};
use cachepatch_parser::{BundleParser, ParseError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Error type for index operations
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Payload parse failure. Callers check [`ParseError::is_truncation`]
    /// to distinguish a payload still being written (retry) from a decode
    /// anomaly (discard).
    #[error("payload parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("store error: {0}")]
    Store(#[from] IndexStoreError),

    #[error("invalid version token: {0}")]
    Version(#[from] VersionError),

    #[error("path has no resolvable stable name: {0}")]
    UnresolvablePath(PathBuf),
}

/// Outcome of [`ContentIndex::add_or_upgrade`].
#[derive(Clone, Debug)]
pub enum Upgrade {
    /// A brand-new stable name was decoded and inserted.
    Inserted(ContentRecord),
    /// An existing record was replaced by a strictly newer version.
    Upgraded(ContentRecord),
    /// The observed version was not newer; the record is untouched.
    Unchanged,
    /// The candidate failed to decode and was discarded.
    Discarded,
}

impl Upgrade {
    /// The resulting record, when the index changed.
    #[must_use]
    pub fn record(&self) -> Option<&ContentRecord> {
        match self {
            Self::Inserted(r) | Self::Upgraded(r) => Some(r),
            Self::Unchanged | Self::Discarded => None,
        }
    }
}

/// Persistent mapping from stable artifact identity to its current highest
/// known version and patch history.
pub struct ContentIndex {
    records: DashMap<StableName, ContentRecord>,
    store: IndexStore,
    parser: Arc<dyn BundleParser>,
    payload_file: String,
}

impl ContentIndex {
    /// Open the index, loading any previously persisted records.
    pub fn open(
        db_path: impl AsRef<Path>,
        parser: Arc<dyn BundleParser>,
        payload_file: impl Into<String>,
    ) -> Result<Self, IndexError> {
        let store = IndexStore::open(db_path)?;
        let records = DashMap::new();
        for record in store.load_all()? {
            records.insert(record.stable_name.clone(), record);
        }
        info!("content index opened with {} records", records.len());
        Ok(Self {
            records,
            store,
            parser,
            payload_file: payload_file.into(),
        })
    }

    /// Number of indexed artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no artifacts are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Clone of every record (used for persistence and reconciliation).
    #[must_use]
    pub fn snapshot(&self) -> Vec<ContentRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }

    /// Record for a stable name, if indexed.
    #[must_use]
    pub fn get(&self, stable: &StableName) -> Option<ContentRecord> {
        self.records.get(stable).map(|r| r.value().clone())
    }

    /// Resolve a payload-relative path to its record.
    #[must_use]
    pub fn lookup(&self, path: &Path) -> Option<ContentRecord> {
        let stable = StableName::from_payload_path(path)?;
        self.get(&stable)
    }

    /// Remove the record matching a payload-relative path, if any.
    pub fn remove(&self, path: &Path) -> Option<ContentRecord> {
        let stable = StableName::from_payload_path(path)?;
        self.records.remove(&stable).map(|(_, r)| r)
    }

    /// Insert a newly observed version directory, or upgrade the existing
    /// record when the version is strictly newer.
    ///
    /// For a brand-new stable name the payload is decoded through the
    /// bundle parser; any decode anomaly (unsupported format, no loadable
    /// segment, empty identity, unrecognized content type) discards the
    /// candidate with a diagnostic and without error. A truncated payload
    /// is surfaced as [`IndexError::Parse`] so the caller can retry once
    /// the producer finishes writing.
    pub fn add_or_upgrade(&self, version_dir: &Path) -> Result<Upgrade, IndexError> {
        let stable = StableName::from_version_dir(version_dir)
            .ok_or_else(|| IndexError::UnresolvablePath(version_dir.to_path_buf()))?;
        let token = version_dir
            .file_name()
            .and_then(|t| t.to_str())
            .ok_or_else(|| IndexError::UnresolvablePath(version_dir.to_path_buf()))?;
        let version = decode_version(token)?;
        let payload = version_dir.join(&self.payload_file);

        // Fast path: upgrades never re-decode the payload.
        if let Some(mut existing) = self.records.get_mut(&stable) {
            if version > existing.version_meta.version {
                existing.upgrade(version, payload);
                info!(
                    "upgraded {} to version {} ({})",
                    stable, version, existing.id
                );
                return Ok(Upgrade::Upgraded(existing.clone()));
            }
            debug!(
                "skipping {} version {}: not newer than {}",
                stable, version, existing.version_meta.version
            );
            return Ok(Upgrade::Unchanged);
        }

        // New stable name: decode identity and type from the payload
        // before taking the entry, so the per-key lock is never held
        // across file i/o.
        let Some((id, artifact_type)) = self.decode_identity(&stable, &payload)? else {
            return Ok(Upgrade::Discarded);
        };

        match self.records.entry(stable.clone()) {
            Entry::Vacant(slot) => {
                let record = ContentRecord {
                    id,
                    artifact_type,
                    stable_name: stable.clone(),
                    version_meta: VersionMeta::new(version, payload),
                };
                slot.insert(record.clone());
                info!(
                    "indexed new {} artifact {} at version {}",
                    record.artifact_type, record.id, version
                );
                Ok(Upgrade::Inserted(record))
            }
            // A concurrent discovery won the race; fall back to the
            // version comparison.
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                if version > existing.version_meta.version {
                    existing.upgrade(version, payload);
                    Ok(Upgrade::Upgraded(existing.clone()))
                } else {
                    Ok(Upgrade::Unchanged)
                }
            }
        }
    }

    /// Append a handler name to the patch history of `stable`, provided
    /// the record still holds the exact version the handler ran against.
    /// Returns false when the record is gone or already upgraded past
    /// `version`.
    pub fn record_patched(&self, stable: &StableName, version: i32, handler: &str) -> bool {
        let Some(mut record) = self.records.get_mut(stable) else {
            return false;
        };
        if record.version_meta.version != version {
            debug!(
                "not recording {} for {}: version moved from {} to {}",
                handler, stable, version, record.version_meta.version
            );
            return false;
        }
        record.version_meta.patched_by.insert(handler.to_string());
        true
    }

    /// Verify every record against filesystem ground truth.
    ///
    /// Records whose stable-name directory is gone are removed. For the
    /// rest the highest version directory is recomputed: a missing payload
    /// there evicts the record (a reported anomaly), a strictly newer
    /// version upgrades it. Idempotent when the filesystem is unchanged.
    pub fn reconcile(&self, cache_root: &Path) {
        let stables: Vec<StableName> =
            self.records.iter().map(|r| r.key().clone()).collect();

        for stable in stables {
            let stable_dir = cache_root.join(stable.as_str());
            if !stable_dir.is_dir() {
                if self.records.remove(&stable).is_some() {
                    info!("removed {}: backing directory gone", stable);
                }
                continue;
            }

            let Some(best) = scanner::highest_version_dir(&stable_dir) else {
                if self.records.remove(&stable).is_some() {
                    warn!("removed {}: no decodable version directories remain", stable);
                }
                continue;
            };

            let payload = best.dir.join(&self.payload_file);
            if !payload.is_file() {
                if self.records.remove(&stable).is_some() {
                    warn!(
                        "removed {}: highest version {} lacks its payload file",
                        stable, best.version
                    );
                }
                continue;
            }

            if let Some(mut record) = self.records.get_mut(&stable) {
                if best.version > record.version_meta.version {
                    record.upgrade(best.version, payload);
                    info!("reconciled {} up to version {}", stable, best.version);
                }
            }
        }
    }

    /// Full scan-and-index pass: reconcile existing records, then insert
    /// or upgrade from every highest-version directory on disk.
    pub fn rescan(&self, cache_root: &Path, skip_dir: &str) {
        self.reconcile(cache_root);

        let scanned = match scan_highest_versions(cache_root, skip_dir) {
            Ok(map) => map,
            Err(e) => {
                warn!("cache scan of {} failed: {}", cache_root.display(), e);
                return;
            }
        };

        for (stable, entry) in scanned {
            match self.add_or_upgrade(&entry.dir) {
                Ok(_) => {}
                Err(IndexError::Parse(e)) if e.is_truncation() => {
                    debug!("{} still being written, deferring to watcher", stable);
                }
                Err(e) => warn!("failed to index {}: {}", stable, e),
            }
        }
    }

    /// Persist a snapshot of the full record set.
    pub fn persist(&self) -> Result<(), IndexStoreError> {
        let snapshot = self.snapshot();
        let count = snapshot.len();
        self.store.save_all(&snapshot)?;
        debug!("persisted {} records", count);
        Ok(())
    }

    /// Decode identity and content type from a payload, mapping every
    /// decode anomaly to a discarded candidate (`None`).
    fn decode_identity(
        &self,
        stable: &StableName,
        payload: &Path,
    ) -> Result<Option<(ArtifactId, ArtifactType)>, IndexError> {
        let tree = match self.parser.parse(payload) {
            Ok(tree) => tree,
            Err(e) if e.is_truncation() => return Err(IndexError::Parse(e)),
            Err(e) => {
                warn!("discarding {}: {}", stable, e);
                return Ok(None);
            }
        };

        let Some(descriptor) = tree.primary() else {
            warn!("discarding {}: bundle exposes no descriptor", stable);
            return Ok(None);
        };
        let Ok(id) = ArtifactId::new(descriptor.identity.clone()) else {
            warn!("discarding {}: empty identity field", stable);
            return Ok(None);
        };
        let Some(artifact_type) = ArtifactType::from_code(descriptor.content_type) else {
            warn!(
                "discarding {}: unrecognized content type {}",
                stable, descriptor.content_type
            );
            return Ok(None);
        };
        Ok(Some((id, artifact_type)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachepatch_parser::{Descriptor, DescriptorTableParser};
    use std::fs;
    use tempfile::TempDir;

    const PAYLOAD: &str = "__data";

    fn open_index(dir: &TempDir) -> ContentIndex {
        ContentIndex::open(
            dir.path().join("index.redb"),
            Arc::new(DescriptorTableParser),
            PAYLOAD,
        )
        .unwrap()
    }

    fn write_artifact(
        root: &Path,
        stable: &str,
        token: &str,
        identity: &str,
        content_type: i32,
    ) -> PathBuf {
        let dir = root.join(stable).join(token);
        fs::create_dir_all(&dir).unwrap();
        DescriptorTableParser::write_payload(
            &dir.join(PAYLOAD),
            &[Descriptor {
                identity: identity.to_string(),
                content_type,
            }],
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_scan_and_index_single_avatar() {
        let db = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let index = open_index(&db);

        write_artifact(cache.path(), "StableA", "0001", "avtr_x", 1);
        index.rescan(cache.path(), "__tmp");

        assert_eq!(index.len(), 1);
        let record = index.get(&StableName::new("StableA")).unwrap();
        assert_eq!(record.id.as_str(), "avtr_x");
        assert_eq!(record.artifact_type, ArtifactType::Avatar);
        assert_eq!(record.version_meta.version, 1);
        assert!(record.version_meta.patched_by.is_empty());
    }

    #[test]
    fn test_upgrade_replaces_and_clears_patch_history() {
        let db = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let index = open_index(&db);

        let v1 = write_artifact(cache.path(), "StableA", "0001", "avtr_x", 1);
        index.add_or_upgrade(&v1).unwrap();
        assert!(index.record_patched(&StableName::new("StableA"), 1, "H1"));

        let v2 = write_artifact(cache.path(), "StableA", "0002", "avtr_x", 1);
        let outcome = index.add_or_upgrade(&v2).unwrap();
        assert!(matches!(outcome, Upgrade::Upgraded(_)));

        // Replaced, not duplicated, with fresh patch history.
        assert_eq!(index.len(), 1);
        let record = index.get(&StableName::new("StableA")).unwrap();
        assert_eq!(record.version_meta.version, 2);
        assert!(record.version_meta.patched_by.is_empty());
        assert_eq!(record.version_meta.path, v2.join(PAYLOAD));
    }

    #[test]
    fn test_downgrade_is_a_no_op() {
        let db = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let index = open_index(&db);

        let v2 = write_artifact(cache.path(), "StableA", "0002", "avtr_x", 1);
        index.add_or_upgrade(&v2).unwrap();
        index.record_patched(&StableName::new("StableA"), 2, "H1");

        let v1 = write_artifact(cache.path(), "StableA", "0001", "avtr_x", 1);
        let outcome = index.add_or_upgrade(&v1).unwrap();
        assert!(matches!(outcome, Upgrade::Unchanged));

        let record = index.get(&StableName::new("StableA")).unwrap();
        assert_eq!(record.version_meta.version, 2);
        assert!(record.version_meta.patched_by.contains("H1"));
    }

    #[test]
    fn test_equal_version_is_a_no_op() {
        let db = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let index = open_index(&db);

        let v1 = write_artifact(cache.path(), "StableA", "0001", "avtr_x", 1);
        index.add_or_upgrade(&v1).unwrap();
        index.record_patched(&StableName::new("StableA"), 1, "H1");

        let outcome = index.add_or_upgrade(&v1).unwrap();
        assert!(matches!(outcome, Upgrade::Unchanged));
        let record = index.get(&StableName::new("StableA")).unwrap();
        assert!(record.version_meta.patched_by.contains("H1"));
    }

    #[test]
    fn test_decode_failure_never_creates_a_record() {
        let db = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let index = open_index(&db);

        // Not a bundle at all.
        let dir = cache.path().join("StableA").join("0001");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(PAYLOAD), b"garbage-not-a-bundle").unwrap();
        assert!(matches!(
            index.add_or_upgrade(&dir).unwrap(),
            Upgrade::Discarded
        ));

        // Empty identity.
        let dir = write_artifact(cache.path(), "StableB", "0001", "", 1);
        assert!(matches!(
            index.add_or_upgrade(&dir).unwrap(),
            Upgrade::Discarded
        ));

        // Unrecognized content type.
        let dir = write_artifact(cache.path(), "StableC", "0001", "file_z", 9);
        assert!(matches!(
            index.add_or_upgrade(&dir).unwrap(),
            Upgrade::Discarded
        ));

        assert!(index.is_empty());
    }

    #[test]
    fn test_truncated_payload_surfaces_for_retry() {
        let db = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let index = open_index(&db);

        let dir = write_artifact(cache.path(), "StableA", "0001", "wrld_y", 2);
        let payload = dir.join(PAYLOAD);
        let bytes = fs::read(&payload).unwrap();
        fs::write(&payload, &bytes[..bytes.len() - 2]).unwrap();

        let err = index.add_or_upgrade(&dir).unwrap_err();
        match err {
            IndexError::Parse(e) => assert!(e.is_truncation()),
            other => panic!("unexpected error: {other}"),
        }
        assert!(index.is_empty());

        // Completing the write lets the same call succeed.
        fs::write(&payload, &bytes).unwrap();
        assert!(matches!(
            index.add_or_upgrade(&dir).unwrap(),
            Upgrade::Inserted(_)
        ));
    }

    #[test]
    fn test_reconcile_removes_record_for_missing_directory() {
        let db = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let index = open_index(&db);

        let dir = write_artifact(cache.path(), "StableA", "0001", "avtr_x", 1);
        index.add_or_upgrade(&dir).unwrap();
        assert_eq!(index.len(), 1);

        fs::remove_dir_all(cache.path().join("StableA")).unwrap();
        index.reconcile(cache.path());
        assert!(index.is_empty());
    }

    #[test]
    fn test_reconcile_evicts_when_highest_payload_missing() {
        let db = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let index = open_index(&db);

        let v1 = write_artifact(cache.path(), "StableA", "0001", "avtr_x", 1);
        index.add_or_upgrade(&v1).unwrap();

        // A higher version directory appears without its payload.
        fs::create_dir_all(cache.path().join("StableA").join("0002")).unwrap();
        index.reconcile(cache.path());
        assert!(index.is_empty());
    }

    #[test]
    fn test_reconcile_upgrades_to_newer_on_disk_version() {
        let db = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let index = open_index(&db);

        let v1 = write_artifact(cache.path(), "StableA", "0001", "avtr_x", 1);
        index.add_or_upgrade(&v1).unwrap();
        index.record_patched(&StableName::new("StableA"), 1, "H1");

        write_artifact(cache.path(), "StableA", "0003", "avtr_x", 1);
        index.reconcile(cache.path());

        let record = index.get(&StableName::new("StableA")).unwrap();
        assert_eq!(record.version_meta.version, 3);
        assert!(record.version_meta.patched_by.is_empty());
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let db = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let index = open_index(&db);

        write_artifact(cache.path(), "StableA", "0001", "avtr_x", 1);
        write_artifact(cache.path(), "StableB", "0002", "wrld_y", 2);
        index.rescan(cache.path(), "__tmp");

        index.reconcile(cache.path());
        let first: Vec<_> = {
            let mut snap = index.snapshot();
            snap.sort_by(|a, b| a.stable_name.cmp(&b.stable_name));
            snap
        };
        index.reconcile(cache.path());
        let second: Vec<_> = {
            let mut snap = index.snapshot();
            snap.sort_by(|a, b| a.stable_name.cmp(&b.stable_name));
            snap
        };
        assert_eq!(first, second);
    }

    #[test]
    fn test_record_patched_guards_version() {
        let db = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let index = open_index(&db);

        let v1 = write_artifact(cache.path(), "StableA", "0001", "avtr_x", 1);
        index.add_or_upgrade(&v1).unwrap();

        assert!(!index.record_patched(&StableName::new("StableA"), 99, "H1"));
        assert!(!index.record_patched(&StableName::new("StableZ"), 1, "H1"));
        assert!(index.record_patched(&StableName::new("StableA"), 1, "H1"));
        let record = index.get(&StableName::new("StableA")).unwrap();
        assert_eq!(record.version_meta.patched_by.len(), 1);
    }

    #[test]
    fn test_lookup_and_remove_by_payload_path() {
        let db = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let index = open_index(&db);

        let v1 = write_artifact(cache.path(), "StableA", "0001", "avtr_x", 1);
        index.add_or_upgrade(&v1).unwrap();

        let payload = v1.join(PAYLOAD);
        let record = index.lookup(&payload).unwrap();
        assert_eq!(record.stable_name.as_str(), "StableA");

        assert!(index.remove(&payload).is_some());
        assert!(index.lookup(&payload).is_none());
    }

    #[test]
    fn test_persist_and_reopen() {
        let db = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let db_path = db.path().join("index.redb");

        {
            let index = ContentIndex::open(
                &db_path,
                Arc::new(DescriptorTableParser),
                PAYLOAD,
            )
            .unwrap();
            let v1 = write_artifact(cache.path(), "StableA", "0001", "avtr_x", 1);
            index.add_or_upgrade(&v1).unwrap();
            index.record_patched(&StableName::new("StableA"), 1, "H1");
            index.persist().unwrap();
        }

        let index =
            ContentIndex::open(&db_path, Arc::new(DescriptorTableParser), PAYLOAD).unwrap();
        assert_eq!(index.len(), 1);
        let record = index.get(&StableName::new("StableA")).unwrap();
        assert_eq!(record.version_meta.version, 1);
        assert!(record.version_meta.patched_by.contains("H1"));
    }
}
