//! Cache tree scanner.
//!
//! Walks the cache root, groups version subdirectories by their stable
//! name, and picks the version-maximal directory per group using the
//! version codec. A malformed subtree never aborts the scan of its
//! siblings.

use cachepatch_common::{decode_version, StableName};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Highest-version directory found for one stable name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanEntry {
    /// Decoded version number.
    pub version: i32,
    /// The version directory itself.
    pub dir: PathBuf,
}

/// Enumerate all artifact directories beneath `root` and return the
/// highest-version directory per stable name.
///
/// A missing or empty root yields an empty map. The `skip_dir`
/// subdirectory is never descended into. Version subdirectories whose name
/// does not decode are logged and skipped; ties keep the first-seen
/// directory (well-formed caches do not produce ties).
///
/// # Errors
/// Only fails when the root exists but cannot be enumerated at all.
pub fn scan_highest_versions(
    root: &Path,
    skip_dir: &str,
) -> std::io::Result<HashMap<StableName, ScanEntry>> {
    let mut highest: HashMap<StableName, ScanEntry> = HashMap::new();

    if !root.is_dir() {
        return Ok(highest);
    }

    for entry in fs::read_dir(root)? {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("unreadable cache entry under {}: {}", root.display(), e);
                continue;
            }
        };
        let stable_dir = entry.path();
        if !stable_dir.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(String::from) else {
            warn!("skipping non-utf8 cache directory: {}", stable_dir.display());
            continue;
        };
        if name == skip_dir {
            continue;
        }

        if let Some(best) = highest_version_dir(&stable_dir) {
            highest.insert(StableName::new(name), best);
        }
    }

    Ok(highest)
}

/// Find the version-maximal subdirectory of a single stable-name
/// directory, or `None` when it has no decodable version subdirectory.
#[must_use]
pub fn highest_version_dir(stable_dir: &Path) -> Option<ScanEntry> {
    let entries = match fs::read_dir(stable_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("unreadable artifact directory {}: {}", stable_dir.display(), e);
            return None;
        }
    };

    let mut best: Option<ScanEntry> = None;
    for entry in entries.flatten() {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let Some(token) = entry.file_name().to_str().map(String::from) else {
            continue;
        };
        let version = match decode_version(&token) {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    "skipping version directory {} with undecodable name: {}",
                    dir.display(),
                    e
                );
                continue;
            }
        };
        // Strictly greater keeps the first-seen directory on a tie.
        match &best {
            Some(b) if version <= b.version => {}
            _ => best = Some(ScanEntry { version, dir }),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mkversion(root: &Path, stable: &str, token: &str) -> PathBuf {
        let dir = root.join(stable).join(token);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_missing_root_is_empty() {
        let map = scan_highest_versions(Path::new("/nonexistent/cache"), "__tmp").unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_empty_root_is_empty() {
        let root = TempDir::new().unwrap();
        let map = scan_highest_versions(root.path(), "__tmp").unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_groups_and_picks_highest() {
        let root = TempDir::new().unwrap();
        mkversion(root.path(), "StableA", "0001");
        let a2 = mkversion(root.path(), "StableA", "0002");
        let b1 = mkversion(root.path(), "StableB", "000A");

        let map = scan_highest_versions(root.path(), "__tmp").unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&StableName::new("StableA")], ScanEntry { version: 2, dir: a2 });
        assert_eq!(map[&StableName::new("StableB")], ScanEntry { version: 10, dir: b1 });
    }

    #[test]
    fn test_skips_noise_directory() {
        let root = TempDir::new().unwrap();
        mkversion(root.path(), "__tmp", "0001");
        mkversion(root.path(), "StableA", "0001");

        let map = scan_highest_versions(root.path(), "__tmp").unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key(&StableName::new("StableA")));
    }

    #[test]
    fn test_undecodable_version_dirs_are_skipped() {
        let root = TempDir::new().unwrap();
        mkversion(root.path(), "StableA", "not-hex");
        let good = mkversion(root.path(), "StableA", "0003");

        let map = scan_highest_versions(root.path(), "__tmp").unwrap();
        assert_eq!(map[&StableName::new("StableA")].dir, good);
    }

    #[test]
    fn test_stable_dir_without_versions_is_absent() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("StableA")).unwrap();

        let map = scan_highest_versions(root.path(), "__tmp").unwrap();
        assert!(map.is_empty());
    }
}
