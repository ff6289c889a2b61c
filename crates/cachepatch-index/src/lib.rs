//! Content index for cachepatch.
//!
//! Maintains the persistent mapping from stable artifact identity to its
//! current highest known version and patch history, reconciles that map
//! against filesystem ground truth, and scans the cache tree for the
//! highest version directory of each artifact.

pub mod index;
pub mod record;
pub mod scanner;
pub mod store;

pub use index::{ContentIndex, IndexError, Upgrade};
pub use record::{ContentRecord, VersionMeta};
pub use scanner::{scan_highest_versions, ScanEntry};
pub use store::{IndexStore, IndexStoreError};
