//! Live-watch subsystem for cachepatch.
//!
//! Three cooperating pieces: the [`gate::LoadGate`] (a process-wide
//! Idle/Loading signal), the [`tailer`] (which drives the gate from the
//! client's rotating log file), and the [`watcher::ArtifactWatcher`]
//! (which turns filesystem creation events into index inserts and patch
//! passes).

pub mod gate;
pub mod tailer;
pub mod watcher;

pub use gate::{LoadGate, LoadState};
pub use tailer::{spawn_rotation_monitor, spawn_tailer, MonitorHandle, TailMarkers, TailerHandle};
pub use watcher::{ArtifactWatcher, WatchError, WatcherConfig};
