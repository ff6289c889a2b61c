//! Log tailing and rotation handling.
//!
//! A tailer is one long-lived polling task reading appended lines from a
//! single log file and flipping the [`LoadGate`] when a marker line
//! appears. Stopping is cooperative: the stop flag is checked between
//! line batches and [`TailerHandle::stop`] waits for the task to fully
//! exit, so at most one tailer ever reads a given file.
//!
//! The rotation monitor re-selects the newest matching log file on an
//! interval. A new file means a client restart: the old tailer is stopped,
//! the gate is forced Idle (a fresh session is not mid-load), and a new
//! tailer starts from the beginning of the new file. The initial tailer
//! starts at end-of-file instead, so stale lines from an earlier session
//! cannot flip the gate.

use crate::gate::{LoadGate, LoadState};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Marker substrings that drive the gate.
#[derive(Clone, Debug)]
pub struct TailMarkers {
    /// Substring of the "beginning asset preparation" line.
    pub loading: String,
    /// Substring of the "world entered" line.
    pub idle: String,
}

/// Handle to a running tailer task.
pub struct TailerHandle {
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl TailerHandle {
    /// Request a cooperative stop and wait for the task to exit.
    pub async fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.task.await;
    }
}

/// Spawn a tailer over one log file.
///
/// `from_start` reads the whole file (used after rotation); otherwise only
/// lines appended after spawn are observed.
#[must_use]
pub fn spawn_tailer(
    path: PathBuf,
    gate: LoadGate,
    markers: TailMarkers,
    poll: Duration,
    from_start: bool,
) -> TailerHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let task = tokio::spawn(async move {
        tail_loop(&path, &gate, &markers, poll, from_start, &stop_flag).await;
    });
    TailerHandle { stop, task }
}

async fn tail_loop(
    path: &Path,
    gate: &LoadGate,
    markers: &TailMarkers,
    poll: Duration,
    from_start: bool,
    stop: &AtomicBool,
) {
    info!("tailing {} (from_start={})", path.display(), from_start);

    let mut offset: u64 = if from_start {
        0
    } else {
        tokio::fs::metadata(path).await.map_or(0, |m| m.len())
    };
    let mut pending = String::new();

    while !stop.load(Ordering::SeqCst) {
        match read_appended(path, offset).await {
            Ok(Some((bytes, new_offset))) => {
                offset = new_offset;
                pending.push_str(&String::from_utf8_lossy(&bytes));
                // Process only complete lines; keep a trailing partial.
                while let Some(newline) = pending.find('\n') {
                    let line: String = pending.drain(..=newline).collect();
                    apply_markers(gate, markers, line.trim_end());
                }
            }
            Ok(None) => {}
            Err(e) => {
                debug!("tail read of {} failed: {}", path.display(), e);
            }
        }
        tokio::time::sleep(poll).await;
    }
    debug!("tailer for {} stopped", path.display());
}

/// Read bytes appended past `offset`. Returns the new offset, or `None`
/// when nothing new was written. A file shorter than the offset was
/// truncated in place; reading restarts from the top.
async fn read_appended(
    path: &Path,
    offset: u64,
) -> std::io::Result<Option<(Vec<u8>, u64)>> {
    let len = tokio::fs::metadata(path).await?.len();
    let start = if len < offset { 0 } else { offset };
    if len == start {
        return Ok(None);
    }

    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(start)).await?;
    let mut bytes = Vec::with_capacity(usize::try_from(len - start).unwrap_or(0));
    file.read_to_end(&mut bytes).await?;
    let new_offset = start + bytes.len() as u64;
    Ok(Some((bytes, new_offset)))
}

fn apply_markers(gate: &LoadGate, markers: &TailMarkers, line: &str) {
    if line.contains(&markers.loading) {
        gate.set(LoadState::Loading);
    } else if line.contains(&markers.idle) {
        gate.set(LoadState::Idle);
    }
}

/// Pick the most recently modified file in `dir` whose name starts with
/// `prefix`.
#[must_use]
pub fn find_latest_log(dir: &Path, prefix: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut latest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(prefix) {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        match &latest {
            Some((best, _)) if *best >= modified => {}
            _ => latest = Some((modified, path)),
        }
    }
    latest.map(|(_, path)| path)
}

/// Handle to the rotation monitor task.
pub struct MonitorHandle {
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop the monitor and whichever tailer it currently owns.
    pub async fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.task.await;
    }
}

/// Spawn the rotation monitor: keeps exactly one tailer alive over the
/// newest matching log file and restarts it on rotation.
#[must_use]
pub fn spawn_rotation_monitor(
    log_dir: PathBuf,
    prefix: String,
    gate: LoadGate,
    markers: TailMarkers,
    tail_poll: Duration,
    rotation_poll: Duration,
) -> MonitorHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let task = tokio::spawn(async move {
        let mut current: Option<PathBuf> = None;
        let mut tailer: Option<TailerHandle> = None;

        while !stop_flag.load(Ordering::SeqCst) {
            let latest = find_latest_log(&log_dir, &prefix);
            match latest {
                Some(path) if current.as_ref() != Some(&path) => {
                    // Stop the old tailer completely before starting the
                    // replacement, then assume the new session is idle.
                    let is_rotation = current.is_some();
                    if let Some(handle) = tailer.take() {
                        info!("log rotated to {}, stopping old tailer", path.display());
                        handle.stop().await;
                    }
                    gate.force_idle();
                    tailer = Some(spawn_tailer(
                        path.clone(),
                        gate.clone(),
                        markers.clone(),
                        tail_poll,
                        is_rotation,
                    ));
                    current = Some(path);
                }
                Some(_) => {}
                None => {
                    if current.is_some() {
                        warn!("no log file matching {}* remains in {}", prefix, log_dir.display());
                    }
                }
            }
            tokio::time::sleep(rotation_poll).await;
        }

        if let Some(handle) = tailer.take() {
            handle.stop().await;
        }
    });
    MonitorHandle { stop, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn markers() -> TailMarkers {
        TailMarkers {
            loading: "Preparing assets".to_string(),
            idle: "Entering world".to_string(),
        }
    }

    fn append(path: &Path, line: &str) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        writeln!(file, "{line}").unwrap();
    }

    async fn wait_for_state(gate: &LoadGate, want: LoadState) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while gate.state() != want {
            assert!(
                std::time::Instant::now() < deadline,
                "gate never reached {want:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_marker_sequence_transitions_gate() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("output_log_1.txt");
        append(&log, "startup noise");

        let gate = LoadGate::new();
        let handle = spawn_tailer(
            log.clone(),
            gate.clone(),
            markers(),
            Duration::from_millis(20),
            false,
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(gate.state(), LoadState::Idle);

        append(&log, "2026.08.30 [Behaviour] Preparing assets for wrld_y");
        wait_for_state(&gate, LoadState::Loading).await;

        append(&log, "2026.08.30 [Behaviour] Entering world");
        wait_for_state(&gate, LoadState::Idle).await;

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_patch_queued_during_loading_waits_for_idle() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("output_log_1.txt");

        let gate = LoadGate::new();
        let handle = spawn_tailer(
            log.clone(),
            gate.clone(),
            markers(),
            Duration::from_millis(20),
            true,
        );

        append(&log, "something Preparing assets now");
        wait_for_state(&gate, LoadState::Loading).await;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_until_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!waiter.is_finished());

        append(&log, "then Entering world again");
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter released after world entry")
            .unwrap();

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_existing_lines_ignored_without_from_start() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("output_log_1.txt");
        append(&log, "old session Preparing assets line");

        let gate = LoadGate::new();
        let handle = spawn_tailer(
            log.clone(),
            gate.clone(),
            markers(),
            Duration::from_millis(20),
            false,
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(gate.state(), LoadState::Idle);
        handle.stop().await;
    }

    #[test]
    fn test_find_latest_log_by_modification_time() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("output_log_old.txt");
        let new = dir.path().join("output_log_new.txt");
        let unrelated = dir.path().join("notes.txt");
        std::fs::write(&old, "a").unwrap();
        std::fs::write(&new, "b").unwrap();
        std::fs::write(&unrelated, "c").unwrap();

        let past = SystemTime::now() - Duration::from_secs(600);
        OpenOptions::new()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(past)
            .unwrap();

        assert_eq!(find_latest_log(dir.path(), "output_log"), Some(new));
        assert_eq!(find_latest_log(dir.path(), "missing_prefix"), None);
        assert_eq!(find_latest_log(Path::new("/nonexistent"), "x"), None);
    }

    #[tokio::test]
    async fn test_rotation_switches_tailer_and_forces_idle() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("output_log_1.txt");
        append(&first, "boot");

        let gate = LoadGate::new();
        let monitor = spawn_rotation_monitor(
            dir.path().to_path_buf(),
            "output_log".to_string(),
            gate.clone(),
            markers(),
            Duration::from_millis(20),
            Duration::from_millis(50),
        );

        // Drive the first session into Loading.
        tokio::time::sleep(Duration::from_millis(150)).await;
        append(&first, "session one Preparing assets");
        wait_for_state(&gate, LoadState::Loading).await;

        // Client restart: a newer log appears; the monitor must force
        // Idle even though no world was entered.
        let second = dir.path().join("output_log_2.txt");
        append(&second, "fresh session");
        let future = SystemTime::now() + Duration::from_secs(60);
        OpenOptions::new()
            .write(true)
            .open(&second)
            .unwrap()
            .set_modified(future)
            .unwrap();

        wait_for_state(&gate, LoadState::Idle).await;

        // The new file is tailed from the start on rotation.
        append(&second, "now Preparing assets again");
        wait_for_state(&gate, LoadState::Loading).await;

        monitor.stop().await;
    }
}
