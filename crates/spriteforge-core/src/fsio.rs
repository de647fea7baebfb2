//! Atomic filesystem writes and the run-folder lock.
//!
//! Every JSON artifact goes through [`write_atomic`]: write to `{path}.tmp`,
//! fsync, rename over the destination. A crash mid-write leaves either the
//! old file or a stray `.tmp`, never a torn artifact.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::clock;
use crate::error::CoreError;

/// Atomically replace `path` with `bytes`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Atomically write a value as pretty-printed JSON.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), CoreError> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

/// Read and parse a JSON artifact.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CoreError> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map_or_else(
        || std::ffi::OsString::from("artifact"),
        std::ffi::OsStr::to_os_string,
    );
    name.push(".tmp");
    path.with_file_name(name)
}

/// Contents of a run-folder lock file.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub started_at: String,
}

/// Exclusive run-folder lock.
///
/// The lock file records PID + start timestamp. A second process finding a
/// lock whose PID is still alive refuses to operate on the run; a lock left
/// by a dead process is reclaimed with a warning.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Acquire the lock at `path`, failing if a live process holds it.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        if path.exists() {
            match read_json::<LockInfo>(&path) {
                Ok(info) if is_pid_alive(info.pid) => {
                    return Err(CoreError::LockHeld {
                        pid: info.pid,
                        path,
                    });
                }
                Ok(info) => {
                    log::warn!(
                        "reclaiming stale lock at {} (pid {} is gone)",
                        path.display(),
                        info.pid
                    );
                }
                Err(_) => {
                    log::warn!("reclaiming unreadable lock at {}", path.display());
                }
            }
        }
        let info = LockInfo {
            pid: std::process::id(),
            started_at: clock::now_utc(),
        };
        write_atomic(&path, &serde_json::to_vec_pretty(&info)?)?;
        Ok(Self { path })
    }

    /// Inspect a lock file without acquiring it.
    pub fn inspect(path: &Path) -> Result<LockInfo, CoreError> {
        read_json(path)
    }

    /// Release the lock, removing the file.
    pub fn release(self) -> Result<(), CoreError> {
        std::fs::remove_file(&self.path)?;
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(target_os = "linux")]
fn is_pid_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

/// Without /proc the question is unanswerable; treat foreign locks as live
/// so we never clobber a running sibling.
#[cfg(not(target_os = "linux"))]
fn is_pid_alive(pid: u32) -> bool {
    pid == std::process::id() || pid != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn unique_tmp_dir(prefix: &str) -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "{prefix}-{}-{n}-{}",
            std::process::id(),
            clock::epoch_millis()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn atomic_write_round_trips() {
        let dir = unique_tmp_dir("fsio-roundtrip");
        let path = dir.join("state.json");
        let value = serde_json::json!({"status": "running", "current_frame": 3});
        write_json_atomic(&path, &value).unwrap();
        let back: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(back, value);
        // No stray temp file remains.
        assert!(!dir.join("state.json.tmp").exists());
    }

    #[test]
    fn atomic_write_replaces_existing() {
        let dir = unique_tmp_dir("fsio-replace");
        let path = dir.join("x.json");
        write_json_atomic(&path, &serde_json::json!({"v": 1})).unwrap();
        write_json_atomic(&path, &serde_json::json!({"v": 2})).unwrap();
        let back: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(back["v"], 2);
    }

    #[test]
    fn lock_refuses_second_acquire_while_held() {
        let dir = unique_tmp_dir("fsio-lock");
        let lock_path = dir.join("lock");
        let lock = LockFile::acquire(&lock_path).unwrap();
        let err = LockFile::acquire(&lock_path).unwrap_err();
        match err {
            CoreError::LockHeld { pid, .. } => assert_eq!(pid, std::process::id()),
            other => panic!("expected LockHeld, got {other}"),
        }
        lock.release().unwrap();
        assert!(!lock_path.exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn stale_lock_is_reclaimed() {
        let dir = unique_tmp_dir("fsio-stale");
        let lock_path = dir.join("lock");
        // PID 0 never appears under /proc as a reachable process dir for us.
        let stale = LockInfo {
            pid: u32::MAX - 1,
            started_at: clock::now_utc(),
        };
        write_atomic(&lock_path, &serde_json::to_vec(&stale).unwrap()).unwrap();
        let lock = LockFile::acquire(&lock_path).expect("stale lock reclaimed");
        let info = LockFile::inspect(lock.path()).unwrap();
        assert_eq!(info.pid, std::process::id());
    }
}
