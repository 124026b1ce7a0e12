//! Persisted, strictly increasing serial numbers.
//!
//! One counter covers the root and every leaf. The file holds the last
//! allocated value in decimal. Every read-increment-persist runs under an
//! exclusive advisory lock on a sibling `serial.lock` file, so allocators in
//! different processes sharing the directory never hand out the same value.
//! The in-process mutex keeps threads of one allocator off the lock file.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fd_lock::RwLock;
use tracing::debug;

use crate::errors::{MeshCertError, Result};
use crate::utils::fs::{write_atomic, FileMode};

/// Value stored before the first allocation; the first serial handed out is 1001.
pub const SERIAL_FLOOR: u128 = 1000;

pub const SERIAL_FILE: &str = "serial";

#[derive(Debug)]
pub struct SerialAllocator {
    path: PathBuf,
    lock_path: PathBuf,
    last: Mutex<u128>,
}

impl SerialAllocator {
    /// Open the counter at `path`, creating it at the floor when absent.
    pub fn open(path: &Path) -> Result<Self> {
        let lock_path = path.with_extension("lock");
        let last = with_file_lock(&lock_path, || match read_counter(path)? {
            Some(value) => Ok(value),
            None => {
                persist(path, SERIAL_FLOOR)?;
                Ok(SERIAL_FLOOR)
            }
        })?;
        Ok(Self { path: path.to_path_buf(), lock_path, last: Mutex::new(last) })
    }

    /// Allocate the next serial: read, increment, persist, then return.
    pub fn next(&self) -> Result<u128> {
        let mut last = self.last.lock().map_err(|_| MeshCertError::internal("serial lock poisoned"))?;

        let next = with_file_lock(&self.lock_path, || {
            let on_disk = read_counter(&self.path)?.unwrap_or(SERIAL_FLOOR);
            let next = (*last)
                .max(on_disk)
                .checked_add(1)
                .ok_or_else(|| MeshCertError::internal("serial counter exhausted"))?;
            persist(&self.path, next)?;
            Ok(next)
        })?;
        *last = next;

        debug!(serial = %next, "Allocated certificate serial");
        Ok(next)
    }

    /// Last allocated value.
    pub fn current(&self) -> Result<u128> {
        self.last.lock().map(|v| *v).map_err(|_| MeshCertError::internal("serial lock poisoned"))
    }

    /// Raise the counter to at least `value` (used by restore).
    pub fn advance_to(&self, value: u128) -> Result<()> {
        let mut last = self.last.lock().map_err(|_| MeshCertError::internal("serial lock poisoned"))?;
        let raised = with_file_lock(&self.lock_path, || {
            let on_disk = read_counter(&self.path)?.unwrap_or(SERIAL_FLOOR);
            let current = (*last).max(on_disk);
            if value > current {
                persist(&self.path, value)?;
                return Ok(value);
            }
            Ok(current)
        })?;
        *last = raised;
        Ok(())
    }
}

/// Run `f` while holding an exclusive advisory lock on `lock_path`. The lock
/// is released when the file handle drops.
fn with_file_lock<T>(lock_path: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let file: File = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)
        .map_err(|e| MeshCertError::storage_io(lock_path, "open serial lock", e))?;
    let mut lock = RwLock::new(file);
    let _held = lock.write().map_err(|e| MeshCertError::storage_io(lock_path, "lock serial counter", e))?;
    f()
}

fn read_counter(path: &Path) -> Result<Option<u128>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents.trim().parse::<u128>().map(Some).map_err(|e| {
            MeshCertError::serialization_with_source(
                format!("serial counter at {} is corrupt", path.display()),
                e,
            )
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MeshCertError::storage_io(path, "read serial counter", e)),
    }
}

fn persist(path: &Path, value: u128) -> Result<()> {
    write_atomic(path, format!("{}\n", value).as_bytes(), FileMode::Private)
        .map_err(|e| MeshCertError::storage_io(path, "persist serial counter", e))
}
