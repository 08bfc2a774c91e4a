use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use fs2::FileExt;

/// Exclusive ownership of a storage directory.
///
/// Two daemons pointed at the same `--cache-dir` would delete each other's
/// generations, so the second one refuses to start. Released on drop.
#[derive(Debug)]
pub struct MirrorLock {
    file: File,
}

impl MirrorLock {
    /// Take the lock without blocking.
    /// Returns `None` if another process already holds it.
    pub fn try_acquire(lock_path: &Path) -> io::Result<Option<Self>> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file })),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for MirrorLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
