//! Atomic replacement of the `current` generation marker.

use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Sibling path used to stage a new link before renaming it over `link`.
fn staging_path(link: &Path) -> PathBuf {
    let n = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = link
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "link".to_string());
    link.with_file_name(format!(".{}.staging-{}-{}", name, std::process::id(), n))
}

/// Point `link` at `target`, replacing whatever it pointed at before.
///
/// The link is staged next to its final location and renamed into place, so
/// anyone resolving `link` sees either the old or the new target.
pub fn replace_symlink(link: &Path, target: &Path) -> io::Result<()> {
    loop {
        let staged = staging_path(link);
        match symlink(target, &staged) {
            Ok(()) => {
                return std::fs::rename(&staged, link).inspect_err(|_| {
                    let _ = std::fs::remove_file(&staged);
                });
            }
            // Leftover from an earlier crash; pick another name.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Where `link` currently points, or `None` if it does not exist.
pub fn current_target(link: &Path) -> io::Result<Option<PathBuf>> {
    match std::fs::read_link(link) {
        Ok(target) => Ok(Some(target)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
