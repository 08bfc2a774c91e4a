//! Storage directory path management
//!
//! This module provides the `MirrorLayout` struct which manages all filesystem
//! paths for the storage directory layout:
//!
//! ```text
//! <root>/
//! ├── gitserve.lock                 # flock held while serving
//! ├── mirror.git/                   # Bare repo
//! ├── generations/
//! │   └── gen-000001/               # Immutable generation
//! └── current -> generations/gen-…  # Atomic symlink
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::types::GenerationId;

/// Manages all filesystem paths for the storage directory layout
#[derive(Debug, Clone)]
pub struct MirrorLayout {
    root: PathBuf,
}

impl MirrorLayout {
    /// Creates a new MirrorLayout with the specified root directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root storage directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the lock file path: `{root}/gitserve.lock`
    pub fn lock_path(&self) -> PathBuf {
        self.root.join("gitserve.lock")
    }

    /// Returns the bare mirror path: `{root}/mirror.git`
    pub fn mirror_dir(&self) -> PathBuf {
        self.root.join("mirror.git")
    }

    /// Returns the generations directory path: `{root}/generations`
    pub fn generations_dir(&self) -> PathBuf {
        self.root.join("generations")
    }

    /// Returns the generation directory: `{root}/generations/gen-NNNNNN`
    pub fn generation_dir(&self, generation: GenerationId) -> PathBuf {
        self.generations_dir().join(generation.dir_name())
    }

    /// Returns the current symlink path: `{root}/current`
    pub fn current_symlink(&self) -> PathBuf {
        self.root.join("current")
    }

    /// Whether `name`, an entry directly under the root, is one the layout
    /// creates: the mirror, the generations directory, `current` or a
    /// leftover staged `current` link.
    pub fn owns(&self, name: &OsStr) -> bool {
        match name.to_str() {
            Some("mirror.git" | "generations" | "current") => true,
            Some(other) => other.starts_with(".current.staging-"),
            None => false,
        }
    }

    /// Generation numbers present on disk, ascending.
    pub fn existing_generations(&self) -> Vec<GenerationId> {
        let mut generations = Vec::new();

        if let Ok(entries) = std::fs::read_dir(self.generations_dir()) {
            for entry in entries.flatten() {
                if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    continue;
                }
                if let Some(generation) = entry
                    .file_name()
                    .to_str()
                    .and_then(GenerationId::from_dir_name)
                {
                    generations.push(generation);
                }
            }
        }

        generations.sort_unstable();
        generations
    }
}
