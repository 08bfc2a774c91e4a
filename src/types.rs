//! Shared types for gitserve

use std::fmt;

/// Identifies one materialized generation of the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenerationId(pub u64);

impl GenerationId {
    /// Creates a new GenerationId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the inner u64 value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The generation that follows this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Directory name used on disk: `gen-NNNNNN`.
    pub fn dir_name(&self) -> String {
        format!("gen-{:0>6}", self.0)
    }

    /// Parse a directory name produced by [`GenerationId::dir_name`].
    pub fn from_dir_name(name: &str) -> Option<Self> {
        name.strip_prefix("gen-")
            .and_then(|num| num.parse::<u64>().ok())
            .map(Self)
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A remote state that has been applied to the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    /// Full commit SHA.
    pub commit: String,
    /// Branch the commit was taken from.
    pub branch: String,
}

impl Revision {
    pub fn new(commit: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            commit: commit.into(),
            branch: branch.into(),
        }
    }

    /// Abbreviated commit for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .commit
            .char_indices()
            .nth(12)
            .map(|(i, _)| i)
            .unwrap_or(self.commit.len());
        &self.commit[..end]
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.branch, self.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_dir_name_is_zero_padded() {
        assert_eq!(GenerationId::new(1).dir_name(), "gen-000001");
        assert_eq!(GenerationId::new(123456).dir_name(), "gen-123456");
        assert_eq!(GenerationId::new(1234567).dir_name(), "gen-1234567");
    }

    #[test]
    fn generation_dir_name_parses_back() {
        assert_eq!(
            GenerationId::from_dir_name("gen-000042"),
            Some(GenerationId::new(42))
        );
        assert_eq!(GenerationId::from_dir_name("current"), None);
        assert_eq!(GenerationId::from_dir_name("gen-abc"), None);
        assert_eq!(GenerationId::from_dir_name("gen-"), None);
    }

    #[test]
    fn generation_next_increments() {
        assert_eq!(GenerationId::new(7).next(), GenerationId::new(8));
    }

    #[test]
    fn revision_display_abbreviates_commit() {
        let revision = Revision::new("0123456789abcdef0123456789abcdef01234567", "main");
        assert_eq!(revision.short(), "0123456789ab");
        assert_eq!(revision.to_string(), "main@0123456789ab");

        let short = Revision::new("abc", "dev");
        assert_eq!(short.short(), "abc");
    }
}
