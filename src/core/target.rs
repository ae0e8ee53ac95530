//! Scan target normalization.
//!
//! The engine echoes back the exact path it was asked to scan, so the
//! absolute, canonical form of a target is also the key its response
//! lines are correlated under.

use crate::core::error::ScanError;

use std::fmt;
use std::path::{Path, PathBuf};

/// A scan target that exists locally, in canonical form.
///
/// # Examples
///
/// ```rust,ignore
/// use scanline::core::ScanTarget;
///
/// let target = ScanTarget::resolve("../package.json").await?;
/// assert!(target.path().is_absolute());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScanTarget {
    requested: PathBuf,
    canonical: PathBuf,
    key: String,
}

impl ScanTarget {
    /// Checks that `path` exists and resolves it to its canonical form.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` if the path does not exist, `InvalidTarget` if
    /// it contains a line break, or `Io` if it cannot be inspected.
    pub async fn resolve(path: impl AsRef<Path>) -> Result<Self, ScanError> {
        let requested = path.as_ref().to_path_buf();

        if let Err(e) = tokio::fs::metadata(&requested).await {
            return Err(match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ScanError::not_found(requested.display().to_string())
                }
                _ => ScanError::Io(e),
            });
        }

        let canonical = tokio::fs::canonicalize(&requested).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ScanError::not_found(requested.display().to_string())
            } else {
                ScanError::Io(e)
            }
        })?;

        Self::from_canonical(requested, canonical)
    }

    /// Builds a target from an already-canonical path without touching the filesystem.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTarget` if the path contains a line break, since the
    /// command would then span more than one protocol line.
    pub fn from_canonical(
        requested: impl Into<PathBuf>,
        canonical: impl Into<PathBuf>,
    ) -> Result<Self, ScanError> {
        let canonical = canonical.into();
        let key = canonical.to_string_lossy().into_owned();
        if key.contains(['\n', '\r']) {
            return Err(ScanError::invalid_target(key, "path contains a line break"));
        }
        Ok(Self {
            requested: requested.into(),
            canonical,
            key,
        })
    }

    /// The path as the caller supplied it.
    pub fn requested(&self) -> &Path {
        &self.requested
    }

    /// The absolute, canonical path.
    pub fn path(&self) -> &Path {
        &self.canonical
    }

    /// The correlation key: the canonical path as text.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The command line sent to the engine for this target.
    pub fn command(&self) -> String {
        format!("SCAN {}\n", self.key)
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_resolve_existing_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("sample.txt");
        std::fs::write(&file, b"hello").unwrap();

        let target = ScanTarget::resolve(&file).await.unwrap();
        assert!(target.path().is_absolute());
        assert_eq!(target.requested(), file.as_path());
        assert_eq!(
            target.path(),
            std::fs::canonicalize(&file).unwrap().as_path()
        );
        assert_eq!(target.command(), format!("SCAN {}\n", target.key()));
    }

    #[tokio::test]
    async fn test_resolve_relative_components() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        let file = dir.path().join("sample.txt");
        std::fs::write(&file, b"hello").unwrap();

        let indirect = dir.path().join("nested").join("..").join("sample.txt");
        let target = ScanTarget::resolve(&indirect).await.unwrap();
        assert!(!target.key().contains(".."));
        assert!(target.key().ends_with("sample.txt"));
    }

    #[tokio::test]
    async fn test_resolve_missing_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.bin");

        let result = ScanTarget::resolve(&missing).await;
        assert!(matches!(result, Err(ScanError::FileNotFound { .. })));
    }

    #[tokio::test]
    async fn test_resolve_rejects_line_breaks() {
        let dir = TempDir::new().unwrap();
        for name in ["a\nVPS", "b\rSCAN x"] {
            let file = dir.path().join(name);
            std::fs::write(&file, b"hello").unwrap();

            let result = ScanTarget::resolve(&file).await;
            assert!(matches!(result, Err(ScanError::InvalidTarget { .. })));
        }
    }

    #[test]
    fn test_from_canonical() {
        let target = ScanTarget::from_canonical("a.txt", "/tmp/a.txt").unwrap();
        assert_eq!(target.key(), "/tmp/a.txt");
        assert_eq!(target.command(), "SCAN /tmp/a.txt\n");

        let result = ScanTarget::from_canonical("x", "/tmp/x\nVPS");
        assert!(matches!(result, Err(ScanError::InvalidTarget { .. })));
    }
}
