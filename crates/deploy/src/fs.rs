//! File system utils.

use std::{
    io::Write,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::{Serialize, de::DeserializeOwned};

pub struct FsHandler;

impl FsHandler {
    /// Create a directory and all of its parents if it doesn't exist.
    pub fn create_dir(path: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory {}", path.display()))?;
        tracing::trace!(path = %path.display(), "Ensured directory exists");
        Ok(())
    }

    /// Sibling path used to stage an atomic replacement of `path`.
    pub fn temp_sibling(path: &Path) -> anyhow::Result<PathBuf> {
        let file_name = path
            .file_name()
            .context("Path must have a file name")?
            .to_string_lossy();
        Ok(path.with_file_name(format!(".{file_name}.tmp")))
    }

    /// Write `contents` to `path` so that readers see either the old or the new
    /// file, never a partial one.
    ///
    /// The data is written and synced to a temporary sibling which is then
    /// renamed onto `path`. Parent directories are created as needed.
    pub fn write_atomic(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            Self::create_dir(parent)?;
        }

        let tmp = Self::temp_sibling(path)?;
        let mut file = std::fs::File::create(&tmp)
            .with_context(|| format!("Failed to create temporary file {}", tmp.display()))?;
        file.write_all(contents)
            .with_context(|| format!("Failed to write temporary file {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync temporary file {}", tmp.display()))?;
        drop(file);

        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e).with_context(|| {
                format!("Failed to move {} onto {}", tmp.display(), path.display())
            });
        }

        Ok(())
    }

    /// Serialize `value` as pretty JSON and write it atomically.
    pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
        let mut json = serde_json::to_vec_pretty(value)
            .with_context(|| format!("Failed to serialize {}", path.display()))?;
        json.push(b'\n');
        Self::write_atomic(path, &json)
    }

    pub fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
        let content = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_slice(&content)
            .with_context(|| format!("Failed to parse JSON from {}", path.display()))
    }

    /// Remove a file, treating a missing file as already removed.
    pub fn remove_file_if_exists(path: &Path) -> anyhow::Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    pub fn is_executable(metadata: &std::fs::Metadata) -> bool {
        metadata.permissions().mode() & 0o111 != 0
    }

    /// Mark a file as executable by everyone (`0o755`).
    pub fn set_executable(path: &Path) -> anyhow::Result<()> {
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("Failed to get metadata for {}", path.display()))?;

        let mut perms = metadata.permissions();
        perms.set_mode(0o755);

        std::fs::set_permissions(path, perms)
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    #[test]
    fn test_write_atomic_creates_parents_and_overwrites() {
        let temp_dir = TempDir::new("luxnet-fs").expect("Failed to create temp dir");
        let path = temp_dir.path().join("a/b/file.json");

        FsHandler::write_atomic(&path, b"first").expect("first write");
        FsHandler::write_atomic(&path, b"second").expect("second write");

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert!(!FsHandler::temp_sibling(&path).unwrap().exists());
    }

    #[test]
    fn test_set_executable() {
        let temp_dir = TempDir::new("luxnet-fs").expect("Failed to create temp dir");
        let path = temp_dir.path().join("bin");
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();

        assert!(!FsHandler::is_executable(&std::fs::metadata(&path).unwrap()));
        FsHandler::set_executable(&path).expect("chmod");
        assert!(FsHandler::is_executable(&std::fs::metadata(&path).unwrap()));
    }

    #[test]
    fn test_remove_missing_file_is_ok() {
        let temp_dir = TempDir::new("luxnet-fs").expect("Failed to create temp dir");
        FsHandler::remove_file_if_exists(&temp_dir.path().join("nope")).expect("remove");
    }
}
