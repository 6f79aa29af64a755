//! Utility functions for error handling around artifact files

use std::fs;
use std::io;
use std::path::Path;

use crate::error::{Result, SynthError};

/// Open a file for reading, naming what it was needed for on failure
pub fn open_artifact(path: &Path, purpose: &str) -> Result<fs::File> {
    if !path.is_file() {
        return Err(SynthError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} not found (needed for {purpose})", path.display()),
        )));
    }

    fs::File::open(path).map_err(|e| {
        let reason = match e.kind() {
            io::ErrorKind::PermissionDenied => "permission denied",
            _ => "failed to open",
        };
        SynthError::Io(io::Error::new(
            e.kind(),
            format!("{}: {reason} ({purpose})", path.display()),
        ))
    })
}

/// Make sure a directory exists, creating it when missing
pub fn ensure_directory(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    if path.exists() {
        return Err(SynthError::validation(format!(
            "{} exists but is not a directory",
            path.display()
        )));
    }
    fs::create_dir_all(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_file_names_purpose() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_artifact(&dir.path().join("absent.json"), "person model").unwrap_err();
        assert!(err.to_string().contains("person model"));
    }

    #[test]
    fn test_ensure_directory_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_directory(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
