// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Error, Result};
use std::path::Path;

/// Validate a single path segment taken from configuration or a secret name.
/// Returns the segment unchanged when it is safe to join onto a directory.
pub fn sanitize_path_component(segment: &str) -> Result<&str> {
    let reject = |reason: &str| {
        Err(Error::InvalidSecretName {
            name: segment.to_string(),
            reason: reason.to_string(),
        })
    };

    if segment.is_empty() {
        return reject("path segment cannot be empty");
    }
    if segment.contains('\0') {
        return reject("contains null byte");
    }
    // No percent escapes, decoded or not.
    if segment.contains('%') {
        return reject("contains percent encoding");
    }
    if segment == "." || segment.contains("..") {
        return reject("contains path traversal sequence");
    }
    if segment.contains('/') || segment.contains('\\') {
        return reject("contains path separator");
    }
    if let Some(c) = segment
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '.' | '-' | '_' | '@' | '+'))
    {
        return reject(&format!("contains invalid character: '{}'", c));
    }
    Ok(segment)
}

/// Atomically write data to a file using a temporary file and rename.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    use std::fs;
    use std::io::Write;

    // Same directory, so the rename stays on one filesystem
    let parent = parent_dir(path)?;
    let temp_path = temp_path_in(parent);

    let mut file = fs::File::create(&temp_path).map_err(|e| Error::WriteFile {
        path: temp_path.clone(),
        source: e,
    })?;
    file.write_all(contents)
        .and_then(|_| file.sync_all())
        .map_err(|e| Error::WriteFile {
            path: temp_path.clone(),
            source: e,
        })?;
    drop(file);

    rename_into_place(&temp_path, path)
}

/// Like [`atomic_write`], but the file is created readable by the owner only.
pub fn atomic_write_secret(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = parent_dir(path)?;
    let temp_path = temp_path_in(parent);

    write_secret_file(&temp_path, contents)?;
    rename_into_place(&temp_path, path)
}

fn parent_dir(path: &Path) -> Result<&Path> {
    match path.parent() {
        Some(p) if p.as_os_str().is_empty() => Ok(Path::new(".")),
        Some(p) => Ok(p),
        None => Err(Error::InvalidPath(path.to_path_buf())),
    }
}

fn temp_path_in(dir: &Path) -> std::path::PathBuf {
    let random_suffix: u64 = rand::Rng::random(&mut rand::rng());
    dir.join(format!(".tmp-{:x}", random_suffix))
}

fn rename_into_place(temp_path: &Path, path: &Path) -> Result<()> {
    std::fs::rename(temp_path, path).map_err(|e| {
        if temp_path.exists() {
            let _ = std::fs::remove_file(temp_path);
        }
        Error::WriteFile {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

#[cfg(unix)]
pub fn write_secret_file(path: &Path, contents: &[u8]) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| Error::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })?;

    file.write_all(contents).map_err(|e| Error::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    Ok(())
}

#[cfg(not(unix))]
pub fn write_secret_file(path: &Path, contents: &[u8]) -> Result<()> {
    std::fs::write(path, contents).map_err(|e| Error::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_accepts_plain_segments() {
        assert!(sanitize_path_component("cucumber").is_ok());
        assert!(sanitize_path_component("private-key").is_ok());
        assert!(sanitize_path_component("ca_chain.pem").is_ok());
        assert!(sanitize_path_component("user@example").is_ok());
    }

    #[test]
    fn test_sanitize_rejects_traversal() {
        assert!(sanitize_path_component("..").is_err());
        assert!(sanitize_path_component(".").is_err());
        assert!(sanitize_path_component("a..b").is_err());
        assert!(sanitize_path_component("%2e%2e").is_err());
        assert!(sanitize_path_component("a/b").is_err());
        assert!(sanitize_path_component("a\\b").is_err());
        assert!(sanitize_path_component("").is_err());
        assert!(sanitize_path_component("a\0b").is_err());
        assert!(sanitize_path_component("a b").is_err());
        assert!(sanitize_path_component("a:b").is_err());
    }

    #[test]
    fn test_atomic_write_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pem");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        // No temp files left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_atomic_write_secret_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ca.key");
        atomic_write_secret(&path, b"secret").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
