//! Crash-safe file replacement
//!
//! Both the dedup ledger and the credential store are rewritten whole. A
//! write goes to `<file>.tmp` in the same directory, is fsynced, then renamed
//! over the target. A crash at any point leaves either the previous file or
//! the new one, never a truncated mix.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Sibling path used for the in-progress write
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replace `path` with `contents` atomically.
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let tmp = temp_path(path);
    if let Err(e) = write_synced(&tmp, contents) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    fs::rename(&tmp, path)?;

    // Make the rename itself durable
    #[cfg(unix)]
    if let Ok(dir) = File::open(&parent) {
        let _ = dir.sync_all();
    }

    Ok(())
}

fn write_synced(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

/// Read a file that may legitimately not exist yet
pub fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_temp_path_is_sibling() {
        let path = PathBuf::from("/data/welcomer/db.json");
        assert_eq!(temp_path(&path), PathBuf::from("/data/welcomer/db.json.tmp"));
    }

    #[test]
    fn test_atomic_write_replaces_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("state.json");

        atomic_write(&path, b"{}").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_stale_temp_file_does_not_disturb_target() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        atomic_write(&path, b"committed").unwrap();

        // Crash after writing the temp file but before the rename
        fs::write(temp_path(&path), b"{\"half").unwrap();

        assert_eq!(read_optional(&path).unwrap().unwrap(), b"committed");

        atomic_write(&path, b"next").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"next");
    }

    #[test]
    fn test_read_optional_missing() {
        let dir = TempDir::new().unwrap();
        assert!(read_optional(&dir.path().join("absent")).unwrap().is_none());
    }
}
