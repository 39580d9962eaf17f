//! vault-piv-helper - Secure Filesystem Operations
//!
//! Envelopes and tokens are replaced atomically: readers see the old file or
//! the complete new one.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rand::RngCore;
use tracing::debug;

use crate::error::Result;

/// Owner read/write only
pub const PRIVATE_MODE: u32 = 0o600;

/// Sibling temporary path: `<name>.<random hex>`
fn temp_path(path: &Path) -> io::Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;

    let mut suffix = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut suffix);

    let mut temp_name = name.to_os_string();
    temp_name.push(format!(".{}", hex::encode(suffix)));
    Ok(path.with_file_name(temp_name))
}

fn open_new(path: &Path, mode: u32) -> io::Result<fs::File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    options.open(path)
}

/// Write `data` to `path` atomically with the given unix permissions.
///
/// The data is flushed to disk before the rename. On failure the temporary
/// file is removed and `path` is left untouched.
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8], mode: u32) -> Result<()> {
    let path = path.as_ref();
    let temp = temp_path(path)?;

    let written = open_new(&temp, mode).and_then(|mut file| {
        file.write_all(data)?;
        file.sync_all()
    });

    if let Err(e) = written.and_then(|()| fs::rename(&temp, path)) {
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }

    debug!(path = %path.display(), bytes = data.len(), "Wrote file");
    Ok(())
}

pub fn read_file(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    Ok(fs::read(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_and_replace() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.json");

        write_atomic(&path, b"first", PRIVATE_MODE).unwrap();
        assert_eq!(read_file(&path).unwrap(), b"first");

        write_atomic(&path, b"second", PRIVATE_MODE).unwrap();
        assert_eq!(read_file(&path).unwrap(), b"second");

        // No temporary files left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("token");
        write_atomic(&path, b"s.abc", PRIVATE_MODE).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_failed_write_leaves_destination() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.json");
        write_atomic(&path, b"original", PRIVATE_MODE).unwrap();

        // Destination replaced by a non-empty directory: rename must fail
        let blocked = dir.path().join("blocked");
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("child"), b"x").unwrap();
        assert!(write_atomic(&blocked, b"new", PRIVATE_MODE).is_err());

        assert_eq!(read_file(&path).unwrap(), b"original");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("vault.json");
        assert!(write_atomic(&path, b"data", PRIVATE_MODE).is_err());
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let temp = temp_path(Path::new("/tmp/out/vault.json")).unwrap();
        assert_eq!(temp.parent(), Some(Path::new("/tmp/out")));

        let name = temp.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("vault.json."));
        assert_eq!(name.len(), "vault.json.".len() + 16);
    }
}
