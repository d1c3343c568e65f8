//! File replacement helpers
//!
//! Every write goes to a temporary file in the destination directory which
//! is then renamed over the destination, so a failure at any point leaves
//! the previous file in place.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{ConfiguratorError, Result};

fn temp_beside(dest: &Path) -> Result<NamedTempFile> {
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    NamedTempFile::new_in(dir).map_err(|e| ConfiguratorError::write(dest, e))
}

/// Read `path` whole.
///
/// A missing file is `NotFound`; any other failure is `ReadError`.
pub fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| read_error(path, e))
}

/// Read `path` as UTF-8 text; content that is not UTF-8 is `Corrupt`
pub fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::InvalidData => ConfiguratorError::corrupt(path, e),
        _ => read_error(path, e),
    })
}

fn read_error(path: &Path, e: io::Error) -> ConfiguratorError {
    match e.kind() {
        ErrorKind::NotFound => ConfiguratorError::NotFound(path.to_path_buf()),
        _ => ConfiguratorError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        },
    }
}

/// Replace `dest` with `contents`
pub fn write_atomic(dest: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = temp_beside(dest)?;
    tmp.write_all(contents)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| ConfiguratorError::write(dest, e))?;
    tmp.persist(dest)
        .map_err(|e| ConfiguratorError::write(dest, e.error))?;
    Ok(())
}

/// Replace `dest` with a copy of `src`.
///
/// Fails with `SameFile` when both paths resolve to the same file.
pub fn copy_atomic(src: &Path, dest: &Path) -> Result<()> {
    if same_file(src, dest) {
        return Err(ConfiguratorError::SameFile(src.to_path_buf()));
    }

    let mut source = File::open(src).map_err(|e| {
        ConfiguratorError::write(dest, format!("cannot read {}: {}", src.display(), e))
    })?;
    let mut tmp = temp_beside(dest)?;
    io::copy(&mut source, tmp.as_file_mut())
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| ConfiguratorError::write(dest, e))?;
    tmp.persist(dest)
        .map_err(|e| ConfiguratorError::write(dest, e.error))?;
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic_replaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file");
        fs::write(&path, "old").unwrap();

        write_atomic(&path, b"new").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_read_errors_name_the_path() {
        let dir = tempdir().unwrap();

        let err = read_to_string(dir.path()).unwrap_err();
        assert!(matches!(err, ConfiguratorError::ReadError { .. }));
        assert!(err.to_string().contains(&dir.path().display().to_string()));

        let missing = dir.path().join("missing");
        assert!(matches!(read(&missing), Err(ConfiguratorError::NotFound(p)) if p == missing));
    }

    #[test]
    fn test_read_non_utf8_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("datastore-acm.xml");
        fs::write(&path, b"<datastores>\xff\xfe</datastores>").unwrap();

        assert!(matches!(
            read_to_string(&path),
            Err(ConfiguratorError::Corrupt { .. })
        ));
        assert_eq!(read(&path).unwrap().len(), 27);
    }

    #[test]
    fn test_copy_same_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server.pem");
        fs::write(&path, "pem").unwrap();

        let err = copy_atomic(&path, &dir.path().join(".").join("server.pem")).unwrap_err();
        assert!(matches!(err, ConfiguratorError::SameFile(_)));
        assert_eq!(fs::read_to_string(&path).unwrap(), "pem");
    }

    #[test]
    fn test_copy_missing_source_keeps_destination() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("server.crt");
        fs::write(&dest, "installed").unwrap();

        let err = copy_atomic(&dir.path().join("missing.crt"), &dest).unwrap_err();

        assert!(matches!(err, ConfiguratorError::WriteError { .. }));
        assert_eq!(fs::read_to_string(&dest).unwrap(), "installed");
    }
}
