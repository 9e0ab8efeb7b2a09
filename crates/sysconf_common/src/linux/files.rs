//! Filesystem operations with all-or-nothing writes.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::unistd::{chown, Gid, Uid};

use sysconf_shared::{OsError, OsErrorKind};

use super::LinuxHost;
use crate::adapter::{FileAttrs, FileSystem};

fn io_err(path: &Path) -> impl Fn(io::Error) -> OsError + '_ {
    move |e| OsError::from_io(path.display().to_string(), &e)
}

pub(super) fn read_optional(path: &Path) -> Result<Option<String>, OsError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path)(e)),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.sysconf-tmp", name))
}

fn apply_owner(path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<(), OsError> {
    if uid.is_none() && gid.is_none() {
        return Ok(());
    }
    chown(path, uid.map(Uid::from_raw), gid.map(Gid::from_raw))
        .map_err(|e| super::nix_err(&path.display().to_string(), e))
}

/// Replace `path` with `content` via temp file, fsync and rename.
///
/// Without explicit `attrs` the mode and owner of the existing file are kept,
/// falling back to 0644 for new files.
pub fn atomic_write(path: &Path, content: &str, attrs: Option<FileAttrs>) -> Result<(), OsError> {
    let attrs = match attrs {
        Some(attrs) => attrs,
        None => match fs::metadata(path) {
            Ok(meta) => FileAttrs::owned(meta.mode() & 0o7777, meta.uid(), meta.gid()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => FileAttrs::mode(0o644),
            Err(e) => return Err(io_err(path)(e)),
        },
    };

    let tmp = temp_path(path);
    let result = (|| {
        let mut file = fs::File::create(&tmp).map_err(io_err(path))?;
        file.write_all(content.as_bytes()).map_err(io_err(path))?;
        file.sync_all().map_err(io_err(path))?;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(attrs.mode)).map_err(io_err(path))?;
        apply_owner(&tmp, attrs.uid, attrs.gid)?;
        fs::rename(&tmp, path).map_err(io_err(path))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

impl FileSystem for LinuxHost {
    fn exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }

    fn read_file(&self, path: &Path) -> Result<Option<String>, OsError> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => Ok(None),
            _ => read_optional(path),
        }
    }

    fn write_file(&self, path: &Path, content: &str, attrs: FileAttrs) -> Result<(), OsError> {
        atomic_write(path, content, Some(attrs))
    }

    fn remove_file(&self, path: &Path) -> Result<(), OsError> {
        fs::remove_file(path).map_err(io_err(path))
    }

    fn create_dir(&self, path: &Path, attrs: FileAttrs) -> Result<(), OsError> {
        fs::create_dir(path).map_err(io_err(path))?;
        let finish = fs::set_permissions(path, fs::Permissions::from_mode(attrs.mode))
            .map_err(io_err(path))
            .and_then(|_| apply_owner(path, attrs.uid, attrs.gid));
        if finish.is_err() {
            let _ = fs::remove_dir(path);
        }
        finish
    }

    fn remove_dir(&self, path: &Path) -> Result<(), OsError> {
        fs::remove_dir(path).map_err(io_err(path))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), OsError> {
        if fs::symlink_metadata(to).is_ok() {
            return Err(OsError::new(
                OsErrorKind::InvalidValue,
                to.display().to_string(),
                "destination exists",
            ));
        }
        fs::rename(from, to).map_err(io_err(from))
    }

    fn remove_tree(&self, path: &Path) -> Result<(), OsError> {
        fs::remove_dir_all(path).map_err(io_err(path))
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>, OsError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path).map_err(io_err(path))? {
            let entry = entry.map_err(io_err(path))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_keeps_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shadow");
        fs::write(&path, "old\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

        atomic_write(&path, "new\n", None).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new\n");
        assert_eq!(fs::metadata(&path).unwrap().mode() & 0o777, 0o640);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_atomic_write_failure_leaves_target() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing-dir").join("file");
        let err = atomic_write(&path, "x", None).unwrap_err();
        assert_eq!(err.kind, OsErrorKind::NotFound);
        assert!(!path.exists());
    }
}
