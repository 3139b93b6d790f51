//! Local filesystem access for the database directory.
//!
//! Thin wrapper over `std::fs` that attaches paths to errors and maps a
//! missing file to [`CloudError::NotFound`].

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{CloudError, CloudResult};

/// Name and size of one directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttributes {
    /// Bare file name.
    pub name: String,
    /// Size in bytes.
    pub size_bytes: u64,
}

/// Local filesystem capability.
#[derive(Debug, Clone, Default)]
pub struct LocalEnv;

impl LocalEnv {
    /// Creates the environment.
    pub fn new() -> Self {
        Self
    }

    /// Returns `Ok(false)` if `path` does not exist; other failures are errors.
    pub fn exists(&self, path: &Path) -> CloudResult<bool> {
        match fs::metadata(path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CloudError::from_io(path, e)),
        }
    }

    /// Reads a whole file.
    pub fn read_file(&self, path: &Path) -> CloudResult<Vec<u8>> {
        fs::read(path).map_err(|e| CloudError::from_io(path, e))
    }

    /// Reads a whole file as UTF-8 text.
    pub fn read_to_string(&self, path: &Path) -> CloudResult<String> {
        fs::read_to_string(path).map_err(|e| CloudError::from_io(path, e))
    }

    /// Creates or truncates `path` and writes `data`, syncing before return.
    pub fn write_file(&self, path: &Path, data: &[u8]) -> CloudResult<()> {
        let mut file = File::create(path).map_err(|e| CloudError::from_io(path, e))?;
        file.write_all(data).map_err(|e| CloudError::from_io(path, e))?;
        file.sync_all().map_err(|e| CloudError::from_io(path, e))?;
        Ok(())
    }

    /// Writes `data` to `<path>.tmp` and renames it over `path`.
    pub fn write_file_atomic(&self, path: &Path, data: &[u8]) -> CloudResult<()> {
        let tmp_path = tmp_path_for(path);
        self.write_file(&tmp_path, data)?;
        self.rename(&tmp_path, path)
    }

    /// Renames a file, replacing the target if present.
    pub fn rename(&self, from: &Path, to: &Path) -> CloudResult<()> {
        fs::rename(from, to).map_err(|e| CloudError::from_io(from, e))?;
        debug!(from = ?from, to = ?to, "renamed local file");
        Ok(())
    }

    /// Deletes a file.
    pub fn delete_file(&self, path: &Path) -> CloudResult<()> {
        fs::remove_file(path).map_err(|e| CloudError::from_io(path, e))
    }

    /// Lists the entries of a directory with their sizes.
    pub fn list_dir(&self, dir: &Path) -> CloudResult<Vec<FileAttributes>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| CloudError::from_io(dir, e))? {
            let entry = entry.map_err(|e| CloudError::from_io(dir, e))?;
            let metadata = entry
                .metadata()
                .map_err(|e| CloudError::from_io(&entry.path(), e))?;
            out.push(FileAttributes {
                name: entry.file_name().to_string_lossy().into_owned(),
                size_bytes: metadata.len(),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Creates `dir` and its parents if missing.
    pub fn create_dir_if_missing(&self, dir: &Path) -> CloudResult<()> {
        fs::create_dir_all(dir).map_err(|e| CloudError::from_io(dir, e))
    }

    /// Generates a fresh unique id string.
    pub fn generate_unique_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
