use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::job::Stem;

const CANONICAL_FILE: &str = "input.wav";
const SEPARATED_DIR: &str = "separated";
const STEMS_DIR: &str = "stems";

/// Move a file from `src` to `dst`. Uses `rename` first and falls back to
/// copy + delete when rename fails, which covers cross-device moves.
pub(crate) fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    std::fs::copy(src, dst).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(src).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Per-job working directories under a common jobs root.
///
/// Layout of `<root>/<job_id>/`:
/// - `source.<ext>`: raw upload
/// - `input.wav`: canonical input
/// - `separated/`: output tree of the separation tool
/// - `stems/<stem>.wav`: published stems
#[derive(Debug, Clone)]
pub struct JobStorage {
    root: PathBuf,
}

impl JobStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    pub fn create_job_dir(&self, job_id: &str) -> Result<PathBuf, StorageError> {
        let dir = self.job_dir(job_id);
        ensure_directory(&dir)?;
        Ok(dir)
    }

    /// Writes the raw upload as `source.<extension>`. The file is created
    /// exclusively; an existing upload is never overwritten.
    pub fn store_upload(
        &self,
        job_id: &str,
        extension: &str,
        content: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let dir = self.create_job_dir(job_id)?;
        let path = dir.join(format!("source.{}", extension));

        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::FileExists(path));
            }
            Err(e) => return Err(StorageError::WriteFile { path, source: e }),
        };

        file.write_all(content)
            .map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;

        Ok(path)
    }

    pub fn canonical_path(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join(CANONICAL_FILE)
    }

    pub fn separation_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join(SEPARATED_DIR)
    }

    pub fn stems_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join(STEMS_DIR)
    }

    pub fn stem_path(&self, job_id: &str, stem: Stem) -> PathBuf {
        self.stems_dir(job_id).join(stem.file_name())
    }

    /// Moves a stem produced by the separation tool to its published location.
    pub fn publish_stem(
        &self,
        job_id: &str,
        stem: Stem,
        produced: &Path,
    ) -> Result<PathBuf, StorageError> {
        ensure_directory(&self.stems_dir(job_id))?;
        let target = self.stem_path(job_id, stem);
        move_file(produced, &target)?;
        Ok(target)
    }

    /// Removes everything in the job directory except published stems.
    pub fn remove_intermediates(&self, job_id: &str) -> Result<(), StorageError> {
        let dir = self.job_dir(job_id);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::ReadFile { path: dir, source: e }),
        };

        for entry in entries {
            let entry = entry.map_err(|e| StorageError::ReadFile {
                path: dir.clone(),
                source: e,
            })?;
            if entry.file_name() == STEMS_DIR {
                continue;
            }
            remove_path(&entry.path())?;
        }
        Ok(())
    }

    /// Removes the whole job directory. A missing directory is not an error.
    pub fn remove_job_dir(&self, job_id: &str) -> Result<(), StorageError> {
        remove_path(&self.job_dir(job_id))
    }
}

fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

fn remove_path(path: &Path) -> Result<(), StorageError> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(StorageError::Remove {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let result = if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::Remove {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
