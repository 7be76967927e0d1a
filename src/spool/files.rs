use crate::spool::lock::try_lock_exclusive;
use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FilesError {
    #[error("spool base path '{0}' has no file name")]
    MissingFileName(PathBuf),

    #[error("spool base path '{0}' has no parent directory")]
    MissingDirectory(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Result of probing a spool file with an exclusive lock.
///
/// An exclusive lock succeeds only when no writer (or other shipper) holds
/// the file, so `Available` doubles as "this file has stopped growing".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Available(u64),
    Locked,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Locked,
    NotFound,
}

/// Manages the set of spool files rooted at a base path.
///
/// Candidates are the files in the base path's directory whose name starts
/// with the base file name and ends in `.json`. The external rolling writer
/// names files so that lexicographic order equals chronological order.
pub struct SpoolFiles {
    dir: PathBuf,
    file_prefix: String,
    file_suffix: String,
}

impl SpoolFiles {
    pub fn new(base_path: &Path) -> Result<Self, FilesError> {
        let file_prefix = base_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| FilesError::MissingFileName(base_path.to_path_buf()))?;
        let dir = base_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .ok_or_else(|| FilesError::MissingDirectory(base_path.to_path_buf()))?;

        Ok(Self {
            dir,
            file_prefix,
            file_suffix: ".json".to_string(),
        })
    }

    /// List matching spool files, sorted by name. A missing directory is an
    /// empty set, not an error: the writer may not have produced anything yet.
    pub fn candidates(&self) -> io::Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut matches = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(&self.file_prefix) && name.ends_with(&self.file_suffix) {
                matches.push(entry.path());
            }
        }
        matches.sort();
        Ok(matches)
    }

    /// Read the length of `path` while holding an exclusive lock on it.
    ///
    /// Used only to test whether a file has stopped growing; the lock is
    /// dropped before returning.
    pub fn exclusive_length(&self, path: &Path) -> io::Result<ProbeOutcome> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ProbeOutcome::NotFound),
            Err(e) => return Err(e),
        };
        match try_lock_exclusive(&file) {
            Ok(()) => Ok(ProbeOutcome::Available(file.metadata()?.len())),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(ProbeOutcome::Locked),
            Err(e) => Err(e),
        }
    }

    /// Delete `path`, but only while holding an exclusive lock on it. This is
    /// the sole deletion path: a file mid-read or mid-append elsewhere stays.
    pub fn lock_and_delete(&self, path: &Path) -> io::Result<DeleteOutcome> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(DeleteOutcome::NotFound),
            Err(e) => return Err(e),
        };
        match try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(DeleteOutcome::Locked),
            Err(e) => return Err(e),
        }
        fs::remove_file(path)?;
        debug!(path = %path.display(), "spool file deleted");
        Ok(DeleteOutcome::Deleted)
    }
}
