use crate::spool::lock::try_lock_exclusive;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const FIELD_SEPARATOR: &str = ":::";

#[derive(Debug, Error)]
pub enum BookmarkError {
    #[error("bookmark store is held by another shipper instance")]
    Locked,

    #[error("cannot update the position before a spool file is set")]
    InvalidState,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Durable pointer to the next unshipped byte: a spool file name plus an
/// offset into it.
///
/// The backing store is opened with an exclusive advisory lock that is held
/// for the lifetime of this value, so at most one shipper instance advances a
/// given stream at a time; a concurrent `acquire` fails with
/// [`BookmarkError::Locked`]. Dropping the bookmark releases the lock.
pub struct Bookmark {
    store: File,
    file_name: Option<PathBuf>,
    position: u64,
}

impl Bookmark {
    /// Open or create the bookmark store at `path` and load its state.
    ///
    /// Missing, truncated, or malformed content silently resets the bookmark
    /// to `(None, 0)`: a corrupt pointer means records get replayed, never
    /// that shipping stops.
    pub fn acquire(path: &Path) -> Result<Self, BookmarkError> {
        let store = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        match try_lock_exclusive(&store) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(BookmarkError::Locked),
            Err(e) => return Err(e.into()),
        }

        let mut bookmark = Self {
            store,
            file_name: None,
            position: 0,
        };
        bookmark.load();
        Ok(bookmark)
    }

    pub fn file_name(&self) -> Option<&Path> {
        self.file_name.as_deref()
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Advance the offset within the current spool file.
    pub fn update_position(&mut self, position: u64) -> Result<(), BookmarkError> {
        if self.file_name.is_none() {
            return Err(BookmarkError::InvalidState);
        }
        self.position = position;
        self.save()
    }

    /// Move the bookmark to a different spool file, usually at offset 0.
    pub fn update_file_and_position(
        &mut self,
        file: &Path,
        position: u64,
    ) -> Result<(), BookmarkError> {
        self.file_name = Some(file.to_path_buf());
        self.position = position;
        self.save()
    }

    fn load(&mut self) {
        let mut raw = String::new();
        if self.store.read_to_string(&mut raw).is_err() {
            debug!("bookmark store is not valid UTF-8, starting over");
            return;
        }
        let Some((offset, file)) = raw.trim_end().split_once(FIELD_SEPARATOR) else {
            return;
        };
        let Ok(position) = offset.parse::<u64>() else {
            debug!("bookmark offset is malformed, starting over");
            return;
        };
        if file.is_empty() {
            return;
        }
        self.position = position;
        self.file_name = Some(PathBuf::from(file));
    }

    // Truncate, rewrite, flush. The record is small enough to land in one
    // write; a reader that races the truncation sees garbage, fails to
    // parse, and resets -- replay, not loss.
    fn save(&mut self) -> Result<(), BookmarkError> {
        let file = self
            .file_name
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let record = format!("{}{}{}", self.position, FIELD_SEPARATOR, file);

        self.store.set_len(0)?;
        self.store.seek(SeekFrom::Start(0))?;
        self.store.write_all(record.as_bytes())?;
        self.store.sync_data()?;
        Ok(())
    }
}
