//! The shipping cycle: resolve the current spool file, drain it in batches,
//! advance the bookmark, roll to newer files, and garbage-collect fully
//! shipped ones.

use crate::ship::transport::Transport;
use crate::spool::bookmark::{Bookmark, BookmarkError};
use crate::spool::files::{DeleteOutcome, FilesError, ProbeOutcome, SpoolFiles};
use crate::spool::reader::{ReaderError, SpoolReader};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Invoked with a description and optional cause whenever a cycle fails to
/// ship. This is the only failure surface; the shipper itself never stops on
/// a recoverable error.
pub type ErrorHandler =
    Arc<dyn Fn(&str, Option<&(dyn std::error::Error + 'static)>) + Send + Sync>;

/// How a shipping cycle came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEnd {
    /// No spool files exist yet.
    Idle,
    /// Everything durable has been shipped.
    CaughtUp,
    /// The remote endpoint rejected a batch; it is retried next tick.
    SendFailed,
    /// Another shipper instance holds the bookmark.
    BookmarkHeld,
    /// An unexpected fault aborted the cycle; next tick retries from the
    /// last good bookmark.
    Faulted,
}

#[derive(Debug)]
pub struct CycleReport {
    pub batches: usize,
    pub records: usize,
    pub end: CycleEnd,
}

#[derive(Debug, Error)]
enum CycleFault {
    #[error(transparent)]
    Bookmark(#[from] BookmarkError),

    #[error(transparent)]
    Reader(#[from] ReaderError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Ships spool file contents to one remote backend.
///
/// A shipper owns no background task; [`Shipper::ship_logs`] runs exactly one
/// cycle and the scheduler decides when cycles happen.
pub struct Shipper<T: Transport> {
    transport: T,
    files: SpoolFiles,
    bookmark_path: PathBuf,
    batch_limit: usize,
    on_error: Option<ErrorHandler>,
}

impl<T: Transport> Shipper<T> {
    /// `base_path` is the rolling writer's base file name; spool files are
    /// `<base>*.json` next to it and delivery progress is tracked in
    /// `<base>.bookmark`. A relative base is anchored at the current working
    /// directory so the bookmark survives restarts from elsewhere.
    pub fn new(base_path: &Path, batch_limit: usize, transport: T) -> Result<Self, FilesError> {
        let base_path = if base_path.is_absolute() {
            base_path.to_path_buf()
        } else {
            std::env::current_dir()?.join(base_path)
        };

        let mut bookmark_name = base_path
            .file_name()
            .ok_or_else(|| FilesError::MissingFileName(base_path.clone()))?
            .to_os_string();
        bookmark_name.push(".bookmark");
        let bookmark_path = base_path.with_file_name(bookmark_name);
        let files = SpoolFiles::new(&base_path)?;

        Ok(Self {
            transport,
            files,
            bookmark_path,
            batch_limit: batch_limit.max(1),
            on_error: None,
        })
    }

    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.on_error = Some(handler);
        self
    }

    pub fn bookmark_path(&self) -> &Path {
        &self.bookmark_path
    }

    /// Run one shipping cycle.
    ///
    /// All recoverable failures are handled inside: a held bookmark is
    /// skipped silently, a rejected batch leaves the bookmark alone so the
    /// same records go out next time, and anything unexpected is routed to
    /// the error handler. The report says what happened.
    pub async fn ship_logs(&self) -> CycleReport {
        let mut report = CycleReport {
            batches: 0,
            records: 0,
            end: CycleEnd::CaughtUp,
        };

        // Only one instance may advance a given stream; the rest back off
        // until the next tick.
        let mut bookmark = match Bookmark::acquire(&self.bookmark_path) {
            Ok(bookmark) => bookmark,
            Err(BookmarkError::Locked) => {
                trace!("bookmark held elsewhere, skipping cycle");
                report.end = CycleEnd::BookmarkHeld;
                return report;
            }
            Err(e) => {
                self.report_error("failed to open the bookmark store", Some(&e));
                report.end = CycleEnd::Faulted;
                return report;
            }
        };

        if let Err(e) = self.run_cycle(&mut bookmark, &mut report).await {
            self.report_error("shipping cycle aborted", Some(&e));
            report.end = CycleEnd::Faulted;
        }
        report
    }

    async fn run_cycle(
        &self,
        bookmark: &mut Bookmark,
        report: &mut CycleReport,
    ) -> Result<(), CycleFault> {
        loop {
            let file_set = self.files.candidates()?;

            let Some(current) = self.resolve_current(bookmark, &file_set)? else {
                // Every candidate sorts before the bookmark: all stale.
                self.delete_stale(file_set.iter());
                report.end = CycleEnd::Idle;
                return Ok(());
            };

            // The current file is the oldest not yet fully consumed, so
            // everything before it has been shipped.
            self.delete_stale(file_set.iter().filter(|f| f.as_path() < current.as_path()));

            let initial = bookmark.position();
            loop {
                let (end_position, payloads) = self.read_batch(&current, bookmark.position())?;
                let count = payloads.len();

                if count > 0 && !self.send_payloads(payloads).await {
                    report.end = CycleEnd::SendFailed;
                    return Ok(());
                }
                if count > 0 {
                    report.batches += 1;
                    report.records += count;
                }

                if end_position > bookmark.position() {
                    debug!(
                        from = bookmark.position(),
                        to = end_position,
                        file = %current.display(),
                        "advancing bookmark"
                    );
                    bookmark.update_position(end_position)?;
                } else if end_position < bookmark.position() {
                    warn!(
                        file = %current.display(),
                        at = bookmark.position(),
                        found = end_position,
                        "spool file truncated or re-created, restarting it from offset 0"
                    );
                    bookmark.update_position(0)?;
                }

                // A short batch means the file had no more complete lines.
                if count < self.batch_limit {
                    break;
                }
            }

            if bookmark.position() != initial {
                // Made progress; rescan in case the writer rolled meanwhile.
                continue;
            }

            let Some(next) = file_set.iter().find(|f| f.as_path() > current.as_path()) else {
                return Ok(());
            };

            // Roll only once the current file has provably stopped growing:
            // nobody holds it and its length is where we already are.
            match self.files.exclusive_length(&current)? {
                ProbeOutcome::Available(len) if len <= bookmark.position() => {
                    info!(
                        from = %current.display(),
                        to = %next.display(),
                        "rolling to the next spool file"
                    );
                    bookmark.update_file_and_position(next, 0)?;
                }
                outcome => {
                    trace!(?outcome, file = %current.display(), "not rolling yet");
                    return Ok(());
                }
            }
        }
    }

    /// Pick the file the bookmark should read from, updating it when its
    /// recorded file is unset or has been rotated away. Returns `None` when
    /// no candidate at or after the bookmark exists.
    fn resolve_current(
        &self,
        bookmark: &mut Bookmark,
        file_set: &[PathBuf],
    ) -> Result<Option<PathBuf>, CycleFault> {
        match bookmark.file_name() {
            Some(current) if file_set.iter().any(|f| f.as_path() == current) => {
                Ok(Some(current.to_path_buf()))
            }
            Some(current) => {
                let next = file_set.iter().find(|f| f.as_path() >= current).cloned();
                if let Some(next) = &next {
                    info!(file = %next.display(), "bookmarked file is gone, advancing");
                    bookmark.update_file_and_position(next, 0)?;
                }
                Ok(next)
            }
            None => {
                let first = file_set.first().cloned();
                if let Some(first) = &first {
                    info!(file = %first.display(), "starting on spool file");
                    bookmark.update_file_and_position(first, 0)?;
                }
                Ok(first)
            }
        }
    }

    fn read_batch(&self, path: &Path, position: u64) -> Result<(u64, Vec<Vec<u8>>), CycleFault> {
        let mut reader = SpoolReader::open(path, position)?;
        let mut payloads = Vec::with_capacity(self.batch_limit.min(64));
        while payloads.len() < self.batch_limit {
            match reader.read_frame()? {
                Some(frame) => payloads.push(frame),
                None => break,
            }
        }
        Ok((reader.position(), payloads))
    }

    async fn send_payloads(&self, payloads: Vec<Vec<u8>>) -> bool {
        let sent = payloads.len();
        let records = payloads
            .into_iter()
            .map(|p| self.transport.prepare_record(p))
            .collect();

        match self.transport.send_batch(records).await {
            Ok(outcome) if outcome.is_success() => {
                debug!(records = sent, "batch shipped");
                true
            }
            Ok(outcome) => {
                let message = self.transport.describe_failure(&outcome.response, sent);
                self.report_error(&message, None);
                false
            }
            Err(e) => {
                let message = format!("failed to ship a batch of {sent} records");
                self.report_error(&message, Some(&e));
                false
            }
        }
    }

    // Deletion failures are never fatal; the file is retried on a later
    // cycle's rescan.
    fn delete_stale<'a>(&self, stale: impl Iterator<Item = &'a PathBuf>) {
        for path in stale {
            match self.files.lock_and_delete(path) {
                Ok(DeleteOutcome::Deleted) => {
                    info!(path = %path.display(), "deleted shipped spool file");
                }
                Ok(DeleteOutcome::Locked) => {
                    warn!(path = %path.display(), "spool file still in use, deletion deferred");
                }
                Ok(DeleteOutcome::NotFound) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to delete spool file");
                }
            }
        }
    }

    fn report_error(&self, message: &str, cause: Option<&(dyn std::error::Error + 'static)>) {
        match cause {
            Some(cause) => error!(error = %cause, "{}", message),
            None => error!("{}", message),
        }
        if let Some(handler) = &self.on_error {
            handler(message, cause);
        }
    }
}
