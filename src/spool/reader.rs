use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("spool file not found: {0}")]
    NotFound(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Frames newline-terminated records out of one spool file, starting at a
/// byte offset.
///
/// The file is opened for plain shared reading and tolerates a writer
/// appending concurrently: a line whose terminator has not been written yet
/// is left for a later cycle rather than shipped in half.
pub struct SpoolReader {
    reader: BufReader<File>,
    position: u64,
}

impl SpoolReader {
    /// Open `path` positioned at `start`. A start offset beyond the current
    /// file length means the reader is already caught up and is clamped to
    /// the length rather than treated as an error.
    pub fn open(path: &Path, start: u64) -> Result<Self, ReaderError> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ReaderError::NotFound(path.to_path_buf())
            } else {
                ReaderError::Io(e)
            }
        })?;
        let len = file.metadata().map_err(ReaderError::Io)?.len();
        let position = start.min(len);

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(position)).map_err(ReaderError::Io)?;

        Ok(Self { reader, position })
    }

    /// Byte offset of the next unread frame. After a successful read this is
    /// the offset just past the consumed terminator, and is what the bookmark
    /// records.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read the next record payload.
    ///
    /// Leading ASCII control and whitespace bytes of a frame are discarded,
    /// so blank lines and the LF half of a CRLF pair never surface as
    /// records. `Ok(None)` means no complete record is available yet; when a
    /// partial line was found the cursor stays at its start so the record is
    /// retried once the writer finishes it.
    pub fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.position == 0 {
            self.skip_preamble()?;
        }

        let mut frame: Vec<u8> = Vec::with_capacity(256);
        let mut cursor = self.position;
        let mut byte = [0u8; 1];
        loop {
            if self.reader.read(&mut byte)? == 0 {
                if frame.is_empty() {
                    // Only skipped bytes so far; commit the skip so a
                    // whitespace tail cannot hold the offset back forever.
                    self.position = cursor;
                } else {
                    // Terminator not written yet; rewind to the frame start.
                    self.reader.seek(SeekFrom::Start(self.position))?;
                }
                return Ok(None);
            }

            let b = byte[0];
            cursor += 1;
            if frame.is_empty() && (b.is_ascii_control() || b == b' ') {
                continue;
            }
            if b == b'\n' || b == b'\r' {
                self.position = cursor;
                return Ok(Some(frame));
            }
            frame.push(b);
        }
    }

    /// At offset 0, a UTF-8 byte-order mark is consumed if present; anything
    /// else rewinds to the start of the file.
    fn skip_preamble(&mut self) -> io::Result<()> {
        let mut preamble = [0u8; 3];
        let mut filled = 0;
        while filled < preamble.len() {
            match self.reader.read(&mut preamble[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        if filled == preamble.len() && preamble == UTF8_BOM {
            self.position = UTF8_BOM.len() as u64;
        } else {
            self.reader.seek(SeekFrom::Start(0))?;
        }
        Ok(())
    }
}
