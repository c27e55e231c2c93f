//! Append-only journal of shared WAL records.
//!
//! Frame format:
//!
//! ```text
//! | len: u32 LE | crc32: u32 LE | shared record bytes (len) |
//! ```
//!
//! A frame cut short at the end of the file is treated as the clean end of
//! the log. A checksum mismatch in a complete frame is corruption.

use super::shared::SharedWalRecord;
use crate::error::{CoreError, CoreResult};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

const FRAME_HEADER_SIZE: usize = 8;

/// Records recovered from a journal file.
#[derive(Debug, Clone, Default)]
pub struct JournalContents {
    /// Complete, checksum-verified records in append order.
    pub records: Vec<SharedWalRecord>,
    /// Length of the valid prefix of the file.
    pub valid_len: u64,
    /// Bytes of an incomplete trailing frame, ignored.
    pub truncated_tail: u64,
}

/// Parses journal bytes.
fn parse_frames(data: &[u8]) -> CoreResult<JournalContents> {
    let mut contents = JournalContents::default();
    let mut pos = 0usize;

    while pos < data.len() {
        if data.len() - pos < FRAME_HEADER_SIZE {
            break;
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&data[pos..pos + 4]);
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&data[pos + 4..pos + 8]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        let expected = u32::from_le_bytes(crc_bytes);

        let body_start = pos + FRAME_HEADER_SIZE;
        if data.len() - body_start < len {
            break;
        }
        let body = &data[body_start..body_start + len];
        let actual = crc32fast::hash(body);
        if actual != expected {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }

        contents
            .records
            .push(SharedWalRecord::from_bytes(Bytes::copy_from_slice(body)));
        pos = body_start + len;
    }

    contents.valid_len = pos as u64;
    contents.truncated_tail = (data.len() - pos) as u64;
    Ok(contents)
}

/// Reads every complete frame of the journal at `path`.
pub fn read_journal(path: impl AsRef<Path>) -> CoreResult<JournalContents> {
    let data = std::fs::read(path.as_ref())?;
    let contents = parse_frames(&data)?;
    if contents.truncated_tail > 0 {
        warn!(
            path = %path.as_ref().display(),
            bytes = contents.truncated_tail,
            "ignoring truncated journal tail"
        );
    }
    Ok(contents)
}

/// Writer side of the journal.
#[derive(Debug)]
pub struct WalJournal {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    sync_on_write: bool,
    frames_written: AtomicU64,
}

impl WalJournal {
    /// Opens (or creates) the journal at `path`.
    ///
    /// An existing file is verified first and cut back to its last complete
    /// frame so new frames follow valid data.
    pub fn open(path: impl AsRef<Path>, sync_on_write: bool) -> CoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let existing = std::fs::read(&path)?;
        let contents = parse_frames(&existing)?;
        if contents.truncated_tail > 0 {
            warn!(
                path = %path.display(),
                bytes = contents.truncated_tail,
                "dropping truncated journal tail"
            );
            file.set_len(contents.valid_len)?;
        }
        debug!(
            path = %path.display(),
            records = contents.records.len(),
            "journal opened"
        );

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
            sync_on_write,
            frames_written: AtomicU64::new(0),
        })
    }

    /// Appends one record.
    pub fn append(&self, record: &SharedWalRecord) -> CoreResult<()> {
        let body = record.as_bytes();
        let len = u32::try_from(body.len())
            .map_err(|_| CoreError::params("shared WAL record too large for journal"))?;
        let crc = crc32fast::hash(body);

        let mut writer = self.writer.lock();
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&crc.to_le_bytes())?;
        writer.write_all(body)?;
        if self.sync_on_write {
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }
        self.frames_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Flushes buffered frames to the file.
    pub fn flush(&self) -> CoreResult<()> {
        let mut writer = self.writer.lock();
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Frames appended through this handle.
    #[must_use]
    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    /// Path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WalJournal {
    fn drop(&mut self) {
        if let Err(e) = self.writer.get_mut().flush() {
            warn!(error = %e, "failed to flush journal on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Lsn;
    use crate::wal::WalRecord;
    use tempfile::tempdir;

    fn shared(n: i64) -> SharedWalRecord {
        WalRecord::put_meta("k", n.to_string()).get_shared(Lsn::from_raw(n), Lsn::EMPTY, "ns")
    }

    #[test]
    fn append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.qwal");
        {
            let journal = WalJournal::open(&path, false).unwrap();
            for i in 0..5 {
                journal.append(&shared(i)).unwrap();
            }
            journal.flush().unwrap();
            assert_eq!(journal.frames_written(), 5);
        }

        let contents = read_journal(&path).unwrap();
        assert_eq!(contents.records.len(), 5);
        assert_eq!(contents.truncated_tail, 0);
        assert_eq!(contents.records[3], shared(3));
    }

    #[test]
    fn truncated_tail_is_end_of_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.qwal");
        {
            let journal = WalJournal::open(&path, true).unwrap();
            journal.append(&shared(1)).unwrap();
            journal.append(&shared(2)).unwrap();
        }
        let full = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full - 3).unwrap();

        let contents = read_journal(&path).unwrap();
        assert_eq!(contents.records.len(), 1);
        assert!(contents.truncated_tail > 0);

        let journal = WalJournal::open(&path, true).unwrap();
        journal.append(&shared(3)).unwrap();
        drop(journal);
        let contents = read_journal(&path).unwrap();
        assert_eq!(contents.records.len(), 2);
        assert_eq!(contents.records[1], shared(3));
    }

    #[test]
    fn checksum_mismatch_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.qwal");
        {
            let journal = WalJournal::open(&path, true).unwrap();
            journal.append(&shared(1)).unwrap();
        }
        let mut data = std::fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xff;
        let mut f = File::create(&path).unwrap();
        f.write_all(&data).unwrap();
        drop(f);

        let err = read_journal(&path).unwrap_err();
        assert!(matches!(err, CoreError::ChecksumMismatch { .. }));
        assert!(WalJournal::open(&path, true).is_err());
    }
}
