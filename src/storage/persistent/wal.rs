//! Write-ahead log of committed transactions.
//!
//! Every committed transaction becomes exactly one record, so replay either
//! sees all of a transaction's changes or none of them. A record torn by a
//! crash ends replay; everything before it is recovered.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::table::ContactChange;

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    pub kind: WalEntryKind,
}

/// The type of WAL entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntryKind {
    /// All changes of one committed transaction, in application order.
    Commit { changes: Vec<ContactChange> },
    /// Everything up to this sequence is contained in the snapshot.
    Checkpoint { up_to_sequence: u64 },
}

struct WalWriter {
    out: BufWriter<File>,
    sequence: u64,
}

/// Append-only commit log.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    sync_on_write: bool,
}

fn poisoned() -> IoError {
    IoError::new(ErrorKind::Other, "poisoned lock: wal.writer")
}

impl WriteAheadLog {
    /// Open or create a WAL file.
    ///
    /// An existing file is scanned for its last intact sequence number and
    /// any torn tail is cut off so new records append after valid data.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<Self> {
        let fresh = !path.exists() || std::fs::metadata(path)?.len() < codec::HEADER_LEN;

        let sequence = if fresh {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            codec::write_header(&mut file)?;
            file.sync_all()?;
            0
        } else {
            let (last_sequence, valid_len) = Self::scan(path)?;
            let file = OpenOptions::new().write(true).open(path)?;
            if file.metadata()?.len() > valid_len {
                tracing::warn!(
                    path = %path.display(),
                    valid_len,
                    "truncating torn WAL tail"
                );
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
            last_sequence
        };

        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(WalWriter {
                out: BufWriter::new(file),
                sequence,
            }),
            sync_on_write,
        })
    }

    /// Append an entry, returning its sequence number.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut w = self.writer.lock().map_err(|_| poisoned())?;
        let sequence = w.sequence + 1;
        let encoded = codec::encode(&WalEntry {
            sequence,
            timestamp: Utc::now(),
            kind,
        })?;

        let start = w.out.get_ref().metadata()?.len();
        if let Err(e) = Self::write_record(&mut w.out, &encoded, self.sync_on_write) {
            // Later records must not land behind a partial one.
            if let Err(rewind) = self.rewind(&mut w, start) {
                tracing::error!(
                    path = %self.path.display(),
                    error = %rewind,
                    "failed to discard partial WAL record"
                );
            }
            return Err(e);
        }
        w.sequence = sequence;
        Ok(sequence)
    }

    fn write_record(out: &mut BufWriter<File>, encoded: &[u8], sync: bool) -> IoResult<()> {
        out.write_all(encoded)?;
        out.flush()?;
        if sync {
            out.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Cut the file back to `len` and start a fresh writer. Bytes still
    /// buffered in the old writer are discarded, not flushed.
    fn rewind(&self, w: &mut WalWriter, len: u64) -> IoResult<()> {
        let fresh = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        let (_file, _unwritten) = std::mem::replace(&mut w.out, fresh).into_parts();

        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(len)?;
        file.sync_all()
    }

    /// Iterate over all intact entries.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// Sequence number of the last appended entry.
    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(self.writer.lock().map_err(|_| poisoned())?.sequence)
    }

    /// WAL file size in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Reset to an empty log after a snapshot has been made durable.
    pub fn truncate(&self) -> IoResult<()> {
        let mut w = self.writer.lock().map_err(|_| poisoned())?;
        w.out.flush()?;

        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(0)?;
        file.seek(std::io::SeekFrom::Start(0))?;
        codec::write_header(&mut file)?;
        file.sync_all()?;

        w.out = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        w.sequence = 0;
        Ok(())
    }

    /// Returns (last intact sequence, byte length of the intact prefix).
    fn scan(path: &Path) -> IoResult<(u64, u64)> {
        let mut iter = WalIterator::new(path)?;
        let mut last = 0;
        let mut valid_len = iter.position()?;
        while let Some(entry) = iter.next() {
            match entry {
                Ok(entry) => {
                    last = entry.sequence;
                    valid_len = iter.position()?;
                }
                Err(e) => {
                    tracing::warn!(after_sequence = last, error = %e, "WAL corruption detected");
                    break;
                }
            }
        }
        Ok((last, valid_len))
    }
}

/// Iterator over WAL entries. Stops cleanly at a torn trailing record.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;
        Ok(Self { reader, file_size })
    }

    fn position(&mut self) -> IoResult<u64> {
        self.reader.stream_position()
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.position() {
            Ok(pos) if pos >= self.file_size => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(e)),
        }

        match codec::decode(&mut self.reader) {
            Ok(entry) => Some(Ok(entry)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }
}
