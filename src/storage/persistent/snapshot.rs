//! Full-table snapshot file.
//!
//! `contacts.snap` holds one codec record with the whole table. It is
//! replaced atomically: the image goes to a temp file which is fsynced and
//! renamed over the old one, so a reader sees either the previous snapshot
//! or the new one.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Result as IoResult, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::table::TableSnapshot;

use super::codec;

pub(crate) const SNAPSHOT_FILE: &str = "contacts.snap";
const SNAPSHOT_TMP: &str = "contacts.snap.tmp";

/// On-disk snapshot payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotImage {
    /// Last WAL sequence folded into this image.
    pub covers_sequence: u64,
    pub written_at: DateTime<Utc>,
    pub table: TableSnapshot,
}

pub(crate) fn snapshot_path(dir: &Path) -> PathBuf {
    dir.join(SNAPSHOT_FILE)
}

/// Read the snapshot in `dir`, if one exists.
pub fn load(dir: &Path) -> IoResult<Option<SnapshotImage>> {
    let path = snapshot_path(dir);
    if !path.exists() {
        return Ok(None);
    }
    let mut reader = BufReader::new(File::open(&path)?);
    codec::read_header(&mut reader)?;
    let image = codec::decode(&mut reader)?;
    Ok(Some(image))
}

/// Atomically replace the snapshot in `dir` with `image`.
pub fn store(dir: &Path, image: &SnapshotImage) -> IoResult<()> {
    let tmp = dir.join(SNAPSHOT_TMP);
    let encoded = codec::encode(image)?;

    {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        let mut out = BufWriter::new(file);
        codec::write_header(&mut out)?;
        out.write_all(&encoded)?;
        out.flush()?;
        out.get_ref().sync_all()?;
    }

    fs::rename(&tmp, snapshot_path(dir))?;
    sync_dir(dir)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> IoResult<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> IoResult<()> {
    Ok(())
}
