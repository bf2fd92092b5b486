//! Append-only JSON-lines journals and atomic JSON snapshots

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::store::StoreResult;

/// One collection stored as newline-delimited JSON.
///
/// Entries are addressed by the byte offset of their line, so callers can
/// keep just the offset in memory and read the document back on demand.
pub struct Journal {
    path: PathBuf,
    writer: BufWriter<File>,
    len: u64,
}

impl Journal {
    /// Open (creating if needed) and replay every entry with its offset.
    ///
    /// A torn last line left by a crash is cut off so later appends start on
    /// a clean boundary.
    pub fn open<T: DeserializeOwned>(path: &Path) -> StoreResult<(Self, Vec<(u64, T)>)> {
        let mut entries = vec![];
        let mut valid_len = 0u64;

        if path.exists() {
            let mut reader = BufReader::new(File::open(path)?);
            let mut line = String::new();
            loop {
                line.clear();
                let read = reader.read_line(&mut line)?;
                if read == 0 {
                    break;
                }
                if !line.ends_with('\n') {
                    warn!(path = %path.display(), offset = valid_len, "dropping torn journal entry");
                    break;
                }
                if !line.trim().is_empty() {
                    entries.push((valid_len, serde_json::from_str(line.trim_end())?));
                }
                valid_len += read as u64;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() != valid_len {
            file.set_len(valid_len)?;
        }
        let mut writer = BufWriter::new(file);
        writer.seek(SeekFrom::Start(valid_len))?;

        let journal = Self {
            path: path.to_path_buf(),
            writer,
            len: valid_len,
        };
        Ok((journal, entries))
    }

    /// Append an entry, returning its offset. Nothing is written if the
    /// entry fails to serialize.
    pub fn append<T: Serialize>(&mut self, entry: &T) -> StoreResult<u64> {
        let mut bytes = serde_json::to_vec(entry)?;
        bytes.push(b'\n');
        self.writer.write_all(&bytes)?;
        let offset = self.len;
        self.len += bytes.len() as u64;
        Ok(offset)
    }

    pub fn flush(&mut self) -> StoreResult<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Read the entry starting at `offset`. Appends must be flushed first.
    pub fn read_at<T: DeserializeOwned>(&self, offset: u64) -> StoreResult<T> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut line = String::new();
        BufReader::new(file).read_line(&mut line)?;
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

/// Replace `path` with `value` via write-to-temp and rename
pub fn write_snapshot<T: Serialize + ?Sized>(path: &Path, value: &T) -> StoreResult<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer(&mut writer, value)?;
        writer.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_snapshot<T: DeserializeOwned + Default>(path: &Path) -> StoreResult<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
