// Append-cursor file model backing column, event and metadata files.
//
// A mapped append file is `(file, size, append_cursor)`: bytes land at the
// cursor, `jump_to` rewinds the logical length, `switch_to` swaps the
// backing file mid-session (segment roll), and close-time truncation trims
// the physical file to the final cursor.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

pub struct AppendFile {
    path: PathBuf,
    file: File,
    cursor: u64,
}

impl AppendFile {
    /// Creates (or truncates) the file at `path` with an empty cursor.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            path,
            file,
            cursor: 0,
        })
    }

    /// Opens an existing file positioning the cursor at its end.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let cursor = file.metadata()?.len();
        Ok(Self {
            path,
            file,
            cursor,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current logical length, i.e. the append position.
    pub fn offset(&self) -> u64 {
        self.cursor
    }

    /// Appends `bytes` at the cursor.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.cursor))?;
        self.file.write_all(bytes)?;
        self.cursor += bytes.len() as u64;
        Ok(())
    }

    /// Rewinds (or advances) the append cursor. Bytes beyond the cursor
    /// stay on disk until close-time truncation and are overwritten by
    /// subsequent appends.
    pub fn jump_to(&mut self, offset: u64) {
        self.cursor = offset;
    }

    /// Reads exactly `buf.len()` bytes at an absolute offset without
    /// touching the append cursor.
    pub fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Reads one little-endian u64 at an absolute offset.
    pub fn read_u64_at(&mut self, offset: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact_at(offset, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Replaces the backing file, truncating the old one at its cursor.
    /// Used when a segment roll relocates the live mapping of a column.
    pub fn switch_to(&mut self, replacement: AppendFile) -> Result<()> {
        self.file.set_len(self.cursor)?;
        self.file.sync_data()?;
        self.path = replacement.path;
        self.file = replacement.file;
        self.cursor = replacement.cursor;
        Ok(())
    }

    /// Moves the file to a new path, keeping the open descriptor live.
    pub fn rename_file(&mut self, new_path: &Path) -> Result<()> {
        std::fs::rename(&self.path, new_path)?;
        self.path = new_path.to_path_buf();
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Flushes the file, optionally trimming the physical length to the
    /// cursor so rolled-back bytes do not survive the session.
    pub fn finish(&mut self, truncate: bool) -> Result<()> {
        if truncate {
            self.file.set_len(self.cursor)?;
        }
        self.file.sync_data()?;
        Ok(())
    }

    /// Closes the file; see [`AppendFile::finish`].
    pub fn close(mut self, truncate: bool) -> Result<()> {
        self.finish(truncate)
    }
}

/// Copies `len` bytes from `src` starting at `src_offset` to the cursor
/// of `dst`. Used by segment rolls to relocate uncommitted column data.
pub fn copy_range(
    src: &mut AppendFile,
    src_offset: u64,
    len: u64,
    dst: &mut AppendFile,
) -> Result<()> {
    const CHUNK: u64 = 1 << 20;
    let mut buf = vec![0u8; CHUNK.min(len.max(1)) as usize];
    let mut copied = 0u64;
    while copied < len {
        let step = (len - copied).min(CHUNK) as usize;
        src.read_exact_at(src_offset + copied, &mut buf[..step])?;
        dst.append(&buf[..step])?;
        copied += step as u64;
    }
    Ok(())
}
