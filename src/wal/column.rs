// Column file pair.
//
// One primary file per live column holds fixed-width values or var-length
// payloads; var-length columns carry a secondary file of 8-byte offsets
// into the primary, led by a zero sentinel. Each var append writes the
// payload first and records the post-write offset in the secondary.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::meta::types::{ColumnType, BIN_NULL_LEN, STR_NULL_LEN};
use crate::storage::AppendFile;

pub const PRIMARY_SUFFIX: &str = "d";
pub const SECONDARY_SUFFIX: &str = "i";

pub fn primary_path(dir: &Path, column: &str) -> PathBuf {
    dir.join(format!("{column}.{PRIMARY_SUFFIX}"))
}

pub fn secondary_path(dir: &Path, column: &str) -> PathBuf {
    dir.join(format!("{column}.{SECONDARY_SUFFIX}"))
}

pub struct ColumnFiles {
    pub primary: AppendFile,
    pub secondary: Option<AppendFile>,
}

impl ColumnFiles {
    /// Creates fresh files for a column in a segment directory. The
    /// secondary of a var-size column starts with its zero sentinel.
    pub fn open(dir: &Path, column: &str, column_type: ColumnType) -> Result<Self> {
        let primary = AppendFile::create(primary_path(dir, column))?;
        let secondary = if column_type.is_var_size() {
            let mut file = AppendFile::create(secondary_path(dir, column))?;
            file.append(&0u64.to_le_bytes())?;
            Some(file)
        } else {
            None
        };
        Ok(Self { primary, secondary })
    }

    /// Appends a fixed-width value.
    pub fn put_fixed(&mut self, bytes: &[u8]) -> Result<()> {
        self.primary.append(bytes)
    }

    /// Appends a string payload: `i32` byte length then UTF-8 bytes.
    pub fn put_str(&mut self, value: &str) -> Result<()> {
        self.primary.append(&(value.len() as i32).to_le_bytes())?;
        self.primary.append(value.as_bytes())?;
        self.push_offset()
    }

    /// Appends a binary payload: `i64` length then raw bytes.
    pub fn put_bin(&mut self, value: &[u8]) -> Result<()> {
        self.primary.append(&(value.len() as i64).to_le_bytes())?;
        self.primary.append(value)?;
        self.push_offset()
    }

    /// Emits the null encoding for a column the current row did not
    /// touch.
    pub fn put_null(&mut self, column_type: ColumnType) -> Result<()> {
        match column_type {
            ColumnType::String => {
                self.primary.append(&STR_NULL_LEN.to_le_bytes())?;
                self.push_offset()
            }
            ColumnType::Binary => {
                self.primary.append(&BIN_NULL_LEN.to_le_bytes())?;
                self.push_offset()
            }
            fixed => self.primary.append(&fixed.null_bytes()),
        }
    }

    fn push_offset(&mut self) -> Result<()> {
        let offset = self.primary.offset();
        match self.secondary.as_mut() {
            Some(secondary) => secondary.append(&offset.to_le_bytes()),
            None => unreachable!("var-size column without secondary"),
        }
    }

    /// Rewinds both files so exactly `row` rows remain. `fixed_width` is
    /// the stored row width, `None` for var-size columns.
    pub fn rewind_to_row(&mut self, fixed_width: Option<u64>, row: u64) -> Result<()> {
        match fixed_width {
            Some(width) => self.primary.jump_to(row * width),
            None => {
                let secondary = self
                    .secondary
                    .as_mut()
                    .expect("var-size column without secondary");
                let boundary = secondary.read_u64_at(row * 8)?;
                self.primary.jump_to(boundary);
                secondary.jump_to((row + 1) * 8);
            }
        }
        Ok(())
    }

    /// Renames both files under a new column name, keeping the open
    /// descriptors live.
    pub fn rename(&mut self, dir: &Path, new_column: &str) -> Result<()> {
        self.primary.rename_file(&primary_path(dir, new_column))?;
        if let Some(secondary) = self.secondary.as_mut() {
            secondary.rename_file(&secondary_path(dir, new_column))?;
        }
        Ok(())
    }

    /// Closes both files, truncating them to their cursors.
    pub fn close(self, truncate: bool) -> Result<()> {
        self.primary.close(truncate)?;
        if let Some(secondary) = self.secondary {
            secondary.close(truncate)?;
        }
        Ok(())
    }
}

/// Reads a column's primary file in full. Test and replay support.
pub fn read_primary_bytes(dir: &Path, column: &str) -> Result<Vec<u8>> {
    Ok(std::fs::read(primary_path(dir, column))?)
}

/// Reads a column's secondary file in full. Test and replay support.
pub fn read_secondary_bytes(dir: &Path, column: &str) -> Result<Vec<u8>> {
    Ok(std::fs::read(secondary_path(dir, column))?)
}
