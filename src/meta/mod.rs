// Table metadata snapshots.
//
// A snapshot carries the column list (signed type tags; negative =
// dropped), the structure version and the designated timestamp index. It
// is serialized into each segment as `_meta` when the segment opens and
// re-emitted on every structural change, so a segment is always readable
// with the schema it was written under.

pub mod change;
pub mod types;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::StructureVersion;
use crate::error::{Result, WalError};
use crate::storage::{decode_framed, encode_framed};
use change::{valid_column_name, AlterOperation};
use types::ColumnType;

pub const META_FILE_NAME: &str = "_meta";

const META_MAGIC: u32 = 0x5445_4D57; // "WMET"
const META_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    /// Signed type tag; negated when the column is dropped.
    pub type_tag: i32,
    /// Geohash precision in bits; zero for non-geo columns.
    pub geo_bits: u8,
}

impl ColumnMeta {
    pub fn is_live(&self) -> bool {
        self.type_tag > 0
    }

    pub fn column_type(&self) -> Option<ColumnType> {
        if self.is_live() {
            ColumnType::from_tag(self.type_tag)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMetadata {
    table_name: String,
    structure_version: StructureVersion,
    timestamp_index: Option<usize>,
    columns: Vec<ColumnMeta>,
}

impl TableMetadata {
    /// Builds version-0 metadata for a new table. `designated` must name
    /// a TIMESTAMP column when present.
    pub fn new(
        table_name: &str,
        columns: &[(&str, ColumnType)],
        designated: Option<&str>,
    ) -> Result<Self> {
        let mut meta = Self {
            table_name: table_name.to_string(),
            structure_version: 0,
            timestamp_index: None,
            columns: Vec::with_capacity(columns.len()),
        };
        for (name, ctype) in columns {
            if !valid_column_name(name) {
                return Err(WalError::InvalidColumnName {
                    name: (*name).to_string(),
                });
            }
            if meta.column_index_quiet(name).is_some() {
                return Err(WalError::DuplicateColumn {
                    name: (*name).to_string(),
                });
            }
            meta.columns.push(ColumnMeta {
                name: (*name).to_string(),
                type_tag: ctype.tag(),
                geo_bits: 0,
            });
        }
        if let Some(designated) = designated {
            let index = meta.column_index(designated)?;
            if meta.columns[index].column_type() != Some(ColumnType::Timestamp) {
                return Err(WalError::ColumnTypeMismatch {
                    name: designated.to_string(),
                    attempted: "designated timestamp",
                });
            }
            meta.timestamp_index = Some(index);
        }
        Ok(meta)
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn structure_version(&self) -> StructureVersion {
        self.structure_version
    }

    pub fn timestamp_index(&self) -> Option<usize> {
        self.timestamp_index
    }

    /// Number of column slots, dropped columns included.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> &ColumnMeta {
        &self.columns[index]
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn column_name(&self, index: usize) -> &str {
        &self.columns[index].name
    }

    /// Type of a live column; `None` for tombstones.
    pub fn column_type(&self, index: usize) -> Option<ColumnType> {
        self.columns[index].column_type()
    }

    /// Index of a live column by name.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.column_index_quiet(name)
            .ok_or_else(|| WalError::ColumnNotFound {
                name: name.to_string(),
            })
    }

    /// Quiet lookup variant: `None` instead of an error on miss.
    pub fn column_index_quiet(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.is_live() && c.name == name)
    }

    /// Dry-run legality check for a structural operation against this
    /// snapshot. Does not mutate.
    pub fn validate_alter(&self, op: &AlterOperation) -> Result<()> {
        match op {
            AlterOperation::AddColumn {
                name,
                column_type,
                geo_bits,
            } => {
                if !valid_column_name(name) {
                    return Err(WalError::InvalidColumnName { name: name.clone() });
                }
                if self.column_index_quiet(name).is_some() {
                    return Err(WalError::DuplicateColumn { name: name.clone() });
                }
                let bits_ok = if column_type.is_geo() {
                    ColumnType::geo_for_bits(*geo_bits) == Some(*column_type)
                } else {
                    *geo_bits == 0
                };
                if !bits_ok {
                    return Err(WalError::InvalidValue {
                        what: "geohash precision",
                        value: geo_bits.to_string(),
                    });
                }
                Ok(())
            }
            AlterOperation::RemoveColumn { name } => {
                let index = self.column_index(name)?;
                if self.timestamp_index == Some(index) {
                    return Err(WalError::DesignatedTimestampRemoval { name: name.clone() });
                }
                Ok(())
            }
            AlterOperation::RenameColumn { old, new } => {
                self.column_index(old)?;
                if !valid_column_name(new) {
                    return Err(WalError::InvalidColumnName { name: new.clone() });
                }
                if self.column_index_quiet(new).is_some() {
                    return Err(WalError::DuplicateColumn { name: new.clone() });
                }
                Ok(())
            }
        }
    }

    /// Applies a structural operation, advancing the structure version by
    /// exactly one. Validation runs first; failures leave the snapshot
    /// untouched.
    pub fn apply_alter(&mut self, op: &AlterOperation) -> Result<()> {
        self.validate_alter(op)?;
        match op {
            AlterOperation::AddColumn {
                name,
                column_type,
                geo_bits,
            } => {
                self.columns.push(ColumnMeta {
                    name: name.clone(),
                    type_tag: column_type.tag(),
                    geo_bits: *geo_bits,
                });
            }
            AlterOperation::RemoveColumn { name } => {
                let index = self.column_index(name)?;
                let column = &mut self.columns[index];
                column.type_tag = -column.type_tag;
            }
            AlterOperation::RenameColumn { old, new } => {
                let index = self.column_index(old)?;
                self.columns[index].name = new.clone();
            }
        }
        self.structure_version += 1;
        Ok(())
    }

    /// Serializes the snapshot as `<dir>/_meta`, replacing any prior one.
    pub fn write_to_dir(&self, dir: &Path) -> Result<()> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&META_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&META_FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&encode_framed(self)?);
        std::fs::write(dir.join(META_FILE_NAME), bytes)?;
        Ok(())
    }

    pub fn read_from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(META_FILE_NAME);
        let bytes = std::fs::read(&path)?;
        if bytes.len() < 8
            || u32::from_le_bytes(bytes[0..4].try_into().unwrap()) != META_MAGIC
            || u32::from_le_bytes(bytes[4..8].try_into().unwrap()) != META_FORMAT_VERSION
        {
            return Err(WalError::Corrupted {
                path,
                detail: "bad metadata header".to_string(),
            });
        }
        let (meta, _) = decode_framed(&bytes, 8, &path)?;
        Ok(meta)
    }
}
