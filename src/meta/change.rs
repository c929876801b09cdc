// Schema change operations and their transport form.
//
// Structural operations travel twice: once to the sequencer (which
// validates, applies and journals them) and once back out through the
// metadata change log to writers catching up. Non-structural SQL
// operations bypass schema state entirely and land in the segment event
// log.

use serde::{Deserialize, Serialize};

use crate::common::StructureVersion;
use crate::meta::types::ColumnType;

/// One structural schema operation. Each advances the table's structure
/// version by exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlterOperation {
    AddColumn {
        name: String,
        column_type: ColumnType,
        /// Geohash precision for geo columns; zero otherwise.
        geo_bits: u8,
    },
    RemoveColumn {
        name: String,
    },
    RenameColumn {
        old: String,
        new: String,
    },
}

/// A schema change request as produced by the SQL front end. Multi-
/// statement DDL arrives as multiple operations and is rejected by the
/// writer with a non-retryable error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlterRequest {
    pub operations: Vec<AlterOperation>,
}

impl AlterRequest {
    pub fn single(op: AlterOperation) -> Self {
        Self {
            operations: vec![op],
        }
    }
}

/// A non-structural operation (UPDATE, schema-neutral ALTER). Recorded in
/// the segment event log and sequenced like a data commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlOperation {
    pub command_type: i32,
    pub sql: String,
    pub execution_context: Vec<u8>,
}

/// One entry of the sequencer's metadata change log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataChange {
    /// Structure version the table has after this change.
    pub new_structure_version: StructureVersion,
    pub op: AlterOperation,
}

/// Identifier rules for column names: non-empty, no path or control
/// characters, no leading/trailing whitespace.
pub fn valid_column_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 255 {
        return false;
    }
    if name.starts_with(' ') || name.ends_with(' ') {
        return false;
    }
    !name.chars().any(|c| {
        matches!(
            c,
            '.' | '/' | '\\' | '?' | '%' | '*' | ':' | '|' | '"' | '<' | '>' | '~'
        ) || c.is_control()
    })
}
