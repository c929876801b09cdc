//! Error types for the WAL ingestion core.
//!
//! Errors fall into two classes. Non-critical errors (bad column names,
//! duplicate columns, schema operations attempted at the wrong time)
//! leave the writer usable. Critical errors (I/O failures, sequencer
//! inconsistencies, invariant violations) transition the writer into the
//! distressed state, after which only `close` is legal.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::common::StructureVersion;

/// Result type alias for WAL operations.
pub type Result<T> = std::result::Result<T, WalError>;

#[derive(Debug, Error)]
pub enum WalError {
    // I/O and on-disk state -------------------------------------------------
    /// Underlying file operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failed to acquire an advisory lock; another writer owns the path.
    #[error("could not lock '{path}': {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A framed record failed its length or checksum validation.
    #[error("corrupted record in '{path}': {detail}")]
    Corrupted { path: PathBuf, detail: String },

    /// Record encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    // Writer state ----------------------------------------------------------
    /// The writer has entered the terminal distressed state.
    #[error("WAL writer for table '{table}' is distressed")]
    Distressed { table: String },

    /// Operation requires a committed state.
    #[error("cannot {operation} table '{table}' with uncommitted inserts")]
    UncommittedInserts { table: String, operation: &'static str },

    // Schema validation -----------------------------------------------------
    /// Column name failed identifier validation.
    #[error("invalid column name '{name}'")]
    InvalidColumnName { name: String },

    /// Column already exists.
    #[error("duplicate column '{name}'")]
    DuplicateColumn { name: String },

    /// Column does not exist (or was dropped).
    #[error("column '{name}' does not exist")]
    ColumnNotFound { name: String },

    /// The designated timestamp column cannot be removed.
    #[error("cannot remove designated timestamp column '{name}'")]
    DesignatedTimestampRemoval { name: String },

    /// Schema change batches must carry exactly one operation.
    #[error("multi-statement schema change is not supported ({count} operations)")]
    MultiStatementAlter { count: usize },

    /// A value was routed to a column of an incompatible type.
    #[error("column '{name}' cannot accept {attempted}")]
    ColumnTypeMismatch { name: String, attempted: &'static str },

    // Sequencer / metadata protocol -----------------------------------------
    /// The metadata change log did not advance the structure version by
    /// exactly one.
    #[error("metadata change log gap: writer at {current}, next change at {next}")]
    ChangeLogGap {
        current: StructureVersion,
        next: StructureVersion,
    },

    /// The sequencer kept rejecting the writer even though catching up
    /// produced no newer schema.
    #[error("sequencer refused txn for table '{table}' at structure version {version}")]
    SequencerConflict {
        table: String,
        version: StructureVersion,
    },

    /// Table is not known to the sequencer.
    #[error("table '{table}' is not registered with the sequencer")]
    TableNotFound { table: String },

    /// Table is already registered with the sequencer.
    #[error("table '{table}' is already registered with the sequencer")]
    TableExists { table: String },

    /// Value parsing failed (long256 hex, geohash literals).
    #[error("could not parse {what}: '{value}'")]
    InvalidValue { what: &'static str, value: String },
}

impl WalError {
    /// True for failures that must transition the writer into the
    /// distressed state. Non-critical errors leave state untouched.
    pub fn is_critical(&self) -> bool {
        !matches!(
            self,
            WalError::InvalidColumnName { .. }
                | WalError::DuplicateColumn { .. }
                | WalError::ColumnNotFound { .. }
                | WalError::DesignatedTimestampRemoval { .. }
                | WalError::MultiStatementAlter { .. }
                | WalError::ColumnTypeMismatch { .. }
                | WalError::UncommittedInserts { .. }
                | WalError::InvalidValue { .. }
        )
    }

    /// True for validation failures that may be caused by a stale local
    /// schema; callers catch up with the metadata change log and retry
    /// once before surfacing these.
    pub fn is_possibly_stale(&self) -> bool {
        matches!(
            self,
            WalError::ColumnNotFound { .. } | WalError::DuplicateColumn { .. }
        )
    }
}

impl From<bincode::error::EncodeError> for WalError {
    fn from(e: bincode::error::EncodeError) -> Self {
        WalError::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for WalError {
    fn from(e: bincode::error::DecodeError) -> Self {
        WalError::Serialization(e.to_string())
    }
}
