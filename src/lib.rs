// Chronicle - column-oriented time-series database
// WAL ingestion core: per-writer append-only segment writers coordinated
// through a table-scoped sequencer.

pub mod common;
pub mod error;
pub mod meta;
pub mod sequencer;
pub mod storage;
pub mod wal;

pub use error::{Result, WalError};
pub use meta::change::{AlterOperation, AlterRequest, SqlOperation};
pub use meta::{ColumnMeta, TableMetadata};
pub use sequencer::memory::MemorySequencer;
pub use sequencer::Sequencer;
pub use wal::writer::{Row, WalWriter};

use std::path::PathBuf;
use std::time::Duration;

/// Writer configuration.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Root directory holding one sub-directory per table.
    pub db_root: PathBuf,
    /// Row count at which a commit schedules a roll to a fresh segment.
    pub segment_rollover_row_count: u64,
    /// How long to spin for a stable base-table metadata snapshot before
    /// falling back to an empty symbol dictionary.
    pub base_meta_timeout: Duration,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            db_root: PathBuf::from("./db"),
            segment_rollover_row_count: 200_000,
            base_meta_timeout: Duration::from_secs(1),
        }
    }
}
