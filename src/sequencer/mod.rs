// Sequencer contract.
//
// The sequencer is the table-scoped coordinator that hands out strictly
// monotonic transaction numbers and journals schema changes. Writers are
// optimistic: they present the state they believe the table is in, and a
// `NO_TXN` answer means "catch up with the change log and try again".

pub mod memory;

use std::collections::VecDeque;

use crate::common::{SegmentId, SegmentTxn, StructureVersion, TxnNumber, WalId};
use crate::error::Result;
use crate::meta::change::{AlterOperation, MetadataChange};
use crate::meta::TableMetadata;

pub trait Sequencer: Send + Sync {
    /// Allocates a writer id, unique among concurrent writers of `table`.
    fn next_wal_id(&self, table: &str) -> Result<WalId>;

    /// Snapshot of the table schema at the current structure version.
    fn table_metadata(&self, table: &str) -> Result<TableMetadata>;

    /// Allocates the next transaction number for a data/SQL/truncate
    /// event, or `NO_TXN` when the writer's `(structure_version,
    /// segment_id, segment_txn)` view is no longer sufficient.
    fn next_txn(
        &self,
        table: &str,
        wal_id: WalId,
        structure_version: StructureVersion,
        segment_id: SegmentId,
        segment_txn: SegmentTxn,
    ) -> Result<TxnNumber>;

    /// Commits a structural change, or `NO_TXN` when a concurrent schema
    /// change got there first.
    fn next_structure_txn(
        &self,
        table: &str,
        structure_version: StructureVersion,
        op: &AlterOperation,
    ) -> Result<TxnNumber>;

    /// Change-log cursor over all schema changes after `from_version`.
    fn change_log_cursor(
        &self,
        table: &str,
        from_version: StructureVersion,
    ) -> Result<MetadataChangeLog>;
}

/// Owned cursor over a slice of the metadata change log. Dropping the
/// cursor releases it; entries arrive in structure-version order.
pub struct MetadataChangeLog {
    entries: VecDeque<MetadataChange>,
}

impl MetadataChangeLog {
    pub fn new(entries: Vec<MetadataChange>) -> Self {
        Self {
            entries: entries.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Iterator for MetadataChangeLog {
    type Item = MetadataChange;

    fn next(&mut self) -> Option<MetadataChange> {
        self.entries.pop_front()
    }
}
