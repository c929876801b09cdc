// Shared identifier and sentinel types used across the WAL core.

/// Transaction number issued by the table sequencer. Strictly monotonic
/// per table; `NO_TXN` marks the absence of one.
pub type TxnNumber = i64;

/// Sentinel returned by the sequencer when the caller's view of the table
/// is stale, and by `commit()` when there was nothing to commit.
pub const NO_TXN: TxnNumber = -1;

/// Zero-based index of a record within a segment's event file. Distinct
/// from the sequencer's global transaction number.
pub type SegmentTxn = i64;

/// No event has been recorded in the current segment yet.
pub const NO_SEGMENT_TXN: SegmentTxn = -1;

/// Identifier of one WAL writer directory, unique among concurrent
/// writers of the same table.
pub type WalId = u32;

/// Monotonic segment number within one writer directory, starting at 0.
pub type SegmentId = u64;

/// Table schema version, incremented once per schema change.
pub type StructureVersion = u64;

/// Written-mark value for a column that was dropped mid-session.
pub const COLUMN_DELETED: i64 = i64::MAX;

/// Timestamp sentinels for an empty transaction.
pub const TXN_MIN_TS_SENTINEL: i64 = i64::MAX;
pub const TXN_MAX_TS_SENTINEL: i64 = -1;

/// Builds the writer directory name for a WAL id.
pub fn wal_dir_name(wal_id: WalId) -> String {
    format!("wal{wal_id}")
}
