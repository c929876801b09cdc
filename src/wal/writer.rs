// WAL segment writer.
//
// One `WalWriter` owns `<table>/wal<N>` for its lifetime: an advisory
// lock on the directory, the current segment, the per-column file pairs
// and the transactional cursor. Row inserts stream straight into column
// files; `commit` finalizes a DATA event over `[txn_start_row,
// segment_row_count)` and trades it to the sequencer for a global
// transaction number. The sequencer protocol is optimistic: a `NO_TXN`
// answer means the table structure moved, and the writer catches up with
// the metadata change log before retrying.
//
// Failure model: invalid-argument errors leave the writer usable; any
// I/O or protocol failure marks it distressed, a sticky terminal state
// in which only `close` remains legal.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::common::{
    wal_dir_name, SegmentTxn, StructureVersion, TxnNumber, WalId, COLUMN_DELETED,
    NO_SEGMENT_TXN, NO_TXN, TXN_MAX_TS_SENTINEL, TXN_MIN_TS_SENTINEL,
};
use crate::error::{Result, WalError};
use crate::meta::change::{AlterOperation, AlterRequest, SqlOperation};
use crate::meta::types::{ColumnType, SYMBOL_NULL};
use crate::meta::TableMetadata;
use crate::sequencer::Sequencer;
use crate::storage::append::copy_range;
use crate::storage::{AppendFile, DirLock};
use crate::wal::base;
use crate::wal::column::{self, ColumnFiles};
use crate::wal::events::WalEvent;
use crate::wal::segment::Segment;
use crate::wal::symbols::SymbolMap;
use crate::wal::value;
use crate::WalConfig;

/// Designated timestamp rows store a `(timestamp, row_index)` pair.
const DESIGNATED_TS_WIDTH: u64 = 16;

struct ColumnState {
    /// `-1` never written in the current txn, `>= 0` last row index
    /// written, `COLUMN_DELETED` tombstone.
    written_mark: i64,
    /// Stored row width; `None` for var-size columns.
    row_width: Option<u64>,
    /// `None` for tombstones and for columns added while the segment was
    /// sealed (files open with the next segment).
    files: Option<ColumnFiles>,
    symbols: Option<SymbolMap>,
}

enum RollOutcome {
    /// Segment is empty; schema change applies in place.
    NoRows,
    /// Segment holds only committed rows: it is sealed and the next row
    /// opens a fresh segment.
    Deferred,
    /// Uncommitted rows were relocated into a fresh segment.
    Rolled,
}

struct ScratchSlot {
    column: usize,
    primary: AppendFile,
    committed_primary_len: u64,
    secondary: Option<AppendFile>,
    committed_secondary_len: u64,
}

pub struct WalWriter {
    table_name: String,
    table_dir: PathBuf,
    wal_id: WalId,
    wal_root: PathBuf,
    sequencer: Arc<dyn Sequencer>,
    meta: TableMetadata,
    rollover_row_count: u64,
    _wal_lock: DirLock,
    segment: Segment,
    columns: Vec<ColumnState>,
    segment_row_count: u64,
    txn_start_row: u64,
    txn_min_ts: i64,
    txn_max_ts: i64,
    txn_out_of_order: bool,
    last_segment_txn: SegmentTxn,
    pending_event: Option<(SegmentTxn, WalEvent)>,
    roll_on_next_row: bool,
    distressed: bool,
    closed: bool,
}

impl WalWriter {
    /// Opens a writer for `table`: allocates a wal id, locks the writer
    /// directory, pulls the schema at the current structure version from
    /// the sequencer and opens segment 0.
    pub fn open(
        config: &WalConfig,
        sequencer: Arc<dyn Sequencer>,
        table: &str,
    ) -> Result<WalWriter> {
        let wal_id = sequencer.next_wal_id(table)?;
        let meta = sequencer.table_metadata(table)?;
        let table_dir = config.db_root.join(table);
        let wal_root = table_dir.join(wal_dir_name(wal_id));
        std::fs::create_dir_all(&wal_root)?;
        let wal_lock = DirLock::acquire(&wal_root)?;
        let segment = Segment::create(&wal_root, 0, &meta)?;

        let has_symbols = meta
            .columns()
            .iter()
            .any(|c| c.column_type() == Some(ColumnType::Symbol));
        let snapshot = if has_symbols {
            base::read_base_snapshot(&table_dir, meta.structure_version(), config.base_meta_timeout)?
        } else {
            None
        };

        let mut columns = Vec::with_capacity(meta.column_count());
        for index in 0..meta.column_count() {
            columns.push(Self::open_column_state(
                &meta,
                index,
                &segment.dir,
                &wal_root,
                &table_dir,
                snapshot.as_ref(),
            )?);
        }

        info!(table, wal_id, version = meta.structure_version(), "opened WAL writer");
        Ok(WalWriter {
            table_name: table.to_string(),
            table_dir,
            wal_id,
            wal_root,
            sequencer,
            meta,
            rollover_row_count: config.segment_rollover_row_count,
            _wal_lock: wal_lock,
            segment,
            columns,
            segment_row_count: 0,
            txn_start_row: 0,
            txn_min_ts: TXN_MIN_TS_SENTINEL,
            txn_max_ts: TXN_MAX_TS_SENTINEL,
            txn_out_of_order: false,
            last_segment_txn: NO_SEGMENT_TXN,
            pending_event: None,
            roll_on_next_row: false,
            distressed: false,
            closed: false,
        })
    }

    fn open_column_state(
        meta: &TableMetadata,
        index: usize,
        segment_dir: &Path,
        wal_root: &Path,
        table_dir: &Path,
        snapshot: Option<&base::BaseTxnSnapshot>,
    ) -> Result<ColumnState> {
        let column = meta.column(index);
        let Some(ctype) = column.column_type() else {
            return Ok(ColumnState {
                written_mark: COLUMN_DELETED,
                row_width: None,
                files: None,
                symbols: None,
            });
        };
        let row_width = if meta.timestamp_index() == Some(index) {
            Some(DESIGNATED_TS_WIDTH)
        } else {
            ctype.fixed_size().map(|w| w as u64)
        };
        let files = ColumnFiles::open(segment_dir, &column.name, ctype)?;
        let symbols = if ctype.is_symbol() {
            Some(SymbolMap::open(
                wal_root,
                table_dir,
                &column.name,
                index as u32,
                snapshot,
            )?)
        } else {
            None
        };
        Ok(ColumnState {
            written_mark: -1,
            row_width,
            files: Some(files),
            symbols,
        })
    }

    // ------------------------------------------------------------------
    // State queries
    // ------------------------------------------------------------------

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn wal_id(&self) -> WalId {
        self.wal_id
    }

    pub fn wal_root(&self) -> &Path {
        &self.wal_root
    }

    pub fn segment_id(&self) -> u64 {
        self.segment.id
    }

    pub fn segment_dir(&self) -> &Path {
        &self.segment.dir
    }

    pub fn segment_row_count(&self) -> u64 {
        self.segment_row_count
    }

    pub fn structure_version(&self) -> StructureVersion {
        self.meta.structure_version()
    }

    pub fn metadata(&self) -> &TableMetadata {
        &self.meta
    }

    pub fn in_transaction(&self) -> bool {
        self.segment_row_count > self.txn_start_row
    }

    /// Distress is queryable state, not just an error path: pools must
    /// observe it and discard the writer instead of recycling it.
    pub fn is_distressed(&self) -> bool {
        self.distressed
    }

    // ------------------------------------------------------------------
    // Row interface
    // ------------------------------------------------------------------

    /// Starts a row at `timestamp`. Rolls to a fresh segment first when a
    /// roll is pending, and writes the designated timestamp immediately.
    pub fn new_row(&mut self, timestamp: i64) -> Result<Row<'_>> {
        self.ensure_usable()?;
        let prepared = self.prepare_row(timestamp);
        let row_index = self.mark_if_critical(prepared)?;
        Ok(Row {
            writer: self,
            row_index,
            timestamp,
            finished: false,
        })
    }

    fn prepare_row(&mut self, timestamp: i64) -> Result<u64> {
        if self.roll_on_next_row {
            self.open_new_segment()?;
            self.roll_on_next_row = false;
        }
        let row_index = self.segment_row_count;
        if let Some(ts_index) = self.meta.timestamp_index() {
            let state = &mut self.columns[ts_index];
            if let Some(files) = state.files.as_mut() {
                let mut pair = [0u8; DESIGNATED_TS_WIDTH as usize];
                pair[0..8].copy_from_slice(&timestamp.to_le_bytes());
                pair[8..16].copy_from_slice(&row_index.to_le_bytes());
                files.primary.append(&pair)?;
                state.written_mark = row_index as i64;
            }
        }
        Ok(row_index)
    }

    fn expect_column(
        &self,
        column: usize,
        attempted: &'static str,
        check: fn(ColumnType) -> bool,
    ) -> Result<ColumnType> {
        if column >= self.meta.column_count() {
            return Err(WalError::ColumnNotFound {
                name: column.to_string(),
            });
        }
        let Some(ctype) = self.meta.column_type(column) else {
            return Err(WalError::ColumnNotFound {
                name: self.meta.column_name(column).to_string(),
            });
        };
        if self.meta.timestamp_index() == Some(column) {
            return Err(WalError::ColumnTypeMismatch {
                name: self.meta.column_name(column).to_string(),
                attempted,
            });
        }
        if !check(ctype) {
            return Err(WalError::ColumnTypeMismatch {
                name: self.meta.column_name(column).to_string(),
                attempted,
            });
        }
        Ok(ctype)
    }

    fn put_fixed(
        &mut self,
        column: usize,
        attempted: &'static str,
        check: fn(ColumnType) -> bool,
        bytes: &[u8],
        row_index: u64,
    ) -> Result<()> {
        self.expect_column(column, attempted, check)?;
        let state = &mut self.columns[column];
        let files = state.files.as_mut().ok_or_else(|| WalError::ColumnNotFound {
            name: column.to_string(),
        })?;
        let write = files.put_fixed(bytes);
        let result = write.map(|()| {
            state.written_mark = row_index as i64;
        });
        self.mark_if_critical(result)
    }

    fn put_symbol(&mut self, column: usize, value: Option<&str>, row_index: u64) -> Result<()> {
        self.expect_column(column, "SYMBOL value", ColumnType::is_symbol)?;
        let state = &mut self.columns[column];
        let key = match value {
            None => SYMBOL_NULL,
            Some(v) => match state.symbols.as_mut() {
                Some(symbols) => symbols.resolve(v),
                None => {
                    return Err(WalError::ColumnNotFound {
                        name: column.to_string(),
                    })
                }
            },
        };
        let files = state.files.as_mut().ok_or_else(|| WalError::ColumnNotFound {
            name: column.to_string(),
        })?;
        let write = files.put_fixed(&key.to_le_bytes());
        let result = write.map(|()| {
            state.written_mark = row_index as i64;
        });
        self.mark_if_critical(result)
    }

    fn put_str(&mut self, column: usize, value: &str, row_index: u64) -> Result<()> {
        self.expect_column(column, "STRING value", |t| t == ColumnType::String)?;
        let state = &mut self.columns[column];
        let files = state.files.as_mut().ok_or_else(|| WalError::ColumnNotFound {
            name: column.to_string(),
        })?;
        let write = files.put_str(value);
        let result = write.map(|()| {
            state.written_mark = row_index as i64;
        });
        self.mark_if_critical(result)
    }

    fn put_bin(&mut self, column: usize, bytes: &[u8], row_index: u64) -> Result<()> {
        self.expect_column(column, "BINARY value", |t| t == ColumnType::Binary)?;
        let state = &mut self.columns[column];
        let files = state.files.as_mut().ok_or_else(|| WalError::ColumnNotFound {
            name: column.to_string(),
        })?;
        let write = files.put_bin(bytes);
        let result = write.map(|()| {
            state.written_mark = row_index as i64;
        });
        self.mark_if_critical(result)
    }

    fn put_geo(&mut self, column: usize, bits_value: i64, row_index: u64) -> Result<()> {
        let ctype = self.expect_column(column, "GEOHASH value", ColumnType::is_geo)?;
        let width = ctype.fixed_size().unwrap_or(8);
        let bytes = bits_value.to_le_bytes();
        self.put_fixed(
            column,
            "GEOHASH value",
            ColumnType::is_geo,
            &bytes[..width],
            row_index,
        )
    }

    fn geo_bits_of(&self, column: usize) -> Result<u8> {
        self.expect_column(column, "GEOHASH value", ColumnType::is_geo)?;
        let bits = self.meta.column(column).geo_bits;
        if bits == 0 {
            return Err(WalError::InvalidValue {
                what: "geohash precision",
                value: self.meta.column_name(column).to_string(),
            });
        }
        Ok(bits)
    }

    fn append_row(&mut self, timestamp: i64) -> Result<()> {
        let result = self.append_row_inner(timestamp);
        self.mark_if_critical(result)
    }

    fn append_row_inner(&mut self, timestamp: i64) -> Result<()> {
        let row_index = self.segment_row_count;
        let meta = &self.meta;
        for (index, state) in self.columns.iter_mut().enumerate() {
            if state.written_mark == COLUMN_DELETED || state.written_mark >= row_index as i64 {
                continue;
            }
            let Some(ctype) = meta.column_type(index) else {
                continue;
            };
            let Some(files) = state.files.as_mut() else {
                continue;
            };
            files.put_null(ctype)?;
        }
        if timestamp > self.txn_max_ts {
            self.txn_max_ts = timestamp;
        } else {
            self.txn_out_of_order = true;
        }
        self.txn_min_ts = self.txn_min_ts.min(timestamp);
        self.segment_row_count += 1;
        Ok(())
    }

    fn cancel_row(&mut self) -> Result<()> {
        let result = self.cancel_row_inner();
        self.mark_if_critical(result)
    }

    fn cancel_row_inner(&mut self) -> Result<()> {
        let row_index = self.segment_row_count;
        for state in self.columns.iter_mut() {
            if state.written_mark == COLUMN_DELETED {
                continue;
            }
            if state.written_mark == row_index as i64 {
                if let Some(files) = state.files.as_mut() {
                    files.rewind_to_row(state.row_width, row_index)?;
                }
                state.written_mark = row_index as i64 - 1;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Commit / rollback
    // ------------------------------------------------------------------

    /// Commits the current transaction: writes the DATA event, trades it
    /// for a sequencer txn and resets the transactional cursor. Returns
    /// `NO_TXN` when there is nothing to commit.
    pub fn commit(&mut self) -> Result<TxnNumber> {
        self.ensure_usable()?;
        if !self.in_transaction() {
            return Ok(NO_TXN);
        }
        let event = WalEvent::Data {
            start_row: self.txn_start_row,
            end_row: self.segment_row_count,
            min_timestamp: self.txn_min_ts,
            max_timestamp: self.txn_max_ts,
            out_of_order: self.txn_out_of_order,
        };
        let rows = self.segment_row_count - self.txn_start_row;
        let seq_txn = self.sequenced_event(event)?;
        self.reset_txn_state();
        if self.segment_row_count >= self.rollover_row_count {
            self.roll_on_next_row = true;
        }
        debug!(txn = seq_txn, rows, segment = self.segment.id, "committed");
        Ok(seq_txn)
    }

    /// `commit` variant taking a lag hint in microseconds. The hint is
    /// accepted for interface parity and currently ignored.
    pub fn commit_with_lag(&mut self, _lag_micros: i64) -> Result<TxnNumber> {
        self.commit()
    }

    /// Discards uncommitted rows, rewinding every live column to the
    /// last commit boundary.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_usable()?;
        self.rollback_inner()
    }

    fn rollback_inner(&mut self) -> Result<()> {
        let boundary = self.txn_start_row;
        let touched = self
            .columns
            .iter()
            .any(|c| c.written_mark != COLUMN_DELETED && c.written_mark >= boundary as i64);
        if !self.in_transaction() && !touched {
            return Ok(());
        }
        let mut failure: Option<WalError> = None;
        for state in self.columns.iter_mut() {
            if state.written_mark == COLUMN_DELETED {
                continue;
            }
            if let Some(files) = state.files.as_mut() {
                if let Err(e) = files.rewind_to_row(state.row_width, boundary) {
                    failure = Some(e);
                    break;
                }
            }
            if state.written_mark >= boundary as i64 {
                state.written_mark = -1;
            }
        }
        if let Some(e) = failure {
            self.enter_distress();
            return Err(e);
        }
        self.segment_row_count = boundary;
        self.txn_min_ts = TXN_MIN_TS_SENTINEL;
        self.txn_max_ts = TXN_MAX_TS_SENTINEL;
        self.txn_out_of_order = false;
        for state in &mut self.columns {
            if let Some(symbols) = state.symbols.as_mut() {
                symbols.reset_for_next_txn();
            }
        }
        Ok(())
    }

    /// Explicitly schedules a segment roll: the next row opens a fresh
    /// segment. A no-op on an empty segment.
    pub fn roll_segment_on_next_row(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if self.segment_row_count > 0 {
            self.roll_on_next_row = true;
        }
        Ok(())
    }

    /// Records a TRUNCATE event and sequences it like a commit.
    pub fn truncate(&mut self) -> Result<TxnNumber> {
        self.ensure_usable()?;
        self.sequenced_event(WalEvent::Truncate)
    }

    /// Records a sequenced non-structural operation (UPDATE, schema-
    /// neutral ALTER).
    pub fn exec_sql(&mut self, op: &SqlOperation) -> Result<TxnNumber> {
        self.ensure_usable()?;
        self.sequenced_event(WalEvent::Sql {
            command_type: op.command_type,
            sql: op.sql.clone(),
            execution_context: op.execution_context.clone(),
        })
    }

    fn sequenced_event(&mut self, event: WalEvent) -> Result<TxnNumber> {
        match self.sequenced_event_inner(event) {
            Ok(txn) => Ok(txn),
            Err(e) => {
                if !self.distressed {
                    let _ = self.rollback_inner();
                }
                self.enter_distress();
                self.pending_event = None;
                Err(e)
            }
        }
    }

    fn sequenced_event_inner(&mut self, event: WalEvent) -> Result<TxnNumber> {
        let txn_index = self
            .segment
            .events
            .append_at(self.last_segment_txn + 1, &event)?;
        self.pending_event = Some((txn_index, event));
        let seq_txn = self.acquire_seq_txn()?;
        if let Some((txn_index, _)) = self.pending_event.take() {
            self.last_segment_txn = txn_index;
        }
        Ok(seq_txn)
    }

    /// Optimistic sequencer loop: catch up on `NO_TXN`, fail once a
    /// catch-up produces no progress twice in a row.
    fn acquire_seq_txn(&mut self) -> Result<TxnNumber> {
        let mut retried_without_progress = false;
        loop {
            let segment_txn = self
                .pending_event
                .as_ref()
                .map(|(t, _)| *t)
                .unwrap_or(self.last_segment_txn);
            let txn = self.sequencer.next_txn(
                &self.table_name,
                self.wal_id,
                self.meta.structure_version(),
                self.segment.id,
                segment_txn,
            )?;
            if txn != NO_TXN {
                return Ok(txn);
            }
            let before = self.meta.structure_version();
            debug!(
                version = before,
                "sequencer refused txn; catching up with metadata change log"
            );
            self.apply_metadata_change_log(StructureVersion::MAX)?;
            if self.meta.structure_version() == before {
                if retried_without_progress {
                    return Err(WalError::SequencerConflict {
                        table: self.table_name.clone(),
                        version: before,
                    });
                }
                retried_without_progress = true;
            } else {
                retried_without_progress = false;
            }
        }
    }

    fn reset_txn_state(&mut self) {
        self.txn_start_row = self.segment_row_count;
        self.txn_min_ts = TXN_MIN_TS_SENTINEL;
        self.txn_max_ts = TXN_MAX_TS_SENTINEL;
        self.txn_out_of_order = false;
        for state in &mut self.columns {
            if let Some(symbols) = state.symbols.as_mut() {
                symbols.reset_for_next_txn();
            }
        }
    }

    // ------------------------------------------------------------------
    // Schema changes
    // ------------------------------------------------------------------

    /// Applies a SQL-shaped schema change request. Exactly one operation
    /// per request; rejected with a non-critical error while uncommitted
    /// inserts exist.
    pub fn apply(&mut self, request: &AlterRequest) -> Result<TxnNumber> {
        self.ensure_usable()?;
        if request.operations.len() != 1 {
            return Err(WalError::MultiStatementAlter {
                count: request.operations.len(),
            });
        }
        if self.in_transaction() {
            return Err(WalError::UncommittedInserts {
                table: self.table_name.clone(),
                operation: "alter",
            });
        }
        let op = request.operations[0].clone();
        let result = self.structural_change(&op);
        self.mark_if_critical(result)
    }

    /// Adds a column. Unlike [`WalWriter::apply`], the direct interface
    /// rolls uncommitted rows into a fresh segment instead of failing.
    pub fn add_column(&mut self, name: &str, column_type: ColumnType) -> Result<TxnNumber> {
        self.ensure_usable()?;
        let op = AlterOperation::AddColumn {
            name: name.to_string(),
            column_type,
            geo_bits: 0,
        };
        let result = self.structural_change(&op);
        self.mark_if_critical(result)
    }

    /// Adds a geohash column at `bits` bits of precision.
    pub fn add_geo_column(&mut self, name: &str, bits: u8) -> Result<TxnNumber> {
        self.ensure_usable()?;
        let Some(column_type) = ColumnType::geo_for_bits(bits) else {
            return Err(WalError::InvalidValue {
                what: "geohash precision",
                value: bits.to_string(),
            });
        };
        let op = AlterOperation::AddColumn {
            name: name.to_string(),
            column_type,
            geo_bits: bits,
        };
        let result = self.structural_change(&op);
        self.mark_if_critical(result)
    }

    pub fn remove_column(&mut self, name: &str) -> Result<TxnNumber> {
        self.ensure_usable()?;
        let op = AlterOperation::RemoveColumn {
            name: name.to_string(),
        };
        let result = self.structural_change(&op);
        self.mark_if_critical(result)
    }

    pub fn rename_column(&mut self, old: &str, new: &str) -> Result<TxnNumber> {
        self.ensure_usable()?;
        let op = AlterOperation::RenameColumn {
            old: old.to_string(),
            new: new.to_string(),
        };
        let result = self.structural_change(&op);
        self.mark_if_critical(result)
    }

    fn structural_change(&mut self, op: &AlterOperation) -> Result<TxnNumber> {
        // validator pass, with one catch-up retry when the failure may be
        // caused by a stale local schema
        if let Err(e) = self.meta.validate_alter(op) {
            if e.is_possibly_stale() {
                self.apply_metadata_change_log(StructureVersion::MAX)?;
                self.meta.validate_alter(op)?;
            } else {
                return Err(e);
            }
        }

        let mut retried_without_progress = false;
        let seq_txn = loop {
            let txn =
                self.sequencer
                    .next_structure_txn(&self.table_name, self.meta.structure_version(), op)?;
            if txn != NO_TXN {
                break txn;
            }
            let before = self.meta.structure_version();
            self.apply_metadata_change_log(StructureVersion::MAX)?;
            // the structure moved under us; the operation may no longer
            // be legal
            self.meta.validate_alter(op)?;
            if self.meta.structure_version() == before {
                if retried_without_progress {
                    return Err(WalError::SequencerConflict {
                        table: self.table_name.clone(),
                        version: before,
                    });
                }
                retried_without_progress = true;
            } else {
                retried_without_progress = false;
            }
        };

        // Local replay. Failure past this point is fatal: the sequencer
        // already journaled the change.
        let new_version = self.meta.structure_version() + 1;
        if let Err(e) = self.apply_change_locally(op, new_version) {
            self.enter_distress();
            return Err(e);
        }
        Ok(seq_txn)
    }

    /// Consumes sequencer schema changes up to (excluding)
    /// `up_to_exclusive`, requiring strict `+1` version increments.
    fn apply_metadata_change_log(&mut self, up_to_exclusive: StructureVersion) -> Result<()> {
        let cursor = self
            .sequencer
            .change_log_cursor(&self.table_name, self.meta.structure_version())?;
        for change in cursor {
            if change.new_structure_version >= up_to_exclusive {
                break;
            }
            if let Err(e) = self.apply_change_locally(&change.op, change.new_structure_version) {
                self.enter_distress();
                return Err(e);
            }
        }
        Ok(())
    }

    fn apply_change_locally(
        &mut self,
        op: &AlterOperation,
        new_version: StructureVersion,
    ) -> Result<()> {
        let pre = self.meta.structure_version();
        if new_version != pre + 1 {
            return Err(WalError::ChangeLogGap {
                current: pre,
                next: new_version,
            });
        }
        match op {
            AlterOperation::AddColumn {
                name, column_type, ..
            } => self.apply_add_column(op, name, *column_type)?,
            AlterOperation::RemoveColumn { name } => self.apply_remove_column(op, name)?,
            AlterOperation::RenameColumn { old, new } => self.apply_rename_column(op, old, new)?,
        }
        if self.meta.structure_version() != pre + 1 {
            return Err(WalError::ChangeLogGap {
                current: self.meta.structure_version(),
                next: pre + 1,
            });
        }
        Ok(())
    }

    fn apply_add_column(
        &mut self,
        op: &AlterOperation,
        name: &str,
        column_type: ColumnType,
    ) -> Result<()> {
        let outcome = self.roll_uncommitted_if_needed()?;
        self.meta.apply_alter(op)?;
        let index = self.meta.column_count() - 1;
        let row_width = column_type.fixed_size().map(|w| w as u64);
        if matches!(outcome, RollOutcome::Deferred) {
            // segment is sealed; the column materializes when the next
            // segment opens
            self.columns.push(ColumnState {
                written_mark: -1,
                row_width,
                files: None,
                symbols: None,
            });
        } else {
            let mut files = ColumnFiles::open(&self.segment.dir, name, column_type)?;
            for _ in 0..self.segment_row_count {
                files.put_null(column_type)?;
            }
            let symbols = if column_type.is_symbol() {
                Some(SymbolMap::open(
                    &self.wal_root,
                    &self.table_dir,
                    name,
                    index as u32,
                    None,
                )?)
            } else {
                None
            };
            self.columns.push(ColumnState {
                written_mark: -1,
                row_width,
                files: Some(files),
                symbols,
            });
            self.meta.write_to_dir(&self.segment.dir)?;
        }
        info!(
            column = name,
            %column_type,
            version = self.meta.structure_version(),
            "added column"
        );
        Ok(())
    }

    fn apply_remove_column(&mut self, op: &AlterOperation, name: &str) -> Result<()> {
        let outcome = self.roll_uncommitted_if_needed()?;
        let index = self.meta.column_index(name)?;
        self.meta.apply_alter(op)?;
        let state = &mut self.columns[index];
        if let Some(files) = state.files.take() {
            files.close(true)?;
        }
        if let Some(symbols) = state.symbols.take() {
            symbols.remove_links(&self.wal_root)?;
        }
        state.written_mark = COLUMN_DELETED;
        if !matches!(outcome, RollOutcome::Deferred) {
            self.meta.write_to_dir(&self.segment.dir)?;
        }
        info!(
            column = name,
            version = self.meta.structure_version(),
            "removed column"
        );
        Ok(())
    }

    fn apply_rename_column(&mut self, op: &AlterOperation, old: &str, new: &str) -> Result<()> {
        let outcome = self.roll_uncommitted_if_needed()?;
        let index = self.meta.column_index(old)?;
        self.meta.apply_alter(op)?;
        if !matches!(outcome, RollOutcome::Deferred) {
            if let Some(files) = self.columns[index].files.as_mut() {
                files.rename(&self.segment.dir, new)?;
            }
            self.meta.write_to_dir(&self.segment.dir)?;
        }
        // inherited symbol dictionary links under the wal root keep
        // their original names; they are addressed through the column
        // index, never by file name
        info!(
            from = old,
            to = new,
            version = self.meta.structure_version(),
            "renamed column"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Segment lifecycle
    // ------------------------------------------------------------------

    fn roll_uncommitted_if_needed(&mut self) -> Result<RollOutcome> {
        let uncommitted = self.segment_row_count - self.txn_start_row;
        if uncommitted == 0 {
            if self.segment_row_count > 0 {
                self.roll_on_next_row = true;
                return Ok(RollOutcome::Deferred);
            }
            return Ok(RollOutcome::NoRows);
        }
        self.roll_uncommitted(uncommitted)?;
        Ok(RollOutcome::Rolled)
    }

    /// Relocates the uncommitted row range `[txn_start_row,
    /// segment_row_count)` into a fresh segment, switching each live
    /// column's mapping to the new files. Var-length payloads are
    /// relocated by translating secondary offsets so the new secondary
    /// starts at zero.
    fn roll_uncommitted(&mut self, uncommitted: u64) -> Result<()> {
        let row_lo = self.txn_start_row;
        let row_hi = self.segment_row_count;
        let new_id = self.segment.id + 1;
        let mut new_segment = Segment::create(&self.wal_root, new_id, &self.meta)?;

        // On failure every scratch fd drops closed and the new segment
        // directory is left behind for cleanup.
        let scratch = match Self::copy_uncommitted_columns(
            &self.meta,
            &mut self.columns,
            &new_segment.dir,
            row_lo,
            row_hi,
        ) {
            Ok(scratch) => scratch,
            Err(e) => {
                let _ = new_segment.close();
                return Err(e);
            }
        };

        for slot in scratch {
            let state = &mut self.columns[slot.column];
            let files = state.files.as_mut().ok_or_else(|| WalError::Corrupted {
                path: new_segment.dir.clone(),
                detail: "column vanished during roll".to_string(),
            })?;
            files.primary.jump_to(slot.committed_primary_len);
            files.primary.switch_to(slot.primary)?;
            if let Some(new_secondary) = slot.secondary {
                let secondary =
                    files
                        .secondary
                        .as_mut()
                        .ok_or_else(|| WalError::Corrupted {
                            path: new_segment.dir.clone(),
                            detail: "secondary vanished during roll".to_string(),
                        })?;
                secondary.jump_to(slot.committed_secondary_len);
                secondary.switch_to(new_secondary)?;
            }
        }

        // seal the old event log without the pending record, then seed
        // the new head with the relocated event
        if let Some((pending_txn, _)) = &self.pending_event {
            self.segment.events.rewind_to(*pending_txn);
        }
        let mut old_segment = std::mem::replace(&mut self.segment, new_segment);
        old_segment.close()?;
        drop(old_segment);

        if let Some((_, event)) = self.pending_event.take() {
            let relocated = match event {
                WalEvent::Data { .. } => WalEvent::Data {
                    start_row: 0,
                    end_row: uncommitted,
                    min_timestamp: self.txn_min_ts,
                    max_timestamp: self.txn_max_ts,
                    out_of_order: self.txn_out_of_order,
                },
                other => other,
            };
            self.segment.events.append_at(0, &relocated)?;
            self.pending_event = Some((0, relocated));
        }
        self.last_segment_txn = NO_SEGMENT_TXN;

        for state in &mut self.columns {
            if state.written_mark == COLUMN_DELETED {
                continue;
            }
            state.written_mark = if state.written_mark >= row_lo as i64 {
                state.written_mark - row_lo as i64
            } else {
                -1
            };
        }
        self.segment_row_count = uncommitted;
        self.txn_start_row = 0;
        info!(
            segment = new_id,
            rows = uncommitted,
            "rolled uncommitted rows into new segment"
        );
        Ok(())
    }

    fn copy_uncommitted_columns(
        meta: &TableMetadata,
        columns: &mut [ColumnState],
        new_dir: &Path,
        row_lo: u64,
        row_hi: u64,
    ) -> Result<Vec<ScratchSlot>> {
        let uncommitted = row_hi - row_lo;
        let mut scratch = Vec::new();
        for index in 0..columns.len() {
            let state = &mut columns[index];
            let Some(files) = state.files.as_mut() else {
                continue;
            };
            let name = meta.column_name(index);
            match state.row_width {
                Some(width) => {
                    let mut primary = AppendFile::create(column::primary_path(new_dir, name))?;
                    copy_range(
                        &mut files.primary,
                        row_lo * width,
                        uncommitted * width,
                        &mut primary,
                    )?;
                    scratch.push(ScratchSlot {
                        column: index,
                        primary,
                        committed_primary_len: row_lo * width,
                        secondary: None,
                        committed_secondary_len: 0,
                    });
                }
                None => {
                    let old_secondary =
                        files
                            .secondary
                            .as_mut()
                            .ok_or_else(|| WalError::Corrupted {
                                path: new_dir.to_path_buf(),
                                detail: format!("var column '{name}' without offset file"),
                            })?;
                    let payload_lo = old_secondary.read_u64_at(row_lo * 8)?;
                    let payload_hi = old_secondary.read_u64_at(row_hi * 8)?;
                    let mut offsets = vec![0u8; (uncommitted * 8) as usize];
                    old_secondary.read_exact_at((row_lo + 1) * 8, &mut offsets)?;

                    let mut primary = AppendFile::create(column::primary_path(new_dir, name))?;
                    copy_range(
                        &mut files.primary,
                        payload_lo,
                        payload_hi - payload_lo,
                        &mut primary,
                    )?;

                    let mut secondary =
                        AppendFile::create(column::secondary_path(new_dir, name))?;
                    secondary.append(&0u64.to_le_bytes())?;
                    for entry in offsets.chunks_exact(8) {
                        let offset = u64::from_le_bytes(entry.try_into().map_err(|_| {
                            WalError::Corrupted {
                                path: new_dir.to_path_buf(),
                                detail: "short offset entry".to_string(),
                            }
                        })?);
                        secondary.append(&(offset - payload_lo).to_le_bytes())?;
                    }
                    scratch.push(ScratchSlot {
                        column: index,
                        primary,
                        committed_primary_len: payload_lo,
                        secondary: Some(secondary),
                        committed_secondary_len: (row_lo + 1) * 8,
                    });
                }
            }
        }
        Ok(scratch)
    }

    /// Opens an empty successor segment: fresh column files, refreshed
    /// symbol watermarks, new metadata snapshot and event log.
    fn open_new_segment(&mut self) -> Result<()> {
        let new_id = self.segment.id + 1;
        let new_segment = Segment::create(&self.wal_root, new_id, &self.meta)?;
        let meta = &self.meta;
        for index in 0..self.columns.len() {
            let state = &mut self.columns[index];
            if state.written_mark == COLUMN_DELETED {
                continue;
            }
            state.written_mark = -1;
            if let Some(files) = state.files.take() {
                files.close(true)?;
            }
            let Some(ctype) = meta.column_type(index) else {
                continue;
            };
            let name = meta.column_name(index);
            state.files = Some(ColumnFiles::open(&new_segment.dir, name, ctype)?);
            state.row_width = if meta.timestamp_index() == Some(index) {
                Some(DESIGNATED_TS_WIDTH)
            } else {
                ctype.fixed_size().map(|w| w as u64)
            };
            if ctype.is_symbol() {
                match state.symbols.as_mut() {
                    Some(symbols) => symbols.reset_for_next_txn(),
                    None => {
                        state.symbols = Some(SymbolMap::open(
                            &self.wal_root,
                            &self.table_dir,
                            name,
                            index as u32,
                            None,
                        )?)
                    }
                }
            }
        }
        let mut old_segment = std::mem::replace(&mut self.segment, new_segment);
        old_segment.close()?;
        self.last_segment_txn = NO_SEGMENT_TXN;
        self.pending_event = None;
        self.segment_row_count = 0;
        self.txn_start_row = 0;
        self.txn_min_ts = TXN_MIN_TS_SENTINEL;
        self.txn_max_ts = TXN_MAX_TS_SENTINEL;
        self.txn_out_of_order = false;
        debug!(segment = new_id, "rolled to new segment");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Distress and teardown
    // ------------------------------------------------------------------

    fn ensure_usable(&self) -> Result<()> {
        if self.distressed {
            return Err(WalError::Distressed {
                table: self.table_name.clone(),
            });
        }
        Ok(())
    }

    fn enter_distress(&mut self) {
        if !self.distressed {
            self.distressed = true;
            error!(
                table = %self.table_name,
                wal = self.wal_id,
                "writer entered distressed state"
            );
        }
    }

    fn mark_if_critical<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_critical() {
                self.enter_distress();
            }
        }
        result
    }

    /// Rolls back pending rows, then releases files and locks.
    pub fn close(mut self) -> Result<()> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if !self.distressed {
            let _ = self.rollback_inner();
        }
        let mut first_error: Option<WalError> = None;
        for state in &mut self.columns {
            if let Some(files) = state.files.take() {
                if let Err(e) = files.close(true) {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Err(e) = self.segment.close() {
            first_error.get_or_insert(e);
        }
        info!(table = %self.table_name, wal = self.wal_id, "closed WAL writer");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close_inner();
        }
    }
}

/// One in-flight row. Typed setters stream values into column files;
/// `append` seals the row (emitting null encodings for untouched
/// columns), `cancel` discards it. A dropped, unfinished row cancels
/// itself best-effort.
pub struct Row<'a> {
    writer: &'a mut WalWriter,
    row_index: u64,
    timestamp: i64,
    finished: bool,
}

impl Row<'_> {
    pub fn row_index(&self) -> u64 {
        self.row_index
    }

    pub fn put_bool(&mut self, column: usize, value: bool) -> Result<&mut Self> {
        self.writer.put_fixed(
            column,
            "BOOLEAN value",
            |t| t == ColumnType::Boolean,
            &[value as u8],
            self.row_index,
        )?;
        Ok(self)
    }

    pub fn put_byte(&mut self, column: usize, value: i8) -> Result<&mut Self> {
        self.writer.put_fixed(
            column,
            "BYTE value",
            |t| t == ColumnType::Byte,
            &value.to_le_bytes(),
            self.row_index,
        )?;
        Ok(self)
    }

    pub fn put_short(&mut self, column: usize, value: i16) -> Result<&mut Self> {
        self.writer.put_fixed(
            column,
            "SHORT value",
            |t| t == ColumnType::Short,
            &value.to_le_bytes(),
            self.row_index,
        )?;
        Ok(self)
    }

    pub fn put_char(&mut self, column: usize, value: char) -> Result<&mut Self> {
        self.writer.put_fixed(
            column,
            "CHAR value",
            |t| t == ColumnType::Char,
            &(value as u16).to_le_bytes(),
            self.row_index,
        )?;
        Ok(self)
    }

    pub fn put_int(&mut self, column: usize, value: i32) -> Result<&mut Self> {
        self.writer.put_fixed(
            column,
            "INT value",
            |t| t == ColumnType::Int,
            &value.to_le_bytes(),
            self.row_index,
        )?;
        Ok(self)
    }

    pub fn put_long(&mut self, column: usize, value: i64) -> Result<&mut Self> {
        self.writer.put_fixed(
            column,
            "LONG value",
            |t| t == ColumnType::Long,
            &value.to_le_bytes(),
            self.row_index,
        )?;
        Ok(self)
    }

    pub fn put_float(&mut self, column: usize, value: f32) -> Result<&mut Self> {
        self.writer.put_fixed(
            column,
            "FLOAT value",
            |t| t == ColumnType::Float,
            &value.to_le_bytes(),
            self.row_index,
        )?;
        Ok(self)
    }

    pub fn put_double(&mut self, column: usize, value: f64) -> Result<&mut Self> {
        self.writer.put_fixed(
            column,
            "DOUBLE value",
            |t| t == ColumnType::Double,
            &value.to_le_bytes(),
            self.row_index,
        )?;
        Ok(self)
    }

    /// Writes a non-designated timestamp value. The designated timestamp
    /// is set by `new_row`.
    pub fn put_timestamp(&mut self, column: usize, value: i64) -> Result<&mut Self> {
        self.writer.put_fixed(
            column,
            "TIMESTAMP value",
            |t| t == ColumnType::Timestamp,
            &value.to_le_bytes(),
            self.row_index,
        )?;
        Ok(self)
    }

    /// Writes a 128-bit integer as its little-endian `(lo, hi)` pair.
    pub fn put_long128(&mut self, column: usize, lo: i64, hi: i64) -> Result<&mut Self> {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&lo.to_le_bytes());
        bytes[8..16].copy_from_slice(&hi.to_le_bytes());
        self.writer.put_fixed(
            column,
            "LONG128 value",
            |t| t == ColumnType::Long128,
            &bytes,
            self.row_index,
        )?;
        Ok(self)
    }

    pub fn put_long256(
        &mut self,
        column: usize,
        l0: i64,
        l1: i64,
        l2: i64,
        l3: i64,
    ) -> Result<&mut Self> {
        let mut bytes = [0u8; 32];
        for (slot, word) in [l0, l1, l2, l3].into_iter().enumerate() {
            bytes[slot * 8..slot * 8 + 8].copy_from_slice(&word.to_le_bytes());
        }
        self.writer.put_fixed(
            column,
            "LONG256 value",
            |t| t == ColumnType::Long256,
            &bytes,
            self.row_index,
        )?;
        Ok(self)
    }

    /// Writes a 256-bit integer from a hex literal.
    pub fn put_long256_hex(&mut self, column: usize, text: &str) -> Result<&mut Self> {
        let words = value::parse_long256(text)?;
        self.put_long256(column, words[0], words[1], words[2], words[3])
    }

    pub fn put_str(&mut self, column: usize, value: &str) -> Result<&mut Self> {
        self.writer.put_str(column, value, self.row_index)?;
        Ok(self)
    }

    pub fn put_sym(&mut self, column: usize, value: &str) -> Result<&mut Self> {
        self.writer.put_symbol(column, Some(value), self.row_index)?;
        Ok(self)
    }

    /// Writes an explicit SYMBOL null key.
    pub fn put_sym_null(&mut self, column: usize) -> Result<&mut Self> {
        self.writer.put_symbol(column, None, self.row_index)?;
        Ok(self)
    }

    pub fn put_bin(&mut self, column: usize, value: &[u8]) -> Result<&mut Self> {
        self.writer.put_bin(column, value, self.row_index)?;
        Ok(self)
    }

    /// Writes a geohash already packed at the column's precision.
    pub fn put_geo_hash(&mut self, column: usize, value: i64) -> Result<&mut Self> {
        self.writer.put_geo(column, value, self.row_index)?;
        Ok(self)
    }

    /// Parses and writes a geohash literal, truncated to the column's
    /// precision.
    pub fn put_geo_str(&mut self, column: usize, hash: &str) -> Result<&mut Self> {
        let bits = self.writer.geo_bits_of(column)?;
        let packed = value::geohash_from_str(hash, bits)?;
        self.writer.put_geo(column, packed, self.row_index)?;
        Ok(self)
    }

    /// Encodes and writes a coordinate pair at the column's precision.
    pub fn put_geo_deg(&mut self, column: usize, lat: f64, lon: f64) -> Result<&mut Self> {
        let bits = self.writer.geo_bits_of(column)?;
        let packed = value::geohash_from_coords(lat, lon, bits)?;
        self.writer.put_geo(column, packed, self.row_index)?;
        Ok(self)
    }

    /// Seals the row: emits null encodings for untouched columns,
    /// updates the transaction's timestamp range and row count.
    pub fn append(mut self) -> Result<()> {
        self.finished = true;
        self.writer.append_row(self.timestamp)
    }

    /// Discards the partially written row.
    pub fn cancel(mut self) -> Result<()> {
        self.finished = true;
        self.writer.cancel_row()
    }
}

impl Drop for Row<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.writer.cancel_row();
        }
    }
}
