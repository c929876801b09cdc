// End-to-end tests for the WAL segment writer: commit/rollback behavior,
// event-log contents, schema evolution, symbol inheritance, sequencer
// coordination between concurrent writers, and the distress model.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use chronicle_wal::common::{SegmentId, SegmentTxn, StructureVersion, TxnNumber, WalId, NO_TXN};
use chronicle_wal::meta::types::{ColumnType, INT_NULL, LONG_NULL, SYMBOL_NULL};
use chronicle_wal::sequencer::MetadataChangeLog;
use chronicle_wal::wal::base::{self, SymbolCountEntry};
use chronicle_wal::wal::column::{read_primary_bytes, read_secondary_bytes};
use chronicle_wal::wal::events::{EventLog, WalEvent};
use chronicle_wal::{
    AlterOperation, AlterRequest, MemorySequencer, Result, Sequencer, SqlOperation,
    TableMetadata, WalConfig, WalError, WalWriter,
};

fn config(root: &TempDir) -> WalConfig {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    WalConfig {
        db_root: root.path().to_path_buf(),
        base_meta_timeout: Duration::from_millis(50),
        ..WalConfig::default()
    }
}

fn registered(columns: &[(&str, ColumnType)]) -> Arc<MemorySequencer> {
    let sequencer = Arc::new(MemorySequencer::new());
    sequencer
        .create_table(TableMetadata::new("trades", columns, Some("ts")).unwrap())
        .unwrap();
    sequencer
}

fn ts_int() -> &'static [(&'static str, ColumnType)] {
    &[("ts", ColumnType::Timestamp), ("v", ColumnType::Int)]
}

fn insert_int(writer: &mut WalWriter, ts: i64, v: i32) {
    let mut row = writer.new_row(ts).unwrap();
    row.put_int(1, v).unwrap();
    row.append().unwrap();
}

fn i32s(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

fn i64s(bytes: &[u8]) -> Vec<i64> {
    bytes
        .chunks_exact(8)
        .map(|c| i64::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

// ---------------------------------------------------------------------
// Commit scenarios
// ---------------------------------------------------------------------

#[test]
fn commit_produces_single_data_event() {
    let root = TempDir::new().unwrap();
    let mut writer = WalWriter::open(&config(&root), registered(ts_int()), "trades").unwrap();

    insert_int(&mut writer, 100, 1);
    insert_int(&mut writer, 200, 2);
    let txn = writer.commit().unwrap();
    assert!(txn > 0);

    let events = EventLog::read_all(writer.segment_dir()).unwrap();
    assert_eq!(
        events,
        vec![WalEvent::Data {
            start_row: 0,
            end_row: 2,
            min_timestamp: 100,
            max_timestamp: 200,
            out_of_order: false,
        }]
    );
    writer.close().unwrap();
}

#[test]
fn out_of_order_timestamps_are_flagged() {
    let root = TempDir::new().unwrap();
    let mut writer = WalWriter::open(&config(&root), registered(ts_int()), "trades").unwrap();

    insert_int(&mut writer, 100, 1);
    insert_int(&mut writer, 50, 2);
    writer.commit().unwrap();

    let events = EventLog::read_all(writer.segment_dir()).unwrap();
    assert_eq!(
        events,
        vec![WalEvent::Data {
            start_row: 0,
            end_row: 2,
            min_timestamp: 50,
            max_timestamp: 100,
            out_of_order: true,
        }]
    );
    writer.close().unwrap();
}

#[test]
fn out_of_order_iff_not_strictly_increasing() {
    // strictly increasing
    let root = TempDir::new().unwrap();
    let mut writer = WalWriter::open(&config(&root), registered(ts_int()), "trades").unwrap();
    for (ts, v) in [(1, 1), (2, 2), (3, 3)] {
        insert_int(&mut writer, ts, v);
    }
    writer.commit().unwrap();

    // duplicates count as out of order
    for (ts, v) in [(10, 1), (10, 2)] {
        insert_int(&mut writer, ts, v);
    }
    writer.commit().unwrap();

    let events = EventLog::read_all(writer.segment_dir()).unwrap();
    match (&events[0], &events[1]) {
        (
            WalEvent::Data {
                out_of_order: first,
                ..
            },
            WalEvent::Data {
                out_of_order: second,
                ..
            },
        ) => {
            assert!(!*first);
            assert!(*second);
        }
        other => panic!("unexpected events: {other:?}"),
    }
    writer.close().unwrap();
}

#[test]
fn sequencer_txns_are_strictly_monotonic_per_writer() {
    let root = TempDir::new().unwrap();
    let mut writer = WalWriter::open(&config(&root), registered(ts_int()), "trades").unwrap();

    let mut txns = Vec::new();
    for i in 0..5 {
        insert_int(&mut writer, i * 10, i as i32);
        txns.push(writer.commit().unwrap());
    }
    assert!(txns.windows(2).all(|w| w[1] > w[0]));

    let events = EventLog::read_all(writer.segment_dir()).unwrap();
    assert_eq!(events.len(), 5);
    for (i, event) in events.iter().enumerate() {
        assert_eq!(
            *event,
            WalEvent::Data {
                start_row: i as u64,
                end_row: i as u64 + 1,
                min_timestamp: i as i64 * 10,
                max_timestamp: i as i64 * 10,
                out_of_order: false,
            }
        );
    }
    writer.close().unwrap();
}

#[test]
fn empty_commit_returns_no_txn() {
    let root = TempDir::new().unwrap();
    let mut writer = WalWriter::open(&config(&root), registered(ts_int()), "trades").unwrap();
    assert_eq!(writer.commit().unwrap(), NO_TXN);
    insert_int(&mut writer, 1, 1);
    assert!(writer.commit().unwrap() > 0);
    assert_eq!(writer.commit().unwrap(), NO_TXN);
    writer.close().unwrap();
}

#[test]
fn commit_with_lag_delegates_to_commit() {
    let root = TempDir::new().unwrap();
    let mut writer = WalWriter::open(&config(&root), registered(ts_int()), "trades").unwrap();
    insert_int(&mut writer, 1, 1);
    assert!(writer.commit_with_lag(5_000_000).unwrap() > 0);
    assert_eq!(writer.commit_with_lag(5_000_000).unwrap(), NO_TXN);
    writer.close().unwrap();
}

// ---------------------------------------------------------------------
// Rollback
// ---------------------------------------------------------------------

#[test]
fn rollback_restores_commit_boundary() {
    let root = TempDir::new().unwrap();
    let columns = [
        ("ts", ColumnType::Timestamp),
        ("s", ColumnType::String),
        ("v", ColumnType::Int),
    ];
    let mut writer = WalWriter::open(&config(&root), registered(&columns), "trades").unwrap();

    {
        let mut row = writer.new_row(10).unwrap();
        row.put_str(1, "aaa").unwrap();
        row.put_int(2, 1).unwrap();
        row.append().unwrap();
    }
    writer.commit().unwrap();

    for (ts, s, v) in [(20, "bbbb", 2), (30, "cc", 3)] {
        let mut row = writer.new_row(ts).unwrap();
        row.put_str(1, s).unwrap();
        row.put_int(2, v).unwrap();
        row.append().unwrap();
    }
    assert!(writer.in_transaction());
    writer.rollback().unwrap();
    assert!(!writer.in_transaction());
    assert_eq!(writer.segment_row_count(), 1);

    let segment_dir = writer.segment_dir().to_path_buf();
    writer.close().unwrap();

    // exactly the committed row survives, at the committed byte sizes
    let primary = read_primary_bytes(&segment_dir, "s").unwrap();
    assert_eq!(primary.len(), 4 + 3);
    assert_eq!(&primary[4..], b"aaa");
    let secondary = read_secondary_bytes(&segment_dir, "s").unwrap();
    assert_eq!(i64s(&secondary), vec![0, 7]);
    assert_eq!(i32s(&read_primary_bytes(&segment_dir, "v").unwrap()), vec![1]);
    assert_eq!(
        read_primary_bytes(&segment_dir, "ts").unwrap().len(),
        16
    );
}

#[test]
fn commit_after_rollback_is_equivalent_to_plain_commit() {
    let root = TempDir::new().unwrap();
    let mut writer = WalWriter::open(&config(&root), registered(ts_int()), "trades").unwrap();

    insert_int(&mut writer, 10, 1);
    let first = writer.commit().unwrap();
    for i in 0..4 {
        insert_int(&mut writer, 100 + i, 99);
    }
    writer.rollback().unwrap();
    insert_int(&mut writer, 20, 2);
    let second = writer.commit().unwrap();
    assert!(second > first);

    let events = EventLog::read_all(writer.segment_dir()).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[1],
        WalEvent::Data {
            start_row: 1,
            end_row: 2,
            min_timestamp: 20,
            max_timestamp: 20,
            out_of_order: false,
        }
    );
    writer.close().unwrap();
}

// ---------------------------------------------------------------------
// Null encodings
// ---------------------------------------------------------------------

#[test]
fn untouched_columns_receive_bit_exact_nulls() {
    let root = TempDir::new().unwrap();
    let columns = [
        ("ts", ColumnType::Timestamp),
        ("b", ColumnType::Boolean),
        ("y", ColumnType::Byte),
        ("h", ColumnType::Short),
        ("c", ColumnType::Char),
        ("i", ColumnType::Int),
        ("l", ColumnType::Long),
        ("f", ColumnType::Float),
        ("d", ColumnType::Double),
        ("t2", ColumnType::Timestamp),
        ("s", ColumnType::String),
        ("bin", ColumnType::Binary),
        ("q", ColumnType::Long128),
        ("w", ColumnType::Long256),
    ];
    let mut writer = WalWriter::open(&config(&root), registered(&columns), "trades").unwrap();

    {
        let mut row = writer.new_row(1).unwrap();
        row.put_bool(1, true).unwrap();
        row.put_byte(2, 7).unwrap();
        row.put_short(3, 5).unwrap();
        row.put_char(4, 'A').unwrap();
        row.put_int(5, 1).unwrap();
        row.put_long(6, 2).unwrap();
        row.put_float(7, 1.5).unwrap();
        row.put_double(8, 2.5).unwrap();
        row.put_timestamp(9, 123).unwrap();
        row.put_str(10, "hi").unwrap();
        row.put_bin(11, &[1, 2, 3]).unwrap();
        row.put_long128(12, 1, 2).unwrap();
        row.put_long256(13, 1, 2, 3, 4).unwrap();
        row.append().unwrap();
    }
    // second row appended untouched: every column takes its null
    writer.new_row(2).unwrap().append().unwrap();
    writer.commit().unwrap();
    let segment_dir = writer.segment_dir().to_path_buf();
    writer.close().unwrap();

    assert_eq!(read_primary_bytes(&segment_dir, "b").unwrap(), vec![1, 0]);
    assert_eq!(read_primary_bytes(&segment_dir, "y").unwrap(), vec![7, 0]);
    assert_eq!(
        read_primary_bytes(&segment_dir, "h").unwrap(),
        vec![5, 0, 0, 0]
    );
    assert_eq!(
        read_primary_bytes(&segment_dir, "c").unwrap(),
        vec![65, 0, 0, 0]
    );
    assert_eq!(
        i32s(&read_primary_bytes(&segment_dir, "i").unwrap()),
        vec![1, INT_NULL]
    );
    assert_eq!(
        i64s(&read_primary_bytes(&segment_dir, "l").unwrap()),
        vec![2, LONG_NULL]
    );

    let floats = read_primary_bytes(&segment_dir, "f").unwrap();
    assert_eq!(f32::from_le_bytes(floats[0..4].try_into().unwrap()), 1.5);
    assert!(f32::from_le_bytes(floats[4..8].try_into().unwrap()).is_nan());
    let doubles = read_primary_bytes(&segment_dir, "d").unwrap();
    assert_eq!(f64::from_le_bytes(doubles[0..8].try_into().unwrap()), 2.5);
    assert!(f64::from_le_bytes(doubles[8..16].try_into().unwrap()).is_nan());

    assert_eq!(
        i64s(&read_primary_bytes(&segment_dir, "t2").unwrap()),
        vec![123, LONG_NULL]
    );

    let strings = read_primary_bytes(&segment_dir, "s").unwrap();
    assert_eq!(i32::from_le_bytes(strings[0..4].try_into().unwrap()), 2);
    assert_eq!(&strings[4..6], b"hi");
    assert_eq!(i32::from_le_bytes(strings[6..10].try_into().unwrap()), -1);
    assert_eq!(
        i64s(&read_secondary_bytes(&segment_dir, "s").unwrap()),
        vec![0, 6, 10]
    );

    let bins = read_primary_bytes(&segment_dir, "bin").unwrap();
    assert_eq!(i64::from_le_bytes(bins[0..8].try_into().unwrap()), 3);
    assert_eq!(&bins[8..11], &[1, 2, 3]);
    assert_eq!(i64::from_le_bytes(bins[11..19].try_into().unwrap()), -1);

    assert_eq!(
        i64s(&read_primary_bytes(&segment_dir, "q").unwrap()),
        vec![1, 2, 0, i64::MIN]
    );
    assert_eq!(
        i64s(&read_primary_bytes(&segment_dir, "w").unwrap()),
        vec![1, 2, 3, 4, i64::MIN, i64::MIN, i64::MIN, i64::MIN]
    );

    // designated timestamp stores (timestamp, row index) pairs
    assert_eq!(
        i64s(&read_primary_bytes(&segment_dir, "ts").unwrap()),
        vec![1, 0, 2, 1]
    );
}

// ---------------------------------------------------------------------
// Schema evolution
// ---------------------------------------------------------------------

#[test]
fn add_column_after_commit_seals_the_segment() {
    let root = TempDir::new().unwrap();
    let mut writer = WalWriter::open(&config(&root), registered(ts_int()), "trades").unwrap();

    insert_int(&mut writer, 100, 1);
    insert_int(&mut writer, 200, 2);
    writer.commit().unwrap();
    let segment0 = writer.segment_dir().to_path_buf();

    assert!(writer.add_column("x", ColumnType::Int).unwrap() > 0);
    assert_eq!(writer.structure_version(), 1);
    // the sealed segment does not materialize the column
    assert_eq!(writer.segment_id(), 0);
    assert!(!segment0.join("x.d").exists());

    let mut row = writer.new_row(300).unwrap();
    row.put_int(1, 3).unwrap();
    row.put_int(2, 42).unwrap();
    row.append().unwrap();
    assert_eq!(writer.segment_id(), 1);
    writer.commit().unwrap();

    let segment1 = writer.segment_dir().to_path_buf();
    writer.close().unwrap();

    assert!(!segment0.join("x.d").exists());
    assert_eq!(i32s(&read_primary_bytes(&segment1, "x").unwrap()), vec![42]);

    let meta0 = TableMetadata::read_from_dir(&segment0).unwrap();
    assert_eq!(meta0.structure_version(), 0);
    assert_eq!(meta0.column_index_quiet("x"), None);
    let meta1 = TableMetadata::read_from_dir(&segment1).unwrap();
    assert_eq!(meta1.structure_version(), 1);
    assert_eq!(meta1.column_index("x").unwrap(), 2);
}

#[test]
fn add_column_with_uncommitted_rows_rolls_and_backfills_nulls() {
    let root = TempDir::new().unwrap();
    let mut writer = WalWriter::open(&config(&root), registered(ts_int()), "trades").unwrap();

    for (ts, v) in [(10, 1), (20, 2), (30, 3)] {
        insert_int(&mut writer, ts, v);
    }
    assert!(writer.add_column("x", ColumnType::Int).unwrap() > 0);

    // the three uncommitted rows moved into segment 1
    assert_eq!(writer.segment_id(), 1);
    assert_eq!(writer.segment_row_count(), 3);
    assert!(writer.in_transaction());

    let txn = writer.commit().unwrap();
    assert!(txn > 0);
    let segment1 = writer.segment_dir().to_path_buf();
    writer.close().unwrap();

    assert_eq!(
        i32s(&read_primary_bytes(&segment1, "x").unwrap()),
        vec![INT_NULL, INT_NULL, INT_NULL]
    );
    assert_eq!(i32s(&read_primary_bytes(&segment1, "v").unwrap()), vec![1, 2, 3]);
    assert_eq!(
        EventLog::read_all(&segment1).unwrap(),
        vec![WalEvent::Data {
            start_row: 0,
            end_row: 3,
            min_timestamp: 10,
            max_timestamp: 30,
            out_of_order: false,
        }]
    );
}

#[test]
fn rename_with_uncommitted_rows_relocates_bytes_unchanged() {
    let root = TempDir::new().unwrap();
    let columns = [("ts", ColumnType::Timestamp), ("s", ColumnType::String)];
    let mut writer = WalWriter::open(&config(&root), registered(&columns), "trades").unwrap();

    for (ts, s) in [(1, "one"), (2, "twotwo")] {
        let mut row = writer.new_row(ts).unwrap();
        row.put_str(1, s).unwrap();
        row.append().unwrap();
    }
    writer.rename_column("s", "s2").unwrap();

    assert_eq!(writer.segment_id(), 1);
    let segment1 = writer.segment_dir().to_path_buf();
    let meta1 = TableMetadata::read_from_dir(&segment1).unwrap();
    assert_eq!(meta1.column_index("s2").unwrap(), 1);
    assert_eq!(meta1.column_index_quiet("s"), None);

    // appending through the renamed column continues seamlessly
    let mut row = writer.new_row(3).unwrap();
    row.put_str(1, "three").unwrap();
    row.append().unwrap();
    writer.commit().unwrap();
    writer.close().unwrap();

    assert!(!segment1.join("s.d").exists());
    let primary = read_primary_bytes(&segment1, "s2").unwrap();
    let expected: Vec<u8> = [
        &3i32.to_le_bytes()[..],
        b"one",
        &6i32.to_le_bytes()[..],
        b"twotwo",
        &5i32.to_le_bytes()[..],
        b"three",
    ]
    .concat();
    assert_eq!(primary, expected);
    assert_eq!(
        i64s(&read_secondary_bytes(&segment1, "s2").unwrap()),
        vec![0, 7, 17, 26]
    );
}

#[test]
fn remove_column_tombstones_and_protects_designated_timestamp() {
    let root = TempDir::new().unwrap();
    let columns = [
        ("ts", ColumnType::Timestamp),
        ("a", ColumnType::Int),
        ("b", ColumnType::Long),
    ];
    let mut writer = WalWriter::open(&config(&root), registered(&columns), "trades").unwrap();

    assert!(matches!(
        writer.remove_column("ts"),
        Err(WalError::DesignatedTimestampRemoval { .. })
    ));
    assert!(!writer.is_distressed());

    writer.remove_column("a").unwrap();
    assert_eq!(writer.structure_version(), 1);

    // the slot is tombstoned: lookups miss, writes fail, inserts to
    // surviving columns keep working
    {
        let mut row = writer.new_row(1).unwrap();
        assert!(matches!(
            row.put_int(1, 5),
            Err(WalError::ColumnNotFound { .. })
        ));
        row.put_long(2, 9).unwrap();
        row.append().unwrap();
    }
    writer.commit().unwrap();
    let segment_dir = writer.segment_dir().to_path_buf();
    writer.close().unwrap();

    assert_eq!(i64s(&read_primary_bytes(&segment_dir, "b").unwrap()), vec![9]);
}

#[test]
fn apply_enforces_single_statement_and_committed_state() {
    let root = TempDir::new().unwrap();
    let mut writer = WalWriter::open(&config(&root), registered(ts_int()), "trades").unwrap();

    let add = AlterOperation::AddColumn {
        name: "x".to_string(),
        column_type: ColumnType::Int,
        geo_bits: 0,
    };
    let rename = AlterOperation::RenameColumn {
        old: "v".to_string(),
        new: "value".to_string(),
    };

    let multi = AlterRequest {
        operations: vec![add.clone(), rename.clone()],
    };
    assert!(matches!(
        writer.apply(&multi),
        Err(WalError::MultiStatementAlter { count: 2 })
    ));

    insert_int(&mut writer, 1, 1);
    assert!(matches!(
        writer.apply(&AlterRequest::single(add.clone())),
        Err(WalError::UncommittedInserts { .. })
    ));
    assert!(!writer.is_distressed());

    writer.commit().unwrap();
    assert!(writer.apply(&AlterRequest::single(add)).unwrap() > 0);
    assert!(writer.apply(&AlterRequest::single(rename)).unwrap() > 0);
    assert_eq!(writer.structure_version(), 2);
    assert!(writer.metadata().column_index("value").is_ok());
    writer.close().unwrap();
}

#[test]
fn concurrent_writers_converge_through_the_change_log() {
    let root = TempDir::new().unwrap();
    let sequencer = registered(ts_int());
    let mut w1 = WalWriter::open(&config(&root), sequencer.clone(), "trades").unwrap();
    let mut w2 = WalWriter::open(&config(&root), sequencer.clone(), "trades").unwrap();
    assert_ne!(w1.wal_id(), w2.wal_id());

    // w2 buffers rows against the old structure
    insert_int(&mut w2, 10, 1);
    insert_int(&mut w2, 20, 2);
    let segment0 = w2.segment_dir().to_path_buf();

    // w1 commits a schema change first
    let alter_txn = w1.add_column("y", ColumnType::Int).unwrap();
    assert!(alter_txn > 0);

    // w2's commit is refused, catches up, applies the change locally
    // (rolling its uncommitted rows) and retries
    let commit_txn = w2.commit().unwrap();
    assert!(commit_txn > alter_txn);
    assert_eq!(w2.structure_version(), 1);
    assert_eq!(w2.segment_id(), 1);

    let segment1 = w2.segment_dir().to_path_buf();
    w2.close().unwrap();
    w1.close().unwrap();

    // rolled segment carries the rows, null-backfilled new column and
    // exactly one DATA record; the sealed segment advertises nothing
    assert_eq!(
        i32s(&read_primary_bytes(&segment1, "y").unwrap()),
        vec![INT_NULL, INT_NULL]
    );
    assert_eq!(i32s(&read_primary_bytes(&segment1, "v").unwrap()), vec![1, 2]);
    assert_eq!(
        EventLog::read_all(&segment1).unwrap(),
        vec![WalEvent::Data {
            start_row: 0,
            end_row: 2,
            min_timestamp: 10,
            max_timestamp: 20,
            out_of_order: false,
        }]
    );
    assert_eq!(EventLog::read_all(&segment0).unwrap(), Vec::new());
}

// ---------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------

fn symbol_table_fixture(root: &TempDir) -> Arc<MemorySequencer> {
    let table_dir = root.path().join("trades");
    std::fs::create_dir_all(&table_dir).unwrap();
    base::write_dictionary(&table_dir, "sym", -1, &["alpha", "beta"]).unwrap();
    base::write_base_files(
        &table_dir,
        0,
        1,
        &[(
            1,
            SymbolCountEntry {
                symbol_count: 2,
                name_txn: -1,
            },
        )],
    )
    .unwrap();
    registered(&[("ts", ColumnType::Timestamp), ("sym", ColumnType::Symbol)])
}

#[test]
fn symbols_inherit_base_dictionary_and_mint_above_watermark() {
    let root = TempDir::new().unwrap();
    let sequencer = symbol_table_fixture(&root);
    let mut writer = WalWriter::open(&config(&root), sequencer, "trades").unwrap();

    assert!(writer.wal_root().join("sym.o").exists());
    assert!(writer.wal_root().join("sym.c").exists());

    for value in ["alpha", "beta", "gamma", "delta", "gamma"] {
        let mut row = writer.new_row(1).unwrap();
        row.put_sym(1, value).unwrap();
        row.append().unwrap();
    }
    {
        let mut row = writer.new_row(2).unwrap();
        row.put_sym_null(1).unwrap();
        row.append().unwrap();
    }
    writer.commit().unwrap();
    let segment_dir = writer.segment_dir().to_path_buf();
    writer.close().unwrap();

    assert_eq!(
        i32s(&read_primary_bytes(&segment_dir, "sym").unwrap()),
        vec![0, 1, 2, 3, 2, SYMBOL_NULL]
    );
}

#[test]
fn unset_symbol_column_takes_null_key() {
    let root = TempDir::new().unwrap();
    let sequencer = symbol_table_fixture(&root);
    let mut writer = WalWriter::open(&config(&root), sequencer, "trades").unwrap();

    writer.new_row(1).unwrap().append().unwrap();
    writer.commit().unwrap();
    let segment_dir = writer.segment_dir().to_path_buf();
    writer.close().unwrap();

    assert_eq!(
        i32s(&read_primary_bytes(&segment_dir, "sym").unwrap()),
        vec![SYMBOL_NULL]
    );
}

#[test]
fn removing_symbol_column_deletes_inherited_links() {
    let root = TempDir::new().unwrap();
    let sequencer = symbol_table_fixture(&root);
    let mut writer = WalWriter::open(&config(&root), sequencer, "trades").unwrap();

    let wal_root = writer.wal_root().to_path_buf();
    assert!(wal_root.join("sym.o").exists());

    writer.remove_column("sym").unwrap();
    assert!(!wal_root.join("sym.o").exists());
    assert!(!wal_root.join("sym.c").exists());

    // base table keeps its own files
    assert!(root.path().join("trades").join("sym.o").exists());
    writer.close().unwrap();
}

#[test]
fn base_version_skew_degrades_to_local_coining() {
    let root = TempDir::new().unwrap();
    let table_dir = root.path().join("trades");
    std::fs::create_dir_all(&table_dir).unwrap();
    base::write_dictionary(&table_dir, "sym", -1, &["alpha"]).unwrap();
    // base table sits at a different structure version
    base::write_base_files(
        &table_dir,
        9,
        1,
        &[(
            1,
            SymbolCountEntry {
                symbol_count: 1,
                name_txn: -1,
            },
        )],
    )
    .unwrap();
    let sequencer = registered(&[("ts", ColumnType::Timestamp), ("sym", ColumnType::Symbol)]);
    let mut writer = WalWriter::open(&config(&root), sequencer, "trades").unwrap();

    {
        let mut row = writer.new_row(1).unwrap();
        row.put_sym(1, "alpha").unwrap();
        row.append().unwrap();
    }
    writer.commit().unwrap();
    let segment_dir = writer.segment_dir().to_path_buf();
    writer.close().unwrap();

    // no inheritance: "alpha" was coined locally at key 0
    assert_eq!(i32s(&read_primary_bytes(&segment_dir, "sym").unwrap()), vec![0]);
}

// ---------------------------------------------------------------------
// Geohash columns
// ---------------------------------------------------------------------

#[test]
fn geo_column_accepts_literals_and_coordinates() {
    let root = TempDir::new().unwrap();
    let mut writer = WalWriter::open(&config(&root), registered(ts_int()), "trades").unwrap();

    writer.add_geo_column("g", 25).unwrap();
    {
        let mut row = writer.new_row(1).unwrap();
        row.put_geo_str(2, "ezs42").unwrap();
        row.append().unwrap();
    }
    {
        let mut row = writer.new_row(2).unwrap();
        row.put_geo_deg(2, 42.605, -5.603).unwrap();
        row.append().unwrap();
    }
    // untouched geo column takes the all-ones null
    writer.new_row(3).unwrap().append().unwrap();
    writer.commit().unwrap();
    let segment_dir = writer.segment_dir().to_path_buf();
    writer.close().unwrap();

    assert_eq!(
        i32s(&read_primary_bytes(&segment_dir, "g").unwrap()),
        vec![14672002, 14672002, -1]
    );
}

// ---------------------------------------------------------------------
// Sequenced non-data events
// ---------------------------------------------------------------------

#[test]
fn truncate_and_sql_events_are_sequenced() {
    let root = TempDir::new().unwrap();
    let mut writer = WalWriter::open(&config(&root), registered(ts_int()), "trades").unwrap();

    insert_int(&mut writer, 1, 1);
    let t1 = writer.commit().unwrap();
    let t2 = writer
        .exec_sql(&SqlOperation {
            command_type: 3,
            sql: "UPDATE trades SET v = 0".to_string(),
            execution_context: vec![9],
        })
        .unwrap();
    let t3 = writer.truncate().unwrap();
    assert!(t1 < t2 && t2 < t3);

    let events = EventLog::read_all(writer.segment_dir()).unwrap();
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], WalEvent::Data { .. }));
    assert_eq!(
        events[1],
        WalEvent::Sql {
            command_type: 3,
            sql: "UPDATE trades SET v = 0".to_string(),
            execution_context: vec![9],
        }
    );
    assert_eq!(events[2], WalEvent::Truncate);
    writer.close().unwrap();
}

// ---------------------------------------------------------------------
// Distress
// ---------------------------------------------------------------------

struct FailingSequencer {
    inner: MemorySequencer,
    fail_next_txn: AtomicBool,
}

impl FailingSequencer {
    fn new(inner: MemorySequencer) -> Self {
        Self {
            inner,
            fail_next_txn: AtomicBool::new(false),
        }
    }
}

impl Sequencer for FailingSequencer {
    fn next_wal_id(&self, table: &str) -> Result<WalId> {
        self.inner.next_wal_id(table)
    }

    fn table_metadata(&self, table: &str) -> Result<TableMetadata> {
        self.inner.table_metadata(table)
    }

    fn next_txn(
        &self,
        table: &str,
        wal_id: WalId,
        structure_version: StructureVersion,
        segment_id: SegmentId,
        segment_txn: SegmentTxn,
    ) -> Result<TxnNumber> {
        if self.fail_next_txn.load(Ordering::SeqCst) {
            return Err(WalError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "sequencer unreachable",
            )));
        }
        self.inner
            .next_txn(table, wal_id, structure_version, segment_id, segment_txn)
    }

    fn next_structure_txn(
        &self,
        table: &str,
        structure_version: StructureVersion,
        op: &AlterOperation,
    ) -> Result<TxnNumber> {
        self.inner.next_structure_txn(table, structure_version, op)
    }

    fn change_log_cursor(
        &self,
        table: &str,
        from_version: StructureVersion,
    ) -> Result<MetadataChangeLog> {
        self.inner.change_log_cursor(table, from_version)
    }
}

#[test]
fn commit_failure_rolls_back_and_distresses_the_writer() {
    let root = TempDir::new().unwrap();
    let inner = MemorySequencer::new();
    inner
        .create_table(TableMetadata::new("trades", ts_int(), Some("ts")).unwrap())
        .unwrap();
    let sequencer = Arc::new(FailingSequencer::new(inner));
    let mut writer = WalWriter::open(&config(&root), sequencer.clone(), "trades").unwrap();

    insert_int(&mut writer, 1, 1);
    insert_int(&mut writer, 2, 2);
    sequencer.fail_next_txn.store(true, Ordering::SeqCst);

    assert!(matches!(writer.commit(), Err(WalError::Io(_))));
    assert!(writer.is_distressed());
    // rollback ran before the writer went terminal
    assert_eq!(writer.segment_row_count(), 0);
    assert!(!writer.in_transaction());

    // distress is sticky: every mutating entry point now fails
    sequencer.fail_next_txn.store(false, Ordering::SeqCst);
    assert!(matches!(writer.new_row(3), Err(WalError::Distressed { .. })));
    assert!(matches!(writer.commit(), Err(WalError::Distressed { .. })));
    assert!(matches!(
        writer.add_column("x", ColumnType::Int),
        Err(WalError::Distressed { .. })
    ));
    assert!(matches!(writer.truncate(), Err(WalError::Distressed { .. })));
    assert!(matches!(writer.rollback(), Err(WalError::Distressed { .. })));

    // close is the only legal operation left
    writer.close().unwrap();
}

// ---------------------------------------------------------------------
// Writer lifecycle
// ---------------------------------------------------------------------

#[test]
fn wal_directories_are_per_writer_and_locked() {
    let root = TempDir::new().unwrap();
    let sequencer = registered(ts_int());
    let w1 = WalWriter::open(&config(&root), sequencer.clone(), "trades").unwrap();
    let w2 = WalWriter::open(&config(&root), sequencer, "trades").unwrap();

    let r1: PathBuf = w1.wal_root().to_path_buf();
    let r2: PathBuf = w2.wal_root().to_path_buf();
    assert_ne!(r1, r2);
    assert!(r1.ends_with(Path::new("trades/wal1")));
    assert!(r2.ends_with(Path::new("trades/wal2")));
    w1.close().unwrap();
    w2.close().unwrap();
}

#[test]
fn close_rolls_back_pending_rows() {
    let root = TempDir::new().unwrap();
    let sequencer = registered(ts_int());
    let segment_dir;
    {
        let mut writer = WalWriter::open(&config(&root), sequencer, "trades").unwrap();
        insert_int(&mut writer, 1, 1);
        writer.commit().unwrap();
        insert_int(&mut writer, 2, 2);
        insert_int(&mut writer, 3, 3);
        segment_dir = writer.segment_dir().to_path_buf();
        writer.close().unwrap();
    }
    // only the committed row survives on disk
    assert_eq!(i32s(&read_primary_bytes(&segment_dir, "v").unwrap()), vec![1]);
    assert_eq!(read_primary_bytes(&segment_dir, "ts").unwrap().len(), 16);
    let events = EventLog::read_all(&segment_dir).unwrap();
    assert_eq!(events.len(), 1);
}
