// Read-only view of the base table's transaction state.
//
// Symbol dictionaries are shared with the base table through hard links.
// Before linking, the writer must observe a stable `(_txn, _cv)` pair at
// its own structure version: the `_txn` file leads with a change counter
// that is re-read after the payload, seqlock style, and the recorded
// column version must match the `_cv` file. An unstable or mismatched
// read within the timeout degrades to "no base dictionary".

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::common::StructureVersion;
use crate::error::Result;

pub const TXN_FILE_NAME: &str = "_txn";
pub const CV_FILE_NAME: &str = "_cv";

const TXN_HEADER_LEN: usize = 8 + 8 + 8 + 4;
const TXN_ENTRY_LEN: usize = 4 + 4 + 8;

/// Per-symbol-column dictionary state recorded in the base `_txn` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolCountEntry {
    pub symbol_count: u32,
    /// Qualifies dictionary file names; negative means unqualified.
    pub name_txn: i64,
}

/// Stable snapshot of the base table's `_txn` file.
#[derive(Debug, Clone)]
pub struct BaseTxnSnapshot {
    pub structure_version: StructureVersion,
    pub column_version: u64,
    entries: HashMap<u32, SymbolCountEntry>,
}

impl BaseTxnSnapshot {
    pub fn symbol_entry(&self, column_index: u32) -> Option<SymbolCountEntry> {
        self.entries.get(&column_index).copied()
    }
}

/// Reads a stable base-table snapshot, spinning until `timeout` for the
/// writer's structure version and a matching column version. `None`
/// means the base dictionaries cannot be inherited and every symbol
/// value will be coined locally.
pub fn read_base_snapshot(
    table_dir: &Path,
    expected_structure: StructureVersion,
    timeout: Duration,
) -> Result<Option<BaseTxnSnapshot>> {
    let txn_path = table_dir.join(TXN_FILE_NAME);
    let cv_path = table_dir.join(CV_FILE_NAME);
    if !txn_path.exists() || !cv_path.exists() {
        return Ok(None);
    }

    let deadline = Instant::now() + timeout;
    loop {
        let attempt = (|| -> Option<BaseTxnSnapshot> {
            let first = std::fs::read(&txn_path).ok()?;
            let (version, snapshot) = parse_txn(&first)?;
            let second = std::fs::read(&txn_path).ok()?;
            let (reread_version, _) = parse_txn(&second)?;
            if version != reread_version {
                return None;
            }
            let cv_bytes = std::fs::read(&cv_path).ok()?;
            if cv_bytes.len() < 8 {
                return None;
            }
            let column_version = u64::from_le_bytes(cv_bytes[0..8].try_into().unwrap());
            if snapshot.structure_version != expected_structure
                || snapshot.column_version != column_version
            {
                return None;
            }
            Some(snapshot)
        })();

        if let Some(snapshot) = attempt {
            return Ok(Some(snapshot));
        }
        if Instant::now() >= deadline {
            warn!(
                table_dir = %table_dir.display(),
                expected_structure,
                "base table metadata did not stabilize; symbol dictionaries start empty"
            );
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn parse_txn(bytes: &[u8]) -> Option<(u64, BaseTxnSnapshot)> {
    if bytes.len() < TXN_HEADER_LEN {
        return None;
    }
    let version = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
    let structure_version = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
    let column_version = u64::from_le_bytes(bytes[16..24].try_into().unwrap());
    let count = u32::from_le_bytes(bytes[24..28].try_into().unwrap()) as usize;
    if bytes.len() < TXN_HEADER_LEN + count * TXN_ENTRY_LEN {
        return None;
    }
    let mut entries = HashMap::with_capacity(count);
    for i in 0..count {
        let at = TXN_HEADER_LEN + i * TXN_ENTRY_LEN;
        let column_index = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
        let symbol_count = u32::from_le_bytes(bytes[at + 4..at + 8].try_into().unwrap());
        let name_txn = i64::from_le_bytes(bytes[at + 8..at + 16].try_into().unwrap());
        entries.insert(
            column_index,
            SymbolCountEntry {
                symbol_count,
                name_txn,
            },
        );
    }
    Some((
        version,
        BaseTxnSnapshot {
            structure_version,
            column_version,
            entries,
        },
    ))
}

/// Dictionary file name for a column, qualified by `name_txn` the way the
/// base table qualifies files across column rewrites.
pub fn dict_file_name(column: &str, suffix: char, name_txn: i64) -> String {
    if name_txn < 0 {
        format!("{column}.{suffix}")
    } else {
        format!("{column}.{suffix}.{name_txn}")
    }
}

/// Writes the base-table `_txn` and `_cv` pair. Used by embeddings that
/// materialize tables and by tests.
pub fn write_base_files(
    table_dir: &Path,
    structure_version: StructureVersion,
    column_version: u64,
    symbol_entries: &[(u32, SymbolCountEntry)],
) -> Result<()> {
    let mut bytes =
        Vec::with_capacity(TXN_HEADER_LEN + symbol_entries.len() * TXN_ENTRY_LEN);
    bytes.extend_from_slice(&1u64.to_le_bytes());
    bytes.extend_from_slice(&structure_version.to_le_bytes());
    bytes.extend_from_slice(&column_version.to_le_bytes());
    bytes.extend_from_slice(&(symbol_entries.len() as u32).to_le_bytes());
    for (column_index, entry) in symbol_entries {
        bytes.extend_from_slice(&column_index.to_le_bytes());
        bytes.extend_from_slice(&entry.symbol_count.to_le_bytes());
        bytes.extend_from_slice(&entry.name_txn.to_le_bytes());
    }
    std::fs::write(table_dir.join(TXN_FILE_NAME), bytes)?;
    std::fs::write(table_dir.join(CV_FILE_NAME), column_version.to_le_bytes())?;
    Ok(())
}

/// Writes a symbol dictionary (`.o` offsets, `.c` payload, empty `.k`/
/// `.v` index pair) for a column under `dir`.
pub fn write_dictionary(
    dir: &Path,
    column: &str,
    name_txn: i64,
    values: &[&str],
) -> Result<()> {
    let mut chars = Vec::new();
    let mut offsets = Vec::with_capacity(8 + values.len() * 8);
    offsets.extend_from_slice(&(values.len() as u64).to_le_bytes());
    for value in values {
        chars.extend_from_slice(&(value.len() as u32).to_le_bytes());
        chars.extend_from_slice(value.as_bytes());
        offsets.extend_from_slice(&(chars.len() as u64).to_le_bytes());
    }
    std::fs::write(dir.join(dict_file_name(column, 'o', name_txn)), offsets)?;
    std::fs::write(dir.join(dict_file_name(column, 'c', name_txn)), chars)?;
    std::fs::write(dir.join(dict_file_name(column, 'k', name_txn)), [])?;
    std::fs::write(dir.join(dict_file_name(column, 'v', name_txn)), [])?;
    Ok(())
}
