// In-process sequencer.
//
// Reference implementation of the `Sequencer` contract backed by a table
// registry. Serves embedded deployments and the multi-writer test
// scenarios; the clustered sequencer lives outside this crate.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::common::{SegmentId, SegmentTxn, StructureVersion, TxnNumber, WalId, NO_TXN};
use crate::error::{Result, WalError};
use crate::meta::change::{AlterOperation, MetadataChange};
use crate::meta::TableMetadata;
use crate::sequencer::{MetadataChangeLog, Sequencer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommittedTxn {
    pub txn: TxnNumber,
    pub wal_id: WalId,
    pub segment_id: SegmentId,
    pub segment_txn: SegmentTxn,
}

struct TableSequence {
    metadata: TableMetadata,
    next_txn: TxnNumber,
    next_wal_id: WalId,
    change_log: Vec<MetadataChange>,
    committed: Vec<CommittedTxn>,
}

impl TableSequence {
    fn allocate(&mut self) -> TxnNumber {
        let txn = self.next_txn;
        self.next_txn += 1;
        txn
    }
}

#[derive(Default)]
pub struct MemorySequencer {
    tables: RwLock<HashMap<String, Arc<Mutex<TableSequence>>>>,
}

impl MemorySequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table at structure version 0.
    pub fn create_table(&self, metadata: TableMetadata) -> Result<()> {
        let name = metadata.table_name().to_string();
        let mut tables = self.tables.write();
        if tables.contains_key(&name) {
            return Err(WalError::TableExists { table: name });
        }
        tables.insert(
            name,
            Arc::new(Mutex::new(TableSequence {
                metadata,
                next_txn: 1,
                next_wal_id: 1,
                change_log: Vec::new(),
                committed: Vec::new(),
            })),
        );
        Ok(())
    }

    /// Transactions committed so far, in sequencer order. Test support.
    pub fn committed(&self, table: &str) -> Result<Vec<CommittedTxn>> {
        Ok(self.table(table)?.lock().committed.clone())
    }

    fn table(&self, table: &str) -> Result<Arc<Mutex<TableSequence>>> {
        self.tables
            .read()
            .get(table)
            .cloned()
            .ok_or_else(|| WalError::TableNotFound {
                table: table.to_string(),
            })
    }
}

impl Sequencer for MemorySequencer {
    fn next_wal_id(&self, table: &str) -> Result<WalId> {
        let entry = self.table(table)?;
        let mut seq = entry.lock();
        let id = seq.next_wal_id;
        seq.next_wal_id += 1;
        Ok(id)
    }

    fn table_metadata(&self, table: &str) -> Result<TableMetadata> {
        Ok(self.table(table)?.lock().metadata.clone())
    }

    fn next_txn(
        &self,
        table: &str,
        wal_id: WalId,
        structure_version: StructureVersion,
        segment_id: SegmentId,
        segment_txn: SegmentTxn,
    ) -> Result<TxnNumber> {
        let entry = self.table(table)?;
        let mut seq = entry.lock();
        if structure_version != seq.metadata.structure_version() {
            return Ok(NO_TXN);
        }
        let txn = seq.allocate();
        seq.committed.push(CommittedTxn {
            txn,
            wal_id,
            segment_id,
            segment_txn,
        });
        Ok(txn)
    }

    fn next_structure_txn(
        &self,
        table: &str,
        structure_version: StructureVersion,
        op: &AlterOperation,
    ) -> Result<TxnNumber> {
        let entry = self.table(table)?;
        let mut seq = entry.lock();
        if structure_version != seq.metadata.structure_version() {
            return Ok(NO_TXN);
        }
        seq.metadata.apply_alter(op)?;
        let change = MetadataChange {
            new_structure_version: seq.metadata.structure_version(),
            op: op.clone(),
        };
        seq.change_log.push(change);
        Ok(seq.allocate())
    }

    fn change_log_cursor(
        &self,
        table: &str,
        from_version: StructureVersion,
    ) -> Result<MetadataChangeLog> {
        let entry = self.table(table)?;
        let seq = entry.lock();
        let entries = seq
            .change_log
            .iter()
            .filter(|c| c.new_structure_version > from_version)
            .cloned()
            .collect();
        Ok(MetadataChangeLog::new(entries))
    }
}
