// Segment event log.
//
// `_event` is an append-only run of framed records behind a small
// magic/version header. Each record's position in the run is its segment
// txn, the 0-based index the sequencer receives alongside the segment id.
// A record index may be written more than once: when a commit is
// interrupted by a schema catch-up the head slot is rewritten after the
// uncommitted rows move to a fresh segment.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::SegmentTxn;
use crate::error::{Result, WalError};
use crate::storage::{decode_framed, encode_framed, AppendFile};

pub const EVENT_FILE_NAME: &str = "_event";

const EVENT_MAGIC: u32 = 0x5645_4C57; // "WLEV"
const EVENT_FORMAT_VERSION: u32 = 1;
const EVENT_HEADER_LEN: u64 = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalEvent {
    /// One committed row range `[start_row, end_row)`.
    Data {
        start_row: u64,
        end_row: u64,
        min_timestamp: i64,
        max_timestamp: i64,
        out_of_order: bool,
    },
    /// A sequenced non-structural operation.
    Sql {
        command_type: i32,
        sql: String,
        execution_context: Vec<u8>,
    },
    /// Table truncation marker.
    Truncate,
}

pub struct EventLog {
    file: AppendFile,
    /// Byte offset of each record; index == segment txn.
    offsets: Vec<u64>,
}

impl EventLog {
    pub fn create(dir: &Path) -> Result<Self> {
        let mut file = AppendFile::create(dir.join(EVENT_FILE_NAME))?;
        file.append(&EVENT_MAGIC.to_le_bytes())?;
        file.append(&EVENT_FORMAT_VERSION.to_le_bytes())?;
        Ok(Self {
            file,
            offsets: Vec::new(),
        })
    }

    /// Index of the last recorded event, `NO_SEGMENT_TXN` when empty.
    pub fn last_txn(&self) -> SegmentTxn {
        self.offsets.len() as SegmentTxn - 1
    }

    /// Writes `event` at index `txn`, which must be at most one past the
    /// current tail. Writing at an occupied index discards that record
    /// and everything after it.
    pub fn append_at(&mut self, txn: SegmentTxn, event: &WalEvent) -> Result<SegmentTxn> {
        let index = usize::try_from(txn).map_err(|_| WalError::Corrupted {
            path: self.file.path().to_path_buf(),
            detail: format!("negative event index {txn}"),
        })?;
        if index > self.offsets.len() {
            return Err(WalError::Corrupted {
                path: self.file.path().to_path_buf(),
                detail: format!(
                    "event index {index} past tail {}",
                    self.offsets.len()
                ),
            });
        }
        if index < self.offsets.len() {
            self.file.jump_to(self.offsets[index]);
            self.offsets.truncate(index);
        }
        self.offsets.push(self.file.offset());
        self.file.append(&encode_framed(event)?)?;
        Ok(txn)
    }

    /// Discards the record at `txn` and everything after it.
    pub fn rewind_to(&mut self, txn: SegmentTxn) {
        let index = txn.max(0) as usize;
        if index < self.offsets.len() {
            self.file.jump_to(self.offsets[index]);
            self.offsets.truncate(index);
        }
    }

    pub fn close(&mut self) -> Result<()> {
        self.file.finish(true)
    }

    /// Reads every event in a segment's log. Test and replay support.
    pub fn read_all(dir: &Path) -> Result<Vec<WalEvent>> {
        let path = dir.join(EVENT_FILE_NAME);
        let bytes = std::fs::read(&path)?;
        if bytes.len() < EVENT_HEADER_LEN as usize
            || u32::from_le_bytes(bytes[0..4].try_into().unwrap()) != EVENT_MAGIC
            || u32::from_le_bytes(bytes[4..8].try_into().unwrap()) != EVENT_FORMAT_VERSION
        {
            return Err(WalError::Corrupted {
                path,
                detail: "bad event log header".to_string(),
            });
        }
        let mut events = Vec::new();
        let mut at = EVENT_HEADER_LEN as usize;
        while at < bytes.len() {
            let (event, next) = decode_framed(&bytes, at, &path)?;
            events.push(event);
            at = next;
        }
        Ok(events)
    }
}
