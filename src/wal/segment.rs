// Segment directories.
//
// A segment is a numbered directory under the writer root holding its
// advisory lock, a metadata snapshot, the event log and one column file
// pair per live column. Segments seal on roll; a sealed segment is never
// written again.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::common::SegmentId;
use crate::error::Result;
use crate::meta::TableMetadata;
use crate::storage::DirLock;
use crate::wal::events::EventLog;

pub struct Segment {
    pub id: SegmentId,
    pub dir: PathBuf,
    pub events: EventLog,
    _lock: DirLock,
}

impl Segment {
    /// Creates `<wal_root>/<id>`, locks it, snapshots the schema into
    /// `_meta` and opens an empty event log.
    pub fn create(wal_root: &Path, id: SegmentId, meta: &TableMetadata) -> Result<Self> {
        let dir = wal_root.join(id.to_string());
        std::fs::create_dir_all(&dir)?;
        let lock = DirLock::acquire(&dir)?;
        meta.write_to_dir(&dir)?;
        let events = EventLog::create(&dir)?;
        debug!(segment = id, dir = %dir.display(), "opened segment");
        Ok(Self {
            id,
            dir,
            events,
            _lock: lock,
        })
    }

    /// Seals the segment: flushes and truncates the event log. The
    /// directory lock releases when the segment is dropped.
    pub fn close(&mut self) -> Result<()> {
        self.events.close()
    }
}
