//! In-memory collection buffer
//!
//! Keeps every collected row, grouped per instrument table, until the owner
//! takes them with `pop_data`.

use crate::{CollectedEvent, EventExporter, ExportResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use vfsprobe_core::OperationKind;

/// Rows of one instrument table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionTable {
    pub name: &'static str,
    pub rows: Vec<CollectedEvent>,
}

impl CollectionTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Default)]
struct Rows {
    read: Vec<CollectedEvent>,
    write: Vec<CollectedEvent>,
}

impl Rows {
    fn side_mut(&mut self, kind: OperationKind) -> &mut Vec<CollectedEvent> {
        match kind {
            OperationKind::Read => &mut self.read,
            OperationKind::Write => &mut self.write,
        }
    }
}

/// Exporter that buffers rows in memory
#[derive(Debug, Default)]
pub struct CollectionBuffer {
    rows: Mutex<Rows>,
}

impl CollectionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, row: CollectedEvent) {
        self.rows.lock().side_mut(row.event.kind).push(row);
    }

    /// Snapshot of both tables, read first. Empty tables are included.
    pub fn data(&self) -> Vec<CollectionTable> {
        let rows = self.rows.lock();
        OperationKind::ALL
            .iter()
            .map(|kind| CollectionTable {
                name: kind.layout().table_name,
                rows: match kind {
                    OperationKind::Read => rows.read.clone(),
                    OperationKind::Write => rows.write.clone(),
                },
            })
            .collect()
    }

    pub fn clear(&self) {
        let mut rows = self.rows.lock();
        rows.read.clear();
        rows.write.clear();
    }

    /// Take every buffered row, leaving the buffer empty
    pub fn pop_data(&self) -> Vec<CollectionTable> {
        let taken = std::mem::take(&mut *self.rows.lock());
        vec![
            CollectionTable {
                name: OperationKind::Read.layout().table_name,
                rows: taken.read,
            },
            CollectionTable {
                name: OperationKind::Write.layout().table_name,
                rows: taken.write,
            },
        ]
    }

    /// Buffered rows across both tables
    pub fn len(&self) -> usize {
        let rows = self.rows.lock();
        rows.read.len() + rows.write.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventExporter for CollectionBuffer {
    fn name(&self) -> &str {
        "collection-buffer"
    }

    async fn export(&self, event: &CollectedEvent) -> ExportResult<()> {
        self.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::event;

    fn row(kind: OperationKind, tid: u32) -> CollectedEvent {
        CollectedEvent::new("run-1", event(kind, tid, 1))
    }

    #[test]
    fn test_groups_rows_per_table() {
        let buffer = CollectionBuffer::new();
        buffer.push(row(OperationKind::Read, 1));
        buffer.push(row(OperationKind::Write, 2));
        buffer.push(row(OperationKind::Read, 3));

        let tables = buffer.data();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].name, "vfs_read");
        assert_eq!(tables[0].len(), 2);
        assert_eq!(tables[1].name, "vfs_write");
        assert_eq!(tables[1].len(), 1);
        // data() leaves the rows in place
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_pop_data_takes_and_clears() {
        let buffer = CollectionBuffer::new();
        buffer.push(row(OperationKind::Write, 9));

        let tables = buffer.pop_data();
        assert_eq!(tables[1].rows[0].event.id.tid(), 9);
        assert!(buffer.is_empty());

        let again = buffer.pop_data();
        assert!(again.iter().all(CollectionTable::is_empty));
    }

    #[test]
    fn test_clear() {
        let buffer = CollectionBuffer::new();
        buffer.push(row(OperationKind::Read, 1));
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.data().iter().all(|t| t.is_empty()));
    }

    #[tokio::test]
    async fn test_export_appends() {
        let buffer = CollectionBuffer::new();
        buffer
            .export_batch(&[row(OperationKind::Read, 1), row(OperationKind::Read, 2)])
            .await
            .unwrap();
        assert_eq!(buffer.len(), 2);
    }
}
