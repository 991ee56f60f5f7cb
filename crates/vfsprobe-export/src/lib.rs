//! Consumers of the event transport
//!
//! The probes push completed events into a bounded channel; everything on the
//! other side of that channel lives here. `EventDrain` reads the channel,
//! tags each event with the collection id and hands it to every registered
//! `EventExporter`.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use vfsprobe_core::CompletedOperationEvent;

pub mod collection;
pub mod drain;
#[cfg(feature = "jsonl")]
pub mod jsonl;

pub use collection::{CollectionBuffer, CollectionTable};
pub use drain::{DrainStats, EventDrain};
#[cfg(feature = "jsonl")]
pub use jsonl::{JsonlExporter, JsonlExporterConfig};

/// Export errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Export failed: {0}")]
    OperationFailed(String),
}

pub type ExportResult<T> = Result<T, ExportError>;

/// A completed event tagged with the collection run it belongs to.
///
/// Serializes as one flat row: the event's columns plus `collection_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectedEvent {
    pub collection_id: String,
    #[serde(flatten)]
    pub event: CompletedOperationEvent,
}

impl CollectedEvent {
    pub fn new(collection_id: impl Into<String>, event: CompletedOperationEvent) -> Self {
        Self {
            collection_id: collection_id.into(),
            event,
        }
    }

    /// Table this row belongs to (`vfs_read` or `vfs_write`)
    pub fn table_name(&self) -> &'static str {
        self.event.layout().table_name
    }
}

/// Destination for collected events
#[async_trait]
pub trait EventExporter: Send + Sync {
    fn name(&self) -> &str;

    /// Export one event
    async fn export(&self, event: &CollectedEvent) -> ExportResult<()>;

    /// Export multiple events (batch)
    async fn export_batch(&self, events: &[CollectedEvent]) -> ExportResult<()> {
        for event in events {
            self.export(event).await?;
        }
        Ok(())
    }

    /// Flush any buffered events
    async fn flush(&self) -> ExportResult<()> {
        Ok(())
    }
}
