//! Drain loop: the consumer end of the event transport

use crate::{CollectedEvent, EventExporter};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use vfsprobe_core::{CompletedOperationEvent, EventReceiver};

/// Counters reported when a drain finishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrainStats {
    /// Events taken off the transport
    pub received: u64,
    /// Successful (event, exporter) deliveries
    pub exported: u64,
    /// Failed deliveries plus failed final flushes
    pub export_errors: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DrainStats {
    fn started() -> Self {
        let now = Utc::now();
        Self {
            received: 0,
            exported: 0,
            export_errors: 0,
            started_at: now,
            finished_at: now,
        }
    }
}

/// Fans events from the transport out to every exporter
pub struct EventDrain {
    collection_id: String,
    exporters: Vec<Arc<dyn EventExporter>>,
}

impl EventDrain {
    pub fn new(collection_id: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            exporters: Vec::new(),
        }
    }

    pub fn add_exporter(&mut self, exporter: Arc<dyn EventExporter>) {
        self.exporters.push(exporter);
    }

    pub fn with_exporter(mut self, exporter: Arc<dyn EventExporter>) -> Self {
        self.add_exporter(exporter);
        self
    }

    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    pub fn exporter_count(&self) -> usize {
        self.exporters.len()
    }

    /// Run until a shutdown signal arrives or every producer is gone.
    ///
    /// Events already queued when the loop stops are still exported, then
    /// every exporter is flushed. A dropped shutdown sender counts as a
    /// shutdown signal. Exporter failures are logged and counted only.
    pub async fn run(
        self,
        mut events: EventReceiver,
        mut shutdown: broadcast::Receiver<()>,
    ) -> DrainStats {
        let mut stats = DrainStats::started();
        info!(
            "Event drain started: collection {}, {} exporters",
            self.collection_id,
            self.exporters.len()
        );

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event, &mut stats).await,
                    None => {
                        debug!("All producers gone");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    info!("Drain shutdown signal received");
                    break;
                }
            }
        }

        events.close();
        let mut leftover = 0u64;
        while let Some(event) = events.try_recv() {
            self.dispatch(event, &mut stats).await;
            leftover += 1;
        }
        if leftover > 0 {
            debug!("Drained {} queued events after stop", leftover);
        }

        for exporter in &self.exporters {
            if let Err(e) = exporter.flush().await {
                warn!("Flush failed for {}: {}", exporter.name(), e);
                stats.export_errors += 1;
            }
        }

        stats.finished_at = Utc::now();
        info!(
            "Event drain stopped: {} received, {} exported, {} errors",
            stats.received, stats.exported, stats.export_errors
        );
        stats
    }

    async fn dispatch(&self, event: CompletedOperationEvent, stats: &mut DrainStats) {
        stats.received += 1;
        let row = CollectedEvent::new(self.collection_id.clone(), event);
        for exporter in &self.exporters {
            match exporter.export(&row).await {
                Ok(()) => stats.exported += 1,
                Err(e) => {
                    debug!("Export error in {}: {}", exporter.name(), e);
                    stats.export_errors += 1;
                }
            }
        }
    }
}
