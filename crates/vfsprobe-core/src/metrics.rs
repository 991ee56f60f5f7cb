//! Drop and throughput counters for the probe handlers
//!
//! Handlers never report failures to their caller. Every silent no-op
//! (missing context, full table, full transport) lands in one of these
//! counters instead, which makes loss observable in aggregate.

use crate::events::OperationKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Per-instrument counters
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Entry handler runs
    pub entries: AtomicU64,
    /// Entries that replaced a stale context for the same key
    pub overwritten: AtomicU64,
    /// Entries dropped because the table was full
    pub table_full: AtomicU64,
    /// Classifier runs that tagged a live context
    pub classified: AtomicU64,
    /// Signal runs that tagged a live context
    pub signalled: AtomicU64,
    /// Classifier, signal or finalize runs with no live context
    pub missing_context: AtomicU64,
    /// Events handed to the transport
    pub emitted: AtomicU64,
    /// Events the transport refused
    pub transport_dropped: AtomicU64,
}

impl EngineMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            entries: self.entries.load(Ordering::Relaxed),
            overwritten: self.overwritten.load(Ordering::Relaxed),
            table_full: self.table_full.load(Ordering::Relaxed),
            classified: self.classified.load(Ordering::Relaxed),
            signalled: self.signalled.load(Ordering::Relaxed),
            missing_context: self.missing_context.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            transport_dropped: self.transport_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of `EngineMetrics`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineMetricsSnapshot {
    pub entries: u64,
    pub overwritten: u64,
    pub table_full: u64,
    pub classified: u64,
    pub signalled: u64,
    pub missing_context: u64,
    pub emitted: u64,
    pub transport_dropped: u64,
}

impl EngineMetricsSnapshot {
    fn counters(&self) -> [(&'static str, &'static str, u64); 8] {
        [
            ("entries", "Entry handler runs", self.entries),
            ("overwritten", "Stale contexts overwritten at entry", self.overwritten),
            ("table_full", "Entries dropped because the context table was full", self.table_full),
            ("classified", "Contexts tagged with a dispatch path", self.classified),
            ("signalled", "Contexts tagged as successfully transferred", self.signalled),
            ("missing_context", "Triggers that found no live context", self.missing_context),
            ("emitted", "Completed events handed to the transport", self.emitted),
            ("transport_dropped", "Completed events refused by a full or closed transport", self.transport_dropped),
        ]
    }
}

/// Metrics for both instruments plus the shared process filter
#[derive(Debug)]
pub struct MetricsCollector {
    /// When the collector was started
    start_time: Instant,
    pub read: EngineMetrics,
    pub write: EngineMetrics,
    /// Triggers rejected by the process filter
    pub filtered: AtomicU64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            read: EngineMetrics::default(),
            write: EngineMetrics::default(),
            filtered: AtomicU64::new(0),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn engine(&self, kind: OperationKind) -> &EngineMetrics {
        match kind {
            OperationKind::Read => &self.read,
            OperationKind::Write => &self.write,
        }
    }

    /// Export metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP vfsprobe_uptime_seconds Time since probes were created\n");
        output.push_str("# TYPE vfsprobe_uptime_seconds gauge\n");
        output.push_str(&format!(
            "vfsprobe_uptime_seconds {}\n\n",
            self.uptime_seconds()
        ));

        let snapshots = [
            (OperationKind::Read, self.read.snapshot()),
            (OperationKind::Write, self.write.snapshot()),
        ];
        for (index, (name, help, _)) in EngineMetricsSnapshot::default()
            .counters()
            .iter()
            .enumerate()
        {
            output.push_str(&format!("# HELP vfsprobe_{}_total {}\n", name, help));
            output.push_str(&format!("# TYPE vfsprobe_{}_total counter\n", name));
            for (kind, snapshot) in &snapshots {
                output.push_str(&format!(
                    "vfsprobe_{}_total{{op=\"{}\"}} {}\n",
                    name,
                    kind,
                    snapshot.counters()[index].2
                ));
            }
            output.push('\n');
        }

        output.push_str("# HELP vfsprobe_filtered_total Triggers rejected by the process filter\n");
        output.push_str("# TYPE vfsprobe_filtered_total counter\n");
        output.push_str(&format!(
            "vfsprobe_filtered_total {}\n",
            self.filtered.load(Ordering::Relaxed)
        ));

        output
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        let engine_json = |snapshot: EngineMetricsSnapshot| {
            serde_json::Value::Object(
                snapshot
                    .counters()
                    .iter()
                    .map(|(name, _, value)| (name.to_string(), serde_json::json!(value)))
                    .collect(),
            )
        };

        serde_json::json!({
            "uptime_seconds": self.uptime_seconds(),
            "filtered": self.filtered.load(Ordering::Relaxed),
            "read": engine_json(self.read.snapshot()),
            "write": engine_json(self.write.snapshot()),
        })
    }
}

/// Shared metrics instance
pub type SharedMetrics = Arc<MetricsCollector>;

/// Create a new shared metrics collector
pub fn create_metrics() -> SharedMetrics {
    Arc::new(MetricsCollector::new())
}
