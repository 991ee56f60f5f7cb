//! Probe host: the layer the instrumentation triggers enter through
//!
//! Owns both instruments and the shared process filter. Triggers for
//! processes the filter rejects never reach an engine.

use crate::clock::{Clock, MonotonicClock};
use crate::config::ProbeConfig;
use crate::engine::{ReadEngine, TaskInfo, Trigger, WriteEngine};
use crate::events::OperationKind;
use crate::filter::ProcessFilter;
use crate::instrument::ProbeAttachment;
use crate::metrics::{create_metrics, EngineMetrics, SharedMetrics};
use crate::table::ContextTable;
use crate::transport::{self, EventReceiver, EventSink};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

/// Both VFS instruments behind one process filter
#[derive(Debug)]
pub struct VfsProbes {
    filter: ProcessFilter,
    read: ReadEngine,
    write: WriteEngine,
    metrics: SharedMetrics,
}

impl VfsProbes {
    /// Build both instruments sharing one sink and one clock.
    ///
    /// Each instrument gets its own context table sized from `config.table`.
    pub fn new(config: &ProbeConfig, sink: Arc<dyn EventSink>, clock: Arc<dyn Clock>) -> Self {
        let metrics = create_metrics();
        let table = || ContextTable::new(config.table.capacity, config.table.shards);

        let probes = Self {
            filter: ProcessFilter::new(config.filter.target_pid),
            read: ReadEngine::new(table(), sink.clone(), clock.clone(), metrics.clone()),
            write: WriteEngine::new(table(), sink, clock, metrics.clone()),
            metrics,
        };

        info!(
            "VFS probes ready: table capacity {} x2, {} shards, target pid {}",
            config.table.capacity,
            probes.read.shard_count(),
            probes
                .filter
                .target_pid()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "any".to_string())
        );
        probes
    }

    /// Build probes wired to a fresh bounded transport and a monotonic clock
    pub fn with_channel(config: &ProbeConfig) -> (Self, EventReceiver) {
        let (tx, rx) = transport::channel(config.transport.capacity);
        let probes = Self::new(config, Arc::new(tx), Arc::new(MonotonicClock::new()));
        (probes, rx)
    }

    /// Deliver one trigger, applying the process filter first
    pub fn fire(&self, kind: OperationKind, task: &TaskInfo, trigger: Trigger) {
        if !self.filter.accepts(task.id) {
            EngineMetrics::incr(&self.metrics.filtered);
            return;
        }
        match kind {
            OperationKind::Read => self.read.handle(task, trigger),
            OperationKind::Write => self.write.handle(task, trigger),
        }
    }

    pub fn filter(&self) -> ProcessFilter {
        self.filter
    }

    pub fn read(&self) -> &ReadEngine {
        &self.read
    }

    pub fn write(&self) -> &WriteEngine {
        &self.write
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    pub fn filtered(&self) -> u64 {
        self.metrics.filtered.load(Ordering::Relaxed)
    }

    /// In-flight contexts across both instruments
    pub fn live_contexts(&self) -> usize {
        self.read.live_contexts() + self.write.live_contexts()
    }

    /// Attach plans of both instruments, read side first
    pub fn attach_plan(&self) -> Vec<ProbeAttachment> {
        let mut plan = self.read.layout().attach_plan();
        plan.extend(self.write.layout().attach_plan());
        plan
    }

    /// Drop every in-flight context in both tables
    pub fn reset(&self) -> usize {
        let released = self.read.reset() + self.write.reset();
        if released > 0 {
            info!("Released {} in-flight contexts", released);
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::{BufferHandle, ChosenPath, Comm, ExecutionContextId, PathKind};

    fn build(target_pid: u32, capacity: usize) -> (VfsProbes, EventReceiver) {
        let mut config = ProbeConfig::default();
        config.filter.target_pid = target_pid;
        config.table.capacity = capacity;
        config.table.shards = 2;
        let (tx, rx) = transport::channel(64);
        let probes = VfsProbes::new(&config, Arc::new(tx), Arc::new(ManualClock::new(0)));
        (probes, rx)
    }

    fn task(tgid: u32, tid: u32) -> TaskInfo {
        TaskInfo::new(ExecutionContextId::new(tgid, tid), Comm::new("postgres"))
    }

    fn operation(probes: &VfsProbes, kind: OperationKind, task: &TaskInfo, path: PathKind) {
        probes.fire(
            kind,
            task,
            Trigger::Entry {
                file: None,
                buf: BufferHandle(0),
                count: 512,
            },
        );
        probes.fire(kind, task, Trigger::Path(path));
        probes.fire(kind, task, Trigger::Signal { amount: 512 });
        probes.fire(kind, task, Trigger::Exit { ret: 512 });
    }

    #[test]
    fn test_routes_by_kind() {
        let (probes, mut rx) = build(0, 8);
        operation(&probes, OperationKind::Read, &task(1, 1), PathKind::Direct);
        operation(&probes, OperationKind::Write, &task(1, 1), PathKind::Iterator);

        let events = rx.drain_ready();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, OperationKind::Read);
        assert_eq!(events[0].path, ChosenPath::Direct);
        assert_eq!(events[1].kind, OperationKind::Write);
        assert_eq!(events[1].path, ChosenPath::Iterator);
        assert_eq!(probes.metrics().read.snapshot().emitted, 1);
        assert_eq!(probes.metrics().write.snapshot().emitted, 1);
    }

    #[test]
    fn test_read_and_write_tables_are_independent() {
        let (probes, mut rx) = build(0, 8);
        let t = task(1, 1);
        probes.fire(
            OperationKind::Read,
            &t,
            Trigger::Entry {
                file: None,
                buf: BufferHandle(0),
                count: 1,
            },
        );
        // A write exit on the same thread does not finalize the read
        probes.fire(OperationKind::Write, &t, Trigger::Exit { ret: 1 });
        assert!(rx.drain_ready().is_empty());
        assert_eq!(probes.live_contexts(), 1);
    }

    #[test]
    fn test_filter_rejects_other_processes() {
        let (probes, mut rx) = build(500, 8);
        operation(&probes, OperationKind::Read, &task(42, 500), PathKind::Direct);
        assert!(rx.drain_ready().is_empty());
        assert_eq!(probes.filtered(), 4);
        assert_eq!(probes.metrics().read.snapshot().entries, 0);

        operation(&probes, OperationKind::Read, &task(500, 501), PathKind::Direct);
        assert_eq!(rx.drain_ready().len(), 1);
    }

    #[test]
    fn test_attach_plan_covers_both_sides() {
        let (probes, _rx) = build(0, 8);
        let plan = probes.attach_plan();
        assert_eq!(plan.len(), 12);
        assert_eq!(plan[0].target, "vfs_read");
        assert_eq!(plan[6].target, "vfs_write");
    }

    #[test]
    fn test_reset_releases_abandoned_contexts() {
        let (probes, mut rx) = build(0, 8);
        for tid in 0..3 {
            probes.fire(
                OperationKind::Write,
                &task(1, tid),
                Trigger::Entry {
                    file: None,
                    buf: BufferHandle(0),
                    count: 1,
                },
            );
        }
        assert_eq!(probes.live_contexts(), 3);
        assert_eq!(probes.reset(), 3);
        assert_eq!(probes.live_contexts(), 0);
        probes.fire(OperationKind::Write, &task(1, 0), Trigger::Exit { ret: 1 });
        assert!(rx.drain_ready().is_empty());
    }
}
