//! Multi-probe correlation engine
//!
//! One logical read or write is observed through several independent
//! triggers on the same thread:
//!
//! ```text
//! entry ──► [direct | iterator path]? ──► [signal]? ──► exit
//!   │                 │                      │            │
//!   upsert         with_mut               with_mut      remove + emit
//! ```
//!
//! The entry handler opens a context keyed by the execution context id,
//! classifier and signal handlers tag it in place, and the finalize handler
//! removes it and emits exactly one `CompletedOperationEvent`. Every failure
//! is a counted no-op: a handler never blocks, retries, or reports an error
//! to the traced program.
//!
//! The read and write instruments are the same engine instantiated over
//! `ReadSide` and `WriteSide`.

use crate::clock::Clock;
use crate::events::{
    BufferHandle, CapabilityFlags, ChosenPath, Comm, ExecutionContextId, FileOperations,
    OperationContext, PathKind,
};
use crate::instrument::{InstrumentLayout, VFS_READ, VFS_WRITE};
use crate::metrics::{EngineMetrics, SharedMetrics};
use crate::table::{ContextTable, Upsert};
use crate::transport::EventSink;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

/// Selects the field-mapping table an engine runs with
pub trait OperationSide: Send + Sync + 'static {
    fn layout() -> &'static InstrumentLayout;
}

/// `vfs_read` instrument
#[derive(Debug, Clone, Copy)]
pub struct ReadSide;

impl OperationSide for ReadSide {
    fn layout() -> &'static InstrumentLayout {
        &VFS_READ
    }
}

/// `vfs_write` instrument
#[derive(Debug, Clone, Copy)]
pub struct WriteSide;

impl OperationSide for WriteSide {
    fn layout() -> &'static InstrumentLayout {
        &VFS_WRITE
    }
}

/// What the host knows about the thread a trigger fired on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: ExecutionContextId,
    pub comm: Comm,
}

impl TaskInfo {
    pub fn new(id: ExecutionContextId, comm: Comm) -> Self {
        Self { id, comm }
    }
}

/// One firing of a probe point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Function entry with its arguments
    Entry {
        file: Option<FileOperations>,
        buf: BufferHandle,
        count: u64,
    },
    /// Dispatch to one of the two kernel entry points
    Path(PathKind),
    /// Byte-accounting call; only its occurrence matters
    Signal { amount: i64 },
    /// Function return
    Exit { ret: i64 },
}

/// Correlates entry, classifier, signal and exit triggers into completed events
pub struct CorrelationEngine<S: OperationSide> {
    table: ContextTable<OperationContext>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    metrics: SharedMetrics,
    _side: PhantomData<fn() -> S>,
}

/// Read-side instantiation
pub type ReadEngine = CorrelationEngine<ReadSide>;

/// Write-side instantiation
pub type WriteEngine = CorrelationEngine<WriteSide>;

impl<S: OperationSide> CorrelationEngine<S> {
    pub fn new(
        table: ContextTable<OperationContext>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            table,
            sink,
            clock,
            metrics,
            _side: PhantomData,
        }
    }

    pub fn layout(&self) -> &'static InstrumentLayout {
        S::layout()
    }

    fn counters(&self) -> &EngineMetrics {
        self.metrics.engine(S::layout().kind)
    }

    /// Route a trigger to its handler
    pub fn handle(&self, task: &TaskInfo, trigger: Trigger) {
        match trigger {
            Trigger::Entry { file, buf, count } => self.on_entry(task, file.as_ref(), buf, count),
            Trigger::Path(path) => self.on_path(task, path),
            Trigger::Signal { amount } => self.on_signal(task, amount),
            Trigger::Exit { ret } => self.on_exit(task, ret),
        }
    }

    /// Entry handler: open a fresh context, replacing any stale one for this thread.
    pub fn on_entry(
        &self,
        task: &TaskInfo,
        file: Option<&FileOperations>,
        buf: BufferHandle,
        count: u64,
    ) {
        let counters = self.counters();
        EngineMetrics::incr(&counters.entries);

        let context = OperationContext {
            id: task.id,
            kind: S::layout().kind,
            count,
            buf,
            capabilities: CapabilityFlags::sample(file),
            path: ChosenPath::Unclassified,
            completed: false,
            start_ns: self.clock.now_ns(),
            comm: task.comm,
        };

        match self.table.upsert(task.id, context) {
            Ok(Upsert::Inserted) => {}
            Ok(Upsert::Replaced) => {
                trace!(key = %task.id, op = S::layout().table_name, "stale context overwritten");
                EngineMetrics::incr(&counters.overwritten);
            }
            Err(e) => {
                trace!(key = %task.id, op = S::layout().table_name, "entry untracked: {}", e);
                EngineMetrics::incr(&counters.table_full);
            }
        }
    }

    /// Classifier handler: record which entry point served the operation.
    pub fn on_path(&self, task: &TaskInfo, path: PathKind) {
        let counters = self.counters();
        match self.table.with_mut(task.id, |ctx| ctx.path = path.into()) {
            Some(()) => EngineMetrics::incr(&counters.classified),
            None => self.missing(task, "path"),
        }
    }

    pub fn on_direct_path(&self, task: &TaskInfo) {
        self.on_path(task, PathKind::Direct)
    }

    pub fn on_iterator_path(&self, task: &TaskInfo) {
        self.on_path(task, PathKind::Iterator)
    }

    /// Completion signal handler. The amount is not consumed.
    pub fn on_signal(&self, task: &TaskInfo, _amount: i64) {
        let counters = self.counters();
        match self.table.with_mut(task.id, |ctx| ctx.completed = true) {
            Some(()) => EngineMetrics::incr(&counters.signalled),
            None => self.missing(task, "signal"),
        }
    }

    /// Finalize handler: remove the context, stamp it, and emit it.
    ///
    /// Removal happens before the emit, so a full or closed transport can
    /// never leave the context behind.
    pub fn on_exit(&self, task: &TaskInfo, ret: i64) {
        let Some(context) = self.table.remove(task.id) else {
            self.missing(task, "exit");
            return;
        };

        let event = context.finalize(ret, self.clock.now_ns());
        let counters = self.counters();
        match self.sink.emit(event) {
            Ok(()) => EngineMetrics::incr(&counters.emitted),
            Err(e) => {
                trace!(key = %task.id, op = S::layout().table_name, "event dropped: {}", e);
                EngineMetrics::incr(&counters.transport_dropped);
            }
        }
    }

    fn missing(&self, task: &TaskInfo, trigger: &'static str) {
        trace!(key = %task.id, op = S::layout().table_name, trigger, "no live context");
        EngineMetrics::incr(&self.counters().missing_context);
    }

    /// Number of in-flight contexts
    pub fn live_contexts(&self) -> usize {
        self.table.len()
    }

    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    pub fn shard_count(&self) -> usize {
        self.table.shard_count()
    }

    /// Copy of the in-flight context for a thread
    pub fn context(&self, id: ExecutionContextId) -> Option<OperationContext> {
        self.table.lookup(id)
    }

    /// Release every in-flight context. Returns how many were dropped.
    pub fn reset(&self) -> usize {
        self.table.clear()
    }
}

impl<S: OperationSide> std::fmt::Debug for CorrelationEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationEngine")
            .field("side", &S::layout().table_name)
            .field("table", &self.table)
            .finish()
    }
}
