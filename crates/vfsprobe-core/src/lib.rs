//! vfsprobe core - correlation engine for VFS read/write telemetry
//!
//! A single `vfs_read` or `vfs_write` call is observed through several probe
//! points that fire independently: entry, an optional dispatch-path probe,
//! an optional byte-accounting signal, and the return. This crate stitches
//! those fragments into one `CompletedOperationEvent` per call:
//!
//! - **Table**: fixed-capacity, sharded per-thread context store
//! - **Engine**: entry / classifier / signal / finalize handlers, generic
//!   over the read and write sides
//! - **Instrument**: per-side field-mapping table and attach plan
//! - **Probes**: host layer applying the process filter
//! - **Transport**: bounded, fire-and-forget event channel
//! - **Metrics**: the counters that make silent loss observable

pub mod clock;
pub mod config;
pub mod engine;
pub mod events;
pub mod filter;
pub mod instrument;
pub mod metrics;
pub mod probes;
pub mod table;
pub mod transport;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ConfigLoader, ProbeConfig};
pub use engine::{
    CorrelationEngine, OperationSide, ReadEngine, ReadSide, TaskInfo, Trigger, WriteEngine,
    WriteSide,
};
pub use events::{
    BufferHandle, CapabilityFlags, ChosenPath, Comm, CompletedOperationEvent, ExecutionContextId,
    FileOperations, OperationContext, OperationKind, PathKind,
};
pub use filter::ProcessFilter;
pub use instrument::{InstrumentLayout, VFS_READ, VFS_WRITE};
pub use metrics::{MetricsCollector, SharedMetrics};
pub use probes::VfsProbes;
pub use table::{ContextTable, TableError};
pub use transport::{ChannelTransport, EmitError, EventReceiver, EventSink};

/// Probe version
pub const PROBE_VERSION: &str = env!("CARGO_PKG_VERSION");
