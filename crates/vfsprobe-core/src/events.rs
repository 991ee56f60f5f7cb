//! Operation records shared between the probe handlers and event consumers
//!
//! `OperationContext` is the in-flight state a handler keeps per thread;
//! `CompletedOperationEvent` is the immutable snapshot emitted on finalize.
//! Both are plain `Copy` values so moving them through the context table and
//! the transport never allocates.

use crate::instrument::InstrumentLayout;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Command name length (matches TASK_COMM_LEN in kernel)
pub const COMM_LEN: usize = 16;

/// Execution context identifier: the kernel's `pid_tgid` value
///
/// Upper 32 bits hold the process id (tgid), lower 32 bits the thread id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionContextId(u64);

impl ExecutionContextId {
    pub const fn from_pid_tgid(pid_tgid: u64) -> Self {
        Self(pid_tgid)
    }

    pub const fn new(tgid: u32, tid: u32) -> Self {
        Self(((tgid as u64) << 32) | tid as u64)
    }

    /// Raw `pid_tgid` value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Process id (thread group id)
    pub const fn tgid(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Thread id (what the kernel calls pid)
    pub const fn tid(&self) -> u32 {
        self.0 as u32
    }
}

impl std::fmt::Display for ExecutionContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tgid(), self.tid())
    }
}

/// Fixed-length, NUL-padded process name snapshot
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Comm([u8; COMM_LEN]);

impl Comm {
    pub const fn from_bytes(bytes: [u8; COMM_LEN]) -> Self {
        Self(bytes)
    }

    /// Snapshot a name, truncating it to leave room for the terminating NUL
    pub fn new(name: &str) -> Self {
        let mut bytes = [0u8; COMM_LEN];
        let src = name.as_bytes();
        let len = src.len().min(COMM_LEN - 1);
        bytes[..len].copy_from_slice(&src[..len]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; COMM_LEN] {
        &self.0
    }

    /// Get process command name as string
    pub fn to_string_lossy(&self) -> String {
        let end = self.0.iter().position(|&c| c == 0).unwrap_or(COMM_LEN);
        String::from_utf8_lossy(&self.0[..end]).to_string()
    }
}

impl std::fmt::Debug for Comm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

/// Opaque user buffer address. Carried for diagnostics, never dereferenced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BufferHandle(pub u64);

/// Which side of the VFS an operation belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Read,
    Write,
}

impl OperationKind {
    pub const ALL: [OperationKind; 2] = [OperationKind::Read, OperationKind::Write];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Write => "write",
        }
    }

    /// Field-mapping table for this side
    pub fn layout(&self) -> &'static InstrumentLayout {
        match self {
            OperationKind::Read => &crate::instrument::VFS_READ,
            OperationKind::Write => &crate::instrument::VFS_WRITE,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kernel entry point that served an operation
///
/// Numeric codes match the kernel-side encoding (0 = unclassified,
/// 1 = `.read`/`.write`, 2 = `.read_iter`/`.write_iter`).
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ChosenPath {
    #[default]
    Unclassified = 0,
    Direct = 1,
    Iterator = 2,
}

impl ChosenPath {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// Path a classifier probe reports; one handler exists per variant
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathKind {
    Direct,
    Iterator,
}

impl From<PathKind> for ChosenPath {
    fn from(kind: PathKind) -> Self {
        match kind {
            PathKind::Direct => ChosenPath::Direct,
            PathKind::Iterator => ChosenPath::Iterator,
        }
    }
}

/// Capability table of the target file, as seen through `file->f_op`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct FileOperations {
    /// Implements the direct entry point (`.read` / `.write`)
    pub direct: bool,
    /// Implements the iterator entry point (`.read_iter` / `.write_iter`)
    pub iterator: bool,
}

/// Capability flags sampled at entry. Diagnostic only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CapabilityFlags {
    pub supports_direct: bool,
    pub supports_iterator: bool,
}

impl CapabilityFlags {
    /// Sample the file's operations table; a missing file samples as neither
    pub fn sample(file: Option<&FileOperations>) -> Self {
        match file {
            Some(ops) => Self {
                supports_direct: ops.direct,
                supports_iterator: ops.iterator,
            },
            None => Self::default(),
        }
    }
}

/// Per-operation state held in the context table between entry and exit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationContext {
    pub id: ExecutionContextId,
    pub kind: OperationKind,
    pub count: u64,
    pub buf: BufferHandle,
    pub capabilities: CapabilityFlags,
    pub path: ChosenPath,
    pub completed: bool,
    pub start_ns: u64,
    pub comm: Comm,
}

impl OperationContext {
    /// Stamp the exit and freeze the context into an event
    pub fn finalize(self, ret: i64, return_ns: u64) -> CompletedOperationEvent {
        CompletedOperationEvent {
            id: self.id,
            comm: self.comm,
            kind: self.kind,
            count: self.count,
            buf: self.buf,
            capabilities: self.capabilities,
            path: self.path,
            success: self.completed,
            ret,
            start_ns: self.start_ns,
            return_ns,
        }
    }
}

/// Immutable record of one finished read or write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompletedOperationEvent {
    pub id: ExecutionContextId,
    pub comm: Comm,
    pub kind: OperationKind,
    /// Requested byte count
    pub count: u64,
    pub buf: BufferHandle,
    pub capabilities: CapabilityFlags,
    pub path: ChosenPath,
    pub success: bool,
    /// Positive = bytes transferred, zero = no data, negative = -errno
    pub ret: i64,
    pub start_ns: u64,
    pub return_ns: u64,
}

impl CompletedOperationEvent {
    pub fn latency_ns(&self) -> u64 {
        self.return_ns.saturating_sub(self.start_ns)
    }

    pub fn layout(&self) -> &'static InstrumentLayout {
        self.kind.layout()
    }
}

/// Serialized as one flat row using the side's column names
/// (`which_read` vs `which_write` and so on).
impl Serialize for CompletedOperationEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let layout = self.layout();
        let mut map = serializer.serialize_map(Some(13))?;
        map.serialize_entry("kind", self.kind.as_str())?;
        map.serialize_entry("pid", &self.id.tid())?;
        map.serialize_entry("tgid", &self.id.tgid())?;
        map.serialize_entry("comm", &self.comm.to_string_lossy())?;
        map.serialize_entry("count", &self.count)?;
        map.serialize_entry("buf", &self.buf.0)?;
        map.serialize_entry("ret", &self.ret)?;
        map.serialize_entry(
            layout.direct_capability_field,
            &u8::from(self.capabilities.supports_direct),
        )?;
        map.serialize_entry(
            layout.iterator_capability_field,
            &u8::from(self.capabilities.supports_iterator),
        )?;
        map.serialize_entry(layout.path_field, &self.path.code())?;
        map.serialize_entry("success", &u8::from(self.success))?;
        map.serialize_entry("ts_ns", &self.start_ns)?;
        map.serialize_entry("ret_ts_ns", &self.return_ns)?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(kind: OperationKind) -> CompletedOperationEvent {
        OperationContext {
            id: ExecutionContextId::new(4242, 4243),
            kind,
            count: 100,
            buf: BufferHandle(0x7ffd_0000_1000),
            capabilities: CapabilityFlags {
                supports_direct: false,
                supports_iterator: true,
            },
            path: ChosenPath::Iterator,
            completed: true,
            start_ns: 1_000,
            comm: Comm::new("read_iter_test"),
        }
        .finalize(14, 1_750)
    }

    #[test]
    fn test_execution_context_id_halves() {
        let id = ExecutionContextId::new(100, 101);
        assert_eq!(id.tgid(), 100);
        assert_eq!(id.tid(), 101);
        assert_eq!(ExecutionContextId::from_pid_tgid(id.as_u64()), id);
        assert_eq!(id.to_string(), "100/101");
    }

    #[test]
    fn test_comm_truncates_to_fit_nul() {
        let comm = Comm::new("a-very-long-process-name");
        assert_eq!(comm.to_string_lossy(), "a-very-long-pro");
        assert_eq!(comm.as_bytes()[COMM_LEN - 1], 0);
        assert_eq!(Comm::new("cat").to_string_lossy(), "cat");
    }

    #[test]
    fn test_capabilities_without_file() {
        assert_eq!(CapabilityFlags::sample(None), CapabilityFlags::default());
        let ops = FileOperations {
            direct: true,
            iterator: false,
        };
        let caps = CapabilityFlags::sample(Some(&ops));
        assert!(caps.supports_direct);
        assert!(!caps.supports_iterator);
    }

    #[test]
    fn test_finalize_carries_context() {
        let event = sample_event(OperationKind::Read);
        assert_eq!(event.count, 100);
        assert_eq!(event.ret, 14);
        assert!(event.success);
        assert_eq!(event.path, ChosenPath::Iterator);
        assert_eq!(event.latency_ns(), 750);
    }

    #[test]
    fn test_serialize_uses_read_columns() {
        let json = serde_json::to_value(sample_event(OperationKind::Read)).unwrap();
        assert_eq!(json["which_read"], 2);
        assert_eq!(json["has_read"], 0);
        assert_eq!(json["has_read_iter"], 1);
        assert_eq!(json["pid"], 4243);
        assert_eq!(json["tgid"], 4242);
        assert_eq!(json["comm"], "read_iter_test");
        assert_eq!(json["success"], 1);
        assert!(json.get("which_write").is_none());
    }

    #[test]
    fn test_serialize_uses_write_columns() {
        let json = serde_json::to_value(sample_event(OperationKind::Write)).unwrap();
        assert_eq!(json["kind"], "write");
        assert_eq!(json["which_write"], 2);
        assert_eq!(json["has_write_iter"], 1);
        assert!(json.get("which_read").is_none());
    }
}
