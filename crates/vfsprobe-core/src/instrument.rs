//! Instrument layouts: the field-mapping table for each VFS side
//!
//! The read and write instruments are the same engine. Everything that
//! differs between them (column names, attach targets, hook names) lives in
//! one static `InstrumentLayout` per side.

use crate::events::OperationKind;

/// Static description of one instrumented VFS entry point
#[derive(Debug)]
pub struct InstrumentLayout {
    pub kind: OperationKind,
    /// Collection table name
    pub table_name: &'static str,
    /// Name of the perf/ring output channel
    pub events_channel: &'static str,
    /// Function whose entry and return bracket the operation
    pub entry_symbol: &'static str,
    /// Probe points inside the entry symbol that dispatch to the direct path
    pub direct_probes: &'static [&'static str],
    /// Probe points that dispatch to the iterator path
    pub iterator_probes: &'static [&'static str],
    /// Probe point of the byte-accounting call that signals a transfer
    pub signal_probe: &'static str,
    /// Accounting hook reached through `signal_probe`
    pub signal_hook: &'static str,
    pub path_field: &'static str,
    pub direct_capability_field: &'static str,
    pub iterator_capability_field: &'static str,
}

/// Read side layout.
pub static VFS_READ: InstrumentLayout = InstrumentLayout {
    kind: OperationKind::Read,
    table_name: "vfs_read",
    events_channel: "vfs_read_events",
    entry_symbol: "vfs_read",
    direct_probes: &["vfs_read+0xaf"],
    iterator_probes: &["vfs_read+0x208", "vfs_read+0x310"],
    signal_probe: "vfs_read+0x11d",
    signal_hook: "add_rchar",
    path_field: "which_read",
    direct_capability_field: "has_read",
    iterator_capability_field: "has_read_iter",
};

/// Write side layout.
pub static VFS_WRITE: InstrumentLayout = InstrumentLayout {
    kind: OperationKind::Write,
    table_name: "vfs_write",
    events_channel: "vfs_write_events",
    entry_symbol: "vfs_write",
    direct_probes: &["vfs_write+0xfd"],
    iterator_probes: &["vfs_write+0x24f", "vfs_write+0x392"],
    signal_probe: "vfs_write+0x2e7",
    signal_hook: "add_wchar",
    path_field: "which_write",
    direct_capability_field: "has_write",
    iterator_capability_field: "has_write_iter",
};

/// Kind of probe attached at a target
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeKind {
    Kprobe,
    Kretprobe,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Kprobe => "kprobe",
            ProbeKind::Kretprobe => "kretprobe",
        }
    }
}

/// Handler a probe point feeds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerRole {
    Entry,
    DirectPath,
    IteratorPath,
    Signal,
    Finalize,
}

impl HandlerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerRole::Entry => "entry",
            HandlerRole::DirectPath => "direct_path",
            HandlerRole::IteratorPath => "iterator_path",
            HandlerRole::Signal => "signal",
            HandlerRole::Finalize => "finalize",
        }
    }
}

/// One attachment in an instrument's attach plan
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbeAttachment {
    pub probe: ProbeKind,
    pub target: &'static str,
    pub role: HandlerRole,
}

impl std::fmt::Display for ProbeAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:<9} {:<18} -> {}",
            self.probe.as_str(),
            self.target,
            self.role.as_str()
        )
    }
}

impl std::fmt::Display for InstrumentLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> channel {}, signal {} ({})",
            self.table_name, self.events_channel, self.signal_probe, self.signal_hook
        )
    }
}

impl InstrumentLayout {
    /// Where each handler is attached, in attach order.
    ///
    /// Offsets are specific to one kernel build and are reported as-is.
    pub fn attach_plan(&self) -> Vec<ProbeAttachment> {
        let mut plan = vec![
            ProbeAttachment {
                probe: ProbeKind::Kprobe,
                target: self.entry_symbol,
                role: HandlerRole::Entry,
            },
            ProbeAttachment {
                probe: ProbeKind::Kretprobe,
                target: self.entry_symbol,
                role: HandlerRole::Finalize,
            },
        ];
        plan.extend(self.direct_probes.iter().map(|&target| ProbeAttachment {
            probe: ProbeKind::Kprobe,
            target,
            role: HandlerRole::DirectPath,
        }));
        plan.extend(self.iterator_probes.iter().map(|&target| ProbeAttachment {
            probe: ProbeKind::Kprobe,
            target,
            role: HandlerRole::IteratorPath,
        }));
        plan.push(ProbeAttachment {
            probe: ProbeKind::Kprobe,
            target: self.signal_probe,
            role: HandlerRole::Signal,
        });
        plan
    }
}
