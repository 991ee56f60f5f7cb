//! Target process filter shared by all instruments

use crate::events::ExecutionContextId;

/// Single-process filter. A target of zero accepts every process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessFilter {
    target_pid: u32,
}

impl ProcessFilter {
    pub const fn new(target_pid: u32) -> Self {
        Self { target_pid }
    }

    pub const fn accept_all() -> Self {
        Self { target_pid: 0 }
    }

    pub fn target_pid(&self) -> Option<u32> {
        (self.target_pid != 0).then_some(self.target_pid)
    }

    /// Exact match on the process id (tgid) half of the context
    #[inline]
    pub fn accepts(&self, id: ExecutionContextId) -> bool {
        self.target_pid == 0 || id.tgid() == self.target_pid
    }
}
