//! Trigger sources
//!
//! Anything that turns observed VFS activity into probe triggers lives here.
//! Without a kernel loader the only source is the synthetic workload, which
//! is what `demo` mode and the end-to-end tests run on.

pub mod synthetic;

pub use synthetic::{
    OperationMix, Sequence, SyntheticWorkload, SyntheticWorkloadConfig, WorkloadError,
    WorkloadReport,
};
