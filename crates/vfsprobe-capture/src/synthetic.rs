//! Synthetic workload generator
//!
//! Drives `VfsProbes` from plain OS threads the same way the kernel would:
//! every worker is one thread of a single synthetic process, and each
//! operation it issues fires the trigger sequence of one VFS call in
//! program order. No eBPF or root privileges needed, which makes this the
//! trigger source for demo mode and CI.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};
use vfsprobe_core::{
    BufferHandle, Comm, ExecutionContextId, FileOperations, OperationKind, PathKind, TaskInfo,
    Trigger, VfsProbes,
};

/// Errno values a failed operation returns with
const FAILURE_ERRNOS: [i64; 4] = [5, 9, 14, 22]; // EIO, EBADF, EFAULT, EINVAL

/// Largest request size issued
const MAX_COUNT: u64 = 64 * 1024;

#[derive(Error, Debug)]
pub enum WorkloadError {
    #[error("Invalid workload configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Worker thread {0} panicked")]
    WorkerPanicked(usize),
}

/// Configuration for synthetic workload generation
#[derive(Debug, Clone)]
pub struct SyntheticWorkloadConfig {
    /// Process id (tgid) of the synthetic process
    pub pid: u32,

    /// Process name reported as `comm`
    pub comm: String,

    /// Number of worker threads
    pub threads: usize,

    /// Operations issued by each worker
    pub ops_per_thread: u64,

    /// Probability that an operation is a read
    pub read_ratio: f64,

    /// Seed for path and size selection; worker `i` uses `seed + i`
    pub seed: u64,

    /// Pause between operations in microseconds (0 = none)
    pub interval_us: u64,
}

impl Default for SyntheticWorkloadConfig {
    fn default() -> Self {
        Self {
            pid: 4242,
            comm: "vfsprobe-demo".to_string(),
            threads: 4,
            ops_per_thread: 1000,
            read_ratio: 0.5,
            seed: 0x5eed,
            interval_us: 0,
        }
    }
}

/// Trigger sequence of one synthetic VFS call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence {
    /// Served by `.read`/`.write`, bytes accounted
    DirectSuccess,
    /// Served by `.read_iter`/`.write_iter`, bytes accounted
    IteratorSuccess,
    /// Neither classifier fires, bytes still accounted
    Unclassified,
    /// Dispatched directly but returns an errno; no accounting call
    Failed,
}

impl Sequence {
    pub const ALL: [Sequence; 4] = [
        Sequence::DirectSuccess,
        Sequence::IteratorSuccess,
        Sequence::Unclassified,
        Sequence::Failed,
    ];

    /// Triggers in the order the probes would fire them
    pub fn triggers(&self, buf: BufferHandle, count: u64, ret: i64) -> Vec<Trigger> {
        let entry = |file| Trigger::Entry { file, buf, count };
        match self {
            Sequence::DirectSuccess => vec![
                entry(Some(FileOperations {
                    direct: true,
                    iterator: false,
                })),
                Trigger::Path(PathKind::Direct),
                Trigger::Signal { amount: ret },
                Trigger::Exit { ret },
            ],
            Sequence::IteratorSuccess => vec![
                entry(Some(FileOperations {
                    direct: false,
                    iterator: true,
                })),
                Trigger::Path(PathKind::Iterator),
                Trigger::Signal { amount: ret },
                Trigger::Exit { ret },
            ],
            Sequence::Unclassified => vec![
                entry(None),
                Trigger::Signal { amount: ret },
                Trigger::Exit { ret },
            ],
            Sequence::Failed => vec![
                entry(Some(FileOperations {
                    direct: true,
                    iterator: true,
                })),
                Trigger::Path(PathKind::Direct),
                Trigger::Exit { ret },
            ],
        }
    }

    /// Whether the accounting signal fires for this sequence
    pub fn signals(&self) -> bool {
        !matches!(self, Sequence::Failed)
    }
}

/// Operations issued per sequence for one side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationMix {
    pub direct: u64,
    pub iterator: u64,
    pub unclassified: u64,
    pub failed: u64,
}

impl OperationMix {
    fn record(&mut self, sequence: Sequence) {
        match sequence {
            Sequence::DirectSuccess => self.direct += 1,
            Sequence::IteratorSuccess => self.iterator += 1,
            Sequence::Unclassified => self.unclassified += 1,
            Sequence::Failed => self.failed += 1,
        }
    }

    fn merge(&mut self, other: &OperationMix) {
        self.direct += other.direct;
        self.iterator += other.iterator;
        self.unclassified += other.unclassified;
        self.failed += other.failed;
    }

    pub fn total(&self) -> u64 {
        self.direct + self.iterator + self.unclassified + self.failed
    }

    /// Operations whose event should report success
    pub fn successes(&self) -> u64 {
        self.direct + self.iterator + self.unclassified
    }
}

/// What a workload run issued
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkloadReport {
    pub read: OperationMix,
    pub write: OperationMix,
    pub threads: usize,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl WorkloadReport {
    pub fn mix(&self, kind: OperationKind) -> &OperationMix {
        match kind {
            OperationKind::Read => &self.read,
            OperationKind::Write => &self.write,
        }
    }

    fn mix_mut(&mut self, kind: OperationKind) -> &mut OperationMix {
        match kind {
            OperationKind::Read => &mut self.read,
            OperationKind::Write => &mut self.write,
        }
    }

    pub fn total(&self) -> u64 {
        self.read.total() + self.write.total()
    }
}

/// Multi-threaded synthetic trigger source
pub struct SyntheticWorkload {
    config: SyntheticWorkloadConfig,
    running: Arc<AtomicBool>,
}

impl SyntheticWorkload {
    pub fn new() -> Self {
        Self::with_config(SyntheticWorkloadConfig::default())
    }

    pub fn with_config(config: SyntheticWorkloadConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn config(&self) -> &SyntheticWorkloadConfig {
        &self.config
    }

    /// Ask running workers to stop after their current operation
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Shared stop flag, for stopping from another task
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    fn validate(&self) -> Result<(), WorkloadError> {
        if self.config.threads == 0 {
            return Err(WorkloadError::InvalidConfig(
                "threads must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.config.read_ratio) {
            return Err(WorkloadError::InvalidConfig(format!(
                "read_ratio must be within 0.0..=1.0, got {}",
                self.config.read_ratio
            )));
        }
        Ok(())
    }

    /// Run every worker to completion (or until stopped) and report what was issued.
    ///
    /// Blocks the calling thread; call from `spawn_blocking` in async code.
    pub fn run(&self, probes: &VfsProbes) -> Result<WorkloadReport, WorkloadError> {
        self.validate()?;

        info!(
            "Starting synthetic workload: pid {}, {} threads x {} ops",
            self.config.pid, self.config.threads, self.config.ops_per_thread
        );
        let started = Instant::now();
        let comm = Comm::new(&self.config.comm);

        let per_worker = thread::scope(|scope| -> Result<Vec<WorkloadReport>, WorkloadError> {
            let mut handles = Vec::with_capacity(self.config.threads);
            for index in 0..self.config.threads {
                let tid = self.config.pid.wrapping_add(index as u32);
                let task = TaskInfo::new(ExecutionContextId::new(self.config.pid, tid), comm);
                let handle = thread::Builder::new()
                    .name(format!("synthetic-{}", index))
                    .spawn_scoped(scope, move || self.worker(index, task, probes))?;
                handles.push(handle);
            }

            handles
                .into_iter()
                .enumerate()
                .map(|(index, handle)| {
                    handle
                        .join()
                        .map_err(|_| WorkloadError::WorkerPanicked(index))
                })
                .collect()
        })?;

        let mut report = WorkloadReport {
            threads: self.config.threads,
            ..Default::default()
        };
        for worker in &per_worker {
            report.read.merge(&worker.read);
            report.write.merge(&worker.write);
        }
        report.elapsed = started.elapsed();

        info!(
            "Synthetic workload finished: {} reads, {} writes in {:?}",
            report.read.total(),
            report.write.total(),
            report.elapsed
        );
        Ok(report)
    }

    fn worker(&self, index: usize, task: TaskInfo, probes: &VfsProbes) -> WorkloadReport {
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(index as u64));
        let mut report = WorkloadReport::default();
        let pause = Duration::from_micros(self.config.interval_us);

        for _ in 0..self.config.ops_per_thread {
            if !self.running.load(Ordering::Relaxed) {
                debug!("Worker {} stopped early", index);
                break;
            }

            let kind = if rng.gen_bool(self.config.read_ratio) {
                OperationKind::Read
            } else {
                OperationKind::Write
            };
            let sequence = Sequence::ALL[rng.gen_range(0..Sequence::ALL.len())];
            let count = rng.gen_range(1..=MAX_COUNT);
            let buf = BufferHandle(0x7f00_0000_0000 | (u64::from(rng.gen::<u32>()) << 4));
            let ret = if sequence.signals() {
                rng.gen_range(0..=count) as i64
            } else {
                -FAILURE_ERRNOS[rng.gen_range(0..FAILURE_ERRNOS.len())]
            };

            for trigger in sequence.triggers(buf, count, ret) {
                probes.fire(kind, &task, trigger);
            }
            report.mix_mut(kind).record(sequence);

            if !pause.is_zero() {
                thread::sleep(pause);
            }
        }

        report
    }
}

impl Default for SyntheticWorkload {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vfsprobe_core::{ChosenPath, EventReceiver, ProbeConfig};

    fn probes(target_pid: u32) -> (VfsProbes, EventReceiver) {
        let mut config = ProbeConfig::default();
        config.filter.target_pid = target_pid;
        config.transport.capacity = 100_000;
        VfsProbes::with_channel(&config)
    }

    fn small(threads: usize, ops: u64) -> SyntheticWorkloadConfig {
        SyntheticWorkloadConfig {
            threads,
            ops_per_thread: ops,
            ..Default::default()
        }
    }

    #[test]
    fn test_sequences_fire_in_program_order() {
        let triggers = Sequence::DirectSuccess.triggers(BufferHandle(1), 10, 10);
        assert!(matches!(triggers[0], Trigger::Entry { count: 10, .. }));
        assert_eq!(triggers[1], Trigger::Path(PathKind::Direct));
        assert_eq!(triggers[2], Trigger::Signal { amount: 10 });
        assert_eq!(triggers[3], Trigger::Exit { ret: 10 });

        let failed = Sequence::Failed.triggers(BufferHandle(1), 10, -5);
        assert!(!failed
            .iter()
            .any(|t| matches!(t, Trigger::Signal { .. })));
        assert_eq!(failed.last(), Some(&Trigger::Exit { ret: -5 }));

        let unclassified = Sequence::Unclassified.triggers(BufferHandle(1), 10, 3);
        assert!(!unclassified.iter().any(|t| matches!(t, Trigger::Path(_))));
    }

    #[test]
    fn test_every_operation_is_emitted() {
        let (probes, mut rx) = probes(0);
        let report = SyntheticWorkload::with_config(small(4, 250))
            .run(&probes)
            .unwrap();

        assert_eq!(report.total(), 1000);
        let events = rx.drain_ready();
        assert_eq!(events.len() as u64, report.total());
        assert_eq!(probes.live_contexts(), 0);

        for kind in OperationKind::ALL {
            let mix = report.mix(kind);
            let of_kind: Vec<_> = events.iter().filter(|e| e.kind == kind).collect();
            assert_eq!(of_kind.len() as u64, mix.total());
            assert_eq!(
                of_kind.iter().filter(|e| e.success).count() as u64,
                mix.successes()
            );
            assert_eq!(
                of_kind
                    .iter()
                    .filter(|e| e.path == ChosenPath::Iterator)
                    .count() as u64,
                mix.iterator
            );
            assert_eq!(
                of_kind
                    .iter()
                    .filter(|e| e.path == ChosenPath::Unclassified)
                    .count() as u64,
                mix.unclassified
            );
        }
        assert!(events.iter().filter(|e| !e.success).all(|e| e.ret < 0));
    }

    #[test]
    fn test_workers_are_threads_of_one_process() {
        let (probes, mut rx) = probes(0);
        let config = SyntheticWorkloadConfig {
            pid: 900,
            comm: "worker".to_string(),
            ..small(3, 20)
        };
        SyntheticWorkload::with_config(config).run(&probes).unwrap();

        let events = rx.drain_ready();
        assert!(events.iter().all(|e| e.id.tgid() == 900));
        assert!(events.iter().all(|e| e.comm.to_string_lossy() == "worker"));
        let mut tids: Vec<u32> = events.iter().map(|e| e.id.tid()).collect();
        tids.sort_unstable();
        tids.dedup();
        assert_eq!(tids, vec![900, 901, 902]);
    }

    #[test]
    fn test_same_seed_same_mix() {
        let run = || {
            let (probes, _rx) = probes(0);
            SyntheticWorkload::with_config(small(2, 300))
                .run(&probes)
                .unwrap()
        };
        let first = run();
        let second = run();
        assert_eq!(first.read, second.read);
        assert_eq!(first.write, second.write);
    }

    #[test]
    fn test_filtered_process_emits_nothing() {
        let (probes, mut rx) = probes(1);
        let report = SyntheticWorkload::with_config(small(2, 10))
            .run(&probes)
            .unwrap();
        assert_eq!(report.total(), 20);
        assert!(rx.drain_ready().is_empty());
        assert!(probes.filtered() > 0);
    }

    #[test]
    fn test_stopped_workload_issues_nothing() {
        let (probes, mut rx) = probes(0);
        let workload = SyntheticWorkload::with_config(small(2, 100));
        workload.stop();
        let report = workload.run(&probes).unwrap();
        assert_eq!(report.total(), 0);
        assert!(rx.drain_ready().is_empty());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let (probes, _rx) = probes(0);
        let zero = SyntheticWorkload::with_config(small(0, 1)).run(&probes);
        assert!(matches!(zero, Err(WorkloadError::InvalidConfig(_))));

        let ratio = SyntheticWorkload::with_config(SyntheticWorkloadConfig {
            read_ratio: 1.5,
            ..Default::default()
        })
        .run(&probes);
        assert!(matches!(ratio, Err(WorkloadError::InvalidConfig(_))));
    }
}
