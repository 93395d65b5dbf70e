//! Deferred batching of computation re-runs.
//!
//! Schedulers that want batching hand a job to the queue instead of
//! re-running their computation on the spot. Jobs are deduplicated by
//! computation id: enqueueing the same computation N times before a flush
//! collapses to one occurrence, so a burst of triggers in one synchronous
//! turn yields a single re-run.
//!
//! # Flush Cycles
//!
//! One flush cycle takes the pending set as it stood when the cycle
//! started and runs each job in it exactly once. Triggers arriving while
//! the cycle runs land in a fresh pending set and are serviced by the next
//! cycle, never by re-entering the current one.
//!
//! When a flush actually happens is an injectable policy ([`FlushMode`]):
//! `Immediate` drains as soon as a job is enqueued, `Deferred` waits for
//! the host to call flush at its end-of-turn point (an event-loop tick, a
//! frame boundary, a test assertion point).
//!
//! # Failure Policy
//!
//! A panicking job does not abort the cycle. Remaining jobs still run and
//! the flush reports the failures afterwards as a [`FlushError`]. Silently
//! dropping scheduled work on the first failure would leave the graph in a
//! state where some dependents observed an update and others never will.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, trace};

use super::cell::ComputationId;

/// When the queue services its pending set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Drain the queue as soon as a job is enqueued (run-now).
    Immediate,
    /// Drain only when the host calls [`Runtime::flush`](super::Runtime::flush)
    /// at its end-of-synchronous-block point.
    #[default]
    Deferred,
}

/// One or more batched jobs panicked during a flush.
///
/// The remaining jobs of the cycle still ran; `failed` names the
/// computations whose jobs did not complete.
#[derive(Debug, Error)]
#[error("{} batched job(s) panicked during flush", .failed.len())]
pub struct FlushError {
    pub failed: Vec<ComputationId>,
}

/// A queued unit of deferred work.
///
/// Identified by the computation it re-runs; the closure typically holds
/// weak references so a computation dropped while queued becomes a no-op.
pub(crate) struct Job {
    id: ComputationId,
    run: Box<dyn Fn() + Send + Sync>,
}

impl Job {
    pub(crate) fn new(id: ComputationId, run: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            id,
            run: Box::new(run),
        }
    }
}

/// The deduplicated pending set plus the flushing-in-progress flag.
pub(crate) struct JobQueue {
    mode: FlushMode,
    pending: Mutex<IndexMap<ComputationId, Job>>,
    in_flush: AtomicBool,
}

impl JobQueue {
    pub(crate) fn new(mode: FlushMode) -> Self {
        Self {
            mode,
            pending: Mutex::new(IndexMap::new()),
            in_flush: AtomicBool::new(false),
        }
    }

    /// Add a job to the pending set.
    ///
    /// A job for a computation already pending collapses into the existing
    /// occurrence. In `Immediate` mode this also drains the queue, unless a
    /// flush is already running (the running flush's next cycle picks the
    /// job up instead).
    pub(crate) fn enqueue(&self, job: Job) {
        {
            let mut pending = self.pending.lock();
            if pending.contains_key(&job.id) {
                trace!(computation = ?job.id, "job already pending, deduplicated");
            } else {
                pending.insert(job.id, job);
            }
        }

        if self.mode == FlushMode::Immediate {
            // Per-job failures are logged inside flush.
            let _ = self.flush();
        }
    }

    /// Run flush cycles until the pending set is empty.
    ///
    /// Each cycle takes the pending set as of cycle start; jobs enqueued
    /// while a cycle runs are serviced by a follow-up cycle. Calling flush
    /// from inside a flushed job is a no-op (the in-progress flush picks up
    /// whatever that job enqueued).
    pub(crate) fn flush(&self) -> Result<(), FlushError> {
        if self.in_flush.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut failed = Vec::new();
        loop {
            let jobs: Vec<Job> = {
                let mut pending = self.pending.lock();
                if pending.is_empty() {
                    break;
                }
                pending.drain(..).map(|(_, job)| job).collect()
            };

            trace!(jobs = jobs.len(), "flush cycle");
            for job in jobs {
                if catch_unwind(AssertUnwindSafe(|| (job.run)())).is_err() {
                    error!(computation = ?job.id, "batched job panicked during flush");
                    failed.push(job.id);
                }
            }
        }
        self.in_flush.store(false, Ordering::SeqCst);

        if failed.is_empty() {
            Ok(())
        } else {
            Err(FlushError { failed })
        }
    }

    /// Number of jobs currently awaiting a flush.
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counting_job(id: ComputationId, counter: &Arc<AtomicUsize>) -> Job {
        let counter = counter.clone();
        Job::new(id, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn duplicate_enqueues_collapse_to_one_run() {
        let queue = JobQueue::new(FlushMode::Deferred);
        let runs = Arc::new(AtomicUsize::new(0));
        let id = ComputationId::new();

        queue.enqueue(counting_job(id, &runs));
        queue.enqueue(counting_job(id, &runs));
        queue.enqueue(counting_job(id, &runs));
        assert_eq!(queue.pending_len(), 1);

        queue.flush().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn deferred_mode_waits_for_explicit_flush() {
        let queue = JobQueue::new(FlushMode::Deferred);
        let runs = Arc::new(AtomicUsize::new(0));

        queue.enqueue(counting_job(ComputationId::new(), &runs));
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        queue.flush().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn immediate_mode_drains_on_enqueue() {
        let queue = JobQueue::new(FlushMode::Immediate);
        let runs = Arc::new(AtomicUsize::new(0));

        queue.enqueue(counting_job(ComputationId::new(), &runs));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn distinct_jobs_each_run_once() {
        let queue = JobQueue::new(FlushMode::Deferred);
        let runs = Arc::new(AtomicUsize::new(0));

        queue.enqueue(counting_job(ComputationId::new(), &runs));
        queue.enqueue(counting_job(ComputationId::new(), &runs));

        queue.flush().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_job_does_not_abort_the_cycle() {
        let queue = JobQueue::new(FlushMode::Deferred);
        let runs = Arc::new(AtomicUsize::new(0));
        let bad = ComputationId::new();

        queue.enqueue(Job::new(bad, || panic!("job failed")));
        queue.enqueue(counting_job(ComputationId::new(), &runs));

        let err = queue.flush().unwrap_err();
        assert_eq!(err.failed, vec![bad]);
        // The healthy job still ran.
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        // The failure does not stick around for the next flush.
        queue.flush().unwrap();
    }

    #[test]
    fn jobs_enqueued_during_flush_run_in_a_later_cycle() {
        let queue = Arc::new(JobQueue::new(FlushMode::Deferred));
        let runs = Arc::new(AtomicUsize::new(0));

        let follow_up_runs = runs.clone();
        let queue_clone = queue.clone();
        queue.enqueue(Job::new(ComputationId::new(), move || {
            queue_clone.enqueue(counting_job(ComputationId::new(), &follow_up_runs));
        }));

        queue.flush().unwrap();
        // The follow-up job ran in a second cycle of the same flush call.
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending_len(), 0);
    }
}
