//! The reactive runtime.
//!
//! A `Runtime` owns one dependency store, one active-computation stack, and
//! one job queue, and coordinates the track/trigger protocol between them:
//!
//! 1. State containers call [`Runtime::track`] on every read. If a
//!    computation is active, it is subscribed to the cell and the cell is
//!    recorded on the computation's back-reference list.
//!
//! 2. State containers call [`Runtime::trigger`] after every write. The
//!    cell's subscribers are snapshotted and each one either re-runs
//!    directly or is routed through its scheduler.
//!
//! 3. Batched work lands in the job queue and is serviced by
//!    [`Runtime::flush`].
//!
//! Runtimes are explicit values, not process-wide singletons: tests create
//! isolated instances and two runtimes never observe each other's cells.
//! Handles are cheap to clone (`Arc` inside). Every graph mutation is
//! serialized behind the runtime's locks, and no lock is held while a
//! computation body, scheduler, or callback runs.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::cell::{CellId, ComputationId, OwnerId};
use super::computed::Computed;
use super::context::ComputationStack;
use super::effect::Effect;
use super::queue::{FlushError, FlushMode, Job, JobQueue};
use super::signal::Signal;
use super::store::DepStore;
use super::traverse::Traverse;
use super::watch::{OnInvalidate, WatchOptions, Watcher};

/// Scheduler callback attached to a computation: invoked by `trigger` with
/// the computation's handle instead of re-running it directly.
pub type SchedulerFn = Box<dyn Fn(RunnerHandle) + Send + Sync>;

/// Type-erased view of a computation, as stored in the dependency graph.
///
/// Concrete computations keep their typed bodies and caches; the graph only
/// needs identity, dependency recording, and re-run dispatch.
pub(crate) trait AnyComputation: Send + Sync {
    /// Stable identity for set membership and self-trigger checks.
    fn id(&self) -> ComputationId;

    /// Record a cell on the computation's back-reference list.
    fn record_dep(&self, cell: CellId);

    /// The scheduler to route re-runs through, if any.
    fn scheduler(&self) -> Option<&SchedulerFn>;

    /// Re-run the computation, discarding its return value.
    fn run_erased(self: Arc<Self>);
}

/// Type-erased handle to a computation, passed to schedulers.
///
/// A scheduler may re-run the handle on the spot, hand it to the job
/// queue, or drop it (skipping the re-run entirely).
pub struct RunnerHandle {
    inner: Arc<dyn AnyComputation>,
}

impl RunnerHandle {
    pub(crate) fn new(inner: Arc<dyn AnyComputation>) -> Self {
        Self { inner }
    }

    /// Identity of the underlying computation.
    pub fn id(&self) -> ComputationId {
        self.inner.id()
    }

    /// Re-run the underlying computation now.
    pub fn run(&self) {
        Arc::clone(&self.inner).run_erased();
    }

    pub(crate) fn downgrade(&self) -> WeakRunnerHandle {
        WeakRunnerHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Weak counterpart of [`RunnerHandle`] for queued jobs, so a computation
/// dropped while queued is skipped instead of kept alive.
pub(crate) struct WeakRunnerHandle {
    inner: Weak<dyn AnyComputation>,
}

impl WeakRunnerHandle {
    pub(crate) fn upgrade(&self) -> Option<RunnerHandle> {
        self.inner.upgrade().map(RunnerHandle::new)
    }
}

pub(crate) struct RuntimeInner {
    store: Mutex<DepStore>,
    stack: ComputationStack,
    queue: JobQueue,
}

/// Handle to a reactive runtime. Clones share the same graph.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with the default deferred flush policy.
    pub fn new() -> Self {
        Self::with_flush_mode(FlushMode::default())
    }

    /// Create a runtime with an explicit flush policy.
    pub fn with_flush_mode(mode: FlushMode) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                store: Mutex::new(DepStore::new()),
                stack: ComputationStack::new(),
                queue: JobQueue::new(mode),
            }),
        }
    }

    /// Record that the active computation depends on `cell`.
    ///
    /// Called by state containers on every read. A no-op when no
    /// computation is active. Both sides of the edge are recorded here, at
    /// read time: the subscription in the store and the cell on the
    /// computation's back-reference list. That keeps them consistent even
    /// if the computation body panics later in the same run.
    pub fn track(&self, cell: CellId) {
        let Some(frame) = self.inner.stack.active() else {
            return;
        };

        trace!(?cell, computation = ?frame.id, "track");
        self.inner
            .store
            .lock()
            .subscribe(cell, frame.id, frame.handle.clone());
        if let Some(computation) = frame.handle.upgrade() {
            computation.record_dep(cell);
        }
    }

    /// Notify every subscriber of `cell` that it changed.
    ///
    /// Called by state containers after every write. Subscribers are
    /// snapshotted before iteration; the computation currently at the top
    /// of the stack is skipped so a computation that both reads and writes
    /// a cell never re-invokes itself synchronously. Each remaining
    /// subscriber is routed through its scheduler if it has one, otherwise
    /// re-run directly. A cell nobody tracked is a no-op.
    pub fn trigger(&self, cell: CellId) {
        let subscribers = self.inner.store.lock().snapshot(cell);
        if subscribers.is_empty() {
            return;
        }

        trace!(?cell, subscribers = subscribers.len(), "trigger");
        let active = self.inner.stack.active_id();
        for computation in subscribers {
            if Some(computation.id()) == active {
                continue;
            }
            match computation.scheduler() {
                Some(scheduler) => scheduler(RunnerHandle::new(Arc::clone(&computation))),
                None => Arc::clone(&computation).run_erased(),
            }
        }
    }

    /// Service the job queue until no work is pending.
    ///
    /// The host calls this at its end-of-synchronous-block point (event
    /// loop tick, frame boundary, test assertion point). Failures follow
    /// the continue-on-error policy of [`FlushError`].
    pub fn flush(&self) -> Result<(), FlushError> {
        self.inner.queue.flush()
    }

    /// Purge every graph entry of a destroyed owner.
    ///
    /// State containers call this when they are dropped.
    pub fn dispose_owner(&self, owner: OwnerId) {
        let cells = self.inner.store.lock().dispose_owner(owner);
        if cells > 0 {
            debug!(?owner, cells, "disposed owner");
        }
    }

    /// Whether a computation is currently being tracked.
    pub fn is_tracking(&self) -> bool {
        self.inner.stack.is_tracking()
    }

    /// The computation reads are currently attributed to, if any.
    pub fn current_computation(&self) -> Option<ComputationId> {
        self.inner.stack.active_id()
    }

    /// Number of live subscribers recorded for a cell. Intended for
    /// introspection and tests.
    pub fn subscriber_count(&self, cell: CellId) -> usize {
        self.inner.store.lock().subscriber_count(cell)
    }

    /// A scheduler that batches re-runs through the job queue.
    ///
    /// Attach it to an effect to collapse a burst of same-turn triggers
    /// into a single re-run at the next flush.
    pub fn batching_scheduler(&self) -> SchedulerFn {
        let runtime = self.clone();
        Box::new(move |handle: RunnerHandle| {
            let weak = handle.downgrade();
            runtime.enqueue(Job::new(handle.id(), move || {
                if let Some(handle) = weak.upgrade() {
                    handle.run();
                }
            }));
        })
    }

    pub(crate) fn stack(&self) -> &ComputationStack {
        &self.inner.stack
    }

    pub(crate) fn enqueue(&self, job: Job) {
        self.inner.queue.enqueue(job);
    }

    /// Remove a computation from the subscriber set of each listed cell.
    pub(crate) fn unsubscribe_all(&self, id: ComputationId, cells: &[CellId]) {
        let mut store = self.inner.store.lock();
        for cell in cells {
            store.unsubscribe(*cell, id);
        }
    }

    // ------------------------------------------------------------------
    // Construction conveniences
    // ------------------------------------------------------------------

    /// Create a signal owned by this runtime.
    pub fn signal<T>(&self, value: T) -> Signal<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        Signal::new(self, value)
    }

    /// Create an effect that runs immediately and re-runs on dependency
    /// changes.
    pub fn effect<T, F>(&self, body: F) -> Effect<T>
    where
        T: 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Effect::new(self, body)
    }

    /// Create a lazily-cached derived value.
    pub fn computed<T, F>(&self, getter: F) -> Computed<T>
    where
        T: Clone + Send + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Computed::new(self, getter)
    }

    /// Observe a getter, invoking `callback` with (new, old) on change.
    pub fn watch<T, F, C>(&self, getter: F, callback: C, options: WatchOptions) -> Watcher<T>
    where
        T: Clone + Send + 'static,
        F: Fn() -> T + Send + Sync + 'static,
        C: Fn(&T, Option<&T>, &OnInvalidate<'_>) + Send + Sync + 'static,
    {
        Watcher::new(self, getter, callback, options)
    }

    /// Observe a whole structure, reading every reachable cell.
    pub fn watch_deep<S, C>(&self, source: S, callback: C, options: WatchOptions) -> Watcher<S>
    where
        S: Traverse + Clone + Send + Sync + 'static,
        C: Fn(&S, Option<&S>, &OnInvalidate<'_>) + Send + Sync + 'static,
    {
        Watcher::deep(self, source, callback, options)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("tracking", &self.is_tracking())
            .field("owners", &self.inner.store.lock().owner_count())
            .field("pending_jobs", &self.inner.queue.pending_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Probe {
        id: ComputationId,
        runs: Arc<AtomicUsize>,
        scheduler: Option<SchedulerFn>,
    }

    impl Probe {
        fn new() -> (Arc<Self>, Arc<AtomicUsize>) {
            let runs = Arc::new(AtomicUsize::new(0));
            let probe = Arc::new(Self {
                id: ComputationId::new(),
                runs: runs.clone(),
                scheduler: None,
            });
            (probe, runs)
        }

        fn with_scheduler(scheduler: SchedulerFn) -> (Arc<Self>, Arc<AtomicUsize>) {
            let runs = Arc::new(AtomicUsize::new(0));
            let probe = Arc::new(Self {
                id: ComputationId::new(),
                runs: runs.clone(),
                scheduler: Some(scheduler),
            });
            (probe, runs)
        }
    }

    impl AnyComputation for Probe {
        fn id(&self) -> ComputationId {
            self.id
        }

        fn record_dep(&self, _cell: CellId) {}

        fn scheduler(&self) -> Option<&SchedulerFn> {
            self.scheduler.as_ref()
        }

        fn run_erased(self: Arc<Self>) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn cell() -> CellId {
        CellId::value_of(OwnerId::new())
    }

    #[test]
    fn track_without_active_computation_is_a_noop() {
        let runtime = Runtime::new();
        let cell = cell();

        runtime.track(cell);
        assert_eq!(runtime.subscriber_count(cell), 0);
    }

    #[test]
    fn track_subscribes_the_active_computation() {
        let runtime = Runtime::new();
        let (probe, _) = Probe::new();
        let cell = cell();

        let erased: Arc<dyn AnyComputation> = probe.clone();
        {
            let _guard = runtime.stack().enter(probe.id, Arc::downgrade(&erased));
            runtime.track(cell);
        }

        assert_eq!(runtime.subscriber_count(cell), 1);
    }

    #[test]
    fn trigger_without_subscribers_is_a_noop() {
        let runtime = Runtime::new();
        runtime.trigger(cell());
    }

    #[test]
    fn trigger_reruns_subscribers() {
        let runtime = Runtime::new();
        let (probe, runs) = Probe::new();
        let cell = cell();

        let erased: Arc<dyn AnyComputation> = probe.clone();
        {
            let _guard = runtime.stack().enter(probe.id, Arc::downgrade(&erased));
            runtime.track(cell);
        }

        runtime.trigger(cell);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        runtime.trigger(cell);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn trigger_routes_through_the_scheduler() {
        let runtime = Runtime::new();
        let scheduled = Arc::new(AtomicUsize::new(0));
        let scheduled_clone = scheduled.clone();
        let (probe, runs) = Probe::with_scheduler(Box::new(move |_handle| {
            scheduled_clone.fetch_add(1, Ordering::SeqCst);
        }));
        let cell = cell();

        let erased: Arc<dyn AnyComputation> = probe.clone();
        {
            let _guard = runtime.stack().enter(probe.id, Arc::downgrade(&erased));
            runtime.track(cell);
        }

        runtime.trigger(cell);
        // The scheduler was invoked instead of a direct re-run.
        assert_eq!(scheduled.load(Ordering::SeqCst), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn trigger_skips_the_active_computation() {
        let runtime = Runtime::new();
        let (probe, runs) = Probe::new();
        let cell = cell();

        let erased: Arc<dyn AnyComputation> = probe.clone();
        let _guard = runtime.stack().enter(probe.id, Arc::downgrade(&erased));
        runtime.track(cell);

        // Still active: triggering its own dependency must not re-run it.
        runtime.trigger(cell);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn isolated_runtimes_do_not_share_cells() {
        let first = Runtime::new();
        let second = Runtime::new();
        let (probe, runs) = Probe::new();
        let cell = cell();

        let erased: Arc<dyn AnyComputation> = probe.clone();
        {
            let _guard = first.stack().enter(probe.id, Arc::downgrade(&erased));
            first.track(cell);
        }

        second.trigger(cell);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(second.subscriber_count(cell), 0);
    }

    #[test]
    fn dispose_owner_detaches_subscribers() {
        let runtime = Runtime::new();
        let (probe, runs) = Probe::new();
        let cell = cell();

        let erased: Arc<dyn AnyComputation> = probe.clone();
        {
            let _guard = runtime.stack().enter(probe.id, Arc::downgrade(&erased));
            runtime.track(cell);
        }

        runtime.dispose_owner(cell.owner());
        runtime.trigger(cell);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
