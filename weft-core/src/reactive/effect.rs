//! The re-runnable computation primitive.
//!
//! An `Effect` wraps a body closure in a handle that can be re-run at any
//! time, by the owner of the handle or by the runtime when a tracked cell
//! changes. Every run follows the same protocol:
//!
//! 1. Remove the computation from every subscriber set it currently
//!    belongs to and clear its back-reference list (cleanup).
//!
//! 2. Push the computation onto the runtime's stack, making it the active
//!    computation, so cells read by the body re-subscribe it.
//!
//! 3. Invoke the body, capturing its return value.
//!
//! 4. Pop the stack, restoring whatever was active before. The pop is an
//!    RAII drop, so it happens even if the body panics.
//!
//! Cleanup-before-rerun is what keeps dependency sets exact: after any
//! run, the effect is subscribed to precisely the cells that run read, not
//! the union of all past runs. An effect whose body branches re-resolves
//! its dependencies every time the branch flips.
//!
//! # Options
//!
//! - `lazy`: construct the handle without running it; the caller decides
//!   when the first run happens and what to do with its return value.
//!   `Computed` and `Watcher` are built on this.
//! - `scheduler`: when a dependency changes, the runtime invokes the
//!   scheduler with the handle instead of re-running it directly.
//!
//! Dropping the last handle to an effect unsubscribes it from every cell.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

use super::cell::{CellId, ComputationId};
use super::runtime::{AnyComputation, RunnerHandle, Runtime, SchedulerFn};

/// Construction options for [`Effect::with_options`].
#[derive(Default)]
pub struct EffectOptions {
    /// Skip the initial run; the handle starts with no dependencies until
    /// the caller invokes it.
    pub lazy: bool,
    /// Route triggered re-runs through this callback instead of running
    /// directly.
    pub scheduler: Option<SchedulerFn>,
}

impl EffectOptions {
    /// Lazy, no scheduler.
    pub fn lazy() -> Self {
        Self {
            lazy: true,
            scheduler: None,
        }
    }

    /// Eager, with triggered re-runs batched through the runtime's job
    /// queue.
    pub fn batched(runtime: &Runtime) -> Self {
        Self {
            lazy: false,
            scheduler: Some(runtime.batching_scheduler()),
        }
    }
}

struct EffectInner<T> {
    id: ComputationId,
    runtime: Runtime,
    body: Box<dyn Fn() -> T + Send + Sync>,
    scheduler: Option<SchedulerFn>,
    /// Cells whose subscriber sets currently contain this computation.
    deps: Mutex<SmallVec<[CellId; 8]>>,
    runs: AtomicUsize,
}

/// A re-runnable computation with stable identity.
///
/// Clones share the same computation. Invoking [`run`](Effect::run)
/// re-executes the body under tracking and returns its value.
///
/// # Example
///
/// ```rust,ignore
/// let runtime = Runtime::new();
/// let count = runtime.signal(0);
///
/// let count_reader = count.clone();
/// let effect = Effect::new(&runtime, move || {
///     println!("count is {}", count_reader.get());
/// });
///
/// count.set(5); // prints: "count is 5"
/// ```
pub struct Effect<T = ()> {
    inner: Arc<EffectInner<T>>,
}

impl<T: 'static> Effect<T> {
    /// Create an effect and run it immediately to establish its initial
    /// dependencies.
    pub fn new<F>(runtime: &Runtime, body: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_options(runtime, body, EffectOptions::default())
    }

    /// Create an effect with explicit options.
    pub fn with_options<F>(runtime: &Runtime, body: F, options: EffectOptions) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let effect = Self {
            inner: Arc::new(EffectInner {
                id: ComputationId::new(),
                runtime: runtime.clone(),
                body: Box::new(body),
                scheduler: options.scheduler,
                deps: Mutex::new(SmallVec::new()),
                runs: AtomicUsize::new(0),
            }),
        };

        if !options.lazy {
            effect.run();
        }

        effect
    }

    /// Re-run the body under tracking and return its value.
    pub fn run(&self) -> T {
        EffectInner::execute(&self.inner)
    }

    /// The computation's stable identity.
    pub fn id(&self) -> ComputationId {
        self.inner.id
    }

    /// The cells this effect was subscribed to by its most recent run.
    pub fn dependencies(&self) -> Vec<CellId> {
        self.inner.deps.lock().to_vec()
    }

    /// Number of cells this effect currently depends on.
    pub fn dependency_count(&self) -> usize {
        self.inner.deps.lock().len()
    }

    /// Number of completed runs.
    pub fn run_count(&self) -> usize {
        self.inner.runs.load(Ordering::SeqCst)
    }

    /// Type-erased handle, as a scheduler would receive it.
    pub(crate) fn handle(&self) -> RunnerHandle {
        RunnerHandle::new(self.inner.clone())
    }
}

impl<T> EffectInner<T> {
    /// Remove this computation from every subscriber set it belongs to and
    /// clear the back-reference list.
    fn cleanup(&self) {
        let cells = std::mem::take(&mut *self.deps.lock());
        if !cells.is_empty() {
            self.runtime.unsubscribe_all(self.id, &cells);
        }
    }
}

impl<T: 'static> EffectInner<T> {
    /// The cleanup / push / invoke / pop protocol.
    fn execute(this: &Arc<Self>) -> T {
        this.cleanup();

        trace!(computation = ?this.id, "run");
        let erased: Arc<dyn AnyComputation> = this.clone();
        let _active = this.runtime.stack().enter(this.id, Arc::downgrade(&erased));
        let value = (this.body)();

        this.runs.fetch_add(1, Ordering::SeqCst);
        value
    }
}

impl<T: 'static> AnyComputation for EffectInner<T> {
    fn id(&self) -> ComputationId {
        self.id
    }

    fn record_dep(&self, cell: CellId) {
        let mut deps = self.deps.lock();
        if !deps.contains(&cell) {
            deps.push(cell);
        }
    }

    fn scheduler(&self) -> Option<&SchedulerFn> {
        self.scheduler.as_ref()
    }

    fn run_erased(self: Arc<Self>) {
        let _ = EffectInner::execute(&self);
    }
}

impl<T> Drop for EffectInner<T> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl<T> Clone for Effect<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: 'static> std::fmt::Debug for Effect<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}
