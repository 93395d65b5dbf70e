//! Observers over reactive state.
//!
//! A `Watcher` pairs a getter with a user callback. The getter runs inside
//! a lazy [`Effect`] so its reads are tracked; when a dependency changes,
//! the watcher's job re-runs the getter and invokes the callback with the
//! new and previous values.
//!
//! # Dispatch
//!
//! [`Flush::Sync`] runs the job at trigger time. [`Flush::Batched`] hands
//! the job to the runtime's queue, so N triggers in one synchronous turn
//! collapse to a single callback invocation carrying the final value at
//! the next [`Runtime::flush`].
//!
//! # Stale-Result Cancellation
//!
//! A callback may register a cleanup through the [`OnInvalidate`] hook.
//! The next time the job fires, the previous invocation's cleanup runs
//! before the callback, letting the superseded invocation disown side
//! effects it no longer wants delivered, such as a lookup whose answer
//! arrived too late or a timer that should not fire.
//!
//! # Deep Sources
//!
//! [`Watcher::deep`] observes a whole structure instead of a getter: the
//! generated getter traverses every reachable cell (see
//! [`Traverse`](super::traverse::Traverse)), so a write to any of them
//! fires the callback.

use std::sync::Arc;

use parking_lot::Mutex;

use super::effect::{Effect, EffectOptions};
use super::queue::Job;
use super::runtime::{RunnerHandle, Runtime, SchedulerFn};
use super::traverse::{Traverse, Visited};

/// When a watcher's job runs relative to the trigger that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flush {
    /// Run the callback synchronously at trigger time.
    #[default]
    Sync,
    /// Batch the callback through the job queue; one invocation per flush
    /// no matter how many triggers preceded it.
    Batched,
}

/// Options for watcher registration.
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// Invoke the callback once at registration time, with no previous
    /// value, instead of only snapshotting the initial value.
    pub immediate: bool,
    /// Dispatch policy for triggered re-runs.
    pub flush: Flush,
}

type CleanupFn = Box<dyn FnOnce() + Send>;

/// Registration hook handed to watch callbacks.
///
/// A cleanup registered here runs right before the next callback
/// invocation (or never, if the watcher is dropped first).
pub struct OnInvalidate<'a> {
    slot: &'a Mutex<Option<CleanupFn>>,
}

impl OnInvalidate<'_> {
    /// Register a cleanup for the current invocation's side effects.
    pub fn register(&self, cleanup: impl FnOnce() + Send + 'static) {
        *self.slot.lock() = Some(Box::new(cleanup));
    }
}

type WatchCallback<T> = Box<dyn Fn(&T, Option<&T>, &OnInvalidate<'_>) + Send + Sync>;

struct WatchState<T> {
    /// Value produced by the most recent getter run, not yet delivered.
    latest: Mutex<Option<T>>,
    /// Value delivered by the previous callback invocation.
    previous: Mutex<Option<T>>,
    cleanup: Mutex<Option<CleanupFn>>,
    callback: WatchCallback<T>,
}

impl<T: Clone> WatchState<T> {
    /// Re-run the getter, cancel the stale invocation, deliver (new, old).
    fn run_job(&self, handle: &RunnerHandle) {
        handle.run();
        let Some(next) = self.latest.lock().take() else {
            return;
        };

        // Take the hook first so the slot's lock is not held while the
        // cleanup (arbitrary user code) runs.
        let stale = self.cleanup.lock().take();
        if let Some(cleanup) = stale {
            cleanup();
        }

        let previous = self.previous.lock().take();
        let hook = OnInvalidate {
            slot: &self.cleanup,
        };
        (self.callback)(&next, previous.as_ref(), &hook);

        *self.previous.lock() = Some(next);
    }
}

/// An observer with configurable dispatch timing.
///
/// Dropping the watcher stops observation: its computation unsubscribes
/// from every cell and any still-queued job becomes a no-op.
pub struct Watcher<T>
where
    T: Clone + Send + 'static,
{
    state: Arc<WatchState<T>>,
    effect: Effect<()>,
}

impl<T> Watcher<T>
where
    T: Clone + Send + 'static,
{
    /// Observe a getter.
    pub fn new<F, C>(runtime: &Runtime, getter: F, callback: C, options: WatchOptions) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        C: Fn(&T, Option<&T>, &OnInvalidate<'_>) + Send + Sync + 'static,
    {
        let state = Arc::new(WatchState {
            latest: Mutex::new(None),
            previous: Mutex::new(None),
            cleanup: Mutex::new(None),
            callback: Box::new(callback),
        });

        // The effect body parks the getter's value in `latest`; the job
        // picks it up after re-running the handle. This keeps the runner
        // type-erased while the watcher stays typed.
        let body = {
            let state = state.clone();
            move || {
                *state.latest.lock() = Some(getter());
            }
        };

        let scheduler: SchedulerFn = match options.flush {
            Flush::Sync => {
                let state = state.clone();
                Box::new(move |handle| state.run_job(&handle))
            }
            Flush::Batched => {
                let state = Arc::downgrade(&state);
                let runtime = runtime.clone();
                Box::new(move |handle| {
                    let state = state.clone();
                    let weak = handle.downgrade();
                    runtime.enqueue(Job::new(handle.id(), move || {
                        if let (Some(state), Some(handle)) = (state.upgrade(), weak.upgrade()) {
                            state.run_job(&handle);
                        }
                    }));
                })
            }
        };

        let effect = Effect::with_options(
            runtime,
            body,
            EffectOptions {
                lazy: true,
                scheduler: Some(scheduler),
            },
        );

        let watcher = Self { state, effect };
        if options.immediate {
            watcher.state.run_job(&watcher.effect.handle());
        } else {
            // Establish dependencies and the initial old-value snapshot
            // without invoking the callback.
            watcher.effect.run();
            let initial = watcher.state.latest.lock().take();
            *watcher.state.previous.lock() = initial;
        }
        watcher
    }

    /// Observe every reachable cell of a structure.
    ///
    /// The callback receives the structure itself as both values; what
    /// changed inside it is for the callback to inspect.
    pub fn deep<C>(runtime: &Runtime, source: T, callback: C, options: WatchOptions) -> Self
    where
        T: Traverse + Sync,
        C: Fn(&T, Option<&T>, &OnInvalidate<'_>) + Send + Sync + 'static,
    {
        let getter = move || {
            let mut visited = Visited::default();
            source.traverse(&mut visited);
            source.clone()
        };
        Self::new(runtime, getter, callback, options)
    }

    /// The cells the watcher's getter read during its most recent run.
    pub fn dependencies(&self) -> Vec<super::cell::CellId> {
        self.effect.dependencies()
    }
}

impl<T> std::fmt::Debug for Watcher<T>
where
    T: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("effect", &self.effect)
            .finish()
    }
}
