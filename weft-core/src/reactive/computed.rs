//! Lazily-cached derived values.
//!
//! A `Computed` pairs a getter with a cache and a dirty flag. The getter
//! runs inside a lazy [`Effect`], so its reads are tracked like any other
//! computation's. When one of those dependencies changes, the effect's
//! scheduler fires: it marks the cache dirty and triggers the computed's
//! own cell. It does NOT recompute; recomputation happens only on the
//! next read. Repeated dirtying without an intervening read propagates to
//! dependents once and costs one recomputation on the next read.
//!
//! Because a read tracks the computed's own cell, a computed is itself a
//! dependency other computations can subscribe to, so computeds compose:
//! a computed built from a computed re-evaluates through the chain only
//! when read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::cell::{CellId, OwnerId};
use super::effect::{Effect, EffectOptions};
use super::runtime::{Runtime, SchedulerFn};
use super::traverse::{Traverse, Visited};

struct ComputedShared<T> {
    runtime: Runtime,
    owner: OwnerId,
    dirty: Arc<AtomicBool>,
    value: Mutex<Option<T>>,
    effect: Effect<T>,
}

impl<T> Drop for ComputedShared<T> {
    fn drop(&mut self) {
        self.runtime.dispose_owner(self.owner);
    }
}

/// A cached derived value that recomputes only when read after one of its
/// dependencies changed.
///
/// # Example
///
/// ```rust,ignore
/// let runtime = Runtime::new();
/// let count = runtime.signal(2);
///
/// let count_reader = count.clone();
/// let doubled = Computed::new(&runtime, move || count_reader.get() * 2);
///
/// assert_eq!(doubled.get(), 4);
/// count.set(5);            // marks `doubled` dirty, nothing recomputes yet
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Computed<T>
where
    T: Clone + Send + 'static,
{
    shared: Arc<ComputedShared<T>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + 'static,
{
    /// Wrap a getter in a computed value. The getter does not run until the
    /// first read.
    pub fn new<F>(runtime: &Runtime, getter: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let owner = OwnerId::new();
        let dirty = Arc::new(AtomicBool::new(true));

        // Invoked when a dependency of the getter changes: invalidate the
        // cache and notify this computed's own subscribers. The dirty
        // check keeps a burst of dependency changes from re-notifying
        // dependents that already saw the invalidation.
        let scheduler: SchedulerFn = {
            let runtime = runtime.clone();
            let dirty = dirty.clone();
            let cell = CellId::value_of(owner);
            Box::new(move |_handle| {
                if !dirty.swap(true, Ordering::SeqCst) {
                    runtime.trigger(cell);
                }
            })
        };

        let effect = Effect::with_options(
            runtime,
            getter,
            EffectOptions {
                lazy: true,
                scheduler: Some(scheduler),
            },
        );

        Self {
            shared: Arc::new(ComputedShared {
                runtime: runtime.clone(),
                owner,
                dirty,
                value: Mutex::new(None),
                effect,
            }),
        }
    }

    /// Read the value, recomputing first if a dependency changed since the
    /// last read.
    ///
    /// Reading inside another computation subscribes that computation to
    /// this computed's cell.
    pub fn get(&self) -> T {
        if self.shared.dirty.load(Ordering::SeqCst) {
            let value = self.shared.effect.run();
            *self.shared.value.lock() = Some(value);
            // Cleared only after a successful recompute; a panicking getter
            // leaves the cache dirty for the next read.
            self.shared.dirty.store(false, Ordering::SeqCst);
        }

        self.shared.runtime.track(self.cell());
        self.shared
            .value
            .lock()
            .clone()
            .expect("computed cache is populated after a clean read")
    }

    /// The cell through which other computations depend on this value.
    pub fn cell(&self) -> CellId {
        CellId::value_of(self.shared.owner)
    }

    /// Whether the next read will recompute.
    pub fn is_dirty(&self) -> bool {
        self.shared.dirty.load(Ordering::SeqCst)
    }
}

impl<T> Clone for Computed<T>
where
    T: Clone + Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for Computed<T>
where
    T: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("cell", &self.cell())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

impl<T> Traverse for Computed<T>
where
    T: Clone + Send + Traverse + 'static,
{
    fn traverse(&self, visited: &mut Visited) {
        if visited.enter(self.shared.owner) {
            self.get().traverse(visited);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn computed_is_lazy() {
        let runtime = Runtime::new();
        let computations = Arc::new(AtomicUsize::new(0));
        let computations_clone = computations.clone();

        let computed = Computed::new(&runtime, move || {
            computations_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        // Nothing runs until the first read.
        assert_eq!(computations.load(Ordering::SeqCst), 0);
        assert!(computed.is_dirty());

        assert_eq!(computed.get(), 42);
        assert_eq!(computations.load(Ordering::SeqCst), 1);
        assert!(!computed.is_dirty());
    }

    #[test]
    fn clean_reads_hit_the_cache() {
        let runtime = Runtime::new();
        let computations = Arc::new(AtomicUsize::new(0));
        let computations_clone = computations.clone();

        let computed = Computed::new(&runtime, move || {
            computations_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        assert_eq!(computed.get(), 42);
        assert_eq!(computed.get(), 42);
        assert_eq!(computed.get(), 42);
        assert_eq!(computations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_getter_stays_dirty() {
        let runtime = Runtime::new();
        let computed: Computed<i32> = Computed::new(&runtime, || panic!("getter failed"));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| computed.get()));
        assert!(result.is_err());
        assert!(computed.is_dirty());
        assert!(!runtime.is_tracking());
    }

    #[test]
    fn clone_shares_the_cache() {
        let runtime = Runtime::new();
        let computations = Arc::new(AtomicUsize::new(0));
        let computations_clone = computations.clone();

        let computed = Computed::new(&runtime, move || {
            computations_clone.fetch_add(1, Ordering::SeqCst);
            7
        });
        let clone = computed.clone();

        assert_eq!(computed.get(), 7);
        assert_eq!(clone.get(), 7);
        assert_eq!(computations.load(Ordering::SeqCst), 1);
        assert_eq!(computed.cell(), clone.cell());
    }
}
