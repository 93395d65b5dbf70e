//! The signal state wrapper.
//!
//! The engine itself never intercepts reads or writes; it only exposes
//! `track` and `trigger`. `Signal` is the shipped interception mechanism:
//! an explicit wrapper holding one value, calling [`Runtime::track`] on
//! every read and [`Runtime::trigger`] after every write. Any external
//! container following the same contract participates in the graph the
//! same way.
//!
//! Clones share the same cell. When the last handle drops, the signal's
//! owner entries are purged from the store.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::cell::{CellId, OwnerId};
use super::runtime::Runtime;
use super::traverse::{Traverse, Visited};

struct SignalShared<T> {
    runtime: Runtime,
    owner: OwnerId,
    value: RwLock<T>,
}

impl<T> Drop for SignalShared<T> {
    fn drop(&mut self) {
        self.runtime.dispose_owner(self.owner);
    }
}

/// A reactive container for a single value.
///
/// # Example
///
/// ```rust,ignore
/// let runtime = Runtime::new();
/// let count = Signal::new(&runtime, 0);
///
/// let value = count.get(); // tracked when read inside a computation
/// count.set(5);            // notifies every subscriber
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    shared: Arc<SignalShared<T>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a signal with the given initial value.
    pub fn new(runtime: &Runtime, value: T) -> Self {
        Self {
            shared: Arc::new(SignalShared {
                runtime: runtime.clone(),
                owner: OwnerId::new(),
                value: RwLock::new(value),
            }),
        }
    }

    /// The cell this signal publishes through.
    pub fn cell(&self) -> CellId {
        CellId::value_of(self.shared.owner)
    }

    /// Read the value.
    ///
    /// If a computation is active, it becomes a subscriber of this signal.
    pub fn get(&self) -> T {
        self.shared.runtime.track(self.cell());
        self.shared.value.read().clone()
    }

    /// Read the value without establishing a dependency.
    pub fn get_untracked(&self) -> T {
        self.shared.value.read().clone()
    }

    /// Replace the value and notify subscribers.
    pub fn set(&self, value: T) {
        {
            let mut guard = self.shared.value.write();
            *guard = value;
        }
        self.shared.runtime.trigger(self.cell());
    }

    /// Update the value with a function of the current value.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let next = {
            let guard = self.shared.value.read();
            f(&guard)
        };
        self.set(next);
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("cell", &self.cell())
            .field("value", &self.get_untracked())
            .finish()
    }
}

impl<T> Traverse for Signal<T>
where
    T: Clone + Send + Sync + Traverse + 'static,
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
    use crate::reactive::effect::Effect;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn signal_get_and_set() {
        let runtime = Runtime::new();
        let signal = Signal::new(&runtime, 0);

        assert_eq!(signal.get(), 0);
        signal.set(42);
        assert_eq!(signal.get(), 42);
    }

    #[test]
    fn signal_update() {
        let runtime = Runtime::new();
        let signal = Signal::new(&runtime, 10);

        signal.update(|v| v + 5);
        assert_eq!(signal.get(), 15);
    }

    #[test]
    fn reads_outside_computations_do_not_subscribe() {
        let runtime = Runtime::new();
        let signal = Signal::new(&runtime, 0);

        let _ = signal.get();
        assert_eq!(runtime.subscriber_count(signal.cell()), 0);
    }

    #[test]
    fn untracked_reads_inside_computations_do_not_subscribe() {
        let runtime = Runtime::new();
        let signal = Signal::new(&runtime, 7);

        let reader = signal.clone();
        let effect = Effect::new(&runtime, move || reader.get_untracked());
        assert_eq!(effect.dependency_count(), 0);

        signal.set(8);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn set_reruns_subscribed_effects() {
        let runtime = Runtime::new();
        let signal = Signal::new(&runtime, 1);
        let observed = Arc::new(AtomicUsize::new(0));

        let reader = signal.clone();
        let observed_clone = observed.clone();
        let _effect = Effect::new(&runtime, move || {
            observed_clone.store(reader.get(), Ordering::SeqCst);
        });
        assert_eq!(observed.load(Ordering::SeqCst), 1);

        signal.set(42);
        assert_eq!(observed.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn clone_shares_the_cell() {
        let runtime = Runtime::new();
        let signal = Signal::new(&runtime, 0);
        let clone = signal.clone();

        signal.set(42);
        assert_eq!(clone.get(), 42);
        assert_eq!(signal.cell(), clone.cell());
    }

    #[test]
    fn dropping_the_last_handle_purges_the_store() {
        let runtime = Runtime::new();
        let signal = Signal::new(&runtime, 0);
        let cell = signal.cell();

        // Track the cell directly so the effect holds no signal handle.
        let rt = runtime.clone();
        let _effect = Effect::new(&runtime, move || rt.track(cell));
        assert_eq!(runtime.subscriber_count(cell), 1);

        drop(signal);
        assert_eq!(runtime.subscriber_count(cell), 0);
    }
}
