//! Weft Core
//!
//! This crate provides the reactive dependency-tracking engine for the
//! Weft framework. It implements:
//!
//! - The cell → subscriber graph with `track`/`trigger` primitives
//! - Re-runnable effects with exact dependency resolution
//! - Lazily-cached computed values
//! - Watchers with batched dispatch and stale-result cancellation
//!
//! # Architecture
//!
//! Everything lives under the [`reactive`] module:
//!
//! - `Runtime` owns the dependency store, the active-computation stack,
//!   and the job queue. Runtimes are explicit values; two runtimes never
//!   observe each other's state.
//! - `Signal` is the shipped state wrapper; any container that calls
//!   `track` on reads and `trigger` on writes participates the same way.
//! - `Effect`, `Computed`, and `Watcher` are built entirely on the
//!   runtime's primitives.
//!
//! # Example
//!
//! ```rust,ignore
//! use weft_core::reactive::Runtime;
//!
//! let runtime = Runtime::new();
//! let count = runtime.signal(0);
//!
//! let count_reader = count.clone();
//! let doubled = runtime.computed(move || count_reader.get() * 2);
//!
//! let doubled_reader = doubled.clone();
//! let _logger = runtime.effect(move || {
//!     println!("doubled: {}", doubled_reader.get());
//! });
//!
//! count.set(5);
//! // Effect re-runs, prints: "doubled: 10"
//! ```

pub mod reactive;

pub use reactive::{
    CellId, ComputationId, Computed, Effect, EffectOptions, FieldId, Flush, FlushError, FlushMode,
    OnInvalidate, OwnerId, RunnerHandle, Runtime, SchedulerFn, Signal, Traverse, Visited,
    WatchOptions, Watcher,
};
