//! The dependency store.
//!
//! Owns the cell → subscriber-set half of the reactive graph: a two-level
//! map from owner to field to the set of computations that read that cell
//! during their last run. The other half (each computation's back-reference
//! list of cells) lives on the computation handles themselves; the two are
//! kept in sync by `Runtime::track` and the cleanup-before-rerun protocol.
//!
//! Entries are created lazily on first track. Subscribers are held weakly,
//! so the graph never keeps a dropped computation alive; dead entries are
//! pruned whenever a cell is triggered. Entries for a destroyed owner are
//! reclaimed explicitly via [`DepStore::dispose_owner`].

use std::sync::{Arc, Weak};

use indexmap::IndexMap;

use super::cell::{CellId, ComputationId, FieldId, OwnerId};
use super::runtime::AnyComputation;

/// The subscribers of one cell, keyed by computation id for dedup and
/// identity-based removal.
type Subscribers = IndexMap<ComputationId, Weak<dyn AnyComputation>>;

/// Mapping from owner to field to subscriber set.
///
/// Plain data structure; the owning `Runtime` serializes access behind a
/// lock and never calls out to user code while holding it.
pub(crate) struct DepStore {
    owners: IndexMap<OwnerId, IndexMap<FieldId, Subscribers>>,
}

impl DepStore {
    pub(crate) fn new() -> Self {
        Self {
            owners: IndexMap::new(),
        }
    }

    /// Add a computation to a cell's subscriber set.
    ///
    /// Creates the owner and field entries on demand. Re-subscribing an
    /// already-present computation is a no-op.
    pub(crate) fn subscribe(
        &mut self,
        cell: CellId,
        id: ComputationId,
        handle: Weak<dyn AnyComputation>,
    ) {
        self.owners
            .entry(cell.owner())
            .or_default()
            .entry(cell.field())
            .or_default()
            .entry(id)
            .or_insert(handle);
    }

    /// Remove a computation from a cell's subscriber set.
    ///
    /// Empty field and owner entries are pruned so the store does not grow
    /// with the history of past subscriptions. Missing entries (e.g. after
    /// the owner was disposed) are a no-op.
    pub(crate) fn unsubscribe(&mut self, cell: CellId, id: ComputationId) {
        let Some(fields) = self.owners.get_mut(&cell.owner()) else {
            return;
        };
        let Some(subscribers) = fields.get_mut(&cell.field()) else {
            return;
        };

        subscribers.swap_remove(&id);

        if subscribers.is_empty() {
            fields.swap_remove(&cell.field());
        }
        if fields.is_empty() {
            self.owners.swap_remove(&cell.owner());
        }
    }

    /// Snapshot a cell's subscribers into a fresh list of strong handles.
    ///
    /// Triggering iterates this snapshot, never the live set: re-running a
    /// subscriber removes and re-adds memberships mid-iteration, which is
    /// unsafe on the set itself. Dead weak entries are pruned on the way.
    pub(crate) fn snapshot(&mut self, cell: CellId) -> Vec<Arc<dyn AnyComputation>> {
        let Some(subscribers) = self
            .owners
            .get_mut(&cell.owner())
            .and_then(|fields| fields.get_mut(&cell.field()))
        else {
            return Vec::new();
        };

        subscribers.retain(|_, weak| weak.strong_count() > 0);
        subscribers
            .values()
            .filter_map(|weak| weak.upgrade())
            .collect()
    }

    /// Purge every entry of a destroyed owner.
    ///
    /// Returns the number of cells reclaimed. Computations still listing
    /// the owner's cells on their back-reference lists clean up harmlessly
    /// through the `unsubscribe` no-op path.
    pub(crate) fn dispose_owner(&mut self, owner: OwnerId) -> usize {
        self.owners
            .swap_remove(&owner)
            .map(|fields| fields.len())
            .unwrap_or(0)
    }

    /// Number of live subscribers recorded for a cell.
    pub(crate) fn subscriber_count(&self, cell: CellId) -> usize {
        self.owners
            .get(&cell.owner())
            .and_then(|fields| fields.get(&cell.field()))
            .map(|subscribers| {
                subscribers
                    .values()
                    .filter(|weak| weak.strong_count() > 0)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Number of owners with at least one recorded cell.
    pub(crate) fn owner_count(&self) -> usize {
        self.owners.len()
    }
}
