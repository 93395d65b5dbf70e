//! Identifier types for the reactive graph.
//!
//! A cell is one observable unit of state, keyed by the container that owns
//! it plus a field slot within that container. Cells are never materialized
//! as objects; `CellId` exists only as a graph-edge key. Computations get
//! their own stable identity so set membership and self-trigger checks never
//! depend on closure identity.

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a state-owning container.
///
/// Every `Signal`, `Computed`, or external state container allocates one
/// owner id for its lifetime. Uses an atomic counter to ensure uniqueness
/// across threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(u64);

impl OwnerId {
    /// Allocate a fresh owner id.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

/// A field slot within an owning container.
///
/// Containers assign their own field numbering; single-value owners use
/// [`FieldId::VALUE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub u32);

impl FieldId {
    /// The field slot used by owners that expose exactly one value.
    pub const VALUE: FieldId = FieldId(0);
}

/// Graph-edge key for one observable unit of state: (owner, field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId {
    owner: OwnerId,
    field: FieldId,
}

impl CellId {
    /// Build a cell key from an owner and a field slot.
    pub fn new(owner: OwnerId, field: FieldId) -> Self {
        Self { owner, field }
    }

    /// The single-value cell of an owner.
    pub fn value_of(owner: OwnerId) -> Self {
        Self::new(owner, FieldId::VALUE)
    }

    /// The owning container side of the key.
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// The field slot side of the key.
    pub fn field(&self) -> FieldId {
        self.field
    }
}

/// Unique identifier for a computation.
///
/// Handles wrap their state in `Arc`, so clones share one id; equality on
/// `ComputationId` is what the store, the stack, and the job queue use for
/// membership and deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputationId(u64);

impl ComputationId {
    /// Allocate a fresh computation id.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ComputationId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_ids_are_unique() {
        let a = OwnerId::new();
        let b = OwnerId::new();
        let c = OwnerId::new();

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn computation_ids_are_unique() {
        let a = ComputationId::new();
        let b = ComputationId::new();

        assert_ne!(a, b);
    }

    #[test]
    fn cell_keys_compare_by_owner_and_field() {
        let owner = OwnerId::new();
        let other = OwnerId::new();

        assert_eq!(
            CellId::new(owner, FieldId(3)),
            CellId::new(owner, FieldId(3))
        );
        assert_ne!(
            CellId::new(owner, FieldId(3)),
            CellId::new(owner, FieldId(4))
        );
        assert_ne!(CellId::value_of(owner), CellId::value_of(other));
        assert_eq!(CellId::value_of(owner).field(), FieldId::VALUE);
    }
}
