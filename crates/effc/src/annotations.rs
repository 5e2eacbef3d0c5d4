//! The annotations store (§4.1): phase-local and global storage for
//! inferred facts, keyed by the *identity* of a tree node or symbol, never
//! by structural equality.
//!
//! Rust has no reflection-friendly phantom generic fields the way the
//! source language's annotation type does, so the same contract is
//! realized with [`std::any::Any`]: each [`Annotation`] marker type names a
//! `Key`/`Value` pair, and the store keeps a type-erased bag of values per
//! key identity, downcast back to the concrete `Value` type on read. The
//! phantom types still exist — they live on the marker, not on the stored
//! payload.

use std::any::{Any, TypeId};

use ahash::AHashMap;

/// Anything usable as an annotation key must have a stable, cheap-to-copy
/// identity across the compilation lifetime (a `NodeId` or `SymbolId`).
pub trait Identity: Copy + Eq + std::hash::Hash + 'static {
    fn identity(&self) -> u64;
}

/// Marker type naming one annotation's key/value pair. Implement this for a
/// zero-sized unit struct per annotation, e.g. `enum ValueTypeAnn {}`.
pub trait Annotation: 'static {
    type Key: Identity;
    type Value: Clone + 'static;
    /// Used only for diagnostics (`require` panic messages, debug output).
    const NAME: &'static str;
}

trait ErasedClone: Any {
    fn clone_erased(&self) -> Box<dyn ErasedClone>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Clone + 'static> ErasedClone for T {
    fn clone_erased(&self) -> Box<dyn ErasedClone> {
        Box::new(self.clone())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Clone for Box<dyn ErasedClone> {
    fn clone(&self) -> Self {
        self.as_ref().clone_erased()
    }
}

/// One key's bag of annotations, keyed by the annotation marker's `TypeId`.
type Bag = AHashMap<TypeId, Box<dyn ErasedClone>>;

/// Append-only (after commit) store of `(identity-of-key, annotation) ->
/// value` facts. See module docs and §4.1 for the full contract.
#[derive(Clone, Default)]
pub struct AnnotationsStore {
    by_key: AHashMap<u64, Bag>,
}

impl AnnotationsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `value` under `(A, key)`, replacing any prior value. Never
    /// fails (§4.1 error model).
    pub fn annotate<A: Annotation>(&mut self, key: A::Key, value: A::Value) {
        self.by_key
            .entry(key.identity())
            .or_default()
            .insert(TypeId::of::<A>(), Box::new(value));
    }

    #[must_use]
    pub fn get<A: Annotation>(&self, key: A::Key) -> Option<&A::Value> {
        self.by_key
            .get(&key.identity())?
            .get(&TypeId::of::<A>())?
            .as_any()
            .downcast_ref::<A::Value>()
    }

    /// Looks up `(A, key)`; on miss this is an internal-compiler-error, per
    /// §4.1 and §7: the compiler considers a missing required annotation a
    /// bug, not a recoverable condition.
    pub fn require<A: Annotation>(&self, key: A::Key) -> &A::Value {
        self.get::<A>(key)
            .unwrap_or_else(|| crate::diagnostics::ice(&format!("missing required annotation `{}`", A::NAME)))
    }

    #[must_use]
    pub fn has<A: Annotation>(&self, key: A::Key) -> bool {
        self.get::<A>(key).is_some()
    }

    /// Merges every `(A, key)` pair from `annotations` for a single key,
    /// overwriting any existing value for the same annotation.
    pub fn bulk_annotate<A: Annotation>(&mut self, key: A::Key, values: impl IntoIterator<Item = A::Value>) {
        if let Some(value) = values.into_iter().last() {
            self.annotate::<A>(key, value);
        }
    }

    /// Adds every annotation `from` has to `to`, without overwriting
    /// anything already present on `to`.
    pub fn copy_annotations(&mut self, from: impl Identity, to: impl Identity) {
        let Some(source) = self.by_key.get(&from.identity()).cloned() else {
            return;
        };
        let target = self.by_key.entry(to.identity()).or_default();
        for (ty, value) in source {
            target.entry(ty).or_insert(value);
        }
    }

    /// All key identities carrying an `A` annotation, for LSP enumeration.
    pub fn keys_with<A: Annotation>(&self) -> Vec<u64> {
        self.by_key
            .iter()
            .filter(|(_, bag)| bag.contains_key(&TypeId::of::<A>()))
            .map(|(k, _)| *k)
            .collect()
    }

    /// Deep-clones this store into an independent overlay: mutating the
    /// clone never affects `self` (§4.1 "Local overlay").
    #[must_use]
    pub fn clone_overlay(&self) -> Self {
        self.clone()
    }

    /// Commits every annotation in `self` into `global`, overwriting
    /// existing values. Idempotent when the same values are written twice.
    pub fn commit_into(&self, global: &mut Self) {
        for (key, bag) in &self.by_key {
            let target = global.by_key.entry(*key).or_default();
            for (ty, value) in bag {
                target.insert(*ty, value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, PartialEq, Eq, Hash)]
    struct TestKey(u64);
    impl Identity for TestKey {
        fn identity(&self) -> u64 {
            self.0
        }
    }

    enum Ann {}
    impl Annotation for Ann {
        type Key = TestKey;
        type Value = i32;
        const NAME: &'static str = "Ann";
    }

    enum OtherAnn {}
    impl Annotation for OtherAnn {
        type Key = TestKey;
        type Value = &'static str;
        const NAME: &'static str = "OtherAnn";
    }

    #[test]
    fn annotate_then_get_round_trips() {
        let mut store = AnnotationsStore::new();
        store.annotate::<Ann>(TestKey(1), 42);
        assert_eq!(store.get::<Ann>(TestKey(1)), Some(&42));
        assert_eq!(store.get::<Ann>(TestKey(2)), None);
    }

    #[test]
    fn distinct_keys_with_equal_identity_payload_stay_independent() {
        // Two structurally-equal positions (TestKey(1) used twice) must
        // still only ever reflect the latest write for that exact identity.
        let mut store = AnnotationsStore::new();
        store.annotate::<Ann>(TestKey(1), 1);
        store.annotate::<Ann>(TestKey(2), 2);
        assert_eq!(store.get::<Ann>(TestKey(1)), Some(&1));
        assert_eq!(store.get::<Ann>(TestKey(2)), Some(&2));
    }

    #[test]
    fn multiple_annotation_kinds_coexist_on_one_key() {
        let mut store = AnnotationsStore::new();
        store.annotate::<Ann>(TestKey(1), 7);
        store.annotate::<OtherAnn>(TestKey(1), "hi");
        assert_eq!(store.get::<Ann>(TestKey(1)), Some(&7));
        assert_eq!(store.get::<OtherAnn>(TestKey(1)), Some(&"hi"));
    }

    #[test]
    fn overwriting_replaces_prior_value() {
        let mut store = AnnotationsStore::new();
        store.annotate::<Ann>(TestKey(1), 1);
        store.annotate::<Ann>(TestKey(1), 2);
        assert_eq!(store.get::<Ann>(TestKey(1)), Some(&2));
    }

    #[test]
    #[should_panic(expected = "internal")]
    fn require_panics_on_miss() {
        let store = AnnotationsStore::new();
        store.require::<Ann>(TestKey(1));
    }

    #[test]
    fn clone_overlay_is_independent() {
        let mut original = AnnotationsStore::new();
        original.annotate::<Ann>(TestKey(1), 1);
        let mut clone = original.clone_overlay();
        clone.annotate::<Ann>(TestKey(1), 2);
        assert_eq!(original.get::<Ann>(TestKey(1)), Some(&1));
        assert_eq!(clone.get::<Ann>(TestKey(1)), Some(&2));
    }

    #[test]
    fn commit_merges_without_losing_unrelated_keys() {
        let mut global = AnnotationsStore::new();
        global.annotate::<Ann>(TestKey(9), 9);
        let mut local = global.clone_overlay();
        local.annotate::<Ann>(TestKey(1), 1);
        local.commit_into(&mut global);
        assert_eq!(global.get::<Ann>(TestKey(1)), Some(&1));
        assert_eq!(global.get::<Ann>(TestKey(9)), Some(&9));
    }

    #[test]
    fn commit_is_idempotent_for_equal_values() {
        let mut global = AnnotationsStore::new();
        let local = {
            let mut l = global.clone_overlay();
            l.annotate::<Ann>(TestKey(1), 5);
            l
        };
        local.commit_into(&mut global);
        local.commit_into(&mut global);
        assert_eq!(global.get::<Ann>(TestKey(1)), Some(&5));
    }

    #[test]
    fn copy_annotations_does_not_overwrite_existing() {
        let mut store = AnnotationsStore::new();
        store.annotate::<Ann>(TestKey(1), 1);
        store.annotate::<Ann>(TestKey(2), 99);
        store.copy_annotations(TestKey(1), TestKey(2));
        assert_eq!(store.get::<Ann>(TestKey(2)), Some(&99));
    }

    #[test]
    fn copy_annotations_adds_missing_ones() {
        let mut store = AnnotationsStore::new();
        store.annotate::<Ann>(TestKey(1), 1);
        store.annotate::<OtherAnn>(TestKey(1), "x");
        store.copy_annotations(TestKey(1), TestKey(2));
        assert_eq!(store.get::<Ann>(TestKey(2)), Some(&1));
        assert_eq!(store.get::<OtherAnn>(TestKey(2)), Some(&"x"));
    }

    #[test]
    fn keys_with_enumerates_only_matching_annotation() {
        let mut store = AnnotationsStore::new();
        store.annotate::<Ann>(TestKey(1), 1);
        store.annotate::<OtherAnn>(TestKey(2), "x");
        let mut keys = store.keys_with::<Ann>();
        keys.sort_unstable();
        assert_eq!(keys, vec![1]);
    }
}
