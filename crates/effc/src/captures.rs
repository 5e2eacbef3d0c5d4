//! Capture sets: the footprint that drives purity-aware lowering (§4.5).

use crate::symbols::SymbolId;

/// A single captured resource, region, or capability reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capture {
    /// Ambient input/output.
    Io,
    /// A lexical region introduced by `region { ... }`.
    Region(SymbolId),
    /// A resource capability (e.g. a file handle capability).
    Resource(SymbolId),
    /// An effect-handler's control capability — the one category that is
    /// never pure-or-IO, since resuming it may suspend.
    Control(SymbolId),
}

impl Capture {
    /// A capture is pure-or-IO iff it is I/O, a region, or a resource —
    /// never the control capability (§4.3).
    #[must_use]
    pub fn is_pure_or_io(self) -> bool {
        !matches!(self, Self::Control(_))
    }
}

/// A duplicate-free set of [`Capture`]s describing a term's side-effect
/// footprint. Purity is the empty set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureSet {
    members: Vec<Capture>,
}

impl CaptureSet {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn singleton(capture: Capture) -> Self {
        Self { members: vec![capture] }
    }

    pub fn from_iter(captures: impl IntoIterator<Item = Capture>) -> Self {
        let mut set = Self::default();
        for c in captures {
            set.insert(c);
        }
        set
    }

    pub fn insert(&mut self, capture: Capture) {
        if !self.members.contains(&capture) {
            self.members.push(capture);
        }
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for &c in &other.members {
            out.insert(c);
        }
        out
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub fn is_pure(&self) -> bool {
        self.is_empty()
    }

    /// Every member is I/O, a region, or a resource — never the control
    /// capability. Drives the `Run`/`App` choice in the transformer.
    #[must_use]
    pub fn is_pure_or_io(&self) -> bool {
        self.members.iter().all(|c| c.is_pure_or_io())
    }

    #[must_use]
    pub fn members(&self) -> &[Capture] {
        &self.members
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(n: u32) -> SymbolId {
        // SymbolId has no public constructor by design (identity is owned by
        // SymbolTable); tests here only need distinct opaque values, which we
        // get by allocating through a real table.
        let mut table = crate::symbols::SymbolTable::new();
        for _ in 0..n {
            table.fresh(crate::names::Name::Blk, crate::symbols::Universe::Value);
        }
        table.fresh(crate::names::Name::Blk, crate::symbols::Universe::Value).id
    }

    #[test]
    fn control_capture_is_never_pure_or_io() {
        let set = CaptureSet::singleton(Capture::Control(sym(0)));
        assert!(!set.is_pure_or_io());
    }

    #[test]
    fn io_region_resource_are_pure_or_io() {
        let set = CaptureSet::from_iter([Capture::Io, Capture::Region(sym(1)), Capture::Resource(sym(2))]);
        assert!(set.is_pure_or_io());
        assert!(!set.is_pure());
    }

    #[test]
    fn union_deduplicates() {
        let a = CaptureSet::singleton(Capture::Io);
        let b = CaptureSet::from_iter([Capture::Io, Capture::Region(sym(3))]);
        let merged = a.union(&b);
        assert_eq!(merged.members().len(), 2);
    }

    #[test]
    fn empty_set_is_pure() {
        assert!(CaptureSet::empty().is_pure());
        assert!(CaptureSet::empty().is_pure_or_io());
    }
}
