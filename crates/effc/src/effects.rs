//! Effects and effect rows (§3, §4.3).
//!
//! An effect row is a duplicate-free, alias-expanded set of [`Effect`]s.
//! The only way to construct one is [`EffectSet::new`], the "smart
//! constructor" that dealiases on the way in so the stored list never
//! contains an alias — every other operation preserves that invariant.

use crate::{symbols::SymbolId, types::ValueType};

/// An effect: a named symbol, an application to type arguments, or an
/// alias. Alias nodes never survive into a committed [`EffectSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Named(SymbolId),
    App(Box<Effect>, Vec<ValueType>),
    Alias(SymbolId, Box<Effect>),
}

/// Looks up what an effect alias expands to.
pub trait EffectAliasResolver {
    fn resolve_effect_alias(&self, symbol: SymbolId) -> Option<&Effect>;
}

impl Effect {
    /// Expands `Alias` nodes (using `resolver` as a fallback when the alias
    /// itself doesn't carry its expansion inline) and dealiases children of
    /// `App`.
    #[must_use]
    pub fn dealias(&self, resolver: &impl EffectAliasResolver) -> Effect {
        match self {
            Self::Alias(symbol, inline) => resolver
                .resolve_effect_alias(*symbol)
                .unwrap_or(inline)
                .dealias(resolver),
            Self::App(base, args) => Self::App(Box::new(base.dealias(resolver)), args.clone()),
            Self::Named(_) => self.clone(),
        }
    }

    /// The symbol this effect is ultimately named after, for builtin
    /// partitioning and display.
    #[must_use]
    pub fn head_symbol(&self) -> SymbolId {
        match self {
            Self::Named(s) => *s,
            Self::App(base, _) => base.head_symbol(),
            Self::Alias(s, _) => *s,
        }
    }
}

/// A duplicate-free set of effects with value equality defined as mutual
/// subset (§4.3).
#[derive(Debug, Clone, Default)]
pub struct EffectSet {
    members: Vec<Effect>,
}

impl PartialEq for EffectSet {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Eq for EffectSet {}

impl EffectSet {
    /// The only constructor: dealiases every member before storing it, so
    /// an `EffectSet` never contains an `Effect::Alias`.
    #[must_use]
    pub fn new(effects: impl IntoIterator<Item = Effect>, resolver: &impl EffectAliasResolver) -> Self {
        let mut set = Self::default();
        for effect in effects {
            set.insert(effect.dealias(resolver));
        }
        set
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    fn insert(&mut self, effect: Effect) {
        if !self.members.contains(&effect) {
            self.members.push(effect);
        }
    }

    /// Expands aliases on both sides before testing containment, so a row
    /// built from an un-dealiased probe effect still matches correctly.
    #[must_use]
    pub fn contains(&self, effect: &Effect, resolver: &impl EffectAliasResolver) -> bool {
        let probe = effect.dealias(resolver);
        self.members.contains(&probe)
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for e in &other.members {
            out.insert(e.clone());
        }
        out
    }

    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        Self {
            members: self.members.iter().filter(|e| !other.members.contains(e)).cloned().collect(),
        }
    }

    pub fn filter(&self, mut keep: impl FnMut(&Effect) -> bool) -> Self {
        Self {
            members: self.members.iter().filter(|e| keep(e)).cloned().collect(),
        }
    }

    /// Partitions into builtin and user-defined effects per
    /// [`crate::symbols::SymbolTable::is_builtin`].
    #[must_use]
    pub fn partition_builtin(&self, table: &crate::symbols::SymbolTable) -> (Self, Self) {
        let builtin = self.filter(|e| table.is_builtin(e.head_symbol()));
        let user_defined = self.filter(|e| !table.is_builtin(e.head_symbol()));
        (builtin, user_defined)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub fn members(&self) -> &[Effect] {
        &self.members
    }

    /// Mutual-subset equality, modulo alias expansion (members are already
    /// dealiased, so plain multiset equality suffices).
    #[must_use]
    pub fn equals(&self, other: &Self) -> bool {
        self.members.len() == other.members.len() && self.members.iter().all(|e| other.members.contains(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoAliases;
    impl EffectAliasResolver for NoAliases {
        fn resolve_effect_alias(&self, _symbol: SymbolId) -> Option<&Effect> {
            None
        }
    }

    fn sym(table: &mut crate::symbols::SymbolTable) -> SymbolId {
        table.fresh(crate::names::Name::Blk, crate::symbols::Universe::Type).id
    }

    #[test]
    fn equality_is_order_independent() {
        let mut table = crate::symbols::SymbolTable::new();
        let a = sym(&mut table);
        let b = sym(&mut table);
        let s1 = EffectSet::new([Effect::Named(a), Effect::Named(b)], &NoAliases);
        let s2 = EffectSet::new([Effect::Named(b), Effect::Named(a)], &NoAliases);
        assert!(s1.equals(&s2));
    }

    #[test]
    fn duplicate_members_collapse() {
        let mut table = crate::symbols::SymbolTable::new();
        let a = sym(&mut table);
        let set = EffectSet::new([Effect::Named(a), Effect::Named(a)], &NoAliases);
        assert_eq!(set.members().len(), 1);
    }

    #[test]
    fn alias_never_survives_construction() {
        let mut table = crate::symbols::SymbolTable::new();
        let alias_sym = sym(&mut table);
        let real_sym = sym(&mut table);
        struct OneAlias {
            alias: SymbolId,
            real: Effect,
        }
        impl EffectAliasResolver for OneAlias {
            fn resolve_effect_alias(&self, symbol: SymbolId) -> Option<&Effect> {
                (symbol == self.alias).then_some(&self.real)
            }
        }
        let resolver = OneAlias {
            alias: alias_sym,
            real: Effect::Named(real_sym),
        };
        let set = EffectSet::new([Effect::Alias(alias_sym, Box::new(Effect::Named(alias_sym)))], &resolver);
        assert_eq!(set.members(), &[Effect::Named(real_sym)]);
    }

    #[test]
    fn partition_builtin_splits_by_table_flag() {
        let mut table = crate::symbols::SymbolTable::new();
        let builtin_sym = table.fresh_builtin(crate::names::Name::Blk, crate::symbols::Universe::Type).id;
        let user_sym = sym(&mut table);
        let set = EffectSet::new([Effect::Named(builtin_sym), Effect::Named(user_sym)], &NoAliases);
        let (builtin, user_defined) = set.partition_builtin(&table);
        assert_eq!(builtin.members(), &[Effect::Named(builtin_sym)]);
        assert_eq!(user_defined.members(), &[Effect::Named(user_sym)]);
    }
}
