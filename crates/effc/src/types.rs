//! Value and block types (§3), with alias dealiasing (§4.3).

use crate::{captures::CaptureSet, effects::EffectSet, symbols::SymbolId};

/// A value type: the type of something that fits in a register/variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    /// A type variable. `rigid` marks an inference variable that may not be
    /// further unified (used while checking a polymorphic definition body).
    TypeVar { symbol: SymbolId, rigid: bool },
    /// Application of a type constructor to arguments, e.g. `List[Int]`.
    App(SymbolId, Vec<ValueType>),
    /// A reference to a type alias together with the arguments it was
    /// applied to; [`ValueType::dealias`] substitutes and expands this.
    Alias(SymbolId, Vec<ValueType>),
    /// A boxed block, carrying the capture set required to call it.
    Boxed(Box<BlockType>, CaptureSet),
    /// A first-class function value living in a region.
    FunType(Box<BlockType>, SymbolId),
    /// A builtin atomic type (`Int`, `Bool`, `String`, `Unit`, ...).
    Builtin(SymbolId),
}

/// A block (function-shaped) type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockType {
    /// An interface type: a bundle of operation signatures with no applied
    /// effect row (§4.2 constructor-duality / §9 Open Question).
    Interface(SymbolId),
    /// The capability to perform operations of a user-defined effect.
    Capability(SymbolId),
    /// A module's set of exported operations.
    Module(Vec<SymbolId>),
    /// A function type: type parameters, value/block parameter sections,
    /// a return type, and the effects it may perform.
    Function {
        type_params: Vec<SymbolId>,
        sections: Vec<Vec<ValueType>>,
        ret: Box<ValueType>,
        effects: EffectSet,
    },
}

/// The definition a [`ValueType::Alias`]/[`BlockType`] alias resolves to,
/// keyed separately from the alias symbol itself so dealiasing can
/// substitute type parameters before recursing.
#[derive(Debug, Clone)]
pub struct AliasDef {
    pub type_params: Vec<SymbolId>,
    pub body: ValueType,
}

/// Looks up alias definitions during dealiasing. A real compiler backs this
/// with the module graph's type map; tests can use a bare `AHashMap`.
pub trait AliasResolver {
    fn resolve_alias(&self, symbol: SymbolId) -> Option<&AliasDef>;
}

impl ValueType {
    /// Substitutes `args` for `alias.type_params` in `alias.body`, then
    /// recursively dealiases. Non-alias constructors dealias their children.
    #[must_use]
    pub fn dealias(&self, resolver: &impl AliasResolver) -> ValueType {
        match self {
            Self::Alias(symbol, args) => {
                let Some(def) = resolver.resolve_alias(*symbol) else {
                    return self.clone();
                };
                let substituted = substitute(&def.body, &def.type_params, args);
                substituted.dealias(resolver)
            }
            Self::TypeVar { .. } | Self::Builtin(_) => self.clone(),
            Self::App(head, args) => Self::App(*head, args.iter().map(|a| a.dealias(resolver)).collect()),
            Self::Boxed(block, captures) => Self::Boxed(Box::new(block.dealias(resolver)), captures.clone()),
            Self::FunType(block, region) => Self::FunType(Box::new(block.dealias(resolver)), *region),
        }
    }
}

impl BlockType {
    #[must_use]
    pub fn dealias(&self, resolver: &impl AliasResolver) -> BlockType {
        match self {
            Self::Interface(_) | Self::Capability(_) | Self::Module(_) => self.clone(),
            Self::Function {
                type_params,
                sections,
                ret,
                effects,
            } => Self::Function {
                type_params: type_params.clone(),
                sections: sections
                    .iter()
                    .map(|section| section.iter().map(|t| t.dealias(resolver)).collect())
                    .collect(),
                ret: Box::new(ret.dealias(resolver)),
                effects: effects.clone(),
            },
        }
    }
}

/// Replaces every occurrence of a type parameter with its corresponding
/// argument. `params` and `args` are positionally matched; extra params
/// with no matching arg are left as-is (under-application is a typer bug,
/// not something this substitution needs to detect).
fn substitute(body: &ValueType, params: &[SymbolId], args: &[ValueType]) -> ValueType {
    match body {
        ValueType::TypeVar { symbol, .. } => params
            .iter()
            .position(|p| p == symbol)
            .and_then(|i| args.get(i).cloned())
            .unwrap_or_else(|| body.clone()),
        ValueType::App(head, targs) => {
            ValueType::App(*head, targs.iter().map(|t| substitute(t, params, args)).collect())
        }
        ValueType::Alias(sym, targs) => {
            ValueType::Alias(*sym, targs.iter().map(|t| substitute(t, params, args)).collect())
        }
        ValueType::Boxed(block, captures) => {
            ValueType::Boxed(Box::new(substitute_block(block, params, args)), captures.clone())
        }
        ValueType::FunType(block, region) => ValueType::FunType(Box::new(substitute_block(block, params, args)), *region),
        ValueType::Builtin(_) => body.clone(),
    }
}

fn substitute_block(block: &BlockType, params: &[SymbolId], args: &[ValueType]) -> BlockType {
    match block {
        BlockType::Interface(_) | BlockType::Capability(_) | BlockType::Module(_) => block.clone(),
        BlockType::Function {
            type_params,
            sections,
            ret,
            effects,
        } => BlockType::Function {
            type_params: type_params.clone(),
            sections: sections
                .iter()
                .map(|section| section.iter().map(|t| substitute(t, params, args)).collect())
                .collect(),
            ret: Box::new(substitute(ret, params, args)),
            effects: effects.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashMap;

    struct MapResolver(AHashMap<SymbolId, AliasDef>);
    impl AliasResolver for MapResolver {
        fn resolve_alias(&self, symbol: SymbolId) -> Option<&AliasDef> {
            self.0.get(&symbol)
        }
    }

    fn fresh(table: &mut crate::symbols::SymbolTable) -> SymbolId {
        table.fresh(crate::names::Name::Blk, crate::symbols::Universe::Type).id
    }

    #[test]
    fn dealias_substitutes_and_recurses() {
        let mut table = crate::symbols::SymbolTable::new();
        let alias_sym = fresh(&mut table);
        let param = fresh(&mut table);
        let int_ty = fresh(&mut table);

        // type Pair = (T, T)
        let mut resolver = AHashMap::new();
        resolver.insert(
            alias_sym,
            AliasDef {
                type_params: vec![param],
                body: ValueType::App(
                    alias_sym,
                    vec![
                        ValueType::TypeVar { symbol: param, rigid: false },
                        ValueType::TypeVar { symbol: param, rigid: false },
                    ],
                ),
            },
        );
        let resolver = MapResolver(resolver);

        let applied = ValueType::Alias(alias_sym, vec![ValueType::Builtin(int_ty)]);
        let dealiased = applied.dealias(&resolver);
        assert_eq!(
            dealiased,
            ValueType::App(alias_sym, vec![ValueType::Builtin(int_ty), ValueType::Builtin(int_ty)])
        );
    }

    #[test]
    fn non_alias_dealiases_children_only() {
        let mut table = crate::symbols::SymbolTable::new();
        let head = fresh(&mut table);
        let int_ty = fresh(&mut table);
        let resolver = MapResolver(AHashMap::new());
        let ty = ValueType::App(head, vec![ValueType::Builtin(int_ty)]);
        assert_eq!(ty.dealias(&resolver), ty);
    }
}
