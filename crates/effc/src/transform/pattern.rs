//! The pattern-match compiler (§4.5.1): Jacobs' *How to compile pattern
//! matching*, specialized to the constructor/literal/wildcard patterns
//! [`crate::surface::Pattern`] supports.

use indexmap::IndexMap;

use crate::core_ir::{BlockExpr, Expr, Stmt};
use crate::surface::Pattern;
use crate::symbols::{SymbolId, SymbolTable, TermKind};

/// One row of a pattern match: which patterns remain to be tested, the
/// join-point block to jump to once they're all satisfied, and the
/// arguments that block expects (the variables bound by the row's own
/// patterns, in declaration order).
#[derive(Clone)]
pub struct Clause {
    pub patterns: IndexMap<SymbolId, Pattern>,
    pub target: SymbolId,
    pub args: Vec<SymbolId>,
}

/// Strips identifier/wildcard patterns out of a clause; what's left is
/// only constructor and literal patterns, which must be discriminated by
/// splitting on a variable.
fn normalize(mut clause: Clause) -> Clause {
    let aliases: Vec<(SymbolId, SymbolId)> = clause
        .patterns
        .iter()
        .filter_map(|(scrutinee, pattern)| match pattern {
            Pattern::Var(bound) => Some((*scrutinee, bound.symbol)),
            _ => None,
        })
        .collect();
    for (scrutinee, bound) in &aliases {
        clause.patterns.shift_remove(scrutinee);
        if !clause.args.contains(bound) {
            clause.args.push(*bound);
        }
    }
    clause.patterns.retain(|_, pattern| !matches!(pattern, Pattern::Wildcard));
    clause
}

/// Picks the scrutinee variable mentioned in the most remaining rows,
/// breaking ties by the order it was first seen.
fn choose_split_var(clauses: &[Clause]) -> SymbolId {
    let mut order = Vec::new();
    let mut counts: IndexMap<SymbolId, usize> = IndexMap::new();
    for clause in clauses {
        for var in clause.patterns.keys() {
            if !counts.contains_key(var) {
                order.push(*var);
            }
            *counts.entry(*var).or_insert(0) += 1;
        }
    }
    order
        .into_iter()
        .max_by_key(|var| counts[var])
        .expect("compile only calls choose_split_var on clauses with remaining patterns")
}

/// Distinct constructors appearing at `split_var`, in first-seen order,
/// together with each one's field arity.
fn collect_constructors(clauses: &[Clause], split_var: SymbolId) -> Vec<(SymbolId, usize)> {
    let mut seen = IndexMap::new();
    for clause in clauses {
        if let Some(Pattern::Constructor { tag, fields }) = clause.patterns.get(&split_var) {
            seen.entry(*tag).or_insert(fields.len());
        }
    }
    seen.into_iter().collect()
}

/// Compiles `clauses` into a [`Stmt::Match`] (or a degenerate form when
/// the first row already has nothing left to test). `clauses` is assumed
/// non-empty unless the whole match input was empty, in which case an
/// unreachable [`Stmt::Hole`] is produced.
#[must_use]
pub fn compile(clauses: Vec<Clause>, symbols: &mut SymbolTable) -> Stmt {
    if clauses.is_empty() {
        return Stmt::Hole;
    }
    let clauses: Vec<Clause> = clauses.into_iter().map(normalize).collect();
    if clauses[0].patterns.is_empty() {
        let clause = &clauses[0];
        return Stmt::App {
            callee: BlockExpr::BlockVar(clause.target),
            targs: vec![],
            args: clause.args.iter().map(|v| Expr::Pure(crate::core_ir::PureExpr::ValueVar(*v))).collect(),
        };
    }

    let split_var = choose_split_var(&clauses);
    let constructors = collect_constructors(&clauses, split_var);

    let mut branches = Vec::with_capacity(constructors.len());
    let mut default_rows = Vec::new();
    let mut any_omitted = false;

    for clause in &clauses {
        if !clause.patterns.contains_key(&split_var) {
            any_omitted = true;
            default_rows.push(clause.clone());
        }
    }

    for (tag, arity) in constructors {
        let params: Vec<SymbolId> = (0..arity).map(|_| symbols.fresh_synthetic(TermKind::Binder).id).collect();
        let mut rows = Vec::new();
        for clause in &clauses {
            match clause.patterns.get(&split_var) {
                Some(Pattern::Constructor { tag: row_tag, fields }) if *row_tag == tag => {
                    let mut child = clause.clone();
                    child.patterns.shift_remove(&split_var);
                    for (param, field) in params.iter().zip(fields) {
                        child.patterns.insert(*param, field.clone());
                    }
                    rows.push(child);
                }
                Some(_) => {}
                None => rows.push(clause.clone()),
            }
        }
        let body = compile(rows, symbols);
        branches.push((tag, BlockExpr::BlockLit { params, body: Box::new(body) }));
    }

    let default = if any_omitted {
        Some(Box::new(BlockExpr::BlockLit {
            params: vec![],
            body: Box::new(compile(default_rows, symbols)),
        }))
    } else {
        None
    };

    Stmt::Match { scrutinee: split_var, branches, default }
}
