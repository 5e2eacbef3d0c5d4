//! Built-in programs the CLI can compile and run.
//!
//! This crate has no external parser (by design, see `effc`'s surface
//! tree doc comment) — surface trees are constructed directly, the way
//! the unit tests in `effc::session` build them. A handful of named
//! programs stand in for the source files a real frontend would read.

use effc::names::Name;
use effc::session::CompileSession;
use effc::surface::{Expr, IdRef, Literal, NodeId};
use effc::symbols::Universe;
use effc::transform::{SymbolRole, SymbolRoleAnn};

/// Registers any intrinsics `name` depends on, then builds its tree.
///
/// # Errors
/// Returns an error message if `name` isn't a known program.
pub fn build(session: &mut CompileSession, name: &str) -> Result<Expr, String> {
    match name {
        "identity" => Ok(identity()),
        "if" => Ok(branch()),
        "inc" => Ok(increment(session)),
        other => Err(format!("unknown program `{other}` (known: identity, if, inc)")),
    }
}

pub const NAMES: &[&str] = &["identity", "if", "inc"];

fn identity() -> Expr {
    Expr::Lit(NodeId::from_raw(0), Literal::Int(42))
}

fn branch() -> Expr {
    Expr::If {
        node: NodeId::from_raw(0),
        cond: Box::new(Expr::Lit(NodeId::from_raw(1), Literal::Bool(true))),
        then_branch: Box::new(Expr::Lit(NodeId::from_raw(2), Literal::Int(1))),
        else_branch: Box::new(Expr::Lit(NodeId::from_raw(3), Literal::Int(0))),
    }
}

/// Calls an extern `inc` intrinsic on a literal, exercising the
/// extern-function call path backends route through `DirectApp`.
fn increment(session: &mut CompileSession) -> Expr {
    let word = session.words.intern("inc");
    let symbol = session.symbols.fresh(Name::local(word), Universe::Block).id;
    session.annotations.annotate::<SymbolRoleAnn>(symbol, SymbolRole::ExternFunction);
    session.define_intrinsic(symbol, |args| match args {
        [effc::runtime::RtValue::Int(n)] => effc::runtime::RtValue::Int(n + 1),
        _ => effc::runtime::RtValue::Unit,
    });

    Expr::Call {
        node: NodeId::from_raw(0),
        callee: IdRef { node: NodeId::from_raw(0), symbol },
        args: vec![Expr::Lit(NodeId::from_raw(1), Literal::Int(41))],
    }
}
