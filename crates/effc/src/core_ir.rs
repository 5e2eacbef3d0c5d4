//! The core IR the transformer lowers into: ANF statements over a small set
//! of pure/effectful expression forms plus block-level definitions (§4.5).

use crate::symbols::SymbolId;

/// A value-level core type, just enough structure for the IR to carry
/// around without needing the full surface type algebra.
pub type CoreType = crate::types::ValueType;

/// A pure expression: never suspends, never allocates a binding-buffer
/// entry on its own.
#[derive(Debug, Clone)]
pub enum PureExpr {
    ValueVar(SymbolId),
    Literal(Literal),
    /// Boxes a block value into a first-class value (closure capture).
    Box(Box<BlockExpr>),
    /// A saturated call to a symbol known to be pure (extern function or
    /// data constructor); never takes block arguments.
    PureApp {
        callee: SymbolId,
        targs: Vec<CoreType>,
        vargs: Vec<PureExpr>,
    },
    /// Field projection on a pure value (record access).
    Select { receiver: Box<PureExpr>, field: SymbolId },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Unit,
    Bool(bool),
    Int(i64),
    Str(String),
}

/// A block (function/capability/module) value.
#[derive(Debug, Clone)]
pub enum BlockExpr {
    BlockVar(SymbolId),
    BlockLit { params: Vec<SymbolId>, body: Box<Stmt> },
    /// Method/member selection, e.g. `state.get`, `state.put`.
    Member { receiver: Box<BlockExpr>, member: SymbolId },
    /// Unboxes a value back into a block (the dual of `PureExpr::Box`).
    Unbox(Box<PureExpr>),
    /// A freshly-allocated, still-uninitialized block reference (used by
    /// the match compiler's join points before the body is filled in).
    New(SymbolId),
}

/// A possibly side-effecting expression that appears on the right of a
/// `Val`/`Let` binding or as a statement in tail position.
#[derive(Debug, Clone)]
pub enum Expr {
    Pure(PureExpr),
    /// A direct (non-suspending) call: extern `pureOrIO` functions, and
    /// the built-in state `get`/`put` operations.
    DirectApp {
        callee: BlockExpr,
        targs: Vec<CoreType>,
        args: Vec<Expr>,
    },
    /// An ordinary block application, possibly suspending.
    App {
        callee: BlockExpr,
        targs: Vec<CoreType>,
        args: Vec<Expr>,
    },
    /// Runs a computation known to be pure-or-IO to completion inline,
    /// inserted by `reify`'s peephole reductions and by direct lowering
    /// of `pureOrIO` calls.
    Run(Box<Stmt>),
}

/// An ANF statement: either a binding followed by a continuation, or a
/// terminal form.
#[derive(Debug, Clone)]
pub enum Stmt {
    /// `val x = value; rest` — `value` must be pure-or-IO.
    Val { binder: SymbolId, value: Expr, rest: Box<Stmt> },
    /// `let x = value; rest` — `value` may suspend.
    Let { binder: SymbolId, value: Expr, rest: Box<Stmt> },
    /// A block/function definition visible in `rest`.
    Def { binder: SymbolId, value: BlockExpr, rest: Box<Stmt> },
    /// A mutable-variable binding backed by a state cell, established by
    /// `region`/`VarDef` lowering.
    State {
        binder: SymbolId,
        init: Expr,
        region: Box<BlockExpr>,
        rest: Box<Stmt>,
    },
    Return(PureExpr),
    App { callee: BlockExpr, targs: Vec<CoreType>, args: Vec<Expr> },
    If { cond: PureExpr, then_branch: Box<Stmt>, else_branch: Box<Stmt> },
    /// Dispatches on the constructor tag of `scrutinee`; `default` covers
    /// constructors with no explicit branch.
    Match {
        scrutinee: SymbolId,
        branches: Vec<(SymbolId, BlockExpr)>,
        default: Option<Box<BlockExpr>>,
    },
    /// Establishes a fresh delimited-control prompt over `body`, dispatching
    /// `handlers` in operation-declaration order.
    Try { body: Box<BlockExpr>, handlers: Vec<BlockExpr> },
    /// Establishes a state-backed prompt without arbitrary operations.
    Region(Box<BlockExpr>),
    /// Unreachable at runtime; reached only via an incomplete program.
    Hole,
}

/// A top-level definition.
#[derive(Debug, Clone)]
pub enum Definition {
    Data { symbol: SymbolId, constructors: Vec<SymbolId> },
    Record { symbol: SymbolId, fields: Vec<SymbolId> },
    Interface { symbol: SymbolId, operations: Vec<SymbolId> },
    Extern {
        symbol: SymbolId,
        body: ExternBody,
    },
}

/// An extern definition's backend-supplied implementation.
#[derive(Debug, Clone)]
pub enum ExternBody {
    /// A per-backend source-code template, keyed by backend name.
    Def(Vec<(String, String)>),
    /// A raw include emitted verbatim ahead of generated code.
    Include(String),
}

/// A lowered compilation unit: the top-level definitions in declaration
/// order plus the entry-point statement tree. What `Transformer::lower`
/// hands back to a [`crate::session::CompileSession`].
#[derive(Debug, Clone)]
pub struct Module {
    pub definitions: Vec<Definition>,
    pub entry: Stmt,
}
