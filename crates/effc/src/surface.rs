//! A minimal surface tree standing in for the typed trees an external
//! parser/Namer/Typer would hand the transformer (§4.4, §9 Design Notes:
//! "a language without reference identity should assign every AST node an
//! integer id at parse time and key on that id"). This is not a parser —
//! it is just enough structure to drive the transformer and runtime
//! end-to-end in tests.

use crate::annotations::Identity;
use crate::names::Name;
use crate::symbols::SymbolId;

/// Fresh-integer identity for a surface-tree node, used as an annotation
/// key wherever the Namer/Typer would otherwise rely on object identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl Identity for NodeId {
    fn identity(&self) -> u64 {
        u64::from(self.0)
    }
}

/// Hands out fresh [`NodeId`]s in parse order.
#[derive(Debug, Default, Clone)]
pub struct NodeIdArena {
    next: u32,
}

impl NodeIdArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }
}

impl NodeId {
    /// Builds a node id directly, for tests that don't need a whole arena.
    #[cfg(any(test, feature = "testing"))]
    #[must_use]
    pub fn testing(n: u32) -> Self {
        Self(n)
    }

    /// Reconstructs a node id from its wire representation, the raw
    /// integer a language-server request carries over JSON-RPC.
    #[must_use]
    pub fn from_raw(n: u32) -> Self {
        Self(n)
    }

    /// The raw integer to send back over JSON-RPC.
    #[must_use]
    pub fn as_raw(self) -> u32 {
        self.0
    }
}

/// An occurrence of a definition: introduces `symbol` at this tree
/// position.
#[derive(Debug, Clone)]
pub struct IdDef {
    pub node: NodeId,
    pub symbol: SymbolId,
    pub name: Name,
}

/// A reference to a previously-defined symbol.
#[derive(Debug, Clone)]
pub struct IdRef {
    pub node: NodeId,
    pub symbol: SymbolId,
}

/// A literal value, restricted to what the runtime's base types need.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Unit,
    Bool(bool),
    Int(i64),
    Str(String),
}

/// A single match arm: a constructor pattern plus bound variables and a
/// body expression, enough to drive the pattern-match compiler (§4.5.1).
#[derive(Debug, Clone)]
pub struct MatchArm {
    pub node: NodeId,
    pub pattern: Pattern,
    pub body: Box<Expr>,
}

/// A surface-level pattern. `Wildcard` and `Var` never force a scrutinee;
/// `Constructor` and `Literal` do.
#[derive(Debug, Clone)]
pub enum Pattern {
    Wildcard,
    Var(IdDef),
    Literal(Literal),
    Constructor {
        tag: SymbolId,
        fields: Vec<Pattern>,
    },
}

/// A handler clause attached to a `try`/`region` block (§4.6): an
/// operation name, its parameters, and a body that may call `resume`.
#[derive(Debug, Clone)]
pub struct HandlerClause {
    pub node: NodeId,
    pub operation: SymbolId,
    pub params: Vec<IdDef>,
    pub resume: IdDef,
    pub body: Box<Expr>,
}

/// A typed surface expression. The transformer consumes this tree and a
/// populated [`crate::annotations::AnnotationsStore`] to produce core IR.
#[derive(Debug, Clone)]
pub enum Expr {
    Var(NodeId, IdRef),
    Lit(NodeId, Literal),
    /// Function/block application: `callee(args)`.
    Call {
        node: NodeId,
        callee: IdRef,
        args: Vec<Expr>,
    },
    If {
        node: NodeId,
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    While {
        node: NodeId,
        cond: Box<Expr>,
        body: Box<Expr>,
    },
    Match {
        node: NodeId,
        scrutinee: Box<Expr>,
        arms: Vec<MatchArm>,
    },
    /// `try { body } with op(...) { ... }`, establishing a fresh prompt.
    TryHandle {
        node: NodeId,
        body: Box<Expr>,
        clauses: Vec<HandlerClause>,
    },
    /// `region { body }`, establishing a state-backed prompt without
    /// arbitrary operation clauses.
    Region {
        node: NodeId,
        cells: Vec<IdDef>,
        body: Box<Expr>,
    },
    Assign {
        node: NodeId,
        target: IdRef,
        value: Box<Expr>,
    },
    ValDef {
        node: NodeId,
        binder: IdDef,
        value: Box<Expr>,
        rest: Box<Expr>,
    },
    VarDef {
        node: NodeId,
        binder: IdDef,
        value: Box<Expr>,
        rest: Box<Expr>,
    },
    FunDef {
        node: NodeId,
        binder: IdDef,
        params: Vec<IdDef>,
        body: Box<Expr>,
        rest: Box<Expr>,
    },
    /// A sequence of statements with no trailing binder, the tail of a
    /// block after its last `val`/`var`/`def`.
    Seq(NodeId, Vec<Expr>),
    /// A hole left by incomplete input; the transformer lowers it to a
    /// core `Hole` statement that panics if ever reached at runtime.
    Hole(NodeId),
}

impl Expr {
    #[must_use]
    pub fn node(&self) -> NodeId {
        match self {
            Self::Var(n, _)
            | Self::Lit(n, _)
            | Self::Call { node: n, .. }
            | Self::If { node: n, .. }
            | Self::While { node: n, .. }
            | Self::Match { node: n, .. }
            | Self::TryHandle { node: n, .. }
            | Self::Region { node: n, .. }
            | Self::Assign { node: n, .. }
            | Self::ValDef { node: n, .. }
            | Self::VarDef { node: n, .. }
            | Self::FunDef { node: n, .. }
            | Self::Seq(n, _)
            | Self::Hole(n) => *n,
        }
    }
}
