//! Lowers a typed surface tree into core IR (§4.5): ANF binding insertion,
//! purity-driven call dispatch, and delegation to the pattern-match
//! compiler in [`pattern`].

pub mod pattern;

use crate::annotations::{Annotation, AnnotationsStore};
use crate::captures::CaptureSet;
use crate::core_ir::{BlockExpr, Definition, Expr, Literal as CoreLiteral, PureExpr, Stmt};
use crate::diagnostics::{Diagnostic, Diagnostics, Position, Severity, Span};
use crate::surface::{self, NodeId};
use crate::symbols::{SymbolId, SymbolTable, TermKind};

/// Which of a handful of fixed roles a callee symbol plays, driving the
/// call-lowering dispatch in [`Transformer::lower_call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolRole {
    ExternFunction,
    DataConstructor,
    OrdinaryBlock,
    MutableVar,
    ValueParam,
}

/// Per-symbol role, supplied by the Namer/Typer stand-in ahead of
/// transformation.
pub enum SymbolRoleAnn {}
impl Annotation for SymbolRoleAnn {
    type Key = SymbolId;
    type Value = SymbolRole;
    const NAME: &'static str = "SymbolRole";
}

/// The inferred capture set of a surface-tree node, required before that
/// node can be lowered.
pub enum CaptureAnn {}
impl Annotation for CaptureAnn {
    type Key = NodeId;
    type Value = CaptureSet;
    const NAME: &'static str = "Capture";
}

/// The capture set of a callee symbol itself (used for `pureOrIO(symbol)`),
/// separate from the capture of any particular call node.
pub enum SymbolCaptureAnn {}
impl Annotation for SymbolCaptureAnn {
    type Key = SymbolId;
    type Value = CaptureSet;
    const NAME: &'static str = "SymbolCapture";
}

/// A pending `val`/`let`/`def` introduction waiting to be folded around a
/// statement by [`Transformer::reify`].
enum PendingBinding {
    Val(SymbolId, Expr),
    Let(SymbolId, Expr),
    Def(SymbolId, BlockExpr),
}

/// Lowers a typed [`surface::Expr`] tree into [`crate::core_ir`].
pub struct Transformer<'a> {
    pub symbols: &'a mut SymbolTable,
    pub annotations: &'a AnnotationsStore,
    pub diagnostics: &'a mut Diagnostics,
    pub state_get: SymbolId,
    pub state_put: SymbolId,
    buffers: Vec<Vec<PendingBinding>>,
}

impl<'a> Transformer<'a> {
    pub fn new(
        symbols: &'a mut SymbolTable,
        annotations: &'a AnnotationsStore,
        diagnostics: &'a mut Diagnostics,
        state_get: SymbolId,
        state_put: SymbolId,
    ) -> Self {
        Self {
            symbols,
            annotations,
            diagnostics,
            state_get,
            state_put,
            buffers: Vec::new(),
        }
    }

    /// Top-level entry point: transforms a whole program body.
    pub fn transform_program(&mut self, body: &surface::Expr) -> Stmt {
        self.scoped(|this| this.transform_tail(body))
    }

    /// Runs `f` with a fresh binding buffer installed, then reifies
    /// whatever `f` produced around the bindings it accumulated.
    fn scoped(&mut self, f: impl FnOnce(&mut Self) -> Stmt) -> Stmt {
        self.buffers.push(Vec::new());
        let tail = f(self);
        let buffer = self.buffers.pop().expect("scoped buffer present");
        Self::reify(buffer, tail)
    }

    /// Folds `buffer` around `tail` in the order the bindings were
    /// produced (the earliest binding ends up outermost, matching normal
    /// left-to-right evaluation order), applying the three peephole
    /// reductions as each wrap is built.
    fn reify(buffer: Vec<PendingBinding>, tail: Stmt) -> Stmt {
        let mut stmt = tail;
        for binding in buffer.into_iter().rev() {
            stmt = Self::wrap(binding, stmt);
        }
        stmt
    }

    fn wrap(binding: PendingBinding, rest: Stmt) -> Stmt {
        match binding {
            PendingBinding::Val(binder, Expr::Run(inner)) if is_trivial_return(&rest, binder) => *inner,
            PendingBinding::Let(binder, Expr::Run(inner)) if is_trivial_return(&rest, binder) => *inner,
            PendingBinding::Let(binder, Expr::Pure(p)) if is_trivial_return(&rest, binder) => Stmt::Return(p),
            PendingBinding::Val(binder, value) => Stmt::Val {
                binder,
                value,
                rest: Box::new(rest),
            },
            PendingBinding::Let(binder, value) => Stmt::Let {
                binder,
                value,
                rest: Box::new(rest),
            },
            PendingBinding::Def(binder, value) => Stmt::Def {
                binder,
                value,
                rest: Box::new(rest),
            },
        }
    }

    fn fresh_temp(&mut self) -> SymbolId {
        self.symbols.fresh_synthetic(TermKind::Temporary).id
    }

    /// Pushes an effectful (possibly suspending) binding and returns a
    /// reference to its result.
    fn bind_let(&mut self, value: Expr) -> PureExpr {
        let temp = self.fresh_temp();
        self.buffers
            .last_mut()
            .expect("bind_let outside a scope")
            .push(PendingBinding::Let(temp, value));
        PureExpr::ValueVar(temp)
    }

    /// Pushes a `pureOrIO` binding known never to suspend.
    fn bind_val(&mut self, value: Expr) -> PureExpr {
        let temp = self.fresh_temp();
        self.buffers
            .last_mut()
            .expect("bind_val outside a scope")
            .push(PendingBinding::Val(temp, value));
        PureExpr::ValueVar(temp)
    }

    fn bind_def(&mut self, value: BlockExpr) -> SymbolId {
        let temp = self.symbols.fresh_synthetic(TermKind::Function).id;
        self.buffers
            .last_mut()
            .expect("bind_def outside a scope")
            .push(PendingBinding::Def(temp, value));
        temp
    }

    fn role_of(&self, symbol: SymbolId) -> SymbolRole {
        self.annotations
            .get::<SymbolRoleAnn>(symbol)
            .copied()
            .unwrap_or(SymbolRole::OrdinaryBlock)
    }

    fn capture_of(&self, node: NodeId) -> CaptureSet {
        self.annotations
            .get::<CaptureAnn>(node)
            .cloned()
            .unwrap_or_else(CaptureSet::empty)
    }

    fn symbol_capture_of(&self, symbol: SymbolId) -> CaptureSet {
        self.annotations
            .get::<SymbolCaptureAnn>(symbol)
            .cloned()
            .unwrap_or_else(CaptureSet::empty)
    }

    /// Transforms `expr` in tail (statement) position.
    fn transform_tail(&mut self, expr: &surface::Expr) -> Stmt {
        match expr {
            surface::Expr::If { cond, then_branch, else_branch, .. } => {
                let cond = self.lower_value(cond);
                let then_branch = Box::new(self.scoped(|t| t.transform_tail(then_branch)));
                let else_branch = Box::new(self.scoped(|t| t.transform_tail(else_branch)));
                Stmt::If { cond, then_branch, else_branch }
            }
            surface::Expr::While { cond, body, .. } => self.lower_while(cond, body),
            surface::Expr::Match { scrutinee, arms, .. } => self.lower_match(scrutinee, arms),
            surface::Expr::TryHandle { body, clauses, .. } => self.lower_try(body, clauses),
            surface::Expr::Region { cells, body, .. } => self.lower_region(cells, body),
            surface::Expr::Assign { target, value, .. } => {
                let value = Expr::Pure(self.lower_value(value));
                let put = Expr::DirectApp {
                    callee: BlockExpr::Member {
                        receiver: Box::new(BlockExpr::BlockVar(target.symbol)),
                        member: self.state_put,
                    },
                    targs: vec![],
                    args: vec![value],
                };
                let temp = self.fresh_temp();
                Stmt::Val {
                    binder: temp,
                    value: put,
                    rest: Box::new(Stmt::Return(PureExpr::Literal(CoreLiteral::Unit))),
                }
            }
            surface::Expr::ValDef { binder, value, rest, .. } => self.lower_val_def(binder.symbol, value, rest),
            surface::Expr::VarDef { binder, value, rest, .. } => self.lower_var_def(binder.symbol, value, rest),
            surface::Expr::FunDef { binder, params, body, rest, .. } => {
                self.lower_fun_def(binder.symbol, params, body, rest)
            }
            surface::Expr::Seq(_, exprs) => self.lower_seq(exprs),
            surface::Expr::Hole(_) => Stmt::Hole,
            _ => Stmt::Return(self.lower_value(expr)),
        }
    }

    fn lower_seq(&mut self, exprs: &[surface::Expr]) -> Stmt {
        match exprs.split_last() {
            None => Stmt::Return(PureExpr::Literal(CoreLiteral::Unit)),
            Some((last, init)) => {
                for e in init {
                    let value = Expr::Pure(self.lower_value(e));
                    self.bind_val(value);
                }
                self.transform_tail(last)
            }
        }
    }

    fn lower_val_def(&mut self, binder: SymbolId, value: &surface::Expr, rest: &surface::Expr) -> Stmt {
        let capture = self.capture_of(value.node());
        let rest = Box::new(self.transform_tail(rest));
        let bound = self.scoped(|t| t.transform_tail(value));
        if capture.is_pure_or_io() {
            Stmt::Val {
                binder,
                value: Expr::Run(Box::new(bound)),
                rest,
            }
        } else {
            Stmt::Let {
                binder,
                value: Expr::Run(Box::new(bound)),
                rest,
            }
        }
    }

    fn lower_var_def(&mut self, binder: SymbolId, value: &surface::Expr, rest: &surface::Expr) -> Stmt {
        let init = Expr::Pure(self.lower_value(value));
        let region = Box::new(BlockExpr::BlockVar(binder));
        let rest = Box::new(self.transform_tail(rest));
        Stmt::State { binder, init, region, rest }
    }

    fn lower_fun_def(
        &mut self,
        binder: SymbolId,
        params: &[surface::IdDef],
        body: &surface::Expr,
        rest: &surface::Expr,
    ) -> Stmt {
        let body_stmt = self.scoped(|t| t.transform_tail(body));
        let value = BlockExpr::BlockLit {
            params: params.iter().map(|p| p.symbol).collect(),
            body: Box::new(body_stmt),
        };
        let rest = Box::new(self.transform_tail(rest));
        Stmt::Def { binder, value, rest }
    }

    fn lower_while(&mut self, cond: &surface::Expr, body: &surface::Expr) -> Stmt {
        if self.capture_of(cond.node()).is_empty() {
            self.diagnostics.report(Diagnostic::Plain {
                severity: Severity::Warning,
                span: dummy_span(),
                message: "loop condition is pure; the loop never observes outside state".into(),
            });
        }
        let loop_sym = self.symbols.fresh_synthetic(TermKind::Function).id;
        let body_stmt = self.scoped(|t| {
            let cond = t.lower_value(cond);
            let then_branch = Box::new(t.scoped(|t2| {
                let body_value = Expr::Pure(t2.lower_value(body));
                let discard = t2.fresh_temp();
                Stmt::Val {
                    binder: discard,
                    value: body_value,
                    rest: Box::new(Stmt::App {
                        callee: BlockExpr::BlockVar(loop_sym),
                        targs: vec![],
                        args: vec![],
                    }),
                }
            }));
            let else_branch = Box::new(Stmt::Return(PureExpr::Literal(CoreLiteral::Unit)));
            Stmt::If { cond, then_branch, else_branch }
        });
        let loop_def = BlockExpr::BlockLit {
            params: vec![],
            body: Box::new(body_stmt),
        };
        self.buffers
            .last_mut()
            .expect("lower_while outside a scope")
            .push(PendingBinding::Def(loop_sym, loop_def));
        Stmt::App { callee: BlockExpr::BlockVar(loop_sym), targs: vec![], args: vec![] }
    }

    fn lower_match(&mut self, scrutinee: &surface::Expr, arms: &[surface::MatchArm]) -> Stmt {
        let scrutinee_value = self.lower_value(scrutinee);
        let scrutinee_var = match scrutinee_value {
            PureExpr::ValueVar(v) => v,
            other => {
                let temp = self.fresh_temp();
                self.buffers
                    .last_mut()
                    .expect("lower_match outside a scope")
                    .push(PendingBinding::Val(temp, Expr::Pure(other)));
                temp
            }
        };
        let clauses = arms
            .iter()
            .map(|arm| {
                let mut patterns = indexmap::IndexMap::new();
                patterns.insert(scrutinee_var, arm.pattern.clone());
                let bound_vars = pattern_bindings(&arm.pattern);
                let body_stmt = self.scoped(|t| t.transform_tail(&arm.body));
                let target = self.bind_def(BlockExpr::BlockLit {
                    params: bound_vars.clone(),
                    body: Box::new(body_stmt),
                });
                pattern::Clause { patterns, target, args: bound_vars }
            })
            .collect();
        pattern::compile(clauses, self.symbols)
    }

    fn lower_try(&mut self, body: &surface::Expr, clauses: &[surface::HandlerClause]) -> Stmt {
        let caps: Vec<SymbolId> = clauses.iter().map(|c| c.operation).collect();
        let body_stmt = self.scoped(|t| t.transform_tail(body));
        let handler_body = BlockExpr::BlockLit {
            params: caps,
            body: Box::new(body_stmt),
        };
        let mut ordered = clauses.to_vec();
        ordered.sort_by_key(|c| c.operation);
        let handlers = ordered
            .into_iter()
            .map(|clause| {
                let mut params = vec![clause.resume.symbol];
                params.extend(clause.params.iter().map(|p| p.symbol));
                let body_stmt = self.scoped(|t| t.transform_tail(&clause.body));
                BlockExpr::BlockLit { params, body: Box::new(body_stmt) }
            })
            .collect();
        Stmt::Try { body: Box::new(handler_body), handlers }
    }

    fn lower_region(&mut self, cells: &[surface::IdDef], body: &surface::Expr) -> Stmt {
        let params = cells.iter().map(|c| c.symbol).collect();
        let body_stmt = self.scoped(|t| t.transform_tail(body));
        let region = BlockExpr::BlockLit { params, body: Box::new(body_stmt) };
        Stmt::Region(Box::new(region))
    }

    /// Transforms `expr` in value (non-tail) position, binding through the
    /// buffer whenever the form might suspend.
    fn lower_value(&mut self, expr: &surface::Expr) -> PureExpr {
        match expr {
            surface::Expr::Var(_, reference) => self.lower_var(reference.symbol),
            surface::Expr::Lit(_, literal) => PureExpr::Literal(lower_literal(literal)),
            surface::Expr::Call { callee, args, .. } => self.lower_call(callee.symbol, args),
            surface::Expr::Assign { .. }
            | surface::Expr::If { .. }
            | surface::Expr::While { .. }
            | surface::Expr::Match { .. }
            | surface::Expr::TryHandle { .. }
            | surface::Expr::Region { .. }
            | surface::Expr::ValDef { .. }
            | surface::Expr::VarDef { .. }
            | surface::Expr::FunDef { .. }
            | surface::Expr::Seq(..)
            | surface::Expr::Hole(_) => {
                let stmt = self.scoped(|t| t.transform_tail(expr));
                self.bind_let(Expr::Run(Box::new(stmt)))
            }
        }
    }

    fn lower_var(&mut self, symbol: SymbolId) -> PureExpr {
        match self.role_of(symbol) {
            SymbolRole::MutableVar => {
                let get = Expr::DirectApp {
                    callee: BlockExpr::Member {
                        receiver: Box::new(BlockExpr::BlockVar(symbol)),
                        member: self.state_get,
                    },
                    targs: vec![],
                    args: vec![],
                };
                self.bind_val(get)
            }
            SymbolRole::ValueParam => PureExpr::ValueVar(symbol),
            SymbolRole::OrdinaryBlock | SymbolRole::ExternFunction | SymbolRole::DataConstructor => {
                PureExpr::Box(Box::new(BlockExpr::BlockVar(symbol)))
            }
        }
    }

    fn lower_call(&mut self, callee: SymbolId, args: &[surface::Expr]) -> PureExpr {
        match self.role_of(callee) {
            SymbolRole::ExternFunction if self.symbol_capture_of(callee).is_pure() => {
                let vargs = args.iter().map(|a| self.lower_value(a)).collect();
                PureExpr::PureApp { callee, targs: vec![], vargs }
            }
            SymbolRole::ExternFunction => {
                let dargs = args.iter().map(|a| Expr::Pure(self.lower_value(a))).collect();
                self.bind_val(Expr::DirectApp {
                    callee: BlockExpr::BlockVar(callee),
                    targs: vec![],
                    args: dargs,
                })
            }
            SymbolRole::DataConstructor => {
                let vargs = args.iter().map(|a| self.lower_value(a)).collect();
                PureExpr::PureApp { callee, targs: vec![], vargs }
            }
            SymbolRole::OrdinaryBlock | SymbolRole::MutableVar | SymbolRole::ValueParam => {
                let callee_pure_or_io = self.symbol_capture_of(callee).is_pure_or_io();
                let lowered_args: Vec<PureExpr> = args.iter().map(|a| self.lower_value(a)).collect();
                if callee_pure_or_io {
                    let stmt = Stmt::App {
                        callee: BlockExpr::BlockVar(callee),
                        targs: vec![],
                        args: lowered_args.into_iter().map(Expr::Pure).collect(),
                    };
                    self.bind_let(Expr::Run(Box::new(stmt)))
                } else {
                    self.bind_let(Expr::App {
                        callee: BlockExpr::BlockVar(callee),
                        targs: vec![],
                        args: lowered_args.into_iter().map(Expr::Pure).collect(),
                    })
                }
            }
        }
    }
}

fn is_trivial_return(stmt: &Stmt, binder: SymbolId) -> bool {
    matches!(stmt, Stmt::Return(PureExpr::ValueVar(v)) if *v == binder)
}

fn lower_literal(literal: &surface::Literal) -> CoreLiteral {
    match literal {
        surface::Literal::Unit => CoreLiteral::Unit,
        surface::Literal::Bool(b) => CoreLiteral::Bool(*b),
        surface::Literal::Int(i) => CoreLiteral::Int(*i),
        surface::Literal::Str(s) => CoreLiteral::Str(s.clone()),
    }
}

fn pattern_bindings(pattern: &surface::Pattern) -> Vec<SymbolId> {
    match pattern {
        surface::Pattern::Var(id_def) => vec![id_def.symbol],
        surface::Pattern::Wildcard | surface::Pattern::Literal(_) => vec![],
        surface::Pattern::Constructor { fields, .. } => fields.iter().flat_map(pattern_bindings).collect(),
    }
}

fn dummy_span() -> Span {
    Span {
        path: String::new(),
        start: Position { line: 0, column: 0 },
        end: Position { line: 0, column: 0 },
    }
}

/// Only retained to keep [`Definition`] in scope for downstream crates
/// that construct top-level programs from transformed statements.
pub type TopLevel = Vec<Definition>;
