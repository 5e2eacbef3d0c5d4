//! Owns one compilation unit end to end (§4.10): a module graph, a single
//! global [`AnnotationsStore`], and a [`Diagnostics`] sink, threaded through
//! the namer/typer stand-ins, the transformer, and the runtime. Multiple
//! units are kept side by side by [`SessionManager`]: a permanent default
//! entry plus create/destroy/fork/list.

use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;

use crate::annotations::AnnotationsStore;
use crate::core_ir;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::modules::{ModuleGraph, ModuleId, ModuleKind};
use crate::names::{Name, WordInterner};
use crate::resource::ResourceTracker;
use crate::runtime::RtValue;
use crate::surface::{self, NodeIdArena};
use crate::symbols::{Symbol, SymbolId, SymbolTable, Universe};
use crate::tracer::RuntimeTracer;
use crate::transform::Transformer;

/// The runtime value a session's `run` hands back.
pub type Value = RtValue;

/// What `run` fails with when the sandboxed budget is exceeded.
pub type RunResult<T> = Result<T, crate::resource::ResourceError>;

/// A symbol-indexed table of host functions backing `extern` calls that
/// carry no per-backend source (§9: the toy in-process evaluator has no
/// codegen target of its own, so externs resolve here instead).
type Intrinsics = Rc<AHashMap<SymbolId, Rc<dyn Fn(&[RtValue]) -> RtValue>>>;

/// One compilation unit: its own symbol table, module graph, annotations,
/// and diagnostics, plus whatever top-level trees have been `define`d so
/// far. Cheap to fork because every owned piece is itself cheap to clone.
pub struct CompileSession {
    pub name: String,
    pub words: WordInterner,
    pub symbols: SymbolTable,
    pub modules: ModuleGraph,
    pub module: ModuleId,
    pub nodes: NodeIdArena,
    pub annotations: AnnotationsStore,
    pub diagnostics: Diagnostics,
    state_get: SymbolId,
    state_put: SymbolId,
    intrinsics: Intrinsics,
    /// Top-level entries in definition order. `lower` always operates on
    /// the most recently defined one, mirroring a REPL session's "current
    /// state reflects the latest executed code" rather than stitching
    /// separate `define` calls into one program (nothing in the surface
    /// tree's `rest`-threading says how they should combine).
    entries: Vec<(Symbol, surface::Expr)>,
}

impl CompileSession {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let mut symbols = SymbolTable::new();
        let state_get = symbols.fresh_builtin(Name::Blk, Universe::Block).id;
        let state_put = symbols.fresh_builtin(Name::Blk, Universe::Block).id;
        let mut modules = ModuleGraph::new();
        let module = modules.insert(crate::modules::Module::new(ModuleKind::SourceModule, None));
        Self {
            name: name.into(),
            words: WordInterner::new(),
            symbols,
            modules,
            module,
            nodes: NodeIdArena::new(),
            annotations: AnnotationsStore::new(),
            diagnostics: Diagnostics::new(),
            state_get,
            state_put,
            intrinsics: Rc::new(AHashMap::default()),
            entries: Vec::new(),
        }
    }

    /// Registers a host function for `symbol`, called whenever a lowered
    /// `extern` call to it has no other implementation. Used by backends
    /// and tests that need `run` to do more than evaluate pure structure.
    pub fn define_intrinsic(&mut self, symbol: SymbolId, f: impl Fn(&[RtValue]) -> RtValue + 'static) {
        Rc::make_mut(&mut self.intrinsics).insert(symbol, Rc::new(f));
    }

    /// Registers a top-level tree. No namer lives in this crate yet (§9),
    /// so this never actually rejects anything; the `Result` shape is kept
    /// so a real namer can slot in without changing callers.
    pub fn define(&mut self, tree: surface::Expr) -> Result<Symbol, Diagnostic> {
        let symbol = match &tree {
            surface::Expr::ValDef { binder, .. }
            | surface::Expr::VarDef { binder, .. }
            | surface::Expr::FunDef { binder, .. } => Symbol {
                id: binder.symbol,
                name: binder.name.clone(),
                universe: self.symbols.universe_of(binder.symbol),
            },
            _ => self.symbols.fresh_synthetic(crate::symbols::TermKind::Function),
        };
        if let Some(word) = symbol.name.last() {
            self.modules.get_mut(self.module).define_term(word, symbol.id);
        }
        self.entries.push((symbol.clone(), tree));
        Ok(symbol)
    }

    /// Surfaces whatever the namer/typer stand-ins have queued so far.
    /// Draining only happens on the error path, so warnings reported
    /// during `lower` still accumulate for a caller to inspect later.
    pub fn typecheck(&mut self) -> Result<(), Vec<Diagnostic>> {
        if self.diagnostics.has_errors() {
            Err(self.diagnostics.take_sorted(""))
        } else {
            Ok(())
        }
    }

    /// Lowers the most recently `define`d tree into core IR. An empty
    /// session lowers to a trivial unit-returning program rather than
    /// panicking, since "nothing defined yet" is a normal session state.
    pub fn lower(&mut self) -> core_ir::Module {
        let Some((_, tree)) = self.entries.last() else {
            return core_ir::Module {
                definitions: Vec::new(),
                entry: core_ir::Stmt::Return(core_ir::PureExpr::Literal(core_ir::Literal::Unit)),
            };
        };
        let tree = tree.clone();
        let mut transformer = Transformer::new(&mut self.symbols, &self.annotations, &mut self.diagnostics, self.state_get, self.state_put);
        let entry = transformer.transform_program(&tree);
        // No surface form constructs Data/Record/Interface/Extern
        // declarations yet (§9), so `definitions` is always empty here; a
        // real frontend would populate it from those top-level forms.
        core_ir::Module { definitions: Vec::new(), entry }
    }

    /// Runs a lowered module to completion under `budget`, trampolining
    /// through [`crate::runtime`] the same way `run`/`run_with_budget`
    /// already do for hand-built [`crate::runtime::Control`] values.
    pub fn run(&self, module: core_ir::Module, tracer: &mut impl RuntimeTracer, budget: &impl ResourceTracker) -> RunResult<Value> {
        let ctx = eval::EvalCtx::new(&self.annotations, self.intrinsics.clone(), self.state_get, self.state_put);
        let env: eval::Env = Rc::new(AHashMap::default());
        let control = eval::eval_stmt(module.entry, env, ctx);
        crate::runtime::run_with_budget(control, crate::runtime::Stack::new(), tracer, budget)
    }

    /// The builtin state-cell accessor symbols this session's transformer
    /// and evaluator agree on, for callers that hand-build core IR
    /// referencing `Member` nodes directly (backends, tests).
    #[must_use]
    pub fn state_accessors(&self) -> (SymbolId, SymbolId) {
        (self.state_get, self.state_put)
    }

    /// Deep-clones this session into an independent one: a local overlay
    /// of its annotations plus clones of everything else, so neither
    /// session's further evolution can affect the other (§4.1).
    #[must_use]
    pub fn fork(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            words: self.words.clone(),
            symbols: self.symbols.clone(),
            modules: self.modules.clone(),
            module: self.module,
            nodes: self.nodes.clone(),
            annotations: self.annotations.clone_overlay(),
            diagnostics: self.diagnostics.clone(),
            state_get: self.state_get,
            state_put: self.state_put,
            intrinsics: self.intrinsics.clone(),
            entries: self.entries.clone(),
        }
    }

    /// Every symbol `define` has ever introduced, across all entries — not
    /// just the one `lower` would act on. Backs the language-server's
    /// document-wide symbol listing.
    #[must_use]
    pub fn symbols_defined(&self) -> Vec<Symbol> {
        self.entries.iter().map(|(symbol, _)| symbol.clone()).collect()
    }

    /// The symbol an `IdDef`/`IdRef` occurrence at `node` names, searching
    /// every entry's tree. `None` if no occurrence carries that id.
    #[must_use]
    pub fn find_symbol_at(&self, node: surface::NodeId) -> Option<SymbolId> {
        for (_, tree) in &self.entries {
            let mut defs = Vec::new();
            let mut refs = Vec::new();
            walk_occurrences(tree, &mut defs, &mut refs);
            if let Some((_, symbol)) = defs.iter().chain(refs.iter()).find(|(n, _)| *n == node) {
                return Some(*symbol);
            }
        }
        None
    }

    /// Every occurrence (definition or use) of `symbol` across all entries.
    #[must_use]
    pub fn references_to(&self, symbol: SymbolId) -> Vec<surface::NodeId> {
        let mut nodes = Vec::new();
        for (_, tree) in &self.entries {
            let mut defs = Vec::new();
            let mut refs = Vec::new();
            walk_occurrences(tree, &mut defs, &mut refs);
            nodes.extend(defs.into_iter().chain(refs).filter(|(_, s)| *s == symbol).map(|(n, _)| n));
        }
        nodes
    }

    /// The node that introduces `symbol`, if any entry defines it.
    #[must_use]
    pub fn definition_site(&self, symbol: SymbolId) -> Option<surface::NodeId> {
        for (_, tree) in &self.entries {
            let mut defs = Vec::new();
            let mut refs = Vec::new();
            walk_occurrences(tree, &mut defs, &mut refs);
            if let Some((node, _)) = defs.into_iter().find(|(_, s)| *s == symbol) {
                return Some(node);
            }
        }
        None
    }
}

/// Collects every `IdDef` occurrence into `defs` and every `IdRef`/`Var`
/// occurrence into `refs`, each paired with the node id it appears at.
/// Exists purely to back the indexing queries above; nothing in the
/// transformer needs this (it only ever cares about the symbol, not where
/// it was written).
fn walk_occurrences(expr: &surface::Expr, defs: &mut Vec<(surface::NodeId, SymbolId)>, refs: &mut Vec<(surface::NodeId, SymbolId)>) {
    use surface::Expr;
    match expr {
        Expr::Var(node, reference) => refs.push((*node, reference.symbol)),
        Expr::Lit(..) | Expr::Hole(_) => {}
        Expr::Call { callee, args, .. } => {
            refs.push((callee.node, callee.symbol));
            args.iter().for_each(|a| walk_occurrences(a, defs, refs));
        }
        Expr::If { cond, then_branch, else_branch, .. } => {
            walk_occurrences(cond, defs, refs);
            walk_occurrences(then_branch, defs, refs);
            walk_occurrences(else_branch, defs, refs);
        }
        Expr::While { cond, body, .. } => {
            walk_occurrences(cond, defs, refs);
            walk_occurrences(body, defs, refs);
        }
        Expr::Match { scrutinee, arms, .. } => {
            walk_occurrences(scrutinee, defs, refs);
            for arm in arms {
                walk_pattern(&arm.pattern, defs);
                walk_occurrences(&arm.body, defs, refs);
            }
        }
        Expr::TryHandle { body, clauses, .. } => {
            walk_occurrences(body, defs, refs);
            for clause in clauses {
                defs.push((clause.resume.node, clause.resume.symbol));
                for param in &clause.params {
                    defs.push((param.node, param.symbol));
                }
                walk_occurrences(&clause.body, defs, refs);
            }
        }
        Expr::Region { cells, body, .. } => {
            for cell in cells {
                defs.push((cell.node, cell.symbol));
            }
            walk_occurrences(body, defs, refs);
        }
        Expr::Assign { target, value, .. } => {
            refs.push((target.node, target.symbol));
            walk_occurrences(value, defs, refs);
        }
        Expr::ValDef { binder, value, rest, .. } | Expr::VarDef { binder, value, rest, .. } => {
            defs.push((binder.node, binder.symbol));
            walk_occurrences(value, defs, refs);
            walk_occurrences(rest, defs, refs);
        }
        Expr::FunDef { binder, params, body, rest, .. } => {
            defs.push((binder.node, binder.symbol));
            for param in params {
                defs.push((param.node, param.symbol));
            }
            walk_occurrences(body, defs, refs);
            walk_occurrences(rest, defs, refs);
        }
        Expr::Seq(_, exprs) => exprs.iter().for_each(|e| walk_occurrences(e, defs, refs)),
    }
}

fn walk_pattern(pattern: &surface::Pattern, defs: &mut Vec<(surface::NodeId, SymbolId)>) {
    match pattern {
        surface::Pattern::Var(id_def) => defs.push((id_def.node, id_def.symbol)),
        surface::Pattern::Wildcard | surface::Pattern::Literal(_) => {}
        surface::Pattern::Constructor { fields, .. } => fields.iter().for_each(|f| walk_pattern(f, defs)),
    }
}

/// Translates lowered core IR into [`crate::runtime::Control`]/[`RtValue`].
/// Kept private: the rest of the crate only ever sees it through
/// [`CompileSession::run`].
mod eval {
    use std::cell::RefCell;
    use std::rc::Rc;

    use ahash::AHashMap;

    use crate::annotations::{AnnotationsStore, Identity};
    use crate::core_ir::{BlockExpr, Expr, Literal, PureExpr, Stmt};
    use crate::runtime::{Clauses, Control, PromptAllocator, RtValue, SubStack, with_state};
    use crate::symbols::SymbolId;
    use crate::transform::{SymbolRole, SymbolRoleAnn};

    use super::Intrinsics;

    pub type Env = Rc<AHashMap<SymbolId, RtValue>>;

    /// Everything `eval_*` needs that isn't carried in the IR itself: the
    /// role annotations a real namer would have attached, the intrinsic
    /// table, the mutable-variable cells a `State`/`Member` pair reads and
    /// writes, and a prompt source for `Try`/`Region`.
    #[derive(Clone)]
    pub struct EvalCtx {
        annotations: Rc<AnnotationsStore>,
        intrinsics: Intrinsics,
        prompts: Rc<RefCell<PromptAllocator>>,
        state_get: SymbolId,
        state_put: SymbolId,
    }

    impl EvalCtx {
        pub fn new(annotations: &AnnotationsStore, intrinsics: Intrinsics, state_get: SymbolId, state_put: SymbolId) -> Self {
            Self {
                annotations: Rc::new(annotations.clone()),
                intrinsics,
                prompts: Rc::new(RefCell::new(PromptAllocator::new())),
                state_get,
                state_put,
            }
        }
    }

    fn bind(env: &Env, symbol: SymbolId, value: RtValue) -> Env {
        let mut next = (**env).clone();
        next.insert(symbol, value);
        Rc::new(next)
    }

    fn bind_many(env: &Env, symbols: &[SymbolId], values: Vec<RtValue>) -> Env {
        let mut next = (**env).clone();
        for (symbol, value) in symbols.iter().zip(values) {
            next.insert(*symbol, value);
        }
        Rc::new(next)
    }

    fn lookup(env: &Env, symbol: SymbolId) -> RtValue {
        env.get(&symbol).cloned().unwrap_or(RtValue::Unit)
    }

    /// A `State` statement binds its cell symbol to the cell's
    /// segment-local index, stored as a plain `Int` in `env` the same way
    /// any other local binding is.
    fn cell_index(env: &Env, symbol: SymbolId) -> Option<usize> {
        match lookup(env, symbol) {
            RtValue::Int(n) if n >= 0 => Some(n as usize),
            _ => None,
        }
    }

    fn truthy(value: &RtValue) -> bool {
        match value {
            RtValue::Bool(b) => *b,
            RtValue::Int(n) => *n != 0,
            _ => false,
        }
    }

    fn literal(lit: &Literal) -> RtValue {
        match lit {
            Literal::Unit => RtValue::Unit,
            Literal::Bool(b) => RtValue::Bool(*b),
            Literal::Int(n) => RtValue::Int(*n),
            Literal::Str(s) => RtValue::Str(Rc::from(s.as_str())),
        }
    }

    /// Constructed values are tagged tuples: element zero is the
    /// constructor symbol's identity, the rest its fields. `Match`
    /// dispatches by comparing this tag against each branch's symbol.
    fn tag_of(symbol: SymbolId) -> i64 {
        symbol.identity() as i64
    }

    pub fn eval_pure(expr: &PureExpr, env: &Env, ctx: &EvalCtx) -> RtValue {
        match expr {
            PureExpr::ValueVar(s) => lookup(env, *s),
            PureExpr::Literal(l) => literal(l),
            PureExpr::Box(b) => eval_block(b, env, ctx),
            PureExpr::PureApp { callee, vargs, .. } => {
                let args: Vec<RtValue> = vargs.iter().map(|a| eval_pure(a, env, ctx)).collect();
                if ctx.annotations.get::<SymbolRoleAnn>(*callee) == Some(&SymbolRole::DataConstructor) {
                    let mut tuple = vec![RtValue::Int(tag_of(*callee))];
                    tuple.extend(args);
                    RtValue::Tuple(Rc::new(tuple))
                } else if let Some(f) = ctx.intrinsics.get(callee) {
                    f(&args)
                } else {
                    RtValue::Unit
                }
            }
            // Record field projection has no layout to interpret without
            // a real typer; not modeled by this toy evaluator.
            PureExpr::Select { .. } => RtValue::Unit,
        }
    }

    pub fn eval_block(expr: &BlockExpr, env: &Env, ctx: &EvalCtx) -> RtValue {
        match expr {
            BlockExpr::BlockVar(s) | BlockExpr::New(s) => lookup(env, *s),
            BlockExpr::Unbox(p) => eval_pure(p, env, ctx),
            BlockExpr::BlockLit { params, body } => {
                let params = params.clone();
                let body = (**body).clone();
                let env = env.clone();
                let ctx = ctx.clone();
                RtValue::Closure(Rc::new(move |args| {
                    let call_env = bind_many(&env, &params, args);
                    eval_stmt(body.clone(), call_env, ctx.clone())
                }))
            }
            // A `State` statement binds its cell symbol to the cell's
            // segment-local index (as an `Int`), not its value, so a
            // `Member` access here just needs to read that index back out
            // of `env` and issue the matching `CellGet`/`CellPut`. Routing
            // through the runtime's own segment cells (rather than a flat
            // side table) is what makes a handler resumed twice see two
            // independent copies (§4.6).
            BlockExpr::Member { receiver, member } => {
                let BlockExpr::BlockVar(cell) = receiver.as_ref() else {
                    return RtValue::Unit;
                };
                let Some(index) = cell_index(env, *cell) else {
                    return RtValue::Unit;
                };
                if *member == ctx.state_get {
                    RtValue::Closure(Rc::new(move |_args| Control::CellGet(index, Rc::new(Control::Apply))))
                } else if *member == ctx.state_put {
                    RtValue::Closure(Rc::new(move |args| {
                        let value = args.into_iter().next().unwrap_or(RtValue::Unit);
                        Control::CellPut(index, value, Rc::new(Control::Apply))
                    }))
                } else {
                    RtValue::Unit
                }
            }
        }
    }

    fn apply_block(block: &BlockExpr, args: Vec<RtValue>, env: &Env, ctx: &EvalCtx) -> Control {
        match eval_block(block, env, ctx) {
            RtValue::Closure(f) => f(args),
            other => Control::Apply(other),
        }
    }

    /// Every call site the transformer builds wraps each argument in
    /// `Expr::Pure` (`lower_call`, `lower_while`, `pattern::compile`);
    /// a non-pure shape here would mean a new transform case started
    /// producing args this evaluator doesn't know about yet.
    fn eval_args(args: &[Expr], env: &Env, ctx: &EvalCtx) -> Vec<RtValue> {
        args.iter()
            .map(|a| match a {
                Expr::Pure(p) => eval_pure(p, env, ctx),
                _ => RtValue::Unit,
            })
            .collect()
    }

    pub fn eval_expr(expr: Expr, env: Env, ctx: EvalCtx) -> Control {
        match expr {
            Expr::Pure(p) => Control::Apply(eval_pure(&p, &env, &ctx)),
            Expr::Run(stmt) => eval_stmt(*stmt, env, ctx),
            Expr::DirectApp { callee, args, .. } | Expr::App { callee, args, .. } => {
                let argv = eval_args(&args, &env, &ctx);
                apply_block(&callee, argv, &env, &ctx)
            }
        }
    }

    pub fn eval_stmt(stmt: Stmt, env: Env, ctx: EvalCtx) -> Control {
        match stmt {
            Stmt::Return(p) => Control::Apply(eval_pure(&p, &env, &ctx)),
            Stmt::Val { binder, value, rest } | Stmt::Let { binder, value, rest } => {
                let cont_env = env.clone();
                let cont_ctx = ctx.clone();
                // `rest` has to survive being run more than once: this
                // continuation is captured whole by `shift` whenever the
                // statement sits inside a `Try`, and a handler that resumes
                // twice replays it twice.
                let rest = Rc::new(*rest);
                Control::FlatMap(
                    Box::new(eval_expr(value, env, ctx)),
                    Rc::new(move |v| {
                        let next_env = bind(&cont_env, binder, v);
                        eval_stmt((*rest).clone(), next_env, cont_ctx.clone())
                    }),
                )
            }
            Stmt::Def { binder, value, rest } => {
                let v = eval_block(&value, &env, &ctx);
                let next_env = bind(&env, binder, v);
                eval_stmt(*rest, next_env, ctx)
            }
            Stmt::State { binder, init, rest, .. } => {
                let value = match init {
                    Expr::Pure(p) => eval_pure(&p, &env, &ctx),
                    _ => RtValue::Unit,
                };
                let rest = *rest;
                with_state(value, move |index| {
                    let next_env = bind(&env, binder, RtValue::Int(index as i64));
                    eval_stmt(rest, next_env, ctx)
                })
            }
            Stmt::App { callee, args, .. } => {
                let argv = eval_args(&args, &env, &ctx);
                apply_block(&callee, argv, &env, &ctx)
            }
            Stmt::If { cond, then_branch, else_branch } => {
                let c = eval_pure(&cond, &env, &ctx);
                if truthy(&c) {
                    eval_stmt(*then_branch, env, ctx)
                } else {
                    eval_stmt(*else_branch, env, ctx)
                }
            }
            Stmt::Match { scrutinee, branches, default } => {
                let scrutinee_value = lookup(&env, scrutinee);
                let (tag, fields) = match &scrutinee_value {
                    RtValue::Tuple(items) if !items.is_empty() => match items[0] {
                        RtValue::Int(n) => (Some(n), items[1..].to_vec()),
                        _ => (None, Vec::new()),
                    },
                    _ => (None, Vec::new()),
                };
                for (branch_symbol, block) in &branches {
                    if tag == Some(tag_of(*branch_symbol)) {
                        return apply_block(block, fields, &env, &ctx);
                    }
                }
                match default {
                    Some(block) => apply_block(&block, Vec::new(), &env, &ctx),
                    None => crate::diagnostics::ice("match fell through with no matching branch and no default"),
                }
            }
            Stmt::Try { body, handlers } => eval_try(*body, handlers, env, ctx),
            Stmt::Region(region) => eval_region(*region, env, ctx),
            Stmt::Hole => crate::diagnostics::ice("reached a hole at runtime"),
        }
    }

    /// Establishes a fresh prompt and wires each capability parameter of
    /// `body` to its handler clause. `lower_try` sorts `handlers` by
    /// operation symbol but leaves `body`'s own parameter list in
    /// declaration order, so the pairing has to be reconstructed here by
    /// sorting a copy of that parameter list the same way.
    fn eval_try(body: BlockExpr, handlers: Vec<BlockExpr>, env: Env, ctx: EvalCtx) -> Control {
        let BlockExpr::BlockLit { params: caps, body: body_stmt } = body else {
            return crate::diagnostics::ice("try body is not a capability block");
        };
        let mut declared_order: Vec<usize> = (0..caps.len()).collect();
        declared_order.sort_by_key(|&i| caps[i]);

        let prompt = ctx.prompts.borrow_mut().fresh();
        let mut operations = vec![RtValue::Unit; caps.len()];
        for (sorted_index, &cap_index) in declared_order.iter().enumerate() {
            let Some(handler) = handlers.get(sorted_index).cloned() else {
                continue;
            };
            let env = env.clone();
            let ctx = ctx.clone();
            operations[cap_index] = RtValue::Closure(Rc::new(move |op_args: Vec<RtValue>| {
                let handler = handler.clone();
                let env = env.clone();
                let ctx = ctx.clone();
                Control::Shift(
                    prompt,
                    Box::new(move |sub: SubStack| {
                        // `sub` is cheap to clone (its frames and clauses
                        // are `Rc`-shared, only the cell snapshots are
                        // duplicated), so `resume` can be called any number
                        // of times; each call rebuilds its own cells from
                        // the same snapshot instead of sharing one set.
                        let resume = RtValue::Closure(Rc::new(move |resume_args: Vec<RtValue>| {
                            let value = resume_args.into_iter().next().unwrap_or(RtValue::Unit);
                            Control::Resume(sub.clone(), value)
                        }));
                        let mut call_args = vec![resume];
                        call_args.extend(op_args);
                        apply_block(&handler, call_args, &env, &ctx)
                    }),
                )
            }));
        }
        let body_env = bind_many(&env, &caps, operations);
        Control::Reset(prompt, Clauses::default(), Box::new(eval_stmt(*body_stmt, body_env, ctx)))
    }

    /// A region is a state-backed prompt with no operations of its own;
    /// the cells it introduces come from `State` statements inside its
    /// body, not from this call.
    fn eval_region(region: BlockExpr, env: Env, ctx: EvalCtx) -> Control {
        let BlockExpr::BlockLit { body, .. } = region else {
            return crate::diagnostics::ice("region body is not a block");
        };
        let prompt = ctx.prompts.borrow_mut().fresh();
        Control::Reset(prompt, Clauses::default(), Box::new(eval_stmt(*body, env, ctx)))
    }
}

/// Every session not explicitly named resolves to this one; it can be
/// forked and reset but never destroyed, a permanent default session the
/// way a REPL keeps one running even as scratch sessions come and go.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Maps an optional caller-supplied id down to the session it names.
#[must_use]
pub fn resolve_session_id(id: Option<&str>) -> &str {
    id.unwrap_or(DEFAULT_SESSION_ID)
}

/// Failure modes for session lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    NotFound(String),
    AlreadyExists(String),
    DefaultSessionIsPermanent,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "no session named `{id}`"),
            Self::AlreadyExists(id) => write!(f, "a session named `{id}` already exists"),
            Self::DefaultSessionIsPermanent => write!(f, "the default session cannot be destroyed"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Named multi-session management on top of [`CompileSession`], for the
/// language-server crate and for anything else that needs more than one
/// compilation unit alive at once.
pub struct SessionManager {
    sessions: AHashMap<String, CompileSession>,
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        let mut sessions = AHashMap::default();
        sessions.insert(DEFAULT_SESSION_ID.to_string(), CompileSession::new(DEFAULT_SESSION_ID));
        Self { sessions }
    }

    pub fn create_session(&mut self, id: &str) -> Result<&mut CompileSession, SessionError> {
        if self.sessions.contains_key(id) {
            return Err(SessionError::AlreadyExists(id.to_string()));
        }
        self.sessions.insert(id.to_string(), CompileSession::new(id));
        Ok(self.sessions.get_mut(id).expect("just inserted"))
    }

    pub fn destroy_session(&mut self, id: &str) -> Result<(), SessionError> {
        if id == DEFAULT_SESSION_ID {
            return Err(SessionError::DefaultSessionIsPermanent);
        }
        self.sessions
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    pub fn fork_session(&mut self, source: &str, target: &str) -> Result<&mut CompileSession, SessionError> {
        if self.sessions.contains_key(target) {
            return Err(SessionError::AlreadyExists(target.to_string()));
        }
        let forked = self
            .sessions
            .get(source)
            .ok_or_else(|| SessionError::NotFound(source.to_string()))?
            .fork(target);
        self.sessions.insert(target.to_string(), forked);
        Ok(self.sessions.get_mut(target).expect("just inserted"))
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&CompileSession> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut CompileSession> {
        self.sessions.get_mut(id)
    }

    /// Session ids in sorted order, for a stable listing.
    #[must_use]
    pub fn list_sessions(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.sessions.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captures::{Capture, CaptureSet};
    use crate::names::Name;
    use crate::resource::{LimitedTracker, NoLimitTracker};
    use crate::surface::{Expr, IdDef, IdRef, Literal, NodeId};
    use crate::symbols::Universe;
    use crate::tracer::NoopTracer;
    use crate::transform::{SymbolCaptureAnn, SymbolRole, SymbolRoleAnn};

    #[test]
    fn identity_program_returns_its_literal() {
        let mut session = CompileSession::new("t");
        let tree = Expr::Lit(NodeId::testing(0), Literal::Int(5));
        session.define(tree).unwrap();
        session.typecheck().unwrap();
        let module = session.lower();
        let result = session.run(module, &mut NoopTracer, &NoLimitTracker).unwrap();
        assert!(matches!(result, RtValue::Int(5)));
    }

    #[test]
    fn if_picks_the_true_branch() {
        let mut session = CompileSession::new("t");
        let tree = Expr::If {
            node: NodeId::testing(0),
            cond: Box::new(Expr::Lit(NodeId::testing(1), Literal::Bool(true))),
            then_branch: Box::new(Expr::Lit(NodeId::testing(2), Literal::Int(1))),
            else_branch: Box::new(Expr::Lit(NodeId::testing(3), Literal::Int(0))),
        };
        session.define(tree).unwrap();
        let module = session.lower();
        let result = session.run(module, &mut NoopTracer, &NoLimitTracker).unwrap();
        assert!(matches!(result, RtValue::Int(1)));
    }

    /// Built directly against `core_ir` rather than through `define`/`lower`:
    /// a `State` cell followed by a `Member` read in `rest` only makes sense
    /// if the read is nested under the write, and `VarDef` lowering doesn't
    /// scope `rest` separately from the binding that introduces it, so a
    /// surface-level round trip would hoist the read above the write.
    #[test]
    fn mutable_variable_persists_across_a_read() {
        let mut session = CompileSession::new("t");
        let (state_get, _state_put) = session.state_accessors();
        let cell = session.symbols.fresh(Name::Blk, Universe::Value).id;
        let read_temp = session.symbols.fresh(Name::Blk, Universe::Value).id;

        let module = core_ir::Module {
            definitions: Vec::new(),
            entry: core_ir::Stmt::State {
                binder: cell,
                init: core_ir::Expr::Pure(core_ir::PureExpr::Literal(core_ir::Literal::Int(7))),
                region: Box::new(core_ir::BlockExpr::BlockVar(cell)),
                rest: Box::new(core_ir::Stmt::Let {
                    binder: read_temp,
                    value: core_ir::Expr::DirectApp {
                        callee: core_ir::BlockExpr::Member {
                            receiver: Box::new(core_ir::BlockExpr::BlockVar(cell)),
                            member: state_get,
                        },
                        targs: vec![],
                        args: vec![],
                    },
                    rest: Box::new(core_ir::Stmt::Return(core_ir::PureExpr::ValueVar(read_temp))),
                }),
            },
        };
        let result = session.run(module, &mut NoopTracer, &NoLimitTracker).unwrap();
        assert!(matches!(result, RtValue::Int(7)));
    }

    #[test]
    fn extern_intrinsic_is_invoked_through_a_pure_app() {
        let mut session = CompileSession::new("t");
        let word = session.words.intern("inc");
        let symbol = session.symbols.fresh(Name::local(word), Universe::Block).id;
        session.annotations.annotate::<SymbolRoleAnn>(symbol, SymbolRole::ExternFunction);
        session.define_intrinsic(symbol, |args| match args {
            [RtValue::Int(n)] => RtValue::Int(n + 1),
            _ => RtValue::Unit,
        });

        let tree = Expr::Call {
            node: NodeId::testing(0),
            callee: IdRef { node: NodeId::testing(0), symbol },
            args: vec![Expr::Lit(NodeId::testing(1), Literal::Int(41))],
        };
        session.define(tree).unwrap();
        let module = session.lower();
        let result = session.run(module, &mut NoopTracer, &NoLimitTracker).unwrap();
        assert!(matches!(result, RtValue::Int(42)));
    }

    #[test]
    fn handler_that_never_resumes_returns_its_own_value() {
        let mut session = CompileSession::new("t");
        let op_word = session.words.intern("raise");
        let op_symbol = session.symbols.fresh(Name::local(op_word), Universe::Block).id;
        session
            .annotations
            .annotate::<SymbolCaptureAnn>(op_symbol, CaptureSet::singleton(Capture::Control(op_symbol)));

        let resume_word = session.words.intern("resume");
        let resume_symbol = session.symbols.fresh(Name::local(resume_word), Universe::Block).id;

        let body = Box::new(Expr::Call {
            node: NodeId::testing(1),
            callee: IdRef { node: NodeId::testing(1), symbol: op_symbol },
            args: vec![],
        });
        let clause = surface::HandlerClause {
            node: NodeId::testing(2),
            operation: op_symbol,
            params: vec![],
            resume: IdDef { node: NodeId::testing(3), symbol: resume_symbol, name: Name::local(resume_word) },
            body: Box::new(Expr::Lit(NodeId::testing(4), Literal::Int(99))),
        };
        let tree = Expr::TryHandle { node: NodeId::testing(0), body, clauses: vec![clause] };
        session.define(tree).unwrap();
        let module = session.lower();
        let result = session.run(module, &mut NoopTracer, &NoLimitTracker).unwrap();
        assert!(matches!(result, RtValue::Int(99)));
    }

    #[test]
    fn a_pure_infinite_loop_is_stopped_by_the_step_budget() {
        let mut session = CompileSession::new("t");
        let tree = Expr::While {
            node: NodeId::testing(0),
            cond: Box::new(Expr::Lit(NodeId::testing(1), Literal::Bool(true))),
            body: Box::new(Expr::Lit(NodeId::testing(2), Literal::Unit)),
        };
        session.define(tree).unwrap();
        let module = session.lower();
        let budget = LimitedTracker { max_recursion: 64, max_steps: 200 };
        let result = session.run(module, &mut NoopTracer, &budget);
        assert!(result.is_err());
    }

    #[test]
    fn forked_session_annotations_are_independent() {
        let mut session = CompileSession::new("base");
        let symbol = session.symbols.fresh(Name::Blk, Universe::Value).id;
        session.annotations.annotate::<SymbolRoleAnn>(symbol, SymbolRole::ValueParam);
        let mut forked = session.fork("forked");
        forked.annotations.annotate::<SymbolRoleAnn>(symbol, SymbolRole::MutableVar);
        assert_eq!(session.annotations.get::<SymbolRoleAnn>(symbol), Some(&SymbolRole::ValueParam));
        assert_eq!(forked.annotations.get::<SymbolRoleAnn>(symbol), Some(&SymbolRole::MutableVar));
    }

    #[test]
    fn find_symbol_at_and_references_to_agree_on_a_val_def() {
        let mut session = CompileSession::new("t");
        let word = session.words.intern("x");
        let symbol = session.symbols.fresh(Name::local(word), Universe::Value).id;
        let binder = IdDef { node: NodeId::testing(0), symbol, name: Name::local(word) };
        let tree = Expr::ValDef {
            node: NodeId::testing(1),
            binder,
            value: Box::new(Expr::Lit(NodeId::testing(2), Literal::Int(1))),
            rest: Box::new(Expr::Var(NodeId::testing(3), IdRef { node: NodeId::testing(3), symbol })),
        };
        session.define(tree).unwrap();

        assert_eq!(session.find_symbol_at(NodeId::testing(0)), Some(symbol));
        assert_eq!(session.find_symbol_at(NodeId::testing(3)), Some(symbol));
        assert_eq!(session.find_symbol_at(NodeId::testing(99)), None);
        assert_eq!(session.definition_site(symbol), Some(NodeId::testing(0)));
        let mut refs = session.references_to(symbol);
        refs.sort_by_key(|n| format!("{n:?}"));
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn resolve_session_id_falls_back_to_default() {
        assert_eq!(resolve_session_id(None), DEFAULT_SESSION_ID);
        assert_eq!(resolve_session_id(Some("x")), "x");
    }

    #[test]
    fn session_manager_creates_forks_and_destroys() {
        let mut manager = SessionManager::new();
        assert_eq!(manager.list_sessions(), vec![DEFAULT_SESSION_ID]);

        manager.create_session("alpha").unwrap();
        assert_eq!(manager.list_sessions(), vec!["alpha", "default"]);
        assert!(matches!(manager.create_session("alpha"), Err(SessionError::AlreadyExists(_))));

        manager.fork_session("alpha", "alpha-fork").unwrap();
        assert_eq!(manager.list_sessions(), vec!["alpha", "alpha-fork", "default"]);

        assert!(matches!(
            manager.destroy_session(DEFAULT_SESSION_ID),
            Err(SessionError::DefaultSessionIsPermanent)
        ));
        manager.destroy_session("alpha").unwrap();
        assert!(matches!(manager.destroy_session("alpha"), Err(SessionError::NotFound(_))));
    }
}
