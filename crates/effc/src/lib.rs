#![doc = include_str!("../README.md")]
#![expect(clippy::module_name_repetitions, reason = "annotation/session types intentionally echo their module")]

pub mod annotations;
pub mod captures;
pub mod core_ir;
pub mod diagnostics;
pub mod effects;
pub mod modules;
pub mod names;
pub mod resource;
pub mod runtime;
pub mod session;
pub mod surface;
pub mod symbols;
pub mod tracer;
pub mod transform;
pub mod types;

pub use crate::{
    annotations::{Annotation, AnnotationsStore, Identity},
    captures::{Capture, CaptureSet},
    core_ir::{BlockExpr, Definition, Expr as CoreExpr, ExternBody, Literal as CoreLiteral, Module as CoreModule, PureExpr, Stmt},
    diagnostics::{Diagnostic, Diagnostics, Position, Severity, Span, ice},
    effects::{Effect, EffectAliasResolver, EffectSet},
    modules::{Module, ModuleGraph, ModuleId, ModuleKind},
    names::{Name, Word, WordInterner},
    resource::{LimitedTracker, NoLimitTracker, ResourceError, ResourceTracker},
    runtime::{Control, PromptAllocator, PromptId, RtValue, Stack, SubStack},
    session::{CompileSession, DEFAULT_SESSION_ID, RunResult, SessionError, SessionManager, Value, resolve_session_id},
    surface::{Expr as SurfaceExpr, HandlerClause, IdDef, IdRef, Literal as SurfaceLiteral, MatchArm, NodeId, NodeIdArena, Pattern},
    symbols::{Symbol, SymbolId, SymbolTable, TermKind, TypeKind, Universe},
    tracer::{NoopTracer, RecordingTracer, StderrTracer, TraceEvent, RuntimeTracer},
    transform::{CaptureAnn, SymbolCaptureAnn, SymbolRole, SymbolRoleAnn, Transformer},
    types::{AliasDef, AliasResolver, BlockType, ValueType},
};
