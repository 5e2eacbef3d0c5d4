//! An in-process backend with no separate executable format: `build`
//! stashes the lowered module under its output path, and `eval` runs it
//! straight through [`effc::session::CompileSession::run`] using a forked
//! session, so neither step ever leaves the current process.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use ahash::AHashMap;

use effc::core_ir;
use effc::resource::{LimitedTracker, NoLimitTracker};
use effc::runtime::RtValue;
use effc::session::CompileSession;
use effc::tracer::NoopTracer;

use crate::backend::{Backend, BackendError, EvalOutcome};

/// Bounds the interpreter will run a program under; `None` runs unlimited,
/// matching `NoLimitTracker`'s zero-cost default.
#[derive(Debug, Clone, Copy, Default)]
pub struct Budget {
    pub max_recursion: Option<usize>,
    pub max_steps: Option<usize>,
}

pub struct InterpreterBackend {
    session: CompileSession,
    budget: Budget,
    built: RefCell<AHashMap<PathBuf, core_ir::Module>>,
}

impl InterpreterBackend {
    /// Forks `session` so this backend's evaluation never mutates the
    /// caller's own compile session (§4.1's fork independence).
    #[must_use]
    pub fn new(session: &CompileSession, budget: Budget) -> Self {
        Self {
            session: session.fork(format!("{}-interpreter", session.name)),
            budget,
            built: RefCell::new(AHashMap::default()),
        }
    }

    fn run_module(&self, module: core_ir::Module) -> Result<RtValue, effc::resource::ResourceError> {
        let mut tracer = NoopTracer;
        match (self.budget.max_recursion, self.budget.max_steps) {
            (None, None) => self.session.run(module, &mut tracer, &NoLimitTracker),
            (max_recursion, max_steps) => {
                let limited = LimitedTracker {
                    max_recursion: max_recursion.unwrap_or(usize::MAX),
                    max_steps: max_steps.unwrap_or(usize::MAX),
                };
                self.session.run(module, &mut tracer, &limited)
            }
        }
    }
}

impl Backend for InterpreterBackend {
    fn file_extension(&self) -> &str {
        "effir"
    }

    fn build(&self, module: &core_ir::Module, output: &Path) -> Result<PathBuf, BackendError> {
        let mut path = output.to_path_buf();
        path.set_extension(self.file_extension());
        std::fs::write(&path, b"effc interpreter module\n")?;
        self.built.borrow_mut().insert(path.clone(), module.clone());
        Ok(path)
    }

    fn eval(&self, executable: &Path, _args: &[String]) -> Result<EvalOutcome, BackendError> {
        let module = self
            .built
            .borrow()
            .get(executable)
            .cloned()
            .ok_or_else(|| BackendError::EvalFailed(format!("no built module for {}", executable.display())))?;
        match self.run_module(module) {
            Ok(RtValue::Int(code)) => Ok(EvalOutcome::success(truncate_exit_code(code))),
            Ok(_) => Ok(EvalOutcome::success(0)),
            Err(error) => Ok(EvalOutcome { exit_code: 1, stdout: String::new(), stderr: error.to_string() }),
        }
    }
}

fn truncate_exit_code(code: i64) -> i32 {
    i32::try_from(code).unwrap_or(if code.is_negative() { i32::MIN } else { i32::MAX })
}

#[cfg(test)]
mod tests {
    use super::*;
    use effc::surface::{Expr, Literal, NodeId};

    #[test]
    fn evaluates_a_lowered_program_and_forwards_its_exit_code() {
        let mut session = CompileSession::new("t");
        let tree = Expr::Lit(NodeId::testing(0), Literal::Int(7));
        session.define(tree).unwrap();
        let module = session.lower();

        let backend = InterpreterBackend::new(&session, Budget::default());
        let dir = std::env::temp_dir().join(format!("effc-interp-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let artifact = backend.build(&module, &dir.join("program")).unwrap();
        let outcome = backend.eval(&artifact, &[]).unwrap();
        assert_eq!(outcome.exit_code, 7);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn a_step_budget_is_reported_as_a_nonzero_exit() {
        let mut session = CompileSession::new("t");
        let tree = Expr::While {
            node: NodeId::testing(0),
            cond: Box::new(Expr::Lit(NodeId::testing(1), Literal::Bool(true))),
            body: Box::new(Expr::Lit(NodeId::testing(2), Literal::Unit)),
        };
        session.define(tree).unwrap();
        let module = session.lower();

        let backend = InterpreterBackend::new(&session, Budget { max_recursion: Some(64), max_steps: Some(200) });
        let dir = std::env::temp_dir().join(format!("effc-interp-budget-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let artifact = backend.build(&module, &dir.join("program")).unwrap();
        let outcome = backend.eval(&artifact, &[]).unwrap();
        assert_ne!(outcome.exit_code, 0);
        assert!(!outcome.stderr.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }
}
