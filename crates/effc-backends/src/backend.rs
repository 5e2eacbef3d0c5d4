//! The backend-runner interface every concrete codegen target implements:
//! a file extension, a prelude, extra include paths, a setup check, and the
//! two-step build-then-eval execution contract.
//!
//! Parsing and the compiler frontend live in `effc`; this crate only picks
//! up at lowered core IR and is responsible for turning it into something
//! runnable and then running it.

use std::fmt;
use std::path::{Path, PathBuf};

use effc::core_ir;

/// What a completed evaluation produced: the forwarded process exit code
/// plus anything the backend captured on stdout/stderr along the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvalOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl EvalOutcome {
    #[must_use]
    pub fn success(exit_code: i32) -> Self {
        Self { exit_code, stdout: String::new(), stderr: String::new() }
    }

    /// A non-zero exit code is surfaced as a run error by callers, never by
    /// `eval` itself — the backend's job is just to forward what happened.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Separates failures by pipeline stage, the same way the rest of this
/// codebase keeps parse/compile/runtime failures distinct instead of
/// collapsing them into one opaque string.
#[derive(Debug, Clone)]
pub enum BackendError {
    /// `check_setup` found the backend's toolchain unusable.
    SetupFailed(String),
    /// `build` could not turn the module into a runnable artifact.
    BuildFailed(String),
    /// `eval` could not run a previously built artifact.
    EvalFailed(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetupFailed(reason) => write!(f, "backend setup failed: {reason}"),
            Self::BuildFailed(reason) => write!(f, "build failed: {reason}"),
            Self::EvalFailed(reason) => write!(f, "eval failed: {reason}"),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<std::io::Error> for BackendError {
    fn from(error: std::io::Error) -> Self {
        Self::BuildFailed(error.to_string())
    }
}

/// A concrete compilation target. Every method maps directly onto one
/// clause of the backend-runner contract: generated artifacts carry
/// `file_extension`, `prelude` names are auto-imported ahead of user code,
/// `includes` adds extra search directories alongside the standard
/// library, `check_setup` verifies the backend's toolchain is usable
/// before a build is attempted, `build` lowers a module to an executable
/// artifact, and `eval` runs that artifact and forwards its exit code.
pub trait Backend {
    /// The extension generated artifacts are written with, without a
    /// leading dot.
    fn file_extension(&self) -> &str;

    /// Module names this backend auto-imports ahead of every program.
    fn prelude(&self) -> &[&str] {
        &[]
    }

    /// Extra directories to search for includes, given the standard
    /// library root.
    fn includes(&self, stdlib: &Path) -> Vec<PathBuf> {
        vec![stdlib.to_path_buf()]
    }

    /// Checks that this backend's toolchain is present and usable.
    ///
    /// # Errors
    /// Returns `BackendError::SetupFailed` with an explanation when it
    /// isn't.
    fn check_setup(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Lowers `module` into a runnable artifact at `output`, returning the
    /// path `eval` should be given back.
    ///
    /// # Errors
    /// Returns `BackendError::BuildFailed` if the module can't be turned
    /// into an artifact.
    fn build(&self, module: &core_ir::Module, output: &Path) -> Result<PathBuf, BackendError>;

    /// Runs a previously built artifact, forwarding `args` and capturing
    /// stdout/stderr.
    ///
    /// # Errors
    /// Returns `BackendError::EvalFailed` if the artifact can't be run.
    fn eval(&self, executable: &Path, args: &[String]) -> Result<EvalOutcome, BackendError>;
}
