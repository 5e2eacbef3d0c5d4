//! A toy backend with no codegen target of its own: `build` just writes a
//! pretty-printed dump of the core IR tree to disk, and `eval` echoes it
//! back. Useful for inspecting what the transformer produced without
//! wiring up a real code generator.

use std::fs;
use std::path::{Path, PathBuf};

use effc::core_ir;

use crate::backend::{Backend, BackendError, EvalOutcome};

#[derive(Debug, Default, Clone, Copy)]
pub struct CoreDumpBackend;

impl Backend for CoreDumpBackend {
    fn file_extension(&self) -> &str {
        "core-dump"
    }

    fn build(&self, module: &core_ir::Module, output: &Path) -> Result<PathBuf, BackendError> {
        let mut path = output.to_path_buf();
        path.set_extension(self.file_extension());
        fs::write(&path, format!("{module:#?}\n"))?;
        Ok(path)
    }

    fn eval(&self, executable: &Path, _args: &[String]) -> Result<EvalOutcome, BackendError> {
        let contents = fs::read_to_string(executable).map_err(|e| BackendError::EvalFailed(e.to_string()))?;
        Ok(EvalOutcome { exit_code: 0, stdout: contents, stderr: String::new() })
    }
}
