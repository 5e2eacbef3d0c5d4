mod demos;

use std::{env, process::ExitCode, time::Instant};

use effc::session::CompileSession;
use effc_backends::{Backend, CoreDumpBackend, InterpreterBackend};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let options = match Options::parse(&args) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    if options.server {
        return match effc_lsp::run_stdio_loop() {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("error: {err}");
                ExitCode::FAILURE
            }
        };
    }

    run_program(&options)
}

#[derive(Debug)]
struct Options {
    program: String,
    backend: BackendKind,
    debug: bool,
    server: bool,
}

#[derive(Debug, Clone, Copy)]
enum BackendKind {
    Interpreter,
    CoreDump,
}

impl Options {
    fn parse(args: &[String]) -> Result<Self, String> {
        let mut program = None;
        let mut backend = BackendKind::Interpreter;
        let mut debug = false;
        let mut server = false;

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--server" => server = true,
                "--debug" => debug = true,
                "--backend" => {
                    let value = args.get(i + 1).ok_or("--backend requires a value")?;
                    backend = match value.as_str() {
                        "interpreter" => BackendKind::Interpreter,
                        "core-dump" => BackendKind::CoreDump,
                        other => return Err(format!("unknown backend `{other}` (known: interpreter, core-dump)")),
                    };
                    i += 1;
                }
                // Recognized for parity with a real codegen backend's toolchain
                // discovery, but neither built-in backend here reads them.
                "--gcc-libraries" | "--gcc-includes" => {
                    i += 1;
                }
                other if !other.starts_with('-') => program = Some(other.to_string()),
                other => return Err(format!("unrecognized flag `{other}`")),
            }
            i += 1;
        }

        Ok(Self {
            program: program.unwrap_or_else(|| "identity".to_string()),
            backend,
            debug,
            server,
        })
    }
}

fn run_program(options: &Options) -> ExitCode {
    let mut session = CompileSession::new(options.program.as_str());
    let tree = match demos::build(&mut session, &options.program) {
        Ok(tree) => tree,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = session.define(tree) {
        eprintln!("error:\n{err:?}");
        return ExitCode::FAILURE;
    }
    if let Err(diagnostics) = session.typecheck() {
        for diagnostic in diagnostics {
            eprintln!("{diagnostic:?}");
        }
        return ExitCode::FAILURE;
    }

    let module = session.lower();
    if options.debug {
        eprintln!("-- core ir --\n{module:#?}");
    }

    let dir = env::temp_dir().join(format!("effc-cli-{}", std::process::id()));
    if let Err(err) = std::fs::create_dir_all(&dir) {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }
    let output = dir.join(&options.program);

    let start = Instant::now();
    let outcome = match options.backend {
        BackendKind::Interpreter => {
            let backend = InterpreterBackend::new(&session, effc_backends::Budget::default());
            build_and_eval(&backend, &module, &output, options.debug)
        }
        BackendKind::CoreDump => build_and_eval(&CoreDumpBackend, &module, &output, options.debug),
    };
    std::fs::remove_dir_all(&dir).ok();

    match outcome {
        Ok(outcome) => {
            let elapsed = start.elapsed();
            if !outcome.stdout.is_empty() {
                println!("{}", outcome.stdout);
            }
            if !outcome.stderr.is_empty() {
                eprintln!("{}", outcome.stderr);
            }
            eprintln!("finished after {elapsed:?} with exit code {}", outcome.exit_code);
            exit_code_from(outcome.exit_code)
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn build_and_eval(
    backend: &impl Backend,
    module: &effc::core_ir::Module,
    output: &std::path::Path,
    debug: bool,
) -> Result<effc_backends::EvalOutcome, effc_backends::BackendError> {
    backend.check_setup()?;
    let artifact = backend.build(module, output)?;
    if debug {
        eprintln!("built {}", artifact.display());
    }
    backend.eval(&artifact, &[])
}

fn exit_code_from(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}
