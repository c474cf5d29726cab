use std::io::{IsTerminal, Read};
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use smalljs::diagnostic::Diagnostic;
use smalljs::diagnostic::ansi::AnsiRenderer;
use smalljs::runtime::Env;
use smalljs::vm::{Dictionary, EngineConfig};
use smalljs::{interpreter, parser, vm};

#[derive(Parser)]
#[command(name = "smalljs", version, about = "Run a small JavaScript subset")]
struct Args {
    /// Script to run; reads stdin when absent
    file: Option<PathBuf>,

    /// Evaluator to run the script with
    #[arg(long, value_enum, default_value_t = Mode::Stack)]
    mode: Mode,

    /// Stack capacity in words
    #[arg(long, default_value_t = EngineConfig::default().stack_capacity)]
    stack_size: usize,

    /// Heap capacity in words
    #[arg(long, default_value_t = EngineConfig::default().heap_capacity)]
    heap_size: usize,

    /// Print an intermediate form instead of running
    #[arg(long, value_enum)]
    emit: Option<Emit>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// Tree-walking evaluator
    Ast,
    /// Tagged-word stack machine
    Stack,
}

#[derive(Clone, Copy, ValueEnum)]
enum Emit {
    /// Syntax tree as JSON
    Ast,
    /// Disassembled top-level code
    Code,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("SMALLJS_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn read_source(file: Option<&PathBuf>) -> std::io::Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path),
        None => {
            let mut source = String::new();
            std::io::stdin().read_to_string(&mut source)?;
            Ok(source)
        }
    }
}

fn report(source: &str, diagnostic: Diagnostic) -> ! {
    let renderer = AnsiRenderer { use_color: std::io::stderr().is_terminal() };
    eprint!("{}", renderer.render(&diagnostic.with_source(source)));
    std::process::exit(1);
}

fn main() {
    init_tracing();
    let args = Args::parse();

    let source = match read_source(args.file.as_ref()) {
        Ok(s) => s,
        Err(e) => {
            let name = args.file.as_ref().map_or("<stdin>".into(), |p| p.display().to_string());
            eprintln!("Error reading {}: {}", name, e);
            std::process::exit(1);
        }
    };

    let script = match parser::parse_source(&source) {
        Ok(s) => s,
        Err(e) => report(&source, Diagnostic::from(&e)),
    };

    match args.emit {
        Some(Emit::Ast) => {
            match serde_json::to_string_pretty(&script) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    eprintln!("Serialization error: {}", e);
                    std::process::exit(1);
                }
            }
            return;
        }
        Some(Emit::Code) => {
            let mut dict = Dictionary::new();
            let main = match vm::compile_script(&script, &mut dict) {
                Ok(m) => m,
                Err(e) => report(&source, Diagnostic::from(&e)),
            };
            if let Some(code) = main.code() {
                print!("{}", code.disassemble(main.name(), &dict));
            }
            return;
        }
        None => {}
    }

    let globals = Env::with_stdout();
    let result = match args.mode {
        Mode::Ast => interpreter::run(&script, &globals).map_err(smalljs::Error::from),
        Mode::Stack => {
            let config = EngineConfig { stack_capacity: args.stack_size, heap_capacity: args.heap_size };
            vm::run_script(&script, &globals, config)
        }
    };
    match result {
        Ok(value) => debug!(%value, "script finished"),
        Err(e) => report(&source, Diagnostic::from(&e)),
    }
}
