use clap::Parser;
use std::path::PathBuf;

use stencilc::pass::PassId;
use stencilc::pipeline::{compute_provenance, run_pipeline, CompilationState};
use stencilc::report::{ExtentReport, ShapeReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    Ir,
    Shapes,
    Extents,
    BuildInfo,
}

impl EmitStage {
    fn terminal_pass(self) -> Option<PassId> {
        match self {
            EmitStage::Ir | EmitStage::Shapes => Some(PassId::VerifyShapes),
            EmitStage::Extents => Some(PassId::ExtentAnalysis),
            EmitStage::BuildInfo => None,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "stencilc",
    version,
    about = "Infers iteration domains and static shapes for stencil programs"
)]
struct Cli {
    /// Input .json program description
    source: PathBuf,

    /// Output file path (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Ir)]
    emit: EmitStage,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        eprintln!("stencilc: source = {}", cli.source.display());
        eprintln!("stencilc: emit   = {:?}", cli.emit);
    }

    // ── Read and decode source ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("stencilc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    if cli.emit == EmitStage::BuildInfo {
        emit(&cli, &compute_provenance(&source).to_json());
        return;
    }

    let decoded = match stencilc::loader::parse_json(&source) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("stencilc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    let loaded = stencilc::loader::load(&decoded);
    for diag in &loaded.diagnostics {
        eprintln!("{}", diag);
    }
    let program = match loaded.program {
        Some(p) => p,
        None => std::process::exit(1),
    };

    if cli.verbose {
        eprintln!(
            "stencilc: loaded {} functions, {} ops",
            program.functions.len(),
            program.ops().count()
        );
    }

    // ── Passes ──
    let mut state = CompilationState::new(program);
    if let Some(terminal) = cli.emit.terminal_pass() {
        let result = run_pipeline(&mut state, terminal, cli.verbose, |_, diags| {
            for diag in diags {
                eprintln!("{}", diag);
            }
        });
        if let Err(e) = result {
            if cli.verbose {
                eprintln!("stencilc: aborted in {:?}", e.failing_pass);
            }
            std::process::exit(1);
        }
    }

    let text = match cli.emit {
        EmitStage::Ir => state.program.to_string(),
        EmitStage::Shapes => match &state.shapes {
            Some(summary) => ShapeReport::new(&state.program, summary).to_json(),
            None => String::new(),
        },
        EmitStage::Extents => match &state.extents {
            Some(extents) => ExtentReport::new(extents).to_json(),
            None => String::new(),
        },
        EmitStage::BuildInfo => unreachable!("handled before loading"),
    };
    emit(&cli, &text);
}

fn emit(cli: &Cli, text: &str) {
    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("stencilc: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
            if cli.verbose {
                eprintln!("stencilc: wrote {}", path.display());
            }
        }
        None => print!("{}", text),
    }
}
