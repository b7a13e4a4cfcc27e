//! Bismut compiler CLI
//!
//! Three subcommands share one pipeline: `build` writes `out.c` and invokes
//! the host C compiler, `run` builds into a scratch directory and executes
//! the result, `analyze` stops after the type checker and prints JSON
//! diagnostics for IDE tooling.

use bismut::ast::IdGen;
use bismut::codegen;
use bismut::diag::Diagnostics;
use bismut::resolve::{ResolveOptions, Resolver};
use bismut::span::SourceMap;
use bismut::typeck::{self, TypedProgram};
use clap::{Args, Parser, Subcommand};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Parser)]
#[command(name = "bismut")]
#[command(version = bismut::VERSION)]
#[command(about = "The Bismut compiler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct CommonOpts {
    /// Input source file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Define a preprocessor symbol (repeatable)
    #[arg(short = 'D', long = "define", value_name = "SYM")]
    defines: Vec<String>,

    /// Compiler directory holding rt/, modules/, and libs/
    #[arg(long, value_name = "DIR")]
    compiler_dir: Option<PathBuf>,

    /// Suppress warnings and progress output
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Args, Debug, Clone)]
struct BuildOpts {
    #[command(flatten)]
    common: CommonOpts,

    /// Output binary name
    #[arg(short, long, value_name = "NAME")]
    output: Option<PathBuf>,

    /// Optimized build (also disables the debug leak tracker)
    #[arg(short = 'r', long)]
    release: bool,

    /// Disable the debug leak tracker only
    #[arg(long)]
    no_debug_leaks: bool,

    /// C compiler to invoke
    #[arg(long, value_name = "PATH")]
    cc: Option<String>,

    /// Use the embedded TCC compiler
    #[arg(long)]
    tcc: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source file to a native binary
    Build(BuildOpts),

    /// Build into a scratch directory, then execute the binary
    Run(BuildOpts),

    /// Run preprocess/lex/parse/resolve/typecheck and emit JSON diagnostics
    Analyze(CommonOpts),
}

/// Everything the front half of the pipeline produces.
struct FrontOutput {
    sources: SourceMap,
    diags: Diagnostics,
    typed: Option<TypedProgram>,
}

fn default_compiler_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn target_platform(defines: &HashSet<String>) -> Option<String> {
    if defines.contains("__WIN__") {
        Some("win".to_string())
    } else if defines.contains("__MACOS__") {
        Some("macos".to_string())
    } else if defines.contains("__LINUX__") {
        Some("linux".to_string())
    } else {
        None
    }
}

/// Preprocess, lex, parse, resolve, and typecheck one source file.
fn run_front(common: &CommonOpts) -> miette::Result<FrontOutput> {
    let content = std::fs::read_to_string(&common.input)
        .map_err(|e| miette::miette!("cannot read {}: {}", common.input.display(), e))?;

    let defines: HashSet<String> = common.defines.iter().cloned().collect();
    let opts = ResolveOptions {
        compiler_dir: common.compiler_dir.clone().unwrap_or_else(default_compiler_dir),
        target_platform: target_platform(&defines),
        defines,
    };

    let mut sources = SourceMap::new();
    let mut ids = IdGen::new();
    let mut diags = Diagnostics::new();

    let program = Resolver::new(&mut sources, &mut ids, &mut diags, &opts)
        .load_root(&common.input, content);

    let program = match program {
        Some(p) if !diags.has_errors() => p,
        _ => return Ok(FrontOutput { sources, diags, typed: None }),
    };

    let outcome = typeck::check_program(program, &mut ids);
    for w in &outcome.warnings {
        diags.warning(w.span, w.message.clone());
    }
    for e in &outcome.errors {
        diags.error(e.span, format!("type error: {}", e));
    }

    Ok(FrontOutput { sources, diags, typed: outcome.typed })
}

/// Emit C and invoke the host C compiler. Returns the produced binary path.
fn build_binary(opts: &BuildOpts, out_dir: &Path) -> miette::Result<PathBuf> {
    let front = run_front(&opts.common)?;
    front.diags.print(&front.sources, opts.common.quiet);
    let typed = match front.typed {
        Some(t) if !front.diags.has_errors() => t,
        _ => {
            return Err(miette::miette!(
                "found {} error(s)",
                front.diags.error_count().max(1)
            ));
        }
    };

    let debug_leaks = !opts.release && !opts.no_debug_leaks;
    let c_source = codegen::generate_c(&typed, &front.sources, debug_leaks);

    let c_path = out_dir.join("out.c");
    std::fs::write(&c_path, &c_source)
        .map_err(|e| miette::miette!("cannot write {}: {}", c_path.display(), e))?;

    let bin_path = match &opts.output {
        Some(o) => out_dir.join(o),
        None => {
            let stem = opts.common.input.file_stem().unwrap_or_default();
            out_dir.join(stem)
        }
    };

    let compiler_dir =
        opts.common.compiler_dir.clone().unwrap_or_else(default_compiler_dir);
    let cc = if opts.tcc {
        "tcc".to_string()
    } else {
        opts.cc.clone().unwrap_or_else(|| "cc".to_string())
    };

    let mut cmd = Command::new(&cc);
    cmd.arg(&c_path)
        .arg("-o")
        .arg(&bin_path)
        .arg("-std=c99")
        .arg("-I")
        .arg(compiler_dir.join("rt"));
    if opts.release {
        cmd.arg("-O2");
    } else {
        cmd.arg("-O0").arg("-g");
    }
    for flag in &typed.program.extern_cflags {
        cmd.arg(flag);
    }
    for flag in &typed.program.extern_ldflags {
        cmd.arg(flag);
    }
    cmd.arg("-lm");

    let status = cmd
        .status()
        .map_err(|e| miette::miette!("failed to invoke C compiler '{}': {}", cc, e))?;
    if !status.success() {
        return Err(miette::miette!("C compiler '{}' failed", cc));
    }
    Ok(bin_path)
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build(opts) => {
            let cwd = std::env::current_dir()
                .map_err(|e| miette::miette!("cannot determine working directory: {}", e))?;
            build_binary(&opts, &cwd)?;
            Ok(())
        }

        Commands::Run(opts) => {
            let scratch =
                std::env::temp_dir().join(format!("bismut-run-{}", std::process::id()));
            std::fs::create_dir_all(&scratch)
                .map_err(|e| miette::miette!("cannot create scratch dir: {}", e))?;

            let result = (|| -> miette::Result<i32> {
                let bin = build_binary(&opts, &scratch)?;
                let status = Command::new(&bin)
                    .status()
                    .map_err(|e| miette::miette!("failed to run {}: {}", bin.display(), e))?;
                Ok(status.code().unwrap_or(1))
            })();

            // The scratch directory goes away on every path.
            let _ = std::fs::remove_dir_all(&scratch);

            match result {
                Ok(code) => std::process::exit(code),
                Err(e) => Err(e),
            }
        }

        Commands::Analyze(common) => {
            let front = run_front(&common)?;
            let report =
                front.diags.to_report(&front.sources, &common.input.display().to_string());
            println!(
                "{}",
                serde_json::to_string(&report)
                    .map_err(|e| miette::miette!("cannot serialize report: {}", e))?
            );
            std::process::exit(if report.success { 0 } else { 1 });
        }
    }
}
