use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use aqua::bytecode::disasm::disassemble;
use aqua::bytecode::format::MAGIC;
use aqua::frontend::token_dumper::TokenDumper;
use aqua::frontend::{Lexer, Parser as SourceParser};
use aqua::{CompileError, ProgramBc, Vm, VmConfig, compile, load, serialize};

#[derive(Parser, Debug)]
#[command(name = "aqua", version)]
#[command(about = "AquaScript compiler and bytecode virtual machine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a source file to a bytecode file
    Compile {
        source: PathBuf,

        /// Output path (defaults to the source path with an .acode extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Execute a bytecode file
    Run {
        bytecode: PathBuf,

        #[command(flatten)]
        vm: VmArgs,
    },
    /// Compile a source file in memory and execute it
    Exec {
        source: PathBuf,

        #[command(flatten)]
        vm: VmArgs,
    },
    /// Show the token stream of a source file
    Tokens {
        source: PathBuf,

        #[arg(long)]
        no_color: bool,

        /// Also show each token's debug representation
        #[arg(long)]
        pretty: bool,
    },
    /// Show the syntax tree of a source file
    Ast { source: PathBuf },
    /// Show a bytecode listing for a source or bytecode file
    Disasm { file: PathBuf },
}

#[derive(Args, Debug)]
struct VmArgs {
    #[arg(long, default_value_t = VmConfig::default().max_call_depth)]
    max_call_depth: usize,

    #[arg(long, default_value_t = VmConfig::default().max_stack_size)]
    max_stack_size: usize,

    /// Print execution statistics to stderr after the run
    #[arg(long)]
    stats: bool,
}

impl VmArgs {
    fn config(&self) -> VmConfig {
        VmConfig {
            max_call_depth: self.max_call_depth,
            max_stack_size: self.max_stack_size,
        }
    }
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match dispatch(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr; `RUST_LOG` overrides the default filter.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("aqua=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn dispatch(command: Command) -> Result<()> {
    match command {
        Command::Compile { source, output } => {
            let bc = compile_file(&source)?;
            let output = output.unwrap_or_else(|| source.with_extension("acode"));
            let bytes = serialize(&bc)?;
            fs::write(&output, &bytes)
                .with_context(|| format!("failed to write '{}'", output.display()))?;
            info!(path = %output.display(), bytes = bytes.len(), "wrote bytecode");
            Ok(())
        }
        Command::Run { bytecode, vm } => {
            let bc = load_file(&bytecode)?;
            execute(&bc, &vm)
        }
        Command::Exec { source, vm } => {
            let bc = compile_file(&source)?;
            execute(&bc, &vm)
        }
        Command::Tokens {
            source,
            no_color,
            pretty,
        } => {
            let text = read_source(&source)?;
            let tokens = Lexer::new(&text)
                .tokenize()
                .map_err(|e| diagnostics(&source, CompileError::from(e)))?;

            let mut dumper = TokenDumper::new();
            if no_color {
                dumper = dumper.no_color();
            }
            if pretty {
                dumper = dumper.pretty();
            }
            dumper.dump(&tokens);
            Ok(())
        }
        Command::Ast { source } => {
            let text = read_source(&source)?;
            let program = Lexer::new(&text)
                .tokenize()
                .map_err(CompileError::from)
                .and_then(|tokens| SourceParser::new(tokens).parse().map_err(CompileError::from))
                .map_err(|e| diagnostics(&source, e))?;
            println!("{:#?}", program);
            Ok(())
        }
        Command::Disasm { file } => {
            let bytes =
                fs::read(&file).with_context(|| format!("failed to read '{}'", file.display()))?;
            let bc = if bytes.starts_with(&MAGIC) {
                load(&bytes).with_context(|| format!("failed to load '{}'", file.display()))?
            } else {
                compile_file(&file)?
            };
            print!("{}", disassemble(&bc));
            Ok(())
        }
    }
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read '{}'", path.display()))
}

fn compile_file(path: &Path) -> Result<ProgramBc> {
    let source = read_source(path)?;
    compile(&source).map_err(|e| diagnostics(path, e))
}

fn load_file(path: &Path) -> Result<ProgramBc> {
    let bytes = fs::read(path).with_context(|| format!("failed to read '{}'", path.display()))?;
    load(&bytes).with_context(|| format!("failed to load '{}'", path.display()))
}

/// One `file:line:col: error: message` line per diagnostic.
fn diagnostics(path: &Path, error: CompileError) -> anyhow::Error {
    let lines: Vec<String> = error
        .diagnostics()
        .iter()
        .map(|d| format!("{}:{}", path.display(), d))
        .collect();
    anyhow::anyhow!(lines.join("\n"))
}

fn execute(bc: &ProgramBc, args: &VmArgs) -> Result<()> {
    let mut vm = Vm::with_config(args.config());
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let result = vm.run(bc, &mut out);
    out.flush()?;

    if args.stats {
        let stats = vm.stats();
        eprintln!("instructions executed: {}", stats.instructions_executed);
        eprintln!("function calls:        {}", stats.function_calls);
        eprintln!("peak stack size:       {}", stats.peak_stack);
        eprintln!("peak call depth:       {}", stats.peak_call_depth);
    }

    if let Err(e) = result {
        if e.kind.is_fatal() {
            bail!("fatal: {}", e);
        }
        bail!("runtime error: {}", e);
    }
    Ok(())
}
