//! Machine Code Backend Driver
//!
//! Replays instruction selector traces through the register allocator and
//! rewriter, and prints the resulting assembly.

mod trace;

use clap::{ArgAction, Parser, Subcommand};
use log::{info, LevelFilter};
use mcb_codegen::{Backend, BackendConfig, RiscVTarget, Target, TargetKind, X86Target};
use mcb_common::Register;
use std::fs;
use std::path::{Path, PathBuf};
use trace::Trace;

#[derive(Parser)]
#[command(name = "mcb")]
#[command(about = "Machine code backend: register allocation and rewriting")]
#[command(version = "0.1.0")]
struct Cli {
    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a JSON selector trace to assembly
    Compile {
        /// Input trace file
        input: PathBuf,

        /// Target architecture (x86_64 or riscv64); overrides the trace
        #[arg(short, long)]
        target: Option<TargetKind>,

        /// Output assembly file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Backend configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Log every function's register allocation
        #[arg(long)]
        dump_alloc: bool,
    },

    /// Print a target's register table
    Registers {
        /// Target architecture (x86_64 or riscv64)
        #[arg(short, long, default_value = "x86_64")]
        target: TargetKind,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Compile {
            input,
            target,
            output,
            config,
            dump_alloc,
        } => compile_command(&input, target, output.as_deref(), config.as_deref(), dump_alloc),
        Commands::Registers { target } => {
            match target {
                TargetKind::X86_64 => print!("{}", register_table(&X86Target::new())),
                TargetKind::RiscV64 => print!("{}", register_table(&RiscVTarget::new())),
            }
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let mut builder = env_logger::Builder::from_default_env();
    match verbose {
        0 => {}
        1 => {
            builder.filter_level(LevelFilter::Debug);
        }
        _ => {
            builder.filter_level(LevelFilter::Trace);
        }
    }
    builder.init();
}

fn load_config(path: Option<&Path>, dump_alloc: bool) -> Result<BackendConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => BackendConfig::default(),
    };
    config.trace_allocation |= dump_alloc;
    Ok(config)
}

fn compile_command(
    input: &Path,
    target: Option<TargetKind>,
    output: Option<&Path>,
    config: Option<&Path>,
    dump_alloc: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let trace = Trace::from_json(&fs::read_to_string(input)?)?;
    let config = load_config(config, dump_alloc)?;
    let kind = target.or(trace.target).unwrap_or(TargetKind::X86_64);
    info!("Compiling {} for {}", input.display(), kind);

    let asm = match kind {
        TargetKind::X86_64 => compile_trace(X86Target::new(), config, &trace)?,
        TargetKind::RiscV64 => compile_trace(RiscVTarget::new(), config, &trace)?,
    };

    match output {
        Some(path) => {
            fs::write(path, &asm)?;
            info!("Assembly written to: {}", path.display());
        }
        None => print!("{}", asm),
    }
    Ok(())
}

/// Run every traced function through one session and print the program
fn compile_trace<T: Target>(target: T, config: BackendConfig, trace: &Trace) -> mcb_common::Result<String> {
    let mut backend = Backend::with_config(target, config);
    let mut compiled = Vec::with_capacity(trace.functions.len());
    for func in &trace.functions {
        let function = trace::build_function(&mut backend, func)?;
        compiled.push(backend.compile(function)?);
    }
    Ok(backend.print_program(&compiled))
}

fn register_table<T: Target>(target: &T) -> String {
    let mut out = format!("{:<6} {:>3}  {:<12} {:<4} {}\n", "name", "id", "saved by", "arg", "allocatable");
    let registers = (1..)
        .map(Register::physical)
        .map_while(|reg| target.register_name(reg).map(|name| (reg, name)));
    for (reg, name) in registers {
        let saved_by = if target.is_callee_saved(reg) { "callee" } else { "caller" };
        let arg = if target.is_argument_register(reg) { "yes" } else { "" };
        let allocatable = if target.allocatable().contains(&reg) { "yes" } else { "" };
        out.push_str(&format!(
            "{:<6} {:>3}  {:<12} {:<4} {}\n",
            name,
            reg.raw(),
            saved_by,
            arg,
            allocatable
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const CALL_TRACE: &str = r#"{
        "functions": [
            {
                "name": "square",
                "ops": [
                    {"emit": {"opcode": "mov", "operands": [{"reg": "rdi"}, {"vreg": 0}]}},
                    {"emit": {"opcode": "imul", "operands": [{"vreg": 0}, {"vreg": 0}]}},
                    {"emit": {"opcode": "mov", "operands": [{"vreg": 0}, {"reg": "rax"}]}}
                ]
            },
            {
                "name": "main",
                "ops": [
                    {"emit": {"opcode": "mov", "operands": [{"imm": 7}, {"vreg": 0}]}},
                    {"emit": {"opcode": "mov", "operands": [{"vreg": 0}, {"reg": "rdi"}]}},
                    "call_boundary",
                    {"emit": {"opcode": "call", "operands": [{"label": "square"}, {"imm": 1}]}},
                    {"emit": {"opcode": "add", "operands": [{"vreg": 0}, {"reg": "rax"}]}}
                ]
            }
        ]
    }"#;

    #[test]
    fn test_compile_x86_trace() {
        let trace = Trace::from_json(CALL_TRACE).unwrap();
        let asm = compile_trace(X86Target::new(), BackendConfig::default(), &trace).unwrap();
        assert!(asm.starts_with("\t.text\n"));
        assert!(asm.contains("square:"));
        assert!(asm.contains("main:"));
        assert!(asm.contains("\tcallq square"));
        assert!(!asm.contains("vreg"));
        // main keeps 7 in a callee-saved register across the call without saving it
        assert!(asm.contains("\tmovq $7, %rbx"));
        assert!(!asm.contains("pushq %rbx"));
    }

    #[test]
    fn test_compile_riscv_trace() {
        let trace = Trace::from_json(
            r#"{"target": "riscv64", "functions": [{"name": "f", "local_frame_bytes": 16, "ops": [
                {"emit": {"opcode": "li", "operands": [{"vreg": 0}, {"imm": 3}]}},
                {"emit": {"opcode": "sd", "operands": [{"vreg": 0}, {"mem": {"disp": -16, "base": {"reg": "fp"}}}]}}
            ]}]}"#,
        )
        .unwrap();
        assert_eq!(trace.target, Some(TargetKind::RiscV64));
        let asm = compile_trace(RiscVTarget::new(), BackendConfig::default(), &trace).unwrap();
        assert!(asm.contains("\tli t0, 3"));
        assert!(asm.contains("\tsd t0, -16(fp)"));
        assert!(asm.contains("\taddi sp, sp, -32"));
    }

    #[test]
    fn test_register_table_lists_every_register() {
        let table = register_table(&X86Target::new());
        assert_eq!(table.lines().count(), 17);
        assert!(table.contains("rbx"));
        let table = register_table(&RiscVTarget::new());
        assert_eq!(table.lines().count(), 33);
    }
}
