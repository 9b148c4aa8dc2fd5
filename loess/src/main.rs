use std::process;
use std::str::FromStr;

use clap::{error::ErrorKind, ArgAction, CommandFactory, Parser};
use colored::Colorize;

use loess::{demo, optimize, CompilationMode, Config};
use loess_lir::Inst;

#[derive(Debug, Parser)]
#[command(version, about = "loess compiler driver", long_about = None)]
struct Args {
    /// Enable the lir optimization pipeline
    #[arg(long = "optimize-lir", default_value_t = true, action = ArgAction::Set)]
    optimize_lir: bool,

    /// Bracket every instruction with debug print instructions
    #[arg(long = "instrument-debug")]
    instrument_debug: bool,

    /// Compilation mode: train or infer
    #[arg(long, default_value = "infer")]
    mode: String,
}

fn main() {
    let args = Args::parse();

    let mode = match CompilationMode::from_str(&args.mode) {
        Ok(mode) => mode,
        Err(_) => Args::command()
            .error(
                ErrorKind::InvalidValue,
                format!("'{}' is not a compilation mode", args.mode),
            )
            .exit(),
    };
    let config = Config {
        optimize_lir: args.optimize_lir,
        instrument_debug: args.instrument_debug,
        mode,
    };

    let mut module = demo::mlp();
    let instructions_before = module.len();
    println!("{}", "lir before optimization:".bold());
    println!("{module}\n");

    if let Err(error) = optimize(&mut module, &config) {
        eprintln!("{} {error}", "broken module:".red().bold());
        process::exit(1);
    }

    println!("{}", "lir after optimization:".bold());
    println!("{module}\n");

    let allocations = module
        .iter()
        .filter(|(_, inst)| matches!(inst, Inst::Alloc { .. }))
        .count();
    let constants = module
        .weights()
        .iter()
        .filter(|&&weight| {
            module.value(weight).mutability() == Some(loess_lir::Mutability::Constant)
        })
        .count();
    println!(
        "{} instructions ({} before), {} scratch buffers, {} constant weights",
        module.len(),
        instructions_before,
        allocations,
        constants
    );
}
