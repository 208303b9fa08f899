//! The SMPL compiler driver: reads a source file, lowers it to SSA form,
//! folds it, and prints a Graphviz description of the resulting CFG.
//!
//! Run with `--help` for the flag list.

use smpl::back;
use smpl::common::Error;
use smpl::front::{self, lex};
use smpl::middle::fold;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the SMPL source file
    input: String,
    /// dump the token stream and exit, instead of building IR
    #[arg(long, default_value_t = false)]
    lex: bool,
    /// disable the constant-folding / algebraic-identity pass
    #[arg(long = "no-ce", default_value_t = false)]
    no_ce: bool,
    /// accepted for interface parity; this crate never shells out to a
    /// graph renderer, so there is no viewer to suppress
    #[arg(long = "no-view", default_value_t = false)]
    no_view: bool,
    /// accepted for interface parity; hints the output format a renderer
    /// would use, logged but otherwise unused
    #[arg(long = "output-png", default_value_t = false)]
    output_png: bool,
}

fn run(args: &Args) -> Result<(), Error> {
    let source = std::fs::read_to_string(&args.input).expect("input file should be readable");

    if args.lex {
        let lexer = lex::Lexer::new(&source);
        for token in lexer.tokenize()? {
            println!("{token}");
        }
        return Ok(());
    }

    if args.output_png {
        log::warn!("--output-png has no effect: this crate emits a graph description, not an image");
    }
    if args.no_view {
        log::warn!("--no-view has no effect: this crate never launches a viewer");
    }

    let ast = front::parse(&source)?;
    let mut program = front::lower(&ast)?;
    fold::optimize(&mut program, !args.no_ce);
    println!("{}", back::render(&mut program, !args.no_ce));
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
