use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use miette::{IntoDiagnostic, Result};

use braid::{obj, RunState, TermIo};

/// Braid is a compact assembler & virtual machine toolchain for the LC3
/// architecture.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble a `.asm` source file into a binary object image
    Asm {
        /// Source file to assemble
        input: PathBuf,
        /// Destination for the image (defaults to the input with `.obj`)
        output: Option<PathBuf>,
    },
    /// Load an object image and run it to HALT
    Run {
        /// Image to run
        #[arg(default_value = "./bin/out.obj")]
        image: PathBuf,
    },
    /// Assemble without writing an object image
    Check {
        /// Source file to check
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let Some(command) = args.command else {
        println!("\n~ braid - an LC3 assembler & virtual machine ~");
        println!("{SHORT_INFO}");
        return Ok(());
    };

    match command {
        Command::Asm { input, output } => {
            let src = read_source(&input)?;
            status("Assembling", &input);
            let words = braid::assemble(src)?;
            let out_path = output.unwrap_or_else(|| input.with_extension("obj"));
            fs::write(&out_path, obj::serialize(&words)).into_diagnostic()?;
            status("Saved to", &out_path);
            Ok(())
        }
        Command::Run { image } => {
            let bytes = fs::read(&image).into_diagnostic()?;
            let (orig, words) = obj::read(&bytes)?;
            status("Running", &image);
            let mut state = RunState::load(orig, &words, Box::new(TermIo::new()))?;
            state.run()?;
            status("Completed", &image);
            Ok(())
        }
        Command::Check { input } => {
            let src = read_source(&input)?;
            status("Checking", &input);
            braid::assemble(src)?;
            println!("{:>12} with 0 errors", "Finished".green().bold());
            Ok(())
        }
    }
}

/// Diagnostics keep labels into the source for the rest of the run, so the
/// file contents are leaked once.
fn read_source(path: &Path) -> Result<&'static str> {
    let contents = fs::read_to_string(path).into_diagnostic()?;
    Ok(Box::leak(contents.into_boxed_str()))
}

fn status(verb: &str, path: &Path) {
    println!("{:>12} {}", verb.green().bold(), path.display());
}

const SHORT_INFO: &str = r"
An all-in-one toolchain for assembling and running LC3 assembly code.
Please use `-h` or `--help` to access the usage instructions.
";
