//! Command-line front end: assemble listings, run binaries, or run a
//! payload appended to this executable behind the payload marker.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use skald_asm::assembler::{assemble_with, Options};
use skald_asm::{seek_to_payload, Program};
use skald_vm::Vm;

#[derive(Parser)]
#[command(name = "skald", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble a listing into a binary program.
    Asm {
        /// Input listing.
        input: PathBuf,
        /// Output file; defaults to the input with a `.skb` extension.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Skip the peephole optimization pass.
        #[arg(long)]
        no_optimize: bool,
        /// Set the binary's debug flag.
        #[arg(long)]
        debug: bool,
        /// Heap size hint in bytes stored in the binary.
        #[arg(long)]
        heap_size: Option<u32>,
    },
    /// Run a binary program.
    Run {
        /// Program file; a listing is assembled in memory first.
        program: PathBuf,
        /// Arguments exposed to the program as `args`.
        args: Vec<String>,
    },
    /// Append a program to a host executable behind the payload marker.
    Bundle {
        /// Host executable to copy.
        host: PathBuf,
        /// Program binary or listing to embed.
        program: PathBuf,
        /// Destination file.
        output: PathBuf,
    },
}

fn main() {
    if let Err(error) = dispatch() {
        eprintln!("(skald) {error}");
        std::process::exit(1);
    }
}

/// Installs the log subscriber; a set debug flag turns the allocator and
/// execution diagnostics on unless `RUST_LOG` says otherwise.
fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn dispatch() -> Result<()> {
    match Args::parse().command {
        Some(Command::Asm {
            input,
            output,
            no_optimize,
            debug,
            heap_size,
        }) => {
            init_tracing(debug);
            let source = std::fs::read_to_string(&input)
                .with_context(|| format!("could not read {}", input.display()))?;
            let program = assemble_with(
                &source,
                &Options {
                    optimize: !no_optimize,
                    debug,
                    heap_size_hint: heap_size.unwrap_or(0),
                },
            )?;

            let output = output.unwrap_or_else(|| input.with_extension("skb"));
            let mut file = File::create(&output)
                .with_context(|| format!("could not create {}", output.display()))?;
            file.write_all(&program.to_bytes())?;
            Ok(())
        }
        Some(Command::Run { program, args }) => {
            let program = load(&program)?;
            init_tracing(program.debug);
            run(program, &args)
        }
        Some(Command::Bundle {
            host,
            program,
            output,
        }) => {
            init_tracing(false);
            bundle(&host, &load(&program)?, &output)
        }
        // Without a subcommand, look for a payload appended to this
        // executable.
        None => {
            let exe = std::env::current_exe().context("could not locate this executable")?;
            let mut reader = BufReader::new(
                File::open(&exe).with_context(|| format!("could not read {}", exe.display()))?,
            );
            if !seek_to_payload(&mut reader)? {
                bail!("no embedded program; see `skald --help`");
            }
            let program = Program::read_from(&mut reader)?;
            init_tracing(program.debug);
            let args: Vec<String> = std::env::args().collect();
            run(program, &args)
        }
    }
}

/// Loads a program: binaries decode directly, anything that fails to decode
/// is treated as a listing and assembled in memory.
fn load(path: &Path) -> Result<Program> {
    let bytes =
        std::fs::read(path).with_context(|| format!("could not read {}", path.display()))?;
    match Program::from_bytes(&bytes) {
        Ok(program) => Ok(program),
        Err(_) => {
            let mut reader = bytes.as_slice();
            if seek_to_payload(&mut reader)? {
                return Ok(Program::read_from(&mut reader)?);
            }
            let source = String::from_utf8(bytes)
                .map_err(|_| anyhow::anyhow!("not a skald binary or listing"))?;
            Ok(assemble_with(&source, &Options::default())?)
        }
    }
}

fn run(program: Program, args: &[String]) -> Result<()> {
    let mut vm = Vm::new(program, args)?;
    vm.run()?;
    Ok(())
}

/// Appends `program` to a copy of `host` behind the payload marker.
fn bundle(host: &Path, program: &Program, destination: &Path) -> Result<()> {
    let mut image = Vec::new();
    File::open(host)?.read_to_end(&mut image)?;
    image.extend_from_slice(&skald_asm::PAYLOAD_MARKER);
    image.extend_from_slice(&program.to_bytes());
    std::fs::write(destination, image)?;
    Ok(())
}
