mod commands;
mod utils;

use crate::commands::build::{build, BuildArgs};
use crate::commands::run::{run, RunArgs};
use crate::commands::search::{search, SearchArgs};
use clap::{Parser, Subcommand};
use std::io;

pub use crate::utils::CliError;

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest documents, train an index and save it
    Build(BuildArgs),
    /// Answer queries against a saved index
    Search(SearchArgs),
    /// Build in memory and answer queries in one step
    Run(RunArgs),
}

#[derive(Parser, Debug)]
#[command(name = "docsim")]
#[command(version = "0.1.0")]
#[command(about = "Approximate similarity search over compressed document payloads", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Parses `args` (program name first) and runs the command. Results go to
/// stdout as JSON lines.
pub fn docsim_cli(args: Vec<String>) -> Result<(), CliError> {
    let cli = Cli::parse_from(args);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match cli.command {
        Command::Build(args) => build(&mut out, args),
        Command::Search(args) => search(&mut out, args),
        Command::Run(args) => run(&mut out, args),
    }
}
