use std::io::Write;
use std::path::PathBuf;

use clap::Parser;

use crate::utils::{build_index, search_queries, CliError, ConfigArgs, IndexArgs, SearchOptions};

/// Builds an index in memory and answers the queries against it.
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[arg(long, help = "JSON lines file of {\"id\", \"payload\"} records")]
    pub source: PathBuf,
    #[arg(long = "query", required = true, help = "Query text; may be repeated")]
    pub queries: Vec<String>,
    #[clap(flatten)]
    pub index: IndexArgs,
    #[clap(flatten)]
    pub options: SearchOptions,
    #[clap(flatten)]
    pub config: ConfigArgs,
}

pub fn run<W: Write>(out: &mut W, args: RunArgs) -> Result<(), CliError> {
    let mut config = args.config.load()?.docsim;
    args.index.apply(&mut config);
    args.options.apply(&mut config);
    let (index, summary) = build_index(&config, &args.source)?;
    tracing::info!(
        documents = summary.documents,
        skipped = summary.skipped,
        imbalance_factor = summary.imbalance_factor,
        "Index ready"
    );
    search_queries(
        out,
        &index,
        &args.queries,
        config.index.k,
        config.index.nprobe,
    )
}
