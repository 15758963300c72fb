use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use docsim_index::IvfPqIndex;

use crate::utils::{search_queries, CliError, ConfigArgs, SearchOptions};

#[derive(Parser, Debug)]
pub struct SearchArgs {
    #[arg(long, help = "Index written by `docsim build`")]
    pub index: PathBuf,
    #[arg(long = "query", required = true, help = "Query text; may be repeated")]
    pub queries: Vec<String>,
    #[clap(flatten)]
    pub options: SearchOptions,
    #[clap(flatten)]
    pub config: ConfigArgs,
}

pub fn search<W: Write>(out: &mut W, args: SearchArgs) -> Result<(), CliError> {
    let mut config = args.config.load()?.docsim;
    args.options.apply(&mut config);
    let index = IvfPqIndex::load(&args.index)?;
    search_queries(
        out,
        &index,
        &args.queries,
        config.index.k,
        config.index.nprobe,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::build::{build, BuildArgs};
    use crate::utils::tests::write_corpus;
    use crate::utils::IndexArgs;

    #[test]
    fn test_search_saved_index() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_corpus(dir.path(), 40);
        let output = dir.path().join("corpus.dsix");
        let no_config = ConfigArgs {
            config_path: Some(dir.path().join("absent.yaml").display().to_string()),
        };
        build(
            &mut std::io::sink(),
            BuildArgs {
                source,
                output: output.clone(),
                index: IndexArgs {
                    nlist: Some(2),
                    m: Some(2),
                    nbits: Some(3),
                    seed: None,
                    dimension: Some(16),
                },
                config: no_config.clone(),
            },
        )
        .unwrap();

        let mut out = Vec::new();
        search(
            &mut out,
            SearchArgs {
                index: output,
                queries: vec!["patent royalty".to_string()],
                options: SearchOptions {
                    k: Some(4),
                    nprobe: Some(2),
                },
                config: no_config,
            },
        )
        .unwrap();
        let line: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(line["query"], "patent royalty");
        assert_eq!(line["results"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_missing_index_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = search(
            &mut std::io::sink(),
            SearchArgs {
                index: dir.path().join("missing.dsix"),
                queries: vec!["anything".to_string()],
                options: SearchOptions::default(),
                config: ConfigArgs {
                    config_path: Some(dir.path().join("absent.yaml").display().to_string()),
                },
            },
        )
        .unwrap_err();
        assert!(matches!(err, CliError::Persistence(_)));
    }
}
