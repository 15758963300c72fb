use std::io::Write;
use std::path::PathBuf;

use clap::Parser;

use crate::utils::{build_index, write_json_line, CliError, ConfigArgs, IndexArgs};

#[derive(Parser, Debug)]
pub struct BuildArgs {
    #[arg(long, help = "JSON lines file of {\"id\", \"payload\"} records")]
    pub source: PathBuf,
    #[arg(long, help = "Where to write the index")]
    pub output: PathBuf,
    #[clap(flatten)]
    pub index: IndexArgs,
    #[clap(flatten)]
    pub config: ConfigArgs,
}

pub fn build<W: Write>(out: &mut W, args: BuildArgs) -> Result<(), CliError> {
    let mut config = args.config.load()?.docsim;
    args.index.apply(&mut config);
    let (index, summary) = build_index(&config, &args.source)?;
    index.save(&args.output)?;
    write_json_line(out, &summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::tests::write_corpus;
    use docsim_index::IvfPqIndex;

    #[test]
    fn test_build_writes_loadable_index() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_corpus(dir.path(), 40);
        let output = dir.path().join("corpus.dsix");
        let args = BuildArgs {
            source,
            output: output.clone(),
            index: IndexArgs {
                nlist: Some(2),
                m: Some(2),
                nbits: Some(3),
                seed: Some(1),
                dimension: Some(16),
            },
            config: ConfigArgs {
                config_path: Some(dir.path().join("absent.yaml").display().to_string()),
            },
        };
        let mut out = Vec::new();
        build(&mut out, args).unwrap();

        let summary: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(summary["documents"], 40);
        assert_eq!(summary["skipped"], 1);
        assert_eq!(summary["nlist"], 2);
        let index = IvfPqIndex::load(&output).unwrap();
        assert_eq!(index.len(), 40);
        assert_eq!(index.dimensionality(), 16);
    }
}
