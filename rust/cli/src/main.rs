use docsim_cli::docsim_cli;
use docsim_config::RootConfig;
use docsim_error::DocsimError;
use docsim_tracing::init_logging;

fn main() {
    // Logging is configured from the default config location; a command's
    // --config only affects the index and ingest settings.
    let (service_name, filters) = match RootConfig::load() {
        Ok(config) => (config.docsim.service_name, config.docsim.filters),
        Err(_) => ("docsim".to_string(), Vec::new()),
    };
    if let Err(e) = init_logging(&service_name, &filters) {
        eprintln!("Error: {}", e);
    }

    if let Err(e) = docsim_cli(std::env::args().collect()) {
        tracing::error!(code = %e.code(), error = %e, "Command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
