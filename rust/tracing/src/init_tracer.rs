use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::fmt;
use tracing_subscriber::Registry;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFilterLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogFilterLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFilterLevel::Trace => f.write_str("trace"),
            LogFilterLevel::Debug => f.write_str("debug"),
            LogFilterLevel::Info => f.write_str("info"),
            LogFilterLevel::Warn => f.write_str("warn"),
            LogFilterLevel::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogFilter {
    pub crate_name: String,
    pub filter_level: LogFilterLevel,
}

#[derive(Error, Debug)]
pub enum TracingInitError {
    #[error("No tracing layers to install")]
    NoLayers,
    #[error("Failed to set global tracing subscriber: {0}")]
    SetGlobalDefault(#[from] tracing::subscriber::SetGlobalDefaultError),
}

// Crate names use underscores: the compiler rewrites hyphens in crate names so
// they are valid identifiers, and targets are matched on the rewritten form.
const DEFAULT_CRATE_NAMES: &[&str] = &[
    "docsim",
    "docsim_cli",
    "docsim_config",
    "docsim_distance",
    "docsim_error",
    "docsim_index",
    "docsim_ingest",
    "docsim_tracing",
];

/// The filter directive used when `RUST_LOG` is unset: docsim crates at
/// `info`, everything else at `error`, then the custom filters in order.
pub fn global_filter_directive(custom_filters: &[LogFilter]) -> String {
    let mut directives = vec!["error".to_string()];
    directives.extend(DEFAULT_CRATE_NAMES.iter().map(|name| format!("{name}=info")));
    directives.extend(
        custom_filters
            .iter()
            .map(|filter| format!("{}={}", filter.crate_name, filter.filter_level)),
    );
    directives.join(",")
}

pub fn init_global_filter_layer(
    custom_filters: &[LogFilter],
) -> Box<dyn Layer<Registry> + Send + Sync> {
    EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| global_filter_directive(custom_filters)),
    )
    .boxed()
}

/// Human-readable log lines. Written to stderr so stdout stays free for command
/// output.
pub fn init_stdout_layer() -> Box<dyn Layer<Registry> + Send + Sync> {
    fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .boxed()
}

pub fn init_tracing(
    layers: Vec<Box<dyn Layer<Registry> + Send + Sync>>,
) -> Result<(), TracingInitError> {
    let layers = layers
        .into_iter()
        .reduce(|a, b| Box::new(a.and_then(b)))
        .ok_or(TracingInitError::NoLayers)?;
    let subscriber = tracing_subscriber::registry().with(layers);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing::debug!("Global tracing subscriber set");
    Ok(())
}

pub fn init_panic_tracing_hook() {
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let payload = panic_info.payload();

        let payload = if let Some(s) = payload.downcast_ref::<&str>() {
            Some(&**s)
        } else {
            payload.downcast_ref::<String>().map(|s| s.as_str())
        };

        tracing::error!(
            panic.payload = payload,
            panic.location = panic_info.location().map(|l| l.to_string()),
            panic.backtrace = tracing::field::display(std::backtrace::Backtrace::capture()),
            "A panic occurred"
        );

        prev_hook(panic_info);
    }));
}

/// Installs the filter and stderr layers plus the panic hook.
pub fn init_logging(service_name: &str, custom_filters: &[LogFilter]) -> Result<(), TracingInitError> {
    let layers = vec![
        // The global filter applies to all subsequent layers
        init_global_filter_layer(custom_filters),
        init_stdout_layer(),
    ];
    init_tracing(layers)?;
    init_panic_tracing_hook();
    tracing::debug!(service_name, "Logging initialized");
    Ok(())
}
