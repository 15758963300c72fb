pub mod init_tracer;

pub use init_tracer::{
    global_filter_directive, init_global_filter_layer, init_logging, init_panic_tracing_hook, init_stdout_layer,
    init_tracing, LogFilter, LogFilterLevel, TracingInitError,
};
