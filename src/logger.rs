use tracing_subscriber::{EnvFilter, fmt};

/// Initialise logging to stderr.
///
/// The level comes from `RUST_LOG` and defaults to `warn`, which keeps the
/// status line and reports on stdout free of log noise:
/// - RUST_LOG=debug exptest run
/// - RUST_LOG=exptest::executor=trace exptest run
pub fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
