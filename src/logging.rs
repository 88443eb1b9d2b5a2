use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "NFSMAP_LOG";

/// Filter directive for a `-v` count when no environment override is set.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "nfsmap=info",
        1 => "nfsmap=debug",
        _ => "nfsmap=trace",
    }
}

/// Pick the filter: `-v` flags win, then `NFSMAP_LOG`, then `RUST_LOG`.
fn filter_directives(verbosity: u8) -> String {
    if verbosity == 0 {
        for var in [LOG_ENV, "RUST_LOG"] {
            if let Ok(value) = std::env::var(var) {
                if !value.trim().is_empty() {
                    return value;
                }
            }
        }
    }
    default_directive(verbosity).to_string()
}

/// Install the global subscriber. Events go to stderr without timestamps;
/// targets are shown from `-vvv` up.
pub fn configure_logging(verbosity: u8) {
    let filter = EnvFilter::try_new(filter_directives(verbosity))
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(verbosity >= 3);
    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);
    if let Err(e) = tracing::subscriber::set_global_default(registry) {
        eprintln!("Warning: logging already configured: {e}");
    }
}
