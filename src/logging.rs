//! Process-wide tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber on stderr.
///
/// `RUST_LOG` wins over `level` when set. Calling this more than once is
/// harmless; later calls keep the first subscriber.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
