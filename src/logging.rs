//! Process-wide tracing setup.

use tracing_subscriber::EnvFilter;

/// Install the stderr subscriber. `FLEXMAP_LOG` (or the conventional
/// `RUST_LOG`) overrides the default filter. Safe to call more than
/// once; later calls are no-ops.
pub fn init(verbose: bool) {
    let default_filter = if verbose { "flexmap=debug" } else { "flexmap=info" };
    let filter = EnvFilter::try_from_env("FLEXMAP_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
