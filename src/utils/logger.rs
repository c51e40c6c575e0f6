// Logger initialization for the command-line front end

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_FILTER: &str = "s3_resolver=info";

/// Installs the global tracing subscriber. `verbose` lowers the default filter
/// to `debug`; `RUST_LOG` always wins when set.
pub fn init_logger(verbose: bool) {
    let default_filter = if verbose {
        "s3_resolver=debug"
    } else {
        DEFAULT_FILTER
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
