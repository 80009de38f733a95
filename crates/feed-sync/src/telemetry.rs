use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

pub const DEFAULT_FILTER: &str = "info,feed_sync=debug";

/// Installs the global fmt subscriber. `RUST_LOG` wins over `default_filter`;
/// calling this twice keeps the first subscriber.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    if let Err(err) = fmt().with_env_filter(filter).with_target(true).try_init() {
        debug!(error = %err, "tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_harmless() {
        init_tracing(DEFAULT_FILTER);
        init_tracing("warn");
    }
}
