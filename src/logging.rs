//! Subscriber setup for the `stacksmith` binary.

use tracing_subscriber::EnvFilter;

/// Default directive when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "stacksmith=info";
/// Directive used when debug output is requested.
pub const DEBUG_DIRECTIVE: &str = "stacksmith=debug";

/// Builds the filter: `--debug` wins, then `RUST_LOG`, then the default.
#[must_use]
pub fn filter(debug: bool) -> EnvFilter {
    if debug {
        return EnvFilter::new(DEBUG_DIRECTIVE);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Installs a formatting subscriber writing to stderr. Installing twice is
/// harmless; the first subscriber stays in place.
pub fn init_logging(debug: bool) {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter(debug))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_overrides_environment() {
        assert_eq!(filter(true).to_string(), DEBUG_DIRECTIVE);
    }

    #[test]
    fn repeated_initialisation_is_tolerated() {
        init_logging(false);
        init_logging(true);
    }
}
