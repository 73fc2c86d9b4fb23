//! Logging setup
//!
//! `RUST_LOG` wins when set; otherwise the crate logs at the configured level
//! and dependencies at `info`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter directive for a crate log level
pub fn default_directive(level: &str) -> String {
    format!("switchboard={},info", level)
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_parses() {
        let directive = default_directive("debug");
        assert_eq!(directive, "switchboard=debug,info");
        assert!(EnvFilter::try_new(directive).is_ok());
    }
}
