//! Logging setup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Level used when neither `RUST_LOG` nor `MURMUR_LOG_LEVEL` is set
pub const DEFAULT_LOG_LEVEL: &str = "info";

fn filter_directive(rust_log: Option<String>, murmur_level: Option<String>) -> String {
    rust_log
        .or(murmur_level)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
}

/// Initialize the global tracing subscriber
///
/// `RUST_LOG` wins when set; otherwise `MURMUR_LOG_LEVEL` (default `info`).
/// Output goes to stderr. Calling this more than once is harmless.
pub fn init_logging() {
    let directive = filter_directive(
        std::env::var("RUST_LOG").ok(),
        std::env::var("MURMUR_LOG_LEVEL").ok(),
    );
    let env_filter = tracing_subscriber::EnvFilter::try_new(&directive)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_LEVEL));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive_precedence() {
        assert_eq!(
            filter_directive(Some("murmur=debug".into()), Some("warn".into())),
            "murmur=debug"
        );
        assert_eq!(filter_directive(None, Some(" warn ".into())), "warn");
        assert_eq!(filter_directive(None, None), DEFAULT_LOG_LEVEL);
        assert_eq!(filter_directive(Some("  ".into()), None), DEFAULT_LOG_LEVEL);
    }

    #[test]
    fn test_init_logging_twice() {
        init_logging();
        init_logging();
        tracing::debug!("still alive");
    }
}
