//! Logging and observability
//!
//! Structured logging via `tracing-subscriber`, with text or JSON formatting
//! selected at runtime. All log output goes to stderr so that echoed build
//! engine output and step outputs on stdout stay readable.

use anyhow::Result;
use std::{io, sync::Once};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static INIT: Once = Once::new();

/// Environment variable holding the log filter specification
pub const LOG_ENV: &str = "BAKEFLOW_LOG";

/// Environment variable selecting the log format (`text` or `json`)
pub const LOG_FORMAT_ENV: &str = "BAKEFLOW_LOG_FORMAT";

/// Environment variable controlling span lifecycle events
pub const LOG_SPAN_EVENTS_ENV: &str = "BAKEFLOW_LOG_SPAN_EVENTS";

/// Initialize the logging system
///
/// Safe to call more than once; only the first call installs a subscriber.
///
/// ## Environment Variables
///
/// * `BAKEFLOW_LOG_FORMAT` - `json` for JSON output, anything else for text
/// * `BAKEFLOW_LOG` - filter specification
/// * `RUST_LOG` - fallback filter specification
pub fn init(format: Option<&str>) -> Result<()> {
    INIT.call_once(|| {
        let filter = create_env_filter();

        let env_format = std::env::var(LOG_FORMAT_ENV).ok();
        let effective_format = format.or(env_format.as_deref()).unwrap_or("text");
        let span_events = span_events_for_format(effective_format);

        let layer = match effective_format {
            "json" => fmt::layer()
                .json()
                .with_target(true)
                .with_span_events(span_events)
                .with_writer(io::stderr)
                .boxed(),
            _ => fmt::layer()
                .with_target(false)
                .with_span_events(span_events)
                .with_writer(io::stderr)
                .boxed(),
        };
        tracing_subscriber::registry().with(layer).with(filter).init();

        tracing::debug!("Logging initialized with format: {}", effective_format);
    });

    Ok(())
}

fn create_env_filter() -> EnvFilter {
    if let Ok(spec) = std::env::var(LOG_ENV) {
        EnvFilter::try_new(&spec).unwrap_or_else(|_| {
            tracing::warn!(
                "Invalid {} specification '{}', using default 'info'",
                LOG_ENV,
                spec
            );
            EnvFilter::new("info")
        })
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn span_events_for_format(format: &str) -> fmt::format::FmtSpan {
    use fmt::format::FmtSpan;

    if let Ok(raw) = std::env::var(LOG_SPAN_EVENTS_ENV) {
        return parse_span_events(&raw);
    }

    match format {
        "json" => FmtSpan::NEW | FmtSpan::CLOSE,
        _ => FmtSpan::NONE,
    }
}

fn parse_span_events(raw: &str) -> fmt::format::FmtSpan {
    use fmt::format::FmtSpan;

    let mut acc = FmtSpan::NONE;
    for token in raw.split(&[',', '|'][..]).map(|t| t.trim().to_lowercase()) {
        acc |= match token.as_str() {
            "new" => FmtSpan::NEW,
            "close" => FmtSpan::CLOSE,
            "enter" => FmtSpan::ENTER,
            "exit" => FmtSpan::EXIT,
            "active" => FmtSpan::ACTIVE,
            "full" => FmtSpan::FULL,
            _ => FmtSpan::NONE,
        };
    }
    acc
}

/// Check if logging has been initialized
pub fn is_initialized() -> bool {
    INIT.is_completed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::fmt::format::FmtSpan;

    #[test]
    fn test_init_multiple_calls_safe() {
        assert!(init(None).is_ok());
        assert!(init(Some("json")).is_ok());
        assert!(init(Some("invalid")).is_ok());
        assert!(is_initialized());
    }

    #[test]
    fn test_parse_span_events() {
        assert_eq!(parse_span_events("none"), FmtSpan::NONE);
        assert_eq!(parse_span_events("new,close"), FmtSpan::NEW | FmtSpan::CLOSE);
        assert_eq!(parse_span_events("enter | exit"), FmtSpan::ENTER | FmtSpan::EXIT);
        assert_eq!(parse_span_events("bogus"), FmtSpan::NONE);
    }
}
