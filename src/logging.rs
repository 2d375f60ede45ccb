//! Diagnostic tracing setup.
//!
//! - **Tracing (this module)**: engine diagnostics filtered by `RUST_LOG`,
//!   compact on stderr, optionally mirrored as JSON into a daily file.
//! - **Event log (`events::sink`)**: the `AgentEvent` stream itself, written
//!   independently of `RUST_LOG`.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE_PREFIX: &str = "retrai.log";

fn default_directive(verbose: bool) -> &'static str {
    if verbose { "retrai=debug" } else { "retrai=info" }
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the file writer.
///
/// ```bash
/// RUST_LOG=retrai=trace retrai run pytest
/// ```
pub fn init(verbose: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().json().with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(file_layer)
        .try_init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(false), "retrai=info");
        assert_eq!(default_directive(true), "retrai=debug");
    }

    #[test]
    fn test_init_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let guard = init(false, Some(dir.path()));
        assert!(guard.is_some());
        assert!(init(true, None).is_none());
    }
}
