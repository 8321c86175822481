use std::env;

use anyhow::{Context, Result};
use tracing::Subscriber;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, Registry};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

use crate::config::{Config, LogFormat, Logging};

fn get_rust_log(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::OFF => "",
        LevelFilter::ERROR => "ERROR",
        LevelFilter::WARN => "WARN",
        LevelFilter::INFO => "INFO",
        LevelFilter::DEBUG => {
            "INFO,\
             agent_cache=DEBUG,\
             agent_cache_types=DEBUG"
        }
        LevelFilter::TRACE => {
            "INFO,\
             agent_cache=TRACE,\
             agent_cache_types=TRACE"
        }
    }
}

/// Builds the formatting layer for the given logging config.
///
/// `rust_log` holds the filter directives, and `user_attended` picks the format for
/// [`LogFormat::Auto`].
pub fn fmt_layer<S, W>(
    config: &Logging,
    rust_log: &str,
    user_attended: bool,
    writer: W,
) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_timer(UtcTime::rfc_3339())
        .with_target(true);

    let layer = match (config.format, user_attended) {
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => layer.pretty().boxed(),
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => {
            layer.compact().with_ansi(false).boxed()
        }
        (LogFormat::Json, _) => layer
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
    };

    layer.with_filter(EnvFilter::new(rust_log)).boxed()
}

/// Initializes logging for the agent cache, writing to `stdout`.
///
/// This considers the `RUST_LOG` environment variable and defaults it to the level specified in the
/// configuration. Additionally, this toggles `RUST_BACKTRACE` based on the
/// [`enable_backtraces`](crate::config::Logging::enable_backtraces)
/// config value.
///
/// Fails if a global logger was already installed.
///
/// # Safety
/// This function uses [`std::env::set_var`] to modify the environment. That function is only safe
/// to call in single-threaded contexts to prevent unsynchronized concurrent access to the environment.
pub unsafe fn init_logging(config: &Config) -> Result<()> {
    if config.logging.enable_backtraces {
        // SAFETY: As documented, this function may only be called in a single-threaded context.
        unsafe { env::set_var("RUST_BACKTRACE", "1") };
    }

    let rust_log =
        env::var("RUST_LOG").unwrap_or_else(|_| get_rust_log(config.logging.level).to_string());
    let layer = fmt_layer::<Registry, _>(
        &config.logging,
        &rust_log,
        console::user_attended(),
        std::io::stdout,
    );

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .context("failed to install the logger")
}

/// Logs an error to the configured logger or `stderr` if not yet configured.
pub fn ensure_log_error(error: &anyhow::Error) {
    if tracing::Level::ERROR <= tracing::level_filters::STATIC_MAX_LEVEL
        && tracing::Level::ERROR <= LevelFilter::current()
    {
        tracing::error!("{:?}", error);
    } else {
        eprintln!("{error:?}");
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    /// Collects everything the logger writes.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(format: LogFormat, level: LevelFilter, f: impl FnOnce()) -> String {
        let logging = Logging {
            level,
            format,
            enable_backtraces: false,
        };
        let captured = Captured::default();
        let writer = captured.clone();
        let layer = fmt_layer::<Registry, _>(&logging, get_rust_log(level), false, move || {
            writer.clone()
        });

        tracing::subscriber::with_default(tracing_subscriber::registry().with(layer), f);
        captured.contents()
    }

    #[test]
    fn test_rust_log_defaults() {
        assert_eq!(get_rust_log(LevelFilter::OFF), "");
        assert_eq!(get_rust_log(LevelFilter::WARN), "WARN");
        assert_eq!(
            get_rust_log(LevelFilter::DEBUG),
            "INFO,agent_cache=DEBUG,agent_cache_types=DEBUG"
        );
        // every default must be a valid filter directive
        for level in [LevelFilter::ERROR, LevelFilter::INFO, LevelFilter::TRACE] {
            assert!(EnvFilter::try_new(get_rust_log(level)).is_ok());
        }
    }

    #[test]
    fn test_json_lines() {
        let output = capture(LogFormat::Json, LevelFilter::INFO, || {
            tracing::info!(key = "dc1/foo", "Fetched cache entry");
            tracing::debug!("Fetching cache entry");
        });

        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 1);
        let line: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(line["message"], "Fetched cache entry");
        assert_eq!(line["key"], "dc1/foo");
        assert_eq!(line["level"], "INFO");
        assert!(line["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_auto_without_terminal() {
        let output = capture(LogFormat::Auto, LevelFilter::DEBUG, || {
            tracing::debug!("Fetching cache entry");
        });

        assert!(output.contains("Fetching cache entry"));
        assert!(output.contains("agent_cache::logging::tests"));
        assert!(!output.contains('\u{1b}'));
    }

    #[test]
    fn test_ensure_log_error() {
        let output = capture(LogFormat::Simplified, LevelFilter::WARN, || {
            ensure_log_error(&anyhow::anyhow!("config file is broken"));
        });

        assert!(output.contains("ERROR"));
        assert!(output.contains("config file is broken"));
    }
}
