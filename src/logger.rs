//! Logging setup for applications and test harnesses using apex-numdiff
//!
//! The library itself only emits `tracing` events: linearization and Jacobian-check
//! progress at DEBUG/TRACE, suspicious inputs at WARN, and errors through the
//! `log()` helpers of the error types.

use tracing::Level;

/// Initialize the tracing subscriber with the standard configuration
///
/// Default log level: INFO (overrideable via RUST_LOG environment variable)
///
/// Format: `[LEVEL YYYY-MM-DD HH:MM:SS module]` for INFO/WARN/ERROR
///         `[LEVEL YYYY-MM-DD HH:MM:SS file:line]` for DEBUG/TRACE
///
/// # Example
/// ```no_run
/// use apex_numdiff::init_logger;
///
/// init_logger();
/// tracing::info!("Jacobian checks starting");
/// ```
///
/// # Environment Variables
/// ```bash
/// RUST_LOG=apex_numdiff=debug cargo test --test factor_jacobians
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Initialize the tracing subscriber with a custom default level
///
/// Does nothing if a global subscriber is already installed, so it can be called
/// from every test.
///
/// # Example
/// ```no_run
/// use apex_numdiff::init_logger_with_level;
/// use tracing::Level;
///
/// init_logger_with_level(Level::DEBUG);
/// tracing::debug!("Debug logging enabled");
/// ```
pub fn init_logger_with_level(default_level: Level) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_target(false)
        .with_level(false)
        .with_file(false)
        .with_line_number(false)
        .event_format(CustomFormatter)
        .try_init();
}

/// Bracketed `[LEVEL timestamp location] message` formatter
struct CustomFormatter;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for CustomFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        use chrono::Local;

        let metadata = event.metadata();
        let level = metadata.level();

        let label = match *level {
            Level::ERROR => "\x1b[31mERROR\x1b[0m",
            Level::WARN => "\x1b[33mWARN\x1b[0m",
            Level::INFO => "\x1b[32mINFO\x1b[0m",
            Level::DEBUG => "\x1b[34mDEBUG\x1b[0m",
            Level::TRACE => "\x1b[35mTRACE\x1b[0m",
        };
        write!(
            writer,
            "[{label} {} ",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;

        // File and line for DEBUG/TRACE, module otherwise.
        match (*level >= Level::DEBUG, metadata.file()) {
            (true, Some(file)) => {
                let filename = file.rsplit('/').next().unwrap_or(file);
                write!(writer, "{filename}")?;
                if let Some(line) = metadata.line() {
                    write!(writer, ":{line}")?;
                }
            }
            _ => write!(writer, "{}", metadata.target())?,
        }
        write!(writer, "] ")?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_initialization_is_harmless() {
        init_logger_with_level(Level::WARN);
        init_logger();
        tracing::warn!("logger initialized twice");
    }
}
