//! Structured logging for the tenantql binary
//!
//! Console output goes to stderr so stdout carries only command results.
//! File output rotates daily under the configured directory.

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Log format configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format for development
    Pretty,
    /// JSON format for production (structured logging)
    Json,
    /// Single-line format
    Compact,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        match value {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Compact,
        }
    }
}

/// Log output configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    File,
    Both,
}

impl LogOutput {
    pub fn parse(value: &str) -> Self {
        match value {
            "file" => LogOutput::File,
            "both" => LogOutput::Both,
            _ => LogOutput::Stdout,
        }
    }
}

fn filter(level: &str) -> EnvFilter {
    let mut filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    // noisy HTTP internals of the OpenAI client
    for directive in ["hyper=warn", "reqwest=warn", "h2=warn"] {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }
    filter
}

fn console_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_writer(std::io::stderr).boxed(),
    }
}

/// Initialize logging from the (already env-overridden) configuration
pub fn init(config: &LoggingConfig) {
    let format = LogFormat::parse(&config.format);
    let output = LogOutput::parse(&config.output);
    let env_filter = filter(&config.level);

    let file_layer = matches!(output, LogOutput::File | LogOutput::Both).then(|| {
        std::fs::create_dir_all(&config.directory).ok();
        let appender = RollingFileAppender::new(Rotation::DAILY, &config.directory, "tenantql.log");
        fmt::layer().with_writer(appender).with_ansi(false).boxed()
    });
    let console = matches!(output, LogOutput::Stdout | LogOutput::Both).then(|| console_layer(format));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file_layer)
        .init();

    tracing::debug!(
        format = ?format,
        output = ?output,
        level = %config.level,
        directory = %config.directory,
        "Logging initialized"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("fancy"), LogFormat::Compact);
    }

    #[test]
    fn test_log_output_parse() {
        assert_eq!(LogOutput::parse("file"), LogOutput::File);
        assert_eq!(LogOutput::parse("both"), LogOutput::Both);
        assert_eq!(LogOutput::parse("stdout"), LogOutput::Stdout);
        assert_eq!(LogOutput::parse(""), LogOutput::Stdout);
    }
}
