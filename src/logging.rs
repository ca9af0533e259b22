//! Tracing setup

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Initialize the global subscriber. Returns the appender guard when
/// logging to files; dropping it flushes buffered output, so callers
/// keep it alive for the process lifetime.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (writer, guard): (BoxMakeWriter, Option<WorkerGuard>) = match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "fhir-server.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stdout), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true);

    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }

    guard
}
