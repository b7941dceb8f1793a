use std::path::Path;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Logs go to stderr so report lines on stdout can be piped. With a log
/// directory, a plain-text copy is written to `<dir>/<filename>.log`.
pub fn init_tracing_subscriber(log_dir: Option<&Path>, filename: &str) {
    let stderr_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_file(false)
        .with_target(false)
        .with_writer(std::io::stderr);

    let file_layer = log_dir.map(|dir| {
        let file_appender =
            RollingFileAppender::new(Rotation::NEVER, dir, format!("{}.log", filename));
        fmt::layer()
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .with_file(false)
            .with_target(false)
            .with_writer(file_appender)
    });

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .expect("Unable to set global subscriber");
}
