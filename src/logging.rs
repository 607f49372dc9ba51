//! Logging initialization.
//!
//! Sets up the `tracing` subscriber. Log lines go to stderr through a
//! non-blocking writer so warnings never interleave with command output on
//! stdout.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging.
///
/// `verbose` lowers the default level to debug; `RUST_LOG` overrides both.
/// When a telemetry tracer is provided, spans are also exported through it.
///
/// Returns a `WorkerGuard` that MUST be held for the duration of the program
/// (e.g. assigned to a variable in `main`). If dropped, log flushing may not
/// complete.
pub fn init(verbose: bool, tracer: Option<opentelemetry_sdk::trace::Tracer>) -> WorkerGuard {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_target(false) // cleaner output for a CLI
                .with_ansi(false),
        )
        .with(tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t)))
        .init();

    guard
}
