//! Diagnostic output on stderr and syslog.
//!
//! Stderr follows `RUST_LOG` when set. Otherwise the `-d` count picks the
//! level: none shows warnings and errors, one adds debug messages, two or
//! more add the per-poll trace.
//!
//! Warnings and errors (stale locks cleared, lost records amended, timeouts,
//! fatal lock-file errors) also go to syslog under the `buslock` identity
//! whatever `-d` says, since the tool mostly runs unattended.

use syslog_tracing::Syslog;
use tracing::Subscriber;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Level directive for a given number of `-d` flags.
pub fn level_for(debug: u8) -> &'static str {
    match debug {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    }
}

/// Build the subscriber: a stderr layer and, when `alerts` is given, a
/// `WARN`-and-above layer writing to it.
pub fn subscriber<W>(debug: u8, alerts: Option<W>) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_for(debug)));

    let stderr = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter);

    let alerts = alerts.map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .without_time()
            .with_target(false)
            .with_filter(LevelFilter::WARN)
    });

    tracing_subscriber::registry().with(stderr).with(alerts)
}

/// Install the global subscriber.
///
/// Falls back to stderr only when syslog is unavailable. Safe to call more
/// than once; later calls keep the first subscriber.
pub fn init(debug: u8) {
    let (options, facility) = Default::default();
    let syslog = Syslog::new(c"buslock", options, facility);

    let _ = subscriber(debug, syslog).try_init();
}
