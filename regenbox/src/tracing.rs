//! Logging for the regenbox crate and daemon.
//!
//! `regenboxd` calls [`init_journald_or_stdout`] once at startup. Library code
//! only emits events, through `crate::tracing::prelude::*`.
//!
//! Both sinks share one filter: `RUST_LOG` when set, otherwise
//! [`DEFAULT_FILTER`], which keeps dependencies quiet and shows our own
//! events from `info` up. Per-frame traces are at `trace` level, e.g.
//! `RUST_LOG=regenbox::transport=trace`.

use std::env;
use time::OffsetDateTime;
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::{format::Writer, time::FormatTime},
    prelude::*,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

/// Filter directives used when `RUST_LOG` is unset or blank.
pub const DEFAULT_FILTER: &str = "warn,regenbox=info,regenboxd=info";

const SYSLOG_IDENTIFIER: &str = "regenboxd";

/// Install the global subscriber.
///
/// Under systemd (JOURNAL_STREAM set) events go to journald, otherwise to
/// stdout with a local timestamp.
pub fn init_journald_or_stdout() {
    if env::var_os("JOURNAL_STREAM").is_none() {
        use_stdout();
        return;
    }

    match tracing_journald::layer() {
        Ok(layer) => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(layer.with_syslog_identifier(SYSLOG_IDENTIFIER.to_string()))
                .init();
        }
        Err(e) => {
            use_stdout();
            error!(error = %e, "Failed to initialize journald logging, using stdout.");
        }
    }
}

fn use_stdout() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_timer(LocalTimer))
        .init();
}

fn env_filter() -> EnvFilter {
    filter_from(env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())
}

// Unparseable directives in RUST_LOG are skipped rather than fatal.
fn filter_from(directives: Option<&str>) -> EnvFilter {
    match directives.map(str::trim) {
        Some(directives) if !directives.is_empty() => {
            EnvFilter::builder().parse_lossy(directives)
        }
        _ => EnvFilter::new(DEFAULT_FILTER),
    }
}

// Wall-clock time with milliseconds; probe round trips are in that range.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let stamp = now
            .format(time::macros::format_description!(
                "[hour]:[minute]:[second].[subsecond digits:3]"
            ))
            .map_err(|_| std::fmt::Error)?;
        write!(w, "{}", stamp)
    }
}
