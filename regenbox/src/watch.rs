//! Connection watcher.
//!
//! Periodically re-probes an established transport and logs the round-trip
//! time, so a device that stops answering shows up in the log before the
//! battery-cycling layer notices. Runs until the shutdown token is cancelled
//! or the transport is closed.

use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::probe::Probe;
use crate::tracing::prelude::*;
use crate::transport::{Port, Transport};

/// Liveness counters reported when the watcher stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub probes: u64,
    pub failures: u64,
}

/// Probe `transport` every `interval` until `running` is cancelled or the
/// transport closes.
pub async fn watch<P, Pr>(
    transport: Arc<Transport<P>>,
    probe: Pr,
    interval: Duration,
    running: CancellationToken,
) -> WatchStats
where
    P: Port,
    Pr: Probe<P>,
{
    trace!("Watcher started.");
    let closed = transport.closed();
    let mut stats = WatchStats::default();

    loop {
        tokio::select! {
            _ = running.cancelled() => break,
            _ = closed.wait() => break,
            _ = time::sleep(interval) => {}
        }

        stats.probes += 1;
        match probe.probe(&transport).await {
            Ok(elapsed) => {
                debug!(port = %transport.path(), elapsed = ?elapsed, "Regenbox answered");
            }
            Err(e) => {
                stats.failures += 1;
                warn!(port = %transport.path(), error = %e, "Regenbox did not answer");
            }
        }
    }

    trace!(probes = stats.probes, failures = stats.failures, "Watcher stopped.");
    stats
}
