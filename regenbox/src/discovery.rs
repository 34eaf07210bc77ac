//! Find the serial port the regenbox is plugged into.
//!
//! Candidates are tried in the order the platform lists them. Each one is
//! opened, wrapped in a [`Transport`] with short probing timeouts so a wrong
//! device fails fast, and handed to a [`Probe`]. The first candidate that
//! answers wins and gets production timeouts back; the others are closed.

use crate::config::{DiscoverySettings, TransportSettings};
use crate::error::{Error, Result};
use crate::probe::Probe;
use crate::tracing::prelude::*;
use crate::transport::{LinkConfig, SerialBackend, Transport};

/// Probing search over a backend's serial ports.
pub struct Discovery<B, Pr> {
    backend: B,
    probe: Pr,
    settings: DiscoverySettings,
    transport: TransportSettings,
}

impl<B, Pr> Discovery<B, Pr>
where
    B: SerialBackend,
    Pr: Probe<B::Port>,
{
    pub fn new(backend: B, probe: Pr) -> Self {
        Self {
            backend,
            probe,
            settings: DiscoverySettings::default(),
            transport: TransportSettings::default(),
        }
    }

    /// Replace the discovery and production transport settings.
    pub fn with_settings(
        mut self,
        settings: DiscoverySettings,
        transport: TransportSettings,
    ) -> Self {
        self.settings = settings;
        self.transport = transport;
        self
    }

    /// Return a started transport to the first candidate that passes the probe.
    ///
    /// `link` defaults to 57600-8-N-1. Enumeration failures are returned as
    /// is. A candidate that fails to open or to answer is skipped. When every
    /// candidate is exhausted the error from the last open attempt is
    /// returned, or [`Error::NoDeviceFound`] if that attempt succeeded or
    /// there were no candidates at all.
    pub async fn find_transport(&self, link: Option<LinkConfig>) -> Result<Transport<B::Port>> {
        let candidates = self.backend.available_ports()?;
        let link = link.unwrap_or_default();
        debug!(candidates = ?candidates, link = %link, "Searching for regenbox");

        let mut last_error: Option<Error> = None;
        for path in candidates {
            let port = match self.backend.open(&path, &link, self.settings.exclusive) {
                Ok(port) => {
                    last_error = None;
                    port
                }
                Err(e) => {
                    debug!(port = %path, error = %e, "Failed to open candidate");
                    last_error = Some(e);
                    continue;
                }
            };

            info!(port = %path, "Trying serial port");
            let transport = Transport::with_settings(
                port,
                link,
                path.as_str(),
                self.settings.exclusive,
                &self.transport,
            );
            transport.set_read_timeout(self.settings.probe_timeout);
            transport.set_write_timeout(self.settings.probe_timeout);
            transport.start();

            match self.probe.probe(&transport).await {
                Ok(elapsed) => {
                    transport.set_read_timeout(self.transport.read_timeout);
                    transport.set_write_timeout(self.transport.write_timeout);
                    info!(port = %path, elapsed = ?elapsed, "Connected to regenbox");
                    return Ok(transport);
                }
                Err(e) => {
                    info!(port = %path, error = %e, "Error connecting");
                    if let Err(e) = transport.close().await {
                        warn!(port = %path, error = %e, "Failed to close candidate");
                    }
                }
            }
        }

        Err(last_error.unwrap_or(Error::NoDeviceFound))
    }
}
