//! Connection probes: does the device behind a transport answer?
//!
//! Discovery and the connection watcher treat a probe as a black box that
//! either reports how long the device took to answer or fails. The time budget
//! is enforced by the transport's own read/write timeouts, not by the probe.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::transport::{Port, Transport};

/// Check that the device on the other end speaks the expected protocol.
#[async_trait]
pub trait Probe<P: Port>: Send + Sync {
    /// Round-trip time on success.
    async fn probe(&self, transport: &Transport<P>) -> Result<Duration>;
}

/// Sends one request frame and waits for one reply frame.
///
/// Any non-empty reply is accepted unless an exact reply is required with
/// [`FrameProbe::expecting`].
#[derive(Debug, Clone)]
pub struct FrameProbe {
    request: Vec<u8>,
    expected: Option<Vec<u8>>,
}

impl FrameProbe {
    /// `request` is the frame payload; the transport's terminator is appended.
    pub fn new(request: impl Into<Vec<u8>>) -> Self {
        Self {
            request: request.into(),
            expected: None,
        }
    }

    /// Only accept a reply equal to `reply` (terminator excluded).
    pub fn expecting(mut self, reply: impl Into<Vec<u8>>) -> Self {
        self.expected = Some(reply.into());
        self
    }
}

#[async_trait]
impl<P: Port> Probe<P> for FrameProbe {
    async fn probe(&self, transport: &Transport<P>) -> Result<Duration> {
        let started = Instant::now();

        let mut frame = Vec::with_capacity(self.request.len() + 1);
        frame.extend_from_slice(&self.request);
        frame.push(transport.terminator());
        transport.write(&frame).await?;

        let reply = transport.read().await?;
        if reply.is_empty() {
            return Err(Error::Probe(format!("empty reply from {}", transport.path())));
        }
        if let Some(expected) = &self.expected {
            if &reply != expected {
                return Err(Error::Probe(format!(
                    "unexpected reply from {}: {:02X?}",
                    transport.path(),
                    reply
                )));
            }
        }

        Ok(started.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LinkConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    const STOP: u8 = crate::config::DEFAULT_TERMINATOR;

    fn started() -> (Transport<DuplexStream>, DuplexStream) {
        let (near, far) = tokio::io::duplex(64);
        let transport = Transport::new(near, LinkConfig::default(), "/dev/ttyPROBE", false);
        transport.set_read_timeout(Duration::from_millis(50));
        transport.set_write_timeout(Duration::from_millis(50));
        transport.start();
        (transport, far)
    }

    // Fake device: reads one request frame and answers with `reply`.
    fn answer(mut far: DuplexStream, reply: &'static [u8]) -> tokio::task::JoinHandle<Vec<u8>> {
        tokio::spawn(async move {
            let mut request = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                far.read_exact(&mut byte).await.unwrap();
                request.push(byte[0]);
                if byte[0] == STOP {
                    break;
                }
            }
            far.write_all(reply).await.unwrap();
            // Keep the pipe open until the reply has been consumed.
            let _ = far.read(&mut byte).await;
            request
        })
    }

    #[tokio::test]
    async fn accepts_any_reply() {
        let (transport, far) = started();
        let device = answer(far, b"\x01\x02\xFF");

        let probe = FrameProbe::new([0x00]);
        probe.probe(&transport).await.unwrap();

        transport.close().await.unwrap();
        assert_eq!(device.await.unwrap(), [0x00, STOP]);
    }

    #[tokio::test]
    async fn requires_expected_reply() {
        let (transport, far) = started();
        let _device = answer(far, b"\x01\xFF");

        let probe = FrameProbe::new([0x00]).expecting([0x02]);
        assert!(matches!(probe.probe(&transport).await, Err(Error::Probe(_))));
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn rejects_empty_reply() {
        let (transport, far) = started();
        let _device = answer(far, b"\xFF");

        let probe = FrameProbe::new([0x00]);
        assert!(matches!(probe.probe(&transport).await, Err(Error::Probe(_))));
        transport.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_times_out() {
        let (transport, _far) = started();

        let probe = FrameProbe::new([0x00]);
        assert!(matches!(
            probe.probe(&transport).await,
            Err(Error::ReadTimeout(_))
        ));
        transport.close().await.unwrap();
    }
}
