//! Serial link settings and the platform backend that opens ports.
//!
//! [`LinkConfig`] is the baud/parity/data/stop-bit tuple fixed when a port is
//! opened. [`SerialBackend`] is the seam between discovery and the platform:
//! [`NativeSerial`] enumerates and opens real ports through `tokio-serial`,
//! tests substitute in-memory pipes.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::error::Result;
use crate::tracing::prelude::*;

/// Byte stream a [`Transport`](super::Transport) can own.
pub trait Port: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Port for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Link settings applied when a serial port is opened.
///
/// The default is the regenbox wiring: 57600 baud, 8 data bits, no parity,
/// 1 stop bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub baud_rate: u32,
    pub parity: Parity,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: 57600,
            parity: Parity::None,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
        }
    }
}

impl std::fmt::Display for LinkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        let data = match self.data_bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        };
        let stop = match self.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        write!(f, "{}-{}-{}-{}", self.baud_rate, data, parity, stop)
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl From<DataBits> for tokio_serial::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => tokio_serial::DataBits::Five,
            DataBits::Six => tokio_serial::DataBits::Six,
            DataBits::Seven => tokio_serial::DataBits::Seven,
            DataBits::Eight => tokio_serial::DataBits::Eight,
        }
    }
}

/// Number of stop bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    Two,
}

impl From<StopBits> for tokio_serial::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        }
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Platform access to serial ports.
pub trait SerialBackend: Send + Sync {
    type Port: Port;

    /// List candidate port names in platform order.
    fn available_ports(&self) -> Result<Vec<String>>;

    /// Open `path` with the given link settings.
    fn open(&self, path: &str, link: &LinkConfig, exclusive: bool) -> Result<Self::Port>;
}

/// Real serial ports via `tokio-serial`. Must be used inside a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeSerial;

impl SerialBackend for NativeSerial {
    type Port = SerialStream;

    fn available_ports(&self) -> Result<Vec<String>> {
        let ports = tokio_serial::available_ports()?;
        Ok(ports.into_iter().map(|info| info.port_name).collect())
    }

    fn open(&self, path: &str, link: &LinkConfig, exclusive: bool) -> Result<SerialStream> {
        debug!(port = %path, link = %link, exclusive, "Opening serial port");

        #[allow(unused_mut)]
        let mut stream = tokio_serial::new(path, link.baud_rate)
            .data_bits(link.data_bits.into())
            .parity(link.parity.into())
            .stop_bits(link.stop_bits.into())
            .open_native_async()?;

        #[cfg(unix)]
        stream.set_exclusive(exclusive)?;
        #[cfg(not(unix))]
        let _ = exclusive;

        Ok(stream)
    }
}

/// Open a port the operator named explicitly, without probing it.
///
/// Uses the default link settings unless `link` overrides them.
pub fn open_port_name<B: SerialBackend>(
    backend: &B,
    name: &str,
    link: Option<LinkConfig>,
) -> Result<(B::Port, LinkConfig)> {
    let link = link.unwrap_or_default();
    let port = backend.open(name, &link, false)?;
    Ok((port, link))
}
