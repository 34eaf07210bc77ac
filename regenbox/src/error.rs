//! Common error types for regenbox.
//!
//! This module provides a centralized Error enum using thiserror,
//! with conversions from the underlying I/O and serial error types.

use std::time::Duration;
use thiserror::Error;

/// Main error type for regenbox operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from tokio or std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port errors (enumeration, open)
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Physical read failed; `partial` holds whatever bytes arrived first
    #[error("read error after {len} bytes: {source}", len = .partial.len())]
    Read {
        partial: Vec<u8>,
        #[source]
        source: std::io::Error,
    },

    /// The transport has been closed
    #[error("serial port is closed")]
    Closed,

    /// No frame arrived within the read timeout
    #[error("read timeout ({0:?})")]
    ReadTimeout(Duration),

    /// The write worker did not accept the frame within the write timeout
    #[error("write timeout ({0:?})")]
    WriteTimeout(Duration),

    /// Every discovery candidate was exhausted
    #[error("didn't find any available serial port")]
    NoDeviceFound,

    /// A connected device did not answer like a regenbox
    #[error("Probe error: {0}")]
    Probe(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True for the read/write timeout kinds, which leave the transport usable.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ReadTimeout(_) | Error::WriteTimeout(_))
    }
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
