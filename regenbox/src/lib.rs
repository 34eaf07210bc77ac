//! Serial transport and device discovery for the regenbox battery cycler.
//!
//! The [`transport`] module turns a serial port into a framed,
//! timeout-bounded byte channel that one reader and one writer can use
//! concurrently. [`discovery`] finds which port the regenbox is attached to
//! by probing every candidate. The battery-cycling protocol built on top of
//! the frames lives elsewhere.

pub mod config;
pub mod discovery;
pub mod error;
pub mod probe;
pub mod tracing;
pub mod transport;
pub mod watch;

pub use error::{Error, Result};
