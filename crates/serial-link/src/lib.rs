//! serial-link: line-oriented serial link abstractions
//!
//! This crate provides traits and types for enumerating serial ports and opening a
//! text link split into an owned read half and an owned write half, with feature-gated
//! backends. The default build enables a `mock` backend so that binaries and tests run
//! on any host without hardware attached.

mod types;
pub use types::{LinkSettings, PortInfo, ReadOutcome};

mod error;
pub use error::{LinkError, Result};

mod line;
pub use line::{LineBuffer, MAX_LINE_LEN};

mod traits;
pub use traits::{LinkPair, LinkReader, LinkWriter, SerialBackend};

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockBackend, MockStats};

#[cfg(feature = "serial")]
mod serial;

#[cfg(feature = "serial")]
pub use serial::SystemSerial;
