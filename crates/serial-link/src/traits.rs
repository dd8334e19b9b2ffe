use crate::{LinkSettings, PortInfo, ReadOutcome, Result};

/// Read half of an open link. Owned by exactly one reader thread.
pub trait LinkReader: Send {
    /// Wait at most the configured read timeout for one complete line.
    ///
    /// Returns the raw line including its terminator, `Idle` when nothing complete
    /// arrived in time, or `Closed` once the device side has gone away.
    fn read_line(&mut self) -> Result<ReadOutcome>;
}

/// Write half of an open link. Dropping it releases the writer's side of the handle.
pub trait LinkWriter: Send {
    fn write_line(&mut self, line: &[u8]) -> Result<()>;
}

/// Both halves of a freshly opened link.
pub struct LinkPair {
    pub reader: Box<dyn LinkReader>,
    pub writer: Box<dyn LinkWriter>,
}

/// A source of serial ports.
pub trait SerialBackend {
    /// Enumerate the ports currently visible, in enumeration order.
    fn list(&self) -> Result<Vec<PortInfo>>;

    /// Open a port by name (e.g., "/dev/ttyUSB0", "COM3").
    fn open(&self, port: &str, settings: &LinkSettings) -> Result<LinkPair>;
}
