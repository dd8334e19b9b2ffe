use std::time::Duration;

/// One entry of a port enumeration. `name` is the opaque OS identifier.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PortInfo {
    pub name: String,
    pub kind: String,
}

impl PortInfo {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
        }
    }
}

/// Fixed per-connection settings; nothing is negotiated with the device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LinkSettings {
    pub baud: u32,
    pub read_timeout: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud: 115_200,
            read_timeout: Duration::from_millis(100),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReadOutcome {
    /// A complete line, terminator included, not yet decoded.
    Line(Vec<u8>),
    /// Nothing complete arrived within the read timeout.
    Idle,
    /// The device side closed the link.
    Closed,
}
