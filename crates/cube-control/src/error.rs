use serial_link::LinkError;
use thiserror::Error;

pub type Result<T, E = SessionError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to open {port}: {source}")]
    PortOpen {
        port: String,
        #[source]
        source: LinkError,
    },
    #[error("a session is already connected to {0}")]
    AlreadyConnected(String),
    #[error("serial port not connected")]
    NotConnected,
    #[error("connection to {0} lost")]
    LostConnection(String),
    #[error("empty command")]
    EmptyCommand,
    #[error("write to {port} failed: {source}")]
    Write {
        port: String,
        #[source]
        source: LinkError,
    },
    #[error("port enumeration failed: {0}")]
    Enumerate(#[source] LinkError),
    #[error("failed to start reader thread: {0}")]
    Spawn(String),
}
