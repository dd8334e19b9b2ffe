use thiserror::Error;

pub type Result<T, E = LinkError> = core::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("port not found: {0}")]
    PortNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("port busy: {0}")]
    PortBusy(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("link closed")]
    Closed,
}
