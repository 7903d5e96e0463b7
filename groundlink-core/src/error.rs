//! Error types shared by links, transports and the link manager.

use std::io;

use crate::link::LinkId;

/// Failures raised by a transport while acquiring or using its OS resource.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Device closed: {0}")]
    Closed(String),

    #[error("No remote peer known for outbound frame")]
    NoPeer,

    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
}

/// Errors returned by link and manager operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Invalid link configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown link: {0}")]
    UnknownLink(LinkId),

    #[error("Link {0} is not connected")]
    NotConnected(LinkId),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Link manager is shutting down")]
    ManagerShuttingDown,

    #[error("Link manager is not initialized")]
    NotInitialized,
}

impl LinkError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
