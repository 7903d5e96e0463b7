//! Transport layer for ground links.
//!
//! This module handles:
//! - The capability traits every transport implements (`Transport`,
//!   `FrameReader`, `FrameWriter`)
//! - Built-in transports: UDP sockets, simulation-log playback and
//!   hardware-in-the-loop device nodes
//!
//! A transport only knows how to acquire its OS resource and move byte frames.
//! Connection state, statistics and retry policy live in [`crate::link`] and
//! [`crate::manager`].

use async_trait::async_trait;

use crate::error::TransportError;
use crate::link::LinkKind;

#[cfg(unix)]
pub mod hil;
pub mod playback;
pub mod udp;

#[cfg(unix)]
pub use hil::HilTransport;
pub use playback::PlaybackTransport;
pub use udp::UdpTransport;

/// Default upper bound for one inbound frame on stream-like transports.
///
/// Large enough for a MAVLink v2 frame with signature.
pub const DEFAULT_FRAME_SIZE: usize = 280;

/// Inbound half of an open transport.
#[async_trait]
pub trait FrameReader: Send {
    /// Wait for the next frame.
    ///
    /// `Ok(None)` is a clean end of stream (e.g. end of a replayed log).
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

/// Outbound half of an open transport.
#[async_trait]
pub trait FrameWriter: Send {
    /// Write one whole frame. Partial writes are reported as errors.
    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Flush and release the underlying resource.
    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// An acquired transport resource, split into its two directions.
pub struct Connection {
    pub reader: Box<dyn FrameReader>,
    pub writer: Box<dyn FrameWriter>,
}

impl Connection {
    pub fn new(reader: impl FrameReader + 'static, writer: impl FrameWriter + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

/// A configured, not yet opened transport.
///
/// `open` may be called again after the previous connection was dropped;
/// this is how links reconnect.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Kind this transport was built for.
    fn kind(&self) -> LinkKind;

    /// Acquire the resource (bind the socket, open the file or device).
    async fn open(&self) -> Result<Connection, TransportError>;
}
