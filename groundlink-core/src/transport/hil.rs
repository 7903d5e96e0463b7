//! Hardware-in-the-loop transport over a device node.
//!
//! The node is anything that behaves like a pollable byte stream: a serial
//! port, a character device exposed by the HIL rig, or a FIFO. It is opened
//! non-blocking and driven by the reactor, so a read waiting on an idle device
//! never holds up writes or teardown. Serial nodes keep the line settings they
//! already have. Each read returns whatever the device delivered, up to
//! `frame_size` bytes. Unlike playback, end-of-file here means the device went
//! away.
//!
//! Regular files cannot be polled and are rejected on connect; replay them
//! with a playback link instead.

use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

use crate::config::LinkConfig;
use crate::error::{LinkError, TransportError};
use crate::link::LinkKind;
use crate::transport::{Connection, FrameReader, FrameWriter, Transport, DEFAULT_FRAME_SIZE};

#[derive(Debug, Clone)]
pub struct HilTransport {
    device: PathBuf,
    frame_size: usize,
}

impl HilTransport {
    pub fn new(device: impl Into<PathBuf>, frame_size: usize) -> Self {
        Self {
            device: device.into(),
            frame_size,
        }
    }

    /// Validate a HIL link config and build the transport.
    pub fn from_config(cfg: &LinkConfig) -> Result<Self, LinkError> {
        let device = cfg
            .path
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| LinkError::invalid("hil link requires a device path"))?;

        let frame_size = cfg.frame_size.unwrap_or(DEFAULT_FRAME_SIZE);
        if frame_size == 0 {
            return Err(LinkError::invalid("frame_size must be greater than zero"));
        }

        Ok(Self::new(device.clone(), frame_size))
    }
}

#[async_trait]
impl Transport for HilTransport {
    fn kind(&self) -> LinkKind {
        LinkKind::Hil
    }

    async fn open(&self) -> Result<Connection, TransportError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_NOCTTY)
            .open(&self.device)?;
        let conn = device_connection(file, self.device.display().to_string(), self.frame_size)?;
        tracing::info!("Opened HIL device {}", self.device.display());
        Ok(conn)
    }
}

/// Register a non-blocking device fd with the reactor and split it.
///
/// Both halves share the registration; the fd closes when both are dropped.
fn device_connection(file: File, name: String, frame_size: usize) -> Result<Connection, TransportError> {
    let device = Arc::new(AsyncFd::new(file)?);
    let reader = HilReader {
        device: Arc::clone(&device),
        buf: vec![0u8; frame_size],
        name,
    };
    let writer = HilWriter { device };
    Ok(Connection::new(reader, writer))
}

struct HilReader {
    device: Arc<AsyncFd<File>>,
    buf: Vec<u8>,
    name: String,
}

#[async_trait]
impl FrameReader for HilReader {
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let Self { device, buf, name } = self;
        let n = device
            .async_io(Interest::READABLE, |mut file| file.read(&mut buf[..]))
            .await?;
        if n == 0 {
            return Err(TransportError::Closed(name.clone()));
        }
        Ok(Some(buf[..n].to_vec()))
    }
}

struct HilWriter {
    device: Arc<AsyncFd<File>>,
}

#[async_trait]
impl FrameWriter for HilWriter {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let mut written = 0;
        while written < frame.len() {
            let n = self
                .device
                .async_io(Interest::WRITABLE, |mut file| file.write(&frame[written..]))
                .await?;
            if n == 0 {
                return Err(TransportError::ShortWrite {
                    written,
                    expected: frame.len(),
                });
            }
            written += n;
        }
        Ok(())
    }
}
