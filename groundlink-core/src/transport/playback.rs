//! Simulation-log playback transport.
//!
//! Replays a recorded telemetry log as fixed-size frames at a steady pace.
//! Reaching the end of the log is the normal end of the stream. Outbound
//! frames are accepted and dropped, the recorded vehicle does not answer.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::time::{Interval, MissedTickBehavior};

use crate::config::LinkConfig;
use crate::error::{LinkError, TransportError};
use crate::link::LinkKind;
use crate::transport::{Connection, FrameReader, FrameWriter, Transport, DEFAULT_FRAME_SIZE};

/// Default delay between replayed frames
pub const DEFAULT_PLAYBACK_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct PlaybackTransport {
    path: PathBuf,
    frame_size: usize,
    interval: Duration,
}

impl PlaybackTransport {
    pub fn new(path: impl Into<PathBuf>, frame_size: usize, interval: Duration) -> Self {
        Self {
            path: path.into(),
            frame_size,
            interval,
        }
    }

    /// Validate a playback link config and build the transport.
    ///
    /// The file itself is only opened on connect.
    pub fn from_config(cfg: &LinkConfig) -> Result<Self, LinkError> {
        let path = cfg
            .path
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| LinkError::invalid("playback link requires a log file path"))?;

        let frame_size = cfg.frame_size.unwrap_or(DEFAULT_FRAME_SIZE);
        if frame_size == 0 {
            return Err(LinkError::invalid("frame_size must be greater than zero"));
        }

        let interval = cfg.interval.unwrap_or(DEFAULT_PLAYBACK_INTERVAL);
        Ok(Self::new(path.clone(), frame_size, interval))
    }
}

#[async_trait]
impl Transport for PlaybackTransport {
    fn kind(&self) -> LinkKind {
        LinkKind::Playback
    }

    async fn open(&self) -> Result<Connection, TransportError> {
        let file = File::open(&self.path).await?;
        tracing::debug!("Opened playback log {}", self.path.display());

        let mut pace = tokio::time::interval(self.interval.max(Duration::from_micros(1)));
        pace.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reader = PlaybackReader {
            file: BufReader::new(file),
            frame_size: self.frame_size,
            pace,
        };
        Ok(Connection::new(reader, PlaybackWriter))
    }
}

struct PlaybackReader {
    file: BufReader<File>,
    frame_size: usize,
    pace: Interval,
}

#[async_trait]
impl FrameReader for PlaybackReader {
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        self.pace.tick().await;

        let mut buf = vec![0u8; self.frame_size];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(buf))
    }
}

struct PlaybackWriter;

#[async_trait]
impl FrameWriter for PlaybackWriter {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        tracing::trace!("Playback link dropped {} outbound bytes", frame.len());
        Ok(())
    }
}
