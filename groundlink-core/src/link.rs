//! Links: one managed communication channel to a vehicle.
//!
//! A [`Link`] wraps a [`Transport`] with the connection state machine
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected
//!                     |
//!                     +-> Disconnected   (open failed)
//! ```
//!
//! and per-link statistics. Connect and disconnect are serialized per link;
//! the data path (`send`, and the [`FrameStream`] returned by `read`) uses
//! separate locks so reads and writes never wait on lifecycle bookkeeping of
//! other links.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch, Notify};

use crate::config::LinkConfig;
use crate::error::{LinkError, TransportError};
use crate::transport::{FrameReader, FrameWriter, Transport};

/// Registry-assigned link identifier. Never reused within one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId(pub(crate) u64);

impl LinkId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Transport kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// UDP socket
    Udp,
    /// Simulation-log playback
    Playback,
    /// Hardware-in-the-loop real-time device
    Hil,
    /// Transport provided by a registered plugin factory
    Plugin(String),
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkKind::Udp => f.write_str("udp"),
            LinkKind::Playback => f.write_str("playback"),
            LinkKind::Hil => f.write_str("hil"),
            LinkKind::Plugin(name) => write!(f, "plugin:{name}"),
        }
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Notifications about links, delivered to every event subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Added { id: LinkId },
    Removed { id: LinkId },
    StateChanged {
        id: LinkId,
        old: LinkState,
        new: LinkState,
    },
    TransportFailed { id: LinkId, error: String },
    /// The link did not release within the shutdown timeout.
    Abandoned { id: LinkId },
}

/// Traffic counters for a link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub frames_received: u64,
    pub bytes_received: u64,
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    frames_received: AtomicU64,
    bytes_received: AtomicU64,
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> LinkStats {
        LinkStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Read-only view of a link for diagnostics and UIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSummary {
    pub id: LinkId,
    pub name: String,
    pub kind: LinkKind,
    pub state: LinkState,
    pub auto_reconnect: bool,
    pub stats: LinkStats,
}

type ReaderSlot = Option<(u64, Box<dyn FrameReader>)>;

/// One communication channel, owned by the link manager.
pub struct Link {
    id: LinkId,
    config: LinkConfig,
    transport: Box<dyn Transport>,
    state: watch::Sender<LinkState>,
    /// Serializes connect/disconnect.
    lifecycle: tokio::sync::Mutex<()>,
    writer: tokio::sync::Mutex<Option<Box<dyn FrameWriter>>>,
    /// Wakes sends parked on the writer when the connection is torn down.
    closing: Notify,
    /// Reader of the current connection, until a read stream claims it.
    reader: Mutex<ReaderSlot>,
    /// Bumped on every successful connect.
    epoch: AtomicU64,
    counters: Counters,
    events: broadcast::Sender<LinkEvent>,
}

impl Link {
    pub(crate) fn new(
        id: LinkId,
        config: LinkConfig,
        transport: Box<dyn Transport>,
        events: broadcast::Sender<LinkEvent>,
    ) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            id,
            config,
            transport,
            state,
            lifecycle: tokio::sync::Mutex::new(()),
            writer: tokio::sync::Mutex::new(None),
            closing: Notify::new(),
            reader: Mutex::new(None),
            epoch: AtomicU64::new(0),
            counters: Counters::default(),
            events,
        }
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn kind(&self) -> LinkKind {
        self.transport.kind()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Current connection state
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Watch the connection state.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> LinkStats {
        self.counters.snapshot()
    }

    pub fn summary(&self) -> LinkSummary {
        LinkSummary {
            id: self.id,
            name: self.config.name.clone(),
            kind: self.kind(),
            state: self.state(),
            auto_reconnect: self.config.auto_reconnect,
            stats: self.stats(),
        }
    }

    /// Acquire the transport resource.
    ///
    /// No-op when already connected. On failure the link is left
    /// `Disconnected` and the error is also published as an event.
    pub async fn connect(&self) -> Result<(), LinkError> {
        let _guard = self.lifecycle.lock().await;
        if self.state() == LinkState::Connected {
            return Ok(());
        }

        self.set_state(LinkState::Connecting);
        match self.transport.open().await {
            Ok(conn) => {
                let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
                *self.writer.lock().await = Some(conn.writer);
                *self.reader_slot() = Some((epoch, conn.reader));
                self.set_state(LinkState::Connected);
                tracing::info!("{} '{}' connected ({})", self.id, self.name(), self.kind());
                Ok(())
            }
            Err(e) => {
                tracing::warn!("{} '{}' failed to connect: {e}", self.id, self.name());
                self.report_failure(&e);
                self.set_state(LinkState::Disconnected);
                Err(e.into())
            }
        }
    }

    /// Release the transport resource. Idempotent.
    ///
    /// An in-flight `send` is cut short and fails with `NotConnected`.
    pub async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;
        self.release().await;
    }

    /// Send one whole frame.
    ///
    /// A device that stops draining can park the write; tearing the
    /// connection down releases it with `NotConnected`.
    pub async fn send(&self, frame: &[u8]) -> Result<(), LinkError> {
        let closing = self.closing.notified();
        tokio::pin!(closing);
        closing.as_mut().enable();

        if self.state() != LinkState::Connected {
            return Err(LinkError::NotConnected(self.id));
        }

        let mut writer = tokio::select! {
            writer = self.writer.lock() => writer,
            _ = &mut closing => return Err(LinkError::NotConnected(self.id)),
        };
        let Some(writer) = writer.as_mut() else {
            return Err(LinkError::NotConnected(self.id));
        };

        let written = tokio::select! {
            written = writer.write_frame(frame) => written,
            _ = &mut closing => {
                tracing::debug!("{} '{}' send interrupted by disconnect", self.id, self.name());
                return Err(LinkError::NotConnected(self.id));
            }
        };

        match written {
            Ok(()) => {
                self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .bytes_sent
                    .fetch_add(frame.len() as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.report_failure(&e);
                Err(e.into())
            }
        }
    }

    /// Claim the inbound frame stream of the current connection.
    ///
    /// Returns `None` when not connected or when the stream was already
    /// claimed. The stream ends when the connection ends.
    pub fn read(self: &Arc<Self>) -> Option<FrameStream> {
        let (epoch, reader) = self.reader_slot().take()?;
        Some(FrameStream {
            link: Arc::clone(self),
            reader,
            epoch,
            done: false,
        })
    }

    /// Mark the link released without waiting on its locks.
    ///
    /// Used when a link did not disconnect in time during shutdown.
    pub(crate) fn force_disconnected(&self) {
        self.closing.notify_waiters();
        self.reader_slot().take();
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        self.set_state(LinkState::Disconnected);
    }

    async fn release(&self) {
        self.reader_slot().take();
        self.closing.notify_waiters();
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.close().await {
                tracing::warn!("{} '{}' close failed: {e}", self.id, self.name());
            }
        }
        if self.state() != LinkState::Disconnected {
            tracing::info!("{} '{}' disconnected", self.id, self.name());
        }
        self.set_state(LinkState::Disconnected);
    }

    /// Called by a frame stream when its connection ended.
    async fn stream_ended(&self, epoch: u64, failure: Option<&TransportError>) {
        let _guard = self.lifecycle.lock().await;
        if self.epoch.load(Ordering::Acquire) != epoch {
            // A newer connection owns the link now.
            return;
        }
        if let Some(e) = failure {
            self.report_failure(e);
        }
        self.release().await;
    }

    fn report_failure(&self, e: &TransportError) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        let _ = self.events.send(LinkEvent::TransportFailed {
            id: self.id,
            error: e.to_string(),
        });
    }

    fn set_state(&self, new: LinkState) {
        let old = self.state.send_replace(new);
        if old != new {
            tracing::debug!("{} state {old} -> {new}", self.id);
            let _ = self.events.send(LinkEvent::StateChanged {
                id: self.id,
                old,
                new,
            });
        }
    }

    fn reader_slot(&self) -> MutexGuard<'_, ReaderSlot> {
        match self.reader.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("kind", &self.kind())
            .field("state", &self.state())
            .finish()
    }
}

/// Lazy sequence of inbound frames from one connection of a link.
pub struct FrameStream {
    link: Arc<Link>,
    reader: Box<dyn FrameReader>,
    epoch: u64,
    done: bool,
}

impl FrameStream {
    pub fn link_id(&self) -> LinkId {
        self.link.id
    }

    /// Next inbound frame.
    ///
    /// `None` marks a clean end (e.g. end of a playback log); an error marks
    /// an unexpected drop. Either way the link is `Disconnected` afterwards
    /// and the stream yields nothing more.
    pub async fn next(&mut self) -> Option<Result<Vec<u8>, LinkError>> {
        if self.done {
            return None;
        }

        match self.reader.read_frame().await {
            Ok(Some(frame)) => {
                let counters = &self.link.counters;
                counters.frames_received.fetch_add(1, Ordering::Relaxed);
                counters
                    .bytes_received
                    .fetch_add(frame.len() as u64, Ordering::Relaxed);
                Some(Ok(frame))
            }
            Ok(None) => {
                self.done = true;
                tracing::info!("{} '{}' reached end of stream", self.link.id, self.link.name());
                self.link.stream_ended(self.epoch, None).await;
                None
            }
            Err(e) => {
                self.done = true;
                tracing::warn!("{} '{}' read failed: {e}", self.link.id, self.link.name());
                self.link.stream_ended(self.epoch, Some(&e)).await;
                Some(Err(e.into()))
            }
        }
    }
}
