//! Scriptable plugin transport for manager tests.
//!
//! Every connection of a fake link emits `frames` tagged frames
//! (`"<link name>:<counter>"`), then idles, ends or fails.

#![allow(dead_code)]

use async_trait::async_trait;
use groundlink_core::{
    Connection, FrameReader, FrameWriter, LinkConfig, LinkError, LinkFactory, LinkKind,
    LinkManager, ManagerConfig, Transport, TransportError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterFrames {
    /// Stay connected without producing more frames.
    Idle,
    /// Clean end of stream.
    End,
    /// Unexpected drop.
    Fail,
}

#[derive(Debug, Clone, Copy)]
pub struct Behavior {
    pub frames: usize,
    pub then: AfterFrames,
    pub hang_on_close: bool,
    /// Opens beyond this count fail.
    pub successful_opens: Option<usize>,
}

impl Behavior {
    pub fn steady(frames: usize) -> Self {
        Self {
            frames,
            then: AfterFrames::Idle,
            hang_on_close: false,
            successful_opens: None,
        }
    }
}

#[derive(Clone)]
pub struct FakeFactory {
    plugin: String,
    behavior: Behavior,
    opens: Arc<AtomicUsize>,
    alive: Arc<()>,
}

impl FakeFactory {
    pub fn new(plugin: &str, behavior: Behavior) -> Self {
        Self {
            plugin: plugin.to_string(),
            behavior,
            opens: Arc::new(AtomicUsize::new(0)),
            alive: Arc::new(()),
        }
    }

    pub fn link(&self, name: &str) -> LinkConfig {
        LinkConfig::plugin(name, self.plugin.clone())
    }

    /// Number of `open` calls so far
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Readers of this factory's connections that have not been dropped
    pub fn live_readers(&self) -> usize {
        Arc::strong_count(&self.alive) - 1
    }
}

impl LinkFactory for FakeFactory {
    fn kind(&self) -> LinkKind {
        LinkKind::Plugin(self.plugin.clone())
    }

    fn build(&self, cfg: &LinkConfig) -> Result<Box<dyn Transport>, LinkError> {
        Ok(Box::new(FakeTransport {
            kind: self.kind(),
            name: cfg.name.clone(),
            behavior: self.behavior,
            opens: Arc::clone(&self.opens),
            alive: Arc::clone(&self.alive),
        }))
    }
}

struct FakeTransport {
    kind: LinkKind,
    name: String,
    behavior: Behavior,
    opens: Arc<AtomicUsize>,
    alive: Arc<()>,
}

#[async_trait]
impl Transport for FakeTransport {
    fn kind(&self) -> LinkKind {
        self.kind.clone()
    }

    async fn open(&self) -> Result<Connection, TransportError> {
        let n = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(limit) = self.behavior.successful_opens {
            if n > limit {
                return Err(TransportError::Closed(format!("{} unavailable", self.name)));
            }
        }

        let reader = FakeReader {
            name: self.name.clone(),
            next: 0,
            behavior: self.behavior,
            _alive: Arc::clone(&self.alive),
        };
        let writer = FakeWriter {
            hang_on_close: self.behavior.hang_on_close,
        };
        Ok(Connection::new(reader, writer))
    }
}

struct FakeReader {
    name: String,
    next: usize,
    behavior: Behavior,
    _alive: Arc<()>,
}

#[async_trait]
impl FrameReader for FakeReader {
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.next < self.behavior.frames {
            tokio::task::yield_now().await;
            let frame = format!("{}:{}", self.name, self.next).into_bytes();
            self.next += 1;
            return Ok(Some(frame));
        }

        match self.behavior.then {
            AfterFrames::Idle => std::future::pending().await,
            AfterFrames::End => Ok(None),
            AfterFrames::Fail => Err(TransportError::Closed(self.name.clone())),
        }
    }
}

struct FakeWriter {
    hang_on_close: bool,
}

#[async_trait]
impl FrameWriter for FakeWriter {
    async fn write_frame(&mut self, _frame: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.hang_on_close {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// Split a tagged frame into link name and counter.
pub fn parse_frame(data: &[u8]) -> (String, usize) {
    let text = String::from_utf8(data.to_vec()).expect("frame is not utf-8");
    let (name, counter) = text.rsplit_once(':').expect("frame has no tag");
    (name.to_string(), counter.parse().expect("bad counter"))
}

pub fn manager_with(config: ManagerConfig, factories: &[&FakeFactory]) -> Arc<LinkManager> {
    let manager = LinkManager::new(config);
    for factory in factories {
        manager
            .register_transport(Arc::new((*factory).clone()))
            .expect("register failed");
    }
    Arc::new(manager)
}
