//! Consumer side of the link manager: what the vehicle layer uses to pull
//! inbound packets and follow link state.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::link::{LinkEvent, LinkSummary};
use crate::manager::LinkManager;
use crate::queue::{Packet, PacketQueue};

/// Handle for reading packets and link events from a manager.
///
/// Several consumers may share one manager; every packet is handed to
/// exactly one of them.
#[derive(Clone)]
pub struct Consumer {
    manager: Arc<LinkManager>,
    queue: Arc<PacketQueue>,
}

impl Consumer {
    pub fn new(manager: Arc<LinkManager>) -> Self {
        let queue = manager.queue();
        Self { manager, queue }
    }

    /// Next packet if one is queued.
    pub fn poll(&self) -> Option<Packet> {
        self.queue.try_pop()
    }

    /// Wait for the next packet. `None` once the manager has shut down and
    /// the queue is drained.
    pub async fn next(&self) -> Option<Packet> {
        self.queue.pop().await
    }

    pub async fn next_timeout(&self, timeout: Duration) -> Option<Packet> {
        self.queue.pop_timeout(timeout).await
    }

    /// Deliver every packet to `callback` from a background task.
    pub fn subscribe<F>(&self, mut callback: F) -> Subscription
    where
        F: FnMut(Packet) + Send + 'static,
    {
        let queue = Arc::clone(&self.queue);
        let task = tokio::spawn(async move {
            let mut delivered = 0u64;
            while let Some(packet) = queue.pop().await {
                callback(packet);
                delivered += 1;
            }
            delivered
        });
        Subscription { task }
    }

    /// Link events from now on.
    pub fn events(&self) -> broadcast::Receiver<LinkEvent> {
        self.manager.subscribe_events()
    }

    pub fn list_links(&self) -> Vec<LinkSummary> {
        self.manager.enumerate_links()
    }
}

/// Background delivery started by [`Consumer::subscribe`].
pub struct Subscription {
    task: JoinHandle<u64>,
}

impl Subscription {
    /// Stop delivering. Packets not yet popped stay in the queue.
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the queue is closed and drained; returns how many packets
    /// were delivered. Returns 0 if the subscription was cancelled.
    pub async fn finished(self) -> u64 {
        self.task.await.unwrap_or(0)
    }
}
