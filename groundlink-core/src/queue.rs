//! Packet queue shared by every link of a manager.
//!
//! Link read tasks push inbound frames, consumers pop them. Each packet gets a
//! sequence number when it is inserted, so numbers grow strictly across the
//! whole queue; frames of one link keep their arrival order.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;

use crate::config::Backpressure;
use crate::link::LinkId;

/// One inbound frame, tagged with where and when it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    seq: u64,
    link_id: LinkId,
    received_at: SystemTime,
    data: Vec<u8>,
}

impl Packet {
    /// Queue-assigned sequence number, starting at 1
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn link_id(&self) -> LinkId {
        self.link_id
    }

    pub fn received_at(&self) -> SystemTime {
        self.received_at
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Why a frame did not make it into the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Packet queue is closed")]
    Closed,

    #[error("Packet queue is full, frame dropped")]
    Full,
}

#[derive(Debug)]
struct Inner {
    packets: VecDeque<Packet>,
    next_seq: u64,
    dropped: u64,
    closed: bool,
}

impl Inner {
    fn insert(&mut self, link_id: LinkId, data: Vec<u8>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.packets.push_back(Packet {
            seq,
            link_id,
            received_at: SystemTime::now(),
            data,
        });
        seq
    }
}

/// Multi-producer, multi-consumer FIFO of inbound packets.
#[derive(Debug)]
pub struct PacketQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    backpressure: Backpressure,
    push_timeout: Duration,
    not_empty: Notify,
    not_full: Notify,
}

impl PacketQueue {
    /// Create a queue. A `capacity` of 0 means unbounded.
    pub fn new(capacity: usize, backpressure: Backpressure, push_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                packets: VecDeque::new(),
                next_seq: 1,
                dropped: 0,
                closed: false,
            }),
            capacity,
            backpressure,
            push_timeout,
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// Unbounded queue
    pub fn unbounded() -> Self {
        Self::new(0, Backpressure::Block, Duration::ZERO)
    }

    /// Insert a frame received on `link_id` and return its sequence number.
    ///
    /// When the queue is full the configured backpressure policy decides:
    /// `Block` waits up to `push_timeout` for room, `DropOldest` evicts the
    /// head, `DropNewest` rejects this frame. Rejected and evicted frames
    /// are counted in [`dropped`](Self::dropped).
    pub async fn push(&self, link_id: LinkId, data: Vec<u8>) -> Result<u64, QueueError> {
        let deadline = tokio::time::Instant::now() + self.push_timeout;

        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.closed {
                    return Err(QueueError::Closed);
                }

                if self.capacity == 0 || inner.packets.len() < self.capacity {
                    let seq = inner.insert(link_id, data);
                    drop(inner);
                    self.not_empty.notify_one();
                    return Ok(seq);
                }

                match self.backpressure {
                    Backpressure::DropNewest => {
                        inner.dropped += 1;
                        return Err(QueueError::Full);
                    }
                    Backpressure::DropOldest => {
                        inner.packets.pop_front();
                        inner.dropped += 1;
                        let seq = inner.insert(link_id, data);
                        drop(inner);
                        self.not_empty.notify_one();
                        return Ok(seq);
                    }
                    Backpressure::Block => {}
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                self.lock().dropped += 1;
                tracing::debug!("Packet queue full for {:?}, dropped frame from {link_id}", self.push_timeout);
                return Err(QueueError::Full);
            }
        }
    }

    /// Wait for the next packet.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Packet> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if let Some(packet) = inner.packets.pop_front() {
                    drop(inner);
                    self.not_full.notify_one();
                    return Some(packet);
                }
                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Take the next packet if one is queued.
    pub fn try_pop(&self) -> Option<Packet> {
        let packet = self.lock().packets.pop_front();
        if packet.is_some() {
            self.not_full.notify_one();
        }
        packet
    }

    /// Wait up to `timeout` for the next packet.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<Packet> {
        tokio::time::timeout(timeout, self.pop()).await.ok().flatten()
    }

    /// Stop accepting frames. Already queued packets stay poppable.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().packets.is_empty()
    }

    /// Configured capacity, 0 when unbounded
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames rejected or evicted because the queue was full
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
