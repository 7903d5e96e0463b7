//! Configuration for the link manager and for individual links.
//!
//! Both structs are plain serde data: the core never reads settings files
//! itself, callers hand it already-loaded values.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::link::LinkKind;

fn default_queue_capacity() -> usize {
    4096
}

fn default_push_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_shutdown_link_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_event_capacity() -> usize {
    256
}

/// What a bounded packet queue does with a frame that arrives while full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backpressure {
    /// Wait for room, up to `push_timeout`, then drop the new frame.
    #[default]
    Block,
    /// Evict the oldest queued frame to make room.
    DropOldest,
    /// Drop the arriving frame.
    DropNewest,
}

/// Retry schedule for links configured with `auto_reconnect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Upper bound for the doubled delay
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Retries before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

/// Configuration for the link manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Packet queue capacity; 0 means unbounded.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Policy applied when the bounded queue is full.
    #[serde(default)]
    pub backpressure: Backpressure,

    /// How long a producer waits for room under `Backpressure::Block`.
    #[serde(default = "default_push_timeout", with = "humantime_serde")]
    pub push_timeout: Duration,

    /// How long shutdown waits for each link to release its resources.
    #[serde(default = "default_shutdown_link_timeout", with = "humantime_serde")]
    pub shutdown_link_timeout: Duration,

    /// Buffered link events per subscriber before it starts lagging.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            backpressure: Backpressure::default(),
            push_timeout: default_push_timeout(),
            shutdown_link_timeout: default_shutdown_link_timeout(),
            event_capacity: default_event_capacity(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Construction parameters for one link.
///
/// Which fields matter depends on `kind`; the transport factory for that kind
/// validates them when the link is added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Human-readable name
    pub name: String,
    /// Transport kind
    pub kind: LinkKind,

    /// Local `host:port` to bind (UDP).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Remote `host:port` peers that always receive outbound frames (UDP).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,

    /// Log file (playback) or device node (hil).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Maximum bytes per inbound frame (playback, hil).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_size: Option<usize>,

    /// Delay between replayed frames (playback).
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub interval: Option<Duration>,

    /// Retry `connect` with backoff after an unexpected drop.
    #[serde(default)]
    pub auto_reconnect: bool,
}

impl LinkConfig {
    fn new(name: impl Into<String>, kind: LinkKind) -> Self {
        Self {
            name: name.into(),
            kind,
            address: None,
            targets: Vec::new(),
            path: None,
            frame_size: None,
            interval: None,
            auto_reconnect: false,
        }
    }

    /// UDP link listening on `address`.
    pub fn udp(name: impl Into<String>, address: impl Into<String>) -> Self {
        let mut cfg = Self::new(name, LinkKind::Udp);
        cfg.address = Some(address.into());
        cfg
    }

    /// Simulation link replaying the log at `path`.
    pub fn playback(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let mut cfg = Self::new(name, LinkKind::Playback);
        cfg.path = Some(path.into());
        cfg
    }

    /// Hardware-in-the-loop link on the device node at `path`.
    pub fn hil(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let mut cfg = Self::new(name, LinkKind::Hil);
        cfg.path = Some(path.into());
        cfg
    }

    /// Link served by a registered plugin transport.
    pub fn plugin(name: impl Into<String>, plugin: impl Into<String>) -> Self {
        Self::new(name, LinkKind::Plugin(plugin.into()))
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = Some(frame_size);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }
}
