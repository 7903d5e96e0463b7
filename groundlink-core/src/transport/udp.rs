//! UDP transport: one datagram per frame.
//!
//! The socket listens on the configured address. Outbound frames go to the
//! configured targets plus every peer that has sent us a datagram recently, so
//! a vehicle that talks first gets answered without extra configuration.
//! Targets are permanent. Learned peers expire after `LEARNED_PEER_TTL` of
//! silence, and at most `MAX_LEARNED_PEERS` are kept.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

use crate::config::LinkConfig;
use crate::error::{LinkError, TransportError};
use crate::link::LinkKind;
use crate::transport::{Connection, FrameReader, FrameWriter, Transport};

/// Fits the largest UDP payload, so datagrams are never truncated.
const UDP_RECV_BUF_SIZE: usize = 65_536;

const LEARNED_PEER_TTL: Duration = Duration::from_secs(30);
const MAX_LEARNED_PEERS: usize = 16;

fn parse_addr(field: &str, raw: &str) -> Result<SocketAddr, LinkError> {
    raw.parse()
        .map_err(|_| LinkError::invalid(format!("{field} '{raw}' is not a valid host:port address")))
}

/// Outbound destinations of one connection.
#[derive(Debug)]
struct Peers {
    targets: Vec<SocketAddr>,
    /// Learned peer -> last time it was heard from
    learned: HashMap<SocketAddr, Instant>,
}

impl Peers {
    fn new(targets: Vec<SocketAddr>) -> Self {
        Self {
            targets,
            learned: HashMap::new(),
        }
    }

    /// Record a datagram from `addr`. Returns true for a newly learned peer.
    fn learn(&mut self, addr: SocketAddr, now: Instant) -> bool {
        if self.targets.contains(&addr) {
            return false;
        }
        if let Some(seen) = self.learned.get_mut(&addr) {
            *seen = now;
            return false;
        }

        self.expire(now);
        if self.learned.len() >= MAX_LEARNED_PEERS {
            let oldest = self
                .learned
                .iter()
                .min_by_key(|(_, seen)| **seen)
                .map(|(peer, _)| *peer);
            if let Some(oldest) = oldest {
                self.learned.remove(&oldest);
                tracing::debug!("Evicted UDP peer {oldest}");
            }
        }
        self.learned.insert(addr, now);
        true
    }

    fn forget(&mut self, addr: &SocketAddr) -> bool {
        self.learned.remove(addr).is_some()
    }

    fn expire(&mut self, now: Instant) {
        self.learned.retain(|peer, seen| {
            let live = now.saturating_duration_since(*seen) < LEARNED_PEER_TTL;
            if !live {
                tracing::debug!("UDP peer {peer} expired");
            }
            live
        });
    }

    /// Targets first, then live learned peers.
    fn active(&mut self, now: Instant) -> Vec<SocketAddr> {
        self.expire(now);
        let mut peers = self.targets.clone();
        peers.extend(self.learned.keys().copied());
        peers
    }
}

type SharedPeers = Arc<Mutex<Peers>>;

fn lock_peers(peers: &SharedPeers) -> MutexGuard<'_, Peers> {
    peers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// UDP transport bound to a local address
#[derive(Debug, Clone)]
pub struct UdpTransport {
    bind_addr: SocketAddr,
    targets: Vec<SocketAddr>,
}

impl UdpTransport {
    pub fn new(bind_addr: SocketAddr, targets: Vec<SocketAddr>) -> Self {
        Self { bind_addr, targets }
    }

    /// Validate a UDP link config and build the transport.
    pub fn from_config(cfg: &LinkConfig) -> Result<Self, LinkError> {
        let raw = cfg
            .address
            .as_deref()
            .ok_or_else(|| LinkError::invalid("udp link requires an address"))?;
        let bind_addr = parse_addr("address", raw)?;
        if bind_addr.port() == 0 {
            return Err(LinkError::invalid(format!(
                "address '{raw}' must name a fixed port"
            )));
        }

        let targets = cfg
            .targets
            .iter()
            .map(|t| parse_addr("target", t))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(bind_addr, targets))
    }

    /// Local address the socket binds to
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn kind(&self) -> LinkKind {
        LinkKind::Udp
    }

    async fn open(&self) -> Result<Connection, TransportError> {
        let socket = Arc::new(UdpSocket::bind(self.bind_addr).await?);
        tracing::debug!("UDP socket bound: {}", socket.local_addr()?);

        let peers: SharedPeers = Arc::new(Mutex::new(Peers::new(self.targets.clone())));
        let reader = UdpReader {
            socket: Arc::clone(&socket),
            peers: Arc::clone(&peers),
            buf: vec![0u8; UDP_RECV_BUF_SIZE],
        };
        let writer = UdpWriter { socket, peers };
        Ok(Connection::new(reader, writer))
    }
}

struct UdpReader {
    socket: Arc<UdpSocket>,
    peers: SharedPeers,
    buf: Vec<u8>,
}

#[async_trait]
impl FrameReader for UdpReader {
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let (n, peer) = self.socket.recv_from(&mut self.buf).await?;

        if lock_peers(&self.peers).learn(peer, Instant::now()) {
            tracing::debug!("Learned UDP peer {peer}");
        }

        Ok(Some(self.buf[..n].to_vec()))
    }
}

struct UdpWriter {
    socket: Arc<UdpSocket>,
    peers: SharedPeers,
}

impl UdpWriter {
    async fn send_one(&self, frame: &[u8], peer: SocketAddr) -> Result<(), TransportError> {
        let written = self.socket.send_to(frame, peer).await?;
        if written != frame.len() {
            return Err(TransportError::ShortWrite {
                written,
                expected: frame.len(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FrameWriter for UdpWriter {
    /// Send to every peer. Succeeds when at least one peer got the frame;
    /// learned peers that fail are forgotten until they talk again.
    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let peers = lock_peers(&self.peers).active(Instant::now());
        if peers.is_empty() {
            return Err(TransportError::NoPeer);
        }

        let mut delivered = 0;
        let mut last_err = None;
        for peer in peers {
            match self.send_one(frame, peer).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    if lock_peers(&self.peers).forget(&peer) {
                        tracing::warn!("Send to UDP peer {peer} failed, forgetting it: {e}");
                    } else {
                        tracing::warn!("Send to UDP target {peer} failed: {e}");
                    }
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) if delivered == 0 => Err(e),
            _ => Ok(()),
        }
    }
}
