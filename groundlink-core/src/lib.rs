//! Core library for ground-station link management.
//!
//! A ground station talks to vehicles over several kinds of channels at once:
//! UDP sockets, replayed simulation logs and hardware-in-the-loop devices.
//! This library owns those channels and merges everything they receive into
//! one ordered packet stream.
//!
//! # Architecture
//!
//! - `transport`: the `Transport` capability traits and the built-in UDP,
//!   playback and HIL transports
//! - `factory`: transport constructors keyed by link kind, including plugins
//! - `link`: one managed channel with its connection state machine
//! - `queue`: the shared inbound packet queue and its backpressure policies
//! - `manager`: link registry, per-link read tasks, reconnect and shutdown
//! - `facade`: explicit init/terminate lifecycle around the manager
//! - `consumer`: pull, callback and event interface for packet consumers
//! - `config`, `error`: serde configuration and error types
//!
//! # Example
//!
//! ```no_run
//! use groundlink_core::{LinkConfig, LinkManagerFacade, ManagerConfig};
//!
//! # async fn example() -> Result<(), groundlink_core::LinkError> {
//! let facade = LinkManagerFacade::new(ManagerConfig::default());
//! let manager = facade.initialize()?;
//!
//! let id = manager.add_link(LinkConfig::udp("vehicle", "0.0.0.0:14550"))?;
//! manager.connect(id).await?;
//!
//! let consumer = facade.consumer()?;
//! if let Some(packet) = consumer.next().await {
//!     println!("{} bytes from {}", packet.data().len(), packet.link_id());
//! }
//!
//! facade.terminate().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consumer;
pub mod error;
pub mod facade;
pub mod factory;
pub mod link;
pub mod manager;
pub mod queue;
pub mod transport;

pub use config::{Backpressure, LinkConfig, ManagerConfig, ReconnectPolicy};
pub use consumer::{Consumer, Subscription};
pub use error::{LinkError, TransportError};
pub use facade::LinkManagerFacade;
pub use factory::{LinkFactory, TransportRegistry};
pub use link::{FrameStream, Link, LinkEvent, LinkId, LinkKind, LinkState, LinkStats, LinkSummary};
pub use manager::{LinkManager, ShutdownReport};
pub use queue::{Packet, PacketQueue, QueueError};
pub use transport::{Connection, FrameReader, FrameWriter, Transport};
