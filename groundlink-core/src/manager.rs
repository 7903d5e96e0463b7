//! Link manager: owns every link, drains their reads into the packet queue
//! and orchestrates shutdown.
//!
//! Each connected link gets one pump task that reads frames from the link and
//! pushes them into the shared [`PacketQueue`]. Pumps are stopped through a
//! `watch` signal and awaited with a timeout before the link is disconnected,
//! so a link is never read after `remove_link` or `shutdown` returns.
//!
//! The registry mutex only guards bookkeeping and is never held across an
//! `.await`; link I/O runs outside of it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{LinkConfig, ManagerConfig, ReconnectPolicy};
use crate::error::LinkError;
use crate::factory::{LinkFactory, TransportRegistry};
use crate::link::{Link, LinkEvent, LinkId, LinkState, LinkSummary};
use crate::queue::{PacketQueue, QueueError};

/// Outcome of [`LinkManager::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Links released within the per-link timeout, in registration order.
    pub disconnected: Vec<LinkId>,
    /// Links that did not release in time and were force-abandoned.
    pub abandoned: Vec<LinkId>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty()
    }
}

struct PumpHandle {
    generation: u64,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct LinkSlot {
    link: Arc<Link>,
    pump: Option<PumpHandle>,
}

#[derive(Default)]
struct Registry {
    links: BTreeMap<LinkId, LinkSlot>,
    next_id: u64,
    next_pump: u64,
}

/// State shared with pump tasks.
struct Shared {
    registry: Mutex<Registry>,
    shutting_down: AtomicBool,
    queue: Arc<PacketQueue>,
    reconnect: ReconnectPolicy,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        match self.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}

/// Registry of links and owner of their read tasks.
pub struct LinkManager {
    config: ManagerConfig,
    shared: Arc<Shared>,
    transports: RwLock<TransportRegistry>,
    events: broadcast::Sender<LinkEvent>,
    shutdown_report: tokio::sync::Mutex<Option<ShutdownReport>>,
}

impl LinkManager {
    /// Manager with the built-in transports.
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_transports(config, TransportRegistry::with_builtin())
    }

    pub fn with_transports(config: ManagerConfig, transports: TransportRegistry) -> Self {
        let queue = Arc::new(PacketQueue::new(
            config.queue_capacity,
            config.backpressure,
            config.push_timeout,
        ));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::default()),
            shutting_down: AtomicBool::new(false),
            queue,
            reconnect: config.reconnect.clone(),
        });

        Self {
            config,
            shared,
            transports: RwLock::new(transports),
            events,
            shutdown_report: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Queue every link's inbound frames end up in.
    pub fn queue(&self) -> Arc<PacketQueue> {
        Arc::clone(&self.shared.queue)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.is_shutting_down()
    }

    /// Make a plugin transport available to `add_link`.
    pub fn register_transport(&self, factory: Arc<dyn LinkFactory>) -> Result<(), LinkError> {
        let mut transports = match self.transports.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        transports.register(factory)
    }

    /// Create and register a link. The link starts `Disconnected`.
    pub fn add_link(&self, cfg: LinkConfig) -> Result<LinkId, LinkError> {
        if self.is_shutting_down() {
            return Err(LinkError::ManagerShuttingDown);
        }

        let transport = {
            let transports = match self.transports.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            transports.build(&cfg)?
        };

        let id = {
            let mut reg = self.shared.lock();
            if self.is_shutting_down() {
                return Err(LinkError::ManagerShuttingDown);
            }
            reg.next_id += 1;
            let id = LinkId(reg.next_id);
            let link = Arc::new(Link::new(id, cfg, transport, self.events.clone()));
            tracing::info!("Added {id} '{}' ({})", link.name(), link.kind());
            reg.links.insert(id, LinkSlot { link, pump: None });
            id
        };

        let _ = self.events.send(LinkEvent::Added { id });
        Ok(id)
    }

    /// Disconnect and unregister a link.
    ///
    /// Returns after the link's read task has stopped and its transport has
    /// been released (or abandoned after the per-link timeout).
    pub async fn remove_link(&self, id: LinkId) -> Result<(), LinkError> {
        let slot = self
            .shared
            .lock()
            .links
            .remove(&id)
            .ok_or(LinkError::UnknownLink(id))?;

        let deadline = Instant::now() + self.config.shutdown_link_timeout;
        if !self.release(&slot.link, slot.pump, deadline).await {
            let _ = self.events.send(LinkEvent::Abandoned { id });
        }

        tracing::info!("Removed {id} '{}'", slot.link.name());
        let _ = self.events.send(LinkEvent::Removed { id });
        Ok(())
    }

    /// Connect a link and start draining its reads into the queue.
    pub async fn connect(&self, id: LinkId) -> Result<(), LinkError> {
        if self.is_shutting_down() {
            return Err(LinkError::ManagerShuttingDown);
        }

        let link = self.link(id)?;
        link.connect().await?;

        let outcome = {
            let mut guard = self.shared.lock();
            let reg = &mut *guard;
            if self.is_shutting_down() {
                Err(LinkError::ManagerShuttingDown)
            } else if let Some(slot) = reg.links.get_mut(&id) {
                if slot.pump.as_ref().map_or(true, |p| p.task.is_finished()) {
                    reg.next_pump += 1;
                    slot.pump = Some(spawn_pump(&self.shared, &slot.link, reg.next_pump));
                }
                Ok(())
            } else {
                Err(LinkError::UnknownLink(id))
            }
        };

        if let Err(e) = outcome {
            // Removed or shut down while the transport was opening.
            link.disconnect().await;
            return Err(e);
        }
        Ok(())
    }

    /// Stop reading from a link and release its transport.
    pub async fn disconnect(&self, id: LinkId) -> Result<(), LinkError> {
        let (link, pump) = {
            let mut reg = self.shared.lock();
            let slot = reg.links.get_mut(&id).ok_or(LinkError::UnknownLink(id))?;
            (Arc::clone(&slot.link), slot.pump.take())
        };

        let deadline = Instant::now() + self.config.shutdown_link_timeout;
        if !self.release(&link, pump, deadline).await {
            let _ = self.events.send(LinkEvent::Abandoned { id });
        }
        Ok(())
    }

    /// Send one frame on a connected link.
    pub async fn send(&self, id: LinkId, frame: &[u8]) -> Result<(), LinkError> {
        self.link(id)?.send(frame).await
    }

    pub fn link_state(&self, id: LinkId) -> Result<LinkState, LinkError> {
        Ok(self.link(id)?.state())
    }

    pub fn link_summary(&self, id: LinkId) -> Result<LinkSummary, LinkError> {
        Ok(self.link(id)?.summary())
    }

    /// Snapshot of every registered link, in registration order.
    pub fn enumerate_links(&self) -> Vec<LinkSummary> {
        self.shared
            .lock()
            .links
            .values()
            .map(|slot| slot.link.summary())
            .collect()
    }

    pub fn link_count(&self) -> usize {
        self.shared.lock().links.len()
    }

    /// Disconnect every link and close the queue. Idempotent and terminal.
    ///
    /// Links are released one at a time in registration order, each bounded
    /// by `shutdown_link_timeout`. Links that do not release in time are
    /// force-abandoned and listed in the report. Registered links stay
    /// enumerable, all `Disconnected`.
    pub async fn shutdown(&self) -> ShutdownReport {
        let mut done = self.shutdown_report.lock().await;
        if let Some(report) = done.as_ref() {
            return report.clone();
        }

        let slots: Vec<(Arc<Link>, Option<PumpHandle>)> = {
            let mut reg = self.shared.lock();
            self.shared.shutting_down.store(true, Ordering::Release);
            reg.links
                .values_mut()
                .map(|slot| (Arc::clone(&slot.link), slot.pump.take()))
                .collect()
        };
        tracing::info!("Shutting down link manager ({} links)", slots.len());

        let mut report = ShutdownReport::default();
        for (link, pump) in slots {
            let deadline = Instant::now() + self.config.shutdown_link_timeout;
            if self.release(&link, pump, deadline).await {
                report.disconnected.push(link.id());
            } else {
                let _ = self.events.send(LinkEvent::Abandoned { id: link.id() });
                report.abandoned.push(link.id());
            }
        }

        self.shared.queue.close();
        tracing::info!(
            "Link manager stopped: {} disconnected, {} abandoned",
            report.disconnected.len(),
            report.abandoned.len()
        );

        *done = Some(report.clone());
        report
    }

    fn link(&self, id: LinkId) -> Result<Arc<Link>, LinkError> {
        self.shared
            .lock()
            .links
            .get(&id)
            .map(|slot| Arc::clone(&slot.link))
            .ok_or(LinkError::UnknownLink(id))
    }

    /// Stop the pump, then disconnect the link, both before `deadline`.
    ///
    /// Returns false when the link had to be abandoned.
    async fn release(&self, link: &Arc<Link>, pump: Option<PumpHandle>, deadline: Instant) -> bool {
        if let Some(mut pump) = pump {
            pump.stop.send_replace(true);
            if tokio::time::timeout_at(deadline, &mut pump.task).await.is_err() {
                tracing::warn!("Read task of {} did not stop in time, aborting", link.id());
                pump.task.abort();
            }
        }

        match tokio::time::timeout_at(deadline, link.disconnect()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    "{} '{}' did not release within {:?}, abandoning",
                    link.id(),
                    link.name(),
                    self.config.shutdown_link_timeout
                );
                link.force_disconnected();
                false
            }
        }
    }
}

impl Drop for LinkManager {
    fn drop(&mut self) {
        self.shared.shutting_down.store(true, Ordering::Release);
        let mut reg = self.shared.lock();
        for slot in reg.links.values_mut() {
            if let Some(pump) = slot.pump.take() {
                pump.stop.send_replace(true);
                pump.task.abort();
            }
        }
    }
}

impl std::fmt::Debug for LinkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkManager")
            .field("links", &self.link_count())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

fn spawn_pump(shared: &Arc<Shared>, link: &Arc<Link>, generation: u64) -> PumpHandle {
    let (stop, stop_rx) = watch::channel(false);
    let task = tokio::spawn(pump(
        Arc::clone(shared),
        Arc::clone(link),
        stop_rx,
        generation,
    ));
    PumpHandle {
        generation,
        stop,
        task,
    }
}

/// Read task of one link.
///
/// Runs until stopped, or until the link's stream ends and no reconnect is
/// due. On exit it clears its own handle unless the link was reconnected in
/// the meantime, in which case it keeps reading the new connection.
async fn pump(shared: Arc<Shared>, link: Arc<Link>, mut stop: watch::Receiver<bool>, generation: u64) {
    let id = link.id();
    tracing::debug!("Read task for {id} started");

    loop {
        if let Some(mut stream) = link.read() {
            let failed = loop {
                let frame = tokio::select! {
                    biased;
                    _ = stop.changed() => return,
                    frame = stream.next() => frame,
                };

                match frame {
                    Some(Ok(data)) => {
                        let pushed = tokio::select! {
                            biased;
                            _ = stop.changed() => return,
                            pushed = shared.queue.push(id, data) => pushed,
                        };
                        if let Err(QueueError::Closed) = pushed {
                            tracing::trace!("Discarding frame from {id}, queue closed");
                        }
                    }
                    Some(Err(_)) => break true,
                    None => break false,
                }
            };

            if failed && link.config().auto_reconnect && !shared.is_shutting_down() {
                match reconnect(&shared, &link, &mut stop).await {
                    Reconnect::Connected => continue,
                    Reconnect::Stopped => return,
                    Reconnect::GaveUp => {}
                }
            }
        }

        let resume = {
            let mut reg = shared.lock();
            if !*stop.borrow() && link.state() == LinkState::Connected {
                true
            } else {
                if let Some(slot) = reg.links.get_mut(&id) {
                    if slot.pump.as_ref().is_some_and(|p| p.generation == generation) {
                        slot.pump = None;
                    }
                }
                false
            }
        };

        if !resume {
            tracing::debug!("Read task for {id} finished");
            return;
        }
    }
}

enum Reconnect {
    Connected,
    Stopped,
    GaveUp,
}

async fn reconnect(shared: &Shared, link: &Link, stop: &mut watch::Receiver<bool>) -> Reconnect {
    let policy = &shared.reconnect;

    for attempt in 1..=policy.max_attempts {
        let delay = policy.backoff(attempt);
        tracing::info!(
            "Reconnecting {} '{}' in {delay:?} (attempt {attempt}/{})",
            link.id(),
            link.name(),
            policy.max_attempts
        );

        tokio::select! {
            biased;
            _ = stop.changed() => return Reconnect::Stopped,
            _ = tokio::time::sleep(delay) => {}
        }
        if shared.is_shutting_down() {
            return Reconnect::Stopped;
        }

        let result = tokio::select! {
            biased;
            _ = stop.changed() => return Reconnect::Stopped,
            result = link.connect() => result,
        };
        match result {
            Ok(()) => return Reconnect::Connected,
            Err(e) => tracing::warn!("Reconnect of {} failed: {e}", link.id()),
        }
    }

    tracing::warn!(
        "Giving up on {} '{}' after {} attempts",
        link.id(),
        link.name(),
        policy.max_attempts
    );
    Reconnect::GaveUp
}
