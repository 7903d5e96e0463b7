use anyhow::{Context, Result};
use groundlink_core::{LinkEvent, LinkManagerFacade};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;

use crate::config::ServiceConfig;

pub type LogFn = Box<dyn Fn(String) + Send + Sync + 'static>;

fn describe_event(event: &LinkEvent) -> String {
    match event {
        LinkEvent::Added { id } => format!("Link {id} added"),
        LinkEvent::Removed { id } => format!("Link {id} removed"),
        LinkEvent::StateChanged { id, old, new } => format!("Link {id} state {old} -> {new}"),
        LinkEvent::TransportFailed { id, error } => format!("Link {id} transport error: {error}"),
        LinkEvent::Abandoned { id } => format!("Link {id} abandoned during shutdown"),
    }
}

/// Run the link service until `stop` flips to true or Ctrl+C.
///
/// Initializes the link manager, adds the configured links, connects the ones
/// flagged `connect_on_start` and logs inbound packets, link events and a
/// periodic health line. The manager is always terminated before returning.
pub async fn run_service(
    cfg: ServiceConfig,
    mut stop: watch::Receiver<bool>,
    log: LogFn,
) -> Result<()> {
    let log = Arc::new(log);

    (log.as_ref())(format!(
        "{} {} starting: links={} queue_capacity={} backpressure={:?} health_interval={:?}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        cfg.links.len(),
        cfg.manager.queue_capacity,
        cfg.manager.backpressure,
        cfg.health_interval
    ));

    let facade = LinkManagerFacade::new(cfg.manager.clone());
    let manager = facade.initialize()?;
    let mut events = manager.subscribe_events();

    let mut to_connect = Vec::new();
    for entry in &cfg.links {
        let added = manager
            .add_link(entry.link.clone())
            .with_context(|| format!("failed to add link '{}'", entry.link.name));
        let id = match added {
            Ok(id) => id,
            Err(e) => {
                facade.terminate().await;
                return Err(e);
            }
        };
        if entry.connect_on_start {
            to_connect.push(id);
        }
    }

    for id in to_connect {
        if let Err(e) = manager.connect(id).await {
            // The vehicle may come up later; the link stays registered.
            (log.as_ref())(format!("Connect {id} failed: {e}"));
        }
    }

    let consumer = facade.consumer()?;
    let mut tick = tokio::time::interval(cfg.health_interval);
    let mut received: u64 = 0;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let queue = manager.queue();
                (log.as_ref())(format!(
                    "Health tick: received_packets={received} queued={} dropped={}",
                    queue.len(),
                    queue.dropped()
                ));
                for link in manager.enumerate_links() {
                    (log.as_ref())(format!(
                        "  {} '{}' [{}] {} rx={} tx={} errors={}",
                        link.id,
                        link.name,
                        link.kind,
                        link.state,
                        link.stats.frames_received,
                        link.stats.frames_sent,
                        link.stats.errors
                    ));
                }
            }
            packet = consumer.next() => {
                let Some(packet) = packet else {
                    (log.as_ref())("Packet queue closed".to_string());
                    break;
                };
                received += 1;
                (log.as_ref())(format!(
                    "Recv pkt seq={} from {}: {} bytes",
                    packet.seq(),
                    packet.link_id(),
                    packet.data().len()
                ));
            }
            event = events.recv() => {
                match event {
                    Ok(event) => (log.as_ref())(describe_event(&event)),
                    Err(RecvError::Lagged(n)) => {
                        (log.as_ref())(format!("Missed {n} link events"));
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    (log.as_ref())("Stop requested".to_string());
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                (log.as_ref())("Ctrl+C received".to_string());
                break;
            }
        }
    }

    if let Some(report) = facade.terminate().await {
        (log.as_ref())(format!(
            "Shutdown complete: disconnected={} abandoned={}",
            report.disconnected.len(),
            report.abandoned.len()
        ));
        for id in &report.abandoned {
            (log.as_ref())(format!("Link {id} did not release in time"));
        }
    }

    Ok(())
}
