use anyhow::Result;
use groundlink::config::{ServiceConfig, ServiceLink};
use groundlink::runtime::run_service;
use groundlink_core::LinkConfig;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

fn free_udp_addr() -> String {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").expect("bind failed");
    socket.local_addr().expect("local addr").to_string()
}

async fn wait_for_log(log: &Arc<Mutex<Vec<String>>>, pred: impl Fn(&[String]) -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < Duration::from_secs(5) {
        if pred(&log.lock().unwrap()) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_service_replays_log_and_receives_udp() -> Result<()> {
    // 10 bytes in 4-byte frames: three packets, then end of log.
    let mut tlog = tempfile::NamedTempFile::new()?;
    tlog.write_all(b"0123456789")?;
    tlog.flush()?;

    let udp_addr = free_udp_addr();
    let mut cfg = ServiceConfig {
        health_interval: Duration::from_millis(200),
        links: vec![ServiceLink {
            link: LinkConfig::udp("vehicle", udp_addr.clone()),
            connect_on_start: true,
        }],
        ..ServiceConfig::default()
    };
    cfg.add_playback_logs(&[PathBuf::from(tlog.path())]);
    if let Some(entry) = cfg.links.last_mut() {
        entry.link.frame_size = Some(4);
        entry.link.interval = Some(Duration::from_millis(5));
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let log = Arc::new(Mutex::new(Vec::new()));
    let log_clone = log.clone();

    let handle = tokio::spawn(async move {
        run_service(
            cfg,
            stop_rx,
            Box::new(move |msg| {
                println!("[SERVICE] {}", msg);
                log_clone.lock().unwrap().push(msg);
            }),
        )
        .await
    });

    // Replay finishes on its own and disconnects the playback link.
    let replayed = wait_for_log(&log, |lines| {
        lines.iter().filter(|m| m.contains("Recv pkt")).count() >= 3
            && lines
                .iter()
                .any(|m| m.contains("link#2 state connected -> disconnected"))
    })
    .await;
    assert!(replayed, "playback link did not replay and disconnect");

    let vehicle = tokio::net::UdpSocket::bind("127.0.0.1:0").await?;
    vehicle.send_to(b"heartbeat", &udp_addr).await?;

    let heard = wait_for_log(&log, |lines| {
        lines
            .iter()
            .any(|m| m.contains("Recv pkt") && m.contains("from link#1: 9 bytes"))
    })
    .await;
    assert!(heard, "UDP frame not received");

    let _ = stop_tx.send(true);
    handle.await??;

    let lines = log.lock().unwrap().clone();
    assert!(lines.iter().any(|m| m.starts_with("groundlink ")));
    assert!(lines.iter().any(|m| m.contains("Stop requested")));
    assert!(lines
        .iter()
        .any(|m| m.contains("Shutdown complete: disconnected=2 abandoned=0")));
    Ok(())
}

#[tokio::test]
async fn test_service_rejects_invalid_link() {
    let cfg = ServiceConfig {
        links: vec![ServiceLink {
            link: LinkConfig::udp("broken", "no-port"),
            connect_on_start: true,
        }],
        ..ServiceConfig::default()
    };

    let (_stop_tx, stop_rx) = watch::channel(false);
    let err = run_service(cfg, stop_rx, Box::new(|_| {}))
        .await
        .expect_err("invalid link should fail startup");
    assert!(format!("{err:#}").contains("broken"));
}

#[tokio::test]
async fn test_service_survives_failed_connect() -> Result<()> {
    let cfg = ServiceConfig {
        health_interval: Duration::from_millis(50),
        links: vec![ServiceLink {
            link: LinkConfig::playback("missing", "/nonexistent/flight.tlog"),
            connect_on_start: true,
        }],
        ..ServiceConfig::default()
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    let log = Arc::new(Mutex::new(Vec::new()));
    let log_clone = log.clone();
    let handle = tokio::spawn(async move {
        run_service(
            cfg,
            stop_rx,
            Box::new(move |msg| log_clone.lock().unwrap().push(msg)),
        )
        .await
    });

    let reported = wait_for_log(&log, |lines| {
        lines.iter().any(|m| m.contains("Connect link#1 failed"))
            && lines.iter().any(|m| m.contains("'missing' [playback] disconnected"))
    })
    .await;
    assert!(reported);

    let _ = stop_tx.send(true);
    handle.await??;
    Ok(())
}
