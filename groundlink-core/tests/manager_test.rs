mod common;

use common::{manager_with, parse_frame, AfterFrames, Behavior, FakeFactory};
use groundlink_core::{
    Consumer, LinkError, LinkEvent, LinkState, ManagerConfig, ReconnectPolicy,
};
use std::collections::HashMap;
use std::time::Duration;

async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_per_link_fifo() {
    let fake = FakeFactory::new("fake", Behavior::steady(100));
    let manager = manager_with(ManagerConfig::default(), &[&fake]);

    let mut ids = Vec::new();
    for name in ["alpha", "bravo", "charlie"] {
        ids.push(manager.add_link(fake.link(name)).expect("add failed"));
    }
    for id in &ids {
        manager.connect(*id).await.expect("connect failed");
    }

    let consumer = Consumer::new(manager.clone());
    let mut last_counter: HashMap<String, usize> = HashMap::new();
    let mut last_seq = 0;

    for _ in 0..300 {
        let packet = consumer
            .next_timeout(Duration::from_secs(5))
            .await
            .expect("missing packet");
        assert!(packet.seq() > last_seq, "sequence numbers must grow");
        last_seq = packet.seq();

        let (name, counter) = parse_frame(packet.data());
        if let Some(prev) = last_counter.insert(name.clone(), counter) {
            assert_eq!(counter, prev + 1, "frames of {name} out of order");
        } else {
            assert_eq!(counter, 0);
        }
    }

    assert_eq!(last_counter.len(), 3);
    assert!(last_counter.values().all(|c| *c == 99));
    assert!(consumer.poll().is_none());
    manager.shutdown().await;
}

#[tokio::test]
async fn test_send_on_disconnected_link_has_no_side_effects() {
    let fake = FakeFactory::new("fake", Behavior::steady(0));
    let manager = manager_with(ManagerConfig::default(), &[&fake]);
    let id = manager.add_link(fake.link("idle")).unwrap();

    assert!(matches!(
        manager.send(id, b"arm").await,
        Err(LinkError::NotConnected(_))
    ));
    assert_eq!(manager.link_state(id).unwrap(), LinkState::Disconnected);
    assert_eq!(manager.link_summary(id).unwrap().stats.frames_sent, 0);
    assert!(manager.queue().is_empty());
    assert_eq!(fake.opens(), 0);
}

#[tokio::test]
async fn test_send_on_connected_link() {
    let fake = FakeFactory::new("fake", Behavior::steady(0));
    let manager = manager_with(ManagerConfig::default(), &[&fake]);
    let id = manager.add_link(fake.link("uplink")).unwrap();
    manager.connect(id).await.unwrap();

    manager.send(id, b"arm").await.expect("send failed");
    let stats = manager.link_summary(id).unwrap().stats;
    assert_eq!(stats.frames_sent, 1);
    assert_eq!(stats.bytes_sent, 3);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_all_reads() {
    let fake = FakeFactory::new("fake", Behavior::steady(5));
    let manager = manager_with(ManagerConfig::default(), &[&fake]);

    let ids: Vec<_> = (0..4)
        .map(|i| manager.add_link(fake.link(&format!("link{i}"))).unwrap())
        .collect();
    for id in &ids[..3] {
        manager.connect(*id).await.unwrap();
    }
    wait_for("frames", || manager.queue().len() == 15).await;

    let report = manager.shutdown().await;
    assert_eq!(report.disconnected, ids);
    assert!(report.abandoned.is_empty());

    for summary in manager.enumerate_links() {
        assert_eq!(summary.state, LinkState::Disconnected);
    }
    assert_eq!(fake.live_readers(), 0, "read tasks still hold their streams");

    // Queued packets survive shutdown, new ones are refused.
    let consumer = Consumer::new(manager.clone());
    let mut drained = 0;
    while consumer.next().await.is_some() {
        drained += 1;
    }
    assert_eq!(drained, 15);
}

#[tokio::test]
async fn test_shutdown_abandons_stuck_link() {
    let stuck = FakeFactory::new(
        "stuck",
        Behavior {
            hang_on_close: true,
            ..Behavior::steady(0)
        },
    );
    let fine = FakeFactory::new("fine", Behavior::steady(0));
    let config = ManagerConfig {
        shutdown_link_timeout: Duration::from_millis(100),
        ..ManagerConfig::default()
    };
    let manager = manager_with(config, &[&stuck, &fine]);
    let mut events = manager.subscribe_events();

    let a = manager.add_link(stuck.link("stuck")).unwrap();
    let b = manager.add_link(fine.link("fine")).unwrap();
    manager.connect(a).await.unwrap();
    manager.connect(b).await.unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), manager.shutdown())
        .await
        .expect("shutdown hung");
    assert_eq!(report.abandoned, vec![a]);
    assert_eq!(report.disconnected, vec![b]);
    assert_eq!(manager.link_state(a).unwrap(), LinkState::Disconnected);

    let mut abandoned = false;
    while let Ok(event) = events.try_recv() {
        if event == (LinkEvent::Abandoned { id: a }) {
            abandoned = true;
        }
    }
    assert!(abandoned);
}

#[tokio::test]
async fn test_remove_link_stops_reading() {
    let fake = FakeFactory::new("fake", Behavior::steady(3));
    let manager = manager_with(ManagerConfig::default(), &[&fake]);
    let id = manager.add_link(fake.link("gone")).unwrap();
    manager.connect(id).await.unwrap();
    wait_for("frames", || manager.queue().len() == 3).await;

    manager.remove_link(id).await.expect("remove failed");
    assert_eq!(fake.live_readers(), 0);
    assert!(manager.enumerate_links().is_empty());
    assert!(matches!(
        manager.link_state(id),
        Err(LinkError::UnknownLink(_))
    ));
}

#[tokio::test]
async fn test_end_of_stream_disconnects_and_allows_reconnect() {
    let fake = FakeFactory::new(
        "replay",
        Behavior {
            then: AfterFrames::End,
            ..Behavior::steady(2)
        },
    );
    let manager = manager_with(ManagerConfig::default(), &[&fake]);
    let id = manager.add_link(fake.link("replay")).unwrap();

    manager.connect(id).await.unwrap();
    wait_for("end of stream", || {
        manager.link_state(id).unwrap() == LinkState::Disconnected
    })
    .await;
    assert_eq!(manager.queue().len(), 2);

    // End of stream is not retried, but an explicit connect replays again.
    manager.connect(id).await.unwrap();
    wait_for("second replay", || manager.queue().len() == 4).await;
    assert_eq!(fake.opens(), 2);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_auto_reconnect_after_drop() {
    let flaky = FakeFactory::new(
        "flaky",
        Behavior {
            then: AfterFrames::Fail,
            ..Behavior::steady(2)
        },
    );
    let config = ManagerConfig {
        reconnect: ReconnectPolicy {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
            max_attempts: 3,
        },
        ..ManagerConfig::default()
    };
    let manager = manager_with(config, &[&flaky]);
    let id = manager
        .add_link(flaky.link("radio").with_auto_reconnect(true))
        .unwrap();

    manager.connect(id).await.unwrap();
    wait_for("reconnects", || flaky.opens() >= 3).await;
    wait_for("frames", || manager.queue().len() >= 6).await;

    manager.disconnect(id).await.unwrap();
    assert_eq!(manager.link_state(id).unwrap(), LinkState::Disconnected);

    // No retries after an explicit disconnect.
    let opens = flaky.opens();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(flaky.opens(), opens);
    assert_eq!(flaky.live_readers(), 0);
}

#[tokio::test]
async fn test_auto_reconnect_gives_up() {
    let dying = FakeFactory::new(
        "dying",
        Behavior {
            then: AfterFrames::Fail,
            successful_opens: Some(1),
            ..Behavior::steady(1)
        },
    );
    let config = ManagerConfig {
        reconnect: ReconnectPolicy {
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(10),
            max_attempts: 2,
        },
        ..ManagerConfig::default()
    };
    let manager = manager_with(config, &[&dying]);
    let id = manager
        .add_link(dying.link("vehicle").with_auto_reconnect(true))
        .unwrap();

    manager.connect(id).await.unwrap();
    wait_for("retries", || dying.opens() == 3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(dying.opens(), 3);
    assert_eq!(manager.link_state(id).unwrap(), LinkState::Disconnected);
    assert!(manager.link_summary(id).unwrap().stats.errors >= 3);
}

#[tokio::test]
async fn test_no_retry_without_auto_reconnect() {
    let flaky = FakeFactory::new(
        "flaky",
        Behavior {
            then: AfterFrames::Fail,
            ..Behavior::steady(1)
        },
    );
    let manager = manager_with(ManagerConfig::default(), &[&flaky]);
    let mut events = manager.subscribe_events();
    let id = manager.add_link(flaky.link("radio")).unwrap();

    manager.connect(id).await.unwrap();
    wait_for("drop", || {
        manager.link_state(id).unwrap() == LinkState::Disconnected
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(flaky.opens(), 1);

    let mut failed = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, LinkEvent::TransportFailed { id: failed_id, .. } if failed_id == id) {
            failed = true;
        }
    }
    assert!(failed);
}

#[tokio::test]
async fn test_registry_tracks_adds_and_removes() {
    let fake = FakeFactory::new("fake", Behavior::steady(0));
    let manager = manager_with(ManagerConfig::default(), &[&fake]);

    let a = manager.add_link(fake.link("a")).unwrap();
    let b = manager.add_link(fake.link("b")).unwrap();
    let c = manager.add_link(fake.link("c")).unwrap();
    manager.remove_link(b).await.unwrap();
    let d = manager.add_link(fake.link("d")).unwrap();

    let listed: Vec<_> = manager.enumerate_links().into_iter().map(|s| s.id).collect();
    assert_eq!(listed, vec![a, c, d]);

    let names: Vec<_> = manager
        .enumerate_links()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["a", "c", "d"]);
}
