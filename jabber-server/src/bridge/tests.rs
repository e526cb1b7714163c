//! Bridge end-to-end tests over the in-memory transport

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast;
use uuid::Uuid;

use jabber_protocol::{
    BridgeEvent, ErrorKind, MessageType, OutboundMessage, PresenceState, Priority, RosterEntry,
};

use crate::config::AppConfig;
use crate::xmpp::client::{ClientError, Credentials, XmppEvent};
use crate::xmpp::{ConnectionState, MemoryClient};

use super::{Bridge, DeliveryOutcome, Notification};

fn config(outgoing: usize, inbox: usize) -> AppConfig {
    let mut config = AppConfig::default();
    config.queues.outgoing_capacity = outgoing;
    config.inbox.capacity = inbox;
    config.queues.flush_deadline_secs = 1;
    config
}

async fn started_bridge(config: AppConfig) -> (Arc<Bridge>, Arc<MemoryClient>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let client = MemoryClient::new();
    let bridge = Bridge::new(
        &config,
        client.clone(),
        Credentials::local(),
        dir.path().join("address_book.json"),
    );
    bridge.clone().start().await;
    wait_for_connected(&bridge).await;
    (bridge, client, dir)
}

async fn wait_for_connected(bridge: &Bridge) {
    let mut rx = bridge.session.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if matches!(
                *rx.borrow(),
                ConnectionState::Connected | ConnectionState::Degraded
            ) {
                return;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("bridge never connected");
}

async fn next_delivery(
    rx: &mut broadcast::Receiver<Notification>,
    id: Uuid,
) -> DeliveryOutcome {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Ok(Notification::Delivery {
                    outbound_id,
                    outcome,
                }) if outbound_id == id => return outcome,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("notification channel closed: {}", e),
            }
        }
    })
    .await
    .expect("no delivery notification")
}

fn medium(body: &str) -> OutboundMessage {
    OutboundMessage::new("alice@example.com", body)
}

#[tokio::test]
async fn test_happy_send() {
    let (bridge, client, _dir) = started_bridge(config(1000, 500)).await;
    let mut notifications = bridge.subscribe();

    let id = bridge.enqueue_outbound(medium("Hi")).unwrap();
    assert_eq!(
        next_delivery(&mut notifications, id).await,
        DeliveryOutcome::Ack
    );

    let sent = client.sent_stanzas();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains(r#"to="alice@example.com""#));
    assert!(sent[0].contains("<body>Hi</body>"));

    bridge.stop().await;
}

#[tokio::test]
async fn test_backpressure_eleventh_send_rejected() {
    let (bridge, client, _dir) = started_bridge(config(10, 500)).await;
    let mut notifications = bridge.subscribe();
    client.pause_sends();

    let mut ids = Vec::new();
    let mut rejected = None;
    for i in 0..11 {
        match bridge.enqueue_outbound(medium(&format!("m{}", i))) {
            Ok(id) => ids.push(id),
            Err(kind) => {
                rejected = Some((i, kind));
                break;
            }
        }
        // Let the worker pull the head message into flight
        tokio::task::yield_now().await;
    }

    assert_eq!(ids.len(), 10);
    assert_eq!(rejected, Some((10, ErrorKind::Overloaded)));

    // After unblocking, the ten accepted messages deliver in submission order
    client.resume_sends();
    for id in &ids {
        assert_eq!(
            next_delivery(&mut notifications, *id).await,
            DeliveryOutcome::Ack
        );
    }

    let bodies: Vec<String> = client
        .sent_stanzas()
        .iter()
        .map(|s| {
            s.split("<body>")
                .nth(1)
                .unwrap()
                .split("</body>")
                .next()
                .unwrap()
                .to_string()
        })
        .collect();
    let expected: Vec<String> = (0..10).map(|i| format!("m{}", i)).collect();
    assert_eq!(bodies, expected);

    bridge.stop().await;
}

#[tokio::test]
async fn test_priority_lane_overtakes_main_queue() {
    let (bridge, client, _dir) = started_bridge(config(100, 500)).await;
    let mut notifications = bridge.subscribe();
    client.pause_sends();

    // Head message goes in flight, the rest build a backlog
    let first = bridge.enqueue_outbound(medium("first")).unwrap();
    tokio::task::yield_now().await;
    bridge.enqueue_outbound(medium("second")).unwrap();
    bridge.enqueue_outbound(medium("third")).unwrap();
    let urgent = bridge
        .enqueue_outbound(
            OutboundMessage::new("ops@example.com", "urgent").with_priority(Priority::High),
        )
        .unwrap();

    client.resume_sends();
    next_delivery(&mut notifications, first).await;
    assert_eq!(
        next_delivery(&mut notifications, urgent).await,
        DeliveryOutcome::Ack
    );

    let stanzas = client.sent_stanzas();
    assert!(stanzas[0].contains("first"));
    assert!(stanzas[1].contains("urgent"));

    bridge.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_transient_send_retries_then_nacks() {
    let (bridge, client, _dir) = started_bridge(config(1000, 500)).await;
    let mut notifications = bridge.subscribe();

    // Initial attempt plus all three retries fail
    client.script_send(vec![
        Err(ClientError::Transient("reset".into())),
        Err(ClientError::Transient("reset".into())),
        Err(ClientError::Transient("reset".into())),
        Err(ClientError::Transient("reset".into())),
    ]);

    let id = bridge.enqueue_outbound(medium("persistent")).unwrap();
    assert_eq!(
        next_delivery(&mut notifications, id).await,
        DeliveryOutcome::Nack(ErrorKind::SendFailed)
    );
    assert_eq!(client.sent_count(), 4);

    // Once the failure window ages out, the session reports healthy again
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(bridge.connection_state(), ConnectionState::Connected);

    bridge.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_then_success_acks() {
    let (bridge, client, _dir) = started_bridge(config(1000, 500)).await;
    let mut notifications = bridge.subscribe();

    client.script_send(vec![Err(ClientError::Transient("blip".into()))]);

    let id = bridge.enqueue_outbound(medium("eventually")).unwrap();
    assert_eq!(
        next_delivery(&mut notifications, id).await,
        DeliveryOutcome::Ack
    );
    assert_eq!(client.sent_count(), 2);

    bridge.stop().await;
}

#[tokio::test]
async fn test_fatal_send_nacks_immediately() {
    let (bridge, client, _dir) = started_bridge(config(1000, 500)).await;
    let mut notifications = bridge.subscribe();

    client.script_send(vec![Err(ClientError::Fatal("malformed".into()))]);

    let id = bridge.enqueue_outbound(medium("bad")).unwrap();
    assert_eq!(
        next_delivery(&mut notifications, id).await,
        DeliveryOutcome::Nack(ErrorKind::SendFailed)
    );
    assert_eq!(client.sent_count(), 1);

    bridge.stop().await;
}

#[tokio::test]
async fn test_received_message_reaches_inbox_and_notifies() {
    let (bridge, client, _dir) = started_bridge(config(1000, 500)).await;
    let mut notifications = bridge.subscribe();

    client.inject(XmppEvent::Message {
        from: "bob@example.com".into(),
        body: "lunch?".into(),
        message_type: MessageType::Chat,
    });

    let notification = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(n @ Notification::InboxNew { .. }) = notifications.recv().await {
                return n;
            }
        }
    })
    .await
    .unwrap();

    match notification {
        Notification::InboxNew { uuid, from, preview, .. } => {
            assert_eq!(from, "bob@example.com");
            assert_eq!(preview, "lunch?");
            let record = bridge.inbox.get(uuid).await.unwrap();
            assert_eq!(record.body, "lunch?");
        }
        other => panic!("unexpected notification: {:?}", other),
    }

    bridge.stop().await;
}

#[tokio::test]
async fn test_inbox_eviction_end_to_end() {
    let (bridge, client, _dir) = started_bridge(config(1000, 3)).await;
    let mut notifications = bridge.subscribe();

    let mut uuids = Vec::new();
    for body in ["1", "2", "3", "4"] {
        client.inject(XmppEvent::Message {
            from: "bob@example.com".into(),
            body: body.into(),
            message_type: MessageType::Chat,
        });
        let uuid = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(Notification::InboxNew { uuid, .. }) = notifications.recv().await {
                    return uuid;
                }
            }
        })
        .await
        .unwrap();
        uuids.push(uuid);
    }

    let bodies: Vec<String> = bridge
        .inbox
        .list(None)
        .await
        .into_iter()
        .map(|r| r.body)
        .collect();
    assert_eq!(bodies, vec!["4", "3", "2"]);

    // The first message was evicted and is no longer retrievable
    assert!(bridge.inbox.get(uuids[0]).await.is_none());
    assert!(bridge.inbox.get(uuids[3]).await.is_some());

    bridge.stop().await;
}

#[tokio::test]
async fn test_roster_update_syncs_address_book() {
    let (bridge, client, _dir) = started_bridge(config(1000, 500)).await;

    client.inject(XmppEvent::RosterPush {
        entries: vec![RosterEntry {
            jid: "carol@example.com".into(),
            name: Some("Carol".into()),
        }],
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if bridge.address_book.get_exact("carol").await.is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("roster entry never synced");

    bridge.stop().await;
}

#[tokio::test]
async fn test_presence_notification_forwarded() {
    let (bridge, client, _dir) = started_bridge(config(1000, 500)).await;
    let mut notifications = bridge.subscribe();

    client.inject(XmppEvent::Presence {
        from: "bob@example.com".into(),
        state: PresenceState::Dnd,
    });

    let notification = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(n @ Notification::Presence { .. }) = notifications.recv().await {
                return n;
            }
        }
    })
    .await
    .unwrap();

    match notification {
        Notification::Presence { from, state } => {
            assert_eq!(from, "bob@example.com");
            assert_eq!(state, PresenceState::Dnd);
        }
        other => panic!("unexpected notification: {:?}", other),
    }

    bridge.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_fails_stuck_messages_with_shutdown() {
    let (bridge, client, _dir) = started_bridge(config(100, 500)).await;
    let mut notifications = bridge.subscribe();
    client.pause_sends();

    let stuck = bridge.enqueue_outbound(medium("stuck")).unwrap();
    tokio::task::yield_now().await;
    let queued = bridge.enqueue_outbound(medium("queued")).unwrap();

    bridge.stop().await;

    assert_eq!(
        next_delivery(&mut notifications, stuck).await,
        DeliveryOutcome::Nack(ErrorKind::Shutdown)
    );
    assert_eq!(
        next_delivery(&mut notifications, queued).await,
        DeliveryOutcome::Nack(ErrorKind::Shutdown)
    );
}

#[tokio::test]
async fn test_enqueue_after_stop_is_shutdown() {
    let (bridge, _client, _dir) = started_bridge(config(100, 500)).await;
    bridge.stop().await;

    assert_eq!(
        bridge.enqueue_outbound(medium("late")).unwrap_err(),
        ErrorKind::Shutdown
    );
}

#[tokio::test]
async fn test_fatal_connect_reports_disconnected_kind() {
    let dir = tempfile::tempdir().unwrap();
    let client = MemoryClient::new();
    client.script_connect(vec![Err(ClientError::Fatal("bad credentials".into()))]);
    let bridge = Bridge::new(
        &config(100, 500),
        client,
        Credentials::local(),
        dir.path().join("book.json"),
    );
    bridge.clone().start().await;

    let mut rx = bridge.session.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if *rx.borrow() == ConnectionState::Failed {
                return;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    assert_eq!(
        bridge.enqueue_outbound(medium("nope")).unwrap_err(),
        ErrorKind::Disconnected
    );

    bridge.stop().await;
}

#[tokio::test]
async fn test_stop_drains_incoming_into_inbox() {
    let (bridge, _client, _dir) = started_bridge(config(1000, 500)).await;

    // Stage events directly on the queue so nothing has consumed them yet
    bridge.cancel.cancel();
    bridge
        .incoming
        .try_push(BridgeEvent::ReceivedMessage {
            from_jid: "bob@example.com".into(),
            body: "last words".into(),
            message_type: MessageType::Chat,
            ts: 0.0,
        })
        .unwrap();

    bridge.stop().await;
    let bodies: Vec<String> = bridge
        .inbox
        .list(None)
        .await
        .into_iter()
        .map(|r| r.body)
        .collect();
    assert!(bodies.contains(&"last words".to_string()));
}
