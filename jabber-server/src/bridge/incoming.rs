//! Incoming worker: XMPP events → inbox / address book / notifications

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use jabber_protocol::{BridgeEvent, ReceivedMessage};

use super::{Bridge, DeliveryOutcome, Notification};

/// Notification body previews are capped at this many characters
const PREVIEW_LEN: usize = 100;

pub(super) fn run(bridge: Arc<Bridge>) -> BoxFuture<'static, ()> {
    Box::pin(worker_loop(bridge))
}

async fn worker_loop(bridge: Arc<Bridge>) {
    loop {
        tokio::select! {
            _ = bridge.cancel.cancelled() => break,
            event = bridge.incoming.pop() => match event {
                None => break,
                Some(event) => handle_event(&bridge, event).await,
            },
        }
    }

    // Shutdown: drain whatever already arrived into the inbox, without
    // blocking on anything.
    let mut drained = 0usize;
    while let Some(event) = bridge.incoming.try_pop() {
        if let BridgeEvent::ReceivedMessage {
            from_jid,
            body,
            message_type,
            ts,
        } = event
        {
            let msg = ReceivedMessage {
                from_jid,
                body,
                message_type,
                ts,
            };
            if bridge.inbox.append(&msg).await.is_some() {
                drained += 1;
            }
        }
    }
    if drained > 0 {
        debug!(count = drained, "drained incoming events into inbox at shutdown");
    }
}

async fn handle_event(bridge: &Bridge, event: BridgeEvent) {
    match event {
        BridgeEvent::ReceivedMessage {
            from_jid,
            body,
            message_type,
            ts,
        } => {
            let msg = ReceivedMessage {
                from_jid,
                body,
                message_type,
                ts,
            };
            match bridge.inbox.append(&msg).await {
                Some(uuid) => {
                    debug!(uuid = %uuid, from = %msg.from_jid, "message added to inbox");
                    bridge.notify(Notification::InboxNew {
                        uuid,
                        from: msg.from_jid,
                        preview: truncate(&msg.body, PREVIEW_LEN),
                        ts: msg.ts,
                    });
                }
                None => warn!(from = %msg.from_jid, "inbox refused message"),
            }
        }
        BridgeEvent::RosterUpdate { entries } => {
            let stats = bridge.address_book.sync_roster(&entries).await;
            debug!(added = stats.added, skipped = stats.skipped, "roster synced");
        }
        BridgeEvent::PresenceChanged { from_jid, state } => {
            bridge.notify(Notification::Presence {
                from: from_jid,
                state,
            });
        }
        BridgeEvent::DeliveryAck { outbound_id } => {
            bridge.notify(Notification::Delivery {
                outbound_id,
                outcome: DeliveryOutcome::Ack,
            });
        }
        BridgeEvent::DeliveryNack { outbound_id, kind } => {
            bridge.notify(Notification::Delivery {
                outbound_id,
                outcome: DeliveryOutcome::Nack(kind),
            });
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 3), "hél");
        assert_eq!(truncate("short", 100), "short");
    }
}
