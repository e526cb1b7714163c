//! Outgoing worker: outbound queue → XMPP session
//!
//! Drains the priority lane ahead of the main queue, preserving FIFO within
//! each priority class. Transient send failures are retried by re-inserting
//! at the tail of the same lane after an exponential delay; retries are
//! cancel-aware and never perform the pending send once the bridge stops.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::{debug, warn};

use jabber_protocol::{ErrorKind, OutboundMessage, Priority};

use crate::queue::EnqueueError;
use crate::xmpp::client::ClientError;
use crate::xmpp::ConnectionState;

use super::{Bridge, DeliveryOutcome, Notification};

/// Retries performed after the initial failed attempt
const MAX_RETRIES: u32 = 3;
/// Delay before retry n is `RETRY_BASE * 2^n`
const RETRY_BASE: Duration = Duration::from_millis(500);
/// Low/medium sends are deferred by this much while degraded
const DEGRADED_DEFER: Duration = Duration::from_millis(250);

pub(super) fn run(bridge: Arc<Bridge>) -> BoxFuture<'static, ()> {
    Box::pin(worker_loop(bridge))
}

async fn worker_loop(bridge: Arc<Bridge>) {
    loop {
        tokio::select! {
            _ = bridge.cancel.cancelled() => break,
            msg = bridge.outgoing.pop() => match msg {
                None => break,
                Some(msg) => process(&bridge, msg).await,
            },
        }
    }
    flush(&bridge).await;
}

async fn process(bridge: &Arc<Bridge>, msg: OutboundMessage) {
    // Degraded mode: the priority lane proceeds, everything else waits
    if msg.priority != Priority::High
        && bridge.session.state() == ConnectionState::Degraded
    {
        tokio::select! {
            _ = bridge.cancel.cancelled() => {
                nack(bridge, &msg, ErrorKind::Shutdown);
                return;
            }
            _ = tokio::time::sleep(DEGRADED_DEFER) => {}
        }
    }

    let stanza = msg.to_stanza();
    let result = tokio::select! {
        _ = bridge.cancel.cancelled() => {
            nack(bridge, &msg, ErrorKind::Shutdown);
            return;
        }
        result = bridge.session.send(&stanza) => result,
    };
    match result {
        Ok(()) => {
            debug!(id = %msg.id, to = %msg.to_jid, "message delivered");
            bridge.notify(Notification::Delivery {
                outbound_id: msg.id,
                outcome: DeliveryOutcome::Ack,
            });
        }
        Err(ClientError::Fatal(reason)) => {
            warn!(id = %msg.id, reason = %reason, "send failed fatally");
            nack(bridge, &msg, ErrorKind::SendFailed);
        }
        Err(ClientError::Transient(reason)) => {
            if msg.attempts >= MAX_RETRIES {
                warn!(
                    id = %msg.id,
                    attempts = msg.attempts,
                    reason = %reason,
                    "send retries exhausted"
                );
                nack(bridge, &msg, ErrorKind::SendFailed);
            } else {
                schedule_retry(bridge, msg, &reason);
            }
        }
    }
}

/// Re-insert the message at the tail of its lane after the backoff delay.
///
/// Runs as its own task so the worker keeps draining the queue meanwhile;
/// cancellation mid-backoff skips the pending send.
fn schedule_retry(bridge: &Arc<Bridge>, mut msg: OutboundMessage, reason: &str) {
    let delay = RETRY_BASE * 2u32.saturating_pow(msg.attempts);
    msg.attempts += 1;
    debug!(
        id = %msg.id,
        attempt = msg.attempts,
        delay_ms = delay.as_millis() as u64,
        reason = %reason,
        "scheduling send retry"
    );

    let bridge = bridge.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = bridge.cancel.cancelled() => {
                nack(&bridge, &msg, ErrorKind::Shutdown);
            }
            _ = tokio::time::sleep(delay) => {
                let id = msg.id;
                let priority = msg.priority;
                match bridge.outgoing.requeue(msg) {
                    Ok(()) => {}
                    Err(EnqueueError::Closed) => {
                        bridge.notify(Notification::Delivery {
                            outbound_id: id,
                            outcome: DeliveryOutcome::Nack(ErrorKind::Shutdown),
                        });
                    }
                    Err(EnqueueError::Overloaded) => {
                        warn!(id = %id, priority = %priority, "retry dropped, queue full");
                        bridge.notify(Notification::Delivery {
                            outbound_id: id,
                            outcome: DeliveryOutcome::Nack(ErrorKind::Overloaded),
                        });
                    }
                }
            }
        }
    });
}

/// Best-effort flush after stop(): keep sending until the deadline, then
/// fail whatever is left with `shutdown`.
async fn flush(bridge: &Arc<Bridge>) {
    let deadline = Instant::now() + bridge.flush_deadline;
    let mut flushed = 0usize;

    while let Some(msg) = bridge.outgoing.try_pop() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            nack(bridge, &msg, ErrorKind::Shutdown);
            continue;
        }

        let stanza = msg.to_stanza();
        match tokio::time::timeout(remaining, bridge.session.send(&stanza)).await {
            Ok(Ok(())) => {
                flushed += 1;
                bridge.notify(Notification::Delivery {
                    outbound_id: msg.id,
                    outcome: DeliveryOutcome::Ack,
                });
            }
            Ok(Err(_)) | Err(_) => nack(bridge, &msg, ErrorKind::Shutdown),
        }
    }

    if flushed > 0 {
        debug!(count = flushed, "flushed outbound messages at shutdown");
    }
}

fn nack(bridge: &Bridge, msg: &OutboundMessage, kind: ErrorKind) {
    bridge.notify(Notification::Delivery {
        outbound_id: msg.id,
        outcome: DeliveryOutcome::Nack(kind),
    });
}
