//! Connection state machine
//!
//! Wraps an [`XmppClient`] in the session lifecycle: connect with
//! exponential backoff, roster fetch on connect, event pumping into the
//! incoming queue, reconnection on transient failure, terminal failure on
//! fatal errors. All state transitions happen on the supervisor task; other
//! tasks read the state through a `watch` channel snapshot.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use jabber_protocol::{BridgeEvent, ErrorKind, ReceivedMessage};
use jabber_utils::monotonic_ts;

use crate::queue::IncomingQueue;

use super::client::{ClientError, Credentials, XmppClient, XmppEvent};

/// Reconnect backoff base; delay is `base * 2^attempt + jitter(0..base)`
const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Reconnect backoff ceiling
const BACKOFF_CAP: Duration = Duration::from_secs(60);
/// Sliding window for send-health evaluation
const HEALTH_WINDOW: Duration = Duration::from_secs(30);
/// Failure rate above which the session degrades
const DEGRADED_THRESHOLD: f64 = 0.5;
/// Minimum samples before the window is meaningful
const HEALTH_MIN_SAMPLES: usize = 4;
/// How often the supervisor re-evaluates send health
const HEALTH_TICK: Duration = Duration::from_secs(1);

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not yet started, or cleanly stopped
    Disconnected,
    Connecting,
    Connected,
    /// Connected but shedding low/medium sends (failure rate > 50% over 30s)
    Degraded,
    Reconnecting { attempt: u32 },
    /// Terminal: fatal error (bad credentials); no further retries
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Degraded => write!(f, "degraded"),
            ConnectionState::Reconnecting { .. } => write!(f, "reconnecting"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

/// Sliding window of send outcomes
struct SendHealth {
    window: parking_lot::Mutex<VecDeque<(Instant, bool)>>,
}

impl SendHealth {
    fn new() -> Self {
        Self {
            window: parking_lot::Mutex::new(VecDeque::new()),
        }
    }

    fn record(&self, ok: bool) {
        let mut window = self.window.lock();
        let now = Instant::now();
        window.push_back((now, ok));
        Self::prune(&mut window, now);
    }

    fn failure_rate(&self) -> f64 {
        let mut window = self.window.lock();
        Self::prune(&mut window, Instant::now());
        if window.len() < HEALTH_MIN_SAMPLES {
            return 0.0;
        }
        let failures = window.iter().filter(|(_, ok)| !ok).count();
        failures as f64 / window.len() as f64
    }

    fn prune(window: &mut VecDeque<(Instant, bool)>, now: Instant) {
        while let Some((t, _)) = window.front() {
            if now.duration_since(*t) > HEALTH_WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Session over an XMPP client: owns the connection lifecycle
pub struct Session {
    client: Arc<dyn XmppClient>,
    creds: Credentials,
    state_tx: watch::Sender<ConnectionState>,
    health: SendHealth,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(
        client: Arc<dyn XmppClient>,
        creds: Credentials,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            client,
            creds,
            state_tx,
            health: SendHealth::new(),
            cancel,
        })
    }

    /// Current state snapshot
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch for state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Send a stanza, feeding the result into the health window.
    pub async fn send(&self, stanza: &str) -> Result<(), ClientError> {
        let result = self.client.send(stanza).await;
        self.health.record(result.is_ok());
        result
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = *self.state_tx.borrow();
        if previous != state {
            debug!(from = %previous, to = %state, "connection state change");
        }
        self.state_tx.send_replace(state);
    }

    /// Run the connection lifecycle until cancelled or a fatal error.
    ///
    /// Incoming client events are mapped to [`BridgeEvent`]s and offered to
    /// the incoming queue; back-pressure rejections are logged and dropped.
    pub async fn run(self: Arc<Self>, incoming: Arc<IncomingQueue>) {
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.set_state(if attempt == 0 {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting { attempt }
            });

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.client.connect(&self.creds) => result,
            };

            match connected {
                Ok(()) => {
                    info!("xmpp session established");
                    attempt = 0;
                    self.set_state(ConnectionState::Connected);
                    self.fetch_roster(&incoming).await;

                    // Pump events until the stream drops or we are stopped
                    if self.pump_events(&incoming).await {
                        break;
                    }
                    self.set_state(ConnectionState::Reconnecting { attempt: 0 });
                    attempt = 1;
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff_delay(0)) => {}
                    }
                }
                Err(ClientError::Fatal(reason)) => {
                    error!(reason = %reason, "fatal connection error, giving up");
                    self.set_state(ConnectionState::Failed);
                    return;
                }
                Err(ClientError::Transient(reason)) => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        reason = %reason,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "connection failed, retrying"
                    );
                    attempt = attempt.saturating_add(1);
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.client.disconnect().await;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Returns true when the session should stop for good.
    async fn pump_events(&self, incoming: &IncomingQueue) -> bool {
        let mut tick = tokio::time::interval(HEALTH_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return true,
                _ = tick.tick() => self.evaluate_health(),
                event = self.client.next_event() => match event {
                    None => {
                        warn!("event stream ended");
                        return false;
                    }
                    Some(XmppEvent::Disconnected { reason }) => {
                        warn!(reason = %reason, "stream disconnected");
                        return false;
                    }
                    Some(event) => self.route_event(event, incoming),
                },
            }
        }
    }

    fn evaluate_health(&self) {
        let rate = self.health.failure_rate();
        match self.state() {
            ConnectionState::Connected if rate > DEGRADED_THRESHOLD => {
                warn!(failure_rate = rate, "send failure rate high, degrading");
                self.set_state(ConnectionState::Degraded);
            }
            ConnectionState::Degraded if rate <= DEGRADED_THRESHOLD => {
                info!(failure_rate = rate, "send health recovered");
                self.set_state(ConnectionState::Connected);
            }
            _ => {}
        }
    }

    fn route_event(&self, event: XmppEvent, incoming: &IncomingQueue) {
        let bridge_event = match event {
            XmppEvent::Message {
                from,
                body,
                message_type,
            } => {
                let msg = ReceivedMessage::from_stanza(from, &body, message_type, monotonic_ts());
                BridgeEvent::ReceivedMessage {
                    from_jid: msg.from_jid,
                    body: msg.body,
                    message_type: msg.message_type,
                    ts: msg.ts,
                }
            }
            XmppEvent::Presence { from, state } => BridgeEvent::PresenceChanged {
                from_jid: from,
                state,
            },
            XmppEvent::RosterPush { entries } => BridgeEvent::RosterUpdate { entries },
            XmppEvent::Receipt {
                outbound_id,
                delivered: true,
            } => BridgeEvent::DeliveryAck { outbound_id },
            XmppEvent::Receipt {
                outbound_id,
                delivered: false,
            } => BridgeEvent::DeliveryNack {
                outbound_id,
                kind: ErrorKind::SendFailed,
            },
            XmppEvent::Disconnected { .. } => unreachable!("handled by pump_events"),
        };

        if let Err(e) = incoming.try_push(bridge_event) {
            warn!(error = ?e, "incoming queue rejected event");
        }
    }

    async fn fetch_roster(&self, incoming: &IncomingQueue) {
        match self.client.roster().await {
            Ok(entries) if entries.is_empty() => {
                debug!("roster empty, nothing to sync");
            }
            Ok(entries) => {
                info!(count = entries.len(), "roster fetched");
                if let Err(e) = incoming.try_push(BridgeEvent::RosterUpdate { entries }) {
                    warn!(error = ?e, "incoming queue rejected roster update");
                }
            }
            // The session stays up even if the roster fetch fails
            Err(e) => warn!(error = %e, "roster fetch failed"),
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE
        .checked_mul(2u32.saturating_pow(attempt.min(6)))
        .unwrap_or(BACKOFF_CAP);
    let jitter = Duration::from_millis(
        rand::thread_rng().gen_range(0..BACKOFF_BASE.as_millis() as u64),
    );
    (exp + jitter).min(BACKOFF_CAP)
}
