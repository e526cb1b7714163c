//! In-process XMPP transport
//!
//! Implements the client capability set without a network: sends are
//! recorded, events are injected by the caller, and connect/send outcomes
//! can be scripted. `stdio` mode runs the full bridge over this transport;
//! the test suite drives every end-to-end scenario through it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use jabber_protocol::RosterEntry;

use super::client::{ClientError, Credentials, XmppClient, XmppEvent};

/// In-memory [`XmppClient`] with scriptable behavior
pub struct MemoryClient {
    sent: Mutex<Vec<String>>,
    connect_script: Mutex<VecDeque<Result<(), ClientError>>>,
    send_script: Mutex<VecDeque<Result<(), ClientError>>>,
    roster_entries: Mutex<Vec<RosterEntry>>,
    events_tx: mpsc::UnboundedSender<XmppEvent>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<XmppEvent>>,
    paused_tx: watch::Sender<bool>,
    connected: AtomicBool,
}

impl MemoryClient {
    pub fn new() -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (paused_tx, _) = watch::channel(false);
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            connect_script: Mutex::new(VecDeque::new()),
            send_script: Mutex::new(VecDeque::new()),
            roster_entries: Mutex::new(Vec::new()),
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
            paused_tx,
            connected: AtomicBool::new(false),
        })
    }

    /// Queue outcomes for upcoming `connect` calls; once the script is
    /// exhausted, connects succeed.
    pub fn script_connect(&self, outcomes: Vec<Result<(), ClientError>>) {
        self.connect_script.lock().extend(outcomes);
    }

    /// Queue outcomes for upcoming `send` calls; once the script is
    /// exhausted, sends succeed.
    pub fn script_send(&self, outcomes: Vec<Result<(), ClientError>>) {
        self.send_script.lock().extend(outcomes);
    }

    /// Stanzas handed to `send`, in call order (including failed attempts)
    pub fn sent_stanzas(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn set_roster(&self, entries: Vec<RosterEntry>) {
        *self.roster_entries.lock() = entries;
    }

    /// Inject an event as if the server produced it
    pub fn inject(&self, event: XmppEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Block `send` calls until [`Self::resume_sends`]
    pub fn pause_sends(&self) {
        let _ = self.paused_tx.send(true);
    }

    pub fn resume_sends(&self) {
        let _ = self.paused_tx.send(false);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[async_trait]
impl XmppClient for MemoryClient {
    async fn connect(&self, _creds: &Credentials) -> Result<(), ClientError> {
        let scripted = self.connect_script.lock().pop_front();
        match scripted.unwrap_or(Ok(())) {
            Ok(()) => {
                self.connected.store(true, Ordering::Release);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }

    async fn send(&self, stanza: &str) -> Result<(), ClientError> {
        // Honor the pause gate first so tests can build up a backlog
        let mut paused = self.paused_tx.subscribe();
        while *paused.borrow() {
            if paused.changed().await.is_err() {
                break;
            }
        }

        self.sent.lock().push(stanza.to_string());
        self.send_script.lock().pop_front().unwrap_or(Ok(()))
    }

    async fn roster(&self) -> Result<Vec<RosterEntry>, ClientError> {
        Ok(self.roster_entries.lock().clone())
    }

    async fn next_event(&self) -> Option<XmppEvent> {
        self.events_rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_sends() {
        let client = MemoryClient::new();
        client.send("<message/>").await.unwrap();
        assert_eq!(client.sent_stanzas(), vec!["<message/>".to_string()]);
    }

    #[tokio::test]
    async fn test_send_script_then_default_ok() {
        let client = MemoryClient::new();
        client.script_send(vec![Err(ClientError::Transient("reset".into()))]);

        assert!(client.send("a").await.is_err());
        assert!(client.send("b").await.is_ok());
        assert_eq!(client.sent_count(), 2);
    }

    #[tokio::test]
    async fn test_connect_script() {
        let client = MemoryClient::new();
        client.script_connect(vec![Err(ClientError::Fatal("bad auth".into()))]);

        let err = client.connect(&Credentials::local()).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(!client.is_connected());

        client.connect(&Credentials::local()).await.unwrap();
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_event_injection() {
        let client = MemoryClient::new();
        client.inject(XmppEvent::Disconnected {
            reason: "test".into(),
        });

        match client.next_event().await {
            Some(XmppEvent::Disconnected { reason }) => assert_eq!(reason, "test"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_paused_sends_block_until_resume() {
        let client = MemoryClient::new();
        client.pause_sends();

        let c = client.clone();
        let pending = tokio::spawn(async move { c.send("queued").await });
        tokio::task::yield_now().await;
        assert_eq!(client.sent_count(), 0);

        client.resume_sends();
        pending.await.unwrap().unwrap();
        assert_eq!(client.sent_count(), 1);
    }
}
