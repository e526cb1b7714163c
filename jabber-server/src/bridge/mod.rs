//! The two-queue bridge engine
//!
//! Owns both bounded queues, the inbox, the address book, the XMPP session,
//! and the worker tasks that move traffic between them. Workers are spawned
//! on `start()`, supervised (a panicking worker is logged and restarted),
//! and explicitly joined on `stop()`.

mod incoming;
mod outgoing;
#[cfg(test)]
mod tests;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use jabber_protocol::{ErrorKind, OutboundMessage, PresenceState};

use crate::address_book::AddressBook;
use crate::config::AppConfig;
use crate::inbox::Inbox;
use crate::queue::{EnqueueError, IncomingQueue, OutboundQueues};
use crate::xmpp::client::Credentials;
use crate::xmpp::{ConnectionState, Session, XmppClient};

/// Fan-out capacity for notifications; lagging receivers lose the oldest
/// entries rather than blocking the workers.
const NOTIFY_CAPACITY: usize = 256;

/// Delivery outcome carried on notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Ack,
    Nack(ErrorKind),
}

/// Notification fanned out to the dispatcher
#[derive(Debug, Clone)]
pub enum Notification {
    InboxNew {
        uuid: Uuid,
        from: String,
        preview: String,
        ts: f64,
    },
    Presence {
        from: String,
        state: PresenceState,
    },
    Delivery {
        outbound_id: Uuid,
        outcome: DeliveryOutcome,
    },
}

/// The bridge: queues, stores, session, and workers
pub struct Bridge {
    pub(crate) incoming: Arc<IncomingQueue>,
    pub(crate) outgoing: Arc<OutboundQueues>,
    pub(crate) inbox: Arc<Inbox>,
    pub(crate) address_book: Arc<AddressBook>,
    pub(crate) session: Arc<Session>,
    notify_tx: broadcast::Sender<Notification>,
    pub(crate) cancel: CancellationToken,
    pub(crate) flush_deadline: Duration,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Bridge {
    pub fn new(
        config: &AppConfig,
        client: Arc<dyn XmppClient>,
        creds: Credentials,
        book_path: PathBuf,
    ) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let (notify_tx, _) = broadcast::channel(NOTIFY_CAPACITY);

        Arc::new(Self {
            incoming: Arc::new(IncomingQueue::new(config.queues.incoming_capacity)),
            outgoing: Arc::new(OutboundQueues::new(
                config.queues.outgoing_capacity,
                config.queues.priority_lane_capacity,
            )),
            inbox: Arc::new(Inbox::new(config.inbox.capacity)),
            address_book: AddressBook::new(book_path),
            session: Session::new(client, creds, cancel.clone()),
            notify_tx,
            cancel,
            flush_deadline: Duration::from_secs(config.queues.flush_deadline_secs),
            workers: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Load persistent state and spawn the session plus both workers.
    pub async fn start(self: Arc<Self>) {
        self.address_book.load().await;

        let session = self.session.clone();
        let incoming = self.incoming.clone();
        let session_task = tokio::spawn(session.run(incoming));

        let mut workers = self.workers.lock();
        workers.push(session_task);
        workers.push(spawn_supervised(
            "incoming-worker",
            self.clone(),
            incoming::run,
        ));
        workers.push(spawn_supervised(
            "outgoing-worker",
            self.clone(),
            outgoing::run,
        ));
        info!("bridge started");
    }

    /// Stop: cancel workers, flush outbound up to the deadline, drain
    /// incoming into the inbox, join everything, persist the address book.
    pub async fn stop(&self) {
        info!("bridge stopping");
        self.cancel.cancel();
        self.outgoing.close();
        self.incoming.close();

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                if !e.is_cancelled() {
                    error!(error = %e, "worker ended abnormally");
                }
            }
        }

        if let Err(e) = self.address_book.persist_now().await {
            warn!(error = %e, "address book save on shutdown failed");
        }
        info!(contacts = self.address_book.len().await, "bridge stopped");
    }

    /// Queue an outbound message.
    ///
    /// Returns its id for delivery correlation, or the NACK kind when the
    /// message cannot be accepted.
    pub fn enqueue_outbound(&self, msg: OutboundMessage) -> Result<Uuid, ErrorKind> {
        match self.session.state() {
            ConnectionState::Failed => return Err(ErrorKind::Disconnected),
            ConnectionState::Disconnected if self.cancel.is_cancelled() => {
                return Err(ErrorKind::Shutdown)
            }
            _ => {}
        }

        let id = msg.id;
        match self.outgoing.try_enqueue(msg) {
            Ok(()) => Ok(id),
            Err(EnqueueError::Overloaded) => Err(ErrorKind::Overloaded),
            Err(EnqueueError::Closed) => Err(ErrorKind::Shutdown),
        }
    }

    /// Subscribe to bridge notifications
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notify_tx.subscribe()
    }

    pub(crate) fn notify(&self, notification: Notification) {
        // No receivers is fine; the dispatcher may not be listening yet
        let _ = self.notify_tx.send(notification);
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn inbox(&self) -> &Arc<Inbox> {
        &self.inbox
    }

    pub fn address_book(&self) -> &Arc<AddressBook> {
        &self.address_book
    }

    /// Queue depths and capacities for the ping tool:
    /// `((incoming_len, incoming_cap), (outgoing_len, outgoing_main_cap))`
    pub fn queue_depths(&self) -> ((usize, usize), (usize, usize)) {
        (
            (self.incoming.len(), self.incoming.capacity()),
            (self.outgoing.len(), self.outgoing.main_capacity()),
        )
    }
}

/// Spawn a worker that restarts after a panic.
///
/// The offending item was already popped by the panicking iteration, so a
/// restart drops it and continues with the rest of the queue.
fn spawn_supervised(
    name: &'static str,
    bridge: Arc<Bridge>,
    worker: fn(Arc<Bridge>) -> futures::future::BoxFuture<'static, ()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let handle = tokio::spawn(worker(bridge.clone()));
            match handle.await {
                Ok(()) => break,
                Err(e) if e.is_panic() => {
                    error!(worker = name, "worker panicked, restarting");
                    if bridge.cancel.is_cancelled() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    })
}
