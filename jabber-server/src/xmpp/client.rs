//! XMPP client capability set
//!
//! The bridge consumes exactly this surface: connect/disconnect, stanza
//! send, roster fetch, and a stream of parsed events. Errors are split into
//! transient (retry) and fatal (give up) because that distinction drives
//! both the reconnect state machine and the outbound retry policy.

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::XmppConfig;
use jabber_protocol::{MessageType, PresenceState, RosterEntry};

/// Failure reported by the wire client
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Worth retrying: network hiccup, stream reset, server busy
    #[error("transient error: {0}")]
    Transient(String),

    /// Not worth retrying: bad credentials, malformed config
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl ClientError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::Fatal(_))
    }
}

/// Account credentials plus optional server override
#[derive(Debug, Clone)]
pub struct Credentials {
    pub jid: String,
    pub password: String,
    pub server: Option<String>,
    pub port: Option<u16>,
}

impl Credentials {
    pub fn from_env(xmpp: &XmppConfig) -> Option<Self> {
        let jid = std::env::var("XMPP_USER").ok().filter(|s| !s.is_empty())?;
        let password = std::env::var("XMPP_PASSWORD")
            .ok()
            .filter(|s| !s.is_empty())?;
        Some(Self {
            jid,
            password,
            server: xmpp.server.clone(),
            port: xmpp.port,
        })
    }

    /// Credentials for the in-process transport (no account involved)
    pub fn local() -> Self {
        Self {
            jid: "local@bridge".into(),
            password: String::new(),
            server: None,
            port: None,
        }
    }
}

/// Parsed event delivered by the wire client
#[derive(Debug, Clone)]
pub enum XmppEvent {
    /// Incoming message stanza; `body` is the raw XML text content
    Message {
        from: String,
        body: String,
        message_type: MessageType,
    },
    /// Presence change for a contact
    Presence { from: String, state: PresenceState },
    /// Server pushed a roster change
    RosterPush { entries: Vec<RosterEntry> },
    /// Delivery receipt for an outbound message
    Receipt { outbound_id: Uuid, delivered: bool },
    /// The stream dropped; the session decides whether to reconnect
    Disconnected { reason: String },
}

/// Capability set the bridge requires from an XMPP implementation
#[async_trait]
pub trait XmppClient: Send + Sync {
    async fn connect(&self, creds: &Credentials) -> Result<(), ClientError>;

    async fn disconnect(&self);

    /// Deliver one wire-format stanza
    async fn send(&self, stanza: &str) -> Result<(), ClientError>;

    /// Fetch the server-held roster
    async fn roster(&self) -> Result<Vec<RosterEntry>, ClientError>;

    /// Next parsed event; `None` when the client is finished for good
    async fn next_event(&self) -> Option<XmppEvent>;
}
