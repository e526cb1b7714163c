//! Bridge event and message model
//!
//! The XMPP side of the bridge produces a single tagged event type that the
//! bridge workers switch on; the MCP side produces outbound messages with a
//! priority class. Both live here because they cross the queue boundary.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outbound message priority
///
/// `High` is drained through the priority lane ahead of the main queue and
/// is the last class rejected under back-pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

/// XMPP message type attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Chat,
    Normal,
    Headline,
    Groupchat,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::Chat => write!(f, "chat"),
            MessageType::Normal => write!(f, "normal"),
            MessageType::Headline => write!(f, "headline"),
            MessageType::Groupchat => write!(f, "groupchat"),
        }
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chat" => Ok(MessageType::Chat),
            "normal" => Ok(MessageType::Normal),
            "headline" => Ok(MessageType::Headline),
            "groupchat" => Ok(MessageType::Groupchat),
            _ => Err(format!("Unknown message type: {}", s)),
        }
    }
}

/// Presence state reported for a JID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Available,
    Unavailable,
    Away,
    Dnd,
    Xa,
}

impl std::fmt::Display for PresenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PresenceState::Available => write!(f, "available"),
            PresenceState::Unavailable => write!(f, "unavailable"),
            PresenceState::Away => write!(f, "away"),
            PresenceState::Dnd => write!(f, "dnd"),
            PresenceState::Xa => write!(f, "xa"),
        }
    }
}

/// A roster entry as delivered by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub jid: String,
    /// Display name, when the contact has one
    pub name: Option<String>,
}

/// A message queued for delivery to the XMPP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Stable id, used to correlate delivery acks/nacks
    pub id: Uuid,
    pub to_jid: String,
    pub body: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub priority: Priority,
    /// Retries performed so far (0 on first enqueue)
    #[serde(default)]
    pub attempts: u32,
}

impl OutboundMessage {
    pub fn new(to_jid: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            to_jid: to_jid.into(),
            body: body.into(),
            message_type: MessageType::Chat,
            priority: Priority::Medium,
            attempts: 0,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Delivery outcome kinds attached to nacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidJid,
    InvalidAlias,
    UnknownAlias,
    AmbiguousAlias,
    Overloaded,
    Disconnected,
    FatalAuth,
    SendFailed,
    NotFound,
    Timeout,
    Shutdown,
    InternalError,
}

impl ErrorKind {
    /// Wire form used in JSON-RPC `data.kind`
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidJid => "invalid_jid",
            ErrorKind::InvalidAlias => "invalid_alias",
            ErrorKind::UnknownAlias => "unknown_alias",
            ErrorKind::AmbiguousAlias => "ambiguous_alias",
            ErrorKind::Overloaded => "overloaded",
            ErrorKind::Disconnected => "disconnected",
            ErrorKind::FatalAuth => "fatal_auth",
            ErrorKind::SendFailed => "send_failed",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Shutdown => "shutdown",
            ErrorKind::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event flowing from the XMPP side into the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    ReceivedMessage {
        from_jid: String,
        body: String,
        #[serde(default)]
        message_type: MessageType,
        /// Monotonic seconds at ingestion
        ts: f64,
    },
    PresenceChanged {
        from_jid: String,
        state: PresenceState,
    },
    RosterUpdate {
        entries: Vec<RosterEntry>,
    },
    DeliveryAck {
        outbound_id: Uuid,
    },
    DeliveryNack {
        outbound_id: Uuid,
        kind: ErrorKind,
    },
}

impl BridgeEvent {
    /// Priority class used by the incoming queue's back-pressure bands.
    ///
    /// Presence churn is the only kind that is safe to shed first; delivery
    /// receipts must not be lost behind a backlog.
    pub fn priority(&self) -> Priority {
        match self {
            BridgeEvent::ReceivedMessage { .. } | BridgeEvent::RosterUpdate { .. } => {
                Priority::Medium
            }
            BridgeEvent::PresenceChanged { .. } => Priority::Low,
            BridgeEvent::DeliveryAck { .. } | BridgeEvent::DeliveryNack { .. } => Priority::High,
        }
    }
}
