//! Configuration schema structs

use serde::{Deserialize, Serialize};

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub queues: QueueConfig,
    pub inbox: InboxConfig,
    pub xmpp: XmppConfig,
    pub address_book: AddressBookConfig,
}

/// Bridge queue sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Capacity of the incoming (XMPP → bridge) queue
    pub incoming_capacity: usize,
    /// Capacity of the outgoing (bridge → XMPP) queue
    pub outgoing_capacity: usize,
    /// Capacity of the high-priority outbound lane
    pub priority_lane_capacity: usize,
    /// Seconds the outgoing worker may keep flushing after stop()
    pub flush_deadline_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            incoming_capacity: 1000,
            outgoing_capacity: 1000,
            priority_lane_capacity: 100,
            flush_deadline_secs: 5,
        }
    }
}

/// Inbox sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InboxConfig {
    /// Maximum retained messages; the oldest is evicted on overflow
    pub capacity: usize,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self { capacity: 500 }
    }
}

/// XMPP account settings
///
/// Credentials come from `XMPP_USER` / `XMPP_PASSWORD`; the file carries
/// only the optional server override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct XmppConfig {
    /// Server host override (otherwise derived from the JID domain)
    pub server: Option<String>,
    /// Server port override
    pub port: Option<u16>,
}

/// Address book storage settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressBookConfig {
    /// Storage file override (default: XDG data dir / address_book.json)
    pub path: Option<String>,
}
