//! XMPP side of the bridge
//!
//! The wire protocol library is an external collaborator; the bridge only
//! depends on the small capability set in [`client`]. [`session`] wraps a
//! client in the connection/retry state machine; [`memory`] is the
//! in-process transport used by tests and `stdio` mode.

pub mod client;
pub mod memory;
pub mod session;

pub use client::{ClientError, XmppClient, XmppEvent};
pub use memory::MemoryClient;
pub use session::{ConnectionState, Session};
