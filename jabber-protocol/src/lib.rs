//! Wire-visible types for the jabber bridge
//!
//! The bridge speaks two protocols: line-delimited JSON-RPC 2.0 (MCP) on one
//! side and XMPP stanzas on the other. This crate holds the types that cross
//! either boundary, plus the pure conversion functions between them. No I/O
//! lives here.

pub mod event;
pub mod jsonrpc;
pub mod mcp;
pub mod stanza;

pub use event::{
    BridgeEvent, ErrorKind, MessageType, OutboundMessage, PresenceState, Priority, RosterEntry,
};
pub use jsonrpc::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
pub use mcp::{
    InitializeResult, ServerCapabilities, ServerInfo, Tool, ToolContent, ToolResult,
    ToolsListResult, PROTOCOL_VERSION,
};
pub use stanza::{
    send_payload_to_outbound, xml_escape, xml_unescape, ConvertError, ReceivedMessage,
};
