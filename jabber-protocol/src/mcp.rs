//! MCP protocol surface types
//!
//! Tool definitions, tool call results, and the initialize handshake shapes
//! announced to MCP clients.

use serde::{Deserialize, Serialize};

/// MCP protocol version announced in `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// MCP Tool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name (e.g., "send_xmpp_message")
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema for input parameters
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// MCP Tool call result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Content blocks returned by the tool
    pub content: Vec<ToolContent>,
    /// Whether this result represents an error
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    /// Structured fields alongside the content blocks (messages, matches, …)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ToolResult {
    /// Create a text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Attach a structured field next to the content blocks
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// MCP Tool content types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    /// Text content
    #[serde(rename = "text")]
    Text {
        /// The text content
        text: String,
    },
}

/// MCP Server capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Tool capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: Some(ToolsCapability::default()),
        }
    }
}

impl ServerCapabilities {
    /// Capabilities announcing the given tool definitions
    pub fn announcing(tools: &[Tool]) -> Self {
        Self {
            tools: Some(ToolsCapability::announcing(tools)),
        }
    }
}

/// Tool capability announcement: tool name → {description, inputSchema}
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsCapability {
    #[serde(flatten)]
    pub tools: serde_json::Map<String, serde_json::Value>,
}

impl ToolsCapability {
    pub fn announcing(tools: &[Tool]) -> Self {
        let mut map = serde_json::Map::new();
        for tool in tools {
            map.insert(
                tool.name.clone(),
                serde_json::json!({
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                }),
            );
        }
        Self { tools: map }
    }
}

/// MCP Server information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name
    pub name: String,
    /// Server version
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "jabber-server".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// Initialize response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Protocol version
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server capabilities
    pub capabilities: ServerCapabilities,
    /// Server info
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

impl Default for InitializeResult {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: ServerCapabilities::default(),
            server_info: ServerInfo::default(),
        }
    }
}

/// Tools list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    /// Available tools
    pub tools: Vec<Tool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_text() {
        let result = ToolResult::text("Hello, world!");
        assert!(result.is_error.is_none());
        assert_eq!(result.content.len(), 1);
    }

    #[test]
    fn test_tool_result_with_field() {
        let result =
            ToolResult::text("ok").with_field("status", serde_json::json!("updated"));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "updated");
        assert_eq!(json["content"][0]["type"], "text");
    }

    #[test]
    fn test_initialize_result_serialization() {
        let result = InitializeResult::default();
        let json = serde_json::to_string(&result).unwrap();

        assert!(json.contains("protocolVersion"));
        assert!(json.contains(PROTOCOL_VERSION));
        assert!(json.contains("jabber-server"));
    }

    #[test]
    fn test_capabilities_announce_tools() {
        let tool = Tool {
            name: "ping".into(),
            description: "Ping".into(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        };
        let caps = ServerCapabilities::announcing(&[tool]);
        let json = serde_json::to_value(&caps).unwrap();
        assert_eq!(json["tools"]["ping"]["description"], "Ping");
        assert_eq!(json["tools"]["ping"]["inputSchema"]["type"], "object");
    }

    #[test]
    fn test_tool_definition() {
        let tool = Tool {
            name: "ping".into(),
            description: "Ping the XMPP connection".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
        };

        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("inputSchema"));
    }
}
