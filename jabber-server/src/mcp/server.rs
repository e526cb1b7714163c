//! MCP stdio server
//!
//! Reads one JSON-RPC message per line from stdin, writes single-line
//! responses and server-initiated notifications (`inbox/new`,
//! `presence/update`, `delivery/update`) to stdout through a single writer
//! task. Every tool call is answered within the ACK deadline; exceeding it
//! yields a NACK with kind `timeout`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use jabber_protocol::{
    ErrorKind, InitializeResult, JsonRpcError, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, ToolsListResult,
};
use jabber_utils::Result;

use crate::bridge::{Bridge, DeliveryOutcome, Notification};

use super::error::McpError;
use super::handlers::ToolContext;
use super::tools::get_tool_definitions;

/// Soft deadline for a tool call to produce its ACK/NACK
const ACK_DEADLINE: Duration = Duration::from_secs(2);

/// MCP server over the bridge
pub struct McpServer {
    ctx: ToolContext,
    bridge: Arc<Bridge>,
}

impl McpServer {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self {
            ctx: ToolContext::new(bridge.clone()),
            bridge,
        }
    }

    /// Run until stdin closes.
    pub async fn run(&self) -> Result<()> {
        info!("mcp server starting");

        let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(write_loop(out_rx));
        let notifier = tokio::spawn(notification_loop(
            self.bridge.subscribe(),
            out_tx.clone(),
        ));

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.process_line(&line).await {
                if out_tx.send(response).is_err() {
                    break;
                }
            }
        }

        notifier.abort();
        drop(out_tx);
        let _ = writer.await;

        info!("mcp server stopped");
        Ok(())
    }

    /// Parse and dispatch one line; `None` when no response is due.
    pub async fn process_line(&self, line: &str) -> Option<String> {
        debug!(line = %line, "request");

        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                let response = JsonRpcResponse::error(
                    serde_json::Value::Null,
                    JsonRpcError::with_data(
                        JsonRpcError::PARSE_ERROR,
                        "Parse error",
                        json!(e.to_string()),
                    ),
                );
                return serde_json::to_string(&response).ok();
            }
        };

        if request.jsonrpc != "2.0" {
            let response = JsonRpcResponse::error(
                request.id,
                JsonRpcError::with_data(
                    JsonRpcError::INVALID_REQUEST,
                    "Invalid JSON-RPC version",
                    json!({"expected": "2.0", "got": request.jsonrpc}),
                ),
            );
            return serde_json::to_string(&response).ok();
        }

        let is_notification = request.is_notification();
        let id = request.id.clone();
        let result = self.handle_request(request).await;

        // Notifications never get a response, success or failure
        if is_notification {
            if let Err(e) = result {
                warn!(error = %e, "notification handling failed");
            }
            return None;
        }

        let response = match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::error(id, e.into()),
        };
        serde_json::to_string(&response).ok()
    }

    async fn handle_request(
        &self,
        request: JsonRpcRequest,
    ) -> std::result::Result<serde_json::Value, McpError> {
        match request.method.as_str() {
            "initialize" => {
                if let Some(version) = request
                    .params
                    .get("protocolVersion")
                    .and_then(|v| v.as_str())
                {
                    if version != jabber_protocol::PROTOCOL_VERSION {
                        warn!(client_version = version, "unknown client protocol version");
                    }
                }
                info!("mcp client initializing");
                let result = InitializeResult {
                    capabilities: jabber_protocol::ServerCapabilities::announcing(
                        &get_tool_definitions(),
                    ),
                    ..InitializeResult::default()
                };
                serde_json::to_value(result).map_err(McpError::Json)
            }
            "initialized" => Ok(json!({})),
            "tools/list" => {
                let result = ToolsListResult {
                    tools: get_tool_definitions(),
                };
                serde_json::to_value(result).map_err(McpError::Json)
            }
            "tools/call" => {
                let name = request
                    .params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        McpError::InvalidParams("Missing 'name' parameter".into())
                    })?;
                let arguments = request
                    .params
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                self.call_tool(name, &arguments).await
            }
            // The inbox and address book tools double as direct methods
            "ping" | "inbox/list" | "inbox/get" | "inbox/clear" | "address_book/save"
            | "address_book/query" => {
                let method = request.method.clone();
                self.call_tool(&method, &request.params).await
            }
            other => Err(McpError::MethodNotFound(other.into())),
        }
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: &serde_json::Value,
    ) -> std::result::Result<serde_json::Value, McpError> {
        let result = tokio::time::timeout(ACK_DEADLINE, self.ctx.dispatch_tool(name, arguments))
            .await
            .map_err(|_| {
                warn!(tool = name, "tool call exceeded ACK deadline");
                McpError::app(ErrorKind::Timeout, "Tool call deadline exceeded")
            })??;
        serde_json::to_value(result).map_err(McpError::Json)
    }
}

async fn write_loop(mut rx: mpsc::UnboundedReceiver<String>) {
    let mut stdout = tokio::io::stdout();
    while let Some(line) = rx.recv().await {
        debug!(line = %line, "response");
        if stdout.write_all(line.as_bytes()).await.is_err() {
            break;
        }
        if stdout.write_all(b"\n").await.is_err() {
            break;
        }
        if stdout.flush().await.is_err() {
            break;
        }
    }
}

async fn notification_loop(
    mut rx: tokio::sync::broadcast::Receiver<Notification>,
    out_tx: mpsc::UnboundedSender<String>,
) {
    loop {
        let notification = match rx.recv().await {
            Ok(n) => n,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed = missed, "notification fan-out lagged, oldest dropped");
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };

        let frame = match notification {
            Notification::InboxNew {
                uuid,
                from,
                preview,
                ts,
            } => JsonRpcNotification::new(
                "inbox/new",
                json!({"id": uuid.to_string(), "from": from, "body": preview, "ts": ts}),
            ),
            Notification::Presence { from, state } => JsonRpcNotification::new(
                "presence/update",
                json!({"from": from, "state": state.to_string()}),
            ),
            Notification::Delivery {
                outbound_id,
                outcome,
            } => {
                let params = match outcome {
                    DeliveryOutcome::Ack => {
                        json!({"id": outbound_id.to_string(), "status": "ack"})
                    }
                    DeliveryOutcome::Nack(kind) => json!({
                        "id": outbound_id.to_string(),
                        "status": "nack",
                        "kind": kind.as_str(),
                    }),
                };
                JsonRpcNotification::new("delivery/update", params)
            }
        };

        match serde_json::to_string(&frame) {
            Ok(line) => {
                if out_tx.send(line).is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::config::AppConfig;
    use crate::xmpp::client::Credentials;
    use crate::xmpp::{ConnectionState, MemoryClient};

    async fn server() -> (McpServer, Arc<Bridge>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let client = MemoryClient::new();
        let bridge = Bridge::new(
            &AppConfig::default(),
            client,
            Credentials::local(),
            dir.path().join("book.json"),
        );
        bridge.clone().start().await;

        let mut rx = bridge.session.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if *rx.borrow() == ConnectionState::Connected {
                    return;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        (McpServer::new(bridge.clone()), bridge, dir)
    }

    async fn roundtrip(server: &McpServer, line: &str) -> serde_json::Value {
        let response = server.process_line(line).await.expect("expected response");
        serde_json::from_str(&response).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_handshake() {
        let (server, bridge, _dir) = server().await;

        let response = roundtrip(
            &server,
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
        )
        .await;
        assert_eq!(response["result"]["protocolVersion"], "2024-11-05");
        let tools = &response["result"]["capabilities"]["tools"];
        assert!(tools["send_xmpp_message"]["inputSchema"].is_object());
        assert!(tools["inbox/list"]["description"].is_string());

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_tools_list() {
        let (server, bridge, _dir) = server().await;

        let response = roundtrip(
            &server,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
        )
        .await;
        let tools = response["result"]["tools"].as_array().unwrap();
        assert!(tools.iter().any(|t| t["name"] == "send_xmpp_message"));

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_parse_error_response() {
        let (server, bridge, _dir) = server().await;

        let response = roundtrip(&server, "{not json").await;
        assert_eq!(response["error"]["code"], -32700);
        assert!(response["id"].is_null());

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_version_rejected() {
        let (server, bridge, _dir) = server().await;

        let response = roundtrip(
            &server,
            r#"{"jsonrpc":"1.0","id":3,"method":"ping"}"#,
        )
        .await;
        assert_eq!(response["error"]["code"], -32600);

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_method_not_found() {
        let (server, bridge, _dir) = server().await;

        let response = roundtrip(
            &server,
            r#"{"jsonrpc":"2.0","id":4,"method":"no/such/method"}"#,
        )
        .await;
        assert_eq!(response["error"]["code"], -32601);

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_notification_gets_no_response() {
        let (server, bridge, _dir) = server().await;

        let response = server
            .process_line(r#"{"jsonrpc":"2.0","method":"initialized"}"#)
            .await;
        assert!(response.is_none());

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_tools_call_send_and_direct_method_parity() {
        let (server, bridge, _dir) = server().await;

        // Through tools/call
        let response = roundtrip(
            &server,
            r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"address_book/save","arguments":{"alias":"alice","jid":"alice@example.com"}}}"#,
        )
        .await;
        assert_eq!(response["result"]["status"], "updated");

        // Same tool as a bare method
        let response = roundtrip(
            &server,
            r#"{"jsonrpc":"2.0","id":6,"method":"address_book/query","params":{"term":"alice"}}"#,
        )
        .await;
        assert_eq!(response["result"]["matches"][0]["jid"], "alice@example.com");

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_tools_call_unknown_tool() {
        let (server, bridge, _dir) = server().await;

        let response = roundtrip(
            &server,
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"make_coffee","arguments":{}}}"#,
        )
        .await;
        assert_eq!(response["error"]["code"], -32601);

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_app_error_kind_on_wire() {
        let (server, bridge, _dir) = server().await;

        let response = roundtrip(
            &server,
            r#"{"jsonrpc":"2.0","id":8,"method":"tools/call","params":{"name":"send_xmpp_message","arguments":{"recipient":"ghost","message":"boo"}}}"#,
        )
        .await;
        assert_eq!(response["error"]["code"], -32603);
        assert_eq!(response["error"]["data"]["kind"], "unknown_alias");

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_missing_tool_name_is_invalid_params() {
        let (server, bridge, _dir) = server().await;

        let response = roundtrip(
            &server,
            r#"{"jsonrpc":"2.0","id":9,"method":"tools/call","params":{}}"#,
        )
        .await;
        assert_eq!(response["error"]["code"], -32602);

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_ping_direct_method() {
        let (server, bridge, _dir) = server().await;

        let response =
            roundtrip(&server, r#"{"jsonrpc":"2.0","id":10,"method":"ping"}"#).await;
        assert_eq!(response["result"]["pong"], true);
        assert_eq!(response["result"]["connection_state"], "connected");

        bridge.stop().await;
    }
}
