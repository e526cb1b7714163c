//! Tool execution against the bridge

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use jabber_protocol::{send_payload_to_outbound, ErrorKind, ToolResult};

use crate::address_book::{is_valid_jid, ResolveError, SaveOutcome};
use crate::bridge::Bridge;
use jabber_utils::BridgeError;

use super::error::McpError;
use super::tools::is_known_tool;

/// Inbox list previews are capped at this many characters
const LIST_PREVIEW_LEN: usize = 50;

/// Executes tool calls against the bridge
pub struct ToolContext {
    bridge: Arc<Bridge>,
}

impl ToolContext {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }

    /// Route a tool call by name.
    ///
    /// Returns `Err(McpError)` for protocol-level problems (unknown tool,
    /// invalid params) and for application NACKs (which carry a `data.kind`).
    pub async fn dispatch_tool(
        &self,
        name: &str,
        arguments: &serde_json::Value,
    ) -> Result<ToolResult, McpError> {
        if !is_known_tool(name) {
            return Err(McpError::UnknownTool(name.into()));
        }

        debug!(tool = name, "tool call");
        match name {
            "send_xmpp_message" => self.send_message(arguments).await,
            "ping" => self.ping().await,
            "inbox/list" => self.inbox_list(arguments).await,
            "inbox/get" => self.inbox_get(arguments).await,
            "inbox/clear" => self.inbox_clear().await,
            "address_book/save" => self.book_save(arguments).await,
            "address_book/query" => self.book_query(arguments).await,
            _ => unreachable!("validated above"),
        }
    }

    async fn send_message(&self, args: &serde_json::Value) -> Result<ToolResult, McpError> {
        let recipient = require_str(args, "recipient")?;
        let message = require_str(args, "message")?;

        // A recipient containing '@' is a JID; anything else is an alias
        let jid = if recipient.contains('@') {
            if !is_valid_jid(recipient) {
                return Err(McpError::app(
                    ErrorKind::InvalidJid,
                    format!("Invalid JID: '{}'", recipient),
                ));
            }
            recipient.to_lowercase()
        } else {
            self.resolve_alias(recipient).await?
        };

        let outbound = send_payload_to_outbound(&json!({"jid": jid, "body": message}))
            .map_err(|e| McpError::InvalidParams(e.to_string()))?;
        let id = self
            .bridge
            .enqueue_outbound(outbound)
            .map_err(|kind| nack_error(kind, &jid))?;

        info!(id = %id, to = %jid, "message queued");
        let text = if recipient.contains('@') {
            format!("Message queued for delivery to {}", jid)
        } else {
            format!(
                "Message queued for delivery to {} (resolved from '{}')",
                jid, recipient
            )
        };
        Ok(ToolResult::text(text)
            .with_field("status", json!("queued"))
            .with_field("id", json!(id.to_string()))
            .with_field("recipient", json!(jid)))
    }

    async fn resolve_alias(&self, alias: &str) -> Result<String, McpError> {
        match self.bridge.address_book().resolve(alias).await {
            Ok(jid) => {
                debug!(alias = %alias, jid = %jid, "alias resolved");
                Ok(jid)
            }
            Err(ResolveError::NotFound) => Err(McpError::app(
                ErrorKind::UnknownAlias,
                format!("No matches found for alias '{}' in address book", alias),
            )),
            Err(ResolveError::Ambiguous(candidates)) => {
                let listing = candidates
                    .iter()
                    .map(|c| format!("  {} -> {} (score: {})", c.alias, c.jid, c.score))
                    .collect::<Vec<_>>()
                    .join("\n");
                Err(McpError::app_with_data(
                    ErrorKind::AmbiguousAlias,
                    format!(
                        "Ambiguous alias '{}'. Multiple matches found:\n{}\nUse the exact alias or JID.",
                        alias, listing
                    ),
                    json!({ "candidates": candidates }),
                ))
            }
        }
    }

    async fn ping(&self) -> Result<ToolResult, McpError> {
        let state = self.bridge.connection_state();
        let inbox = self.bridge.inbox().stats().await;
        let ((in_len, in_cap), (out_len, out_cap)) = self.bridge.queue_depths();

        Ok(
            ToolResult::text(format!("PONG! XMPP connection state: {}", state))
                .with_field("pong", json!(true))
                .with_field("connection_state", json!(state.to_string()))
                .with_field(
                    "inbox",
                    json!({
                        "total": inbox.total,
                        "capacity": inbox.capacity,
                        "utilization_percent": inbox.utilization_percent,
                    }),
                )
                .with_field(
                    "queues",
                    json!({
                        "incoming": { "depth": in_len, "capacity": in_cap },
                        "outgoing": { "depth": out_len, "capacity": out_cap },
                    }),
                ),
        )
    }

    async fn inbox_list(&self, args: &serde_json::Value) -> Result<ToolResult, McpError> {
        let limit = args.get("limit").and_then(|v| v.as_u64()).map(|n| n as usize);
        let records = self.bridge.inbox().list(limit).await;

        let messages: Vec<serde_json::Value> = records
            .iter()
            .map(|r| {
                json!({
                    "id": r.uuid.to_string(),
                    "from": r.from_jid,
                    "preview": truncate(&r.body, LIST_PREVIEW_LEN),
                    "timestamp": r.ts,
                    "received_at": r.received_at.to_rfc3339(),
                })
            })
            .collect();

        let text = if records.is_empty() {
            "No messages in inbox".to_string()
        } else {
            let mut lines = vec![format!("{} message(s) in inbox:", records.len())];
            for r in &records {
                lines.push(format!(
                    "- [{}] {}: {}",
                    r.received_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    r.from_jid,
                    truncate(&r.body, LIST_PREVIEW_LEN),
                ));
            }
            lines.join("\n")
        };

        Ok(ToolResult::text(text).with_field("messages", json!(messages)))
    }

    async fn inbox_get(&self, args: &serde_json::Value) -> Result<ToolResult, McpError> {
        let id = require_str(args, "messageId")?;
        let uuid = Uuid::parse_str(id).map_err(|_| {
            McpError::app(ErrorKind::NotFound, format!("Message not found: {}", id))
        })?;

        match self.bridge.inbox().get(uuid).await {
            Some(record) => Ok(ToolResult::text(format!(
                "Message from {}: {}",
                record.from_jid, record.body
            ))
            .with_field(
                "message",
                serde_json::to_value(&record).map_err(McpError::Json)?,
            )),
            None => Err(McpError::app(
                ErrorKind::NotFound,
                format!("Message not found: {}", id),
            )),
        }
    }

    async fn inbox_clear(&self) -> Result<ToolResult, McpError> {
        let cleared = self.bridge.inbox().clear().await;
        info!(cleared = cleared, "inbox cleared");
        Ok(
            ToolResult::text(format!("Cleared {} message(s) from inbox", cleared))
                .with_field("cleared", json!(cleared)),
        )
    }

    async fn book_save(&self, args: &serde_json::Value) -> Result<ToolResult, McpError> {
        let alias = require_str(args, "alias")?;
        let jid = require_str(args, "jid")?;

        match self.bridge.address_book().save_alias(alias, jid).await {
            Ok(outcome) => {
                let status = match outcome {
                    SaveOutcome::Updated => "updated",
                    SaveOutcome::Unchanged => "unchanged",
                };
                Ok(ToolResult::text(format!(
                    "Address book entry {}: {} -> {}",
                    status, alias, jid
                ))
                .with_field("status", json!(status))
                .with_field("alias", json!(alias.to_lowercase()))
                .with_field("jid", json!(jid.to_lowercase())))
            }
            Err(BridgeError::InvalidAlias(a)) => Err(McpError::app(
                ErrorKind::InvalidAlias,
                format!("Invalid alias: '{}'", a),
            )),
            Err(BridgeError::InvalidJid(j)) => Err(McpError::app(
                ErrorKind::InvalidJid,
                format!("Invalid JID: '{}'", j),
            )),
            Err(e) => Err(McpError::Internal(e.to_string())),
        }
    }

    async fn book_query(&self, args: &serde_json::Value) -> Result<ToolResult, McpError> {
        let term = require_str(args, "term")?;
        let limit = args.get("limit").and_then(|v| v.as_u64()).map(|n| n as usize);

        let matches = self.bridge.address_book().query(term, limit).await;
        Ok(ToolResult::text(format!(
            "Found {} match(es) for '{}'",
            matches.len(),
            term
        ))
        .with_field("matches", json!(matches)))
    }
}

fn nack_error(kind: ErrorKind, jid: &str) -> McpError {
    let message = match kind {
        ErrorKind::Overloaded => "Outbound queue is overloaded, try again later".to_string(),
        ErrorKind::Disconnected => "XMPP connection is down".to_string(),
        ErrorKind::Shutdown => "Bridge is shutting down".to_string(),
        other => format!("Cannot queue message for {}: {}", jid, other),
    };
    McpError::app(kind, message)
}

fn require_str<'a>(
    args: &'a serde_json::Value,
    field: &'static str,
) -> Result<&'a str, McpError> {
    args.get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| McpError::InvalidParams(format!("Missing required parameter: {}", field)))
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::config::AppConfig;
    use crate::xmpp::client::{Credentials, XmppEvent};
    use crate::xmpp::{ConnectionState, MemoryClient};
    use jabber_protocol::MessageType;

    async fn context() -> (ToolContext, Arc<Bridge>, Arc<MemoryClient>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let client = MemoryClient::new();
        let bridge = Bridge::new(
            &AppConfig::default(),
            client.clone(),
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

        (ToolContext::new(bridge.clone()), bridge, client, dir)
    }

    fn kind_of(err: &McpError) -> Option<ErrorKind> {
        match err {
            McpError::App { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_send_to_jid() {
        let (ctx, bridge, client, _dir) = context().await;

        let result = ctx
            .dispatch_tool(
                "send_xmpp_message",
                &json!({"recipient": "alice@example.com", "message": "Hi"}),
            )
            .await
            .unwrap();

        assert_eq!(
            result.extra.get("status"),
            Some(&json!("queued"))
        );
        settle().await;
        assert!(client.sent_stanzas()[0].contains(r#"to="alice@example.com""#));
        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_send_resolves_alias() {
        let (ctx, bridge, client, _dir) = context().await;

        ctx.dispatch_tool(
            "address_book/save",
            &json!({"alias": "alice", "jid": "alice@example.com"}),
        )
        .await
        .unwrap();

        let result = ctx
            .dispatch_tool(
                "send_xmpp_message",
                &json!({"recipient": "alice", "message": "Hello"}),
            )
            .await
            .unwrap();
        assert_eq!(
            result.extra.get("recipient"),
            Some(&json!("alice@example.com"))
        );

        settle().await;
        assert!(client.sent_stanzas()[0].contains("alice@example.com"));
        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_send_ambiguous_alias_lists_candidates() {
        let (ctx, bridge, _client, _dir) = context().await;

        ctx.dispatch_tool(
            "address_book/save",
            &json!({"alias": "alice", "jid": "alice@a.com"}),
        )
        .await
        .unwrap();
        ctx.dispatch_tool(
            "address_book/save",
            &json!({"alias": "alice2", "jid": "alice@b.com"}),
        )
        .await
        .unwrap();

        let err = ctx
            .dispatch_tool(
                "send_xmpp_message",
                &json!({"recipient": "ali", "message": "x"}),
            )
            .await
            .unwrap_err();

        assert_eq!(kind_of(&err), Some(ErrorKind::AmbiguousAlias));
        match err {
            McpError::App { data, .. } => {
                let candidates = data.unwrap()["candidates"].as_array().unwrap().len();
                assert_eq!(candidates, 2);
            }
            _ => unreachable!(),
        }
        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_send_unknown_alias() {
        let (ctx, bridge, _client, _dir) = context().await;

        let err = ctx
            .dispatch_tool(
                "send_xmpp_message",
                &json!({"recipient": "nobody", "message": "x"}),
            )
            .await
            .unwrap_err();
        assert_eq!(kind_of(&err), Some(ErrorKind::UnknownAlias));
        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_send_invalid_jid_shape() {
        let (ctx, bridge, _client, _dir) = context().await;

        let err = ctx
            .dispatch_tool(
                "send_xmpp_message",
                &json!({"recipient": "bad@@jid", "message": "x"}),
            )
            .await
            .unwrap_err();
        assert_eq!(kind_of(&err), Some(ErrorKind::InvalidJid));
        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_send_missing_params() {
        let (ctx, bridge, _client, _dir) = context().await;

        let err = ctx
            .dispatch_tool("send_xmpp_message", &json!({"message": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidParams(_)));
        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_ping_reports_state() {
        let (ctx, bridge, _client, _dir) = context().await;

        let result = ctx.dispatch_tool("ping", &json!({})).await.unwrap();
        assert_eq!(result.extra.get("pong"), Some(&json!(true)));
        assert_eq!(
            result.extra.get("connection_state"),
            Some(&json!("connected"))
        );
        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_inbox_tools_round_trip() {
        let (ctx, bridge, client, _dir) = context().await;

        client.inject(XmppEvent::Message {
            from: "bob@example.com".into(),
            body: "a very important note".into(),
            message_type: MessageType::Chat,
        });
        tokio::time::timeout(Duration::from_secs(5), async {
            while bridge.inbox().is_empty().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let listed = ctx.dispatch_tool("inbox/list", &json!({})).await.unwrap();
        let messages = listed.extra.get("messages").unwrap().as_array().unwrap();
        assert_eq!(messages.len(), 1);
        let id = messages[0]["id"].as_str().unwrap().to_string();

        let fetched = ctx
            .dispatch_tool("inbox/get", &json!({"messageId": id}))
            .await
            .unwrap();
        assert_eq!(
            fetched.extra.get("message").unwrap()["body"],
            "a very important note"
        );

        let cleared = ctx.dispatch_tool("inbox/clear", &json!({})).await.unwrap();
        assert_eq!(cleared.extra.get("cleared"), Some(&json!(1)));
        let cleared_again = ctx.dispatch_tool("inbox/clear", &json!({})).await.unwrap();
        assert_eq!(cleared_again.extra.get("cleared"), Some(&json!(0)));

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_inbox_get_missing_and_unknown() {
        let (ctx, bridge, _client, _dir) = context().await;

        let err = ctx.dispatch_tool("inbox/get", &json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::InvalidParams(_)));

        let err = ctx
            .dispatch_tool(
                "inbox/get",
                &json!({"messageId": Uuid::new_v4().to_string()}),
            )
            .await
            .unwrap_err();
        assert_eq!(kind_of(&err), Some(ErrorKind::NotFound));

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_book_save_validation_kinds() {
        let (ctx, bridge, _client, _dir) = context().await;

        let err = ctx
            .dispatch_tool(
                "address_book/save",
                &json!({"alias": "bad alias!", "jid": "a@b.c"}),
            )
            .await
            .unwrap_err();
        assert_eq!(kind_of(&err), Some(ErrorKind::InvalidAlias));

        let err = ctx
            .dispatch_tool(
                "address_book/save",
                &json!({"alias": "fine", "jid": "not a jid"}),
            )
            .await
            .unwrap_err();
        assert_eq!(kind_of(&err), Some(ErrorKind::InvalidJid));

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_book_save_status_transitions() {
        let (ctx, bridge, _client, _dir) = context().await;
        let args = json!({"alias": "alice", "jid": "alice@example.com"});

        let first = ctx.dispatch_tool("address_book/save", &args).await.unwrap();
        assert_eq!(first.extra.get("status"), Some(&json!("updated")));

        let second = ctx.dispatch_tool("address_book/save", &args).await.unwrap();
        assert_eq!(second.extra.get("status"), Some(&json!("unchanged")));

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_book_query_scores() {
        let (ctx, bridge, _client, _dir) = context().await;

        ctx.dispatch_tool(
            "address_book/save",
            &json!({"alias": "alice", "jid": "alice@example.com"}),
        )
        .await
        .unwrap();

        let result = ctx
            .dispatch_tool("address_book/query", &json!({"term": "ali"}))
            .await
            .unwrap();
        let matches = result.extra.get("matches").unwrap().as_array().unwrap();
        assert_eq!(matches[0]["alias"], "alice");
        assert_eq!(matches[0]["score"], 75);

        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_tool_rejected() {
        let (ctx, bridge, _client, _dir) = context().await;
        let err = ctx
            .dispatch_tool("make_coffee", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::UnknownTool(_)));
        bridge.stop().await;
    }
}
