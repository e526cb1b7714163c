//! Tool definitions announced through tools/list

use serde_json::json;

use jabber_protocol::Tool;

/// All tool definitions with their JSON Schema inputs
pub fn get_tool_definitions() -> Vec<Tool> {
    vec![
        Tool {
            name: "send_xmpp_message".into(),
            description: "Send a message through XMPP. The recipient may be a JID or an \
                          address book alias to resolve."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "recipient": {
                        "type": "string",
                        "description": "The JID of the message recipient, or an alias to resolve from the address book"
                    },
                    "message": {
                        "type": "string",
                        "description": "The message text to send"
                    }
                },
                "required": ["recipient", "message"]
            }),
        },
        Tool {
            name: "ping".into(),
            description: "Ping the bridge and report the XMPP connection state".into(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        Tool {
            name: "inbox/list".into(),
            description: "Return an ordered summary of received messages (id, from, preview, timestamp), newest first".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of messages to return"
                    }
                }
            }),
        },
        Tool {
            name: "inbox/get".into(),
            description: "Return the full body for a given message id".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "messageId": { "type": "string" }
                },
                "required": ["messageId"]
            }),
        },
        Tool {
            name: "inbox/clear".into(),
            description: "Empty the inbox".into(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        Tool {
            name: "address_book/save".into(),
            description: "Store an alias → JID mapping".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "alias": { "type": "string" },
                    "jid": { "type": "string" }
                },
                "required": ["alias", "jid"]
            }),
        },
        Tool {
            name: "address_book/query".into(),
            description: "Fuzzy-search the address book by alias or JID and return ranked matches".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "term": { "type": "string" },
                    "limit": { "type": "integer" }
                },
                "required": ["term"]
            }),
        },
    ]
}

/// Check if a tool name is known
pub fn is_known_tool(name: &str) -> bool {
    matches!(
        name,
        "send_xmpp_message"
            | "ping"
            | "inbox/list"
            | "inbox/get"
            | "inbox/clear"
            | "address_book/save"
            | "address_book/query"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definitions_cover_known_tools() {
        let tools = get_tool_definitions();
        assert_eq!(tools.len(), 7);
        for tool in &tools {
            assert!(is_known_tool(&tool.name), "{} not known", tool.name);
            assert_eq!(tool.input_schema["type"], "object");
        }
    }

    #[test]
    fn test_unknown_tool() {
        assert!(!is_known_tool("make_coffee"));
    }

    #[test]
    fn test_required_fields() {
        let tools = get_tool_definitions();
        let send = tools.iter().find(|t| t.name == "send_xmpp_message").unwrap();
        let required = send.input_schema["required"].as_array().unwrap();
        assert!(required.contains(&serde_json::json!("recipient")));
        assert!(required.contains(&serde_json::json!("message")));
    }
}
