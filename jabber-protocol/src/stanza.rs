//! Stanza conversion
//!
//! Pure functions translating between MCP tool payloads and XMPP
//! `<message>` stanza fields. All attribute and text values are XML entity
//! escaped on the way out and unescaped on the way in; raw control
//! characters never reach the wire.

use crate::event::{MessageType, OutboundMessage};

/// Conversion failures surfaced to the tool caller as invalid params
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field '{field}' must be a non-empty string")]
    InvalidField { field: &'static str },

    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),
}

/// Escape XML entities and scrub raw control characters.
///
/// Control characters below 0x20 other than tab, newline, and carriage
/// return are not representable in XML 1.0; they are replaced with a space.
pub fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if (c as u32) < 0x20 && c != '\t' && c != '\n' && c != '\r' => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

/// Reverse of [`xml_escape`] for the five predefined entities.
///
/// Unknown entities are left untouched rather than rejected; inbound body
/// decoding must never fail.
pub fn xml_unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let replaced = [
            ("&amp;", '&'),
            ("&lt;", '<'),
            ("&gt;", '>'),
            ("&quot;", '"'),
            ("&apos;", '\''),
        ]
        .iter()
        .find(|(entity, _)| rest.starts_with(entity));
        match replaced {
            Some((entity, ch)) => {
                out.push(*ch);
                rest = &rest[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

impl OutboundMessage {
    /// Render the wire-format `<message>` stanza.
    pub fn to_stanza(&self) -> String {
        format!(
            "<message to=\"{}\" type=\"{}\"><body>{}</body></message>",
            xml_escape(&self.to_jid),
            xml_escape(&self.message_type.to_string()),
            xml_escape(&self.body),
        )
    }
}

/// An incoming XMPP message after stanza decoding
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub from_jid: String,
    pub body: String,
    pub message_type: MessageType,
    /// Monotonic seconds at ingestion
    pub ts: f64,
}

impl ReceivedMessage {
    /// Build from stanza fields, unescaping the body.
    pub fn from_stanza(
        from_jid: impl Into<String>,
        body_raw: &str,
        message_type: MessageType,
        ts: f64,
    ) -> Self {
        Self {
            from_jid: from_jid.into(),
            body: xml_unescape(body_raw),
            message_type,
            ts,
        }
    }
}

/// Coerce a loosely-typed JSON value into a body string.
///
/// Non-string values become the empty string; decoding never fails.
pub fn coerce_body(value: &serde_json::Value) -> String {
    value.as_str().unwrap_or_default().to_string()
}

/// Convert an MCP send payload (`{jid, body, message_type?}`) into an
/// [`OutboundMessage`].
pub fn send_payload_to_outbound(
    payload: &serde_json::Value,
) -> Result<OutboundMessage, ConvertError> {
    let jid = require_string(payload, "jid")?;
    let body = require_string(payload, "body")?;

    let message_type = match payload.get("message_type") {
        None | Some(serde_json::Value::Null) => MessageType::Chat,
        Some(serde_json::Value::String(s)) => s
            .parse::<MessageType>()
            .map_err(|_| ConvertError::UnknownMessageType(s.clone()))?,
        Some(other) => return Err(ConvertError::UnknownMessageType(other.to_string())),
    };

    let mut msg = OutboundMessage::new(jid, body);
    msg.message_type = message_type;
    Ok(msg)
}

fn require_string<'a>(
    payload: &'a serde_json::Value,
    field: &'static str,
) -> Result<&'a str, ConvertError> {
    match payload.get(field) {
        None | Some(serde_json::Value::Null) => Err(ConvertError::MissingField(field)),
        Some(serde_json::Value::String(s)) if !s.is_empty() => Ok(s),
        Some(_) => Err(ConvertError::InvalidField { field }),
    }
}
