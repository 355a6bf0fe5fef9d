//! Command parsing and response serialization.
//!
//! Inbound frames carry a JSON object whose `type` field (case-insensitive)
//! selects the command. Anything malformed degrades to [`Command::Unknown`]
//! rather than erroring; the connection survives bad input short of an
//! oversized frame.

use serde::Serialize;
use serde_json::Value;

use crate::constants::DEFAULT_HISTORY_LIMIT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register {
        username: String,
        password: String,
    },
    Login {
        username: String,
        password: String,
    },
    SendMessage {
        recipient: String,
        content: String,
    },
    Logout,
    ListUsers,
    ListOnline,
    GetHistory {
        target: String,
        limit: u32,
        offset: u32,
    },
    Unknown,
}

/// Parse one frame payload into a [`Command`]. Total: malformed JSON, a
/// missing `type`, or an unrecognized `type` all yield [`Command::Unknown`].
pub fn parse_command(payload: &[u8]) -> Command {
    let value: Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(_) => return Command::Unknown,
    };

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_uppercase();

    let text = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    match kind.as_str() {
        "REGISTER" => Command::Register {
            username: text("username"),
            password: text("password"),
        },
        "LOGIN" => Command::Login {
            username: text("username"),
            password: text("password"),
        },
        "SEND_MESSAGE" => Command::SendMessage {
            recipient: text("recipient"),
            content: text("content"),
        },
        "LOGOUT" => Command::Logout,
        "LIST_USERS" => Command::ListUsers,
        "LIST_ONLINE" => Command::ListOnline,
        "GET_HISTORY" => {
            // `with` is the documented key; `target` is accepted as an alias.
            let target = value
                .get("with")
                .and_then(Value::as_str)
                .or_else(|| value.get("target").and_then(Value::as_str))
                .unwrap_or_default()
                .to_string();
            let limit = value
                .get("limit")
                .and_then(Value::as_u64)
                .map(|v| v as u32)
                .unwrap_or(DEFAULT_HISTORY_LIMIT);
            let offset = value
                .get("offset")
                .and_then(Value::as_u64)
                .map(|v| v as u32)
                .unwrap_or(0);
            Command::GetHistory {
                target,
                limit,
                offset,
            }
        }
        _ => Command::Unknown,
    }
}

/// Outbound response envelope. Fields left as `None` are omitted from the
/// serialized JSON, never emitted as `null`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Response {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Response {
    /// Reply to a client command with an outcome and a human-readable note.
    pub fn result(command: &str, success: bool, message: &str) -> Self {
        Self {
            command: command.to_string(),
            success: Some(success),
            message: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Server-initiated chat delivery frame.
    pub fn incoming_message(
        sender: &str,
        content: &str,
        timestamp: Option<&str>,
        id: Option<i64>,
    ) -> Self {
        Self {
            command: "incoming_message".to_string(),
            sender: Some(sender.to_string()),
            content: Some(content.to_string()),
            timestamp: timestamp.map(str::to_string),
            id,
            ..Self::default()
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Serialize a response to the newline-terminated JSON line that goes
/// inside a frame.
pub fn serialize_response(response: &Response) -> String {
    let mut line = serde_json::to_string(response).unwrap_or_else(|_| String::from("{}"));
    line.push('\n');
    line
}
