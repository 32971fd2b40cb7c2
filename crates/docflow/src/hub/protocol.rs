//! Wire messages exchanged with hub subscribers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::registry::{ConnectionId, NotificationHub, SubscriptionKey};

/// Command sent by a subscriber
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    SubscribeTask { task_id: String },
    UnsubscribeTask { task_id: String },
    SubscribeFile { file_id: String },
    UnsubscribeFile { file_id: String },
    Ping,
}

/// Message pushed to a subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SubscriptionConfirmed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
        message: String,
    },
    UnsubscriptionConfirmed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
        message: String,
    },
    Pong,
    Error {
        message: String,
    },
    TaskUpdate {
        task_id: String,
        data: Value,
    },
    FileUpdate {
        file_id: String,
        data: Value,
    },
    SystemMessage {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    fn confirmed(key: &SubscriptionKey, subscribed: bool) -> Self {
        let (task_id, file_id, what) = match key {
            SubscriptionKey::Task(id) => (Some(id.clone()), None, format!("task {}", id)),
            SubscriptionKey::File(id) => (None, Some(id.clone()), format!("file {}", id)),
        };
        if subscribed {
            ServerMessage::SubscriptionConfirmed {
                task_id,
                file_id,
                message: format!("Subscribed to {}", what),
            }
        } else {
            ServerMessage::UnsubscriptionConfirmed {
                task_id,
                file_id,
                message: format!("Unsubscribed from {}", what),
            }
        }
    }
}

/// Parse one inbound frame.
///
/// Unknown types, missing ids and malformed JSON all produce the reply to send
/// back; the connection stays open.
pub fn parse_command(text: &str) -> std::result::Result<ClientCommand, ServerMessage> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ServerMessage::error(format!("Malformed message: {}", e)))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ServerMessage::error("Message is missing a 'type' field"))?;

    if !matches!(
        kind,
        "subscribe_task" | "unsubscribe_task" | "subscribe_file" | "unsubscribe_file" | "ping"
    ) {
        return Err(ServerMessage::error(format!("Unknown message type: {}", kind)));
    }

    let kind = kind.to_string();
    serde_json::from_value(value)
        .map_err(|_| ServerMessage::error(format!("Message '{}' is missing its id field", kind)))
}

/// Apply an inbound frame for `conn` and return the direct reply
pub fn handle_frame(hub: &NotificationHub, conn: ConnectionId, text: &str) -> ServerMessage {
    let command = match parse_command(text) {
        Ok(command) => command,
        Err(reply) => {
            tracing::debug!("Rejected frame from {}: {:?}", conn, reply);
            return reply;
        }
    };

    match command {
        ClientCommand::SubscribeTask { task_id } => {
            let key = SubscriptionKey::Task(task_id);
            hub.subscribe(key.clone(), conn);
            ServerMessage::confirmed(&key, true)
        }
        ClientCommand::UnsubscribeTask { task_id } => {
            let key = SubscriptionKey::Task(task_id);
            hub.unsubscribe(&key, conn);
            ServerMessage::confirmed(&key, false)
        }
        ClientCommand::SubscribeFile { file_id } => {
            let key = SubscriptionKey::File(file_id);
            hub.subscribe(key.clone(), conn);
            ServerMessage::confirmed(&key, true)
        }
        ClientCommand::UnsubscribeFile { file_id } => {
            let key = SubscriptionKey::File(file_id);
            hub.unsubscribe(&key, conn);
            ServerMessage::confirmed(&key, false)
        }
        ClientCommand::Ping => ServerMessage::Pong,
    }
}
