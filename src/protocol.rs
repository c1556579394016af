use crate::types::*;
use serde::{Deserialize, Serialize};

/// Structured server-to-client messages, used when the record format is JSON
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once, right after the upgrade, so the client knows its own ID
    Welcome {
        id: ConnectionId,
        server_now: String,
    },
    /// A relayed chat message
    Chat { from: ConnectionId, text: String },
}

/// Build the outbound record for a message `payload` sent by `from`.
///
/// The tagged format does not escape the delimiter, so a payload containing
/// `:` cannot be split back apart reliably. Use the JSON format when clients
/// need to parse the origin out of the record.
pub fn encode_record(format: RecordFormat, from: &str, payload: &str) -> Record {
    match format {
        RecordFormat::Tagged => format!("{}:{}", from, payload).into(),
        RecordFormat::Json => {
            let msg = ServerMessage::Chat {
                from: from.to_string(),
                text: payload.to_string(),
            };
            match serde_json::to_string(&msg) {
                Ok(json) => json.into(),
                Err(e) => {
                    tracing::warn!("Failed to serialize chat record, falling back to tagged: {}", e);
                    format!("{}:{}", from, payload).into()
                }
            }
        }
    }
}

/// Build the welcome frame for a freshly connected client
pub fn welcome(id: &str) -> Option<String> {
    let msg = ServerMessage::Welcome {
        id: id.to_string(),
        server_now: chrono::Utc::now().to_rfc3339(),
    };
    serde_json::to_string(&msg).ok()
}
