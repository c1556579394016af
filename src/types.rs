use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Opaque connection ID, unique for the lifetime of the process
pub type ConnectionId = String;

/// An outbound record, shared between all recipients of one broadcast
pub type Record = Arc<str>;

/// Generate a fresh connection ID
pub fn new_connection_id() -> ConnectionId {
    ulid::Ulid::new().to_string()
}

/// How outbound chat records are encoded on the wire
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    /// `"<id>:<payload>"` with no escaping
    #[default]
    Tagged,
    /// `{"t":"chat","from":"<id>","text":"<payload>"}`
    Json,
}

impl RecordFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordFormat::Tagged => "tagged",
            RecordFormat::Json => "json",
        }
    }
}

impl std::str::FromStr for RecordFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tagged" => Ok(RecordFormat::Tagged),
            "json" => Ok(RecordFormat::Json),
            other => Err(format!("unknown record format: {}", other)),
        }
    }
}
