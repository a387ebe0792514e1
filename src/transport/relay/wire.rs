//! Relay wire format: one JSON object per line, tagged by `type`

use serde::{Deserialize, Serialize};

/// Kind of a chat message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Chat,
    Error,
}

/// Longest line accepted from the relay
pub const MAX_LINE_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Auth {
        identity: String,
        password: String,
    },
    AuthOk,
    AuthFailed {
        #[serde(default)]
        reason: String,
    },
    Presence {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        #[serde(default)]
        kind: MessageKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },
    Disconnect,
}

impl Frame {
    /// Serialize as one newline-terminated line
    pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }

    pub fn from_line(line: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(line)
    }
}
