// SignalR JSON hub protocol, version 1
//
// Every record is a JSON object terminated by the 0x1e record separator. A websocket text frame
// can carry several records, and a record is not guaranteed to fit in a single frame.

use serde::Deserialize;
use serde_json::Value;

use crate::SalesRaceError;

pub const RECORD_SEPARATOR: char = '\u{1e}';

const INVOCATION: u8 = 1;
const PING: u8 = 6;
const CLOSE: u8 = 7;

#[derive(Clone, Debug, PartialEq)]
pub enum HubMessage {
    Invocation {
        target: String,
        arguments: Vec<Value>,
    },
    Ping,
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// Stream items, completions and the other message types a listen-only client ignores.
    Other { kind: u8 },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHubMessage {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    allow_reconnect: bool,
}

#[derive(Deserialize)]
struct HandshakeResponse {
    #[serde(default)]
    error: Option<String>,
}

pub fn handshake_request() -> String {
    format!(r#"{{"protocol":"json","version":1}}{RECORD_SEPARATOR}"#)
}

pub fn ping_message() -> String {
    format!(r#"{{"type":{PING}}}{RECORD_SEPARATOR}"#)
}

pub fn parse_handshake_response(record: &str) -> Result<(), SalesRaceError> {
    let response: HandshakeResponse =
        serde_json::from_str(record).map_err(|e| SalesRaceError::HubHandshake {
            reason: format!("unreadable handshake response: {e}"),
        })?;
    match response.error {
        Some(reason) => Err(SalesRaceError::HubHandshake { reason }),
        None => Ok(()),
    }
}

pub fn parse_message(record: &str) -> Result<HubMessage, SalesRaceError> {
    let raw: RawHubMessage =
        serde_json::from_str(record).map_err(|e| SalesRaceError::MalformedHubMessage {
            reason: e.to_string(),
        })?;

    Ok(match raw.kind {
        INVOCATION => HubMessage::Invocation {
            target: raw.target.ok_or_else(|| SalesRaceError::MalformedHubMessage {
                reason: "invocation without a target".to_string(),
            })?,
            arguments: raw.arguments,
        },
        PING => HubMessage::Ping,
        CLOSE => HubMessage::Close {
            error: raw.error,
            allow_reconnect: raw.allow_reconnect,
        },
        kind => HubMessage::Other { kind },
    })
}

/// Reassembles records from websocket text frames.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    pending: String,
}

impl RecordBuffer {
    /// Append a frame and return the records it completed, oldest first.
    pub fn push(&mut self, frame: &str) -> Vec<String> {
        self.pending.push_str(frame);
        let Some(last_separator) = self.pending.rfind(RECORD_SEPARATOR) else {
            return Vec::new();
        };

        let rest = self.pending.split_off(last_separator + RECORD_SEPARATOR.len_utf8());
        let complete = std::mem::replace(&mut self.pending, rest);
        complete
            .split(RECORD_SEPARATOR)
            .filter(|record| !record.trim().is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn has_partial_record(&self) -> bool {
        !self.pending.is_empty()
    }
}
