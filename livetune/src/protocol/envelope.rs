use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::framework::util::now_ms;

/// One serialized envelope as it crosses the context boundary
pub type Frame = String;

/// `{ type, payload, timestamp }`, the only shape either side puts on the
/// wire. Envelopes are built per send and dropped after serialization.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,

    /// Older guests send the body under `data`
    #[serde(default, alias = "data")]
    pub payload: Value,

    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: u64,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            timestamp: now_ms(),
        }
    }

    pub fn to_frame(&self) -> Result<Frame, String> {
        serde_json::to_string(self).map_err(|err| {
            format!("failed to serialize `{}` envelope: {}", self.kind, err)
        })
    }

    pub fn from_frame(frame: &str) -> Result<Self, String> {
        serde_json::from_str(frame)
            .map_err(|err| format!("malformed envelope '{}': {}", frame, err))
    }
}

/// Browsers hand us `Date.now()`, which may arrive as a float, and some
/// senders omit it entirely.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().map(|v| v.max(0.0) as u64))
            .unwrap_or(0),
        _ => 0,
    })
}
