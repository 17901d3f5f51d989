use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Op names the mutation a command performs. Unrecognized names survive decoding as
/// `Op::Other` so that decoding stays total; the state machine treats them as no-ops.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Op {
    Set,
    Delete,
    Other(String),
}

impl From<String> for Op {
    fn from(name: String) -> Self {
        match name.as_str() {
            "set" => Op::Set,
            "delete" => Op::Delete,
            _ => Op::Other(name),
        }
    }
}

impl From<Op> for String {
    fn from(op: Op) -> Self {
        match op {
            Op::Set => "set".to_string(),
            Op::Delete => "delete".to_string(),
            Op::Other(name) => name,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Set => f.write_str("set"),
            Op::Delete => f.write_str("delete"),
            Op::Other(name) => f.write_str(name),
        }
    }
}

/// Command is the unit of replicated work: one operation on one key. One command is carried by
/// exactly one log entry.
///
/// Wire format (JSON): `{"op": "set"|"delete", "key": string, "value": string?}`
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Command {
    op: Op,
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("malformed command: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

impl Command {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Command {
            op: Op::Set,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Command {
            op: Op::Delete,
            key: key.into(),
            value: None,
        }
    }

    /// Builds a command with an arbitrary op. Used to represent entries written by newer or
    /// foreign proposers.
    pub fn other(op: impl Into<String>, key: impl Into<String>, value: Option<String>) -> Self {
        Command {
            op: Op::from(op.into()),
            key: key.into(),
            value,
        }
    }

    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The value to write. Only meaningful for `Op::Set`; a set without a value writes "".
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn encode(&self) -> Bytes {
        // Every field is a string, so serde_json has nothing that can fail here.
        let encoded = serde_json::to_vec(self).expect("Command serialization is infallible");
        Bytes::from(encoded)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
