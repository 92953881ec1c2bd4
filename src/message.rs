//! Plain structured messages exchanged over reply and broadcast sockets.
//!
//! Requests and replies travel as a single JSON frame. Broadcasts are two
//! frames, `[topic, payload]`, so subscribers can prefix-filter on the topic.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A command sent to a reply socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "fail")]
    Fail,
}

/// The answer to a `Request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub status: ReplyStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl Request {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            parameters: Map::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl Reply {
    pub fn ok(parameters: Map<String, Value>) -> Self {
        Self {
            status: ReplyStatus::Ok,
            message: String::new(),
            parameters,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Fail,
            message: message.into(),
            parameters: Map::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A message in transit from a producer to the broadcaster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl BroadcastMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Broadcast a reply under `topic`.
    pub fn from_reply(topic: impl Into<String>, reply: &Reply) -> Result<Self> {
        Ok(Self::new(topic, reply.to_bytes()?))
    }

    /// Wire frames: topic first, payload second.
    pub fn frames(&self) -> [&[u8]; 2] {
        [self.topic.as_bytes(), &self.payload]
    }

    /// Rebuild from received frames; `None` unless exactly two frames.
    pub fn from_frames(mut frames: Vec<Vec<u8>>) -> Option<Self> {
        if frames.len() != 2 {
            return None;
        }
        let payload = frames.pop()?;
        let topic = String::from_utf8(frames.pop()?).ok()?;
        Some(Self { topic, payload })
    }
}
