//! Frame types for the Dispatch realtime channel.
//!
//! Frames are the fundamental unit of communication. The client sends a
//! single `connect` frame to bind its identity; after that the stream is
//! server-driven (`event` frames) apart from keepalives.

use serde::{Deserialize, Serialize};

/// Error code sent when a connection presents no identity.
pub const CODE_UNAUTHENTICATED: u16 = 4001;

/// Error code for malformed or unexpected frames.
pub const CODE_BAD_FRAME: u16 = 4002;

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Connect = 0x01,
    Connected = 0x02,
    Event = 0x03,
    Ping = 0x04,
    Pong = 0x05,
    Error = 0x06,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Connect),
            0x02 => Ok(FrameType::Connected),
            0x03 => Ok(FrameType::Event),
            0x04 => Ok(FrameType::Ping),
            0x05 => Ok(FrameType::Pong),
            0x06 => Ok(FrameType::Error),
            _ => Err("Invalid frame type"),
        }
    }
}

/// A protocol frame.
///
/// Field names inside each variant are part of the client compatibility
/// surface (frames are encoded with named fields).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Identity handshake. Must be the first client frame.
    #[serde(rename = "connect")]
    Connect {
        /// Claimed user identity.
        #[serde(rename = "userId")]
        user_id: String,
    },

    /// Connection accepted response.
    #[serde(rename = "connected")]
    Connected {
        /// Unique connection identifier.
        #[serde(rename = "connectionId")]
        connection_id: String,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// A server-emitted domain event.
    #[serde(rename = "event")]
    Event {
        /// Event name (e.g. `driver-assigned`).
        event: String,
        /// Structured event payload.
        payload: serde_json::Value,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Error response. The connection is closed after an `error` frame
    /// carrying [`CODE_UNAUTHENTICATED`].
    #[serde(rename = "error")]
    Error {
        /// Error code.
        code: u16,
        /// Human-readable error message.
        message: String,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connect { .. } => FrameType::Connect,
            Frame::Connected { .. } => FrameType::Connected,
            Frame::Event { .. } => FrameType::Event,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
            Frame::Error { .. } => FrameType::Error,
        }
    }

    /// Create a new Connect frame.
    #[must_use]
    pub fn connect(user_id: impl Into<String>) -> Self {
        Frame::Connect {
            user_id: user_id.into(),
        }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            heartbeat,
        }
    }

    /// Create a new Event frame.
    #[must_use]
    pub fn event(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Frame::Event {
            event: event.into(),
            payload,
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_type() {
        let connect = Frame::connect("user-1");
        assert_eq!(connect.frame_type(), FrameType::Connect);

        let event = Frame::event("pool-updated", json!({}));
        assert_eq!(event.frame_type(), FrameType::Event);
    }

    #[test]
    fn test_frame_type_conversion() {
        assert_eq!(FrameType::try_from(0x01), Ok(FrameType::Connect));
        assert_eq!(FrameType::try_from(0x06), Ok(FrameType::Error));
        assert!(FrameType::try_from(0x07).is_err());
    }

    #[test]
    fn test_connect_field_name() {
        // `userId` is what dashboard clients send; keep it stable.
        let json = serde_json::to_value(Frame::connect("u-9")).unwrap();
        assert_eq!(json["userId"], "u-9");
        assert_eq!(json["type"], "connect");
    }
}
