//! Wire format for tailed log messages.
//!
//! Each WebSocket frame carries exactly one protobuf-encoded `LogMessage`
//! (proto2). Required fields are modelled as `Option` on the wire struct so
//! their absence can be detected and reported instead of silently defaulted.

use bytes::Bytes;
use prost::Message;
use std::fmt;

use crate::error::DecodeError;

/// Stream a log line was written to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    Out = 1,
    Err = 2,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Out => "OUT",
            MessageType::Err => "ERR",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw protobuf message as sent by the aggregator.
#[derive(Clone, PartialEq, Message)]
pub struct LogMessage {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub message: Option<Vec<u8>>,
    #[prost(enumeration = "MessageType", optional, tag = "2")]
    pub message_type: Option<i32>,
    #[prost(sint64, optional, tag = "3")]
    pub timestamp: Option<i64>,
    #[prost(string, optional, tag = "4")]
    pub app_id: Option<String>,
    #[prost(string, optional, tag = "6")]
    pub source_id: Option<String>,
    #[prost(string, repeated, tag = "7")]
    pub drain_urls: Vec<String>,
    #[prost(string, optional, tag = "8")]
    pub source_name: Option<String>,
}

/// A decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub payload: Bytes,
    pub app_id: String,
    pub message_type: MessageType,
    pub source_name: String,
    pub source_id: Option<String>,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
}

impl LogRecord {
    /// Payload as text, replacing invalid UTF-8.
    pub fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Encode this record as a single wire frame.
    pub fn to_frame(&self) -> Vec<u8> {
        LogMessage::from(self).encode_to_vec()
    }
}

impl From<&LogRecord> for LogMessage {
    fn from(record: &LogRecord) -> Self {
        LogMessage {
            message: Some(record.payload.to_vec()),
            message_type: Some(record.message_type as i32),
            timestamp: Some(record.timestamp),
            app_id: Some(record.app_id.clone()),
            source_id: record.source_id.clone(),
            drain_urls: Vec::new(),
            source_name: Some(record.source_name.clone()),
        }
    }
}

impl TryFrom<LogMessage> for LogRecord {
    type Error = DecodeError;

    fn try_from(wire: LogMessage) -> Result<Self, Self::Error> {
        let payload = wire.message.ok_or(DecodeError::MissingField("message"))?;
        let raw_type = wire
            .message_type
            .ok_or(DecodeError::MissingField("message_type"))?;
        let message_type =
            MessageType::try_from(raw_type).map_err(|_| DecodeError::UnknownMessageType(raw_type))?;
        let timestamp = wire
            .timestamp
            .ok_or(DecodeError::MissingField("timestamp"))?;
        let app_id = wire.app_id.ok_or(DecodeError::MissingField("app_id"))?;

        Ok(LogRecord {
            payload: Bytes::from(payload),
            app_id,
            message_type,
            source_name: wire.source_name.unwrap_or_default(),
            source_id: wire.source_id,
            timestamp,
        })
    }
}

/// Decode one frame. Stateless; every frame position is treated the same.
pub fn decode(frame: &[u8]) -> Result<LogRecord, DecodeError> {
    if frame.is_empty() {
        return Err(DecodeError::EmptyFrame);
    }
    let wire = LogMessage::decode(frame)?;
    LogRecord::try_from(wire)
}
