//! Error types for the log stream consumer.

use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors surfaced by a [`Connection`](crate::Connection), either as the return
/// value of `close()` or as items on the error sequence returned by `tail()`.
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// `close()` was called without an active transport.
    #[error("connection does not exist")]
    NotOpen,

    /// `tail()` was called on a connection that was already used.
    #[error("connection already started")]
    AlreadyStarted,

    /// The transport could not be established.
    #[error("connect error: {0}")]
    Connect(#[from] ConnectError),

    /// A single frame could not be decoded. The stream keeps running.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The transport failed mid-stream.
    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),
}

impl ConsumerError {
    /// Whether this error ended the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConsumerError::Decode(_))
    }
}

/// Failures while dialing the aggregator.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The endpoint could not be turned into a request URL.
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// TCP connect or DNS failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The proxy refused the CONNECT request or answered garbage.
    #[error("proxy error: {0}")]
    Proxy(String),

    /// TLS setup failed before the handshake.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The WebSocket upgrade (including the TLS handshake) failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] tungstenite::Error),

    /// Dial did not complete in time.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// `tail()` was called outside a Tokio runtime.
    #[error("no Tokio runtime to run the connection on")]
    NoRuntime,
}

/// Failures decoding a single frame.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty frame")]
    EmptyFrame,

    #[error("malformed protobuf: {0}")]
    Protobuf(#[from] prost::DecodeError),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("unknown message type {0}")]
    UnknownMessageType(i32),
}
