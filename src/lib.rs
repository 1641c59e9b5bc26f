// src/lib.rs
pub mod cli;
mod connection;
mod error;
pub mod logging;
pub mod message;

pub use connection::{
    Connection, ConnectionConfig, ConnectionState, Errors, ProxyConfig, Records, TlsConfig,
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_ERROR_BUFFER, DEFAULT_KEEPALIVE_INTERVAL,
    DEFAULT_RECORD_BUFFER, KEEPALIVE_FRAME,
};
pub use error::{ConnectError, ConsumerError, DecodeError};
pub use message::{decode, LogMessage, LogRecord, MessageType};

// Re-export tracing for use in other modules
pub use tracing;
