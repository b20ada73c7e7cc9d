//! Engine error kinds per spec §7.
//!
//! Only [`EngineError::Config`] and [`EngineError::Bind`] are fatal — they
//! terminate the process before any socket work starts. Every other
//! variant is constructed, logged, and absorbed at the component that
//! detected it; it never propagates past that point.

use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("transient I/O error: {0}")]
    TransientIo(#[source] std::io::Error),

    #[error("protocol anomaly: {0}")]
    ProtocolAnomaly(String),
}

impl EngineError {
    pub fn config(msg: impl Into<String>) -> Self {
        EngineError::Config(msg.into())
    }
}
