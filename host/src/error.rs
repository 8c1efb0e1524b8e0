//! ==============================================================================
//! error.rs - what can go wrong on the wire
//! ==============================================================================
//!
//! purpose:
//!     typed failures of one request/response exchange, split in two classes:
//!     - connection: resolve, no address, connect, connect timeout. nothing
//!       was sent.
//!     - transport: the connection was up but writing or reading failed.
//!
//!     the uploader logs every variant and moves on to the next cycle; none
//!     of them stop the loop.
//!
//! relationships:
//!     - raised by: transport.rs
//!     - logged by: uploader.rs (CycleOutcome::Failed)
//!
//! ==============================================================================

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Failures of a single request/response exchange.
///
/// "no response within the timeout" is not an error: the transport returns an
/// empty response instead, see `transport::exchange`.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("no address found for {host}")]
    NoAddress { host: String },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("timed out connecting to {target}")]
    ConnectTimeout { target: String },

    #[error("failed to send request: {0}")]
    Write(#[source] io::Error),

    #[error("failed to receive response: {0}")]
    Read(#[source] io::Error),
}

impl TransportError {
    /// true when no connection was ever established
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Resolve { .. } | Self::NoAddress { .. } | Self::Connect { .. } | Self::ConnectTimeout { .. }
        )
    }

    /// OS-level socket error code, when the failure carries one
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Resolve { source, .. } | Self::Connect { source, .. } => source.raw_os_error(),
            Self::Write(source) | Self::Read(source) => source.raw_os_error(),
            Self::NoAddress { .. } | Self::ConnectTimeout { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_class() {
        let refused = TransportError::Connect {
            addr: "127.0.0.1:80".parse().unwrap(),
            source: io::Error::from_raw_os_error(111),
        };
        assert!(refused.is_connection());
        assert_eq!(refused.code(), Some(111));

        let reset = TransportError::Read(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(!reset.is_connection());
        assert_eq!(reset.code(), None);
    }

    #[test]
    fn test_display_names_target() {
        let err = TransportError::NoAddress { host: "api.example".to_string() };
        assert_eq!(err.to_string(), "no address found for api.example");
    }
}
