//! Network Error Types
//!
//! Errors for the outbound path (dispatch, serialization, transport send) and
//! the receive path. Receive-path errors never cross the engine thread: they
//! are converted into an [`EngineError`] and published on the engine's error
//! signal.

use dispatch::DispatchError;
use thiserror::Error;

/// Frame-level decoding failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// First two bytes are not the frame marker
    #[error("Invalid marker 0x{found:04X}, expected 0x{expected:04X}")]
    InvalidMarker { found: u16, expected: u16 },

    /// Fewer bytes than a header
    #[error("Truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// Header length field disagrees with the bytes received
    #[error("Length mismatch: header declares {declared} payload bytes, frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Payload cannot be described by a 16-bit length field
    #[error("Payload too large: {size} bytes exceeds {max}")]
    PayloadTooLarge { size: usize, max: usize },
}

/// Main network error type
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Outbound buffer could not be obtained
    #[error("Allocation failed: {context}")]
    Allocation { context: String },

    /// Missing transport, serializer or invalid setting
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Malformed frame
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Argument encode/decode failure
    #[error("Serialization error (endpoint {endpoint:?}): {message}")]
    Serialization {
        endpoint: Option<u16>,
        message: String,
    },

    /// Retries exhausted without an acknowledgment
    #[error("Delivery failed: endpoint {endpoint} seq {seq} after {attempts} attempts")]
    Delivery { endpoint: u16, seq: u16, attempts: u32 },

    /// Backend send/receive failure
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Blocking operation did not complete in time
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Hop onto a worker thread failed
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Result type alias for network operations
pub type Result<T> = std::result::Result<T, NetworkError>;

impl NetworkError {
    /// Create an allocation error
    pub fn allocation(context: impl Into<String>) -> Self {
        Self::Allocation {
            context: context.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Create a serialization error
    pub fn serialization(endpoint: Option<u16>, message: impl Into<String>) -> Self {
        Self::Serialization {
            endpoint,
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error with source
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an I/O error with context
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Attach an endpoint id to a serialization error that lacks one
    pub fn for_endpoint(self, id: u16) -> Self {
        match self {
            Self::Serialization {
                endpoint: None,
                message,
            } => Self::Serialization {
                endpoint: Some(id),
                message,
            },
            other => other,
        }
    }

    /// Taxonomy bucket used on the error signal
    pub fn kind(&self) -> ErrorKind {
        match self {
            NetworkError::Allocation { .. } => ErrorKind::Allocation,
            NetworkError::Configuration { .. } => ErrorKind::Configuration,
            NetworkError::Protocol(_) => ErrorKind::Protocol,
            NetworkError::Serialization { .. } => ErrorKind::Serialization,
            NetworkError::Delivery { .. } => ErrorKind::Delivery,
            NetworkError::Transport { .. } | NetworkError::Io { .. } => ErrorKind::Transport,
            NetworkError::Timeout { .. } => ErrorKind::Delivery,
            NetworkError::Dispatch(DispatchError::Allocation { .. }) => ErrorKind::Allocation,
            NetworkError::Dispatch(_) => ErrorKind::Dispatch,
        }
    }

    /// Check if this is a transient error
    pub fn is_transient(&self) -> bool {
        match self {
            NetworkError::Transport { .. } | NetworkError::Io { .. } => true,
            NetworkError::Timeout { .. } => true,
            NetworkError::Dispatch(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            message: source.to_string(),
            source,
        }
    }
}

/// Error categories published by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Allocation,
    Configuration,
    Protocol,
    Serialization,
    Delivery,
    Transport,
    /// Frame addressed to an id with no registered invoker
    UnknownEndpoint,
    Dispatch,
}

impl ErrorKind {
    /// Stable numeric code for logs and foreign consumers
    pub fn code(self) -> u16 {
        match self {
            ErrorKind::Allocation => 1,
            ErrorKind::Configuration => 2,
            ErrorKind::Protocol => 3,
            ErrorKind::Serialization => 4,
            ErrorKind::Delivery => 5,
            ErrorKind::Transport => 6,
            ErrorKind::UnknownEndpoint => 7,
            ErrorKind::Dispatch => 8,
        }
    }
}

/// Notification published on the engine's error signal
#[derive(Debug, Clone)]
pub struct EngineError {
    /// Endpoint the failure relates to (0 when not tied to one)
    pub endpoint: u16,
    pub kind: ErrorKind,
    /// Auxiliary numeric code, `kind.code()`
    pub code: u16,
    pub message: String,
}

impl EngineError {
    pub fn new(endpoint: u16, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            endpoint,
            kind,
            code: kind.code(),
            message: message.into(),
        }
    }

    pub fn from_error(endpoint: u16, error: &NetworkError) -> Self {
        Self::new(endpoint, error.kind(), error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_errors_convert() {
        let err: NetworkError = ProtocolError::InvalidMarker {
            found: 0x1234,
            expected: 0x55AA,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(err.to_string().contains("0x1234"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_dispatch_allocation_maps_to_allocation_kind() {
        let err = NetworkError::from(DispatchError::allocation("args"));
        assert_eq!(err.kind(), ErrorKind::Allocation);

        let err = NetworkError::from(DispatchError::thread_stopped("network"));
        assert_eq!(err.kind(), ErrorKind::Dispatch);
    }

    #[test]
    fn test_for_endpoint_fills_missing_id() {
        let err = NetworkError::serialization(None, "eof").for_endpoint(9);
        assert!(matches!(
            err,
            NetworkError::Serialization {
                endpoint: Some(9),
                ..
            }
        ));
    }

    #[test]
    fn test_engine_error_carries_kind_code() {
        let event = EngineError::new(3, ErrorKind::UnknownEndpoint, "no invoker");
        assert_eq!(event.code, 7);
        assert_eq!(event.endpoint, 3);
    }
}
