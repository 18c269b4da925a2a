//! Error types and handling for Triton
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for Triton operations
pub type Result<T> = std::result::Result<T, TritonError>;

/// Main error type for Triton
#[derive(Debug, Clone, Error)]
pub enum TritonError {
    /// Input referenced an unknown equipment item
    #[error("Equipment not found: {kind} {id}")]
    EquipmentNotFound { kind: String, id: u32 },

    /// Input failed a range, enum membership, or shape check
    #[error("Invalid equipment data: {kind} {id} field {field} - {reason}")]
    InvalidEquipmentData {
        kind: String,
        id: u32,
        field: String,
        reason: String,
    },

    /// The controller variant lacks the requested capability
    #[error("Invalid operation for {controller_type}: {intent}")]
    InvalidOperation {
        controller_type: String,
        intent: String,
    },

    /// The delay manager refused the operation
    #[error("Interlock violation: {conflicting_key}")]
    InterlockViolation { conflicting_key: String },

    /// The underlying port resource rejected open
    #[error("Port {port_id} unavailable: {cause}")]
    PortUnavailable { port_id: u8, cause: String },

    /// The port was lost mid-operation
    #[error("Port {port_id} closed")]
    PortClosed { port_id: u8 },

    /// A write exceeded the port's backpressure bound
    #[error("Write rejected on port {port_id}")]
    WriteRejected { port_id: u8 },

    /// Framing or checksum failure exhaustion
    #[error("Protocol error on port {port_id}: {detail}")]
    ProtocolError { port_id: u8, detail: String },

    /// An outbound transaction timed out after all retries
    #[error("No response on port {port_id} to {descriptor}")]
    NoResponse { port_id: u8, descriptor: String },

    /// Intent aborted by the caller or by shutdown
    #[error("Cancelled")]
    Cancelled,

    /// An atomic persistence write failed
    #[error("Persistence error at {path}: {cause}")]
    PersistenceError { path: String, cause: String },

    /// A persisted file failed to parse; recovered to defaults
    #[error("Configuration corrupt: {path}")]
    ConfigurationCorrupt { path: String },

    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Invariant broken; reserved for assertions
    #[error("Internal error: {cause}")]
    Internal { cause: String },
}

impl TritonError {
    /// Create a new equipment-not-found error
    pub fn not_found<S: Into<String>>(kind: S, id: u32) -> Self {
        TritonError::EquipmentNotFound {
            kind: kind.into(),
            id,
        }
    }

    /// Create a new invalid-equipment-data error
    pub fn invalid_data<S: Into<String>>(kind: S, id: u32, field: S, reason: S) -> Self {
        TritonError::InvalidEquipmentData {
            kind: kind.into(),
            id,
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a new invalid-operation error
    pub fn invalid_operation<S: Into<String>>(controller_type: S, intent: S) -> Self {
        TritonError::InvalidOperation {
            controller_type: controller_type.into(),
            intent: intent.into(),
        }
    }

    /// Create a new interlock violation
    pub fn interlock<S: Into<String>>(conflicting_key: S) -> Self {
        TritonError::InterlockViolation {
            conflicting_key: conflicting_key.into(),
        }
    }

    /// Create a new port-unavailable error
    pub fn port_unavailable<S: Into<String>>(port_id: u8, cause: S) -> Self {
        TritonError::PortUnavailable {
            port_id,
            cause: cause.into(),
        }
    }

    /// Create a new port-closed error
    pub fn port_closed(port_id: u8) -> Self {
        TritonError::PortClosed { port_id }
    }

    /// Create a new write-rejected error
    pub fn write_rejected(port_id: u8) -> Self {
        TritonError::WriteRejected { port_id }
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(port_id: u8, detail: S) -> Self {
        TritonError::ProtocolError {
            port_id,
            detail: detail.into(),
        }
    }

    /// Create a new no-response error
    pub fn no_response<S: Into<String>>(port_id: u8, descriptor: S) -> Self {
        TritonError::NoResponse {
            port_id,
            descriptor: descriptor.into(),
        }
    }

    /// Create a new persistence error
    pub fn persistence<S: Into<String>>(path: S, cause: S) -> Self {
        TritonError::PersistenceError {
            path: path.into(),
            cause: cause.into(),
        }
    }

    /// Create a new configuration-corrupt error
    pub fn corrupt<S: Into<String>>(path: S) -> Self {
        TritonError::ConfigurationCorrupt { path: path.into() }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        TritonError::Config {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(cause: S) -> Self {
        TritonError::Internal {
            cause: cause.into(),
        }
    }

    /// Whether this error indicates a transport-level failure that the
    /// port layer recovers from with reconnect and backoff
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            TritonError::PortUnavailable { .. }
                | TritonError::PortClosed { .. }
                | TritonError::WriteRejected { .. }
        )
    }
}

impl From<serde_yaml::Error> for TritonError {
    fn from(err: serde_yaml::Error) -> Self {
        TritonError::config(err.to_string())
    }
}

impl From<std::io::Error> for TritonError {
    fn from(err: std::io::Error) -> Self {
        TritonError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = TritonError::not_found("circuit", 6);
        assert!(matches!(err, TritonError::EquipmentNotFound { .. }));

        let err = TritonError::protocol(0, "checksum mismatch");
        assert!(matches!(err, TritonError::ProtocolError { .. }));

        let err = TritonError::invalid_data("body", 1, "setPoint", "out of range");
        assert!(matches!(err, TritonError::InvalidEquipmentData { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = TritonError::interlock("spa-heat");
        assert_eq!(format!("{}", err), "Interlock violation: spa-heat");

        let err = TritonError::no_response(0, "action 134 to 16");
        assert_eq!(
            format!("{}", err),
            "No response on port 0 to action 134 to 16"
        );
    }

    #[test]
    fn test_is_transport() {
        assert!(TritonError::port_closed(1).is_transport());
        assert!(!TritonError::Cancelled.is_transport());
    }
}
