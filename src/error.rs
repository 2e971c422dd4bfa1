//! Error types for AquaFlow.
//!
//! All errors are strongly typed using thiserror. Transport and collaborator
//! failures are recoverable and never stop the sampling loop; validation
//! errors are reported when a configuration is built.

use thiserror::Error;

/// Validation errors that occur while building a configuration or input.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Window size must be at least 1")]
    EmptyWindow,

    #[error("Tick interval must be greater than zero")]
    ZeroTickInterval,

    #[error("Invalid usage range for {field}: low ({low}) must be non-negative and below high ({high})")]
    InvalidRange {
        field: String,
        low: f64,
        high: f64,
    },

    #[error("Threshold '{field}' must be finite and non-negative, got {value}")]
    InvalidThreshold {
        field: String,
        value: f64,
    },

    #[error("'{field}' must be at least 1")]
    ZeroCount {
        field: String,
    },

    #[error("Scaler standard deviation must be positive, got {std}")]
    DegenerateScaler {
        std: f64,
    },

    #[error("Reading precision {precision} exceeds maximum of {max}")]
    PrecisionTooHigh {
        precision: u32,
        max: u32,
    },

    #[error("Failed to parse configuration: {message}")]
    MalformedConfig {
        message: String,
    },

    #[error("Usage reading must be finite and non-negative, got {value}")]
    InvalidReading {
        value: f64,
    },
}

/// Transport errors for the command channel.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        message: String,
    },

    #[error("Failed to bind {addr}: {message}")]
    BindFailed {
        addr: String,
        message: String,
    },

    #[error("Peer closed the connection before responding")]
    ClosedByPeer,

    #[error("Protocol violation: {message}")]
    ProtocolViolation {
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by external collaborators (persistence, identity, bridge).
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Persistence write failed: {message}")]
    Persistence {
        message: String,
    },

    #[error("Identity lookup failed: {message}")]
    Identity {
        message: String,
    },

    #[error("Bridge event rejected: {message}")]
    Bridge {
        message: String,
    },

    #[error("Collaborator '{name}' is unavailable")]
    Unavailable {
        name: String,
    },
}

/// Top-level error type for AquaFlow.
#[derive(Debug, Error)]
pub enum MeterError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl MeterError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a transport error.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if this is a collaborator error.
    #[must_use]
    pub const fn is_collaborator(&self) -> bool {
        matches!(self, Self::Collaborator(_))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Internal { .. } => false,
            Self::Transport(e) => matches!(
                e,
                TransportError::ConnectionFailed { .. } | TransportError::ClosedByPeer
            ),
            Self::Collaborator(_) => true,
        }
    }
}

/// Result type alias for AquaFlow operations.
pub type MeterResult<T> = Result<T, MeterError>;

/// Text of a caught panic payload, for logging.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
