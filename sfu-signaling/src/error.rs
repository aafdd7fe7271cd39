//! Error types for the signaling core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Signaling error taxonomy.
///
/// Every variant maps to a stable kind string (see [`SignalingError::kind`]) that is
/// sent to the client alongside the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalingError {
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Producer gone: {0}")]
    ProducerGone(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("Remote peer has no producer: {0}")]
    NoProducer(String),

    #[error("Device already negotiated: {0}")]
    AlreadyNegotiated(String),

    #[error("Duplicate producer transport: {0}")]
    DuplicateProducerTransport(String),

    #[error("Transport not ready: {0}")]
    TransportNotReady(String),

    #[error("Session closed: {0}")]
    SessionClosed(String),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("DTLS failure: {0}")]
    DtlsFailure(String),

    #[error("Unsupported media: {0}")]
    UnsupportedMedia(String),

    #[error("Incompatible capabilities: {0}")]
    IncompatibleCapabilities(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl SignalingError {
    /// Build an invariant violation and log it; these are bugs, never user errors.
    pub fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(message = %message, "Registry invariant violated");
        Self::InvariantViolation(message)
    }

    /// Stable kind string sent to clients
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ProtocolViolation(_) => "ProtocolViolation",
            Self::Forbidden(_) => "Forbidden",
            Self::NotFound(_) => "NotFound",
            Self::ProducerGone(_) => "ProducerGone",
            Self::PeerNotFound(_) => "PeerNotFound",
            Self::NoProducer(_) => "NoProducer",
            Self::AlreadyNegotiated(_) => "AlreadyNegotiated",
            Self::DuplicateProducerTransport(_) => "DuplicateProducerTransport",
            Self::TransportNotReady(_) => "TransportNotReady",
            Self::SessionClosed(_) => "SessionClosed",
            Self::CapacityExceeded(_) => "CapacityExceeded",
            Self::EngineUnavailable(_) => "EngineUnavailable",
            Self::DtlsFailure(_) => "DtlsFailure",
            Self::UnsupportedMedia(_) => "UnsupportedMedia",
            Self::IncompatibleCapabilities(_) => "IncompatibleCapabilities",
            Self::InvariantViolation(_) => "InvariantViolation",
        }
    }

    /// Whether the failure was reported by the engine rather than the core
    #[must_use]
    pub const fn is_engine_error(&self) -> bool {
        matches!(
            self,
            Self::EngineUnavailable(_)
                | Self::DtlsFailure(_)
                | Self::UnsupportedMedia(_)
                | Self::IncompatibleCapabilities(_)
        )
    }

    /// Structured payload for a failure response
    #[must_use]
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

/// Failure payload carried by a signaling response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl From<SignalingError> for ErrorBody {
    fn from(err: SignalingError) -> Self {
        err.to_body()
    }
}

/// Result type for signaling operations
pub type Result<T> = std::result::Result<T, SignalingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_stable() {
        assert_eq!(
            SignalingError::ProducerGone("p1".into()).kind(),
            "ProducerGone"
        );
        assert_eq!(
            SignalingError::DuplicateProducerTransport("a".into()).kind(),
            "DuplicateProducerTransport"
        );
    }

    #[test]
    fn test_error_body() {
        let body = SignalingError::Forbidden("transport t1 is not yours".into()).to_body();
        assert_eq!(body.kind, "Forbidden");
        assert_eq!(body.message, "Forbidden: transport t1 is not yours");

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["kind"], "Forbidden");
    }

    #[test]
    fn test_engine_error_classification() {
        assert!(SignalingError::DtlsFailure("x".into()).is_engine_error());
        assert!(!SignalingError::NotFound("x".into()).is_engine_error());
    }
}
