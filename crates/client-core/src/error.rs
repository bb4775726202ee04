//! Error types and handling for the client-core library
//!
//! Every fallible operation returns [`ClientResult`]. Errors are grouped so the
//! application layer can decide what to do with them:
//!
//! - **Not found** - an operation referenced an unknown track, endpoint or media
//!   line. This is always a stale reference or a programming error.
//! - **Precondition** - the operation is not valid in the current session state
//!   (e.g. adding a track before the server confirmed the local endpoint). The
//!   operation has no side effect.
//! - **Transport** - the underlying peer connection rejected a description,
//!   candidate or encoding change.
//! - **Protocol** - the signaling peer sent something malformed or reported an
//!   error. A server-reported error ends the session.
//! - **Lifecycle** - the session was torn down while the operation was pending.
//!
//! # Example
//!
//! ```rust
//! use meshroom_client_core::{ClientError, TrackId};
//!
//! let err = ClientError::track_not_found(&TrackId::from("ep-1:abc"));
//! assert!(err.is_not_found());
//! assert_eq!(err.category(), "not_found");
//! ```

use thiserror::Error;

use crate::track::{EndpointId, TrackId, Variant};

/// Result type alias for client-core operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors produced by the negotiation engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Track related errors
    #[error("Track not found: {track_id}")]
    TrackNotFound { track_id: TrackId },

    #[error("Invalid track configuration for {track_id}: {reason}")]
    InvalidTrackConfiguration { track_id: TrackId, reason: String },

    #[error("Variant {variant} is not available for track {track_id}")]
    VariantNotAvailable { track_id: TrackId, variant: Variant },

    #[error("Track {track_id} has no active sender")]
    NoActiveSender { track_id: TrackId },

    #[error("No track is bound to media line {mid}")]
    MediaLineNotFound { mid: String },

    /// Endpoint related errors
    #[error("Endpoint not found: {endpoint_id}")]
    EndpointNotFound { endpoint_id: EndpointId },

    #[error("Endpoint already exists: {endpoint_id}")]
    EndpointAlreadyExists { endpoint_id: EndpointId },

    #[error("Local endpoint id is already assigned ({current}), refusing {requested}")]
    LocalEndpointAlreadyAssigned { current: EndpointId, requested: EndpointId },

    #[error("Session is already connected as {endpoint_id}")]
    AlreadyConnected { endpoint_id: EndpointId },

    /// Session lifecycle errors
    #[error("Session is not connected: local endpoint id is unknown")]
    NotConnected,

    #[error("Session closed before the operation completed")]
    SessionClosed,

    /// Transport errors
    #[error("Transport failed: {reason}")]
    TransportFailed { reason: String },

    #[error("Transport is not available")]
    TransportUnavailable,

    /// Protocol errors
    #[error("Signaling protocol error: {reason}")]
    ProtocolError { reason: String },

    #[error("Invalid media event: {reason}")]
    InvalidMessage { reason: String },

    #[error("Server reported an error: {message}")]
    SignalingError { message: String },

    /// Configuration errors
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Missing required configuration: {field}")]
    MissingConfiguration { field: String },

    /// Generic errors
    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl ClientError {
    /// Create a track not found error
    pub fn track_not_found(track_id: &TrackId) -> Self {
        Self::TrackNotFound { track_id: track_id.clone() }
    }

    /// Create an endpoint not found error
    pub fn endpoint_not_found(endpoint_id: &EndpointId) -> Self {
        Self::EndpointNotFound { endpoint_id: endpoint_id.clone() }
    }

    /// Create an invalid track configuration error
    pub fn invalid_track(track_id: &TrackId, reason: impl Into<String>) -> Self {
        Self::InvalidTrackConfiguration { track_id: track_id.clone(), reason: reason.into() }
    }

    /// Create a transport failure error
    pub fn transport_failed(reason: impl Into<String>) -> Self {
        Self::TransportFailed { reason: reason.into() }
    }

    /// Create a protocol error
    pub fn protocol_error(reason: impl Into<String>) -> Self {
        Self::ProtocolError { reason: reason.into() }
    }

    /// Create an invalid message error
    pub fn invalid_message(reason: impl Into<String>) -> Self {
        Self::InvalidMessage { reason: reason.into() }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration { field: field.into(), reason: reason.into() }
    }

    /// Create an internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Check whether the error references an unknown id
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ClientError::TrackNotFound { .. }
                | ClientError::EndpointNotFound { .. }
                | ClientError::MediaLineNotFound { .. }
        )
    }

    /// Check whether the operation was rejected because of session state
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ClientError::NotConnected
                | ClientError::EndpointAlreadyExists { .. }
                | ClientError::LocalEndpointAlreadyAssigned { .. }
                | ClientError::AlreadyConnected { .. }
                | ClientError::InvalidTrackConfiguration { .. }
                | ClientError::VariantNotAvailable { .. }
                | ClientError::NoActiveSender { .. }
        )
    }

    /// Check if retrying the same operation later could succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            ClientError::TransportFailed { .. }
            | ClientError::TransportUnavailable
            | ClientError::NoActiveSender { .. } => true,

            ClientError::SignalingError { .. }
            | ClientError::InvalidConfiguration { .. }
            | ClientError::MissingConfiguration { .. }
            | ClientError::SessionClosed => false,

            _ => false,
        }
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            ClientError::TrackNotFound { .. }
            | ClientError::EndpointNotFound { .. }
            | ClientError::MediaLineNotFound { .. } => "not_found",

            ClientError::InvalidTrackConfiguration { .. }
            | ClientError::VariantNotAvailable { .. }
            | ClientError::NoActiveSender { .. }
            | ClientError::EndpointAlreadyExists { .. }
            | ClientError::LocalEndpointAlreadyAssigned { .. }
            | ClientError::AlreadyConnected { .. }
            | ClientError::NotConnected => "precondition",

            ClientError::SessionClosed => "lifecycle",

            ClientError::TransportFailed { .. } | ClientError::TransportUnavailable => "transport",

            ClientError::ProtocolError { .. }
            | ClientError::InvalidMessage { .. }
            | ClientError::SignalingError { .. } => "protocol",

            ClientError::InvalidConfiguration { .. }
            | ClientError::MissingConfiguration { .. } => "configuration",

            ClientError::InternalError { .. } => "system",
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::InvalidMessage { reason: err.to_string() }
    }
}
