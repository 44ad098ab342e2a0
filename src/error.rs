//! Error types for brokerlink.
//!
//! Registry errors (`DuplicateName`, `IncompatibleType`, `NotFound`,
//! `InvalidConfig`) are returned synchronously and never fatal. Connection
//! errors (`NotBound`, `NotActive`) are transient: callers may retry once a
//! `Connected` event has been observed.

use std::time::Duration;

use crate::transport::TransportError;

/// Result type for brokerlink operations.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Errors that can occur while registering or using services and topics.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Name is already taken by a resource of a different kind
    /// (e.g. registering a topic under a service's name).
    #[error("name '{0}' is already registered as a different resource kind")]
    DuplicateName(String),

    /// Name exists with a different message type or topic role.
    #[error("'{name}' is registered as {existing}, requested {requested}")]
    IncompatibleType {
        name: String,
        existing: String,
        requested: String,
    },

    #[error("'{0}' is not registered")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Service exists but the connection is not live.
    #[error("service '{0}' is not bound to a live connection")]
    NotBound(String),

    /// Topic exists but is not advertised/subscribed on a live connection.
    #[error("topic '{0}' is not active")]
    NotActive(String),

    #[error("connection attempt timed out after {0:?}")]
    ConnectionTimeout(Duration),

    #[error("reconnection failed after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// An in-flight connection attempt was stopped.
    #[error("connection attempt cancelled")]
    Cancelled,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("payload codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl LinkError {
    /// Returns true for errors raised by registry mutation.
    pub fn is_registration_error(&self) -> bool {
        matches!(
            self,
            LinkError::DuplicateName(_)
                | LinkError::IncompatibleType { .. }
                | LinkError::NotFound(_)
                | LinkError::InvalidConfig(_)
        )
    }

    /// Returns true for errors expected to clear after a reconnection.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LinkError::NotBound(_)
                | LinkError::NotActive(_)
                | LinkError::ConnectionTimeout(_)
                | LinkError::Transport(_)
        )
    }
}
