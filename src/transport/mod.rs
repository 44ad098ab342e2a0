//! Transport abstraction over the broker connection.
//!
//! This module contains:
//! - `Transport` trait: the physical connection plus service/topic bind hooks
//! - `BindingToken`: opaque handle for one binding on one session
//! - Implementations: in-memory channel broker, scripted mock

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::message::{MessageKind, Payload, ServiceKind};

#[cfg(feature = "channel")]
pub mod channel;
pub mod mock;

#[cfg(feature = "channel")]
pub use channel::{ChannelBroker, ChannelTransport};
pub use mock::MockTransport;

// ============================================================================
// Traits
// ============================================================================

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Connection lost")]
    Disconnected,

    #[error("Unknown binding: {0}")]
    UnknownBinding(String),

    #[error("Rejected by broker: {0}")]
    Rejected(String),
}

impl TransportError {
    /// True when the error means the underlying session is gone.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            TransportError::Disconnected | TransportError::Connection(_)
        )
    }
}

/// Callback invoked with each payload received on a subscribed topic.
pub type MessageCallback = Arc<dyn Fn(Payload) + Send + Sync>;

/// Opaque token identifying a binding on the current session.
///
/// Tokens do not survive a reconnection: a new session issues new tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingToken(String);

impl BindingToken {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a unique token for a resource name.
    pub fn generate(name: &str) -> Self {
        Self(format!("{}#{}", name, uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BindingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connection to a broker.
///
/// `connect` starts a session; the caller polls `is_connected` to learn when
/// it is usable. Bind hooks are only valid while connected and their tokens
/// belong to the session that issued them.
///
/// Implementations:
/// - `ChannelTransport`: in-process broker over tokio channels
/// - `MockTransport`: scripted failures for testing
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new session.
    async fn connect(&self) -> Result<()>;

    /// Non-blocking health poll.
    fn is_connected(&self) -> bool;

    /// Close the current session, dropping every binding it holds.
    async fn disconnect(&self);

    async fn bind_service(&self, name: &str, kind: ServiceKind) -> Result<BindingToken>;

    async fn advertise(&self, name: &str, kind: MessageKind) -> Result<BindingToken>;

    async fn subscribe(
        &self,
        name: &str,
        kind: MessageKind,
        callback: MessageCallback,
    ) -> Result<BindingToken>;

    async fn unadvertise(&self, token: &BindingToken) -> Result<()>;

    async fn unsubscribe(&self, token: &BindingToken) -> Result<()>;

    /// Publish a payload on an advertised topic.
    async fn send(&self, token: &BindingToken, payload: Payload) -> Result<()>;

    /// Invoke a bound service and wait for its response.
    async fn call_service(&self, token: &BindingToken, request: Payload) -> Result<Payload>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_lost_classification() {
        assert!(TransportError::Disconnected.is_connection_lost());
        assert!(TransportError::Connection("reset".into()).is_connection_lost());
        assert!(!TransportError::Rejected("nope".into()).is_connection_lost());
        assert!(!TransportError::UnknownBinding("t".into()).is_connection_lost());
    }

    #[test]
    fn test_generated_tokens_are_unique() {
        let a = BindingToken::generate("/chatter");
        let b = BindingToken::generate("/chatter");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("/chatter#"));
    }
}
