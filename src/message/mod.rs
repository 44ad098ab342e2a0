//! Message and service kinds.
//!
//! Every message type carried over the broker declares a static
//! [`MessageKind`] tag. Services pair a request kind with a response kind
//! under a service type name. Kinds are resolved at registration time and
//! compared by value, so the registry never needs to look types up by name
//! at runtime.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

pub mod catalog;
pub mod std_types;

pub use catalog::KindCatalog;

/// Wire-neutral payload passed to the transport.
pub type Payload = serde_json::Value;

// ============================================================================
// Kinds
// ============================================================================

/// Static tag naming a message type, e.g. `std_msgs/String`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageKind(&'static str);

impl MessageKind {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Kind declared by a message type.
    pub fn of<M: Message>() -> Self {
        M::KIND
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Service type name together with its request and response kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceKind {
    pub service_type: &'static str,
    pub request: MessageKind,
    pub response: MessageKind,
}

impl ServiceKind {
    /// Kind declared by a service type.
    pub fn of<S: Service>() -> Self {
        S::kind()
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} -> {})",
            self.service_type, self.request, self.response
        )
    }
}

// ============================================================================
// Traits
// ============================================================================

/// A message type that can travel over the broker.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: MessageKind;

    /// Encode into a transport payload.
    fn to_payload(&self) -> Result<Payload> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode from a transport payload.
    fn from_payload(payload: Payload) -> Result<Self> {
        Ok(serde_json::from_value(payload)?)
    }
}

/// A request/response service type.
pub trait Service: Send + Sync + 'static {
    const TYPE: &'static str;
    type Request: Message;
    type Response: Message;

    fn kind() -> ServiceKind {
        ServiceKind {
            service_type: Self::TYPE,
            request: Self::Request::KIND,
            response: Self::Response::KIND,
        }
    }
}

#[cfg(test)]
mod tests;
