//! brokerlink - resilient service/topic client for message brokers
//!
//! Client code registers named services (request/response) and topics
//! (publish or subscribe) with a [`ConnectionManager`]. The manager owns the
//! single broker connection, watches its health, reconnects with a bounded
//! or unbounded retry policy, and rebinds every registered resource before
//! announcing that the connection is back.

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod manager;
pub mod message;
pub mod registry;
pub mod transport;
pub mod utils;

pub use config::LinkConfig;
pub use controller::{Backoff, ConnectionState, ReconnectController, ReconnectPolicy};
pub use error::{LinkError, Result};
pub use events::{ConnectionEvent, ConnectionEventHandler, HandlerId};
pub use manager::{ConnectionManager, Publisher, ServiceHandle, Subscriber};
pub use message::{KindCatalog, Message, MessageKind, Payload, Service, ServiceKind};
pub use transport::{Transport, TransportError};
