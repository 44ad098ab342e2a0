//! Explicit name-to-kind catalog.
//!
//! Used where kinds arrive as strings (configuration files). Each supported
//! type is registered once up front; lookups never go past the catalog.

use std::collections::HashMap;

use tracing::debug;

use super::std_types::{
    Bool, Empty, EmptySrv, Float64, Int32, SetBool, StringMsg, Trigger,
};
use super::{Message, MessageKind, Service, ServiceKind};

/// Catalog of known message and service kinds keyed by type name.
#[derive(Debug, Clone, Default)]
pub struct KindCatalog {
    messages: HashMap<&'static str, MessageKind>,
    services: HashMap<&'static str, ServiceKind>,
}

impl KindCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog preloaded with `std_msgs` and `std_srvs` kinds.
    pub fn with_std_types() -> Self {
        let mut catalog = Self::new();
        catalog
            .register_message::<StringMsg>()
            .register_message::<Bool>()
            .register_message::<Int32>()
            .register_message::<Float64>()
            .register_message::<Empty>()
            .register_service::<Trigger>()
            .register_service::<SetBool>()
            .register_service::<EmptySrv>();
        catalog
    }

    pub fn register_message<M: Message>(&mut self) -> &mut Self {
        let kind = M::KIND;
        debug!(kind = %kind, "Registering message kind");
        self.messages.insert(kind.name(), kind);
        self
    }

    /// Registers a service and both of its message kinds.
    pub fn register_service<S: Service>(&mut self) -> &mut Self {
        let kind = S::kind();
        debug!(service_type = kind.service_type, "Registering service kind");
        self.register_message::<S::Request>();
        self.register_message::<S::Response>();
        self.services.insert(kind.service_type, kind);
        self
    }

    pub fn message(&self, name: &str) -> Option<MessageKind> {
        self.messages.get(name).copied()
    }

    pub fn service(&self, service_type: &str) -> Option<ServiceKind> {
        self.services.get(service_type).copied()
    }

    /// Registered service type names, sorted.
    pub fn service_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.services.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
