//! Resource registry: the source of truth for which services and topics
//! should exist on the broker.
//!
//! Names are unique across both resource kinds. Registration is idempotent:
//! registering a name again with the same kind returns the existing entry,
//! while a conflicting kind or role is an error and leaves the entry alone.
//!
//! The registry performs no I/O of its own. Binding forwards to whichever
//! transport the caller passes in, and binding tokens are dropped wholesale
//! when the session they belong to ends.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, info, warn};

use crate::error::{LinkError, Result};
use crate::message::{MessageKind, Payload, ServiceKind};
use crate::transport::{BindingToken, MessageCallback, Transport, TransportError};

// ============================================================================
// Descriptors
// ============================================================================

/// Registry record for a request/response service.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    name: String,
    kind: ServiceKind,
    default_request: Option<Payload>,
    binding: Option<BindingToken>,
}

impl ServiceDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    pub fn default_request(&self) -> Option<&Payload> {
        self.default_request.as_ref()
    }

    pub fn binding(&self) -> Option<&BindingToken> {
        self.binding.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }
}

/// Direction of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicRole {
    Publisher,
    Subscriber,
}

impl fmt::Display for TopicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicRole::Publisher => f.write_str("publisher"),
            TopicRole::Subscriber => f.write_str("subscriber"),
        }
    }
}

/// Registry record for a topic.
#[derive(Clone)]
pub struct TopicDescriptor {
    name: String,
    role: TopicRole,
    kind: MessageKind,
    callback: Option<MessageCallback>,
    binding: Option<BindingToken>,
}

impl TopicDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> TopicRole {
        self.role
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn binding(&self) -> Option<&BindingToken> {
        self.binding.as_ref()
    }

    /// Advertised or subscribed on the live session.
    pub fn is_active(&self) -> bool {
        self.binding.is_some()
    }

    fn describe(&self) -> String {
        format!("{} of {}", self.role, self.kind)
    }
}

impl fmt::Debug for TopicDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicDescriptor")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("kind", &self.kind)
            .field("has_callback", &self.callback.is_some())
            .field("binding", &self.binding)
            .finish()
    }
}

/// Outcome of an idempotent registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registered {
    New,
    Existing,
}

/// Result of binding every unbound descriptor.
#[derive(Debug, Default)]
pub struct BindReport {
    pub bound: usize,
    pub failed: Vec<(String, TransportError)>,
}

impl BindReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Name-keyed store of service and topic descriptors, iterated in
/// registration order.
#[derive(Default)]
pub struct ResourceRegistry {
    services: HashMap<String, ServiceDescriptor>,
    service_order: Vec<String>,
    topics: HashMap<String, TopicDescriptor>,
    topic_order: Vec<String>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_service(
        &mut self,
        name: &str,
        kind: ServiceKind,
        default_request: Option<Payload>,
    ) -> Result<Registered> {
        validate_name(name)?;
        if self.topics.contains_key(name) {
            return Err(LinkError::DuplicateName(name.to_string()));
        }
        if let Some(existing) = self.services.get(name) {
            if existing.kind == kind {
                debug!(service = %name, "Service already registered, returning existing");
                return Ok(Registered::Existing);
            }
            return Err(LinkError::IncompatibleType {
                name: name.to_string(),
                existing: existing.kind.to_string(),
                requested: kind.to_string(),
            });
        }

        info!(service = %name, service_type = kind.service_type, "Registering service");
        self.services.insert(
            name.to_string(),
            ServiceDescriptor {
                name: name.to_string(),
                kind,
                default_request,
                binding: None,
            },
        );
        self.service_order.push(name.to_string());
        Ok(Registered::New)
    }

    pub fn service(&self, name: &str) -> Result<&ServiceDescriptor> {
        self.services
            .get(name)
            .ok_or_else(|| LinkError::NotFound(name.to_string()))
    }

    /// Service names in registration order.
    pub fn service_names(&self) -> Vec<String> {
        self.service_order.clone()
    }

    pub fn set_default_request(&mut self, name: &str, request: Payload) -> Result<()> {
        let service = self
            .services
            .get_mut(name)
            .ok_or_else(|| LinkError::NotFound(name.to_string()))?;
        service.default_request = Some(request);
        Ok(())
    }

    /// Register a topic. A callback is required for subscribers and rejected
    /// for publishers.
    pub fn register_topic(
        &mut self,
        name: &str,
        role: TopicRole,
        kind: MessageKind,
        callback: Option<MessageCallback>,
    ) -> Result<Registered> {
        validate_name(name)?;
        match (role, callback.is_some()) {
            (TopicRole::Subscriber, false) => {
                return Err(LinkError::InvalidConfig(format!(
                    "subscriber '{}' requires a callback",
                    name
                )))
            }
            (TopicRole::Publisher, true) => {
                return Err(LinkError::InvalidConfig(format!(
                    "publisher '{}' does not take a callback",
                    name
                )))
            }
            _ => {}
        }
        if self.services.contains_key(name) {
            return Err(LinkError::DuplicateName(name.to_string()));
        }
        if let Some(existing) = self.topics.get(name) {
            if existing.role == role && existing.kind == kind {
                if role == TopicRole::Subscriber {
                    warn!(topic = %name, "Subscriber already registered, keeping its callback");
                } else {
                    debug!(topic = %name, "Publisher already registered, returning existing");
                }
                return Ok(Registered::Existing);
            }
            return Err(LinkError::IncompatibleType {
                name: name.to_string(),
                existing: existing.describe(),
                requested: format!("{} of {}", role, kind),
            });
        }

        info!(topic = %name, role = %role, kind = %kind, "Registering topic");
        self.topics.insert(
            name.to_string(),
            TopicDescriptor {
                name: name.to_string(),
                role,
                kind,
                callback,
                binding: None,
            },
        );
        self.topic_order.push(name.to_string());
        Ok(Registered::New)
    }

    pub fn topic(&self, name: &str) -> Result<&TopicDescriptor> {
        self.topics
            .get(name)
            .ok_or_else(|| LinkError::NotFound(name.to_string()))
    }

    /// Topic names in registration order.
    pub fn topic_names(&self) -> Vec<String> {
        self.topic_order.clone()
    }

    /// Replace a subscriber's callback. Returns the binding of the old
    /// subscription, if any, which the caller must release.
    pub fn set_topic_callback(
        &mut self,
        name: &str,
        callback: MessageCallback,
    ) -> Result<Option<BindingToken>> {
        let topic = self
            .topics
            .get_mut(name)
            .ok_or_else(|| LinkError::NotFound(name.to_string()))?;
        if topic.role != TopicRole::Subscriber {
            return Err(LinkError::InvalidConfig(format!(
                "'{}' is a publisher and has no callback",
                name
            )));
        }
        topic.callback = Some(callback);
        Ok(topic.binding.take())
    }

    /// Drop a topic's binding after its session was found dead. Ignored if
    /// the topic has since been rebound under a different token.
    pub fn mark_topic_inactive(&mut self, name: &str, token: &BindingToken) {
        if let Some(topic) = self.topics.get_mut(name) {
            if topic.binding.as_ref() == Some(token) {
                topic.binding = None;
                warn!(topic = %name, "Topic marked inactive");
            }
        }
    }

    /// Remove a topic, unadvertising or unsubscribing it first when a
    /// transport is supplied. Returns false if the name was not registered.
    pub async fn remove_topic(&mut self, name: &str, transport: Option<&dyn Transport>) -> bool {
        let Some(topic) = self.topics.remove(name) else {
            return false;
        };
        self.topic_order.retain(|n| n != name);

        if let (Some(token), Some(transport)) = (topic.binding.as_ref(), transport) {
            if let Err(e) = release(transport, topic.role, token).await {
                warn!(topic = %name, error = %e, "Failed to release topic binding");
            }
        }
        info!(topic = %name, "Topic removed");
        true
    }

    /// Bind one service if it is not already bound.
    pub async fn bind_service(&mut self, name: &str, transport: &dyn Transport) -> Result<()> {
        let service = self
            .services
            .get_mut(name)
            .ok_or_else(|| LinkError::NotFound(name.to_string()))?;
        if service.binding.is_none() {
            let token = transport.bind_service(&service.name, service.kind).await?;
            debug!(service = %name, token = %token, "Service bound");
            service.binding = Some(token);
        }
        Ok(())
    }

    /// Advertise or subscribe one topic if it is not already active.
    pub async fn bind_topic(&mut self, name: &str, transport: &dyn Transport) -> Result<()> {
        let topic = self
            .topics
            .get_mut(name)
            .ok_or_else(|| LinkError::NotFound(name.to_string()))?;
        if topic.binding.is_none() {
            let token = match (&topic.role, &topic.callback) {
                (TopicRole::Subscriber, Some(callback)) => {
                    transport
                        .subscribe(&topic.name, topic.kind, callback.clone())
                        .await?
                }
                _ => transport.advertise(&topic.name, topic.kind).await?,
            };
            debug!(topic = %name, token = %token, "Topic bound");
            topic.binding = Some(token);
        }
        Ok(())
    }

    /// Bind every descriptor not yet bound on the current session, services
    /// first, each kind in registration order. Failures are collected, not
    /// propagated; failed entries stay unbound.
    pub async fn bind_all(&mut self, transport: &dyn Transport) -> BindReport {
        let mut report = BindReport::default();

        for name in self.service_order.clone() {
            if self.services.get(&name).is_some_and(|s| s.is_bound()) {
                continue;
            }
            match self.bind_service(&name, transport).await {
                Ok(()) => report.bound += 1,
                Err(LinkError::Transport(e)) => report.failed.push((name, e)),
                Err(e) => warn!(service = %name, error = %e, "Unexpected bind error"),
            }
        }
        for name in self.topic_order.clone() {
            if self.topics.get(&name).is_some_and(|t| t.is_active()) {
                continue;
            }
            match self.bind_topic(&name, transport).await {
                Ok(()) => report.bound += 1,
                Err(LinkError::Transport(e)) => report.failed.push((name, e)),
                Err(e) => warn!(topic = %name, error = %e, "Unexpected bind error"),
            }
        }

        for (name, error) in &report.failed {
            warn!(resource = %name, error = %error, "Failed to bind resource");
        }
        report
    }

    /// Forget every binding. Called when the session they belong to is gone.
    pub fn clear_bindings(&mut self) {
        for service in self.services.values_mut() {
            service.binding = None;
        }
        for topic in self.topics.values_mut() {
            topic.binding = None;
        }
    }

    /// Release every active topic on the live session, then forget all
    /// bindings. Services have no release hook.
    pub async fn unbind_all(&mut self, transport: &dyn Transport) {
        for name in &self.topic_order {
            let Some(topic) = self.topics.get_mut(name) else {
                continue;
            };
            if let Some(token) = topic.binding.take() {
                if let Err(e) = release(transport, topic.role, &token).await {
                    debug!(topic = %name, error = %e, "Release during unbind failed");
                }
            }
        }
        self.clear_bindings();
    }

    /// Number of descriptors without a binding.
    pub fn unbound_count(&self) -> usize {
        self.services.values().filter(|s| !s.is_bound()).count()
            + self.topics.values().filter(|t| !t.is_active()).count()
    }

    pub fn len(&self) -> usize {
        self.services.len() + self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every descriptor.
    pub fn clear(&mut self) {
        self.services.clear();
        self.service_order.clear();
        self.topics.clear();
        self.topic_order.clear();
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(LinkError::InvalidConfig(
            "resource name must not be empty".to_string(),
        ));
    }
    Ok(())
}

async fn release(
    transport: &dyn Transport,
    role: TopicRole,
    token: &BindingToken,
) -> std::result::Result<(), TransportError> {
    match role {
        TopicRole::Publisher => transport.unadvertise(token).await,
        TopicRole::Subscriber => transport.unsubscribe(token).await,
    }
}
