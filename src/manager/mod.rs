//! Connection manager: the entry point for client code.
//!
//! Wraps one [`ReconnectController`] and exposes name-based registration of
//! services and topics, typed calls and publishes, policy knobs, and event
//! subscription. The manager is an explicitly constructed value; clone it to
//! share it between tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{LinkConfig, ServiceDeclaration};
use crate::controller::{
    Backoff, ConnectionState, LinkCore, ReconnectController, ReconnectPolicy,
    DEFAULT_HEALTH_CHECK_INTERVAL,
};
use crate::error::{LinkError, Result};
use crate::events::{ConnectionEvent, ConnectionEventHandler, HandlerId};
use crate::message::{KindCatalog, Message, MessageKind, Payload, Service, ServiceKind};
use crate::registry::{Registered, ServiceDescriptor, TopicDescriptor, TopicRole};
use crate::transport::{BindingToken, MessageCallback, Transport, TransportError};

mod handles;

pub use handles::{Publisher, ServiceHandle, Subscriber};

/// Client-facing facade over the connection lifecycle.
#[derive(Clone)]
pub struct ConnectionManager {
    controller: Arc<ReconnectController>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, policy: ReconnectPolicy) -> Self {
        Self::with_health_check_interval(transport, policy, DEFAULT_HEALTH_CHECK_INTERVAL)
    }

    pub fn with_health_check_interval(
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
        health_check_interval: Duration,
    ) -> Self {
        Self {
            controller: ReconnectController::new(transport, policy, health_check_interval),
        }
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &LinkConfig) -> Self {
        info!(
            endpoint = %config.connection.endpoint(),
            max_attempts = config.reconnect.max_attempts,
            "Creating connection manager"
        );
        Self::with_health_check_interval(
            transport,
            config.reconnect.to_policy(),
            config.connection.health_check_interval(),
        )
    }

    pub fn controller(&self) -> &Arc<ReconnectController> {
        &self.controller
    }

    /// Start health monitoring and connect. Equivalent to [`connect`](Self::connect).
    pub async fn start(&self) -> Result<()> {
        self.controller.connect().await
    }

    /// Connect, starting the health monitor on first use.
    pub async fn connect(&self) -> Result<()> {
        self.controller.connect().await
    }

    /// Stop monitoring and reconnection, release every topic and clear the
    /// registry.
    pub async fn shutdown(&self) {
        self.controller.shutdown().await;
    }

    // ========================================================================
    // Services
    // ========================================================================

    /// Register a service, or return the existing one of the same type.
    ///
    /// Binds immediately when connected; otherwise on the next connection.
    pub async fn create_service<S: Service>(
        &self,
        name: &str,
        default_request: Option<S::Request>,
    ) -> Result<ServiceHandle<S>> {
        let default_request = default_request.map(|r| r.to_payload()).transpose()?;
        self.register_service_kind(name, S::kind(), default_request)
            .await?;
        Ok(ServiceHandle::new(name, self.clone()))
    }

    /// Handle to an already registered service.
    pub async fn service<S: Service>(&self, name: &str) -> Result<ServiceHandle<S>> {
        let core = self.controller.lock().await;
        check_service(core.registry.service(name)?, S::kind())?;
        Ok(ServiceHandle::new(name, self.clone()))
    }

    pub async fn service_names(&self) -> Vec<String> {
        self.controller.lock().await.registry.service_names()
    }

    pub async fn is_service_bound(&self, name: &str) -> bool {
        let core = self.controller.lock().await;
        core.state == ConnectionState::Connected
            && core.registry.service(name).is_ok_and(|s| s.is_bound())
    }

    pub async fn set_default_request<S: Service>(
        &self,
        name: &str,
        request: &S::Request,
    ) -> Result<()> {
        let payload = request.to_payload()?;
        let mut core = self.controller.lock().await;
        check_service(core.registry.service(name)?, S::kind())?;
        core.registry.set_default_request(name, payload)
    }

    /// Call a service once. Fails with `NotBound` when the connection is not
    /// live; nothing is queued or retried.
    pub async fn call<S: Service>(&self, name: &str, request: &S::Request) -> Result<S::Response> {
        let response = self
            .call_raw(name, S::kind(), Some(request.to_payload()?))
            .await?;
        S::Response::from_payload(response)
    }

    /// Call a service with its stored default request.
    pub async fn call_default<S: Service>(&self, name: &str) -> Result<S::Response> {
        let response = self.call_raw(name, S::kind(), None).await?;
        S::Response::from_payload(response)
    }

    /// Callback form of [`call`](Self::call).
    ///
    /// The bound check happens before this returns; the call itself runs in
    /// the background and `callback` receives its outcome exactly once.
    pub async fn call_with<S, F>(&self, name: &str, request: &S::Request, callback: F) -> Result<()>
    where
        S: Service,
        F: FnOnce(Result<S::Response>) + Send + 'static,
    {
        let payload = request.to_payload()?;
        let token = {
            let core = self.controller.lock().await;
            let service = core.registry.service(name)?;
            check_service(service, S::kind())?;
            bound_token(&core, service)?
        };

        let transport = self.controller.transport().clone();
        let name = name.to_string();
        tokio::spawn(async move {
            let result = match transport.call_service(&token, payload).await {
                Ok(response) => S::Response::from_payload(response),
                Err(e) => Err(service_call_error(&name, e)),
            };
            callback(result);
        });
        Ok(())
    }

    #[tracing::instrument(name = "link.call", skip_all, fields(service = %name))]
    async fn call_raw(&self, name: &str, kind: ServiceKind, request: Option<Payload>) -> Result<Payload> {
        let (token, request) = {
            let core = self.controller.lock().await;
            let service = core.registry.service(name)?;
            check_service(service, kind)?;
            let request = match request {
                Some(request) => request,
                None => service.default_request().cloned().ok_or_else(|| {
                    LinkError::InvalidConfig(format!("service '{}' has no default request", name))
                })?,
            };
            (bound_token(&core, service)?, request)
        };

        self.controller
            .transport()
            .call_service(&token, request)
            .await
            .map_err(|e| service_call_error(name, e))
    }

    async fn register_service_kind(
        &self,
        name: &str,
        kind: ServiceKind,
        default_request: Option<Payload>,
    ) -> Result<Registered> {
        let mut core = self.controller.lock().await;
        let registered = core.registry.register_service(name, kind, default_request)?;
        if registered == Registered::New && self.session_live(&core) {
            let transport = self.controller.transport().clone();
            if let Err(e) = core.registry.bind_service(name, transport.as_ref()).await {
                warn!(service = %name, error = %e, "Service registered but not bound yet");
            }
        }
        Ok(registered)
    }

    /// Register services declared in configuration. Unknown types and
    /// malformed default requests are logged and skipped. Returns the number
    /// of newly registered services.
    pub async fn register_declared_services(
        &self,
        declarations: &[ServiceDeclaration],
        catalog: &KindCatalog,
    ) -> usize {
        let mut registered = 0;
        for declaration in declarations {
            let Some(kind) = catalog.service(&declaration.service_type) else {
                warn!(
                    service = %declaration.name,
                    service_type = %declaration.service_type,
                    "Unknown service type, skipping"
                );
                continue;
            };
            if let Some(request) = &declaration.default_request {
                if !request.is_object() {
                    warn!(
                        service = %declaration.name,
                        "Default request must be a mapping, skipping"
                    );
                    continue;
                }
            }
            match self
                .register_service_kind(&declaration.name, kind, declaration.default_request.clone())
                .await
            {
                Ok(Registered::New) => registered += 1,
                Ok(Registered::Existing) => {
                    debug!(service = %declaration.name, "Declared service already registered")
                }
                Err(e) => warn!(service = %declaration.name, error = %e, "Skipping declared service"),
            }
        }
        registered
    }

    // ========================================================================
    // Topics
    // ========================================================================

    pub async fn create_publisher<M: Message>(&self, name: &str) -> Result<Publisher<M>> {
        self.register_topic(name, TopicRole::Publisher, M::KIND, None)
            .await?;
        Ok(Publisher::new(name, self.clone()))
    }

    /// Register a subscriber. Messages that fail to decode as `M` are logged
    /// and dropped.
    pub async fn create_subscriber<M, F>(&self, name: &str, callback: F) -> Result<Subscriber<M>>
    where
        M: Message,
        F: Fn(M) + Send + Sync + 'static,
    {
        self.register_topic(
            name,
            TopicRole::Subscriber,
            M::KIND,
            Some(typed_callback(name, callback)),
        )
        .await?;
        Ok(Subscriber::new(name, self.clone()))
    }

    pub async fn publisher<M: Message>(&self, name: &str) -> Result<Publisher<M>> {
        let core = self.controller.lock().await;
        check_topic(core.registry.topic(name)?, TopicRole::Publisher, M::KIND)?;
        Ok(Publisher::new(name, self.clone()))
    }

    pub async fn subscriber<M: Message>(&self, name: &str) -> Result<Subscriber<M>> {
        let core = self.controller.lock().await;
        check_topic(core.registry.topic(name)?, TopicRole::Subscriber, M::KIND)?;
        Ok(Subscriber::new(name, self.clone()))
    }

    /// Publish on an advertised topic.
    ///
    /// Fails with `NotActive` when the topic is not bound. If the send finds
    /// the connection gone the topic is marked inactive; the next reconnect
    /// rebinds it.
    pub async fn publish<M: Message>(&self, name: &str, message: &M) -> Result<()> {
        self.publish_raw(name, M::KIND, message.to_payload()?).await
    }

    #[tracing::instrument(name = "link.publish", skip_all, fields(topic = %name))]
    async fn publish_raw(&self, name: &str, kind: MessageKind, payload: Payload) -> Result<()> {
        let token = {
            let core = self.controller.lock().await;
            let topic = core.registry.topic(name)?;
            check_topic(topic, TopicRole::Publisher, kind)?;
            match topic.binding() {
                Some(token) if core.state == ConnectionState::Connected => token.clone(),
                _ => {
                    warn!(topic = %name, state = %core.state, "Publish on inactive topic");
                    return Err(LinkError::NotActive(name.to_string()));
                }
            }
        };

        match self.controller.transport().send(&token, payload).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_connection_lost() || matches!(e, TransportError::UnknownBinding(_)) => {
                warn!(topic = %name, error = %e, "Publish found connection gone");
                self.controller
                    .lock()
                    .await
                    .registry
                    .mark_topic_inactive(name, &token);
                Err(LinkError::NotActive(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Unadvertise/unsubscribe and drop a topic. Returns false if the name
    /// was never registered.
    pub async fn remove_topic(&self, name: &str) -> bool {
        let mut core = self.controller.lock().await;
        let transport = self.controller.transport().clone();
        let live = transport.is_connected();
        core.registry
            .remove_topic(name, live.then_some(transport.as_ref()))
            .await
    }

    pub async fn topic_names(&self) -> Vec<String> {
        self.controller.lock().await.registry.topic_names()
    }

    pub async fn is_topic_active(&self, name: &str) -> bool {
        let core = self.controller.lock().await;
        core.state == ConnectionState::Connected
            && core.registry.topic(name).is_ok_and(|t| t.is_active())
    }

    async fn register_topic(
        &self,
        name: &str,
        role: TopicRole,
        kind: MessageKind,
        callback: Option<MessageCallback>,
    ) -> Result<Registered> {
        let mut core = self.controller.lock().await;
        let registered = core.registry.register_topic(name, role, kind, callback)?;
        if registered == Registered::New && self.session_live(&core) {
            let transport = self.controller.transport().clone();
            if let Err(e) = core.registry.bind_topic(name, transport.as_ref()).await {
                warn!(topic = %name, error = %e, "Topic registered but not bound yet");
            }
        }
        Ok(registered)
    }

    /// Swap a subscriber's callback, re-subscribing if it is active.
    async fn replace_callback(
        &self,
        name: &str,
        kind: MessageKind,
        callback: MessageCallback,
    ) -> Result<()> {
        let mut core = self.controller.lock().await;
        check_topic(core.registry.topic(name)?, TopicRole::Subscriber, kind)?;
        let transport = self.controller.transport().clone();

        if let Some(old) = core.registry.set_topic_callback(name, callback)? {
            if let Err(e) = transport.unsubscribe(&old).await {
                debug!(topic = %name, error = %e, "Old subscription already gone");
            }
        }
        if self.session_live(&core) {
            core.registry.bind_topic(name, transport.as_ref()).await?;
        }
        info!(topic = %name, "Subscriber callback replaced");
        Ok(())
    }

    fn session_live(&self, core: &LinkCore) -> bool {
        core.state == ConnectionState::Connected && self.controller.transport().is_connected()
    }

    // ========================================================================
    // State and policy
    // ========================================================================

    pub async fn state(&self) -> ConnectionState {
        self.controller.state().await
    }

    pub async fn is_connected(&self) -> bool {
        self.controller.is_connected().await
    }

    pub async fn is_reconnecting(&self) -> bool {
        self.controller.is_reconnecting().await
    }

    pub async fn reconnect_attempt(&self) -> u32 {
        self.controller.attempt().await
    }

    pub async fn auto_reconnect_enabled(&self) -> bool {
        self.controller.policy().await.enabled()
    }

    /// Setting false while reconnecting stops the cycle.
    pub async fn set_auto_reconnect(&self, enabled: bool) {
        self.controller.set_auto_reconnect(enabled).await;
    }

    pub async fn max_reconnect_attempts(&self) -> u32 {
        self.controller.policy().await.max_attempts()
    }

    pub async fn set_max_reconnect_attempts(&self, max_attempts: u32) {
        self.controller.set_max_attempts(max_attempts).await;
    }

    pub async fn reconnect_interval(&self) -> Duration {
        self.controller.policy().await.interval()
    }

    pub async fn set_reconnect_interval(&self, interval: Duration) {
        self.controller.set_interval(interval).await;
    }

    pub async fn connection_timeout(&self) -> Duration {
        self.controller.policy().await.timeout()
    }

    pub async fn set_connection_timeout(&self, timeout: Duration) {
        self.controller.set_timeout(timeout).await;
    }

    pub async fn set_backoff(&self, backoff: Backoff) {
        self.controller.set_backoff(backoff).await;
    }

    pub async fn manual_reconnect(&self) {
        self.controller.manual_reconnect().await;
    }

    pub async fn stop_reconnection(&self) {
        self.controller.stop_reconnection().await;
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub async fn subscribe_events<H>(&self, handler: H) -> HandlerId
    where
        H: ConnectionEventHandler + 'static,
    {
        self.controller.events().subscribe(Arc::new(handler)).await
    }

    pub async fn unsubscribe_events(&self, id: HandlerId) -> bool {
        self.controller.events().unsubscribe(id).await
    }

    pub fn event_stream(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.controller.events().stream()
    }

    /// Wait until connected.
    ///
    /// Fails with `ReconnectExhausted` if the running cycle gives up and with
    /// `ConnectionTimeout` if `timeout` elapses first.
    pub async fn wait_for_connection(&self, timeout: Duration) -> Result<()> {
        let mut stream = self.event_stream();
        if self.is_connected().await {
            return Ok(());
        }

        let wait = async {
            loop {
                match stream.recv().await {
                    Ok(ConnectionEvent::Connected) => return Ok(()),
                    Ok(ConnectionEvent::ReconnectionFailed { total_attempts }) => {
                        return Err(LinkError::ReconnectExhausted {
                            attempts: total_attempts,
                        })
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if self.is_connected().await {
                            return Ok(());
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return Err(LinkError::Cancelled),
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| LinkError::ConnectionTimeout(timeout))?
    }
}

fn check_service(service: &ServiceDescriptor, kind: ServiceKind) -> Result<()> {
    if service.kind() == kind {
        return Ok(());
    }
    Err(LinkError::IncompatibleType {
        name: service.name().to_string(),
        existing: service.kind().to_string(),
        requested: kind.to_string(),
    })
}

fn check_topic(topic: &TopicDescriptor, role: TopicRole, kind: MessageKind) -> Result<()> {
    if topic.role() == role && topic.kind() == kind {
        return Ok(());
    }
    Err(LinkError::IncompatibleType {
        name: topic.name().to_string(),
        existing: format!("{} of {}", topic.role(), topic.kind()),
        requested: format!("{} of {}", role, kind),
    })
}

fn bound_token(core: &LinkCore, service: &ServiceDescriptor) -> Result<BindingToken> {
    match service.binding() {
        Some(token) if core.state == ConnectionState::Connected => Ok(token.clone()),
        _ => Err(LinkError::NotBound(service.name().to_string())),
    }
}

fn service_call_error(name: &str, error: TransportError) -> LinkError {
    if error.is_connection_lost() || matches!(error, TransportError::UnknownBinding(_)) {
        warn!(service = %name, error = %error, "Service call found connection gone");
        LinkError::NotBound(name.to_string())
    } else {
        LinkError::Transport(error)
    }
}

fn typed_callback<M, F>(topic: &str, callback: F) -> MessageCallback
where
    M: Message,
    F: Fn(M) + Send + Sync + 'static,
{
    let topic = topic.to_string();
    Arc::new(move |payload| match M::from_payload(payload) {
        Ok(message) => callback(message),
        Err(e) => warn!(topic = %topic, error = %e, "Dropping undecodable message"),
    })
}

#[cfg(test)]
mod tests;
