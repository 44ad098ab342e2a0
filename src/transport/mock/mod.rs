//! Mock transport implementation for testing.
//!
//! Connection outcomes are scripted up front (fail the next N connects,
//! refuse all, stall without ever coming up) and every binding, send and
//! disconnect is recorded for assertions.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BindingToken, MessageCallback, Result, Transport, TransportError};
use crate::message::{MessageKind, Payload, ServiceKind};

type Responder = Arc<dyn Fn(Payload) -> Payload + Send + Sync>;

#[derive(Clone)]
enum MockBinding {
    Service(String),
    Publisher(String),
    Subscriber(String, MessageCallback),
}

impl MockBinding {
    fn name(&self) -> &str {
        match self {
            MockBinding::Service(name)
            | MockBinding::Publisher(name)
            | MockBinding::Subscriber(name, _) => name,
        }
    }
}

#[derive(Default)]
struct MockSession {
    bindings: HashMap<BindingToken, MockBinding>,
    sent: Vec<(String, Payload)>,
    responders: HashMap<String, Responder>,
    bind_failures: HashSet<String>,
}

/// Scripted transport for testing.
#[derive(Default)]
pub struct MockTransport {
    connected: AtomicBool,
    refuse: AtomicBool,
    stall: AtomicBool,
    failures_remaining: AtomicU32,
    connect_attempts: AtomicU32,
    disconnects: AtomicU32,
    session: RwLock<MockSession>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` connect calls.
    pub fn fail_connects(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Fail every connect call until cleared.
    pub fn refuse_connects(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Accept connect calls without the session ever coming up.
    pub fn stall_connects(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    /// Simulate the broker dropping the session.
    pub async fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.session.write().await.bindings.clear();
    }

    /// Flip the connection flag without a connect call.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Reject any bind for `name`.
    pub async fn fail_binds_for(&self, name: &str) {
        self.session
            .write()
            .await
            .bind_failures
            .insert(name.to_string());
    }

    pub async fn clear_bind_failures(&self) {
        self.session.write().await.bind_failures.clear();
    }

    /// Answer calls to `service` with `f`. Unanswered services echo `{}`.
    pub async fn respond_with<F>(&self, service: &str, f: F)
    where
        F: Fn(Payload) -> Payload + Send + Sync + 'static,
    {
        self.session
            .write()
            .await
            .responders
            .insert(service.to_string(), Arc::new(f));
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Names of topics currently advertised on this session.
    pub async fn advertised(&self) -> Vec<String> {
        self.names_where(|b| matches!(b, MockBinding::Publisher(_)))
            .await
    }

    /// Names of topics currently subscribed on this session.
    pub async fn subscribed(&self) -> Vec<String> {
        self.names_where(|b| matches!(b, MockBinding::Subscriber(..)))
            .await
    }

    /// Names of services currently bound on this session.
    pub async fn bound_services(&self) -> Vec<String> {
        self.names_where(|b| matches!(b, MockBinding::Service(_)))
            .await
    }

    pub async fn binding_count(&self) -> usize {
        self.session.read().await.bindings.len()
    }

    /// Payloads sent on `topic`, in order.
    pub async fn sent(&self, topic: &str) -> Vec<Payload> {
        self.session
            .read()
            .await
            .sent
            .iter()
            .filter(|(name, _)| name == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Deliver a payload to every subscriber of `topic`. Returns the number
    /// of callbacks invoked.
    pub async fn deliver(&self, topic: &str, payload: Payload) -> usize {
        let callbacks: Vec<MessageCallback> = {
            let session = self.session.read().await;
            session
                .bindings
                .values()
                .filter_map(|b| match b {
                    MockBinding::Subscriber(name, cb) if name == topic => Some(cb.clone()),
                    _ => None,
                })
                .collect()
        };
        for callback in &callbacks {
            callback(payload.clone());
        }
        callbacks.len()
    }

    async fn names_where(&self, pred: impl Fn(&MockBinding) -> bool) -> Vec<String> {
        let session = self.session.read().await;
        let mut names: Vec<String> = session
            .bindings
            .values()
            .filter(|b| pred(b))
            .map(|b| b.name().to_string())
            .collect();
        names.sort();
        names
    }

    async fn bind(&self, binding: MockBinding) -> Result<BindingToken> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let mut session = self.session.write().await;
        if session.bind_failures.contains(binding.name()) {
            return Err(TransportError::Rejected(format!(
                "bind refused for '{}'",
                binding.name()
            )));
        }
        let token = BindingToken::generate(binding.name());
        session.bindings.insert(token.clone(), binding);
        Ok(token)
    }

    async fn release(&self, token: &BindingToken) -> Result<()> {
        match self.session.write().await.bindings.remove(token) {
            Some(_) => Ok(()),
            None => Err(TransportError::UnknownBinding(token.to_string())),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<()> {
        let attempt = self.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connection(format!(
                "mock connect {} refused",
                attempt
            )));
        }
        let scripted_failure = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted_failure {
            return Err(TransportError::Connection(format!(
                "mock connect {} failed",
                attempt
            )));
        }

        self.session.write().await.bindings.clear();
        if !self.stall.load(Ordering::SeqCst) {
            self.connected.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.drop_connection().await;
    }

    async fn bind_service(&self, name: &str, _kind: ServiceKind) -> Result<BindingToken> {
        self.bind(MockBinding::Service(name.to_string())).await
    }

    async fn advertise(&self, name: &str, _kind: MessageKind) -> Result<BindingToken> {
        self.bind(MockBinding::Publisher(name.to_string())).await
    }

    async fn subscribe(
        &self,
        name: &str,
        _kind: MessageKind,
        callback: MessageCallback,
    ) -> Result<BindingToken> {
        self.bind(MockBinding::Subscriber(name.to_string(), callback))
            .await
    }

    async fn unadvertise(&self, token: &BindingToken) -> Result<()> {
        self.release(token).await
    }

    async fn unsubscribe(&self, token: &BindingToken) -> Result<()> {
        self.release(token).await
    }

    async fn send(&self, token: &BindingToken, payload: Payload) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let mut session = self.session.write().await;
        let name = match session.bindings.get(token) {
            Some(MockBinding::Publisher(name)) => name.clone(),
            _ => return Err(TransportError::UnknownBinding(token.to_string())),
        };
        session.sent.push((name, payload));
        Ok(())
    }

    async fn call_service(&self, token: &BindingToken, request: Payload) -> Result<Payload> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let responder = {
            let session = self.session.read().await;
            let name = match session.bindings.get(token) {
                Some(MockBinding::Service(name)) => name,
                _ => return Err(TransportError::UnknownBinding(token.to_string())),
            };
            session.responders.get(name).cloned()
        };
        Ok(match responder {
            Some(respond) => respond(request),
            None => serde_json::json!({}),
        })
    }
}
