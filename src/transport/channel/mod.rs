//! In-memory channel-based broker.
//!
//! Uses tokio broadcast channels for topic fan-out within a single process and
//! plain closures as service providers. The broker can be taken offline,
//! which ends every open session, so the full reconnect path can be exercised
//! without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BindingToken, MessageCallback, Result, Transport, TransportError};
use crate::message::{MessageKind, Payload, ServiceKind};

/// Channel capacity for each topic.
const CHANNEL_CAPACITY: usize = 1024;

/// Session id meaning "no session".
const NO_SESSION: u64 = 0;

type ServiceProvider = Arc<dyn Fn(Payload) -> Payload + Send + Sync>;

struct BrokerInner {
    online: AtomicBool,
    /// Bumped whenever the broker goes offline; sessions from an older epoch
    /// are dead.
    epoch: AtomicU64,
    topics: RwLock<HashMap<String, broadcast::Sender<Payload>>>,
    providers: RwLock<HashMap<String, ServiceProvider>>,
}

/// Shared in-process broker. Cheap to clone.
#[derive(Clone)]
pub struct ChannelBroker {
    inner: Arc<BrokerInner>,
}

impl Default for ChannelBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                online: AtomicBool::new(true),
                epoch: AtomicU64::new(1),
                topics: RwLock::new(HashMap::new()),
                providers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Create a transport connected to this broker.
    pub fn transport(&self) -> ChannelTransport {
        ChannelTransport::new(self.clone())
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Take the broker offline (ending every session) or back online.
    pub fn set_online(&self, online: bool) {
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);
        if was_online && !online {
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        }
        info!(online, "Channel broker availability changed");
    }

    /// Register a service provider answering calls to `name`.
    pub async fn provide_service<F>(&self, name: &str, provider: F)
    where
        F: Fn(Payload) -> Payload + Send + Sync + 'static,
    {
        self.inner
            .providers
            .write()
            .await
            .insert(name.to_string(), Arc::new(provider));
    }

    /// Publish from outside any session. Returns the number of receivers.
    pub async fn publish(&self, topic: &str, payload: Payload) -> usize {
        let sender = self.topic_sender(topic).await;
        sender.send(payload).unwrap_or(0)
    }

    /// Observe everything published on `topic`.
    pub async fn listen(&self, topic: &str) -> broadcast::Receiver<Payload> {
        self.topic_sender(topic).await.subscribe()
    }

    fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    async fn topic_sender(&self, topic: &str) -> broadcast::Sender<Payload> {
        if let Some(sender) = self.inner.topics.read().await.get(topic) {
            return sender.clone();
        }
        self.inner
            .topics
            .write()
            .await
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    async fn provider(&self, name: &str) -> Option<ServiceProvider> {
        self.inner.providers.read().await.get(name).cloned()
    }
}

enum ChannelBinding {
    Service(String),
    Publisher(String, broadcast::Sender<Payload>),
    Subscriber(String, JoinHandle<()>),
}

impl ChannelBinding {
    fn close(self) {
        if let ChannelBinding::Subscriber(topic, task) = self {
            debug!(topic = %topic, "Stopping channel subscriber");
            task.abort();
        }
    }
}

/// Session against a [`ChannelBroker`].
pub struct ChannelTransport {
    broker: ChannelBroker,
    session: AtomicU64,
    bindings: Mutex<HashMap<BindingToken, ChannelBinding>>,
}

impl ChannelTransport {
    pub fn new(broker: ChannelBroker) -> Self {
        Self {
            broker,
            session: AtomicU64::new(NO_SESSION),
            bindings: Mutex::new(HashMap::new()),
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::Disconnected)
        }
    }

    async fn close_all(&self) {
        let bindings = std::mem::take(&mut *self.bindings.lock().await);
        for (_, binding) in bindings {
            binding.close();
        }
    }

    async fn insert(&self, name: &str, binding: ChannelBinding) -> BindingToken {
        let token = BindingToken::generate(name);
        self.bindings.lock().await.insert(token.clone(), binding);
        token
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn connect(&self) -> Result<()> {
        if !self.broker.is_online() {
            return Err(TransportError::Connection(
                "channel broker offline".to_string(),
            ));
        }
        self.close_all().await;
        self.session.store(self.broker.epoch(), Ordering::SeqCst);
        debug!("Channel session opened");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        let session = self.session.load(Ordering::SeqCst);
        session != NO_SESSION && session == self.broker.epoch() && self.broker.is_online()
    }

    async fn disconnect(&self) {
        self.session.store(NO_SESSION, Ordering::SeqCst);
        self.close_all().await;
    }

    async fn bind_service(&self, name: &str, _kind: ServiceKind) -> Result<BindingToken> {
        self.ensure_connected()?;
        Ok(self
            .insert(name, ChannelBinding::Service(name.to_string()))
            .await)
    }

    async fn advertise(&self, name: &str, _kind: MessageKind) -> Result<BindingToken> {
        self.ensure_connected()?;
        let sender = self.broker.topic_sender(name).await;
        Ok(self
            .insert(name, ChannelBinding::Publisher(name.to_string(), sender))
            .await)
    }

    async fn subscribe(
        &self,
        name: &str,
        _kind: MessageKind,
        callback: MessageCallback,
    ) -> Result<BindingToken> {
        self.ensure_connected()?;
        let mut receiver = self.broker.listen(name).await;
        let topic = name.to_string();

        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => callback(payload),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(topic = %topic, skipped = n, "Channel subscriber lagged, skipped messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(self
            .insert(name, ChannelBinding::Subscriber(name.to_string(), task))
            .await)
    }

    async fn unadvertise(&self, token: &BindingToken) -> Result<()> {
        match self.bindings.lock().await.remove(token) {
            Some(binding) => {
                binding.close();
                Ok(())
            }
            None => Err(TransportError::UnknownBinding(token.to_string())),
        }
    }

    async fn unsubscribe(&self, token: &BindingToken) -> Result<()> {
        self.unadvertise(token).await
    }

    async fn send(&self, token: &BindingToken, payload: Payload) -> Result<()> {
        self.ensure_connected()?;
        let bindings = self.bindings.lock().await;
        match bindings.get(token) {
            Some(ChannelBinding::Publisher(topic, sender)) => {
                // No receivers is not an error
                let receivers = sender.send(payload).unwrap_or(0);
                debug!(topic = %topic, receivers, "Published to channel");
                Ok(())
            }
            _ => Err(TransportError::UnknownBinding(token.to_string())),
        }
    }

    async fn call_service(&self, token: &BindingToken, request: Payload) -> Result<Payload> {
        self.ensure_connected()?;
        let name = match self.bindings.lock().await.get(token) {
            Some(ChannelBinding::Service(name)) => name.clone(),
            _ => return Err(TransportError::UnknownBinding(token.to_string())),
        };
        let provider = self
            .broker
            .provider(&name)
            .await
            .ok_or_else(|| TransportError::Rejected(format!("no provider for '{}'", name)))?;
        Ok(provider(request))
    }
}
