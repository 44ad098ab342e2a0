//! Typed, name-based handles.
//!
//! A handle stores only the resource name and a manager clone, so it stays
//! valid across reconnections: every operation resolves the current binding
//! through the registry.

use std::fmt;
use std::marker::PhantomData;

use super::{typed_callback, ConnectionManager};
use crate::error::Result;
use crate::message::{Message, Service};

/// Handle to a registered service of type `S`.
pub struct ServiceHandle<S: Service> {
    name: String,
    manager: ConnectionManager,
    _service: PhantomData<fn() -> S>,
}

impl<S: Service> ServiceHandle<S> {
    pub(super) fn new(name: &str, manager: ConnectionManager) -> Self {
        Self {
            name: name.to_string(),
            manager,
            _service: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn call(&self, request: &S::Request) -> Result<S::Response> {
        self.manager.call::<S>(&self.name, request).await
    }

    pub async fn call_default(&self) -> Result<S::Response> {
        self.manager.call_default::<S>(&self.name).await
    }

    pub async fn call_with<F>(&self, request: &S::Request, callback: F) -> Result<()>
    where
        F: FnOnce(Result<S::Response>) + Send + 'static,
    {
        self.manager
            .call_with::<S, F>(&self.name, request, callback)
            .await
    }

    pub async fn set_default_request(&self, request: &S::Request) -> Result<()> {
        self.manager
            .set_default_request::<S>(&self.name, request)
            .await
    }

    pub async fn is_bound(&self) -> bool {
        self.manager.is_service_bound(&self.name).await
    }
}

impl<S: Service> Clone for ServiceHandle<S> {
    fn clone(&self) -> Self {
        Self::new(&self.name, self.manager.clone())
    }
}

impl<S: Service> fmt::Debug for ServiceHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("name", &self.name)
            .field("service_type", &S::TYPE)
            .finish()
    }
}

/// Handle to an advertised topic carrying `M`.
pub struct Publisher<M: Message> {
    name: String,
    manager: ConnectionManager,
    _message: PhantomData<fn(M)>,
}

impl<M: Message> Publisher<M> {
    pub(super) fn new(name: &str, manager: ConnectionManager) -> Self {
        Self {
            name: name.to_string(),
            manager,
            _message: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn publish(&self, message: &M) -> Result<()> {
        self.manager.publish(&self.name, message).await
    }

    pub async fn is_active(&self) -> bool {
        self.manager.is_topic_active(&self.name).await
    }
}

impl<M: Message> Clone for Publisher<M> {
    fn clone(&self) -> Self {
        Self::new(&self.name, self.manager.clone())
    }
}

impl<M: Message> fmt::Debug for Publisher<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("name", &self.name)
            .field("kind", &M::KIND)
            .finish()
    }
}

/// Handle to a subscribed topic carrying `M`.
pub struct Subscriber<M: Message> {
    name: String,
    manager: ConnectionManager,
    _message: PhantomData<fn(M)>,
}

impl<M: Message> Subscriber<M> {
    pub(super) fn new(name: &str, manager: ConnectionManager) -> Self {
        Self {
            name: name.to_string(),
            manager,
            _message: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the callback. An active subscription is re-subscribed.
    pub async fn change_callback<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(M) + Send + Sync + 'static,
    {
        self.manager
            .replace_callback(&self.name, M::KIND, typed_callback(&self.name, callback))
            .await
    }

    pub async fn is_active(&self) -> bool {
        self.manager.is_topic_active(&self.name).await
    }
}

impl<M: Message> Clone for Subscriber<M> {
    fn clone(&self) -> Self {
        Self::new(&self.name, self.manager.clone())
    }
}

impl<M: Message> fmt::Debug for Subscriber<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("name", &self.name)
            .field("kind", &M::KIND)
            .finish()
    }
}
