//! Bootstrap utilities for host applications.
//!
//! Shared initialization: tracing setup and bringing a manager up from
//! configuration.

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LinkConfig, LOG_ENV_VAR};
use crate::manager::ConnectionManager;
use crate::message::KindCatalog;
use crate::transport::Transport;

/// Initialize tracing with the BROKERLINK_LOG environment variable.
///
/// Defaults to "info" level if BROKERLINK_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build a manager from configuration, register its declared services and
/// start it.
///
/// A failed first connection is logged, not returned: with auto-reconnect
/// enabled the manager keeps retrying in the background, and callers observe
/// progress through connection events.
pub async fn start_from_config(
    transport: Arc<dyn Transport>,
    config: &LinkConfig,
    catalog: &KindCatalog,
) -> ConnectionManager {
    let manager = ConnectionManager::from_config(transport, config);

    let declared = manager
        .register_declared_services(&config.services, catalog)
        .await;
    if declared < config.services.len() {
        warn!(
            declared,
            total = config.services.len(),
            "Some declared services were not registered"
        );
    }

    match manager.start().await {
        Ok(()) => info!(endpoint = %config.connection.endpoint(), "Connected to broker"),
        Err(e) => warn!(
            endpoint = %config.connection.endpoint(),
            error = %e,
            "Initial connection failed"
        ),
    }
    manager
}
