//! Shared utilities for integration tests.
//!
//! Provides an in-memory broker wired to a manager with fast timings, plus
//! event helpers.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use brokerlink::transport::ChannelBroker;
use brokerlink::{ConnectionEvent, ConnectionManager, ReconnectPolicy};

/// Health monitor period used by every scenario.
pub const HEALTH_INTERVAL: Duration = Duration::from_millis(20);

/// Upper bound on waiting for any single event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(3);

/// Policy with 10ms interval and timeout.
pub fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy::new(
        true,
        max_attempts,
        Duration::from_millis(10),
        Duration::from_millis(10),
    )
}

/// Broker plus a manager connected to it through a channel transport.
pub fn broker_and_manager(policy: ReconnectPolicy) -> (ChannelBroker, ConnectionManager) {
    let broker = ChannelBroker::new();
    let manager = ConnectionManager::with_health_check_interval(
        Arc::new(broker.transport()),
        policy,
        HEALTH_INTERVAL,
    );
    (broker, manager)
}

/// Next event, failing the test after `EVENT_TIMEOUT`.
pub async fn next_event(stream: &mut broadcast::Receiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(EVENT_TIMEOUT, stream.recv())
        .await
        .expect("timed out waiting for connection event")
        .expect("event stream closed")
}

/// Skip events until `wanted` arrives. Returns everything seen before it.
pub async fn wait_for_event(
    stream: &mut broadcast::Receiver<ConnectionEvent>,
    wanted: ConnectionEvent,
) -> Vec<ConnectionEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(stream).await;
        if event == wanted {
            return seen;
        }
        seen.push(event);
    }
}

/// Give spawned subscriber tasks time to run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
