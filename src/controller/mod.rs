//! Reconnect controller: owns the connection state machine.
//!
//! ```text
//! Disconnected --connect()--> Connecting --ok--> Connected
//! Connected --loss, auto-reconnect--> Reconnecting --ok--> Connected
//! Connected --loss, no auto-reconnect--> Disconnected
//! Reconnecting --attempts exhausted | stop--> Disconnected
//! ```
//!
//! One mutex guards the registry, the state, the policy and the retry
//! bookkeeping. Network I/O for rebinding happens under that lock so no
//! caller can observe a half-rebound registry; event handlers always run
//! after it is released. Each transition reserves its event's place in the
//! delivery order before the lock is dropped.
//!
//! Two kinds of background task exist: the health monitor (one per
//! controller, polling on a fixed period from the first connect or manual
//! reconnect) and the reconnect cycle (at most one at a time). Both hold only a `Weak` reference to the controller and
//! are cancelled through a `watch` channel.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{LinkError, Result};
use crate::events::{ConnectionEvent, EventDispatcher};
use crate::registry::ResourceRegistry;
use crate::transport::Transport;

pub mod policy;

pub use policy::{
    Backoff, ConnectionState, ReconnectPolicy, RetryDelays, DEFAULT_HEALTH_CHECK_INTERVAL,
    MIN_CONNECTION_TIMEOUT, MIN_RECONNECT_INTERVAL,
};

/// How often a pending connect is polled for readiness.
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Shared state
// ============================================================================

struct ActiveCycle {
    id: u64,
    cancel: watch::Sender<bool>,
}

/// Handed to the task running a cycle.
struct CycleTicket {
    id: u64,
    cancel: watch::Receiver<bool>,
}

impl CycleTicket {
    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow() || self.cancel.has_changed().is_err()
    }
}

/// Everything guarded by the controller lock.
pub(crate) struct LinkCore {
    pub(crate) state: ConnectionState,
    pub(crate) policy: ReconnectPolicy,
    pub(crate) registry: ResourceRegistry,
    attempt: u32,
    cycle: Option<ActiveCycle>,
    next_cycle_id: u64,
    monitor: Option<watch::Sender<bool>>,
}

impl LinkCore {
    fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            registry: ResourceRegistry::new(),
            attempt: 0,
            cycle: None,
            next_cycle_id: 0,
            monitor: None,
        }
    }

    /// Start a new cycle, cancelling any previous one.
    fn begin_cycle(&mut self) -> CycleTicket {
        if let Some(previous) = self.cycle.take() {
            let _ = previous.cancel.send(true);
        }
        self.next_cycle_id += 1;
        let (cancel, receiver) = watch::channel(false);
        self.cycle = Some(ActiveCycle {
            id: self.next_cycle_id,
            cancel,
        });
        self.attempt = 0;
        CycleTicket {
            id: self.next_cycle_id,
            cancel: receiver,
        }
    }

    fn owns_cycle(&self, id: u64) -> bool {
        self.cycle.as_ref().is_some_and(|c| c.id == id)
    }

    /// Cancel the active cycle. Returns false if none was running.
    fn cancel_cycle(&mut self) -> bool {
        match self.cycle.take() {
            Some(cycle) => {
                let _ = cycle.cancel.send(true);
                true
            }
            None => false,
        }
    }
}

enum AttemptOutcome {
    Connected,
    Failed(LinkError),
    Cancelled,
}

// ============================================================================
// Controller
// ============================================================================

/// Drives connection state, health monitoring and reconnect cycles.
pub struct ReconnectController {
    transport: Arc<dyn Transport>,
    core: Mutex<LinkCore>,
    events: EventDispatcher,
    health_check_interval: Duration,
}

impl ReconnectController {
    pub fn new(
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
        health_check_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            core: Mutex::new(LinkCore::new(policy)),
            events: EventDispatcher::new(),
            health_check_interval: health_check_interval.max(MIN_RECONNECT_INTERVAL),
        })
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    pub fn health_check_interval(&self) -> Duration {
        self.health_check_interval
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, LinkCore> {
        self.core.lock().await
    }

    pub async fn state(&self) -> ConnectionState {
        self.core.lock().await.state
    }

    /// Connected state with a live transport.
    pub async fn is_connected(&self) -> bool {
        self.core.lock().await.state == ConnectionState::Connected && self.transport.is_connected()
    }

    /// True while a connect or reconnect cycle is running.
    pub async fn is_reconnecting(&self) -> bool {
        self.core.lock().await.cycle.is_some()
    }

    /// Attempts made in the current (or last exhausted) cycle.
    pub async fn attempt(&self) -> u32 {
        self.core.lock().await.attempt
    }

    pub async fn policy(&self) -> ReconnectPolicy {
        self.core.lock().await.policy.clone()
    }

    // ------------------------------------------------------------------------
    // Policy
    // ------------------------------------------------------------------------

    /// Disabling auto-reconnect stops any running cycle.
    pub async fn set_auto_reconnect(&self, enabled: bool) {
        self.core.lock().await.policy.set_enabled(enabled);
        info!(enabled, "Auto-reconnect changed");
        if !enabled {
            self.stop_reconnection().await;
        }
    }

    pub async fn set_max_attempts(&self, max_attempts: u32) {
        self.core.lock().await.policy.set_max_attempts(max_attempts);
    }

    pub async fn set_interval(&self, interval: Duration) {
        self.core.lock().await.policy.set_interval(interval);
    }

    pub async fn set_timeout(&self, timeout: Duration) {
        self.core.lock().await.policy.set_timeout(timeout);
    }

    pub async fn set_backoff(&self, backoff: Backoff) {
        self.core.lock().await.policy.set_backoff(backoff);
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Start the health monitor. Calling it again is a no-op.
    pub async fn start_monitor(self: &Arc<Self>) {
        let mut core = self.core.lock().await;
        if core.monitor.is_some() {
            return;
        }
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        core.monitor = Some(cancel_tx);
        drop(core);

        let controller = Arc::downgrade(self);
        let period = self.health_check_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(period_ms = period.as_millis() as u64, "Health monitor started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(controller) = controller.upgrade() else {
                            break;
                        };
                        controller.check_health().await;
                    }
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Health monitor stopped");
        });
    }

    /// Connect now. Starts the health monitor if it is not running yet.
    ///
    /// Returns `Ok` when already connected or when a cycle is already in
    /// progress. Otherwise one attempt runs inline; if it fails and
    /// auto-reconnect is enabled, retries continue in the background and the
    /// first failure is still returned.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        self.start_monitor().await;
        let (mut ticket, timeout) = {
            let mut core = self.core.lock().await;
            if core.state == ConnectionState::Connected {
                return Ok(());
            }
            if core.cycle.is_some() {
                debug!(state = %core.state, "Connection already in progress");
                return Ok(());
            }
            core.state = ConnectionState::Connecting;
            (core.begin_cycle(), core.policy.timeout())
        };

        info!("Connecting to broker");
        match self.attempt_connection(timeout, &mut ticket.cancel).await {
            AttemptOutcome::Connected => {
                if self.complete_connection(ticket.id).await {
                    Ok(())
                } else {
                    Err(LinkError::Cancelled)
                }
            }
            AttemptOutcome::Cancelled => {
                self.transport.disconnect().await;
                Err(LinkError::Cancelled)
            }
            AttemptOutcome::Failed(err) => {
                warn!(error = %err, "Initial connection failed");
                let keep_trying = {
                    let mut core = self.core.lock().await;
                    if !core.owns_cycle(ticket.id) {
                        return Err(err);
                    }
                    if core.policy.enabled() {
                        true
                    } else {
                        core.cycle = None;
                        core.state = ConnectionState::Disconnected;
                        false
                    }
                };
                if keep_trying {
                    self.spawn_cycle(ticket, true);
                }
                Err(err)
            }
        }
    }

    /// Force a reconnect cycle. No-op while a cycle is already running.
    /// Starts the health monitor if it is not running yet.
    pub async fn manual_reconnect(self: &Arc<Self>) {
        self.start_monitor().await;
        let ticket = {
            let mut core = self.core.lock().await;
            if core.cycle.is_some() {
                debug!("Manual reconnect ignored, cycle already running");
                return;
            }
            core.registry.clear_bindings();
            core.state = ConnectionState::Reconnecting;
            core.begin_cycle()
        };
        info!("Manual reconnect requested");
        self.spawn_cycle(ticket, false);
    }

    /// Cancel any running cycle and reset the attempt counter.
    ///
    /// Safe to call from an event handler.
    pub async fn stop_reconnection(&self) {
        let mut core = self.core.lock().await;
        if core.cancel_cycle() {
            core.state = ConnectionState::Disconnected;
            info!(attempt = core.attempt, "Reconnection stopped");
        }
        core.attempt = 0;
    }

    /// Stop the monitor and any cycle, release every topic, clear the
    /// registry and close the transport.
    pub async fn shutdown(&self) {
        let mut core = self.core.lock().await;
        if let Some(monitor) = core.monitor.take() {
            let _ = monitor.send(true);
        }
        core.cancel_cycle();
        if self.transport.is_connected() {
            core.registry.unbind_all(self.transport.as_ref()).await;
        }
        core.registry.clear();
        core.state = ConnectionState::Disconnected;
        core.attempt = 0;
        drop(core);

        self.transport.disconnect().await;
        info!("Connection shut down");
    }

    // ------------------------------------------------------------------------
    // Health monitor
    // ------------------------------------------------------------------------

    /// One monitor tick.
    pub(crate) async fn check_health(self: &Arc<Self>) {
        let transport_up = self.transport.is_connected();
        let mut core = self.core.lock().await;
        let state = core.state;

        match state {
            ConnectionState::Connected if !transport_up => {
                warn!("Connection lost");
                core.registry.clear_bindings();
                let ticket = if core.policy.enabled() {
                    core.state = ConnectionState::Reconnecting;
                    Some(core.begin_cycle())
                } else {
                    core.state = ConnectionState::Disconnected;
                    None
                };
                let emit = self.events.reserve();
                drop(core);

                self.events.deliver(emit, ConnectionEvent::Disconnected).await;
                if let Some(ticket) = ticket {
                    self.spawn_cycle(ticket, false);
                }
            }
            ConnectionState::Connected => {
                if core.registry.unbound_count() > 0 {
                    let report = core.registry.bind_all(self.transport.as_ref()).await;
                    debug!(
                        bound = report.bound,
                        failed = report.failed.len(),
                        "Rebound resources on health check"
                    );
                }
            }
            ConnectionState::Disconnected if transport_up && core.cycle.is_none() => {
                let report = core.registry.bind_all(self.transport.as_ref()).await;
                core.state = ConnectionState::Connected;
                core.attempt = 0;
                let emit = self.events.reserve();
                drop(core);

                info!(bound = report.bound, "Connection detected");
                self.events.deliver(emit, ConnectionEvent::Connected).await;
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------------
    // Reconnect cycle
    // ------------------------------------------------------------------------

    fn spawn_cycle(self: &Arc<Self>, ticket: CycleTicket, delay_first: bool) {
        let controller = Arc::downgrade(self);
        tokio::spawn(Self::run_cycle(controller, ticket, delay_first));
    }

    async fn run_cycle(controller: Weak<Self>, mut ticket: CycleTicket, delay_first: bool) {
        let mut delays = match controller.upgrade() {
            Some(this) => this.core.lock().await.policy.delays(),
            None => return,
        };
        if delay_first && !wait_or_cancel(&mut ticket.cancel, delays.next_delay()).await {
            return;
        }

        loop {
            let Some(this) = controller.upgrade() else {
                return;
            };

            let (attempt, max_attempts, timeout, emit) = {
                let mut core = this.core.lock().await;
                if !core.owns_cycle(ticket.id) {
                    return;
                }
                core.attempt += 1;
                (
                    core.attempt,
                    core.policy.max_attempts(),
                    core.policy.timeout(),
                    this.events.reserve(),
                )
            };

            info!(attempt, max_attempts, "Reconnection attempt");
            this.events
                .deliver(
                    emit,
                    ConnectionEvent::ReconnectionAttempt {
                        attempt,
                        max_attempts,
                    },
                )
                .await;
            if ticket.is_cancelled() {
                return;
            }

            let err = match this.attempt_connection(timeout, &mut ticket.cancel).await {
                AttemptOutcome::Connected => {
                    this.complete_connection(ticket.id).await;
                    return;
                }
                AttemptOutcome::Cancelled => {
                    this.transport.disconnect().await;
                    return;
                }
                AttemptOutcome::Failed(err) => err,
            };
            warn!(attempt, max_attempts, error = %err, "Reconnection attempt failed");

            let gave_up = {
                let mut core = this.core.lock().await;
                if !core.owns_cycle(ticket.id) {
                    return;
                }
                if core.policy.allows_retry(attempt) {
                    None
                } else {
                    core.cycle = None;
                    core.state = ConnectionState::Disconnected;
                    Some(this.events.reserve())
                }
            };

            if let Some(emit) = gave_up {
                error!(total_attempts = attempt, "Reconnection failed, giving up");
                this.events
                    .deliver(
                        emit,
                        ConnectionEvent::ReconnectionFailed {
                            total_attempts: attempt,
                        },
                    )
                    .await;
                return;
            }

            drop(this);
            if !wait_or_cancel(&mut ticket.cancel, delays.next_delay()).await {
                return;
            }
        }
    }

    /// One connection attempt: drop the old session, open a new one and wait
    /// for it to come up within `timeout`.
    async fn attempt_connection(
        &self,
        timeout: Duration,
        cancel: &mut watch::Receiver<bool>,
    ) -> AttemptOutcome {
        let poll = CONNECT_POLL_INTERVAL.min(timeout);
        let attempt = async {
            self.transport.disconnect().await;
            self.transport.connect().await?;
            while !self.transport.is_connected() {
                tokio::time::sleep(poll).await;
            }
            Ok::<(), LinkError>(())
        };

        tokio::select! {
            result = tokio::time::timeout(timeout, attempt) => match result {
                Ok(Ok(())) => AttemptOutcome::Connected,
                Ok(Err(e)) => AttemptOutcome::Failed(e),
                Err(_) => AttemptOutcome::Failed(LinkError::ConnectionTimeout(timeout)),
            },
            _ = cancelled(cancel) => AttemptOutcome::Cancelled,
        }
    }

    /// Rebind everything, then report Connected. Returns false if the cycle
    /// was stopped while the attempt was in flight, in which case the fresh
    /// session is closed again.
    async fn complete_connection(&self, cycle_id: u64) -> bool {
        let mut core = self.core.lock().await;
        if !core.owns_cycle(cycle_id) {
            drop(core);
            debug!("Cycle stopped before connection completed, closing session");
            self.transport.disconnect().await;
            return false;
        }

        let report = core.registry.bind_all(self.transport.as_ref()).await;
        core.cycle = None;
        core.state = ConnectionState::Connected;
        core.attempt = 0;
        let emit = self.events.reserve();
        drop(core);

        info!(
            bound = report.bound,
            failed = report.failed.len(),
            "Connection established"
        );
        self.events.deliver(emit, ConnectionEvent::Connected).await;
        true
    }
}

/// Resolves once the cycle is cancelled or its controller side is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep for `delay`. Returns false if cancelled first.
async fn wait_or_cancel(cancel: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancelled(cancel) => false,
    }
}
