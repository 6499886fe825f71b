//! Engine - one synchronized mirror of one device
//!
//! The engine wires the pieces together:
//!
//! ```text
//! Transport ─► ConnectionSupervisor ─► FrameDecoder ─► EventDispatcher ─► StateStore ─► host
//!                      ▲                                                      │
//!                      └──────────── CommandGateway ◄─────────────────────────┘
//! ```
//!
//! Events are applied to the store on the supervisor's reader task, in the
//! order they were decoded. Anything that needs to send frames in response
//! (bootstrap after connecting, label re-fetch, status refresh on wake-up)
//! is handed to a small control task so the reader never waits on writes.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lumagen_protocol::{AspectRatio, Command, Event, MemoryBank, Query};
use lumagen_state::{
    Availability, ChangeSubscription, DeviceProperty, DeviceState, InputLabels, Property,
    PropertyKey, PropertyWatcher, StateChange, StateStore,
};
use lumagen_stream::{
    transport_for, ConnectionState, ConnectionSupervisor, EngineConfig, EventDispatcher,
    SessionObserver, SubscriptionHandle, SupervisorHandle, SupervisorStats, Transport,
};

use crate::error::{Result, SdkError};
use crate::gateway::{AckPending, AckRegistry, CommandGateway};

/// Work the reader task hands off to the control task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Connected,
    Disconnected,
    RefreshLabels,
    Woke,
}

/// Diagnostics snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    pub connection: ConnectionState,
    pub endpoint: String,
    pub supervisor: SupervisorStats,
}

/// Applies connection transitions to the store, on the supervisor task
struct EngineObserver {
    store: Arc<StateStore>,
    acks: Arc<AckRegistry>,
    signals: mpsc::UnboundedSender<Signal>,
}

impl SessionObserver for EngineObserver {
    fn on_state_change(&self, state: ConnectionState) {
        self.store.set_connection_state(state);
        let signal = match state {
            ConnectionState::Connected => Signal::Connected,
            ConnectionState::Disconnected => {
                let abandoned = self.acks.abandon_all();
                if abandoned > 0 {
                    debug!(abandoned, "abandoning unacknowledged commands");
                }
                Signal::Disconnected
            }
            ConnectionState::Connecting => return,
        };
        // the control task is gone only after shutdown
        let _ = self.signals.send(signal);
    }
}

/// A running synchronization engine for one device
///
/// # Example
///
/// ```rust,ignore
/// use lumagen_sdk::{ConnectionDescriptor, Engine, EngineConfig, SourceAspect};
///
/// let engine = Engine::start(EngineConfig::new(ConnectionDescriptor::ip("192.168.1.50")))?;
///
/// let mut changes = engine.subscribe_changes();
/// engine.power_on()?;
///
/// while let Ok(change) = changes.recv().await {
///     println!("{change:?}");
/// }
/// ```
pub struct Engine {
    config: EngineConfig,
    endpoint: String,
    store: Arc<StateStore>,
    dispatcher: Arc<EventDispatcher>,
    supervisor: Arc<SupervisorHandle>,
    gateway: CommandGateway,
    cancel: CancellationToken,
    control: Mutex<Option<JoinHandle<()>>>,
    _events: SubscriptionHandle,
}

impl Engine {
    /// Start an engine for the device described by `config.connection`
    ///
    /// Must be called from within a Tokio runtime. Returns immediately;
    /// the first connection attempt runs in the background.
    pub fn start(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let transport = transport_for(&config.connection, config.connect_timeout);
        Self::with_transport(config, transport)
    }

    /// Start an engine over a caller-supplied transport
    pub fn with_transport(config: EngineConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| SdkError::NoRuntime)?;

        let endpoint = transport.endpoint();
        let cancel = CancellationToken::new();
        let store = Arc::new(StateStore::with_capacity(config.event_buffer_size));
        let acks = Arc::new(AckRegistry::new(config.ack_timeout));
        let dispatcher = Arc::new(EventDispatcher::new());
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();

        let events = {
            let store = Arc::clone(&store);
            let acks = Arc::clone(&acks);
            let signals = signals_tx.clone();
            dispatcher.subscribe_all(move |event| {
                if let Event::CommandAck { kind, success } = event {
                    if !acks.resolve(*kind, *success) {
                        debug!(%kind, success, "acknowledgement with no waiter");
                    }
                }

                let outcome = store.apply(event);
                if outcome.refresh_labels {
                    let _ = signals.send(Signal::RefreshLabels);
                }
                if outcome.woke {
                    let _ = signals.send(Signal::Woke);
                }
                Ok(())
            })
        };

        let observer = Arc::new(EngineObserver {
            store: Arc::clone(&store),
            acks: Arc::clone(&acks),
            signals: signals_tx,
        });

        let supervisor = Arc::new(
            ConnectionSupervisor::new(
                transport,
                config.reconnect.clone(),
                config.max_frame_len,
                Arc::clone(&dispatcher),
                observer,
                cancel.clone(),
            )
            .spawn(),
        );

        let gateway = CommandGateway::new(
            &config,
            Arc::clone(&store),
            Arc::clone(&supervisor),
            acks,
            runtime.clone(),
            cancel.clone(),
        );

        let control = runtime.spawn(run_control(
            signals_rx,
            gateway.clone(),
            runtime.clone(),
            config.label_refresh_delay,
            cancel.clone(),
        ));

        info!(%endpoint, "engine started");

        Ok(Self {
            config,
            endpoint,
            store,
            dispatcher,
            supervisor,
            gateway,
            cancel,
            control: Mutex::new(Some(control)),
            _events: events,
        })
    }

    // ========================================================================
    // State
    // ========================================================================

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Full copy of the mirror, stale flags included
    pub fn snapshot(&self) -> DeviceState {
        self.store.get_all()
    }

    /// Snapshot rendered as JSON, for hosts that export state
    pub fn snapshot_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self.snapshot())
    }

    pub fn get(&self, key: PropertyKey) -> Option<DeviceProperty> {
        self.store.get(key)
    }

    pub fn get_typed<P: Property>(&self) -> Option<P> {
        self.store.get_typed::<P>()
    }

    pub fn availability(&self) -> Availability {
        self.store.availability()
    }

    pub fn labels(&self) -> InputLabels {
        self.store.labels()
    }

    /// Input selector options, one per label slot
    pub fn input_options(&self) -> Vec<String> {
        self.store.labels().options(self.config.label_slots)
    }

    /// Selectable aspect ratio labels
    pub fn aspect_ratio_options(&self) -> Vec<String> {
        AspectRatio::selectable()
            .iter()
            .map(|ratio| ratio.label().to_string())
            .collect()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Receiver for supervisor state transitions
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.watch_state()
    }

    /// Wait until the link is up, or `timeout` elapses
    pub async fn wait_for_connection(&self, timeout: Duration) -> bool {
        self.supervisor
            .wait_for(ConnectionState::Connected, timeout)
            .await
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            connection: self.supervisor.state(),
            endpoint: self.endpoint.clone(),
            supervisor: self.supervisor.stats(),
        }
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Every visible state change from now on, in apply order
    pub fn subscribe_changes(&self) -> broadcast::Receiver<StateChange> {
        self.store.subscribe_changes()
    }

    /// Run `callback` for every visible change until the subscription drops
    pub fn on_change<F>(&self, callback: F) -> ChangeSubscription
    where
        F: FnMut(StateChange) + Send + 'static,
    {
        self.store.on_change(callback)
    }

    pub fn watch(&self, key: PropertyKey) -> watch::Receiver<Option<DeviceProperty>> {
        self.store.watch(key)
    }

    pub fn property_watcher<P: Property>(&self) -> PropertyWatcher<P> {
        PropertyWatcher::new(&self.store)
    }

    /// Raw decoded events matching `predicate`, before they reach the store
    pub fn subscribe_events<F>(&self, predicate: F) -> (SubscriptionHandle, mpsc::UnboundedReceiver<Event>)
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.dispatcher.subscribe_channel(predicate)
    }

    pub fn unsubscribe_events(&self, handle: SubscriptionHandle) -> bool {
        self.dispatcher.unsubscribe(handle)
    }

    // ========================================================================
    // Commands
    // ========================================================================

    pub fn commands(&self) -> &CommandGateway {
        &self.gateway
    }

    pub fn submit(&self, command: Command) -> Result<AckPending> {
        self.gateway.submit(command)
    }

    pub fn power_on(&self) -> Result<AckPending> {
        self.gateway.power_on()
    }

    pub fn power_off(&self) -> Result<AckPending> {
        self.gateway.power_off()
    }

    pub fn select_input(&self, input: u8) -> Result<AckPending> {
        self.gateway.select_input(input)
    }

    pub fn select_input_by_label(&self, label: &str) -> Result<AckPending> {
        self.gateway.select_input_by_label(label)
    }

    pub fn select_aspect_ratio(&self, ratio: AspectRatio) -> Result<AckPending> {
        self.gateway.select_aspect_ratio(ratio)
    }

    pub fn recall_config(&self, config: u8) -> Result<AckPending> {
        self.gateway.recall_config(config)
    }

    pub fn select_memory(&self, bank: MemoryBank) -> Result<AckPending> {
        self.gateway.select_memory(bank)
    }

    pub async fn send_keys<I, S>(&self, names: I) -> Result<Vec<AckPending>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.gateway.send_keys(names).await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop reconnecting, close the link and wait for background tasks
    ///
    /// The store is left in place with every status property stale.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.supervisor.shutdown().await;

        let control = self.control.lock().take();
        if let Some(control) = control {
            if let Err(e) = control.await {
                warn!(error = %e, "control task did not exit cleanly");
            }
        }
        info!(endpoint = %self.endpoint, "engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("endpoint", &self.endpoint)
            .field("connection", &self.supervisor.state())
            .field("store", &self.store)
            .finish()
    }
}

// ============================================================================
// Control task
// ============================================================================

async fn run_control(
    mut signals: mpsc::UnboundedReceiver<Signal>,
    gateway: CommandGateway,
    runtime: Handle,
    label_delay: Duration,
    cancel: CancellationToken,
) {
    let mut label_timer: Option<JoinHandle<()>> = None;

    loop {
        let signal = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            signal = signals.recv() => match signal {
                Some(signal) => signal,
                None => break,
            },
        };

        let sent = match signal {
            Signal::Connected => {
                schedule_label_fetch(&mut label_timer, &gateway, &runtime, label_delay, &cancel);
                gateway.bootstrap()
            }
            Signal::RefreshLabels => {
                schedule_label_fetch(&mut label_timer, &gateway, &runtime, label_delay, &cancel);
                Ok(())
            }
            Signal::Woke => {
                debug!("device woke, refreshing status");
                gateway.query(Query::FullStatus)
            }
            Signal::Disconnected => {
                if let Some(timer) = label_timer.take() {
                    timer.abort();
                }
                Ok(())
            }
        };

        if let Err(e) = sent {
            debug!(error = %e, ?signal, "could not queue follow-up queries");
        }
    }

    if let Some(timer) = label_timer.take() {
        timer.abort();
    }
}

/// Fetch labels once after `delay`, replacing any fetch still pending
fn schedule_label_fetch(
    timer: &mut Option<JoinHandle<()>>,
    gateway: &CommandGateway,
    runtime: &Handle,
    delay: Duration,
    cancel: &CancellationToken,
) {
    if let Some(pending) = timer.take() {
        pending.abort();
    }

    let gateway = gateway.clone();
    let cancel = cancel.clone();
    *timer = Some(runtime.spawn(async move {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        if let Err(e) = gateway.fetch_labels() {
            debug!(error = %e, "label fetch not queued");
        }
    }));
}
