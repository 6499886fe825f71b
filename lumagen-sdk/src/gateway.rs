//! Command Gateway
//!
//! Every host command passes through [`CommandGateway::submit`]:
//!
//! 1. parameters are validated, so nothing invalid is ever queued
//! 2. the command is rejected with [`SdkError::NotConnected`] when the link
//!    is down, or when the device is in standby and the command is not a
//!    power command
//! 3. the encoded frame is queued on the supervisor
//! 4. power commands update the store optimistically
//!
//! The returned [`AckPending`] resolves when the device acknowledges a
//! command of the same kind.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use lumagen_protocol::{
    AspectRatio, Command, CommandKind, MemoryBank, PowerState, Query, RemoteKey, ValidationError,
};
use lumagen_state::StateStore;
use lumagen_stream::{ConnectionState, EngineConfig, OutboundFrame, SupervisorHandle};

use crate::error::{Result, SdkError};

/// Most acknowledgements kept waiting per command kind. Registering past
/// this abandons the oldest.
const MAX_PENDING_ACKS: usize = 32;

// ============================================================================
// Acknowledgements
// ============================================================================

/// Waiters for device acknowledgements, FIFO per command kind
///
/// The device's acks carry no sequence number, so an ack is matched to the
/// oldest live waiter of its kind. Waiters older than `ttl` are dropped
/// before matching, which bounds how long a skipped ack can shift later
/// acks onto the wrong caller.
#[derive(Debug)]
pub(crate) struct AckRegistry {
    ttl: Duration,
    pending: Mutex<Pending>,
}

#[derive(Debug, Default)]
struct Pending {
    next_id: u64,
    queues: HashMap<CommandKind, VecDeque<Waiter>>,
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    registered: Instant,
    tx: oneshot::Sender<bool>,
}

impl AckRegistry {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pending: Mutex::new(Pending::default()),
        }
    }

    pub(crate) fn register(&self, kind: CommandKind) -> AckPending {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock();
        let id = pending.next_id;
        pending.next_id += 1;

        let queue = pending.queues.entry(kind).or_default();
        expire(queue, self.ttl);
        if queue.len() >= MAX_PENDING_ACKS {
            // dropping the sender abandons that waiter
            queue.pop_front();
        }
        queue.push_back(Waiter {
            id,
            registered: Instant::now(),
            tx,
        });
        AckPending { kind, id, rx }
    }

    /// Resolve the oldest live waiter of `kind`. Returns false if none was
    /// waiting.
    pub(crate) fn resolve(&self, kind: CommandKind, success: bool) -> bool {
        let mut pending = self.pending.lock();
        let Some(queue) = pending.queues.get_mut(&kind) else {
            return false;
        };
        expire(queue, self.ttl);
        while let Some(waiter) = queue.pop_front() {
            // waiter may have been dropped; try the next one
            if waiter.tx.send(success).is_ok() {
                return true;
            }
        }
        false
    }

    /// Remove a waiter whose command never reached the link
    pub(crate) fn discard(&self, ack: &AckPending) {
        let mut pending = self.pending.lock();
        if let Some(queue) = pending.queues.get_mut(&ack.kind) {
            queue.retain(|w| w.id != ack.id);
        }
    }

    /// Drop every waiter; each sees [`SdkError::AckAbandoned`]
    pub(crate) fn abandon_all(&self) -> usize {
        let mut pending = self.pending.lock();
        let count = pending.queues.values().map(VecDeque::len).sum();
        pending.queues.clear();
        count
    }

    #[cfg(test)]
    fn len(&self, kind: CommandKind) -> usize {
        self.pending.lock().queues.get(&kind).map_or(0, VecDeque::len)
    }
}

fn expire(queue: &mut VecDeque<Waiter>, ttl: Duration) {
    let before = queue.len();
    // registration order is also age order
    while queue.front().is_some_and(|w| w.registered.elapsed() > ttl) {
        queue.pop_front();
    }
    let expired = before - queue.len();
    if expired > 0 {
        debug!(expired, "dropping acknowledgement waiters past their window");
    }
}

/// Acknowledgement that may still arrive for a submitted command
///
/// Dropping it is fine; most hosts never wait.
#[derive(Debug)]
pub struct AckPending {
    kind: CommandKind,
    id: u64,
    rx: oneshot::Receiver<bool>,
}

impl AckPending {
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Wait for the device's verdict
    ///
    /// Returns `Ok(success)`, or [`SdkError::AckAbandoned`] if the
    /// connection dropped or the ack window passed first.
    pub async fn wait(self) -> Result<bool> {
        let AckPending { kind, rx, .. } = self;
        rx.await.map_err(|_| SdkError::AckAbandoned(kind))
    }

    /// Like [`wait`](Self::wait), giving up after `timeout` with `Ok(None)`
    pub async fn wait_timeout(self, timeout: Duration) -> Result<Option<bool>> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }
}

// ============================================================================
// Gateway
// ============================================================================

/// Validates, gates and queues commands for one device
#[derive(Clone)]
pub struct CommandGateway {
    store: Arc<StateStore>,
    supervisor: Arc<SupervisorHandle>,
    acks: Arc<AckRegistry>,
    runtime: Handle,
    cancel: CancellationToken,
    power_confirm_timeout: Duration,
    inter_key_delay: Duration,
    label_slots: u8,
}

impl CommandGateway {
    pub(crate) fn new(
        config: &EngineConfig,
        store: Arc<StateStore>,
        supervisor: Arc<SupervisorHandle>,
        acks: Arc<AckRegistry>,
        runtime: Handle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            supervisor,
            acks,
            runtime,
            cancel,
            power_confirm_timeout: config.power_confirm_timeout,
            inter_key_delay: config.inter_key_delay,
            label_slots: config.label_slots,
        }
    }

    /// Validate and queue a command
    ///
    /// Safe to call from any thread.
    pub fn submit(&self, command: Command) -> Result<AckPending> {
        let bytes = command.encode()?;

        if self.cancel.is_cancelled() {
            return Err(SdkError::Shutdown);
        }
        self.check_ready(&command)?;

        let queued_at = Instant::now();
        let ack = self.enqueue(command.kind(), bytes)?;
        debug!(%command, "command queued");

        if let Some(target) = optimistic_power(&command) {
            self.store.set_power_optimistic(target);
            self.confirm_power(target, queued_at);
        }
        Ok(ack)
    }

    /// Register the ack waiter, then queue the frame
    ///
    /// No waiter is left behind when the frame is not queued.
    fn enqueue(&self, kind: CommandKind, bytes: Vec<u8>) -> Result<AckPending> {
        let ack = self.acks.register(kind);

        // a disconnect landing before the registration has already
        // abandoned everything it could see
        if self.supervisor.state() != ConnectionState::Connected {
            self.acks.discard(&ack);
            return Err(SdkError::NotConnected);
        }
        if self.supervisor.send(OutboundFrame { kind, bytes }).is_err() {
            self.acks.discard(&ack);
            return Err(SdkError::Shutdown);
        }
        Ok(ack)
    }

    fn check_ready(&self, command: &Command) -> Result<()> {
        if self.supervisor.state() != ConnectionState::Connected {
            return Err(SdkError::NotConnected);
        }
        let needs_awake = !command.is_power() && !matches!(command, Command::Query(_));
        if needs_awake && self.store.power() == PowerState::Standby {
            debug!(%command, "rejecting command while device is in standby");
            return Err(SdkError::NotConnected);
        }
        Ok(())
    }

    /// Warn if the device does not report `target` within the confirm window.
    /// The optimistic value is kept either way.
    fn confirm_power(&self, target: PowerState, since: Instant) {
        let store = Arc::clone(&self.store);
        let cancel = self.cancel.clone();
        let timeout = self.power_confirm_timeout;

        self.runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(timeout) => {}
            }
            if !store.power_reported_since(target, since) {
                warn!(%target, ?timeout, "device did not confirm power change, keeping optimistic state");
            }
        });
    }

    // ========================================================================
    // Internal queries
    // ========================================================================

    /// Queue a query on the engine's own behalf
    ///
    /// No acknowledgement is registered, and no connection check is made:
    /// the supervisor discards frames queued for a dead link.
    pub(crate) fn query(&self, query: Query) -> Result<()> {
        let command = Command::Query(query);
        let bytes = command.encode()?;
        self.supervisor
            .send(OutboundFrame {
                kind: command.kind(),
                bytes,
            })
            .map_err(|_| SdkError::Shutdown)
    }

    /// Queries sent once per new connection
    pub(crate) fn bootstrap(&self) -> Result<()> {
        debug!("bootstrapping device state");
        self.query(Query::DeviceInfo)?;
        self.query(Query::Power)?;
        self.query(Query::FullStatus)
    }

    pub(crate) fn fetch_labels(&self) -> Result<()> {
        debug!(slots = self.label_slots, "fetching input labels");
        for slot in 0..self.label_slots {
            self.query(Query::Label { slot })?;
        }
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    pub fn power_on(&self) -> Result<AckPending> {
        self.submit(Command::PowerOn)
    }

    pub fn power_off(&self) -> Result<AckPending> {
        self.submit(Command::PowerOff)
    }

    /// Select a 1-based input
    pub fn select_input(&self, input: u8) -> Result<AckPending> {
        self.submit(Command::SelectInput(input))
    }

    /// Select the input whose label (or `"Input N"` fallback) is `label`
    pub fn select_input_by_label(&self, label: &str) -> Result<AckPending> {
        let slot = self
            .store
            .labels()
            .slot_of(label, self.label_slots)
            .ok_or_else(|| ValidationError::InvalidValue {
                parameter: "input_label",
                value: label.to_string(),
            })?;
        self.submit(Command::SelectInput(slot + 1))
    }

    pub fn select_aspect_ratio(&self, ratio: AspectRatio) -> Result<AckPending> {
        self.submit(Command::SelectAspectRatio(ratio))
    }

    /// Select an aspect ratio by its option label, e.g. `"2.35"`
    pub fn select_aspect_ratio_by_label(&self, label: &str) -> Result<AckPending> {
        let ratio = AspectRatio::from_label(label).ok_or_else(|| ValidationError::InvalidValue {
            parameter: "aspect_ratio",
            value: label.to_string(),
        })?;
        self.submit(Command::SelectAspectRatio(ratio))
    }

    pub fn recall_config(&self, config: u8) -> Result<AckPending> {
        self.submit(Command::RecallConfig(config))
    }

    pub fn select_memory(&self, bank: MemoryBank) -> Result<AckPending> {
        self.submit(Command::SelectMemory(bank))
    }

    pub fn send_key(&self, key: RemoteKey) -> Result<AckPending> {
        self.submit(Command::SendKey(key))
    }

    /// Send a sequence of remote keys by name, pausing between keys
    ///
    /// Every name is checked before the first key is sent, so an unknown
    /// name sends nothing.
    pub async fn send_keys<I, S>(&self, names: I) -> Result<Vec<AckPending>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = names
            .into_iter()
            .map(|name| RemoteKey::from_name(name.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for key in &keys {
            Command::SendKey(*key).validate()?;
        }

        let mut acks = Vec::with_capacity(keys.len());
        for (i, key) in keys.into_iter().enumerate() {
            if i > 0 {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(SdkError::Shutdown),
                    _ = tokio::time::sleep(self.inter_key_delay) => {}
                }
            }
            acks.push(self.send_key(key)?);
        }
        Ok(acks)
    }
}

impl std::fmt::Debug for CommandGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandGateway")
            .field("connection", &self.supervisor.state())
            .field("label_slots", &self.label_slots)
            .finish()
    }
}

fn optimistic_power(command: &Command) -> Option<PowerState> {
    match command {
        Command::PowerOn => Some(PowerState::On),
        Command::PowerOff => Some(PowerState::Standby),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use lumagen_stream::mock::{MockDevice, MockTransport};
    use lumagen_stream::{ConnectionDescriptor, ConnectionSupervisor, EventDispatcher};

    fn registry() -> AckRegistry {
        AckRegistry::new(Duration::from_secs(15))
    }

    /// Gateway whose device never accepts a connection
    fn offline_gateway() -> (CommandGateway, Arc<AckRegistry>, Arc<StateStore>, MockDevice) {
        let config = EngineConfig::fast(ConnectionDescriptor::ip("radiance.local"));
        let (transport, device) = MockTransport::new();
        device.refuse_next(usize::MAX);

        let cancel = CancellationToken::new();
        let supervisor = ConnectionSupervisor::new(
            Arc::new(transport),
            config.reconnect.clone(),
            config.max_frame_len,
            Arc::new(EventDispatcher::new()),
            Arc::new(()),
            cancel.clone(),
        )
        .spawn();

        let store = Arc::new(StateStore::new());
        let acks = Arc::new(registry());
        let gateway = CommandGateway::new(
            &config,
            Arc::clone(&store),
            Arc::new(supervisor),
            Arc::clone(&acks),
            Handle::current(),
            cancel,
        );
        (gateway, acks, store, device)
    }

    #[tokio::test]
    async fn test_enqueue_on_dead_link_leaves_no_waiter() {
        let (gateway, acks, _store, _device) = offline_gateway();

        let result = gateway.enqueue(CommandKind::PowerOn, b"%".to_vec());
        assert!(matches!(result, Err(SdkError::NotConnected)));
        assert_eq!(acks.len(CommandKind::PowerOn), 0);
    }

    #[tokio::test]
    async fn test_rejected_power_command_changes_nothing() {
        let (gateway, acks, store, _device) = offline_gateway();

        assert!(matches!(gateway.power_on(), Err(SdkError::NotConnected)));
        assert_eq!(acks.len(CommandKind::PowerOn), 0);
        assert!(store.get(lumagen_state::PropertyKey::Power).is_none());
    }

    #[tokio::test]
    async fn test_acks_resolve_in_fifo_order_per_kind() {
        let registry = registry();
        let first = registry.register(CommandKind::SelectInput);
        let second = registry.register(CommandKind::SelectInput);
        let other = registry.register(CommandKind::RecallConfig);

        assert!(registry.resolve(CommandKind::SelectInput, true));
        assert!(registry.resolve(CommandKind::SelectInput, false));
        assert!(!registry.resolve(CommandKind::SelectInput, true));

        assert!(first.wait().await.unwrap());
        assert!(!second.wait().await.unwrap());
        assert_eq!(registry.len(CommandKind::RecallConfig), 1);
        drop(other);
    }

    #[tokio::test]
    async fn test_dropped_waiter_is_skipped() {
        let registry = registry();
        drop(registry.register(CommandKind::SendKey));
        let live = registry.register(CommandKind::SendKey);

        assert!(registry.resolve(CommandKind::SendKey, true));
        assert!(live.wait().await.unwrap());
    }

    #[tokio::test]
    async fn test_abandon_all() {
        let registry = registry();
        let ack = registry.register(CommandKind::PowerOn);
        registry.register(CommandKind::SelectMemory);

        assert_eq!(registry.abandon_all(), 2);
        assert!(matches!(
            ack.wait().await,
            Err(SdkError::AckAbandoned(CommandKind::PowerOn))
        ));
    }

    #[tokio::test]
    async fn test_registry_is_capped() {
        let registry = registry();
        let oldest = registry.register(CommandKind::SendKey);
        for _ in 0..MAX_PENDING_ACKS {
            registry.register(CommandKind::SendKey);
        }
        assert_eq!(registry.len(CommandKind::SendKey), MAX_PENDING_ACKS);
        assert!(oldest.wait().await.is_err());
    }

    #[tokio::test]
    async fn test_expired_waiter_cannot_claim_a_later_ack() {
        let registry = AckRegistry::new(Duration::from_millis(20));
        let skipped = registry.register(CommandKind::SelectInput);
        tokio::time::sleep(Duration::from_millis(40)).await;
        let current = registry.register(CommandKind::SelectInput);

        assert_eq!(registry.len(CommandKind::SelectInput), 1);
        assert!(registry.resolve(CommandKind::SelectInput, true));
        assert!(current.wait().await.unwrap());
        assert!(matches!(
            skipped.wait().await,
            Err(SdkError::AckAbandoned(CommandKind::SelectInput))
        ));
    }

    #[tokio::test]
    async fn test_expired_waiters_are_dropped_on_resolve() {
        let registry = AckRegistry::new(Duration::from_millis(20));
        let stale = registry.register(CommandKind::RecallConfig);
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(!registry.resolve(CommandKind::RecallConfig, true));
        assert!(stale.wait().await.is_err());
    }

    #[tokio::test]
    async fn test_discard_removes_only_that_waiter() {
        let registry = registry();
        let kept = registry.register(CommandKind::SendKey);
        let unsent = registry.register(CommandKind::SendKey);
        registry.discard(&unsent);

        assert_eq!(registry.len(CommandKind::SendKey), 1);
        assert!(registry.resolve(CommandKind::SendKey, false));
        assert!(!kept.wait().await.unwrap());
        assert!(unsent.wait().await.is_err());
    }

    #[tokio::test]
    async fn test_wait_timeout() {
        let registry = registry();
        let ack = registry.register(CommandKind::RecallConfig);
        assert_eq!(ack.wait_timeout(Duration::from_millis(10)).await.unwrap(), None);
    }

    #[test]
    fn test_only_power_is_optimistic() {
        assert_eq!(optimistic_power(&Command::PowerOn), Some(PowerState::On));
        assert_eq!(optimistic_power(&Command::PowerOff), Some(PowerState::Standby));
        assert_eq!(optimistic_power(&Command::SelectInput(2)), None);
        assert_eq!(optimistic_power(&Command::Query(Query::Power)), None);
    }
}
