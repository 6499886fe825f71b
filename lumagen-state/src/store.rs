//! StateStore - the device mirror
//!
//! The store owns every cached property and the input label map. Events are
//! applied one at a time under a single lock, and change notifications are
//! emitted before the lock is released, so every subscriber observes changes
//! in exactly the order they were applied.
//!
//! Freshness rules:
//! - A value equal to the cached one, with an unchanged stale flag, is a
//!   no-op: no notification, though `last_updated` still advances for
//!   live-only properties.
//! - Standby freezes every status property except `power`.
//! - Disconnection freezes every status property including `power`.
//! - Frozen values are kept and marked stale, never removed. Diagnostics
//!   are never touched by either.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use lumagen_protocol::{DeviceInfo, Event, PowerState, StatusUpdate};
use lumagen_stream::ConnectionState;

use crate::labels::InputLabels;
use crate::property::{Category, DeviceProperty, FreshnessPolicy, Property, PropertyKey, PropertyValue};

/// Default capacity of the change broadcast channel
pub const DEFAULT_CHANGE_BUFFER: usize = 1000;

// ============================================================================
// Public types
// ============================================================================

/// A visible change, delivered to subscribers in apply order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StateChange {
    /// A property's value or stale flag changed; carries the new state
    Property(DeviceProperty),
    LabelChanged { slot: u8, label: String },
    Connection(ConnectionState),
}

/// Side effects the caller should act on after an apply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Number of notifications emitted
    pub changes: usize,
    /// The device reported its labels changed; they need re-fetching
    pub refresh_labels: bool,
    /// The device reported power on after reporting another state on the
    /// same connection
    pub woke: bool,
}

/// Which property groups a host should present as available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub status: bool,
    pub diagnostic: bool,
}

/// Point-in-time copy of the whole mirror
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceState {
    pub connection: ConnectionState,
    /// Power as currently believed, `Unknown` when the cached value is stale
    pub power: PowerState,
    pub properties: BTreeMap<PropertyKey, DeviceProperty>,
    pub labels: InputLabels,
    pub availability: Availability,
}

impl DeviceState {
    pub fn get(&self, key: PropertyKey) -> Option<&DeviceProperty> {
        self.properties.get(&key)
    }
}

// ============================================================================
// Store
// ============================================================================

struct Inner {
    connection: ConnectionState,
    properties: BTreeMap<PropertyKey, DeviceProperty>,
    labels: InputLabels,
    /// Last power state the device itself reported on this connection
    reported_power: Option<(PowerState, Instant)>,
    watchers: HashMap<PropertyKey, watch::Sender<Option<DeviceProperty>>>,
}

impl Inner {
    fn power(&self) -> PowerState {
        match self.properties.get(&PropertyKey::Power) {
            Some(DeviceProperty {
                value: PropertyValue::Power(power),
                stale: false,
                ..
            }) => *power,
            _ => PowerState::Unknown,
        }
    }

    fn link_down(&self) -> bool {
        self.connection != ConnectionState::Connected
    }

    /// Status values received now should be stored already frozen
    fn status_frozen(&self) -> bool {
        self.link_down() || self.power() == PowerState::Standby
    }

    fn availability(&self) -> Availability {
        let connected = self.connection == ConnectionState::Connected;
        let has_diagnostics = self
            .properties
            .values()
            .any(|p| p.category == Category::Diagnostic);
        Availability {
            status: connected && self.power() == PowerState::On,
            diagnostic: connected || has_diagnostics,
        }
    }
}

/// Single-writer cache of device state with change fan-out
pub struct StateStore {
    inner: Mutex<Inner>,
    changes: broadcast::Sender<StateChange>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANGE_BUFFER)
    }

    /// Create a store whose change channel holds `capacity` undelivered
    /// changes per subscriber before the slowest starts lagging
    pub fn with_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Mutex::new(Inner {
                connection: ConnectionState::Disconnected,
                properties: BTreeMap::new(),
                labels: InputLabels::new(),
                reported_power: None,
                watchers: HashMap::new(),
            }),
            changes,
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Apply one decoded event
    pub fn apply(&self, event: &Event) -> ApplyOutcome {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let mut outcome = ApplyOutcome::default();

        match event {
            Event::StatusChanged(StatusUpdate::InputLabel { slot, label }) => {
                if inner.labels.set(*slot, label.as_str()) {
                    debug!(slot, label = %label, "input label changed");
                    self.emit(StateChange::LabelChanged {
                        slot: *slot,
                        label: label.clone(),
                    });
                    outcome.changes += 1;
                }
            }
            Event::StatusChanged(update) => {
                if let Some((key, value)) = status_entry(update) {
                    let stale = inner.status_frozen();
                    outcome.changes += self.upsert(&mut inner, key, value, stale, now);
                }
            }
            Event::PowerChanged(power) => {
                let previous = inner.reported_power.map(|(p, _)| p);
                inner.reported_power = Some((*power, Instant::now()));
                let stale = inner.link_down();
                outcome.changes +=
                    self.upsert(&mut inner, PropertyKey::Power, PropertyValue::Power(*power), stale, now);

                match power {
                    PowerState::Standby => {
                        outcome.changes += self.freeze(&mut inner, |k| k != PropertyKey::Power);
                    }
                    // the first report of a connection answers the bootstrap,
                    // which already asks for full status
                    PowerState::On => {
                        outcome.woke = !stale && previous.is_some_and(|p| p != PowerState::On)
                    }
                    PowerState::Unknown => {}
                }
            }
            Event::LabelsChanged => outcome.refresh_labels = true,
            Event::DeviceInfo(info) => {
                for (key, value) in diagnostic_entries(info) {
                    outcome.changes += self.upsert(&mut inner, key, value, false, now);
                }
            }
            Event::CommandAck { .. } | Event::Unrecognized(_) => {}
        }

        trace!(event = event.name(), changes = outcome.changes, "applied event");
        outcome
    }

    /// Record a connection state transition
    ///
    /// Leaving `Connected` freezes every status property, power included.
    /// Diagnostics and labels are kept.
    pub fn set_connection_state(&self, state: ConnectionState) -> usize {
        let mut inner = self.inner.lock();
        if inner.connection == state {
            return 0;
        }
        inner.connection = state;
        self.emit(StateChange::Connection(state));

        let mut changes = 1;
        if inner.link_down() {
            inner.reported_power = None;
            changes += self.freeze(&mut inner, |_| true);
        }
        changes
    }

    /// Set power ahead of device confirmation
    ///
    /// An optimistic standby also freezes status properties, exactly as a
    /// reported standby would. Nothing is rolled back if the device never
    /// confirms. While the link is down the value is stored already stale.
    pub fn set_power_optimistic(&self, power: PowerState) -> usize {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let stale = inner.link_down();
        let mut changes =
            self.upsert(&mut inner, PropertyKey::Power, PropertyValue::Power(power), stale, now);
        if power == PowerState::Standby {
            changes += self.freeze(&mut inner, |k| k != PropertyKey::Power);
        }
        debug!(%power, stale, "power set optimistically");
        changes
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get(&self, key: PropertyKey) -> Option<DeviceProperty> {
        self.inner.lock().properties.get(&key).cloned()
    }

    /// Typed read, ignoring staleness
    pub fn get_typed<P: Property>(&self) -> Option<P> {
        self.get(P::KEY).and_then(|p| P::from_value(&p.value))
    }

    /// Full snapshot of the mirror
    pub fn get_all(&self) -> DeviceState {
        let inner = self.inner.lock();
        DeviceState {
            connection: inner.connection,
            power: inner.power(),
            properties: inner.properties.clone(),
            labels: inner.labels.clone(),
            availability: inner.availability(),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock().connection
    }

    /// Power as currently believed; `Unknown` when stale or never seen
    pub fn power(&self) -> PowerState {
        self.inner.lock().power()
    }

    pub fn labels(&self) -> InputLabels {
        self.inner.lock().labels.clone()
    }

    pub fn availability(&self) -> Availability {
        self.inner.lock().availability()
    }

    /// Whether the device has reported `power` at or after `since` on the
    /// current connection
    pub fn power_reported_since(&self, power: PowerState, since: Instant) -> bool {
        matches!(self.inner.lock().reported_power, Some((p, at)) if p == power && at >= since)
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Receive every visible change from now on
    pub fn subscribe_changes(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    /// Watch a single property; the receiver starts at the current value
    pub fn watch(&self, key: PropertyKey) -> watch::Receiver<Option<DeviceProperty>> {
        let mut inner = self.inner.lock();
        let current = inner.properties.get(&key).cloned();
        inner
            .watchers
            .entry(key)
            .or_insert_with(|| watch::channel(current).0)
            .subscribe()
    }

    /// Run `callback` for every change on a background task
    ///
    /// Must be called from within a Tokio runtime. The callback stops when
    /// the returned subscription is dropped.
    pub fn on_change<F>(&self, mut callback: F) -> ChangeSubscription
    where
        F: FnMut(StateChange) + Send + 'static,
    {
        let mut rx = self.subscribe_changes();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => callback(change),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "change callback lagging, changes dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        ChangeSubscription { task }
    }

    // ========================================================================
    // Internals (called with the lock held)
    // ========================================================================

    fn upsert(
        &self,
        inner: &mut Inner,
        key: PropertyKey,
        value: PropertyValue,
        stale: bool,
        now: DateTime<Utc>,
    ) -> usize {
        let updated = match inner.properties.get_mut(&key) {
            Some(existing) if existing.value == value && existing.stale == stale => {
                if existing.freshness == FreshnessPolicy::LiveOnly {
                    existing.last_updated = now;
                }
                None
            }
            Some(existing) => {
                existing.value = value;
                existing.stale = stale;
                existing.last_updated = now;
                Some(existing.clone())
            }
            None => {
                let property = DeviceProperty::new(key, value, now, stale);
                inner.properties.insert(key, property.clone());
                Some(property)
            }
        };

        match updated {
            Some(property) => {
                trace!(key = %key, value = %property.value, stale, "property changed");
                self.notify(inner, property);
                1
            }
            None => 0,
        }
    }

    /// Mark fresh status properties accepted by `include` as stale
    fn freeze(&self, inner: &mut Inner, include: impl Fn(PropertyKey) -> bool) -> usize {
        let frozen: Vec<DeviceProperty> = inner
            .properties
            .values_mut()
            .filter(|p| p.category == Category::Status && !p.stale && include(p.key))
            .map(|p| {
                p.stale = true;
                p.clone()
            })
            .collect();

        let count = frozen.len();
        for property in frozen {
            self.notify(inner, property);
        }
        if count > 0 {
            debug!(count, "status properties frozen");
        }
        count
    }

    fn notify(&self, inner: &Inner, property: DeviceProperty) {
        if let Some(tx) = inner.watchers.get(&property.key) {
            tx.send_replace(Some(property.clone()));
        }
        self.emit(StateChange::Property(property));
    }

    fn emit(&self, change: StateChange) {
        // no receivers is fine
        let _ = self.changes.send(change);
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("StateStore")
            .field("connection", &inner.connection)
            .field("properties", &inner.properties.len())
            .field("labels", &inner.labels.len())
            .finish()
    }
}

/// Background callback registered with [`StateStore::on_change`]
#[derive(Debug)]
pub struct ChangeSubscription {
    task: JoinHandle<()>,
}

impl ChangeSubscription {
    /// Stop the callback; dropping the subscription does the same
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ============================================================================
// Event mapping
// ============================================================================

fn status_entry(update: &StatusUpdate) -> Option<(PropertyKey, PropertyValue)> {
    Some(match update {
        StatusUpdate::LogicalInput(n) => (PropertyKey::LogicalInput, PropertyValue::Number(*n)),
        StatusUpdate::PhysicalInput(n) => (PropertyKey::PhysicalInput, PropertyValue::Number(*n)),
        StatusUpdate::InputMemory(m) => (PropertyKey::InputMemory, PropertyValue::Memory(*m)),
        StatusUpdate::OutputResolution(r) => {
            (PropertyKey::OutputResolution, PropertyValue::Resolution(*r))
        }
        StatusUpdate::SourceAspect(a) => (PropertyKey::SourceAspect, PropertyValue::Aspect(a.clone())),
        StatusUpdate::DynamicRange(d) => {
            (PropertyKey::SourceDynamicRange, PropertyValue::DynamicRange(*d))
        }
        StatusUpdate::InputConfig(n) => (PropertyKey::InputConfig, PropertyValue::Number(*n)),
        StatusUpdate::OutputCms(n) => (PropertyKey::OutputCms, PropertyValue::Number(*n)),
        StatusUpdate::OutputStyle(n) => (PropertyKey::OutputStyle, PropertyValue::Number(*n)),
        StatusUpdate::InputLabel { .. } => return None,
    })
}

fn diagnostic_entries(info: &DeviceInfo) -> [(PropertyKey, PropertyValue); 4] {
    [
        (PropertyKey::ModelName, PropertyValue::Text(info.model_name.clone())),
        (
            PropertyKey::SoftwareRevision,
            PropertyValue::Text(info.software_revision.clone()),
        ),
        (PropertyKey::ModelNumber, PropertyValue::Text(info.model_number.clone())),
        (PropertyKey::SerialNumber, PropertyValue::Text(info.serial_number.clone())),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{LogicalInput, ModelName};
    use lumagen_protocol::{AspectRatio, DynamicRange};

    fn connected_store() -> StateStore {
        let store = StateStore::new();
        store.set_connection_state(ConnectionState::Connecting);
        store.set_connection_state(ConnectionState::Connected);
        store
    }

    fn status(update: StatusUpdate) -> Event {
        Event::StatusChanged(update)
    }

    fn drain(rx: &mut broadcast::Receiver<StateChange>) -> Vec<StateChange> {
        let mut changes = Vec::new();
        while let Ok(change) = rx.try_recv() {
            changes.push(change);
        }
        changes
    }

    fn device_info() -> Event {
        Event::DeviceInfo(DeviceInfo {
            model_name: "RadiancePro".into(),
            software_revision: "1.2".into(),
            model_number: "X1".into(),
            serial_number: "SN123".into(),
        })
    }

    #[test]
    fn test_repeated_value_is_silent_but_refreshes_timestamp() {
        let store = connected_store();
        store.apply(&Event::PowerChanged(PowerState::On));
        let mut rx = store.subscribe_changes();

        assert_eq!(store.apply(&status(StatusUpdate::LogicalInput(2))).changes, 1);
        let first = store.get(PropertyKey::LogicalInput).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(store.apply(&status(StatusUpdate::LogicalInput(2))).changes, 0);
        let second = store.get(PropertyKey::LogicalInput).unwrap();

        assert_eq!(drain(&mut rx).len(), 1);
        assert!(second.last_updated > first.last_updated);
    }

    #[test]
    fn test_diagnostic_timestamp_not_refreshed() {
        let store = connected_store();
        store.apply(&device_info());
        let first = store.get(PropertyKey::ModelName).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(store.apply(&device_info()).changes, 0);
        assert_eq!(store.get(PropertyKey::ModelName).unwrap().last_updated, first.last_updated);
    }

    #[test]
    fn test_standby_freezes_status_but_not_power_or_diagnostics() {
        let store = connected_store();
        store.apply(&device_info());
        store.apply(&Event::PowerChanged(PowerState::On));
        store.apply(&status(StatusUpdate::SourceAspect(AspectRatio::Ratio2_35)));
        store.apply(&status(StatusUpdate::DynamicRange(DynamicRange::Hdr10)));

        store.apply(&Event::PowerChanged(PowerState::Standby));
        let state = store.get_all();

        assert!(!state.get(PropertyKey::Power).unwrap().stale);
        assert_eq!(state.power, PowerState::Standby);
        for key in [PropertyKey::SourceAspect, PropertyKey::SourceDynamicRange] {
            let property = state.get(key).unwrap();
            assert!(property.stale, "{key} should be stale");
        }
        // value kept
        assert_eq!(
            state.get(PropertyKey::SourceAspect).unwrap().value,
            PropertyValue::Aspect(AspectRatio::Ratio2_35)
        );
        assert!(!state.get(PropertyKey::ModelName).unwrap().stale);
        assert!(!state.availability.status);
        assert!(state.availability.diagnostic);
    }

    #[test]
    fn test_fresh_status_after_power_on_clears_stale() {
        let store = connected_store();
        store.apply(&Event::PowerChanged(PowerState::On));
        store.apply(&status(StatusUpdate::LogicalInput(4)));
        store.apply(&Event::PowerChanged(PowerState::Standby));

        let mut rx = store.subscribe_changes();
        let outcome = store.apply(&Event::PowerChanged(PowerState::On));
        assert!(outcome.woke);
        assert!(store.get(PropertyKey::LogicalInput).unwrap().stale);

        // same value, but the stale flag flips: that is a visible change
        assert_eq!(store.apply(&status(StatusUpdate::LogicalInput(4))).changes, 1);
        assert!(!store.get(PropertyKey::LogicalInput).unwrap().stale);

        let changes = drain(&mut rx);
        assert_eq!(changes.len(), 2);
        assert!(matches!(
            &changes[1],
            StateChange::Property(p) if p.key == PropertyKey::LogicalInput && !p.stale
        ));
    }

    #[test]
    fn test_status_received_during_standby_stays_frozen() {
        let store = connected_store();
        store.apply(&Event::PowerChanged(PowerState::Standby));
        store.apply(&status(StatusUpdate::OutputCms(3)));
        assert!(store.get(PropertyKey::OutputCms).unwrap().stale);
    }

    #[test]
    fn test_disconnect_freezes_power_and_keeps_diagnostics() {
        let store = connected_store();
        store.apply(&device_info());
        store.apply(&Event::PowerChanged(PowerState::On));
        store.apply(&status(StatusUpdate::InputConfig(1)));
        store.apply(&status(StatusUpdate::InputLabel {
            slot: 0,
            label: "Apple TV".into(),
        }));

        store.set_connection_state(ConnectionState::Disconnected);
        let state = store.get_all();

        assert_eq!(state.connection, ConnectionState::Disconnected);
        assert_eq!(state.power, PowerState::Unknown);
        assert!(state.get(PropertyKey::Power).unwrap().stale);
        assert!(state.get(PropertyKey::InputConfig).unwrap().stale);
        assert_eq!(state.properties.len(), 6);
        assert_eq!(store.get_typed::<ModelName>(), Some(ModelName("RadiancePro".into())));
        assert!(!state.get(PropertyKey::SerialNumber).unwrap().stale);
        assert_eq!(state.labels.get(0), Some("Apple TV"));
        assert_eq!(
            state.availability,
            Availability {
                status: false,
                diagnostic: true
            }
        );
    }

    #[test]
    fn test_changes_arrive_in_apply_order() {
        let store = connected_store();
        store.apply(&Event::PowerChanged(PowerState::On));
        let mut rx = store.subscribe_changes();

        store.apply(&status(StatusUpdate::LogicalInput(1)));
        store.apply(&status(StatusUpdate::OutputStyle(2)));
        store.apply(&status(StatusUpdate::LogicalInput(3)));

        let observed: Vec<(PropertyKey, PropertyValue)> = drain(&mut rx)
            .into_iter()
            .filter_map(|c| match c {
                StateChange::Property(p) => Some((p.key, p.value)),
                _ => None,
            })
            .collect();
        assert_eq!(
            observed,
            vec![
                (PropertyKey::LogicalInput, PropertyValue::Number(1)),
                (PropertyKey::OutputStyle, PropertyValue::Number(2)),
                (PropertyKey::LogicalInput, PropertyValue::Number(3)),
            ]
        );
    }

    #[test]
    fn test_labels_changed_requests_refresh() {
        let store = connected_store();
        let outcome = store.apply(&Event::LabelsChanged);
        assert!(outcome.refresh_labels);
        assert_eq!(outcome.changes, 0);
    }

    #[test]
    fn test_label_notifications() {
        let store = connected_store();
        let mut rx = store.subscribe_changes();
        let label = |l: &str| {
            status(StatusUpdate::InputLabel {
                slot: 1,
                label: l.into(),
            })
        };

        store.apply(&label("Blu-ray"));
        store.apply(&label("Blu-ray"));
        store.apply(&label("UHD Blu-ray"));

        assert_eq!(
            drain(&mut rx),
            vec![
                StateChange::LabelChanged {
                    slot: 1,
                    label: "Blu-ray".into()
                },
                StateChange::LabelChanged {
                    slot: 1,
                    label: "UHD Blu-ray".into()
                },
            ]
        );
    }

    #[test]
    fn test_optimistic_power() {
        let store = connected_store();
        let before = Instant::now();
        store.set_power_optimistic(PowerState::On);
        assert_eq!(store.power(), PowerState::On);
        assert!(!store.power_reported_since(PowerState::On, before));

        store.apply(&Event::PowerChanged(PowerState::On));
        assert!(store.power_reported_since(PowerState::On, before));
        assert!(store.availability().status);
    }

    #[test]
    fn test_optimistic_power_while_disconnected_stays_stale() {
        let store = connected_store();
        store.apply(&Event::PowerChanged(PowerState::Standby));
        store.set_connection_state(ConnectionState::Disconnected);

        let mut rx = store.subscribe_changes();
        assert_eq!(store.set_power_optimistic(PowerState::On), 1);

        let power = store.get(PropertyKey::Power).unwrap();
        assert_eq!(power.value, PropertyValue::Power(PowerState::On));
        assert!(power.stale);
        assert_eq!(store.power(), PowerState::Unknown);
        assert!(!store.availability().status);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [StateChange::Property(p)] if p.key == PropertyKey::Power && p.stale
        ));
    }

    #[test]
    fn test_power_reported_while_disconnected_stays_stale() {
        let store = StateStore::new();
        let outcome = store.apply(&Event::PowerChanged(PowerState::On));
        assert!(!outcome.woke);
        assert!(store.get(PropertyKey::Power).unwrap().stale);
    }

    #[test]
    fn test_first_power_report_of_a_connection_is_not_a_wake() {
        let store = connected_store();
        assert!(!store.apply(&Event::PowerChanged(PowerState::On)).woke);
        assert!(!store.apply(&Event::PowerChanged(PowerState::On)).woke);

        store.set_connection_state(ConnectionState::Disconnected);
        store.set_connection_state(ConnectionState::Connecting);
        store.set_connection_state(ConnectionState::Connected);
        assert!(!store.apply(&Event::PowerChanged(PowerState::Standby)).woke);
        assert!(store.apply(&Event::PowerChanged(PowerState::On)).woke);
    }

    #[test]
    fn test_connection_changes_are_notified_once() {
        let store = StateStore::new();
        let mut rx = store.subscribe_changes();
        assert_eq!(store.set_connection_state(ConnectionState::Disconnected), 0);
        store.set_connection_state(ConnectionState::Connecting);
        store.set_connection_state(ConnectionState::Connecting);
        assert_eq!(
            drain(&mut rx),
            vec![StateChange::Connection(ConnectionState::Connecting)]
        );
    }

    #[tokio::test]
    async fn test_watch_sees_updates() {
        let store = connected_store();
        store.apply(&Event::PowerChanged(PowerState::On));
        let mut rx = store.watch(PropertyKey::LogicalInput);
        assert!(rx.borrow().is_none());

        store.apply(&status(StatusUpdate::LogicalInput(5)));
        rx.changed().await.unwrap();
        let property = rx.borrow().clone().unwrap();
        assert_eq!(LogicalInput::from_value(&property.value), Some(LogicalInput(5)));
    }

    #[tokio::test]
    async fn test_on_change_callback() {
        let store = connected_store();
        let (tx, mut seen) = tokio::sync::mpsc::unbounded_channel();
        let subscription = store.on_change(move |change| {
            let _ = tx.send(change);
        });

        store.apply(&Event::PowerChanged(PowerState::On));
        let change = tokio::time::timeout(std::time::Duration::from_secs(1), seen.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(change, StateChange::Property(p) if p.key == PropertyKey::Power));

        subscription.cancel();
        store.apply(&status(StatusUpdate::LogicalInput(2)));
        let after_cancel =
            tokio::time::timeout(std::time::Duration::from_millis(100), seen.recv()).await;
        assert!(!matches!(after_cancel, Ok(Some(_))), "callback ran after cancel");
    }
}
