//! Typed watchers over single properties
//!
//! [`PropertyWatcher`] is the async form; [`SyncWatcher`] wraps the same
//! channel for code that can't use async/await, such as CLI tools.

use std::marker::PhantomData;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{Result, StateError};
use crate::property::{DeviceProperty, Property};
use crate::store::StateStore;

/// Typed async watcher for one property
///
/// ```rust,ignore
/// let mut aspect = PropertyWatcher::<SourceAspect>::new(&store);
/// while let Ok(value) = aspect.changed().await {
///     println!("aspect now {value:?} (stale: {})", aspect.is_stale());
/// }
/// ```
pub struct PropertyWatcher<P: Property> {
    rx: watch::Receiver<Option<DeviceProperty>>,
    _marker: PhantomData<fn() -> P>,
}

impl<P: Property> PropertyWatcher<P> {
    pub fn new(store: &StateStore) -> Self {
        Self::from_receiver(store.watch(P::KEY))
    }

    pub fn from_receiver(rx: watch::Receiver<Option<DeviceProperty>>) -> Self {
        Self {
            rx,
            _marker: PhantomData,
        }
    }

    /// Current value, stale or not
    pub fn current(&self) -> Option<P> {
        self.rx
            .borrow()
            .as_ref()
            .and_then(|p| P::from_value(&p.value))
    }

    /// Whether the current value is frozen. False when no value exists yet.
    pub fn is_stale(&self) -> bool {
        self.rx.borrow().as_ref().is_some_and(|p| p.stale)
    }

    /// Full property including metadata
    pub fn property(&self) -> Option<DeviceProperty> {
        self.rx.borrow().clone()
    }

    /// Wait for the next visible change and return the new value
    pub async fn changed(&mut self) -> Result<Option<P>> {
        self.rx.changed().await.map_err(|_| StateError::Closed)?;
        Ok(self.current())
    }
}

impl<P: Property> Clone for PropertyWatcher<P> {
    fn clone(&self) -> Self {
        Self::from_receiver(self.rx.clone())
    }
}

/// Blocking wrapper around a property watch channel
///
/// # Example
///
/// ```rust,ignore
/// let mut watcher = SyncWatcher::<LogicalInput>::new(&store, runtime.handle().clone());
///
/// if let Some(input) = watcher.get() {
///     println!("Current input: {}", input.0);
/// }
///
/// loop {
///     if let Some(input) = watcher.wait() {
///         println!("Input changed to: {}", input.0);
///     }
/// }
/// ```
pub struct SyncWatcher<P: Property> {
    inner: PropertyWatcher<P>,
    rt: tokio::runtime::Handle,
}

impl<P: Property> SyncWatcher<P> {
    pub fn new(store: &StateStore, rt: tokio::runtime::Handle) -> Self {
        Self {
            inner: PropertyWatcher::new(store),
            rt,
        }
    }

    /// Get the current value without blocking
    pub fn get(&self) -> Option<P> {
        self.inner.current()
    }

    pub fn is_stale(&self) -> bool {
        self.inner.is_stale()
    }

    /// Block until the property changes, then return the new value
    ///
    /// Returns `None` if the store is gone or the property has no value.
    /// Must not be called from inside the runtime's own worker threads.
    pub fn wait(&mut self) -> Option<P> {
        self.rt.block_on(self.inner.changed()).ok().flatten()
    }

    /// Block until the property changes or `timeout` expires
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<P> {
        let inner = &mut self.inner;
        self.rt
            .block_on(async { tokio::time::timeout(timeout, inner.changed()).await })
            .ok()?
            .ok()
            .flatten()
    }

    /// True if a change arrived since the last `wait`
    pub fn has_changed(&self) -> bool {
        self.inner.rx.has_changed().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{OutputStyle, Power};
    use lumagen_protocol::{Event, PowerState, StatusUpdate};
    use lumagen_stream::ConnectionState;

    fn store() -> StateStore {
        let store = StateStore::new();
        store.set_connection_state(ConnectionState::Connected);
        store
    }

    #[tokio::test]
    async fn test_property_watcher() {
        let store = store();
        let mut watcher = PropertyWatcher::<Power>::new(&store);
        assert_eq!(watcher.current(), None);
        assert!(!watcher.is_stale());

        store.apply(&Event::PowerChanged(PowerState::On));
        assert_eq!(watcher.changed().await.unwrap(), Some(Power(PowerState::On)));

        store.set_connection_state(ConnectionState::Disconnected);
        assert_eq!(watcher.changed().await.unwrap(), Some(Power(PowerState::On)));
        assert!(watcher.is_stale());
    }

    #[test]
    fn test_sync_watcher() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let store = std::sync::Arc::new(store());
        store.apply(&Event::PowerChanged(PowerState::On));

        let mut watcher = SyncWatcher::<OutputStyle>::new(&store, rt.handle().clone());
        assert_eq!(watcher.get(), None);
        assert_eq!(watcher.wait_timeout(Duration::from_millis(20)), None);

        let writer = std::sync::Arc::clone(&store);
        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer.apply(&Event::StatusChanged(StatusUpdate::OutputStyle(4)));
        });

        assert_eq!(watcher.wait_timeout(Duration::from_secs(2)), Some(OutputStyle(4)));
        assert!(!watcher.has_changed());
        thread.join().unwrap();
    }
}
