//! Connection supervisor
//!
//! A single task owns the transport. It connects, reads and decodes frames,
//! publishes the resulting events in order, and writes queued outbound
//! frames between reads. When the link fails it reports the connection as
//! down, drops whatever was still queued, and reconnects with exponential
//! backoff. The backoff only resets once a session has stayed up longer
//! than the configured stability threshold, so a device that accepts and
//! immediately drops connections does not get hammered.
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected
//!      ▲               │              │
//!      └───────────────┴──────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lumagen_protocol::{CommandKind, FrameDecoder};

use crate::backoff::Backoff;
use crate::config::ReconnectConfig;
use crate::dispatcher::EventDispatcher;
use crate::error::TransportError;
use crate::transport::{Link, Transport};

const READ_BUFFER_SIZE: usize = 1024;

/// Link state as seen by the rest of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// A frame waiting to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub kind: CommandKind,
    pub bytes: Vec<u8>,
}

/// Hooks the supervisor calls on its own task
///
/// Implementations must not block: they run between reads.
pub trait SessionObserver: Send + Sync + 'static {
    /// Called on every state transition, after the new state is visible
    /// through [`SupervisorHandle::state`]
    fn on_state_change(&self, state: ConnectionState);
}

impl SessionObserver for () {
    fn on_state_change(&self, _state: ConnectionState) {}
}

/// Counters exposed for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SupervisorStats {
    pub connect_attempts: u64,
    pub sessions: u64,
    pub events_decoded: u64,
    pub parse_errors: u64,
    pub frames_sent: u64,
    /// Frames dropped because the link went down before they were written
    pub frames_discarded: u64,
    pub last_connected_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Counters {
    connect_attempts: AtomicU64,
    sessions: AtomicU64,
    events_decoded: AtomicU64,
    parse_errors: AtomicU64,
    frames_sent: AtomicU64,
    frames_discarded: AtomicU64,
    last_connected_at: Mutex<Option<DateTime<Utc>>>,
}

impl Counters {
    fn snapshot(&self) -> SupervisorStats {
        SupervisorStats {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            sessions: self.sessions.load(Ordering::Relaxed),
            events_decoded: self.events_decoded.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            last_connected_at: *self.last_connected_at.lock(),
        }
    }
}

enum SessionEnd {
    Cancelled,
    Failed(TransportError),
}

/// Owns the transport and runs the connect/read/reconnect loop
pub struct ConnectionSupervisor {
    transport: Arc<dyn Transport>,
    reconnect: ReconnectConfig,
    max_frame_len: usize,
    dispatcher: Arc<EventDispatcher>,
    observer: Arc<dyn SessionObserver>,
    state_tx: watch::Sender<ConnectionState>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    outbound_tx: mpsc::UnboundedSender<OutboundFrame>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
}

impl ConnectionSupervisor {
    pub fn new(
        transport: Arc<dyn Transport>,
        reconnect: ReconnectConfig,
        max_frame_len: usize,
        dispatcher: Arc<EventDispatcher>,
        observer: Arc<dyn SessionObserver>,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            reconnect,
            max_frame_len,
            dispatcher,
            observer,
            state_tx,
            outbound_rx,
            outbound_tx,
            counters: Arc::new(Counters::default()),
            cancel,
        }
    }

    /// Start the supervisor task
    pub fn spawn(self) -> SupervisorHandle {
        let handle = SupervisorHandle {
            outbound: self.outbound_tx.clone(),
            state: self.state_tx.subscribe(),
            counters: Arc::clone(&self.counters),
            cancel: self.cancel.clone(),
            task: Mutex::new(None),
        };
        let task = tokio::spawn(self.run());
        *handle.task.lock() = Some(task);
        handle
    }

    async fn run(mut self) {
        let endpoint = self.transport.endpoint();
        let mut backoff = Backoff::new(self.reconnect.clone());
        let mut decoder = FrameDecoder::with_max_frame_len(self.max_frame_len);
        info!(%endpoint, "connection supervisor started");

        loop {
            self.set_state(ConnectionState::Connecting);
            self.counters.connect_attempts.fetch_add(1, Ordering::Relaxed);

            let connected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.transport.connect() => result,
            };

            match connected {
                Ok(link) => {
                    // anything queued before this session belongs to a dead link
                    self.discard_outbound();
                    decoder.reset();
                    self.counters.sessions.fetch_add(1, Ordering::Relaxed);
                    *self.counters.last_connected_at.lock() = Some(Utc::now());
                    info!(peer = link.peer(), "connected");

                    let started = Instant::now();
                    self.set_state(ConnectionState::Connected);
                    let end = self.run_session(link, &mut decoder).await;
                    let connected_for = started.elapsed();

                    self.set_state(ConnectionState::Disconnected);
                    self.discard_outbound();

                    match end {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Failed(e) => {
                            warn!(%endpoint, error = %e, ?connected_for, "connection lost");
                        }
                    }

                    if backoff.is_stable(connected_for) {
                        debug!(?connected_for, "session was stable, resetting backoff");
                        backoff.reset();
                    }
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    warn!(%endpoint, error = %e, attempt = backoff.attempt(), "connect failed");
                }
            }

            let delay = backoff.next_delay();
            debug!(?delay, "waiting before reconnect");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Disconnected);
        self.discard_outbound();
        info!(%endpoint, "connection supervisor stopped");
    }

    async fn run_session(&mut self, mut link: Link, decoder: &mut FrameDecoder) -> SessionEnd {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        let end = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break SessionEnd::Cancelled,
                Some(frame) = self.outbound_rx.recv() => {
                    if let Err(e) = link.write(&frame.bytes).await {
                        break SessionEnd::Failed(e);
                    }
                    self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
                    debug!(kind = %frame.kind, "frame sent");
                }
                read = link.read(&mut buf) => match read {
                    Ok(0) => break SessionEnd::Failed(TransportError::Closed),
                    Ok(n) => self.handle_bytes(decoder, &buf[..n]),
                    Err(e) => break SessionEnd::Failed(e),
                },
            }
        };

        link.disconnect().await;
        end
    }

    fn handle_bytes(&self, decoder: &mut FrameDecoder, bytes: &[u8]) {
        for result in decoder.decode(bytes) {
            match result {
                Ok(event) => {
                    self.counters.events_decoded.fetch_add(1, Ordering::Relaxed);
                    self.dispatcher.publish(&event);
                }
                Err(e) => {
                    self.counters.parse_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "dropping malformed frame");
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "connection state changed");
            self.observer.on_state_change(state);
        }
    }

    fn discard_outbound(&mut self) {
        let mut dropped = 0;
        while let Ok(frame) = self.outbound_rx.try_recv() {
            debug!(kind = %frame.kind, "discarding frame queued for a dead link");
            dropped += 1;
        }
        if dropped > 0 {
            self.counters
                .frames_discarded
                .fetch_add(dropped, Ordering::Relaxed);
        }
    }
}

/// Handle to a running supervisor
#[derive(Debug)]
pub struct SupervisorHandle {
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    state: watch::Receiver<ConnectionState>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SupervisorHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Queue a frame for the current session
    ///
    /// Queuing never waits on the link. Frames still queued when the
    /// session ends are discarded.
    pub fn send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        self.outbound.send(frame).map_err(|_| TransportError::Closed)
    }

    pub fn stats(&self) -> SupervisorStats {
        self.counters.snapshot()
    }

    /// Wait until the state equals `target`, or `timeout` elapses
    pub async fn wait_for(&self, target: ConnectionState, timeout: Duration) -> bool {
        let mut rx = self.state.clone();
        tokio::time::timeout(timeout, rx.wait_for(|s| *s == target))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop reconnecting, close the link and wait for the task to finish
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "supervisor task did not exit cleanly");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDevice, MockTransport};
    use lumagen_protocol::{Event, PowerState};

    const WAIT: Duration = Duration::from_secs(2);

    fn fast_reconnect() -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            jitter: 0.0,
            stability_threshold: Duration::from_millis(300),
        }
    }

    struct Recorder(Mutex<Vec<ConnectionState>>);

    impl SessionObserver for Recorder {
        fn on_state_change(&self, state: ConnectionState) {
            self.0.lock().push(state);
        }
    }

    fn start(
        dispatcher: Arc<EventDispatcher>,
        observer: Arc<dyn SessionObserver>,
    ) -> (SupervisorHandle, MockDevice) {
        let (transport, device) = MockTransport::new();
        let handle = ConnectionSupervisor::new(
            Arc::new(transport),
            fast_reconnect(),
            512,
            dispatcher,
            observer,
            CancellationToken::new(),
        )
        .spawn();
        (handle, device)
    }

    #[tokio::test]
    async fn test_events_published_in_order() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let (_sub, mut events) = dispatcher.subscribe_channel(|_| true);
        let (handle, mut device) = start(Arc::clone(&dispatcher), Arc::new(()));

        let mut conn = device.accept(WAIT).await.unwrap();
        assert!(handle.wait_for(ConnectionState::Connected, WAIT).await);

        // garbled frame in the middle must not disturb the others
        conn.send(b"!S02,1\r\n!S02,x\r\n!S03\r\n!S02,0\r\n").await.unwrap();

        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap());
        }
        assert_eq!(
            received,
            vec![
                Event::PowerChanged(PowerState::On),
                Event::LabelsChanged,
                Event::PowerChanged(PowerState::Standby),
            ]
        );
        assert_eq!(handle.stats().parse_errors, 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_outbound_frames_written() {
        let (handle, mut device) = start(Arc::new(EventDispatcher::new()), Arc::new(()));
        let mut conn = device.accept(WAIT).await.unwrap();
        assert!(handle.wait_for(ConnectionState::Connected, WAIT).await);

        handle
            .send(OutboundFrame {
                kind: CommandKind::Query,
                bytes: b"ZQS02\r".to_vec(),
            })
            .unwrap();
        assert_eq!(conn.next_frame(WAIT).await.as_deref(), Some("ZQS02"));
        assert_eq!(handle.stats().frames_sent, 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconnects_after_hang_up() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let (handle, mut device) = start(Arc::new(EventDispatcher::new()), recorder.clone());

        let conn = device.accept(WAIT).await.unwrap();
        assert!(handle.wait_for(ConnectionState::Connected, WAIT).await);
        conn.hang_up();

        let _conn = device.accept(WAIT).await.unwrap();
        assert!(handle.wait_for(ConnectionState::Connected, WAIT).await);
        assert_eq!(handle.stats().sessions, 2);

        handle.shutdown().await;
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert_eq!(
            *recorder.0.lock(),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Disconnected,
            ]
        );
    }

    #[tokio::test]
    async fn test_refused_connects_retry() {
        let (transport, mut device) = MockTransport::new();
        device.refuse_next(3);
        let handle = ConnectionSupervisor::new(
            Arc::new(transport),
            fast_reconnect(),
            512,
            Arc::new(EventDispatcher::new()),
            Arc::new(()),
            CancellationToken::new(),
        )
        .spawn();

        let _conn = device.accept(WAIT).await.unwrap();
        assert!(handle.wait_for(ConnectionState::Connected, WAIT).await);
        assert_eq!(device.attempts(), 4);
        assert_eq!(handle.stats().connect_attempts, 4);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_backoff() {
        let (transport, device) = MockTransport::new();
        device.refuse_next(usize::MAX);
        let handle = ConnectionSupervisor::new(
            Arc::new(transport),
            ReconnectConfig {
                initial_delay: Duration::from_secs(30),
                max_delay: Duration::from_secs(60),
                ..Default::default()
            },
            512,
            Arc::new(EventDispatcher::new()),
            Arc::new(()),
            CancellationToken::new(),
        )
        .spawn();

        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("shutdown must not wait out the backoff");
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert!(handle.is_shut_down());
    }

    /// Records each transition with the (paused) clock reading
    struct Timeline(Mutex<Vec<(ConnectionState, Instant)>>);

    impl SessionObserver for Timeline {
        fn on_state_change(&self, state: ConnectionState) {
            self.0.lock().push((state, Instant::now()));
        }
    }

    impl Timeline {
        /// Time spent between each drop and the next connect attempt
        fn reconnect_delays(&self) -> Vec<Duration> {
            self.0
                .lock()
                .windows(2)
                .filter_map(|pair| match pair {
                    [(ConnectionState::Disconnected, down), (ConnectionState::Connecting, retry)] => {
                        Some(*retry - *down)
                    }
                    _ => None,
                })
                .collect()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_resets_only_after_stable_session() {
        let timeline = Arc::new(Timeline(Mutex::new(Vec::new())));
        let (transport, mut device) = MockTransport::new();
        let handle = ConnectionSupervisor::new(
            Arc::new(transport),
            ReconnectConfig {
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
                jitter: 0.0,
                stability_threshold: Duration::from_secs(10),
            },
            512,
            Arc::new(EventDispatcher::new()),
            timeline.clone(),
            CancellationToken::new(),
        )
        .spawn();

        // two sessions dropped straight away keep growing the delay
        for _ in 0..2 {
            let conn = device.accept(Duration::from_secs(120)).await.unwrap();
            assert!(handle.wait_for(ConnectionState::Connected, WAIT).await);
            conn.hang_up();
        }

        // a session held past the threshold earns a reset
        let conn = device.accept(Duration::from_secs(120)).await.unwrap();
        assert!(handle.wait_for(ConnectionState::Connected, WAIT).await);
        tokio::time::sleep(Duration::from_secs(30)).await;
        conn.hang_up();

        let _conn = device.accept(Duration::from_secs(120)).await.unwrap();
        assert!(handle.wait_for(ConnectionState::Connected, WAIT).await);
        handle.shutdown().await;

        let delays = timeline.reconnect_delays();
        assert_eq!(delays.len(), 3, "timeline: {:?}", timeline.0.lock());
        let expected = [1, 2, 1].map(Duration::from_secs);
        for (delay, expected) in delays.iter().zip(expected) {
            assert!(
                *delay >= expected && *delay < expected + Duration::from_millis(50),
                "delays {delays:?}, expected {expected:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_queued_frames_discarded_on_disconnect() {
        let (handle, mut device) = start(Arc::new(EventDispatcher::new()), Arc::new(()));
        let conn = device.accept(WAIT).await.unwrap();
        assert!(handle.wait_for(ConnectionState::Connected, WAIT).await);
        conn.hang_up();
        assert!(handle.wait_for(ConnectionState::Disconnected, WAIT).await);

        handle
            .send(OutboundFrame {
                kind: CommandKind::SelectInput,
                bytes: b"i2\r".to_vec(),
            })
            .unwrap();

        let mut conn = device.accept(WAIT).await.unwrap();
        assert!(handle.wait_for(ConnectionState::Connected, WAIT).await);
        assert_eq!(conn.next_frame(Duration::from_millis(100)).await, None);
        assert_eq!(handle.stats().frames_discarded, 1);
        handle.shutdown().await;
    }
}
