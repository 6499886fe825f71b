//! In-memory transport for driving the engine without hardware
//!
//! [`MockTransport`] hands out links backed by `tokio::io::duplex`. The
//! matching [`MockDevice`] receives the far end of every connection so a
//! test can play the device: read the frames the engine sends, push status
//! frames back, hang up, or refuse the next few connects.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

use crate::error::{TransportError, TransportResult};
use crate::transport::{Link, Transport};

const DUPLEX_CAPACITY: usize = 8 * 1024;

#[derive(Debug)]
struct Shared {
    refusals: AtomicUsize,
    attempts: AtomicUsize,
    accepted: mpsc::UnboundedSender<DuplexStream>,
}

/// Transport half, given to the engine
#[derive(Debug, Clone)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

/// Device half, kept by the test
#[derive(Debug)]
pub struct MockDevice {
    shared: Arc<Shared>,
    incoming: mpsc::UnboundedReceiver<DuplexStream>,
}

impl MockTransport {
    pub fn new() -> (MockTransport, MockDevice) {
        let (accepted, incoming) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            refusals: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            accepted,
        });
        (
            MockTransport {
                shared: Arc::clone(&shared),
            },
            MockDevice { shared, incoming },
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> TransportResult<Link> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .shared
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Refused {
                endpoint: self.endpoint(),
                source: std::io::ErrorKind::ConnectionRefused.into(),
            });
        }

        let (client, server) = tokio::io::duplex(DUPLEX_CAPACITY);
        self.shared
            .accepted
            .send(server)
            .map_err(|_| TransportError::Closed)?;
        Ok(Link::from_stream(self.endpoint(), client))
    }

    fn endpoint(&self) -> String {
        "mock".to_string()
    }
}

impl MockDevice {
    /// Refuse the next `n` connect attempts
    pub fn refuse_next(&self, n: usize) {
        self.shared.refusals.store(n, Ordering::SeqCst);
    }

    /// Total connect attempts seen, refused ones included
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the engine to open the next connection
    pub async fn accept(&mut self, timeout: Duration) -> Option<MockConnection> {
        let stream = tokio::time::timeout(timeout, self.incoming.recv())
            .await
            .ok()??;
        let (reader, writer) = tokio::io::split(stream);
        Some(MockConnection {
            reader: BufReader::new(reader),
            writer,
        })
    }
}

/// Device side of one accepted connection. Dropping it hangs up.
#[derive(Debug)]
pub struct MockConnection {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl MockConnection {
    /// Push raw bytes to the engine
    pub async fn send(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await
    }

    /// Push one frame, adding the CR LF the device terminates with
    pub async fn send_frame(&mut self, frame: &str) -> std::io::Result<()> {
        self.send(format!("{frame}\r\n").as_bytes()).await
    }

    /// Next frame written by the engine, without its CR
    pub async fn next_frame(&mut self, timeout: Duration) -> Option<String> {
        let mut frame = Vec::new();
        let read = tokio::time::timeout(timeout, self.reader.read_until(b'\r', &mut frame))
            .await
            .ok()?
            .ok()?;
        if read == 0 {
            return None;
        }
        if frame.last() == Some(&b'\r') {
            frame.pop();
        }
        String::from_utf8(frame).ok()
    }

    /// Collect frames until none arrives within `quiet`
    pub async fn frames_until_quiet(&mut self, quiet: Duration) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame(quiet).await {
            frames.push(frame);
        }
        frames
    }

    /// Read frames until `expected` shows up, returning everything before it
    pub async fn wait_for_frame(&mut self, expected: &str, timeout: Duration) -> Option<Vec<String>> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut seen = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let frame = self.next_frame(remaining).await?;
            if frame == expected {
                return Some(seen);
            }
            seen.push(frame);
        }
    }

    pub fn hang_up(self) {}
}
