//! Byte transports to the device
//!
//! A [`Transport`] knows how to open a connection; each successful connect
//! yields a [`Link`] that the supervisor owns exclusively until it fails.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, StopBits};
use tracing::debug;

use crate::config::ConnectionDescriptor;
use crate::error::{TransportError, TransportResult};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Something that can open a byte link to the device
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new link. Called again by the supervisor after every failure.
    async fn connect(&self) -> TransportResult<Link>;

    /// Human-readable endpoint for logs
    fn endpoint(&self) -> String;
}

/// An established, bidirectional byte link
pub struct Link {
    peer: String,
    reader: BoxedReader,
    writer: BoxedWriter,
}

impl Link {
    pub fn new<R, W>(peer: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            peer: peer.into(),
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    /// Wrap a single duplex stream
    pub fn from_stream<S>(peer: impl Into<String>, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(peer, reader, writer)
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Read whatever bytes are available. `Ok(0)` means the peer hung up.
    ///
    /// Cancel safe, so it can sit in a `select!` next to the write path.
    pub async fn read(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
        Ok(self.reader.read(buf).await?)
    }

    /// Write one complete frame and flush it
    pub async fn write(&mut self, frame: &[u8]) -> TransportResult<()> {
        self.writer.write_all(frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Close the write side; errors are irrelevant at this point
    pub async fn disconnect(mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!(peer = %self.peer, error = %e, "error while closing link");
        }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").field("peer", &self.peer).finish()
    }
}

// ============================================================================
// TCP
// ============================================================================

/// TCP transport, normally to port 4999
#[derive(Debug, Clone)]
pub struct TcpTransport {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self) -> TransportResult<Link> {
        let endpoint = self.endpoint();
        let stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            endpoint: endpoint.clone(),
            timeout: self.connect_timeout,
        })?
        .map_err(|source| TransportError::Refused {
            endpoint: endpoint.clone(),
            source,
        })?;

        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Link::new(endpoint, reader, writer))
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ============================================================================
// Serial
// ============================================================================

/// RS-232 transport, 8N1 with no flow control
#[derive(Debug, Clone)]
pub struct SerialTransport {
    path: String,
    baud_rate: u32,
}

impl SerialTransport {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn connect(&self) -> TransportResult<Link> {
        let port = tokio_serial::new(&self.path, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .open_native_async()?;
        Ok(Link::from_stream(self.endpoint(), port))
    }

    fn endpoint(&self) -> String {
        format!("{}@{}", self.path, self.baud_rate)
    }
}

/// Build the transport a descriptor points at
pub fn transport_for(
    descriptor: &ConnectionDescriptor,
    connect_timeout: Duration,
) -> Arc<dyn Transport> {
    match descriptor {
        ConnectionDescriptor::Ip { host, port } => {
            Arc::new(TcpTransport::new(host.clone(), *port, connect_timeout))
        }
        ConnectionDescriptor::Serial { path, baud_rate } => {
            Arc::new(SerialTransport::new(path.clone(), *baud_rate))
        }
    }
}
