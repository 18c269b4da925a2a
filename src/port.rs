//! RS-485 port layer
//!
//! A port is a named, numbered endpoint (primary is id 0, auxiliary ports
//! 1..N) over one of three transports: a local serial device, a TCP-bridged
//! serial server, or an in-memory loopback used by tests. The port owns the
//! open/close lifecycle, byte counters, the bus-idle observation, and the
//! reconnect supervisor.

use crate::error::{Result, TritonError};
use crate::logging::get_port_logger;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::{sleep, Duration, Instant};

pub mod mock;
pub mod net;
pub mod serial;

/// Initial reconnect backoff
const BACKOFF_INITIAL: Duration = Duration::from_secs(1);

/// Reconnect backoff ceiling
const BACKOFF_CEILING: Duration = Duration::from_secs(30);

/// Consecutive good-read window that returns a reconnecting port to open
const PROBATION: Duration = Duration::from_secs(2);

/// Upper bound on a single queued write
const WRITE_BOUND: usize = 4096;

/// Combined async stream trait for port transports
pub trait IoStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> IoStream for T {}

/// One endpoint a port can open: serial device, TCP bridge, or loopback
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Human-readable endpoint description for logs and errors
    fn describe(&self) -> String;

    /// Open the underlying resource, producing a fresh byte stream
    async fn open(&self) -> Result<Box<dyn IoStream>>;
}

/// Port lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Closed,
    Open,
    Reconnecting,
}

/// Connection statistics counters, shared with readers outside the engine
#[derive(Debug, Default)]
pub struct PortStats {
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
    pub reconnects: AtomicU64,
    pub framing_errors: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl PortStats {
    pub fn record_error(&self, message: &str) {
        *self.last_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }

    /// Point-in-time copy for status surfaces
    pub fn snapshot(&self) -> PortStatsSnapshot {
        PortStatsSnapshot {
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            last_error: self.last_error(),
        }
    }
}

/// Serializable view of [`PortStats`]
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortStatsSnapshot {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub reconnects: u64,
    pub framing_errors: u64,
    pub last_error: Option<String>,
}

/// A named, numbered RS-485 endpoint with reconnect supervision
pub struct Port {
    id: u8,
    endpoint: Box<dyn Endpoint>,
    stream: Option<Box<dyn IoStream>>,
    state: PortState,
    state_tx: watch::Sender<PortState>,
    stats: Arc<PortStats>,
    last_rx: Instant,
    probation_start: Option<Instant>,
    logger: crate::logging::StructuredLogger,
}

impl Port {
    /// Create a closed port over the given endpoint
    pub fn new(id: u8, endpoint: Box<dyn Endpoint>) -> Self {
        let (state_tx, _) = watch::channel(PortState::Closed);
        Self {
            id,
            endpoint,
            stream: None,
            state: PortState::Closed,
            state_tx,
            stats: Arc::new(PortStats::default()),
            last_rx: Instant::now(),
            probation_start: None,
            logger: get_port_logger("port", id),
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn state(&self) -> PortState {
        self.state
    }

    /// Observe port state transitions (open/reconnecting/closed)
    pub fn watch_state(&self) -> watch::Receiver<PortState> {
        self.state_tx.subscribe()
    }

    /// Shared statistics handle
    pub fn stats(&self) -> Arc<PortStats> {
        Arc::clone(&self.stats)
    }

    /// Time since the last byte was received; the bus is considered idle
    /// once this exceeds the engine's `idleBeforeTxMs`
    pub fn idle_for(&self) -> Duration {
        self.last_rx.elapsed()
    }

    fn set_state(&mut self, state: PortState) {
        if self.state != state {
            self.state = state;
            self.state_tx.send(state).ok();
        }
    }

    /// Open the port; fails with `PortUnavailable` when the underlying
    /// resource rejects the open
    pub async fn open(&mut self) -> Result<()> {
        match self.endpoint.open().await {
            Ok(stream) => {
                self.logger
                    .info(&format!("Opened {}", self.endpoint.describe()));
                self.stream = Some(stream);
                self.last_rx = Instant::now();
                self.probation_start = None;
                self.set_state(PortState::Open);
                Ok(())
            }
            Err(e) => {
                let cause = e.to_string();
                self.stats.record_error(&cause);
                Err(TritonError::port_unavailable(self.id, cause))
            }
        }
    }

    /// Close the port, dropping the underlying stream
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.ok();
        }
        self.set_state(PortState::Closed);
        self.logger.debug("Port closed");
    }

    /// Read available bytes into `buf`, returning the count.
    ///
    /// A zero-length read (EOF) or I/O error tears the stream down and
    /// returns `PortClosed`; the caller is expected to run `reconnect`.
    pub async fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| TritonError::port_closed(self.id))?;

        match stream.read(buf).await {
            Ok(0) => {
                self.on_stream_lost("read EOF");
                Err(TritonError::port_closed(self.id))
            }
            Ok(n) => {
                self.stats.bytes_in.fetch_add(n as u64, Ordering::Relaxed);
                self.last_rx = Instant::now();
                self.note_healthy_read();
                Ok(n)
            }
            Err(e) => {
                self.on_stream_lost(&e.to_string());
                Err(TritonError::port_closed(self.id))
            }
        }
    }

    /// Write one encoded frame.
    ///
    /// With `inter_byte_delay` of zero the buffer goes out in a single
    /// write; otherwise each byte is followed by the delay, which some
    /// USB-RS485 bridges need to avoid overrunning their FIFOs.
    pub async fn write_frame(&mut self, bytes: &[u8], inter_byte_delay: Duration) -> Result<()> {
        if bytes.len() > WRITE_BOUND {
            return Err(TritonError::write_rejected(self.id));
        }
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| TritonError::port_closed(self.id))?;

        let write_result = async {
            if inter_byte_delay.is_zero() {
                stream.write_all(bytes).await?;
            } else {
                for byte in bytes {
                    stream.write_all(std::slice::from_ref(byte)).await?;
                    sleep(inter_byte_delay).await;
                }
            }
            stream.flush().await
        }
        .await;

        match write_result {
            Ok(()) => {
                self.stats
                    .bytes_out
                    .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.on_stream_lost(&e.to_string());
                Err(TritonError::port_closed(self.id))
            }
        }
    }

    fn on_stream_lost(&mut self, cause: &str) {
        self.logger.warn(&format!("Stream lost: {}", cause));
        self.stats.record_error(cause);
        self.stream = None;
        self.set_state(PortState::Reconnecting);
    }

    /// Good reads for the probation window promote a reconnecting port
    /// back to open
    fn note_healthy_read(&mut self) {
        if self.state == PortState::Reconnecting {
            match self.probation_start {
                Some(start) if start.elapsed() >= PROBATION => {
                    self.probation_start = None;
                    self.set_state(PortState::Open);
                    self.logger.info("Port recovered");
                }
                Some(_) => {}
                None => self.probation_start = Some(Instant::now()),
            }
        }
    }

    /// Reconnect loop: 1 s initial backoff doubling to a 30 s ceiling,
    /// one liveness probe (attempted open) per cycle. Returns when a probe
    /// succeeds; the port stays in `Reconnecting` until reads have been
    /// healthy for the probation window. Aborts with `Cancelled` when the
    /// shutdown signal flips.
    pub async fn reconnect(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        self.set_state(PortState::Reconnecting);
        let mut backoff = BACKOFF_INITIAL;

        loop {
            tokio::select! {
                _ = sleep(backoff) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Err(TritonError::Cancelled);
                    }
                }
            }

            match self.endpoint.open().await {
                Ok(stream) => {
                    self.stream = Some(stream);
                    self.last_rx = Instant::now();
                    self.probation_start = Some(Instant::now());
                    self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                    self.logger.info(&format!(
                        "Reopened {} after backoff",
                        self.endpoint.describe()
                    ));
                    return Ok(());
                }
                Err(e) => {
                    self.stats.record_error(&e.to_string());
                    self.logger
                        .debug(&format!("Liveness probe failed: {}", e));
                    backoff = (backoff * 2).min(BACKOFF_CEILING);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockEndpoint;
    use super::*;

    #[tokio::test]
    async fn open_and_write_counts_bytes() {
        let (endpoint, mut harness) = MockEndpoint::pair();
        let mut port = Port::new(0, Box::new(endpoint));
        port.open().await.unwrap();
        assert_eq!(port.state(), PortState::Open);

        port.write_frame(&[0x01, 0x02, 0x03], Duration::ZERO)
            .await
            .unwrap();
        let stats = port.stats();
        assert_eq!(stats.bytes_out.load(Ordering::Relaxed), 3);

        let mut buf = [0u8; 8];
        let n = harness.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x01, 0x02, 0x03]);
    }

    #[tokio::test]
    async fn read_counts_bytes_and_tracks_idle() {
        let (endpoint, mut harness) = MockEndpoint::pair();
        let mut port = Port::new(0, Box::new(endpoint));
        port.open().await.unwrap();

        harness.write_all(&[0xA5, 0x00]).await.unwrap();
        let mut buf = [0u8; 8];
        let n = port.read_some(&mut buf).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(port.stats().bytes_in.load(Ordering::Relaxed), 2);
        assert!(port.idle_for() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn eof_reports_port_closed() {
        let (endpoint, harness) = MockEndpoint::pair();
        let mut port = Port::new(2, Box::new(endpoint));
        port.open().await.unwrap();

        drop(harness);
        let mut buf = [0u8; 8];
        let err = port.read_some(&mut buf).await.unwrap_err();
        assert!(matches!(err, TritonError::PortClosed { port_id: 2 }));
        assert_eq!(port.state(), PortState::Reconnecting);
    }

    #[tokio::test]
    async fn open_failure_is_port_unavailable() {
        let endpoint = MockEndpoint::empty();
        let mut port = Port::new(1, Box::new(endpoint));
        let err = port.open().await.unwrap_err();
        assert!(matches!(err, TritonError::PortUnavailable { port_id: 1, .. }));
    }

    #[tokio::test]
    async fn oversized_write_is_rejected() {
        let (endpoint, _harness) = MockEndpoint::pair();
        let mut port = Port::new(0, Box::new(endpoint));
        port.open().await.unwrap();
        let big = vec![0u8; WRITE_BOUND + 1];
        let err = port.write_frame(&big, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, TritonError::WriteRejected { port_id: 0 }));
    }
}
