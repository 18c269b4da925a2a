//! In-memory loopback endpoint
//!
//! Backs the offline simulator and the test suite. Each call to `open`
//! consumes one pre-provisioned duplex stream; the peer half is handed to
//! the harness, which plays the role of the bus.

use crate::error::{Result, TritonError};
use crate::port::{Endpoint, IoStream};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::io::DuplexStream;

/// Loopback buffer size; comfortably larger than any single frame
const LOOPBACK_CAPACITY: usize = 8192;

/// Loopback endpoint whose streams are provisioned by the test harness
#[derive(Clone)]
pub struct MockEndpoint {
    streams: Arc<Mutex<VecDeque<DuplexStream>>>,
}

impl MockEndpoint {
    /// Endpoint with one provisioned stream, plus the harness-side peer
    pub fn pair() -> (Self, DuplexStream) {
        let endpoint = Self::empty();
        let peer = endpoint.provision();
        (endpoint, peer)
    }

    /// Endpoint with no provisioned streams; `open` fails until
    /// `provision` is called
    pub fn empty() -> Self {
        Self {
            streams: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Queue one fresh stream for the next `open`, returning the peer half
    pub fn provision(&self) -> DuplexStream {
        let (ours, peer) = tokio::io::duplex(LOOPBACK_CAPACITY);
        self.streams.lock().unwrap().push_back(ours);
        peer
    }
}

#[async_trait]
impl Endpoint for MockEndpoint {
    fn describe(&self) -> String {
        "loopback".to_string()
    }

    async fn open(&self) -> Result<Box<dyn IoStream>> {
        match self.streams.lock().unwrap().pop_front() {
            Some(stream) => Ok(Box::new(stream)),
            None => Err(TritonError::internal("no loopback stream provisioned")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn loopback_round_trip() {
        let (endpoint, mut peer) = MockEndpoint::pair();
        let mut stream = endpoint.open().await.unwrap();

        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        peer.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn open_without_provisioning_fails() {
        let endpoint = MockEndpoint::empty();
        assert!(endpoint.open().await.is_err());
    }

    #[tokio::test]
    async fn provision_supports_reopen() {
        let (endpoint, _first_peer) = MockEndpoint::pair();
        let _stream = endpoint.open().await.unwrap();
        assert!(endpoint.open().await.is_err());

        let _second_peer = endpoint.provision();
        assert!(endpoint.open().await.is_ok());
    }
}
