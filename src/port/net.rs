//! Network-bridged serial endpoint
//!
//! Connects to a serial-over-TCP bridge (ser2net or equivalent) carrying
//! raw RS-485 bytes. Connect timeout is fixed; reconnect pacing is owned by
//! the port supervisor.

use crate::error::{Result, TritonError};
use crate::port::{Endpoint, IoStream};
use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

/// TCP connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP-bridged serial endpoint
pub struct NetEndpoint {
    host: String,
    port: u16,
}

impl NetEndpoint {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }
}

#[async_trait]
impl Endpoint for NetEndpoint {
    fn describe(&self) -> String {
        format!("tcp {}:{}", self.host, self.port)
    }

    async fn open(&self) -> Result<Box<dyn IoStream>> {
        let address = format!("{}:{}", self.host, self.port);

        match timeout(CONNECT_TIMEOUT, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true).ok();
                Ok(Box::new(stream))
            }
            Ok(Err(e)) => Err(TritonError::internal(format!("{}: {}", address, e))),
            Err(_) => Err(TritonError::internal(format!(
                "{}: connection timeout",
                address
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 3];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let endpoint = NetEndpoint::new("127.0.0.1", addr.port());
        let mut stream = endpoint.open().await.unwrap();
        stream.write_all(&[0xFF, 0x00, 0xFF]).await.unwrap();

        assert_eq!(accept.await.unwrap(), [0xFF, 0x00, 0xFF]);
    }

    #[tokio::test]
    async fn refused_connection_errors() {
        // Port 1 is essentially never listening
        let endpoint = NetEndpoint::new("127.0.0.1", 1);
        assert!(endpoint.open().await.is_err());
    }
}
