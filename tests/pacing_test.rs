//! Pacer boundary law: with interByteDelayMs > 0, transmit duration is
//! payload-bytes times the delay plus encoding overhead.

use tokio::io::AsyncReadExt;
use tokio::time::{Duration, Instant};
use triton::port::mock::MockEndpoint;
use triton::port::Port;

#[tokio::test(start_paused = true)]
async fn inter_byte_delay_stretches_the_transmit() {
    let (endpoint, mut peer) = MockEndpoint::pair();
    let mut port = Port::new(0, Box::new(endpoint));
    port.open().await.unwrap();

    let bytes = vec![0xAA; 13];
    let delay = Duration::from_millis(10);

    let started = Instant::now();
    port.write_frame(&bytes, delay).await.unwrap();
    let elapsed = started.elapsed();

    // 13 bytes at 10 ms each under a paused clock
    assert_eq!(elapsed, Duration::from_millis(130));

    let mut buf = [0u8; 32];
    let mut received = 0;
    while received < bytes.len() {
        received += peer.read(&mut buf).await.unwrap();
    }
    assert_eq!(received, bytes.len());
}

#[tokio::test(start_paused = true)]
async fn zero_delay_is_one_write() {
    let (endpoint, mut peer) = MockEndpoint::pair();
    let mut port = Port::new(0, Box::new(endpoint));
    port.open().await.unwrap();

    let started = Instant::now();
    port.write_frame(&[1, 2, 3], Duration::ZERO).await.unwrap();
    assert_eq!(started.elapsed(), Duration::ZERO);

    let mut buf = [0u8; 8];
    let n = peer.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], &[1, 2, 3]);
}
