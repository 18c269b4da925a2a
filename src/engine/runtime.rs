//! Engine task loop
//!
//! Drives one port: awaits either a queued command, inbound bytes, or the
//! nearest timer (pacer clearance, response timeout, retry backoff, or the
//! inter-byte abort window), then advances the outbound transaction state
//! machine:
//!
//! ```text
//! Queued → Waiting-for-idle → Transmitting → Awaiting-response
//!       ↘ Cancelled                         ↘ Succeeded
//!                                           ↘ Retrying → Transmitting
//!                                           ↘ Failed
//! ```
//!
//! Cancellation is honored at every state except Transmitting, which must
//! complete to preserve bus framing. A queued message is not popped until
//! the pacer clears, so a higher-priority message arriving during the wait
//! still transmits first. A retrying transaction keeps the bus: the retry
//! paces ahead of the queue.

use crate::config::CommsConfig;
use crate::engine::pacer::Pacer;
use crate::engine::queue::{OutboundMessage, OutboundQueue};
use crate::engine::{EngineCommand, EngineEvent, EngineHandle, EngineStats};
use crate::error::TritonError;
use crate::logging::get_port_logger;
use crate::port::Port;
use crate::protocol::{DecodeEvent, FrameDecoder, ProtocolFamily};
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Duration, Instant};

/// Inter-byte gap that aborts a partially assembled frame
const FRAME_ABORT_WINDOW: Duration = Duration::from_millis(250);

/// Protocol errors per minute that push the engine into degraded
const DEGRADED_THRESHOLD: usize = 10;

/// Base retry backoff; doubles per retry (250/500/1000 ms)
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(250);

/// Read buffer size per wakeup
const READ_CHUNK: usize = 512;

enum TxState {
    /// No transaction holds the bus; the queue head transmits next
    Idle,
    /// Transmitted, waiting on the response matcher
    AwaitingResponse {
        msg: OutboundMessage,
        attempt: u32,
        timeout_at: Instant,
    },
    /// Response timed out; waiting out the retry backoff
    Backoff {
        msg: OutboundMessage,
        attempt: u32,
        resume_at: Instant,
    },
    /// Backoff elapsed; pacing before the retransmit
    RetryPacing { msg: OutboundMessage, attempt: u32 },
}

/// One port's engine, pumped by its own task
pub struct EngineRuntime {
    port: Port,
    family: ProtocolFamily,
    decoder: FrameDecoder,
    queue: OutboundQueue,
    pacer: Pacer,
    comms: CommsConfig,
    state: TxState,
    cmd_rx: mpsc::UnboundedReceiver<EngineCommand>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    stats: Arc<EngineStats>,
    shutdown_rx: watch::Receiver<bool>,
    error_window: VecDeque<Instant>,
    logger: crate::logging::StructuredLogger,
}

impl EngineRuntime {
    /// Create the runtime and its handle; the caller spawns `run`
    pub fn new(
        port: Port,
        family: ProtocolFamily,
        comms: CommsConfig,
        events_tx: mpsc::UnboundedSender<EngineEvent>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Self, EngineHandle) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(EngineStats::default());
        let handle = EngineHandle::new(port.id(), cmd_tx, Arc::clone(&stats), port.stats());
        let logger = get_port_logger("engine", port.id());
        let pacer = Pacer::new(&comms);
        let runtime = Self {
            family,
            decoder: FrameDecoder::new(family),
            queue: OutboundQueue::new(),
            pacer,
            comms,
            state: TxState::Idle,
            cmd_rx,
            events_tx,
            stats,
            shutdown_rx,
            error_window: VecDeque::new(),
            logger,
            port,
        };
        (runtime, handle)
    }

    /// Run until shutdown; owns the port for the duration
    pub async fn run(mut self) {
        if let Err(e) = self.port.open().await {
            self.logger.warn(&format!("Initial open failed: {}", e));
            if self.supervise_reconnect().await.is_err() {
                self.finish().await;
                return;
            }
        }

        let mut buf = [0u8; READ_CHUNK];
        loop {
            self.tick().await;
            if self.shutdown_requested() {
                break;
            }

            let deadline = self.next_deadline();
            let mut shutdown_rx = self.shutdown_rx.clone();

            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(EngineCommand::Submit(msg)) => self.queue.push(msg),
                        Some(EngineCommand::Shutdown) | None => break,
                    }
                }
                read = self.port.read_some(&mut buf) => {
                    match read {
                        Ok(n) => self.handle_bytes(&buf[..n]),
                        Err(_) => {
                            if self.supervise_reconnect().await.is_err() {
                                break;
                            }
                        }
                    }
                }
                _ = sleep_until(deadline) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        self.finish().await;
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Advance every timer-driven edge that is due
    async fn tick(&mut self) {
        let now = Instant::now();

        // Inter-byte abort window for partial frames
        if self.decoder.in_frame()
            && self.port.idle_for() >= FRAME_ABORT_WINDOW
            && self.decoder.abort_partial()
        {
            self.port
                .stats()
                .framing_errors
                .fetch_add(1, Ordering::Relaxed);
            self.note_protocol_error(now);
            self.logger.debug("Aborted partial frame after byte gap");
        }

        // Response timeout: either schedule a retry or fail the transaction
        if let TxState::AwaitingResponse { timeout_at, .. } = self.state {
            if now >= timeout_at {
                if let TxState::AwaitingResponse { mut msg, attempt, .. } =
                    std::mem::replace(&mut self.state, TxState::Idle)
                {
                    if attempt <= self.comms.retries {
                        self.stats.retries.fetch_add(1, Ordering::Relaxed);
                        let backoff = RETRY_BACKOFF_BASE * 2u32.pow(attempt - 1);
                        self.logger.debug(&format!(
                            "No response to {}, retry {} in {:?}",
                            msg.frame.describe(),
                            attempt,
                            backoff
                        ));
                        self.state = TxState::Backoff {
                            msg,
                            attempt,
                            resume_at: now + backoff,
                        };
                    } else {
                        self.stats.failures.fetch_add(1, Ordering::Relaxed);
                        let descriptor = msg
                            .expects
                            .map(|m| m.describe())
                            .unwrap_or_else(|| msg.frame.describe());
                        self.logger
                            .warn(&format!("Transaction failed: no response to {}", descriptor));
                        msg.complete(Err(TritonError::no_response(self.port.id(), descriptor)));
                    }
                }
            }
        }

        // Retry backoff elapsed
        if let TxState::Backoff { resume_at, .. } = self.state {
            if now >= resume_at {
                if let TxState::Backoff { msg, attempt, .. } =
                    std::mem::replace(&mut self.state, TxState::Idle)
                {
                    self.state = TxState::RetryPacing { msg, attempt };
                }
            }
        }

        // Cancellation is honored in every waiting state
        if let TxState::AwaitingResponse { msg, .. }
        | TxState::Backoff { msg, .. }
        | TxState::RetryPacing { msg, .. } = &mut self.state
        {
            if msg.is_abandoned(now) {
                msg.complete(Err(TritonError::Cancelled));
                self.state = TxState::Idle;
            }
        }

        // Transmit once the pacer clears: a retrying transaction keeps the
        // bus; otherwise the queue head goes out
        let clearance = self.pacer.clearance(self.port.idle_for(), now);
        if clearance.is_zero() {
            match std::mem::replace(&mut self.state, TxState::Idle) {
                TxState::RetryPacing { msg, attempt } => {
                    self.transmit(msg, attempt).await;
                }
                TxState::Idle => {
                    if let Some(msg) = self.queue.pop_live(now) {
                        self.transmit(msg, 0).await;
                    }
                }
                other => self.state = other,
            }
        }
    }

    /// Transmit `msg` (`attempt` transmissions so far) and move to the
    /// next state
    async fn transmit(&mut self, mut msg: OutboundMessage, attempt: u32) {
        let bytes = match msg.frame.encode(self.family) {
            Ok(bytes) => bytes,
            Err(e) => {
                msg.complete(Err(e));
                return;
            }
        };

        match self
            .port
            .write_frame(&bytes, self.pacer.inter_byte_delay())
            .await
        {
            Ok(()) => {
                self.pacer.note_tx_complete(Instant::now());
                self.stats.transmissions.fetch_add(1, Ordering::Relaxed);
                let attempt = attempt + 1;
                match msg.expects {
                    Some(_) => {
                        let timeout_at =
                            Instant::now() + Duration::from_millis(self.comms.response_timeout_ms);
                        self.state = TxState::AwaitingResponse {
                            msg,
                            attempt,
                            timeout_at,
                        };
                    }
                    None => {
                        msg.complete(Ok(None));
                        self.state = TxState::Idle;
                    }
                }
            }
            Err(e) => {
                msg.complete(Err(e));
                self.state = TxState::Idle;
                self.supervise_reconnect().await.ok();
            }
        }
    }

    /// Feed received bytes through the decoder and dispatch the results
    fn handle_bytes(&mut self, bytes: &[u8]) {
        let now = Instant::now();
        for event in self.decoder.feed(bytes) {
            match event {
                DecodeEvent::Frame(frame) => {
                    // A matching in-flight transaction completes first;
                    // everything else is spontaneous status for the board
                    let matched = match &self.state {
                        TxState::AwaitingResponse { msg, .. } => {
                            msg.expects.map(|m| m.matches(&frame)).unwrap_or(false)
                        }
                        _ => false,
                    };
                    if matched {
                        if let TxState::AwaitingResponse { mut msg, .. } =
                            std::mem::replace(&mut self.state, TxState::Idle)
                        {
                            self.stats.completed.fetch_add(1, Ordering::Relaxed);
                            msg.complete(Ok(Some(frame)));
                        }
                    } else {
                        self.events_tx
                            .send(EngineEvent::Frame {
                                port_id: self.port.id(),
                                frame,
                            })
                            .ok();
                    }
                }
                DecodeEvent::Rejected(reason) => {
                    self.logger
                        .debug(&format!("Rejected inbound frame: {:?}", reason));
                    self.note_protocol_error(now);
                }
            }
        }
    }

    /// Track the protocol-error rate; past the threshold the engine
    /// enters degraded and warns once
    fn note_protocol_error(&mut self, now: Instant) {
        self.stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
        self.error_window.push_back(now);
        while let Some(front) = self.error_window.front() {
            if now.duration_since(*front) > Duration::from_secs(60) {
                self.error_window.pop_front();
            } else {
                break;
            }
        }

        if self.error_window.len() > DEGRADED_THRESHOLD {
            if !self.stats.degraded.swap(true, Ordering::Relaxed) {
                self.logger
                    .warn("Protocol-error rate over threshold, engine degraded");
                self.events_tx
                    .send(EngineEvent::Degraded {
                        port_id: self.port.id(),
                    })
                    .ok();
            }
        } else if self.error_window.len() <= DEGRADED_THRESHOLD / 2 {
            self.stats.degraded.store(false, Ordering::Relaxed);
        }
    }

    /// Fail the in-flight transaction and run the port's reconnect loop
    async fn supervise_reconnect(&mut self) -> crate::error::Result<()> {
        if let TxState::AwaitingResponse { msg, .. }
        | TxState::Backoff { msg, .. }
        | TxState::RetryPacing { msg, .. } = std::mem::replace(&mut self.state, TxState::Idle)
        {
            let mut msg = msg;
            msg.complete(Err(TritonError::port_closed(self.port.id())));
        }

        self.events_tx
            .send(EngineEvent::PortLost {
                port_id: self.port.id(),
            })
            .ok();

        let mut shutdown_rx = self.shutdown_rx.clone();
        let result = self.port.reconnect(&mut shutdown_rx).await;
        if result.is_ok() {
            self.events_tx
                .send(EngineEvent::PortRecovered {
                    port_id: self.port.id(),
                })
                .ok();
        }
        result
    }

    /// Earliest timer the loop must wake for
    fn next_deadline(&self) -> Instant {
        let now = Instant::now();
        let mut deadline = now + Duration::from_secs(1);
        let mut consider = |t: Instant| {
            if t < deadline {
                deadline = t;
            }
        };

        match &self.state {
            TxState::AwaitingResponse { timeout_at, .. } => consider(*timeout_at),
            TxState::Backoff { resume_at, .. } => consider(*resume_at),
            TxState::RetryPacing { .. } => {
                consider(now + self.pacer.clearance(self.port.idle_for(), now))
            }
            TxState::Idle => {
                if !self.queue.is_empty() {
                    consider(now + self.pacer.clearance(self.port.idle_for(), now));
                }
            }
        }

        if self.decoder.in_frame() {
            consider(now + FRAME_ABORT_WINDOW.saturating_sub(self.port.idle_for()));
        }

        deadline
    }

    /// Cancel everything outstanding and close the port
    async fn finish(&mut self) {
        if let TxState::AwaitingResponse { msg, .. }
        | TxState::Backoff { msg, .. }
        | TxState::RetryPacing { msg, .. } = std::mem::replace(&mut self.state, TxState::Idle)
        {
            let mut msg = msg;
            msg.complete(Err(TritonError::Cancelled));
        }
        self.queue.drain_cancelled();
        self.port.close().await;
        self.logger.debug("Engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Priority, ResponseMatch};
    use crate::port::mock::MockEndpoint;
    use crate::protocol::Frame;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::sync::mpsc;

    fn comms() -> CommsConfig {
        let mut comms = CommsConfig::default();
        // Keep pacing short so tests stay snappy under the paused clock
        comms.idle_before_tx_ms = 10;
        comms.inter_frame_delay_ms = 10;
        comms
    }

    #[allow(clippy::type_complexity)]
    fn rig() -> (
        EngineHandle,
        DuplexStream,
        mpsc::UnboundedReceiver<EngineEvent>,
        watch::Sender<bool>,
        tokio::task::JoinHandle<()>,
    ) {
        let (endpoint, peer) = MockEndpoint::pair();
        let port = Port::new(0, Box::new(endpoint));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (runtime, handle) = EngineRuntime::new(
            port,
            ProtocolFamily::Pentair16,
            comms(),
            events_tx,
            shutdown_rx,
        );
        let task = tokio::spawn(runtime.run());
        (handle, peer, events_rx, shutdown_tx, task)
    }

    fn circuit_frame() -> Frame {
        Frame::new(0x00, 0x10, 0x00, 0x86, vec![0x06, 0x01])
    }

    fn ack_frame() -> Frame {
        Frame::new(0x00, 0x00, 0x10, 0x01, vec![0x86])
    }

    #[tokio::test(start_paused = true)]
    async fn request_completes_on_matching_ack() {
        let (handle, mut peer, _events, shutdown_tx, task) = rig();

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let n = peer.read(&mut buf).await.unwrap();
            let bytes = ack_frame().encode(ProtocolFamily::Pentair16).unwrap();
            peer.write_all(&bytes).await.unwrap();
            buf[..n].to_vec()
        });

        let response = handle
            .request(
                circuit_frame(),
                Priority::User,
                Some(ResponseMatch::ack(0x10, 0x01, 0, 0x86)),
                None,
            )
            .await
            .unwrap();

        let frame = response.expect("expected a matched response frame");
        assert_eq!(frame.action, 0x01);
        assert_eq!(frame.payload, vec![0x86]);

        let wire = responder.await.unwrap();
        let expected = circuit_frame().encode(ProtocolFamily::Pentair16).unwrap();
        assert_eq!(wire, expected);
        assert_eq!(handle.stats().completed.load(Ordering::Relaxed), 1);

        shutdown_tx.send(true).ok();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_exhausts_retries() {
        let (handle, mut peer, _events, shutdown_tx, task) = rig();

        let err = handle
            .request(
                circuit_frame(),
                Priority::User,
                Some(ResponseMatch::ack(0x10, 0x01, 0, 0x86)),
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TritonError::NoResponse { port_id: 0, .. }));
        // Retry budget is bounded: retries + 1 transmissions, no more
        assert_eq!(handle.stats().transmissions.load(Ordering::Relaxed), 4);
        assert_eq!(handle.stats().retries.load(Ordering::Relaxed), 3);
        assert_eq!(handle.stats().failures.load(Ordering::Relaxed), 1);

        // All four attempts landed on the wire
        let one = circuit_frame().encode(ProtocolFamily::Pentair16).unwrap();
        let mut buf = vec![0u8; 4096];
        let n = peer.read(&mut buf).await.unwrap();
        assert_eq!(n, one.len() * 4);

        shutdown_tx.send(true).ok();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn fire_and_forget_resolves_after_transmit() {
        let (handle, mut peer, _events, shutdown_tx, task) = rig();
        handle.send(circuit_frame(), Priority::Background).unwrap();

        let mut buf = [0u8; 64];
        let n = peer.read(&mut buf).await.unwrap();
        let expected = circuit_frame().encode(ProtocolFamily::Pentair16).unwrap();
        assert_eq!(&buf[..n], &expected[..]);

        shutdown_tx.send(true).ok();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unmatched_inbound_routes_to_events() {
        let (_handle, mut peer, mut events, shutdown_tx, task) = rig();

        let status = Frame::new(0x00, 0x0F, 0x10, 0x02, vec![0x01, 0x02]);
        let bytes = status.encode(ProtocolFamily::Pentair16).unwrap();
        peer.write_all(&bytes).await.unwrap();

        match events.recv().await.unwrap() {
            EngineEvent::Frame { port_id, frame } => {
                assert_eq!(port_id, 0);
                assert_eq!(frame, status);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        shutdown_tx.send(true).ok();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn system_tier_preempts_background() {
        let (handle, mut peer, _events, shutdown_tx, task) = rig();

        // Two queued messages; the later system-tier one transmits first
        // because nothing pops from the queue until the pacer clears
        handle
            .send(Frame::new(0, 0x10, 0, 0xE0, vec![]), Priority::Background)
            .unwrap();
        handle
            .send(Frame::new(0, 0x10, 0, 0xE1, vec![]), Priority::System)
            .unwrap();

        let first = Frame::new(0, 0x10, 0, 0xE1, vec![])
            .encode(ProtocolFamily::Pentair16)
            .unwrap();
        let second = Frame::new(0, 0x10, 0, 0xE0, vec![])
            .encode(ProtocolFamily::Pentair16)
            .unwrap();

        let mut wire = Vec::new();
        let mut buf = [0u8; 64];
        while wire.len() < first.len() + second.len() {
            let n = peer.read(&mut buf).await.unwrap();
            wire.extend_from_slice(&buf[..n]);
        }
        assert_eq!(&wire[..first.len()], &first[..]);
        assert_eq!(&wire[first.len()..], &second[..]);

        shutdown_tx.send(true).ok();
        task.await.unwrap();
    }
}
