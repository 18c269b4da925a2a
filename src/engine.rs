//! Per-port transaction engine
//!
//! Each port owns one engine: an outbound priority queue, a transmit
//! pacer, a response matcher with timeout and retry budget, and an inbound
//! dispatcher. All writes to a port are serialized through its engine
//! task; consumers of the port's event stream see a total order. Engines
//! on different ports run independently.

use crate::error::Result;
use crate::port::PortStats;
use crate::protocol::Frame;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

pub mod matcher;
pub mod pacer;
pub mod queue;
pub mod runtime;

pub use matcher::{Correlation, ResponseMatch};
pub use queue::{OutboundMessage, Priority};
pub use runtime::EngineRuntime;

/// Transaction counters for one engine
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Frames transmitted, retransmissions included
    pub transmissions: AtomicU64,
    /// Transactions completed by a matched response
    pub completed: AtomicU64,
    /// Retransmissions after a response timeout
    pub retries: AtomicU64,
    /// Transactions failed after retry exhaustion
    pub failures: AtomicU64,
    /// Checksum rejects plus framing aborts
    pub protocol_errors: AtomicU64,
    /// Set while the protocol-error rate exceeds the degraded threshold
    pub degraded: AtomicBool,
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            transmissions: self.transmissions.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }
}

/// Serializable view of [`EngineStats`]
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatsSnapshot {
    pub transmissions: u64,
    pub completed: u64,
    pub retries: u64,
    pub failures: u64,
    pub protocol_errors: u64,
    pub degraded: bool,
}

/// Notifications the engine raises to the bridge
#[derive(Debug)]
pub enum EngineEvent {
    /// Inbound frame with no in-flight transaction to complete;
    /// routed to board dispatch as spontaneous status
    Frame { port_id: u8, frame: Frame },
    /// The port's stream was lost; reconnect supervision started
    PortLost { port_id: u8 },
    /// The port recovered after reconnect
    PortRecovered { port_id: u8 },
    /// Protocol-error rate crossed the degraded threshold
    Degraded { port_id: u8 },
}

/// Commands accepted by the engine task
pub enum EngineCommand {
    Submit(OutboundMessage),
    Shutdown,
}

/// Cheap, cloneable handle for submitting work to one engine
#[derive(Clone)]
pub struct EngineHandle {
    port_id: u8,
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
    stats: Arc<EngineStats>,
    port_stats: Arc<PortStats>,
}

impl EngineHandle {
    pub(crate) fn new(
        port_id: u8,
        cmd_tx: mpsc::UnboundedSender<EngineCommand>,
        stats: Arc<EngineStats>,
        port_stats: Arc<PortStats>,
    ) -> Self {
        Self {
            port_id,
            cmd_tx,
            stats,
            port_stats,
        }
    }

    pub fn port_id(&self) -> u8 {
        self.port_id
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn port_stats(&self) -> &PortStats {
        &self.port_stats
    }

    /// Queue a frame and await its transaction result.
    ///
    /// With an expected-response descriptor the result carries the matched
    /// frame; without one, the transaction resolves after transmit.
    pub async fn request(
        &self,
        frame: Frame,
        priority: Priority,
        expects: Option<ResponseMatch>,
        deadline: Option<Instant>,
    ) -> Result<Option<Frame>> {
        let (tx, rx) = oneshot::channel();
        let msg = OutboundMessage {
            frame,
            priority,
            expects,
            deadline,
            reply: Some(tx),
        };
        self.cmd_tx
            .send(EngineCommand::Submit(msg))
            .map_err(|_| crate::error::TritonError::Cancelled)?;
        rx.await.map_err(|_| crate::error::TritonError::Cancelled)?
    }

    /// Queue a frame without waiting for the outcome
    pub fn send(&self, frame: Frame, priority: Priority) -> Result<()> {
        let msg = OutboundMessage {
            frame,
            priority,
            expects: None,
            deadline: None,
            reply: None,
        };
        self.cmd_tx
            .send(EngineCommand::Submit(msg))
            .map_err(|_| crate::error::TritonError::Cancelled)
    }

    /// Ask the engine task to stop
    pub fn shutdown(&self) {
        self.cmd_tx.send(EngineCommand::Shutdown).ok();
    }
}
