//! Transmit pacer
//!
//! Decides when the next transmit may begin. Three knobs, all tunables
//! from the comms configuration:
//!
//! - `idleBeforeTxMs`: minimum bus-quiet interval before transmit
//! - `interFrameDelayMs`: gap after the previous transmit completes
//! - `interByteDelayMs`: optional throttling for slow USB-RS485 bridges
//!   (applied by the port's write loop; the pacer only carries the value)

use crate::config::CommsConfig;
use tokio::time::{Duration, Instant};

pub struct Pacer {
    idle_before_tx: Duration,
    inter_frame_delay: Duration,
    inter_byte_delay: Duration,
    last_tx_end: Option<Instant>,
}

impl Pacer {
    pub fn new(comms: &CommsConfig) -> Self {
        Self {
            idle_before_tx: Duration::from_millis(comms.idle_before_tx_ms),
            inter_frame_delay: Duration::from_millis(comms.inter_frame_delay_ms),
            inter_byte_delay: Duration::from_millis(comms.inter_byte_delay_ms),
            last_tx_end: None,
        }
    }

    /// Per-byte delay the port write loop should apply
    pub fn inter_byte_delay(&self) -> Duration {
        self.inter_byte_delay
    }

    /// How much longer the bus must stay quiet before a transmit may
    /// start. `idle_for` is the time since the port last received a byte.
    /// Zero means clear to send now.
    pub fn clearance(&self, idle_for: Duration, now: Instant) -> Duration {
        let idle_wait = self.idle_before_tx.saturating_sub(idle_for);

        let frame_wait = match self.last_tx_end {
            Some(end) => self
                .inter_frame_delay
                .saturating_sub(now.saturating_duration_since(end)),
            None => Duration::ZERO,
        };

        idle_wait.max(frame_wait)
    }

    /// Record that a transmit just finished
    pub fn note_tx_complete(&mut self, now: Instant) {
        self.last_tx_end = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pacer(idle_ms: u64, frame_ms: u64) -> Pacer {
        let mut comms = CommsConfig::default();
        comms.idle_before_tx_ms = idle_ms;
        comms.inter_frame_delay_ms = frame_ms;
        Pacer::new(&comms)
    }

    #[test]
    fn clear_when_bus_quiet_and_no_prior_tx() {
        let p = pacer(40, 50);
        let now = Instant::now();
        assert_eq!(p.clearance(Duration::from_millis(100), now), Duration::ZERO);
    }

    #[test]
    fn waits_out_the_idle_window() {
        let p = pacer(40, 50);
        let now = Instant::now();
        let wait = p.clearance(Duration::from_millis(10), now);
        assert_eq!(wait, Duration::from_millis(30));
    }

    #[test]
    fn waits_out_the_inter_frame_gap() {
        let mut p = pacer(0, 50);
        let now = Instant::now();
        p.note_tx_complete(now);
        let wait = p.clearance(Duration::from_secs(1), now + Duration::from_millis(20));
        assert_eq!(wait, Duration::from_millis(30));
    }

    #[test]
    fn takes_the_longer_of_both_waits() {
        let mut p = pacer(40, 50);
        let now = Instant::now();
        p.note_tx_complete(now);
        // 5 ms after tx end, bus quiet for 25 ms: idle needs 15 more,
        // inter-frame needs 45 more
        let wait = p.clearance(Duration::from_millis(25), now + Duration::from_millis(5));
        assert_eq!(wait, Duration::from_millis(45));
    }
}
