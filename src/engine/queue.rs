//! Outbound message queue
//!
//! Ordered by (priority, enqueue sequence): discovery and clock sync ride
//! the *system* tier, API-originated commands the *user* tier, periodic
//! polls the *background* tier. Within a tier, first-queued transmits
//! first.

use crate::engine::matcher::ResponseMatch;
use crate::error::Result;
use crate::protocol::Frame;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Outbound priority tiers, highest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Discovery, clock sync
    System = 0,
    /// Commands originating from an API call
    User = 1,
    /// Periodic polls
    Background = 2,
}

/// One message waiting to go out, with its completion channel
pub struct OutboundMessage {
    pub frame: Frame,
    pub priority: Priority,
    /// Expected response; `None` means fire-and-forget
    pub expects: Option<ResponseMatch>,
    /// Intent deadline; expired messages are dropped as `Cancelled`
    pub deadline: Option<Instant>,
    /// Completion channel back to the intent; carries the matched
    /// response frame when one was expected
    pub reply: Option<oneshot::Sender<Result<Option<Frame>>>>,
}

impl OutboundMessage {
    /// Whether the caller has given up (deadline passed or receiver gone)
    pub fn is_abandoned(&self, now: Instant) -> bool {
        if let Some(deadline) = self.deadline {
            if now >= deadline {
                return true;
            }
        }
        match &self.reply {
            Some(tx) => tx.is_closed(),
            None => false,
        }
    }

    /// Resolve the transaction, consuming the reply channel
    pub fn complete(&mut self, result: Result<Option<Frame>>) {
        if let Some(tx) = self.reply.take() {
            tx.send(result).ok();
        }
    }
}

struct Entry {
    seq: u64,
    msg: OutboundMessage,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the lowest (priority, seq)
        // pops first
        (other.msg.priority, other.seq).cmp(&(self.msg.priority, self.seq))
    }
}

/// Priority queue of outbound messages
#[derive(Default)]
pub struct OutboundQueue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, msg: OutboundMessage) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { seq, msg });
    }

    /// Pop the next live message, resolving abandoned ones as `Cancelled`
    pub fn pop_live(&mut self, now: Instant) -> Option<OutboundMessage> {
        while let Some(entry) = self.heap.pop() {
            let mut msg = entry.msg;
            if msg.is_abandoned(now) {
                msg.complete(Err(crate::error::TritonError::Cancelled));
                continue;
            }
            return Some(msg);
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Fail everything still queued, used at shutdown
    pub fn drain_cancelled(&mut self) {
        while let Some(entry) = self.heap.pop() {
            let mut msg = entry.msg;
            msg.complete(Err(crate::error::TritonError::Cancelled));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(priority: Priority, action: u8) -> OutboundMessage {
        OutboundMessage {
            frame: Frame::new(0, 0x10, 0, action, vec![]),
            priority,
            expects: None,
            deadline: None,
            reply: None,
        }
    }

    #[test]
    fn orders_by_priority_then_sequence() {
        let mut queue = OutboundQueue::new();
        queue.push(msg(Priority::Background, 1));
        queue.push(msg(Priority::User, 2));
        queue.push(msg(Priority::System, 3));
        queue.push(msg(Priority::User, 4));

        let now = Instant::now();
        assert_eq!(queue.pop_live(now).unwrap().frame.action, 3);
        assert_eq!(queue.pop_live(now).unwrap().frame.action, 2);
        assert_eq!(queue.pop_live(now).unwrap().frame.action, 4);
        assert_eq!(queue.pop_live(now).unwrap().frame.action, 1);
        assert!(queue.pop_live(now).is_none());
    }

    #[tokio::test]
    async fn expired_deadline_is_cancelled() {
        let mut queue = OutboundQueue::new();
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        queue.push(OutboundMessage {
            frame: Frame::new(0, 0x10, 0, 0x86, vec![]),
            priority: Priority::User,
            expects: None,
            deadline: Some(now - tokio::time::Duration::from_millis(1)),
            reply: Some(tx),
        });
        queue.push(msg(Priority::User, 7));

        assert_eq!(queue.pop_live(now).unwrap().frame.action, 7);
        assert!(matches!(
            rx.await.unwrap(),
            Err(crate::error::TritonError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn dropped_receiver_is_skipped() {
        let mut queue = OutboundQueue::new();
        let (tx, rx) = oneshot::channel();
        drop(rx);
        queue.push(OutboundMessage {
            frame: Frame::new(0, 0x10, 0, 0x86, vec![]),
            priority: Priority::System,
            expects: None,
            deadline: None,
            reply: Some(tx),
        });
        assert!(queue.pop_live(Instant::now()).is_none());
    }
}
