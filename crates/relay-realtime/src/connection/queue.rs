//! Bounded per-session outbound queue.
//!
//! Producers never block: when the queue is full the configured
//! [`OverflowPolicy`] decides between discarding the oldest frame and
//! reporting overflow so the caller can disconnect the session.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Notify;

use relay_core::config::OverflowPolicy;

use crate::message::types::OutboundFrame;

/// Result of offering a frame to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Frame accepted.
    Queued,
    /// Frame accepted after discarding the oldest queued frame.
    DroppedOldest,
    /// Queue full under the disconnect policy; frame not accepted.
    Overflow,
    /// Queue no longer accepts frames (draining or closed).
    Rejected,
}

/// Bounded FIFO of frames awaiting the writer loop.
#[derive(Debug)]
pub struct OutboundQueue {
    items: Mutex<VecDeque<OutboundFrame>>,
    capacity: usize,
    policy: OverflowPolicy,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` frames.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            policy,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<OutboundFrame>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Offer a frame without blocking.
    pub fn push(&self, frame: OutboundFrame) -> EnqueueOutcome {
        if self.is_closed() {
            return EnqueueOutcome::Rejected;
        }

        let outcome = {
            let mut items = self.lock();
            if items.len() < self.capacity {
                items.push_back(frame);
                EnqueueOutcome::Queued
            } else {
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        items.pop_front();
                        items.push_back(frame);
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        EnqueueOutcome::DroppedOldest
                    }
                    OverflowPolicy::Disconnect => EnqueueOutcome::Overflow,
                }
            }
        };

        if outcome != EnqueueOutcome::Overflow {
            self.notify.notify_one();
        }
        outcome
    }

    /// Wait for the next frame.
    ///
    /// Returns `None` once the queue is closed and fully drained.
    pub async fn pop(&self) -> Option<OutboundFrame> {
        loop {
            if let Some(frame) = self.lock().pop_front() {
                return Some(frame);
            }
            if self.is_closed() {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Take the next frame if one is ready.
    pub fn try_pop(&self) -> Option<OutboundFrame> {
        self.lock().pop_front()
    }

    /// Remove queued `MESSAGE` frames for `topic`.
    pub fn purge_topic(&self, topic: &str) -> usize {
        let mut items = self.lock();
        let before = items.len();
        items.retain(|frame| frame.topic_message().is_none_or(|(t, _)| t != topic));
        before - items.len()
    }

    /// Stop accepting frames; the writer drains what remains.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Whether the queue has stopped accepting frames.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Frames currently queued.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no frames are queued.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of queued frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames discarded by the drop-oldest policy.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(topic: &str, sequence: u64) -> OutboundFrame {
        OutboundFrame::Message {
            topic: topic.to_string(),
            sequence,
            payload: format!("m{sequence}"),
            from: None,
            published_at: Utc::now(),
        }
    }

    fn sequences(queue: &OutboundQueue) -> Vec<u64> {
        std::iter::from_fn(|| queue.try_pop())
            .filter_map(|f| f.topic_message().map(|(_, s)| s))
            .collect()
    }

    #[test]
    fn test_drop_oldest_keeps_newest_frames() {
        let queue = OutboundQueue::new(3, OverflowPolicy::DropOldest);
        let outcomes: Vec<EnqueueOutcome> = (1..=4).map(|s| queue.push(message("t", s))).collect();
        assert_eq!(outcomes[3], EnqueueOutcome::DroppedOldest);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(sequences(&queue), vec![2, 3, 4]);
    }

    #[test]
    fn test_disconnect_policy_reports_overflow() {
        let queue = OutboundQueue::new(2, OverflowPolicy::Disconnect);
        assert_eq!(queue.push(message("t", 1)), EnqueueOutcome::Queued);
        assert_eq!(queue.push(message("t", 2)), EnqueueOutcome::Queued);
        assert_eq!(queue.push(message("t", 3)), EnqueueOutcome::Overflow);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 0);
    }

    #[test]
    fn test_purge_topic_leaves_other_frames() {
        let queue = OutboundQueue::new(8, OverflowPolicy::DropOldest);
        queue.push(message("a", 1));
        queue.push(OutboundFrame::pong());
        queue.push(message("b", 1));
        queue.push(message("a", 2));
        assert_eq!(queue.purge_topic("a"), 2);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_closed_queue_drains_then_ends() {
        let queue = OutboundQueue::new(4, OverflowPolicy::DropOldest);
        queue.push(message("t", 1));
        queue.close();
        assert_eq!(queue.push(message("t", 2)), EnqueueOutcome::Rejected);
        assert!(queue.pop().await.is_some());
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = std::sync::Arc::new(OutboundQueue::new(4, OverflowPolicy::DropOldest));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.push(message("t", 7));
        let frame = consumer.await.unwrap().unwrap();
        assert_eq!(frame.topic_message(), Some(("t", 7)));
    }
}
