//! Presence monitor.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::registry::SessionRegistry;
use crate::connection::close::CloseReason;
use crate::connection::handle::SessionState;
use crate::connection::queue::EnqueueOutcome;
use crate::dispatch::dispatcher::FanoutDispatcher;
use crate::message::types::OutboundFrame;
use crate::metrics::RelayMetrics;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions closed for silence.
    pub expired: usize,
    /// Pings enqueued.
    pub pinged: usize,
    /// Idle topics removed.
    pub topics_collected: usize,
}

/// Pings sessions, expires silent ones, and collects idle topics.
///
/// Any inbound frame counts as a liveness signal. A session silent for
/// longer than the timeout has missed `timeout / interval` consecutive
/// pings and is closed.
#[derive(Debug)]
pub struct PresenceMonitor {
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<FanoutDispatcher>,
    metrics: Arc<RelayMetrics>,
    interval: Duration,
    timeout: Duration,
}

impl PresenceMonitor {
    /// Create a monitor.
    pub fn new(
        registry: Arc<SessionRegistry>,
        dispatcher: Arc<FanoutDispatcher>,
        metrics: Arc<RelayMetrics>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            metrics,
            interval,
            timeout,
        }
    }

    /// Sweep every interval until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_ms = self.interval.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64,
            "Presence monitor started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let report = self.sweep();
            if report.expired > 0 || report.topics_collected > 0 {
                debug!(
                    expired = report.expired,
                    topics_collected = report.topics_collected,
                    "Presence sweep"
                );
            }
        }

        info!("Presence monitor stopped");
    }

    /// Run one sweep.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let missed_limit = (self.timeout.as_millis() / self.interval.as_millis().max(1)).max(1);

        for session in self.registry.sessions() {
            let silence = session.silence();
            match session.state() {
                SessionState::Connecting | SessionState::Open if silence > self.timeout => {
                    if self
                        .registry
                        .close(&session.id, CloseReason::heartbeat_timeout())
                    {
                        RelayMetrics::inc(&self.metrics.heartbeat_timeouts);
                        self.metrics.session_closed();
                        report.expired += 1;
                        warn!(
                            session_id = %session.id,
                            user_id = %session.user_id,
                            silent_ms = silence.as_millis() as u64,
                            missed = missed_limit as u64,
                            "Heartbeat timeout, closing session"
                        );
                    }
                }
                SessionState::Open => match session.push(OutboundFrame::ping()) {
                    EnqueueOutcome::Overflow => {
                        if self.registry.close(&session.id, CloseReason::slow_consumer()) {
                            RelayMetrics::inc(&self.metrics.slow_consumer_disconnects);
                            self.metrics.session_closed();
                        }
                    }
                    EnqueueOutcome::Rejected => {}
                    EnqueueOutcome::Queued | EnqueueOutcome::DroppedOldest => report.pinged += 1,
                },
                SessionState::Connecting | SessionState::Draining | SessionState::Closed => {}
            }
        }

        let collected = self.registry.collect_idle_topics();
        report.topics_collected = collected.len();
        self.dispatcher.prune_cursors();

        report
    }
}
