use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::warn;

use crate::plan::{GoalId, OverallStatus};
use crate::step::{StepId, StepStatus};

/// One entry in the live progress stream of a running plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A plan began executing.
    PlanStarted {
        /// Goal the plan belongs to.
        goal_id: GoalId,
        /// Number of steps in the plan.
        total_steps: usize,
        /// Number of waves the plan was leveled into.
        wave_count: usize,
        /// When the plan started.
        timestamp: DateTime<Utc>,
    },
    /// A wave began dispatching.
    WaveStarted {
        /// Zero-based wave index.
        index: usize,
        /// Steps dispatched in this wave.
        step_ids: Vec<StepId>,
        /// When the wave started.
        timestamp: DateTime<Utc>,
    },
    /// A step changed status.
    StepChanged {
        /// Step that changed.
        step_id: StepId,
        /// Status it changed to.
        status: StepStatus,
        /// When the change happened.
        timestamp: DateTime<Utc>,
    },
    /// A plan finished, in any overall state.
    PlanFinished {
        /// Goal the plan belongs to.
        goal_id: GoalId,
        /// Final status of the run.
        overall: OverallStatus,
        /// When the plan finished.
        timestamp: DateTime<Utc>,
    },
}

/// Sending half of the progress stream.
///
/// Cloned freely into executor tasks. Sending never blocks and never fails
/// the run: a detached receiver downgrades sends to a log line.
#[derive(Debug, Clone)]
pub struct ProgressChannel {
    sender: UnboundedSender<ProgressEvent>,
}

impl ProgressChannel {
    /// Creates a channel pair: the sending handle and its receiver.
    #[must_use]
    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Wraps an existing sender.
    #[must_use]
    pub fn from_sender(sender: UnboundedSender<ProgressEvent>) -> Self {
        Self { sender }
    }

    /// Emits one event, dropping it with a warning if the receiver is gone.
    pub fn send(&self, event: ProgressEvent) {
        if let Err(error) = self.sender.send(event) {
            warn!("Progress receiver detached, dropping event: {error}");
        }
    }

    /// Emits a step status change stamped with the current time.
    pub fn step_changed(&self, step_id: StepId, status: StepStatus) {
        self.send(ProgressEvent::StepChanged {
            step_id,
            status,
            timestamp: Utc::now(),
        });
    }
}

impl Default for ProgressChannel {
    /// A channel whose receiver is dropped immediately, so every send is
    /// discarded. Useful when the caller does not observe progress.
    fn default() -> Self {
        let (channel, _receiver) = Self::channel();
        channel
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test code is allowed to use unwrap/expect"
)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (channel, mut receiver) = ProgressChannel::channel();
        channel.step_changed(StepId::new(1), StepStatus::Running);
        channel.step_changed(StepId::new(1), StepStatus::Succeeded);

        let first = receiver.recv().await.unwrap();
        match first {
            ProgressEvent::StepChanged {
                step_id, status, ..
            } => {
                assert_eq!(step_id, StepId::new(1));
                assert_eq!(status, StepStatus::Running);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let second = receiver.recv().await.unwrap();
        match second {
            ProgressEvent::StepChanged { status, .. } => {
                assert_eq!(status, StepStatus::Succeeded);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_detached_receiver_does_not_panic() {
        let channel = ProgressChannel::default();
        channel.step_changed(StepId::new(7), StepStatus::Failed);
    }

    #[test]
    fn test_event_serialization_tags() {
        let event = ProgressEvent::StepChanged {
            step_id: StepId::new(2),
            status: StepStatus::Skipped,
            timestamp: Utc::now(),
        };
        let raw = serde_json::to_value(&event).unwrap();
        assert_eq!(raw["event"], "step_changed");
        assert_eq!(raw["step_id"], 2);
        assert_eq!(raw["status"], "skipped");
    }
}
