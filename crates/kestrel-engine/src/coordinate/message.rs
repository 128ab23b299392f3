use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// What a message asks of its receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Work delegated to the receiver.
    Task,
    /// A finished piece of work reported back.
    Result,
    /// A question expecting an eventual `Result`.
    Query,
}

/// One direct message between agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Name of the sending agent.
    pub sender: String,
    /// Name of the receiving agent.
    pub receiver: String,
    /// Message body.
    pub payload: Value,
    /// What the message asks of the receiver.
    pub kind: MessageKind,
    /// When the message was sent.
    pub sent_at: DateTime<Utc>,
}

impl AgentMessage {
    /// Creates a message stamped with the current time.
    #[must_use]
    pub fn new(sender: &str, receiver: &str, payload: Value, kind: MessageKind) -> Self {
        Self {
            sender: sender.to_owned(),
            receiver: receiver.to_owned(),
            payload,
            kind,
            sent_at: Utc::now(),
        }
    }
}

/// Routes messages to per-receiver queues; each message is consumed at
/// most once, in send order, and then discarded. Persistence exists only
/// for the sender's debugging, not for correctness.
#[derive(Debug, Default)]
pub struct MessageRouter {
    queues: Mutex<HashMap<String, VecDeque<AgentMessage>>>,
}

impl MessageRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues one message for its receiver.
    pub fn send(&self, message: AgentMessage) {
        debug!(
            "Message {:?} from '{}' to '{}'",
            message.kind, message.sender, message.receiver
        );
        if let Ok(mut queues) = self.queues.lock() {
            queues
                .entry(message.receiver.clone())
                .or_default()
                .push_back(message);
        }
    }

    /// Takes the oldest pending message for a receiver, consuming it.
    #[must_use]
    pub fn receive(&self, receiver: &str) -> Option<AgentMessage> {
        self.queues
            .lock()
            .ok()
            .and_then(|mut queues| queues.get_mut(receiver).and_then(VecDeque::pop_front))
    }

    /// Number of messages waiting for a receiver.
    #[must_use]
    pub fn pending(&self, receiver: &str) -> usize {
        self.queues
            .lock()
            .map_or(0, |queues| queues.get(receiver).map_or(0, VecDeque::len))
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
    use serde_json::json;

    #[test]
    fn test_messages_consumed_once_in_order() {
        let router = MessageRouter::new();
        router.send(AgentMessage::new(
            "manager",
            "researcher",
            json!({"topic": "weather"}),
            MessageKind::Task,
        ));
        router.send(AgentMessage::new(
            "manager",
            "researcher",
            json!({"topic": "currency"}),
            MessageKind::Task,
        ));
        assert_eq!(router.pending("researcher"), 2);

        let first = router.receive("researcher").unwrap();
        assert_eq!(first.payload, json!({"topic": "weather"}));
        let second = router.receive("researcher").unwrap();
        assert_eq!(second.payload, json!({"topic": "currency"}));

        assert!(router.receive("researcher").is_none());
        assert_eq!(router.pending("researcher"), 0);
    }

    #[test]
    fn test_queues_are_per_receiver() {
        let router = MessageRouter::new();
        router.send(AgentMessage::new(
            "worker",
            "manager",
            json!("done"),
            MessageKind::Result,
        ));

        assert!(router.receive("someone_else").is_none());
        assert_eq!(router.receive("manager").unwrap().sender, "worker");
    }
}
