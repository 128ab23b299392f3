use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

/// One attributed entry on the blackboard.
#[derive(Debug, Clone, Serialize)]
pub struct BlackboardEntry {
    /// Key the entry was written under.
    pub key: String,
    /// The contributed value.
    pub value: Value,
    /// Name of the agent that wrote it.
    pub writer_id: String,
    /// Logical clock stamp; later writes to the same key carry higher
    /// revisions, so last-writer-wins is well defined.
    pub revision: u64,
    /// Wall-clock write time, for humans reading a dump.
    pub written_at: DateTime<Utc>,
}

/// Shared associative store agents communicate through indirectly.
///
/// Writes overwrite; conflicts resolve last-writer-wins by revision, a
/// monotonically increasing logical clock per board. True merge policies
/// are deliberately out of scope.
#[derive(Debug, Default)]
pub struct Blackboard {
    entries: Mutex<HashMap<String, BlackboardEntry>>,
    clock: AtomicU64,
}

impl Blackboard {
    /// Creates an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes one entry, returning the revision it was stamped with.
    pub fn write(&self, key: &str, value: Value, writer_id: &str) -> u64 {
        let revision = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = BlackboardEntry {
            key: key.to_owned(),
            value,
            writer_id: writer_id.to_owned(),
            revision,
            written_at: Utc::now(),
        };
        debug!("Blackboard write '{key}' by '{writer_id}' (revision {revision})");
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_owned(), entry);
        }
        revision
    }

    /// The current entry under a key, if any.
    #[must_use]
    pub fn read(&self, key: &str) -> Option<BlackboardEntry> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).cloned())
    }

    /// A full snapshot of the board, sorted by key.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, BlackboardEntry> {
        self.entries.lock().map_or_else(
            |_| BTreeMap::new(),
            |entries| {
                entries
                    .iter()
                    .map(|(key, entry)| (key.clone(), entry.clone()))
                    .collect()
            },
        )
    }

    /// Number of keys currently on the board.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map_or(0, |entries| entries.len())
    }

    /// Whether the board holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An agent participating in a blackboard session.
///
/// Each round the agent sees the full current board and decides whether
/// to contribute one write.
#[async_trait]
pub trait BlackboardAgent: Send + Sync {
    /// Name used for write attribution.
    fn name(&self) -> &str;

    /// Inspects the board and optionally returns one `(key, value)` to
    /// write. Returning `None` means the agent has nothing to add this
    /// round.
    async fn contribute(
        &self,
        board: &BTreeMap<String, BlackboardEntry>,
    ) -> Option<(String, Value)>;
}

/// How a blackboard session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Rounds that ran, including the final zero-write round.
    pub rounds: usize,
    /// Whether a round produced zero writes (a fixed point) before the
    /// round cap was hit.
    pub fixed_point: bool,
}

/// Round loop over a set of blackboard agents.
///
/// Every round polls each agent in order with a fresh snapshot; a round
/// with no writes is a fixed point and ends the session, otherwise the
/// session stops at the round cap. The cap keeps termination provable
/// even when agents keep reacting to each other's writes.
pub struct BlackboardSession<'a> {
    board: &'a Blackboard,
    max_rounds: usize,
}

impl<'a> BlackboardSession<'a> {
    /// Creates a session over a board with a round cap.
    #[must_use]
    pub fn new(board: &'a Blackboard, max_rounds: usize) -> Self {
        Self { board, max_rounds }
    }

    /// Runs agents to a fixed point or the round cap.
    pub async fn run(&self, agents: &[&dyn BlackboardAgent]) -> SessionOutcome {
        for round in 1..=self.max_rounds {
            let mut writes = 0_usize;
            for agent in agents {
                let snapshot = self.board.snapshot();
                if let Some((key, value)) = agent.contribute(&snapshot).await {
                    self.board.write(&key, value, agent.name());
                    writes += 1;
                }
            }
            debug!("Blackboard round {round}: {writes} write(s)");
            if writes == 0 {
                info!("Blackboard session reached a fixed point after {round} round(s)");
                return SessionOutcome {
                    rounds: round,
                    fixed_point: true,
                };
            }
        }
        info!(
            "Blackboard session stopped at the round cap ({})",
            self.max_rounds
        );
        SessionOutcome {
            rounds: self.max_rounds,
            fixed_point: false,
        }
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

    /// Writes its contribution once, then stays quiet.
    struct OneShotAgent {
        name: String,
        key: String,
        value: Value,
    }

    #[async_trait]
    impl BlackboardAgent for OneShotAgent {
        fn name(&self) -> &str {
            &self.name
        }

        async fn contribute(
            &self,
            board: &BTreeMap<String, BlackboardEntry>,
        ) -> Option<(String, Value)> {
            (!board.contains_key(&self.key)).then(|| (self.key.clone(), self.value.clone()))
        }
    }

    /// Waits for another agent's key, then derives its own entry from it.
    struct DependentAgent;

    #[async_trait]
    impl BlackboardAgent for DependentAgent {
        fn name(&self) -> &str {
            "synthesizer"
        }

        async fn contribute(
            &self,
            board: &BTreeMap<String, BlackboardEntry>,
        ) -> Option<(String, Value)> {
            if board.contains_key("summary") {
                return None;
            }
            let temp = board.get("paris")?.value.get("temp")?.clone();
            Some(("summary".to_owned(), json!({ "paris_temp": temp })))
        }
    }

    /// Never stops writing; only the round cap ends it.
    struct ChattyAgent;

    #[async_trait]
    impl BlackboardAgent for ChattyAgent {
        fn name(&self) -> &str {
            "chatty"
        }

        async fn contribute(
            &self,
            board: &BTreeMap<String, BlackboardEntry>,
        ) -> Option<(String, Value)> {
            Some(("noise".to_owned(), json!(board.len())))
        }
    }

    #[test]
    fn test_last_writer_wins_by_revision() {
        let board = Blackboard::new();
        let first = board.write("city", json!("Paris"), "alpha");
        let second = board.write("city", json!("London"), "beta");
        assert!(second > first);

        let entry = board.read("city").unwrap();
        assert_eq!(entry.value, json!("London"));
        assert_eq!(entry.writer_id, "beta");
        assert_eq!(entry.revision, second);
        assert_eq!(board.len(), 1);
    }

    #[tokio::test]
    async fn test_session_reaches_fixed_point() {
        let board = Blackboard::new();
        let weather = OneShotAgent {
            name: "weather".to_owned(),
            key: "paris".to_owned(),
            value: json!({"temp": 18}),
        };
        let synthesizer = DependentAgent;

        let outcome = BlackboardSession::new(&board, 10)
            .run(&[&weather, &synthesizer])
            .await;

        assert!(outcome.fixed_point);
        // Round 1: both write. Round 2: zero writes, fixed point.
        assert_eq!(outcome.rounds, 2);
        assert_eq!(
            board.read("summary").unwrap().value,
            json!({"paris_temp": 18})
        );
        assert_eq!(board.read("summary").unwrap().writer_id, "synthesizer");
    }

    #[tokio::test]
    async fn test_round_cap_stops_divergent_sessions() {
        let board = Blackboard::new();
        let outcome = BlackboardSession::new(&board, 3).run(&[&ChattyAgent]).await;
        assert!(!outcome.fixed_point);
        assert_eq!(outcome.rounds, 3);
    }

    #[tokio::test]
    async fn test_empty_agent_set_is_an_immediate_fixed_point() {
        let board = Blackboard::new();
        let outcome = BlackboardSession::new(&board, 5).run(&[]).await;
        assert!(outcome.fixed_point);
        assert_eq!(outcome.rounds, 1);
    }
}
