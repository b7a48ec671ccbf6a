use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Identifies one submission to the Async Operation Manager. Monotonic
/// within a process; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationId(pub u64);

/// What kind of long-running job a submitted operation is (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    PublishSession,
    SyncWithRemote,
    RebuildIndexes,
    RebuildManifest,
    BulkDownload,
    Repair,
    Clear,
}

/// The state machine from §4.4:
///
/// ```text
/// pending -> running -> completed
///                     \-> failed
/// running -> cancelling -> cancelled
/// ```
///
/// Transitions are monotonic; `cancelling` has exactly one way out,
/// `cancelled` (P5: an operation never transitions from `cancelling` to
/// `completed`). A job that finishes its work after a cancel was requested
/// does not get to land on `completed`/`failed` -- the worker that drives
/// this transition checks which state the record is actually in and
/// routes a post-cancel finish to `cancelled` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Pending,
    Running,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationState::Completed | OperationState::Failed | OperationState::Cancelled
        )
    }

    /// Whether `self -> next` is a legal edge of the state machine above.
    pub fn can_transition_to(self, next: OperationState) -> bool {
        use OperationState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelling)
                | (Cancelling, Cancelled)
        )
    }
}

/// A snapshot of one operation's lifecycle, as returned by `status(id)`
/// (§3 Operation Record, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: OperationId,
    pub kind: OperationKind,
    pub state: OperationState,
    pub progress: f32,
    pub message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<ErrorKind>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl OperationRecord {
    pub fn new(id: OperationId, kind: OperationKind, submitted_at: DateTime<Utc>) -> Self {
        Self {
            id,
            kind,
            state: OperationState::Pending,
            progress: 0.0,
            message: None,
            result: None,
            error: None,
            submitted_at,
            started_at: None,
            finished_at: None,
        }
    }

    /// Applies a transition, returning `false` (and leaving state
    /// unchanged) if the edge is illegal. This is the single choke point
    /// that enforces P5.
    pub fn transition(&mut self, next: OperationState, at: DateTime<Utc>) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        if next == OperationState::Running {
            self.started_at.get_or_insert(at);
        }
        if next.is_terminal() {
            self.finished_at = Some(at);
        }
        self.state = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OperationState::*;

    #[test]
    fn cancelling_only_ever_reaches_cancelled() {
        // P5: cancelling has exactly one legal successor.
        assert!(!Cancelling.can_transition_to(Completed));
        assert!(!Cancelling.can_transition_to(Failed));
        assert!(Cancelling.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Running));
    }

    #[test]
    fn record_transition_rejects_illegal_edges() {
        let now = Utc::now();
        let mut rec = OperationRecord::new(OperationId(1), OperationKind::SyncWithRemote, now);
        assert!(rec.transition(Running, now));
        assert!(rec.transition(Cancelling, now));
        assert!(rec.transition(Cancelled, now));
        assert!(!rec.transition(Completed, now));
        assert_eq!(rec.state, Cancelled);
        assert!(rec.finished_at.is_some());
    }
}
