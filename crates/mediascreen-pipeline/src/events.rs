//! Screening event system for observability.
//!
//! Emits [`ScreeningEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! external observers (progress output, loggers, metrics collectors) can follow
//! a run without coupling to the engine internals.

use serde::{Deserialize, Serialize};

use crate::name_match::NameMatchTier;
use crate::router::RouterState;
use crate::stage::Stage;

/// Events emitted during a screening run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScreeningEvent {
    RunStarted {
        run_id: String,
        applicant: String,
    },
    RunCompleted {
        run_id: String,
        decision: String,
        oracle_calls: usize,
        duration_ms: u64,
    },
    RunFailed {
        run_id: String,
        stage: Stage,
        reason: String,
    },
    StageStarted {
        run_id: String,
        stage: Stage,
    },
    /// The name prefilter settled the stage without the oracle.
    StageSkipped {
        run_id: String,
        stage: Stage,
        tier: NameMatchTier,
    },
    OracleAttempt {
        run_id: String,
        stage: Stage,
        attempt: usize,
    },
    StageCompleted {
        run_id: String,
        stage: Stage,
        verdict: String,
        duration_ms: u64,
    },
    StageFailed {
        run_id: String,
        stage: Stage,
        reason: String,
        attempts: usize,
    },
    RouteSelected {
        run_id: String,
        from: RouterState,
        to: RouterState,
    },
}

impl ScreeningEvent {
    pub fn run_id(&self) -> &str {
        match self {
            ScreeningEvent::RunStarted { run_id, .. }
            | ScreeningEvent::RunCompleted { run_id, .. }
            | ScreeningEvent::RunFailed { run_id, .. }
            | ScreeningEvent::StageStarted { run_id, .. }
            | ScreeningEvent::StageSkipped { run_id, .. }
            | ScreeningEvent::OracleAttempt { run_id, .. }
            | ScreeningEvent::StageCompleted { run_id, .. }
            | ScreeningEvent::StageFailed { run_id, .. }
            | ScreeningEvent::RouteSelected { run_id, .. } => run_id,
        }
    }
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<ScreeningEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: ScreeningEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ScreeningEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
