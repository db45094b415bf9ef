//! Run-state accumulator: history, token counters, rationale, and the final report.
//!
//! Purely observational. Nothing recorded here feeds back into routing.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use mediascreen_types::{Result, TokenUsage};

use crate::config::TokenPricing;
use crate::identity::{ApplicantIdentity, ArticleContent};
use crate::router::{self, RouterState};
use crate::stage::{Stage, StageFailure, StageOutput};
use crate::state::{FinalDecision, RunState, Sentiment, TransitionKind};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Decided {
        decision: FinalDecision,
    },
    /// A stage could not produce a verdict; distinct from every decision.
    Error {
        stage: Stage,
        node: String,
        reason: String,
        message: String,
    },
}

impl RunOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, RunOutcome::Error { .. })
    }

    pub fn decision(&self) -> Option<FinalDecision> {
        match self {
            RunOutcome::Decided { decision } => Some(*decision),
            RunOutcome::Error { .. } => None,
        }
    }

    /// `Match`, `Non-Match`, ... or `Error`.
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Decided { decision } => decision.as_str(),
            RunOutcome::Error { .. } => "Error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Stages that actually called the oracle.
    pub oracle_calls: usize,
    pub possible_oracle_calls: usize,
    pub total_tokens: TokenUsage,
    /// The name prefilter settled the name check without the oracle.
    pub name_check_skipped: bool,
    pub estimated_cost_usd: Option<f64>,
    pub duration_ms: u64,
}

/// Frozen result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub run_name: String,
    pub outcome: RunOutcome,
    pub summary: RunSummary,
    pub finished_at: String,
    pub state: RunState,
}

impl RunReport {
    pub fn decision_label(&self) -> &'static str {
        self.outcome.label()
    }

    /// Sentiment label, `N/A` when the sentiment stage never ran.
    pub fn sentiment_label(&self) -> &'static str {
        self.state.sentiment().map_or("N/A", |s: Sentiment| s.as_str())
    }
}

/// `Screening <name> - <first 8 hex of the run id>`.
pub fn run_name(applicant: &ApplicantIdentity, run_id: &str) -> String {
    let short: String = run_id.chars().filter(|c| *c != '-').take(8).collect();
    format!("Screening {} - {}", applicant.full_name(), short)
}

// ---------------------------------------------------------------------------
// RunAccumulator
// ---------------------------------------------------------------------------

pub struct RunAccumulator {
    state: RunState,
    pricing: Option<TokenPricing>,
    started: Instant,
}

impl RunAccumulator {
    pub fn new(
        run_id: String,
        applicant: Arc<ApplicantIdentity>,
        article: Arc<ArticleContent>,
        pricing: Option<TokenPricing>,
    ) -> Self {
        Self {
            state: RunState::new(run_id, applicant, article),
            pricing,
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut RunState {
        &mut self.state
    }

    /// An oracle-backed stage completed; `next` is where the router sends control.
    pub fn record_stage(&mut self, output: &StageOutput, next: RouterState) {
        let stage = output.stage;
        self.state.record_oracle_usage(stage, output.usage);
        self.state.record_explanation(stage, output.rationale.clone());
        self.state
            .push_history(stage.node(), Some(stage), TransitionKind::Stage, Some(next));
    }

    /// A stage settled without the oracle.
    pub fn record_skipped(&mut self, stage: Stage, rationale: String, next: RouterState) {
        self.state.record_oracle_skipped(stage);
        self.state.record_explanation(stage, rationale);
        self.state
            .push_history(stage.node(), Some(stage), TransitionKind::Skipped, Some(next));
    }

    /// Reach a terminal state: set the final decision exactly once.
    pub fn record_terminal(&mut self, terminal: RouterState) -> Result<FinalDecision> {
        let decision = router::final_decision(terminal, &self.state.snapshot())?;
        let explanation = self.decisive_explanation(terminal);
        self.state.set_final_decision(decision, explanation)?;
        let node = terminal.terminal_node().unwrap_or("finalize");
        self.state
            .push_history(node, None, TransitionKind::Terminal, None);
        Ok(decision)
    }

    pub fn record_failure(&mut self, failure: StageFailure) -> Result<()> {
        let stage = failure.stage;
        self.state.set_failure(failure)?;
        self.state
            .push_history(stage.node(), Some(stage), TransitionKind::Failed, None);
        Ok(())
    }

    /// Rationale of the stage whose verdict decided the run.
    fn decisive_explanation(&self, terminal: RouterState) -> Option<String> {
        let stage = match terminal {
            RouterState::NonMatchByName => Stage::NamePresence,
            RouterState::AgeMismatch => Stage::AgeVerification,
            _ => Stage::DetailVerification,
        };
        self.state.explanation(stage).map(String::from)
    }

    pub fn finish(self) -> RunReport {
        let state = self.state;
        let outcome = match (state.final_decision(), state.failure()) {
            (_, Some(f)) => RunOutcome::Error {
                stage: f.stage,
                node: f.node.clone(),
                reason: f.reason.clone(),
                message: f.message.clone(),
            },
            (Some(decision), None) => RunOutcome::Decided { decision },
            (None, None) => RunOutcome::Error {
                stage: Stage::NamePresence,
                node: "engine".into(),
                reason: "incomplete".into(),
                message: "run finished without a decision".into(),
            },
        };

        let total_tokens = state.total_token_usage();
        let summary = RunSummary {
            oracle_calls: state.stages_run().filter(|(_, invoked)| *invoked).count(),
            possible_oracle_calls: Stage::ALL.len(),
            total_tokens,
            name_check_skipped: state.stages_run().any(|(s, invoked)| {
                s == Stage::NamePresence && !invoked
            }),
            estimated_cost_usd: self.pricing.map(|p| p.estimate_cost_usd(total_tokens)),
            duration_ms: self.started.elapsed().as_millis() as u64,
        };

        RunReport {
            run_id: state.run_id().to_string(),
            run_name: run_name(state.applicant(), state.run_id()),
            outcome,
            summary,
            finished_at: chrono::Utc::now().to_rfc3339(),
            state,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
