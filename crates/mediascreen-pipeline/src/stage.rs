//! Verification stages and the executor that runs one stage against the oracle.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use mediascreen_types::{FailureClass, ScreeningError, TokenUsage};

use crate::events::{EventEmitter, ScreeningEvent};
use crate::oracle::{DecisionOracle, OracleQuery, Verdict};
use crate::prompts::stage_question;
use crate::retry::{classify_screening_error, execute_with_retry, AttemptRecord, RetryPolicy};
use crate::state::RunState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    NamePresence,
    AgeVerification,
    DetailVerification,
    SentimentAssessment,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::NamePresence,
        Stage::AgeVerification,
        Stage::DetailVerification,
        Stage::SentimentAssessment,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::NamePresence => "name_presence",
            Stage::AgeVerification => "age_verification",
            Stage::DetailVerification => "detail_verification",
            Stage::SentimentAssessment => "sentiment_assessment",
        }
    }

    /// Node name used in history and artifact file names.
    pub fn node(&self) -> &'static str {
        match self {
            Stage::NamePresence => "check_name_presence",
            Stage::AgeVerification => "verify_age",
            Stage::DetailVerification => "verify_details",
            Stage::SentimentAssessment => "assess_sentiment",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Stage results
// ---------------------------------------------------------------------------

/// A verdict obtained from the oracle for one stage.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub stage: Stage,
    pub verdict: Verdict,
    pub rationale: String,
    /// Billed across every attempt, not only the one that succeeded.
    pub usage: TokenUsage,
    pub attempts: Vec<AttemptRecord>,
}

/// A stage that could not produce a verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub node: String,
    /// Machine-readable reason, e.g. `timeout` or `auth`.
    pub reason: String,
    pub class: FailureClass,
    pub message: String,
    /// Tokens billed by attempts that got a reply before failing.
    #[serde(default)]
    pub usage: TokenUsage,
    pub attempts: Vec<AttemptRecord>,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stage {} failed after {} attempt(s) [{}]: {}",
            self.stage,
            self.attempts.len(),
            self.reason,
            self.message
        )
    }
}

// ---------------------------------------------------------------------------
// StageExecutor
// ---------------------------------------------------------------------------

pub struct StageExecutor {
    oracle: Arc<dyn DecisionOracle>,
    retry: RetryPolicy,
    timeout: Duration,
    as_of: NaiveDate,
    age_tolerance_years: u32,
    emitter: EventEmitter,
}

impl StageExecutor {
    pub fn new(
        oracle: Arc<dyn DecisionOracle>,
        retry: RetryPolicy,
        timeout: Duration,
        as_of: NaiveDate,
        age_tolerance_years: u32,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            oracle,
            retry,
            timeout,
            as_of,
            age_tolerance_years,
            emitter,
        }
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    /// Ask the oracle about `stage`, retrying transient failures.
    ///
    /// Each attempt is bounded by the executor timeout. A verdict for the
    /// wrong stage counts as unparseable.
    pub async fn execute(&self, stage: Stage, state: &RunState) -> Result<StageOutput, StageFailure> {
        let query = OracleQuery {
            stage,
            question: stage_question(
                stage,
                state.applicant(),
                self.as_of,
                self.age_tolerance_years,
            ),
            applicant: state.applicant().clone(),
            article: state.article().clone(),
        };
        let run_id = state.run_id();
        let attempt_no = AtomicUsize::new(0);
        let billed = Mutex::new(TokenUsage::default());
        let started = Instant::now();

        self.emitter.emit(ScreeningEvent::StageStarted {
            run_id: run_id.to_string(),
            stage,
        });

        let oracle = self.oracle.as_ref();
        let query_ref = &query;
        let attempt_ref = &attempt_no;
        let billed_ref = &billed;
        let charge = move |usage: TokenUsage| {
            billed_ref
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .accumulate(usage);
        };
        let outcome = execute_with_retry(
            move || async move {
                let attempt = attempt_ref.fetch_add(1, Ordering::SeqCst) + 1;
                self.emitter.emit(ScreeningEvent::OracleAttempt {
                    run_id: run_id.to_string(),
                    stage,
                    attempt,
                });
                let response = tokio::time::timeout(self.timeout, oracle.judge(query_ref))
                    .await
                    .map_err(|_| ScreeningError::RequestTimeout {
                        provider: "oracle".into(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    })?
                    .inspect_err(|err| charge(err.billed_usage()))?;
                charge(response.usage);
                if response.verdict.stage() != stage {
                    return Err(ScreeningError::UnparseableVerdict {
                        stage: stage.to_string(),
                        message: format!(
                            "expected a {stage} verdict, got one for {}",
                            response.verdict.stage()
                        ),
                        usage: response.usage,
                    });
                }
                Ok::<_, ScreeningError>(response)
            },
            &self.retry,
            stage.name(),
            classify_screening_error,
        )
        .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let usage = *billed.lock().unwrap_or_else(PoisonError::into_inner);
        match outcome.result {
            Ok(response) => {
                tracing::info!(
                    stage = %stage,
                    verdict = %response.verdict.label(),
                    attempts = outcome.attempts.len(),
                    tokens = usage.total(),
                    "Stage completed"
                );
                self.emitter.emit(ScreeningEvent::StageCompleted {
                    run_id: run_id.to_string(),
                    stage,
                    verdict: response.verdict.label(),
                    duration_ms,
                });
                Ok(StageOutput {
                    stage,
                    verdict: response.verdict,
                    rationale: response.rationale,
                    usage,
                    attempts: outcome.attempts,
                })
            }
            Err(err) => {
                let failure = StageFailure {
                    stage,
                    node: stage.node().to_string(),
                    reason: err.reason_code().to_string(),
                    class: err.failure_class(),
                    message: err.to_string(),
                    usage,
                    attempts: outcome.attempts,
                };
                tracing::error!(stage = %stage, reason = %failure.reason, error = %err, "Stage failed");
                self.emitter.emit(ScreeningEvent::StageFailed {
                    run_id: run_id.to_string(),
                    stage,
                    reason: failure.reason.clone(),
                    attempts: failure.attempts.len(),
                });
                Err(failure)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
