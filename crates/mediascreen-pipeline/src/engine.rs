//! Screening engine: wires the name prefilter, stage executor, router and
//! accumulator into one sequential run.

use std::sync::Arc;
use std::time::Instant;

use mediascreen_types::{Result, ScreeningError};

use crate::accumulator::{RunAccumulator, RunReport};
use crate::config::{ScreeningConfig, TokenPricing};
use crate::events::{EventEmitter, ScreeningEvent};
use crate::identity::{ApplicantIdentity, ArticleContent};
use crate::name_match::{NameMatchTier, NameMatcher};
use crate::oracle::{DecisionOracle, Verdict};
use crate::router::{self, RouterState};
use crate::stage::{Stage, StageExecutor, StageFailure, StageOutput};
use crate::state::{AgeMatch, NameMatch, NameMatchProvenance, NameMatchResult};

// ---------------------------------------------------------------------------
// ScreeningPipeline
// ---------------------------------------------------------------------------

pub struct ScreeningPipeline {
    executor: StageExecutor,
    matcher: NameMatcher,
    prefilter: bool,
    pricing: Option<TokenPricing>,
    emitter: EventEmitter,
}

/// How one stage step ended, before routing.
enum StepResult {
    Oracle(StageOutput),
    Skipped { tier: NameMatchTier, rationale: String },
}

impl ScreeningPipeline {
    pub fn new(oracle: Arc<dyn DecisionOracle>, config: &ScreeningConfig) -> Self {
        Self::with_emitter(oracle, config, EventEmitter::default())
    }

    pub fn with_emitter(
        oracle: Arc<dyn DecisionOracle>,
        config: &ScreeningConfig,
        emitter: EventEmitter,
    ) -> Self {
        let executor = StageExecutor::new(
            oracle,
            config.retry_policy(),
            config.oracle_timeout(),
            config.as_of_date(),
            config.age_tolerance_years,
            emitter.clone(),
        );
        Self {
            executor,
            matcher: NameMatcher::new(config.name_match.min_token_len),
            prefilter: config.name_match.prefilter,
            pricing: config.pricing(),
            emitter,
        }
    }

    pub fn events(&self) -> &EventEmitter {
        &self.emitter
    }

    /// Validate raw inputs, then run. Validation errors are returned before
    /// any stage executes.
    pub async fn screen_raw(&self, name: &str, dob: &str, article_text: &str) -> Result<RunReport> {
        let applicant = ApplicantIdentity::parse(name, dob)?;
        let article = ArticleContent::new(article_text, None)?;
        self.screen(applicant, article).await
    }

    /// Run every stage the router reaches and return the frozen report.
    ///
    /// A stage failure ends the run with an `Error` outcome inside `Ok`; `Err`
    /// is reserved for broken run-state invariants.
    pub async fn screen(&self, applicant: ApplicantIdentity, article: ArticleContent) -> Result<RunReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut acc = RunAccumulator::new(
            run_id.clone(),
            Arc::new(applicant),
            Arc::new(article),
            self.pricing,
        );

        tracing::info!(run_id = %run_id, applicant = %acc.state().applicant().full_name(), "Screening started");
        self.emitter.emit(ScreeningEvent::RunStarted {
            run_id: run_id.clone(),
            applicant: acc.state().applicant().full_name().to_string(),
        });

        let mut current = RouterState::NameCheck;
        while !current.is_terminal() {
            let stage = current.stage().ok_or_else(|| {
                ScreeningError::InvariantViolation(format!("{current} has no stage"))
            })?;

            let step = match self.run_step(stage, &acc).await {
                Ok(step) => step,
                Err(failure) => {
                    self.emitter.emit(ScreeningEvent::RunFailed {
                        run_id: run_id.clone(),
                        stage: failure.stage,
                        reason: failure.reason.clone(),
                    });
                    tracing::error!(run_id = %run_id, stage = %failure.stage, reason = %failure.reason, "Screening failed");
                    acc.record_failure(failure)?;
                    return Ok(acc.finish());
                }
            };

            self.apply(stage, &step, &mut acc)?;
            let next = router::next(current, &acc.state().snapshot())?;
            match step {
                StepResult::Oracle(output) => acc.record_stage(&output, next),
                StepResult::Skipped { rationale, .. } => acc.record_skipped(stage, rationale, next),
            }

            tracing::debug!(run_id = %run_id, from = %current, to = %next, "Route selected");
            self.emitter.emit(ScreeningEvent::RouteSelected {
                run_id: run_id.clone(),
                from: current,
                to: next,
            });
            current = next;
        }

        let decision = acc.record_terminal(current)?;
        let report = acc.finish();
        tracing::info!(
            run_id = %run_id,
            decision = %decision,
            oracle_calls = report.summary.oracle_calls,
            tokens = report.summary.total_tokens.total(),
            "Screening completed"
        );
        self.emitter.emit(ScreeningEvent::RunCompleted {
            run_id,
            decision: decision.to_string(),
            oracle_calls: report.summary.oracle_calls,
            duration_ms: started.elapsed().as_millis() as u64,
        });
        Ok(report)
    }

    async fn run_step(&self, stage: Stage, acc: &RunAccumulator) -> std::result::Result<StepResult, StageFailure> {
        if stage == Stage::NamePresence && self.prefilter {
            let state = acc.state();
            let tier = self
                .matcher
                .assess(state.applicant().full_name(), state.article().text());
            if tier.is_conclusive() {
                let rationale = match tier {
                    NameMatchTier::Exact => "Full name found verbatim in the article (accent- and case-insensitive).",
                    _ => "None of the applicant's name tokens appear in the article.",
                };
                tracing::info!(stage = %stage, tier = ?tier, "Name check settled without oracle");
                self.emitter.emit(ScreeningEvent::StageSkipped {
                    run_id: state.run_id().to_string(),
                    stage,
                    tier,
                });
                return Ok(StepResult::Skipped {
                    tier,
                    rationale: rationale.to_string(),
                });
            }
        }
        self.executor
            .execute(stage, acc.state())
            .await
            .map(StepResult::Oracle)
    }

    /// Write the step's verdict into the run state.
    fn apply(&self, stage: Stage, step: &StepResult, acc: &mut RunAccumulator) -> Result<()> {
        let state = acc.state_mut();
        let applied = match step {
            StepResult::Skipped { tier, .. } => {
                let result = match tier {
                    NameMatchTier::Exact => NameMatchResult {
                        outcome: NameMatch::Found,
                        provenance: NameMatchProvenance::Exact,
                    },
                    NameMatchTier::Absent => NameMatchResult {
                        outcome: NameMatch::NotFound,
                        provenance: NameMatchProvenance::None,
                    },
                    NameMatchTier::Ambiguous => {
                        return Err(ScreeningError::InvariantViolation(
                            "ambiguous name tier cannot skip the oracle".into(),
                        ))
                    }
                };
                state.set_name_match(result)
            }
            StepResult::Oracle(output) => match output.verdict {
                Verdict::NamePresence(present) => {
                    let provenance = match (self.prefilter, present) {
                        (true, _) => NameMatchProvenance::PartialLlm,
                        (false, true) => NameMatchProvenance::LlmConfirmed,
                        (false, false) => NameMatchProvenance::LlmRejected,
                    };
                    state.set_name_match(NameMatchResult {
                        outcome: if present { NameMatch::Found } else { NameMatch::NotFound },
                        provenance,
                    })
                }
                Verdict::Age(matches) => state.set_age_match(if matches {
                    AgeMatch::Matched
                } else {
                    AgeMatch::Mismatched
                }),
                Verdict::Detail(verdict) => state.set_detail_verdict(verdict),
                Verdict::Sentiment(sentiment) => state.set_sentiment(sentiment),
            },
        };
        applied.map_err(|e| {
            tracing::error!(stage = %stage, error = %e, "Verdict rejected by run state");
            e
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
