//! Adverse-media screening pipeline.
//!
//! A fixed four-stage decision graph (name presence, age, details, sentiment)
//! run against one applicant and one article. Each stage asks a
//! [`DecisionOracle`] a narrow question; a pure router picks the next stage or
//! an absorbing decision from the verdicts gathered so far. A deterministic
//! name prefilter can settle the first stage without the oracle.
//!
//! Around the core sit article acquisition, per-run artifacts, CSV batch
//! screening and labeled-dataset evaluation.

pub mod accumulator;
pub mod acquisition;
pub mod artifacts;
pub mod batch;
pub mod config;
pub mod engine;
pub mod evaluation;
pub mod events;
pub mod identity;
pub mod llm_oracle;
pub mod name_match;
pub mod oracle;
pub mod prompts;
pub mod retry;
pub mod router;
pub mod stage;
pub mod state;

pub use accumulator::{run_name, RunAccumulator, RunOutcome, RunReport, RunSummary};
pub use acquisition::{acquire, ArticleFetcher, ArticleSource, HtmlExtractor, HttpFetcher};
pub use artifacts::{load_final_state, load_tags, save_run_artifacts, RunTags};
pub use batch::{load_cases, BatchDriver, BatchResult, BatchRow, BatchSummary, ScreeningCase};
pub use config::ScreeningConfig;
pub use engine::ScreeningPipeline;
pub use evaluation::{
    evaluate, load_labeled_cases, render_summary, write_detailed_csv, write_errors_csv,
    write_summary_report, EvaluationRecord, EvaluationSummary, LabeledCase,
};
pub use events::{EventEmitter, ScreeningEvent};
pub use identity::{parse_date_of_birth, ApplicantIdentity, ArticleContent};
pub use llm_oracle::{parse_verdict, LlmOracle};
pub use name_match::{NameMatchTier, NameMatcher};
pub use oracle::{DecisionOracle, OracleQuery, OracleResponse, ScriptedOracle, Verdict};
pub use retry::{execute_with_retry, BackoffPolicy, RetryPolicy};
pub use router::{describe_transitions, RouterState};
pub use stage::{Stage, StageExecutor, StageFailure, StageOutput};
pub use state::{
    AgeMatch, DetailVerdict, FinalDecision, HistoryEntry, NameMatch, NameMatchProvenance,
    NameMatchResult, RunState, Sentiment, StateSnapshot, TransitionKind,
};
