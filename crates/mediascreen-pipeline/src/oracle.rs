//! Decision oracle contract: a question plus context in, a typed verdict out.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use mediascreen_types::{Result, ScreeningError, TokenUsage};

use crate::identity::{ApplicantIdentity, ArticleContent};
use crate::stage::Stage;
use crate::state::{DetailVerdict, Sentiment};

/// One stage's request to the oracle.
#[derive(Debug, Clone)]
pub struct OracleQuery {
    pub stage: Stage,
    pub question: String,
    pub applicant: Arc<ApplicantIdentity>,
    pub article: Arc<ArticleContent>,
}

/// A verdict in the vocabulary of the stage that asked for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Verdict {
    NamePresence(bool),
    Age(bool),
    Detail(DetailVerdict),
    Sentiment(Sentiment),
}

impl Verdict {
    pub fn stage(&self) -> Stage {
        match self {
            Verdict::NamePresence(_) => Stage::NamePresence,
            Verdict::Age(_) => Stage::AgeVerification,
            Verdict::Detail(_) => Stage::DetailVerification,
            Verdict::Sentiment(_) => Stage::SentimentAssessment,
        }
    }

    /// Short human-readable label for logs and events.
    pub fn label(&self) -> String {
        match self {
            Verdict::NamePresence(true) => "name present".into(),
            Verdict::NamePresence(false) => "name absent".into(),
            Verdict::Age(true) => "age matches".into(),
            Verdict::Age(false) => "age mismatch".into(),
            Verdict::Detail(d) => format!("{d:?}"),
            Verdict::Sentiment(s) => s.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OracleResponse {
    pub verdict: Verdict,
    pub rationale: String,
    pub usage: TokenUsage,
}

impl OracleResponse {
    pub fn new(verdict: Verdict, rationale: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            verdict,
            rationale: rationale.into(),
            usage,
        }
    }
}

#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// Answer `query` or fail with a classified [`ScreeningError`].
    async fn judge(&self, query: &OracleQuery) -> Result<OracleResponse>;
}

// ---------------------------------------------------------------------------
// ScriptedOracle
// ---------------------------------------------------------------------------

/// Replays queued replies per stage and records every query it receives.
///
/// Used for dry runs and tests. A stage with no queued reply fails with a
/// non-transient error.
#[derive(Default)]
pub struct ScriptedOracle {
    replies: Mutex<HashMap<Stage, VecDeque<Result<OracleResponse>>>>,
    queries: Mutex<Vec<OracleQuery>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `stage`; replies are consumed in order.
    pub fn push(&self, stage: Stage, reply: Result<OracleResponse>) -> &Self {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(stage)
            .or_default()
            .push_back(reply);
        self
    }

    /// Queue a successful verdict with a fixed token cost.
    pub fn verdict(&self, verdict: Verdict, rationale: &str) -> &Self {
        self.push(
            verdict.stage(),
            Ok(OracleResponse::new(verdict, rationale, TokenUsage::new(120, 30))),
        )
    }

    /// Every query received, in order.
    pub fn queries(&self) -> Vec<OracleQuery> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls_for(&self, stage: Stage) -> usize {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|q| q.stage == stage)
            .count()
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn judge(&self, query: &OracleQuery) -> Result<OracleResponse> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(query.clone());
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&query.stage)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Err(ScreeningError::InvalidRequest {
                    provider: "scripted".into(),
                    message: format!("no scripted reply for stage {}", query.stage),
                })
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
