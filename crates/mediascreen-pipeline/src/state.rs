//! Run state: the single mutable aggregate threaded through one screening run.
//!
//! Verdict fields are written once, in stage order, and frozen as soon as a
//! final decision or a stage failure is recorded. Violations surface as
//! [`ScreeningError::InvariantViolation`] rather than being silently ignored.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use mediascreen_types::{Result, ScreeningError, TokenUsage};

use crate::identity::{ApplicantIdentity, ArticleContent};
use crate::router::RouterState;
use crate::stage::{Stage, StageFailure};

// ---------------------------------------------------------------------------
// Verdict values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameMatch {
    Found,
    NotFound,
}

/// How the name-presence verdict was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NameMatchProvenance {
    /// Full name found verbatim by the prefilter.
    Exact,
    /// Prefilter was inconclusive and the oracle decided.
    PartialLlm,
    /// Prefilter disabled, oracle said present.
    LlmConfirmed,
    /// Prefilter disabled, oracle said absent.
    LlmRejected,
    /// No name token found by the prefilter.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameMatchResult {
    pub outcome: NameMatch,
    pub provenance: NameMatchProvenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeMatch {
    Matched,
    Mismatched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetailVerdict {
    #[serde(rename = "Match", alias = "match")]
    Match,
    #[serde(rename = "Non-Match", alias = "Non-match", alias = "non-match", alias = "non_match")]
    NonMatch,
    #[serde(
        rename = "Review Required",
        alias = "review required",
        alias = "review_required"
    )]
    ReviewRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sentiment {
    #[serde(alias = "positive")]
    Positive,
    #[serde(alias = "negative")]
    Negative,
    #[serde(alias = "neutral")]
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "Positive",
            Sentiment::Negative => "Negative",
            Sentiment::Neutral => "Neutral",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FinalDecision {
    #[serde(rename = "Match")]
    Match,
    #[serde(rename = "Non-Match")]
    NonMatch,
    #[serde(rename = "Review Required")]
    ReviewRequired,
    #[serde(rename = "Age Mismatch - Needs Verification")]
    AgeMismatch,
}

impl FinalDecision {
    pub const ALL: [FinalDecision; 4] = [
        FinalDecision::Match,
        FinalDecision::NonMatch,
        FinalDecision::ReviewRequired,
        FinalDecision::AgeMismatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FinalDecision::Match => "Match",
            FinalDecision::NonMatch => "Non-Match",
            FinalDecision::ReviewRequired => "Review Required",
            FinalDecision::AgeMismatch => "Age Mismatch - Needs Verification",
        }
    }
}

impl fmt::Display for FinalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Snapshot / history
// ---------------------------------------------------------------------------

/// Verdict fields at one point in time. `None` means not yet determined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub name_match: Option<NameMatchResult>,
    pub age_match: Option<AgeMatch>,
    pub detail_verdict: Option<DetailVerdict>,
    pub sentiment: Option<Sentiment>,
    pub final_decision: Option<FinalDecision>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Stage ran and the oracle was consulted.
    Stage,
    /// Stage ran but the prefilter made the oracle call unnecessary.
    Skipped,
    /// Router reached an absorbing state.
    Terminal,
    /// Stage could not produce a verdict.
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// 1-based position in the run.
    pub step: usize,
    /// Node name, e.g. `verify_age` or `set_age_mismatch`.
    pub node: String,
    pub stage: Option<Stage>,
    pub kind: TransitionKind,
    pub llm_invoked: bool,
    /// Where the router sent control after this entry.
    pub next: Option<RouterState>,
    pub timestamp: String,
    pub snapshot: StateSnapshot,
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    run_id: String,
    applicant: Arc<ApplicantIdentity>,
    article: Arc<ArticleContent>,
    #[serde(flatten)]
    verdicts: StateSnapshot,
    final_explanation: Option<String>,
    explanations: BTreeMap<Stage, String>,
    token_usage: BTreeMap<Stage, TokenUsage>,
    stage_llm_invoked: BTreeMap<Stage, bool>,
    history: Vec<HistoryEntry>,
    failure: Option<StageFailure>,
    started_at: String,
}

impl RunState {
    pub fn new(run_id: String, applicant: Arc<ApplicantIdentity>, article: Arc<ArticleContent>) -> Self {
        Self {
            run_id,
            applicant,
            article,
            verdicts: StateSnapshot::default(),
            final_explanation: None,
            explanations: BTreeMap::new(),
            token_usage: BTreeMap::new(),
            stage_llm_invoked: BTreeMap::new(),
            history: Vec::new(),
            failure: None,
            started_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    // --- accessors ---

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn applicant(&self) -> &Arc<ApplicantIdentity> {
        &self.applicant
    }

    pub fn article(&self) -> &Arc<ArticleContent> {
        &self.article
    }

    pub fn name_match(&self) -> Option<NameMatchResult> {
        self.verdicts.name_match
    }

    pub fn age_match(&self) -> Option<AgeMatch> {
        self.verdicts.age_match
    }

    pub fn detail_verdict(&self) -> Option<DetailVerdict> {
        self.verdicts.detail_verdict
    }

    pub fn sentiment(&self) -> Option<Sentiment> {
        self.verdicts.sentiment
    }

    pub fn final_decision(&self) -> Option<FinalDecision> {
        self.verdicts.final_decision
    }

    pub fn final_explanation(&self) -> Option<&str> {
        self.final_explanation.as_deref()
    }

    pub fn explanation(&self, stage: Stage) -> Option<&str> {
        self.explanations.get(&stage).map(String::as_str)
    }

    pub fn explanations(&self) -> &BTreeMap<Stage, String> {
        &self.explanations
    }

    /// Zero for stages that never consulted the oracle.
    pub fn token_usage(&self, stage: Stage) -> TokenUsage {
        self.token_usage.get(&stage).copied().unwrap_or_default()
    }

    /// Every token billed during the run, including a failed stage's attempts.
    pub fn total_token_usage(&self) -> TokenUsage {
        let failed = self.failure.as_ref().map(|f| f.usage).unwrap_or_default();
        self.token_usage
            .values()
            .fold(failed, |acc, u| acc + *u)
    }

    pub fn stage_llm_invoked(&self, stage: Stage) -> bool {
        self.stage_llm_invoked.get(&stage).copied().unwrap_or(false)
    }

    pub fn stages_run(&self) -> impl Iterator<Item = (Stage, bool)> + '_ {
        self.stage_llm_invoked.iter().map(|(s, b)| (*s, *b))
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        self.failure.as_ref()
    }

    pub fn started_at(&self) -> &str {
        &self.started_at
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.verdicts.clone()
    }

    /// True once a final decision or a stage failure has been recorded.
    pub fn is_frozen(&self) -> bool {
        self.verdicts.final_decision.is_some() || self.failure.is_some()
    }

    // --- verdict setters ---

    fn ensure_open(&self, what: &str) -> Result<()> {
        if self.is_frozen() {
            return Err(ScreeningError::InvariantViolation(format!(
                "cannot set {what}: run already terminated"
            )));
        }
        Ok(())
    }

    pub fn set_name_match(&mut self, result: NameMatchResult) -> Result<()> {
        self.ensure_open("name_match")?;
        if self.verdicts.name_match.is_some() {
            return Err(ScreeningError::InvariantViolation(
                "name_match already set".into(),
            ));
        }
        self.verdicts.name_match = Some(result);
        Ok(())
    }

    pub fn set_age_match(&mut self, age: AgeMatch) -> Result<()> {
        self.ensure_open("age_match")?;
        if self.name_match().map(|n| n.outcome) != Some(NameMatch::Found) {
            return Err(ScreeningError::InvariantViolation(
                "age_match requires name_match = found".into(),
            ));
        }
        if self.verdicts.age_match.is_some() {
            return Err(ScreeningError::InvariantViolation(
                "age_match already set".into(),
            ));
        }
        self.verdicts.age_match = Some(age);
        Ok(())
    }

    pub fn set_detail_verdict(&mut self, verdict: DetailVerdict) -> Result<()> {
        self.ensure_open("detail_verdict")?;
        if self.age_match() != Some(AgeMatch::Matched) {
            return Err(ScreeningError::InvariantViolation(
                "detail_verdict requires age_match = matched".into(),
            ));
        }
        if self.verdicts.detail_verdict.is_some() {
            return Err(ScreeningError::InvariantViolation(
                "detail_verdict already set".into(),
            ));
        }
        self.verdicts.detail_verdict = Some(verdict);
        Ok(())
    }

    pub fn set_sentiment(&mut self, sentiment: Sentiment) -> Result<()> {
        self.ensure_open("sentiment")?;
        if !matches!(
            self.detail_verdict(),
            Some(DetailVerdict::Match) | Some(DetailVerdict::ReviewRequired)
        ) {
            return Err(ScreeningError::InvariantViolation(
                "sentiment requires detail_verdict in {match, review_required}".into(),
            ));
        }
        if self.verdicts.sentiment.is_some() {
            return Err(ScreeningError::InvariantViolation(
                "sentiment already set".into(),
            ));
        }
        self.verdicts.sentiment = Some(sentiment);
        Ok(())
    }

    /// Set exactly once; freezes every verdict field.
    pub fn set_final_decision(
        &mut self,
        decision: FinalDecision,
        explanation: Option<String>,
    ) -> Result<()> {
        self.ensure_open("final_decision")?;
        self.verdicts.final_decision = Some(decision);
        self.final_explanation = explanation;
        Ok(())
    }

    // --- bookkeeping, driven by the accumulator ---

    pub(crate) fn record_explanation(&mut self, stage: Stage, text: String) {
        self.explanations.insert(stage, text);
    }

    pub(crate) fn record_oracle_usage(&mut self, stage: Stage, usage: TokenUsage) {
        self.stage_llm_invoked.insert(stage, true);
        self.token_usage.entry(stage).or_default().accumulate(usage);
    }

    pub(crate) fn record_oracle_skipped(&mut self, stage: Stage) {
        self.stage_llm_invoked.entry(stage).or_insert(false);
    }

    pub(crate) fn push_history(
        &mut self,
        node: &str,
        stage: Option<Stage>,
        kind: TransitionKind,
        next: Option<RouterState>,
    ) {
        let llm_invoked = stage.map_or(false, |s| {
            kind == TransitionKind::Stage && self.stage_llm_invoked(s)
        });
        let entry = HistoryEntry {
            step: self.history.len() + 1,
            node: node.to_string(),
            stage,
            kind,
            llm_invoked,
            next,
            timestamp: chrono::Utc::now().to_rfc3339(),
            snapshot: self.snapshot(),
        };
        self.history.push(entry);
    }

    pub(crate) fn set_failure(&mut self, failure: StageFailure) -> Result<()> {
        self.ensure_open("failure")?;
        self.failure = Some(failure);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn new_state() -> RunState {
        let applicant = ApplicantIdentity::parse("Jane Smith", "1990-05-12").unwrap();
        let article = ArticleContent::new("Jane Smith, 33, opened a bakery.", None).unwrap();
        RunState::new("run-1".into(), Arc::new(applicant), Arc::new(article))
    }

    fn found(provenance: NameMatchProvenance) -> NameMatchResult {
        NameMatchResult {
            outcome: NameMatch::Found,
            provenance,
        }
    }

    #[test]
    fn verdicts_follow_stage_order() {
        let mut state = new_state();
        assert!(state.set_age_match(AgeMatch::Matched).is_err());

        state.set_name_match(found(NameMatchProvenance::Exact)).unwrap();
        assert!(state.set_detail_verdict(DetailVerdict::Match).is_err());

        state.set_age_match(AgeMatch::Matched).unwrap();
        assert!(state.set_sentiment(Sentiment::Neutral).is_err());

        state.set_detail_verdict(DetailVerdict::ReviewRequired).unwrap();
        state.set_sentiment(Sentiment::Neutral).unwrap();
        assert_eq!(state.sentiment(), Some(Sentiment::Neutral));
    }

    #[test]
    fn sentiment_rejected_after_non_match_detail() {
        let mut state = new_state();
        state.set_name_match(found(NameMatchProvenance::PartialLlm)).unwrap();
        state.set_age_match(AgeMatch::Matched).unwrap();
        state.set_detail_verdict(DetailVerdict::NonMatch).unwrap();
        assert!(matches!(
            state.set_sentiment(Sentiment::Negative),
            Err(ScreeningError::InvariantViolation(_))
        ));
    }

    #[test]
    fn verdicts_are_set_once() {
        let mut state = new_state();
        state.set_name_match(found(NameMatchProvenance::Exact)).unwrap();
        assert!(state.set_name_match(found(NameMatchProvenance::Exact)).is_err());
    }

    #[test]
    fn final_decision_set_exactly_once_and_freezes() {
        let mut state = new_state();
        state
            .set_name_match(NameMatchResult {
                outcome: NameMatch::NotFound,
                provenance: NameMatchProvenance::None,
            })
            .unwrap();
        state
            .set_final_decision(FinalDecision::NonMatch, Some("absent".into()))
            .unwrap();
        assert!(state.is_frozen());
        assert!(state
            .set_final_decision(FinalDecision::Match, None)
            .is_err());
        assert_eq!(state.final_decision(), Some(FinalDecision::NonMatch));
        assert_eq!(state.final_explanation(), Some("absent"));
    }

    #[test]
    fn token_usage_zero_unless_invoked() {
        let mut state = new_state();
        state.record_oracle_skipped(Stage::NamePresence);
        assert!(!state.stage_llm_invoked(Stage::NamePresence));
        assert!(state.token_usage(Stage::NamePresence).is_zero());

        state.record_oracle_usage(Stage::AgeVerification, TokenUsage::new(100, 10));
        assert!(state.stage_llm_invoked(Stage::AgeVerification));
        assert_eq!(state.total_token_usage().total(), 110);
    }

    #[test]
    fn history_entries_capture_snapshot() {
        let mut state = new_state();
        state.set_name_match(found(NameMatchProvenance::Exact)).unwrap();
        state.record_oracle_skipped(Stage::NamePresence);
        state.push_history(
            Stage::NamePresence.node(),
            Some(Stage::NamePresence),
            TransitionKind::Skipped,
            Some(RouterState::AgeCheck),
        );
        let entry = &state.history()[0];
        assert_eq!(entry.step, 1);
        assert_eq!(entry.node, "check_name_presence");
        assert!(!entry.llm_invoked);
        assert_eq!(
            entry.snapshot.name_match.map(|n| n.provenance),
            Some(NameMatchProvenance::Exact)
        );
    }

    #[test]
    fn labels_serialize_like_report_vocabulary() {
        assert_eq!(
            serde_json::to_string(&FinalDecision::AgeMismatch).unwrap(),
            "\"Age Mismatch - Needs Verification\""
        );
        assert_eq!(
            serde_json::to_string(&NameMatchProvenance::PartialLlm).unwrap(),
            "\"partial-llm\""
        );
        let d: DetailVerdict = serde_json::from_str("\"review_required\"").unwrap();
        assert_eq!(d, DetailVerdict::ReviewRequired);
        let s: Sentiment = serde_json::from_str("\"negative\"").unwrap();
        assert_eq!(s, Sentiment::Negative);
    }

    #[test]
    fn state_serializes_with_flattened_verdicts() {
        let mut state = new_state();
        state.set_name_match(found(NameMatchProvenance::Exact)).unwrap();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["name_match"]["outcome"], "found");
        assert_eq!(json["applicant"]["full_name"], "Jane Smith");
        assert!(json["final_decision"].is_null());
    }
}
