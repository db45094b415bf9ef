//! Evaluation against a labeled dataset: match accuracy, sentiment accuracy,
//! and breakdowns by scenario and language.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use mediascreen_types::Result;

use crate::engine::ScreeningPipeline;
use crate::state::{FinalDecision, Sentiment};

/// One labeled row of the evaluation dataset.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LabeledCase {
    pub person_name: String,
    pub dob: String,
    pub article_text: String,
    #[serde(default)]
    pub scenario: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub article_title: String,
    #[serde(deserialize_with = "deserialize_flag")]
    pub is_match: bool,
    #[serde(default)]
    pub sentiment_label: String,
}

fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" | "" => Ok(false),
        other => Err(serde::de::Error::custom(format!("invalid is_match value '{other}'"))),
    }
}

pub fn load_labeled_cases(path: &Path) -> Result<Vec<LabeledCase>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_path(path)?;
    let cases = reader
        .deserialize::<LabeledCase>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    tracing::info!(path = %path.display(), cases = cases.len(), "Evaluation dataset loaded");
    Ok(cases)
}

/// Only an outright `Match` counts as a predicted match.
pub fn predicted_match(decision: Option<FinalDecision>) -> bool {
    decision == Some(FinalDecision::Match)
}

/// Canonical sentiment label; missing or `N/A` counts as neutral.
pub fn normalize_sentiment(label: &str) -> Sentiment {
    match label.trim().to_ascii_lowercase().as_str() {
        "positive" => Sentiment::Positive,
        "negative" => Sentiment::Negative,
        _ => Sentiment::Neutral,
    }
}

// ---------------------------------------------------------------------------
// Records and summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRecord {
    pub index: usize,
    pub person_name: String,
    pub scenario: String,
    pub language: String,
    pub article_title: String,
    pub expected_match: bool,
    pub predicted_decision: String,
    pub predicted_match: bool,
    pub match_correct: bool,
    pub expected_sentiment: String,
    pub predicted_sentiment: String,
    /// Only scored when the case is a true match.
    pub sentiment_correct: Option<bool>,
    pub total_tokens: u64,
    pub name_check_skipped: bool,
    pub error: Option<String>,
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupStats {
    pub cases: usize,
    pub match_correct: usize,
}

impl GroupStats {
    pub fn accuracy(&self) -> f64 {
        ratio(self.match_correct, self.cases)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationSummary {
    pub total_cases: usize,
    pub successful: usize,
    pub errors: usize,
    pub match_correct: usize,
    pub sentiment_scored: usize,
    pub sentiment_correct: usize,
    pub total_tokens: u64,
    pub name_checks_skipped: usize,
    pub by_scenario: BTreeMap<String, GroupStats>,
    pub by_language: BTreeMap<String, GroupStats>,
}

impl EvaluationSummary {
    pub fn from_records(records: &[EvaluationRecord]) -> Self {
        let mut summary = EvaluationSummary {
            total_cases: records.len(),
            ..Default::default()
        };
        for r in records {
            if r.error.is_some() {
                summary.errors += 1;
            } else {
                summary.successful += 1;
            }
            summary.match_correct += usize::from(r.match_correct);
            if let Some(correct) = r.sentiment_correct {
                summary.sentiment_scored += 1;
                summary.sentiment_correct += usize::from(correct);
            }
            summary.total_tokens += r.total_tokens;
            summary.name_checks_skipped += usize::from(r.name_check_skipped);

            for (map, key) in [
                (&mut summary.by_scenario, &r.scenario),
                (&mut summary.by_language, &r.language),
            ] {
                let key = if key.is_empty() { "unspecified" } else { key.as_str() };
                let group = map.entry(key.to_string()).or_default();
                group.cases += 1;
                group.match_correct += usize::from(r.match_correct);
            }
        }
        summary
    }

    pub fn match_accuracy(&self) -> f64 {
        ratio(self.match_correct, self.total_cases)
    }

    pub fn sentiment_accuracy(&self) -> f64 {
        ratio(self.sentiment_correct, self.sentiment_scored)
    }

    pub fn average_tokens(&self) -> f64 {
        if self.successful == 0 {
            0.0
        } else {
            self.total_tokens as f64 / self.successful as f64
        }
    }
}

fn ratio(n: usize, d: usize) -> f64 {
    if d == 0 {
        0.0
    } else {
        n as f64 / d as f64
    }
}

// ---------------------------------------------------------------------------
// evaluate
// ---------------------------------------------------------------------------

/// Screen every labeled case in order and score the results.
pub async fn evaluate(
    pipeline: &ScreeningPipeline,
    cases: &[LabeledCase],
) -> (Vec<EvaluationRecord>, EvaluationSummary) {
    let mut records = Vec::with_capacity(cases.len());
    for (index, case) in cases.iter().enumerate() {
        let expected_sentiment = normalize_sentiment(&case.sentiment_label);
        let mut record = EvaluationRecord {
            index,
            person_name: case.person_name.clone(),
            scenario: case.scenario.clone(),
            language: case.language.clone(),
            article_title: case.article_title.clone(),
            expected_match: case.is_match,
            predicted_decision: "Error".into(),
            predicted_match: false,
            match_correct: false,
            expected_sentiment: expected_sentiment.to_string(),
            predicted_sentiment: "N/A".into(),
            sentiment_correct: None,
            total_tokens: 0,
            name_check_skipped: false,
            error: None,
            run_id: None,
        };

        match pipeline
            .screen_raw(&case.person_name, &case.dob, &case.article_text)
            .await
        {
            Ok(report) => {
                record.run_id = Some(report.run_id.clone());
                record.total_tokens = report.summary.total_tokens.total();
                record.name_check_skipped = report.summary.name_check_skipped;
                record.predicted_decision = report.decision_label().to_string();
                record.predicted_sentiment = report.sentiment_label().to_string();
                if let crate::accumulator::RunOutcome::Error { message, .. } = &report.outcome {
                    record.error = Some(message.clone());
                } else {
                    record.predicted_match = predicted_match(report.outcome.decision());
                    record.match_correct = record.predicted_match == case.is_match;
                    if case.is_match {
                        let predicted = normalize_sentiment(report.sentiment_label());
                        record.sentiment_correct = Some(predicted == expected_sentiment);
                    }
                }
            }
            Err(e) => record.error = Some(e.to_string()),
        }

        tracing::info!(
            case = index,
            decision = %record.predicted_decision,
            correct = record.match_correct,
            "Evaluation case scored"
        );
        records.push(record);
    }

    let summary = EvaluationSummary::from_records(&records);
    (records, summary)
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

pub fn write_detailed_csv(records: &[EvaluationRecord], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Rows that errored, with their error messages.
pub fn write_errors_csv(records: &[EvaluationRecord], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["index", "person_name", "scenario", "language", "error"])?;
    for r in records {
        if let Some(error) = &r.error {
            writer.write_record([
                r.index.to_string().as_str(),
                r.person_name.as_str(),
                r.scenario.as_str(),
                r.language.as_str(),
                error.as_str(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn render_summary(summary: &EvaluationSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Adverse media screening evaluation");
    let _ = writeln!(out, "==================================");
    let _ = writeln!(out, "Total cases:          {}", summary.total_cases);
    let _ = writeln!(out, "Successful:           {}", summary.successful);
    let _ = writeln!(out, "Errors:               {}", summary.errors);
    let _ = writeln!(
        out,
        "Match accuracy:       {:.2}% ({}/{})",
        summary.match_accuracy() * 100.0,
        summary.match_correct,
        summary.total_cases
    );
    let _ = writeln!(
        out,
        "Sentiment accuracy:   {:.2}% ({}/{} true matches)",
        summary.sentiment_accuracy() * 100.0,
        summary.sentiment_correct,
        summary.sentiment_scored
    );
    let _ = writeln!(out, "Total tokens:         {}", summary.total_tokens);
    let _ = writeln!(out, "Average tokens/case:  {:.1}", summary.average_tokens());
    let _ = writeln!(out, "Name checks skipped:  {}", summary.name_checks_skipped);

    for (title, groups) in [("By scenario", &summary.by_scenario), ("By language", &summary.by_language)] {
        let _ = writeln!(out, "\n{title}:");
        for (key, stats) in groups {
            let _ = writeln!(
                out,
                "  {key}: {:.2}% ({}/{})",
                stats.accuracy() * 100.0,
                stats.match_correct,
                stats.cases
            );
        }
    }
    out
}

pub async fn write_summary_report(summary: &EvaluationSummary, path: &Path) -> Result<()> {
    tokio::fs::write(path, render_summary(summary)).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
