//! Per-run artifact persistence.
//!
//! Every run gets its own directory under the artifacts root:
//!
//! ```text
//! <root>/<run_id>/
//!     step_01_check_name_presence_state.json
//!     ...
//!     run_state_history.json      (partial_state_history.json when failed)
//!     final_state.json
//!     article_text.txt
//!     tags.json
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use mediascreen_types::Result;

use crate::accumulator::RunReport;

/// Searchable labels attached to a stored run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTags {
    pub run_name: String,
    pub match_decision: String,
    pub sentiment: String,
    /// `COMPLETED` or `FAILED`.
    pub status: String,
    pub applicant: String,
    pub date_of_birth: String,
    pub article_source: Option<String>,
}

impl RunTags {
    pub fn from_report(report: &RunReport) -> Self {
        let applicant = report.state.applicant();
        Self {
            run_name: report.run_name.clone(),
            match_decision: report.decision_label().to_string(),
            sentiment: report.sentiment_label().to_string(),
            status: if report.outcome.is_error() { "FAILED" } else { "COMPLETED" }.to_string(),
            applicant: applicant.full_name().to_string(),
            date_of_birth: applicant.date_of_birth().format("%Y-%m-%d").to_string(),
            article_source: report.state.article().source().map(String::from),
        }
    }
}

/// Write every artifact for `report` and return the run directory.
pub async fn save_run_artifacts(report: &RunReport, root: &Path) -> Result<PathBuf> {
    let dir = root.join(&report.run_id);
    tokio::fs::create_dir_all(&dir).await?;

    for entry in report.state.history() {
        let path = dir.join(format!("step_{:02}_{}_state.json", entry.step, entry.node));
        tokio::fs::write(&path, serde_json::to_string_pretty(entry)?).await?;
    }

    let history_file = if report.outcome.is_error() {
        "partial_state_history.json"
    } else {
        "run_state_history.json"
    };
    tokio::fs::write(
        dir.join(history_file),
        serde_json::to_string_pretty(report.state.history())?,
    )
    .await?;

    tokio::fs::write(dir.join("final_state.json"), serde_json::to_string_pretty(report)?).await?;
    tokio::fs::write(dir.join("article_text.txt"), report.state.article().text()).await?;
    tokio::fs::write(
        dir.join("tags.json"),
        serde_json::to_string_pretty(&RunTags::from_report(report))?,
    )
    .await?;

    tracing::debug!(path = %dir.display(), steps = report.state.history().len(), "Run artifacts saved");
    Ok(dir)
}

/// Read back the tags of a stored run.
pub async fn load_tags(run_dir: &Path) -> Result<RunTags> {
    let json = tokio::fs::read_to_string(run_dir.join("tags.json")).await?;
    Ok(serde_json::from_str(&json)?)
}

/// Read back the final report of a stored run as raw JSON.
pub async fn load_final_state(run_dir: &Path) -> Result<serde_json::Value> {
    let json = tokio::fs::read_to_string(run_dir.join("final_state.json")).await?;
    Ok(serde_json::from_str(&json)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
