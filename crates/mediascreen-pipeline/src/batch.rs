//! CSV batch screening: one independent run per row, bounded concurrency.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use mediascreen_types::{Result, TokenUsage};

use crate::accumulator::RunReport;
use crate::acquisition::{acquire, ArticleFetcher, ArticleSource};
use crate::config::BatchConfig;
use crate::engine::ScreeningPipeline;
use crate::identity::ApplicantIdentity;

/// One input row. Fields stay raw until the row is screened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreeningCase {
    /// 1-based data row number.
    pub row: usize,
    pub name: String,
    pub dob: String,
    /// Article text or a URL.
    pub article: String,
}

#[derive(Debug, Deserialize)]
struct CaseRecord {
    #[serde(alias = "person_name", alias = "full_name", default)]
    name: String,
    #[serde(alias = "date_of_birth", default)]
    dob: String,
    #[serde(alias = "url", alias = "article_url", alias = "article_text", alias = "text", default)]
    article: String,
}

/// Read cases from a CSV file with a header row.
pub fn load_cases(path: &Path) -> Result<Vec<ScreeningCase>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_path(path)?;
    let mut cases = Vec::new();
    for (i, record) in reader.deserialize::<CaseRecord>().enumerate() {
        let record = record?;
        cases.push(ScreeningCase {
            row: i + 1,
            name: record.name,
            dob: record.dob,
            article: record.article,
        });
    }
    tracing::info!(path = %path.display(), rows = cases.len(), "Batch cases loaded");
    Ok(cases)
}

#[derive(Debug, Clone)]
pub enum BatchResult {
    Completed(Box<RunReport>),
    /// The row never reached the pipeline: bad input or an unfetchable article.
    Rejected { reason: String },
}

#[derive(Debug, Clone)]
pub struct BatchRow {
    pub row: usize,
    pub name: String,
    pub result: BatchResult,
}

impl BatchRow {
    pub fn label(&self) -> &str {
        match &self.result {
            BatchResult::Completed(report) => report.decision_label(),
            BatchResult::Rejected { .. } => "Rejected",
        }
    }

    pub fn report(&self) -> Option<&RunReport> {
        match &self.result {
            BatchResult::Completed(report) => Some(report.as_ref()),
            BatchResult::Rejected { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// BatchDriver
// ---------------------------------------------------------------------------

pub struct BatchDriver {
    pipeline: Arc<ScreeningPipeline>,
    fetcher: Arc<dyn ArticleFetcher>,
    concurrency: usize,
    delay: Duration,
}

impl BatchDriver {
    pub fn new(pipeline: Arc<ScreeningPipeline>, fetcher: Arc<dyn ArticleFetcher>, config: &BatchConfig) -> Self {
        Self {
            pipeline,
            fetcher,
            concurrency: config.concurrency.max(1),
            delay: Duration::from_millis(config.delay_ms),
        }
    }

    /// Screen every case; the output keeps input order.
    pub async fn run(&self, cases: Vec<ScreeningCase>) -> Vec<BatchRow> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let total = cases.len();
        let mut handles = Vec::with_capacity(total);

        for (i, case) in cases.into_iter().enumerate() {
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let pipeline = self.pipeline.clone();
            let fetcher = self.fetcher.clone();
            tracing::debug!(row = case.row, total, "Submitting case");
            handles.push((
                case.row,
                case.name.clone(),
                tokio::spawn(async move {
                    let result = screen_case(&pipeline, fetcher.as_ref(), &case).await;
                    drop(permit);
                    result
                }),
            ));
        }

        let mut rows = Vec::with_capacity(handles.len());
        for (row, name, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => BatchResult::Rejected {
                    reason: format!("task failed: {e}"),
                },
            };
            rows.push(BatchRow { row, name, result });
        }
        rows
    }
}

async fn screen_case(pipeline: &ScreeningPipeline, fetcher: &dyn ArticleFetcher, case: &ScreeningCase) -> BatchResult {
    let prepared = async {
        let applicant = ApplicantIdentity::parse(&case.name, &case.dob)?;
        let article = acquire(&ArticleSource::parse(&case.article), fetcher).await?;
        Ok::<_, mediascreen_types::ScreeningError>((applicant, article))
    }
    .await;

    let (applicant, article) = match prepared {
        Ok(inputs) => inputs,
        Err(e) => {
            tracing::warn!(row = case.row, error = %e, "Case rejected");
            return BatchResult::Rejected { reason: e.to_string() };
        }
    };

    match pipeline.screen(applicant, article).await {
        Ok(report) => BatchResult::Completed(Box::new(report)),
        Err(e) => BatchResult::Rejected { reason: e.to_string() },
    }
}

// ---------------------------------------------------------------------------
// BatchSummary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    /// Count per outcome label, including `Error`.
    pub by_outcome: BTreeMap<String, usize>,
    pub rejected: usize,
    pub errors: usize,
    pub oracle_calls: usize,
    pub name_checks_skipped: usize,
    pub total_tokens: TokenUsage,
    pub estimated_cost_usd: Option<f64>,
}

impl BatchSummary {
    pub fn from_rows(rows: &[BatchRow]) -> Self {
        let mut summary = BatchSummary {
            total: rows.len(),
            ..Default::default()
        };
        for row in rows {
            let Some(report) = row.report() else {
                summary.rejected += 1;
                continue;
            };
            *summary
                .by_outcome
                .entry(report.decision_label().to_string())
                .or_default() += 1;
            if report.outcome.is_error() {
                summary.errors += 1;
            }
            summary.oracle_calls += report.summary.oracle_calls;
            if report.summary.name_check_skipped {
                summary.name_checks_skipped += 1;
            }
            summary.total_tokens.accumulate(report.summary.total_tokens);
            if let Some(cost) = report.summary.estimated_cost_usd {
                *summary.estimated_cost_usd.get_or_insert(0.0) += cost;
            }
        }
        summary
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
