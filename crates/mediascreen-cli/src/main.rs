//! CLI binary for adverse-media screening runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use mediascreen_llm::{LlmClient, UsageMeter};
use mediascreen_pipeline::{
    acquire, describe_transitions, evaluate, load_cases, load_labeled_cases, render_summary,
    save_run_artifacts, write_detailed_csv, write_errors_csv, write_summary_report, ArticleSource,
    BatchDriver, BatchResult, BatchSummary, DecisionOracle, HttpFetcher, LlmOracle, RunOutcome,
    RunReport, ScreeningConfig, ScreeningEvent, ScreeningPipeline,
};

#[derive(Parser)]
#[command(name = "mediascreen", version, about = "Adverse-media screening for applicant onboarding")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args, Clone)]
struct CommonOpts {
    /// JSON config file; omitted fields keep their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model used for every oracle call
    #[arg(long)]
    model: Option<String>,

    /// Provider name (google, openai); resolved from the model when omitted
    #[arg(long)]
    provider: Option<String>,

    /// Always ask the model about name presence
    #[arg(long)]
    no_prefilter: bool,

    /// Reference date for age computation (YYYY-MM-DD, default: today)
    #[arg(long)]
    as_of: Option<NaiveDate>,

    /// Directory for per-run artifacts (not written when omitted)
    #[arg(long)]
    artifacts: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Screen one applicant against one article
    Screen {
        /// Applicant full name
        #[arg(long)]
        name: String,

        /// Applicant date of birth
        #[arg(long)]
        dob: String,

        /// Article text or URL
        #[arg(long, conflicts_with = "article_file")]
        article: Option<String>,

        /// Read the article text from a file
        #[arg(long)]
        article_file: Option<PathBuf>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        common: CommonOpts,
    },

    /// Screen every row of a CSV file (name, dob, url/article columns)
    Batch {
        /// Path to the input CSV
        #[arg(short = 'f', long = "file")]
        input: PathBuf,

        /// Maximum concurrent runs
        #[arg(long)]
        concurrency: Option<usize>,

        /// Pause between submissions in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Write the batch summary as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        common: CommonOpts,
    },

    /// Score the pipeline against a labeled CSV dataset
    Evaluate {
        /// Path to the labeled CSV
        #[arg(short, long)]
        dataset: PathBuf,

        /// Directory for the detailed, error and summary reports
        #[arg(short, long, default_value = "evaluation_results")]
        output_dir: PathBuf,

        #[command(flatten)]
        common: CommonOpts,
    },

    /// Print the decision graph as a transition table
    Graph,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    match cli.command {
        Commands::Screen {
            name,
            dob,
            article,
            article_file,
            json,
            common,
        } => {
            cmd_screen(&name, &dob, article, article_file.as_deref(), json, &common).await?;
        }
        Commands::Batch {
            input,
            concurrency,
            delay_ms,
            output,
            common,
        } => {
            cmd_batch(&input, concurrency, delay_ms, output.as_deref(), &common).await?;
        }
        Commands::Evaluate {
            dataset,
            output_dir,
            common,
        } => {
            cmd_evaluate(&dataset, &output_dir, &common).await?;
        }
        Commands::Graph => {
            print!("{}", describe_transitions());
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

async fn load_config(common: &CommonOpts) -> anyhow::Result<ScreeningConfig> {
    let mut config = match &common.config {
        Some(path) => ScreeningConfig::load(path).await?,
        None => ScreeningConfig::default(),
    };
    if let Some(model) = &common.model {
        config.oracle.model = model.clone();
    }
    if common.provider.is_some() {
        config.oracle.provider = common.provider.clone();
    }
    if common.no_prefilter {
        config.name_match.prefilter = false;
    }
    if common.as_of.is_some() {
        config.as_of = common.as_of;
    }
    config.validate()?;
    Ok(config)
}

/// Pipeline backed by every provider with an API key in the environment.
fn build_pipeline(config: &ScreeningConfig) -> anyhow::Result<(ScreeningPipeline, UsageMeter)> {
    let meter = UsageMeter::new();
    let client = LlmClient::from_env()?.with_usage_meter(meter.clone());
    tracing::debug!(
        providers = ?client.provider_names(),
        model = %config.oracle.model,
        "LLM client ready"
    );
    let oracle: Arc<dyn DecisionOracle> = Arc::new(LlmOracle::from_config(Arc::new(client), config));
    Ok((ScreeningPipeline::new(oracle, config), meter))
}

/// Print stage progress as events arrive.
fn spawn_progress(pipeline: &ScreeningPipeline) {
    let mut rx = pipeline.events().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                ScreeningEvent::StageSkipped { stage, tier, .. } => {
                    println!("  [{stage}] settled by name prefilter ({tier:?})");
                }
                ScreeningEvent::StageCompleted {
                    stage,
                    verdict,
                    duration_ms,
                    ..
                } => {
                    println!("  [{stage}] {verdict} ({duration_ms} ms)");
                }
                ScreeningEvent::StageFailed {
                    stage,
                    reason,
                    attempts,
                    ..
                } => {
                    println!("  [{stage}] FAILED: {reason} after {attempts} attempt(s)");
                }
                _ => {}
            }
        }
    });
}

fn print_usage(meter: &UsageMeter, config: &ScreeningConfig) {
    let usage = meter.totals();
    println!(
        "Tokens: {} in / {} out over {} call(s)",
        usage.prompt_tokens,
        usage.completion_tokens,
        meter.calls()
    );
    if let Some(pricing) = config.pricing() {
        let usd = pricing.estimate_cost_usd(usage);
        println!("Estimated cost: ${:.4}", usd);
    }
}

async fn persist(report: &RunReport, artifacts: Option<&Path>) -> anyhow::Result<()> {
    if let Some(root) = artifacts {
        let dir = save_run_artifacts(report, root).await?;
        println!("Artifacts: {}", dir.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_screen(
    name: &str,
    dob: &str,
    article: Option<String>,
    article_file: Option<&Path>,
    json: bool,
    common: &CommonOpts,
) -> anyhow::Result<()> {
    let config = load_config(common).await?;

    let source = match (article, article_file) {
        (Some(article), _) => ArticleSource::parse(&article),
        (None, Some(path)) => ArticleSource::Text(tokio::fs::read_to_string(path).await?),
        (None, None) => anyhow::bail!("Must specify either --article or --article-file"),
    };
    let applicant = mediascreen_pipeline::ApplicantIdentity::parse(name, dob)?;
    let fetcher = HttpFetcher::new(&config.acquisition)?;
    let article = acquire(&source, &fetcher).await?;

    let (pipeline, meter) = build_pipeline(&config)?;
    if !json {
        println!("Screening: {} (born {})", applicant.full_name(), applicant.date_of_birth());
        println!("Model: {}", config.oracle.model);
        spawn_progress(&pipeline);
    }

    let report = pipeline.screen(applicant, article).await?;
    persist(&report, common.artifacts.as_deref()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("\nDecision: {}", report.decision_label());
        println!("Sentiment: {}", report.sentiment_label());
        if let Some(explanation) = report.state.final_explanation() {
            println!("Explanation: {}", explanation);
        }
        println!(
            "Oracle calls: {}/{}",
            report.summary.oracle_calls, report.summary.possible_oracle_calls
        );
        print_usage(&meter, &config);
    }

    if let RunOutcome::Error { node, message, .. } = &report.outcome {
        eprintln!("Run failed at {}: {}", node, message);
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_batch(
    input: &Path,
    concurrency: Option<usize>,
    delay_ms: Option<u64>,
    output: Option<&Path>,
    common: &CommonOpts,
) -> anyhow::Result<()> {
    let mut config = load_config(common).await?;
    if let Some(n) = concurrency {
        config.batch.concurrency = n;
    }
    if let Some(ms) = delay_ms {
        config.batch.delay_ms = ms;
    }
    config.validate()?;

    let cases = load_cases(input)?;
    println!("Batch: {} case(s) from {}", cases.len(), input.display());

    let (pipeline, meter) = build_pipeline(&config)?;
    let fetcher = Arc::new(HttpFetcher::new(&config.acquisition)?);
    let driver = BatchDriver::new(Arc::new(pipeline), fetcher, &config.batch);
    let rows = driver.run(cases).await;

    for row in &rows {
        match &row.result {
            BatchResult::Completed(report) => {
                println!(
                    "{:>4}  {:<30} {:<34} {}",
                    row.row,
                    row.name,
                    report.decision_label(),
                    report.sentiment_label()
                );
                persist(report, common.artifacts.as_deref()).await?;
            }
            BatchResult::Rejected { reason } => {
                println!("{:>4}  {:<30} Rejected: {}", row.row, row.name, reason);
            }
        }
    }

    let summary = BatchSummary::from_rows(&rows);
    println!("\nTotal: {}", summary.total);
    for (label, count) in &summary.by_outcome {
        println!("  {}: {}", label, count);
    }
    println!("  Rejected: {}", summary.rejected);
    println!("Name checks settled without the model: {}", summary.name_checks_skipped);
    print_usage(&meter, &config);

    if let Some(path) = output {
        tokio::fs::write(path, serde_json::to_string_pretty(&summary)?).await?;
        println!("Summary: {}", path.display());
    }
    Ok(())
}

async fn cmd_evaluate(dataset: &Path, output_dir: &Path, common: &CommonOpts) -> anyhow::Result<()> {
    let config = load_config(common).await?;
    let cases = load_labeled_cases(dataset)?;
    println!("Evaluating {} labeled case(s) with {}", cases.len(), config.oracle.model);

    let (pipeline, meter) = build_pipeline(&config)?;
    let (records, summary) = evaluate(&pipeline, &cases).await;

    tokio::fs::create_dir_all(output_dir).await?;
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let detailed = output_dir.join(format!("detailed_results_{stamp}.csv"));
    let report = output_dir.join(format!("summary_report_{stamp}.txt"));
    write_detailed_csv(&records, &detailed)?;
    write_summary_report(&summary, &report).await?;
    if summary.errors > 0 {
        let errors = output_dir.join(format!("errors_{stamp}.csv"));
        write_errors_csv(&records, &errors)?;
        println!("Errors: {}", errors.display());
    }

    println!("\n{}", render_summary(&summary));
    print_usage(&meter, &config);
    println!("Detailed results: {}", detailed.display());
    println!("Summary report: {}", report.display());
    Ok(())
}
