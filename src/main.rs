use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Weekday;
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod analyzer;
mod budget;
mod chain;
mod chart;
mod config;
mod db;
mod error;
mod metrics;
mod models;
mod narrative;
mod publish;
mod records;
mod report;
mod store;

use budget::StatusBudget;
use chain::PostChain;
use chart::ChartWindow;
use config::{BotConfig, FailurePolicy};
use narrative::{format_number, DATE_FORMAT};
use publish::{ChartRenderer, HttpPostClient, PostClient, QuickChartRenderer};
use store::{parse_csv, DailyRecordStore};

#[derive(Parser)]
#[command(name = "bulletin-bot")]
#[command(about = "Daily pandemic bulletin: analyses the record store and posts chart threads", long_about = None)]
struct Cli {
    /// JSON file replacing the built-in metric definitions
    #[arg(long, global = true)]
    metrics: Option<PathBuf>,
    /// Weekday on which weekly totals are computed and posted
    #[arg(long, global = true, default_value = "sun", value_parser = config::parse_weekday)]
    week_boundary: Weekday,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Merge daily records from a CSV file into the database
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Print the derived series of one metric
    #[command(group(
        ArgGroup::new("source")
            .args(["json", "csv"])
            .multiple(false)
    ))]
    Analyze {
        #[arg(long)]
        metric: String,
        #[arg(long)]
        json: Option<PathBuf>,
        #[arg(long)]
        csv: Option<PathBuf>,
        /// CSV of late corrections merged over the loaded records
        #[arg(long)]
        update: Option<PathBuf>,
        #[arg(long, default_value_t = 14)]
        days: usize,
    },
    /// Generate a markdown bulletin
    #[command(group(
        ArgGroup::new("source")
            .args(["json", "csv"])
            .multiple(false)
    ))]
    Report {
        #[arg(long)]
        json: Option<PathBuf>,
        #[arg(long)]
        csv: Option<PathBuf>,
        /// CSV of late corrections merged over the loaded records
        #[arg(long)]
        update: Option<PathBuf>,
        #[arg(long, default_value = "bulletin.md")]
        out: PathBuf,
    },
    /// Post the chart thread of each metric
    #[command(group(
        ArgGroup::new("source")
            .args(["json", "csv"])
            .multiple(false)
    ))]
    Post {
        /// Metrics to post; all of them when omitted
        #[arg(long = "metric")]
        metric: Vec<String>,
        #[arg(long)]
        json: Option<PathBuf>,
        #[arg(long)]
        csv: Option<PathBuf>,
        /// CSV of late corrections merged over the loaded records
        #[arg(long)]
        update: Option<PathBuf>,
        /// Walk every chain without calling the chart service or the status API
        #[arg(long, env = "BULLETIN_DRY_RUN")]
        dry_run: bool,
        /// Post even if this data date was already posted
        #[arg(long)]
        force: bool,
        #[arg(long, default_value_t = budget::STATUS_LIMIT)]
        status_limit: usize,
        #[arg(long, env = "BULLETIN_HASHTAG")]
        hashtag: Option<String>,
        #[arg(long, env = "BULLETIN_LINK")]
        link: Option<String>,
        #[arg(long, value_enum, default_value_t = FailurePolicy::DegradeAndContinue)]
        on_post_error: FailurePolicy,
        #[arg(long, default_value_t = 30)]
        post_timeout_secs: u64,
        #[arg(long, default_value_t = 90)]
        chart_days: usize,
        #[arg(long, default_value_t = 26)]
        chart_weeks: usize,
        #[arg(long, env = "CHART_SERVICE_URL", default_value = config::DEFAULT_CHART_SERVICE)]
        chart_service: String,
        #[arg(long, env = "STATUS_API_URL", required_unless_present = "dry_run")]
        status_api_url: Option<String>,
        #[arg(long, env = "STATUS_API_TOKEN", hide_env_values = true, required_unless_present = "dry_run")]
        status_api_token: Option<String>,
    },
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set when no --json or --csv file is given")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

/// Records come from a file when one is given, otherwise from Postgres.
async fn load_store(
    json: Option<&Path>,
    csv: Option<&Path>,
    update: Option<&Path>,
) -> anyhow::Result<(DailyRecordStore, Option<PgPool>)> {
    let (mut store, pool) = match (json, csv) {
        (Some(path), _) => {
            let store = DailyRecordStore::load_json(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            (store, None)
        }
        (None, Some(path)) => {
            let store = DailyRecordStore::load_csv(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            (store, None)
        }
        (None, None) => {
            let pool = connect().await?;
            let store = db::fetch_records(&pool).await?;
            (store, Some(pool))
        }
    };

    if let Some(path) = update {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let updates = parse_csv(&mut reader)
            .with_context(|| format!("failed to load {}", path.display()))?;
        store.merge(updates);
    }

    if store.is_empty() {
        warn!("no daily records found");
    }
    info!(
        days = store.len(),
        latest = ?store.latest().map(|record| record.date),
        "records loaded"
    );
    Ok((store, pool))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let definitions = metrics::load(cli.metrics.as_deref())?;

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Import { csv } => {
            let pool = connect().await?;
            let changed = db::import_csv(&pool, &csv).await?;
            println!("Merged {changed} days from {}.", csv.display());
        }
        Commands::Analyze {
            metric,
            json,
            csv,
            update,
            days,
        } => {
            let (store, _) = load_store(json.as_deref(), csv.as_deref(), update.as_deref()).await?;
            let definition = metrics::select(&definitions, std::slice::from_ref(&metric))?[0];
            let series = analyzer::analyze(store.records(), definition, cli.week_boundary)?;

            println!("{} ({} days of data)", series.label, series.points.len());
            let start = series.points.len().saturating_sub(days);
            for point in &series.points[start..] {
                let optional = |value: Option<f64>, decimals| {
                    value.map_or_else(|| "-".to_string(), |v| format_number(v, decimals))
                };
                println!(
                    "{}  value {:>10}  avg {:>10}  weekly {:>10}  total {:>12}",
                    point.date.format(DATE_FORMAT),
                    format_number(point.value, 0),
                    optional(point.seven_day_average, 2),
                    optional(point.weekly_total, 0),
                    optional(point.running_total, 0),
                );
            }

            let summary = report::summarize(definition, &series)?;
            for callout in &summary.callouts {
                println!("* {callout}");
            }
        }
        Commands::Report {
            json,
            csv,
            update,
            out,
        } => {
            let (store, _) = load_store(json.as_deref(), csv.as_deref(), update.as_deref()).await?;
            let mut summaries = Vec::new();
            let mut unavailable = Vec::new();

            for definition in &definitions {
                let summary = analyzer::analyze(store.records(), definition, cli.week_boundary)
                    .and_then(|series| report::summarize(definition, &series));
                match summary {
                    Ok(summary) => summaries.push(summary),
                    Err(err) => {
                        warn!(metric = %definition.name, error = %err, "metric unavailable");
                        unavailable.push((definition.name.clone(), err.to_string()));
                    }
                }
            }

            let report = report::build_report(&summaries, &unavailable);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Post {
            metric,
            json,
            csv,
            update,
            dry_run,
            force,
            status_limit,
            hashtag,
            link,
            on_post_error,
            post_timeout_secs,
            chart_days,
            chart_weeks,
            chart_service,
            status_api_url,
            status_api_token,
        } => {
            let (store, pool) =
                load_store(json.as_deref(), csv.as_deref(), update.as_deref()).await?;
            let selected = metrics::select(&definitions, &metric)?;
            let mut failed = 0usize;

            let mut runs = Vec::new();
            for definition in selected {
                let series =
                    match analyzer::analyze(store.records(), definition, cli.week_boundary) {
                        Ok(series) => series,
                        Err(err) => {
                            error!(metric = %definition.name, error = %err, "cannot analyse metric");
                            failed += 1;
                            continue;
                        }
                    };

                if let (Some(pool), Some(latest)) = (&pool, series.latest()) {
                    if !force && !dry_run && db::already_posted(pool, &definition.name, latest.date).await? {
                        info!(metric = %definition.name, date = %latest.date, "already posted");
                        continue;
                    }
                }
                runs.push((definition, series));
            }

            let config = BotConfig {
                budget: StatusBudget::new(status_limit, hashtag),
                link,
                failure_policy: on_post_error,
                post_timeout: Duration::from_secs(post_timeout_secs),
                dry_run,
                chart_window: ChartWindow {
                    days: chart_days,
                    weeks: chart_weeks,
                },
                ..BotConfig::default()
            };
            let renderer: Arc<dyn ChartRenderer> = Arc::new(QuickChartRenderer::new(chart_service));
            // dry runs never reach the client, so missing credentials are fine there
            let client: Arc<dyn PostClient> = Arc::new(HttpPostClient::new(
                status_api_url.unwrap_or_default(),
                status_api_token.unwrap_or_default(),
            ));
            let chain = PostChain::new(config, renderer, client);

            let results = futures::future::join_all(
                runs.iter()
                    .map(|(definition, series)| chain.run(definition, series)),
            )
            .await;

            for ((definition, _), result) in runs.iter().zip(results) {
                match result {
                    Ok(report) => {
                        println!(
                            "{}: {} posts for {} ({} failed)",
                            report.metric,
                            report.posts.len(),
                            report.data_date.format(DATE_FORMAT),
                            report.failures
                        );
                        if dry_run {
                            for post in &report.posts {
                                println!("--- {} [{}]\n{}", post.step, post.post_id, post.text);
                            }
                        } else if let Some(pool) = &pool {
                            if report.is_complete() {
                                db::record_run(pool, &report).await?;
                            } else {
                                warn!(
                                    metric = %report.metric,
                                    failures = report.failures,
                                    "incomplete run not recorded, next run retries it"
                                );
                            }
                        }
                    }
                    Err(err) => {
                        error!(metric = %definition.name, error = %err, "chain failed");
                        failed += 1;
                    }
                }
            }

            if failed > 0 {
                anyhow::bail!("{failed} metric(s) failed");
            }
        }
    }

    Ok(())
}
