use std::fmt::Display;
use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use churn_insights::aggregate::{self, AggregationResult};
use churn_insights::config::{AnalyticsConfig, ScorePolicy};
use churn_insights::playbook::{self, STANDARD_PLAYBOOK};
use churn_insights::report::{self, format_rate, OrderBy};
use churn_insights::risk::RiskThresholds;
use churn_insights::{db, source, IngestionError, RawRow, RecordStore};

#[derive(Parser)]
#[command(name = "churn-insights")]
#[command(
    about = "Churn segmentation and retention playbook for scored telecom customers",
    long_about = None
)]
struct Cli {
    /// JSON file with analytics settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    high_threshold: Option<f64>,
    #[arg(long, global = true)]
    medium_threshold: Option<f64>,
    /// What to do with risk scores outside [0, 1]
    #[arg(long, global = true, value_enum)]
    score_policy: Option<ScorePolicy>,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
#[command(group(
    ArgGroup::new("source")
        .args(["csv", "db"])
        .required(true)
        .multiple(false)
))]
struct SourceArgs {
    /// Scored customer CSV export
    #[arg(long)]
    csv: Option<PathBuf>,
    /// Read rows staged in Postgres (DATABASE_URL)
    #[arg(long)]
    db: bool,
    /// Only customers from this state (Postgres source)
    #[arg(long, requires = "db")]
    state: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Segment {
    ServiceCalls,
    IntlPlan,
    VmPlan,
    PlanType,
    State,
    RiskCategory,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Markdown,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Stage rows from a scored CSV export in Postgres
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Headline churn metrics
    Summary {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long)]
        json: bool,
    },
    /// Churn rate per segment
    Segments {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long, value_enum, default_value_t = Segment::ServiceCalls)]
        by: Segment,
        /// Aggregate on this many threads
        #[arg(long, default_value_t = 1)]
        shards: usize,
    },
    /// Highest risk customers
    TopRisk {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, value_enum, default_value_t = OrderBy::Score)]
        order_by: OrderBy,
    },
    /// Retention actions for one customer, or per risk cohort
    Recommend {
        #[command(flatten)]
        source: SourceArgs,
        /// Source row of the customer
        #[arg(long)]
        row: Option<usize>,
    },
    /// Write the full dashboard report
    Report {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long, value_enum, default_value_t = Format::Markdown)]
        format: Format,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config(cli: &Cli) -> anyhow::Result<AnalyticsConfig> {
    let mut config = match &cli.config {
        Some(path) => AnalyticsConfig::from_file(path)
            .with_context(|| format!("invalid config {}", path.display()))?,
        None => AnalyticsConfig::default(),
    };

    if cli.high_threshold.is_some() || cli.medium_threshold.is_some() {
        config.risk = RiskThresholds::new(
            cli.high_threshold.unwrap_or(config.risk.high_threshold),
            cli.medium_threshold.unwrap_or(config.risk.medium_threshold),
        )?;
    }
    if let Some(policy) = cli.score_policy {
        config.score_policy = policy;
    }
    config.validate()?;
    Ok(config)
}

async fn pool_from_env() -> anyhow::Result<sqlx::PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;
    db::connect(&database_url).await
}

async fn load_store(
    args: &SourceArgs,
    config: &AnalyticsConfig,
) -> anyhow::Result<(RecordStore, String)> {
    let (rows, label) = match &args.csv {
        Some(path) => (source::read_csv(path)?, path.display().to_string()),
        None => {
            let pool = pool_from_env().await?;
            let rows = db::fetch_rows(&pool, args.state.as_deref()).await?;
            let imported = db::last_import(&pool)
                .await?
                .map(|at| format!(", imported {}", at.format("%Y-%m-%d %H:%M UTC")))
                .unwrap_or_default();
            let scope = args.state.as_deref().unwrap_or("all states");
            let rows: Vec<Result<RawRow, IngestionError>> = rows.into_iter().map(Ok).collect();
            (rows, format!("Postgres staging ({scope}{imported})"))
        }
    };
    Ok((RecordStore::load_results(rows, config.score_policy), label))
}

fn print_groups<K: Display>(title: &str, groups: &AggregationResult<K>) {
    println!("{title}:");
    for (key, stats) in groups.iter() {
        println!(
            "- {}: {} churn across {} customers ({} unlabeled)",
            key,
            format_rate(stats.rate()),
            stats.count,
            stats.unlabeled()
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = resolve_config(&cli)?;

    match cli.command {
        Commands::InitDb => {
            let pool = pool_from_env().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Import { csv } => {
            let pool = pool_from_env().await?;
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} customer rows from {}.", csv.display());
        }
        Commands::Summary { source, json } => {
            let (store, _) = load_store(&source, &config).await?;
            let summary = report::summary_metrics(store.records(), &config);

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }
            if !summary.has_data() {
                println!("No customer data loaded ({} rows skipped).", store.skipped_rows().len());
                return Ok(());
            }

            println!(
                "Overall churn rate: {} ({} customers, {} unlabeled, {} rows skipped)",
                format_rate(summary.overall_churn_rate),
                summary.customers,
                summary.unlabeled,
                store.skipped_rows().len()
            );
            println!(
                "High risk customers: {} ({} of total)",
                summary.high_risk_count,
                format_rate(summary.high_risk_fraction)
            );
            if let Some(avg) = summary.avg_risk_score {
                println!("Average risk score: {avg:.3}");
            }
            for segment in &summary.segment_churn_rates {
                println!(
                    "{} churn rate: {} ({} customers)",
                    segment.segment,
                    format_rate(segment.rate),
                    segment.count
                );
            }
        }
        Commands::Segments { source, by, shards } => {
            let (store, _) = load_store(&source, &config).await?;
            let records = store.records();
            match by {
                Segment::ServiceCalls => {
                    let groups = aggregate::group_by_partitioned(records, shards, |record| {
                        record.customer_service_calls
                    });
                    print_groups("Churn rate by customer service calls", &groups);
                }
                Segment::IntlPlan => {
                    let groups = aggregate::by_international_plan(records);
                    print_groups("Churn rate by international plan", &groups);
                }
                Segment::VmPlan => {
                    let groups = aggregate::by_voice_mail_plan(records);
                    print_groups("Churn rate by voice mail plan", &groups);
                }
                Segment::PlanType => {
                    print_groups("Churn rate by plan type", &aggregate::plan_type_impact(records));
                }
                Segment::State => {
                    let groups = aggregate::group_by_partitioned(records, shards, |record| {
                        record.state.clone()
                    });
                    print_groups("Churn rate by state", &groups);
                }
                Segment::RiskCategory => {
                    print_groups(
                        "Observed churn by risk category",
                        &aggregate::by_risk_category(records, &config.risk),
                    );
                }
            }
        }
        Commands::TopRisk {
            source,
            limit,
            order_by,
        } => {
            let (store, _) = load_store(&source, &config).await?;
            let top = report::top_risk(
                config.risk.classify_all(store.records()),
                limit.unwrap_or(config.top_n),
                order_by,
            );

            if top.is_empty() {
                println!("No customers loaded.");
                return Ok(());
            }

            println!("Top customers by churn risk:");
            for item in &top {
                let record = item.record;
                println!(
                    "- row {} ({}) score {:.3} [{}] {} service calls, ${:.2} charges",
                    record.row,
                    record.state,
                    record.churn_risk_score,
                    item.category,
                    record.customer_service_calls,
                    record.total_charge
                );
            }
        }
        Commands::Recommend { source, row } => {
            let (store, _) = load_store(&source, &config).await?;

            match row {
                Some(row) => {
                    let record = store
                        .get(row)
                        .with_context(|| format!("no loaded customer at row {row}"))?;
                    let category = config.risk.classify(record.churn_risk_score);
                    let matches = playbook::evaluate(record, &STANDARD_PLAYBOOK);

                    println!(
                        "Row {row} ({}): {category}, score {:.3}",
                        record.state, record.churn_risk_score
                    );
                    if matches.is_empty() {
                        println!("No retention action needed.");
                    }
                    for matched in &matches {
                        println!("{} (expected impact {})", matched.name, matched.impact);
                        for action in matched.actions {
                            println!("  - {action}");
                        }
                    }
                }
                None => {
                    let cohorts =
                        report::category_cohorts(store.records(), &config.risk, &STANDARD_PLAYBOOK);
                    for cohort in cohorts {
                        let Some(summary) = &cohort.cohort else {
                            println!("{}: no customers", cohort.category);
                            continue;
                        };
                        println!(
                            "{}: {} customers, churn {}",
                            cohort.category,
                            summary.size,
                            format_rate(summary.churn_rate)
                        );
                        if cohort.matches.is_empty() {
                            println!("  no action needed");
                        }
                        for matched in &cohort.matches {
                            println!("  - {} (expected impact {})", matched.name, matched.impact);
                        }
                    }
                }
            }
        }
        Commands::Report {
            source,
            out,
            format,
        } => {
            let (store, label) = load_store(&source, &config).await?;
            let payload =
                report::build_payload(&label, &store, &config, &STANDARD_PLAYBOOK, Utc::now());
            let rendered = match format {
                Format::Markdown => report::build_report(&payload),
                Format::Json => serde_json::to_string_pretty(&payload)?,
            };
            std::fs::write(&out, rendered)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
