use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use clap::{ArgGroup, Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod access;
mod ack;
mod config;
mod db;
mod error;
mod kiosk;
mod models;
mod report;
mod stats;
mod store;
mod survey;

use crate::ack::GeminiAcknowledger;
use crate::config::Config;
use crate::db::SqliteStore;
use crate::models::FilterCriteria;
use crate::report::ReportScope;
use crate::stats::Aggregator;
use crate::store::{FeedbackStore, MemoryStore};
use crate::survey::{SurveyController, SurveySettings};

#[derive(Parser)]
#[command(name = "nps-survey")]
#[command(about = "Patient satisfaction survey kiosk and NPS dashboard", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct FilterArgs {
    /// First day to include (yyyy-mm-dd)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last day to include (yyyy-mm-dd)
    #[arg(long)]
    to: Option<NaiveDate>,
    #[arg(long)]
    professional: Option<String>,
}

impl From<FilterArgs> for FilterCriteria {
    fn from(args: FilterArgs) -> Self {
        FilterCriteria {
            start_date: args.from,
            end_date: args.to,
            professional: args.professional,
        }
    }
}

#[derive(Args)]
struct AccessArgs {
    #[arg(long, env = "SURVEY_ACCESS_SECRET", hide_env_values = true)]
    secret: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo feedback
    Seed,
    /// Import feedback from a CSV file or a browser storage dump
    #[command(group(
        ArgGroup::new("source")
            .args(["csv", "json"])
            .required(true)
            .multiple(false)
    ))]
    Import {
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// Run the interactive survey kiosk
    Survey {
        /// Keep answers in memory instead of the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Print dashboard statistics
    Stats {
        #[command(flatten)]
        filter: FilterArgs,
        #[command(flatten)]
        access: AccessArgs,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        filter: FilterArgs,
        #[command(flatten)]
        access: AccessArgs,
        /// Narrow the report to one professional, keeping the date range
        #[arg(long)]
        only: Option<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Export matching feedback as CSV
    Export {
        #[command(flatten)]
        filter: FilterArgs,
        #[command(flatten)]
        access: AccessArgs,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Delete all stored feedback
    Clear {
        #[command(flatten)]
        access: AccessArgs,
    },
}

fn authorize(config: &Config, access: &AccessArgs) -> anyhow::Result<()> {
    if !config.access_gate()?.check_dashboard(&access.secret) {
        bail!("incorrect dashboard password");
    }
    Ok(())
}

async fn run_kiosk(
    config: &Config,
    aggregator: &Aggregator,
    store: impl FeedbackStore,
) -> anyhow::Result<()> {
    let settings = SurveySettings {
        roster: config.professionals.clone(),
        gate: config.kiosk_gate(),
        signature: config.signature(),
        ack_timeout: config.ack_timeout,
    };
    if settings.gate.is_none() {
        tracing::warn!("SURVEY_DASHBOARD_SECRET not set, the admin dashboard is disabled");
    }
    if config.gemini_api_key.is_none() {
        tracing::warn!("GEMINI_API_KEY not set, thank-you messages will use the template");
    }
    let acknowledger = GeminiAcknowledger::new(
        config.gemini_api_key.clone(),
        config.gemini_model.clone(),
        config.signature(),
        config.ack_timeout,
    )?;
    let mut controller = SurveyController::new(settings, store, acknowledger);

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    kiosk::run(&mut controller, aggregator, stdin.lock(), &mut stdout).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let aggregator = Aggregator::new(config.utc_offset);

    if let Commands::Survey { dry_run: true } = cli.command {
        tracing::info!("dry run, answers are kept in memory only");
        return run_kiosk(&config, &aggregator, MemoryStore::new()).await;
    }

    let pool = db::connect(&config.database_url).await?;
    let store = SqliteStore::new(pool);
    store.init().await.context("failed to apply migrations")?;

    match cli.command {
        Commands::InitDb => {
            println!("Schema ready.");
        }
        Commands::Seed => {
            let inserted = db::seed(&store, &config.professionals).await?;
            println!("Inserted {inserted} demo responses.");
        }
        Commands::Import { csv, json } => {
            let (inserted, path) = match (csv, json) {
                (Some(path), _) => (db::import_csv(&store, &path).await?, path),
                (None, Some(path)) => (db::import_json(&store, &path).await?, path),
                (None, None) => bail!("pass --csv or --json"),
            };
            println!("Inserted {inserted} responses from {}.", path.display());
        }
        Commands::Survey { .. } => {
            run_kiosk(&config, &aggregator, store).await?;
        }
        Commands::Stats {
            filter,
            access,
            json,
        } => {
            authorize(&config, &access)?;
            let records = store
                .load_all()
                .await
                .context("failed to load feedback history")?;
            let criteria = FilterCriteria::from(filter);

            let mut stdout = std::io::stdout();
            if json {
                let (_, summary) = aggregator.summarize(&records, &criteria);
                serde_json::to_writer_pretty(&mut stdout, &summary)?;
                writeln!(stdout)?;
            } else {
                kiosk::render_summary(
                    &mut stdout,
                    &aggregator,
                    &records,
                    &criteria,
                    &config.professionals,
                )?;
            }
        }
        Commands::Report {
            filter,
            access,
            only,
            out,
        } => {
            authorize(&config, &access)?;
            let records = store
                .load_all()
                .await
                .context("failed to load feedback history")?;
            let issued_on = aggregator.day_of(Utc::now());
            let scope = match only {
                Some(name) => ReportScope::Professional(name),
                None => ReportScope::Matching,
            };
            let report = report::build_report(
                &config.clinic_name,
                &aggregator,
                &records,
                &FilterCriteria::from(filter),
                &scope,
                issued_on,
            );
            let out = out.unwrap_or_else(|| PathBuf::from(report::default_file_name(issued_on)));
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export {
            filter,
            access,
            csv,
        } => {
            authorize(&config, &access)?;
            let records = store
                .load_all()
                .await
                .context("failed to load feedback history")?;
            let matching = aggregator.filter(&records, &FilterCriteria::from(filter));
            let written = db::export_csv(&matching, &csv)?;
            println!("Exported {written} responses to {}.", csv.display());
        }
        Commands::Clear { access } => {
            if !config.access_gate()?.check_clear(&access.secret) {
                bail!("incorrect clear-all password");
            }
            store.clear_all().await?;
            println!("All feedback removed.");
        }
    }

    Ok(())
}
