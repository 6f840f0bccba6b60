use std::path::PathBuf;

use anyhow::{Context, Result};
use audience_sync::config::AppConfig;
use audience_sync::logging::init_logging;
use audience_sync::service::RunReport;
use audience_sync::{GraphAudienceClient, InvalidDatePolicy, SyncService};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file, layered over config/default and config/local
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Date to measure recency from (YYYY-MM-DD), defaults to the local date
    #[arg(long, global = true)]
    today: Option<String>,

    /// What to do with rows whose activity date cannot be parsed
    #[arg(long, global = true, value_parser = parse_policy)]
    on_invalid_date: Option<InvalidDatePolicy>,

    /// Use the testing account and " test" audience names
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// First run: import the vendor history, create the audiences and fill them
    Build,
    /// Ongoing run: import new exports and push adds and removes
    Execute,
    /// Teardown followed by build
    Rebuild,
    /// Delete the database file and the audiences
    Teardown,
}

fn parse_policy(raw: &str) -> Result<InvalidDatePolicy, String> {
    raw.parse().map_err(|e: audience_sync::AudienceError| e.to_string())
}

fn parse_today(raw: Option<&str>) -> Result<NaiveDate> {
    raw.map_or_else(
        || Ok(Local::now().date_naive()),
        |date| NaiveDate::parse_from_str(date, "%Y-%m-%d").context("Invalid --today, use YYYY-MM-DD"),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let mut config = AppConfig::load_from(cli.config.as_deref())?;
    if cli.debug {
        config.debug = true;
    }
    if let Some(policy) = cli.on_invalid_date {
        config.segmenter.invalid_date_policy = policy;
    }

    // Initialize logging; the guard flushes the file log on exit
    let _guard = init_logging(
        Some(&config.get_log_level()),
        config.logging.file_path.as_deref().map(std::path::Path::new),
        config.logging.format == "json",
    )?;

    info!("Starting audience-sync");

    let today = parse_today(cli.today.as_deref())?;
    config.validate_credentials()?;
    let provider = GraphAudienceClient::new(&config.audience, config.account_id())
        .context("Failed to build audience client")?;
    let service = SyncService::new(config, provider, today);

    let result = match cli.command {
        Commands::Build => service.build().await.map(Some),
        Commands::Execute => service.execute().await.map(Some),
        Commands::Rebuild => service.rebuild().await.map(Some),
        Commands::Teardown => service.teardown().await.map(|()| None),
    };

    match result {
        Ok(report) => {
            if let Some(report) = report {
                log_report(&report);
            }
            info!("Done");
            Ok(())
        },
        Err(e) => {
            error!(error = %format!("{e:#}"), "Run failed");
            Err(e)
        },
    }
}

fn log_report(report: &RunReport) {
    info!(
        command = report.command,
        today = %report.today,
        files = report.import.files.len(),
        imported = report.import.imported,
        rejected = report.import.rejected.len(),
        "Import summary"
    );
    if let Some(outcome) = &report.outcome {
        info!(
            skipped = outcome.skipped.len(),
            stranded = outcome.stranded.len(),
            transitioned = outcome.transitioned,
            "Sort summary"
        );
    }
    for push in &report.pushes {
        info!(
            audience = %push.audience,
            action = push.action,
            members = push.members,
            requests = push.requests,
            "Audience updated"
        );
    }
}
