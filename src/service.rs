use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use tracing::{info, warn};

use crate::audience::{AudienceProvider, AudienceSync};
use crate::config::AppConfig;
use crate::db::Database;
use crate::error::AudienceError;
use crate::file_writer::write_report_to_timestamped_dir;
use crate::importer::{DirectorySource, ImportSummary, Importer};
use crate::logging::OperationTimer;
use crate::metrics::MetricsCollector;
use crate::models::{Segment, SortOutcome};
use crate::repository::CustomerRepository;
use crate::segmenter::Segmenter;
use crate::validation::InputValidator;

/// One add or remove call made against an audience
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushResult {
    /// Audience name as sent to the provider
    pub audience: String,
    /// Segment the audience holds
    pub segment: Segment,
    /// `add` or `remove`
    pub action: &'static str,
    /// Keys in the list
    pub members: usize,
    /// Provider requests it took
    pub requests: usize,
}

/// What a command did, written as `summary.json` when reports are enabled
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Subcommand that produced the report
    pub command: &'static str,
    /// Date recency was measured from
    pub today: NaiveDate,
    /// Ad account the audiences belong to
    pub account_id: String,
    /// Files read and rows imported or rejected
    pub import: ImportSummary,
    /// Lists produced by the sort, absent when the run stopped before sorting
    pub outcome: Option<SortOutcome>,
    /// Add and remove calls in the order they were made
    pub pushes: Vec<PushResult>,
}

impl RunReport {
    fn new(command: &'static str, today: NaiveDate, account_id: &str) -> Self {
        Self {
            command,
            today,
            account_id: account_id.to_string(),
            import: ImportSummary::default(),
            outcome: None,
            pushes: Vec::new(),
        }
    }
}

/// Runs the build, execute, teardown and rebuild flows
pub struct SyncService<P> {
    config: AppConfig,
    audiences: AudienceSync<P>,
    today: NaiveDate,
    metrics: MetricsCollector,
}

impl<P: AudienceProvider> SyncService<P> {
    /// Service measuring recency from `today`, batch limits taken from `config`
    pub fn new(config: AppConfig, provider: P, today: NaiveDate) -> Self {
        let audiences = AudienceSync::new(provider, config.batch_limits());
        Self {
            config,
            audiences,
            today,
            metrics: MetricsCollector::default(),
        }
    }

    /// Configuration in effect
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Audience adapter, mainly for inspection in tests
    pub const fn audiences(&self) -> &AudienceSync<P> {
        &self.audiences
    }

    /// First run: load the vendor history, create the audiences and fill them
    pub async fn build(&self) -> Result<RunReport> {
        let mut report = RunReport::new("build", self.today, self.config.account_id());
        let db = self.open_store()?;

        report.import = self.import(&db, &self.config.source.initial_keyword, None)?;

        let timer = OperationTimer::new("sort");
        let mut segmenter = Segmenter::new(&db, self.today).with_policy(self.config.segmenter.invalid_date_policy);
        let outcome = segmenter.add_sort().context("Initial sort failed")?;
        self.metrics.record_step("sort", timer.finish());
        self.metrics.record_sort(outcome);

        let timer = OperationTimer::new("sync");
        for segment in Segment::ALL {
            let name = self.config.audience_name(segment);
            self.audiences
                .create_audience(&name, describe(segment))
                .await
                .with_context(|| format!("Failed to create audience {name:?}"))?;
        }
        for segment in Segment::ALL {
            report.pushes.push(self.push(segment, "add", outcome.adds.get(segment)).await?);
        }
        self.metrics.record_step("sync", timer.finish());

        segmenter.commit().context("Failed to save sync progress")?;
        report.outcome = Some(segmenter.into_outcome()?);
        self.write_report(&report)?;
        Ok(report)
    }

    /// Ongoing run: import new exports, then removals before additions
    ///
    /// Segment changes and the arrivals watermark are saved only after every
    /// push succeeded, so a failed run repeats its lists on the next one.
    pub async fn execute(&self) -> Result<RunReport> {
        let mut report = RunReport::new("execute", self.today, self.config.account_id());
        let db = self.open_store()?;

        let since = db.arrivals_watermark()?;
        report.import = self.import(&db, &self.config.source.incremental_keyword, since)?;

        let timer = OperationTimer::new("sort");
        let mut segmenter = Segmenter::new(&db, self.today).with_policy(self.config.segmenter.invalid_date_policy);
        let outcome = segmenter.add_remove_sort().context("Incremental sort failed")?;
        self.metrics.record_step("sort", timer.finish());
        self.metrics.record_sort(outcome);

        if !outcome.stranded.is_empty() {
            warn!(count = outcome.stranded.len(), "Customers jumped past the lapsed bucket and were left as current");
        }

        let timer = OperationTimer::new("sync");
        for segment in Segment::ALL {
            report.pushes.push(self.push(segment, "remove", outcome.removes.get(segment)).await?);
        }
        for segment in Segment::ALL {
            report.pushes.push(self.push(segment, "add", outcome.adds.get(segment)).await?);
        }
        self.metrics.record_step("sync", timer.finish());

        // Only a fully pushed run moves the store forward; a failed one is redone next time.
        segmenter.commit().context("Failed to save sync progress")?;
        report.outcome = Some(segmenter.into_outcome()?);
        self.write_report(&report)?;
        Ok(report)
    }

    /// Delete the store file and the three audiences
    ///
    /// A missing file or audience is logged and skipped.
    pub async fn teardown(&self) -> Result<()> {
        let path = self.config.database_path();
        match fs::remove_file(&path) {
            Ok(()) => info!(path = %path.display(), "Removed customer store"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No database file to remove");
            },
            Err(e) => return Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }

        for segment in Segment::ALL {
            let name = self.config.audience_name(segment);
            match self.audiences.delete_audience(&name).await {
                Ok(()) => {},
                Err(AudienceError::InvalidState(reason)) => warn!(audience = %name, %reason, "Nothing to delete"),
                Err(e) => {
                    self.metrics.record_error("audience", "teardown");
                    return Err(e).with_context(|| format!("Failed to delete audience {name:?}"));
                },
            }
        }
        Ok(())
    }

    /// Teardown followed by build
    pub async fn rebuild(&self) -> Result<RunReport> {
        self.teardown().await?;
        self.build().await
    }

    fn open_store(&self) -> Result<Database> {
        let path = self.config.database_path();
        if !path.exists() {
            warn!(path = %path.display(), "Database file not found, creating an empty store");
        }
        Database::open(&path).with_context(|| format!("Failed to open customer store at {}", path.display()))
    }

    fn import(&self, db: &Database, keyword: &str, since: Option<NaiveDate>) -> Result<ImportSummary> {
        let drop_dir = Path::new(&self.config.source.drop_dir);
        if let Err(e) = InputValidator::validate_drop_dir(drop_dir) {
            warn!(error = %e, "No export files to import");
            return Ok(ImportSummary::default());
        }

        let timer = OperationTimer::new("import");
        let importer = Importer::new(
            DirectorySource::new(drop_dir),
            self.today,
            self.config.segmenter.invalid_date_policy,
        );
        let summary = importer
            .import_since(db, keyword, since)
            .inspect_err(|_| self.metrics.record_error("import", "import"))
            .with_context(|| format!("Import from {} failed", drop_dir.display()))?;
        self.metrics.record_step("import", timer.finish());

        info!(
            files = summary.files.len(),
            imported = summary.imported,
            rejected = summary.rejected.len(),
            "Import complete"
        );
        Ok(summary)
    }

    async fn push(&self, segment: Segment, action: &'static str, keys: &[String]) -> Result<PushResult> {
        let name = self.config.audience_name(segment);
        let requests = match action {
            "remove" => self.audiences.remove_members(&name, keys).await,
            _ => self.audiences.add_members(&name, keys).await,
        };
        let requests = requests
            .inspect_err(|_| self.metrics.record_error("audience", action))
            .with_context(|| format!("Failed to {action} users for {name:?}"))?;

        self.metrics.record_push(segment, action, keys.len(), requests);
        Ok(PushResult {
            audience: name,
            segment,
            action,
            members: keys.len(),
            requests,
        })
    }

    fn write_report(&self, report: &RunReport) -> Result<()> {
        let Some(output_dir) = &self.config.report.output_directory else {
            return Ok(());
        };
        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        let files = write_report_to_timestamped_dir(
            report,
            report.outcome.as_ref(),
            &report.import.rejected,
            Path::new(output_dir),
            &timestamp,
        )
        .context("Failed to write run report")?;
        info!(dir = %output_dir, files = files.len(), "Run report written");
        Ok(())
    }
}

fn describe(segment: Segment) -> &'static str {
    match segment {
        Segment::Current => "Customers active within the last 90 days",
        Segment::Lapsed => "Customers last active 91 to 730 days ago",
        Segment::ExtraLapsed => "Customers last active more than 730 days ago",
    }
}
