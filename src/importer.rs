//! Export file ingestion.
//!
//! Export files arrive in a drop (an FTP folder synced or mounted locally) and
//! are named `<prefix>_<YYYYMMDD>.csv`. The stamp in the name becomes the
//! `import_batch_date` of every row in the file. Files are applied oldest
//! first so that the newest export wins on upsert.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, Trim};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::error::{AudienceError, Result};
use crate::metrics::MetricsCollector;
use crate::models::NewCustomer;
use crate::segmenter::{bucket_of, InvalidDatePolicy};
use crate::utils::normalize_header;
use crate::validation::InputValidator;

/// Date formats accepted in the last-activity column
pub const ACTIVITY_DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

const ID_COLUMNS: [&str; 4] = ["customer_id", "id", "sell_to_customer_no_", "customer_no_"];
const LAST_ACTIVITY_COLUMNS: [&str; 2] = ["last_activity_date", "last_order_date"];
const EMAIL_COLUMNS: [&str; 2] = ["email", "usa_email"];
const NAME_COLUMNS: [&str; 2] = ["name", "sell_to_customer_name"];
const PHONE_COLUMNS: [&str; 2] = ["phone", "phone_no_"];
const POST_CODE_COLUMNS: [&str; 3] = ["post_code", "ship_to_post_code", "zip"];
const TOTAL_ORDERS_COLUMNS: [&str; 2] = ["total_orders", "total_number_of_orders"];

/// Source of export files
pub trait FileSource {
    /// Names of every file currently in the drop
    fn list(&self) -> Result<Vec<String>>;

    /// Raw contents of one file
    fn fetch(&self, name: &str) -> Result<Vec<u8>>;
}

/// A drop directory on the local filesystem
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    /// Read exports from `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory being read
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FileSource for DirectorySource {
    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.dir.join(name))?)
    }
}

/// An export file selected for import
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExportFile {
    /// Stamp parsed from the file name
    pub batch_date: NaiveDate,
    /// File name within the drop
    pub name: String,
}

/// Pick the CSV exports whose name contains `keyword`, oldest stamp first
pub fn select_export_files(names: &[String], keyword: &str) -> Result<Vec<ExportFile>> {
    let stamp = Regex::new(r"(?i)_(\d{8})\.csv$")
        .map_err(|e| AudienceError::InvalidState(format!("Failed to compile file stamp regex: {e}")))?;
    let keyword = keyword.to_lowercase();
    let mut files: Vec<ExportFile> = names
        .iter()
        .filter(|name| name.to_lowercase().contains(&keyword))
        .filter_map(|name| {
            let Some(caps) = stamp.captures(name) else {
                warn!(file = %name, "Skipping file without a <prefix>_<YYYYMMDD>.csv name");
                return None;
            };
            match NaiveDate::parse_from_str(&caps[1], "%Y%m%d") {
                Ok(batch_date) => Some(ExportFile { batch_date, name: name.clone() }),
                Err(_) => {
                    warn!(file = %name, "Skipping file with an invalid date stamp");
                    None
                },
            }
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Parse a last-activity value in any accepted format
#[must_use]
pub fn parse_activity_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    ACTIVITY_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
}

/// A row the importer refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRow {
    /// File the row came from
    pub file: String,
    /// 1-based line number, header included
    pub line: u64,
    /// Customer key, if it could be read
    pub id: Option<String>,
    /// Why it was refused
    pub reason: String,
}

/// Rows parsed from one export
#[derive(Debug, Clone, Default)]
pub struct ParsedExport {
    /// Rows ready to upsert
    pub records: Vec<NewCustomer>,
    /// Rows refused
    pub rejected: Vec<RejectedRow>,
}

struct Columns {
    id: usize,
    last_activity: usize,
    email: Option<usize>,
    name: Option<usize>,
    phone: Option<usize>,
    post_code: Option<usize>,
    total_orders: Option<usize>,
}

fn find_column(headers: &[String], aliases: &[&str]) -> Option<usize> {
    headers.iter().position(|h| aliases.iter().any(|alias| *alias == h.as_str()))
}

impl Columns {
    fn resolve(file: &str, headers: &[String]) -> Result<Self> {
        let required = |aliases: &[&str]| {
            find_column(headers, aliases).ok_or_else(|| AudienceError::InvalidExport {
                file: file.to_string(),
                reason: format!("missing column, expected one of {aliases:?}"),
            })
        };
        Ok(Self {
            id: required(&ID_COLUMNS[..])?,
            last_activity: required(&LAST_ACTIVITY_COLUMNS[..])?,
            email: find_column(headers, &EMAIL_COLUMNS),
            name: find_column(headers, &NAME_COLUMNS),
            phone: find_column(headers, &PHONE_COLUMNS),
            post_code: find_column(headers, &POST_CODE_COLUMNS),
            total_orders: find_column(headers, &TOTAL_ORDERS_COLUMNS),
        })
    }
}

fn optional_field(record: &StringRecord, index: Option<usize>) -> Option<String> {
    index
        .and_then(|i| record.get(i))
        .map(InputValidator::sanitize_text)
        .filter(|value| !value.is_empty())
}

/// Parse one CSV export into customer rows classified against `today`
///
/// A row with an unreadable date is rejected under [`InvalidDatePolicy::Skip`]
/// and fails the whole file under [`InvalidDatePolicy::Abort`].
pub fn parse_export(
    file: &str,
    contents: &[u8],
    batch_date: NaiveDate,
    today: NaiveDate,
    policy: InvalidDatePolicy,
) -> Result<ParsedExport> {
    let mut reader = ReaderBuilder::new().flexible(true).trim(Trim::All).from_reader(contents);
    let headers: Vec<String> = reader.headers()?.iter().map(normalize_header).collect();
    let columns = Columns::resolve(file, &headers)?;

    let mut parsed = ParsedExport::default();
    for result in reader.records() {
        let record = result?;
        let line = record.position().map_or(0, csv::Position::line);
        let reject = |id: Option<String>, reason: String| RejectedRow { file: file.to_string(), line, id, reason };

        if record.iter().all(str::is_empty) {
            continue;
        }
        if record.len() != headers.len() {
            parsed.rejected.push(reject(
                None,
                format!("expected {} fields, found {}", headers.len(), record.len()),
            ));
            continue;
        }

        let id = record.get(columns.id).unwrap_or_default().to_string();
        if let Err(e) = InputValidator::validate_customer_id(&id) {
            parsed.rejected.push(reject(None, e.to_string()));
            continue;
        }

        let raw_date = record.get(columns.last_activity).unwrap_or_default();
        let Some(last_activity_date) = parse_activity_date(raw_date) else {
            let err = AudienceError::InvalidDate { id: id.clone(), value: raw_date.to_string() };
            match policy {
                InvalidDatePolicy::Skip => {
                    warn!(file, line, error = %err, "Rejecting row");
                    parsed.rejected.push(reject(Some(id), err.to_string()));
                    continue;
                },
                InvalidDatePolicy::Abort => return Err(err),
            }
        };

        let email = columns
            .email
            .and_then(|i| record.get(i))
            .and_then(InputValidator::sanitize_email);
        if email.is_none() {
            debug!(file, line, id = %id, "Row has no usable email");
        }

        parsed.records.push(NewCustomer {
            segment: bucket_of(last_activity_date, today),
            last_activity_date,
            email,
            import_batch_date: batch_date,
            name: optional_field(&record, columns.name),
            phone: optional_field(&record, columns.phone),
            post_code: optional_field(&record, columns.post_code),
            total_orders: optional_field(&record, columns.total_orders).and_then(|v| v.parse().ok()),
            created_on: today,
            id,
        });
    }

    Ok(parsed)
}

/// What an import run did
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    /// Files applied, in order
    pub files: Vec<String>,
    /// Rows written to the store
    pub imported: usize,
    /// Rows refused
    pub rejected: Vec<RejectedRow>,
}

/// Pulls exports from a source into the store
pub struct Importer<S> {
    source: S,
    today: NaiveDate,
    policy: InvalidDatePolicy,
    metrics: MetricsCollector,
}

impl<S: FileSource> Importer<S> {
    /// Create an importer classifying rows against `today`
    pub fn new(source: S, today: NaiveDate, policy: InvalidDatePolicy) -> Self {
        Self {
            source,
            today,
            policy,
            metrics: MetricsCollector::default(),
        }
    }

    /// Import every matching export into `db`, oldest first
    pub fn import(&self, db: &Database, keyword: &str) -> Result<ImportSummary> {
        self.import_since(db, keyword, None)
    }

    /// Import matching exports stamped after `since`, oldest first
    ///
    /// Older files were already applied and synced; importing them again
    /// would reclassify their rows and hide the transitions from the
    /// segmenter.
    pub fn import_since(&self, db: &Database, keyword: &str, since: Option<NaiveDate>) -> Result<ImportSummary> {
        let mut files = select_export_files(&self.source.list()?, keyword)?;
        let mut summary = ImportSummary::default();

        if let Some(since) = since {
            let before = files.len();
            files.retain(|f| f.batch_date > since);
            if files.len() < before {
                info!(skipped = before - files.len(), %since, "Skipping exports already synced");
            }
        }

        if files.is_empty() {
            warn!(keyword, "No new export files matched, nothing to import");
            return Ok(summary);
        }

        for file in files {
            info!(file = %file.name, batch_date = %file.batch_date, "Processing file");
            let contents = self.source.fetch(&file.name)?;
            let parsed = parse_export(&file.name, &contents, file.batch_date, self.today, self.policy)?;

            let written = db.upsert_customers(&parsed.records)?;
            self.metrics.record_import(&file.name, written, parsed.rejected.len());
            info!(file = %file.name, rows = written, rejected = parsed.rejected.len(), "File imported");

            summary.imported += written;
            summary.rejected.extend(parsed.rejected);
            summary.files.push(file.name);
        }

        Ok(summary)
    }
}
