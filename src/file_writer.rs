//! Run report writing.
//!
//! Each reported run gets its own directory `output_dir/timestamp/` holding
//! one CSV per non-empty list, the rejected and skipped rows, and a
//! `summary.json` describing the run.

use std::fs::{create_dir_all, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use csv::Writer;
use serde::Serialize;

use crate::error::Result;
use crate::importer::RejectedRow;
use crate::models::{Segment, SortOutcome};

/// Write a run report under a timestamp-named directory.
///
/// # Arguments
///
/// * `summary` - Serialized as `summary.json`
/// * `outcome` - Segmenter result, if the run sorted
/// * `rejected` - Rows the importer refused
/// * `output_dir` - Base output directory
/// * `timestamp` - Directory name for this run (e.g., "2025-01-15_14-30-00")
///
/// # Returns
///
/// Paths of the files created, summary last
pub fn write_report_to_timestamped_dir<S: Serialize>(
    summary: &S,
    outcome: Option<&SortOutcome>,
    rejected: &[RejectedRow],
    output_dir: &Path,
    timestamp: &str,
) -> Result<Vec<PathBuf>> {
    let run_dir = output_dir.join(timestamp);
    create_dir_all(&run_dir)?;

    let mut output_files = Vec::new();

    if let Some(outcome) = outcome {
        for segment in Segment::ALL {
            for (action, keys) in [("add", outcome.adds.get(segment)), ("remove", outcome.removes.get(segment))] {
                if keys.is_empty() {
                    continue;
                }
                let file_path = run_dir.join(format!("{action}_{segment}.csv"));
                write_keys_file(keys, &file_path)?;
                output_files.push(file_path);
            }
        }

        if !outcome.skipped.is_empty() {
            let file_path = run_dir.join("skipped.csv");
            write_rows_file(&outcome.skipped, &file_path)?;
            output_files.push(file_path);
        }
    }

    if !rejected.is_empty() {
        let file_path = run_dir.join("rejected.csv");
        write_rows_file(rejected, &file_path)?;
        output_files.push(file_path);
    }

    let file_path = run_dir.join("summary.json");
    let writer = BufWriter::new(File::create(&file_path)?);
    serde_json::to_writer_pretty(writer, summary)?;
    output_files.push(file_path);

    Ok(output_files)
}

/// Write sync keys to a single-column CSV file.
fn write_keys_file(keys: &[String], file_path: &Path) -> Result<()> {
    let mut writer = Writer::from_path(file_path)?;
    writer.write_record(["email"])?;
    for key in keys {
        writer.write_record([key])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write serializable rows with a header taken from the field names.
fn write_rows_file<T: Serialize>(rows: &[T], file_path: &Path) -> Result<()> {
    let mut writer = Writer::from_path(file_path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
