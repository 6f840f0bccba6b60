use std::time::Duration;

use metrics::{counter, gauge, histogram};

use crate::models::{Segment, SortOutcome};

/// Metric names and recording helpers for a sync run
///
/// Nothing is exported unless the binary installs a recorder; without one the
/// `metrics` macros are no-ops.
pub struct MetricsCollector {
    // Import metrics
    pub rows_imported_total: &'static str,
    pub rows_rejected_total: &'static str,
    pub files_processed_total: &'static str,

    // Segmenter metrics
    pub transitions_total: &'static str,
    pub records_skipped_total: &'static str,
    pub records_stranded: &'static str,

    // Sync metrics
    pub members_pushed_total: &'static str,
    pub api_requests_total: &'static str,
    pub step_duration: &'static str,

    // Error metrics
    pub errors_total: &'static str,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            rows_imported_total: "audience_sync_rows_imported_total",
            rows_rejected_total: "audience_sync_rows_rejected_total",
            files_processed_total: "audience_sync_files_processed_total",

            transitions_total: "audience_sync_transitions_total",
            records_skipped_total: "audience_sync_records_skipped_total",
            records_stranded: "audience_sync_records_stranded",

            members_pushed_total: "audience_sync_members_pushed_total",
            api_requests_total: "audience_sync_api_requests_total",
            step_duration: "audience_sync_step_duration_seconds",

            errors_total: "audience_sync_errors_total",
        }
    }
}

impl MetricsCollector {
    /// Record one imported export file
    pub fn record_import(&self, file: &str, imported: usize, rejected: usize) {
        let file = file.to_string();
        counter!(self.files_processed_total).increment(1);
        counter!(self.rows_imported_total, "file" => file.clone()).increment(imported as u64);
        counter!(self.rows_rejected_total, "file" => file).increment(rejected as u64);
    }

    /// Record the result of a segmenter pass
    pub fn record_sort(&self, outcome: &SortOutcome) {
        counter!(self.transitions_total).increment(outcome.transitioned as u64);
        counter!(self.records_skipped_total).increment(outcome.skipped.len() as u64);
        gauge!(self.records_stranded).set(outcome.stranded.len() as f64);
    }

    /// Record a batch of members sent to an audience
    pub fn record_push(&self, segment: Segment, action: &'static str, members: usize, requests: usize) {
        counter!(self.members_pushed_total, "segment" => segment.as_str(), "action" => action)
            .increment(members as u64);
        counter!(self.api_requests_total, "action" => action).increment(requests as u64);
    }

    /// Record how long a step took
    pub fn record_step(&self, step: &'static str, duration: Duration) {
        histogram!(self.step_duration, "step" => step).record(duration.as_secs_f64());
    }

    /// Record error metrics
    pub fn record_error(&self, error_type: &'static str, operation: &'static str) {
        counter!(self.errors_total, "type" => error_type, "operation" => operation).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SortKind;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::default();
        assert_eq!(collector.rows_imported_total, "audience_sync_rows_imported_total");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let collector = MetricsCollector::default();
        collector.record_import("vendor_20240101.csv", 10, 1);
        collector.record_sort(&SortOutcome::empty(SortKind::Incremental));
        collector.record_push(Segment::Current, "add", 12_000, 2);
        collector.record_step("import", Duration::from_millis(5));
        collector.record_error("database", "import");
    }
}
