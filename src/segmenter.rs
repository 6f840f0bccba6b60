//! Recency segmentation of stored customers.
//!
//! A customer belongs to one of three buckets based on the number of days
//! between their last activity and "today":
//!
//! ```text
//!   [0, 90]    current
//!   (90, 730]  lapsed
//!   (730, inf) extra_lapsed
//! ```
//!
//! The [`Segmenter`] runs one of two passes over the store:
//!
//! - [`Segmenter::add_sort`] for the first load, pushing every record to the
//!   audience of its stored segment.
//! - [`Segmenter::add_remove_sort`] for ongoing runs, listing the newest import
//!   batch as arrivals and moving records one bucket forward when they age out.
//!
//! Each pass replaces the previous outcome; lists are only readable after a pass.
//! A pass only reads the store. Segment changes and the arrivals watermark are
//! written by [`Segmenter::commit`], once the lists have reached the audiences.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AudienceError, Result};
use crate::models::{CustomerRecord, Segment, SkippedRecord, SortKind, SortOutcome};
use crate::repository::CustomerRepository;

/// Last day (inclusive) of the current bucket
pub const CURRENT_MAX_DAYS: i64 = 90;
/// Last day (inclusive) of the lapsed bucket
pub const LAPSED_MAX_DAYS: i64 = 730;

/// Date format stored in the customers table
pub const STORED_DATE_FORMAT: &str = "%Y-%m-%d";

/// What to do with a record whose last-activity date cannot be parsed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidDatePolicy {
    /// Log the record, list it in the outcome and continue
    #[default]
    Skip,
    /// Stop the pass and return the error; nothing is persisted
    Abort,
}

impl std::str::FromStr for InvalidDatePolicy {
    type Err = AudienceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "abort" => Ok(Self::Abort),
            other => Err(AudienceError::InvalidConfig(format!("unknown invalid date policy: {other}"))),
        }
    }
}

/// Bucket for a last-activity date as seen from `today`
///
/// Dates after `today` count as current.
#[must_use]
pub fn bucket_of(last_activity_date: NaiveDate, today: NaiveDate) -> Segment {
    let days = (today - last_activity_date).num_days();
    if days <= CURRENT_MAX_DAYS {
        Segment::Current
    } else if days <= LAPSED_MAX_DAYS {
        Segment::Lapsed
    } else {
        Segment::ExtraLapsed
    }
}

/// Bucket for a stored record, failing only this record on a bad date
pub fn classify(record: &CustomerRecord, today: NaiveDate) -> Result<Segment> {
    let raw = record.last_activity_date.trim();
    NaiveDate::parse_from_str(raw, STORED_DATE_FORMAT)
        .map(|date| bucket_of(date, today))
        .map_err(|_| AudienceError::InvalidDate {
            id: record.id.clone(),
            value: record.last_activity_date.clone(),
        })
}

/// Stateful sorter over a customer repository
pub struct Segmenter<'a, R: CustomerRepository + ?Sized> {
    repo: &'a R,
    today: NaiveDate,
    policy: InvalidDatePolicy,
    outcome: Option<SortOutcome>,
    pending: Vec<(String, Segment)>,
}

impl<'a, R: CustomerRepository + ?Sized> Segmenter<'a, R> {
    /// Create a segmenter that evaluates recency against `today`
    pub fn new(repo: &'a R, today: NaiveDate) -> Self {
        Self {
            repo,
            today,
            policy: InvalidDatePolicy::Skip,
            outcome: None,
            pending: Vec::new(),
        }
    }

    /// Set the policy for records with unparseable dates
    #[must_use]
    pub fn with_policy(mut self, policy: InvalidDatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Date the segmenter measures recency from
    #[must_use]
    pub const fn today(&self) -> NaiveDate {
        self.today
    }

    /// Initial load: one add-list per stored segment, no removals
    pub fn add_sort(&mut self) -> Result<&SortOutcome> {
        let mut outcome = SortOutcome::empty(SortKind::Initial);
        let mut missing_key = 0usize;

        for record in self.repo.all_customers()? {
            let Some(segment) = record.segment else {
                warn!(id = %record.id, "Customer has no stored segment, skipping");
                outcome.skipped.push(SkippedRecord {
                    id: record.id,
                    reason: "no stored segment".to_string(),
                });
                continue;
            };
            match record.email {
                Some(email) => outcome.adds.get_mut(segment).push(email),
                None => missing_key += 1,
            }
        }

        // Everything stored is handed out, including the newest batch.
        outcome.batch_date = self.repo.latest_import_batch_date()?;
        self.pending.clear();

        if missing_key > 0 {
            debug!(count = missing_key, "Customers without a sync key were left out");
        }
        info!(
            current = outcome.adds.current.len(),
            lapsed = outcome.adds.lapsed.len(),
            extra_lapsed = outcome.adds.extra_lapsed.len(),
            skipped = outcome.skipped.len(),
            "Add sorting complete"
        );

        Ok(&*self.outcome.insert(outcome))
    }

    /// Incremental pass: newest arrivals plus adjacent-bucket transitions
    pub fn add_remove_sort(&mut self) -> Result<&SortOutcome> {
        let mut outcome = SortOutcome::empty(SortKind::Incremental);

        let latest = self.repo.latest_import_batch_date()?;
        if let Some(batch_date) = latest {
            let watermark = self.repo.arrivals_watermark()?;
            if watermark.is_none_or(|synced| batch_date > synced) {
                debug!(%batch_date, "Collecting arrivals");
                outcome.adds.current.extend(
                    self.repo
                        .customers_in_batch(batch_date)?
                        .into_iter()
                        .filter_map(|record| record.email),
                );
            } else {
                debug!(%batch_date, "Newest batch already synced, no arrivals");
            }
        }

        let mut updates = Vec::new();
        for record in self.repo.all_customers()? {
            let bucket = match classify(&record, self.today) {
                Ok(bucket) => bucket,
                Err(err) => match self.policy {
                    InvalidDatePolicy::Skip => {
                        warn!(id = %record.id, error = %err, "Skipping customer with invalid date");
                        outcome.skipped.push(SkippedRecord { id: record.id, reason: err.to_string() });
                        continue;
                    },
                    InvalidDatePolicy::Abort => return Err(err),
                },
            };

            let Some(stored) = record.segment else {
                outcome.skipped.push(SkippedRecord {
                    id: record.id,
                    reason: "no stored segment".to_string(),
                });
                continue;
            };

            if bucket <= stored {
                continue;
            }
            if stored.next() == Some(bucket) {
                if let Some(email) = record.email {
                    outcome.removes.get_mut(stored).push(email.clone());
                    outcome.adds.get_mut(bucket).push(email);
                }
                updates.push((record.id, bucket));
            } else {
                warn!(id = %record.id, "Customer skipped the lapsed bucket, leaving it as current");
                outcome.stranded.push(record.id);
            }
        }

        outcome.transitioned = updates.len();
        outcome.batch_date = latest;
        self.pending = updates;

        info!(
            arrivals = outcome.adds.current.len(),
            to_lapsed = outcome.adds.lapsed.len(),
            to_extra_lapsed = outcome.adds.extra_lapsed.len(),
            transitioned = outcome.transitioned,
            skipped = outcome.skipped.len(),
            stranded = outcome.stranded.len(),
            "Add-remove sorting complete"
        );

        Ok(&*self.outcome.insert(outcome))
    }

    /// Persist the last pass: advance stored segments and the arrivals watermark
    ///
    /// Call only after the lists were pushed. Until then the store is
    /// untouched and the next pass produces the same lists again.
    pub fn commit(&mut self) -> Result<usize> {
        let batch_date = self.outcome()?.batch_date;
        let changed = self.repo.update_segments(&self.pending)?;
        if let Some(batch_date) = batch_date {
            self.repo.set_arrivals_watermark(batch_date)?;
        }
        self.pending.clear();
        debug!(changed, watermark = ?batch_date, "Sort committed");
        Ok(changed)
    }

    /// Outcome of the last pass
    pub fn outcome(&self) -> Result<&SortOutcome> {
        self.outcome.as_ref().ok_or(AudienceError::NotComputed)
    }

    /// Keys to add to a segment's audience
    pub fn adds(&self, segment: Segment) -> Result<&[String]> {
        Ok(self.outcome()?.adds.get(segment))
    }

    /// Keys to remove from a segment's audience
    pub fn removes(&self, segment: Segment) -> Result<&[String]> {
        Ok(self.outcome()?.removes.get(segment))
    }

    /// Give up the segmenter and keep its last outcome
    pub fn into_outcome(self) -> Result<SortOutcome> {
        self.outcome.ok_or(AudienceError::NotComputed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::NewCustomer;
    use chrono::Duration;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn record(id: &str, last: &str) -> CustomerRecord {
        CustomerRecord {
            id: id.to_string(),
            last_activity_date: last.to_string(),
            segment: Some(Segment::Current),
            email: None,
            import_batch_date: None,
            name: None,
            phone: None,
            post_code: None,
            total_orders: None,
            created_on: None,
        }
    }

    #[test]
    fn test_bucket_edges() {
        let t = today();
        assert_eq!(bucket_of(t, t), Segment::Current);
        assert_eq!(bucket_of(t - Duration::days(90), t), Segment::Current);
        assert_eq!(bucket_of(t - Duration::days(91), t), Segment::Lapsed);
        assert_eq!(bucket_of(t - Duration::days(730), t), Segment::Lapsed);
        assert_eq!(bucket_of(t - Duration::days(731), t), Segment::ExtraLapsed);
        assert_eq!(bucket_of(t + Duration::days(3), t), Segment::Current);
    }

    #[test]
    fn test_classify_rejects_bad_date() {
        let err = classify(&record("c1", "03/15/2024"), today()).unwrap_err();
        assert!(matches!(err, AudienceError::InvalidDate { ref id, .. } if id == "c1"));
        assert!(classify(&record("c2", ""), today()).is_err());
        assert_eq!(classify(&record("c3", "2024-05-30"), today()).unwrap(), Segment::Current);
    }

    #[test]
    fn test_lists_not_computed_before_sort() {
        let db = Database::in_memory().unwrap();
        let segmenter = Segmenter::new(&db, today());
        assert!(matches!(segmenter.outcome(), Err(AudienceError::NotComputed)));
        assert!(matches!(segmenter.adds(Segment::Current), Err(AudienceError::NotComputed)));
    }

    #[test]
    fn test_commit_before_sort_is_not_computed() {
        let db = Database::in_memory().unwrap();
        let mut segmenter = Segmenter::new(&db, today());
        assert!(matches!(segmenter.commit(), Err(AudienceError::NotComputed)));
    }

    #[test]
    fn test_empty_store_yields_empty_lists() {
        let db = Database::in_memory().unwrap();
        let mut segmenter = Segmenter::new(&db, today());
        let outcome = segmenter.add_remove_sort().unwrap();
        assert!(outcome.adds.is_empty());
        assert!(outcome.removes.is_empty());
        assert!(segmenter.adds(Segment::Current).unwrap().is_empty());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("skip".parse::<InvalidDatePolicy>().unwrap(), InvalidDatePolicy::Skip);
        assert_eq!("ABORT".parse::<InvalidDatePolicy>().unwrap(), InvalidDatePolicy::Abort);
        assert!("retry".parse::<InvalidDatePolicy>().is_err());
    }

    #[test]
    fn test_sort_replaces_previous_outcome() {
        let db = Database::in_memory().unwrap();
        let batch = today();
        db.upsert_customers(&[NewCustomer {
            id: "c1".to_string(),
            last_activity_date: today() - Duration::days(200),
            segment: Segment::Lapsed,
            email: Some("c1@example.com".to_string()),
            import_batch_date: batch,
            name: None,
            phone: None,
            post_code: None,
            total_orders: None,
            created_on: batch,
        }])
        .unwrap();

        let mut segmenter = Segmenter::new(&db, today());
        assert_eq!(segmenter.add_sort().unwrap().kind, SortKind::Initial);
        assert_eq!(segmenter.adds(Segment::Lapsed).unwrap().len(), 1);
        segmenter.commit().unwrap();

        let outcome = segmenter.add_remove_sort().unwrap();
        assert_eq!(outcome.kind, SortKind::Incremental);
        assert!(outcome.adds.is_empty());
    }
}
