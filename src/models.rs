//! Data models for customer records and segment lists
//!
//! This module contains the data structures shared by the importer, the store,
//! the segmenter and the audience sync.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::AudienceError;

/// Recency bucket a customer belongs to, ordered from most to least recent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    /// Active within the last 90 days
    Current,
    /// Last active 91 to 730 days ago
    Lapsed,
    /// Last active more than 730 days ago
    ExtraLapsed,
}

impl Segment {
    /// All segments in bucket order
    pub const ALL: [Self; 3] = [Self::Current, Self::Lapsed, Self::ExtraLapsed];

    /// Stored and displayed name of the segment
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Lapsed => "lapsed",
            Self::ExtraLapsed => "extra_lapsed",
        }
    }

    /// The next, less recent, bucket
    #[must_use]
    pub const fn next(&self) -> Option<Self> {
        match self {
            Self::Current => Some(Self::Lapsed),
            Self::Lapsed => Some(Self::ExtraLapsed),
            Self::ExtraLapsed => None,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Segment {
    type Err = AudienceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Older stores wrote "extra lapsed" with a space.
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "current" => Ok(Self::Current),
            "lapsed" => Ok(Self::Lapsed),
            "extra_lapsed" => Ok(Self::ExtraLapsed),
            other => Err(AudienceError::InvalidState(format!("unknown segment: {other}"))),
        }
    }
}

impl ToSql for Segment {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Segment {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse().map_err(|e: AudienceError| FromSqlError::Other(Box::new(e)))
    }
}

/// A customer row as read back from the store
///
/// `last_activity_date` stays raw text so that a bad value fails only that
/// record's classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerRecord {
    /// Unique customer key
    pub id: String,
    /// Last activity date as stored (ISO `YYYY-MM-DD` when well formed)
    pub last_activity_date: String,
    /// Stored segment, `None` if never classified
    pub segment: Option<Segment>,
    /// Sync key used by the audience service
    pub email: Option<String>,
    /// Stamp of the export file that last wrote this row
    pub import_batch_date: Option<NaiveDate>,
    /// Customer display name
    pub name: Option<String>,
    /// Phone number as exported
    pub phone: Option<String>,
    /// Shipping post code
    pub post_code: Option<String>,
    /// Lifetime order count as exported
    pub total_orders: Option<i64>,
    /// Date the row was first written
    pub created_on: Option<NaiveDate>,
}

/// A customer row produced by the importer, ready to upsert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCustomer {
    /// Unique customer key
    pub id: String,
    /// Parsed last activity date
    pub last_activity_date: NaiveDate,
    /// Segment classified at import time
    pub segment: Segment,
    /// Sync key, if the export carried a usable one
    pub email: Option<String>,
    /// Stamp of the export file
    pub import_batch_date: NaiveDate,
    /// Customer display name
    pub name: Option<String>,
    /// Phone number as exported
    pub phone: Option<String>,
    /// Shipping post code
    pub post_code: Option<String>,
    /// Lifetime order count as exported
    pub total_orders: Option<i64>,
    /// Date of the import run
    pub created_on: NaiveDate,
}

/// One list of sync keys per segment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentLists {
    /// Keys for the current audience
    pub current: Vec<String>,
    /// Keys for the lapsed audience
    pub lapsed: Vec<String>,
    /// Keys for the extra lapsed audience
    pub extra_lapsed: Vec<String>,
}

impl SegmentLists {
    /// Keys for one segment
    #[must_use]
    pub fn get(&self, segment: Segment) -> &[String] {
        match segment {
            Segment::Current => &self.current,
            Segment::Lapsed => &self.lapsed,
            Segment::ExtraLapsed => &self.extra_lapsed,
        }
    }

    /// Mutable list for one segment
    pub fn get_mut(&mut self, segment: Segment) -> &mut Vec<String> {
        match segment {
            Segment::Current => &mut self.current,
            Segment::Lapsed => &mut self.lapsed,
            Segment::ExtraLapsed => &mut self.extra_lapsed,
        }
    }

    /// Total number of keys across all segments
    #[must_use]
    pub fn len(&self) -> usize {
        self.current.len() + self.lapsed.len() + self.extra_lapsed.len()
    }

    /// True if every list is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which sort produced an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKind {
    /// First load: every record pushed to its stored segment
    Initial,
    /// Ongoing run: arrivals plus adjacent-bucket transitions
    Incremental,
}

/// A record the segmenter could not classify
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
    /// Customer key
    pub id: String,
    /// Why it was skipped
    pub reason: String,
}

/// Result of one segmenter pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOutcome {
    /// Pass that produced these lists
    pub kind: SortKind,
    /// Keys to add, per audience
    pub adds: SegmentLists,
    /// Keys to remove, per audience (extra lapsed is always empty)
    pub removes: SegmentLists,
    /// Records skipped because their date could not be parsed
    pub skipped: Vec<SkippedRecord>,
    /// Ids of current records that are already past the lapsed bucket
    pub stranded: Vec<String>,
    /// Number of records whose stored segment advances when the pass is committed
    pub transitioned: usize,
    /// Newest import stamp the pass covers, saved as the arrivals watermark on commit
    pub batch_date: Option<NaiveDate>,
}

impl SortOutcome {
    /// An empty outcome of the given kind
    #[must_use]
    pub fn empty(kind: SortKind) -> Self {
        Self {
            kind,
            adds: SegmentLists::default(),
            removes: SegmentLists::default(),
            skipped: Vec::new(),
            stranded: Vec::new(),
            transitioned: 0,
            batch_date: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_round_trips_through_text() {
        for segment in Segment::ALL {
            assert_eq!(segment.as_str().parse::<Segment>().unwrap(), segment);
        }
    }

    #[test]
    fn test_segment_accepts_legacy_spelling() {
        assert_eq!("extra lapsed".parse::<Segment>().unwrap(), Segment::ExtraLapsed);
        assert_eq!("Lapsed".parse::<Segment>().unwrap(), Segment::Lapsed);
        assert!("dormant".parse::<Segment>().is_err());
    }

    #[test]
    fn test_segment_order_follows_recency() {
        assert!(Segment::Current < Segment::Lapsed);
        assert!(Segment::Lapsed < Segment::ExtraLapsed);
        assert_eq!(Segment::Current.next(), Some(Segment::Lapsed));
        assert_eq!(Segment::ExtraLapsed.next(), None);
    }

    #[test]
    fn test_segment_lists_len() {
        let mut lists = SegmentLists::default();
        assert!(lists.is_empty());
        lists.get_mut(Segment::Lapsed).push("a@example.com".to_string());
        assert_eq!(lists.len(), 1);
        assert_eq!(lists.get(Segment::Lapsed), ["a@example.com".to_string()]);
    }
}
