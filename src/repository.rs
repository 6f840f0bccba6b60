use chrono::NaiveDate;

use crate::db::Database;
use crate::error::{AudienceError, Result};
use crate::models::{CustomerRecord, Segment};
use crate::schema::sync_state;

/// Storage operations the segmenter needs
pub trait CustomerRepository {
    /// Every stored customer
    fn all_customers(&self) -> Result<Vec<CustomerRecord>>;

    /// Most recent import stamp, if any customer is stored
    fn latest_import_batch_date(&self) -> Result<Option<NaiveDate>>;

    /// Customers carrying the given import stamp
    fn customers_in_batch(&self, batch_date: NaiveDate) -> Result<Vec<CustomerRecord>>;

    /// Persist new segments by customer id
    fn update_segments(&self, updates: &[(String, Segment)]) -> Result<usize>;

    /// Latest import stamp whose arrivals were already handed out
    fn arrivals_watermark(&self) -> Result<Option<NaiveDate>>;

    /// Move the arrivals watermark
    fn set_arrivals_watermark(&self, batch_date: NaiveDate) -> Result<()>;
}

impl CustomerRepository for Database {
    fn all_customers(&self) -> Result<Vec<CustomerRecord>> {
        Self::all_customers(self)
    }

    fn latest_import_batch_date(&self) -> Result<Option<NaiveDate>> {
        Self::latest_import_batch_date(self)
    }

    fn customers_in_batch(&self, batch_date: NaiveDate) -> Result<Vec<CustomerRecord>> {
        Self::customers_in_batch(self, batch_date)
    }

    fn update_segments(&self, updates: &[(String, Segment)]) -> Result<usize> {
        Self::update_segments(self, updates)
    }

    fn arrivals_watermark(&self) -> Result<Option<NaiveDate>> {
        self.get_state(sync_state::ARRIVALS_WATERMARK)?
            .map(|raw| {
                NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                    .map_err(|_| AudienceError::InvalidState(format!("corrupt arrivals watermark: {raw}")))
            })
            .transpose()
    }

    fn set_arrivals_watermark(&self, batch_date: NaiveDate) -> Result<()> {
        self.set_state(sync_state::ARRIVALS_WATERMARK, &batch_date.format("%Y-%m-%d").to_string())
    }
}
