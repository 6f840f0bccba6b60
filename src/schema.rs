//! Database schema definitions
//!
//! This module provides constants for table and column names used with rusqlite,
//! plus the typed table registry the store resolves at startup.

use std::fmt;

/// Customers table schema
pub mod customers {
    /// Table name
    pub const TABLE: &str = "customers";
    /// Primary key column
    pub const ID: &str = "id";
    /// Last activity date column (ISO text)
    pub const LAST_ACTIVITY_DATE: &str = "last_activity_date";
    /// Segment column
    pub const SEGMENT: &str = "segment";
    /// Sync key column
    pub const EMAIL: &str = "email";
    /// Import stamp column
    pub const IMPORT_BATCH_DATE: &str = "import_batch_date";
    /// Display name column
    pub const NAME: &str = "name";
    /// Phone number column
    pub const PHONE: &str = "phone";
    /// Post code column
    pub const POST_CODE: &str = "post_code";
    /// Lifetime order count column
    pub const TOTAL_ORDERS: &str = "total_orders";
    /// First write date column
    pub const CREATED_ON: &str = "created_on";
}

/// Sync state key/value table schema
pub mod sync_state {
    /// Table name
    pub const TABLE: &str = "sync_state";
    /// Key column
    pub const KEY: &str = "key";
    /// Value column
    pub const VALUE: &str = "value";
    /// Latest import stamp whose arrivals were already emitted
    pub const ARRIVALS_WATERMARK: &str = "arrivals_watermark";
}

/// Logical tables known to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableId {
    /// Customer records
    Customers,
    /// Sync bookkeeping
    SyncState,
}

impl TableId {
    /// Every table the migrations create
    pub const ALL: [Self; 2] = [Self::Customers, Self::SyncState];

    /// Physical table name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Customers => customers::TABLE,
            Self::SyncState => sync_state::TABLE,
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
