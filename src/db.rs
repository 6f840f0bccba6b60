use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::error::{AudienceError, Result};
use crate::models::{CustomerRecord, NewCustomer, Segment};
use crate::schema::{customers, sync_state, TableId};

const CUSTOMER_COLUMNS: [&str; 10] = [
    customers::ID,
    customers::LAST_ACTIVITY_DATE,
    customers::SEGMENT,
    customers::EMAIL,
    customers::IMPORT_BATCH_DATE,
    customers::NAME,
    customers::PHONE,
    customers::POST_CODE,
    customers::TOTAL_ORDERS,
    customers::CREATED_ON,
];

/// Database manager for the local customer store
///
/// One connection, used from a single thread for the length of a run.
pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (creating if needed) the database file and run migrations
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let db = Self { conn, path: Some(path.to_path_buf()) };
        db.run_migrations()?;
        db.resolve_tables()?;

        info!(path = %path.display(), "Customer store opened");
        Ok(db)
    }

    /// Open a private in-memory database, mostly for tests
    pub fn in_memory() -> Result<Self> {
        let db = Self { conn: Connection::open_in_memory()?, path: None };
        db.run_migrations()?;
        db.resolve_tables()?;
        Ok(db)
    }

    /// File backing this store, if any
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Borrow the underlying connection
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn.execute_batch(include_str!("../migrations/0001_create_tables.sql"))?;
        Ok(())
    }

    /// Check that every logical table maps to a physical one
    fn resolve_tables(&self) -> Result<()> {
        for table in TableId::ALL {
            let exists: bool = self.conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                params![table.name()],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(AudienceError::InvalidState(format!("table {table} is missing")));
            }
        }
        Ok(())
    }

    /// Insert or replace customers by id inside one transaction
    ///
    /// `created_on` keeps its first value; every other column takes the new row.
    /// The segment is the one computed at import, so a lapsed customer who
    /// shows up again with recent activity is stored as current. Nothing
    /// removes them from the lapsed audience; they stay in both until the
    /// next forward transition.
    pub fn upsert_customers(&self, records: &[NewCustomer]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "INSERT INTO {table} ({cols}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT({id}) DO UPDATE SET
                {last} = excluded.{last},
                {segment} = excluded.{segment},
                {email} = COALESCE(excluded.{email}, {table}.{email}),
                {batch} = excluded.{batch},
                {name} = COALESCE(excluded.{name}, {table}.{name}),
                {phone} = COALESCE(excluded.{phone}, {table}.{phone}),
                {post} = COALESCE(excluded.{post}, {table}.{post}),
                {orders} = COALESCE(excluded.{orders}, {table}.{orders})",
            table = customers::TABLE,
            cols = CUSTOMER_COLUMNS.join(", "),
            id = customers::ID,
            last = customers::LAST_ACTIVITY_DATE,
            segment = customers::SEGMENT,
            email = customers::EMAIL,
            batch = customers::IMPORT_BATCH_DATE,
            name = customers::NAME,
            phone = customers::PHONE,
            post = customers::POST_CODE,
            orders = customers::TOTAL_ORDERS,
        );

        let tx = self.conn.unchecked_transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare_cached(&sql)?;
            for record in records {
                written += stmt.execute(params![
                    record.id,
                    record.last_activity_date,
                    record.segment,
                    record.email,
                    record.import_batch_date,
                    record.name,
                    record.phone,
                    record.post_code,
                    record.total_orders,
                    record.created_on,
                ])?;
            }
        }
        tx.commit()?;

        debug!(rows = written, "Upserted customers");
        Ok(written)
    }

    /// Delete every row of a table
    pub fn truncate(&self, table: TableId) -> Result<usize> {
        let removed = self.conn.execute(&format!("DELETE FROM {}", table.name()), [])?;
        info!(table = %table, rows = removed, "Truncated table");
        Ok(removed)
    }

    /// Number of stored customers
    pub fn count_customers(&self) -> Result<usize> {
        let count: i64 =
            self.conn.query_row(&format!("SELECT COUNT(*) FROM {}", customers::TABLE), [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Every stored customer, ordered by id
    pub fn all_customers(&self) -> Result<Vec<CustomerRecord>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            CUSTOMER_COLUMNS.join(", "),
            customers::TABLE,
            customers::ID
        );
        self.query_customers(&sql, [])
    }

    /// Customers stamped with the given import date
    pub fn customers_in_batch(&self, batch_date: NaiveDate) -> Result<Vec<CustomerRecord>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1 ORDER BY {}",
            CUSTOMER_COLUMNS.join(", "),
            customers::TABLE,
            customers::IMPORT_BATCH_DATE,
            customers::ID
        );
        self.query_customers(&sql, params![batch_date])
    }

    /// Look up one customer
    pub fn get_customer(&self, id: &str) -> Result<Option<CustomerRecord>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            CUSTOMER_COLUMNS.join(", "),
            customers::TABLE,
            customers::ID
        );
        Ok(self.conn.query_row(&sql, params![id], Self::map_customer).optional()?)
    }

    /// Most recent import stamp present in the store
    pub fn latest_import_batch_date(&self) -> Result<Option<NaiveDate>> {
        let sql = format!("SELECT MAX({}) FROM {}", customers::IMPORT_BATCH_DATE, customers::TABLE);
        Ok(self.conn.query_row(&sql, [], |row| row.get::<_, Option<NaiveDate>>(0))?)
    }

    /// Overwrite the segments of many customers in one transaction
    pub fn update_segments(&self, updates: &[(String, Segment)]) -> Result<usize> {
        if updates.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "UPDATE {} SET {} = ?1 WHERE {} = ?2",
                customers::TABLE,
                customers::SEGMENT,
                customers::ID
            ))?;
            for (id, segment) in updates {
                changed += stmt.execute(params![segment, id])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    /// Read a sync-state value
    pub fn get_state(&self, key: &str) -> Result<Option<String>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            sync_state::VALUE,
            sync_state::TABLE,
            sync_state::KEY
        );
        Ok(self.conn.query_row(&sql, params![key], |row| row.get(0)).optional()?)
    }

    /// Write a sync-state value
    pub fn set_state(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO {table} ({key}, {value}) VALUES (?1, ?2)
                 ON CONFLICT({key}) DO UPDATE SET {value} = excluded.{value}",
                table = sync_state::TABLE,
                key = sync_state::KEY,
                value = sync_state::VALUE,
            ),
            params![key, value],
        )?;
        Ok(())
    }

    fn query_customers<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<CustomerRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, Self::map_customer)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Map a database row to a `CustomerRecord`
    fn map_customer(row: &Row) -> rusqlite::Result<CustomerRecord> {
        Ok(CustomerRecord {
            id: row.get(customers::ID)?,
            last_activity_date: row.get::<_, Option<String>>(customers::LAST_ACTIVITY_DATE)?.unwrap_or_default(),
            segment: row.get(customers::SEGMENT)?,
            email: row.get(customers::EMAIL)?,
            import_batch_date: row.get(customers::IMPORT_BATCH_DATE)?,
            name: row.get(customers::NAME)?,
            phone: row.get(customers::PHONE)?,
            post_code: row.get(customers::POST_CODE)?,
            total_orders: row.get(customers::TOTAL_ORDERS)?,
            created_on: row.get(customers::CREATED_ON)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(id: &str, batch: NaiveDate) -> NewCustomer {
        NewCustomer {
            id: id.to_string(),
            last_activity_date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            segment: Segment::Current,
            email: Some(format!("{id}@example.com")),
            import_batch_date: batch,
            name: None,
            phone: None,
            post_code: None,
            total_orders: Some(3),
            created_on: batch,
        }
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let db = Database::in_memory().unwrap();
        let first = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let second = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();

        db.upsert_customers(&[customer("c1", first), customer("c2", first)]).unwrap();
        let mut again = customer("c1", second);
        again.email = None;
        again.segment = Segment::Lapsed;
        db.upsert_customers(&[again]).unwrap();

        assert_eq!(db.count_customers().unwrap(), 2);
        let stored = db.get_customer("c1").unwrap().unwrap();
        assert_eq!(stored.segment, Some(Segment::Lapsed));
        assert_eq!(stored.import_batch_date, Some(second));
        // email is kept when the new row has none
        assert_eq!(stored.email.as_deref(), Some("c1@example.com"));
        assert_eq!(stored.created_on, Some(first));
    }

    #[test]
    fn test_latest_batch_and_members() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.latest_import_batch_date().unwrap(), None);

        let old = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let new = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        db.upsert_customers(&[customer("a", old), customer("b", new), customer("c", new)]).unwrap();

        assert_eq!(db.latest_import_batch_date().unwrap(), Some(new));
        let ids: Vec<_> = db.customers_in_batch(new).unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_truncate_and_state() {
        let db = Database::in_memory().unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        db.upsert_customers(&[customer("a", day)]).unwrap();
        db.set_state("k", "v1").unwrap();
        db.set_state("k", "v2").unwrap();

        assert_eq!(db.truncate(TableId::Customers).unwrap(), 1);
        assert_eq!(db.count_customers().unwrap(), 0);
        assert_eq!(db.get_state("k").unwrap().as_deref(), Some("v2"));
        assert_eq!(db.get_state("missing").unwrap(), None);
    }
}
