use std::fs;

use audience_sync::db::Database;
use audience_sync::error::AudienceError;
use audience_sync::importer::{DirectorySource, FileSource, Importer};
use audience_sync::models::Segment;
use audience_sync::segmenter::InvalidDatePolicy;
use chrono::NaiveDate;
use tempfile::TempDir;

const VENDOR_HEADER: &str = "Sell-to Customer No_,Sell-to Customer Name,USA Email,Phone No_,Ship-to Post Code,Last Order Date,Total Number of Orders";

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

fn write_export(dir: &TempDir, name: &str, rows: &[&str]) {
    let mut contents = String::from(VENDOR_HEADER);
    for row in rows {
        contents.push_str("\r\n");
        contents.push_str(row);
    }
    contents.push_str("\r\n");
    fs::write(dir.path().join(name), contents).unwrap();
}

#[test]
fn test_directory_source_lists_files_only() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("archive_20240101.csv")).unwrap();
    fs::write(dir.path().join("vendor_20240101.csv"), "x").unwrap();

    let source = DirectorySource::new(dir.path());
    assert_eq!(source.list().unwrap(), vec!["vendor_20240101.csv"]);
    assert_eq!(source.fetch("vendor_20240101.csv").unwrap(), b"x");
    assert!(matches!(source.fetch("missing.csv"), Err(AudienceError::Io(_))));
}

#[test]
fn test_import_vendor_exports_in_stamp_order() {
    let drop = TempDir::new().unwrap();
    write_export(&drop, "vendor_20240520.csv", &["C1,Ann,ann@example.com,555-0100,98101,05/19/2024,3"]);
    // older file listed second on purpose; the newer row must win
    write_export(
        &drop,
        "vendor_20240301.csv",
        &[
            "C1,Ann,ann.old@example.com,555-0100,98101,02/28/2024,2",
            "C2,Bo,bo@example.com,,98052,2023-02-01,1",
        ],
    );
    fs::write(drop.path().join("vendor-history-2016.xlsx"), b"PK").unwrap();
    fs::write(drop.path().join("notes.txt"), "ignore me").unwrap();

    let db = Database::in_memory().unwrap();
    let importer = Importer::new(DirectorySource::new(drop.path()), today(), InvalidDatePolicy::Skip);
    let summary = importer.import(&db, "vendor").unwrap();

    assert_eq!(summary.files, vec!["vendor_20240301.csv", "vendor_20240520.csv"]);
    assert_eq!(summary.imported, 3);
    assert!(summary.rejected.is_empty());
    assert_eq!(db.count_customers().unwrap(), 2);

    let ann = db.get_customer("C1").unwrap().unwrap();
    assert_eq!(ann.email.as_deref(), Some("ann@example.com"));
    assert_eq!(ann.last_activity_date, "2024-05-19");
    assert_eq!(ann.import_batch_date, NaiveDate::from_ymd_opt(2024, 5, 20));
    assert_eq!(ann.created_on, Some(today()));
    assert_eq!(ann.total_orders, Some(3));

    let bo = db.get_customer("C2").unwrap().unwrap();
    assert_eq!(bo.segment, Some(Segment::Lapsed));
    assert_eq!(bo.phone, None);
    assert_eq!(bo.post_code.as_deref(), Some("98052"));
    assert_eq!(db.latest_import_batch_date().unwrap(), NaiveDate::from_ymd_opt(2024, 5, 20));
}

#[test]
fn test_import_generic_headers() {
    let drop = TempDir::new().unwrap();
    fs::write(
        drop.path().join("daily_20240531.csv"),
        "customer_id,email,last_activity_date\nX1,x1@example.com,2024-05-30\nX2,,2021-01-01\n",
    )
    .unwrap();

    let db = Database::in_memory().unwrap();
    let importer = Importer::new(DirectorySource::new(drop.path()), today(), InvalidDatePolicy::Skip);
    let summary = importer.import(&db, "_").unwrap();

    assert_eq!(summary.imported, 2);
    let x2 = db.get_customer("X2").unwrap().unwrap();
    assert_eq!(x2.email, None);
    assert_eq!(x2.segment, Some(Segment::ExtraLapsed));
}

#[test]
fn test_import_since_skips_synced_stamps() {
    let drop = TempDir::new().unwrap();
    write_export(&drop, "vendor_20240101.csv", &["C1,Ann,ann@example.com,,98101,2023-12-30,1"]);
    write_export(&drop, "vendor_20240531.csv", &["C2,Bo,bo@example.com,,98052,2024-05-30,1"]);

    let db = Database::in_memory().unwrap();
    let importer = Importer::new(DirectorySource::new(drop.path()), today(), InvalidDatePolicy::Skip);
    let summary = importer
        .import_since(&db, "_", NaiveDate::from_ymd_opt(2024, 1, 1))
        .unwrap();

    assert_eq!(summary.files, vec!["vendor_20240531.csv"]);
    assert!(db.get_customer("C1").unwrap().is_none());
}

#[test]
fn test_empty_drop_is_not_an_error() {
    let drop = TempDir::new().unwrap();
    let db = Database::in_memory().unwrap();
    let importer = Importer::new(DirectorySource::new(drop.path()), today(), InvalidDatePolicy::Skip);

    let summary = importer.import(&db, "vendor").unwrap();
    assert!(summary.files.is_empty());
    assert_eq!(summary.imported, 0);
}

#[test]
fn test_bad_rows_are_reported_or_abort() {
    let drop = TempDir::new().unwrap();
    write_export(
        &drop,
        "vendor_20240531.csv",
        &["C1,Ann,ann@example.com,,98101,yesterday,1", "C2,Bo,bo@example.com,,98052,2024-05-30,1", ",No Id,x@example.com,,,2024-05-30,1"],
    );

    let db = Database::in_memory().unwrap();
    let skipping = Importer::new(DirectorySource::new(drop.path()), today(), InvalidDatePolicy::Skip);
    let summary = skipping.import(&db, "vendor").unwrap();
    assert_eq!(summary.imported, 1);
    assert_eq!(summary.rejected.len(), 2);
    assert_eq!(summary.rejected[0].id.as_deref(), Some("C1"));
    assert_eq!(summary.rejected[1].id, None);

    let fresh = Database::in_memory().unwrap();
    let aborting = Importer::new(DirectorySource::new(drop.path()), today(), InvalidDatePolicy::Abort);
    assert!(matches!(aborting.import(&fresh, "vendor"), Err(AudienceError::InvalidDate { .. })));
    assert_eq!(fresh.count_customers().unwrap(), 0);
}
