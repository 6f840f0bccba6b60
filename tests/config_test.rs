//! Comprehensive unit tests for config.rs module

use std::fs;

use audience_sync::config::{AppConfig, DEBUG_AUDIENCE_SUFFIX};
use audience_sync::models::Segment;
use audience_sync::segmenter::InvalidDatePolicy;
use tempfile::TempDir;

#[test]
fn test_default_database_and_logging() {
    let config = AppConfig::default();

    assert_eq!(config.database.path, "data/customers.db");
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.file_path, None);
    assert_eq!(config.logging.format, "text");
}

#[test]
fn test_default_source_config() {
    let config = AppConfig::default();

    assert_eq!(config.source.drop_dir, "./drop");
    assert_eq!(config.source.initial_keyword, "vendor");
    assert_eq!(config.source.incremental_keyword, "_");
}

#[test]
fn test_default_audience_config() {
    let config = AppConfig::default();

    assert_eq!(config.audience.current_name, "Current Customers");
    assert_eq!(config.audience.lapsed_name, "Lapsed Customers");
    assert_eq!(config.audience.extra_lapsed_name, "Extra Lapsed Customers");
    assert_eq!(config.audience.add_batch_size, 10_000);
    assert_eq!(config.audience.remove_batch_size, 500);
    assert_eq!(config.audience.request_timeout_secs, 60);
    assert_eq!(config.segmenter.invalid_date_policy, InvalidDatePolicy::Skip);
    assert_eq!(config.report.output_directory, None);
    assert!(!config.debug);
}

#[test]
fn test_config_validation_success() {
    assert!(AppConfig::default().validate().is_ok());
}

#[test]
fn test_config_validation_invalid_log_level() {
    let mut config = AppConfig::default();
    config.logging.level = "verbose".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_invalid_log_format() {
    let mut config = AppConfig::default();
    config.logging.format = "xml".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_empty_keyword() {
    let mut config = AppConfig::default();
    config.source.incremental_keyword = String::new();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_batch_sizes_above_ceiling() {
    let mut config = AppConfig::default();
    config.audience.add_batch_size = 10_001;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.audience.remove_batch_size = 501;
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_smaller_batches_allowed() {
    let mut config = AppConfig::default();
    config.audience.add_batch_size = 2_500;
    config.audience.remove_batch_size = 100;
    assert!(config.validate().is_ok());
    assert_eq!(config.batch_limits().add, 2_500);
    assert_eq!(config.batch_limits().remove, 100);
}

#[test]
fn test_config_validation_duplicate_names() {
    let mut config = AppConfig::default();
    config.audience.lapsed_name = config.audience.current_name.clone();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_empty_name() {
    let mut config = AppConfig::default();
    config.audience.extra_lapsed_name = "  ".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_credentials_required() {
    let mut config = AppConfig::default();
    assert!(config.validate_credentials().is_err());

    config.audience.access_token = "token".to_string();
    config.audience.account_id = "1234".to_string();
    assert!(config.validate_credentials().is_ok());

    // debug mode needs the testing account
    config.debug = true;
    assert!(config.validate_credentials().is_err());
    config.audience.testing_account_id = "5678".to_string();
    assert!(config.validate_credentials().is_ok());
}

#[test]
fn test_audience_names_in_debug_mode() {
    let mut config = AppConfig::default();
    config.debug = true;

    for segment in Segment::ALL {
        assert!(config.audience_name(segment).ends_with(DEBUG_AUDIENCE_SUFFIX));
    }
    assert_eq!(config.audience_name(Segment::ExtraLapsed), "Extra Lapsed Customers test");
}

#[test]
fn test_load_from_file_overrides_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("audience.toml");
    fs::write(
        &path,
        r#"
debug = true

[database]
path = "/tmp/audience-sync-test.db"

[source]
drop_dir = "/srv/ftp/exports"

[audience]
current_name = "Active Buyers"
remove_batch_size = 250

[segmenter]
invalid_date_policy = "abort"

[report]
output_directory = "/tmp/reports"
"#,
    )
    .unwrap();

    let config = AppConfig::load_from(Some(&path)).unwrap();
    assert!(config.debug);
    assert_eq!(config.database.path, "/tmp/audience-sync-test.db");
    assert_eq!(config.source.drop_dir, "/srv/ftp/exports");
    // untouched keys keep their defaults
    assert_eq!(config.source.initial_keyword, "vendor");
    assert_eq!(config.audience.current_name, "Active Buyers");
    assert_eq!(config.audience.add_batch_size, 10_000);
    assert_eq!(config.audience.remove_batch_size, 250);
    assert_eq!(config.segmenter.invalid_date_policy, InvalidDatePolicy::Abort);
    assert_eq!(config.report.output_directory.as_deref(), Some("/tmp/reports"));
}

#[test]
fn test_load_from_rejects_invalid_file_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("audience.toml");
    fs::write(&path, "[audience]\nadd_batch_size = 20000\n").unwrap();

    assert!(AppConfig::load_from(Some(&path)).is_err());
}

#[test]
fn test_load_from_missing_explicit_file_fails() {
    let dir = TempDir::new().unwrap();
    assert!(AppConfig::load_from(Some(&dir.path().join("missing.toml"))).is_err());
}

#[test]
fn test_config_serialization_round_trip() {
    let config = AppConfig::default();
    let json = serde_json::to_string(&config).unwrap();
    let back: AppConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back.audience.lapsed_name, config.audience.lapsed_name);
    assert_eq!(back.source.drop_dir, config.source.drop_dir);
}
