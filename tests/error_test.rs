//! Tests for error types

use legisml::config::ExperimentConfig;
use legisml::labels::IssueArea;
use legisml::Error;

#[test]
fn test_registry_write_error() {
    let error = Error::RegistryWrite {
        table: "models",
        message: "UNIQUE constraint failed".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Registry write failed on models"));
    assert!(error_str.contains("UNIQUE constraint failed"));
    assert!(!error.is_recoverable());
}

#[test]
fn test_unknown_issue_area_lists_known_areas() {
    let error = "taxes".parse::<IssueArea>().unwrap_err();
    let error_str = format!("{error}");
    assert!(error_str.contains("Unknown issue area 'taxes'"));
    for area in IssueArea::ALL {
        assert!(error_str.contains(area.as_str()));
    }
    assert!(!error.is_recoverable());
}

#[test]
fn test_recoverable_errors_skip_one_cell() {
    for error in [
        Error::Storage("blob missing".to_string()),
        Error::Codec("bad key".to_string()),
        Error::Model("C must be positive".to_string()),
        Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")),
    ] {
        assert!(error.is_recoverable(), "{error}");
    }
}

#[test]
fn test_fatal_errors_abort_the_run() {
    for error in [
        Error::Config("issue_areas is empty".to_string()),
        Error::RegistryLookup("no matrices".to_string()),
        Error::Query("cohort: no such table".to_string()),
    ] {
        assert!(!error.is_recoverable(), "{error}");
    }
}

#[test]
fn test_model_error_message() {
    let error = Error::Model("predict before fit".to_string());
    assert_eq!(format!("{error}"), "Model error: predict before fit");
}

#[test]
fn test_yaml_error_converts() {
    let error = ExperimentConfig::from_yaml_str("features: [").unwrap_err();
    assert!(matches!(error, Error::Yaml(_)));
    assert!(format!("{error}").starts_with("YAML error"));
}

#[test]
fn test_sqlite_error_converts() {
    let error: Error = rusqlite::Error::InvalidQuery.into();
    assert!(format!("{error}").contains("SQLite error"));
    assert!(!error.is_recoverable());
}
