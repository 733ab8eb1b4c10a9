//! Error classification tests

use rowpoll_rdbc::error::{Error, ErrorCategory};

#[test]
fn test_transient_errors_are_retriable() {
    let reset = Error::connection("connection reset by peer");
    assert_eq!(reset.category(), ErrorCategory::Connection);
    assert!(reset.is_retriable());

    let slow = Error::timeout("query did not start within 30s");
    assert_eq!(slow.category(), ErrorCategory::Timeout);
    assert!(slow.is_retriable());
    assert!(slow.to_string().starts_with("timeout"));
}

#[test]
fn test_rejected_query_keeps_sql() {
    let err = Error::query_with_sql("syntax error at or near \"FORM\"", "SELECT * FORM orders");

    assert_eq!(err.category(), ErrorCategory::Query);
    assert_eq!(err.sql(), Some("SELECT * FORM orders"));
    assert!(!err.is_retriable());
    assert_eq!(Error::config("bad url").sql(), None);
}

#[test]
fn test_mapping_error_has_cause() {
    let json_err = serde_json::from_str::<u32>("\"x\"").unwrap_err();
    let err = Error::mapping_with_source("cannot map row to Order", json_err);

    assert_eq!(err.category(), ErrorCategory::Mapping);
    assert!(err.to_string().starts_with("row mapping error"));
    assert!(std::error::Error::source(&err).is_some());
    assert!(std::error::Error::source(&Error::mapping("missing field `id`")).is_none());
}

#[test]
fn test_connection_error_has_cause() {
    let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
    let err = Error::connection_with_source("failed to connect", io);

    assert_eq!(err.to_string(), "connection error: failed to connect");
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn test_second_row_in_single_fetch() {
    let err = Error::IncorrectResultSize {
        expected: 1,
        actual: 2,
    };

    assert_eq!(err.category(), ErrorCategory::ResultSize);
    assert_eq!(err.to_string(), "incorrect result size: expected 1, actual 2");
    assert!(!err.is_retriable());
}

#[test]
fn test_category_names() {
    let names: Vec<_> = [
        ErrorCategory::Connection,
        ErrorCategory::Query,
        ErrorCategory::Mapping,
        ErrorCategory::ResultSize,
        ErrorCategory::Timeout,
        ErrorCategory::Configuration,
    ]
    .iter()
    .map(ToString::to_string)
    .collect();

    assert_eq!(
        names,
        ["connection", "query", "mapping", "result_size", "timeout", "configuration"]
    );
    assert!(!ErrorCategory::Configuration.is_retriable());
}
