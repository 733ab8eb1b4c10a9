//! Query source behavior against a scripted database

use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use rowpoll::prelude::*;
use rowpoll::rdbc::testing::MockConnection;
use rowpoll::rdbc::Row;

#[derive(Debug, Deserialize, PartialEq)]
struct Person {
    id: i32,
    name: String,
}

fn person(id: i32, name: &str) -> Row {
    Row::from_pairs([("id", Value::Int32(id)), ("name", Value::from(name))])
}

fn people_db() -> Arc<MockConnection> {
    Arc::new(
        MockConnection::new()
            .with_rows(
                "SELECT * FROM person",
                vec![person(1, "Alice"), person(2, "Bob"), person(3, "Carol")],
            )
            .with_rows("SELECT * FROM person WHERE id = 1", vec![person(1, "Alice")])
            .with_rows("SELECT * FROM person WHERE id = 0", vec![]),
    )
}

#[tokio::test]
async fn test_stream_returns_all_rows_in_order() {
    let source = QuerySource::builder(DatabaseClient::new(people_db()), "SELECT * FROM person")
        .payload_type::<Person>()
        .initialize(&Registry::new());

    let stream = source.poll().unwrap().into_stream().unwrap();
    let people: Vec<Person> = stream.map(|p| p.unwrap()).collect().await;

    assert_eq!(
        people,
        vec![
            Person { id: 1, name: "Alice".into() },
            Person { id: 2, name: "Bob".into() },
            Person { id: 3, name: "Carol".into() },
        ]
    );
}

#[tokio::test]
async fn test_single_result_returns_one_row() {
    let source = QuerySource::builder(
        DatabaseClient::new(people_db()),
        "SELECT * FROM person WHERE id = 1",
    )
    .payload_type::<Person>()
    .expect_single_result(true)
    .initialize(&Registry::new());

    let payload = source.poll().unwrap();
    assert!(payload.is_single());
    let person = payload.into_single().unwrap().await.unwrap();
    assert_eq!(
        person,
        Some(Person {
            id: 1,
            name: "Alice".into()
        })
    );
}

#[tokio::test]
async fn test_single_result_no_rows_is_none() {
    let source = QuerySource::builder(
        DatabaseClient::new(people_db()),
        "SELECT * FROM person WHERE id = 0",
    )
    .expect_single_result(true)
    .initialize(&Registry::new());

    let result = source.poll().unwrap().into_single().unwrap().await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_single_result_with_many_rows_fails() {
    let source = QuerySource::builder(DatabaseClient::new(people_db()), "SELECT * FROM person")
        .expect_single_result(true)
        .initialize(&Registry::new());

    let err = source.poll().unwrap().collect().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Database(rowpoll::rdbc::Error::IncorrectResultSize {
            expected: 1,
            actual: 2
        })
    ));
}

#[tokio::test]
async fn test_expression_resolving_to_number_fails_before_query() {
    let conn = people_db();
    let source = QuerySource::builder(
        DatabaseClient::new(conn.clone()),
        QuerySpec::variable("query"),
    )
    .initialize(&Registry::new().register("query", 42));

    for _ in 0..2 {
        let err = source.poll().unwrap_err();
        assert!(matches!(err, Error::QueryType { .. }));
        assert!(err.to_string().contains("42"));
    }
    assert_eq!(conn.query_count(), 0);
}

#[tokio::test]
async fn test_expression_resolving_to_null_or_array_fails_before_query() {
    for (value, expected_type) in [(serde_json::Value::Null, "null"), (json!(["SELECT 1"]), "array")] {
        let conn = people_db();
        let source = QuerySource::builder(DatabaseClient::new(conn.clone()), QuerySpec::variable("q"))
            .initialize(&Registry::new().register("q", value));

        let err = source.poll().unwrap_err();
        assert!(
            matches!(err, Error::QueryType { value_type, .. } if value_type == expected_type),
            "unexpected error: {err:?}"
        );
        assert!(err.is_fatal());
        assert!(err
            .to_string()
            .starts_with("query expression must evaluate to a string, got "));
        assert_eq!(conn.query_count(), 0);
    }
}

#[tokio::test]
async fn test_expression_resolving_to_object_fails() {
    let source = QuerySource::builder(
        DatabaseClient::new(people_db()),
        QuerySpec::from_fn(|_| Ok(json!({"sql": "SELECT 1"}))),
    )
    .initialize(&Registry::new());

    match source.poll() {
        Err(Error::QueryType { value_type, value }) => {
            assert_eq!(value_type, "object");
            assert!(value.contains("SELECT 1"));
        }
        other => panic!("expected a type error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_variable_expression_resolved_per_poll() {
    let conn = people_db();
    let source = QuerySource::builder(
        DatabaseClient::new(conn.clone()),
        QuerySpec::template("SELECT * FROM person WHERE id = #{id}"),
    )
    .row_mapper(JsonRowMapper)
    .initialize(&Registry::new().register("id", 1));

    let rows = source.poll().unwrap().collect().await.unwrap();
    assert_eq!(rows, vec![json!({"id": 1, "name": "Alice"})]);

    source.context().set_variable("id", 0);
    assert!(source.poll().unwrap().collect().await.unwrap().is_empty());

    assert_eq!(
        conn.queries(),
        vec![
            "SELECT * FROM person WHERE id = 1".to_string(),
            "SELECT * FROM person WHERE id = 0".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_database_error_propagates_unchanged() {
    let conn = Arc::new(MockConnection::new().with_error("SELECT * FROM nope", "relation \"nope\" does not exist"));
    let source = QuerySource::builder(DatabaseClient::new(conn), "SELECT * FROM nope")
        .initialize(&Registry::new());

    let mut stream = source.poll().unwrap().into_stream().unwrap();
    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!(err.sql(), Some("SELECT * FROM nope"));
    assert!(err.to_string().contains("does not exist"));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_uninitialized_source_always_fails() {
    let conn = people_db();
    let lifecycle = SourceLifecycle::new(QuerySource::builder(
        DatabaseClient::new(conn.clone()),
        "SELECT * FROM person",
    ));

    for _ in 0..5 {
        assert!(matches!(lifecycle.poll(), Err(Error::Uninitialized)));
    }
    assert!(!lifecycle.is_initialized());
    assert_eq!(conn.query_count(), 0);

    lifecycle.initialize(&Registry::new());
    assert_eq!(lifecycle.poll().unwrap().collect().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_concurrent_polls() {
    let source = Arc::new(
        QuerySource::builder(DatabaseClient::new(people_db()), "SELECT * FROM person")
            .initialize(&Registry::new()),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let source = Arc::clone(&source);
            tokio::spawn(async move { source.poll().unwrap().collect().await.unwrap().len() })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap(), 3);
    }
    assert_eq!(source.stats().polls, 8);
}
