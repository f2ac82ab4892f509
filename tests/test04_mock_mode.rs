use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::runtime::Runtime;

use tds_fluent::{MockData, QueryOutcome, SqlType, SqlValue, TdsFluentError, TdsSession};

#[test]
fn test04_null_mock_data_resolves_with_no_rows() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut session = TdsSession::new();
        session
            .set_mock_data_callback(|_sql, _params, _outputs| Ok(json!(null)))
            .unwrap();

        let outcome = session.sql("SELECT 1").unwrap().execute().await.unwrap();
        assert_eq!(outcome, QueryOutcome::Rows(vec![]));
    });
}

#[test]
fn test04_non_array_mock_data_is_rejected() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut session = TdsSession::new();
        session
            .set_mock_data_callback(|_sql, _params, _outputs| Ok(json!({"id": 1})))
            .unwrap();

        let err = session.sql("SELECT 1").unwrap().execute().await.unwrap_err();
        assert!(matches!(err, TdsFluentError::MockError(_)));
        assert!(err.to_string().contains("array of rows or null"));
    });
}

#[test]
fn test04_non_object_row_is_rejected() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut session = TdsSession::new();
        session
            .set_mock_data_callback(|_sql, _params, _outputs| Ok(json!([[1, 2]])))
            .unwrap();

        let err = session.sql("SELECT 1").unwrap().execute().await.unwrap_err();
        assert!(err.to_string().contains("plain objects"));
    });
}

#[test]
fn test04_callback_sees_sql_and_flattened_parameters() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut session = TdsSession::new();
        session
            .set_mock_data_callback(|sql, params, _outputs| {
                assert_eq!(sql, "SELECT name FROM users WHERE id = @P1");
                assert_eq!(params.get("id"), Some(&SqlValue::Int(2)));
                assert_eq!(params.len(), 1);
                Ok(json!([{"name": "grace"}]))
            })
            .unwrap();

        let rows = session
            .sql("SELECT name FROM users WHERE id = @P1")
            .unwrap()
            .parameter("id", SqlType::Int, 2)
            .execute()
            .await
            .unwrap()
            .into_rows()
            .unwrap();

        assert_eq!(rows, vec![json!({"name": "grace"})]);
    });
}

#[test]
fn test04_for_each_row_streams_and_resolves_with_count() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut session = TdsSession::new();
        session
            .set_mock_data_callback(|_sql, _params, _outputs| {
                Ok(json!([{"n": 1}, {"n": 2}, {"n": 3}]))
            })
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let outcome = session
            .sql("SELECT n FROM t")
            .unwrap()
            .for_each_row(move |row| {
                sink.lock().unwrap().push(row);
                Ok(())
            })
            .execute()
            .await
            .unwrap();

        // The mock driver reports an affected count of zero.
        assert_eq!(outcome, QueryOutcome::RowCount(Some(0)));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]
        );
    });
}

#[test]
fn test04_return_row_count_skips_accumulation() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut session = TdsSession::new();
        session
            .set_mock_data_callback(|_sql, _params, _outputs| Ok(json!([{"n": 1}])))
            .unwrap();

        let outcome = session
            .sql("UPDATE t SET n = 1")
            .unwrap()
            .return_row_count()
            .execute()
            .await
            .unwrap();

        assert_eq!(outcome.row_count(), Some(0));
        assert!(outcome.into_rows().is_none());
    });
}

#[test]
fn test04_mock_data_fixture_filters_and_projects() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut session = TdsSession::new();
        session
            .set_mock_data_callback(|_sql, params, _outputs| {
                MockData::new(vec![
                    json!({"id": 1, "name": "ada", "lang": "analytical engine"}),
                    json!({"id": 2, "name": "grace", "lang": "cobol"}),
                ])?
                .filtered(params, Some(&["id"]))
                .map(|data| data.select(Some(&["name"])))
            })
            .unwrap();

        let rows = session
            .sql("SELECT name FROM users WHERE id = @P1")
            .unwrap()
            .parameter("id", SqlType::Int, 2)
            .execute()
            .await
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(rows, vec![json!({"name": "grace"})]);

        let err = session
            .sql("SELECT name FROM users WHERE id = @P1")
            .unwrap()
            .parameter("id", SqlType::Int, 99)
            .execute()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No mock data found"));
    });
}
