use std::sync::Arc;

use serde_json::json;
use tokio::runtime::Runtime;

use tds_fluent::{QueryOutcome, TdsFluentError, TdsSession};

fn session_with_rows() -> TdsSession {
    let mut session = TdsSession::new();
    session
        .set_mock_data_callback(|_sql, _params, _outputs| {
            Ok(json!([
                {"id": 1, "name": "ada"},
                {"id": 2, "name": "grace"},
            ]))
        })
        .unwrap();
    session
}

#[test]
fn test02_row_to_object_is_the_default() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let outcome = session_with_rows()
            .sql("SELECT id, name FROM users")
            .unwrap()
            .execute()
            .await
            .unwrap();

        assert_eq!(
            outcome,
            QueryOutcome::Rows(vec![
                json!({"id": 1, "name": "ada"}),
                json!({"id": 2, "name": "grace"}),
            ])
        );
    });
}

#[test]
fn test02_row_to_array_keeps_column_order() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let outcome = session_with_rows()
            .sql("SELECT id, name FROM users")
            .unwrap()
            .row_transformer("rowToArray")
            .unwrap()
            .execute()
            .await
            .unwrap();

        assert_eq!(
            outcome,
            QueryOutcome::Rows(vec![json!([1, "ada"]), json!([2, "grace"])])
        );
    });
}

#[test]
fn test02_unknown_transformer_name_errors() {
    let err = session_with_rows()
        .sql("SELECT id FROM users")
        .unwrap()
        .row_transformer("rowToTuple")
        .unwrap_err();

    assert!(matches!(err, TdsFluentError::UsageError(_)));
    assert!(err.to_string().contains("rowToTuple"));
}

#[test]
fn test02_custom_transformer_receives_cells_and_mappings() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let outcome = session_with_rows()
            .sql("SELECT id, name FROM users")
            .unwrap()
            .row_transformer_fn(Arc::new(|row, _columns| {
                let name = row
                    .iter()
                    .find(|cell| cell.name == "name")
                    .and_then(|cell| cell.value.as_text())
                    .unwrap_or_default();
                Ok(json!(name.to_uppercase()))
            }))
            .execute()
            .await
            .unwrap();

        assert_eq!(outcome, QueryOutcome::Rows(vec![json!("ADA"), json!("GRACE")]));
    });
}

#[test]
fn test02_transformer_failure_rejects_the_operation() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let err = session_with_rows()
            .sql("SELECT id FROM users")
            .unwrap()
            .row_transformer_fn(Arc::new(|_row, _columns| {
                Err(TdsFluentError::ConversionError("bad row shape".to_string()))
            }))
            .execute()
            .await
            .unwrap_err();

        assert!(err.to_string().contains("bad row shape"));
    });
}
