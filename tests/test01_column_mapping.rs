use serde_json::json;
use tokio::runtime::Runtime;

use tds_fluent::{QueryOutcome, TdsColumn, TdsFluentError, TdsSession, camel_case};

fn user_session() -> TdsSession {
    let mut session = TdsSession::new();
    session
        .set_mock_data_callback(|_sql, _params, _outputs| {
            Ok(json!([
                {"user_id": 1, "first_name": "ada", "is_active": "Y"},
                {"user_id": 2, "first_name": "grace", "is_active": 0},
            ]))
        })
        .unwrap();
    session
}

#[test]
fn test01_default_renamer_applies_to_unmapped_columns() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut session = user_session();
        session.set_default_column_renamer(camel_case);

        let outcome = session
            .sql("SELECT user_id, first_name FROM users")
            .unwrap()
            .execute()
            .await
            .unwrap();

        assert_eq!(
            outcome,
            QueryOutcome::Rows(vec![
                json!({"userId": 1, "firstName": "ada", "isActive": "Y"}),
                json!({"userId": 2, "firstName": "grace", "isActive": 0}),
            ])
        );
    });
}

#[test]
fn test01_column_as_assigns_deep_paths() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let outcome = user_session()
            .sql("SELECT user_id, first_name FROM users")
            .unwrap()
            .column_as("user_id", "id")
            .column_as("first_name", "profile.name")
            .column_map(TdsColumn::with_path("is_active", "profile.active").as_boolean())
            .execute()
            .await
            .unwrap();

        assert_eq!(
            outcome,
            QueryOutcome::Rows(vec![
                json!({"id": 1, "profile": {"name": "ada", "active": true}}),
                json!({"id": 2, "profile": {"name": "grace", "active": false}}),
            ])
        );
    });
}

#[test]
fn test01_explicit_mapping_wins_over_renamer() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut session = user_session();
        session.set_default_column_renamer(camel_case);

        let outcome = session
            .sql("SELECT user_id FROM users")
            .unwrap()
            .column_as("user_id", "ident")
            .execute()
            .await
            .unwrap();

        let rows = outcome.into_rows().unwrap();
        assert_eq!(rows[0]["ident"], json!(1));
        assert!(rows[0].get("userId").is_none());
    });
}

#[test]
fn test01_path_collision_rejects_the_query() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let err = user_session()
            .sql("SELECT user_id, first_name FROM users")
            .unwrap()
            .column_as("user_id", "a")
            .column_as("first_name", "a.b")
            .execute()
            .await
            .unwrap_err();

        assert!(matches!(err, TdsFluentError::ConversionError(_)));
        assert!(err.to_string().contains("conflict"));
    });
}

#[test]
fn test01_bad_boolean_text_rejects_the_row() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut session = TdsSession::new();
        session
            .set_mock_data_callback(|_sql, _params, _outputs| Ok(json!([{"flag": "maybe"}])))
            .unwrap();

        let err = session
            .sql("SELECT flag FROM t")
            .unwrap()
            .column_map(TdsColumn::new("flag").as_boolean())
            .execute()
            .await
            .unwrap_err();

        assert!(err.to_string().contains("maybe"));
    });
}

#[test]
fn test01_as_date_parses_epoch_and_text() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut session = TdsSession::new();
        session
            .set_mock_data_callback(|_sql, _params, _outputs| {
                Ok(json!([
                    {"created": 0, "updated": "2024-05-01 12:30:00"},
                ]))
            })
            .unwrap();

        let rows = session
            .sql("SELECT created, updated FROM t")
            .unwrap()
            .column_map(TdsColumn::new("created").as_date())
            .column_map(TdsColumn::new("updated").as_date())
            .execute()
            .await
            .unwrap()
            .into_rows()
            .unwrap();

        assert_eq!(rows[0]["created"], json!("1970-01-01T00:00:00"));
        assert_eq!(rows[0]["updated"], json!("2024-05-01T12:30:00"));
    });
}
