use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::json;
use tokio::runtime::Runtime;

use tds_fluent::promise::{DeferredHandle, ErasedValue, PromiseBackend, Settlement};
use tds_fluent::{PromiseLibrary, QueryOutcome, TdsFluentError, TdsSession};

fn mock_session() -> TdsSession {
    let mut session = TdsSession::new();
    session
        .set_mock_data_callback(|_sql, _params, _outputs| Ok(json!([{"n": 1}])))
        .unwrap();
    session
}

#[test]
fn test03_queries_settle_through_each_built_in_backend() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        for name in ["tokio", "futures"] {
            let mut session = mock_session();
            session.set_promise_library(PromiseLibrary::named(name).unwrap());

            let outcome = session
                .sql("SELECT n")
                .unwrap()
                .execute()
                .await
                .unwrap();
            assert_eq!(outcome, QueryOutcome::Rows(vec![json!({"n": 1})]));
        }
    });
}

#[test]
fn test03_unknown_library_name_is_rejected_at_selection() {
    let err = PromiseLibrary::named("q").unwrap_err();
    assert!(matches!(err, TdsFluentError::PromiseError(_)));
    assert!(err.to_string().contains("\"q\""));
}

#[test]
fn test03_non_settling_backend_fails_validation() {
    struct StuckHandle;
    impl DeferredHandle for StuckHandle {
        fn resolve(self: Box<Self>, _value: ErasedValue) {}
        fn reject(self: Box<Self>, _error: TdsFluentError) {}
    }

    struct StuckBackend;
    impl PromiseBackend for StuckBackend {
        fn defer(&self) -> (Box<dyn DeferredHandle>, BoxFuture<'static, Settlement>) {
            (Box::new(StuckHandle), std::future::pending().boxed())
        }
    }

    let err = PromiseLibrary::custom("stuck", Arc::new(StuckBackend)).unwrap_err();
    assert!(err.to_string().contains("validation failed"));
}

#[test]
fn test03_custom_conforming_backend_is_accepted() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        struct Relay(tokio::sync::oneshot::Sender<Settlement>);
        impl DeferredHandle for Relay {
            fn resolve(self: Box<Self>, value: ErasedValue) {
                let _ = self.0.send(Ok(value));
            }
            fn reject(self: Box<Self>, error: TdsFluentError) {
                let _ = self.0.send(Err(error));
            }
        }

        struct RelayBackend;
        impl PromiseBackend for RelayBackend {
            fn defer(&self) -> (Box<dyn DeferredHandle>, BoxFuture<'static, Settlement>) {
                let (tx, rx) = tokio::sync::oneshot::channel();
                let future = rx
                    .map(|received| {
                        received.unwrap_or_else(|_| {
                            Err(TdsFluentError::PromiseError("dropped".to_string()))
                        })
                    })
                    .boxed();
                (Box::new(Relay(tx)), future)
            }
        }

        let library = PromiseLibrary::custom("relay", Arc::new(RelayBackend)).unwrap();
        assert_eq!(library.name(), "relay");

        let mut session = mock_session();
        session.set_promise_library(library);

        let outcome = session.sql("SELECT n").unwrap().execute().await.unwrap();
        assert_eq!(outcome, QueryOutcome::Rows(vec![json!({"n": 1})]));
    });
}

#[test]
fn test03_rejection_propagates_through_the_backend() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut session = TdsSession::new();
        session
            .set_mock_data_callback(|_sql, _params, _outputs| {
                Err(TdsFluentError::MockError("no fixture".to_string()))
            })
            .unwrap();
        session.set_promise_library(PromiseLibrary::named("futures").unwrap());

        let err = session.sql("SELECT n").unwrap().execute().await.unwrap_err();
        assert!(err.to_string().contains("no fixture"));
    });
}
