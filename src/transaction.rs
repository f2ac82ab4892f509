use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::column::RenameFn;
use crate::error::TdsFluentError;
use crate::promise::PromiseLibrary;
use crate::query::{SharedConnection, TdsQuery};
use crate::source::ConnectionSource;

const SAVEPOINT_NAME: &str = "tds_fluent_save";

enum FinishVerb {
    Commit,
    Rollback,
}

/// A bound handle over one open transaction.
///
/// The connection stays checked out for the lifetime of the handle and is
/// shared sequentially with the queries minted from [`sql`](Self::sql);
/// commit or rollback releases it.
pub struct Transaction {
    source: ConnectionSource,
    promise: PromiseLibrary,
    renamer: Option<RenameFn>,
    conn: SharedConnection,
}

pub(crate) async fn begin(
    source: ConnectionSource,
    promise: PromiseLibrary,
    renamer: Option<RenameFn>,
) -> Result<Transaction, TdsFluentError> {
    let mut live = source.connect().await?;
    // A begin failure drops the connection unreleased; ownership still
    // closes the socket (or returns a pooled handle) on drop.
    live.driver().begin_transaction().await?;
    debug!("transaction started");
    Ok(Transaction {
        source,
        promise,
        renamer,
        conn: Arc::new(Mutex::new(Some(live))),
    })
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").finish_non_exhaustive()
    }
}

impl Transaction {
    /// Mint an execution unit that reuses this transaction's connection.
    ///
    /// # Errors
    /// `TdsFluentError::UsageError` from the underlying `sql()` set-once
    /// check.
    pub fn sql(&self, text: impl Into<String>) -> Result<TdsQuery, TdsFluentError> {
        TdsQuery::transaction_bound(
            self.source.clone(),
            self.promise.clone(),
            self.renamer.clone(),
            Arc::clone(&self.conn),
        )
        .sql(text)
    }

    /// Set a savepoint; the connection stays open.
    ///
    /// # Errors
    /// Driver failures, or `ExecutionError` once the transaction completed.
    pub async fn save_transaction(&self) -> Result<(), TdsFluentError> {
        let mut guard = self.conn.lock().await;
        match guard.as_mut() {
            Some(live) => live.driver().save_transaction(SAVEPOINT_NAME).await,
            None => Err(TdsFluentError::ExecutionError(
                "Transaction already completed".to_string(),
            )),
        }
    }

    /// Commit and release the connection.
    ///
    /// # Errors
    /// On a driver commit failure the connection is kept open inside the
    /// handle and the error propagates; the caller decides whether to retry
    /// or drop (which rolls back).
    pub async fn commit_transaction(self) -> Result<(), TdsFluentError> {
        self.finish(FinishVerb::Commit).await
    }

    /// Roll back and release the connection.
    ///
    /// # Errors
    /// Same contract as [`commit_transaction`](Self::commit_transaction).
    pub async fn rollback_transaction(self) -> Result<(), TdsFluentError> {
        self.finish(FinishVerb::Rollback).await
    }

    async fn finish(&self, verb: FinishVerb) -> Result<(), TdsFluentError> {
        let mut guard = self.conn.lock().await;
        let Some(mut live) = guard.take() else {
            return Err(TdsFluentError::ExecutionError(
                "Transaction already completed".to_string(),
            ));
        };

        let result = match verb {
            FinishVerb::Commit => live.driver().commit_transaction().await,
            FinishVerb::Rollback => live.driver().rollback_transaction().await,
        };

        match result {
            Ok(()) => {
                debug!("transaction finished");
                live.dispose().await
            }
            Err(e) => {
                *guard = Some(live);
                Err(e)
            }
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let conn = Arc::clone(&self.conn);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let mut guard = conn.lock().await;
                if let Some(mut live) = guard.take() {
                    let _ = live.driver().rollback_transaction().await;
                    let _ = live.dispose().await;
                }
            });
        }
    }
}
