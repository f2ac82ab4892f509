use async_trait::async_trait;
use bb8::PooledConnection;
use bb8_tiberius::ConnectionManager;
use tracing::debug;

use super::config::MssqlClient;
use super::params::{bind_statement, bind_value};
use super::query::{collect_result_sets, drain_stream};
use crate::driver::{DriverConnection, Statement, StatementEvents};
use crate::error::TdsFluentError;
use crate::types::Cell;

enum Handle {
    Single(MssqlClient),
    Pooled(PooledConnection<'static, ConnectionManager>),
}

/// `DriverConnection` over a tiberius client, either a dedicated connection
/// or one checked out of a bb8 pool.
pub struct TiberiusConnection {
    handle: Option<Handle>,
}

impl TiberiusConnection {
    #[must_use]
    pub fn single(client: MssqlClient) -> Self {
        Self {
            handle: Some(Handle::Single(client)),
        }
    }

    #[must_use]
    pub fn pooled(conn: PooledConnection<'static, ConnectionManager>) -> Self {
        Self {
            handle: Some(Handle::Pooled(conn)),
        }
    }

    fn client(&mut self) -> Result<&mut MssqlClient, TdsFluentError> {
        match self.handle.as_mut() {
            Some(Handle::Single(client)) => Ok(client),
            Some(Handle::Pooled(conn)) => Ok(&mut **conn),
            None => Err(TdsFluentError::ConnectionError(
                "Connection has already been closed".to_string(),
            )),
        }
    }

    /// Run a rendered script whose trailing result set carries the output
    /// variables: earlier sets stream as rows, the last one becomes
    /// return-value events.
    async fn run_with_outputs(
        &mut self,
        script: &str,
        statement: &Statement,
        events: &mut dyn StatementEvents,
    ) -> Result<Option<u64>, TdsFluentError> {
        let mut query = bind_statement(script, &statement.params);
        for out in &statement.output_params {
            if let Some(value) = &out.value {
                bind_value(&mut query, value);
            }
        }

        let stream = query.query(self.client()?).await.map_err(|e| {
            TdsFluentError::ExecutionError(format!("SQL Server execution error: {e}"))
        })?;
        let mut sets = collect_result_sets(stream).await?;
        let output_rows = sets.pop();

        let mut rows = 0u64;
        for set in sets {
            for row in set {
                events.on_row(row)?;
                rows += 1;
            }
        }

        if let Some(output_rows) = output_rows {
            if let Some(first) = output_rows.into_iter().next() {
                for Cell { name, value } in first {
                    events.on_return_value(&name, value)?;
                }
            }
        }

        Ok(Some(rows))
    }

    async fn run_batch(&mut self, sql: &str) -> Result<(), TdsFluentError> {
        let client = self.client()?;
        let stream = client.simple_query(sql).await.map_err(|e| {
            TdsFluentError::ExecutionError(format!("SQL Server batch error: {e}"))
        })?;
        stream.into_results().await.map_err(|e| {
            TdsFluentError::ExecutionError(format!("SQL Server batch error: {e}"))
        })?;
        Ok(())
    }
}

#[async_trait]
impl DriverConnection for TiberiusConnection {
    async fn exec_sql(
        &mut self,
        statement: &Statement,
        events: &mut dyn StatementEvents,
    ) -> Result<Option<u64>, TdsFluentError> {
        debug!(sql = %statement.sql, params = statement.params.len(), "exec_sql");

        if !statement.output_params.is_empty() {
            let script = render_batch_script(statement)?;
            return self.run_with_outputs(&script, statement, events).await;
        }

        if statement.row_count_only {
            let query = bind_statement(&statement.sql, &statement.params);
            let result = query.execute(self.client()?).await.map_err(|e| {
                TdsFluentError::ExecutionError(format!("SQL Server execution error: {e}"))
            })?;
            return Ok(Some(result.rows_affected().iter().sum()));
        }

        let query = bind_statement(&statement.sql, &statement.params);
        let stream = query.query(self.client()?).await.map_err(|e| {
            TdsFluentError::ExecutionError(format!("SQL Server query error: {e}"))
        })?;
        drain_stream(stream, events).await
    }

    async fn call_procedure(
        &mut self,
        statement: &Statement,
        events: &mut dyn StatementEvents,
    ) -> Result<Option<u64>, TdsFluentError> {
        let script = render_exec_script(statement)?;
        debug!(procedure = %statement.sql, "call_procedure");

        if statement.output_params.is_empty() {
            let query = bind_statement(&script, &statement.params);
            if statement.row_count_only {
                let result = query.execute(self.client()?).await.map_err(|e| {
                    TdsFluentError::ExecutionError(format!(
                        "SQL Server procedure error: {e}"
                    ))
                })?;
                return Ok(Some(result.rows_affected().iter().sum()));
            }
            let stream = query.query(self.client()?).await.map_err(|e| {
                TdsFluentError::ExecutionError(format!("SQL Server procedure error: {e}"))
            })?;
            return drain_stream(stream, events).await;
        }

        self.run_with_outputs(&script, statement, events).await
    }

    async fn begin_transaction(&mut self) -> Result<(), TdsFluentError> {
        self.run_batch("BEGIN TRANSACTION").await
    }

    async fn save_transaction(&mut self, name: &str) -> Result<(), TdsFluentError> {
        ensure_identifier(name)?;
        self.run_batch(&format!("SAVE TRANSACTION {name}")).await
    }

    async fn commit_transaction(&mut self) -> Result<(), TdsFluentError> {
        self.run_batch("COMMIT TRANSACTION").await
    }

    async fn rollback_transaction(&mut self) -> Result<(), TdsFluentError> {
        self.run_batch("ROLLBACK TRANSACTION").await
    }

    async fn close(&mut self) -> Result<(), TdsFluentError> {
        match self.handle.take() {
            Some(Handle::Single(client)) => client.close().await.map_err(TdsFluentError::from),
            // Dropping a pooled connection returns it to its pool.
            Some(Handle::Pooled(conn)) => {
                drop(conn);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

fn ensure_identifier(name: &str) -> Result<(), TdsFluentError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(TdsFluentError::UsageError(format!(
            "\"{name}\" is not a valid SQL identifier"
        )))
    }
}

fn ensure_procedure_name(name: &str) -> Result<(), TdsFluentError> {
    let valid = !name.is_empty()
        && name.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '[' | ']' | '#')
        });
    if valid {
        Ok(())
    } else {
        Err(TdsFluentError::UsageError(format!(
            "\"{name}\" is not a valid stored procedure name"
        )))
    }
}

/// DECLARE each output variable and SET the ones with initial values, which
/// are bound after the positional input parameters.
fn render_output_prologue(statement: &Statement) -> Result<String, TdsFluentError> {
    let mut prologue = String::new();
    let mut position = statement.params.len();

    for out in &statement.output_params {
        ensure_identifier(&out.name)?;
        prologue.push_str(&format!(
            "DECLARE @{} {};\n",
            out.name,
            out.sql_type.declaration(&out.options)
        ));
        if out.value.is_some() {
            position += 1;
            prologue.push_str(&format!("SET @{} = @P{position};\n", out.name));
        }
    }

    Ok(prologue)
}

/// SELECT the output variables back so they arrive as the trailing result
/// set.
fn render_output_epilogue(statement: &Statement) -> String {
    let selects: Vec<String> = statement
        .output_params
        .iter()
        .map(|out| format!("@{} AS [{}]", out.name, out.name))
        .collect();
    format!("SELECT {};", selects.join(", "))
}

/// Render a stored-procedure call as a T-SQL script: declare output
/// variables, run `EXEC`, then select the output variables back.
fn render_exec_script(statement: &Statement) -> Result<String, TdsFluentError> {
    let proc = statement.sql.trim();
    ensure_procedure_name(proc)?;

    let mut script = render_output_prologue(statement)?;

    let mut args: Vec<String> = (1..=statement.params.len())
        .map(|i| format!("@P{i}"))
        .collect();
    args.extend(
        statement
            .output_params
            .iter()
            .map(|out| format!("@{} OUTPUT", out.name)),
    );

    if args.is_empty() {
        script.push_str(&format!("EXEC {proc};\n"));
    } else {
        script.push_str(&format!("EXEC {proc} {};\n", args.join(", ")));
    }

    if !statement.output_params.is_empty() {
        script.push_str(&render_output_epilogue(statement));
    }

    Ok(script)
}

/// Wrap an ad-hoc batch that binds output parameters: declare the variables
/// ahead of the caller's SQL (which assigns them with `@name = ...`), then
/// select them back as the trailing result set.
fn render_batch_script(statement: &Statement) -> Result<String, TdsFluentError> {
    let mut script = render_output_prologue(statement)?;
    script.push_str(&statement.sql);
    script.push('\n');
    script.push_str(&render_output_epilogue(statement));
    Ok(script)
}
