use tiberius::Query;

use crate::driver::ParameterBinding;
use crate::types::SqlValue;

/// Bind one `SqlValue` onto a tiberius query; the query owns its data.
pub fn bind_value(query: &mut Query<'_>, value: &SqlValue) {
    match value {
        SqlValue::Int(i) => query.bind(*i),
        SqlValue::Float(f) => query.bind(*f),
        SqlValue::Text(s) => query.bind(s.clone()),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Timestamp(dt) => {
            let formatted = dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string();
            query.bind(formatted);
        }
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Json(jsval) => query.bind(jsval.to_string()),
        SqlValue::Blob(bytes) => query.bind(bytes.clone()),
    }
}

/// Build a tiberius query for `sql` with all input parameters bound in
/// insertion order (`@P1..@Pn`).
pub fn bind_statement<'a>(sql: &'a str, params: &[ParameterBinding]) -> Query<'a> {
    let mut query = Query::new(sql);
    for param in params {
        bind_value(&mut query, &param.value);
    }
    query
}
