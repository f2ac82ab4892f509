use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as JsonValue};

/// Values flowing between the driver, the column mappers, and query
/// parameters.
///
/// One enum covers both directions so mapping helpers never branch on driver
/// types:
/// ```rust
/// use tds_fluent::SqlValue;
///
/// let params = vec![
///     SqlValue::Int(1),
///     SqlValue::Text("alice".into()),
///     SqlValue::Bool(true),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// NULL value
    Null,
    /// JSON value
    Json(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let SqlValue::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let SqlValue::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<&bool> {
        if let SqlValue::Bool(value) = self {
            return Some(value);
        } else if let Some(i) = self.as_int() {
            if *i == 1 {
                return Some(&true);
            } else if *i == 0 {
                return Some(&false);
            }
        }
        None
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if let SqlValue::Timestamp(value) = self {
            return Some(*value);
        } else if let Some(s) = self.as_text() {
            // Try "YYYY-MM-DD HH:MM:SS"
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(dt);
            }
            // Try "YYYY-MM-DD HH:MM:SS.SSS"
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S.%3f") {
                return Some(dt);
            }
        }
        None
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let SqlValue::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let SqlValue::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// Render this value as JSON for inclusion in a transformed row object.
    ///
    /// Timestamps render as `%Y-%m-%dT%H:%M:%S%.f` strings; blobs as arrays
    /// of byte values; non-finite floats as `null` (JSON has no NaN).
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            SqlValue::Int(i) => JsonValue::Number(Number::from(*i)),
            SqlValue::Float(f) => Number::from_f64(*f)
                .map_or(JsonValue::Null, JsonValue::Number),
            SqlValue::Text(s) => JsonValue::String(s.clone()),
            SqlValue::Bool(b) => JsonValue::Bool(*b),
            SqlValue::Timestamp(dt) => {
                JsonValue::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            SqlValue::Null => JsonValue::Null,
            SqlValue::Json(v) => v.clone(),
            SqlValue::Blob(bytes) => JsonValue::Array(
                bytes.iter().map(|b| JsonValue::Number(Number::from(*b))).collect(),
            ),
        }
    }

    /// Build a value from JSON, as delivered by the mock data callback.
    ///
    /// Nested objects and arrays stay as `Json`; scalars map onto their
    /// natural variants.
    #[must_use]
    pub fn from_json(value: &JsonValue) -> SqlValue {
        match value {
            JsonValue::Null => SqlValue::Null,
            JsonValue::Bool(b) => SqlValue::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Int(i)
                } else {
                    SqlValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Json(other.clone()),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(i64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

/// SQL Server type tags for parameter declarations.
///
/// Input parameters carry one for documentation and mock filtering; output
/// parameters need one to render the `DECLARE` block of a procedure call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlType {
    Bit,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Real,
    Float,
    VarChar,
    NVarChar,
    DateTime2,
    Date,
    VarBinary,
    UniqueIdentifier,
}

impl SqlType {
    /// T-SQL type declaration, sized from the parameter options when the
    /// type takes a length.
    #[must_use]
    pub fn declaration(self, options: &ParamOptions) -> String {
        let sized = |name: &str| match options.length {
            Some(len) => format!("{name}({len})"),
            None => format!("{name}(MAX)"),
        };
        match self {
            SqlType::Bit => "BIT".to_string(),
            SqlType::TinyInt => "TINYINT".to_string(),
            SqlType::SmallInt => "SMALLINT".to_string(),
            SqlType::Int => "INT".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Real => "REAL".to_string(),
            SqlType::Float => match (options.precision, options.scale) {
                (Some(p), _) => format!("FLOAT({p})"),
                _ => "FLOAT".to_string(),
            },
            SqlType::VarChar => sized("VARCHAR"),
            SqlType::NVarChar => sized("NVARCHAR"),
            SqlType::DateTime2 => "DATETIME2".to_string(),
            SqlType::Date => "DATE".to_string(),
            SqlType::VarBinary => sized("VARBINARY"),
            SqlType::UniqueIdentifier => "UNIQUEIDENTIFIER".to_string(),
        }
    }
}

/// Optional sizing attached to a parameter binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamOptions {
    pub length: Option<u32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
}

/// One column's value plus its name within one row of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub name: String,
    pub value: SqlValue,
}

impl Cell {
    #[must_use]
    pub fn new(name: impl Into<String>, value: SqlValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// One raw row as handed over by a driver connection: ordered column cells.
pub type DriverRow = Vec<Cell>;
