use polars::prelude::PolarsError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures the engine surfaces to its caller.
///
/// Per-cell numeric coercion problems never show up here; they resolve to a
/// missing value. Aggregation directive mismatches are warnings, see
/// [`crate::resample::DirectiveIssue`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("column '{column}' cannot be read as a timestamp: {reason}")]
    Format { column: String, reason: String },

    #[error("column '{column}' cannot be converted to datetime using formats {}", attempted.join(", "))]
    UnknownTimestampFormat {
        column: String,
        attempted: Vec<String>,
    },

    #[error("invalid range: {0}")]
    Range(String),

    #[error("{operation} needs at least one table")]
    EmptyInput { operation: &'static str },

    #[error("column '{column}' {problem}")]
    Column { column: String, problem: String },

    #[error("index column '{column}' must be a datetime, found {dtype}")]
    IndexType { column: String, dtype: String },

    #[error("table shape: {0}")]
    Shape(String),

    #[error("catalogue {path}: {reason}")]
    Catalogue { path: String, reason: String },

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

impl EngineError {
    pub(crate) fn missing_column(column: &str) -> Self {
        EngineError::Column {
            column: column.to_string(),
            problem: "not found in the table".to_string(),
        }
    }
}
