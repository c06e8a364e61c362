use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use tokio_postgres::{Client, SimpleQueryMessage};

use crate::error::{AdapterError, Result};

/// Broad classes of server-side failures, keyed off the SQLSTATE class.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorCategory {
    /// SQLSTATE 42601 / 42000
    Syntax,
    /// Missing relation or column, permission problems (rest of class 42)
    Semantic,
    /// Data exceptions, constraint violations, resource limits
    Execution,
    /// Aborted or invalid transaction state
    Transaction,
    /// Transport-level failures
    Connection,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Syntax => write!(f, "Syntax Error"),
            ErrorCategory::Semantic => write!(f, "Semantic Error"),
            ErrorCategory::Execution => write!(f, "Execution Error"),
            ErrorCategory::Transaction => write!(f, "Transaction Error"),
            ErrorCategory::Connection => write!(f, "Connection Error"),
            ErrorCategory::Unknown => write!(f, "Error"),
        }
    }
}

/// A driver error flattened into the fields worth reporting, plus the
/// line/column of the failure inside the rendered SQL.
#[derive(Debug, Clone)]
pub struct StructuredError {
    pub category: ErrorCategory,
    pub severity: String,
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// 1-based byte offset into the query, as reported by the server
    pub position: Option<u32>,
    pub line: Option<usize>,
    pub col: Option<usize>,
}

impl StructuredError {
    pub fn from_pg_error(err: &tokio_postgres::Error, query: &str) -> Self {
        let Some(db_err) = err.as_db_error() else {
            let category = if err.source().is_some() {
                ErrorCategory::Connection
            } else {
                ErrorCategory::Unknown
            };
            return StructuredError {
                category,
                detail: err.source().map(|e| e.to_string()),
                ..StructuredError::from_string(err.to_string())
            };
        };

        let code = db_err.code().code().to_string();
        let position = db_err.position().and_then(|p| match p {
            tokio_postgres::error::ErrorPosition::Original(pos) => Some(*pos),
            tokio_postgres::error::ErrorPosition::Internal { .. } => None,
        });
        let (line, col) = match position {
            Some(pos) => byte_offset_to_line_col(query, pos as usize),
            None => (None, None),
        };

        StructuredError {
            category: categorize_sqlstate(&code),
            severity: db_err.severity().to_string(),
            code,
            message: db_err.message().to_string(),
            detail: db_err.detail().map(str::to_string),
            hint: db_err.hint().map(str::to_string),
            position,
            line,
            col,
        }
    }

    pub fn from_string(msg: String) -> Self {
        StructuredError {
            category: ErrorCategory::Unknown,
            severity: "ERROR".to_string(),
            code: String::new(),
            message: msg,
            detail: None,
            hint: None,
            position: None,
            line: None,
            col: None,
        }
    }

    pub fn display_full(&self) -> String {
        let mut lines = vec![format!("{}: {}", self.category, self.message)];
        if let (Some(line), Some(col)) = (self.line, self.col) {
            lines.push(format!("  at line {}, column {}", line, col));
        }
        if !self.code.is_empty() {
            lines.push(format!("  SQLSTATE: {}", self.code));
        }
        if let Some(detail) = &self.detail {
            lines.push(format!("  Detail: {}", detail));
        }
        if let Some(hint) = &self.hint {
            lines.push(format!("  Hint: {}", hint));
        }
        lines.join("\n")
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Map a 1-based byte offset to a 1-based (line, column) pair.
fn byte_offset_to_line_col(query: &str, byte_pos: usize) -> (Option<usize>, Option<usize>) {
    if byte_pos == 0 || query.is_empty() {
        return (Some(1), Some(1));
    }
    let target = (byte_pos - 1).min(query.len());
    let mut line = 1usize;
    let mut col = 1usize;
    for (i, ch) in query.char_indices() {
        if i >= target {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (Some(line), Some(col))
}

fn categorize_sqlstate(code: &str) -> ErrorCategory {
    if code.len() < 2 {
        return ErrorCategory::Unknown;
    }
    match &code[..2] {
        "42" if code == "42601" || code == "42000" => ErrorCategory::Syntax,
        "42" => ErrorCategory::Semantic,
        "22" | "23" | "53" | "54" | "55" | "57" => ErrorCategory::Execution,
        "25" | "40" => ErrorCategory::Transaction,
        "08" => ErrorCategory::Connection,
        _ => ErrorCategory::Unknown,
    }
}

/// Text-format result of a simple-protocol query.
///
/// Columns are looked up by name and a missing column reads as `None`, so
/// callers can consume result sets from catalogs that lack optional columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    pub affected_rows: Option<u64>,
    pub execution_time: Duration,
}

impl RowSet {
    pub fn new<I, S>(columns: I, rows: Vec<Vec<Option<String>>>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows,
            affected_rows: None,
            execution_time: Duration::ZERO,
        }
    }

    /// The no-op result handed back for suppressed statements.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Value of column `name` in row `row`; `None` for NULL, a missing
    /// column or an out-of-range row.
    pub fn get(&self, row: usize, name: &str) -> Option<&str> {
        let idx = self.column_index(name)?;
        self.rows.get(row)?.get(idx)?.as_deref()
    }

    pub fn column_values<'a>(&'a self, name: &str) -> impl Iterator<Item = Option<&'a str>> + 'a {
        let idx = self.column_index(name);
        self.rows
            .iter()
            .map(move |row| idx.and_then(|i| row.get(i)).and_then(|v| v.as_deref()))
    }
}

/// The raw SQL channel of the wrapped client core.
pub trait Transport {
    fn simple_query(&self, sql: &str) -> impl Future<Output = Result<RowSet>> + Send;
}

impl Transport for Client {
    async fn simple_query(&self, sql: &str) -> Result<RowSet> {
        let start = Instant::now();
        let messages = Client::simple_query(self, sql)
            .await
            .map_err(|e| AdapterError::database(&e, sql))?;

        let mut result = RowSet::empty();
        for message in messages {
            match message {
                SimpleQueryMessage::RowDescription(columns) => {
                    result.columns = columns.iter().map(|c| c.name().to_string()).collect();
                }
                SimpleQueryMessage::Row(row) => {
                    if result.columns.is_empty() {
                        result.columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                    }
                    result
                        .rows
                        .push((0..row.len()).map(|i| row.get(i).map(str::to_string)).collect());
                }
                SimpleQueryMessage::CommandComplete(affected) => {
                    result.affected_rows = Some(affected);
                }
                _ => {}
            }
        }
        result.execution_time = start.elapsed();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RowSet {
        RowSet::new(
            ["name", "kind"],
            vec![
                vec![Some("users".into()), Some("r".into())],
                vec![Some("active_users".into()), None],
            ],
        )
    }

    #[test]
    fn test_row_set_lookup() {
        let rows = sample();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.get(0, "name"), Some("users"));
        assert_eq!(rows.get(1, "kind"), None);
        assert_eq!(rows.get(0, "missing"), None);
        assert_eq!(rows.get(5, "name"), None);
        assert!(rows.has_column("kind"));
        assert!(!rows.has_column("rngsubtype"));
    }

    #[test]
    fn test_column_values() {
        let rows = sample();
        let names: Vec<Option<&str>> = rows.column_values("name").collect();
        assert_eq!(names, vec![Some("users"), Some("active_users")]);
        assert!(rows.column_values("missing").all(|v| v.is_none()));
    }

    #[test]
    fn test_empty_row_set() {
        let rows = RowSet::empty();
        assert!(rows.is_empty());
        assert!(rows.columns.is_empty());
        assert!(rows.affected_rows.is_none());
    }

    #[test]
    fn test_structured_error_display_full() {
        let err = StructuredError {
            category: ErrorCategory::Semantic,
            severity: "ERROR".to_string(),
            code: "42P01".to_string(),
            message: "relation \"pg_collation\" does not exist".to_string(),
            detail: None,
            hint: Some("Check the catalog".to_string()),
            position: Some(12),
            line: Some(2),
            col: Some(3),
        };
        let full = err.display_full();
        assert!(full.starts_with("Semantic Error: relation"));
        assert!(full.contains("at line 2, column 3"));
        assert!(full.contains("SQLSTATE: 42P01"));
        assert!(full.contains("Hint: Check the catalog"));
    }

    #[test]
    fn test_byte_offset_to_line_col() {
        let query = "SELECT *\nFROM users\nWHERE id = 1";
        assert_eq!(byte_offset_to_line_col(query, 1), (Some(1), Some(1)));
        assert_eq!(byte_offset_to_line_col(query, 10), (Some(2), Some(1)));
        assert_eq!(byte_offset_to_line_col(query, 21), (Some(3), Some(1)));
    }

    #[test]
    fn test_categorize_sqlstate() {
        assert_eq!(categorize_sqlstate("42601"), ErrorCategory::Syntax);
        assert_eq!(categorize_sqlstate("42P01"), ErrorCategory::Semantic);
        assert_eq!(categorize_sqlstate("23505"), ErrorCategory::Execution);
        assert_eq!(categorize_sqlstate("40001"), ErrorCategory::Transaction);
        assert_eq!(categorize_sqlstate("08006"), ErrorCategory::Connection);
        assert_eq!(categorize_sqlstate("XX000"), ErrorCategory::Unknown);
        assert_eq!(categorize_sqlstate("4"), ErrorCategory::Unknown);
    }
}
