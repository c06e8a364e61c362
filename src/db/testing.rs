//! In-memory transport for connection tests.

use std::sync::Mutex;

use super::query::{RowSet, StructuredError, Transport};
use crate::error::{AdapterError, Result};

enum Reply {
    Rows(RowSet),
    Fail,
}

/// Records every statement it receives and answers with canned results.
/// The first registered pattern contained in the SQL decides the reply;
/// anything unmatched gets an empty result.
#[derive(Default)]
pub struct MockTransport {
    replies: Vec<(String, Reply)>,
    executed: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, pattern: &str, rows: RowSet) -> Self {
        self.replies.push((pattern.to_string(), Reply::Rows(rows)));
        self
    }

    pub fn fail(mut self, pattern: &str) -> Self {
        self.replies.push((pattern.to_string(), Reply::Fail));
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    fn reply(&self, sql: &str) -> Result<RowSet> {
        self.executed.lock().unwrap().push(sql.to_string());
        match self.replies.iter().find(|(pattern, _)| sql.contains(pattern.as_str())) {
            Some((_, Reply::Rows(rows))) => Ok(rows.clone()),
            Some((pattern, Reply::Fail)) => Err(AdapterError::Database(StructuredError::from_string(
                format!("mock failure for {pattern}"),
            ))),
            None => Ok(RowSet::empty()),
        }
    }
}

impl Transport for MockTransport {
    async fn simple_query(&self, sql: &str) -> Result<RowSet> {
        self.reply(sql)
    }
}
