//! Pending statements and transaction scopes.

use serde_json::Value;
use std::collections::VecDeque;
use tokio::time::Instant;

/// One `executeSql` message waiting to run.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRecord {
    pub sql: String,
    pub bind_args: Vec<Value>,
    pub success_id: String,
    pub error_id: String,
}

impl QueryRecord {
    pub fn new(
        sql: impl Into<String>,
        bind_args: Vec<Value>,
        success_id: impl Into<String>,
        error_id: impl Into<String>,
    ) -> Self {
        Self {
            sql: sql.into(),
            bind_args,
            success_id: success_id.into(),
            error_id: error_id.into(),
        }
    }
}

/// Lifecycle of a transaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepted, BEGIN not issued yet
    Queued,
    /// BEGIN succeeded
    Begun,
    /// `endTransaction` received
    Ending,
}

#[derive(Debug)]
pub struct TransactionRecord {
    pub tx_id: i64,
    pub db_name: String,
    pub success_id: String,
    pub error_id: String,
    pub begun: bool,
    pub should_end: bool,
    pub mark_successful: bool,
    /// A statement failed; queued statements wait until the host sends more
    /// work or ends the transaction
    pub halted: bool,
    /// Message of the first failed statement. Sticks until the record is
    /// finalized: a transaction that saw a failure never commits.
    pub failure: Option<String>,
    pub last_activity: Instant,
    pub queries: VecDeque<QueryRecord>,
}

impl TransactionRecord {
    pub fn new(
        tx_id: i64,
        db_name: impl Into<String>,
        success_id: impl Into<String>,
        error_id: impl Into<String>,
    ) -> Self {
        Self {
            tx_id,
            db_name: db_name.into(),
            success_id: success_id.into(),
            error_id: error_id.into(),
            begun: false,
            should_end: false,
            mark_successful: false,
            halted: false,
            failure: None,
            last_activity: Instant::now(),
            queries: VecDeque::new(),
        }
    }

    pub fn state(&self) -> TransactionState {
        if self.should_end {
            TransactionState::Ending
        } else if self.begun {
            TransactionState::Begun
        } else {
            TransactionState::Queued
        }
    }

    /// Whether the runner may pop statements from this record.
    pub fn has_runnable_queries(&self) -> bool {
        !self.halted && !self.queries.is_empty()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Halt on a failed statement, remembering the first failure.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.halted = true;
        if self.failure.is_none() {
            self.failure = Some(message.into());
        }
    }

    pub(crate) fn snapshot(&self) -> HeadSnapshot {
        HeadSnapshot {
            tx_id: self.tx_id,
            db_name: self.db_name.clone(),
            success_id: self.success_id.clone(),
            error_id: self.error_id.clone(),
            begun: self.begun,
            should_end: self.should_end,
            mark_successful: self.mark_successful,
            halted: self.halted,
            failure: self.failure.clone(),
            pending: self.queries.len(),
            last_activity: self.last_activity,
        }
    }
}

/// Copy of the head record's scalar fields taken under the queue lock.
#[derive(Debug, Clone)]
pub(crate) struct HeadSnapshot {
    pub tx_id: i64,
    pub db_name: String,
    pub success_id: String,
    pub error_id: String,
    pub begun: bool,
    pub should_end: bool,
    pub mark_successful: bool,
    pub halted: bool,
    pub failure: Option<String>,
    pub pending: usize,
    pub last_activity: Instant,
}
