//! Scripted executors for tests.

use super::{BatchRequest, ExecError, RowSource, SqlValue, TargetExecutor, TargetTransaction};
use crate::catalog::QualifiedName;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct TargetState {
    committed: Vec<(String, Vec<SqlValue>)>,
    failures: Vec<(String, VecDeque<ExecError>)>,
    rollbacks: usize,
}

/// Target that records committed statements and fails on demand.
#[derive(Clone, Default)]
pub(crate) struct FakeTarget {
    state: Arc<Mutex<TargetState>>,
}

impl FakeTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next statements containing `pattern` with `errors`, in order.
    pub fn fail_on(&self, pattern: &str, errors: Vec<ExecError>) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((pattern.to_string(), errors.into()));
    }

    pub fn committed_statements(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .committed
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    /// First column of every committed row inserted into a table whose
    /// quoted name appears in the statement.
    pub fn inserted_keys(&self, table: &str, width: usize) -> Vec<i32> {
        let state = self.state.lock().unwrap();
        let mut keys = Vec::new();
        for (sql, params) in &state.committed {
            if !sql.starts_with("INSERT INTO") || !sql.contains(table) {
                continue;
            }
            for row in params.chunks(width) {
                if let SqlValue::I32(k) = row[0] {
                    keys.push(k);
                }
            }
        }
        keys
    }

    pub fn rollbacks(&self) -> usize {
        self.state.lock().unwrap().rollbacks
    }
}

#[async_trait]
impl TargetExecutor for FakeTarget {
    async fn begin(&self) -> Result<Box<dyn TargetTransaction>, ExecError> {
        Ok(Box::new(FakeTransaction {
            state: self.state.clone(),
            pending: Vec::new(),
        }))
    }

    fn executor_type(&self) -> &'static str {
        "fake"
    }
}

struct FakeTransaction {
    state: Arc<Mutex<TargetState>>,
    pending: Vec<(String, Vec<SqlValue>)>,
}

#[async_trait]
impl TargetTransaction for FakeTransaction {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, ExecError> {
        {
            let mut state = self.state.lock().unwrap();
            for (pattern, errors) in state.failures.iter_mut() {
                if sql.contains(pattern.as_str()) {
                    if let Some(err) = errors.pop_front() {
                        return Err(err);
                    }
                }
            }
        }
        self.pending.push((sql.to_string(), params.to_vec()));
        Ok(1)
    }

    async fn commit(self: Box<Self>) -> Result<(), ExecError> {
        let mut state = self.state.lock().unwrap();
        state.committed.extend(self.pending);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), ExecError> {
        self.state.lock().unwrap().rollbacks += 1;
        Ok(())
    }
}

/// Row source over in-memory tables.
#[derive(Clone, Default)]
pub(crate) struct FakeSource {
    tables: Arc<HashMap<QualifiedName, Vec<Vec<SqlValue>>>>,
    failures: Arc<Mutex<HashMap<(QualifiedName, u64), VecDeque<ExecError>>>>,
    fetches: Arc<Mutex<Vec<(QualifiedName, u64)>>>,
    cancel_after: Arc<Mutex<Option<(u64, CancellationToken)>>>,
}

impl FakeSource {
    pub fn new(tables: Vec<(QualifiedName, Vec<Vec<SqlValue>>)>) -> Self {
        Self {
            tables: Arc::new(tables.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Rows `1..=n` of `(id int, name text)`.
    pub fn numbered(n: i32) -> Vec<Vec<SqlValue>> {
        (1..=n)
            .map(|i| vec![SqlValue::I32(i), SqlValue::Text(format!("row {}", i))])
            .collect()
    }

    pub fn fail_batch(&self, table: &QualifiedName, batch: u64, errors: Vec<ExecError>) {
        self.failures
            .lock()
            .unwrap()
            .insert((table.clone(), batch), errors.into());
    }

    /// Cancel `token` once batch `batch` has been served.
    pub fn cancel_after(&self, batch: u64, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((batch, token));
    }

    pub fn fetches(&self) -> Vec<(QualifiedName, u64)> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl RowSource for FakeSource {
    async fn row_count(&self, table: &QualifiedName) -> Result<i64, ExecError> {
        Ok(self.tables.get(table).map(|r| r.len() as i64).unwrap_or(0))
    }

    async fn fetch_batch(&self, request: &BatchRequest) -> Result<Vec<Vec<SqlValue>>, ExecError> {
        let key = (request.table.clone(), request.batch_index);
        self.fetches.lock().unwrap().push(key.clone());
        if let Some(errors) = self.failures.lock().unwrap().get_mut(&key) {
            if let Some(err) = errors.pop_front() {
                return Err(err);
            }
        }

        let rows = self.tables.get(&request.table).cloned().unwrap_or_default();
        let start = (request.offset() as usize).min(rows.len());
        let end = (start + request.batch_size).min(rows.len());

        if let Some((batch, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if *batch == request.batch_index {
                token.cancel();
            }
        }
        Ok(rows[start..end].to_vec())
    }
}
