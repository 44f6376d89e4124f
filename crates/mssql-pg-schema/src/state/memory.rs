//! In-process state backend.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::backend::StateBackend;
use super::RunState;
use crate::error::{MigrateError, Result};

/// Keeps run states in memory. Used by tests and dry runs; nothing survives
/// the process.
#[derive(Debug, Default)]
pub struct MemoryStateBackend {
    runs: Mutex<HashMap<String, RunState>>,
}

impl MemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs stored.
    pub fn len(&self) -> usize {
        self.runs.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> MigrateError {
    MigrateError::State("memory state lock poisoned".to_string())
}

#[async_trait]
impl StateBackend for MemoryStateBackend {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn save(&self, state: &RunState) -> Result<()> {
        let mut runs = self.runs.lock().map_err(poisoned)?;
        runs.insert(state.run_id.clone(), state.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<RunState>> {
        let runs = self.runs.lock().map_err(poisoned)?;
        Ok(runs.get(run_id).cloned())
    }

    async fn load_latest(&self, config_hash: &str) -> Result<Option<RunState>> {
        let runs = self.runs.lock().map_err(poisoned)?;
        Ok(runs
            .values()
            .filter(|s| s.config_hash == config_hash)
            .max_by_key(|s| s.started_at)
            .cloned())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
