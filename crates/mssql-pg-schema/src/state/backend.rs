//! State backend trait for run checkpoints.
//!
//! The orchestrator works with `Arc<dyn StateBackend>` and never learns
//! where checkpoints end up. Built-in backends:
//!
//! - **File**: [`FileStateBackend`](super::FileStateBackend), one signed JSON
//!   document per run
//! - **Memory**: [`MemoryStateBackend`](super::MemoryStateBackend), for tests
//!   and dry runs

use async_trait::async_trait;

use super::RunState;
use crate::error::Result;

/// Persistence for [`RunState`], keyed by run id and unit id.
///
/// # Example
///
/// ```rust,ignore
/// let backend: Arc<dyn StateBackend> = Arc::new(FileStateBackend::new("state.json"));
/// backend.init().await?;
/// backend.save(&state).await?;
/// let resumed = backend.load("run-id").await?;
/// ```
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Prepare the storage. Safe to call more than once.
    async fn init(&self) -> Result<()>;

    /// Persist the complete state of a run, replacing any earlier copy.
    async fn save(&self, state: &RunState) -> Result<()>;

    /// Load a run by id, or `None` if it was never saved.
    async fn load(&self, run_id: &str) -> Result<Option<RunState>>;

    /// Load the most recently started run for a config hash.
    async fn load_latest(&self, config_hash: &str) -> Result<Option<RunState>>;

    /// Backend name for logging.
    fn backend_type(&self) -> &'static str;
}
