//! Run checkpoints for resume.
//!
//! A [`RunState`] records, per unit id, the unit's status and (for data
//! units) the last committed batch. The orchestrator saves it after every
//! commit; a resumed run starts each data unit at the batch after its
//! checkpoint.

mod backend;
mod memory;

pub use backend::StateBackend;
pub use memory::MemoryStateBackend;

use crate::error::{MigrateError, Result};
use crate::plan::UnitStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Persisted state of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Unique run identifier.
    pub run_id: String,

    /// SHA256 hash of the configuration.
    pub config_hash: String,

    pub started_at: DateTime<Utc>,

    pub status: RunStatus,

    /// Checkpoints keyed by unit id.
    pub units: BTreeMap<String, UnitCheckpoint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// HMAC-SHA256 over the serialized state (without this field), keyed by
    /// `config_hash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Checkpoint for a single unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitCheckpoint {
    pub status: UnitStatus,

    /// Zero-based index of the last batch committed (data units).
    pub last_committed_batch: Option<u64>,

    pub retry_count: u32,

    pub error: Option<String>,

    pub updated_at: DateTime<Utc>,
}

impl Default for UnitCheckpoint {
    fn default() -> Self {
        Self {
            status: UnitStatus::Pending,
            last_committed_batch: None,
            retry_count: 0,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

impl RunState {
    pub fn new(run_id: String, config_hash: String) -> Self {
        Self {
            run_id,
            config_hash,
            started_at: Utc::now(),
            status: RunStatus::Running,
            units: BTreeMap::new(),
            completed_at: None,
            hmac: None,
        }
    }

    /// Compute the HMAC-SHA256 signature of this state.
    ///
    /// The key is the config hash, so a state file cannot be edited without
    /// also knowing the configuration it was produced under.
    fn compute_hmac(&self) -> Result<String> {
        let mut unsigned = self.clone();
        unsigned.hmac = None;

        let content = serde_json::to_string(&unsigned)
            .map_err(|e| MigrateError::State(format!("Failed to serialize state for HMAC: {}", e)))?;

        let mut mac = HmacSha256::new_from_slice(self.config_hash.as_bytes())
            .map_err(|e| MigrateError::State(format!("Failed to create HMAC: {}", e)))?;
        mac.update(content.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Attach a fresh signature.
    pub fn sign(&mut self) -> Result<()> {
        self.hmac = Some(self.compute_hmac()?);
        Ok(())
    }

    /// Check the signature. Unsigned states are accepted with a warning.
    pub fn verify(&self) -> Result<()> {
        match &self.hmac {
            Some(stored) => {
                if stored != &self.compute_hmac()? {
                    return Err(MigrateError::State(
                        "State integrity check failed: HMAC mismatch (possible tampering)"
                            .to_string(),
                    ));
                }
            }
            None => warn!("State for run {} has no HMAC signature, integrity cannot be verified", self.run_id),
        }
        Ok(())
    }

    /// Validate that the config hash matches for resume.
    pub fn validate_config(&self, config_hash: &str) -> Result<()> {
        if self.config_hash != config_hash {
            return Err(MigrateError::ConfigChanged);
        }
        Ok(())
    }

    pub fn checkpoint(&self, unit_id: &str) -> Option<&UnitCheckpoint> {
        self.units.get(unit_id)
    }

    /// Get or create the checkpoint for a unit.
    pub fn checkpoint_mut(&mut self, unit_id: &str) -> &mut UnitCheckpoint {
        self.units.entry(unit_id.to_string()).or_default()
    }

    pub fn is_committed(&self, unit_id: &str) -> bool {
        self.units
            .get(unit_id)
            .map(|c| c.status == UnitStatus::Committed)
            .unwrap_or(false)
    }

    /// Mark the run as finished with the given status.
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

impl UnitCheckpoint {
    pub fn record(&mut self, status: UnitStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.updated_at = Utc::now();
    }

    /// Batch to start from when the unit is (re)started.
    pub fn next_batch(&self) -> u64 {
        self.last_committed_batch.map(|b| b + 1).unwrap_or(0)
    }
}

/// Stores the current run as a signed JSON file.
#[derive(Debug, Clone)]
pub struct FileStateBackend {
    path: PathBuf,
}

impl FileStateBackend {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Option<RunState>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: RunState = serde_json::from_str(&content)?;
        state.verify()?;
        Ok(Some(state))
    }
}

#[async_trait]
impl StateBackend for FileStateBackend {
    async fn init(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }

    /// Atomic write: temp file, then rename.
    async fn save(&self, state: &RunState) -> Result<()> {
        let mut signed = state.clone();
        signed.sign()?;
        let content = serde_json::to_string_pretty(&signed)
            .map_err(|e| MigrateError::State(format!("Failed to serialize state: {}", e)))?;

        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &content).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        debug!("Saved state for run {} to {}", state.run_id, self.path.display());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<RunState>> {
        Ok(self.read().await?.filter(|s| s.run_id == run_id))
    }

    async fn load_latest(&self, config_hash: &str) -> Result<Option<RunState>> {
        Ok(self.read().await?.filter(|s| s.config_hash == config_hash))
    }

    fn backend_type(&self) -> &'static str {
        "file"
    }
}
