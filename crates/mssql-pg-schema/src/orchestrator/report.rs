//! End-of-run report.

use super::log::{ExecutionLogEntry, LogOutcome};
use super::scheduler::UnitOutcome;
use crate::analyzer::Finding;
use crate::catalog::ObjectKind;
use crate::error::Result;
use crate::plan::{ExcludedObject, MigrationPlan, UnitKind, UnitStatus};
use crate::resolver::MappingAuditRecord;
use crate::translate::Diagnostic;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Final state of one unit.
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub id: String,
    pub kind: UnitKind,
    pub object: String,
    pub object_kind: ObjectKind,
    pub status: UnitStatus,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_committed_batch: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a migration run, dry or applied.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub run_id: String,
    pub dry_run: bool,
    /// `dry_run`, `completed`, `completed_with_skips`, `failed` or `cancelled`.
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub units: Vec<UnitReport>,
    pub committed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub rows_transferred: u64,
    pub excluded: Vec<ExcludedObject>,
    pub diagnostics: Vec<Diagnostic>,
    pub mapping: Vec<MappingAuditRecord>,
    pub findings: Vec<Finding>,
}

impl MigrationReport {
    /// Report for a plan that was built but not applied.
    pub fn planned(
        run_id: String,
        started_at: DateTime<Utc>,
        plan: &MigrationPlan,
        findings: Vec<Finding>,
    ) -> Self {
        let units = plan
            .units
            .iter()
            .map(|unit| UnitReport {
                id: unit.id.clone(),
                kind: unit.kind,
                object: unit.object.to_string(),
                object_kind: unit.object_kind,
                status: unit.status,
                retry_count: 0,
                last_committed_batch: None,
                error: if unit.is_blocked() {
                    Some(format!("requires manual review: {}", unit.blocked.join("; ")))
                } else {
                    unit.error.clone()
                },
            })
            .collect();
        Self::assemble(run_id, true, "dry_run".to_string(), started_at, units, 0, plan, findings)
    }

    /// Report for an executed run.
    pub fn executed(
        run_id: String,
        started_at: DateTime<Utc>,
        plan: &MigrationPlan,
        outcomes: &[UnitOutcome],
        log: &[ExecutionLogEntry],
        cancelled: bool,
        findings: Vec<Finding>,
    ) -> Self {
        let units: Vec<UnitReport> = plan
            .units
            .iter()
            .zip(outcomes)
            .map(|(unit, outcome)| UnitReport {
                id: unit.id.clone(),
                kind: unit.kind,
                object: unit.object.to_string(),
                object_kind: unit.object_kind,
                status: outcome.status,
                retry_count: outcome.retry_count,
                last_committed_batch: outcome.last_committed_batch,
                error: outcome.error.clone(),
            })
            .collect();

        let failed = units.iter().any(|u| u.status == UnitStatus::Failed);
        let skipped = units.iter().any(|u| u.status == UnitStatus::Skipped);
        let status = if cancelled {
            "cancelled"
        } else if failed {
            "failed"
        } else if skipped {
            "completed_with_skips"
        } else {
            "completed"
        };

        let rows = log
            .iter()
            .filter(|e| e.outcome == LogOutcome::BatchCommitted)
            .filter_map(|e| e.rows)
            .sum();

        Self::assemble(run_id, false, status.to_string(), started_at, units, rows, plan, findings)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        run_id: String,
        dry_run: bool,
        status: String,
        started_at: DateTime<Utc>,
        units: Vec<UnitReport>,
        rows_transferred: u64,
        plan: &MigrationPlan,
        findings: Vec<Finding>,
    ) -> Self {
        let completed_at = Utc::now();
        let count = |status: UnitStatus| units.iter().filter(|u| u.status == status).count();
        let committed = count(UnitStatus::Committed);
        let failed = count(UnitStatus::Failed);
        let skipped = count(UnitStatus::Skipped);

        Self {
            run_id,
            dry_run,
            status,
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            committed,
            failed,
            skipped,
            rows_transferred,
            units,
            excluded: plan.excluded.clone(),
            diagnostics: plan.diagnostics.clone(),
            mapping: plan.mapping.clone(),
            findings,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == "cancelled"
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn unit(&self, id: &str) -> Option<&UnitReport> {
        self.units.iter().find(|u| u.id == id)
    }
}
