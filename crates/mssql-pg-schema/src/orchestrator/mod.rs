//! Migration orchestrator - main workflow coordinator.
//!
//! Builds the plan, restores checkpoints, drives the scheduler and folds the
//! result into a [`MigrationReport`]. Nothing here talks to a database
//! directly: the target and row source are injected.

mod log;
mod report;
mod retry;
mod scheduler;

pub use crate::plan::UnitStatus;
pub use log::{ExecutionLog, ExecutionLogEntry, JsonFileSink, LogOutcome, LogSink, TracingSink};
pub use report::{MigrationReport, UnitReport};
pub use retry::RetryPolicy;

use crate::analyzer::{analyze_catalog, analyze_run};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::{MigrateError, Result};
use crate::exec::{RowSource, TargetExecutor};
use crate::plan::{MigrationPlan, PlanBuilder, UnitKind};
use crate::state::{MemoryStateBackend, RunState, RunStatus, StateBackend};
use chrono::Utc;
use scheduler::{Checkpointer, ExecutionContext, Scheduler, UnitOutcome};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    catalog: Arc<Catalog>,
    target: Option<Arc<dyn TargetExecutor>>,
    source: Option<Arc<dyn RowSource>>,
    state_backend: Arc<dyn StateBackend>,
    sinks: Vec<Arc<dyn LogSink>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator with in-memory state and tracing output.
    pub fn new(config: Config, catalog: Arc<Catalog>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            catalog,
            target: None,
            source: None,
            state_backend: Arc::new(MemoryStateBackend::new()),
            sinks: vec![Arc::new(TracingSink)],
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_target(mut self, target: Arc<dyn TargetExecutor>) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_source(mut self, source: Arc<dyn RowSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Persist checkpoints somewhere other than memory.
    pub fn with_state_backend(mut self, backend: Arc<dyn StateBackend>) -> Self {
        self.state_backend = backend;
        self
    }

    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Cancelling the token stops dispatch; in-flight units stop at their
    /// next batch boundary.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build the migration plan without executing it.
    pub fn plan(&self) -> Result<MigrationPlan> {
        PlanBuilder::new(&self.config, &self.catalog)?.build()
    }

    /// Resume the most recent run started under the current configuration.
    pub async fn resume_latest(&self) -> Result<MigrationReport> {
        self.state_backend.init().await?;
        let latest = self
            .state_backend
            .load_latest(&self.config.hash())
            .await?
            .ok_or_else(|| {
                MigrateError::State("no earlier run found for this configuration".to_string())
            })?;
        self.run(Some(&latest.run_id), false).await
    }

    /// Run the migration.
    ///
    /// With `resume_run_id`, units committed by that run are not executed
    /// again and data units continue after their last committed batch. A dry
    /// run (or `migration.dry_run`) stops after planning.
    pub async fn run(&self, resume_run_id: Option<&str>, dry_run: bool) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let dry_run = dry_run || self.config.migration.dry_run;
        let log = Arc::new(ExecutionLog::new(self.sinks.clone()));

        // Phase 1: Plan
        info!("Phase 1: Building migration plan from {} objects", self.catalog.len());
        let plan = self.plan()?;
        log.record_mapping(&plan.mapping);
        let findings = analyze_catalog(&self.catalog);
        info!(
            "Planned {} units ({} excluded objects, {} findings)",
            plan.len(),
            plan.excluded.len(),
            findings.len()
        );

        if dry_run {
            info!("Dry run: target left untouched");
            let run_id = resume_run_id
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let report = MigrationReport::planned(run_id, started_at, &plan, findings);
            flush_log(&log);
            return Ok(report);
        }

        let target = self
            .target
            .clone()
            .ok_or_else(|| MigrateError::Config("no target executor configured".to_string()))?;
        let needs_source = plan
            .units
            .iter()
            .any(|u| u.kind == UnitKind::Data && u.status != UnitStatus::Skipped);
        if needs_source && self.source.is_none() {
            return Err(MigrateError::Config(
                "plan transfers data but no row source is configured".to_string(),
            ));
        }

        // Phase 2: Restore or create run state
        self.state_backend.init().await?;
        let config_hash = self.config.hash();
        let mut state = match resume_run_id {
            Some(run_id) => {
                let state = self
                    .state_backend
                    .load(run_id)
                    .await?
                    .ok_or_else(|| MigrateError::State(format!("run {} not found", run_id)))?;
                state.validate_config(&config_hash)?;
                info!(
                    "Phase 2: Resuming run {} from {} backend",
                    run_id,
                    self.state_backend.backend_type()
                );
                state
            }
            None => {
                let run_id = uuid::Uuid::new_v4().to_string();
                info!("Phase 2: Starting migration run: {}", run_id);
                RunState::new(run_id, config_hash)
            }
        };
        state.status = RunStatus::Running;
        state.completed_at = None;

        let outcomes: Vec<UnitOutcome> = plan
            .units
            .iter()
            .map(|unit| UnitOutcome::initial(unit, state.checkpoint(&unit.id)))
            .collect();
        let already = outcomes
            .iter()
            .filter(|o| o.status == UnitStatus::Committed)
            .count();
        if already > 0 {
            info!("{} units already committed, not re-run", already);
        }
        self.state_backend.save(&state).await?;

        let run_id = state.run_id.clone();
        let plan = Arc::new(plan);
        let checkpoints = Arc::new(Checkpointer::new(state, self.state_backend.clone()));

        // Phase 3: Execute
        let workers = self.config.migration.get_worker_count();
        info!(
            "Phase 3: Executing {} units with {} workers against {} target",
            plan.len(),
            workers,
            target.executor_type()
        );
        let ctx = Arc::new(ExecutionContext {
            plan: plan.clone(),
            target,
            source: self.source.clone(),
            log: log.clone(),
            checkpoints: checkpoints.clone(),
            retry: RetryPolicy::from_config(&self.config.migration),
            cancel: self.cancel.clone(),
            batch_size: self.config.migration.batch_size,
        });
        let result = Scheduler::new(ctx, workers, self.config.migration.failure_policy)
            .run(outcomes)
            .await;

        // Phase 4: Close the run
        let any_failed = result.outcomes.iter().any(|o| o.status == UnitStatus::Failed);
        let run_status = if result.cancelled {
            RunStatus::Cancelled
        } else if any_failed {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        checkpoints.finish(&plan, &result.outcomes, run_status).await?;
        if let Some(unit) = &result.aborted_by {
            warn!("Run aborted after {} failed", unit);
        }

        let entries = log.entries();
        let mut findings = findings;
        findings.extend(analyze_run(&self.catalog, &entries));
        let report = MigrationReport::executed(
            run_id,
            started_at,
            &plan,
            &result.outcomes,
            &entries,
            result.cancelled,
            findings,
        );
        flush_log(&log);

        info!(
            "Phase 4: Run {} {}: {} committed, {} failed, {} skipped, {} rows in {:.1}s",
            report.run_id,
            report.status,
            report.committed,
            report.failed,
            report.skipped,
            report.rows_transferred,
            report.duration_seconds
        );
        Ok(report)
    }
}

fn flush_log(log: &ExecutionLog) {
    if let Err(e) = log.flush() {
        warn!("Failed to flush execution log: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::QualifiedName;
    use crate::config::tests::minimal;
    use crate::config::FailurePolicy;
    use crate::exec::fake::{FakeSource, FakeTarget};
    use crate::exec::{ExecError, ExecErrorKind};

    fn table(name: &str) -> String {
        format!(
            r#"{{ "kind": "table", "schema": "dbo", "name": "{}",
                 "columns": [ {{ "name": "id", "type": "int", "nullable": false, "ordinal": 1 }},
                              {{ "name": "name", "type": "nvarchar", "length": 50, "ordinal": 2 }} ],
                 "primary_key": {{ "columns": ["id"] }} }}"#,
            name
        )
    }

    fn catalog(tables: &[&str]) -> Arc<Catalog> {
        let objects: Vec<String> = tables.iter().map(|t| table(t)).collect();
        let json = format!(r#"{{ "objects": [ {} ] }}"#, objects.join(", "));
        Arc::new(Catalog::from_json(&json).unwrap())
    }

    /// `parent`, `child` with a foreign key to `parent`, and `unrelated`.
    fn family() -> Arc<Catalog> {
        let child = table("child").replacen(
            r#""primary_key""#,
            r#""constraints": [ { "type": "foreign_key", "name": "FK_child_parent",
                 "columns": ["id"], "referenced_table": "dbo.parent",
                 "referenced_columns": ["id"] } ],
               "primary_key""#,
            1,
        );
        let json = format!(
            r#"{{ "objects": [ {}, {}, {} ] }}"#,
            table("parent"),
            child,
            table("unrelated")
        );
        Arc::new(Catalog::from_json(&json).unwrap())
    }

    fn config() -> Config {
        let mut config = minimal();
        config.migration.batch_size = 10;
        config.migration.worker_count = Some(2);
        config.migration.backoff.initial_delay_ms = 10;
        config.migration.backoff.max_delay_ms = 100;
        config
    }

    fn name(table: &str) -> QualifiedName {
        QualifiedName::new("dbo", table)
    }

    fn source(tables: &[(&str, i32)]) -> FakeSource {
        FakeSource::new(
            tables
                .iter()
                .map(|(t, n)| (name(t), FakeSource::numbered(*n)))
                .collect(),
        )
    }

    fn orchestrator(config: Config, catalog: Arc<Catalog>, target: &FakeTarget, source: &FakeSource) -> Orchestrator {
        Orchestrator::new(config, catalog)
            .unwrap()
            .with_target(Arc::new(target.clone()))
            .with_source(Arc::new(source.clone()))
    }

    const INSERT_A: &str = r#"INSERT INTO "public"."a""#;

    #[tokio::test]
    async fn test_full_run_commits_everything() {
        let target = FakeTarget::new();
        let source = source(&[("a", 25)]);
        let report = orchestrator(config(), catalog(&["a"]), &target, &source)
            .run(None, false)
            .await
            .unwrap();

        assert_eq!(report.status, "completed");
        assert_eq!(report.committed, 2);
        assert_eq!(report.rows_transferred, 25);
        assert_eq!(target.inserted_keys(r#""a""#, 2), (1..=25).collect::<Vec<_>>());
        assert_eq!(report.unit("data:dbo.a").unwrap().last_committed_batch, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_within_limit_commit() {
        let config = config();
        let max = config.migration.max_retries;
        let target = FakeTarget::new();
        target.fail_on(
            INSERT_A,
            (0..max).map(|_| ExecError::connection_lost("reset by peer")).collect(),
        );
        let report = orchestrator(config, catalog(&["a"]), &target, &source(&[("a", 5)]))
            .run(None, false)
            .await
            .unwrap();

        let data = report.unit("data:dbo.a").unwrap();
        assert_eq!(data.status, UnitStatus::Committed);
        assert_eq!(data.retry_count, max);
        assert_eq!(target.inserted_keys(r#""a""#, 2), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_beyond_limit_fail() {
        let config = config();
        let max = config.migration.max_retries;
        let target = FakeTarget::new();
        target.fail_on(
            INSERT_A,
            (0..=max).map(|_| ExecError::connection_lost("reset by peer")).collect(),
        );
        let report = orchestrator(config, catalog(&["a"]), &target, &source(&[("a", 5)]))
            .run(None, false)
            .await
            .unwrap();

        let data = report.unit("data:dbo.a").unwrap();
        assert_eq!(data.status, UnitStatus::Failed);
        assert_eq!(data.retry_count, max);
        assert!(data.error.as_ref().unwrap().contains("gave up after"));
        assert_eq!(report.status, "failed");
        assert!(target.inserted_keys(r#""a""#, 2).is_empty());
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let target = FakeTarget::new();
        target.fail_on(INSERT_A, vec![ExecError::new(ExecErrorKind::ConstraintViolation, "dup")]);
        let report = orchestrator(config(), catalog(&["a"]), &target, &source(&[("a", 5)]))
            .run(None, false)
            .await
            .unwrap();
        let data = report.unit("data:dbo.a").unwrap();
        assert_eq!(data.status, UnitStatus::Failed);
        assert_eq!(data.retry_count, 0);
    }

    #[tokio::test]
    async fn test_resume_continues_after_last_committed_batch() {
        let config = config();
        let catalog = catalog(&["a"]);
        let target = FakeTarget::new();
        let backend = Arc::new(MemoryStateBackend::new());

        let first_source = source(&[("a", 25)]);
        first_source.fail_batch(
            &name("a"),
            1,
            vec![ExecError::new(ExecErrorKind::Other, "source read failed")],
        );
        let first = orchestrator(config.clone(), catalog.clone(), &target, &first_source)
            .with_state_backend(backend.clone())
            .run(None, false)
            .await
            .unwrap();
        assert_eq!(first.status, "failed");
        assert_eq!(first.unit("data:dbo.a").unwrap().last_committed_batch, Some(0));
        assert_eq!(target.inserted_keys(r#""a""#, 2), (1..=10).collect::<Vec<_>>());

        let second_source = source(&[("a", 25)]);
        let ddl_before = target.committed_statements().len();
        let second = orchestrator(config, catalog, &target, &second_source)
            .with_state_backend(backend.clone())
            .run(Some(&first.run_id), false)
            .await
            .unwrap();

        assert_eq!(second.run_id, first.run_id);
        assert_eq!(second.status, "completed");
        assert_eq!(target.inserted_keys(r#""a""#, 2), (1..=25).collect::<Vec<_>>());
        assert_eq!(second_source.fetches()[0], (name("a"), 1));
        // table DDL was not replayed
        assert!(!target.committed_statements()[ddl_before..]
            .iter()
            .any(|s| s.starts_with("CREATE TABLE")));

        let state = backend.load(&first.run_id).await.unwrap().unwrap();
        assert_eq!(state.status, RunStatus::Completed);
        assert!(state.is_committed("data:dbo.a"));
    }

    /// Memory backend that refuses the first save recording a given batch.
    struct FlakySaves {
        inner: MemoryStateBackend,
        unit: &'static str,
        batch: u64,
        failed: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl StateBackend for FlakySaves {
        async fn init(&self) -> Result<()> {
            self.inner.init().await
        }

        async fn save(&self, state: &RunState) -> Result<()> {
            let hit = state
                .checkpoint(self.unit)
                .is_some_and(|c| c.last_committed_batch == Some(self.batch));
            if hit && !self.failed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Err(MigrateError::State("disk full".to_string()));
            }
            self.inner.save(state).await
        }

        async fn load(&self, run_id: &str) -> Result<Option<RunState>> {
            self.inner.load(run_id).await
        }

        async fn load_latest(&self, config_hash: &str) -> Result<Option<RunState>> {
            self.inner.load_latest(config_hash).await
        }

        fn backend_type(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_failed_checkpoint_save_keeps_committed_batch() {
        let config = config();
        let catalog = catalog(&["a"]);
        let target = FakeTarget::new();
        let backend = Arc::new(FlakySaves {
            inner: MemoryStateBackend::new(),
            unit: "data:dbo.a",
            batch: 0,
            failed: Default::default(),
        });

        let first = orchestrator(config.clone(), catalog.clone(), &target, &source(&[("a", 25)]))
            .with_state_backend(backend.clone())
            .run(None, false)
            .await
            .unwrap();
        let data = first.unit("data:dbo.a").unwrap();
        assert_eq!(data.status, UnitStatus::Failed);
        assert!(data.error.as_ref().unwrap().contains("failed to save checkpoint"));
        // batch 0 reached the target before the save failed
        assert_eq!(data.last_committed_batch, Some(0));
        let state = backend.load(&first.run_id).await.unwrap().unwrap();
        assert_eq!(
            state.checkpoint("data:dbo.a").unwrap().last_committed_batch,
            Some(0)
        );

        let second_source = source(&[("a", 25)]);
        let second = orchestrator(config, catalog, &target, &second_source)
            .with_state_backend(backend.clone())
            .run(Some(&first.run_id), false)
            .await
            .unwrap();
        assert_eq!(second.status, "completed");
        assert_eq!(second_source.fetches()[0], (name("a"), 1));
        assert_eq!(target.inserted_keys(r#""a""#, 2), (1..=25).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_resume_rejects_changed_config() {
        let target = FakeTarget::new();
        let backend = Arc::new(MemoryStateBackend::new());
        let first = orchestrator(config(), catalog(&["a"]), &target, &source(&[("a", 3)]))
            .with_state_backend(backend.clone())
            .run(None, false)
            .await
            .unwrap();

        let mut changed = config();
        changed.migration.batch_size = 50;
        let err = orchestrator(changed, catalog(&["a"]), &target, &source(&[("a", 3)]))
            .with_state_backend(backend)
            .run(Some(&first.run_id), false)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::ConfigChanged));
    }

    #[tokio::test]
    async fn test_resume_unknown_run() {
        let target = FakeTarget::new();
        let err = orchestrator(config(), catalog(&["a"]), &target, &source(&[]))
            .run(Some("missing"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::State(_)));
    }

    async fn parent_fails(policy: FailurePolicy) -> (MigrationReport, FakeTarget) {
        let mut config = config();
        config.migration.failure_policy = policy;
        config.migration.worker_count = Some(1);
        let target = FakeTarget::new();
        target.fail_on(
            r#"CREATE TABLE IF NOT EXISTS "public"."parent""#,
            vec![ExecError::new(ExecErrorKind::Syntax, "bad DDL")],
        );
        let source = source(&[("parent", 3), ("child", 3), ("unrelated", 3)]);
        let report = orchestrator(config, family(), &target, &source)
            .run(None, false)
            .await
            .unwrap();
        (report, target)
    }

    #[tokio::test]
    async fn test_abort_dependents_keeps_independent_units() {
        let (report, target) = parent_fails(FailurePolicy::AbortDependents).await;

        assert_eq!(report.unit("ddl:table:dbo.parent").unwrap().status, UnitStatus::Failed);
        for id in ["ddl:table:dbo.child", "data:dbo.parent", "data:dbo.child"] {
            let unit = report.unit(id).unwrap();
            assert_eq!(unit.status, UnitStatus::Skipped, "{}", id);
        }
        assert_eq!(report.unit("data:dbo.unrelated").unwrap().status, UnitStatus::Committed);
        assert_eq!(target.inserted_keys(r#""unrelated""#, 2), vec![1, 2, 3]);
        assert_eq!(report.status, "failed");
    }

    #[tokio::test]
    async fn test_abort_all_stops_dispatch() {
        let (report, _) = parent_fails(FailurePolicy::AbortAll).await;

        assert_eq!(report.unit("ddl:table:dbo.parent").unwrap().status, UnitStatus::Failed);
        assert_eq!(report.committed + report.failed + report.skipped, report.units.len());
        assert!(report
            .units
            .iter()
            .filter(|u| u.status == UnitStatus::Skipped)
            .all(|u| u.error.is_some()));
        // parent sorts first, so nothing else had started
        assert_eq!(report.committed, 0);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let target = FakeTarget::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = orchestrator(config(), catalog(&["a"]), &target, &source(&[("a", 5)]))
            .with_cancellation(cancel)
            .run(None, false)
            .await
            .unwrap();

        assert!(report.is_cancelled());
        assert!(report.units.iter().all(|u| u.status == UnitStatus::Skipped));
        assert!(target.committed_statements().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_at_batch_boundary() {
        let target = FakeTarget::new();
        let source = source(&[("a", 25)]);
        let cancel = CancellationToken::new();
        source.cancel_after(0, cancel.clone());
        let report = orchestrator(config(), catalog(&["a"]), &target, &source)
            .with_cancellation(cancel)
            .run(None, false)
            .await
            .unwrap();

        assert!(report.is_cancelled());
        let data = report.unit("data:dbo.a").unwrap();
        assert_eq!(data.status, UnitStatus::Skipped);
        assert_eq!(data.last_committed_batch, Some(0));
        assert_eq!(target.inserted_keys(r#""a""#, 2), (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let orchestrator = Orchestrator::new(config(), catalog(&["a", "b"])).unwrap();
        let report = orchestrator.run(None, true).await.unwrap();

        assert!(report.dry_run);
        assert_eq!(report.status, "dry_run");
        assert_eq!(report.units.len(), 4);
        assert!(report.units.iter().all(|u| u.status == UnitStatus::Pending));
    }

    #[tokio::test]
    async fn test_excluded_objects_never_logged() {
        let dir = tempfile::TempDir::new().unwrap();
        let audit = dir.path().join("audit.json");
        let mut config = config();
        config.migration.exclude = vec!["temp_*".to_string()];
        let target = FakeTarget::new();
        let source = source(&[("a", 3), ("temp_load", 3)]);

        let report = orchestrator(config, catalog(&["a", "temp_load"]), &target, &source)
            .with_log_sink(Arc::new(JsonFileSink::new(&audit)))
            .run(None, false)
            .await
            .unwrap();

        assert_eq!(report.status, "completed");
        assert_eq!(report.excluded.len(), 1);
        assert!(report.unit("ddl:table:dbo.temp_load").is_none());

        let content = std::fs::read_to_string(&audit).unwrap();
        let records: serde_json::Value = serde_json::from_str(&content).unwrap();
        let executions: Vec<&serde_json::Value> = records
            .as_array()
            .unwrap()
            .iter()
            .filter(|r| r["type"] == "execution")
            .collect();
        assert!(!executions.is_empty());
        assert!(executions.iter().all(|r| r["object"] != "dbo.temp_load"));
        assert!(source.fetches().iter().all(|(table, _)| table != &name("temp_load")));
    }

    #[tokio::test]
    async fn test_run_requires_target() {
        let err = Orchestrator::new(config(), catalog(&["a"]))
            .unwrap()
            .run(None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }

    #[tokio::test]
    async fn test_blocked_unit_fails_without_touching_target() {
        let catalog = Arc::new(
            Catalog::from_json(
                r#"{ "objects": [
                    { "kind": "table", "schema": "dbo", "name": "geo",
                      "columns": [ { "name": "id", "type": "int", "ordinal": 1 },
                                   { "name": "shape", "type": "geography", "ordinal": 2 } ] },
                    { "kind": "table", "schema": "dbo", "name": "plain",
                      "columns": [ { "name": "id", "type": "int", "ordinal": 1 } ] }
                ] }"#,
            )
            .unwrap(),
        );
        let target = FakeTarget::new();
        let report = orchestrator(config(), catalog, &target, &FakeSource::default())
            .run(None, false)
            .await
            .unwrap();

        let geo = report.unit("ddl:table:dbo.geo").unwrap();
        assert_eq!(geo.status, UnitStatus::Failed);
        assert!(geo.error.as_ref().unwrap().starts_with("requires manual review"));
        assert!(!target
            .committed_statements()
            .iter()
            .any(|s| s.contains("\"geo\"")));
        assert_eq!(report.unit("ddl:table:dbo.plain").unwrap().status, UnitStatus::Committed);
    }
}
