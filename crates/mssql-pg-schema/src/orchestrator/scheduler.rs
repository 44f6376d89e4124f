//! Bounded worker pool over the plan's dependency counters.
//!
//! Each unit carries a count of predecessors that have not committed yet.
//! When the count reaches zero the unit joins the ready queue; at most
//! `workers` units run at once. A unit is claimed by exactly one worker and
//! its outcome is folded back by the dispatcher, so unit state is never
//! shared between tasks.

use super::log::{ExecutionLog, ExecutionLogEntry, LogOutcome};
use super::retry::RetryPolicy;
use crate::config::FailurePolicy;
use crate::error::Result;
use crate::exec::{
    BatchRequest, ExecError, ExecErrorKind, RowSource, SqlValue, TargetExecutor, TargetTransaction,
};
use crate::plan::{DataTransfer, MigrationPlan, MigrationUnit, UnitKind, UnitStatus};
use crate::state::{RunState, RunStatus, StateBackend, UnitCheckpoint};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Mutable result of one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitOutcome {
    pub status: UnitStatus,
    pub retry_count: u32,
    pub last_committed_batch: Option<u64>,
    pub error: Option<String>,
}

impl UnitOutcome {
    /// Starting point for a unit, taking a resumed checkpoint into account.
    pub fn initial(unit: &MigrationUnit, checkpoint: Option<&UnitCheckpoint>) -> Self {
        let mut outcome = Self {
            status: unit.status,
            retry_count: unit.retry_count,
            last_committed_batch: unit.last_committed_batch,
            error: unit.error.clone(),
        };
        if outcome.status == UnitStatus::Skipped {
            return outcome;
        }
        if let Some(checkpoint) = checkpoint {
            outcome.last_committed_batch = checkpoint.last_committed_batch;
            if checkpoint.status == UnitStatus::Committed {
                outcome.status = UnitStatus::Committed;
                outcome.retry_count = checkpoint.retry_count;
            }
        }
        outcome
    }

    fn finish(&mut self, status: UnitStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
    }
}

/// Serializes checkpoint updates and persists them after every change.
pub struct Checkpointer {
    state: Mutex<RunState>,
    backend: Arc<dyn StateBackend>,
}

impl Checkpointer {
    pub fn new(state: RunState, backend: Arc<dyn StateBackend>) -> Self {
        Self {
            state: Mutex::new(state),
            backend,
        }
    }

    /// Apply `update` to a unit's checkpoint and save the run.
    ///
    /// The in-memory state only changes once the save succeeds.
    pub async fn update<F>(&self, unit_id: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut UnitCheckpoint),
    {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let checkpoint = next.checkpoint_mut(unit_id);
        update(checkpoint);
        checkpoint.updated_at = Utc::now();
        self.backend.save(&next).await?;
        *state = next;
        Ok(())
    }

    /// Record every final outcome and close the run.
    pub async fn finish(
        &self,
        plan: &MigrationPlan,
        outcomes: &[UnitOutcome],
        status: RunStatus,
    ) -> Result<RunState> {
        let mut state = self.state.lock().await;
        for (unit, outcome) in plan.units.iter().zip(outcomes) {
            let checkpoint = state.checkpoint_mut(&unit.id);
            checkpoint.status = outcome.status;
            checkpoint.retry_count = outcome.retry_count;
            // a batch committed on the target is never forgotten
            checkpoint.last_committed_batch =
                checkpoint.last_committed_batch.max(outcome.last_committed_batch);
            checkpoint.error = outcome.error.clone();
            checkpoint.updated_at = Utc::now();
        }
        state.finish(status);
        self.backend.save(&state).await?;
        Ok(state.clone())
    }
}

/// Everything a worker needs, shared read-only across tasks.
pub struct ExecutionContext {
    pub plan: Arc<MigrationPlan>,
    pub target: Arc<dyn TargetExecutor>,
    pub source: Option<Arc<dyn RowSource>>,
    pub log: Arc<ExecutionLog>,
    pub checkpoints: Arc<Checkpointer>,
    pub retry: RetryPolicy,
    pub cancel: CancellationToken,
    pub batch_size: usize,
}

/// Outcome of a whole scheduling pass.
#[derive(Debug)]
pub struct ScheduleResult {
    pub outcomes: Vec<UnitOutcome>,
    /// Unit whose failure stopped dispatch under `abort_all`.
    pub aborted_by: Option<String>,
    pub cancelled: bool,
}

type InFlight = BoxFuture<'static, (usize, std::result::Result<UnitOutcome, JoinError>)>;

pub struct Scheduler {
    ctx: Arc<ExecutionContext>,
    workers: usize,
    failure_policy: FailurePolicy,
}

impl Scheduler {
    pub fn new(ctx: Arc<ExecutionContext>, workers: usize, failure_policy: FailurePolicy) -> Self {
        Self {
            ctx,
            workers: workers.max(1),
            failure_policy,
        }
    }

    pub async fn run(&self, outcomes: Vec<UnitOutcome>) -> ScheduleResult {
        let plan = self.ctx.plan.clone();
        let mut pass = Pass {
            plan: &plan,
            log: &self.ctx.log,
            dependents: plan.dependents(),
            pending: plan.units.iter().map(|u| u.depends_on.len()).collect(),
            ready: VecDeque::new(),
            outcomes,
            aborted_by: None,
            failure_policy: self.failure_policy,
        };

        // Settle what is already final: committed in an earlier attempt of
        // this run, or skipped while planning.
        let initial: Vec<UnitStatus> = pass.outcomes.iter().map(|o| o.status).collect();
        for (idx, status) in initial.into_iter().enumerate() {
            match status {
                UnitStatus::Committed => {
                    debug!("{}: already committed, not re-run", plan.units[idx].id);
                    pass.settle(idx);
                }
                UnitStatus::Skipped => {
                    pass.log_skip(idx);
                    pass.settle(idx);
                }
                _ => {}
            }
        }
        for (idx, unit) in plan.units.iter().enumerate() {
            if unit.depends_on.is_empty() && !pass.outcomes[idx].status.is_terminal() {
                pass.ready.push_back(idx);
            }
        }

        let mut in_flight: FuturesUnordered<InFlight> = FuturesUnordered::new();
        loop {
            while pass.aborted_by.is_none()
                && !self.ctx.cancel.is_cancelled()
                && in_flight.len() < self.workers
            {
                let Some(idx) = pass.ready.pop_front() else {
                    break;
                };
                if pass.outcomes[idx].status.is_terminal() {
                    continue;
                }

                let unit = &plan.units[idx];
                if unit.is_blocked() {
                    let message = format!("requires manual review: {}", unit.blocked.join("; "));
                    pass.outcomes[idx].finish(UnitStatus::Failed, Some(message.clone()));
                    self.ctx.log.append(
                        ExecutionLogEntry::new(&unit.id, unit.kind, &unit.object.to_string(), LogOutcome::Failed)
                            .with_error(message),
                    );
                    pass.settle(idx);
                    continue;
                }

                pass.outcomes[idx].status = UnitStatus::InProgress;
                let ctx = self.ctx.clone();
                let start = pass.outcomes[idx].clone();
                let handle = tokio::spawn(execute_unit(ctx, idx, start));
                in_flight.push(async move { (idx, handle.await) }.boxed());
            }

            let Some((idx, joined)) = in_flight.next().await else {
                break;
            };
            pass.outcomes[idx] = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    let unit = &plan.units[idx];
                    let message = format!("worker task panicked: {}", e);
                    self.ctx.log.append(
                        ExecutionLogEntry::new(&unit.id, unit.kind, &unit.object.to_string(), LogOutcome::Failed)
                            .with_error(message.clone()),
                    );
                    let mut outcome = pass.outcomes[idx].clone();
                    outcome.finish(UnitStatus::Failed, Some(message));
                    outcome
                }
            };
            pass.settle(idx);
        }

        let cancelled = self.ctx.cancel.is_cancelled();
        let reason = if cancelled {
            "run cancelled before the unit started".to_string()
        } else if let Some(id) = &pass.aborted_by {
            format!("run aborted after {} failed", id)
        } else {
            "dependencies never committed".to_string()
        };
        for idx in 0..plan.units.len() {
            if !pass.outcomes[idx].status.is_terminal() {
                pass.outcomes[idx].finish(UnitStatus::Skipped, Some(reason.clone()));
                pass.log_skip(idx);
            }
        }

        ScheduleResult {
            outcomes: pass.outcomes,
            aborted_by: pass.aborted_by,
            cancelled,
        }
    }
}

/// Dispatcher-owned bookkeeping for one scheduling pass.
struct Pass<'a> {
    plan: &'a MigrationPlan,
    log: &'a ExecutionLog,
    dependents: Vec<Vec<usize>>,
    pending: Vec<usize>,
    ready: VecDeque<usize>,
    outcomes: Vec<UnitOutcome>,
    aborted_by: Option<String>,
    failure_policy: FailurePolicy,
}

impl Pass<'_> {
    /// Fold a final outcome into the dependency counters.
    fn settle(&mut self, idx: usize) {
        match self.outcomes[idx].status {
            UnitStatus::Committed => {
                for &dep in &self.dependents[idx] {
                    self.pending[dep] = self.pending[dep].saturating_sub(1);
                    if self.pending[dep] == 0 && !self.outcomes[dep].status.is_terminal() {
                        self.ready.push_back(dep);
                    }
                }
            }
            UnitStatus::Failed | UnitStatus::Skipped => {
                if self.outcomes[idx].status == UnitStatus::Failed
                    && self.failure_policy == FailurePolicy::AbortAll
                    && self.aborted_by.is_none()
                {
                    warn!(
                        "{} failed permanently; abort_all policy stops dispatch",
                        self.plan.units[idx].id
                    );
                    self.aborted_by = Some(self.plan.units[idx].id.clone());
                }
                self.skip_dependents(idx);
            }
            UnitStatus::Pending | UnitStatus::InProgress => {}
        }
    }

    /// Mark every transitive dependent that has not started as skipped.
    fn skip_dependents(&mut self, root: usize) {
        let root_id = self.plan.units[root].id.clone();
        let mut queue: VecDeque<usize> = self.dependents[root].iter().copied().collect();
        let mut seen = vec![false; self.plan.units.len()];
        while let Some(idx) = queue.pop_front() {
            if std::mem::replace(&mut seen[idx], true) {
                continue;
            }
            let status = self.outcomes[idx].status;
            if status == UnitStatus::Pending {
                self.outcomes[idx].finish(
                    UnitStatus::Skipped,
                    Some(format!("dependency {} did not commit", root_id)),
                );
                self.log_skip(idx);
            }
            if status != UnitStatus::Committed {
                queue.extend(self.dependents[idx].iter().copied());
            }
        }
    }

    fn log_skip(&self, idx: usize) {
        let unit = &self.plan.units[idx];
        let mut entry =
            ExecutionLogEntry::new(&unit.id, unit.kind, &unit.object.to_string(), LogOutcome::Skipped);
        if let Some(error) = &self.outcomes[idx].error {
            entry = entry.with_error(error.clone());
        }
        self.log.append(entry);
    }
}

enum Completion {
    Done,
    Cancelled,
}

/// Run one unit to a final status, retrying transient failures.
async fn execute_unit(ctx: Arc<ExecutionContext>, idx: usize, mut outcome: UnitOutcome) -> UnitOutcome {
    let unit = &ctx.plan.units[idx];
    let object = unit.object.to_string();
    ctx.log.append(
        ExecutionLogEntry::new(&unit.id, unit.kind, &object, LogOutcome::Started)
            .with_retry_count(outcome.retry_count),
    );

    loop {
        let attempt = match unit.kind {
            UnitKind::Ddl => apply_statements(ctx.target.as_ref(), &unit.statements)
                .await
                .map(|_| Completion::Done),
            UnitKind::Data => transfer_table(&ctx, unit, &mut outcome).await,
        };

        match attempt {
            Ok(Completion::Done) => {
                outcome.finish(UnitStatus::Committed, None);
                break;
            }
            Ok(Completion::Cancelled) => {
                let at = match outcome.last_committed_batch {
                    Some(batch) => format!("after batch {}", batch),
                    None => "before the first batch".to_string(),
                };
                outcome.finish(UnitStatus::Skipped, Some(format!("cancelled {}", at)));
                break;
            }
            Err(e) if e.is_transient() && ctx.retry.allows(outcome.retry_count) => {
                outcome.retry_count += 1;
                let delay = ctx.retry.delay(outcome.retry_count);
                ctx.log.append(
                    ExecutionLogEntry::new(&unit.id, unit.kind, &object, LogOutcome::Retrying)
                        .with_error(e.to_string())
                        .with_retry_count(outcome.retry_count),
                );
                tokio::select! {
                    _ = ctx.cancel.cancelled() => {
                        outcome.finish(
                            UnitStatus::Skipped,
                            Some(format!("cancelled while waiting to retry: {}", e)),
                        );
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                let message = if e.is_transient() {
                    format!("{} (gave up after {} retries)", e, outcome.retry_count)
                } else {
                    e.to_string()
                };
                outcome.finish(UnitStatus::Failed, Some(message));
                break;
            }
        }
    }

    let final_outcome = match outcome.status {
        UnitStatus::Committed => LogOutcome::Committed,
        UnitStatus::Skipped => LogOutcome::Skipped,
        _ => LogOutcome::Failed,
    };
    let mut entry = ExecutionLogEntry::new(&unit.id, unit.kind, &object, final_outcome)
        .with_retry_count(outcome.retry_count);
    if let Some(error) = &outcome.error {
        entry = entry.with_error(error.clone());
    }
    ctx.log.append(entry);

    let saved = outcome.clone();
    if let Err(e) = ctx
        .checkpoints
        .update(&unit.id, move |c| {
            c.status = saved.status;
            c.retry_count = saved.retry_count;
            c.last_committed_batch = saved.last_committed_batch;
            c.error = saved.error;
        })
        .await
    {
        warn!("{}: failed to save checkpoint: {}", unit.id, e);
    }

    outcome
}

/// Run statements in a single transaction.
async fn apply_statements(target: &dyn TargetExecutor, statements: &[String]) -> std::result::Result<(), ExecError> {
    let mut tx = target.begin().await?;
    for statement in statements {
        if let Err(e) = tx.execute(statement, &[]).await {
            rollback_quietly(tx).await;
            return Err(e);
        }
    }
    tx.commit().await
}

async fn rollback_quietly(tx: Box<dyn TargetTransaction>) {
    if let Err(e) = tx.rollback().await {
        debug!("Rollback failed: {}", e);
    }
}

/// Copy a table batch by batch, starting after the last committed batch.
///
/// Each batch is read, written and committed before the next one is read,
/// and the checkpoint is saved right after the commit.
async fn transfer_table(
    ctx: &ExecutionContext,
    unit: &MigrationUnit,
    outcome: &mut UnitOutcome,
) -> std::result::Result<Completion, ExecError> {
    let Some(transfer) = &unit.transfer else {
        return Err(ExecError::new(
            ExecErrorKind::Other,
            format!("{} has no transfer layout", unit.id),
        ));
    };
    let Some(source) = &ctx.source else {
        return Err(ExecError::new(ExecErrorKind::Other, "no row source configured"));
    };

    let columns = transfer.source_columns();
    let mut batch = outcome.last_committed_batch.map(|b| b + 1).unwrap_or(0);
    let expected = match transfer.estimated_batches(ctx.batch_size) {
        Some(batches) => batches,
        None => {
            let rows = source.row_count(&transfer.source_table).await?;
            (rows.max(0) as u64).div_ceil(ctx.batch_size.max(1) as u64)
        }
    };
    if batch > 0 {
        info!("{}: resuming at batch {} of ~{}", unit.id, batch, expected);
    } else {
        debug!("{}: ~{} batches to transfer", unit.id, expected);
    }

    loop {
        if ctx.cancel.is_cancelled() {
            return Ok(Completion::Cancelled);
        }

        let started = Instant::now();
        let request = BatchRequest {
            table: transfer.source_table.clone(),
            columns: columns.clone(),
            order_by: transfer.order_by.clone(),
            batch_index: batch,
            batch_size: ctx.batch_size,
        };
        let rows = source.fetch_batch(&request).await?;
        let fetched = rows.len();

        if fetched > 0 {
            write_batch(ctx.target.as_ref(), transfer, &rows).await?;
            // committed on the target: the outcome moves even if the save fails
            outcome.last_committed_batch = Some(batch);
            ctx.log.append(
                ExecutionLogEntry::new(&unit.id, unit.kind, &unit.object.to_string(), LogOutcome::BatchCommitted)
                    .with_batch(batch, fetched as u64, started.elapsed().as_millis() as u64)
                    .with_retry_count(outcome.retry_count),
            );
            let retries = outcome.retry_count;
            ctx.checkpoints
                .update(&unit.id, move |c| {
                    c.status = UnitStatus::InProgress;
                    c.last_committed_batch = Some(batch);
                    c.retry_count = retries;
                })
                .await
                .map_err(|e| {
                    ExecError::new(ExecErrorKind::Other, format!("failed to save checkpoint: {}", e))
                })?;
        }

        if fetched < ctx.batch_size {
            break;
        }
        batch += 1;
    }

    if !transfer.post_load.is_empty() {
        apply_statements(ctx.target.as_ref(), &transfer.post_load).await?;
    }
    Ok(Completion::Done)
}

/// Insert one batch inside its own transaction.
async fn write_batch(
    target: &dyn TargetExecutor,
    transfer: &DataTransfer,
    rows: &[Vec<SqlValue>],
) -> std::result::Result<(), ExecError> {
    let width = transfer.columns.len();
    let mut tx = target.begin().await?;
    for chunk in rows.chunks(transfer.rows_per_statement()) {
        let mut params = Vec::with_capacity(chunk.len() * width);
        for row in chunk {
            if row.len() != width {
                rollback_quietly(tx).await;
                return Err(ExecError::new(
                    ExecErrorKind::Other,
                    format!("source row has {} values, expected {}", row.len(), width),
                ));
            }
            for (value, column) in row.iter().zip(&transfer.columns) {
                params.push(match column.transform {
                    Some(transform) => transform.apply(value.clone()),
                    None => value.clone(),
                });
            }
        }
        if let Err(e) = tx.execute(&transfer.insert_sql(chunk.len()), &params).await {
            rollback_quietly(tx).await;
            return Err(e);
        }
    }
    tx.commit().await
}
