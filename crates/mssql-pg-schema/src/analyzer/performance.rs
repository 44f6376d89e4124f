//! Schema and run-time performance advice.

use super::{Category, Finding, Severity};
use crate::catalog::{Catalog, ConstraintBody, QualifiedName, TableDef};
use crate::orchestrator::{ExecutionLogEntry, LogOutcome};
use crate::plan::UnitKind;
use std::collections::BTreeMap;

/// Tables at or above this many rows count as large.
pub const LARGE_TABLE_ROWS: i64 = 100_000;

/// Character columns longer than this are flagged.
pub const OVERSIZED_VARCHAR: i32 = 1000;

/// A table is slow when its throughput is below this share of the run median.
const SLOW_FRACTION: f64 = 0.25;

const DATE_TYPES: &[&str] = &["date", "datetime", "datetime2", "smalldatetime", "datetimeoffset"];

pub fn analyze_schema(catalog: &Catalog) -> Vec<Finding> {
    let mut findings = Vec::new();

    for (object, table) in catalog.tables() {
        let name = object.name.to_string();
        let large = table.row_count.unwrap_or(0) >= LARGE_TABLE_ROWS;

        if table.primary_key.is_none() {
            findings.push(
                Finding::new(
                    Severity::High,
                    Category::MissingPrimaryKey,
                    Some(name.clone()),
                    "table has no primary key",
                )
                .recommend("add a primary key; without one batches cannot be replayed idempotently"),
            );
        }

        if large {
            missing_fk_indexes(catalog, &object.name, &mut findings);

            if let Some(column) = table
                .columns
                .iter()
                .find(|c| DATE_TYPES.contains(&c.source_type.name.as_str()))
            {
                findings.push(
                    Finding::new(
                        Severity::Medium,
                        Category::Partitioning,
                        Some(name.clone()),
                        format!(
                            "{} rows with date column {}",
                            table.row_count.unwrap_or(0),
                            column.name
                        ),
                    )
                    .recommend(format!("consider PARTITION BY RANGE ({})", column.name)),
                );
            }
        }

        for index in catalog.indexes_on(&object.name).filter(|i| i.clustered) {
            findings.push(
                Finding::new(
                    Severity::Info,
                    Category::ClusteredIndex,
                    Some(name.clone()),
                    format!("clustered index {} becomes a regular index", index.index_name),
                )
                .recommend(format!(
                    "run CLUSTER {} USING \"{}\" after the load if physical order matters",
                    object.name.name, index.index_name
                )),
            );
        }

        oversized_columns(&name, table, &mut findings);
    }

    findings
}

/// Foreign keys on large tables whose columns lead no index.
fn missing_fk_indexes(catalog: &Catalog, table: &QualifiedName, findings: &mut Vec<Finding>) {
    for (object, fk) in catalog.foreign_keys().filter(|(_, c)| &c.table == table) {
        let ConstraintBody::ForeignKey { columns, .. } = &fk.body else {
            continue;
        };
        let covered = catalog.indexes_on(table).any(|idx| {
            idx.columns.len() >= columns.len()
                && idx
                    .columns
                    .iter()
                    .zip(columns)
                    .all(|(ic, c)| ic.name.eq_ignore_ascii_case(c))
        });
        if !covered {
            findings.push(
                Finding::new(
                    Severity::Medium,
                    Category::MissingIndex,
                    Some(table.to_string()),
                    format!(
                        "foreign key {} on ({}) has no supporting index",
                        object.name.name,
                        columns.join(", ")
                    ),
                )
                .recommend("index the referencing columns to keep joins and cascades fast"),
            );
        }
    }
}

fn oversized_columns(table_name: &str, table: &TableDef, findings: &mut Vec<Finding>) {
    for column in &table.columns {
        let ty = &column.source_type;
        if !matches!(ty.name.as_str(), "varchar" | "nvarchar") || ty.is_max() {
            continue;
        }
        if let Some(length) = ty.length.filter(|l| *l > OVERSIZED_VARCHAR) {
            findings.push(
                Finding::new(
                    Severity::Low,
                    Category::OversizedColumn,
                    Some(table_name.to_string()),
                    format!("column {} is {}({})", column.name, ty.name, length),
                )
                .recommend("consider text; PostgreSQL stores both the same way"),
            );
        }
    }
}

#[derive(Default)]
struct Throughput {
    rows: u64,
    millis: u64,
}

impl Throughput {
    fn rows_per_second(&self) -> f64 {
        self.rows as f64 * 1000.0 / self.millis.max(1) as f64
    }
}

pub fn analyze_execution(catalog: &Catalog, log: &[ExecutionLogEntry]) -> Vec<Finding> {
    let mut findings = Vec::new();

    let mut per_table: BTreeMap<&str, Throughput> = BTreeMap::new();
    for entry in log.iter().filter(|e| e.outcome == LogOutcome::BatchCommitted) {
        let t = per_table.entry(entry.object.as_str()).or_default();
        t.rows += entry.rows.unwrap_or(0);
        t.millis += entry.duration_ms.unwrap_or(0);
    }

    if per_table.len() >= 2 {
        let mut rates: Vec<f64> = per_table.values().map(Throughput::rows_per_second).collect();
        rates.sort_by(|a, b| a.total_cmp(b));
        let median = rates[rates.len() / 2];
        for (table, t) in &per_table {
            let rate = t.rows_per_second();
            if rate < median * SLOW_FRACTION {
                findings.push(
                    Finding::new(
                        Severity::Medium,
                        Category::SlowTransfer,
                        Some(table.to_string()),
                        format!(
                            "transferred {:.0} rows/s against a run median of {:.0} rows/s",
                            rate, median
                        ),
                    )
                    .recommend("check for wide columns, triggers or missing indexes on the source ordering"),
                );
            }
        }
    }

    let loaded: Vec<&str> = log
        .iter()
        .filter(|e| e.unit_kind == UnitKind::Data && e.outcome == LogOutcome::Committed)
        .map(|e| e.object.as_str())
        .collect();

    for table in &loaded {
        let rows = QualifiedName::parse(table)
            .and_then(|name| catalog.table(&name))
            .and_then(|t| t.row_count);
        let message = match rows {
            Some(rows) => format!("statistics are stale after loading ~{} rows", rows),
            None => "statistics are stale after loading".to_string(),
        };
        findings.push(
            Finding::new(Severity::Info, Category::Maintenance, Some(table.to_string()), message)
                .recommend(format!("run VACUUM ANALYZE {}", table)),
        );
    }

    if !loaded.is_empty() {
        for (setting, advice) in [
            ("shared_buffers", "set to about 25% of system memory"),
            ("effective_cache_size", "set to 50-75% of system memory"),
            ("maintenance_work_mem", "raise while building indexes after the load"),
            ("max_wal_size", "raise for bulk loads to reduce checkpoint pressure"),
        ] {
            findings.push(
                Finding::new(
                    Severity::Info,
                    Category::Configuration,
                    None,
                    format!("review {}", setting),
                )
                .recommend(advice),
            );
        }
    }

    findings
}
