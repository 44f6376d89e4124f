//! Migration plan construction.
//!
//! The plan is built once per run: exclusion patterns are applied, every
//! remaining object is translated, the dependency graph is ordered and the
//! result is laid out as a list of [`MigrationUnit`]s whose predecessors
//! always come earlier in the list.

mod exclude;

pub use exclude::ExcludeMatcher;

use crate::catalog::{Catalog, ObjectKind, QualifiedName, SchemaObject};
use crate::config::{Config, UnmappablePolicy};
use crate::error::{MigrateError, Result};
use crate::graph::DependencyGraph;
use crate::resolver::MappingAuditRecord;
use crate::translate::{ColumnTransfer, Diagnostic, TranslatedObject, Translator};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, info, warn};

/// PostgreSQL's limit on bind parameters per statement.
const MAX_BIND_PARAMS: usize = 65_535;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// Apply the translated DDL for one object.
    Ddl,
    /// Transfer all batches of one table.
    Data,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Ddl => "ddl",
            UnitKind::Data => "data",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a migration unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    InProgress,
    Committed,
    Failed,
    Skipped,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::InProgress => "in_progress",
            UnitStatus::Committed => "committed",
            UnitStatus::Failed => "failed",
            UnitStatus::Skipped => "skipped",
        }
    }

    /// Whether the unit has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UnitStatus::Committed | UnitStatus::Failed | UnitStatus::Skipped
        )
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a data unit needs to copy one table.
#[derive(Debug, Clone)]
pub struct DataTransfer {
    pub source_table: QualifiedName,
    /// Quoted, qualified target table.
    pub target_table: String,
    pub columns: Vec<ColumnTransfer>,
    /// Source columns giving a stable row order.
    pub order_by: Vec<String>,
    /// Row count reported by the extractor, if any.
    pub estimated_rows: Option<i64>,
    /// The target has a primary key, so replayed rows can be ignored.
    pub has_primary_key: bool,
    /// Statements to run once the last batch has committed.
    pub post_load: Vec<String>,
}

impl DataTransfer {
    /// Expected number of batches, when the row count is known.
    pub fn estimated_batches(&self, batch_size: usize) -> Option<u64> {
        let rows = self.estimated_rows?.max(0) as u64;
        let size = batch_size.max(1) as u64;
        Some(rows.div_ceil(size))
    }

    pub fn source_columns(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.source.clone()).collect()
    }

    /// Largest number of rows a single insert statement may carry.
    pub fn rows_per_statement(&self) -> usize {
        (MAX_BIND_PARAMS / self.columns.len().max(1)).max(1)
    }

    /// Multi-row parameterized insert for `rows` rows.
    ///
    /// Parameters are numbered row-major and cast to the column's target type.
    pub fn insert_sql(&self, rows: usize) -> String {
        let column_list = self
            .columns
            .iter()
            .map(|c| c.target.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let width = self.columns.len();
        let mut values = Vec::with_capacity(rows);
        for row in 0..rows {
            let placeholders = self
                .columns
                .iter()
                .enumerate()
                .map(|(i, c)| format!("${}::{}", row * width + i + 1, c.target_type))
                .collect::<Vec<_>>()
                .join(", ");
            values.push(format!("({})", placeholders));
        }

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.target_table,
            column_list,
            values.join(", ")
        );
        if self.has_primary_key {
            sql.push_str(" ON CONFLICT DO NOTHING");
        }
        sql
    }
}

/// One schedulable piece of work.
#[derive(Debug, Clone)]
pub struct MigrationUnit {
    /// Stable identifier used as the checkpoint key.
    pub id: String,
    pub kind: UnitKind,
    pub object: QualifiedName,
    pub object_kind: ObjectKind,
    /// DDL statements (empty for data units).
    pub statements: Vec<String>,
    /// Present on data units.
    pub transfer: Option<DataTransfer>,
    /// Indices of units that must commit first. Always smaller than this
    /// unit's own index.
    pub depends_on: Vec<usize>,
    /// Reasons this unit cannot run without manual intervention.
    pub blocked: Vec<String>,
    pub status: UnitStatus,
    pub retry_count: u32,
    pub last_committed_batch: Option<u64>,
    pub error: Option<String>,
}

impl MigrationUnit {
    pub fn ddl_id(kind: ObjectKind, name: &QualifiedName) -> String {
        format!("ddl:{}:{}", kind, name)
    }

    pub fn data_id(name: &QualifiedName) -> String {
        format!("data:{}", name)
    }

    fn new(id: String, kind: UnitKind, object: &SchemaObject) -> Self {
        Self {
            id,
            kind,
            object: object.name.clone(),
            object_kind: object.kind(),
            statements: Vec::new(),
            transfer: None,
            depends_on: Vec::new(),
            blocked: Vec::new(),
            status: UnitStatus::Pending,
            retry_count: 0,
            last_committed_batch: None,
            error: None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        !self.blocked.is_empty()
    }
}

/// An object removed from the plan before execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExcludedObject {
    pub name: QualifiedName,
    pub kind: ObjectKind,
    pub reason: String,
}

/// Ordered units for one run, plus everything learned while building them.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub units: Vec<MigrationUnit>,
    pub excluded: Vec<ExcludedObject>,
    pub translations: Vec<TranslatedObject>,
    pub diagnostics: Vec<Diagnostic>,
    pub mapping: Vec<MappingAuditRecord>,
    /// Object order the units were laid out in.
    pub object_order: Vec<QualifiedName>,
    pub batch_size: usize,
}

impl MigrationPlan {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn unit(&self, id: &str) -> Option<&MigrationUnit> {
        self.units.iter().find(|u| u.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.units.iter().position(|u| u.id == id)
    }

    /// Units that directly depend on each unit, by index.
    pub fn dependents(&self) -> Vec<Vec<usize>> {
        let mut out = vec![Vec::new(); self.units.len()];
        for (idx, unit) in self.units.iter().enumerate() {
            for &dep in &unit.depends_on {
                out[dep].push(idx);
            }
        }
        out
    }

    pub fn translation(&self, name: &QualifiedName) -> Option<&TranslatedObject> {
        self.translations.iter().find(|t| &t.name == name)
    }

    pub fn is_excluded(&self, name: &QualifiedName) -> bool {
        self.excluded.iter().any(|e| &e.name == name)
    }

    /// Plan as a SQL script of every runnable DDL unit, in order.
    pub fn ddl_script(&self) -> String {
        let mut out = String::new();
        for unit in &self.units {
            if unit.kind != UnitKind::Ddl || unit.statements.is_empty() {
                continue;
            }
            out.push_str(&format!("-- {}\n", unit.id));
            for statement in &unit.statements {
                out.push_str(statement);
                out.push_str(";\n");
            }
            out.push('\n');
        }
        out
    }
}

/// Builds a [`MigrationPlan`] from a catalog and configuration.
pub struct PlanBuilder<'a> {
    catalog: &'a Catalog,
    translator: Translator,
    excludes: ExcludeMatcher,
    deferred_fks: Vec<String>,
    unmappable_policy: UnmappablePolicy,
    transfer_data: bool,
    batch_size: usize,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(config: &Config, catalog: &'a Catalog) -> Result<Self> {
        Ok(Self {
            catalog,
            translator: Translator::from_config(config)?,
            excludes: ExcludeMatcher::new(&config.migration.exclude)?,
            deferred_fks: config.migration.defer_foreign_keys.clone(),
            unmappable_policy: config.migration.unmappable_policy,
            transfer_data: config.migration.transfer_data,
            batch_size: config.migration.batch_size,
        })
    }

    pub fn with_translator(mut self, translator: Translator) -> Self {
        self.translator = translator;
        self
    }

    pub fn build(self) -> Result<MigrationPlan> {
        let full_graph = DependencyGraph::build(self.catalog, &self.deferred_fks);
        let excluded = self.resolve_exclusions(&full_graph);

        let (catalog, graph) = if excluded.is_empty() {
            (self.catalog.clone(), full_graph)
        } else {
            let kept: Vec<SchemaObject> = self
                .catalog
                .objects()
                .iter()
                .filter(|o| !excluded.iter().any(|e| e.name == o.name))
                .cloned()
                .collect();
            let catalog = Catalog::from_objects(kept)?;
            let graph = DependencyGraph::build(&catalog, &self.deferred_fks);
            (catalog, graph)
        };

        let order = graph.topological_order()?;
        debug!(
            "Dependency order computed: {} objects, {} edges",
            graph.node_count(),
            graph.edge_count()
        );

        let translations: HashMap<QualifiedName, TranslatedObject> = catalog
            .objects()
            .iter()
            .map(|o| (o.name.clone(), self.translator.translate(o)))
            .collect();

        let unmappable: Vec<&TranslatedObject> = order
            .iter()
            .filter_map(|name| translations.get(name))
            .filter(|t| !t.is_translated())
            .collect();

        if let Some(first) = unmappable.first() {
            match self.unmappable_policy {
                UnmappablePolicy::Abort => {
                    return Err(MigrateError::Unmappable {
                        object: first.name.to_string(),
                        reasons: first.reasons(),
                    });
                }
                UnmappablePolicy::Skip => {
                    warn!(
                        "{} object(s) cannot be translated and will be skipped with their dependents",
                        unmappable.len()
                    );
                }
                UnmappablePolicy::ManualReview => {
                    warn!(
                        "{} object(s) require manual review; their units will fail without retry",
                        unmappable.len()
                    );
                }
            }
        }

        let skipped: BTreeSet<QualifiedName> = if self.unmappable_policy == UnmappablePolicy::Skip
        {
            graph.with_dependents(unmappable.iter().map(|t| &t.name))
        } else {
            BTreeSet::new()
        };

        let mut units: Vec<MigrationUnit> = Vec::new();
        let mut ddl_index: HashMap<QualifiedName, usize> = HashMap::new();
        let mut data_index: HashMap<QualifiedName, usize> = HashMap::new();

        for name in &order {
            let (Some(object), Some(translated)) = (catalog.get(name), translations.get(name))
            else {
                continue;
            };

            let mut ddl = MigrationUnit::new(
                MigrationUnit::ddl_id(object.kind(), name),
                UnitKind::Ddl,
                object,
            );
            ddl.statements = translated.statements.clone();
            if !translated.is_translated() {
                ddl.blocked = translated.reasons();
            }

            let owned = matches!(object.kind(), ObjectKind::Index | ObjectKind::Constraint);
            let kept = !skipped.contains(name);
            for dep in graph.dependencies(name) {
                // a skipped unit never commits; only order-only edges reach here
                if kept && skipped.contains(&dep) {
                    continue;
                }
                let pred = if owned {
                    data_index.get(&dep).or_else(|| ddl_index.get(&dep))
                } else {
                    ddl_index.get(&dep)
                };
                if let Some(&pred) = pred {
                    ddl.depends_on.push(pred);
                }
            }
            ddl.depends_on.sort_unstable();
            ddl.depends_on.dedup();

            if skipped.contains(name) {
                ddl.status = UnitStatus::Skipped;
                ddl.error = Some(skip_reason(translated));
            }

            let ddl_pos = units.len();
            ddl_index.insert(name.clone(), ddl_pos);
            let ddl_status = ddl.status;
            let ddl_error = ddl.error.clone();
            units.push(ddl);

            if !self.transfer_data || !translated.is_translated() {
                continue;
            }
            let Some(table) = object.as_table() else {
                continue;
            };

            let order_by = if table.pk_columns().is_empty() {
                table.columns.iter().map(|c| c.name.clone()).collect()
            } else {
                table.pk_columns().to_vec()
            };
            let mut data = MigrationUnit::new(MigrationUnit::data_id(name), UnitKind::Data, object);
            data.transfer = Some(DataTransfer {
                source_table: name.clone(),
                target_table: self.translator.naming().qualified(name),
                columns: translated.columns.clone(),
                order_by,
                estimated_rows: table.row_count,
                has_primary_key: !table.pk_columns().is_empty(),
                post_load: translated.post_load.clone(),
            });
            data.depends_on.push(ddl_pos);
            if ddl_status == UnitStatus::Skipped {
                data.status = UnitStatus::Skipped;
                data.error = ddl_error;
            }
            data_index.insert(name.clone(), units.len());
            units.push(data);
        }

        let mut diagnostics = Vec::new();
        let mut mapping = Vec::new();
        let mut ordered_translations = Vec::with_capacity(order.len());
        let mut translations = translations;
        for name in &order {
            if let Some(t) = translations.remove(name) {
                diagnostics.extend(t.diagnostics.iter().cloned());
                mapping.extend(t.mapping.iter().cloned());
                ordered_translations.push(t);
            }
        }

        info!(
            "Plan built: {} units ({} excluded objects, {} diagnostics)",
            units.len(),
            excluded.len(),
            diagnostics.len()
        );

        Ok(MigrationPlan {
            units,
            excluded,
            translations: ordered_translations,
            diagnostics,
            mapping,
            object_order: order,
            batch_size: self.batch_size,
        })
    }

    /// Objects matching an exclude pattern plus everything that references them.
    fn resolve_exclusions(&self, graph: &DependencyGraph) -> Vec<ExcludedObject> {
        if self.excludes.is_empty() {
            return Vec::new();
        }

        let mut matched: HashMap<QualifiedName, String> = HashMap::new();
        for object in self.catalog.objects() {
            if let Some(pattern) = self.excludes.matching_pattern(&object.name) {
                matched.insert(object.name.clone(), pattern.to_string());
            }
        }

        let closure = graph.with_dependents(matched.keys());
        let mut excluded: Vec<ExcludedObject> = closure
            .into_iter()
            .filter_map(|name| {
                let object = self.catalog.get(&name)?;
                let reason = match matched.get(&name) {
                    Some(pattern) => format!("matches exclude pattern '{}'", pattern),
                    None => "depends on an excluded object".to_string(),
                };
                Some(ExcludedObject {
                    kind: object.kind(),
                    name,
                    reason,
                })
            })
            .collect();
        excluded.sort_by(|a, b| a.name.cmp(&b.name));

        if !excluded.is_empty() {
            info!("Excluded {} object(s) from the plan", excluded.len());
        }
        excluded
    }
}

fn skip_reason(translated: &TranslatedObject) -> String {
    if translated.is_translated() {
        "depends on an object that cannot be translated".to_string()
    } else {
        format!("cannot be translated: {}", translated.reasons().join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::orders_customers;
    use crate::config::tests::minimal;

    fn build(config: &Config, catalog: &Catalog) -> Result<MigrationPlan> {
        PlanBuilder::new(config, catalog)?.build()
    }

    fn pos(plan: &MigrationPlan, id: &str) -> usize {
        plan.position(id)
            .unwrap_or_else(|| panic!("unit {} missing", id))
    }

    fn geo_catalog() -> Catalog {
        Catalog::from_json(
            r#"{ "objects": [
                { "kind": "table", "schema": "dbo", "name": "geo",
                  "columns": [ { "name": "id", "type": "int", "ordinal": 1 },
                               { "name": "shape", "type": "geography", "ordinal": 2 } ],
                  "indexes": [ { "name": "IX_geo_id", "columns": ["id"] } ] },
                { "kind": "table", "schema": "dbo", "name": "plain",
                  "columns": [ { "name": "id", "type": "int", "ordinal": 1 } ] },
                { "kind": "view", "schema": "dbo", "name": "v_geo",
                  "definition": "CREATE VIEW dbo.v_geo AS SELECT id FROM dbo.geo",
                  "references": ["dbo.geo"] }
            ] }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_customers_before_orders() {
        let plan = build(&minimal(), &orders_customers()).unwrap();
        let customers = pos(&plan, "ddl:table:dbo.customers");
        let orders = pos(&plan, "ddl:table:dbo.orders");
        assert!(customers < orders);

        let fk = pos(&plan, "ddl:constraint:dbo.FK_orders_customers");
        assert!(fk > pos(&plan, "data:dbo.orders"));
        assert!(fk > pos(&plan, "data:dbo.customers"));
    }

    #[test]
    fn test_dependencies_point_backwards() {
        let plan = build(&minimal(), &orders_customers()).unwrap();
        for (idx, unit) in plan.units.iter().enumerate() {
            assert!(unit.depends_on.iter().all(|&d| d < idx), "{:?}", unit);
        }
        let fk = plan.unit("ddl:constraint:dbo.FK_orders_customers").unwrap();
        let deps: Vec<&str> = fk
            .depends_on
            .iter()
            .map(|&d| plan.units[d].id.as_str())
            .collect();
        assert!(deps.contains(&"data:dbo.orders"));
        assert!(deps.contains(&"data:dbo.customers"));
    }

    #[test]
    fn test_data_units_follow_config() {
        let mut config = minimal();
        config.migration.transfer_data = false;
        let plan = build(&config, &orders_customers()).unwrap();
        assert!(plan.units.iter().all(|u| u.kind == UnitKind::Ddl));

        let plan = build(&minimal(), &orders_customers()).unwrap();
        let data = plan.unit("data:dbo.orders").unwrap();
        let transfer = data.transfer.as_ref().unwrap();
        assert_eq!(transfer.order_by, vec!["id".to_string()]);
        assert_eq!(transfer.estimated_batches(5), Some(3));
        assert_eq!(transfer.post_load.len(), 1);
    }

    #[test]
    fn test_insert_sql() {
        let plan = build(&minimal(), &orders_customers()).unwrap();
        let transfer = plan
            .unit("data:dbo.customers")
            .unwrap()
            .transfer
            .clone()
            .unwrap();
        assert_eq!(
            transfer.insert_sql(2),
            "INSERT INTO \"public\".\"customers\" (\"id\", \"name\") VALUES \
             ($1::integer, $2::varchar(100)), ($3::integer, $4::varchar(100)) ON CONFLICT DO NOTHING"
        );
        assert_eq!(transfer.rows_per_statement(), 32_767);
    }

    #[test]
    fn test_exclusion_keeps_referencing_table() {
        let mut config = minimal();
        config.migration.exclude = vec!["customers".to_string()];
        let plan = build(&config, &orders_customers()).unwrap();

        let names: Vec<String> = plan.excluded.iter().map(|e| e.name.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "dbo.FK_orders_customers".to_string(),
                "dbo.customers".to_string()
            ]
        );
        let fk = &plan.excluded[0];
        assert_eq!(fk.reason, "depends on an excluded object");

        // orders loses its foreign key but keeps its table, index and rows
        assert!(plan.unit("ddl:table:dbo.orders").is_some());
        assert!(plan.unit("ddl:index:dbo.orders.IX_orders_customer").is_some());
        let data = plan.unit("data:dbo.orders").unwrap();
        assert_eq!(data.status, UnitStatus::Pending);
        assert!(plan.unit("ddl:table:dbo.customers").is_none());
        assert!(plan.unit("data:dbo.customers").is_none());
        assert!(plan.unit("ddl:constraint:dbo.FK_orders_customers").is_none());
        assert!(plan.unit("ddl:table:dbo.orders").unwrap().depends_on.is_empty());

        config.migration.defer_foreign_keys = vec!["FK_orders_customers".to_string()];
        let plan = build(&config, &orders_customers()).unwrap();
        assert!(plan.unit("ddl:table:dbo.orders").is_some());
        assert!(plan.unit("ddl:constraint:dbo.FK_orders_customers").is_none());
    }

    #[test]
    fn test_excluding_referencing_table_keeps_referenced() {
        let mut config = minimal();
        config.migration.exclude = vec!["orders".to_string()];
        let plan = build(&config, &orders_customers()).unwrap();

        let names: Vec<String> = plan.excluded.iter().map(|e| e.name.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "dbo.FK_orders_customers".to_string(),
                "dbo.orders".to_string(),
                "dbo.orders.IX_orders_customer".to_string()
            ]
        );
        assert!(plan.unit("ddl:table:dbo.customers").is_some());
        assert!(plan.unit("data:dbo.customers").is_some());
        assert_eq!(plan.units.len(), 2);
    }

    #[test]
    fn test_exclusion_wildcard() {
        let catalog = Catalog::from_json(
            r#"{ "objects": [
                { "kind": "table", "schema": "dbo", "name": "temp_load",
                  "columns": [ { "name": "id", "type": "int", "ordinal": 1 } ] },
                { "kind": "table", "schema": "dbo", "name": "temp_stage",
                  "columns": [ { "name": "id", "type": "int", "ordinal": 1 } ] },
                { "kind": "view", "schema": "dbo", "name": "v_load",
                  "definition": "CREATE VIEW dbo.v_load AS SELECT id FROM dbo.temp_load",
                  "references": ["dbo.temp_load"] },
                { "kind": "table", "schema": "dbo", "name": "keep",
                  "columns": [ { "name": "id", "type": "int", "ordinal": 1 } ] }
            ] }"#,
        )
        .unwrap();
        let mut config = minimal();
        config.migration.exclude = vec!["temp_*".to_string()];
        let plan = build(&config, &catalog).unwrap();

        assert_eq!(plan.excluded.len(), 3);
        let view = plan
            .excluded
            .iter()
            .find(|e| e.name.name == "v_load")
            .unwrap();
        assert_eq!(view.reason, "depends on an excluded object");
        assert!(plan.unit("ddl:table:dbo.keep").is_some());
        assert_eq!(plan.units.len(), 2);
    }

    #[test]
    fn test_unmappable_abort() {
        let mut config = minimal();
        config.migration.unmappable_policy = UnmappablePolicy::Abort;
        let err = build(&config, &geo_catalog()).unwrap_err();
        match err {
            MigrateError::Unmappable { object, reasons } => {
                assert_eq!(object, "dbo.geo");
                assert!(reasons[0].contains("geography"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_unmappable_skip_cascades() {
        let mut config = minimal();
        config.migration.unmappable_policy = UnmappablePolicy::Skip;
        let plan = build(&config, &geo_catalog()).unwrap();

        let table = plan.unit("ddl:table:dbo.geo").unwrap();
        assert_eq!(table.status, UnitStatus::Skipped);
        assert!(table.error.as_ref().unwrap().contains("geography"));
        let view = plan.unit("ddl:view:dbo.v_geo").unwrap();
        assert_eq!(view.status, UnitStatus::Skipped);
        let index = plan.unit("ddl:index:dbo.geo.IX_geo_id").unwrap();
        assert_eq!(index.status, UnitStatus::Skipped);
        assert!(plan.unit("data:dbo.geo").is_none());
        assert_eq!(
            plan.unit("ddl:table:dbo.plain").unwrap().status,
            UnitStatus::Pending
        );
    }

    #[test]
    fn test_unmappable_skip_keeps_referencing_table() {
        let catalog = Catalog::from_json(
            r#"{ "objects": [
                { "kind": "table", "schema": "dbo", "name": "geo",
                  "columns": [ { "name": "id", "type": "int", "ordinal": 1 },
                               { "name": "shape", "type": "geography", "ordinal": 2 } ],
                  "primary_key": { "columns": ["id"] } },
                { "kind": "table", "schema": "dbo", "name": "visits",
                  "columns": [ { "name": "id", "type": "int", "ordinal": 1 },
                               { "name": "geo_id", "type": "int", "ordinal": 2 } ],
                  "constraints": [ { "type": "foreign_key", "name": "FK_visits_geo",
                                     "columns": ["geo_id"], "referenced_table": "dbo.geo",
                                     "referenced_columns": ["id"] } ] }
            ] }"#,
        )
        .unwrap();
        let mut config = minimal();
        config.migration.unmappable_policy = UnmappablePolicy::Skip;
        let plan = build(&config, &catalog).unwrap();

        assert_eq!(
            plan.unit("ddl:table:dbo.geo").unwrap().status,
            UnitStatus::Skipped
        );
        let fk = plan.unit("ddl:constraint:dbo.FK_visits_geo").unwrap();
        assert_eq!(fk.status, UnitStatus::Skipped);

        let visits = plan.unit("ddl:table:dbo.visits").unwrap();
        assert_eq!(visits.status, UnitStatus::Pending);
        assert!(visits.depends_on.is_empty());
        let data = plan.unit("data:dbo.visits").unwrap();
        assert_eq!(data.status, UnitStatus::Pending);
        assert_eq!(data.depends_on, vec![pos(&plan, "ddl:table:dbo.visits")]);
    }

    #[test]
    fn test_unmappable_manual_review_blocks_unit() {
        let plan = build(&minimal(), &geo_catalog()).unwrap();
        let table = plan.unit("ddl:table:dbo.geo").unwrap();
        assert_eq!(table.status, UnitStatus::Pending);
        assert!(table.is_blocked());
        assert!(table.statements.is_empty());
        assert!(plan
            .diagnostics
            .iter()
            .any(|d| d.object == "dbo.geo" && d.message.contains("geography")));
    }

    #[test]
    fn test_cycle_reported() {
        let catalog = Catalog::from_json(
            r#"{ "objects": [
                { "kind": "table", "schema": "dbo", "name": "a",
                  "columns": [ { "name": "id", "type": "int", "ordinal": 1 },
                               { "name": "b_id", "type": "int", "ordinal": 2 } ],
                  "constraints": [ { "type": "foreign_key", "name": "FK_a_b", "columns": ["b_id"],
                                     "referenced_table": "dbo.b", "referenced_columns": ["id"] } ] },
                { "kind": "table", "schema": "dbo", "name": "b",
                  "columns": [ { "name": "id", "type": "int", "ordinal": 1 },
                               { "name": "a_id", "type": "int", "ordinal": 2 } ],
                  "constraints": [ { "type": "foreign_key", "name": "FK_b_a", "columns": ["a_id"],
                                     "referenced_table": "dbo.a", "referenced_columns": ["id"] } ] }
            ] }"#,
        )
        .unwrap();
        let err = build(&minimal(), &catalog).unwrap_err();
        assert!(matches!(err, MigrateError::CyclicDependency { .. }));

        let mut config = minimal();
        config.migration.defer_foreign_keys = vec!["FK_a_b".to_string()];
        let plan = build(&config, &catalog).unwrap();
        let fk = plan.unit("ddl:constraint:dbo.FK_a_b").unwrap();
        assert!(fk.statements[0].ends_with("NOT VALID"));
    }

    #[test]
    fn test_ddl_script() {
        let plan = build(&minimal(), &orders_customers()).unwrap();
        let script = plan.ddl_script();
        let customers = script.find("-- ddl:table:dbo.customers").unwrap();
        let orders = script.find("-- ddl:table:dbo.orders").unwrap();
        assert!(customers < orders);
        assert!(script.contains("CREATE TABLE IF NOT EXISTS \"public\".\"orders\""));
    }
}
