//! Catalog model: the validated, read-only set of source schema objects.
//!
//! A [`Catalog`] is built once per run from the extractor's raw descriptors
//! and is immutable afterwards, so it can be shared behind an `Arc` by every
//! worker without locking.

mod raw;
mod schema;

pub use raw::*;
pub use schema::*;

use crate::error::{MigrateError, Result};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use tracing::debug;

/// Validated collection of schema objects.
#[derive(Debug, Clone)]
pub struct Catalog {
    objects: Vec<SchemaObject>,
    index: HashMap<QualifiedName, usize>,
}

impl Catalog {
    /// Load a catalog from a JSON file of raw descriptors.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse a catalog from a JSON string of raw descriptors.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawCatalog = serde_json::from_str(json)?;
        Self::build(raw)
    }

    /// Build the catalog from raw descriptors, reporting every violation found.
    pub fn build(raw: RawCatalog) -> Result<Self> {
        let mut violations = Vec::new();
        let mut objects = Vec::new();

        for raw_object in raw.objects {
            convert_object(raw_object, &mut objects, &mut violations);
        }
        for (ordinal, object) in objects.iter_mut().enumerate() {
            object.source.ordinal = ordinal;
        }

        Self::validate_into(objects, violations)
    }

    /// Build a catalog from already-converted objects.
    pub fn from_objects(objects: Vec<SchemaObject>) -> Result<Self> {
        Self::validate_into(objects, Vec::new())
    }

    fn validate_into(objects: Vec<SchemaObject>, mut violations: Vec<String>) -> Result<Self> {
        let mut index = HashMap::with_capacity(objects.len());
        for (pos, object) in objects.iter().enumerate() {
            if index.insert(object.name.clone(), pos).is_some() {
                violations.push(format!("duplicate qualified name {}", object.name));
            }
        }

        for object in &objects {
            for reference in &object.references {
                if !index.contains_key(reference) {
                    violations.push(format!(
                        "{} {} references unknown object {}",
                        object.kind(),
                        object.name,
                        reference
                    ));
                }
            }
            validate_object(object, &objects, &index, &mut violations);
        }

        if !violations.is_empty() {
            return Err(MigrateError::CatalogIntegrity { violations });
        }

        debug!("Catalog built with {} objects", objects.len());
        Ok(Self { objects, index })
    }

    /// Look up an object by qualified name.
    pub fn get(&self, name: &QualifiedName) -> Option<&SchemaObject> {
        self.index.get(name).map(|&pos| &self.objects[pos])
    }

    /// Extraction-order position of an object.
    pub fn position(&self, name: &QualifiedName) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// All objects in extraction order.
    pub fn objects(&self) -> &[SchemaObject] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Enumerate objects of one kind.
    pub fn by_kind(&self, kind: ObjectKind) -> impl Iterator<Item = &SchemaObject> {
        self.objects.iter().filter(move |o| o.kind() == kind)
    }

    /// Enumerate tables with their definitions.
    pub fn tables(&self) -> impl Iterator<Item = (&SchemaObject, &TableDef)> {
        self.objects
            .iter()
            .filter_map(|o| o.as_table().map(|t| (o, t)))
    }

    /// Look up a table definition.
    pub fn table(&self, name: &QualifiedName) -> Option<&TableDef> {
        self.get(name).and_then(|o| o.as_table())
    }

    /// Foreign key constraints with their definitions.
    pub fn foreign_keys(&self) -> impl Iterator<Item = (&SchemaObject, &ConstraintDef)> {
        self.objects.iter().filter_map(|o| match &o.definition {
            ObjectDefinition::Constraint(c) if c.referenced_table().is_some() => Some((o, c)),
            _ => None,
        })
    }

    /// Indexes defined on a table.
    pub fn indexes_on<'a>(&'a self, table: &'a QualifiedName) -> impl Iterator<Item = &'a IndexDef> {
        self.objects.iter().filter_map(move |o| match &o.definition {
            ObjectDefinition::Index(idx) if &idx.table == table => Some(idx),
            _ => None,
        })
    }
}

fn type_from_raw(raw: &RawType) -> TypeDescriptor {
    TypeDescriptor {
        name: raw.name.trim().to_lowercase(),
        length: raw.length,
        precision: raw.precision,
        scale: raw.scale,
    }
}

fn parse_references(
    owner: &QualifiedName,
    refs: &[String],
    violations: &mut Vec<String>,
) -> BTreeSet<QualifiedName> {
    let mut out = BTreeSet::new();
    for r in refs {
        match QualifiedName::parse(r) {
            Some(name) if &name == owner => {}
            Some(name) => {
                out.insert(name);
            }
            None => violations.push(format!("{} has malformed reference '{}'", owner, r)),
        }
    }
    out
}

fn convert_object(raw: RawObject, out: &mut Vec<SchemaObject>, violations: &mut Vec<String>) {
    match raw {
        RawObject::Table(table) => convert_table(table, out, violations),
        RawObject::View(view) => {
            let name = QualifiedName::new(view.schema, view.name);
            let references = parse_references(&name, &view.references, violations);
            out.push(SchemaObject {
                name,
                references,
                source: SourceMetadata {
                    raw_definition: Some(view.definition.clone()),
                    ordinal: 0,
                },
                definition: ObjectDefinition::View(ViewDef {
                    definition: view.definition,
                }),
            });
        }
        RawObject::Routine(routine) => {
            let name = QualifiedName::new(routine.schema, routine.name);
            let references = parse_references(&name, &routine.references, violations);
            let parameters = routine
                .parameters
                .iter()
                .map(|p| Parameter {
                    name: p.name.trim_start_matches('@').to_string(),
                    source_type: type_from_raw(&p.data_type),
                    output: p.output,
                    default: p.default.clone(),
                })
                .collect();
            let routine_type = match routine.routine_type {
                RawRoutineType::Procedure => RoutineType::Procedure,
                RawRoutineType::Function => RoutineType::Function,
            };
            out.push(SchemaObject {
                name,
                references,
                source: SourceMetadata {
                    raw_definition: Some(routine.definition.clone()),
                    ordinal: 0,
                },
                definition: ObjectDefinition::Routine(RoutineDef {
                    routine_type,
                    parameters,
                    returns: routine.returns.as_ref().map(type_from_raw),
                    definition: routine.definition,
                }),
            });
        }
        RawObject::Sequence(seq) => {
            out.push(SchemaObject {
                name: QualifiedName::new(seq.schema, seq.name),
                references: BTreeSet::new(),
                source: SourceMetadata {
                    raw_definition: None,
                    ordinal: 0,
                },
                definition: ObjectDefinition::Sequence(SequenceDef {
                    data_type: TypeDescriptor::new(&seq.data_type),
                    start: seq.start,
                    increment: seq.increment,
                    min_value: seq.min_value,
                    max_value: seq.max_value,
                    cycle: seq.cycle,
                }),
            });
        }
    }
}

fn convert_table(table: RawTable, out: &mut Vec<SchemaObject>, violations: &mut Vec<String>) {
    let table_name = QualifiedName::new(table.schema.clone(), table.name.clone());

    let mut columns: Vec<Column> = table
        .columns
        .iter()
        .map(|c| Column {
            name: c.name.clone(),
            source_type: type_from_raw(&c.data_type),
            nullable: c.nullable,
            default: c.default.clone(),
            ordinal: c.ordinal,
            identity: c.identity.map(|i| Identity {
                seed: i.seed,
                increment: i.increment,
            }),
        })
        .collect();
    columns.sort_by_key(|c| c.ordinal);

    out.push(SchemaObject {
        name: table_name.clone(),
        references: BTreeSet::new(),
        source: SourceMetadata {
            raw_definition: table.definition.clone(),
            ordinal: 0,
        },
        definition: ObjectDefinition::Table(TableDef {
            columns,
            primary_key: table.primary_key.map(|pk| PrimaryKey {
                name: pk.name,
                columns: pk.columns,
                clustered: pk.clustered,
            }),
            row_count: table.row_count,
        }),
    });

    for constraint in table.constraints {
        let name = QualifiedName::new(table.schema.clone(), constraint.name().to_string());
        let mut references = BTreeSet::from([table_name.clone()]);
        let body = match constraint {
            RawConstraint::ForeignKey {
                columns,
                referenced_table,
                referenced_columns,
                on_delete,
                on_update,
                ..
            } => {
                let Some(referenced) = QualifiedName::parse(&referenced_table) else {
                    violations.push(format!(
                        "constraint {} has malformed referenced table '{}'",
                        name, referenced_table
                    ));
                    continue;
                };
                references.insert(referenced.clone());
                ConstraintBody::ForeignKey {
                    columns,
                    referenced_table: referenced,
                    referenced_columns,
                    on_delete,
                    on_update,
                }
            }
            RawConstraint::Unique { columns, .. } => ConstraintBody::Unique { columns },
            RawConstraint::Check { expression, .. } => ConstraintBody::Check { expression },
        };
        out.push(SchemaObject {
            name,
            references,
            source: SourceMetadata {
                raw_definition: None,
                ordinal: 0,
            },
            definition: ObjectDefinition::Constraint(ConstraintDef {
                table: table_name.clone(),
                body,
            }),
        });
    }

    for index in table.indexes {
        let columns = index
            .columns
            .into_iter()
            .map(|c| match c {
                RawIndexColumn::Name(name) => IndexColumn {
                    name,
                    descending: false,
                },
                RawIndexColumn::Detailed { name, descending } => IndexColumn { name, descending },
            })
            .collect();
        out.push(SchemaObject {
            // Index names are only unique per table on the source.
            name: QualifiedName::new(
                table.schema.clone(),
                format!("{}.{}", table.name, index.name),
            ),
            references: BTreeSet::from([table_name.clone()]),
            source: SourceMetadata {
                raw_definition: None,
                ordinal: 0,
            },
            definition: ObjectDefinition::Index(IndexDef {
                index_name: index.name,
                table: table_name.clone(),
                columns,
                include: index.include,
                unique: index.unique,
                clustered: index.clustered,
                filter: index.filter,
            }),
        });
    }
}

fn validate_object(
    object: &SchemaObject,
    objects: &[SchemaObject],
    index: &HashMap<QualifiedName, usize>,
    violations: &mut Vec<String>,
) {
    let table_of = |name: &QualifiedName| index.get(name).and_then(|&p| objects[p].as_table());

    let check_columns =
        |table: &QualifiedName, cols: &[String], what: &str, violations: &mut Vec<String>| {
            if let Some(def) = table_of(table) {
                for col in cols {
                    if def.column(col).is_none() {
                        violations.push(format!(
                            "{} {} names unknown column {}.{}",
                            what, object.name, table, col
                        ));
                    }
                }
            }
        };

    match &object.definition {
        ObjectDefinition::Table(table) => {
            if table.columns.is_empty() {
                violations.push(format!("table {} has no columns", object.name));
            }
            let mut seen = HashSet::new();
            for (expected, column) in (1u32..).zip(&table.columns) {
                if column.ordinal != expected {
                    violations.push(format!(
                        "table {} column {} has ordinal {} (expected {})",
                        object.name, column.name, column.ordinal, expected
                    ));
                }
                if !seen.insert(column.name.to_lowercase()) {
                    violations.push(format!(
                        "table {} has duplicate column {}",
                        object.name, column.name
                    ));
                }
                if column.source_type.name.is_empty() {
                    violations.push(format!(
                        "table {} column {} has no type",
                        object.name, column.name
                    ));
                }
            }
            if let Some(pk) = &table.primary_key {
                for col in &pk.columns {
                    if table.column(col).is_none() {
                        violations.push(format!(
                            "primary key of {} names unknown column {}",
                            object.name, col
                        ));
                    }
                }
            }
        }
        ObjectDefinition::Index(idx) => {
            let cols: Vec<String> = idx
                .columns
                .iter()
                .map(|c| c.name.clone())
                .chain(idx.include.iter().cloned())
                .collect();
            check_columns(&idx.table, &cols, "index", violations);
        }
        ObjectDefinition::Constraint(constraint) => match &constraint.body {
            ConstraintBody::ForeignKey {
                columns,
                referenced_table,
                referenced_columns,
                ..
            } => {
                check_columns(&constraint.table, columns, "constraint", violations);
                check_columns(referenced_table, referenced_columns, "constraint", violations);
                if columns.len() != referenced_columns.len() || columns.is_empty() {
                    violations.push(format!(
                        "foreign key {} maps {} column(s) to {}",
                        object.name,
                        columns.len(),
                        referenced_columns.len()
                    ));
                }
                if index.contains_key(referenced_table) && table_of(referenced_table).is_none() {
                    violations.push(format!(
                        "foreign key {} references {} which is not a table",
                        object.name, referenced_table
                    ));
                }
            }
            ConstraintBody::Unique { columns } => {
                check_columns(&constraint.table, columns, "constraint", violations);
            }
            ConstraintBody::Check { .. } => {}
        },
        ObjectDefinition::View(_)
        | ObjectDefinition::Routine(_)
        | ObjectDefinition::Sequence(_) => {}
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two-table catalog: `orders.customer_id -> customers.id`.
    pub(crate) fn orders_customers_json() -> &'static str {
        r#"{
          "objects": [
            { "kind": "table", "schema": "dbo", "name": "orders", "row_count": 12,
              "columns": [
                { "name": "id", "type": "int", "nullable": false, "ordinal": 1,
                  "identity": { "seed": 1, "increment": 1 } },
                { "name": "customer_id", "type": "int", "nullable": false, "ordinal": 2 },
                { "name": "note", "type": "nvarchar", "length": 50, "ordinal": 3 }
              ],
              "primary_key": { "name": "PK_orders", "columns": ["id"] },
              "constraints": [
                { "type": "foreign_key", "name": "FK_orders_customers", "columns": ["customer_id"],
                  "referenced_table": "dbo.customers", "referenced_columns": ["id"] }
              ],
              "indexes": [
                { "name": "IX_orders_customer", "columns": ["customer_id"] }
              ]
            },
            { "kind": "table", "schema": "dbo", "name": "customers", "row_count": 5,
              "columns": [
                { "name": "id", "type": "int", "nullable": false, "ordinal": 1 },
                { "name": "name", "type": "nvarchar", "length": 100, "nullable": false, "ordinal": 2 }
              ],
              "primary_key": { "columns": ["id"] }
            }
          ]
        }"#
    }

    pub(crate) fn orders_customers() -> Catalog {
        Catalog::from_json(orders_customers_json()).unwrap()
    }

    #[test]
    fn test_build_expands_nested_objects() {
        let catalog = orders_customers();
        assert_eq!(catalog.len(), 4);
        assert_eq!(catalog.by_kind(ObjectKind::Table).count(), 2);
        assert_eq!(catalog.by_kind(ObjectKind::Constraint).count(), 1);

        let idx = catalog
            .get(&QualifiedName::new("dbo", "orders.IX_orders_customer"))
            .unwrap();
        assert_eq!(idx.kind(), ObjectKind::Index);
        assert!(idx.references.contains(&QualifiedName::new("dbo", "orders")));

        let fk = catalog
            .get(&QualifiedName::new("dbo", "FK_orders_customers"))
            .unwrap();
        assert!(fk.references.contains(&QualifiedName::new("dbo", "customers")));
    }

    #[test]
    fn test_lookup_and_columns_in_ordinal_order() {
        let catalog = orders_customers();
        let orders = catalog.table(&QualifiedName::new("dbo", "orders")).unwrap();
        let names: Vec<_> = orders.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "customer_id", "note"]);
        assert_eq!(orders.pk_columns(), &["id".to_string()]);
        assert_eq!(orders.columns[2].source_type.to_string(), "nvarchar(50)");
    }

    #[test]
    fn test_reports_all_violations() {
        let json = r#"{
          "objects": [
            { "kind": "table", "schema": "dbo", "name": "a",
              "columns": [
                { "name": "id", "type": "int", "ordinal": 1 },
                { "name": "x", "type": "int", "ordinal": 3 }
              ] },
            { "kind": "table", "schema": "dbo", "name": "a",
              "columns": [ { "name": "id", "type": "int", "ordinal": 1 } ] },
            { "kind": "view", "schema": "dbo", "name": "v",
              "definition": "SELECT 1", "references": ["dbo.missing"] }
          ]
        }"#;
        let err = Catalog::from_json(json).unwrap_err();
        match err {
            MigrateError::CatalogIntegrity { violations } => {
                assert_eq!(violations.len(), 3, "{:?}", violations);
                assert!(violations.iter().any(|v| v.contains("duplicate qualified name dbo.a")));
                assert!(violations.iter().any(|v| v.contains("ordinal 3")));
                assert!(violations.iter().any(|v| v.contains("dbo.missing")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_fk_column_is_violation() {
        let json = orders_customers_json().replace(r#""referenced_columns": ["id"]"#, r#""referenced_columns": ["nope"]"#);
        let err = Catalog::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("dbo.customers.nope"));
    }

    #[test]
    fn test_parse_qualified_name() {
        assert_eq!(
            QualifiedName::parse("[sales].[Orders]"),
            Some(QualifiedName::new("sales", "Orders"))
        );
        assert_eq!(
            QualifiedName::parse("orders"),
            Some(QualifiedName::new("dbo", "orders"))
        );
        assert_eq!(QualifiedName::parse(" "), None);
        assert_eq!(QualifiedName::parse("dbo."), None);
    }

    #[test]
    fn test_kind_priority_order() {
        assert!(ObjectKind::Sequence < ObjectKind::Table);
        assert!(ObjectKind::Table < ObjectKind::Constraint);
        assert!(ObjectKind::Constraint < ObjectKind::Index);
        assert!(ObjectKind::Index < ObjectKind::View);
        assert!(ObjectKind::View < ObjectKind::Routine);
    }
}
