//! Dialect-neutral schema object model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Schema-qualified object name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    pub schema: String,
    pub name: String,
}

impl QualifiedName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parse `schema.name`, accepting bracketed parts. A bare name lands in `dbo`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let strip = |s: &str| {
            s.trim()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_string()
        };
        let (schema, name) = match text.split_once('.') {
            Some((schema, name)) => (strip(schema), strip(name)),
            None => ("dbo".to_string(), strip(text)),
        };
        if schema.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self { schema, name })
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Kind of schema object.
///
/// Variant order is the plan tie-break priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Sequence,
    Table,
    Constraint,
    Index,
    View,
    Routine,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Sequence => "sequence",
            ObjectKind::Table => "table",
            ObjectKind::Constraint => "constraint",
            ObjectKind::Index => "index",
            ObjectKind::View => "view",
            ObjectKind::Routine => "routine",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source type name plus parameters. Length `-1` means `max`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,
    pub length: Option<i32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
}

impl TypeDescriptor {
    /// Build a descriptor, lowercasing the type name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.trim().to_lowercase(),
            length: None,
            precision: None,
            scale: None,
        }
    }

    pub fn with_length(mut self, length: i32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    pub fn is_max(&self) -> bool {
        self.length == Some(-1)
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        match (self.length, self.precision, self.scale) {
            (Some(-1), _, _) => write!(f, "(max)"),
            (Some(len), _, _) => write!(f, "({})", len),
            (None, Some(p), Some(s)) => write!(f, "({},{})", p, s),
            (None, Some(p), None) => write!(f, "({})", p),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub seed: i64,
    pub increment: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub source_type: TypeDescriptor,
    pub nullable: bool,
    pub default: Option<String>,
    pub ordinal: u32,
    pub identity: Option<Identity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub clustered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    /// Columns ordered by ordinal position.
    pub columns: Vec<Column>,
    pub primary_key: Option<PrimaryKey>,
    pub row_count: Option<i64>,
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn pk_columns(&self) -> &[String] {
        self.primary_key
            .as_ref()
            .map(|pk| pk.columns.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDef {
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexColumn {
    pub name: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index name as declared on the source.
    pub index_name: String,
    pub table: QualifiedName,
    pub columns: Vec<IndexColumn>,
    pub include: Vec<String>,
    pub unique: bool,
    pub clustered: bool,
    pub filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintBody {
    ForeignKey {
        columns: Vec<String>,
        referenced_table: QualifiedName,
        referenced_columns: Vec<String>,
        on_delete: Option<String>,
        on_update: Option<String>,
    },
    Unique {
        columns: Vec<String>,
    },
    Check {
        expression: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintDef {
    pub table: QualifiedName,
    pub body: ConstraintBody,
}

impl ConstraintDef {
    /// The referenced table when this is a foreign key.
    pub fn referenced_table(&self) -> Option<&QualifiedName> {
        match &self.body {
            ConstraintBody::ForeignKey {
                referenced_table, ..
            } => Some(referenced_table),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutineType {
    Procedure,
    Function,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Name without the leading `@`.
    pub name: String,
    pub source_type: TypeDescriptor,
    pub output: bool,
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineDef {
    pub routine_type: RoutineType,
    pub parameters: Vec<Parameter>,
    pub returns: Option<TypeDescriptor>,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceDef {
    pub data_type: TypeDescriptor,
    pub start: i64,
    pub increment: i64,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub cycle: bool,
}

/// Kind-specific definition payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectDefinition {
    Table(TableDef),
    View(ViewDef),
    Index(IndexDef),
    Constraint(ConstraintDef),
    Routine(RoutineDef),
    Sequence(SequenceDef),
}

/// Where the object came from on the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub raw_definition: Option<String>,
    /// Position in the extraction output.
    pub ordinal: usize,
}

/// A schema object in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaObject {
    pub name: QualifiedName,
    pub definition: ObjectDefinition,
    /// Objects that must exist before this one can be created.
    pub references: BTreeSet<QualifiedName>,
    pub source: SourceMetadata,
}

impl SchemaObject {
    pub fn kind(&self) -> ObjectKind {
        match &self.definition {
            ObjectDefinition::Table(_) => ObjectKind::Table,
            ObjectDefinition::View(_) => ObjectKind::View,
            ObjectDefinition::Index(_) => ObjectKind::Index,
            ObjectDefinition::Constraint(_) => ObjectKind::Constraint,
            ObjectDefinition::Routine(_) => ObjectKind::Routine,
            ObjectDefinition::Sequence(_) => ObjectKind::Sequence,
        }
    }

    pub fn as_table(&self) -> Option<&TableDef> {
        match &self.definition {
            ObjectDefinition::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Table that owns this index or constraint.
    pub fn owner_table(&self) -> Option<&QualifiedName> {
        match &self.definition {
            ObjectDefinition::Index(idx) => Some(&idx.table),
            ObjectDefinition::Constraint(c) => Some(&c.table),
            _ => None,
        }
    }
}
