//! Raw object descriptors as produced by the catalog extraction step.
//!
//! The extractor emits a JSON document shaped like:
//!
//! ```json
//! {
//!   "objects": [
//!     { "kind": "table", "schema": "dbo", "name": "customers",
//!       "columns": [ { "name": "id", "type": "int", "nullable": false, "ordinal": 1 } ],
//!       "primary_key": { "columns": ["id"] } },
//!     { "kind": "view", "schema": "dbo", "name": "v_customers",
//!       "definition": "CREATE VIEW dbo.v_customers AS SELECT id FROM dbo.customers",
//!       "references": ["dbo.customers"] }
//!   ]
//! }
//! ```
//!
//! Indexes and table constraints are nested under their owning table.

use serde::{Deserialize, Serialize};

/// The full extraction output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCatalog {
    /// Name of the source database, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_database: Option<String>,

    #[serde(default)]
    pub objects: Vec<RawObject>,
}

/// One top-level object descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawObject {
    Table(RawTable),
    View(RawView),
    Routine(RawRoutine),
    Sequence(RawSequence),
}

/// A source type name with its parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawType {
    #[serde(rename = "type")]
    pub name: String,

    /// Character or byte length; `-1` means `max`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTable {
    pub schema: String,
    pub name: String,

    /// Row count estimate from the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<i64>,

    pub columns: Vec<RawColumn>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<RawPrimaryKey>,

    #[serde(default)]
    pub constraints: Vec<RawConstraint>,

    #[serde(default)]
    pub indexes: Vec<RawIndex>,

    /// Original CREATE TABLE text, if the extractor captured it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawColumn {
    pub name: String,

    #[serde(flatten)]
    pub data_type: RawType,

    #[serde(default = "default_true")]
    pub nullable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    pub ordinal: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<RawIdentity>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RawIdentity {
    #[serde(default = "default_one")]
    pub seed: i64,
    #[serde(default = "default_one")]
    pub increment: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPrimaryKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub columns: Vec<String>,

    #[serde(default = "default_true")]
    pub clustered: bool,
}

/// Table-level constraint descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawConstraint {
    ForeignKey {
        name: String,
        columns: Vec<String>,
        /// Qualified name of the referenced table, e.g. `dbo.customers`.
        referenced_table: String,
        referenced_columns: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        on_delete: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        on_update: Option<String>,
    },
    Unique {
        name: String,
        columns: Vec<String>,
    },
    Check {
        name: String,
        expression: String,
    },
}

impl RawConstraint {
    pub fn name(&self) -> &str {
        match self {
            RawConstraint::ForeignKey { name, .. }
            | RawConstraint::Unique { name, .. }
            | RawConstraint::Check { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawIndex {
    pub name: String,

    pub columns: Vec<RawIndexColumn>,

    #[serde(default)]
    pub include: Vec<String>,

    #[serde(default)]
    pub unique: bool,

    #[serde(default)]
    pub clustered: bool,

    /// Filter predicate for filtered indexes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// An index key column, either a bare name or a name with direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawIndexColumn {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        descending: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawView {
    pub schema: String,
    pub name: String,
    pub definition: String,
    #[serde(default)]
    pub references: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRoutine {
    pub schema: String,
    pub name: String,
    pub routine_type: RawRoutineType,
    pub definition: String,
    #[serde(default)]
    pub parameters: Vec<RawParameter>,
    /// Return type for scalar functions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<RawType>,
    #[serde(default)]
    pub references: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawRoutineType {
    Procedure,
    Function,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawParameter {
    /// Parameter name including the leading `@`.
    pub name: String,

    #[serde(flatten)]
    pub data_type: RawType,

    #[serde(default)]
    pub output: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSequence {
    pub schema: String,
    pub name: String,
    #[serde(default = "default_bigint", rename = "type")]
    pub data_type: String,
    #[serde(default = "default_one")]
    pub start: i64,
    #[serde(default = "default_one")]
    pub increment: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<i64>,
    #[serde(default)]
    pub cycle: bool,
}

fn default_true() -> bool {
    true
}

fn default_one() -> i64 {
    1
}

fn default_bigint() -> String {
    "bigint".to_string()
}
