//! Translation of catalog objects into PostgreSQL DDL and PL/pgSQL.
//!
//! Every object yields a [`TranslatedObject`]: either the statements that
//! create it on the target, or a manual-review status with the reasons.
//! Partial translations are never emitted.

mod ddl;
mod expr;
mod lexer;
mod plpgsql;
mod routine;

use crate::catalog::{Catalog, ObjectDefinition, ObjectKind, QualifiedName, SchemaObject};
use crate::config::Config;
use crate::error::Result;
use crate::resolver::{MappingAuditRecord, NamingPolicy, Resolver, ValueTransform};
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationStatus {
    Translated,
    RequiresManualReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticSeverity {
    Info,
    Warning,
    Unmappable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub object: String,
    pub severity: DiagnosticSeverity,
    pub message: String,
}

/// How one source column is carried into the target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnTransfer {
    pub source: String,
    /// Quoted target column name.
    pub target: String,
    pub target_type: String,
    pub transform: Option<ValueTransform>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranslatedObject {
    pub name: QualifiedName,
    pub kind: ObjectKind,
    pub status: TranslationStatus,
    /// Target statements in execution order; empty under manual review.
    pub statements: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
    pub mapping: Vec<MappingAuditRecord>,
    /// Data transfer layout (tables only).
    #[serde(skip)]
    pub columns: Vec<ColumnTransfer>,
    /// Statements to run after the table's data is loaded.
    #[serde(skip)]
    pub post_load: Vec<String>,
}

impl TranslatedObject {
    pub fn is_translated(&self) -> bool {
        self.status == TranslationStatus::Translated
    }

    /// Messages of the diagnostics that blocked translation.
    pub fn reasons(&self) -> Vec<String> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == DiagnosticSeverity::Unmappable)
            .map(|d| d.message.clone())
            .collect()
    }

    /// Statements as a SQL script.
    pub fn script(&self) -> String {
        let mut out = String::new();
        for statement in &self.statements {
            out.push_str(statement);
            out.push_str(";\n");
        }
        out
    }
}

/// Accumulates the output of one object translation.
#[derive(Debug, Default)]
pub(crate) struct Draft {
    pub statements: Vec<String>,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub notes: Vec<String>,
    pub mapping: Vec<MappingAuditRecord>,
    pub columns: Vec<ColumnTransfer>,
    pub post_load: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Translator {
    resolver: Resolver,
    naming: NamingPolicy,
    deferred_fks: HashSet<String>,
}

impl Translator {
    pub fn new(resolver: Resolver, naming: NamingPolicy) -> Self {
        Self {
            resolver,
            naming,
            deferred_fks: HashSet::new(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let resolver = Resolver::from_config(&config.type_mappings)?;
        Ok(Self::new(resolver, NamingPolicy::from_config(config))
            .with_deferred_foreign_keys(&config.migration.defer_foreign_keys))
    }

    /// Foreign keys (by constraint name) created `NOT VALID`.
    pub fn with_deferred_foreign_keys(mut self, names: &[String]) -> Self {
        self.deferred_fks = names.iter().map(|n| n.to_lowercase()).collect();
        self
    }

    pub fn naming(&self) -> &NamingPolicy {
        &self.naming
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn translate(&self, object: &SchemaObject) -> TranslatedObject {
        let mut draft = Draft::default();
        let naming = &self.naming;
        let resolver = &self.resolver;

        match &object.definition {
            ObjectDefinition::Table(table) => {
                ddl::table(&object.name, table, naming, resolver, &mut draft)
            }
            ObjectDefinition::View(view) => {
                ddl::view(&object.name, view, naming, resolver, &mut draft)
            }
            ObjectDefinition::Index(index) => ddl::index(index, naming, resolver, &mut draft),
            ObjectDefinition::Constraint(constraint) => {
                let deferred = self
                    .deferred_fks
                    .contains(&object.name.name.to_lowercase());
                ddl::constraint(&object.name, constraint, deferred, naming, resolver, &mut draft)
            }
            ObjectDefinition::Sequence(sequence) => {
                ddl::sequence(&object.name, sequence, naming, resolver, &mut draft)
            }
            ObjectDefinition::Routine(routine) => {
                let output = plpgsql::translate_routine(
                    &object.name,
                    routine,
                    naming,
                    resolver,
                    &mut draft.mapping,
                );
                draft.issues.extend(output.issues);
                draft.warnings.extend(output.warnings);
                draft.statements.extend(output.sql);
            }
        }

        let kind = object.kind();
        let owns_schema = matches!(
            kind,
            ObjectKind::Table | ObjectKind::View | ObjectKind::Routine | ObjectKind::Sequence
        );
        let schema = naming.schema(&object.name.schema);
        if owns_schema && schema != "public" && !draft.statements.is_empty() {
            draft.statements.insert(
                0,
                format!("CREATE SCHEMA IF NOT EXISTS \"{}\"", schema.replace('"', "\"\"")),
            );
        }

        let object_name = object.name.to_string();
        let diagnostic = |severity, message: String| Diagnostic {
            object: object_name.clone(),
            severity,
            message,
        };
        let mut diagnostics = Vec::new();
        diagnostics.extend(draft.notes.into_iter().map(|m| diagnostic(DiagnosticSeverity::Info, m)));
        diagnostics.extend(
            draft
                .warnings
                .into_iter()
                .map(|m| diagnostic(DiagnosticSeverity::Warning, m)),
        );
        diagnostics.extend(
            draft
                .issues
                .iter()
                .cloned()
                .map(|m| diagnostic(DiagnosticSeverity::Unmappable, m)),
        );

        let status = if draft.issues.is_empty() {
            TranslationStatus::Translated
        } else {
            debug!(
                "{} {} requires manual review: {}",
                kind,
                object.name,
                draft.issues.join("; ")
            );
            draft.statements.clear();
            draft.post_load.clear();
            TranslationStatus::RequiresManualReview
        };

        TranslatedObject {
            name: object.name.clone(),
            kind,
            status,
            statements: draft.statements,
            diagnostics,
            mapping: draft.mapping,
            columns: draft.columns,
            post_load: draft.post_load,
        }
    }

    /// Translate every object in catalog order.
    pub fn translate_all(&self, catalog: &Catalog) -> Vec<TranslatedObject> {
        catalog.objects().iter().map(|o| self.translate(o)).collect()
    }
}
