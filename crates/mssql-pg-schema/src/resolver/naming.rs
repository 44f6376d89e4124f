//! Target identifier naming.

use crate::catalog::QualifiedName;
use crate::config::{Config, IdentifierCase};

/// PostgreSQL truncates identifiers longer than this many bytes.
const PG_MAX_IDENTIFIER_LEN: usize = 63;

/// Maps source names to quoted target identifiers.
#[derive(Debug, Clone)]
pub struct NamingPolicy {
    case: IdentifierCase,
    source_default_schema: String,
    target_default_schema: String,
}

impl NamingPolicy {
    pub fn new(
        case: IdentifierCase,
        source_default_schema: impl Into<String>,
        target_default_schema: impl Into<String>,
    ) -> Self {
        Self {
            case,
            source_default_schema: source_default_schema.into(),
            target_default_schema: target_default_schema.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.migration.identifier_case,
            config.source.schema.clone(),
            config.target.schema.clone(),
        )
    }

    /// Apply the case policy and the length limit.
    pub fn ident(&self, name: &str) -> String {
        let mut out = match self.case {
            IdentifierCase::Lower => name.to_lowercase(),
            IdentifierCase::Preserve => name.to_string(),
        };
        if out.len() > PG_MAX_IDENTIFIER_LEN {
            let mut cut = PG_MAX_IDENTIFIER_LEN;
            while !out.is_char_boundary(cut) {
                cut -= 1;
            }
            out.truncate(cut);
        }
        out
    }

    /// Quoted target identifier.
    pub fn quote(&self, name: &str) -> String {
        format!("\"{}\"", self.ident(name).replace('"', "\"\""))
    }

    /// Target schema for a source schema; the source default schema maps to
    /// the target default schema.
    pub fn schema(&self, source_schema: &str) -> String {
        if source_schema.eq_ignore_ascii_case(&self.source_default_schema) {
            self.ident(&self.target_default_schema)
        } else {
            self.ident(source_schema)
        }
    }

    /// Quoted `"schema"."name"`.
    pub fn qualified(&self, name: &QualifiedName) -> String {
        format!(
            "\"{}\".{}",
            self.schema(&name.schema).replace('"', "\"\""),
            self.quote(&name.name)
        )
    }

    /// Target name for an index; index names are per schema on the target.
    pub fn index_name(&self, table: &str, index: &str) -> String {
        self.quote(&format!("idx_{}_{}", table, index))
    }

    /// PL/pgSQL name for a routine parameter (`@CustomerId` -> `p_customerid`).
    pub fn parameter(&self, name: &str) -> String {
        self.ident(&format!("p_{}", name.trim_start_matches('@')))
    }

    /// PL/pgSQL name for a local variable (`@Total` -> `v_total`).
    pub fn variable(&self, name: &str) -> String {
        self.ident(&format!("v_{}", name.trim_start_matches('@')))
    }
}

impl Default for NamingPolicy {
    fn default() -> Self {
        Self::new(IdentifierCase::Lower, "dbo", "public")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schema_mapping() {
        let naming = NamingPolicy::default();
        assert_eq!(
            naming.qualified(&QualifiedName::new("dbo", "Orders")),
            "\"public\".\"orders\""
        );
        assert_eq!(
            naming.qualified(&QualifiedName::new("Sales", "Orders")),
            "\"sales\".\"orders\""
        );
    }

    #[test]
    fn test_preserve_case() {
        let naming = NamingPolicy::new(IdentifierCase::Preserve, "dbo", "public");
        assert_eq!(naming.quote("OrderDate"), "\"OrderDate\"");
        assert_eq!(naming.quote("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_truncates_long_identifiers() {
        let naming = NamingPolicy::default();
        let long = "x".repeat(80);
        assert_eq!(naming.ident(&long).len(), 63);
        let index = naming.index_name(&"t".repeat(40), &"i".repeat(40));
        assert_eq!(index.len(), 63 + 2);
    }

    #[test]
    fn test_variable_names() {
        let naming = NamingPolicy::default();
        assert_eq!(naming.parameter("@CustomerId"), "p_customerid");
        assert_eq!(naming.variable("@Total"), "v_total");
    }
}
