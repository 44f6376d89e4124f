//! Source constructs that need attention on PostgreSQL.

use super::{Category, Finding, Severity};
use crate::catalog::{Catalog, ObjectDefinition};
use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;

/// Procedural features with no direct equivalent, and what to use instead.
const FEATURES: &[(&str, &str, &str)] = &[
    ("CURSOR", r"\bCURSOR\b", "cursor loops become FOR loops or set-based statements"),
    ("MERGE", r"\bMERGE\b", "use INSERT ... ON CONFLICT or separate statements"),
    ("PIVOT", r"\bPIVOT\b", "use crosstab() or conditional aggregation"),
    ("UNPIVOT", r"\bUNPIVOT\b", "use a LATERAL VALUES join"),
    ("TRY...CATCH", r"\bBEGIN\s+TRY\b", "use a BEGIN ... EXCEPTION block"),
    ("IDENTITY", r"\bIDENTITY\b", "use GENERATED ... AS IDENTITY columns and RETURNING"),
    ("ROWVERSION", r"\bROWVERSION\b", "no direct equivalent; use a timestamp or xmin"),
];

/// Functions in view bodies that are rewritten on the way.
const FUNCTIONS: &[(&str, &str)] = &[
    ("ISNULL", "COALESCE"),
    ("LEN", "LENGTH"),
    ("DATEPART", "EXTRACT / date_part"),
    ("DATEDIFF", "date arithmetic or age()"),
];

fn compiled(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| RegexBuilder::new(p).case_insensitive(true).build().ok())
        .collect()
}

fn feature_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| compiled(&FEATURES.iter().map(|(_, p, _)| *p).collect::<Vec<_>>()))
}

fn function_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let patterns: Vec<String> = FUNCTIONS
            .iter()
            .map(|(name, _)| format!(r"\b{}\s*\(", name))
            .collect();
        compiled(&patterns.iter().map(String::as_str).collect::<Vec<_>>())
    })
}

pub fn analyze(catalog: &Catalog) -> Vec<Finding> {
    let mut findings = Vec::new();

    for object in catalog.objects() {
        let name = object.name.to_string();
        match &object.definition {
            ObjectDefinition::Table(table) => {
                for column in &table.columns {
                    if let Some(finding) = column_type_finding(&name, &column.name, &column.source_type.name) {
                        findings.push(finding);
                    }
                    if column.identity.is_some() {
                        findings.push(
                            Finding::new(
                                Severity::Info,
                                Category::IncompatibleFeature,
                                Some(name.clone()),
                                format!("identity column {}", column.name),
                            )
                            .recommend("created as GENERATED BY DEFAULT AS IDENTITY; sequence reset after load"),
                        );
                    }
                }
            }
            ObjectDefinition::Routine(routine) => {
                scan_features(&name, &routine.definition, Severity::High, &mut findings);
            }
            ObjectDefinition::View(view) => {
                scan_features(&name, &view.definition, Severity::Medium, &mut findings);
                scan_view_syntax(&name, &view.definition, &mut findings);
            }
            _ => {}
        }
    }

    findings
}

fn column_type_finding(table: &str, column: &str, type_name: &str) -> Option<Finding> {
    let finding = match type_name {
        "uniqueidentifier" => Finding::new(
            Severity::Medium,
            Category::DataTypeConversion,
            Some(table.to_string()),
            format!("column {}: UNIQUEIDENTIFIER will be converted to uuid", column),
        )
        .recommend("gen_random_uuid() defaults need PostgreSQL 13+ or pgcrypto"),
        "text" | "ntext" | "image" => Finding::new(
            Severity::Low,
            Category::DeprecatedType,
            Some(table.to_string()),
            format!("column {}: {} is deprecated", column, type_name.to_uppercase()),
        )
        .recommend(if type_name == "image" {
            "converted to bytea"
        } else {
            "converted to text"
        }),
        "rowversion" | "timestamp" => Finding::new(
            Severity::Medium,
            Category::IncompatibleFeature,
            Some(table.to_string()),
            format!("column {}: ROWVERSION has no PostgreSQL equivalent", column),
        )
        .recommend("use a timestamp column maintained by a trigger, or xmin"),
        _ => return None,
    };
    Some(finding)
}

fn scan_features(object: &str, body: &str, severity: Severity, findings: &mut Vec<Finding>) {
    for ((feature, _, solution), pattern) in FEATURES.iter().zip(feature_patterns()) {
        if pattern.is_match(body) {
            findings.push(
                Finding::new(
                    severity,
                    Category::IncompatibleFeature,
                    Some(object.to_string()),
                    format!("uses {}", feature),
                )
                .recommend(*solution),
            );
        }
    }
}

fn scan_view_syntax(object: &str, body: &str, findings: &mut Vec<Finding>) {
    if body.contains('[') && body.contains(']') {
        findings.push(
            Finding::new(
                Severity::Low,
                Category::SyntaxDifference,
                Some(object.to_string()),
                "uses bracket identifiers",
            )
            .recommend("converted to double-quoted identifiers"),
        );
    }
    for ((function, replacement), pattern) in FUNCTIONS.iter().zip(function_patterns()) {
        if pattern.is_match(body) {
            findings.push(
                Finding::new(
                    Severity::Medium,
                    Category::FunctionConversion,
                    Some(object.to_string()),
                    format!("uses SQL Server function {}", function),
                )
                .recommend(format!("rewritten as {}", replacement)),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        Catalog::from_json(
            r#"{ "objects": [
                { "kind": "table", "schema": "dbo", "name": "docs",
                  "columns": [ { "name": "id", "type": "uniqueidentifier", "ordinal": 1 },
                               { "name": "body", "type": "ntext", "ordinal": 2 },
                               { "name": "ver", "type": "rowversion", "ordinal": 3 } ],
                  "primary_key": { "columns": ["id"] } },
                { "kind": "view", "schema": "dbo", "name": "v_docs",
                  "definition": "CREATE VIEW dbo.v_docs AS SELECT [id], ISNULL(LEN(body), 0) AS n FROM dbo.docs",
                  "references": ["dbo.docs"] },
                { "kind": "routine", "schema": "dbo", "name": "sync_docs", "routine_type": "procedure",
                  "definition": "CREATE PROCEDURE dbo.sync_docs AS BEGIN BEGIN TRY MERGE dbo.docs AS t USING dbo.docs AS s ON 1=0 WHEN NOT MATCHED THEN INSERT (id) VALUES (s.id); END TRY BEGIN CATCH THROW; END CATCH END",
                  "references": ["dbo.docs"] }
            ] }"#,
        )
        .unwrap()
    }

    fn messages(findings: &[Finding], object: &str) -> Vec<String> {
        findings
            .iter()
            .filter(|f| f.object.as_deref() == Some(object))
            .map(|f| f.message.clone())
            .collect()
    }

    #[test]
    fn test_column_types() {
        let findings = analyze(&catalog());
        let docs = messages(&findings, "dbo.docs");
        assert!(docs.iter().any(|m| m.contains("UNIQUEIDENTIFIER")));
        assert!(docs.iter().any(|m| m.contains("NTEXT is deprecated")));
        assert!(docs.iter().any(|m| m.contains("ROWVERSION")));
    }

    #[test]
    fn test_view_syntax_and_functions() {
        let findings = analyze(&catalog());
        let view = messages(&findings, "dbo.v_docs");
        assert!(view.contains(&"uses bracket identifiers".to_string()));
        assert!(view.contains(&"uses SQL Server function ISNULL".to_string()));
        assert!(view.contains(&"uses SQL Server function LEN".to_string()));
        assert!(!view.iter().any(|m| m.contains("DATEDIFF")));
    }

    #[test]
    fn test_routine_features_are_high() {
        let findings = analyze(&catalog());
        let routine: Vec<&Finding> = findings
            .iter()
            .filter(|f| f.object.as_deref() == Some("dbo.sync_docs"))
            .collect();
        let features: Vec<&str> = routine.iter().map(|f| f.message.as_str()).collect();
        assert!(features.contains(&"uses MERGE"));
        assert!(features.contains(&"uses TRY...CATCH"));
        assert!(!features.contains(&"uses CURSOR"));
        assert!(routine.iter().all(|f| f.severity == Severity::High));
    }
}
