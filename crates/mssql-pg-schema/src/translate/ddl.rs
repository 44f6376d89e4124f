//! DDL generation for tables, indexes, constraints, sequences and views.

use super::expr::{top_level, ExprRewriter};
use super::lexer::{render, tokenize, Token, TokenKind};
use super::{ColumnTransfer, Draft};
use crate::catalog::{
    ConstraintBody, ConstraintDef, IndexDef, QualifiedName, SequenceDef, TableDef, ViewDef,
};
use crate::resolver::{translate_default, NamingPolicy, Resolution, Resolver};
use std::fmt::Write as _;

const INTEGER_TYPES: [&str; 3] = ["smallint", "integer", "bigint"];

fn quote_list<'a>(naming: &NamingPolicy, names: impl IntoIterator<Item = &'a String>) -> String {
    names
        .into_iter()
        .map(|n| naming.quote(n))
        .collect::<Vec<_>>()
        .join(", ")
}

fn sql_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Rewrite a source expression, moving its findings into the draft.
fn rewrite_expression(
    naming: &NamingPolicy,
    resolver: &Resolver,
    context: &str,
    sql: &str,
    draft: &mut Draft,
) -> String {
    let mut rw = ExprRewriter::new(naming, resolver);
    let out = rw.rewrite_sql(sql.trim());
    draft
        .issues
        .extend(rw.issues.into_iter().map(|i| format!("{}: {}", context, i)));
    draft
        .warnings
        .extend(rw.warnings.into_iter().map(|w| format!("{}: {}", context, w)));
    out
}

pub(crate) fn table(
    name: &QualifiedName,
    table: &TableDef,
    naming: &NamingPolicy,
    resolver: &Resolver,
    draft: &mut Draft,
) {
    let qualified = naming.qualified(name);
    let mut lines = Vec::with_capacity(table.columns.len() + 1);

    for column in &table.columns {
        let resolved =
            match resolver.resolve_recorded(name, &column.name, &column.source_type, &mut draft.mapping) {
                Resolution::Resolved(r) => r,
                Resolution::Unmappable { reason } => {
                    draft.issues.push(format!("column {}: {}", column.name, reason));
                    continue;
                }
            };
        let mut line = format!("{} {}", naming.quote(&column.name), resolved.target);

        if let Some(identity) = &column.identity {
            if INTEGER_TYPES.contains(&resolved.target.as_str()) {
                let _ = write!(
                    line,
                    " GENERATED BY DEFAULT AS IDENTITY (START WITH {} INCREMENT BY {})",
                    identity.seed, identity.increment
                );
                let bound = if identity.increment < 0 { "MIN" } else { "MAX" };
                draft.post_load.push(format!(
                    "SELECT setval(pg_get_serial_sequence({}, {}), COALESCE({}({}) + {}, {}), false) FROM {}",
                    sql_literal(&qualified),
                    sql_literal(&naming.ident(&column.name)),
                    bound,
                    naming.quote(&column.name),
                    identity.increment,
                    identity.seed,
                    qualified
                ));
            } else {
                draft.issues.push(format!(
                    "identity column {} has non-integer target type {}",
                    column.name, resolved.target
                ));
            }
        } else if let Some(default) = &column.default {
            let value = match translate_default(default, &resolved.target) {
                Some(value) => value,
                None => rewrite_expression(
                    naming,
                    resolver,
                    &format!("default of {}", column.name),
                    default,
                    draft,
                ),
            };
            let _ = write!(line, " DEFAULT {}", value);
        }

        if !column.nullable {
            line.push_str(" NOT NULL");
        }
        lines.push(line);
        draft.columns.push(ColumnTransfer {
            source: column.name.clone(),
            target: naming.quote(&column.name),
            target_type: resolved.target,
            transform: resolved.transform,
        });
    }

    if let Some(pk) = &table.primary_key {
        let mut line = String::new();
        if let Some(pk_name) = &pk.name {
            let _ = write!(line, "CONSTRAINT {} ", naming.quote(pk_name));
        }
        let _ = write!(line, "PRIMARY KEY ({})", quote_list(naming, &pk.columns));
        lines.push(line);
    }

    draft.statements.push(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        qualified,
        lines.join(",\n    ")
    ));
}

pub(crate) fn index(index: &IndexDef, naming: &NamingPolicy, resolver: &Resolver, draft: &mut Draft) {
    let index_name = naming.index_name(&index.table.name, &index.index_name);
    let table = naming.qualified(&index.table);
    let columns = index
        .columns
        .iter()
        .map(|c| {
            if c.descending {
                format!("{} DESC", naming.quote(&c.name))
            } else {
                naming.quote(&c.name)
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        index_name,
        table,
        columns
    );
    if !index.include.is_empty() {
        let _ = write!(sql, " INCLUDE ({})", quote_list(naming, &index.include));
    }
    if let Some(filter) = &index.filter {
        let filter = rewrite_expression(naming, resolver, "index filter", filter, draft);
        let _ = write!(sql, " WHERE {}", filter);
    }
    if index.clustered {
        draft.notes.push(format!(
            "clustered index: PostgreSQL does not maintain physical order; run CLUSTER {} USING {} after loading if the order matters",
            table, index_name
        ));
    }
    draft.statements.push(sql);
}

fn referential_action(action: &str) -> Option<&'static str> {
    match action.trim().replace('_', " ").to_uppercase().as_str() {
        "NO ACTION" => Some("NO ACTION"),
        "CASCADE" => Some("CASCADE"),
        "SET NULL" => Some("SET NULL"),
        "SET DEFAULT" => Some("SET DEFAULT"),
        "RESTRICT" => Some("RESTRICT"),
        _ => None,
    }
}

pub(crate) fn constraint(
    name: &QualifiedName,
    constraint: &ConstraintDef,
    deferred: bool,
    naming: &NamingPolicy,
    resolver: &Resolver,
    draft: &mut Draft,
) {
    let table = naming.qualified(&constraint.table);
    let constraint_name = naming.quote(&name.name);
    let body = match &constraint.body {
        ConstraintBody::ForeignKey {
            columns,
            referenced_table,
            referenced_columns,
            on_delete,
            on_update,
        } => {
            let mut body = format!(
                "FOREIGN KEY ({}) REFERENCES {} ({})",
                quote_list(naming, columns),
                naming.qualified(referenced_table),
                quote_list(naming, referenced_columns)
            );
            for (clause, action) in [("ON DELETE", on_delete), ("ON UPDATE", on_update)] {
                let Some(action) = action else { continue };
                match referential_action(action) {
                    Some("NO ACTION") => {}
                    Some(action) => {
                        let _ = write!(body, " {} {}", clause, action);
                    }
                    None => draft
                        .issues
                        .push(format!("unknown referential action '{}'", action)),
                }
            }
            if deferred {
                body.push_str(" NOT VALID");
                draft.notes.push(format!(
                    "created NOT VALID to break a dependency cycle; run ALTER TABLE {} VALIDATE CONSTRAINT {} once the data is loaded",
                    table, constraint_name
                ));
            }
            body
        }
        ConstraintBody::Unique { columns } => format!("UNIQUE ({})", quote_list(naming, columns)),
        ConstraintBody::Check { expression } => {
            let expression = rewrite_expression(naming, resolver, "check", expression, draft);
            format!("CHECK ({})", expression)
        }
    };
    draft.statements.push(format!(
        "ALTER TABLE {} ADD CONSTRAINT {} {}",
        table, constraint_name, body
    ));
}

pub(crate) fn sequence(
    name: &QualifiedName,
    sequence: &SequenceDef,
    naming: &NamingPolicy,
    resolver: &Resolver,
    draft: &mut Draft,
) {
    let mut sql = format!("CREATE SEQUENCE IF NOT EXISTS {}", naming.qualified(name));
    match resolver.resolve_recorded(name, "data_type", &sequence.data_type, &mut draft.mapping) {
        Resolution::Resolved(r) if INTEGER_TYPES.contains(&r.target.as_str()) => {
            let _ = write!(sql, " AS {}", r.target);
        }
        Resolution::Resolved(r) => draft.warnings.push(format!(
            "sequence type {} is not an integer type; the target sequence is bigint",
            r.target
        )),
        Resolution::Unmappable { reason } => draft.issues.push(reason),
    }
    let _ = write!(
        sql,
        " START WITH {} INCREMENT BY {}",
        sequence.start, sequence.increment
    );
    if let Some(min) = sequence.min_value {
        let _ = write!(sql, " MINVALUE {}", min);
    }
    if let Some(max) = sequence.max_value {
        let _ = write!(sql, " MAXVALUE {}", max);
    }
    if sequence.cycle {
        sql.push_str(" CYCLE");
    }
    draft.statements.push(sql);
}

pub(crate) fn view(
    name: &QualifiedName,
    view: &ViewDef,
    naming: &NamingPolicy,
    resolver: &Resolver,
    draft: &mut Draft,
) {
    let tokens = match tokenize(&view.definition) {
        Ok(tokens) => tokens,
        Err(e) => {
            draft.issues.push(format!("cannot tokenize view: {}", e));
            return;
        }
    };
    let (columns, body) = match view_body(&tokens) {
        Ok(parts) => parts,
        Err(e) => {
            draft.issues.push(e);
            return;
        }
    };

    let mut rw = ExprRewriter::new(naming, resolver);
    let body = render(&rw.rewrite(body));
    draft.issues.append(&mut rw.issues);
    draft.warnings.append(&mut rw.warnings);

    let columns = if columns.is_empty() {
        String::new()
    } else {
        format!(" ({})", quote_list(naming, &columns))
    };
    draft.statements.push(format!(
        "CREATE OR REPLACE VIEW {}{} AS {}",
        naming.qualified(name),
        columns,
        body.trim()
    ));
}

/// Split `CREATE VIEW name [(cols)] [WITH ...] AS body` into the column
/// list and the query. A definition without a header is the query itself.
fn view_body(tokens: &[Token]) -> Result<(Vec<String>, &[Token]), String> {
    let mut columns = Vec::new();
    let mut body = tokens;
    if tokens
        .first()
        .is_some_and(|t| t.is_any_word(&["CREATE", "ALTER"]))
    {
        let kw = tokens
            .iter()
            .position(|t| t.is_word("VIEW"))
            .ok_or("unrecognized view header")?;
        let as_at = top_level(tokens)
            .find(|(i, t)| *i > kw && t.is_word("AS"))
            .map(|(i, _)| i)
            .ok_or("view body not found")?;
        if let Some(open) = tokens[kw..as_at]
            .iter()
            .position(|t| t.kind == TokenKind::LParen)
        {
            columns = tokens[kw + open..as_at]
                .iter()
                .filter(|t| matches!(t.kind, TokenKind::Word | TokenKind::QuotedIdent))
                .take_while(|t| !t.is_word("WITH"))
                .map(|t| t.text.clone())
                .collect();
        }
        body = &tokens[as_at + 1..];
    }
    let mut end = body.len();
    while end > 0 && (body[end - 1].kind == TokenKind::Semicolon || body[end - 1].is_word("GO")) {
        end -= 1;
    }
    if end == 0 {
        return Err("empty view body".into());
    }
    Ok((columns, &body[..end]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::orders_customers;
    use crate::catalog::ObjectDefinition;

    fn draft_for(name: &str) -> (Draft, QualifiedName) {
        (Draft::default(), QualifiedName::new("dbo", name))
    }

    /// Column name, type and NOT NULL flag from a generated CREATE TABLE.
    fn parse_columns(sql: &str) -> Vec<(String, String, bool)> {
        sql.lines()
            .skip(1)
            .map(|l| l.trim().trim_end_matches(','))
            .filter(|l| l.starts_with('"'))
            .map(|l| {
                let end = l[1..].find('"').unwrap() + 1;
                let name = l[1..end].to_string();
                let rest = l[end + 1..].trim();
                let ty_end = rest
                    .find(" GENERATED")
                    .or_else(|| rest.find(" DEFAULT"))
                    .or_else(|| rest.find(" NOT NULL"))
                    .unwrap_or(rest.len());
                (name, rest[..ty_end].to_string(), rest.ends_with("NOT NULL"))
            })
            .collect()
    }

    #[test]
    fn test_table_columns_round_trip() {
        let catalog = orders_customers();
        let object = catalog.get(&QualifiedName::new("dbo", "orders")).unwrap();
        let ObjectDefinition::Table(def) = &object.definition else {
            panic!("orders is a table");
        };
        let mut draft = Draft::default();
        table(&object.name, def, &NamingPolicy::default(), &Resolver::builtin(), &mut draft);
        assert!(draft.issues.is_empty(), "{:?}", draft.issues);

        let parsed = parse_columns(&draft.statements[0]);
        assert_eq!(parsed.len(), def.columns.len());
        for ((name, ty, not_null), (column, transfer)) in
            parsed.iter().zip(def.columns.iter().zip(&draft.columns))
        {
            assert_eq!(name, &column.name.to_lowercase());
            assert_eq!(ty, &transfer.target_type);
            assert_eq!(*not_null, !column.nullable);
        }
        assert_eq!(draft.mapping.len(), def.columns.len());
    }

    #[test]
    fn test_identity_and_defaults() {
        let def: TableDef = serde_json::from_str(
            r#"{
              "columns": [
                { "name": "Id", "source_type": { "name": "int", "length": null, "precision": null, "scale": null },
                  "nullable": false, "default": null, "ordinal": 1, "identity": { "seed": 100, "increment": 1 } },
                { "name": "Active", "source_type": { "name": "bit", "length": null, "precision": null, "scale": null },
                  "nullable": false, "default": "((1))", "ordinal": 2, "identity": null },
                { "name": "Created", "source_type": { "name": "datetime2", "length": null, "precision": 7, "scale": null },
                  "nullable": true, "default": "(getdate())", "ordinal": 3, "identity": null }
              ],
              "primary_key": { "name": "PK_Widgets", "columns": ["Id"], "clustered": true },
              "row_count": null
            }"#,
        )
        .unwrap();
        let (mut draft, name) = draft_for("Widgets");
        table(&name, &def, &NamingPolicy::default(), &Resolver::builtin(), &mut draft);
        assert!(draft.issues.is_empty(), "{:?}", draft.issues);
        let sql = &draft.statements[0];
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"public\".\"widgets\" (\n"));
        assert!(sql.contains(
            "\"id\" integer GENERATED BY DEFAULT AS IDENTITY (START WITH 100 INCREMENT BY 1) NOT NULL"
        ));
        assert!(sql.contains("\"active\" boolean DEFAULT true NOT NULL"));
        assert!(sql.contains("DEFAULT CURRENT_TIMESTAMP"));
        assert!(sql.contains("CONSTRAINT \"pk_widgets\" PRIMARY KEY (\"id\")"));
        assert_eq!(
            draft.post_load,
            vec![
                "SELECT setval(pg_get_serial_sequence('\"public\".\"widgets\"', 'id'), COALESCE(MAX(\"id\") + 1, 100), false) FROM \"public\".\"widgets\""
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_index_and_foreign_key() {
        let catalog = orders_customers();
        let naming = NamingPolicy::default();
        let resolver = Resolver::builtin();

        let idx = catalog
            .get(&QualifiedName::new("dbo", "orders.IX_orders_customer"))
            .unwrap();
        let ObjectDefinition::Index(def) = &idx.definition else {
            panic!("expected an index");
        };
        let mut draft = Draft::default();
        index(def, &naming, &resolver, &mut draft);
        assert!(draft.statements[0].starts_with(
            "CREATE INDEX IF NOT EXISTS \"idx_orders_ix_orders_customer\" ON \"public\".\"orders\" (\"customer_id\""
        ));

        let fk = catalog
            .get(&QualifiedName::new("dbo", "FK_orders_customers"))
            .unwrap();
        let ObjectDefinition::Constraint(def) = &fk.definition else {
            panic!("expected a constraint");
        };
        let mut draft = Draft::default();
        constraint(&fk.name, def, false, &naming, &resolver, &mut draft);
        assert!(draft.statements[0].starts_with(
            "ALTER TABLE \"public\".\"orders\" ADD CONSTRAINT \"fk_orders_customers\" FOREIGN KEY (\"customer_id\") REFERENCES \"public\".\"customers\" (\"id\")"
        ));
        assert!(!draft.statements[0].contains("NOT VALID"));

        let mut draft = Draft::default();
        constraint(&fk.name, def, true, &naming, &resolver, &mut draft);
        assert!(draft.statements[0].ends_with(" NOT VALID"));
        assert_eq!(draft.notes.len(), 1);
    }

    #[test]
    fn test_check_constraint_rewritten() {
        let def = ConstraintDef {
            table: QualifiedName::new("dbo", "orders"),
            body: ConstraintBody::Check {
                expression: "([Qty]>(0) AND len([Code])=(3))".to_string(),
            },
        };
        let (mut draft, name) = draft_for("CK_orders_qty");
        constraint(&name, &def, false, &NamingPolicy::default(), &Resolver::builtin(), &mut draft);
        assert!(draft.issues.is_empty(), "{:?}", draft.issues);
        assert_eq!(
            draft.statements[0],
            "ALTER TABLE \"public\".\"orders\" ADD CONSTRAINT \"ck_orders_qty\" CHECK ((\"qty\">(0) AND LENGTH(RTRIM(\"code\"))=(3)))"
        );
    }

    #[test]
    fn test_sequence() {
        let def = SequenceDef {
            data_type: crate::catalog::TypeDescriptor::new("bigint"),
            start: 1000,
            increment: 5,
            min_value: Some(1),
            max_value: None,
            cycle: true,
        };
        let (mut draft, name) = draft_for("OrderNumbers");
        sequence(&name, &def, &NamingPolicy::default(), &Resolver::builtin(), &mut draft);
        assert_eq!(
            draft.statements[0],
            "CREATE SEQUENCE IF NOT EXISTS \"public\".\"ordernumbers\" AS bigint START WITH 1000 INCREMENT BY 5 MINVALUE 1 CYCLE"
        );
    }

    #[test]
    fn test_view_header_stripped() {
        let def = ViewDef {
            definition: "CREATE VIEW dbo.v_big_orders (Id, Total) WITH SCHEMABINDING AS\n SELECT TOP 10 id, total FROM dbo.orders WITH (NOLOCK) ORDER BY total DESC;\nGO".to_string(),
        };
        let (mut draft, name) = draft_for("v_big_orders");
        view(&name, &def, &NamingPolicy::default(), &Resolver::builtin(), &mut draft);
        assert!(draft.issues.is_empty(), "{:?}", draft.issues);
        assert_eq!(
            draft.statements[0],
            "CREATE OR REPLACE VIEW \"public\".\"v_big_orders\" (\"id\", \"total\") AS SELECT \"id\", \"total\" FROM \"public\".\"orders\" ORDER BY \"total\" DESC LIMIT 10"
        );
    }

    #[test]
    fn test_view_with_unsafe_construct() {
        let def = ViewDef {
            definition: "SELECT a.id FROM dbo.a CROSS APPLY dbo.f(a.id) x".to_string(),
        };
        let (mut draft, name) = draft_for("v_apply");
        view(&name, &def, &NamingPolicy::default(), &Resolver::builtin(), &mut draft);
        assert!(!draft.issues.is_empty());
    }
}
