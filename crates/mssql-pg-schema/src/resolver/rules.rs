//! Type mapping rules and the built-in rule table.

use crate::catalog::TypeDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use super::ValueTransform;

/// Source type family. Every source type name belongs to exactly one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeFamily {
    Integer,
    Decimal,
    Money,
    Float,
    Bit,
    /// char, varchar, text
    Char,
    /// nchar, nvarchar, ntext, sysname
    Nchar,
    Binary,
    Datetime,
    Uuid,
    Xml,
    /// Everything without a built-in mapping (sql_variant, hierarchyid, spatial...).
    Other,
}

impl TypeFamily {
    /// Family of a lowercased source type name.
    pub fn of(type_name: &str) -> Self {
        match type_name {
            "tinyint" | "smallint" | "int" | "bigint" => TypeFamily::Integer,
            "decimal" | "numeric" => TypeFamily::Decimal,
            "money" | "smallmoney" => TypeFamily::Money,
            "float" | "real" => TypeFamily::Float,
            "bit" => TypeFamily::Bit,
            "char" | "varchar" | "text" => TypeFamily::Char,
            "nchar" | "nvarchar" | "ntext" | "sysname" => TypeFamily::Nchar,
            "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => TypeFamily::Binary,
            "date" | "time" | "datetime" | "datetime2" | "smalldatetime" | "datetimeoffset" => {
                TypeFamily::Datetime
            }
            "uniqueidentifier" => TypeFamily::Uuid,
            "xml" => TypeFamily::Xml,
            _ => TypeFamily::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TypeFamily::Integer => "integer",
            TypeFamily::Decimal => "decimal",
            TypeFamily::Money => "money",
            TypeFamily::Float => "float",
            TypeFamily::Bit => "bit",
            TypeFamily::Char => "char",
            TypeFamily::Nchar => "nchar",
            TypeFamily::Binary => "binary",
            TypeFamily::Datetime => "datetime",
            TypeFamily::Uuid => "uuid",
            TypeFamily::Xml => "xml",
            TypeFamily::Other => "other",
        }
    }

    /// Whether values of this family are character data.
    pub fn is_text(&self) -> bool {
        matches!(self, TypeFamily::Char | TypeFamily::Nchar)
    }
}

impl fmt::Display for TypeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Constraint on one type parameter (length, precision or scale).
///
/// In YAML: `50` (exact), `max` (the `max` length), or `{ min: 1, max: 4000 }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamMatch {
    Exact(i64),
    Keyword(String),
    Range {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
}

impl ParamMatch {
    pub fn matches(&self, value: Option<i64>) -> bool {
        match self {
            ParamMatch::Exact(n) => value == Some(*n),
            ParamMatch::Keyword(_) => value == Some(-1),
            ParamMatch::Range { min, max } => match value {
                Some(v) if v >= 0 => {
                    min.map_or(true, |m| v >= m) && max.map_or(true, |m| v <= m)
                }
                _ => false,
            },
        }
    }
}

/// Where a rule was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOrigin {
    Configured(usize),
    BuiltIn(usize),
}

impl fmt::Display for RuleOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleOrigin::Configured(i) => write!(f, "type_mappings[{}]", i),
            RuleOrigin::BuiltIn(i) => write!(f, "builtin[{}]", i),
        }
    }
}

/// One (predicate, target) pair.
#[derive(Debug, Clone)]
pub struct TypeRule {
    /// Exact source type name, or `None` for a family-wide rule.
    pub source: Option<String>,
    pub family: TypeFamily,
    pub length: Option<ParamMatch>,
    pub precision: Option<ParamMatch>,
    pub scale: Option<ParamMatch>,
    /// Target type template; may use `{length}`, `{precision}`, `{scale}`.
    pub target: String,
    pub transform: Option<ValueTransform>,
    /// Configured fallback for the family.
    pub is_default: bool,
    pub origin: RuleOrigin,
}

impl TypeRule {
    fn builtin(source: &str, target: &str) -> Self {
        Self {
            family: TypeFamily::of(source),
            source: Some(source.to_string()),
            length: None,
            precision: None,
            scale: None,
            target: target.to_string(),
            transform: None,
            is_default: false,
            origin: RuleOrigin::BuiltIn(0),
        }
    }

    pub fn is_parameterized(&self) -> bool {
        self.length.is_some() || self.precision.is_some() || self.scale.is_some()
    }

    pub fn matches(&self, desc: &TypeDescriptor) -> bool {
        if let Some(source) = &self.source {
            if source != &desc.name {
                return false;
            }
        } else if self.family != TypeFamily::of(&desc.name) {
            return false;
        }
        let check = |m: &Option<ParamMatch>, v: Option<i64>| m.as_ref().map_or(true, |m| m.matches(v));
        check(&self.length, desc.length.map(i64::from))
            && check(&self.precision, desc.precision.map(i64::from))
            && check(&self.scale, desc.scale.map(i64::from))
    }

    /// Render the target template for a descriptor. `None` when the template
    /// needs a parameter the descriptor lacks.
    pub fn render(&self, desc: &TypeDescriptor) -> Option<String> {
        let mut out = self.target.clone();
        if out.contains("{length}") {
            match desc.length {
                Some(len) if len > 0 => out = out.replace("{length}", &len.to_string()),
                _ => return None,
            }
        }
        if out.contains("{precision}") {
            out = out.replace("{precision}", &desc.precision?.to_string());
        }
        if out.contains("{scale}") {
            out = out.replace("{scale}", &desc.scale.unwrap_or(0).to_string());
        }
        Some(out)
    }
}

/// Ordered rules grouped for lookup.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<TypeRule>,
    /// Named-type rules, parameterized first, then declaration order.
    exact: HashMap<String, Vec<usize>>,
    /// Family-wide rules in declaration order.
    family: HashMap<TypeFamily, Vec<usize>>,
    /// Rules flagged as family defaults, in declaration order.
    defaults: HashMap<TypeFamily, Vec<usize>>,
    /// Every rule of a family in declaration order.
    ordered: HashMap<TypeFamily, Vec<usize>>,
}

impl RuleSet {
    pub fn new(rules: Vec<TypeRule>) -> Self {
        let mut set = RuleSet {
            rules,
            ..Default::default()
        };
        for (i, rule) in set.rules.iter().enumerate() {
            set.ordered.entry(rule.family).or_default().push(i);
            if rule.is_default {
                set.defaults.entry(rule.family).or_default().push(i);
            } else if let Some(source) = &rule.source {
                set.exact.entry(source.clone()).or_default().push(i);
            } else {
                set.family.entry(rule.family).or_default().push(i);
            }
        }
        for bucket in set.exact.values_mut() {
            // stable: keeps declaration order within equal specificity
            bucket.sort_by_key(|&i| !set.rules[i].is_parameterized());
        }
        set
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn scan<'a>(
        &'a self,
        bucket: Option<&'a Vec<usize>>,
        desc: &TypeDescriptor,
    ) -> Option<(&'a TypeRule, String)> {
        bucket?.iter().find_map(|&i| {
            let rule = &self.rules[i];
            if rule.matches(desc) {
                rule.render(desc).map(|target| (rule, target))
            } else {
                None
            }
        })
    }

    pub(crate) fn match_exact(&self, desc: &TypeDescriptor) -> Option<(&TypeRule, String)> {
        self.scan(self.exact.get(&desc.name), desc)
    }

    pub(crate) fn match_family(&self, desc: &TypeDescriptor) -> Option<(&TypeRule, String)> {
        self.scan(self.family.get(&TypeFamily::of(&desc.name)), desc)
    }

    pub(crate) fn match_default(&self, desc: &TypeDescriptor) -> Option<(&TypeRule, String)> {
        self.scan(self.defaults.get(&TypeFamily::of(&desc.name)), desc)
    }

    pub(crate) fn match_ordered(&self, desc: &TypeDescriptor) -> Option<(&TypeRule, String)> {
        self.scan(self.ordered.get(&TypeFamily::of(&desc.name)), desc)
    }
}

/// The built-in SQL Server to PostgreSQL rule table, initialized once.
pub fn builtin_rules() -> &'static RuleSet {
    static BUILTIN: OnceLock<RuleSet> = OnceLock::new();
    BUILTIN.get_or_init(|| {
        let max = || Some(ParamMatch::Keyword("max".to_string()));
        let sized = || Some(ParamMatch::Range { min: Some(1), max: None });

        let mut rules = Vec::new();
        let mut push = |mut rule: TypeRule| {
            rule.origin = RuleOrigin::BuiltIn(rules.len());
            rules.push(rule);
        };

        push(TypeRule::builtin("tinyint", "smallint"));
        push(TypeRule::builtin("smallint", "smallint"));
        push(TypeRule::builtin("int", "integer"));
        push(TypeRule::builtin("bigint", "bigint"));

        for name in ["decimal", "numeric"] {
            push(TypeRule {
                precision: Some(ParamMatch::Range { min: Some(1), max: None }),
                ..TypeRule::builtin(name, "numeric({precision},{scale})")
            });
            push(TypeRule::builtin(name, "numeric"));
        }

        push(TypeRule::builtin("money", "numeric(19,4)"));
        push(TypeRule::builtin("smallmoney", "numeric(10,4)"));

        push(TypeRule::builtin("real", "real"));
        push(TypeRule {
            precision: Some(ParamMatch::Range { min: Some(1), max: Some(24) }),
            ..TypeRule::builtin("float", "real")
        });
        push(TypeRule::builtin("float", "double precision"));

        push(TypeRule {
            transform: Some(ValueTransform::BitToBool),
            ..TypeRule::builtin("bit", "boolean")
        });

        for (fixed, varying) in [("char", "varchar"), ("nchar", "nvarchar")] {
            push(TypeRule {
                length: sized(),
                ..TypeRule::builtin(fixed, "char({length})")
            });
            push(TypeRule::builtin(fixed, "char"));
            push(TypeRule {
                length: max(),
                ..TypeRule::builtin(varying, "text")
            });
            push(TypeRule {
                length: sized(),
                ..TypeRule::builtin(varying, "varchar({length})")
            });
            push(TypeRule::builtin(varying, "text"));
        }
        push(TypeRule::builtin("text", "text"));
        push(TypeRule::builtin("ntext", "text"));
        push(TypeRule::builtin("sysname", "varchar(128)"));

        for name in ["binary", "varbinary", "image", "timestamp", "rowversion"] {
            push(TypeRule::builtin(name, "bytea"));
        }

        push(TypeRule::builtin("date", "date"));
        push(TypeRule::builtin("time", "time"));
        push(TypeRule::builtin("datetime", "timestamp"));
        push(TypeRule::builtin("datetime2", "timestamp"));
        push(TypeRule::builtin("smalldatetime", "timestamp"));
        push(TypeRule::builtin("datetimeoffset", "timestamptz"));

        push(TypeRule::builtin("uniqueidentifier", "uuid"));
        push(TypeRule::builtin("xml", "xml"));

        RuleSet::new(rules)
    })
}
