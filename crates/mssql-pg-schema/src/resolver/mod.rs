//! Type and rule resolution.
//!
//! Resolution order for a source type descriptor:
//!
//! 1. configured rule naming the exact type (parameterized rules first)
//! 2. configured family-wide rule
//! 3. configured family default (`default: true`)
//! 4. built-in rule table
//!
//! Within each tier the first matching rule in declaration order wins. If no
//! tier matches, the result is [`Resolution::Unmappable`] and the caller
//! applies the unmappable policy.

mod defaults;
mod naming;
mod rules;

pub use defaults::translate_default;
pub use naming::NamingPolicy;
pub use rules::{builtin_rules, ParamMatch, RuleOrigin, RuleSet, TypeFamily, TypeRule};

use crate::catalog::{QualifiedName, TypeDescriptor};
use crate::config::TypeMappingRule;
use crate::error::{MigrateError, Result};
use crate::exec::SqlValue;
use serde::{Deserialize, Serialize};

/// Per-value conversion applied while transferring data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueTransform {
    /// 0/1 integers to booleans.
    BitToBool,
    /// Lowercase textual UUIDs.
    UuidLowercase,
    /// Strip trailing blanks from fixed-width strings.
    Rtrim,
}

impl ValueTransform {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "bit_to_bool" => Some(ValueTransform::BitToBool),
            "uuid_lowercase" => Some(ValueTransform::UuidLowercase),
            "rtrim" => Some(ValueTransform::Rtrim),
            _ => None,
        }
    }

    pub fn apply(&self, value: SqlValue) -> SqlValue {
        match (self, value) {
            (ValueTransform::BitToBool, SqlValue::I16(n)) => SqlValue::Bool(n != 0),
            (ValueTransform::BitToBool, SqlValue::I32(n)) => SqlValue::Bool(n != 0),
            (ValueTransform::BitToBool, SqlValue::I64(n)) => SqlValue::Bool(n != 0),
            (ValueTransform::BitToBool, SqlValue::Text(s)) => match s.trim() {
                "1" => SqlValue::Bool(true),
                "0" => SqlValue::Bool(false),
                _ => SqlValue::Text(s),
            },
            (ValueTransform::UuidLowercase, SqlValue::Text(s)) => SqlValue::Text(s.to_lowercase()),
            (ValueTransform::UuidLowercase, SqlValue::Uuid(u)) => {
                SqlValue::Text(u.hyphenated().to_string())
            }
            (ValueTransform::Rtrim, SqlValue::Text(s)) => {
                SqlValue::Text(s.trim_end_matches(' ').to_string())
            }
            (_, other) => other,
        }
    }
}

/// Which tier produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionTier {
    ExactMatch,
    FamilyMatch,
    ConfiguredDefault,
    BuiltinDefault,
}

/// A successfully resolved target type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedType {
    pub target: String,
    pub transform: Option<ValueTransform>,
    /// Rule that matched, e.g. `type_mappings[2]` or `builtin[17]`.
    pub rule: String,
    pub tier: ResolutionTier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    Resolved(ResolvedType),
    Unmappable { reason: String },
}

impl Resolution {
    pub fn resolved(&self) -> Option<&ResolvedType> {
        match self {
            Resolution::Resolved(r) => Some(r),
            Resolution::Unmappable { .. } => None,
        }
    }

    pub fn is_unmappable(&self) -> bool {
        matches!(self, Resolution::Unmappable { .. })
    }
}

/// One entry of the mapping audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingAuditRecord {
    pub object: String,
    /// Column, parameter or other item within the object.
    pub item: String,
    pub source_type: String,
    #[serde(flatten)]
    pub resolution: Resolution,
}

/// Resolver over the configured rules followed by the built-in table.
#[derive(Debug, Clone)]
pub struct Resolver {
    configured: RuleSet,
}

impl Resolver {
    /// Resolver with built-in rules only.
    pub fn builtin() -> Self {
        Self {
            configured: RuleSet::default(),
        }
    }

    /// Build a resolver from configured mapping entries.
    pub fn from_config(entries: &[TypeMappingRule]) -> Result<Self> {
        let rules = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| rule_from_entry(entry, i))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            configured: RuleSet::new(rules),
        })
    }

    pub fn configured_rule_count(&self) -> usize {
        self.configured.len()
    }

    /// Resolve a source type. Pure: same descriptor and rules give the same answer.
    pub fn resolve(&self, desc: &TypeDescriptor) -> Resolution {
        let tiers = [
            (self.configured.match_exact(desc), ResolutionTier::ExactMatch),
            (self.configured.match_family(desc), ResolutionTier::FamilyMatch),
            (self.configured.match_default(desc), ResolutionTier::ConfiguredDefault),
            (builtin_rules().match_ordered(desc), ResolutionTier::BuiltinDefault),
        ];
        for (hit, tier) in tiers {
            if let Some((rule, target)) = hit {
                return Resolution::Resolved(ResolvedType {
                    target,
                    transform: rule.transform,
                    rule: rule.origin.to_string(),
                    tier,
                });
            }
        }
        Resolution::Unmappable {
            reason: format!("no mapping rule for source type {}", desc),
        }
    }

    /// Resolve and record the decision in the audit trail.
    pub fn resolve_recorded(
        &self,
        object: &QualifiedName,
        item: &str,
        desc: &TypeDescriptor,
        audit: &mut Vec<MappingAuditRecord>,
    ) -> Resolution {
        let resolution = self.resolve(desc);
        audit.push(MappingAuditRecord {
            object: object.to_string(),
            item: item.to_string(),
            source_type: desc.to_string(),
            resolution: resolution.clone(),
        });
        resolution
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::builtin()
    }
}

fn rule_from_entry(entry: &TypeMappingRule, index: usize) -> Result<TypeRule> {
    let (source, family) = match (&entry.source, entry.family) {
        (Some(source), None) => {
            let source = source.trim().to_lowercase();
            let family = TypeFamily::of(&source);
            (Some(source), family)
        }
        (None, Some(family)) => (None, family),
        _ => {
            return Err(MigrateError::Config(format!(
                "type_mappings[{}]: exactly one of 'source' or 'family' is required",
                index
            )))
        }
    };
    let transform = match &entry.transform {
        Some(name) => Some(ValueTransform::from_name(name).ok_or_else(|| {
            MigrateError::Config(format!(
                "type_mappings[{}]: unknown transform '{}'",
                index, name
            ))
        })?),
        None => None,
    };
    Ok(TypeRule {
        source,
        family,
        length: entry.length.clone(),
        precision: entry.precision.clone(),
        scale: entry.scale.clone(),
        target: entry.target.trim().to_string(),
        transform,
        is_default: entry.default,
        origin: RuleOrigin::Configured(index),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(yaml: &str) -> TypeMappingRule {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn nvarchar50() -> TypeDescriptor {
        TypeDescriptor::new("NVARCHAR").with_length(50)
    }

    #[test]
    fn test_builtin_nvarchar_keeps_length() {
        let resolved = Resolver::builtin().resolve(&nvarchar50());
        let r = resolved.resolved().unwrap();
        assert_eq!(r.target, "varchar(50)");
        assert_eq!(r.tier, ResolutionTier::BuiltinDefault);
    }

    #[test]
    fn test_family_rule_maps_nvarchar_to_text() {
        let resolver = Resolver::from_config(&[entry("family: nchar\ntarget: text\n")]).unwrap();
        let r = resolver.resolve(&nvarchar50());
        assert_eq!(r.resolved().unwrap().target, "text");
        assert_eq!(r.resolved().unwrap().tier, ResolutionTier::FamilyMatch);
    }

    #[test]
    fn test_length_preserving_rule_wins_over_family() {
        let resolver = Resolver::from_config(&[
            entry("family: nchar\ntarget: text\n"),
            entry("source: nvarchar\nlength: {min: 1, max: 4000}\ntarget: \"varchar({length})\"\n"),
        ])
        .unwrap();
        let r = resolver.resolve(&nvarchar50());
        assert_eq!(r.resolved().unwrap().target, "varchar(50)");
        assert_eq!(r.resolved().unwrap().rule, "type_mappings[1]");
    }

    #[test]
    fn test_configured_default_precedes_builtin() {
        let resolver =
            Resolver::from_config(&[entry("family: datetime\ntarget: timestamptz\ndefault: true\n")])
                .unwrap();
        let r = resolver.resolve(&TypeDescriptor::new("datetime2"));
        assert_eq!(r.resolved().unwrap().target, "timestamptz");
        assert_eq!(r.resolved().unwrap().tier, ResolutionTier::ConfiguredDefault);
    }

    #[test]
    fn test_tie_break_is_declaration_order() {
        let resolver = Resolver::from_config(&[
            entry("source: int\ntarget: bigint\n"),
            entry("source: int\ntarget: numeric\n"),
        ])
        .unwrap();
        let r = resolver.resolve(&TypeDescriptor::new("int"));
        assert_eq!(r.resolved().unwrap().target, "bigint");
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let resolver = Resolver::from_config(&[entry("family: nchar\ntarget: text\n")]).unwrap();
        let desc = nvarchar50();
        let first = resolver.resolve(&desc);
        for _ in 0..10 {
            assert_eq!(resolver.resolve(&desc), first);
        }
    }

    #[test]
    fn test_unmappable_is_a_value() {
        let r = Resolver::builtin().resolve(&TypeDescriptor::new("sql_variant"));
        assert!(r.is_unmappable());
    }

    #[test]
    fn test_configured_rule_can_map_unknown_family() {
        let resolver =
            Resolver::from_config(&[entry("source: hierarchyid\ntarget: text\n")]).unwrap();
        let r = resolver.resolve(&TypeDescriptor::new("hierarchyid"));
        assert_eq!(r.resolved().unwrap().target, "text");
    }

    #[test]
    fn test_resolve_recorded_appends_audit() {
        let resolver = Resolver::builtin();
        let mut audit = Vec::new();
        let name = QualifiedName::new("dbo", "t");
        resolver.resolve_recorded(&name, "a", &TypeDescriptor::new("bit"), &mut audit);
        resolver.resolve_recorded(&name, "b", &TypeDescriptor::new("sql_variant"), &mut audit);
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[0].source_type, "bit");
        assert!(matches!(
            &audit[0].resolution,
            Resolution::Resolved(r) if r.transform == Some(ValueTransform::BitToBool)
        ));
        assert!(audit[1].resolution.is_unmappable());
    }

    #[test]
    fn test_bad_rule_entries_rejected() {
        assert!(Resolver::from_config(&[entry("target: text\n")]).is_err());
        assert!(Resolver::from_config(&[entry("source: int\nfamily: integer\ntarget: int\n")]).is_err());
        assert!(Resolver::from_config(&[entry("source: bit\ntarget: boolean\ntransform: nope\n")]).is_err());
    }

    #[test]
    fn test_value_transforms() {
        assert_eq!(ValueTransform::BitToBool.apply(SqlValue::I32(1)), SqlValue::Bool(true));
        assert_eq!(
            ValueTransform::Rtrim.apply(SqlValue::Text("ab  ".into())),
            SqlValue::Text("ab".into())
        );
        assert_eq!(
            ValueTransform::UuidLowercase.apply(SqlValue::Text("ABC-D".into())),
            SqlValue::Text("abc-d".into())
        );
        assert_eq!(ValueTransform::Rtrim.apply(SqlValue::Null), SqlValue::Null);
    }
}
