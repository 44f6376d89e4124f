//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};
use crate::plan::ExcludeMatcher;
use crate::resolver::{ParamMatch, Resolver};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(MigrateError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(MigrateError::Config("source.database is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(MigrateError::Config("source.user is required".into()));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if config.target.schema.is_empty() {
        return Err(MigrateError::Config("target.schema cannot be empty".into()));
    }
    if !matches!(config.target.ssl_mode.as_str(), "disable" | "prefer") {
        return Err(MigrateError::Config(format!(
            "target.ssl_mode must be 'disable' or 'prefer', got '{}'",
            config.target.ssl_mode
        )));
    }

    // Migration config validation - only check if explicitly set
    let migration = &config.migration;
    if let Some(0) = migration.worker_count {
        return Err(MigrateError::Config(
            "migration.worker_count must be at least 1".into(),
        ));
    }
    if migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if migration.backoff.multiplier < 1.0 {
        return Err(MigrateError::Config(
            "migration.backoff.multiplier must be >= 1.0".into(),
        ));
    }
    if migration.backoff.initial_delay_ms > migration.backoff.max_delay_ms {
        return Err(MigrateError::Config(
            "migration.backoff.initial_delay_ms cannot exceed max_delay_ms".into(),
        ));
    }

    ExcludeMatcher::new(&migration.exclude)?;

    // Type mapping rules
    for (i, rule) in config.type_mappings.iter().enumerate() {
        if rule.target.trim().is_empty() {
            return Err(MigrateError::Config(format!(
                "type_mappings[{}]: target is required",
                i
            )));
        }
        for (field, param) in [
            ("length", &rule.length),
            ("precision", &rule.precision),
            ("scale", &rule.scale),
        ] {
            match param {
                Some(ParamMatch::Keyword(word)) if !word.eq_ignore_ascii_case("max") => {
                    return Err(MigrateError::Config(format!(
                        "type_mappings[{}]: {} must be a number, 'max' or a range, got '{}'",
                        i, field, word
                    )));
                }
                Some(ParamMatch::Range {
                    min: Some(lo),
                    max: Some(hi),
                }) if lo > hi => {
                    return Err(MigrateError::Config(format!(
                        "type_mappings[{}]: {} range is empty ({}..{})",
                        i, field, lo, hi
                    )));
                }
                _ => {}
            }
        }
        let mut rest = rule.target.as_str();
        while let Some(start) = rest.find('{') {
            let Some(end) = rest[start..].find('}') else {
                break;
            };
            let placeholder = &rest[start + 1..start + end];
            if !matches!(placeholder, "length" | "precision" | "scale") {
                return Err(MigrateError::Config(format!(
                    "type_mappings[{}]: unknown placeholder '{{{}}}' in target",
                    i, placeholder
                )));
            }
            rest = &rest[start + end + 1..];
        }
    }
    // source/family exclusivity and transform names
    Resolver::from_config(&config.type_mappings)?;

    Ok(())
}
