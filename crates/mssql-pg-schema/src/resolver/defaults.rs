//! Column default expression conversion.

/// Convert a source column default to the target dialect.
///
/// Handles literals and the well-known niladic functions. Returns `None` for
/// anything else so the caller can fall back to the full expression rewriter.
pub fn translate_default(expr: &str, target_type: &str) -> Option<String> {
    let inner = strip_outer_parens(expr.trim());
    let lower = inner.to_lowercase();

    let mapped = match lower.as_str() {
        "getdate()" | "getutcdate()" | "sysdatetime()" | "sysutcdatetime()"
        | "current_timestamp" => Some("CURRENT_TIMESTAMP".to_string()),
        "sysdatetimeoffset()" => Some("CURRENT_TIMESTAMP".to_string()),
        "newid()" | "newsequentialid()" => Some("gen_random_uuid()".to_string()),
        "user_name()" | "suser_sname()" | "suser_name()" | "system_user" | "current_user" => {
            Some("CURRENT_USER".to_string())
        }
        "null" => Some("NULL".to_string()),
        _ => None,
    };
    if mapped.is_some() {
        return mapped;
    }

    if target_type.eq_ignore_ascii_case("boolean") {
        return match inner {
            "0" | "'0'" => Some("false".to_string()),
            "1" | "'1'" => Some("true".to_string()),
            _ => None,
        };
    }

    if is_numeric_literal(inner) {
        return Some(inner.to_string());
    }

    string_literal(inner)
}

/// Remove redundant wrapping parentheses: `((0))` -> `0`.
fn strip_outer_parens(mut s: &str) -> &str {
    while s.starts_with('(') && s.ends_with(')') && wraps_whole(s) {
        s = s[1..s.len() - 1].trim();
    }
    s
}

/// True when the opening paren at 0 closes at the last character.
fn wraps_whole(s: &str) -> bool {
    let mut depth = 0i32;
    let mut in_string = false;
    let last = s.len() - 1;
    for (i, ch) in s.char_indices() {
        match ch {
            '\'' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => {
                depth -= 1;
                if depth == 0 && i != last {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

fn is_numeric_literal(s: &str) -> bool {
    let body = s.strip_prefix('-').unwrap_or(s);
    !body.is_empty()
        && body.chars().all(|c| c.is_ascii_digit() || c == '.')
        && body.chars().filter(|&c| c == '.').count() <= 1
}

/// `'abc'` or `N'abc'` as a target string literal.
fn string_literal(s: &str) -> Option<String> {
    let body = s
        .strip_prefix('N')
        .or_else(|| s.strip_prefix('n'))
        .unwrap_or(s);
    if body.len() >= 2 && body.starts_with('\'') && body.ends_with('\'') {
        // Embedded quotes are already doubled in the source literal.
        let content = &body[1..body.len() - 1];
        let mut chars = content.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' && chars.next() != Some('\'') {
                return None;
            }
        }
        Some(body.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_niladic_functions() {
        assert_eq!(translate_default("(getdate())", "timestamp").as_deref(), Some("CURRENT_TIMESTAMP"));
        assert_eq!(translate_default("(GETUTCDATE())", "timestamp").as_deref(), Some("CURRENT_TIMESTAMP"));
        assert_eq!(translate_default("(newid())", "uuid").as_deref(), Some("gen_random_uuid()"));
        assert_eq!(translate_default("(suser_sname())", "text").as_deref(), Some("CURRENT_USER"));
    }

    #[test]
    fn test_literals() {
        assert_eq!(translate_default("((0))", "integer").as_deref(), Some("0"));
        assert_eq!(translate_default("((-1.5))", "numeric").as_deref(), Some("-1.5"));
        assert_eq!(translate_default("((1))", "boolean").as_deref(), Some("true"));
        assert_eq!(translate_default("((0))", "boolean").as_deref(), Some("false"));
        assert_eq!(translate_default("(N'open')", "text").as_deref(), Some("'open'"));
        assert_eq!(translate_default("('it''s')", "text").as_deref(), Some("'it''s'"));
    }

    #[test]
    fn test_unknown_expression_falls_through() {
        assert_eq!(translate_default("(dateadd(day,(1),getdate()))", "timestamp"), None);
        assert_eq!(translate_default("('a')+('b')", "text"), None);
    }

    #[test]
    fn test_strip_keeps_unbalanced_groups() {
        assert_eq!(strip_outer_parens("(a)+(b)"), "(a)+(b)");
        assert_eq!(strip_outer_parens("((x))"), "x");
    }
}
