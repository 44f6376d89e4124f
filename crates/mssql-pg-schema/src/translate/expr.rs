//! Expression and query rewriting shared by views, check constraints,
//! defaults and routine statements.
//!
//! The rewriter walks a token slice and emits target-dialect tokens.
//! Constructs with no safe equivalent are recorded as issues; an object
//! with any issue is reported for manual review instead of being emitted
//! with guessed semantics.

use super::lexer::{render, tokenize, Token, TokenKind};
use crate::catalog::TypeDescriptor;
use crate::resolver::{NamingPolicy, Resolution, Resolver, TypeFamily};

/// Resolves `@name` references inside routine bodies.
pub(crate) trait VariableScope {
    /// Target name and whether the variable holds character data.
    fn lookup(&self, name: &str) -> Option<(String, bool)>;
}

/// Words left untouched; every other bare word is an identifier.
const KEYWORDS: &[&str] = &[
    "ALL", "AND", "ANY", "APPLY", "AS", "ASC", "AT", "BEGIN", "BETWEEN", "BOTH", "BY", "CASE",
    "CAST", "CHECK", "CLOSE", "COLLATE", "COMMIT", "CROSS", "CURRENT", "CURRENT_DATE",
    "CURRENT_TIMESTAMP", "CURRENT_USER", "CURSOR", "DEALLOCATE", "DECLARE", "DEFAULT", "DELETE",
    "DESC", "DISTINCT", "ELSE", "END", "ESCAPE", "EXCEPT", "EXEC", "EXECUTE", "EXISTS", "FALSE",
    "FETCH", "FIRST", "FOLLOWING", "FOR", "FOUND", "FROM", "FULL", "GROUP", "HAVING", "IF", "IN",
    "INNER", "INSERT", "INTERSECT", "INTERVAL", "INTO", "IS", "JOIN", "LAST", "LEFT", "LIKE",
    "LIMIT", "MERGE", "NEXT", "NOT", "NULL", "NULLS", "OFFSET", "ON", "ONLY", "OPEN", "OPTION",
    "OR", "ORDER", "OUTER", "OUTPUT", "OVER", "PARTITION", "PERCENT", "PIVOT", "PRECEDING",
    "RANGE", "RETURN", "RIGHT", "ROLLBACK", "ROW", "ROWS", "SELECT", "SESSION_USER", "SET",
    "SOME", "SYSTEM_USER", "TABLE", "THEN", "TIES", "TOP", "TRUE", "UNBOUNDED", "UNION",
    "UNPIVOT", "UPDATE", "USER", "VALUES", "VIEW", "WHEN", "WHERE", "WHILE", "WITH",
];

const TABLE_HINTS: &[&str] = &[
    "NOLOCK", "READUNCOMMITTED", "READCOMMITTED", "REPEATABLEREAD", "SERIALIZABLE", "ROWLOCK",
    "PAGLOCK", "TABLOCK", "TABLOCKX", "UPDLOCK", "XLOCK", "HOLDLOCK", "READPAST", "NOWAIT",
];

pub(crate) fn is_keyword(word: &str) -> bool {
    KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

/// Index of the `)` matching the `(` at `open`.
pub(crate) fn matching_paren(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on top-level commas.
pub(crate) fn split_commas(tokens: &[Token]) -> Vec<&[Token]> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => depth = depth.saturating_sub(1),
            TokenKind::Comma if depth == 0 => {
                parts.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < tokens.len() || !parts.is_empty() {
        parts.push(&tokens[start..]);
    }
    parts
}

/// Positions of top-level tokens (outside parentheses).
pub(crate) fn top_level(tokens: &[Token]) -> impl Iterator<Item = (usize, &Token)> {
    let mut depth = 0usize;
    tokens.iter().enumerate().filter(move |(_, t)| {
        let at_top = depth == 0;
        match t.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => depth = depth.saturating_sub(1),
            _ => {}
        }
        at_top && t.kind != TokenKind::LParen
    })
}

fn lparen() -> Token {
    Token::new(TokenKind::LParen, "(", false)
}

fn rparen() -> Token {
    Token::new(TokenKind::RParen, ")", false)
}

/// `name(arg, arg)` as tokens.
fn call(name: &str, space_before: bool, args: Vec<Vec<Token>>) -> Vec<Token> {
    let mut out = vec![Token::raw(name).spaced(space_before), lparen()];
    for (n, arg) in args.into_iter().enumerate() {
        if n > 0 {
            out.push(Token::new(TokenKind::Comma, ",", false));
        }
        for (k, token) in arg.into_iter().enumerate() {
            out.push(if k == 0 { token.spaced(n > 0) } else { token });
        }
    }
    out.push(rparen());
    out
}

fn quote_raw(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) struct ExprRewriter<'a> {
    naming: &'a NamingPolicy,
    resolver: &'a Resolver,
    scope: Option<&'a dyn VariableScope>,
    /// Constructs that block translation.
    pub issues: Vec<String>,
    /// Rewrites that may change behavior at the edges.
    pub warnings: Vec<String>,
    /// `@@ROWCOUNT` was referenced.
    pub uses_row_count: bool,
}

impl<'a> ExprRewriter<'a> {
    pub fn new(naming: &'a NamingPolicy, resolver: &'a Resolver) -> Self {
        Self {
            naming,
            resolver,
            scope: None,
            issues: Vec::new(),
            warnings: Vec::new(),
            uses_row_count: false,
        }
    }

    pub fn with_scope(mut self, scope: &'a dyn VariableScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub(crate) fn issue(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.issues.contains(&message) {
            self.issues.push(message);
        }
    }

    pub(crate) fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }

    /// Tokenize, rewrite and render a source fragment.
    pub fn rewrite_sql(&mut self, sql: &str) -> String {
        match tokenize(sql) {
            Ok(tokens) => render(&self.rewrite(&tokens)),
            Err(e) => {
                self.issue(format!("cannot tokenize: {}", e));
                sql.to_string()
            }
        }
    }

    /// Rewrite a token slice.
    pub fn rewrite(&mut self, tokens: &[Token]) -> Vec<Token> {
        let (skip, limit) = self.take_top(tokens);
        let mut out = Vec::with_capacity(tokens.len() + 2);
        let mut i = 0;
        while i < tokens.len() {
            if let Some((start, end)) = skip {
                if i == start {
                    i = end;
                    continue;
                }
            }
            i = self.rewrite_at(tokens, i, &mut out);
        }
        if let Some(limit) = limit {
            out.push(Token::raw("LIMIT"));
            out.extend(limit);
        }
        out
    }

    /// Locate `SELECT [DISTINCT] TOP n` at the top level. Returns the token
    /// range to drop and the `LIMIT` operand.
    fn take_top(&mut self, tokens: &[Token]) -> (Option<(usize, usize)>, Option<Vec<Token>>) {
        if tokens.len() > 1
            && tokens[0].is_any_word(&["UPDATE", "DELETE", "INSERT"])
            && tokens[1].is_word("TOP")
        {
            self.issue(format!("{} TOP has no target equivalent", tokens[0].upper()));
            return (None, None);
        }

        let Some(select) = top_level(tokens)
            .find(|(_, t)| t.is_word("SELECT"))
            .map(|(i, _)| i)
        else {
            return (None, None);
        };
        let mut j = select + 1;
        if tokens.get(j).is_some_and(|t| t.is_any_word(&["DISTINCT", "ALL"])) {
            j += 1;
        }
        if !tokens.get(j).is_some_and(|t| t.is_word("TOP")) {
            return (None, None);
        }

        let (count, end) = match tokens.get(j + 1) {
            Some(t) if t.kind == TokenKind::LParen => match matching_paren(tokens, j + 1) {
                Some(close) => (self.rewrite(&tokens[j + 2..close]), close + 1),
                None => {
                    self.issue("unbalanced parentheses after TOP");
                    return (None, None);
                }
            },
            Some(t) if t.kind == TokenKind::Number => (vec![t.clone()], j + 2),
            _ => {
                self.issue("unsupported TOP operand");
                return (None, None);
            }
        };
        if tokens.get(end).is_some_and(|t| t.is_word("PERCENT")) {
            self.issue("TOP ... PERCENT has no target equivalent");
            return (None, None);
        }
        if tokens.get(end).is_some_and(|t| t.is_word("WITH"))
            && tokens.get(end + 1).is_some_and(|t| t.is_word("TIES"))
        {
            self.issue("TOP ... WITH TIES has no target equivalent");
            return (None, None);
        }
        if top_level(tokens).any(|(_, t)| t.is_any_word(&["UNION", "EXCEPT", "INTERSECT"])) {
            self.issue("TOP combined with a set operator needs manual rewriting");
            return (None, None);
        }

        let count = count
            .into_iter()
            .enumerate()
            .map(|(k, t)| if k == 0 { t.spaced(true) } else { t })
            .collect();
        (Some((j, end)), Some(count))
    }

    /// Rewrite the construct starting at `i`; returns the next index.
    fn rewrite_at(&mut self, tokens: &[Token], i: usize, out: &mut Vec<Token>) -> usize {
        let token = &tokens[i];
        let next = tokens.get(i + 1);
        match token.kind {
            TokenKind::LParen => {
                let Some(close) = matching_paren(tokens, i) else {
                    self.issue("unbalanced parentheses");
                    out.extend(tokens[i..].iter().cloned());
                    return tokens.len();
                };
                let inner = &tokens[i + 1..close];
                if is_table_hint(inner) {
                    self.warn("table hints removed");
                    if out.last().is_some_and(|t| t.is_word("WITH")) {
                        out.pop();
                    }
                    return close + 1;
                }
                out.push(token.clone());
                out.extend(self.rewrite(inner));
                out.push(tokens[close].clone());
                close + 1
            }
            TokenKind::Word => self.rewrite_word(tokens, i, out),
            TokenKind::QuotedIdent => {
                if next.is_some_and(|t| t.kind == TokenKind::LParen) {
                    out.push(Token::raw(quote_raw(&token.text)).spaced(token.space_before));
                    return i + 1;
                }
                self.rewrite_name(tokens, i, out)
            }
            TokenKind::NString => {
                out.push(Token::new(TokenKind::String, token.text.clone(), token.space_before));
                i + 1
            }
            TokenKind::Variable => {
                match self.scope.and_then(|s| s.lookup(&token.text)) {
                    Some((name, _)) => out.push(Token::raw(name).spaced(token.space_before)),
                    None if self.scope.is_none() => {
                        self.issue(format!("variable {} outside a routine body", token.text));
                        out.push(token.clone());
                    }
                    None => {
                        self.issue(format!("undeclared variable {}", token.text));
                        out.push(token.clone());
                    }
                }
                i + 1
            }
            TokenKind::SystemVariable => self.rewrite_system_variable(tokens, i, out),
            TokenKind::Symbol => {
                match token.text.as_str() {
                    "+" if self.is_text_operand(tokens.get(i.wrapping_sub(1)))
                        || self.is_text_operand(next) =>
                    {
                        out.push(Token::raw("||").spaced(token.space_before));
                    }
                    "!<" => out.push(Token::raw(">=").spaced(token.space_before)),
                    "!>" => out.push(Token::raw("<=").spaced(token.space_before)),
                    "*=" | "=*" => {
                        self.issue("old-style outer join operator");
                        out.push(token.clone());
                    }
                    "+=" | "-=" | "/=" => {
                        self.issue(format!("compound assignment {} inside an expression", token.text));
                        out.push(token.clone());
                    }
                    _ => out.push(token.clone()),
                }
                i + 1
            }
            _ => {
                out.push(token.clone());
                i + 1
            }
        }
    }

    fn is_text_operand(&self, token: Option<&Token>) -> bool {
        match token {
            Some(t) if matches!(t.kind, TokenKind::String | TokenKind::NString) => true,
            Some(t) if t.kind == TokenKind::Variable => self
                .scope
                .and_then(|s| s.lookup(&t.text))
                .is_some_and(|(_, text)| text),
            _ => false,
        }
    }

    fn rewrite_word(&mut self, tokens: &[Token], i: usize, out: &mut Vec<Token>) -> usize {
        let token = &tokens[i];
        let next = tokens.get(i + 1);
        let upper = token.upper();

        if token.text.starts_with('#') {
            self.issue(format!("temporary table {}", token.text));
            out.push(token.clone());
            return i + 1;
        }

        match upper.as_str() {
            "PIVOT" | "UNPIVOT" | "MERGE" => {
                self.issue(format!("{} has no safe translation", upper));
            }
            "APPLY" if out.last().is_some_and(|t| t.is_any_word(&["CROSS", "OUTER"])) => {
                self.issue("CROSS/OUTER APPLY needs a manual LATERAL rewrite");
            }
            "FOR" if next.is_some_and(|t| t.is_any_word(&["XML", "JSON", "BROWSE"])) => {
                self.issue(format!("FOR {} has no target equivalent", next.map(|t| t.upper()).unwrap_or_default()));
            }
            "OPTION" if next.is_some_and(|t| t.kind == TokenKind::LParen) => {
                self.issue("query hints (OPTION clause)");
            }
            "OUTPUT" => {
                self.issue("OUTPUT clause");
            }
            "COLLATE" => {
                self.warn("COLLATE clause removed");
                return i + 2;
            }
            _ => {}
        }

        if next.is_some_and(|t| t.kind == TokenKind::LParen)
            && (!is_keyword(&token.text) || upper == "CAST")
        {
            return self.rewrite_function(tokens, i, out);
        }
        if is_keyword(&token.text) {
            out.push(token.clone());
            return i + 1;
        }
        self.rewrite_name(tokens, i, out)
    }

    /// Rewrite a possibly dotted identifier.
    fn rewrite_name(&mut self, tokens: &[Token], i: usize, out: &mut Vec<Token>) -> usize {
        let mut parts = vec![tokens[i].text.clone()];
        let mut j = i + 1;
        let mut star = false;
        while tokens.get(j).is_some_and(|t| t.kind == TokenKind::Dot) {
            match tokens.get(j + 1) {
                Some(t) if matches!(t.kind, TokenKind::Word | TokenKind::QuotedIdent) => {
                    parts.push(t.text.clone());
                    j += 2;
                }
                Some(t) if t.is_symbol("*") => {
                    star = true;
                    j += 2;
                    break;
                }
                _ => {
                    self.issue(format!("cross-database reference near {}", parts.join(".")));
                    j += 1;
                    break;
                }
            }
        }
        if parts.len() > 2 {
            self.issue(format!(
                "cross-database or linked-server reference {}",
                parts.join(".")
            ));
        }

        let mut text = if parts.len() == 2 {
            format!(
                "{}.{}",
                quote_raw(&self.naming.schema(&parts[0])),
                self.naming.quote(&parts[1])
            )
        } else {
            parts
                .iter()
                .map(|p| self.naming.quote(p))
                .collect::<Vec<_>>()
                .join(".")
        };
        if star {
            text.push_str(".*");
        }
        out.push(Token::raw(text).spaced(tokens[i].space_before));
        j
    }

    fn rewrite_system_variable(&mut self, tokens: &[Token], i: usize, out: &mut Vec<Token>) -> usize {
        let token = &tokens[i];
        let sp = token.space_before;
        match token.upper().as_str() {
            "@@ROWCOUNT" => {
                self.uses_row_count = true;
                out.push(Token::raw("_row_count").spaced(sp));
                i + 1
            }
            "@@FETCH_STATUS" => {
                let op = tokens.get(i + 1);
                let value: Vec<&str> = tokens
                    .iter()
                    .skip(i + 2)
                    .take(2)
                    .map(|t| t.text.as_str())
                    .collect();
                match (op.map(|t| t.text.as_str()), value.as_slice()) {
                    (Some("="), ["0", ..]) => {
                        out.push(Token::raw("FOUND").spaced(sp));
                        i + 3
                    }
                    (Some("<>" | "!="), ["0", ..]) => {
                        out.push(Token::raw("NOT FOUND").spaced(sp));
                        i + 3
                    }
                    (Some("="), ["-", "1"]) => {
                        out.push(Token::raw("NOT FOUND").spaced(sp));
                        i + 4
                    }
                    _ => {
                        self.issue("unsupported @@FETCH_STATUS comparison");
                        out.push(token.clone());
                        i + 1
                    }
                }
            }
            "@@VERSION" => {
                out.push(Token::raw("version()").spaced(sp));
                i + 1
            }
            other => {
                self.issue(format!("system variable {}", other));
                out.push(token.clone());
                i + 1
            }
        }
    }

    fn rewrite_function(&mut self, tokens: &[Token], i: usize, out: &mut Vec<Token>) -> usize {
        let token = &tokens[i];
        let sp = token.space_before;
        let Some(close) = matching_paren(tokens, i + 1) else {
            self.issue("unbalanced parentheses");
            out.extend(tokens[i..].iter().cloned());
            return tokens.len();
        };
        let inner = &tokens[i + 2..close];
        let args = split_commas(inner);
        let name = token.upper();
        let end = close + 1;

        let replacement: Option<Vec<Token>> = match (name.as_str(), args.len()) {
            ("ISNULL", 2) => Some(call("COALESCE", sp, self.rewrite_args(&args))),
            ("LEN", 1) => {
                let arg = self.rewrite(args[0]);
                Some(call("LENGTH", sp, vec![call("RTRIM", false, vec![arg])]))
            }
            ("DATALENGTH", 1) => Some(call("OCTET_LENGTH", sp, self.rewrite_args(&args))),
            ("COUNT_BIG", _) => Some(call("COUNT", sp, self.rewrite_args(&args))),
            ("REPLICATE", 2) => Some(call("REPEAT", sp, self.rewrite_args(&args))),
            ("SPACE", 1) => {
                let n = self.rewrite(args[0]);
                Some(call("REPEAT", sp, vec![vec![Token::raw("' '")], n]))
            }
            ("GETDATE" | "SYSDATETIME" | "SYSDATETIMEOFFSET" | "CURRENT_TIMESTAMP", 0) => {
                Some(vec![Token::raw("CURRENT_TIMESTAMP").spaced(sp)])
            }
            ("GETUTCDATE" | "SYSUTCDATETIME", 0) => Some(vec![Token::raw(
                "(CURRENT_TIMESTAMP AT TIME ZONE 'UTC')",
            )
            .spaced(sp)]),
            ("NEWID" | "NEWSEQUENTIALID", 0) => Some(vec![Token::raw("gen_random_uuid()").spaced(sp)]),
            ("USER_NAME" | "SUSER_SNAME" | "SUSER_NAME", 0) => {
                Some(vec![Token::raw("CURRENT_USER").spaced(sp)])
            }
            ("ERROR_MESSAGE", 0) => Some(vec![Token::raw("SQLERRM").spaced(sp)]),
            ("CHARINDEX", 2) => {
                let mut rewritten = self.rewrite_args(&args);
                rewritten.swap(0, 1);
                Some(call("STRPOS", sp, rewritten))
            }
            ("CAST", _) => self.rewrite_cast(inner, sp),
            ("CONVERT", 2) => match self.map_type(args[0]) {
                Some(target) => {
                    let value = self.rewrite(args[1]);
                    Some(cast_tokens(value, &target, sp))
                }
                None => None,
            },
            ("CONVERT", _) => {
                self.issue("CONVERT with a style argument");
                None
            }
            ("IIF", 3) => {
                let rewritten = self.rewrite_args(&args);
                let mut out = vec![Token::raw("(CASE WHEN").spaced(sp)];
                let labels = ["THEN", "ELSE"];
                for (n, arg) in rewritten.into_iter().enumerate() {
                    if n > 0 {
                        out.push(Token::raw(labels[n - 1]));
                    }
                    out.extend(arg.into_iter().enumerate().map(|(k, t)| {
                        if k == 0 { t.spaced(true) } else { t }
                    }));
                }
                out.push(Token::raw("END)"));
                Some(out)
            }
            ("DATEADD", 3) => match date_part(args[0]) {
                Some(part) if part != "dow" && part != "doy" => {
                    let (unit, factor) = match part {
                        "quarter" => ("month", 3),
                        "week" => ("day", 7),
                        other => (other, 1),
                    };
                    let amount = render(&self.rewrite(args[1]));
                    let date = render(&self.rewrite(args[2]));
                    Some(vec![Token::raw(format!(
                        "({} + ({}) * INTERVAL '{} {}')",
                        date.trim(),
                        amount.trim(),
                        factor,
                        unit
                    ))
                    .spaced(sp)])
                }
                _ => {
                    self.issue("DATEADD with an unsupported date part");
                    None
                }
            },
            ("DATEPART", 2) => match date_part(args[0]) {
                Some(part) if part != "week" && part != "dow" => {
                    let date = render(&self.rewrite(args[1]));
                    Some(vec![Token::raw(format!(
                        "CAST(EXTRACT({} FROM {}) AS integer)",
                        part.to_uppercase(),
                        date.trim()
                    ))
                    .spaced(sp)])
                }
                _ => {
                    self.issue("DATEPART with a date part that depends on session settings");
                    None
                }
            },
            ("YEAR" | "MONTH" | "DAY", 1) => {
                let date = render(&self.rewrite(args[0]));
                Some(vec![Token::raw(format!(
                    "CAST(EXTRACT({} FROM {}) AS integer)",
                    name,
                    date.trim()
                ))
                .spaced(sp)])
            }
            ("DATEDIFF" | "DATEDIFF_BIG", _) => {
                self.issue("DATEDIFF counts boundary crossings; rewrite by hand");
                None
            }
            ("ROUND", 3) => {
                self.issue("ROUND with a truncation argument");
                None
            }
            (
                "SCOPE_IDENTITY" | "IDENT_CURRENT" | "OBJECT_ID" | "OBJECT_NAME" | "DB_NAME"
                | "DB_ID" | "HOST_NAME" | "APP_NAME" | "ERROR_NUMBER" | "ERROR_LINE"
                | "ERROR_SEVERITY" | "ERROR_STATE" | "ERROR_PROCEDURE" | "ISNUMERIC" | "ISDATE",
                _,
            )
            | (
                "TRY_CAST" | "TRY_CONVERT" | "TRY_PARSE" | "PARSE" | "FORMAT" | "STUFF"
                | "PATINDEX" | "DATENAME" | "EOMONTH" | "CHECKSUM" | "BINARY_CHECKSUM",
                _,
            )
            | (
                "OPENXML" | "OPENQUERY" | "OPENROWSET" | "OPENJSON" | "OPENDATASOURCE"
                | "CONTAINS" | "FREETEXT" | "CONTAINSTABLE" | "FREETEXTTABLE",
                _,
            ) => {
                self.issue(format!("{} has no safe translation", name));
                None
            }
            ("CHARINDEX", _) => {
                self.issue("CHARINDEX with a start position");
                None
            }
            _ => None,
        };

        match replacement {
            Some(tokens) => out.extend(tokens),
            None => {
                out.push(Token::raw(token.text.clone()).spaced(sp));
                out.push(tokens[i + 1].clone());
                out.extend(self.rewrite(inner));
                out.push(tokens[close].clone());
            }
        }
        end
    }

    fn rewrite_args(&mut self, args: &[&[Token]]) -> Vec<Vec<Token>> {
        args.iter().map(|a| self.rewrite(a)).collect()
    }

    fn rewrite_cast(&mut self, inner: &[Token], sp: bool) -> Option<Vec<Token>> {
        let Some(as_pos) = top_level(inner)
            .filter(|(_, t)| t.is_word("AS"))
            .map(|(i, _)| i)
            .last()
        else {
            self.issue("CAST without AS");
            return None;
        };
        let target = self.map_type(&inner[as_pos + 1..])?;
        let value = self.rewrite(&inner[..as_pos]);
        Some(cast_tokens(value, &target, sp))
    }

    /// Resolve a source type written inline (`nvarchar(50)`, `decimal(10, 2)`).
    pub fn map_type(&mut self, tokens: &[Token]) -> Option<String> {
        let Some(desc) = parse_type(tokens) else {
            self.issue(format!("cannot parse type '{}'", render(tokens)));
            return None;
        };
        match self.resolver.resolve(&desc) {
            Resolution::Resolved(resolved) => Some(resolved.target),
            Resolution::Unmappable { reason } => {
                self.issue(reason);
                None
            }
        }
    }
}

fn cast_tokens(value: Vec<Token>, target: &str, sp: bool) -> Vec<Token> {
    let mut out = vec![Token::raw("CAST").spaced(sp), lparen()];
    out.extend(
        value
            .into_iter()
            .enumerate()
            .map(|(k, t)| if k == 0 { t.spaced(false) } else { t }),
    );
    out.push(Token::raw("AS"));
    out.push(Token::raw(target.to_string()));
    out.push(rparen());
    out
}

fn is_table_hint(inner: &[Token]) -> bool {
    !inner.is_empty()
        && inner.iter().all(|t| {
            t.kind == TokenKind::Comma || (t.kind == TokenKind::Word && t.is_any_word(TABLE_HINTS))
        })
        && inner.iter().any(|t| t.kind == TokenKind::Word)
}

/// Parse a type written as tokens.
pub(crate) fn parse_type(tokens: &[Token]) -> Option<TypeDescriptor> {
    let (first, rest) = tokens.split_first()?;
    if !matches!(first.kind, TokenKind::Word | TokenKind::QuotedIdent) {
        return None;
    }
    let mut desc = TypeDescriptor::new(&first.text);
    if rest.is_empty() {
        return Some(desc);
    }
    if rest[0].kind != TokenKind::LParen || rest.last()?.kind != TokenKind::RParen {
        return None;
    }
    let params = split_commas(&rest[1..rest.len() - 1]);
    let number = |part: &[Token]| -> Option<i64> {
        match part {
            [t] if t.kind == TokenKind::Number => t.text.parse().ok(),
            [t] if t.is_word("max") => Some(-1),
            _ => None,
        }
    };
    let values: Vec<i64> = params.iter().map(|p| number(*p)).collect::<Option<_>>()?;
    let family = TypeFamily::of(&desc.name);
    match (family, values.as_slice()) {
        (TypeFamily::Decimal, [p]) => desc = desc.with_precision(u8::try_from(*p).ok()?, 0),
        (TypeFamily::Decimal, [p, s]) => {
            desc = desc.with_precision(u8::try_from(*p).ok()?, u8::try_from(*s).ok()?)
        }
        (TypeFamily::Float | TypeFamily::Datetime, [p]) => {
            desc.precision = Some(u8::try_from(*p).ok()?);
        }
        (_, [len]) => desc = desc.with_length(i32::try_from(*len).ok()?),
        _ => return None,
    }
    Some(desc)
}

/// Normalized date part name.
fn date_part(tokens: &[Token]) -> Option<&'static str> {
    let [token] = tokens else {
        return None;
    };
    let part = match token.text.to_lowercase().as_str() {
        "year" | "yy" | "yyyy" => "year",
        "quarter" | "qq" | "q" => "quarter",
        "month" | "mm" | "m" => "month",
        "dayofyear" | "dy" | "y" => "doy",
        "day" | "dd" | "d" => "day",
        "week" | "wk" | "ww" => "week",
        "weekday" | "dw" => "dow",
        "hour" | "hh" => "hour",
        "minute" | "mi" | "n" => "minute",
        "second" | "ss" | "s" => "second",
        _ => return None,
    };
    Some(part)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    pub(crate) struct MapScope(pub HashMap<String, (String, bool)>);

    impl VariableScope for MapScope {
        fn lookup(&self, name: &str) -> Option<(String, bool)> {
            self.0.get(&name.to_lowercase()).cloned()
        }
    }

    fn rewrite(sql: &str) -> (String, Vec<String>) {
        let naming = NamingPolicy::default();
        let resolver = Resolver::builtin();
        let mut rw = ExprRewriter::new(&naming, &resolver);
        let out = rw.rewrite_sql(sql);
        (out, rw.issues)
    }

    #[test]
    fn test_identifiers_and_functions() {
        let (out, issues) = rewrite("SELECT ISNULL([Name], N'n/a') AS nm, LEN(o.Note) FROM dbo.Orders o");
        assert!(issues.is_empty(), "{issues:?}");
        assert_eq!(
            out,
            "SELECT COALESCE(\"name\", 'n/a') AS \"nm\", LENGTH(RTRIM(\"o\".\"note\")) FROM \"public\".\"orders\" \"o\""
        );
    }

    #[test]
    fn test_top_becomes_limit() {
        let (out, issues) = rewrite("SELECT TOP 10 id FROM t ORDER BY id DESC");
        assert!(issues.is_empty());
        assert_eq!(out, "SELECT \"id\" FROM \"t\" ORDER BY \"id\" DESC LIMIT 10");

        let (out, _) = rewrite("SELECT DISTINCT TOP (5) a FROM t");
        assert_eq!(out, "SELECT DISTINCT \"a\" FROM \"t\" LIMIT 5");
    }

    #[test]
    fn test_top_in_subquery_stays_inside() {
        let (out, issues) = rewrite("SELECT a FROM t WHERE id IN (SELECT TOP 3 id FROM u)");
        assert!(issues.is_empty());
        assert_eq!(
            out,
            "SELECT \"a\" FROM \"t\" WHERE \"id\" IN (SELECT \"id\" FROM \"u\" LIMIT 3)"
        );
    }

    #[test]
    fn test_niladic_and_cast() {
        let (out, issues) =
            rewrite("SELECT GETDATE(), NEWID(), CAST(x AS nvarchar(20)), CONVERT(int, y)");
        assert!(issues.is_empty(), "{issues:?}");
        assert_eq!(
            out,
            "SELECT CURRENT_TIMESTAMP, gen_random_uuid(), CAST(\"x\" AS varchar(20)), CAST(\"y\" AS integer)"
        );
    }

    #[test]
    fn test_hints_removed_and_charindex_swapped() {
        let (out, issues) = rewrite("SELECT CHARINDEX('a', s) FROM t WITH (NOLOCK)");
        assert!(issues.is_empty());
        assert_eq!(out, "SELECT STRPOS(\"s\", 'a') FROM \"t\"");
    }

    #[test]
    fn test_unsafe_constructs_flagged() {
        for sql in [
            "SELECT * FROM t CROSS APPLY f(t.id)",
            "SELECT a FROM t FOR XML PATH('')",
            "SELECT DATEDIFF(day, a, b) FROM t",
            "SELECT * FROM #work",
            "SELECT TOP 50 PERCENT a FROM t",
            "SELECT SCOPE_IDENTITY()",
            "SELECT @@ERROR",
            "SELECT a FROM other_db.dbo.t",
        ] {
            let (_, issues) = rewrite(sql);
            assert!(!issues.is_empty(), "expected an issue for {sql}");
        }
    }

    #[test]
    fn test_variables_and_concatenation() {
        let naming = NamingPolicy::default();
        let resolver = Resolver::builtin();
        let scope = MapScope(HashMap::from([
            ("@name".to_string(), ("v_name".to_string(), true)),
            ("@n".to_string(), ("v_n".to_string(), false)),
        ]));
        let mut rw = ExprRewriter::new(&naming, &resolver).with_scope(&scope);
        let out = rw.rewrite_sql("'Hello ' + @name");
        assert_eq!(out, "'Hello ' || v_name");
        let out = rw.rewrite_sql("@n + 1");
        assert_eq!(out, "v_n + 1");
        let out = rw.rewrite_sql("@missing");
        assert_eq!(out, "@missing");
        assert_eq!(rw.issues, vec!["undeclared variable @missing".to_string()]);
    }

    #[test]
    fn test_fetch_status_and_rowcount() {
        let naming = NamingPolicy::default();
        let resolver = Resolver::builtin();
        let scope = MapScope(HashMap::new());
        let mut rw = ExprRewriter::new(&naming, &resolver).with_scope(&scope);
        assert_eq!(rw.rewrite_sql("@@FETCH_STATUS = 0"), "FOUND");
        assert_eq!(rw.rewrite_sql("@@FETCH_STATUS <> 0"), "NOT FOUND");
        assert_eq!(rw.rewrite_sql("@@ROWCOUNT > 0"), "_row_count > 0");
        assert!(rw.uses_row_count);
        assert!(rw.issues.is_empty());
    }

    #[test]
    fn test_date_functions() {
        let (out, issues) = rewrite("SELECT DATEADD(day, 7, created), DATEPART(yy, created)");
        assert!(issues.is_empty(), "{issues:?}");
        assert_eq!(
            out,
            "SELECT (\"created\" + (7) * INTERVAL '1 day'), CAST(EXTRACT(YEAR FROM \"created\") AS integer)"
        );
    }

    #[test]
    fn test_parse_type() {
        let tokens = tokenize("decimal(10, 2)").unwrap();
        assert_eq!(parse_type(&tokens), Some(TypeDescriptor::new("decimal").with_precision(10, 2)));
        let tokens = tokenize("NVARCHAR(MAX)").unwrap();
        assert_eq!(parse_type(&tokens), Some(TypeDescriptor::new("nvarchar").with_length(-1)));
        let tokens = tokenize("int").unwrap();
        assert_eq!(parse_type(&tokens), Some(TypeDescriptor::new("int")));
    }
}
