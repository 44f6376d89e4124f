//! Statement-level parser for T-SQL routine bodies.
//!
//! The body is decomposed into the statement patterns the PL/pgSQL emitter
//! knows how to rewrite. Anything else is a parse error, which marks the
//! routine for manual review.

use super::expr::{matching_paren, split_commas, top_level};
use super::lexer::{Token, TokenKind};

pub(crate) type Tokens = Vec<Token>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct VarDecl {
    /// Including the leading `@`.
    pub name: String,
    pub type_tokens: Tokens,
    pub init: Option<Tokens>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CallArg {
    /// Parameter name including `@`, for `@p = value` arguments.
    pub name: Option<String>,
    pub value: Tokens,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Assignment {
    pub var: String,
    /// Compound operator (`+` for `+=`), `None` for plain `=`.
    pub op: Option<char>,
    pub value: Tokens,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Stmt {
    Declare(Vec<VarDecl>),
    DeclareCursor { name: String, query: Tokens },
    Assign(Assignment),
    /// `SELECT @a = x, @b = y [FROM ...]`
    SelectAssign { targets: Vec<Assignment>, tail: Tokens },
    If { cond: Tokens, then_branch: Vec<Stmt>, else_branch: Option<Vec<Stmt>> },
    While { cond: Tokens, body: Vec<Stmt> },
    Break,
    Continue,
    Block(Vec<Stmt>),
    Open(String),
    Fetch { cursor: String, into: Vec<String> },
    Close(String),
    Deallocate(String),
    TryCatch { body: Vec<Stmt>, handler: Vec<Stmt> },
    ExecDynamic(Tokens),
    Call { name: Tokens, args: Vec<CallArg> },
    BeginTran,
    Commit,
    Rollback,
    Return(Option<Tokens>),
    Print(Tokens),
    Raise { message: Tokens, notice: bool },
    Rethrow,
    Dml(Tokens),
    SessionOption,
}

const STATEMENT_START: &[&str] = &[
    "BEGIN", "BREAK", "CLOSE", "COMMIT", "CONTINUE", "DEALLOCATE", "DECLARE", "DELETE", "ELSE",
    "END", "EXEC", "EXECUTE", "FETCH", "GOTO", "IF", "INSERT", "MERGE", "OPEN", "PRINT",
    "RAISERROR", "RETURN", "ROLLBACK", "SAVE", "SELECT", "SET", "THROW", "TRUNCATE", "UPDATE",
    "WAITFOR", "WHILE", "WITH",
];

const SESSION_OPTIONS: &[&str] = &[
    "NOCOUNT", "XACT_ABORT", "ANSI_NULLS", "ANSI_PADDING", "ANSI_WARNINGS", "ARITHABORT",
    "CONCAT_NULL_YIELDS_NULL", "QUOTED_IDENTIFIER", "NUMERIC_ROUNDABORT", "ON", "OFF",
];

const SELECT_ITEM_STOPS: &[&str] = &["FROM", "WHERE", "GROUP", "ORDER", "HAVING", "UNION", "INTO"];

/// Parse a routine body into statements.
pub(crate) fn parse_body(tokens: &[Token]) -> Result<Vec<Stmt>, String> {
    let mut parser = Parser { tokens, pos: 0 };
    let mut stmts = Vec::new();
    while parser.skip_semicolons() {
        stmts.push(parser.statement()?);
    }
    Ok(stmts)
}

/// State for deciding whether a statement keyword continues the current
/// statement (`INSERT ... SELECT`, `UPDATE ... SET`, CTE bodies).
struct StatementState {
    main: String,
    cte_open: bool,
    seen_select: bool,
    seen_values: bool,
    seen_set: bool,
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&'t Token> {
        self.tokens.get(self.pos + offset)
    }

    fn peek_word(&self, word: &str) -> bool {
        self.peek().is_some_and(|t| t.is_word(word))
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }

    fn expect_word(&mut self, word: &str) -> Result<(), String> {
        match self.advance() {
            Some(t) if t.is_word(word) => Ok(()),
            Some(t) => Err(format!("expected {} but found '{}'", word, t.text)),
            None => Err(format!("expected {} at end of body", word)),
        }
    }

    fn expect_name(&mut self, what: &str) -> Result<String, String> {
        match self.advance() {
            Some(t) if matches!(t.kind, TokenKind::Word | TokenKind::QuotedIdent) => {
                Ok(t.text.clone())
            }
            Some(t) => Err(format!("expected {} name but found '{}'", what, t.text)),
            None => Err(format!("expected {} name at end of body", what)),
        }
    }

    /// Skip semicolons; false at end of input.
    fn skip_semicolons(&mut self) -> bool {
        while self.peek().is_some_and(|t| t.kind == TokenKind::Semicolon) {
            self.pos += 1;
        }
        self.pos < self.tokens.len()
    }

    fn at_boundary(&self) -> bool {
        match self.peek() {
            None => true,
            Some(t) if t.kind == TokenKind::Semicolon => true,
            Some(t) => t.is_any_word(STATEMENT_START),
        }
    }

    fn statement(&mut self) -> Result<Stmt, String> {
        let token = self.peek().ok_or("unexpected end of body")?;
        if token.kind != TokenKind::Word {
            return Err(format!("unrecognized statement starting with '{}'", token.text));
        }
        match token.upper().as_str() {
            "BEGIN" => self.begin(),
            "DECLARE" => self.declare(),
            "SET" => self.set(),
            "SELECT" => self.select(),
            "INSERT" | "UPDATE" | "DELETE" | "WITH" | "TRUNCATE" => {
                Ok(Stmt::Dml(self.collect_statement()))
            }
            "IF" => {
                self.pos += 1;
                let cond = self.collect_expression(false, &[]);
                if cond.is_empty() {
                    return Err("IF without a condition".into());
                }
                let then_branch = self.branch()?;
                let save = self.pos;
                self.skip_semicolons();
                let else_branch = if self.peek_word("ELSE") {
                    self.pos += 1;
                    Some(self.branch()?)
                } else {
                    self.pos = save;
                    None
                };
                Ok(Stmt::If {
                    cond,
                    then_branch,
                    else_branch,
                })
            }
            "WHILE" => {
                self.pos += 1;
                let cond = self.collect_expression(false, &[]);
                if cond.is_empty() {
                    return Err("WHILE without a condition".into());
                }
                let body = self.branch()?;
                Ok(Stmt::While { cond, body })
            }
            "BREAK" => {
                self.pos += 1;
                Ok(Stmt::Break)
            }
            "CONTINUE" => {
                self.pos += 1;
                Ok(Stmt::Continue)
            }
            "OPEN" => {
                self.pos += 1;
                Ok(Stmt::Open(self.expect_name("cursor")?))
            }
            "CLOSE" => {
                self.pos += 1;
                Ok(Stmt::Close(self.expect_name("cursor")?))
            }
            "DEALLOCATE" => {
                self.pos += 1;
                Ok(Stmt::Deallocate(self.expect_name("cursor")?))
            }
            "FETCH" => self.fetch(),
            "EXEC" | "EXECUTE" => self.exec(),
            "COMMIT" | "ROLLBACK" => self.transaction_end(),
            "RETURN" => {
                self.pos += 1;
                if self.at_boundary() {
                    Ok(Stmt::Return(None))
                } else {
                    Ok(Stmt::Return(Some(self.collect_expression(false, &[]))))
                }
            }
            "PRINT" => {
                self.pos += 1;
                Ok(Stmt::Print(self.collect_expression(false, &[])))
            }
            "RAISERROR" => self.raiserror(),
            "THROW" => {
                self.pos += 1;
                if self.at_boundary() {
                    return Ok(Stmt::Rethrow);
                }
                let args = self.collect_expression(false, &[]);
                let parts = split_commas(&args);
                if parts.len() != 3 {
                    return Err("THROW expects error number, message and state".into());
                }
                Ok(Stmt::Raise {
                    message: parts[1].to_vec(),
                    notice: false,
                })
            }
            other => Err(format!("unsupported statement {}", other)),
        }
    }

    /// Body of IF/ELSE/WHILE: a single statement, usually a BEGIN block.
    fn branch(&mut self) -> Result<Vec<Stmt>, String> {
        if !self.skip_semicolons() {
            return Err("missing statement after condition".into());
        }
        match self.statement()? {
            Stmt::Block(stmts) => Ok(stmts),
            stmt => Ok(vec![stmt]),
        }
    }

    fn block_until(&mut self, end: &[&str]) -> Result<Vec<Stmt>, String> {
        let mut stmts = Vec::new();
        loop {
            if !self.skip_semicolons() {
                return Err(format!("missing {}", end.join(" ")));
            }
            let closes = end
                .iter()
                .enumerate()
                .all(|(k, w)| self.peek_at(k).is_some_and(|t| t.is_word(w)));
            if closes {
                self.pos += end.len();
                return Ok(stmts);
            }
            stmts.push(self.statement()?);
        }
    }

    fn begin(&mut self) -> Result<Stmt, String> {
        self.pos += 1;
        match self.peek() {
            Some(t) if t.is_any_word(&["TRAN", "TRANSACTION"]) => {
                self.pos += 1;
                self.skip_transaction_name();
                Ok(Stmt::BeginTran)
            }
            Some(t) if t.is_word("TRY") => {
                self.pos += 1;
                let body = self.block_until(&["END", "TRY"])?;
                self.skip_semicolons();
                self.expect_word("BEGIN")?;
                self.expect_word("CATCH")?;
                let handler = self.block_until(&["END", "CATCH"])?;
                Ok(Stmt::TryCatch { body, handler })
            }
            Some(t) if t.is_word("DISTRIBUTED") => Err("distributed transactions".into()),
            _ => Ok(Stmt::Block(self.block_until(&["END"])?)),
        }
    }

    fn skip_transaction_name(&mut self) {
        if let Some(t) = self.peek() {
            let is_name = (t.kind == TokenKind::Word && !t.is_any_word(STATEMENT_START))
                || t.kind == TokenKind::Variable;
            if is_name {
                self.pos += 1;
            }
        }
    }

    fn transaction_end(&mut self) -> Result<Stmt, String> {
        let rollback = self.advance().is_some_and(|t| t.is_word("ROLLBACK"));
        if self.peek().is_some_and(|t| t.is_any_word(&["TRAN", "TRANSACTION", "WORK"])) {
            self.pos += 1;
        }
        let named = self.peek().is_some_and(|t| {
            (t.kind == TokenKind::Word && !t.is_any_word(STATEMENT_START))
                || t.kind == TokenKind::Variable
        });
        if rollback {
            if named {
                return Err("ROLLBACK to a named transaction or savepoint".into());
            }
            Ok(Stmt::Rollback)
        } else {
            if named {
                self.pos += 1;
            }
            Ok(Stmt::Commit)
        }
    }

    fn declare(&mut self) -> Result<Stmt, String> {
        self.pos += 1;
        if let (Some(name), Some(next)) = (self.peek(), self.peek_at(1)) {
            if matches!(name.kind, TokenKind::Word | TokenKind::QuotedIdent) && next.is_word("CURSOR")
            {
                let name = name.text.clone();
                self.pos += 2;
                while let Some(t) = self.peek() {
                    if t.is_word("FOR") || t.kind != TokenKind::Word {
                        break;
                    }
                    self.pos += 1;
                }
                self.expect_word("FOR")?;
                if !self.peek_word("SELECT") {
                    return Err(format!("cursor {} must be declared over a SELECT", name));
                }
                let query = self.collect_statement();
                return Ok(Stmt::DeclareCursor { name, query });
            }
        }

        let mut decls = Vec::new();
        loop {
            let var = match self.advance() {
                Some(t) if t.kind == TokenKind::Variable => t.text.clone(),
                Some(t) => return Err(format!("expected variable after DECLARE, found '{}'", t.text)),
                None => return Err("DECLARE without a variable".into()),
            };
            if self.peek_word("AS") {
                self.pos += 1;
            }
            if self.peek_word("TABLE") {
                return Err(format!("table variable {}", var));
            }
            if self.peek_word("CURSOR") {
                return Err(format!("cursor variable {}", var));
            }
            let type_start = self.pos;
            match self.advance() {
                Some(t) if matches!(t.kind, TokenKind::Word | TokenKind::QuotedIdent) => {}
                _ => return Err(format!("missing type for {}", var)),
            }
            if self.peek().is_some_and(|t| t.kind == TokenKind::LParen) {
                let close = matching_paren(self.tokens, self.pos)
                    .ok_or_else(|| format!("unbalanced type parameters for {}", var))?;
                self.pos = close + 1;
            }
            let type_tokens = self.tokens[type_start..self.pos].to_vec();
            let init = if self.peek().is_some_and(|t| t.is_symbol("=")) {
                self.pos += 1;
                Some(self.collect_expression(true, &[]))
            } else {
                None
            };
            decls.push(VarDecl {
                name: var,
                type_tokens,
                init,
            });
            if self.peek().is_some_and(|t| t.kind == TokenKind::Comma) {
                self.pos += 1;
                continue;
            }
            break;
        }
        Ok(Stmt::Declare(decls))
    }

    fn assignment_op(&mut self, var: &str) -> Result<Option<char>, String> {
        match self.advance() {
            Some(t) if t.kind == TokenKind::Symbol => match t.text.as_str() {
                "=" => Ok(None),
                "+=" => Ok(Some('+')),
                "-=" => Ok(Some('-')),
                "*=" => Ok(Some('*')),
                "/=" => Ok(Some('/')),
                other => Err(format!("unsupported assignment operator {} for {}", other, var)),
            },
            _ => Err(format!("expected assignment to {}", var)),
        }
    }

    fn set(&mut self) -> Result<Stmt, String> {
        self.pos += 1;
        let token = self.advance().ok_or("SET without a target")?;
        match token.kind {
            TokenKind::Variable => {
                let var = token.text.clone();
                let op = self.assignment_op(&var)?;
                if self.peek_word("CURSOR") {
                    return Err(format!("cursor variable {}", var));
                }
                let value = self.collect_expression(false, &[]);
                if value.is_empty() {
                    return Err(format!("SET {} without a value", var));
                }
                Ok(Stmt::Assign(Assignment { var, op, value }))
            }
            TokenKind::Word if token.is_any_word(SESSION_OPTIONS) => {
                while let Some(t) = self.peek() {
                    if t.kind == TokenKind::Comma || t.is_any_word(SESSION_OPTIONS) {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                Ok(Stmt::SessionOption)
            }
            _ => Err(format!("unsupported SET {}", token.text)),
        }
    }

    fn select(&mut self) -> Result<Stmt, String> {
        let assigns = self.peek_at(1).is_some_and(|t| t.kind == TokenKind::Variable)
            && self.peek_at(2).is_some_and(|t| {
                t.kind == TokenKind::Symbol && matches!(t.text.as_str(), "=" | "+=" | "-=" | "*=" | "/=")
            });
        if !assigns {
            return Ok(Stmt::Dml(self.collect_statement()));
        }

        self.pos += 1;
        let mut targets = Vec::new();
        loop {
            let var = match self.advance() {
                Some(t) if t.kind == TokenKind::Variable => t.text.clone(),
                _ => return Err("SELECT mixes variable assignment and result columns".into()),
            };
            let op = self.assignment_op(&var)?;
            let value = self.collect_expression(true, SELECT_ITEM_STOPS);
            if value.is_empty() {
                return Err(format!("SELECT {} without a value", var));
            }
            targets.push(Assignment { var, op, value });
            if self.peek().is_some_and(|t| t.kind == TokenKind::Comma) {
                self.pos += 1;
                continue;
            }
            break;
        }

        let start = self.pos;
        if self.peek().is_some_and(|t| t.is_any_word(SELECT_ITEM_STOPS)) {
            self.scan_statement(StatementState::new("SELECT"));
        }
        let tail = self.tokens[start..self.pos].to_vec();
        if top_level(&tail).any(|(_, t)| t.is_any_word(&["UNION", "INTO", "EXCEPT", "INTERSECT"])) {
            return Err("variable assignment from a compound SELECT".into());
        }
        Ok(Stmt::SelectAssign { targets, tail })
    }

    fn fetch(&mut self) -> Result<Stmt, String> {
        self.pos += 1;
        if self.peek_word("NEXT") {
            self.pos += 1;
        } else if self
            .peek()
            .is_some_and(|t| t.is_any_word(&["PRIOR", "FIRST", "LAST", "ABSOLUTE", "RELATIVE"]))
        {
            return Err("scrollable cursor fetch".into());
        }
        if self.peek_word("FROM") {
            self.pos += 1;
        }
        let cursor = self.expect_name("cursor")?;
        self.expect_word("INTO")?;
        let mut into = Vec::new();
        loop {
            match self.advance() {
                Some(t) if t.kind == TokenKind::Variable => into.push(t.text.clone()),
                _ => return Err(format!("FETCH from {} into a non-variable", cursor)),
            }
            if self.peek().is_some_and(|t| t.kind == TokenKind::Comma) {
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(Stmt::Fetch { cursor, into })
    }

    fn exec(&mut self) -> Result<Stmt, String> {
        self.pos += 1;
        let token = self.peek().ok_or("EXEC without a target")?;
        match token.kind {
            TokenKind::LParen => {
                let close = matching_paren(self.tokens, self.pos).ok_or("unbalanced EXEC (...)")?;
                let sql = self.tokens[self.pos + 1..close].to_vec();
                self.pos = close + 1;
                return Ok(Stmt::ExecDynamic(sql));
            }
            TokenKind::Variable if self.peek_at(1).is_some_and(|t| t.is_symbol("=")) => {
                return Err("EXEC capturing a return status".into());
            }
            TokenKind::Variable => {
                return Err("EXEC of a procedure named by a variable".into());
            }
            _ => {}
        }

        let name_start = self.pos;
        self.expect_name("procedure")?;
        while self.peek().is_some_and(|t| t.kind == TokenKind::Dot) {
            self.pos += 1;
            self.expect_name("procedure")?;
        }
        let name = self.tokens[name_start..self.pos].to_vec();
        let args = self.exec_args()?;

        let is_executesql = name
            .last()
            .is_some_and(|t| t.text.eq_ignore_ascii_case("sp_executesql"));
        if is_executesql {
            return match args.as_slice() {
                [CallArg { name: None, value }] => Ok(Stmt::ExecDynamic(value.clone())),
                _ => Err("sp_executesql with parameters".into()),
            };
        }
        Ok(Stmt::Call { name, args })
    }

    fn exec_args(&mut self) -> Result<Vec<CallArg>, String> {
        let mut args = Vec::new();
        while !self.at_boundary() {
            let name = match (self.peek(), self.peek_at(1)) {
                (Some(v), Some(eq)) if v.kind == TokenKind::Variable && eq.is_symbol("=") => {
                    self.pos += 2;
                    Some(v.text.clone())
                }
                _ => None,
            };
            let value = self.collect_expression(true, &["OUTPUT", "OUT"]);
            if self.peek().is_some_and(|t| t.is_any_word(&["OUTPUT", "OUT"])) {
                return Err("OUTPUT argument in EXEC".into());
            }
            if value.is_empty() {
                return Err("empty EXEC argument".into());
            }
            args.push(CallArg { name, value });
            if self.peek().is_some_and(|t| t.kind == TokenKind::Comma) {
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(args)
    }

    fn raiserror(&mut self) -> Result<Stmt, String> {
        self.pos += 1;
        if !self.peek().is_some_and(|t| t.kind == TokenKind::LParen) {
            return Err("RAISERROR without parentheses".into());
        }
        let close = matching_paren(self.tokens, self.pos).ok_or("unbalanced RAISERROR")?;
        let inner = &self.tokens[self.pos + 1..close];
        self.pos = close + 1;
        let args = split_commas(inner);
        if args.len() < 3 {
            return Err("RAISERROR expects message, severity and state".into());
        }
        if args.len() > 3 {
            return Err("RAISERROR with substitution arguments".into());
        }
        if matches!(args[0], [t] if t.kind == TokenKind::Number) {
            return Err("RAISERROR with a message number".into());
        }
        let severity: i64 = match args[1] {
            [t] if t.kind == TokenKind::Number => t.text.parse().map_err(|_| "bad severity")?,
            _ => return Err("RAISERROR with a computed severity".into()),
        };
        if self.peek_word("WITH") {
            self.pos += 1;
            while let Some(t) = self.peek() {
                if t.kind == TokenKind::Comma || t.is_any_word(&["NOWAIT", "LOG", "SETERROR"]) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        Ok(Stmt::Raise {
            message: args[0].to_vec(),
            notice: severity <= 10,
        })
    }

    /// Collect a full statement starting at the current keyword.
    fn collect_statement(&mut self) -> Tokens {
        let start = self.pos;
        let lead = self.peek().map(|t| t.upper()).unwrap_or_default();
        self.pos += 1;
        self.scan_statement(StatementState::new(&lead));
        self.tokens[start..self.pos].to_vec()
    }

    fn scan_statement(&mut self, mut state: StatementState) {
        let mut depth = 0usize;
        let mut case_depth = 0usize;
        let mut prev_word = state.main.clone();
        while let Some(token) = self.peek() {
            match token.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                TokenKind::Semicolon if depth == 0 => break,
                TokenKind::Word if depth == 0 => {
                    let word = token.upper();
                    if word == "CASE" {
                        case_depth += 1;
                    } else if word == "END" && case_depth > 0 {
                        case_depth -= 1;
                    } else if word == "VALUES" {
                        state.seen_values = true;
                    } else if case_depth == 0
                        && token.is_any_word(STATEMENT_START)
                        && !self.continues(&word, &prev_word, &mut state)
                    {
                        break;
                    }
                    prev_word = word;
                }
                _ => {}
            }
            self.pos += 1;
        }
    }

    /// Whether a statement keyword at the top level belongs to the current statement.
    fn continues(&self, word: &str, prev_word: &str, state: &mut StatementState) -> bool {
        match word {
            "SELECT" => {
                if matches!(prev_word, "UNION" | "ALL" | "EXCEPT" | "INTERSECT") {
                    return true;
                }
                if state.cte_open {
                    state.cte_open = false;
                    state.main = "SELECT".into();
                    return true;
                }
                if state.main == "INSERT" && !state.seen_select && !state.seen_values {
                    state.seen_select = true;
                    return true;
                }
                false
            }
            "INSERT" | "UPDATE" | "DELETE" if state.cte_open => {
                state.cte_open = false;
                state.main = word.to_string();
                true
            }
            "SET" if state.main == "UPDATE" && !state.seen_set => {
                state.seen_set = true;
                true
            }
            "FETCH" => matches!(prev_word, "ROWS" | "ROW"),
            "WITH" => self
                .peek_at(1)
                .is_some_and(|t| t.kind == TokenKind::LParen || t.is_word("TIES")),
            "EXEC" | "EXECUTE" => {
                state.main == "INSERT" && !state.seen_select && !state.seen_values
            }
            _ => false,
        }
    }

    /// Collect an expression up to a statement boundary.
    fn collect_expression(&mut self, stop_at_comma: bool, stops: &[&str]) -> Tokens {
        let start = self.pos;
        let mut depth = 0usize;
        let mut case_depth = 0usize;
        while let Some(token) = self.peek() {
            match token.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                TokenKind::Semicolon if depth == 0 => break,
                TokenKind::Comma if depth == 0 && stop_at_comma => break,
                TokenKind::Word if depth == 0 => {
                    if token.is_word("CASE") {
                        case_depth += 1;
                    } else if token.is_word("END") && case_depth > 0 {
                        case_depth -= 1;
                    } else if case_depth == 0
                        && (token.is_any_word(STATEMENT_START) || token.is_any_word(stops))
                    {
                        break;
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }
        self.tokens[start..self.pos].to_vec()
    }
}

impl StatementState {
    fn new(lead: &str) -> Self {
        Self {
            main: lead.to_string(),
            cte_open: lead == "WITH",
            seen_select: lead == "SELECT",
            seen_values: false,
            seen_set: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::lexer::{render, tokenize};

    fn parse(sql: &str) -> Vec<Stmt> {
        parse_body(&tokenize(sql).unwrap()).unwrap()
    }

    fn parse_err(sql: &str) -> String {
        parse_body(&tokenize(sql).unwrap()).unwrap_err()
    }

    #[test]
    fn test_statement_boundaries_without_semicolons() {
        let stmts = parse(
            "DECLARE @n int = 0
             SET NOCOUNT ON
             INSERT INTO t (a) SELECT a FROM u UNION ALL SELECT a FROM v
             UPDATE t SET a = CASE WHEN a > 1 THEN 1 ELSE 0 END WHERE a IS NULL
             SELECT @n = COUNT(*) FROM t
             PRINT @n",
        );
        assert_eq!(stmts.len(), 6);
        assert!(matches!(stmts[1], Stmt::SessionOption));
        match &stmts[2] {
            Stmt::Dml(tokens) => {
                assert_eq!(render(tokens), "INSERT INTO t (a) SELECT a FROM u UNION ALL SELECT a FROM v")
            }
            other => panic!("unexpected {other:?}"),
        }
        match &stmts[3] {
            Stmt::Dml(tokens) => assert!(render(tokens).ends_with("WHERE a IS NULL")),
            other => panic!("unexpected {other:?}"),
        }
        match &stmts[4] {
            Stmt::SelectAssign { targets, tail } => {
                assert_eq!(targets.len(), 1);
                assert_eq!(render(tail), "FROM t");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_if_else_and_while() {
        let stmts = parse(
            "IF @a > 0 BEGIN SET @b = 1; END ELSE SET @b = 2;
             WHILE @i < 10 BEGIN SET @i += 1 IF @i = 5 BREAK END",
        );
        assert_eq!(stmts.len(), 2);
        match &stmts[0] {
            Stmt::If {
                then_branch,
                else_branch: Some(else_branch),
                ..
            } => {
                assert_eq!(then_branch.len(), 1);
                assert_eq!(else_branch.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &stmts[1] {
            Stmt::While { body, .. } => {
                assert_eq!(body.len(), 2);
                assert!(matches!(&body[0], Stmt::Assign(a) if a.op == Some('+')));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cursor_loop_and_try_catch() {
        let stmts = parse(
            "DECLARE c CURSOR LOCAL FAST_FORWARD FOR SELECT id FROM t
             BEGIN TRY
               OPEN c
               FETCH NEXT FROM c INTO @id
               WHILE @@FETCH_STATUS = 0 BEGIN FETCH NEXT FROM c INTO @id END
               CLOSE c DEALLOCATE c
             END TRY
             BEGIN CATCH
               THROW;
             END CATCH",
        );
        assert_eq!(stmts.len(), 2);
        assert!(matches!(&stmts[0], Stmt::DeclareCursor { name, .. } if name == "c"));
        match &stmts[1] {
            Stmt::TryCatch { body, handler } => {
                assert_eq!(body.len(), 5);
                assert_eq!(handler, &vec![Stmt::Rethrow]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_exec_forms() {
        let stmts = parse("EXEC dbo.usp_log @msg = 'x', 5 EXEC sp_executesql @sql EXEC (@sql)");
        assert_eq!(stmts.len(), 3);
        match &stmts[0] {
            Stmt::Call { name, args } => {
                assert_eq!(render(name), "dbo.usp_log");
                assert_eq!(args.len(), 2);
                assert_eq!(args[0].name.as_deref(), Some("@msg"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(stmts[1], Stmt::ExecDynamic(_)));
        assert!(matches!(stmts[2], Stmt::ExecDynamic(_)));
    }

    #[test]
    fn test_raiserror_severity() {
        let stmts = parse("RAISERROR('careful', 10, 1) RAISERROR('bad', 16, 1) WITH NOWAIT");
        assert!(matches!(&stmts[0], Stmt::Raise { notice: true, .. }));
        assert!(matches!(&stmts[1], Stmt::Raise { notice: false, .. }));
    }

    #[test]
    fn test_unsupported_constructs() {
        assert!(parse_err("DECLARE @t TABLE (id int)").contains("table variable"));
        assert!(parse_err("GOTO done").contains("GOTO"));
        assert!(parse_err("EXEC dbo.p @x OUTPUT").contains("OUTPUT"));
        assert!(parse_err("RAISERROR('%d rows', 16, 1, @n)").contains("substitution"));
        assert!(parse_err("ROLLBACK TRAN save1").contains("savepoint"));
    }
}
