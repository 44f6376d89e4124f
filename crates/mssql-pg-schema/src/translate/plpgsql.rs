//! T-SQL routine to PL/pgSQL translation.

use super::expr::{parse_type, top_level, ExprRewriter, VariableScope};
use super::lexer::{render, tokenize, Token, TokenKind};
use super::routine::{parse_body, Assignment, CallArg, Stmt, Tokens, VarDecl};
use crate::catalog::{QualifiedName, RoutineDef, RoutineType};
use crate::resolver::{
    translate_default, MappingAuditRecord, NamingPolicy, Resolution, Resolver, TypeFamily,
};
use std::collections::HashMap;
use std::fmt::Write as _;

/// Result of translating one routine. `sql` is `None` whenever any issue
/// was found.
#[derive(Debug, Default)]
pub(crate) struct RoutineOutput {
    pub sql: Option<String>,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Default)]
struct Variables {
    /// Lowercased `@name` -> (target name, holds text)
    map: HashMap<String, (String, bool)>,
}

impl VariableScope for Variables {
    fn lookup(&self, name: &str) -> Option<(String, bool)> {
        self.map.get(&name.to_lowercase()).cloned()
    }
}

pub(crate) fn translate_routine(
    name: &QualifiedName,
    routine: &RoutineDef,
    naming: &NamingPolicy,
    resolver: &Resolver,
    audit: &mut Vec<MappingAuditRecord>,
) -> RoutineOutput {
    let mut output = RoutineOutput::default();

    let tokens = match tokenize(&routine.definition) {
        Ok(tokens) => tokens,
        Err(e) => {
            output.issues.push(format!("cannot tokenize routine: {}", e));
            return output;
        }
    };
    let body = match routine_body(&tokens) {
        Ok(body) => body,
        Err(e) => {
            output.issues.push(e);
            return output;
        }
    };
    let stmts = match parse_body(body) {
        Ok(stmts) => stmts,
        Err(e) => {
            output.issues.push(e);
            return output;
        }
    };

    let is_function = routine.routine_type == RoutineType::Function;
    let mut issues = Vec::new();
    let mut vars = Variables::default();

    // Signature
    let mut params = Vec::with_capacity(routine.parameters.len());
    let mut defaults_started = false;
    let mut default_rewriter = ExprRewriter::new(naming, resolver);
    for param in &routine.parameters {
        let item = format!("@{}", param.name);
        let target = match resolver.resolve_recorded(name, &item, &param.source_type, audit) {
            Resolution::Resolved(r) => r.target,
            Resolution::Unmappable { reason } => {
                issues.push(format!("parameter {}: {}", item, reason));
                continue;
            }
        };
        let pg_name = naming.parameter(&param.name);
        vars.map.insert(
            item.to_lowercase(),
            (pg_name.clone(), TypeFamily::of(&param.source_type.name).is_text()),
        );

        let mut decl = String::new();
        if param.output {
            if is_function {
                issues.push(format!("OUTPUT parameter {} in a function", item));
            }
            decl.push_str("INOUT ");
        }
        let _ = write!(decl, "{} {}", pg_name, target);
        match &param.default {
            Some(expr) => {
                let value = translate_default(expr, &target)
                    .unwrap_or_else(|| default_rewriter.rewrite_sql(expr));
                let _ = write!(decl, " DEFAULT {}", value);
                defaults_started = true;
            }
            None if defaults_started => issues.push(format!(
                "parameter {} has no default but follows a parameter with one",
                item
            )),
            None => {}
        }
        params.push(decl);
    }
    issues.append(&mut default_rewriter.issues);

    let returns = if is_function {
        match &routine.returns {
            Some(desc) => match resolver.resolve_recorded(name, "RETURNS", desc, audit) {
                Resolution::Resolved(r) => Some(r.target),
                Resolution::Unmappable { reason } => {
                    issues.push(format!("return type: {}", reason));
                    None
                }
            },
            None => {
                issues.push("function without a scalar return type".to_string());
                None
            }
        }
    } else {
        None
    };

    // Declarations are hoisted into the DECLARE section.
    let mut decls = Vec::new();
    let mut cursor_decls = Vec::new();
    collect_declarations(&stmts, &mut decls, &mut cursor_decls);

    let mut declare_lines = Vec::new();
    for decl in &decls {
        let key = decl.name.to_lowercase();
        if vars.map.contains_key(&key) {
            issues.push(format!("variable {} declared more than once", decl.name));
            continue;
        }
        let Some(desc) = parse_type(&decl.type_tokens) else {
            issues.push(format!(
                "cannot parse type '{}' of {}",
                render(&decl.type_tokens),
                decl.name
            ));
            continue;
        };
        let target = match resolver.resolve_recorded(name, &decl.name, &desc, audit) {
            Resolution::Resolved(r) => r.target,
            Resolution::Unmappable { reason } => {
                issues.push(format!("variable {}: {}", decl.name, reason));
                continue;
            }
        };
        let pg_name = naming.variable(&decl.name);
        declare_lines.push(format!("{} {};", pg_name, target));
        vars.map
            .insert(key, (pg_name, TypeFamily::of(&desc.name).is_text()));
    }

    let mut cursors = HashMap::new();
    for (cursor, _) in &cursor_decls {
        let pg_name = naming.ident(&format!("c_{}", cursor));
        if cursors.insert(cursor.to_lowercase(), pg_name).is_some() {
            issues.push(format!("cursor {} declared more than once", cursor));
        }
    }

    let row_count = body
        .iter()
        .any(|t| t.kind == TokenKind::SystemVariable && t.text.eq_ignore_ascii_case("@@ROWCOUNT"));
    if row_count {
        declare_lines.push("_row_count bigint := 0;".to_string());
    }

    let mut emitter = Emitter {
        rw: ExprRewriter::new(naming, resolver).with_scope(&vars),
        naming,
        vars: &vars,
        cursors: &cursors,
        is_function,
        row_count,
        depth: 1,
        try_depth: 0,
        handler_depth: 0,
        out: String::new(),
    };
    for (cursor, query) in &cursor_decls {
        let query = emitter.expr(query);
        if let Some(pg_name) = cursors.get(&cursor.to_lowercase()) {
            declare_lines.push(format!("{} CURSOR FOR {};", pg_name, query));
        }
    }
    emitter.emit_all(&stmts);
    if emitter.out.is_empty() {
        emitter.line("NULL;");
    }

    issues.append(&mut emitter.rw.issues);
    output.warnings.append(&mut emitter.rw.warnings);
    output.issues = issues;
    if !output.issues.is_empty() {
        return output;
    }

    let mut plpgsql = String::new();
    if !declare_lines.is_empty() {
        plpgsql.push_str("DECLARE\n");
        for line in &declare_lines {
            let _ = writeln!(plpgsql, "    {}", line);
        }
    }
    plpgsql.push_str("BEGIN\n");
    plpgsql.push_str(&emitter.out);
    plpgsql.push_str("END;\n");
    let tag = if plpgsql.contains("$$") { "$body$" } else { "$$" };

    let mut sql = format!(
        "CREATE OR REPLACE {} {}({})\n",
        if is_function { "FUNCTION" } else { "PROCEDURE" },
        naming.qualified(name),
        params.join(", ")
    );
    if let Some(returns) = returns {
        let _ = writeln!(sql, "RETURNS {}", returns);
    }
    sql.push_str("LANGUAGE plpgsql\n");
    let _ = write!(sql, "AS {}\n{}{}", tag, plpgsql, tag);
    output.sql = Some(sql);
    output
}

/// Locate the body after a `CREATE PROCEDURE/FUNCTION ... AS` header. A
/// definition without a header is taken to be the body itself.
fn routine_body(tokens: &[Token]) -> Result<&[Token], String> {
    let has_header = tokens
        .first()
        .is_some_and(|t| t.is_any_word(&["CREATE", "ALTER"]));
    let body = if has_header {
        let kw = tokens
            .iter()
            .position(|t| t.is_any_word(&["PROC", "PROCEDURE", "FUNCTION"]))
            .ok_or("unrecognized routine header")?;
        let mut start = None;
        for (i, token) in top_level(tokens) {
            if i <= kw {
                continue;
            }
            let next = tokens.get(i + 1);
            if token.is_word("RETURNS")
                && next.is_some_and(|n| n.is_word("TABLE") || n.kind == TokenKind::Variable)
            {
                return Err("table-valued function".into());
            }
            if token.is_word("EXTERNAL") && next.is_some_and(|n| n.is_word("NAME")) {
                return Err("CLR routine".into());
            }
            if token.is_word("AS") {
                let prev = &tokens[i - 1];
                if prev.kind != TokenKind::Variable && !prev.is_any_word(&["EXEC", "EXECUTE"]) {
                    start = Some(i + 1);
                    break;
                }
            }
        }
        &tokens[start.ok_or("routine body not found")?..]
    } else {
        tokens
    };

    let mut end = body.len();
    while end > 0 && (body[end - 1].kind == TokenKind::Semicolon || body[end - 1].is_word("GO")) {
        end -= 1;
    }
    Ok(&body[..end])
}

fn collect_declarations<'s>(
    stmts: &'s [Stmt],
    vars: &mut Vec<&'s VarDecl>,
    cursors: &mut Vec<(&'s str, &'s Tokens)>,
) {
    for stmt in stmts {
        match stmt {
            Stmt::Declare(decls) => vars.extend(decls.iter()),
            Stmt::DeclareCursor { name, query } => cursors.push((name.as_str(), query)),
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => {
                collect_declarations(then_branch, vars, cursors);
                if let Some(branch) = else_branch {
                    collect_declarations(branch, vars, cursors);
                }
            }
            Stmt::While { body, .. } | Stmt::Block(body) => {
                collect_declarations(body, vars, cursors)
            }
            Stmt::TryCatch { body, handler } => {
                collect_declarations(body, vars, cursors);
                collect_declarations(handler, vars, cursors);
            }
            _ => {}
        }
    }
}

struct Emitter<'a> {
    rw: ExprRewriter<'a>,
    naming: &'a NamingPolicy,
    vars: &'a Variables,
    cursors: &'a HashMap<String, String>,
    is_function: bool,
    row_count: bool,
    depth: usize,
    try_depth: usize,
    handler_depth: usize,
    out: String,
}

impl Emitter<'_> {
    fn line(&mut self, text: impl AsRef<str>) {
        for _ in 0..self.depth {
            self.out.push_str("    ");
        }
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    fn expr(&mut self, tokens: &[Token]) -> String {
        render(&self.rw.rewrite(tokens)).trim().to_string()
    }

    fn variable(&mut self, name: &str) -> (String, bool) {
        match self.vars.lookup(name) {
            Some(found) => found,
            None => {
                self.rw.issue(format!("undeclared variable {}", name));
                (name.to_string(), false)
            }
        }
    }

    fn cursor(&mut self, name: &str) -> String {
        match self.cursors.get(&name.to_lowercase()) {
            Some(pg_name) => pg_name.clone(),
            None => {
                self.rw.issue(format!("undeclared cursor {}", name));
                name.to_string()
            }
        }
    }

    fn diagnostics(&mut self) {
        if self.row_count {
            self.line("GET DIAGNOSTICS _row_count = ROW_COUNT;");
        }
    }

    fn block(&mut self, stmts: &[Stmt]) {
        self.depth += 1;
        let before = self.out.len();
        self.emit_all(stmts);
        if self.out.len() == before {
            self.line("NULL;");
        }
        self.depth -= 1;
    }

    fn emit_all(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.emit(stmt);
        }
    }

    fn emit(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Declare(decls) => {
                for decl in decls {
                    if let Some(init) = &decl.init {
                        let (target, _) = self.variable(&decl.name);
                        let value = self.expr(init);
                        self.line(format!("{} := {};", target, value));
                    }
                }
            }
            Stmt::DeclareCursor { .. } | Stmt::Deallocate(_) | Stmt::SessionOption => {}
            Stmt::Assign(assignment) => {
                let text = self.assignment(assignment);
                self.line(text);
            }
            Stmt::SelectAssign { targets, tail } => self.select_assign(targets, tail),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.expr(cond);
                self.line(format!("IF {} THEN", cond));
                self.block(then_branch);
                if let Some(branch) = else_branch {
                    self.line("ELSE");
                    self.block(branch);
                }
                self.line("END IF;");
            }
            Stmt::While { cond, body } => {
                let cond = self.expr(cond);
                self.line(format!("WHILE {} LOOP", cond));
                self.block(body);
                self.line("END LOOP;");
            }
            Stmt::Break => self.line("EXIT;"),
            Stmt::Continue => self.line("CONTINUE;"),
            Stmt::Block(stmts) => self.emit_all(stmts),
            Stmt::Open(cursor) => {
                let cursor = self.cursor(cursor);
                self.line(format!("OPEN {};", cursor));
            }
            Stmt::Fetch { cursor, into } => {
                let cursor = self.cursor(cursor);
                let targets: Vec<String> = into.iter().map(|v| self.variable(v).0).collect();
                self.line(format!("FETCH NEXT FROM {} INTO {};", cursor, targets.join(", ")));
            }
            Stmt::Close(cursor) => {
                let cursor = self.cursor(cursor);
                self.line(format!("CLOSE {};", cursor));
            }
            Stmt::TryCatch { body, handler } => {
                self.line("BEGIN");
                self.try_depth += 1;
                self.block(body);
                self.try_depth -= 1;
                self.line("EXCEPTION WHEN OTHERS THEN");
                self.handler_depth += 1;
                self.block(handler);
                self.handler_depth -= 1;
                self.line("END;");
            }
            Stmt::ExecDynamic(sql) => {
                self.rw
                    .warn("dynamic SQL is executed verbatim and must already be valid PostgreSQL");
                let sql = self.expr(sql);
                self.line(format!("EXECUTE {};", sql));
                self.diagnostics();
            }
            Stmt::Call { name, args } => self.call(name, args),
            Stmt::BeginTran => {
                if self.is_function {
                    self.rw.issue("transaction control in a function");
                } else {
                    self.rw.warn(
                        "BEGIN TRANSACTION removed; the procedure runs in the caller's transaction",
                    );
                }
            }
            Stmt::Commit | Stmt::Rollback => {
                let keyword = if matches!(stmt, Stmt::Commit) { "COMMIT" } else { "ROLLBACK" };
                if self.is_function {
                    self.rw.issue("transaction control in a function");
                } else if self.try_depth > 0 || self.handler_depth > 0 {
                    self.rw
                        .issue(format!("{} inside an exception block", keyword));
                }
                self.line(format!("{};", keyword));
            }
            Stmt::Return(value) => match (value, self.is_function) {
                (Some(value), true) => {
                    let value = self.expr(value);
                    self.line(format!("RETURN {};", value));
                }
                (None, false) => self.line("RETURN;"),
                (Some(_), false) => self.rw.issue("procedure return status value"),
                (None, true) => self.rw.issue("RETURN without a value in a function"),
            },
            Stmt::Print(value) => {
                let value = self.expr(value);
                self.line(format!("RAISE NOTICE '%', {};", value));
            }
            Stmt::Raise { message, notice } => {
                let level = if *notice { "NOTICE" } else { "EXCEPTION" };
                match message.as_slice() {
                    [t] if matches!(t.kind, TokenKind::String | TokenKind::NString) => {
                        self.line(format!("RAISE {} '{}';", level, t.text.replace('%', "%%")))
                    }
                    _ => {
                        let value = self.expr(message);
                        self.line(format!("RAISE {} '%', {};", level, value));
                    }
                }
            }
            Stmt::Rethrow => {
                if self.handler_depth == 0 {
                    self.rw.issue("THROW without arguments outside a CATCH block");
                }
                self.line("RAISE;");
            }
            Stmt::Dml(tokens) => {
                self.check_dml(tokens);
                let sql = self.expr(tokens);
                self.line(format!("{};", sql));
                self.diagnostics();
            }
        }
    }

    fn assignment(&mut self, assignment: &Assignment) -> String {
        let (target, is_text) = self.variable(&assignment.var);
        let value = self.expr(&assignment.value);
        match assignment.op {
            None => format!("{} := {};", target, value),
            Some('+') if is_text => format!("{} := {} || ({});", target, target, value),
            Some(op) => format!("{} := {} {} ({});", target, target, op, value),
        }
    }

    fn select_assign(&mut self, targets: &[Assignment], tail: &[Token]) {
        if tail.is_empty() {
            for assignment in targets {
                let text = self.assignment(assignment);
                self.line(text);
            }
            return;
        }
        if targets.iter().any(|a| a.op.is_some()) {
            self.rw
                .issue("compound assignment in a SELECT that reads rows (running aggregate)");
        }
        self.rw.warn(
            "SELECT INTO a variable keeps the first row where the source kept the last",
        );
        let mut values = Vec::with_capacity(targets.len());
        let mut names = Vec::with_capacity(targets.len());
        for assignment in targets {
            values.push(self.expr(&assignment.value));
            names.push(self.variable(&assignment.var).0);
        }
        let tail = self.expr(tail);
        self.line(format!(
            "SELECT {} INTO {} {};",
            values.join(", "),
            names.join(", "),
            tail
        ));
        self.diagnostics();
    }

    fn call(&mut self, name: &[Token], args: &[CallArg]) {
        if let Some(last) = name.last() {
            let lower = last.text.to_lowercase();
            if lower.starts_with("sp_") || lower.starts_with("xp_") {
                self.rw.issue(format!("system procedure {}", last.text));
            }
        }
        let target = self.expr(name);
        let mut rendered = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.expr(&arg.value);
            rendered.push(match &arg.name {
                Some(param) => format!("{} => {}", self.naming.parameter(param), value),
                None => value,
            });
        }
        self.line(format!("CALL {}({});", target, rendered.join(", ")));
    }

    /// Statement shapes that have no direct PL/pgSQL equivalent.
    fn check_dml(&mut self, tokens: &[Token]) {
        let top: Vec<(usize, &Token)> = top_level(tokens).collect();
        let main = top
            .iter()
            .find(|(_, t)| t.is_any_word(&["SELECT", "INSERT", "UPDATE", "DELETE", "TRUNCATE"]))
            .map(|(i, t)| (*i, t.upper()));
        let Some((main_at, main)) = main else {
            return;
        };
        let after = |word: &str| top.iter().filter(|(i, t)| *i > main_at && t.is_word(word)).count();

        match main.as_str() {
            "UPDATE" if after("FROM") > 0 => {
                self.rw.issue("UPDATE with a FROM clause needs a manual rewrite");
            }
            "DELETE" => {
                let direct = tokens.get(main_at + 1).is_some_and(|t| t.is_word("FROM"));
                let froms = after("FROM");
                if froms > 1 || (froms == 1 && !direct) {
                    self.rw.issue("DELETE with a join needs a manual rewrite");
                }
            }
            "INSERT" if after("EXEC") + after("EXECUTE") > 0 => {
                self.rw.issue("INSERT ... EXEC");
            }
            "SELECT" if after("INTO") > 0 => {
                self.rw.issue("SELECT INTO creates a table");
            }
            "SELECT" => {
                self.rw.issue("routine returns a result set");
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Parameter, TypeDescriptor};

    fn routine(routine_type: RoutineType, parameters: Vec<Parameter>, definition: &str) -> RoutineDef {
        RoutineDef {
            routine_type,
            parameters,
            returns: (routine_type == RoutineType::Function).then(|| TypeDescriptor::new("int")),
            definition: definition.to_string(),
        }
    }

    fn param(name: &str, ty: TypeDescriptor) -> Parameter {
        Parameter {
            name: name.to_string(),
            source_type: ty,
            output: false,
            default: None,
        }
    }

    fn translate(def: &RoutineDef) -> RoutineOutput {
        let mut audit = Vec::new();
        translate_routine(
            &QualifiedName::new("dbo", "usp_Test"),
            def,
            &NamingPolicy::default(),
            &Resolver::builtin(),
            &mut audit,
        )
    }

    #[test]
    fn test_procedure_translation() {
        let mut total = param("Total", TypeDescriptor::new("decimal").with_precision(18, 2));
        total.output = true;
        let def = routine(
            RoutineType::Procedure,
            vec![param("CustomerId", TypeDescriptor::new("int")), total],
            "CREATE PROCEDURE dbo.usp_Test @CustomerId int, @Total decimal(18,2) OUTPUT AS
             BEGIN
                 SET NOCOUNT ON;
                 DECLARE @Count int = 0;
                 SELECT @Total = SUM(amount) FROM dbo.Orders WHERE customer_id = @CustomerId;
                 IF @Total IS NULL
                     SET @Total = 0;
                 ELSE
                     SET @Count += 1;
                 UPDATE dbo.Customers SET order_total = @Total WHERE id = @CustomerId;
             END",
        );
        let out = translate(&def);
        assert!(out.issues.is_empty(), "{:?}", out.issues);
        let expected = "CREATE OR REPLACE PROCEDURE \"public\".\"usp_test\"(p_customerid integer, INOUT p_total numeric(18,2))
LANGUAGE plpgsql
AS $$
DECLARE
    v_count integer;
BEGIN
    v_count := 0;
    SELECT SUM(\"amount\") INTO p_total FROM \"public\".\"orders\" WHERE \"customer_id\" = p_customerid;
    IF p_total IS NULL THEN
        p_total := 0;
    ELSE
        v_count := v_count + (1);
    END IF;
    UPDATE \"public\".\"customers\" SET \"order_total\" = p_total WHERE \"id\" = p_customerid;
END;
$$";
        assert_eq!(out.sql.as_deref(), Some(expected));
    }

    #[test]
    fn test_function_with_concatenation() {
        let def = RoutineDef {
            returns: Some(TypeDescriptor::new("nvarchar").with_length(100)),
            ..routine(
                RoutineType::Function,
                vec![param("Name", TypeDescriptor::new("nvarchar").with_length(50))],
                "CREATE FUNCTION dbo.fn_Greet(@Name nvarchar(50)) RETURNS nvarchar(100) AS
                 BEGIN
                     RETURN 'Hello, ' + ISNULL(@Name, 'stranger');
                 END",
            )
        };
        let out = translate(&def);
        assert!(out.issues.is_empty(), "{:?}", out.issues);
        let sql = out.sql.unwrap();
        assert!(sql.starts_with("CREATE OR REPLACE FUNCTION \"public\".\"usp_test\"(p_name varchar(50))\nRETURNS varchar(100)\n"));
        assert!(sql.contains("RETURN 'Hello, ' || COALESCE(p_name, 'stranger');"));
    }

    #[test]
    fn test_cursor_loop() {
        let def = routine(
            RoutineType::Procedure,
            vec![],
            "DECLARE @id int
             DECLARE cur CURSOR FOR SELECT id FROM dbo.Orders
             OPEN cur
             FETCH NEXT FROM cur INTO @id
             WHILE @@FETCH_STATUS = 0
             BEGIN
                 PRINT @id
                 FETCH NEXT FROM cur INTO @id
             END
             CLOSE cur
             DEALLOCATE cur",
        );
        let out = translate(&def);
        assert!(out.issues.is_empty(), "{:?}", out.issues);
        let sql = out.sql.unwrap();
        assert!(sql.contains("    c_cur CURSOR FOR SELECT \"id\" FROM \"public\".\"orders\";"));
        assert!(sql.contains("    OPEN c_cur;\n    FETCH NEXT FROM c_cur INTO v_id;\n    WHILE FOUND LOOP\n        RAISE NOTICE '%', v_id;"));
        assert!(sql.contains("    CLOSE c_cur;\nEND;"));
    }

    #[test]
    fn test_try_catch_and_raise() {
        let def = routine(
            RoutineType::Procedure,
            vec![],
            "BEGIN TRY
                 DELETE FROM dbo.Orders WHERE id = 1
                 IF @@ROWCOUNT = 0 RAISERROR('nothing deleted: 100%', 16, 1)
             END TRY
             BEGIN CATCH
                 THROW
             END CATCH",
        );
        let out = translate(&def);
        assert!(out.issues.is_empty(), "{:?}", out.issues);
        let sql = out.sql.unwrap();
        assert!(sql.contains("    _row_count bigint := 0;"));
        assert!(sql.contains("        DELETE FROM \"public\".\"orders\" WHERE \"id\" = 1;\n        GET DIAGNOSTICS _row_count = ROW_COUNT;"));
        assert!(sql.contains("RAISE EXCEPTION 'nothing deleted: 100%%';"));
        assert!(sql.contains("    EXCEPTION WHEN OTHERS THEN\n        RAISE;\n    END;"));
    }

    #[test]
    fn test_unsupported_patterns_block_translation() {
        for body in [
            "SELECT * FROM dbo.Orders",
            "UPDATE o SET o.x = 1 FROM dbo.Orders o JOIN dbo.Customers c ON c.id = o.cid",
            "INSERT INTO #work SELECT 1",
            "RETURN 1",
            "THROW",
            "DECLARE @t TABLE (id int)",
            "EXEC sp_rename 'a', 'b'",
            "DECLARE @a int DECLARE @a int",
        ] {
            let out = translate(&routine(RoutineType::Procedure, vec![], body));
            assert!(out.sql.is_none(), "expected manual review for {body}");
            assert!(!out.issues.is_empty());
        }
    }

    #[test]
    fn test_commit_rules() {
        let out = translate(&routine(
            RoutineType::Procedure,
            vec![],
            "BEGIN TRAN UPDATE dbo.t SET a = 1 COMMIT",
        ));
        assert!(out.issues.is_empty(), "{:?}", out.issues);
        assert!(out.sql.unwrap().contains("    COMMIT;"));
        assert!(!out.warnings.is_empty());

        let out = translate(&routine(
            RoutineType::Function,
            vec![],
            "BEGIN COMMIT RETURN 1 END",
        ));
        assert!(out.sql.is_none());
    }

    #[test]
    fn test_parameter_defaults() {
        let mut a = param("A", TypeDescriptor::new("int"));
        a.default = Some("((5))".to_string());
        let b = param("B", TypeDescriptor::new("int"));
        let out = translate(&routine(RoutineType::Procedure, vec![a.clone()], "RETURN"));
        assert!(out.sql.unwrap().contains("(p_a integer DEFAULT 5)"));

        let out = translate(&routine(RoutineType::Procedure, vec![a, b], "RETURN"));
        assert!(out.sql.is_none());
        assert!(out.issues[0].contains("@B"));
    }

    #[test]
    fn test_exec_call_with_named_args() {
        let out = translate(&routine(
            RoutineType::Procedure,
            vec![param("Id", TypeDescriptor::new("int"))],
            "EXEC dbo.usp_Log @Message = 'start', @Id = @Id",
        ));
        assert!(out.issues.is_empty(), "{:?}", out.issues);
        assert!(out
            .sql
            .unwrap()
            .contains("CALL \"public\".\"usp_log\"(p_message => 'start', p_id => p_id);"));
    }
}
