//! Tokens -> AST. Recursive descent for statements, precedence climbing
//! for binary operators.
//!
//! Inline expressions parse in two modes: greedy (the default) climbs
//! binary operators, nongreedy stops after the operand and its postfix
//! chain. `new` takes its operand nongreedy since it binds to exactly one
//! call expression.

use crate::ast_log;
use crate::compiler::compiler_messages::warning_config::WarningConfig;
use crate::compiler::parser::ast::{
    Ast, CallArgs, CallData, ClassDefData, DoData, ExprKind, Expression, FuncArgs, FuncDefData,
    IdentifierRefData, IfClause, ImportData, LiteralValue, NodeId, ScopeAddResult, ScopeId,
    VarDefData,
};
use crate::compiler::parser::operators::{AssignOpKind, BinOpKind, UnaryOpKind};
use crate::compiler::string_interning::{StringId, StringTable};
use crate::compiler::tokenizer::tokens::{Keyword, Token, TokenKind};
use crate::settings::MAX_PARSE_RECURSION;

type PResult<T> = Result<T, ()>;

/// The precedence floor that keeps `not` binding tighter than `and`/`or`
/// but looser than comparisons.
const NOT_OPERAND_MIN_PREC: u8 = 4;

/// Source position plus token index of a token, captured before the
/// parser moves on. Every AST node records the token index it started at;
/// the local storage lifetime analysis runs on those indices.
#[derive(Clone, Copy)]
struct Mark {
    line: i64,
    column: i64,
    token_index: usize,
}

pub fn parse_tokens(
    tokens: &[Token],
    file_uri: &str,
    string_table: &mut StringTable,
    warning_config: &WarningConfig,
) -> Ast {
    let mut ast = Ast::new_shell(file_uri);
    ast.token_count = tokens.len();
    let global_scope = ast.global_scope;

    let mut parser = Parser {
        tokens,
        pos: 0,
        ast: &mut ast,
        string_table,
        warning_config,
        recursion_depth: 0,
    };
    loop {
        match parser.parse_statement(global_scope) {
            Ok(Some(stmt)) => parser.ast.root_stmts.push(stmt),
            Ok(None) => {
                if parser.peek() == &TokenKind::Eof {
                    break;
                }
                // A stray closing brace at the top level.
                let here = parser.mark();
                parser.error_at(
                    here,
                    "unexpected \"}\" without any matching opening brace".to_owned(),
                );
                parser.advance();
            }
            Err(()) => parser.recover_to_next_statement(),
        }
    }

    ast.link_parents();
    ast_log!({
        format!(
            "horsec: debug: parsed {} top-level statements from {}",
            ast.root_stmts.len(),
            ast.file_uri
        )
    });
    ast
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    ast: &'a mut Ast,
    string_table: &'a mut StringTable,
    warning_config: &'a WarningConfig,
    recursion_depth: usize,
}

impl<'a> Parser<'a> {
    // ------------------------------
    // Token plumbing
    // ------------------------------

    fn token(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &TokenKind {
        &self.token().kind
    }

    fn peek_at(&self, ahead: usize) -> &TokenKind {
        &self.tokens[(self.pos + ahead).min(self.tokens.len() - 1)].kind
    }

    fn mark(&self) -> Mark {
        let token = self.token();
        Mark {
            line: token.line,
            column: token.column,
            token_index: self.pos.min(self.tokens.len() - 1),
        }
    }

    fn advance(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn error_at(&mut self, at: Mark, message: String) {
        let file_uri = self.ast.file_uri.clone();
        self.ast
            .result
            .add_error(message, Some(&file_uri), at.line, at.column);
    }

    /// Record an error at the current token and fail.
    fn error_here(&mut self, message: String) -> PResult<()> {
        let here = self.mark();
        self.error_at(here, message);
        Err(())
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> PResult<()> {
        if self.peek() == &kind {
            self.advance();
            return Ok(());
        }
        let found = self.token().describe(self.string_table);
        self.error_here(format!("expected {what}, found {found}"))
    }

    fn expect_identifier(&mut self, what: &str) -> PResult<StringId> {
        if let TokenKind::Identifier(id) = self.peek() {
            let id = *id;
            self.advance();
            return Ok(id);
        }
        let found = self.token().describe(self.string_table);
        self.error_here(format!("expected {what}, found {found}"))?;
        Err(())
    }

    fn new_node(&mut self, kind: ExprKind, at: Mark) -> NodeId {
        self.ast
            .add_node(Expression::new(kind, at.line, at.column, at.token_index))
    }

    fn starts_statement(kind: &TokenKind) -> bool {
        matches!(
            kind,
            TokenKind::Keyword(
                Keyword::Var
                    | Keyword::Const
                    | Keyword::Func
                    | Keyword::Class
                    | Keyword::If
                    | Keyword::While
                    | Keyword::For
                    | Keyword::Import
                    | Keyword::Return
                    | Keyword::Do
                    | Keyword::With
                    | Keyword::Async
            )
        )
    }

    fn recover_to_next_statement(&mut self) {
        self.advance();
        loop {
            let kind = self.peek();
            if kind == &TokenKind::Eof
                || kind == &TokenKind::BraceClose
                || Parser::starts_statement(kind)
            {
                return;
            }
            self.advance();
        }
    }

    // ------------------------------
    // Statements
    // ------------------------------

    /// Parse one statement. Returns None at the end of the enclosing
    /// block (or file).
    fn parse_statement(&mut self, scope: ScopeId) -> PResult<Option<NodeId>> {
        match self.peek() {
            TokenKind::Eof | TokenKind::BraceClose => Ok(None),
            TokenKind::Keyword(Keyword::Var) => self.parse_vardef(scope, false).map(Some),
            TokenKind::Keyword(Keyword::Const) => self.parse_vardef(scope, true).map(Some),
            TokenKind::Keyword(Keyword::Func) => self.parse_funcdef(scope, false).map(Some),
            TokenKind::Keyword(Keyword::Class) => self.parse_classdef(scope).map(Some),
            TokenKind::Keyword(Keyword::If) => self.parse_if(scope).map(Some),
            TokenKind::Keyword(Keyword::While) => self.parse_while(scope).map(Some),
            TokenKind::Keyword(Keyword::For) => self.parse_for(scope).map(Some),
            TokenKind::Keyword(Keyword::Import) => self.parse_import(scope).map(Some),
            TokenKind::Keyword(Keyword::Return) => self.parse_return(scope).map(Some),
            TokenKind::Keyword(Keyword::Do) => self.parse_do(scope).map(Some),
            TokenKind::Keyword(Keyword::With) => self.parse_with(scope).map(Some),
            TokenKind::Keyword(Keyword::Async) => {
                let start = self.mark();
                self.advance();
                let call = self.parse_expression(scope, 0)?;
                if !matches!(self.ast.node(call).kind, ExprKind::Call(_)) {
                    self.error_at(
                        start,
                        "expected call after \"async\", since only calls can run \
                         asynchronously"
                            .to_owned(),
                    );
                    return Err(());
                }
                if let ExprKind::Call(call_data) = &mut self.ast.node_mut(call).kind {
                    call_data.is_async = true;
                }
                Ok(Some(self.new_node(ExprKind::CallStmt { call }, start)))
            }
            _ => self.parse_expression_statement(scope).map(Some),
        }
    }

    fn parse_block(&mut self, scope: ScopeId) -> PResult<Vec<NodeId>> {
        self.expect(TokenKind::BraceOpen, "\"{\" to start a block")?;
        let mut statements = Vec::new();
        loop {
            match self.parse_statement(scope) {
                Ok(Some(stmt)) => statements.push(stmt),
                Ok(None) => break,
                Err(()) => {
                    self.recover_to_next_statement();
                    if self.peek() == &TokenKind::Eof {
                        break;
                    }
                }
            }
        }
        self.expect(TokenKind::BraceClose, "\"}\" to close the block")?;
        Ok(statements)
    }

    fn parse_vardef(&mut self, scope: ScopeId, is_const: bool) -> PResult<NodeId> {
        let start = self.mark();
        self.advance();
        let identifier = self.expect_identifier("variable name")?;

        let value = if self.peek() == &TokenKind::Assign {
            self.advance();
            Some(self.parse_expression(scope, 0)?)
        } else if is_const {
            return self
                .error_here("const definition requires a value".to_owned())
                .map(|_| unreachable!());
        } else {
            None
        };

        let node = self.new_node(
            ExprKind::VarDef(VarDefData {
                identifier,
                is_const,
                value,
                found_in_scope: scope,
            }),
            start,
        );

        if self.warning_config.shadowing_vardefs {
            let shadows = match self.ast.scope(scope).parent {
                Some(parent) => self.ast.scope_query_item(parent, identifier, true).is_some(),
                None => false,
            };
            if shadows {
                let file_uri = self.ast.file_uri.clone();
                self.ast.result.add_warning(
                    format!(
                        "definition of \"{}\" shadows an earlier definition in an outer scope",
                        identifier.resolve(self.string_table)
                    ),
                    Some(&file_uri),
                    start.line,
                    start.column,
                );
            }
        }

        match self.ast.scope_add_item(scope, identifier, node) {
            ScopeAddResult::Added(_) => Ok(node),
            ScopeAddResult::AlreadyExists(_) => {
                self.error_at(
                    start,
                    format!(
                        "duplicate definition of \"{}\" in the same scope",
                        identifier.resolve(self.string_table)
                    ),
                );
                Err(())
            }
        }
    }

    /// Shared by statement funcdefs, class methods and inline funcdefs.
    /// For inline funcdefs `name` stays None and nothing is registered in
    /// the enclosing scope.
    fn parse_funcdef(&mut self, scope: ScopeId, inline: bool) -> PResult<NodeId> {
        let start = self.mark();
        self.advance(); // func

        let name = if inline {
            None
        } else {
            Some(self.expect_identifier("function name")?)
        };

        let func_scope = self.ast.add_scope(scope, true);
        let data = FuncDefData {
            name,
            user_set_parallel: false,
            user_set_noasync: false,
            arguments: FuncArgs::default(),
            body: Vec::new(),
            scope: func_scope,
            found_in_scope: scope,
            bytecode_func_id: None,
        };
        let node = self.new_node(
            if inline {
                ExprKind::InlineFuncDef(data)
            } else {
                ExprKind::FuncDef(data)
            },
            start,
        );

        let arguments = if self.peek() == &TokenKind::ParenOpen {
            self.parse_declared_args(func_scope, node)?
        } else {
            FuncArgs::default()
        };

        let mut user_set_parallel = false;
        let mut user_set_noasync = false;
        loop {
            match self.peek() {
                TokenKind::Keyword(Keyword::Async) => {
                    user_set_parallel = true;
                    self.advance();
                }
                TokenKind::Keyword(Keyword::Noasync) => {
                    user_set_noasync = true;
                    self.advance();
                }
                _ => break,
            }
        }

        let body = self.parse_block(func_scope)?;

        match &mut self.ast.node_mut(node).kind {
            ExprKind::FuncDef(data) | ExprKind::InlineFuncDef(data) => {
                data.arguments = arguments;
                data.user_set_parallel = user_set_parallel;
                data.user_set_noasync = user_set_noasync;
                data.body = body;
            }
            _ => unreachable!(),
        }

        if let Some(name) = name {
            match self.ast.scope_add_item(scope, name, node) {
                ScopeAddResult::Added(_) => {}
                ScopeAddResult::AlreadyExists(_) => {
                    self.error_at(
                        start,
                        format!(
                            "duplicate definition of \"{}\" in the same scope",
                            name.resolve(self.string_table)
                        ),
                    );
                    return Err(());
                }
            }
        }
        Ok(node)
    }

    /// `(a, b = default, rest...)`. Positional arguments first, keyword
    /// (defaulted) arguments after, an optional trailing multi-arg last.
    fn parse_declared_args(
        &mut self,
        func_scope: ScopeId,
        funcdef_node: NodeId,
    ) -> PResult<FuncArgs> {
        self.expect(TokenKind::ParenOpen, "\"(\" to start the arguments")?;
        let mut args = FuncArgs::default();
        loop {
            if self.peek() == &TokenKind::ParenClose {
                self.advance();
                break;
            }
            let arg_start = self.mark();
            let arg_name = self.expect_identifier("argument name")?;

            if args.last_posarg_is_multiarg {
                self.error_at(
                    arg_start,
                    "multi-arg argument must be the last declared argument".to_owned(),
                );
                return Err(());
            }

            let mut default = None;
            if self.peek() == &TokenKind::Assign {
                self.advance();
                default = Some(self.parse_expression(func_scope, 0)?);
            } else if self.peek() == &TokenKind::Ellipsis {
                self.advance();
                args.last_posarg_is_multiarg = true;
            } else if args.arg_values.iter().any(|v| v.is_some()) {
                self.error_at(
                    arg_start,
                    "positional argument cannot follow keyword arguments".to_owned(),
                );
                return Err(());
            }

            args.arg_names.push(arg_name);
            args.arg_values.push(default);
            match self.ast.scope_add_item(func_scope, arg_name, funcdef_node) {
                ScopeAddResult::Added(_) => {}
                ScopeAddResult::AlreadyExists(_) => {
                    self.error_at(
                        arg_start,
                        format!(
                            "duplicate argument name \"{}\"",
                            arg_name.resolve(self.string_table)
                        ),
                    );
                    return Err(());
                }
            }

            match self.peek() {
                TokenKind::Comma => self.advance(),
                TokenKind::ParenClose => {}
                _ => {
                    self.error_here("expected \",\" or \")\" in argument list".to_owned())?;
                }
            }
        }
        Ok(args)
    }

    fn parse_classdef(&mut self, scope: ScopeId) -> PResult<NodeId> {
        let start = self.mark();
        self.advance(); // class
        let name = self.expect_identifier("class name")?;

        let class_scope = self.ast.add_scope(scope, true);
        self.ast.scope_mut(class_scope).is_class_scope = true;
        let node = self.new_node(
            ExprKind::ClassDef(ClassDefData {
                name,
                user_set_parallel: false,
                user_set_noasync: false,
                base_class_ref: None,
                scope: class_scope,
                vardefs: Vec::new(),
                funcdefs: Vec::new(),
                found_in_scope: scope,
                bytecode_class_id: None,
            }),
            start,
        );

        let mut base_class_ref = None;
        if self.peek() == &TokenKind::Keyword(Keyword::Extends) {
            self.advance();
            base_class_ref = Some(self.parse_nongreedy_reference(scope)?);
        }

        let mut user_set_parallel = false;
        let mut user_set_noasync = false;
        loop {
            match self.peek() {
                TokenKind::Keyword(Keyword::Async) => {
                    user_set_parallel = true;
                    self.advance();
                }
                TokenKind::Keyword(Keyword::Noasync) => {
                    user_set_noasync = true;
                    self.advance();
                }
                _ => break,
            }
        }

        self.expect(TokenKind::BraceOpen, "\"{\" to start the class body")?;
        let mut vardefs = Vec::new();
        let mut funcdefs = Vec::new();
        loop {
            match self.peek() {
                TokenKind::BraceClose => {
                    self.advance();
                    break;
                }
                TokenKind::Keyword(Keyword::Var) => {
                    vardefs.push(self.parse_vardef(class_scope, false)?);
                }
                TokenKind::Keyword(Keyword::Const) => {
                    vardefs.push(self.parse_vardef(class_scope, true)?);
                }
                TokenKind::Keyword(Keyword::Func) => {
                    funcdefs.push(self.parse_funcdef(class_scope, false)?);
                }
                TokenKind::Eof => {
                    self.error_here("unterminated class body, expected \"}\"".to_owned())?;
                }
                _ => {
                    let found = self.token().describe(self.string_table);
                    self.error_here(format!(
                        "expected \"var\", \"const\" or \"func\" in class body, found {found}"
                    ))?;
                }
            }
        }

        if let ExprKind::ClassDef(data) = &mut self.ast.node_mut(node).kind {
            data.base_class_ref = base_class_ref;
            data.user_set_parallel = user_set_parallel;
            data.user_set_noasync = user_set_noasync;
            data.vardefs = vardefs;
            data.funcdefs = funcdefs;
        }

        match self.ast.scope_add_item(scope, name, node) {
            ScopeAddResult::Added(_) => Ok(node),
            ScopeAddResult::AlreadyExists(_) => {
                self.error_at(
                    start,
                    format!(
                        "duplicate definition of \"{}\" in the same scope",
                        name.resolve(self.string_table)
                    ),
                );
                Err(())
            }
        }
    }

    fn parse_if(&mut self, scope: ScopeId) -> PResult<NodeId> {
        let start = self.mark();
        self.advance(); // if

        let mut clauses = Vec::new();
        let clause_scope = self.ast.add_scope(scope, false);
        let cond = self.parse_expression(scope, 0)?;
        let body = self.parse_block(clause_scope)?;
        clauses.push(IfClause {
            scope: clause_scope,
            cond: Some(cond),
            body,
        });

        loop {
            match self.peek() {
                TokenKind::Keyword(Keyword::Elseif) => {
                    self.advance();
                    let clause_scope = self.ast.add_scope(scope, false);
                    let cond = self.parse_expression(scope, 0)?;
                    let body = self.parse_block(clause_scope)?;
                    clauses.push(IfClause {
                        scope: clause_scope,
                        cond: Some(cond),
                        body,
                    });
                }
                TokenKind::Keyword(Keyword::Else) => {
                    self.advance();
                    let clause_scope = self.ast.add_scope(scope, false);
                    let body = self.parse_block(clause_scope)?;
                    clauses.push(IfClause {
                        scope: clause_scope,
                        cond: None,
                        body,
                    });
                    break;
                }
                _ => break,
            }
        }
        Ok(self.new_node(ExprKind::If { clauses }, start))
    }

    fn parse_while(&mut self, scope: ScopeId) -> PResult<NodeId> {
        let start = self.mark();
        self.advance(); // while
        let cond = self.parse_expression(scope, 0)?;
        let body_scope = self.ast.add_scope(scope, false);
        let body = self.parse_block(body_scope)?;
        Ok(self.new_node(
            ExprKind::While {
                scope: body_scope,
                cond,
                body,
            },
            start,
        ))
    }

    fn parse_for(&mut self, scope: ScopeId) -> PResult<NodeId> {
        let start = self.mark();
        self.advance(); // for
        let iterator = self.expect_identifier("loop iterator name")?;
        self.expect(TokenKind::Keyword(Keyword::In), "\"in\"")?;
        let container = self.parse_expression(scope, 0)?;

        let body_scope = self.ast.add_scope(scope, false);
        let node = self.new_node(
            ExprKind::For {
                iterator,
                scope: body_scope,
                container,
                body: Vec::new(),
            },
            start,
        );
        self.ast.scope_add_item(body_scope, iterator, node);
        let body = self.parse_block(body_scope)?;
        if let ExprKind::For { body: body_slot, .. } = &mut self.ast.node_mut(node).kind {
            *body_slot = body;
        }
        Ok(node)
    }

    fn parse_import(&mut self, scope: ScopeId) -> PResult<NodeId> {
        let start = self.mark();
        self.advance(); // import

        if !self.ast.scope(scope).is_global {
            self.error_at(
                start,
                "import statements are only allowed at the top level of a module".to_owned(),
            );
            return Err(());
        }

        let mut elements = vec![self.expect_identifier("module path")?];
        while self.peek() == &TokenKind::Dot {
            self.advance();
            elements.push(self.expect_identifier("module path element")?);
        }

        let mut source_library = None;
        if self.peek() == &TokenKind::Keyword(Keyword::From) {
            self.advance();
            source_library = Some(self.expect_identifier("library name")?);
        }
        let mut import_as = None;
        if self.peek() == &TokenKind::Keyword(Keyword::As) {
            self.advance();
            import_as = Some(self.expect_identifier("import alias")?);
        }

        let data = ImportData {
            elements,
            source_library,
            import_as,
            found_in_scope: scope,
            referenced_ast: None,
            maps_to_cfuncs: false,
        };
        let bound_name = data.bound_name();
        let node = self.new_node(ExprKind::Import(data), start);

        match self.ast.scope_add_item(scope, bound_name, node) {
            ScopeAddResult::Added(_) => {}
            ScopeAddResult::AlreadyExists(def_index) => {
                // Several imports may share their first path element, e.g.
                // `import net.fetch` plus `import net.serve`.
                let existing = self.ast.scope(scope).defs[def_index].declaration;
                if matches!(self.ast.node(existing).kind, ExprKind::Import(_)) {
                    self.ast.scope_mut(scope).defs[def_index]
                        .additional_decls
                        .push(node);
                } else {
                    self.error_at(
                        start,
                        format!(
                            "import binds \"{}\" which is already defined in this scope",
                            bound_name.resolve(self.string_table)
                        ),
                    );
                    return Err(());
                }
            }
        }
        Ok(node)
    }

    fn parse_return(&mut self, scope: ScopeId) -> PResult<NodeId> {
        let start = self.mark();
        self.advance(); // return
        let value = match self.peek() {
            TokenKind::Eof | TokenKind::BraceClose => None,
            kind if Parser::starts_statement(kind) => None,
            _ => Some(self.parse_expression(scope, 0)?),
        };
        Ok(self.new_node(ExprKind::Return { value }, start))
    }

    fn parse_do(&mut self, scope: ScopeId) -> PResult<NodeId> {
        let start = self.mark();
        self.advance(); // do

        let do_scope = self.ast.add_scope(scope, false);
        let rescue_scope = self.ast.add_scope(scope, false);
        let finally_scope = self.ast.add_scope(scope, false);

        let node = self.new_node(
            ExprKind::Do(DoData {
                scope: do_scope,
                body: Vec::new(),
                errors: Vec::new(),
                error_name: None,
                has_rescue: false,
                rescue_scope,
                rescue_body: Vec::new(),
                has_finally: false,
                finally_scope,
                finally_body: Vec::new(),
            }),
            start,
        );

        let body = self.parse_block(do_scope)?;

        let mut errors = Vec::new();
        let mut error_name = None;
        let mut has_rescue = false;
        let mut rescue_body = Vec::new();
        if self.peek() == &TokenKind::Keyword(Keyword::Rescue) {
            has_rescue = true;
            self.advance();
            loop {
                errors.push(self.parse_nongreedy_reference(scope)?);
                if self.peek() == &TokenKind::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
            if self.peek() == &TokenKind::Keyword(Keyword::As) {
                self.advance();
                let name = self.expect_identifier("caught error name")?;
                error_name = Some(name);
                self.ast.scope_add_item(rescue_scope, name, node);
            }
            rescue_body = self.parse_block(rescue_scope)?;
        }

        let mut has_finally = false;
        let mut finally_body = Vec::new();
        if self.peek() == &TokenKind::Keyword(Keyword::Finally) {
            has_finally = true;
            self.advance();
            finally_body = self.parse_block(finally_scope)?;
        }

        if !has_rescue && !has_finally {
            self.error_at(
                start,
                "do statement requires at least a rescue or a finally block".to_owned(),
            );
            return Err(());
        }

        if let ExprKind::Do(data) = &mut self.ast.node_mut(node).kind {
            data.body = body;
            data.errors = errors;
            data.error_name = error_name;
            data.has_rescue = has_rescue;
            data.rescue_body = rescue_body;
            data.has_finally = has_finally;
            data.finally_body = finally_body;
        }
        Ok(node)
    }

    fn parse_with(&mut self, scope: ScopeId) -> PResult<NodeId> {
        let start = self.mark();
        self.advance(); // with

        let with_scope = self.ast.add_scope(scope, false);
        let mut clauses = Vec::new();
        loop {
            let clause_start = self.mark();
            let value = self.parse_expression(scope, 0)?;
            self.expect(TokenKind::Keyword(Keyword::As), "\"as\"")?;
            let identifier = self.expect_identifier("with clause name")?;
            let clause = self.new_node(
                ExprKind::WithClause {
                    value,
                    identifier,
                    found_in_scope: with_scope,
                },
                clause_start,
            );
            self.ast.scope_add_item(with_scope, identifier, clause);
            clauses.push(clause);
            if self.peek() == &TokenKind::Comma {
                self.advance();
            } else {
                break;
            }
        }
        let body = self.parse_block(with_scope)?;
        Ok(self.new_node(
            ExprKind::With {
                scope: with_scope,
                clauses,
                body,
            },
            start,
        ))
    }

    fn parse_expression_statement(&mut self, scope: ScopeId) -> PResult<NodeId> {
        let start = self.mark();
        let expr = self.parse_expression(scope, 0)?;

        let assign_op = match self.peek() {
            TokenKind::Assign => Some(AssignOpKind::Assign),
            TokenKind::PlusAssign => Some(AssignOpKind::AddAssign),
            TokenKind::MinusAssign => Some(AssignOpKind::SubtractAssign),
            TokenKind::StarAssign => Some(AssignOpKind::MultiplyAssign),
            TokenKind::SlashAssign => Some(AssignOpKind::DivideAssign),
            _ => None,
        };

        if let Some(op) = assign_op {
            self.advance();
            let valid_lvalue = match &self.ast.node(expr).kind {
                ExprKind::IdentifierRef(_) => true,
                ExprKind::BinaryOp { op, .. } => {
                    matches!(op, BinOpKind::Attribute | BinOpKind::Index)
                }
                _ => false,
            };
            if !valid_lvalue {
                self.error_at(
                    start,
                    "left-hand side of assignment must be a variable, attribute or \
                     indexed value"
                        .to_owned(),
                );
                return Err(());
            }
            let rvalue = self.parse_expression(scope, 0)?;
            return Ok(self.new_node(
                ExprKind::Assign {
                    lvalue: expr,
                    rvalue,
                    op,
                },
                start,
            ));
        }

        if matches!(self.ast.node(expr).kind, ExprKind::Call(_)) {
            return Ok(self.new_node(ExprKind::CallStmt { call: expr }, start));
        }
        self.error_at(
            start,
            "expression statement has no effect, only calls and assignments can \
             stand alone"
                .to_owned(),
        );
        Err(())
    }

    // ------------------------------
    // Expressions
    // ------------------------------

    /// A nongreedy reference expression: operand plus its postfix chain
    /// but no binary operators. Used for `new`/`await` operands, `extends`
    /// targets and rescue error types.
    fn parse_nongreedy_reference(&mut self, scope: ScopeId) -> PResult<NodeId> {
        let operand = self.parse_operand(scope)?;
        self.parse_postfix(scope, operand)
    }

    fn parse_expression(&mut self, scope: ScopeId, min_prec: u8) -> PResult<NodeId> {
        self.recursion_depth += 1;
        if self.recursion_depth > MAX_PARSE_RECURSION {
            self.recursion_depth -= 1;
            let here = self.mark();
            self.error_at(
                here,
                format!("expression exceeds maximum nesting depth of {MAX_PARSE_RECURSION}"),
            );
            return Err(());
        }
        let parsed = (|| {
            let lhs = self.parse_unary(scope)?;
            self.climb_binary(scope, lhs, min_prec)
        })();
        self.recursion_depth -= 1;
        parsed
    }

    fn climb_binary(&mut self, scope: ScopeId, mut lhs: NodeId, min_prec: u8) -> PResult<NodeId> {
        loop {
            let Some(op) = self.peek_binary_op() else {
                return Ok(lhs);
            };
            let prec = op.precedence();
            if prec < min_prec {
                return Ok(lhs);
            }
            let op_mark = self.mark();
            self.advance();
            let next_min = if op.right_associative() { prec } else { prec + 1 };
            let rhs = self.parse_expression(scope, next_min)?;
            lhs = self.new_node(ExprKind::BinaryOp { op, lhs, rhs }, op_mark);
        }
    }

    fn peek_binary_op(&self) -> Option<BinOpKind> {
        Some(match self.peek() {
            TokenKind::DoubleStar => BinOpKind::Power,
            TokenKind::Star => BinOpKind::Multiply,
            TokenKind::Slash => BinOpKind::Divide,
            TokenKind::Percent => BinOpKind::Modulo,
            TokenKind::Plus => BinOpKind::Add,
            TokenKind::Minus => BinOpKind::Subtract,
            TokenKind::CmpEqual => BinOpKind::CmpEqual,
            TokenKind::CmpNotEqual => BinOpKind::CmpNotEqual,
            TokenKind::CmpLarger => BinOpKind::CmpLarger,
            TokenKind::CmpSmaller => BinOpKind::CmpSmaller,
            TokenKind::CmpLargerOrEqual => BinOpKind::CmpLargerOrEqual,
            TokenKind::CmpSmallerOrEqual => BinOpKind::CmpSmallerOrEqual,
            TokenKind::Keyword(Keyword::And) => BinOpKind::BoolAnd,
            TokenKind::Keyword(Keyword::Or) => BinOpKind::BoolOr,
            _ => return None,
        })
    }

    fn parse_unary(&mut self, scope: ScopeId) -> PResult<NodeId> {
        match self.peek() {
            TokenKind::Minus => {
                let start = self.mark();
                self.advance();
                let operand = self.parse_unary(scope)?;
                Ok(self.new_node(
                    ExprKind::UnaryOp {
                        op: UnaryOpKind::Negate,
                        operand,
                    },
                    start,
                ))
            }
            TokenKind::Keyword(Keyword::Not) => {
                let start = self.mark();
                self.advance();
                let operand = self.parse_expression(scope, NOT_OPERAND_MIN_PREC)?;
                Ok(self.new_node(
                    ExprKind::UnaryOp {
                        op: UnaryOpKind::Not,
                        operand,
                    },
                    start,
                ))
            }
            TokenKind::Keyword(Keyword::New) => {
                let start = self.mark();
                self.advance();
                // new binds exactly one call expression, nongreedy.
                let operand = self.parse_nongreedy_reference(scope)?;
                if !matches!(self.ast.node(operand).kind, ExprKind::Call(_)) {
                    self.error_at(start, "expected call expression after \"new\"".to_owned());
                    return Err(());
                }
                Ok(self.new_node(
                    ExprKind::UnaryOp {
                        op: UnaryOpKind::New,
                        operand,
                    },
                    start,
                ))
            }
            TokenKind::Keyword(Keyword::Await) => {
                let start = self.mark();
                self.advance();
                let operand = self.parse_nongreedy_reference(scope)?;
                Ok(self.new_node(
                    ExprKind::UnaryOp {
                        op: UnaryOpKind::Await,
                        operand,
                    },
                    start,
                ))
            }
            _ => {
                let operand = self.parse_operand(scope)?;
                self.parse_postfix(scope, operand)
            }
        }
    }

    fn parse_operand(&mut self, scope: ScopeId) -> PResult<NodeId> {
        let start = self.mark();
        match self.peek().clone() {
            TokenKind::IntLiteral(value) => {
                self.advance();
                Ok(self.new_node(ExprKind::Literal(LiteralValue::Int(value)), start))
            }
            TokenKind::FloatLiteral(value) => {
                self.advance();
                Ok(self.new_node(ExprKind::Literal(LiteralValue::Float(value)), start))
            }
            TokenKind::BoolLiteral(value) => {
                self.advance();
                Ok(self.new_node(ExprKind::Literal(LiteralValue::Bool(value)), start))
            }
            TokenKind::NoneLiteral => {
                self.advance();
                Ok(self.new_node(ExprKind::Literal(LiteralValue::None), start))
            }
            TokenKind::StrLiteral(codepoints) => {
                self.advance();
                Ok(self.new_node(ExprKind::Literal(LiteralValue::Str(codepoints)), start))
            }
            TokenKind::BytesLiteral(bytes) => {
                self.advance();
                Ok(self.new_node(ExprKind::Literal(LiteralValue::Bytes(bytes)), start))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(self.new_node(
                    ExprKind::IdentifierRef(IdentifierRefData {
                        name,
                        resolved_to_def: None,
                        resolved_to_expr: None,
                        resolved_to_builtin: false,
                    }),
                    start,
                ))
            }
            TokenKind::ParenOpen => {
                self.advance();
                let inner = self.parse_expression(scope, 0)?;
                self.expect(TokenKind::ParenClose, "\")\"")?;
                Ok(inner)
            }
            TokenKind::BracketOpen => self.parse_list_literal(scope),
            TokenKind::BraceOpen => self.parse_set_or_map_literal(scope),
            TokenKind::Keyword(Keyword::Vector) => {
                self.advance();
                self.expect(TokenKind::BracketOpen, "\"[\" after \"vector\"")?;
                let mut entries = Vec::new();
                loop {
                    if self.peek() == &TokenKind::BracketClose {
                        self.advance();
                        break;
                    }
                    entries.push(self.parse_expression(scope, 0)?);
                    match self.peek() {
                        TokenKind::Comma => self.advance(),
                        TokenKind::BracketClose => {}
                        _ => {
                            self.error_here(
                                "expected \",\" or \"]\" in vector literal".to_owned(),
                            )?;
                        }
                    }
                }
                Ok(self.new_node(ExprKind::VectorLiteral { entries }, start))
            }
            TokenKind::Keyword(Keyword::Func) => self.parse_funcdef(scope, true),
            _ => {
                let found = self.token().describe(self.string_table);
                self.error_here(format!("unexpected {found} in expression"))?;
                Err(())
            }
        }
    }

    fn parse_list_literal(&mut self, scope: ScopeId) -> PResult<NodeId> {
        let start = self.mark();
        self.advance(); // [
        let mut entries = Vec::new();
        loop {
            if self.peek() == &TokenKind::BracketClose {
                self.advance();
                break;
            }
            entries.push(self.parse_expression(scope, 0)?);
            match self.peek() {
                TokenKind::Comma => self.advance(),
                TokenKind::BracketClose => {}
                _ => {
                    self.error_here("expected \",\" or \"]\" in list literal".to_owned())?;
                }
            }
        }
        Ok(self.new_node(ExprKind::ListLiteral { entries }, start))
    }

    /// `{a, b}` is a set, `{k -> v}` a map, `{->}` the empty map and `{}`
    /// the empty set.
    fn parse_set_or_map_literal(&mut self, scope: ScopeId) -> PResult<NodeId> {
        let start = self.mark();
        self.advance(); // {

        if self.peek() == &TokenKind::MapArrow {
            self.advance();
            self.expect(TokenKind::BraceClose, "\"}\" to close the empty map")?;
            return Ok(self.new_node(
                ExprKind::MapLiteral {
                    keys: Vec::new(),
                    values: Vec::new(),
                },
                start,
            ));
        }
        if self.peek() == &TokenKind::BraceClose {
            self.advance();
            return Ok(self.new_node(ExprKind::SetLiteral { entries: Vec::new() }, start));
        }

        let first = self.parse_expression(scope, 0)?;
        if self.peek() == &TokenKind::MapArrow {
            let mut keys = vec![first];
            let mut values = Vec::new();
            self.advance();
            values.push(self.parse_expression(scope, 0)?);
            loop {
                match self.peek() {
                    TokenKind::Comma => {
                        self.advance();
                        keys.push(self.parse_expression(scope, 0)?);
                        self.expect(TokenKind::MapArrow, "\"->\" in map literal")?;
                        values.push(self.parse_expression(scope, 0)?);
                    }
                    TokenKind::BraceClose => {
                        self.advance();
                        break;
                    }
                    _ => {
                        self.error_here("expected \",\" or \"}\" in map literal".to_owned())?;
                    }
                }
            }
            return Ok(self.new_node(ExprKind::MapLiteral { keys, values }, start));
        }

        let mut entries = vec![first];
        loop {
            match self.peek() {
                TokenKind::Comma => {
                    self.advance();
                    entries.push(self.parse_expression(scope, 0)?);
                }
                TokenKind::BraceClose => {
                    self.advance();
                    break;
                }
                _ => {
                    self.error_here("expected \",\" or \"}\" in set literal".to_owned())?;
                }
            }
        }
        Ok(self.new_node(ExprKind::SetLiteral { entries }, start))
    }

    /// Postfix chain: attribute access, indexing and calls. A call's
    /// opening paren must sit on the same line as what it calls, so that
    /// a fresh statement on the next line is never swallowed as a call.
    fn parse_postfix(&mut self, scope: ScopeId, mut value: NodeId) -> PResult<NodeId> {
        loop {
            match self.peek() {
                TokenKind::Dot => {
                    let op_mark = self.mark();
                    self.advance();
                    let attr_mark = self.mark();
                    let name = self.expect_identifier("attribute name")?;
                    let rhs = self.new_node(
                        ExprKind::IdentifierRef(IdentifierRefData {
                            name,
                            resolved_to_def: None,
                            resolved_to_expr: None,
                            resolved_to_builtin: false,
                        }),
                        attr_mark,
                    );
                    value = self.new_node(
                        ExprKind::BinaryOp {
                            op: BinOpKind::Attribute,
                            lhs: value,
                            rhs,
                        },
                        op_mark,
                    );
                }
                TokenKind::BracketOpen => {
                    let op_mark = self.mark();
                    self.advance();
                    let index = self.parse_expression(scope, 0)?;
                    self.expect(TokenKind::BracketClose, "\"]\"")?;
                    value = self.new_node(
                        ExprKind::BinaryOp {
                            op: BinOpKind::Index,
                            lhs: value,
                            rhs: index,
                        },
                        op_mark,
                    );
                }
                TokenKind::ParenOpen => {
                    let paren_line = self.token().line;
                    let callee_line = if self.pos > 0 {
                        self.tokens[self.pos - 1].line
                    } else {
                        paren_line
                    };
                    if paren_line != callee_line {
                        return Ok(value);
                    }
                    let op_mark = self.mark();
                    let args = self.parse_call_args(scope)?;
                    value = self.new_node(
                        ExprKind::Call(CallData {
                            callee: value,
                            args,
                            is_async: false,
                        }),
                        op_mark,
                    );
                }
                _ => return Ok(value),
            }
        }
    }

    fn parse_call_args(&mut self, scope: ScopeId) -> PResult<CallArgs> {
        self.expect(TokenKind::ParenOpen, "\"(\"")?;
        let mut args = CallArgs::default();
        loop {
            if self.peek() == &TokenKind::ParenClose {
                self.advance();
                break;
            }
            // identifier "=" starts a keyword argument:
            let is_kwarg = matches!(self.peek(), TokenKind::Identifier(_))
                && self.peek_at(1) == &TokenKind::Assign;
            if is_kwarg {
                let name = match self.peek() {
                    TokenKind::Identifier(id) => *id,
                    _ => unreachable!(),
                };
                self.advance();
                self.advance();
                let value = self.parse_expression(scope, 0)?;
                args.kw_names.push(name);
                args.kw_values.push(value);
            } else {
                if !args.kw_names.is_empty() {
                    self.error_here(
                        "positional argument cannot follow keyword arguments in call"
                            .to_owned(),
                    )?;
                }
                let value = self.parse_expression(scope, 0)?;
                args.pos_args.push(value);
                if self.peek() == &TokenKind::Ellipsis {
                    self.advance();
                    args.expand_last_posarg = true;
                    self.expect(
                        TokenKind::ParenClose,
                        "\")\" after the expanded multi-arg argument",
                    )?;
                    break;
                }
            }
            match self.peek() {
                TokenKind::Comma => self.advance(),
                TokenKind::ParenClose => {}
                _ => {
                    self.error_here("expected \",\" or \")\" in call arguments".to_owned())?;
                }
            }
        }
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compiler_messages::results::ResultMessages;
    use crate::compiler::tokenizer::lexer::tokenize;

    fn parse_source(source: &str) -> (Ast, StringTable) {
        let mut string_table = StringTable::new();
        let config = WarningConfig::default();
        let mut lex_result = ResultMessages::new();
        let tokens = tokenize(
            source.as_bytes(),
            &config,
            &mut string_table,
            &mut lex_result,
        )
        .expect("lexing should succeed");
        let ast = parse_tokens(&tokens, "file:///test.h64", &mut string_table, &config);
        (ast, string_table)
    }

    fn parse_ok(source: &str) -> (Ast, StringTable) {
        let (ast, table) = parse_source(source);
        assert!(
            ast.result.success,
            "unexpected parse errors: {:?}",
            ast.result.messages
        );
        (ast, table)
    }

    #[test]
    fn vardef_with_value() {
        let (ast, table) = parse_ok("var x = 1 + 2 * 3");
        assert_eq!(ast.root_stmts.len(), 1);
        let ExprKind::VarDef(vardef) = &ast.node(ast.root_stmts[0]).kind else {
            panic!("expected vardef");
        };
        assert_eq!(vardef.identifier.resolve(&table), "x");
        // 1 + (2 * 3): the root of the value is the addition.
        let ExprKind::BinaryOp { op, rhs, .. } = &ast.node(vardef.value.unwrap()).kind else {
            panic!("expected binary op value");
        };
        assert_eq!(*op, BinOpKind::Add);
        let ExprKind::BinaryOp { op: inner, .. } = &ast.node(*rhs).kind else {
            panic!("expected nested multiply");
        };
        assert_eq!(*inner, BinOpKind::Multiply);
    }

    #[test]
    fn funcdef_args_and_kwargs() {
        let (ast, table) = parse_ok("func f(a, b = 2) { return a + b }");
        let ExprKind::FuncDef(funcdef) = &ast.node(ast.root_stmts[0]).kind else {
            panic!("expected funcdef");
        };
        assert_eq!(funcdef.name.unwrap().resolve(&table), "f");
        assert_eq!(funcdef.arguments.arg_count(), 2);
        assert!(funcdef.arguments.arg_values[0].is_none());
        assert!(funcdef.arguments.arg_values[1].is_some());
        assert_eq!(funcdef.body.len(), 1);
        // Both argument names resolve in the function scope.
        for name in ["a", "b"] {
            let id = table.get_existing(name).unwrap();
            assert!(ast.scope_query_item(funcdef.scope, id, false).is_some());
        }
    }

    #[test]
    fn multiarg_must_be_last() {
        let (ast, _) = parse_source("func f(rest..., x) { }");
        assert!(!ast.result.success);
    }

    #[test]
    fn new_requires_a_call() {
        let (ast, _) = parse_source("var x = new Missing");
        assert!(!ast.result.success);

        let (ast, _) = parse_ok("var x = new Thing(1, 2)");
        let ExprKind::VarDef(vardef) = &ast.node(ast.root_stmts[0]).kind else {
            panic!("expected vardef");
        };
        let ExprKind::UnaryOp { op, operand } = &ast.node(vardef.value.unwrap()).kind else {
            panic!("expected unary new");
        };
        assert_eq!(*op, UnaryOpKind::New);
        assert!(matches!(ast.node(*operand).kind, ExprKind::Call(_)));
    }

    #[test]
    fn class_with_base_and_members() {
        let (ast, table) =
            parse_ok("class B extends A {\n    var y = 2\n    func init { self.y = 3 }\n}");
        let ExprKind::ClassDef(classdef) = &ast.node(ast.root_stmts[0]).kind else {
            panic!("expected classdef");
        };
        assert_eq!(classdef.name.resolve(&table), "B");
        assert!(classdef.base_class_ref.is_some());
        assert_eq!(classdef.vardefs.len(), 1);
        assert_eq!(classdef.funcdefs.len(), 1);
    }

    #[test]
    fn if_chain_shapes() {
        let (ast, _) = parse_ok("if a { } elseif b { } else { }");
        let ExprKind::If { clauses } = &ast.node(ast.root_stmts[0]).kind else {
            panic!("expected if");
        };
        assert_eq!(clauses.len(), 3);
        assert!(clauses[0].cond.is_some());
        assert!(clauses[1].cond.is_some());
        assert!(clauses[2].cond.is_none());
    }

    #[test]
    fn do_rescue_finally() {
        let (ast, table) =
            parse_ok("do { risky() } rescue Exception as e { handle(e) } finally { cleanup() }");
        let ExprKind::Do(dostmt) = &ast.node(ast.root_stmts[0]).kind else {
            panic!("expected do");
        };
        assert!(dostmt.has_rescue);
        assert!(dostmt.has_finally);
        assert_eq!(dostmt.errors.len(), 1);
        assert_eq!(dostmt.error_name.unwrap().resolve(&table), "e");
        assert_eq!(dostmt.body.len(), 1);
        assert_eq!(dostmt.rescue_body.len(), 1);
        assert_eq!(dostmt.finally_body.len(), 1);
    }

    #[test]
    fn do_without_rescue_or_finally_errors() {
        let (ast, _) = parse_source("do { risky() }");
        assert!(!ast.result.success);
    }

    #[test]
    fn with_clauses_register_names() {
        let (ast, table) = parse_ok("with open(p) as f { f.read() }");
        let ExprKind::With { scope, clauses, .. } = &ast.node(ast.root_stmts[0]).kind else {
            panic!("expected with");
        };
        assert_eq!(clauses.len(), 1);
        let f = table.get_existing("f").unwrap();
        assert!(ast.scope_query_item(*scope, f, false).is_some());
    }

    #[test]
    fn import_chain_and_alias() {
        let (ast, table) = parse_ok("import net.fetch from corelibs\nimport net.serve");
        let ExprKind::Import(import) = &ast.node(ast.root_stmts[0]).kind else {
            panic!("expected import");
        };
        assert_eq!(import.elements.len(), 2);
        assert_eq!(import.source_library.unwrap().resolve(&table), "corelibs");
        // The second import shares the bound name "net":
        let net = table.get_existing("net").unwrap();
        let def = ast
            .scope_query_item(ast.global_scope, net, false)
            .expect("net bound");
        assert_eq!(ast.def(def).additional_decls.len(), 1);
    }

    #[test]
    fn call_statement_and_kwargs() {
        let (ast, _) = parse_ok("f(1, 2, mode = 3)");
        let ExprKind::CallStmt { call } = &ast.node(ast.root_stmts[0]).kind else {
            panic!("expected call stmt");
        };
        let ExprKind::Call(call_data) = &ast.node(*call).kind else {
            panic!("expected call");
        };
        assert_eq!(call_data.args.pos_args.len(), 2);
        assert_eq!(call_data.args.kw_names.len(), 1);
    }

    #[test]
    fn call_paren_must_share_line() {
        // `var x = f` followed by a fresh statement that starts with a
        // paren-ish call: the call must not attach across the line break.
        let (ast, _) = parse_ok("var x = f\ng()");
        assert_eq!(ast.root_stmts.len(), 2);
        let ExprKind::VarDef(vardef) = &ast.node(ast.root_stmts[0]).kind else {
            panic!("expected vardef");
        };
        assert!(matches!(
            ast.node(vardef.value.unwrap()).kind,
            ExprKind::IdentifierRef(_)
        ));
    }

    #[test]
    fn collection_literals() {
        let (ast, _) = parse_ok(
            "var l = [1, 2]\nvar s = {1, 2}\nvar m = {\"k\" -> 1}\nvar e = {->}\nvar v = vector [1.0, 2.0]",
        );
        let kinds: Vec<&'static str> = ast
            .root_stmts
            .iter()
            .map(|stmt| {
                let ExprKind::VarDef(vardef) = &ast.node(*stmt).kind else {
                    panic!("expected vardef");
                };
                ast.node(vardef.value.unwrap()).kind.type_name()
            })
            .collect();
        assert_eq!(kinds, vec!["list", "set", "map", "map", "vector"]);
    }

    #[test]
    fn not_binds_looser_than_comparisons() {
        let (ast, _) = parse_ok("var x = not a == b");
        let ExprKind::VarDef(vardef) = &ast.node(ast.root_stmts[0]).kind else {
            panic!("expected vardef");
        };
        let ExprKind::UnaryOp { op, operand } = &ast.node(vardef.value.unwrap()).kind else {
            panic!("expected unary not at the root");
        };
        assert_eq!(*op, UnaryOpKind::Not);
        assert!(matches!(
            ast.node(*operand).kind,
            ExprKind::BinaryOp {
                op: BinOpKind::CmpEqual,
                ..
            }
        ));
    }

    #[test]
    fn parents_are_linked() {
        let (ast, _) = parse_ok("var x = 1 + 2");
        let ExprKind::VarDef(vardef) = &ast.node(ast.root_stmts[0]).kind else {
            panic!("expected vardef");
        };
        let value = vardef.value.unwrap();
        assert_eq!(ast.node(value).parent, Some(ast.root_stmts[0]));
        for child in ast.children(value) {
            assert_eq!(ast.node(child).parent, Some(value));
        }
    }

    #[test]
    fn deep_nesting_hits_recursion_limit() {
        let mut source = String::from("var x = ");
        for _ in 0..(MAX_PARSE_RECURSION + 8) {
            source.push('(');
        }
        source.push('1');
        for _ in 0..(MAX_PARSE_RECURSION + 8) {
            source.push(')');
        }
        let (ast, _) = parse_source(&source);
        assert!(!ast.result.success);
    }

    #[test]
    fn async_call_statement() {
        let (ast, _) = parse_ok("async f(1)");
        let ExprKind::CallStmt { call } = &ast.node(ast.root_stmts[0]).kind else {
            panic!("expected call stmt");
        };
        let ExprKind::Call(call_data) = &ast.node(*call).kind else {
            panic!("expected call");
        };
        assert!(call_data.is_async);
    }

    #[test]
    fn shadowing_warning_fires() {
        let (ast, _) = parse_ok("var x = 1\nfunc f { var x = 2 }");
        assert!(
            ast.result
                .messages
                .iter()
                .any(|m| m.message.contains("shadows"))
        );
    }
}
