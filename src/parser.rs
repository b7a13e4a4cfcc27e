//! Parser for Bismut
//!
//! A recursive descent parser over the materialized token stream, with a
//! precedence-climbing core for expressions. Statement-level dispatch is
//! keyed on the leading token (plus small fixed lookahead for `a, b :=`,
//! `x :=`, `x: T =`, and assignment forms). Blocks are closed with `end`.
//!
//! Errors are collected rather than fatal: on a statement-level error the
//! parser records the diagnostic and synchronizes to the next statement
//! boundary, so one mistake does not hide the rest of the file.

use crate::ast::*;
use crate::lexer::{self, CommentLine};
use crate::span::{Source, Span};
use crate::token::{Token, TokenKind};
use std::collections::HashSet;
use thiserror::Error;

/// Parser errors
#[derive(Error, Debug, Clone)]
pub enum ParseError {
    #[error("expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: TokenKind, span: Span },

    #[error("{message}")]
    Custom { message: String, span: Span },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::UnexpectedToken { span, .. } => *span,
            ParseError::Custom { span, .. } => *span,
        }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Container/builtin names that take `[T]` / `[K,V]` type arguments at call
/// sites; user generic functions are added by the prescan.
const BUILTIN_GENERICS: [&str; 12] = [
    "List", "Dict", "append", "get", "set", "put", "lookup", "has", "keys", "pop", "remove",
    "identity",
];

/// The parser for Bismut
pub struct Parser<'a> {
    toks: Vec<Token>,
    i: usize,
    source: &'a Source,
    ids: &'a mut IdGen,
    /// Standalone comment lines as (1-based line, text), for doc comments.
    comments: Vec<(u32, String)>,
    /// Names callable with `name[T](...)` syntax.
    generic_names: HashSet<String>,
    errors: Vec<ParseError>,
}

impl<'a> Parser<'a> {
    pub fn new(
        toks: Vec<Token>,
        comments: Vec<CommentLine>,
        source: &'a Source,
        ids: &'a mut IdGen,
    ) -> Self {
        debug_assert!(matches!(toks.last(), Some(t) if t.kind == TokenKind::Eof));
        let comments = comments
            .into_iter()
            .map(|c| (source.position(c.offset).line, c.text))
            .collect();
        let mut parser = Self {
            toks,
            i: 0,
            source,
            ids,
            comments,
            generic_names: BUILTIN_GENERICS.iter().map(|s| s.to_string()).collect(),
            errors: Vec::new(),
        };
        parser.prescan_generic_names();
        parser
    }

    /// Scan the token stream for `def IDENT [` so generic calls can be told
    /// apart from subscripts without unbounded lookahead.
    fn prescan_generic_names(&mut self) {
        for w in self.toks.windows(3) {
            if w[0].kind == TokenKind::Def
                && w[1].kind == TokenKind::Ident
                && w[2].kind == TokenKind::LBracket
            {
                self.generic_names.insert(w[1].text(&self.source.content).to_string());
            }
        }
    }

    /// Consecutive standalone comment lines directly above `decl_line`.
    fn get_doc(&self, decl_line: u32) -> String {
        let mut target = decl_line.saturating_sub(1);
        let mut lines: Vec<&str> = Vec::new();
        for (line, text) in self.comments.iter().rev() {
            if *line == target {
                lines.push(text);
                target -= 1;
            } else if *line < target {
                break;
            }
        }
        lines.reverse();
        lines.join("\n")
    }

    // ---- token helpers ----

    fn peek(&self) -> Token {
        self.toks[self.i.min(self.toks.len() - 1)]
    }

    fn peek_nth(&self, n: usize) -> Token {
        self.toks[(self.i + n).min(self.toks.len() - 1)]
    }

    fn at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let t = self.peek();
        if !self.at_end() {
            self.i += 1;
        }
        t
    }

    fn prev_span(&self) -> Span {
        if self.i == 0 {
            self.peek().span
        } else {
            self.toks[self.i - 1].span
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> Option<Token> {
        if self.check(kind) {
            Some(self.advance())
        } else {
            None
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> ParseResult<Token> {
        let t = self.peek();
        if t.kind == kind {
            Ok(self.advance())
        } else {
            Err(ParseError::UnexpectedToken {
                expected: expected.to_string(),
                found: t.kind,
                span: t.span,
            })
        }
    }

    fn expect_ident(&mut self, expected: &str) -> ParseResult<Token> {
        let t = self.peek();
        if t.kind == TokenKind::Ident {
            Ok(self.advance())
        } else {
            Err(ParseError::UnexpectedToken {
                expected: expected.to_string(),
                found: t.kind,
                span: t.span,
            })
        }
    }

    fn text(&self, t: &Token) -> &str {
        t.text(&self.source.content)
    }

    fn ident_text(&mut self, expected: &str) -> ParseResult<(String, Span)> {
        let t = self.expect_ident(expected)?;
        Ok((self.text(&t).to_string(), t.span))
    }

    fn skip_newlines(&mut self) {
        while self.check(TokenKind::Newline) {
            self.advance();
        }
    }

    /// Accept one `;` or one-or-more newlines, then skip further newlines.
    fn expect_stmt_end(&mut self, msg: &str) -> ParseResult<()> {
        if self.matches(TokenKind::Semicolon).is_some() || self.matches(TokenKind::Newline).is_some()
        {
            self.skip_newlines();
            return Ok(());
        }
        if self.at_end() {
            return Ok(());
        }
        let t = self.peek();
        Err(ParseError::UnexpectedToken { expected: msg.to_string(), found: t.kind, span: t.span })
    }

    fn mk_expr(&mut self, span: Span, kind: ExprKind) -> Expr {
        Expr { id: self.ids.next(), span, kind }
    }

    fn mk_stmt(&mut self, span: Span, kind: StmtKind) -> Stmt {
        Stmt { id: self.ids.next(), span, kind }
    }

    // -------------------------
    // Top-level
    // -------------------------

    pub fn parse_program(mut self) -> (Program, Vec<ParseError>) {
        let mut prog = Program::default();
        self.skip_newlines();

        // Imports and externs must come first.
        while matches!(self.peek().kind, TokenKind::Import | TokenKind::Extern) {
            let result = if self.check(TokenKind::Import) {
                self.parse_import().map(|d| prog.imports.push(d))
            } else {
                self.parse_extern().map(|d| prog.externs.push(d))
            };
            if let Err(e) = result {
                self.errors.push(e);
                self.synchronize_top();
            }
            self.skip_newlines();
        }

        while !self.at_end() {
            let result = match self.peek().kind {
                TokenKind::Def => self.parse_func_decl().map(|f| prog.funcs.push(f)),
                TokenKind::Class => self.parse_class_decl().map(|c| prog.classes.push(c)),
                TokenKind::Struct => self.parse_struct_decl().map(|s| prog.structs.push(s)),
                TokenKind::Interface => {
                    self.parse_interface_decl().map(|i| prog.interfaces.push(i))
                }
                TokenKind::Enum => self.parse_enum_decl().map(|e| prog.enums.push(e)),
                TokenKind::Import | TokenKind::Extern => {
                    let t = self.peek();
                    Err(ParseError::Custom {
                        message: "imports must precede all other top-level declarations"
                            .to_string(),
                        span: t.span,
                    })
                }
                _ => self.parse_stmt().map(|s| prog.stmts.push(s)),
            };
            if let Err(e) = result {
                self.errors.push(e);
                self.synchronize_top();
            }
            self.skip_newlines();
        }

        (prog, self.errors)
    }

    /// After a top-level error: skip to the next declaration keyword or
    /// statement boundary.
    fn synchronize_top(&mut self) {
        self.advance();
        while !self.at_end() {
            match self.peek().kind {
                TokenKind::Def
                | TokenKind::Class
                | TokenKind::Struct
                | TokenKind::Interface
                | TokenKind::Enum
                | TokenKind::Import
                | TokenKind::Extern => return,
                TokenKind::Newline | TokenKind::Semicolon => {
                    self.skip_newlines_and_semis();
                    return;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn skip_newlines_and_semis(&mut self) {
        while matches!(self.peek().kind, TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn parse_import(&mut self) -> ParseResult<ImportDecl> {
        let kw = self.expect(TokenKind::Import, "'import'")?;
        let (mut module, _) = self.ident_text("module name")?;
        while self.matches(TokenKind::Dot).is_some() {
            let (part, _) = self.ident_text("module name after '.'")?;
            module.push('.');
            module.push_str(&part);
        }
        let mut alias = module.rsplit('.').next().unwrap_or(&module).to_string();
        if self.matches(TokenKind::As).is_some() {
            alias = self.ident_text("alias after 'as'")?.0;
        }
        self.expect_stmt_end("end of statement after import")?;
        Ok(ImportDecl { span: kw.span, module, alias })
    }

    fn parse_extern(&mut self) -> ParseResult<ExternDecl> {
        let kw = self.expect(TokenKind::Extern, "'extern'")?;
        let (name, _) = self.ident_text("library name")?;
        let mut alias = name.clone();
        if self.matches(TokenKind::As).is_some() {
            alias = self.ident_text("alias after 'as'")?.0;
        }
        self.expect_stmt_end("end of statement after extern")?;
        Ok(ExternDecl { span: kw.span, name, alias })
    }

    fn parse_enum_decl(&mut self) -> ParseResult<EnumDecl> {
        let kw = self.expect(TokenKind::Enum, "'enum'")?;
        let doc = self.get_doc(self.source.position(kw.span.start).line);
        let (name, _) = self.ident_text("enum name")?;
        self.skip_newlines();

        let mut variants = Vec::new();
        while !self.check(TokenKind::End) && !self.at_end() {
            let vtok = self.expect_ident("enum variant name")?;
            let vname = self.text(&vtok).to_string();
            let mut value = None;
            if self.matches(TokenKind::Eq).is_some() {
                let negative = self.matches(TokenKind::Minus).is_some();
                let num = self.expect(TokenKind::IntLiteral, "integer value for enum variant")?;
                let (v, _) = lexer::parse_int(self.text(&num)).ok_or(ParseError::Custom {
                    message: "invalid integer literal".to_string(),
                    span: num.span,
                })?;
                value = Some(if negative { -v } else { v });
            }
            variants.push(EnumVariant { span: vtok.span, name: vname, value });
            if self.matches(TokenKind::Comma).is_none() {
                self.skip_newlines();
            }
        }

        self.expect(TokenKind::End, "'end' to close enum")?;
        self.expect_stmt_end("end of statement after 'end'")?;
        Ok(EnumDecl { span: kw.span, name, variants, doc })
    }

    fn parse_func_decl(&mut self) -> ParseResult<FuncDecl> {
        let kw = self.expect(TokenKind::Def, "'def'")?;
        let doc = self.get_doc(self.source.position(kw.span.start).line);
        let (name, _) = self.ident_text("function name")?;

        // Optional type parameters: def name[T, U](...)
        let mut type_params = Vec::new();
        if self.matches(TokenKind::LBracket).is_some() {
            loop {
                let (tp, _) = self.ident_text("type parameter name")?;
                type_params.push(tp);
                if self.matches(TokenKind::Comma).is_none() {
                    break;
                }
            }
            self.expect(TokenKind::RBracket, "']' to close type parameters")?;
        }

        self.expect(TokenKind::LParen, "'(' after function name")?;
        let params = self.parse_params()?;
        self.expect(TokenKind::RParen, "')' after parameters")?;

        // -> type is optional; omitting it means void.
        let ret = if self.matches(TokenKind::Arrow).is_some() {
            self.parse_type_ref()?
        } else {
            TypeRef { span: kw.span, ty: TyExpr::name("void") }
        };

        self.expect_stmt_end("newline or ';' after function signature")?;
        let body = self.parse_block_until(&[TokenKind::End]);
        self.expect(TokenKind::End, "'end' to close function")?;
        self.expect_stmt_end("end of statement after 'end'")?;

        Ok(FuncDecl {
            span: kw.span,
            name,
            type_params,
            params,
            ret,
            body,
            extern_c_name: None,
            doc,
        })
    }

    fn parse_params(&mut self) -> ParseResult<Vec<Param>> {
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                params.push(self.parse_param()?);
                if self.matches(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        Ok(params)
    }

    fn parse_param(&mut self) -> ParseResult<Param> {
        let (name, span) = self.ident_text("parameter name")?;
        // 'self' carries no type annotation; the checker binds it.
        if name == "self" {
            return Ok(Param { span, name, ty: TypeRef { span, ty: TyExpr::name("Self") } });
        }
        self.expect(TokenKind::Colon, "':' after parameter name")?;
        let ty = self.parse_type_ref()?;
        Ok(Param { span, name, ty })
    }

    fn parse_class_decl(&mut self) -> ParseResult<ClassDecl> {
        let kw = self.expect(TokenKind::Class, "'class'")?;
        let doc = self.get_doc(self.source.position(kw.span.start).line);
        let (name, _) = self.ident_text("class name")?;

        // Optional implements clause: class Foo: IBar, mod.IBaz
        let mut implements = Vec::new();
        if self.matches(TokenKind::Colon).is_some() {
            loop {
                let (mut iname, _) = self.ident_text("interface name")?;
                if self.check(TokenKind::Dot) {
                    self.advance();
                    let (member, _) = self.ident_text("interface name after '.'")?;
                    iname = format!("{}__{}", iname, member);
                }
                implements.push(iname);
                if self.matches(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        self.expect_stmt_end("newline after class header")?;

        let (fields, methods) = self.parse_fields_and_methods("class")?;
        self.expect(TokenKind::End, "'end' to close class")?;
        self.expect_stmt_end("end of statement after class 'end'")?;
        Ok(ClassDecl { span: kw.span, name, fields, methods, implements, doc })
    }

    fn parse_struct_decl(&mut self) -> ParseResult<StructDecl> {
        let kw = self.expect(TokenKind::Struct, "'struct'")?;
        let doc = self.get_doc(self.source.position(kw.span.start).line);
        let (name, _) = self.ident_text("struct name")?;
        self.expect_stmt_end("newline after struct header")?;

        let (fields, methods) = self.parse_fields_and_methods("struct")?;
        self.expect(TokenKind::End, "'end' to close struct")?;
        self.expect_stmt_end("end of statement after struct 'end'")?;
        Ok(StructDecl { span: kw.span, name, fields, methods, doc })
    }

    fn parse_fields_and_methods(
        &mut self,
        container: &str,
    ) -> ParseResult<(Vec<FieldDecl>, Vec<FuncDecl>)> {
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        self.skip_newlines();
        while !self.at_end() && !self.check(TokenKind::End) {
            if self.check(TokenKind::Def) {
                methods.push(self.parse_func_decl()?);
            } else if self.check(TokenKind::Ident) && self.peek_nth(1).kind == TokenKind::Colon {
                let (fname, fspan) = self.ident_text("field name")?;
                self.expect(TokenKind::Colon, "':'")?;
                let fty = self.parse_type_ref()?;
                self.expect_stmt_end("newline after field declaration")?;
                fields.push(FieldDecl { span: fspan, name: fname, ty: fty });
            } else {
                let t = self.peek();
                return Err(ParseError::Custom {
                    message: format!("expected field declaration or method def in {}", container),
                    span: t.span,
                });
            }
            self.skip_newlines();
        }
        Ok((fields, methods))
    }

    fn parse_interface_decl(&mut self) -> ParseResult<InterfaceDecl> {
        let kw = self.expect(TokenKind::Interface, "'interface'")?;
        let doc = self.get_doc(self.source.position(kw.span.start).line);
        let (name, _) = self.ident_text("interface name")?;
        self.expect_stmt_end("newline after interface name")?;

        let mut methods = Vec::new();
        self.skip_newlines();
        while !self.at_end() && !self.check(TokenKind::End) {
            if self.check(TokenKind::Def) {
                methods.push(self.parse_method_sig()?);
            } else {
                let t = self.peek();
                return Err(ParseError::Custom {
                    message: "expected method signature in interface".to_string(),
                    span: t.span,
                });
            }
            self.skip_newlines();
        }

        self.expect(TokenKind::End, "'end' to close interface")?;
        self.expect_stmt_end("end of statement after interface 'end'")?;
        Ok(InterfaceDecl { span: kw.span, name, methods, doc })
    }

    fn parse_method_sig(&mut self) -> ParseResult<MethodSig> {
        let kw = self.expect(TokenKind::Def, "'def'")?;
        let (name, _) = self.ident_text("method name")?;
        self.expect(TokenKind::LParen, "'(' after method name")?;
        let params = self.parse_params()?;
        self.expect(TokenKind::RParen, "')' after parameters")?;
        let ret = if self.matches(TokenKind::Arrow).is_some() {
            self.parse_type_ref()?
        } else {
            TypeRef { span: kw.span, ty: TyExpr::name("void") }
        };
        self.expect_stmt_end("newline after method signature")?;
        Ok(MethodSig { span: kw.span, name, params, ret })
    }

    // -------------------------
    // Types
    // -------------------------

    pub fn parse_type_ref(&mut self) -> ParseResult<TypeRef> {
        // Tuple type: (T1, T2, ...)
        if self.check(TokenKind::LParen) {
            return self.parse_tuple_type();
        }

        let t = self.peek();
        if !t.kind.is_type_name() {
            return Err(ParseError::UnexpectedToken {
                expected: "type name".to_string(),
                found: t.kind,
                span: t.span,
            });
        }
        self.advance();
        let mut name = self.text(&t).to_string();

        // Fn(T1, T2) -> R function pointer type
        if name == "Fn" && self.check(TokenKind::LParen) {
            self.advance();
            let mut params = Vec::new();
            if !self.check(TokenKind::RParen) {
                loop {
                    params.push(self.parse_type_ref()?.ty);
                    if self.matches(TokenKind::Comma).is_none() {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RParen, "')' to close Fn parameter types")?;
            let ret = if self.matches(TokenKind::Arrow).is_some() {
                self.parse_type_ref()?.ty
            } else {
                TyExpr::name("void")
            };
            let span = t.span.merge(self.prev_span());
            return Ok(TypeRef { span, ty: TyExpr::Fn(params, Box::new(ret)) });
        }

        // Dotted type: module.Type
        if self.check(TokenKind::Dot) && self.peek_nth(1).kind == TokenKind::Ident {
            self.advance();
            let (member, _) = self.ident_text("type name after '.'")?;
            name = format!("{}__{}", name, member);
        }

        // List[X] / Dict[K,V] generic syntax
        if name == "List" && self.check(TokenKind::LBracket) {
            self.advance();
            let inner = self.parse_type_ref()?.ty;
            self.expect(TokenKind::RBracket, "']' to close generic type")?;
            let span = t.span.merge(self.prev_span());
            return Ok(TypeRef { span, ty: TyExpr::List(Box::new(inner)) });
        }
        if name == "Dict" && self.check(TokenKind::LBracket) {
            self.advance();
            let key = self.parse_type_ref()?.ty;
            self.expect(TokenKind::Comma, "',' between Dict key and value types")?;
            let val = self.parse_type_ref()?.ty;
            self.expect(TokenKind::RBracket, "']' to close generic type")?;
            let span = t.span.merge(self.prev_span());
            return Ok(TypeRef { span, ty: TyExpr::Dict(Box::new(key), Box::new(val)) });
        }

        Ok(TypeRef { span: t.span, ty: TyExpr::Name(name) })
    }

    fn parse_tuple_type(&mut self) -> ParseResult<TypeRef> {
        let lparen = self.expect(TokenKind::LParen, "'(' for tuple type")?;
        let mut types = vec![self.parse_type_ref()?.ty];
        while self.matches(TokenKind::Comma).is_some() {
            types.push(self.parse_type_ref()?.ty);
        }
        self.expect(TokenKind::RParen, "')' to close tuple type")?;
        if types.len() < 2 {
            return Err(ParseError::Custom {
                message: "tuple type must have at least 2 elements".to_string(),
                span: lparen.span,
            });
        }
        let span = lparen.span.merge(self.prev_span());
        Ok(TypeRef { span, ty: TyExpr::Tuple(types) })
    }

    // -------------------------
    // Statements
    // -------------------------

    pub fn parse_stmt(&mut self) -> ParseResult<Stmt> {
        match self.peek().kind {
            TokenKind::If => return self.parse_if(),
            TokenKind::While => return self.parse_while(),
            TokenKind::For => return self.parse_for(),
            TokenKind::Return => return self.parse_return(),
            TokenKind::Break => {
                let t = self.advance();
                self.expect_stmt_end("end of statement after 'break'")?;
                return Ok(self.mk_stmt(t.span, StmtKind::Break));
            }
            TokenKind::Continue => {
                let t = self.advance();
                self.expect_stmt_end("end of statement after 'continue'")?;
                return Ok(self.mk_stmt(t.span, StmtKind::Continue));
            }
            TokenKind::Def => {
                let t = self.peek();
                return Err(ParseError::Custom {
                    message: "function declarations are only allowed at top level".to_string(),
                    span: t.span,
                });
            }
            TokenKind::Const => {
                self.advance();
                return self.parse_var_decl(true, false);
            }
            TokenKind::Static => {
                self.advance();
                return self.parse_var_decl(false, true);
            }
            _ => {}
        }

        if self.check(TokenKind::Ident) {
            match self.peek_nth(1).kind {
                // tuple destructuring: a, b [, c ...] := expr
                TokenKind::Comma => return self.parse_destructure(),
                // walrus declaration: a := expr
                TokenKind::ColonEq => return self.parse_walrus_decl(),
                // typed declaration: a: T = expr
                TokenKind::Colon => return self.parse_var_decl(false, false),
                // member assignment: a.b op expr (incl. self.field = ...)
                TokenKind::Dot
                    if self.peek_nth(2).kind == TokenKind::Ident
                        && self.peek_nth(3).kind.is_assign_op() =>
                {
                    return self.parse_member_assign();
                }
                // plain assignment: a op expr
                k if k.is_assign_op() => return self.parse_assign(),
                _ => {}
            }
        }

        // Expression statement, or subscript/chained-member assignment.
        let expr = self.parse_expr()?;

        if self.peek().kind.is_assign_op() {
            let op_tok = self.advance();
            let op = assign_op(op_tok.kind);
            let value = self.parse_expr()?;
            self.expect_stmt_end("end of statement after assignment")?;
            let span = expr.span.merge(self.prev_span());
            match expr.kind {
                ExprKind::Index { obj, index } => {
                    return Ok(self.mk_stmt(
                        span,
                        StmtKind::IndexAssign { obj: *obj, index: *index, op, value },
                    ));
                }
                ExprKind::Member { obj, member } => {
                    return Ok(
                        self.mk_stmt(span, StmtKind::MemberAssign { obj: *obj, member, op, value })
                    );
                }
                _ => {
                    return Err(ParseError::Custom {
                        message: "invalid assignment target".to_string(),
                        span: op_tok.span,
                    });
                }
            }
        }

        self.expect_stmt_end("end of statement after expression")?;
        let span = expr.span;
        Ok(self.mk_stmt(span, StmtKind::Expr(expr)))
    }

    fn parse_var_decl(&mut self, is_const: bool, is_static: bool) -> ParseResult<Stmt> {
        let (name, name_span) = self.ident_text("variable name")?;
        // `const x := ...` / `static x := ...` keep the inferred form.
        if self.check(TokenKind::ColonEq) {
            self.advance();
            let value = self.parse_expr()?;
            self.expect_stmt_end("end of statement after declaration")?;
            let span = name_span.merge(self.prev_span());
            return Ok(self.mk_stmt(
                span,
                StmtKind::VarDecl { name, ty: None, value, is_const, is_static },
            ));
        }
        self.expect(TokenKind::Colon, "':' in variable declaration")?;
        let ty = self.parse_type_ref()?;
        self.expect(TokenKind::Eq, "'=' in variable declaration")?;
        let value = self.parse_expr()?;
        self.expect_stmt_end("end of statement after variable declaration")?;
        let span = name_span.merge(self.prev_span());
        Ok(self.mk_stmt(span, StmtKind::VarDecl { name, ty: Some(ty), value, is_const, is_static }))
    }

    fn parse_walrus_decl(&mut self) -> ParseResult<Stmt> {
        let (name, name_span) = self.ident_text("variable name")?;
        self.expect(TokenKind::ColonEq, "':='")?;
        let value = self.parse_expr()?;
        self.expect_stmt_end("end of statement after := declaration")?;
        let span = name_span.merge(self.prev_span());
        Ok(self.mk_stmt(
            span,
            StmtKind::VarDecl { name, ty: None, value, is_const: false, is_static: false },
        ))
    }

    fn parse_destructure(&mut self) -> ParseResult<Stmt> {
        let (first, first_span) = self.ident_text("variable name")?;
        let mut names = vec![first];
        while self.matches(TokenKind::Comma).is_some() {
            names.push(self.ident_text("variable name in destructuring")?.0);
        }
        self.expect(TokenKind::ColonEq, "':=' in tuple destructuring")?;
        let value = self.parse_expr()?;
        self.expect_stmt_end("end of statement after tuple destructuring")?;
        if names.len() < 2 {
            return Err(ParseError::Custom {
                message: "tuple destructuring requires at least 2 variables".to_string(),
                span: first_span,
            });
        }
        let span = first_span.merge(self.prev_span());
        Ok(self.mk_stmt(span, StmtKind::Destructure { names, value }))
    }

    fn parse_assign(&mut self) -> ParseResult<Stmt> {
        let (name, name_span) = self.ident_text("variable name")?;
        let op_tok = self.advance();
        let op = assign_op(op_tok.kind);
        let value = self.parse_expr()?;
        self.expect_stmt_end("end of statement after assignment")?;
        let span = name_span.merge(self.prev_span());
        Ok(self.mk_stmt(span, StmtKind::Assign { name, op, value }))
    }

    fn parse_member_assign(&mut self) -> ParseResult<Stmt> {
        let (obj_name, obj_span) = self.ident_text("object name")?;
        self.expect(TokenKind::Dot, "'.'")?;
        let (member, _) = self.ident_text("member name")?;
        let op_tok = self.advance();
        let op = assign_op(op_tok.kind);
        let value = self.parse_expr()?;
        self.expect_stmt_end("end of statement after member assignment")?;
        let obj = self.mk_expr(obj_span, ExprKind::Var(obj_name));
        let span = obj_span.merge(self.prev_span());
        Ok(self.mk_stmt(span, StmtKind::MemberAssign { obj, member, op, value }))
    }

    fn parse_return(&mut self) -> ParseResult<Stmt> {
        let kw = self.expect(TokenKind::Return, "'return'")?;
        if self.peek().kind.is_stmt_end() || self.at_end() {
            self.expect_stmt_end("end of statement after return")?;
            return Ok(self.mk_stmt(kw.span, StmtKind::Return(None)));
        }
        let value = self.parse_expr()?;
        self.expect_stmt_end("end of statement after return value")?;
        let span = kw.span.merge(self.prev_span());
        Ok(self.mk_stmt(span, StmtKind::Return(Some(value))))
    }

    fn parse_if(&mut self) -> ParseResult<Stmt> {
        let kw = self.expect(TokenKind::If, "'if'")?;
        let cond = self.parse_expr()?;
        self.expect_stmt_end("end of statement after if condition")?;

        let mut arms = Vec::new();
        let block = self.parse_block_until(&[TokenKind::Elif, TokenKind::Else, TokenKind::End]);
        arms.push(IfArm { span: kw.span, cond: Some(cond), block });

        while self.check(TokenKind::Elif) {
            let kw_elif = self.advance();
            let c = self.parse_expr()?;
            self.expect_stmt_end("end of statement after elif condition")?;
            let block = self.parse_block_until(&[TokenKind::Elif, TokenKind::Else, TokenKind::End]);
            arms.push(IfArm { span: kw_elif.span, cond: Some(c), block });
        }

        if self.check(TokenKind::Else) {
            let kw_else = self.advance();
            self.expect_stmt_end("end of statement after else")?;
            let block = self.parse_block_until(&[TokenKind::End]);
            arms.push(IfArm { span: kw_else.span, cond: None, block });
        }

        self.expect(TokenKind::End, "'end' to close if")?;
        self.expect_stmt_end("end of statement after 'end'")?;
        let span = kw.span.merge(self.prev_span());
        Ok(self.mk_stmt(span, StmtKind::If { arms }))
    }

    fn parse_while(&mut self) -> ParseResult<Stmt> {
        let kw = self.expect(TokenKind::While, "'while'")?;
        let cond = self.parse_expr()?;
        self.expect_stmt_end("end of statement after while condition")?;
        let body = self.parse_block_until(&[TokenKind::End]);
        self.expect(TokenKind::End, "'end' to close while")?;
        self.expect_stmt_end("end of statement after 'end'")?;
        let span = kw.span.merge(self.prev_span());
        Ok(self.mk_stmt(span, StmtKind::While { cond, body }))
    }

    fn parse_for(&mut self) -> ParseResult<Stmt> {
        let kw = self.expect(TokenKind::For, "'for'")?;
        let (var, _) = self.ident_text("loop variable name")?;
        self.expect(TokenKind::Colon, "':' after loop variable name")?;
        let var_ty = self.parse_type_ref()?;
        self.expect(TokenKind::In, "'in' after loop variable type")?;
        let iterable = self.parse_expr()?;
        self.expect_stmt_end("end of statement after for header")?;
        let body = self.parse_block_until(&[TokenKind::End]);
        self.expect(TokenKind::End, "'end' to close for")?;
        self.expect_stmt_end("end of statement after 'end'")?;
        let span = kw.span.merge(self.prev_span());
        Ok(self.mk_stmt(span, StmtKind::For { var, var_ty, iterable, body }))
    }

    /// Parse statements until the next token is one of `end_kinds`,
    /// recovering per statement so one error does not eat the block.
    fn parse_block_until(&mut self, end_kinds: &[TokenKind]) -> Block {
        let start = self.peek().span;
        let mut stmts = Vec::new();
        self.skip_newlines();
        while !self.at_end() && !end_kinds.contains(&self.peek().kind) {
            match self.parse_stmt() {
                Ok(s) => stmts.push(s),
                Err(e) => {
                    self.errors.push(e);
                    self.synchronize_stmt(end_kinds);
                }
            }
            self.skip_newlines();
        }
        Block { span: start.merge(self.prev_span()), stmts }
    }

    /// After a statement-level error: skip to the next statement boundary
    /// or block-closing keyword.
    fn synchronize_stmt(&mut self, end_kinds: &[TokenKind]) {
        while !self.at_end() {
            let k = self.peek().kind;
            if end_kinds.contains(&k) || k == TokenKind::End {
                return;
            }
            if k.is_stmt_end() {
                self.skip_newlines_and_semis();
                return;
            }
            self.advance();
        }
    }

    // -------------------------
    // Expressions (precedence climbing)
    // -------------------------

    pub fn parse_expr(&mut self) -> ParseResult<Expr> {
        self.parse_expr_bp(0)
    }

    fn parse_expr_bp(&mut self, min_bp: u8) -> ParseResult<Expr> {
        let t = self.advance();
        let mut left = self.nud(t)?;

        loop {
            let t2 = self.peek();

            // member access: expr.ident
            if t2.kind == TokenKind::Dot {
                self.advance();
                let (member, _) = self.ident_text("member name after '.'")?;
                let span = left.span.merge(self.prev_span());
                left = self.mk_expr(span, ExprKind::Member { obj: Box::new(left), member });
                continue;
            }

            // '[': generic call ident[T](...) or subscript expr[expr]
            if t2.kind == TokenKind::LBracket {
                let is_generic_call = matches!(
                    &left.kind,
                    ExprKind::Var(name) if self.generic_names.contains(name)
                );
                if is_generic_call {
                    self.advance();
                    let mut type_args = vec![self.parse_type_ref()?];
                    while self.matches(TokenKind::Comma).is_some() {
                        type_args.push(self.parse_type_ref()?);
                    }
                    self.expect(TokenKind::RBracket, "']' to close type parameters")?;
                    left = self.parse_call(left, type_args)?;
                    left = self.maybe_collection_lit(left)?;
                } else {
                    self.advance();
                    let index = self.parse_expr_bp(0)?;
                    self.expect(TokenKind::RBracket, "']' to close subscript")?;
                    let span = left.span.merge(self.prev_span());
                    left = self.mk_expr(
                        span,
                        ExprKind::Index { obj: Box::new(left), index: Box::new(index) },
                    );
                }
                continue;
            }

            // call: expr(...)
            if t2.kind == TokenKind::LParen {
                left = self.parse_call(left, Vec::new())?;
                continue;
            }

            // 'is' type test, binding like a comparison
            if t2.kind == TokenKind::Is {
                if COMPARE_PREC < min_bp {
                    break;
                }
                self.advance();
                let target = if self.check(TokenKind::None) {
                    self.advance();
                    None
                } else {
                    Some(self.parse_type_ref()?)
                };
                let span = left.span.merge(self.prev_span());
                left = self.mk_expr(span, ExprKind::Is { expr: Box::new(left), target });
                continue;
            }

            // 'as' downcast, binding like a comparison
            if t2.kind == TokenKind::As {
                if COMPARE_PREC < min_bp {
                    break;
                }
                self.advance();
                let target = self.parse_type_ref()?;
                let span = left.span.merge(self.prev_span());
                left = self.mk_expr(span, ExprKind::As { expr: Box::new(left), target });
                continue;
            }

            // binary operators
            if let Some((op, prec)) = binary_op(t2.kind) {
                if prec < min_bp {
                    break;
                }
                self.advance();
                let rhs = self.parse_expr_bp(prec + 1)?; // left associative
                let span = left.span.merge(rhs.span);
                left = self.mk_expr(
                    span,
                    ExprKind::Binary { op, lhs: Box::new(left), rhs: Box::new(rhs) },
                );
                continue;
            }

            break;
        }

        Ok(left)
    }

    fn nud(&mut self, t: Token) -> ParseResult<Expr> {
        match t.kind {
            TokenKind::IntLiteral => {
                let (value, radix) =
                    lexer::parse_int(self.text(&t)).ok_or_else(|| ParseError::Custom {
                        message: "invalid integer literal".to_string(),
                        span: t.span,
                    })?;
                Ok(self.mk_expr(t.span, ExprKind::Int { value, radix }))
            }
            TokenKind::FloatLiteral => {
                let value = lexer::parse_float(self.text(&t)).ok_or_else(|| ParseError::Custom {
                    message: "invalid float literal".to_string(),
                    span: t.span,
                })?;
                Ok(self.mk_expr(t.span, ExprKind::Float(value)))
            }
            TokenKind::StringLiteral | TokenKind::TripleStringLiteral => {
                let text = lexer::decode_string(self.text(&t));
                Ok(self.mk_expr(t.span, ExprKind::Str(text)))
            }
            TokenKind::CharLiteral => {
                let value = lexer::char_value(self.text(&t));
                Ok(self.mk_expr(t.span, ExprKind::Char(value)))
            }
            TokenKind::True => Ok(self.mk_expr(t.span, ExprKind::Bool(true))),
            TokenKind::False => Ok(self.mk_expr(t.span, ExprKind::Bool(false))),
            TokenKind::None => Ok(self.mk_expr(t.span, ExprKind::None)),
            // Identifiers, including primitive type names used as casts,
            // e.g. i64(x).
            k if k == TokenKind::Ident || k.is_type_name() => {
                let name = self.text(&t).to_string();
                Ok(self.mk_expr(t.span, ExprKind::Var(name)))
            }
            TokenKind::Not => {
                let rhs = self.parse_expr_bp(UNARY_PREC)?;
                let span = t.span.merge(rhs.span);
                Ok(self.mk_expr(span, ExprKind::Unary { op: UnaryOp::Not, rhs: Box::new(rhs) }))
            }
            TokenKind::Minus => {
                let rhs = self.parse_expr_bp(UNARY_PREC)?;
                let span = t.span.merge(rhs.span);
                Ok(self.mk_expr(span, ExprKind::Unary { op: UnaryOp::Neg, rhs: Box::new(rhs) }))
            }
            TokenKind::Tilde => {
                let rhs = self.parse_expr_bp(UNARY_PREC)?;
                let span = t.span.merge(rhs.span);
                Ok(self.mk_expr(span, ExprKind::Unary { op: UnaryOp::BitNot, rhs: Box::new(rhs) }))
            }
            TokenKind::LParen => {
                let inner = self.parse_expr_bp(0)?;
                if self.check(TokenKind::Comma) {
                    // Tuple expression: (a, b, ...)
                    let mut elems = vec![inner];
                    while self.matches(TokenKind::Comma).is_some() {
                        elems.push(self.parse_expr_bp(0)?);
                    }
                    self.expect(TokenKind::RParen, "')' to close tuple expression")?;
                    let span = t.span.merge(self.prev_span());
                    return Ok(self.mk_expr(span, ExprKind::Tuple(elems)));
                }
                self.expect(TokenKind::RParen, "')' to close parenthesized expression")?;
                Ok(inner)
            }
            _ => Err(ParseError::UnexpectedToken {
                expected: "expression".to_string(),
                found: t.kind,
                span: t.span,
            }),
        }
    }

    fn parse_call(&mut self, callee: Expr, type_args: Vec<TypeRef>) -> ParseResult<Expr> {
        self.expect(TokenKind::LParen, "'(' for call")?;
        let mut args = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                args.push(self.parse_expr_bp(0)?);
                if self.matches(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')' after call arguments")?;
        let span = callee.span.merge(self.prev_span());
        Ok(self.mk_expr(span, ExprKind::Call { callee: Box::new(callee), args, type_args }))
    }

    /// `List[T]()` / `Dict[K,V]()` directly followed by `{` is a collection
    /// literal; the constructor call must have zero positional arguments.
    fn maybe_collection_lit(&mut self, call: Expr) -> ParseResult<Expr> {
        if !self.check(TokenKind::LBrace) {
            return Ok(call);
        }
        let (name, arg_count, type_args) = match &call.kind {
            ExprKind::Call { callee, args, type_args } => match &callee.kind {
                ExprKind::Var(name) => (name.clone(), args.len(), type_args.clone()),
                _ => return Ok(call),
            },
            _ => return Ok(call),
        };
        if arg_count != 0 || type_args.is_empty() {
            return Ok(call);
        }
        match name.as_str() {
            "List" => {
                if type_args.len() != 1 {
                    return Err(ParseError::Custom {
                        message: "List takes exactly one type parameter".to_string(),
                        span: call.span,
                    });
                }
                let elem_ty = type_args.into_iter().next().unwrap();
                self.parse_list_lit(call.span, elem_ty)
            }
            "Dict" => {
                if type_args.len() != 2 {
                    return Err(ParseError::Custom {
                        message: "Dict takes exactly two type parameters".to_string(),
                        span: call.span,
                    });
                }
                let mut it = type_args.into_iter();
                let key_ty = it.next().unwrap();
                let val_ty = it.next().unwrap();
                self.parse_dict_lit(call.span, key_ty, val_ty)
            }
            _ => Ok(call),
        }
    }

    fn parse_list_lit(&mut self, start: Span, elem_ty: TypeRef) -> ParseResult<Expr> {
        self.expect(TokenKind::LBrace, "'{' for list literal")?;
        self.skip_newlines();
        let mut elems = Vec::new();
        while !self.check(TokenKind::RBrace) {
            elems.push(self.parse_expr_bp(0)?);
            if self.matches(TokenKind::Comma).is_some() {
                self.skip_newlines();
                continue;
            }
            self.skip_newlines();
            break;
        }
        self.expect(TokenKind::RBrace, "'}' to close list literal")?;
        let span = start.merge(self.prev_span());
        Ok(self.mk_expr(span, ExprKind::ListLit { elem_ty, elems }))
    }

    fn parse_dict_lit(&mut self, start: Span, key_ty: TypeRef, val_ty: TypeRef) -> ParseResult<Expr> {
        self.expect(TokenKind::LBrace, "'{' for dict literal")?;
        self.skip_newlines();
        let mut entries = Vec::new();
        while !self.check(TokenKind::RBrace) {
            let key = self.parse_expr_bp(0)?;
            self.expect(TokenKind::Colon, "':' between dict key and value")?;
            let val = self.parse_expr_bp(0)?;
            entries.push((key, val));
            if self.matches(TokenKind::Comma).is_some() {
                self.skip_newlines();
                continue;
            }
            self.skip_newlines();
            break;
        }
        self.expect(TokenKind::RBrace, "'}' to close dict literal")?;
        let span = start.merge(self.prev_span());
        Ok(self.mk_expr(span, ExprKind::DictLit { key_ty, val_ty, entries }))
    }
}

/// Binding power of the comparison tier (shared by `is` / `as`).
const COMPARE_PREC: u8 = 7;
/// Binding power of unary operators.
const UNARY_PREC: u8 = 11;

fn binary_op(kind: TokenKind) -> Option<(BinaryOp, u8)> {
    let entry = match kind {
        TokenKind::Or => (BinaryOp::Or, 1),
        TokenKind::And => (BinaryOp::And, 2),
        TokenKind::Pipe => (BinaryOp::BitOr, 3),
        TokenKind::Caret => (BinaryOp::BitXor, 4),
        TokenKind::Amp => (BinaryOp::BitAnd, 5),
        TokenKind::EqEq => (BinaryOp::Eq, 6),
        TokenKind::NotEq => (BinaryOp::Ne, 6),
        TokenKind::Lt => (BinaryOp::Lt, COMPARE_PREC),
        TokenKind::LtEq => (BinaryOp::Le, COMPARE_PREC),
        TokenKind::Gt => (BinaryOp::Gt, COMPARE_PREC),
        TokenKind::GtEq => (BinaryOp::Ge, COMPARE_PREC),
        TokenKind::Shl => (BinaryOp::Shl, 8),
        TokenKind::Shr => (BinaryOp::Shr, 8),
        TokenKind::Plus => (BinaryOp::Add, 9),
        TokenKind::Minus => (BinaryOp::Sub, 9),
        TokenKind::Star => (BinaryOp::Mul, 10),
        TokenKind::Slash => (BinaryOp::Div, 10),
        TokenKind::Percent => (BinaryOp::Rem, 10),
        _ => return None,
    };
    Some(entry)
}

fn assign_op(kind: TokenKind) -> AssignOp {
    match kind {
        TokenKind::Eq => AssignOp::Assign,
        TokenKind::PlusEq => AssignOp::Add,
        TokenKind::MinusEq => AssignOp::Sub,
        TokenKind::StarEq => AssignOp::Mul,
        TokenKind::SlashEq => AssignOp::Div,
        TokenKind::PercentEq => AssignOp::Rem,
        TokenKind::AmpEq => AssignOp::BitAnd,
        TokenKind::PipeEq => AssignOp::BitOr,
        TokenKind::CaretEq => AssignOp::BitXor,
        TokenKind::ShlEq => AssignOp::Shl,
        TokenKind::ShrEq => AssignOp::Shr,
        _ => unreachable!("not an assignment operator"),
    }
}

/// Parse an in-memory source into a program. Lex errors are reported as
/// parse errors at their positions.
pub fn parse(source: &Source, ids: &mut IdGen) -> (Program, Vec<ParseError>) {
    let (tokens, comments, lex_errors) = lexer::lex(&source.content, source.id);
    let mut errors: Vec<ParseError> = lex_errors
        .into_iter()
        .map(|e| ParseError::Custom { message: e.to_string(), span: e.span() })
        .collect();
    let (prog, parse_errors) = Parser::new(tokens, comments, source, ids).parse_program();
    errors.extend(parse_errors);
    (prog, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::SourceMap;

    fn parse_ok(src: &str) -> Program {
        let mut map = SourceMap::new();
        let id = map.add("<test>", src);
        let mut ids = IdGen::new();
        let (prog, errors) = parse(map.get(id), &mut ids);
        assert!(errors.is_empty(), "parse errors: {:?}", errors);
        prog
    }

    fn parse_err(src: &str) -> Vec<ParseError> {
        let mut map = SourceMap::new();
        let id = map.add("<test>", src);
        let mut ids = IdGen::new();
        let (_, errors) = parse(map.get(id), &mut ids);
        assert!(!errors.is_empty(), "expected parse errors");
        errors
    }

    #[test]
    fn test_function_decl() {
        let prog = parse_ok("def add(a: i64, b: i64) -> i64\n  return a + b\nend\n");
        assert_eq!(prog.funcs.len(), 1);
        let f = &prog.funcs[0];
        assert_eq!(f.name, "add");
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.ret.ty, TyExpr::name("i64"));
        assert_eq!(f.body.stmts.len(), 1);
    }

    #[test]
    fn test_void_function() {
        let prog = parse_ok("def hello()\n  print(\"hi\")\nend\n");
        assert_eq!(prog.funcs[0].ret.ty, TyExpr::name("void"));
    }

    #[test]
    fn test_generic_function_header() {
        let prog = parse_ok("def id[T](x: T) -> T\n  return x\nend\n");
        assert_eq!(prog.funcs[0].type_params, vec!["T".to_string()]);
    }

    #[test]
    fn test_generic_call_vs_subscript() {
        let prog = parse_ok("def id[T](x: T) -> T\n  return x\nend\nv := id[i64](7)\nw := xs[0]\n");
        match &prog.stmts[0].kind {
            StmtKind::VarDecl { value, .. } => match &value.kind {
                ExprKind::Call { type_args, .. } => {
                    assert_eq!(type_args.len(), 1);
                    assert_eq!(type_args[0].ty, TyExpr::name("i64"));
                }
                other => panic!("expected generic call, got {:?}", other),
            },
            other => panic!("unexpected stmt {:?}", other),
        }
        match &prog.stmts[1].kind {
            StmtKind::VarDecl { value, .. } => {
                assert!(matches!(value.kind, ExprKind::Index { .. }));
            }
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn test_class_with_implements() {
        let prog = parse_ok(
            "class Circle: IShape\n  r: f64\n\n  def init(self, r: f64)\n    self.r = r\n  end\n\n  def area(self) -> f64\n    return self.r * self.r * 3.14159\n  end\nend\n",
        );
        let c = &prog.classes[0];
        assert_eq!(c.name, "Circle");
        assert_eq!(c.implements, vec!["IShape".to_string()]);
        assert_eq!(c.fields.len(), 1);
        assert_eq!(c.methods.len(), 2);
    }

    #[test]
    fn test_interface_decl() {
        let prog = parse_ok("interface IShape\n  def area(self) -> f64\nend\n");
        let i = &prog.interfaces[0];
        assert_eq!(i.name, "IShape");
        assert_eq!(i.methods.len(), 1);
        assert_eq!(i.methods[0].params[0].name, "self");
    }

    #[test]
    fn test_enum_with_explicit_values() {
        let prog = parse_ok("enum Color\n  RED, GREEN = 5, BLUE\nend\n");
        let e = &prog.enums[0];
        assert_eq!(e.variants.len(), 3);
        assert_eq!(e.variants[0].value, None);
        assert_eq!(e.variants[1].value, Some(5));
        assert_eq!(e.variants[2].value, None);
    }

    #[test]
    fn test_imports_first() {
        let prog = parse_ok("import lib.shapes as sh\nimport util\n\nx := 1\n");
        assert_eq!(prog.imports.len(), 2);
        assert_eq!(prog.imports[0].module, "lib.shapes");
        assert_eq!(prog.imports[0].alias, "sh");
        assert_eq!(prog.imports[1].alias, "util");
    }

    #[test]
    fn test_precedence() {
        let prog = parse_ok("x := 1 + 2 * 3\n");
        // 1 + (2 * 3)
        match &prog.stmts[0].kind {
            StmtKind::VarDecl { value, .. } => match &value.kind {
                ExprKind::Binary { op: BinaryOp::Add, rhs, .. } => {
                    assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
                }
                other => panic!("expected +, got {:?}", other),
            },
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_left_associativity() {
        let prog = parse_ok("x := 10 - 3 - 2\n");
        match &prog.stmts[0].kind {
            StmtKind::VarDecl { value, .. } => match &value.kind {
                ExprKind::Binary { op: BinaryOp::Sub, lhs, .. } => {
                    assert!(matches!(lhs.kind, ExprKind::Binary { op: BinaryOp::Sub, .. }));
                }
                other => panic!("expected -, got {:?}", other),
            },
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_tuple_destructure() {
        let prog = parse_ok("a, b := pair()\n");
        match &prog.stmts[0].kind {
            StmtKind::Destructure { names, .. } => {
                assert_eq!(names, &vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn test_tuple_type_and_expr() {
        let prog = parse_ok("def pair() -> (i64, str)\n  return (42, \"hi\")\nend\n");
        let f = &prog.funcs[0];
        assert_eq!(
            f.ret.ty,
            TyExpr::Tuple(vec![TyExpr::name("i64"), TyExpr::name("str")])
        );
        match &f.body.stmts[0].kind {
            StmtKind::Return(Some(e)) => assert!(matches!(e.kind, ExprKind::Tuple(_))),
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn test_collection_literals() {
        let prog = parse_ok("xs := List[i64]() { 1, 2, 3 }\nd := Dict[str, i64]() { \"a\": 1 }\n");
        match &prog.stmts[0].kind {
            StmtKind::VarDecl { value, .. } => match &value.kind {
                ExprKind::ListLit { elem_ty, elems } => {
                    assert_eq!(elem_ty.ty, TyExpr::name("i64"));
                    assert_eq!(elems.len(), 3);
                }
                other => panic!("expected list literal, got {:?}", other),
            },
            _ => unreachable!(),
        }
        match &prog.stmts[1].kind {
            StmtKind::VarDecl { value, .. } => match &value.kind {
                ExprKind::DictLit { entries, .. } => assert_eq!(entries.len(), 1),
                other => panic!("expected dict literal, got {:?}", other),
            },
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_is_and_as() {
        let prog = parse_ok("b := s is Circle\nc := s as Circle\nn := s is None\n");
        assert!(matches!(
            &prog.stmts[0].kind,
            StmtKind::VarDecl { value, .. } if matches!(&value.kind, ExprKind::Is { target: Some(_), .. })
        ));
        assert!(matches!(
            &prog.stmts[1].kind,
            StmtKind::VarDecl { value, .. } if matches!(&value.kind, ExprKind::As { .. })
        ));
        assert!(matches!(
            &prog.stmts[2].kind,
            StmtKind::VarDecl { value, .. } if matches!(&value.kind, ExprKind::Is { target: None, .. })
        ));
    }

    #[test]
    fn test_fn_type() {
        let prog = parse_ok("f: Fn(i64, i64) -> i64 = add\n");
        match &prog.stmts[0].kind {
            StmtKind::VarDecl { ty: Some(ty), .. } => {
                assert_eq!(
                    ty.ty,
                    TyExpr::Fn(
                        vec![TyExpr::name("i64"), TyExpr::name("i64")],
                        Box::new(TyExpr::name("i64"))
                    )
                );
            }
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn test_dotted_type_mangled() {
        let prog = parse_ok("c: shapes.Circle = shapes.make()\n");
        match &prog.stmts[0].kind {
            StmtKind::VarDecl { ty: Some(ty), .. } => {
                assert_eq!(ty.ty, TyExpr::name("shapes__Circle"));
            }
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn test_subscript_assign() {
        let prog = parse_ok("xs[0] = 5\nd.field.inner = 1\n");
        assert!(matches!(prog.stmts[0].kind, StmtKind::IndexAssign { .. }));
        assert!(matches!(prog.stmts[1].kind, StmtKind::MemberAssign { .. }));
    }

    #[test]
    fn test_missing_end() {
        let errors = parse_err("def f()\n  x := 1\n");
        assert!(errors.iter().any(|e| e.to_string().contains("'end'")));
    }

    #[test]
    fn test_nested_def_rejected() {
        let errors = parse_err("def f()\n  def g()\n  end\nend\n");
        assert!(errors.iter().any(|e| e.to_string().contains("top level")));
    }

    #[test]
    fn test_error_recovery_continues() {
        let mut map = SourceMap::new();
        let id = map.add("<test>", "x := )\ny := 2\ndef f() -> i64\n  return 1\nend\n");
        let mut ids = IdGen::new();
        let (prog, errors) = parse(map.get(id), &mut ids);
        assert!(!errors.is_empty());
        // The parser recovered and still saw the later declarations.
        assert_eq!(prog.funcs.len(), 1);
    }

    #[test]
    fn test_doc_comment_attachment() {
        let prog = parse_ok("# Adds two numbers.\n# Really.\ndef add(a: i64, b: i64) -> i64\n  return a + b\nend\n");
        assert_eq!(prog.funcs[0].doc, "Adds two numbers.\nReally.");
    }

    #[test]
    fn test_multiline_call_args() {
        let prog = parse_ok("x := add(\n  1,\n  2\n)\n");
        match &prog.stmts[0].kind {
            StmtKind::VarDecl { value, .. } => match &value.kind {
                ExprKind::Call { args, .. } => assert_eq!(args.len(), 2),
                other => panic!("expected call, got {:?}", other),
            },
            _ => unreachable!(),
        }
    }
}
