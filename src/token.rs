//! Token definitions for Bismut
//!
//! This module defines all the tokens that the lexer can produce. The raw
//! token classes are described with `logos`; the surrounding [`crate::lexer`]
//! wrapper adds the context-sensitive parts (newline suppression inside
//! brackets, literal validation, comment capture).

use crate::span::Span;
use logos::{Lexer as RawLexer, Logos};
use std::fmt;

/// A token produced by the lexer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Get the text of this token from source
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.span.start..self.span.end]
    }
}

fn lex_triple_quoted(lex: &mut RawLexer<TokenKind>, quote: u8) -> bool {
    // The opening delimiter has been consumed; scan for the closing one,
    // honoring backslash escapes.
    let rest = lex.remainder().as_bytes();
    let mut i = 0;
    while i < rest.len() {
        match rest[i] {
            b'\\' => i += 2,
            c if c == quote && rest.get(i + 1) == Some(&quote) && rest.get(i + 2) == Some(&quote) => {
                lex.bump(i + 3);
                return true;
            }
            _ => i += 1,
        }
    }
    false
}

fn triple_double(lex: &mut RawLexer<TokenKind>) -> bool {
    lex_triple_quoted(lex, b'"')
}

fn triple_single(lex: &mut RawLexer<TokenKind>) -> bool {
    lex_triple_quoted(lex, b'\'')
}

/// All possible token types in Bismut
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\f]+")] // skip non-newline whitespace
pub enum TokenKind {
    // ============ Literals ============

    /// Integer literal: 42, 0xFF, 0b1010
    #[regex(r"[0-9][0-9_]*", priority = 3)]
    #[regex(r"0[xX][0-9a-fA-F][0-9a-fA-F_]*")]
    #[regex(r"0[bB][01][01_]*")]
    IntLiteral,

    /// Float literal: 3.14, 2.5e-3 (a dot with digits on both sides)
    #[regex(r"[0-9][0-9_]*\.[0-9][0-9_]*([eE][+-]?[0-9]+)?")]
    FloatLiteral,

    /// Double-quoted string: "hello"
    #[regex(r#""([^"\\\n]|\\.)*""#)]
    /// Single-quoted string with more than one character: 'hello'
    #[regex(r"'([^'\\\n]|\\.)*'", priority = 2)]
    StringLiteral,

    /// Triple-quoted string (may span lines): """text""" or '''text'''
    #[token("\"\"\"", triple_double)]
    #[token("'''", triple_single)]
    TripleStringLiteral,

    /// Character literal: a single-quoted single character, 'a' or '\n'
    #[regex(r"'([^'\\\n]|\\.)'", priority = 3)]
    CharLiteral,

    /// Comment: # to end of line (captured for doc comments, then dropped)
    #[regex(r"#[^\n]*")]
    Comment,

    /// One or more newlines (statement terminator; coalesced by the wrapper)
    #[regex(r"\n+")]
    Newline,

    // ============ Keywords ============

    #[token("def")]
    Def,
    #[token("end")]
    End,
    #[token("if")]
    If,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("return")]
    Return,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("is")]
    Is,
    #[token("as")]
    As,
    #[token("const")]
    Const,
    #[token("static")]
    Static,
    #[token("class")]
    Class,
    #[token("struct")]
    Struct,
    #[token("enum")]
    Enum,
    #[token("interface")]
    Interface,
    #[token("import")]
    Import,
    #[token("extern")]
    Extern,
    #[token("True")]
    True,
    #[token("False")]
    False,
    #[token("None")]
    None,

    // ============ Primitive type names ============

    #[token("i8")]
    I8,
    #[token("i16")]
    I16,
    #[token("i32")]
    I32,
    #[token("i64")]
    I64,
    #[token("u8")]
    U8,
    #[token("u16")]
    U16,
    #[token("u32")]
    U32,
    #[token("u64")]
    U64,
    #[token("f32")]
    F32,
    #[token("f64")]
    F64,
    #[token("bool")]
    Bool,
    #[token("str")]
    Str,
    #[token("void")]
    Void,

    // ============ Operators ============

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,

    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,

    #[token("=")]
    Eq,
    #[token(":=")]
    ColonEq,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,
    #[token("%=")]
    PercentEq,
    #[token("&=")]
    AmpEq,
    #[token("|=")]
    PipeEq,
    #[token("^=")]
    CaretEq,
    #[token("<<=")]
    ShlEq,
    #[token(">>=")]
    ShrEq,

    #[token("->")]
    Arrow,

    // ============ Delimiters ============

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,

    // ============ Punctuation ============

    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,

    // ============ Identifiers ============

    /// Identifier: foo, _bar, Circle
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,

    /// End of file
    Eof,
}

impl TokenKind {
    /// Token kinds usable as a type name in type position.
    pub fn is_type_name(&self) -> bool {
        matches!(
            self,
            TokenKind::Ident | TokenKind::Void | TokenKind::Bool | TokenKind::Str
        ) || self.is_numeric_type()
    }

    pub fn is_numeric_type(&self) -> bool {
        matches!(
            self,
            TokenKind::I8
                | TokenKind::I16
                | TokenKind::I32
                | TokenKind::I64
                | TokenKind::U8
                | TokenKind::U16
                | TokenKind::U32
                | TokenKind::U64
                | TokenKind::F32
                | TokenKind::F64
        )
    }

    pub fn is_assign_op(&self) -> bool {
        matches!(
            self,
            TokenKind::Eq
                | TokenKind::PlusEq
                | TokenKind::MinusEq
                | TokenKind::StarEq
                | TokenKind::SlashEq
                | TokenKind::PercentEq
                | TokenKind::AmpEq
                | TokenKind::PipeEq
                | TokenKind::CaretEq
                | TokenKind::ShlEq
                | TokenKind::ShrEq
        )
    }

    pub fn is_stmt_end(&self) -> bool {
        matches!(self, TokenKind::Newline | TokenKind::Semicolon)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::IntLiteral => "integer literal",
            TokenKind::FloatLiteral => "float literal",
            TokenKind::StringLiteral => "string literal",
            TokenKind::TripleStringLiteral => "string literal",
            TokenKind::CharLiteral => "char literal",
            TokenKind::Comment => "comment",
            TokenKind::Newline => "newline",
            TokenKind::Def => "def",
            TokenKind::End => "end",
            TokenKind::If => "if",
            TokenKind::Elif => "elif",
            TokenKind::Else => "else",
            TokenKind::While => "while",
            TokenKind::For => "for",
            TokenKind::In => "in",
            TokenKind::Return => "return",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::And => "and",
            TokenKind::Or => "or",
            TokenKind::Not => "not",
            TokenKind::Is => "is",
            TokenKind::As => "as",
            TokenKind::Const => "const",
            TokenKind::Static => "static",
            TokenKind::Class => "class",
            TokenKind::Struct => "struct",
            TokenKind::Enum => "enum",
            TokenKind::Interface => "interface",
            TokenKind::Import => "import",
            TokenKind::Extern => "extern",
            TokenKind::True => "True",
            TokenKind::False => "False",
            TokenKind::None => "None",
            TokenKind::I8 => "i8",
            TokenKind::I16 => "i16",
            TokenKind::I32 => "i32",
            TokenKind::I64 => "i64",
            TokenKind::U8 => "u8",
            TokenKind::U16 => "u16",
            TokenKind::U32 => "u32",
            TokenKind::U64 => "u64",
            TokenKind::F32 => "f32",
            TokenKind::F64 => "f64",
            TokenKind::Bool => "bool",
            TokenKind::Str => "str",
            TokenKind::Void => "void",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::LtEq => "<=",
            TokenKind::GtEq => ">=",
            TokenKind::Amp => "&",
            TokenKind::Pipe => "|",
            TokenKind::Caret => "^",
            TokenKind::Tilde => "~",
            TokenKind::Shl => "<<",
            TokenKind::Shr => ">>",
            TokenKind::Eq => "=",
            TokenKind::ColonEq => ":=",
            TokenKind::PlusEq => "+=",
            TokenKind::MinusEq => "-=",
            TokenKind::StarEq => "*=",
            TokenKind::SlashEq => "/=",
            TokenKind::PercentEq => "%=",
            TokenKind::AmpEq => "&=",
            TokenKind::PipeEq => "|=",
            TokenKind::CaretEq => "^=",
            TokenKind::ShlEq => "<<=",
            TokenKind::ShrEq => ">>=",
            TokenKind::Arrow => "->",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            TokenKind::Colon => ":",
            TokenKind::Dot => ".",
            TokenKind::Ident => "identifier",
            TokenKind::Eof => "end of file",
        };
        write!(f, "{}", s)
    }
}
