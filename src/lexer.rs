//! Lexer for Bismut
//!
//! The raw token classes come from the `logos` definitions in
//! [`crate::token`]. This wrapper owns the context-sensitive half of the
//! job: newlines are significant statement terminators EXCEPT inside
//! unclosed `()`/`[]`/`{}` (tracked with a bracket-depth counter),
//! consecutive newlines coalesce into one token, comments are captured for
//! doc-comment attachment and then dropped, and literal escape sequences
//! are validated with exact source positions.

use crate::span::{SourceId, Span};
use crate::token::{Token, TokenKind};
use logos::Logos;
use thiserror::Error;

/// Lexer errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexError {
    #[error("unexpected character {ch:?}")]
    UnexpectedChar { ch: char, span: Span },

    #[error("unterminated string literal")]
    UnterminatedString { span: Span },

    #[error("unknown escape '\\{ch}'")]
    BadEscape { ch: char, span: Span },
}

impl LexError {
    pub fn span(&self) -> Span {
        match self {
            LexError::UnexpectedChar { span, .. } => *span,
            LexError::UnterminatedString { span } => *span,
            LexError::BadEscape { span, .. } => *span,
        }
    }
}

/// A comment that started its line, recorded for doc-comment attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentLine {
    /// Byte offset of the `#`.
    pub offset: usize,
    /// Comment text without the `#` and one leading space.
    pub text: String,
}

/// The lexer for Bismut
pub struct Lexer<'src> {
    source: &'src str,
    source_id: SourceId,
    inner: logos::Lexer<'src, TokenKind>,
    errors: Vec<LexError>,
    comments: Vec<CommentLine>,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str, source_id: SourceId) -> Self {
        Self {
            source,
            source_id,
            inner: TokenKind::lexer(source),
            errors: Vec::new(),
            comments: Vec::new(),
        }
    }

    fn span(&self) -> Span {
        let r = self.inner.span();
        Span::new(self.source_id, r.start, r.end)
    }

    /// Collect the whole token stream. Newlines inside brackets are
    /// dropped, runs of newlines collapse to one token, and the stream
    /// always ends with a single `Eof` token.
    pub fn tokenize(mut self) -> (Vec<Token>, Vec<CommentLine>, Vec<LexError>) {
        let source = self.source;
        let mut tokens: Vec<Token> = Vec::new();
        let mut depth: u32 = 0;

        while let Some(result) = self.inner.next() {
            let span = self.span();
            match result {
                Ok(TokenKind::Newline) => {
                    if depth > 0 {
                        continue;
                    }
                    if tokens.last().map(|t| t.kind) == Some(TokenKind::Newline) {
                        continue;
                    }
                    tokens.push(Token::new(TokenKind::Newline, span));
                }
                Ok(TokenKind::Comment) => {
                    let standalone = tokens.is_empty()
                        || tokens.last().map(|t| t.kind) == Some(TokenKind::Newline);
                    if standalone {
                        let raw = &source[span.start + 1..span.end];
                        let text = raw.strip_prefix(' ').unwrap_or(raw);
                        self.comments.push(CommentLine { offset: span.start, text: text.to_string() });
                    }
                }
                Ok(kind) => {
                    match kind {
                        TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => depth += 1,
                        TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                            depth = depth.saturating_sub(1);
                        }
                        TokenKind::StringLiteral
                        | TokenKind::TripleStringLiteral
                        | TokenKind::CharLiteral => {
                            self.check_escapes(span, kind);
                        }
                        _ => {}
                    }
                    tokens.push(Token::new(kind, span));
                }
                Err(()) => {
                    let text = &source[span.start..span.end];
                    let first = text.chars().next().unwrap_or('\0');
                    if first == '"' || first == '\'' {
                        self.errors.push(LexError::UnterminatedString { span });
                        // The rest of the line cannot lex sensibly; skip to
                        // the next newline so one bad literal yields one error.
                        let rest = self.inner.remainder();
                        let skip = rest.find('\n').unwrap_or(rest.len());
                        self.inner.bump(skip);
                    } else {
                        self.errors.push(LexError::UnexpectedChar { ch: first, span });
                    }
                }
            }
        }

        let end = self.source.len();
        tokens.push(Token::new(TokenKind::Eof, Span::point(self.source_id, end)));
        (tokens, self.comments, self.errors)
    }

    /// Validate every escape sequence inside a string/char literal.
    fn check_escapes(&mut self, span: Span, kind: TokenKind) {
        let source = self.source;
        let text = &source[span.start..span.end];
        let allow_nul = kind == TokenKind::CharLiteral;
        let bytes = text.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'\\' && i + 1 < bytes.len() {
                let esc = bytes[i + 1] as char;
                let ok = matches!(esc, 'n' | 't' | 'r' | '\\' | '"' | '\'') || (allow_nul && esc == '0');
                if !ok {
                    self.errors.push(LexError::BadEscape {
                        ch: esc,
                        span: Span::new(span.source, span.start + i, span.start + i + 2),
                    });
                }
                i += 2;
            } else {
                i += 1;
            }
        }
    }
}

/// Helper function to lex source code
pub fn lex(source: &str, source_id: SourceId) -> (Vec<Token>, Vec<CommentLine>, Vec<LexError>) {
    Lexer::new(source, source_id).tokenize()
}

// ============ Literal decoding ============

/// Decode a string literal token (including its quotes) to its byte content.
/// Escapes are assumed to have been validated by the lexer; anything
/// unrecognized decodes to the escaped character itself.
pub fn decode_string(raw: &str) -> String {
    let body = if raw.len() >= 6 && (raw.starts_with("\"\"\"") || raw.starts_with("'''")) {
        &raw[3..raw.len() - 3]
    } else {
        &raw[1..raw.len() - 1]
    };
    decode_escapes(body)
}

fn decode_escapes(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Decode a char literal token like `'A'` or `'\n'` to its integer value.
pub fn char_value(raw: &str) -> i64 {
    let body = &raw[1..raw.len() - 1];
    let mut chars = body.chars();
    match chars.next() {
        Some('\\') => match chars.next() {
            Some('n') => 10,
            Some('t') => 9,
            Some('r') => 13,
            Some('\\') => 92,
            Some('\'') => 39,
            Some('"') => 34,
            Some('0') => 0,
            Some(other) => other as i64,
            None => 0,
        },
        Some(c) => c as i64,
        None => 0,
    }
}

/// Parse an integer literal (decimal, `0x...`, `0b...`, `_` separators).
/// Returns the value and the radix it was written in.
pub fn parse_int(text: &str) -> Option<(i64, u32)> {
    let cleaned: String = text.chars().filter(|&c| c != '_').collect();
    if let Some(hex) = cleaned.strip_prefix("0x").or_else(|| cleaned.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).ok().map(|v| (v as i64, 16));
    }
    if let Some(bin) = cleaned.strip_prefix("0b").or_else(|| cleaned.strip_prefix("0B")) {
        return u64::from_str_radix(bin, 2).ok().map(|v| (v as i64, 2));
    }
    cleaned.parse::<u64>().ok().map(|v| (v as i64, 10))
}

/// Parse a float literal (`_` separators allowed in the digits).
pub fn parse_float(text: &str) -> Option<f64> {
    let cleaned: String = text.chars().filter(|&c| c != '_').collect();
    cleaned.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::SourceId;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let (tokens, _, errors) = lex(source, SourceId(0));
        assert!(errors.is_empty(), "lex errors: {:?}", errors);
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_empty_source() {
        assert_eq!(kinds(""), vec![TokenKind::Eof]);
    }

    #[test]
    fn test_keywords_and_idents() {
        assert_eq!(
            kinds("def foo end"),
            vec![TokenKind::Def, TokenKind::Ident, TokenKind::End, TokenKind::Eof]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("42 0xFF 0b1010 3.14 1_000"),
            vec![
                TokenKind::IntLiteral,
                TokenKind::IntLiteral,
                TokenKind::IntLiteral,
                TokenKind::FloatLiteral,
                TokenKind::IntLiteral,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_newline_terminator() {
        assert_eq!(
            kinds("x := 1\ny := 2"),
            vec![
                TokenKind::Ident,
                TokenKind::ColonEq,
                TokenKind::IntLiteral,
                TokenKind::Newline,
                TokenKind::Ident,
                TokenKind::ColonEq,
                TokenKind::IntLiteral,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_blank_lines_coalesce() {
        assert_eq!(
            kinds("a\n\n\n  \n\nb"),
            vec![TokenKind::Ident, TokenKind::Newline, TokenKind::Ident, TokenKind::Eof]
        );
    }

    #[test]
    fn test_newlines_suppressed_in_brackets() {
        assert_eq!(
            kinds("f(1,\n   2,\n   3)"),
            vec![
                TokenKind::Ident,
                TokenKind::LParen,
                TokenKind::IntLiteral,
                TokenKind::Comma,
                TokenKind::IntLiteral,
                TokenKind::Comma,
                TokenKind::IntLiteral,
                TokenKind::RParen,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_char_vs_string_disambiguation() {
        assert_eq!(kinds("'a'"), vec![TokenKind::CharLiteral, TokenKind::Eof]);
        assert_eq!(kinds(r"'\n'"), vec![TokenKind::CharLiteral, TokenKind::Eof]);
        assert_eq!(kinds("'hello'"), vec![TokenKind::StringLiteral, TokenKind::Eof]);
        assert_eq!(kinds("\"x\""), vec![TokenKind::StringLiteral, TokenKind::Eof]);
    }

    #[test]
    fn test_triple_quoted_spans_lines() {
        let src = "\"\"\"line1\nline2\"\"\"";
        let (tokens, _, errors) = lex(src, SourceId(0));
        assert!(errors.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::TripleStringLiteral);
        assert_eq!(tokens[0].text(src), src);
    }

    #[test]
    fn test_comments_dropped_and_captured() {
        let src = "# leading doc\nx := 1 # trailing\n";
        let (tokens, comments, errors) = lex(src, SourceId(0));
        assert!(errors.is_empty());
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident,
                TokenKind::ColonEq,
                TokenKind::IntLiteral,
                TokenKind::Newline,
                TokenKind::Eof
            ]
        );
        // Only the standalone comment is captured.
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].text, "leading doc");
    }

    #[test]
    fn test_operators_max_munch() {
        assert_eq!(
            kinds("<<= << <= <"),
            vec![TokenKind::ShlEq, TokenKind::Shl, TokenKind::LtEq, TokenKind::Lt, TokenKind::Eof]
        );
        assert_eq!(kinds(":="), vec![TokenKind::ColonEq, TokenKind::Eof]);
    }

    #[test]
    fn test_unterminated_string() {
        let (_, _, errors) = lex("x := \"abc\n", SourceId(0));
        assert!(matches!(errors[0], LexError::UnterminatedString { .. }));
    }

    #[test]
    fn test_bad_escape() {
        let (_, _, errors) = lex(r#""a\qb""#, SourceId(0));
        assert!(matches!(errors[0], LexError::BadEscape { ch: 'q', .. }));
    }

    #[test]
    fn test_unknown_char() {
        let (_, _, errors) = lex("x := 1 @", SourceId(0));
        assert!(matches!(errors[0], LexError::UnexpectedChar { ch: '@', .. }));
    }

    #[test]
    fn test_decode_helpers() {
        assert_eq!(decode_string(r#""a\tb""#), "a\tb");
        assert_eq!(decode_string("'''x\ny'''"), "x\ny");
        assert_eq!(char_value("'A'"), 65);
        assert_eq!(char_value(r"'\n'"), 10);
        assert_eq!(char_value(r"'\0'"), 0);
        assert_eq!(parse_int("0xFF"), Some((255, 16)));
        assert_eq!(parse_int("0b1010"), Some((10, 2)));
        assert_eq!(parse_int("1_000"), Some((1000, 10)));
    }
}
