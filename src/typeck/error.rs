//! Type error definitions
//!
//! Each error pairs a kind with the span it is reported at. Constructors
//! keep the checking code terse.

use crate::span::Span;
use crate::typeck::Ty;
use thiserror::Error;

pub type TypeResult<T> = Result<T, TypeError>;

#[derive(Debug, Clone)]
pub struct TypeError {
    pub kind: TypeErrorKind,
    pub span: Span,
}

impl TypeError {
    pub fn new(kind: TypeErrorKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn unknown_type(name: impl Into<String>, span: Span) -> Self {
        Self::new(TypeErrorKind::UnknownType { name: name.into() }, span)
    }

    pub fn undefined_variable(name: impl Into<String>, span: Span) -> Self {
        Self::new(TypeErrorKind::UndefinedVariable { name: name.into() }, span)
    }

    pub fn unknown_function(name: impl Into<String>, span: Span) -> Self {
        Self::new(TypeErrorKind::UnknownFunction { name: name.into() }, span)
    }

    pub fn assign_mismatch(name: impl Into<String>, expected: Ty, found: Ty, span: Span) -> Self {
        Self::new(TypeErrorKind::AssignMismatch { name: name.into(), expected, found }, span)
    }

    pub fn arg_mismatch(index: usize, callee: impl Into<String>, expected: Ty, found: Ty, span: Span) -> Self {
        Self::new(
            TypeErrorKind::ArgMismatch { index, callee: callee.into(), expected, found },
            span,
        )
    }

    pub fn arity_mismatch(callee: impl Into<String>, expected: usize, found: usize, span: Span) -> Self {
        Self::new(TypeErrorKind::ArityMismatch { callee: callee.into(), expected, found }, span)
    }

    pub fn truthiness(context: &'static str, found: Ty, span: Span) -> Self {
        Self::new(TypeErrorKind::Truthiness { context, found }, span)
    }

    pub fn custom(message: impl Into<String>, span: Span) -> Self {
        Self::new(TypeErrorKind::Custom { message: message.into() }, span)
    }
}

impl std::fmt::Display for TypeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

#[derive(Error, Debug, Clone)]
pub enum TypeErrorKind {
    #[error("unknown type '{name}'")]
    UnknownType { name: String },

    #[error("undefined variable '{name}'")]
    UndefinedVariable { name: String },

    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },

    #[error("duplicate function '{name}'")]
    DuplicateFunction { name: String },

    #[error("variable '{name}' already declared in this scope")]
    DuplicateVariable { name: String },

    #[error("cannot assign value of type {found} to '{name}' of type {expected}")]
    AssignMismatch { name: String, expected: Ty, found: Ty },

    #[error("argument {index} of '{callee}' expected {expected}, got {found}")]
    ArgMismatch { index: usize, callee: String, expected: Ty, found: Ty },

    #[error("'{callee}' expects {expected} args, got {found}")]
    ArityMismatch { callee: String, expected: usize, found: usize },

    #[error("return type mismatch: expected {expected}, got {found}")]
    ReturnMismatch { expected: Ty, found: Ty },

    #[error("operator '{op}' requires {requirement}, got {left} and {right}")]
    BinaryMismatch { op: &'static str, requirement: &'static str, left: Ty, right: Ty },

    #[error("{context} must be bool, integer, or reference type, got {found}")]
    Truthiness { context: &'static str, found: Ty },

    #[error("cannot assign to constant '{name}'")]
    ConstAssign { name: String },

    #[error("type '{found}' cannot be used as dict key (allowed: integers, str, bool, enums)")]
    BadDictKey { found: Ty },

    #[error("{message}")]
    Custom { message: String },
}

/// A non-fatal finding, e.g. a reference cycle through class fields.
#[derive(Debug, Clone)]
pub struct TypeWarning {
    pub message: String,
    pub span: Span,
}
