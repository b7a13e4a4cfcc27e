//! Bismut Compiler
//!
//! Bismut is a statically-typed, block-structured language that compiles
//! to C99. This crate is the compiler front-end and code generator.
//!
//! # Architecture
//!
//! ```text
//! Source Code (.mut)
//!       │
//!       ▼
//! ┌──────────────┐
//! │ Preprocessor │  → filtered text (@if/@define)
//! └──────────────┘
//!       │
//!       ▼
//! ┌──────────────┐
//! │    Lexer     │  → tokens (newline-terminated statements)
//! └──────────────┘
//!       │
//!       ▼
//! ┌──────────────┐
//! │    Parser    │  → AST
//! └──────────────┘
//!       │
//!       ▼
//! ┌──────────────┐
//! │   Resolver   │  → one flat AST (imports merged, names mangled)
//! └──────────────┘
//!       │
//!       ▼
//! ┌──────────────┐
//! │ Type Checker │  → typed AST + monomorphized generics
//! └──────────────┘
//!       │
//!       ▼
//! ┌──────────────┐
//! │  C Emitter   │  → self-contained C99 translation unit
//! └──────────────┘
//! ```

pub mod ast;
pub mod codegen;
pub mod diag;
pub mod lexer;
pub mod mutlib;
pub mod parser;
pub mod preprocess;
pub mod resolve;
pub mod span;
pub mod token;
pub mod typeck;

// Re-exports for convenience
pub use lexer::Lexer;
pub use span::{SourceMap, Span};
pub use token::{Token, TokenKind};

/// Compiler version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// File extension for Bismut source files
pub const FILE_EXTENSION: &str = "mut";
