//! Diagnostic collection and rendering
//!
//! Every stage reports problems as [`Diagnostic`] records pushed into a
//! [`Diagnostics`] sink. The driver renders them either as flat
//! `file:line:col: severity: message` lines or, for `analyze`, as the JSON
//! report consumed by IDE tooling.

use crate::span::{SourceMap, Span};
use serde::Serialize;
use std::fmt;

/// Severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        };
        write!(f, "{}", s)
    }
}

/// A single diagnostic message anchored to a source span.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub span: Span,
    pub message: String,
}

impl Diagnostic {
    pub fn error(span: Span, message: impl Into<String>) -> Self {
        Self { severity: Severity::Error, span, message: message.into() }
    }

    pub fn warning(span: Span, message: impl Into<String>) -> Self {
        Self { severity: Severity::Warning, span, message: message.into() }
    }

    /// Render as a flat `file:line:col: severity: message` line.
    pub fn render(&self, sources: &SourceMap) -> String {
        let pos = sources.position(self.span);
        let file = sources.name(self.span.source);
        // Multi-line messages stay flat: one prefixed line each.
        let mut out = String::new();
        for (i, part) in self.message.lines().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&format!("{}:{}:{}: {}: {}", file, pos.line, pos.col, self.severity, part));
        }
        out
    }
}

/// A collection of diagnostics, in report order.
#[derive(Debug, Default)]
pub struct Diagnostics {
    diagnostics: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.diagnostics.push(diag);
    }

    pub fn error(&mut self, span: Span, message: impl Into<String>) {
        self.push(Diagnostic::error(span, message));
    }

    pub fn warning(&mut self, span: Span, message: impl Into<String>) {
        self.push(Diagnostic::warning(span, message));
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.severity == Severity::Error).count()
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.severity == Severity::Warning).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Print every diagnostic to stderr. With `quiet`, warnings and notes
    /// are suppressed.
    pub fn print(&self, sources: &SourceMap, quiet: bool) {
        for d in &self.diagnostics {
            if quiet && d.severity != Severity::Error {
                continue;
            }
            eprintln!("{}", d.render(sources));
        }
    }

    /// Build the machine-readable report for the `analyze` subcommand.
    pub fn to_report(&self, sources: &SourceMap, file: &str) -> AnalyzeReport {
        AnalyzeReport {
            success: !self.has_errors(),
            file: file.to_string(),
            error_count: self.error_count(),
            warning_count: self.warning_count(),
            diagnostics: self
                .diagnostics
                .iter()
                .map(|d| {
                    let pos = sources.position(d.span);
                    JsonDiagnostic {
                        severity: d.severity.to_string(),
                        file: sources.name(d.span.source).to_string(),
                        line: pos.line,
                        col: pos.col,
                        span: d.span.len(),
                        message: d.message.clone(),
                    }
                })
                .collect(),
        }
    }
}

/// JSON report shape for `bismut analyze`.
#[derive(Debug, Serialize)]
pub struct AnalyzeReport {
    pub success: bool,
    pub file: String,
    pub error_count: usize,
    pub warning_count: usize,
    pub diagnostics: Vec<JsonDiagnostic>,
}

#[derive(Debug, Serialize)]
pub struct JsonDiagnostic {
    pub severity: String,
    pub file: String,
    pub line: u32,
    pub col: u32,
    pub span: usize,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::SourceMap;

    #[test]
    fn test_render_flat() {
        let mut map = SourceMap::new();
        let id = map.add("main.mut", "x := 1\ny := 2\n");
        let mut diags = Diagnostics::new();
        diags.error(Span::new(id, 7, 8), "something failed");
        let rendered = diags.iter().next().unwrap().render(&map);
        assert_eq!(rendered, "main.mut:2:1: error: something failed");
    }

    #[test]
    fn test_report_counts() {
        let mut map = SourceMap::new();
        let id = map.add("main.mut", "x := 1\n");
        let mut diags = Diagnostics::new();
        diags.error(Span::new(id, 0, 1), "bad");
        diags.warning(Span::new(id, 0, 1), "meh");
        let report = diags.to_report(&map, "main.mut");
        assert!(!report.success);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.warning_count, 1);
        assert_eq!(report.diagnostics.len(), 2);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"severity\":\"error\""));
    }
}
