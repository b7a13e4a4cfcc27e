//! Source code location tracking
//!
//! Spans are byte ranges into a registered source file. Line and column
//! numbers are computed on demand from the file content, so tokens and AST
//! nodes stay small while diagnostics and the emitted C still report exact
//! source positions.

use std::fmt;
use std::path::PathBuf;

/// Unique identifier for a loaded source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SourceId(pub u32);

/// A span representing a range in one source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub source: SourceId,
    /// Start position (byte offset)
    pub start: usize,
    /// End position (byte offset, exclusive)
    pub end: usize,
}

impl Span {
    pub fn new(source: SourceId, start: usize, end: usize) -> Self {
        Self { source, start, end }
    }

    /// A zero-width span at a byte offset.
    pub fn point(source: SourceId, pos: usize) -> Self {
        Self { source, start: pos, end: pos }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Merge two spans into one that covers both. Both must belong to the
    /// same source file.
    pub fn merge(self, other: Span) -> Span {
        Span {
            source: self.source,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// A position in a source file (1-indexed line and column).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub col: u32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// A source file with its content and metadata.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: SourceId,
    /// File path, or a synthetic name such as `<input>` for inline sources.
    pub name: String,
    pub content: String,
    /// Byte offsets of line starts, built once per file.
    line_starts: Vec<usize>,
}

impl Source {
    fn new(id: SourceId, name: String, content: String) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in content.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self { id, name, content, line_starts }
    }

    /// Line and column (both 1-indexed) for a byte offset.
    pub fn position(&self, offset: usize) -> Position {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        Position {
            line: line as u32 + 1,
            col: (offset - self.line_starts[line]) as u32 + 1,
        }
    }

    /// Byte offset of the start of a 1-indexed line.
    pub fn line_start(&self, line: u32) -> usize {
        let idx = (line as usize).saturating_sub(1).min(self.line_starts.len() - 1);
        self.line_starts[idx]
    }
}

/// Manages the collection of source files for one compilation.
#[derive(Debug, Default)]
pub struct SourceMap {
    sources: Vec<Source>,
    by_path: std::collections::HashMap<PathBuf, SourceId>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, content: impl Into<String>) -> SourceId {
        let id = SourceId(self.sources.len() as u32);
        self.sources.push(Source::new(id, name.into(), content.into()));
        id
    }

    /// Register a file path so repeated loads reuse the same id.
    pub fn add_file(&mut self, path: PathBuf, content: String) -> SourceId {
        if let Some(&id) = self.by_path.get(&path) {
            return id;
        }
        let id = self.add(path.display().to_string(), content);
        self.by_path.insert(path, id);
        id
    }

    pub fn get(&self, id: SourceId) -> &Source {
        &self.sources[id.0 as usize]
    }

    pub fn text(&self, span: Span) -> &str {
        &self.get(span.source).content[span.start..span.end]
    }

    pub fn name(&self, id: SourceId) -> &str {
        &self.get(id).name
    }

    pub fn position(&self, span: Span) -> Position {
        self.get(span.source).position(span.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_merge() {
        let a = Span::new(SourceId(0), 0, 5);
        let b = Span::new(SourceId(0), 3, 10);
        let merged = a.merge(b);
        assert_eq!(merged.start, 0);
        assert_eq!(merged.end, 10);
    }

    #[test]
    fn test_position_lookup() {
        let mut map = SourceMap::new();
        let id = map.add("<input>", "ab\ncd\n\nefg");
        let src = map.get(id);
        assert_eq!(src.position(0), Position { line: 1, col: 1 });
        assert_eq!(src.position(1), Position { line: 1, col: 2 });
        assert_eq!(src.position(3), Position { line: 2, col: 1 });
        assert_eq!(src.position(6), Position { line: 3, col: 1 });
        assert_eq!(src.position(9), Position { line: 4, col: 3 });
    }

    #[test]
    fn test_span_text() {
        let mut map = SourceMap::new();
        let id = map.add("<input>", "hello world");
        assert_eq!(map.text(Span::new(id, 0, 5)), "hello");
    }
}
