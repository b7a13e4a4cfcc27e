//! Text-level preprocessor
//!
//! Runs before the lexer. Recognizes `@`-directives in column-leading
//! position and filters lines based on defined-or-not symbols:
//!
//! ```text
//! @define NAME          Define a symbol
//! @if NAME              Include following lines if NAME is defined
//! @elif NAME            Else-if branch
//! @else                 Else branch
//! @end                  End conditional block
//! ```
//!
//! Exactly one of `__LINUX__` / `__MACOS__` / `__WIN__` is predefined for
//! the host, unless the driver passes a platform symbol explicitly.
//! Directive lines and suppressed lines are replaced by empty lines so
//! downstream source positions stay stable. A `@define` inside a dead
//! branch is not evaluated.

use std::collections::HashSet;
use thiserror::Error;

pub const PLATFORM_SYMBOLS: [&str; 3] = ["__LINUX__", "__MACOS__", "__WIN__"];

/// The platform symbol for the compilation host.
pub fn host_platform_symbol() -> &'static str {
    if cfg!(target_os = "macos") {
        "__MACOS__"
    } else if cfg!(target_os = "windows") {
        "__WIN__"
    } else {
        "__LINUX__"
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreprocessError {
    #[error("@{directive} requires a name")]
    MissingName { directive: &'static str, line: u32 },

    #[error("@{directive} without matching @if")]
    Unmatched { directive: &'static str, line: u32 },

    #[error("unterminated @if block (missing @end)")]
    Unterminated { line: u32 },
}

impl PreprocessError {
    /// 1-based line the error is reported at.
    pub fn line(&self) -> u32 {
        match self {
            PreprocessError::MissingName { line, .. } => *line,
            PreprocessError::Unmatched { line, .. } => *line,
            PreprocessError::Unterminated { line } => *line,
        }
    }
}

/// Preprocess source text, returning the filtered source. The output has
/// the same number of lines as the input.
pub fn preprocess(source: &str, extra_defines: &HashSet<String>) -> Result<String, PreprocessError> {
    // A user-supplied platform symbol suppresses host auto-detection.
    let mut defines: HashSet<String> = if PLATFORM_SYMBOLS.iter().any(|p| extra_defines.contains(*p)) {
        HashSet::new()
    } else {
        HashSet::from([host_platform_symbol().to_string()])
    };
    defines.extend(extra_defines.iter().cloned());

    let mut out_lines: Vec<&str> = Vec::new();
    // Stack of (parent_emitting, branch_taken) for nested @if.
    let mut stack: Vec<(bool, bool)> = Vec::new();
    let mut emitting = true;
    let mut line_no: u32 = 0;

    for line in source.split('\n') {
        line_no += 1;
        let stripped = line.trim();

        if let Some(rest) = stripped.strip_prefix("@define") {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                if emitting {
                    let name = rest.trim();
                    if name.is_empty() {
                        return Err(PreprocessError::MissingName { directive: "define", line: line_no });
                    }
                    defines.insert(name.to_string());
                }
                out_lines.push("");
                continue;
            }
        }

        if let Some(rest) = stripped.strip_prefix("@if") {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                let name = rest.trim();
                if name.is_empty() {
                    return Err(PreprocessError::MissingName { directive: "if", line: line_no });
                }
                let cond = defines.contains(name);
                stack.push((emitting, cond));
                emitting = emitting && cond;
                out_lines.push("");
                continue;
            }
        }

        if let Some(rest) = stripped.strip_prefix("@elif") {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                let name = rest.trim();
                if name.is_empty() {
                    return Err(PreprocessError::MissingName { directive: "elif", line: line_no });
                }
                let (parent, taken) = match stack.last_mut() {
                    Some(top) => top,
                    None => return Err(PreprocessError::Unmatched { directive: "elif", line: line_no }),
                };
                if *taken {
                    emitting = false;
                } else {
                    emitting = *parent && defines.contains(name);
                    if emitting {
                        *taken = true;
                    }
                }
                out_lines.push("");
                continue;
            }
        }

        if stripped == "@else" {
            let (parent, taken) = match stack.last_mut() {
                Some(top) => top,
                None => return Err(PreprocessError::Unmatched { directive: "else", line: line_no }),
            };
            if *taken {
                emitting = false;
            } else {
                emitting = *parent;
                *taken = true;
            }
            out_lines.push("");
            continue;
        }

        if stripped == "@end" {
            let (parent, _) = match stack.pop() {
                Some(top) => top,
                None => return Err(PreprocessError::Unmatched { directive: "end", line: line_no }),
            };
            emitting = parent;
            out_lines.push("");
            continue;
        }

        out_lines.push(if emitting { line } else { "" });
    }

    if !stack.is_empty() {
        return Err(PreprocessError::Unterminated { line: line_no });
    }

    Ok(out_lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pp(source: &str, defines: &[&str]) -> String {
        let set: HashSet<String> = defines.iter().map(|s| s.to_string()).collect();
        preprocess(source, &set).unwrap()
    }

    #[test]
    fn test_passthrough_without_directives() {
        let src = "a := 1\nb := 2\n";
        assert_eq!(pp(src, &[]), src);
    }

    #[test]
    fn test_if_taken_and_dead() {
        let src = "@if FOO\nx := 1\n@else\ny := 2\n@end\n";
        assert_eq!(pp(src, &["FOO"]), "\nx := 1\n\n\n\n");
        assert_eq!(pp(src, &[]), "\n\n\ny := 2\n\n");
    }

    #[test]
    fn test_elif_chain() {
        let src = "@if A\n1\n@elif B\n2\n@elif C\n3\n@else\n4\n@end";
        assert_eq!(pp(src, &["B"]), "\n\n\n2\n\n\n\n\n");
        assert_eq!(pp(src, &["B", "C"]), "\n\n\n2\n\n\n\n\n");
        assert_eq!(pp(src, &[]), "\n\n\n\n\n\n\n4\n");
    }

    #[test]
    fn test_line_count_preserved() {
        let src = "@if NOPE\ndead\ndead\n@end\nlive";
        let out = pp(src, &[]);
        assert_eq!(out.matches('\n').count(), src.matches('\n').count());
        assert_eq!(out, "\n\n\n\nlive");
    }

    #[test]
    fn test_nested_define_in_dead_branch_ignored() {
        let src = "@if NOPE\n@define INNER\n@end\n@if INNER\nx\n@end\n";
        // INNER was never defined, so x is suppressed.
        assert_eq!(pp(src, &[]), "\n\n\n\n\n\n");
    }

    #[test]
    fn test_define_then_if() {
        let src = "@define FOO\n@if FOO\nx\n@end\n";
        assert_eq!(pp(src, &[]), "\n\nx\n\n");
    }

    #[test]
    fn test_platform_define_suppresses_host() {
        // Forcing a non-host platform must not leave the host symbol defined.
        let host = host_platform_symbol();
        let other = if host == "__WIN__" { "__LINUX__" } else { "__WIN__" };
        let src = format!("@if {}\nhost\n@end\n", host);
        assert_eq!(pp(&src, &[other]), "\n\n\n");
    }

    #[test]
    fn test_unmatched_end() {
        let set = HashSet::new();
        let err = preprocess("@end\n", &set).unwrap_err();
        assert_eq!(err, PreprocessError::Unmatched { directive: "end", line: 1 });
    }

    #[test]
    fn test_unterminated_if() {
        let set = HashSet::new();
        let err = preprocess("@if X\nbody\n", &set).unwrap_err();
        assert!(matches!(err, PreprocessError::Unterminated { .. }));
    }
}
