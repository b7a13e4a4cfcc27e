//! Extern library manifests
//!
//! Native C libraries are described by INI-style `.mutlib` manifests:
//!
//! ```text
//! [types]
//! Matrix = px_matrix
//!
//! [functions]
//! make(rows: i64, cols: i64) -> Matrix = px_matrix_make
//! destroy(m: Matrix) [dtor] = px_matrix_free
//!
//! [constants]
//! PI: f64 = 3.14159265358979
//!
//! [flags]
//! cflags = -I{LIB_DIR}
//! ldflags_linux = -lm
//! ```
//!
//! `#` comment lines attach as docs to the entry that follows. `{LIB_DIR}`
//! expands to the absolute library directory; `cflags_<plat>` /
//! `ldflags_<plat>` keys are selected by the target platform.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MutlibError {
    #[error("{path}:{line}: {message}")]
    Malformed { path: String, line: usize, message: String },

    #[error("cannot read manifest {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ExternFunc {
    pub bismut_name: String,
    /// `[(name, type name), ...]`
    pub params: Vec<(String, String)>,
    pub ret_type: String,
    pub c_name: String,
    /// `[dtor]` tag: the first parameter's type uses `c_name` as destructor.
    pub is_dtor: bool,
    pub doc: String,
    /// 1-based line in the manifest.
    pub line: usize,
}

#[derive(Debug, Clone)]
pub struct ExternConst {
    pub bismut_name: String,
    pub ty: String,
    pub c_expr: String,
    pub doc: String,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub struct ExternType {
    pub bismut_name: String,
    /// C struct/typedef name, used as a pointer `c_type*`.
    pub c_type: String,
    /// C function called on the raw pointer when the refcount hits zero.
    pub c_dtor: Option<String>,
    pub doc: String,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub struct LibManifest {
    pub name: String,
    pub lib_dir: PathBuf,
    pub types: Vec<ExternType>,
    pub funcs: Vec<ExternFunc>,
    pub consts: Vec<ExternConst>,
    /// Absolute path to the library's C source, when one exists.
    pub c_source: Option<PathBuf>,
    pub cflags: Vec<String>,
    pub ldflags: Vec<String>,
}

/// Target platform key for flag selection.
pub fn host_platform() -> &'static str {
    if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "windows") {
        "win"
    } else {
        "linux"
    }
}

/// Parse a `.mutlib` manifest file.
pub fn parse_mutlib(
    path: &Path,
    lib_name: &str,
    lib_dir: &Path,
    target_platform: Option<&str>,
) -> Result<LibManifest, MutlibError> {
    let content = std::fs::read_to_string(path).map_err(|e| MutlibError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_mutlib_str(&content, path, lib_name, lib_dir, target_platform)
}

pub fn parse_mutlib_str(
    content: &str,
    path: &Path,
    lib_name: &str,
    lib_dir: &Path,
    target_platform: Option<&str>,
) -> Result<LibManifest, MutlibError> {
    let mut types: Vec<ExternType> = Vec::new();
    let mut funcs: Vec<ExternFunc> = Vec::new();
    let mut consts: Vec<ExternConst> = Vec::new();
    let mut flags: Vec<(String, String)> = Vec::new();
    let mut section: Option<String> = None;
    let mut doc_lines: Vec<String> = Vec::new();

    let err = |line: usize, message: String| MutlibError::Malformed {
        path: path.display().to_string(),
        line,
        message,
    };

    for (line_no, raw) in content.lines().enumerate() {
        let line_no = line_no + 1;
        let line = raw.trim();
        if line.is_empty() {
            doc_lines.clear();
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            doc_lines.push(comment.strip_prefix(' ').unwrap_or(comment).to_string());
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            section = Some(line[1..line.len() - 1].trim().to_ascii_lowercase());
            doc_lines.clear();
            continue;
        }

        let doc = std::mem::take(&mut doc_lines).join("\n");

        match section.as_deref() {
            Some("types") => {
                let (name, c_type) = line
                    .split_once('=')
                    .ok_or_else(|| err(line_no, format!("type line must have '= c_type': {:?}", line)))?;
                types.push(ExternType {
                    bismut_name: name.trim().to_string(),
                    c_type: c_type.trim().to_string(),
                    c_dtor: None,
                    doc,
                    line: line_no,
                });
            }
            Some("functions") => {
                let mut func = parse_func_line(line, line_no, &err)?;
                func.doc = doc;
                funcs.push(func);
            }
            Some("constants") => {
                let (decl, c_expr) = line
                    .split_once('=')
                    .ok_or_else(|| err(line_no, format!("constant line must have '= value': {:?}", line)))?;
                let (name, ty) = decl
                    .split_once(':')
                    .ok_or_else(|| err(line_no, format!("constant must have 'NAME: type': {:?}", decl)))?;
                consts.push(ExternConst {
                    bismut_name: name.trim().to_string(),
                    ty: ty.trim().to_string(),
                    c_expr: c_expr.trim().to_string(),
                    doc,
                    line: line_no,
                });
            }
            Some("flags") => {
                if let Some((key, val)) = line.split_once('=') {
                    flags.push((key.trim().to_string(), val.trim().to_string()));
                }
            }
            _ => return Err(err(line_no, format!("unknown section or orphan line: {:?}", line))),
        }
    }

    // Look for the library's C source next to the manifest.
    let c_source = {
        let candidate = lib_dir.join(format!("{}.c", lib_name));
        candidate.is_file().then_some(candidate)
    };

    let (mut cflags, mut ldflags) = resolve_flags(&flags, target_platform);
    let lib_dir_str = lib_dir.display().to_string();
    for f in cflags.iter_mut().chain(ldflags.iter_mut()) {
        *f = f.replace("{LIB_DIR}", &lib_dir_str);
    }

    // Link [dtor] functions to their types.
    for func in &funcs {
        if !func.is_dtor {
            continue;
        }
        let first_ty = func
            .params
            .first()
            .map(|(_, t)| t.clone())
            .ok_or_else(|| {
                err(func.line, format!("[dtor] function '{}' must have at least one parameter", func.bismut_name))
            })?;
        let ty = types
            .iter_mut()
            .find(|t| t.bismut_name == first_ty)
            .ok_or_else(|| {
                err(
                    func.line,
                    format!(
                        "[dtor] function '{}' first parameter type '{}' is not a declared [types] entry",
                        func.bismut_name, first_ty
                    ),
                )
            })?;
        ty.c_dtor = Some(func.c_name.clone());
    }

    Ok(LibManifest {
        name: lib_name.to_string(),
        lib_dir: lib_dir.to_path_buf(),
        types,
        funcs,
        consts,
        c_source,
        cflags,
        ldflags,
    })
}

/// Parse `bismut_name(p1: type, p2: type) -> ret_type [dtor] = c_name`.
fn parse_func_line(
    line: &str,
    line_no: usize,
    err: &impl Fn(usize, String) -> MutlibError,
) -> Result<ExternFunc, MutlibError> {
    let (sig, c_name) = line
        .rsplit_once('=')
        .ok_or_else(|| err(line_no, format!("function line must have '= c_name': {:?}", line)))?;
    let sig = sig.trim();
    let c_name = c_name.trim().to_string();

    let paren_open = sig
        .find('(')
        .ok_or_else(|| err(line_no, format!("function line missing '(': {:?}", line)))?;
    let bismut_name = sig[..paren_open].trim().to_string();
    let rest = &sig[paren_open + 1..];
    let paren_close = rest
        .find(')')
        .ok_or_else(|| err(line_no, format!("function line missing ')': {:?}", line)))?;
    let params_str = rest[..paren_close].trim();
    let mut after = rest[paren_close + 1..].trim().to_string();

    let mut params = Vec::new();
    if !params_str.is_empty() {
        for p in params_str.split(',') {
            let (name, ty) = p
                .split_once(':')
                .ok_or_else(|| err(line_no, format!("param must have 'name: type': {:?}", p.trim())))?;
            params.push((name.trim().to_string(), ty.trim().to_string()));
        }
    }

    let is_dtor = after.contains("[dtor]");
    if is_dtor {
        after = after.replace("[dtor]", "").trim().to_string();
    }

    let ret_type = match after.strip_prefix("->") {
        Some(r) => r.trim().to_string(),
        None => "void".to_string(),
    };

    Ok(ExternFunc { bismut_name, params, ret_type, c_name, is_dtor, doc: String::new(), line: line_no })
}

fn resolve_flags(entries: &[(String, String)], target_platform: Option<&str>) -> (Vec<String>, Vec<String>) {
    let plat = target_platform.unwrap_or_else(|| host_platform());
    let mut cflags = Vec::new();
    let mut ldflags = Vec::new();
    for (key, val) in entries {
        let dst = if key == "cflags" || *key == format!("cflags_{}", plat) {
            &mut cflags
        } else if key == "ldflags" || *key == format!("ldflags_{}", plat) {
            &mut ldflags
        } else {
            continue;
        };
        dst.extend(val.split_whitespace().map(|s| s.to_string()));
    }
    (cflags, ldflags)
}

/// Find a library directory: `libs/<name>/` next to the source file first,
/// then under the compiler directory. Returns the absolute lib dir.
pub fn find_lib(lib_name: &str, src_file: &Path, compiler_dir: &Path) -> Option<PathBuf> {
    let src_dir = src_file.parent().unwrap_or(Path::new("."));
    let candidates = [src_dir.join("libs").join(lib_name), compiler_dir.join("libs").join(lib_name)];
    for dir in candidates {
        if dir.join(format!("{}.mutlib", lib_name)).is_file() {
            return std::fs::canonicalize(&dir).ok().or(Some(dir));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = "\
# A matrix type.
[types]
Matrix = px_matrix

[functions]
# Allocate a matrix.
make(rows: i64, cols: i64) -> Matrix = px_matrix_make
get(m: Matrix, r: i64, c: i64) -> f64 = px_matrix_get
destroy(m: Matrix) [dtor] = px_matrix_free

[constants]
PI: f64 = 3.14159265358979

[flags]
cflags = -I{LIB_DIR}
ldflags = -lm
ldflags_linux = -lrt
ldflags_macos = -framework Accelerate
";

    fn parse(content: &str, plat: &str) -> LibManifest {
        parse_mutlib_str(
            content,
            Path::new("/libs/pxmatrix/pxmatrix.mutlib"),
            "pxmatrix",
            Path::new("/libs/pxmatrix"),
            Some(plat),
        )
        .unwrap()
    }

    #[test]
    fn test_sections() {
        let m = parse(MANIFEST, "linux");
        assert_eq!(m.types.len(), 1);
        assert_eq!(m.types[0].bismut_name, "Matrix");
        assert_eq!(m.types[0].c_type, "px_matrix");
        assert_eq!(m.funcs.len(), 3);
        assert_eq!(m.consts.len(), 1);
        assert_eq!(m.consts[0].c_expr, "3.14159265358979");
    }

    #[test]
    fn test_function_line() {
        let m = parse(MANIFEST, "linux");
        let f = &m.funcs[0];
        assert_eq!(f.bismut_name, "make");
        assert_eq!(f.params, vec![("rows".to_string(), "i64".to_string()), ("cols".to_string(), "i64".to_string())]);
        assert_eq!(f.ret_type, "Matrix");
        assert_eq!(f.c_name, "px_matrix_make");
        assert_eq!(f.doc, "Allocate a matrix.");
    }

    #[test]
    fn test_dtor_binding() {
        let m = parse(MANIFEST, "linux");
        assert_eq!(m.types[0].c_dtor.as_deref(), Some("px_matrix_free"));
        assert!(m.funcs[2].is_dtor);
        assert_eq!(m.funcs[2].ret_type, "void");
    }

    #[test]
    fn test_platform_flags_and_lib_dir() {
        let linux = parse(MANIFEST, "linux");
        assert_eq!(linux.cflags, vec!["-I/libs/pxmatrix"]);
        assert_eq!(linux.ldflags, vec!["-lm", "-lrt"]);
        let macos = parse(MANIFEST, "macos");
        assert_eq!(macos.ldflags, vec!["-lm", "-framework", "Accelerate"]);
    }

    #[test]
    fn test_orphan_line_rejected() {
        let err = parse_mutlib_str(
            "orphan\n",
            Path::new("x.mutlib"),
            "x",
            Path::new("/"),
            Some("linux"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown section"));
    }
}
