//! Import and extern resolution
//!
//! Imports are resolved by DFS with an in-progress set (revisiting a file
//! on the current path is a circular-import error). Each loaded module's
//! top-level names are renamed to `alias__Name` and its declarations merged
//! into the importing program, so every later stage sees a single flat
//! compilation unit. Renaming is scope-aware: function locals and
//! parameters that shadow a top-level module name are left alone.
//!
//! Extern declarations pull in `.mutlib` manifests and inject synthetic
//! declarations: an opaque refcounted class per `[types]` entry, a bodiless
//! function per `[functions]` entry carrying its C name, and a const global
//! per `[constants]` entry.

use crate::ast::*;
use crate::diag::Diagnostics;
use crate::mutlib::{self, LibManifest};
use crate::parser;
use crate::preprocess::preprocess;
use crate::span::{SourceMap, Span};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Configuration shared by the whole front-end.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Directory holding `modules/`, `libs/`, and the runtime headers.
    pub compiler_dir: PathBuf,
    /// `-D` symbols from the driver.
    pub defines: HashSet<String>,
    /// Platform key for mutlib flag selection; `None` = host.
    pub target_platform: Option<String>,
}

/// Preprocess, lex, and parse one in-memory source. Preprocess/lex/parse
/// problems become diagnostics; a preprocessor error yields `None` because
/// no token stream exists to recover with.
pub fn parse_source(
    name: &str,
    content: String,
    defines: &HashSet<String>,
    sources: &mut SourceMap,
    ids: &mut IdGen,
    diags: &mut Diagnostics,
) -> Option<Program> {
    let processed = match preprocess(&content, defines) {
        Ok(p) => p,
        Err(e) => {
            let id = sources.add(name, content);
            let offset = sources.get(id).line_start(e.line());
            diags.error(Span::point(id, offset), format!("preprocess error: {}", e));
            return None;
        }
    };
    let id = sources.add_file(PathBuf::from(name), processed);
    let source = sources.get(id);
    let (tokens, comments, lex_errors) = crate::lexer::lex(&source.content, id);
    let mut lex_diags = Vec::new();
    for e in &lex_errors {
        lex_diags.push((e.span(), format!("lex error: {}", e)));
    }
    let (prog, errors) = parser::Parser::new(tokens, comments, source, ids).parse_program();
    for (span, msg) in lex_diags {
        diags.error(span, msg);
    }
    for e in errors {
        diags.error(e.span(), format!("parse error: {}", e));
    }
    Some(prog)
}

/// Resolves imports and externs for one compilation.
pub struct Resolver<'a> {
    sources: &'a mut SourceMap,
    ids: &'a mut IdGen,
    diags: &'a mut Diagnostics,
    opts: &'a ResolveOptions,
    /// Files on the current DFS path (circular-import detection).
    loading: HashSet<PathBuf>,
    /// Modules already merged, keyed by (file, alias).
    loaded: HashSet<(PathBuf, String)>,
}

impl<'a> Resolver<'a> {
    pub fn new(
        sources: &'a mut SourceMap,
        ids: &'a mut IdGen,
        diags: &'a mut Diagnostics,
        opts: &'a ResolveOptions,
    ) -> Self {
        Self { sources, ids, diags, opts, loading: HashSet::new(), loaded: HashSet::new() }
    }

    /// Run the whole front half for a root file: parse, resolve imports,
    /// resolve externs. Returns `None` on unrecoverable resolution errors.
    pub fn load_root(&mut self, path: &Path, content: String) -> Option<Program> {
        let abs = absolutize(path);
        self.loading.insert(abs.clone());
        let prog = parse_source(
            &path.display().to_string(),
            content,
            &self.opts.defines,
            self.sources,
            self.ids,
            self.diags,
        )?;
        let base_dir = abs.parent().unwrap_or(Path::new(".")).to_path_buf();
        let prog = self.resolve_imports(prog, &base_dir)?;
        let prog = self.resolve_externs(prog, path)?;
        self.loading.remove(&abs);
        Some(prog)
    }

    // -------------------------
    // Imports
    // -------------------------

    fn resolve_imports(&mut self, mut prog: Program, base_dir: &Path) -> Option<Program> {
        let mut module_aliases: HashSet<String> = HashSet::new();
        let imports = std::mem::take(&mut prog.imports);

        for imp in &imports {
            let rel: PathBuf = imp.module.split('.').collect::<PathBuf>().with_extension("mut");
            let mod_path = self.find_module(&rel, base_dir);
            let mod_path = match mod_path {
                Some(p) => p,
                None => {
                    self.diags.error(
                        imp.span,
                        format!(
                            "import error: module '{}' not found\n  looked in: {}\n             {}\n             {}",
                            imp.module,
                            base_dir.join(&rel).display(),
                            self.opts.compiler_dir.join("modules").join(&rel).display(),
                            self.opts.compiler_dir.join("src").join(&rel).display()
                        ),
                    );
                    return None;
                }
            };

            let abs = absolutize(&mod_path);
            if self.loading.contains(&abs) {
                self.diags.error(
                    imp.span,
                    format!("import error: circular import of '{}'", imp.module),
                );
                return None;
            }
            if self.loaded.contains(&(abs.clone(), imp.alias.clone())) {
                module_aliases.insert(imp.alias.clone());
                continue;
            }

            let content = match std::fs::read_to_string(&mod_path) {
                Ok(c) => c,
                Err(e) => {
                    self.diags.error(
                        imp.span,
                        format!("import error: cannot read '{}': {}", mod_path.display(), e),
                    );
                    return None;
                }
            };

            self.loading.insert(abs.clone());
            let module = parse_source(
                &mod_path.display().to_string(),
                content,
                &self.opts.defines,
                self.sources,
                self.ids,
                self.diags,
            )?;
            let mod_base = abs.parent().unwrap_or(Path::new(".")).to_path_buf();
            let module = self.resolve_imports(module, &mod_base)?;
            let mut module = self.resolve_externs(module, &mod_path)?;
            self.loading.remove(&abs);
            self.loaded.insert((abs, imp.alias.clone()));

            mangle_module(&mut module, &imp.alias);
            merge_program(&mut prog, module);
            module_aliases.insert(imp.alias.clone());
        }

        if !module_aliases.is_empty() {
            resolve_dotted_program(&mut prog, &module_aliases);
        }
        Some(prog)
    }

    fn find_module(&self, rel: &Path, base_dir: &Path) -> Option<PathBuf> {
        let candidates = [
            base_dir.join(rel),
            self.opts.compiler_dir.join("modules").join(rel),
            self.opts.compiler_dir.join("src").join(rel),
        ];
        candidates.into_iter().find(|p| p.is_file())
    }

    // -------------------------
    // Externs
    // -------------------------

    fn resolve_externs(&mut self, mut prog: Program, src_file: &Path) -> Option<Program> {
        let mut module_aliases: HashSet<String> = HashSet::new();
        let mut seen_libs: HashSet<String> = HashSet::new();
        let externs = std::mem::take(&mut prog.externs);

        for ext in &externs {
            let lib_dir = match mutlib::find_lib(&ext.name, src_file, &self.opts.compiler_dir) {
                Some(d) => d,
                None => {
                    self.diags.error(
                        ext.span,
                        format!("extern error: library '{}' not found", ext.name),
                    );
                    return None;
                }
            };
            let manifest_path = lib_dir.join(format!("{}.mutlib", ext.name));
            let manifest_text = match std::fs::read_to_string(&manifest_path) {
                Ok(t) => t,
                Err(e) => {
                    self.diags.error(
                        ext.span,
                        format!("extern error: cannot read '{}': {}", manifest_path.display(), e),
                    );
                    return None;
                }
            };
            let manifest = match mutlib::parse_mutlib_str(
                &manifest_text,
                &manifest_path,
                &ext.name,
                &lib_dir,
                self.opts.target_platform.as_deref(),
            ) {
                Ok(m) => m,
                Err(e) => {
                    self.diags.error(ext.span, format!("extern error: {}", e));
                    return None;
                }
            };

            let manifest_src = self.sources.add_file(manifest_path.clone(), manifest_text);
            self.inject_extern_decls(&mut prog, &manifest, &ext.alias, manifest_src);

            if seen_libs.insert(ext.name.clone()) {
                if let Some(src) = &manifest.c_source {
                    if !prog.extern_includes.contains(src) {
                        prog.extern_includes.push(src.clone());
                    }
                }
                prog.extern_cflags.extend(manifest.cflags.iter().cloned());
                prog.extern_ldflags.extend(manifest.ldflags.iter().cloned());
            }

            module_aliases.insert(ext.alias.clone());
        }

        if !module_aliases.is_empty() {
            resolve_dotted_program(&mut prog, &module_aliases);
        }
        Some(prog)
    }

    fn inject_extern_decls(
        &mut self,
        prog: &mut Program,
        manifest: &LibManifest,
        alias: &str,
        manifest_src: crate::span::SourceId,
    ) {
        let lib_type_names: HashSet<&str> =
            manifest.types.iter().map(|t| t.bismut_name.as_str()).collect();
        let manifest_source = self.sources.get(manifest_src).clone();
        let line_span =
            |line: usize| Span::point(manifest_src, manifest_source.line_start(line as u32));

        // Opaque refcounted wrapper class per extern type.
        for et in &manifest.types {
            let mangled = format!("{}__{}", alias, et.bismut_name);
            let span = line_span(et.line);
            if !prog.classes.iter().any(|c| c.name == mangled) {
                prog.classes.insert(
                    0,
                    ClassDecl {
                        span,
                        name: mangled.clone(),
                        fields: Vec::new(),
                        methods: Vec::new(),
                        implements: Vec::new(),
                        doc: et.doc.clone(),
                    },
                );
            }
            prog.extern_types.insert(
                mangled,
                ExternTypeInfo { c_type: et.c_type.clone(), c_dtor: et.c_dtor.clone() },
            );
        }

        // Bodiless wrapper function per extern function.
        for ef in &manifest.funcs {
            let span = line_span(ef.line);
            let mangle_ty = |name: &str| -> TyExpr {
                if lib_type_names.contains(name) {
                    TyExpr::Name(format!("{}__{}", alias, name))
                } else {
                    parse_manifest_ty(name)
                }
            };
            let name = format!("{}__{}", alias, ef.bismut_name);
            if prog.funcs.iter().any(|f| f.name == name) {
                continue;
            }
            let params = ef
                .params
                .iter()
                .map(|(pn, pt)| Param {
                    span,
                    name: pn.clone(),
                    ty: TypeRef { span, ty: mangle_ty(pt) },
                })
                .collect();
            prog.funcs.insert(
                0,
                FuncDecl {
                    span,
                    name,
                    type_params: Vec::new(),
                    params,
                    ret: TypeRef { span, ty: mangle_ty(&ef.ret_type) },
                    body: Block { span, stmts: Vec::new() },
                    extern_c_name: Some(ef.c_name.clone()),
                    doc: ef.doc.clone(),
                },
            );
        }

        // Const global per extern constant; the initializer is a dummy the
        // emitter replaces with the manifest's C expression.
        for ec in &manifest.consts {
            let span = line_span(ec.line);
            let mangled = format!("{}__{}", alias, ec.bismut_name);
            let exists = prog.stmts.iter().any(
                |s| matches!(&s.kind, StmtKind::VarDecl { name, .. } if *name == mangled),
            );
            if !exists {
                let value_kind = match ec.ty.as_str() {
                    "f32" | "f64" => ExprKind::Float(0.0),
                    "bool" => ExprKind::Bool(false),
                    "str" => ExprKind::Str(String::new()),
                    _ => ExprKind::Int { value: 0, radix: 10 },
                };
                let value = Expr { id: self.ids.next(), span, kind: value_kind };
                prog.stmts.insert(
                    0,
                    Stmt {
                        id: self.ids.next(),
                        span,
                        kind: StmtKind::VarDecl {
                            name: mangled.clone(),
                            ty: Some(TypeRef { span, ty: parse_manifest_ty(&ec.ty) }),
                            value,
                            is_const: true,
                            is_static: false,
                        },
                    },
                );
            }
            prog.extern_consts.insert(
                mangled,
                ExternConstInfo {
                    c_expr: ec.c_expr.clone(),
                    ty: TypeRef { span, ty: parse_manifest_ty(&ec.ty) },
                },
            );
        }
    }
}

fn absolutize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Parse a type name from a manifest line (`List[...]` forms included).
fn parse_manifest_ty(name: &str) -> TyExpr {
    let name = name.trim();
    if let Some(inner) = name.strip_prefix("List[").and_then(|s| s.strip_suffix(']')) {
        return TyExpr::List(Box::new(parse_manifest_ty(inner)));
    }
    TyExpr::Name(name.to_string())
}

// -------------------------
// Module-internal renaming (flat name map)
// -------------------------

/// Rename every top-level name of `module` to `alias__Name` and rewrite all
/// references inside the module accordingly.
fn mangle_module(module: &mut Program, alias: &str) {
    // Names introduced by extern resolution are already mangled.
    let mut extern_names: HashSet<String> = HashSet::new();
    for f in &module.funcs {
        if f.extern_c_name.is_some() {
            extern_names.insert(f.name.clone());
        }
    }
    for c in &module.classes {
        if module.extern_types.contains_key(&c.name) {
            extern_names.insert(c.name.clone());
        }
    }
    for s in &module.stmts {
        if let StmtKind::VarDecl { name, .. } = &s.kind {
            if module.extern_consts.contains_key(name) {
                extern_names.insert(name.clone());
            }
        }
    }

    let mut local_names: HashSet<String> = HashSet::new();
    let unmangled = |n: &String| !extern_names.contains(n) && !n.contains("__");
    for f in &module.funcs {
        if unmangled(&f.name) {
            local_names.insert(f.name.clone());
        }
    }
    for c in &module.classes {
        if unmangled(&c.name) {
            local_names.insert(c.name.clone());
        }
    }
    for s in &module.structs {
        if unmangled(&s.name) {
            local_names.insert(s.name.clone());
        }
    }
    for i in &module.interfaces {
        if unmangled(&i.name) {
            local_names.insert(i.name.clone());
        }
    }
    for e in &module.enums {
        if unmangled(&e.name) {
            local_names.insert(e.name.clone());
        }
    }
    for s in &module.stmts {
        if let StmtKind::VarDecl { name, .. } = &s.kind {
            if unmangled(name) {
                local_names.insert(name.clone());
            }
        }
    }

    let rmap: HashMap<String, String> =
        local_names.iter().map(|n| (n.clone(), format!("{}__{}", alias, n))).collect();

    // Rename declaration names.
    for f in &mut module.funcs {
        if let Some(new) = rmap.get(&f.name) {
            f.name = new.clone();
        }
    }
    for c in &mut module.classes {
        if let Some(new) = rmap.get(&c.name) {
            c.name = new.clone();
        }
        for i in &mut c.implements {
            if let Some(new) = rmap.get(i) {
                *i = new.clone();
            }
        }
    }
    for s in &mut module.structs {
        if let Some(new) = rmap.get(&s.name) {
            s.name = new.clone();
        }
    }
    for i in &mut module.interfaces {
        if let Some(new) = rmap.get(&i.name) {
            i.name = new.clone();
        }
    }
    for e in &mut module.enums {
        if let Some(new) = rmap.get(&e.name) {
            e.name = new.clone();
        }
    }
    for s in &mut module.stmts {
        if let StmtKind::VarDecl { name, .. } = &mut s.kind {
            if let Some(new) = rmap.get(name) {
                *name = new.clone();
            }
        }
    }

    // Rewrite references inside the module.
    rename_program_refs(module, &rmap);
}

/// Apply a rename map to every type reference and expression in a program,
/// scope-aware for function/method bodies.
fn rename_program_refs(prog: &mut Program, rmap: &HashMap<String, String>) {
    for f in &mut prog.funcs {
        rename_func(f, rmap);
    }
    for c in &mut prog.classes {
        for fd in &mut c.fields {
            rename_ty(&mut fd.ty.ty, rmap);
        }
        for m in &mut c.methods {
            rename_func(m, rmap);
        }
    }
    for s in &mut prog.structs {
        for fd in &mut s.fields {
            rename_ty(&mut fd.ty.ty, rmap);
        }
        for m in &mut s.methods {
            rename_func(m, rmap);
        }
    }
    for i in &mut prog.interfaces {
        for ms in &mut i.methods {
            for p in &mut ms.params {
                rename_ty(&mut p.ty.ty, rmap);
            }
            rename_ty(&mut ms.ret.ty, rmap);
        }
    }
    for s in &mut prog.stmts {
        rename_stmt(s, rmap);
    }
}

fn rename_func(f: &mut FuncDecl, rmap: &HashMap<String, String>) {
    for p in &mut f.params {
        rename_ty(&mut p.ty.ty, rmap);
    }
    rename_ty(&mut f.ret.ty, rmap);

    // Locals and parameters shadow top-level names.
    let mut locals: HashSet<String> = f.params.iter().map(|p| p.name.clone()).collect();
    collect_local_names(&f.body.stmts, &mut locals);
    let shadowed: Vec<&String> = locals.iter().filter(|n| rmap.contains_key(*n)).collect();
    if shadowed.is_empty() {
        for s in &mut f.body.stmts {
            rename_stmt(s, rmap);
        }
    } else {
        let scoped: HashMap<String, String> =
            rmap.iter().filter(|(k, _)| !locals.contains(*k)).map(|(k, v)| (k.clone(), v.clone())).collect();
        for s in &mut f.body.stmts {
            rename_stmt(s, &scoped);
        }
    }
}

fn collect_local_names(stmts: &[Stmt], names: &mut HashSet<String>) {
    for s in stmts {
        match &s.kind {
            StmtKind::VarDecl { name, .. } => {
                names.insert(name.clone());
            }
            StmtKind::Destructure { names: ns, .. } => {
                names.extend(ns.iter().cloned());
            }
            StmtKind::For { var, body, .. } => {
                names.insert(var.clone());
                collect_local_names(&body.stmts, names);
            }
            StmtKind::If { arms } => {
                for arm in arms {
                    collect_local_names(&arm.block.stmts, names);
                }
            }
            StmtKind::While { body, .. } => collect_local_names(&body.stmts, names),
            _ => {}
        }
    }
}

fn rename_ty(ty: &mut TyExpr, rmap: &HashMap<String, String>) {
    match ty {
        TyExpr::Name(n) => {
            if let Some(new) = rmap.get(n) {
                *n = new.clone();
            }
        }
        TyExpr::List(t) => rename_ty(t, rmap),
        TyExpr::Dict(k, v) => {
            rename_ty(k, rmap);
            rename_ty(v, rmap);
        }
        TyExpr::Tuple(ts) => {
            for t in ts {
                rename_ty(t, rmap);
            }
        }
        TyExpr::Fn(ps, r) => {
            for p in ps {
                rename_ty(p, rmap);
            }
            rename_ty(r, rmap);
        }
    }
}

fn rename_stmt(s: &mut Stmt, rmap: &HashMap<String, String>) {
    match &mut s.kind {
        StmtKind::VarDecl { ty, value, .. } => {
            if let Some(t) = ty {
                rename_ty(&mut t.ty, rmap);
            }
            rename_expr(value, rmap);
        }
        StmtKind::Destructure { value, .. } => rename_expr(value, rmap),
        StmtKind::Assign { name, value, .. } => {
            if let Some(new) = rmap.get(name) {
                *name = new.clone();
            }
            rename_expr(value, rmap);
        }
        StmtKind::MemberAssign { obj, value, .. } => {
            rename_expr(obj, rmap);
            rename_expr(value, rmap);
        }
        StmtKind::IndexAssign { obj, index, value, .. } => {
            rename_expr(obj, rmap);
            rename_expr(index, rmap);
            rename_expr(value, rmap);
        }
        StmtKind::Expr(e) => rename_expr(e, rmap),
        StmtKind::Return(Some(e)) => rename_expr(e, rmap),
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => {}
        StmtKind::If { arms } => {
            for arm in arms {
                if let Some(c) = &mut arm.cond {
                    rename_expr(c, rmap);
                }
                for s2 in &mut arm.block.stmts {
                    rename_stmt(s2, rmap);
                }
            }
        }
        StmtKind::While { cond, body } => {
            rename_expr(cond, rmap);
            for s2 in &mut body.stmts {
                rename_stmt(s2, rmap);
            }
        }
        StmtKind::For { var_ty, iterable, body, .. } => {
            rename_ty(&mut var_ty.ty, rmap);
            rename_expr(iterable, rmap);
            for s2 in &mut body.stmts {
                rename_stmt(s2, rmap);
            }
        }
    }
}

fn rename_expr(e: &mut Expr, rmap: &HashMap<String, String>) {
    match &mut e.kind {
        ExprKind::Var(name) => {
            if let Some(new) = rmap.get(name) {
                *name = new.clone();
            }
        }
        ExprKind::Unary { rhs, .. } => rename_expr(rhs, rmap),
        ExprKind::Binary { lhs, rhs, .. } => {
            rename_expr(lhs, rmap);
            rename_expr(rhs, rmap);
        }
        ExprKind::Call { callee, args, type_args } => {
            rename_expr(callee, rmap);
            for a in args {
                rename_expr(a, rmap);
            }
            for t in type_args {
                rename_ty(&mut t.ty, rmap);
            }
        }
        ExprKind::Member { obj, .. } => rename_expr(obj, rmap),
        ExprKind::Index { obj, index } => {
            rename_expr(obj, rmap);
            rename_expr(index, rmap);
        }
        ExprKind::Is { expr, target } => {
            rename_expr(expr, rmap);
            if let Some(t) = target {
                rename_ty(&mut t.ty, rmap);
            }
        }
        ExprKind::As { expr, target } => {
            rename_expr(expr, rmap);
            rename_ty(&mut target.ty, rmap);
        }
        ExprKind::Tuple(elems) => {
            for el in elems {
                rename_expr(el, rmap);
            }
        }
        ExprKind::ListLit { elem_ty, elems } => {
            rename_ty(&mut elem_ty.ty, rmap);
            for el in elems {
                rename_expr(el, rmap);
            }
        }
        ExprKind::DictLit { key_ty, val_ty, entries } => {
            rename_ty(&mut key_ty.ty, rmap);
            rename_ty(&mut val_ty.ty, rmap);
            for (k, v) in entries {
                rename_expr(k, rmap);
                rename_expr(v, rmap);
            }
        }
        _ => {}
    }
}

// -------------------------
// Dotted-reference resolution (alias.X -> alias__X)
// -------------------------

fn resolve_dotted_program(prog: &mut Program, aliases: &HashSet<String>) {
    for f in &mut prog.funcs {
        let mut locals: HashSet<String> = f.params.iter().map(|p| p.name.clone()).collect();
        collect_local_names(&f.body.stmts, &mut locals);
        let effective: HashSet<String> = aliases.difference(&locals).cloned().collect();
        for s in &mut f.body.stmts {
            dotted_stmt(s, &effective);
        }
    }
    for c in &mut prog.classes {
        for m in &mut c.methods {
            let mut locals: HashSet<String> = m.params.iter().map(|p| p.name.clone()).collect();
            collect_local_names(&m.body.stmts, &mut locals);
            let effective: HashSet<String> = aliases.difference(&locals).cloned().collect();
            for s in &mut m.body.stmts {
                dotted_stmt(s, &effective);
            }
        }
    }
    for st in &mut prog.structs {
        for m in &mut st.methods {
            let mut locals: HashSet<String> = m.params.iter().map(|p| p.name.clone()).collect();
            collect_local_names(&m.body.stmts, &mut locals);
            let effective: HashSet<String> = aliases.difference(&locals).cloned().collect();
            for s in &mut m.body.stmts {
                dotted_stmt(s, &effective);
            }
        }
    }
    for s in &mut prog.stmts {
        dotted_stmt(s, aliases);
    }
}

fn dotted_stmt(s: &mut Stmt, aliases: &HashSet<String>) {
    match &mut s.kind {
        StmtKind::VarDecl { value, .. } => dotted_expr(value, aliases),
        StmtKind::Destructure { value, .. } => dotted_expr(value, aliases),
        StmtKind::Assign { value, .. } => dotted_expr(value, aliases),
        StmtKind::MemberAssign { obj, value, .. } => {
            dotted_expr(obj, aliases);
            dotted_expr(value, aliases);
        }
        StmtKind::IndexAssign { obj, index, value, .. } => {
            dotted_expr(obj, aliases);
            dotted_expr(index, aliases);
            dotted_expr(value, aliases);
        }
        StmtKind::Expr(e) => dotted_expr(e, aliases),
        StmtKind::Return(Some(e)) => dotted_expr(e, aliases),
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => {}
        StmtKind::If { arms } => {
            for arm in arms {
                if let Some(c) = &mut arm.cond {
                    dotted_expr(c, aliases);
                }
                for s2 in &mut arm.block.stmts {
                    dotted_stmt(s2, aliases);
                }
            }
        }
        StmtKind::While { cond, body } => {
            dotted_expr(cond, aliases);
            for s2 in &mut body.stmts {
                dotted_stmt(s2, aliases);
            }
        }
        StmtKind::For { iterable, body, .. } => {
            dotted_expr(iterable, aliases);
            for s2 in &mut body.stmts {
                dotted_stmt(s2, aliases);
            }
        }
    }
}

fn dotted_expr(e: &mut Expr, aliases: &HashSet<String>) {
    // Rewrite `alias.member` into the flat `alias__member` reference.
    if let ExprKind::Member { obj, member } = &mut e.kind {
        dotted_expr(obj, aliases);
        if let ExprKind::Var(name) = &obj.kind {
            if aliases.contains(name) {
                let flat = format!("{}__{}", name, member);
                e.kind = ExprKind::Var(flat);
                return;
            }
        }
        return;
    }
    match &mut e.kind {
        ExprKind::Unary { rhs, .. } => dotted_expr(rhs, aliases),
        ExprKind::Binary { lhs, rhs, .. } => {
            dotted_expr(lhs, aliases);
            dotted_expr(rhs, aliases);
        }
        ExprKind::Call { callee, args, .. } => {
            dotted_expr(callee, aliases);
            for a in args {
                dotted_expr(a, aliases);
            }
        }
        ExprKind::Index { obj, index } => {
            dotted_expr(obj, aliases);
            dotted_expr(index, aliases);
        }
        ExprKind::Is { expr, .. } => dotted_expr(expr, aliases),
        ExprKind::As { expr, .. } => dotted_expr(expr, aliases),
        ExprKind::Tuple(elems) => {
            for el in elems {
                dotted_expr(el, aliases);
            }
        }
        ExprKind::ListLit { elems, .. } => {
            for el in elems {
                dotted_expr(el, aliases);
            }
        }
        ExprKind::DictLit { entries, .. } => {
            for (k, v) in entries {
                dotted_expr(k, aliases);
                dotted_expr(v, aliases);
            }
        }
        _ => {}
    }
}

// -------------------------
// Merge
// -------------------------

/// Merge a mangled module into the importing program. Module declarations
/// are prepended (their globals must initialize before the importer's
/// statements); duplicates arriving through diamond import paths dedupe by
/// name.
fn merge_program(prog: &mut Program, module: Program) {
    fn prepend_unique<T>(dst: &mut Vec<T>, src: Vec<T>, name: impl Fn(&T) -> &str) {
        let existing: HashSet<String> = dst.iter().map(|x| name(x).to_string()).collect();
        let mut merged: Vec<T> =
            src.into_iter().filter(|x| !existing.contains(name(x))).collect();
        merged.append(dst);
        *dst = merged;
    }

    prepend_unique(&mut prog.funcs, module.funcs, |f| &f.name);
    prepend_unique(&mut prog.classes, module.classes, |c| &c.name);
    prepend_unique(&mut prog.structs, module.structs, |s| &s.name);
    prepend_unique(&mut prog.interfaces, module.interfaces, |i| &i.name);
    prepend_unique(&mut prog.enums, module.enums, |e| &e.name);

    let existing_consts: HashSet<String> = prog
        .stmts
        .iter()
        .filter_map(|s| match &s.kind {
            StmtKind::VarDecl { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect();
    let mut merged_stmts: Vec<Stmt> = module
        .stmts
        .into_iter()
        .filter(|s| match &s.kind {
            StmtKind::VarDecl { name, .. } => !existing_consts.contains(name),
            _ => true,
        })
        .collect();
    merged_stmts.append(&mut prog.stmts);
    prog.stmts = merged_stmts;

    for inc in module.extern_includes {
        if !prog.extern_includes.contains(&inc) {
            prog.extern_includes.push(inc);
        }
    }
    for fl in module.extern_cflags {
        if !prog.extern_cflags.contains(&fl) {
            prog.extern_cflags.push(fl);
        }
    }
    for fl in module.extern_ldflags {
        if !prog.extern_ldflags.contains(&fl) {
            prog.extern_ldflags.push(fl);
        }
    }
    prog.extern_types.extend(module.extern_types);
    prog.extern_consts.extend(module.extern_consts);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Diagnostics;
    use crate::span::SourceMap;

    fn parse(src: &str) -> Program {
        let mut sources = SourceMap::new();
        let mut ids = IdGen::new();
        let mut diags = Diagnostics::new();
        let prog = parse_source(
            "<test>",
            src.to_string(),
            &HashSet::new(),
            &mut sources,
            &mut ids,
            &mut diags,
        )
        .unwrap();
        assert!(!diags.has_errors(), "unexpected diagnostics");
        prog
    }

    #[test]
    fn test_mangle_module_renames_decls_and_refs() {
        let mut module = parse(
            "def area(r: f64) -> f64\n  return r * r * PI\nend\nPI: f64 = 3.14159\n",
        );
        mangle_module(&mut module, "geo");
        assert_eq!(module.funcs[0].name, "geo__area");
        match &module.stmts[0].kind {
            StmtKind::VarDecl { name, .. } => assert_eq!(name, "geo__PI"),
            other => panic!("unexpected stmt {:?}", other),
        }
        // The body reference to PI was rewritten too.
        match &module.funcs[0].body.stmts[0].kind {
            StmtKind::Return(Some(e)) => {
                let text = format!("{:?}", e);
                assert!(text.contains("geo__PI"), "body not renamed: {}", text);
            }
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn test_mangle_respects_shadowing() {
        let mut module = parse(
            "def f(count: i64) -> i64\n  return count\nend\ncount: i64 = 7\n",
        );
        mangle_module(&mut module, "m");
        // The parameter `count` shadows the module global inside f.
        match &module.funcs[0].body.stmts[0].kind {
            StmtKind::Return(Some(e)) => {
                assert!(matches!(&e.kind, ExprKind::Var(n) if n == "count"));
            }
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn test_dotted_resolution() {
        let mut prog = parse("x := geo.area(2.0)\n");
        let aliases: HashSet<String> = ["geo".to_string()].into();
        resolve_dotted_program(&mut prog, &aliases);
        match &prog.stmts[0].kind {
            StmtKind::VarDecl { value, .. } => match &value.kind {
                ExprKind::Call { callee, .. } => {
                    assert!(matches!(&callee.kind, ExprKind::Var(n) if n == "geo__area"));
                }
                other => panic!("expected call, got {:?}", other),
            },
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_merge_dedupes_and_prepends() {
        let mut main = parse("def main_fn()\nend\nx := 1\n");
        let module = parse("def util()\nend\ny := 2\n");
        merge_program(&mut main, module);
        assert_eq!(main.funcs[0].name, "util");
        assert_eq!(main.funcs[1].name, "main_fn");
        // Module globals come before importer statements.
        match &main.stmts[0].kind {
            StmtKind::VarDecl { name, .. } => assert_eq!(name, "y"),
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn test_import_cycle_detected() {
        let dir = std::env::temp_dir().join(format!("bismut-cycle-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.mut"), "import b\n").unwrap();
        std::fs::write(dir.join("b.mut"), "import a\n").unwrap();

        let mut sources = SourceMap::new();
        let mut ids = IdGen::new();
        let mut diags = Diagnostics::new();
        let opts = ResolveOptions {
            compiler_dir: dir.clone(),
            defines: HashSet::new(),
            target_platform: None,
        };
        let content = std::fs::read_to_string(dir.join("a.mut")).unwrap();
        let result = Resolver::new(&mut sources, &mut ids, &mut diags, &opts)
            .load_root(&dir.join("a.mut"), content);
        assert!(result.is_none());
        assert!(diags.has_errors());
        let msg: Vec<String> = diags.iter().map(|d| d.message.clone()).collect();
        assert!(msg.iter().any(|m| m.contains("circular import")), "diags: {:?}", msg);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_import_merges_module() {
        let dir = std::env::temp_dir().join(format!("bismut-import-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("geo.mut"),
            "def area(r: f64) -> f64\n  return r * r * 3.14159\nend\n",
        )
        .unwrap();
        std::fs::write(dir.join("main.mut"), "import geo\n\nx := geo.area(1.0)\n").unwrap();

        let mut sources = SourceMap::new();
        let mut ids = IdGen::new();
        let mut diags = Diagnostics::new();
        let opts = ResolveOptions {
            compiler_dir: dir.clone(),
            defines: HashSet::new(),
            target_platform: None,
        };
        let content = std::fs::read_to_string(dir.join("main.mut")).unwrap();
        let prog = Resolver::new(&mut sources, &mut ids, &mut diags, &opts)
            .load_root(&dir.join("main.mut"), content)
            .unwrap();
        assert!(!diags.has_errors());
        assert!(prog.funcs.iter().any(|f| f.name == "geo__area"));
        match &prog.stmts[0].kind {
            StmtKind::VarDecl { value, .. } => match &value.kind {
                ExprKind::Call { callee, .. } => {
                    assert!(matches!(&callee.kind, ExprKind::Var(n) if n == "geo__area"));
                }
                other => panic!("expected call, got {:?}", other),
            },
            _ => unreachable!(),
        }

        let _ = std::fs::remove_dir_all(&dir);
    }
}
