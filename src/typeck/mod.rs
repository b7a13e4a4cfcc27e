//! Type checker for Bismut
//!
//! Checking runs in two passes over the flat, import-resolved program:
//!
//! 1. **Declaration collection**: register every top-level name, resolve
//!    enum variant values, build class/struct/interface tables, validate
//!    interface satisfaction and struct-field legality, and analyze the
//!    class-field reference graph for cycles (a warning: pure reference
//!    counting cannot collect them).
//! 2. **Body checking**: walk every initializer, function, and method
//!    body with a lexical scope stack, annotating each expression with its
//!    resolved type. Generic functions are monomorphized on demand: each
//!    distinct instantiation becomes a mangled concrete function that is
//!    itself checked and appended to the program.
//!
//! Errors are collected per statement; any error blocks emission, but
//! checking continues so one mistake does not hide the rest.

mod check;
mod error;
mod monomorph;
mod ty;

pub use error::{TypeError, TypeErrorKind, TypeResult, TypeWarning};
pub use ty::{fn_typedef_name, FloatTy, IntTy, Ty, UintTy};

use crate::ast::*;
use crate::span::Span;
use std::collections::{HashMap, VecDeque};

/// Per-class information for checking and emission.
#[derive(Debug, Clone, Default)]
pub struct ClassInfo {
    /// Fields in declaration order.
    pub fields: Vec<(String, Ty)>,
    /// method name -> (param types excluding self, return type)
    pub methods: HashMap<String, (Vec<Ty>, Ty)>,
    /// Constructor parameter types (excluding self).
    pub init_params: Vec<Ty>,
    pub implements: Vec<String>,
}

impl ClassInfo {
    pub fn field_ty(&self, name: &str) -> Option<&Ty> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StructInfo {
    pub fields: Vec<(String, Ty)>,
    pub methods: HashMap<String, (Vec<Ty>, Ty)>,
}

impl StructInfo {
    pub fn field_ty(&self, name: &str) -> Option<&Ty> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }
}

#[derive(Debug, Clone, Default)]
pub struct IfaceInfo {
    pub methods: HashMap<String, (Vec<Ty>, Ty)>,
}

#[derive(Debug, Clone)]
pub struct VarInfo {
    pub ty: Ty,
    pub is_const: bool,
}

/// A fully checked program plus the side tables the emitter consumes.
#[derive(Debug)]
pub struct TypedProgram {
    /// The program, with monomorphized generic instantiations appended.
    pub program: Program,
    /// Resolved type of every expression.
    pub expr_tys: HashMap<NodeId, Ty>,
    /// Resolved binding type of var-decl / for / destructure statements.
    pub decl_tys: HashMap<NodeId, Ty>,
    /// Resolved type arguments of container ops and generic calls.
    pub call_args: HashMap<NodeId, Vec<Ty>>,
    /// Enum variant values: enum name -> variant -> i64.
    pub enums: HashMap<String, HashMap<String, i64>>,
    pub classes: HashMap<String, ClassInfo>,
    pub structs: HashMap<String, StructInfo>,
    pub interfaces: HashMap<String, IfaceInfo>,
    /// name -> (param types, return type), monomorphized instances included.
    pub funcs: HashMap<String, (Vec<Ty>, Ty)>,
}

/// Result of a checking run. `typed` is present iff there were no errors;
/// warnings are reported either way.
pub struct CheckOutcome {
    pub typed: Option<TypedProgram>,
    pub errors: Vec<TypeError>,
    pub warnings: Vec<TypeWarning>,
}

/// Main entry point for type checking a program.
pub fn check_program(program: Program, ids: &mut IdGen) -> CheckOutcome {
    TypeChecker::new(ids).check(program)
}

pub struct TypeChecker<'a> {
    pub(crate) ids: &'a mut IdGen,

    pub(crate) classes: HashMap<String, ClassInfo>,
    pub(crate) structs: HashMap<String, StructInfo>,
    pub(crate) interfaces: HashMap<String, IfaceInfo>,
    pub(crate) enums: HashMap<String, HashMap<String, i64>>,
    pub(crate) funcs: HashMap<String, (Vec<Ty>, Ty)>,
    /// Generic function templates, not checked until instantiated.
    pub(crate) generic_funcs: HashMap<String, FuncDecl>,
    /// Monomorphized instances waiting to be checked.
    pub(crate) pending: VecDeque<FuncDecl>,
    /// Checked monomorphized instances, appended to the program at the end.
    pub(crate) instantiated: Vec<FuncDecl>,

    pub(crate) scopes: Vec<HashMap<String, VarInfo>>,
    pub(crate) cur_ret: Option<Ty>,
    pub(crate) loop_depth: u32,

    pub(crate) errors: Vec<TypeError>,
    pub(crate) warnings: Vec<TypeWarning>,

    pub(crate) expr_tys: HashMap<NodeId, Ty>,
    pub(crate) decl_tys: HashMap<NodeId, Ty>,
    pub(crate) call_args: HashMap<NodeId, Vec<Ty>>,
}

impl<'a> TypeChecker<'a> {
    pub fn new(ids: &'a mut IdGen) -> Self {
        Self {
            ids,
            classes: HashMap::new(),
            structs: HashMap::new(),
            interfaces: HashMap::new(),
            enums: HashMap::new(),
            funcs: HashMap::new(),
            generic_funcs: HashMap::new(),
            pending: VecDeque::new(),
            instantiated: Vec::new(),
            scopes: Vec::new(),
            cur_ret: None,
            loop_depth: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            expr_tys: HashMap::new(),
            decl_tys: HashMap::new(),
            call_args: HashMap::new(),
        }
    }

    pub fn check(mut self, mut program: Program) -> CheckOutcome {
        self.collect_declarations(&program);

        // Body checking. The global scope stays on the stack so functions
        // and methods can see top-level bindings.
        self.push_scope();
        self.cur_ret = None;
        self.loop_depth = 0;
        let stmts = program.stmts.clone();
        for st in &stmts {
            if let Err(e) = self.check_stmt(st) {
                self.errors.push(e);
            }
        }

        let funcs = program.funcs.clone();
        for f in &funcs {
            if f.type_params.is_empty() {
                self.check_func(f);
            }
        }
        let classes = program.classes.clone();
        for cls in &classes {
            for m in &cls.methods {
                self.check_method(&cls.name, m);
            }
        }
        let structs = program.structs.clone();
        for st in &structs {
            for m in &st.methods {
                self.check_struct_method(&st.name, m);
            }
        }

        // Monomorphized instances may themselves instantiate further
        // generics; drain until quiet.
        while let Some(inst) = self.pending.pop_front() {
            self.check_func(&inst);
            self.instantiated.push(inst);
        }
        self.pop_scope();

        program.funcs.extend(self.instantiated.drain(..));

        let typed = if self.errors.is_empty() {
            Some(TypedProgram {
                program,
                expr_tys: self.expr_tys,
                decl_tys: self.decl_tys,
                call_args: self.call_args,
                enums: self.enums,
                classes: self.classes,
                structs: self.structs,
                interfaces: self.interfaces,
                funcs: self.funcs,
            })
        } else {
            None
        };
        CheckOutcome { typed, errors: self.errors, warnings: self.warnings }
    }

    // -------------------------
    // Pass 1: declaration collection
    // -------------------------

    fn collect_declarations(&mut self, program: &Program) {
        // Register every top-level type name first so forward references
        // among declarations resolve.
        for iface in &program.interfaces {
            if Ty::from_prim_name(&iface.name).is_some() {
                self.errors.push(TypeError::custom(
                    format!("interface '{}' conflicts with built-in type", iface.name),
                    iface.span,
                ));
                continue;
            }
            self.interfaces.insert(iface.name.clone(), IfaceInfo::default());
        }

        for decl in &program.enums {
            if Ty::from_prim_name(&decl.name).is_some() || self.interfaces.contains_key(&decl.name)
            {
                self.errors.push(TypeError::custom(
                    format!("enum '{}' conflicts with existing type", decl.name),
                    decl.span,
                ));
                continue;
            }
            let mut variants: HashMap<String, i64> = HashMap::new();
            let mut next_val: i64 = 0;
            for v in &decl.variants {
                if let Some(explicit) = v.value {
                    next_val = explicit;
                }
                if variants.insert(v.name.clone(), next_val).is_some() {
                    self.errors
                        .push(TypeError::custom(format!("duplicate enum variant '{}'", v.name), v.span));
                }
                next_val += 1;
            }
            self.enums.insert(decl.name.clone(), variants);
        }

        for cls in &program.classes {
            if Ty::from_prim_name(&cls.name).is_some() {
                self.errors.push(TypeError::custom(
                    format!("class '{}' conflicts with built-in type", cls.name),
                    cls.span,
                ));
                continue;
            }
            if self.interfaces.contains_key(&cls.name) {
                self.errors.push(TypeError::custom(
                    format!("class '{}' conflicts with interface name", cls.name),
                    cls.span,
                ));
                continue;
            }
            self.classes.insert(cls.name.clone(), ClassInfo::default());
        }

        for st in &program.structs {
            let clash = Ty::from_prim_name(&st.name).is_some()
                || self.classes.contains_key(&st.name)
                || self.interfaces.contains_key(&st.name)
                || self.enums.contains_key(&st.name);
            if clash {
                self.errors.push(TypeError::custom(
                    format!("struct '{}' conflicts with existing type", st.name),
                    st.span,
                ));
                continue;
            }
            self.structs.insert(st.name.clone(), StructInfo::default());
        }

        // Interface method tables.
        for iface in &program.interfaces {
            let mut methods = HashMap::new();
            for ms in &iface.methods {
                if ms.params.first().map(|p| p.name.as_str()) != Some("self") {
                    self.errors.push(TypeError::custom(
                        format!("interface method '{}' must have 'self' as first parameter", ms.name),
                        ms.span,
                    ));
                    continue;
                }
                match self.method_sig_tys(&ms.params, &ms.ret) {
                    Ok(sig) => {
                        methods.insert(ms.name.clone(), sig);
                    }
                    Err(e) => self.errors.push(e),
                }
            }
            if let Some(info) = self.interfaces.get_mut(&iface.name) {
                info.methods = methods;
            }
        }

        // Class tables and interface satisfaction.
        for cls in &program.classes {
            let mut info = ClassInfo::default();
            for fd in &cls.fields {
                match self.resolve_type(&fd.ty) {
                    Ok(ty) => info.fields.push((fd.name.clone(), ty)),
                    Err(e) => self.errors.push(e),
                }
            }
            for m in &cls.methods {
                if m.params.first().map(|p| p.name.as_str()) != Some("self") {
                    self.errors.push(TypeError::custom(
                        format!("class method '{}' must have 'self' as first parameter", m.name),
                        m.span,
                    ));
                    continue;
                }
                match self.method_sig_tys(&m.params, &m.ret) {
                    Ok((param_tys, ret_ty)) => {
                        if m.name == "init" {
                            info.init_params = param_tys.clone();
                        }
                        info.methods.insert(m.name.clone(), (param_tys, ret_ty));
                    }
                    Err(e) => self.errors.push(e),
                }
            }

            for iname in &cls.implements {
                let iface = match self.interfaces.get(iname) {
                    Some(i) => i.clone(),
                    None => {
                        self.errors.push(TypeError::custom(
                            format!("class '{}' implements unknown interface '{}'", cls.name, iname),
                            cls.span,
                        ));
                        continue;
                    }
                };
                for (mname, (iface_ptys, iface_ret)) in &iface.methods {
                    match info.methods.get(mname) {
                        None => self.errors.push(TypeError::custom(
                            format!(
                                "class '{}' is missing method '{}' required by interface '{}'",
                                cls.name, mname, iname
                            ),
                            cls.span,
                        )),
                        Some((cls_ptys, cls_ret)) => {
                            if cls_ptys != iface_ptys || cls_ret != iface_ret {
                                let fmt_sig = |ptys: &[Ty], ret: &Ty| {
                                    let ps: Vec<String> =
                                        ptys.iter().map(|t| t.to_string()).collect();
                                    format!("({}) -> {}", ps.join(", "), ret)
                                };
                                self.errors.push(TypeError::custom(
                                    format!(
                                        "method '{}' in class '{}' has signature {}, but interface '{}' requires {}",
                                        mname,
                                        cls.name,
                                        fmt_sig(cls_ptys, cls_ret),
                                        iname,
                                        fmt_sig(iface_ptys, iface_ret)
                                    ),
                                    cls.span,
                                ));
                            }
                        }
                    }
                }
                info.implements.push(iname.clone());
            }
            self.classes.insert(cls.name.clone(), info);
        }

        self.warn_class_ref_cycles(program);

        // Struct tables: fields must be value kind, no init, no recursion.
        for st in &program.structs {
            let mut info = StructInfo::default();
            for fd in &st.fields {
                match self.resolve_type(&fd.ty) {
                    Ok(ty) => {
                        if ty.is_ref_kind() {
                            self.errors.push(TypeError::custom(
                                format!(
                                    "struct field '{}' cannot have reference type '{}' (only value types allowed)",
                                    fd.name, ty
                                ),
                                fd.span,
                            ));
                        }
                        info.fields.push((fd.name.clone(), ty));
                    }
                    Err(e) => self.errors.push(e),
                }
            }
            for m in &st.methods {
                if m.name == "init" {
                    self.errors.push(TypeError::custom(
                        "structs cannot have 'init' methods (construction is positional by field order)",
                        m.span,
                    ));
                    continue;
                }
                if m.params.first().map(|p| p.name.as_str()) != Some("self") {
                    self.errors.push(TypeError::custom(
                        format!("struct method '{}' must have 'self' as first parameter", m.name),
                        m.span,
                    ));
                    continue;
                }
                match self.method_sig_tys(&m.params, &m.ret) {
                    Ok(sig) => {
                        info.methods.insert(m.name.clone(), sig);
                    }
                    Err(e) => self.errors.push(e),
                }
            }
            self.structs.insert(st.name.clone(), info);
        }
        self.check_struct_containment(program);

        // Function signature table; generic templates are stored aside.
        for f in &program.funcs {
            if !f.type_params.is_empty() {
                self.generic_funcs.insert(f.name.clone(), f.clone());
                continue;
            }
            let mut param_tys = Vec::new();
            let mut ok = true;
            for p in &f.params {
                match self.resolve_type(&p.ty) {
                    Ok(t) => param_tys.push(t),
                    Err(e) => {
                        self.errors.push(e);
                        ok = false;
                    }
                }
            }
            let ret_ty = match self.resolve_type(&f.ret) {
                Ok(t) => t,
                Err(e) => {
                    self.errors.push(e);
                    ok = false;
                    Ty::Void
                }
            };
            if !ok {
                continue;
            }
            if self.funcs.contains_key(&f.name) {
                self.errors.push(TypeError::new(
                    TypeErrorKind::DuplicateFunction { name: f.name.clone() },
                    f.span,
                ));
                continue;
            }
            self.funcs.insert(f.name.clone(), (param_tys, ret_ty));
        }
    }

    fn method_sig_tys(&self, params: &[Param], ret: &TypeRef) -> TypeResult<(Vec<Ty>, Ty)> {
        let mut param_tys = Vec::new();
        for p in params.iter().skip(1) {
            param_tys.push(self.resolve_type(&p.ty)?);
        }
        let ret_ty = self.resolve_type(ret)?;
        Ok((param_tys, ret_ty))
    }

    // -------------------------
    // Reference-cycle analysis
    // -------------------------

    /// The runtime uses pure reference counting, which cannot collect
    /// cycles. Any cycle reachable through class reference-kind fields
    /// (directly or through container element types) is reported as a
    /// warning; the debug leak detector catches actual leaks at runtime.
    fn warn_class_ref_cycles(&mut self, program: &Program) {
        fn class_refs(ty: &Ty, out: &mut Vec<String>) {
            match ty {
                Ty::Class(n) => out.push(n.clone()),
                Ty::List(t) => class_refs(t, out),
                Ty::Dict(k, v) => {
                    class_refs(k, out);
                    class_refs(v, out);
                }
                _ => {}
            }
        }

        // Adjacency over classes, in declaration order for determinism.
        let names: Vec<String> = program.classes.iter().map(|c| c.name.clone()).collect();
        let mut adj: HashMap<String, Vec<String>> = HashMap::new();
        let mut spans: HashMap<String, Span> = HashMap::new();
        for cls in &program.classes {
            spans.insert(cls.name.clone(), cls.span);
            let info = match self.classes.get(&cls.name) {
                Some(i) => i,
                None => continue,
            };
            let mut targets = Vec::new();
            for (_, fty) in &info.fields {
                class_refs(fty, &mut targets);
            }
            targets.retain(|t| self.classes.contains_key(t));
            adj.insert(cls.name.clone(), targets);
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }
        let mut color: HashMap<&str, Color> =
            names.iter().map(|n| (n.as_str(), Color::White)).collect();
        let mut stack: Vec<&str> = Vec::new();
        let mut cycles: Vec<Vec<String>> = Vec::new();

        fn dfs<'x>(
            u: &'x str,
            adj: &'x HashMap<String, Vec<String>>,
            color: &mut HashMap<&'x str, Color>,
            stack: &mut Vec<&'x str>,
            cycles: &mut Vec<Vec<String>>,
        ) {
            color.insert(u, Color::Gray);
            stack.push(u);
            if let Some(targets) = adj.get(u) {
                for v in targets {
                    match color.get(v.as_str()).copied() {
                        Some(Color::Gray) => {
                            let start = stack.iter().position(|s| *s == v.as_str()).unwrap_or(0);
                            let mut cycle: Vec<String> =
                                stack[start..].iter().map(|s| s.to_string()).collect();
                            cycle.push(v.clone());
                            cycles.push(cycle);
                        }
                        Some(Color::White) => dfs(v.as_str(), adj, color, stack, cycles),
                        _ => {}
                    }
                }
            }
            stack.pop();
            color.insert(u, Color::Black);
        }

        for name in &names {
            if color.get(name.as_str()) == Some(&Color::White) {
                dfs(name.as_str(), &adj, &mut color, &mut stack, &mut cycles);
            }
        }

        for cycle in cycles {
            let span = spans.get(&cycle[0]).copied().unwrap_or_default();
            self.warnings.push(TypeWarning {
                message: format!(
                    "reference cycle through class fields: {} (reference counting cannot reclaim it; break the cycle or clear a link before dropping)",
                    cycle.join(" -> ")
                ),
                span,
            });
        }
    }

    /// Value types cannot contain themselves: that is an error, not a
    /// warning (the C struct would have infinite size).
    fn check_struct_containment(&mut self, program: &Program) {
        fn visit(
            name: &str,
            structs: &HashMap<String, StructInfo>,
            visiting: &mut Vec<String>,
        ) -> Option<String> {
            let info = structs.get(name)?;
            for (_, fty) in &info.fields {
                if let Ty::Struct(inner) = fty {
                    if visiting.iter().any(|v| v == inner) {
                        return Some(inner.clone());
                    }
                    visiting.push(inner.clone());
                    if let Some(found) = visit(inner, structs, visiting) {
                        return Some(found);
                    }
                    visiting.pop();
                }
            }
            None
        }

        for st in &program.structs {
            let mut visiting = vec![st.name.clone()];
            if visit(&st.name, &self.structs, &mut visiting).is_some() {
                self.errors.push(TypeError::custom(
                    format!(
                        "struct '{}' contains itself (directly or indirectly); value types cannot be recursive",
                        st.name
                    ),
                    st.span,
                ));
            }
        }
    }

    // -------------------------
    // Type resolution
    // -------------------------

    pub(crate) fn resolve_type(&self, tr: &TypeRef) -> TypeResult<Ty> {
        self.resolve_ty_expr(&tr.ty, tr.span)
    }

    pub(crate) fn resolve_ty_expr(&self, te: &TyExpr, span: Span) -> TypeResult<Ty> {
        match te {
            TyExpr::Name(n) => {
                if let Some(t) = Ty::from_prim_name(n) {
                    return Ok(t);
                }
                if self.classes.contains_key(n) {
                    return Ok(Ty::Class(n.clone()));
                }
                if self.structs.contains_key(n) {
                    return Ok(Ty::Struct(n.clone()));
                }
                if self.interfaces.contains_key(n) {
                    return Ok(Ty::Iface(n.clone()));
                }
                if self.enums.contains_key(n) {
                    return Ok(Ty::Enum(n.clone()));
                }
                Err(TypeError::unknown_type(n.clone(), span))
            }
            TyExpr::List(t) => Ok(Ty::List(Box::new(self.resolve_ty_expr(t, span)?))),
            TyExpr::Dict(k, v) => {
                let key = self.resolve_ty_expr(k, span)?;
                if !key.is_dict_key() {
                    return Err(TypeError::new(TypeErrorKind::BadDictKey { found: key }, span));
                }
                let val = self.resolve_ty_expr(v, span)?;
                Ok(Ty::Dict(Box::new(key), Box::new(val)))
            }
            TyExpr::Tuple(ts) => {
                let mut elems = Vec::new();
                for t in ts {
                    elems.push(self.resolve_ty_expr(t, span)?);
                }
                Ok(Ty::Tuple(elems))
            }
            TyExpr::Fn(ps, r) => {
                let mut params = Vec::new();
                for p in ps {
                    params.push(self.resolve_ty_expr(p, span)?);
                }
                Ok(Ty::Fn(params, Box::new(self.resolve_ty_expr(r, span)?)))
            }
        }
    }

    /// `None` is assignable to any reference-kind lvalue; enums are
    /// representationally i64; a class is assignable to any interface it
    /// implements. Everything else requires an exact match.
    pub(crate) fn assignable(&self, src: &Ty, dst: &Ty) -> bool {
        if src == dst {
            return true;
        }
        if src.resolve_enum() == dst.resolve_enum() {
            return true;
        }
        if *src == Ty::None && dst.is_ref_kind() {
            return true;
        }
        if let (Ty::Class(c), Ty::Iface(i)) = (src, dst) {
            if let Some(info) = self.classes.get(c) {
                return info.implements.iter().any(|x| x == i);
            }
        }
        false
    }

    // -------------------------
    // Scopes
    // -------------------------

    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub(crate) fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub(crate) fn declare(
        &mut self,
        name: &str,
        ty: Ty,
        span: Span,
        is_const: bool,
    ) -> TypeResult<()> {
        let scope = self.scopes.last_mut().expect("scope stack empty");
        if scope.contains_key(name) {
            return Err(TypeError::new(
                TypeErrorKind::DuplicateVariable { name: name.to_string() },
                span,
            ));
        }
        scope.insert(name.to_string(), VarInfo { ty, is_const });
        Ok(())
    }

    pub(crate) fn lookup(&self, name: &str, span: Span) -> TypeResult<VarInfo> {
        for scope in self.scopes.iter().rev() {
            if let Some(vi) = scope.get(name) {
                return Ok(vi.clone());
            }
        }
        Err(TypeError::undefined_variable(name, span))
    }

    // -------------------------
    // Function/method body checking
    // -------------------------

    pub(crate) fn check_func(&mut self, f: &FuncDecl) {
        let ret = match self.resolve_type(&f.ret) {
            Ok(t) => t,
            Err(_) => return, // already reported during collection
        };
        self.push_scope();
        let saved_ret = self.cur_ret.replace(ret);
        let saved_depth = std::mem::replace(&mut self.loop_depth, 0);

        for p in &f.params {
            match self.resolve_type(&p.ty) {
                Ok(ty) => {
                    if let Err(e) = self.declare(&p.name, ty, p.span, false) {
                        self.errors.push(e);
                    }
                }
                Err(_) => {}
            }
        }
        self.check_block(&f.body);

        self.loop_depth = saved_depth;
        self.cur_ret = saved_ret;
        self.pop_scope();
    }

    fn check_method(&mut self, class_name: &str, m: &FuncDecl) {
        let ret = match self.resolve_type(&m.ret) {
            Ok(t) => t,
            Err(_) => return,
        };
        self.push_scope();
        let saved_ret = self.cur_ret.replace(ret);
        let saved_depth = std::mem::replace(&mut self.loop_depth, 0);

        if let Some(p) = m.params.first() {
            let _ = self.declare("self", Ty::Class(class_name.to_string()), p.span, false);
        }
        for p in m.params.iter().skip(1) {
            if let Ok(ty) = self.resolve_type(&p.ty) {
                if let Err(e) = self.declare(&p.name, ty, p.span, false) {
                    self.errors.push(e);
                }
            }
        }
        self.check_block(&m.body);

        self.loop_depth = saved_depth;
        self.cur_ret = saved_ret;
        self.pop_scope();
    }

    fn check_struct_method(&mut self, struct_name: &str, m: &FuncDecl) {
        let ret = match self.resolve_type(&m.ret) {
            Ok(t) => t,
            Err(_) => return,
        };
        self.push_scope();
        let saved_ret = self.cur_ret.replace(ret);
        let saved_depth = std::mem::replace(&mut self.loop_depth, 0);

        if let Some(p) = m.params.first() {
            let _ = self.declare("self", Ty::Struct(struct_name.to_string()), p.span, false);
        }
        for p in m.params.iter().skip(1) {
            if let Ok(ty) = self.resolve_type(&p.ty) {
                if let Err(e) = self.declare(&p.name, ty, p.span, false) {
                    self.errors.push(e);
                }
            }
        }
        self.check_block(&m.body);

        self.loop_depth = saved_depth;
        self.cur_ret = saved_ret;
        self.pop_scope();
    }

    pub(crate) fn check_block(&mut self, block: &Block) {
        for st in &block.stmts {
            if let Err(e) = self.check_stmt(st) {
                self.errors.push(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Diagnostics;
    use crate::resolve::parse_source;
    use crate::span::SourceMap;
    use std::collections::HashSet;

    fn run_check(src: &str) -> CheckOutcome {
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
        .expect("preprocess failed");
        assert!(!diags.has_errors(), "parse errors in test source");
        check_program(prog, &mut ids)
    }

    fn check_ok(src: &str) -> TypedProgram {
        let outcome = run_check(src);
        assert!(
            outcome.errors.is_empty(),
            "unexpected type errors: {:?}",
            outcome.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>()
        );
        outcome.typed.expect("typed program")
    }

    fn check_err(src: &str) -> Vec<TypeError> {
        let outcome = run_check(src);
        assert!(!outcome.errors.is_empty(), "expected type errors");
        outcome.errors
    }

    #[test]
    fn test_simple_function() {
        check_ok("def add(a: i64, b: i64) -> i64\n  return a + b\nend\n");
    }

    #[test]
    fn test_mixed_integer_widths_rejected() {
        let errors = check_err("def f()\n  x: i32 = 1\n  y: i64 = 2\n  z := x + y\nend\n");
        assert!(errors[0].to_string().contains("'+'"), "got: {}", errors[0]);
    }

    #[test]
    fn test_mixed_float_widths_rejected() {
        let errors = check_err("def f()\n  x: f32 = 1.0\n  y: f64 = 2.0\n  z := x + y\nend\n");
        assert!(errors[0].to_string().contains("'+'"), "got: {}", errors[0]);
    }

    #[test]
    fn test_literal_adaptation() {
        check_ok("def f()\n  x: i32 = 1\n  y: u8 = 'A'\n  z: i32 = x + 1\nend\n");
    }

    #[test]
    fn test_inferred_defaults() {
        let typed = check_ok("def f()\n  x := 1\n  y := 1.5\nend\n");
        let tys: Vec<&Ty> = typed.decl_tys.values().collect();
        assert!(tys.contains(&&Ty::I64));
        assert!(tys.contains(&&Ty::F64));
    }

    #[test]
    fn test_truthiness_discipline() {
        let errors = check_err("def f(x: f64)\n  if x\n    print(1)\n  end\nend\n");
        assert!(errors[0].to_string().contains("bool, integer, or reference"));
        check_ok("def f(xs: List[i64])\n  if xs\n    print(1)\n  end\nend\n");
        check_ok("def f(x: i32)\n  while x\n    break\n  end\nend\n");
    }

    #[test]
    fn test_string_concat() {
        check_ok("def f(a: str, b: str) -> str\n  return a + b\nend\n");
        check_err("def f(a: str) -> str\n  return a + 1\nend\n");
    }

    #[test]
    fn test_none_assignability() {
        check_ok("def f()\n  s: str = None\nend\n");
        check_err("def f()\n  x: i64 = None\nend\n");
    }

    #[test]
    fn test_dict_key_legality() {
        check_err("def f()\n  d := Dict[f64, i64]() { }\nend\n");
        check_ok("enum Color\n  RED, GREEN\nend\ndef f()\n  d := Dict[Color, i64]() { }\nend\n");
    }

    #[test]
    fn test_struct_fields_value_kind_only() {
        let errors = check_err("struct Bad\n  name: str\nend\n");
        assert!(errors[0].to_string().contains("reference type"));
    }

    #[test]
    fn test_struct_cannot_recurse() {
        let errors = check_err("struct A\n  b: B\nend\nstruct B\n  a: A\nend\n");
        assert!(errors[0].to_string().contains("contains itself"));
    }

    #[test]
    fn test_struct_no_init() {
        let errors = check_err("struct P\n  x: i64\n\n  def init(self)\n  end\nend\n");
        assert!(errors[0].to_string().contains("init"));
    }

    #[test]
    fn test_interface_satisfaction() {
        check_ok(
            "interface IShape\n  def area(self) -> f64\nend\n\nclass Circle: IShape\n  r: f64\n\n  def init(self, r: f64)\n    self.r = r\n  end\n\n  def area(self) -> f64\n    return self.r * self.r * 3.14159\n  end\nend\n",
        );
    }

    #[test]
    fn test_interface_missing_method() {
        let errors = check_err(
            "interface IShape\n  def area(self) -> f64\nend\n\nclass Square: IShape\n  s: f64\n\n  def init(self, s: f64)\n    self.s = s\n  end\nend\n",
        );
        assert!(errors[0].to_string().contains("missing method 'area'"));
    }

    #[test]
    fn test_interface_signature_mismatch() {
        let errors = check_err(
            "interface IShape\n  def area(self) -> f64\nend\n\nclass Square: IShape\n  s: f64\n\n  def init(self, s: f64)\n    self.s = s\n  end\n\n  def area(self) -> i64\n    return 0\n  end\nend\n",
        );
        assert!(errors[0].to_string().contains("requires"));
    }

    #[test]
    fn test_class_assignable_to_interface() {
        check_ok(
            "interface IShape\n  def area(self) -> f64\nend\n\nclass Circle: IShape\n  r: f64\n\n  def init(self, r: f64)\n    self.r = r\n  end\n\n  def area(self) -> f64\n    return 1.0\n  end\nend\n\ndef f() -> f64\n  s: IShape = Circle(1.0)\n  return s.area()\nend\n",
        );
    }

    #[test]
    fn test_as_requires_interface_lhs() {
        let errors = check_err(
            "class Circle\n  r: f64\n\n  def init(self, r: f64)\n    self.r = r\n  end\nend\n\ndef f()\n  c := Circle(1.0)\n  d := c as Circle\nend\n",
        );
        assert!(errors[0].to_string().contains("interface type on the left"));
    }

    #[test]
    fn test_tuple_destructure() {
        let typed = check_ok(
            "def pair() -> (i64, str)\n  return (42, \"hi\")\nend\n\ndef f()\n  a, b := pair()\n  print(a)\n  print(b)\nend\n",
        );
        assert!(typed.decl_tys.values().any(|t| *t == Ty::Tuple(vec![Ty::I64, Ty::Str])));
    }

    #[test]
    fn test_tuple_destructure_arity() {
        let errors = check_err(
            "def pair() -> (i64, str)\n  return (42, \"hi\")\nend\n\ndef f()\n  a, b, c := pair()\nend\n",
        );
        assert!(errors[0].to_string().contains("2 elements"));
    }

    #[test]
    fn test_generic_identity_monomorphized() {
        let typed = check_ok(
            "def id[T](x: T) -> T\n  return x\nend\n\ndef f()\n  a := id[i64](7)\n  b := id(\"abc\")\nend\n",
        );
        // One monomorphized emission per distinct type-argument set.
        assert!(typed.program.funcs.iter().any(|f| f.name == "id_I64"));
        assert!(typed.program.funcs.iter().any(|f| f.name == "id_STR"));
        // Call sites are annotated with their bindings.
        assert!(typed.call_args.values().any(|args| args == &vec![Ty::I64]));
        assert!(typed.call_args.values().any(|args| args == &vec![Ty::Str]));
    }

    #[test]
    fn test_generic_inference_through_list() {
        let typed = check_ok(
            "def first[T](xs: List[T]) -> T\n  return xs[0]\nend\n\ndef f() -> str\n  xs := List[str]() { \"a\" }\n  return first(xs)\nend\n",
        );
        assert!(typed.program.funcs.iter().any(|f| f.name == "first_STR"));
    }

    #[test]
    fn test_enum_values_auto_increment_with_reset() {
        let typed = check_ok("enum Status\n  OK, WARN = 10, FAIL\nend\n");
        let variants = &typed.enums["Status"];
        assert_eq!(variants["OK"], 0);
        assert_eq!(variants["WARN"], 10);
        assert_eq!(variants["FAIL"], 11);
    }

    #[test]
    fn test_enum_duplicate_variant() {
        let errors = check_err("enum Status\n  OK, OK\nend\n");
        assert!(errors[0].to_string().contains("duplicate enum variant"));
    }

    #[test]
    fn test_class_cycle_warning() {
        let outcome = run_check(
            "class A\n  b: B\n\n  def init(self)\n  end\nend\n\nclass B\n  a: A\n\n  def init(self)\n  end\nend\n",
        );
        assert!(outcome.errors.is_empty(), "cycles are warnings, not errors");
        assert!(
            outcome.warnings.iter().any(|w| w.message.contains("reference cycle")),
            "warnings: {:?}",
            outcome.warnings
        );
    }

    #[test]
    fn test_self_referential_class_warns() {
        let outcome =
            run_check("class Node\n  next: Node\n\n  def init(self)\n  end\nend\n");
        assert!(outcome.errors.is_empty());
        assert!(outcome.warnings.iter().any(|w| w.message.contains("Node -> Node")));
    }

    #[test]
    fn test_const_rejects_reassignment() {
        let errors = check_err("def f()\n  const x: i64 = 1\n  x = 2\nend\n");
        assert!(errors[0].to_string().contains("constant"));
    }

    #[test]
    fn test_break_outside_loop() {
        let errors = check_err("def f()\n  break\nend\n");
        assert!(errors[0].to_string().contains("break"));
    }

    #[test]
    fn test_return_type_mismatch() {
        let errors = check_err("def f() -> i64\n  return \"no\"\nend\n");
        assert!(errors[0].to_string().contains("return type mismatch"));
    }

    #[test]
    fn test_static_only_in_functions() {
        let errors = check_err("static x: i64 = 1\n");
        assert!(errors[0].to_string().contains("static"));
    }

    #[test]
    fn test_for_requires_list() {
        check_ok("def f()\n  for i: i64 in range(10)\n    print(i)\n  end\nend\n");
        let errors = check_err("def f(x: i64)\n  for i: i64 in x\n    print(i)\n  end\nend\n");
        assert!(errors[0].to_string().contains("for-in requires a list"));
    }

    #[test]
    fn test_fn_pointer_binding() {
        check_ok(
            "def add(a: i64, b: i64) -> i64\n  return a + b\nend\n\ndef f() -> i64\n  op: Fn(i64, i64) -> i64 = add\n  return op(3, 4)\nend\n",
        );
        let errors = check_err(
            "def add(a: i64, b: i64) -> i64\n  return a + b\nend\n\ndef f()\n  op: Fn(i64) -> i64 = add\nend\n",
        );
        assert!(errors[0].to_string().contains("expected"));
    }

    #[test]
    fn test_checker_recovers_per_statement() {
        let outcome = run_check("def f()\n  x := bogus()\n  y: str = 1\nend\n");
        assert!(outcome.errors.len() >= 2, "errors: {:?}", outcome.errors.len());
    }
}
