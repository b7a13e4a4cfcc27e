//! Generic function monomorphization
//!
//! Generic templates are never emitted directly. At each call site the type
//! parameters are bound, from explicit `[T]` arguments or by unifying the
//! actual argument types against the declared parameter types, and each
//! distinct binding produces one concrete instantiation: a clone of the
//! template with every type parameter substituted, a mangled name derived
//! from the bound types' tags, and fresh node ids so its annotations do not
//! collide with the template's other instantiations. Instantiations are
//! queued and checked like ordinary functions, so an instantiated body can
//! trigger further instantiation.

use crate::ast::*;
use crate::typeck::error::{TypeError, TypeResult};
use crate::typeck::ty::Ty;
use crate::typeck::TypeChecker;
use std::collections::HashMap;

impl<'a> TypeChecker<'a> {
    pub(crate) fn check_generic_call(
        &mut self,
        e: &Expr,
        name: &str,
        args: &[Expr],
        type_args: &[TypeRef],
    ) -> TypeResult<Ty> {
        let gf = self.generic_funcs.get(name).cloned().expect("generic template exists");

        let mut arg_tys = Vec::new();
        for arg in args {
            arg_tys.push(self.check_expr(arg, None)?);
        }

        // Bind type parameters.
        let mut bindings: HashMap<String, Ty> = HashMap::new();
        if !type_args.is_empty() {
            if type_args.len() != gf.type_params.len() {
                return Err(TypeError::custom(
                    format!(
                        "'{}' takes {} type parameter(s), got {}",
                        name,
                        gf.type_params.len(),
                        type_args.len()
                    ),
                    e.span,
                ));
            }
            for (tp, tr) in gf.type_params.iter().zip(type_args) {
                bindings.insert(tp.clone(), self.resolve_type(tr)?);
            }
        } else {
            if gf.params.len() != args.len() {
                return Err(TypeError::arity_mismatch(name, gf.params.len(), args.len(), e.span));
            }
            for (p, at) in gf.params.iter().zip(&arg_tys) {
                unify(&p.ty.ty, at, &gf.type_params, &mut bindings);
            }
            for tp in &gf.type_params {
                if !bindings.contains_key(tp) {
                    return Err(TypeError::custom(
                        format!("cannot infer type parameter '{}' for generic function '{}'", tp, name),
                        e.span,
                    ));
                }
            }
        }

        // Substitute the binding into the declared signature.
        let sub: HashMap<String, TyExpr> =
            bindings.iter().map(|(k, v)| (k.clone(), ty_to_ty_expr(v))).collect();
        let mut param_tys = Vec::new();
        for p in &gf.params {
            let mut te = p.ty.ty.clone();
            subst_ty_expr(&mut te, &sub);
            param_tys.push(self.resolve_ty_expr(&te, p.span)?);
        }
        let ret_ty = {
            let mut te = gf.ret.ty.clone();
            subst_ty_expr(&mut te, &sub);
            self.resolve_ty_expr(&te, gf.ret.span)?
        };

        if param_tys.len() != args.len() {
            return Err(TypeError::arity_mismatch(name, param_tys.len(), args.len(), e.span));
        }
        for (i, (pt, at)) in param_tys.iter().zip(&arg_tys).enumerate() {
            if !self.assignable(at, pt) {
                return Err(TypeError::arg_mismatch(i + 1, name, pt.clone(), at.clone(), args[i].span));
            }
        }

        // Register the concrete instantiation once per binding.
        let bound: Vec<Ty> = gf.type_params.iter().map(|tp| bindings[tp].clone()).collect();
        let tags: Vec<String> = bound.iter().map(|t| t.tag()).collect();
        let mangled = format!("{}_{}", name, tags.join("_"));
        if !self.funcs.contains_key(&mangled) {
            let mut inst = gf.clone();
            inst.name = mangled.clone();
            inst.type_params.clear();
            for p in &mut inst.params {
                subst_ty_expr(&mut p.ty.ty, &sub);
            }
            subst_ty_expr(&mut inst.ret.ty, &sub);
            for st in &mut inst.body.stmts {
                subst_stmt(st, &sub);
            }
            refresh_func_ids(&mut inst, self.ids);
            self.funcs.insert(mangled, (param_tys, ret_ty.clone()));
            self.pending.push_back(inst);
        }

        self.call_args.insert(e.id, bound);
        Ok(ret_ty)
    }
}

/// Structural unification of a declared parameter type against an actual
/// argument type, binding type parameters where they occur. A conflicting
/// or failed match simply leaves the parameter unbound; the assignability
/// pass produces the user-facing error.
fn unify(te: &TyExpr, actual: &Ty, params: &[String], bindings: &mut HashMap<String, Ty>) {
    match (te, actual) {
        (TyExpr::Name(n), _) if params.iter().any(|p| p == n) => {
            bindings.entry(n.clone()).or_insert_with(|| actual.clone());
        }
        (TyExpr::List(inner), Ty::List(elem)) => unify(inner, elem, params, bindings),
        (TyExpr::Dict(k, v), Ty::Dict(ak, av)) => {
            unify(k, ak, params, bindings);
            unify(v, av, params, bindings);
        }
        (TyExpr::Tuple(ts), Ty::Tuple(ats)) => {
            for (t, at) in ts.iter().zip(ats) {
                unify(t, at, params, bindings);
            }
        }
        (TyExpr::Fn(ps, r), Ty::Fn(aps, ar)) => {
            for (p, ap) in ps.iter().zip(aps) {
                unify(p, ap, params, bindings);
            }
            unify(r, ar, params, bindings);
        }
        _ => {}
    }
}

/// Express a resolved type back as syntax, for substitution into a cloned
/// template.
fn ty_to_ty_expr(ty: &Ty) -> TyExpr {
    match ty {
        Ty::List(elem) => TyExpr::List(Box::new(ty_to_ty_expr(elem))),
        Ty::Dict(k, v) => TyExpr::Dict(Box::new(ty_to_ty_expr(k)), Box::new(ty_to_ty_expr(v))),
        Ty::Tuple(elems) => TyExpr::Tuple(elems.iter().map(ty_to_ty_expr).collect()),
        Ty::Fn(params, ret) => {
            TyExpr::Fn(params.iter().map(ty_to_ty_expr).collect(), Box::new(ty_to_ty_expr(ret)))
        }
        other => TyExpr::Name(other.to_string()),
    }
}

fn subst_ty_expr(te: &mut TyExpr, sub: &HashMap<String, TyExpr>) {
    match te {
        TyExpr::Name(n) => {
            if let Some(repl) = sub.get(n) {
                *te = repl.clone();
            }
        }
        TyExpr::List(t) => subst_ty_expr(t, sub),
        TyExpr::Dict(k, v) => {
            subst_ty_expr(k, sub);
            subst_ty_expr(v, sub);
        }
        TyExpr::Tuple(ts) => {
            for t in ts {
                subst_ty_expr(t, sub);
            }
        }
        TyExpr::Fn(ps, r) => {
            for p in ps {
                subst_ty_expr(p, sub);
            }
            subst_ty_expr(r, sub);
        }
    }
}

fn subst_stmt(st: &mut Stmt, sub: &HashMap<String, TyExpr>) {
    match &mut st.kind {
        StmtKind::VarDecl { ty, value, .. } => {
            if let Some(tr) = ty {
                subst_ty_expr(&mut tr.ty, sub);
            }
            subst_expr(value, sub);
        }
        StmtKind::Destructure { value, .. } => subst_expr(value, sub),
        StmtKind::Assign { value, .. } => subst_expr(value, sub),
        StmtKind::MemberAssign { obj, value, .. } => {
            subst_expr(obj, sub);
            subst_expr(value, sub);
        }
        StmtKind::IndexAssign { obj, index, value, .. } => {
            subst_expr(obj, sub);
            subst_expr(index, sub);
            subst_expr(value, sub);
        }
        StmtKind::Expr(e) => subst_expr(e, sub),
        StmtKind::Return(Some(e)) => subst_expr(e, sub),
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => {}
        StmtKind::If { arms } => {
            for arm in arms {
                if let Some(c) = &mut arm.cond {
                    subst_expr(c, sub);
                }
                for s in &mut arm.block.stmts {
                    subst_stmt(s, sub);
                }
            }
        }
        StmtKind::While { cond, body } => {
            subst_expr(cond, sub);
            for s in &mut body.stmts {
                subst_stmt(s, sub);
            }
        }
        StmtKind::For { var_ty, iterable, body, .. } => {
            subst_ty_expr(&mut var_ty.ty, sub);
            subst_expr(iterable, sub);
            for s in &mut body.stmts {
                subst_stmt(s, sub);
            }
        }
    }
}

fn subst_expr(e: &mut Expr, sub: &HashMap<String, TyExpr>) {
    match &mut e.kind {
        ExprKind::Unary { rhs, .. } => subst_expr(rhs, sub),
        ExprKind::Binary { lhs, rhs, .. } => {
            subst_expr(lhs, sub);
            subst_expr(rhs, sub);
        }
        ExprKind::Call { callee, args, type_args } => {
            subst_expr(callee, sub);
            for a in args {
                subst_expr(a, sub);
            }
            for t in type_args {
                subst_ty_expr(&mut t.ty, sub);
            }
        }
        ExprKind::Member { obj, .. } => subst_expr(obj, sub),
        ExprKind::Index { obj, index } => {
            subst_expr(obj, sub);
            subst_expr(index, sub);
        }
        ExprKind::Is { expr, target } => {
            subst_expr(expr, sub);
            if let Some(t) = target {
                subst_ty_expr(&mut t.ty, sub);
            }
        }
        ExprKind::As { expr, target } => {
            subst_expr(expr, sub);
            subst_ty_expr(&mut target.ty, sub);
        }
        ExprKind::Tuple(elems) => {
            for el in elems {
                subst_expr(el, sub);
            }
        }
        ExprKind::ListLit { elem_ty, elems } => {
            subst_ty_expr(&mut elem_ty.ty, sub);
            for el in elems {
                subst_expr(el, sub);
            }
        }
        ExprKind::DictLit { key_ty, val_ty, entries } => {
            subst_ty_expr(&mut key_ty.ty, sub);
            subst_ty_expr(&mut val_ty.ty, sub);
            for (k, v) in entries {
                subst_expr(k, sub);
                subst_expr(v, sub);
            }
        }
        _ => {}
    }
}

/// Give a cloned instantiation fresh node ids so its type annotations are
/// distinct from every other instantiation of the same template.
fn refresh_func_ids(f: &mut FuncDecl, ids: &mut IdGen) {
    for st in &mut f.body.stmts {
        refresh_stmt_ids(st, ids);
    }
}

fn refresh_stmt_ids(st: &mut Stmt, ids: &mut IdGen) {
    st.id = ids.next();
    match &mut st.kind {
        StmtKind::VarDecl { value, .. } => refresh_expr_ids(value, ids),
        StmtKind::Destructure { value, .. } => refresh_expr_ids(value, ids),
        StmtKind::Assign { value, .. } => refresh_expr_ids(value, ids),
        StmtKind::MemberAssign { obj, value, .. } => {
            refresh_expr_ids(obj, ids);
            refresh_expr_ids(value, ids);
        }
        StmtKind::IndexAssign { obj, index, value, .. } => {
            refresh_expr_ids(obj, ids);
            refresh_expr_ids(index, ids);
            refresh_expr_ids(value, ids);
        }
        StmtKind::Expr(e) => refresh_expr_ids(e, ids),
        StmtKind::Return(Some(e)) => refresh_expr_ids(e, ids),
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => {}
        StmtKind::If { arms } => {
            for arm in arms {
                if let Some(c) = &mut arm.cond {
                    refresh_expr_ids(c, ids);
                }
                for s in &mut arm.block.stmts {
                    refresh_stmt_ids(s, ids);
                }
            }
        }
        StmtKind::While { cond, body } => {
            refresh_expr_ids(cond, ids);
            for s in &mut body.stmts {
                refresh_stmt_ids(s, ids);
            }
        }
        StmtKind::For { iterable, body, .. } => {
            refresh_expr_ids(iterable, ids);
            for s in &mut body.stmts {
                refresh_stmt_ids(s, ids);
            }
        }
    }
}

fn refresh_expr_ids(e: &mut Expr, ids: &mut IdGen) {
    e.id = ids.next();
    match &mut e.kind {
        ExprKind::Unary { rhs, .. } => refresh_expr_ids(rhs, ids),
        ExprKind::Binary { lhs, rhs, .. } => {
            refresh_expr_ids(lhs, ids);
            refresh_expr_ids(rhs, ids);
        }
        ExprKind::Call { callee, args, .. } => {
            refresh_expr_ids(callee, ids);
            for a in args {
                refresh_expr_ids(a, ids);
            }
        }
        ExprKind::Member { obj, .. } => refresh_expr_ids(obj, ids),
        ExprKind::Index { obj, index } => {
            refresh_expr_ids(obj, ids);
            refresh_expr_ids(index, ids);
        }
        ExprKind::Is { expr, .. } => refresh_expr_ids(expr, ids),
        ExprKind::As { expr, .. } => refresh_expr_ids(expr, ids),
        ExprKind::Tuple(elems) => {
            for el in elems {
                refresh_expr_ids(el, ids);
            }
        }
        ExprKind::ListLit { elems, .. } => {
            for el in elems {
                refresh_expr_ids(el, ids);
            }
        }
        ExprKind::DictLit { entries, .. } => {
            for (k, v) in entries {
                refresh_expr_ids(k, ids);
                refresh_expr_ids(v, ids);
            }
        }
        _ => {}
    }
}
