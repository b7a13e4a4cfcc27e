//! Statement and expression checking
//!
//! Literal adaptation happens here: an integer or char literal takes the
//! declared integer width of its context exactly once, otherwise it
//! defaults to i64 (floats to f64). Everything else is exact-match typing;
//! mixing widths requires an explicit cast like `i32(x)`.

use crate::ast::*;
use crate::span::Span;
use crate::typeck::error::{TypeError, TypeErrorKind, TypeResult};
use crate::typeck::ty::Ty;
use crate::typeck::TypeChecker;

const CAST_NAMES: [&str; 10] = ["i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64", "f32", "f64"];
const LIST_OPS: [&str; 5] = ["append", "get", "set", "pop", "remove"];
const DICT_OPS: [&str; 3] = ["put", "lookup", "has"];

impl<'a> TypeChecker<'a> {
    pub(crate) fn check_stmt(&mut self, st: &Stmt) -> TypeResult<()> {
        match &st.kind {
            StmtKind::VarDecl { name, ty, value, is_const, is_static } => {
                let declared = match ty {
                    Some(tr) => Some(self.resolve_type(tr)?),
                    None => None,
                };
                let val_ty = self.check_expr(value, declared.as_ref())?;
                let final_ty = match declared {
                    None => {
                        if val_ty == Ty::None {
                            return Err(TypeError::custom(
                                "cannot infer type from 'None' in := declaration",
                                st.span,
                            ));
                        }
                        if val_ty == Ty::Void {
                            return Err(TypeError::custom(
                                "cannot infer type from void expression in := declaration",
                                st.span,
                            ));
                        }
                        val_ty
                    }
                    Some(decl_ty) => {
                        if !self.assignable(&val_ty, &decl_ty) {
                            return Err(TypeError::assign_mismatch(
                                name.clone(),
                                decl_ty,
                                val_ty,
                                st.span,
                            ));
                        }
                        decl_ty
                    }
                };
                if *is_static && self.cur_ret.is_none() {
                    return Err(TypeError::custom(
                        "'static' variables are only allowed inside functions",
                        st.span,
                    ));
                }
                self.decl_tys.insert(st.id, final_ty.clone());
                self.declare(name, final_ty, st.span, *is_const)
            }

            StmtKind::Destructure { names, value } => {
                let val_ty = self.check_expr(value, None)?;
                let elems = match &val_ty {
                    Ty::Tuple(elems) => elems.clone(),
                    other => {
                        return Err(TypeError::custom(
                            format!("cannot destructure non-tuple type '{}'", other),
                            st.span,
                        ));
                    }
                };
                if elems.len() != names.len() {
                    return Err(TypeError::custom(
                        format!("tuple has {} elements, but {} names given", elems.len(), names.len()),
                        st.span,
                    ));
                }
                self.decl_tys.insert(st.id, val_ty);
                for (name, ety) in names.iter().zip(elems) {
                    self.declare(name, ety, st.span, false)?;
                }
                Ok(())
            }

            StmtKind::Assign { name, op, value } => {
                let vi = self.lookup(name, st.span)?;
                if vi.is_const {
                    return Err(TypeError::new(
                        TypeErrorKind::ConstAssign { name: name.clone() },
                        st.span,
                    ));
                }
                let rhs_ty = self.check_expr(value, Some(&vi.ty))?;
                self.check_assign_op(*op, name, &vi.ty, &rhs_ty, st.span)
            }

            StmtKind::MemberAssign { obj, member, op, value } => {
                let obj_ty = self.check_expr(obj, None)?;
                let field_ty = match &obj_ty {
                    Ty::Iface(name) => {
                        return Err(TypeError::custom(
                            format!("cannot assign fields on interface type '{}'", name),
                            st.span,
                        ));
                    }
                    Ty::Struct(name) => self
                        .structs
                        .get(name)
                        .and_then(|si| si.field_ty(member))
                        .cloned()
                        .ok_or_else(|| {
                            TypeError::custom(
                                format!("struct '{}' has no field '{}'", name, member),
                                st.span,
                            )
                        })?,
                    Ty::Class(name) => self
                        .classes
                        .get(name)
                        .and_then(|ci| ci.field_ty(member))
                        .cloned()
                        .ok_or_else(|| {
                            TypeError::custom(
                                format!("class '{}' has no field '{}'", name, member),
                                st.span,
                            )
                        })?,
                    other => {
                        return Err(TypeError::custom(
                            format!("member assignment on non-class type '{}'", other),
                            st.span,
                        ));
                    }
                };
                let rhs_ty = self.check_expr(value, Some(&field_ty))?;
                self.check_assign_op(*op, member, &field_ty, &rhs_ty, st.span)
            }

            StmtKind::IndexAssign { obj, index, op, value } => {
                let obj_ty = self.check_expr(obj, None)?;
                match &obj_ty {
                    Ty::List(elem) => {
                        let idx_ty = self.check_expr(index, Some(&Ty::I64))?;
                        if idx_ty != Ty::I64 {
                            return Err(TypeError::custom(
                                format!("list index must be i64, got {}", idx_ty),
                                st.span,
                            ));
                        }
                        if *op != AssignOp::Assign {
                            return Err(TypeError::custom(
                                "only '=' assignment supported for list subscript",
                                st.span,
                            ));
                        }
                        let rhs_ty = self.check_expr(value, Some(elem))?;
                        if !self.assignable(&rhs_ty, elem) {
                            return Err(TypeError::custom(
                                format!("cannot assign {} to list element of type {}", rhs_ty, elem),
                                st.span,
                            ));
                        }
                        Ok(())
                    }
                    Ty::Dict(key, val) => {
                        let idx_ty = self.check_expr(index, Some(key))?;
                        if idx_ty != **key {
                            return Err(TypeError::custom(
                                format!("dict key must be {}, got {}", key, idx_ty),
                                st.span,
                            ));
                        }
                        if *op != AssignOp::Assign {
                            return Err(TypeError::custom(
                                "only '=' assignment supported for dict subscript",
                                st.span,
                            ));
                        }
                        let rhs_ty = self.check_expr(value, Some(val))?;
                        if !self.assignable(&rhs_ty, val) {
                            return Err(TypeError::custom(
                                format!("cannot assign {} to dict value of type {}", rhs_ty, val),
                                st.span,
                            ));
                        }
                        Ok(())
                    }
                    other => Err(TypeError::custom(
                        format!("type '{}' does not support subscript assignment []", other),
                        st.span,
                    )),
                }
            }

            StmtKind::Expr(e) => {
                self.check_expr(e, None)?;
                Ok(())
            }

            StmtKind::Return(value) => {
                let ret = match &self.cur_ret {
                    Some(r) => r.clone(),
                    None => {
                        return Err(TypeError::custom("return not allowed at top level", st.span));
                    }
                };
                match value {
                    None => {
                        if ret != Ty::Void {
                            return Err(TypeError::custom(
                                format!("return requires a value of type {}", ret),
                                st.span,
                            ));
                        }
                        Ok(())
                    }
                    Some(v) => {
                        if ret == Ty::Void {
                            return Err(TypeError::custom(
                                "void function must not return a value",
                                st.span,
                            ));
                        }
                        let vty = self.check_expr(v, Some(&ret))?;
                        if !self.assignable(&vty, &ret) {
                            return Err(TypeError::new(
                                TypeErrorKind::ReturnMismatch { expected: ret, found: vty },
                                st.span,
                            ));
                        }
                        Ok(())
                    }
                }
            }

            StmtKind::Break => {
                if self.loop_depth == 0 {
                    return Err(TypeError::custom("break not inside loop", st.span));
                }
                Ok(())
            }
            StmtKind::Continue => {
                if self.loop_depth == 0 {
                    return Err(TypeError::custom("continue not inside loop", st.span));
                }
                Ok(())
            }

            StmtKind::While { cond, body } => {
                let cty = self.check_expr(cond, None)?;
                if !cty.is_truthy() {
                    return Err(TypeError::truthiness("while condition", cty, st.span));
                }
                self.loop_depth += 1;
                self.push_scope();
                self.check_block(body);
                self.pop_scope();
                self.loop_depth -= 1;
                Ok(())
            }

            StmtKind::For { var, var_ty, iterable, body } => {
                let declared = self.resolve_type(var_ty)?;
                let iter_ty = self.check_expr(iterable, None)?;
                let elem_ty = match &iter_ty {
                    Ty::List(elem) => (**elem).clone(),
                    other => {
                        return Err(TypeError::custom(
                            format!("for-in requires a list type, got {}", other),
                            st.span,
                        ));
                    }
                };
                if declared != elem_ty {
                    return Err(TypeError::custom(
                        format!(
                            "loop variable type '{}' does not match list element type '{}'",
                            declared, elem_ty
                        ),
                        st.span,
                    ));
                }
                self.decl_tys.insert(st.id, elem_ty.clone());
                self.loop_depth += 1;
                self.push_scope();
                if let Err(e) = self.declare(var, elem_ty, st.span, false) {
                    self.errors.push(e);
                }
                self.check_block(body);
                self.pop_scope();
                self.loop_depth -= 1;
                Ok(())
            }

            StmtKind::If { arms } => {
                for arm in arms {
                    if let Some(cond) = &arm.cond {
                        let cty = self.check_expr(cond, None)?;
                        if !cty.is_truthy() {
                            return Err(TypeError::truthiness("if/elif condition", cty, arm.span));
                        }
                    }
                    self.push_scope();
                    self.check_block(&arm.block);
                    self.pop_scope();
                }
                Ok(())
            }
        }
    }

    fn check_assign_op(
        &mut self,
        op: AssignOp,
        name: &str,
        lhs_ty: &Ty,
        rhs_ty: &Ty,
        span: Span,
    ) -> TypeResult<()> {
        match op {
            AssignOp::Assign => {
                if !self.assignable(rhs_ty, lhs_ty) {
                    return Err(TypeError::assign_mismatch(
                        name,
                        lhs_ty.clone(),
                        rhs_ty.clone(),
                        span,
                    ));
                }
                Ok(())
            }
            _ if op.is_arith() => {
                // str += str is allowed (concatenation)
                if op == AssignOp::Add && *lhs_ty == Ty::Str {
                    if *rhs_ty != Ty::Str {
                        return Err(TypeError::custom(
                            format!("cannot apply '+=' with str and {}", rhs_ty),
                            span,
                        ));
                    }
                    return Ok(());
                }
                if !lhs_ty.is_numeric() {
                    return Err(TypeError::custom(
                        format!(
                            "compound assignment '{}' only allowed on numeric types, got {}",
                            op.symbol(),
                            lhs_ty
                        ),
                        span,
                    ));
                }
                if rhs_ty != lhs_ty {
                    return Err(TypeError::custom(
                        format!("cannot apply '{}' with {} and {}", op.symbol(), lhs_ty, rhs_ty),
                        span,
                    ));
                }
                Ok(())
            }
            _ => {
                if !lhs_ty.is_int() {
                    return Err(TypeError::custom(
                        format!(
                            "compound assignment '{}' only allowed on integer types, got {}",
                            op.symbol(),
                            lhs_ty
                        ),
                        span,
                    ));
                }
                if rhs_ty != lhs_ty {
                    return Err(TypeError::custom(
                        format!("cannot apply '{}' with {} and {}", op.symbol(), lhs_ty, rhs_ty),
                        span,
                    ));
                }
                Ok(())
            }
        }
    }

    // -------------------------
    // Expressions
    // -------------------------

    fn record(&mut self, e: &Expr, ty: Ty) -> Ty {
        self.expr_tys.insert(e.id, ty.clone());
        ty
    }

    pub(crate) fn check_expr(&mut self, e: &Expr, target: Option<&Ty>) -> TypeResult<Ty> {
        match &e.kind {
            ExprKind::Int { .. } | ExprKind::Char(_) => {
                let ty = match target {
                    Some(t) if t.is_int() => t.clone(),
                    _ => Ty::I64,
                };
                Ok(self.record(e, ty))
            }
            ExprKind::Float(_) => {
                let ty = match target {
                    Some(t) if t.is_float() => t.clone(),
                    _ => Ty::F64,
                };
                Ok(self.record(e, ty))
            }
            ExprKind::Bool(_) => Ok(self.record(e, Ty::Bool)),
            ExprKind::Str(_) => Ok(self.record(e, Ty::Str)),
            ExprKind::None => Ok(self.record(e, Ty::None)),

            ExprKind::Var(name) => {
                // A bare function name in a function-pointer context.
                if let Some(Ty::Fn(want_params, want_ret)) = target {
                    if let Some((param_tys, ret_ty)) = self.funcs.get(name) {
                        let fn_ty = Ty::Fn(param_tys.clone(), Box::new(ret_ty.clone()));
                        let want = Ty::Fn(want_params.clone(), want_ret.clone());
                        if fn_ty != want {
                            return Err(TypeError::custom(
                                format!("function '{}' has type {}, expected {}", name, fn_ty, want),
                                e.span,
                            ));
                        }
                        return Ok(self.record(e, fn_ty));
                    }
                }
                let vi = self.lookup(name, e.span)?;
                Ok(self.record(e, vi.ty))
            }

            ExprKind::Unary { op, rhs } => {
                let rhs_ty = self.check_expr(rhs, target)?;
                let ty = match op {
                    UnaryOp::Neg => {
                        if !rhs_ty.resolve_enum().is_numeric() {
                            return Err(TypeError::custom(
                                format!("unary '-' requires numeric, got {}", rhs_ty),
                                e.span,
                            ));
                        }
                        rhs_ty
                    }
                    UnaryOp::Not => {
                        if !rhs_ty.is_truthy() {
                            return Err(TypeError::truthiness("'not' operand", rhs_ty, e.span));
                        }
                        Ty::Bool
                    }
                    UnaryOp::BitNot => {
                        if !rhs_ty.resolve_enum().is_int() {
                            return Err(TypeError::custom(
                                format!("unary '~' requires integer, got {}", rhs_ty),
                                e.span,
                            ));
                        }
                        rhs_ty
                    }
                };
                Ok(self.record(e, ty))
            }

            ExprKind::Is { expr, target: is_target } => {
                self.check_expr(expr, None)?;
                if let Some(tr) = is_target {
                    self.resolve_type(tr)?;
                }
                Ok(self.record(e, Ty::Bool))
            }

            ExprKind::As { expr, target: as_target } => {
                let lhs_ty = self.check_expr(expr, None)?;
                let target_ty = self.resolve_type(as_target)?;
                let iface = match &lhs_ty {
                    Ty::Iface(i) => i.clone(),
                    other => {
                        return Err(TypeError::custom(
                            format!("'as' requires an interface type on the left, got '{}'", other),
                            e.span,
                        ));
                    }
                };
                let class = match &target_ty {
                    Ty::Class(c) => c.clone(),
                    other => {
                        return Err(TypeError::custom(
                            format!("'as' target must be a class type, got '{}'", other),
                            e.span,
                        ));
                    }
                };
                let implements = self
                    .classes
                    .get(&class)
                    .map(|ci| ci.implements.iter().any(|i| *i == iface))
                    .unwrap_or(false);
                if !implements {
                    return Err(TypeError::custom(
                        format!("class '{}' does not implement interface '{}'", class, iface),
                        e.span,
                    ));
                }
                Ok(self.record(e, target_ty))
            }

            ExprKind::Binary { op, lhs, rhs } => {
                let ty = self.check_binary(e.span, *op, lhs, rhs)?;
                Ok(self.record(e, ty))
            }

            ExprKind::Call { .. } => {
                let ty = self.check_call(e)?;
                Ok(self.record(e, ty))
            }

            ExprKind::Member { obj, member } => {
                // Enum variant access: EnumName.VARIANT
                if let ExprKind::Var(name) = &obj.kind {
                    if let Some(variants) = self.enums.get(name) {
                        if !variants.contains_key(member) {
                            return Err(TypeError::custom(
                                format!("enum '{}' has no variant '{}'", name, member),
                                e.span,
                            ));
                        }
                        return Ok(self.record(e, Ty::Enum(name.clone())));
                    }
                }
                let obj_ty = self.check_expr(obj, None)?;
                let field_ty = match &obj_ty {
                    Ty::Iface(name) => {
                        return Err(TypeError::custom(
                            format!("cannot access fields on interface type '{}'", name),
                            e.span,
                        ));
                    }
                    Ty::Struct(name) => {
                        self.structs.get(name).and_then(|si| si.field_ty(member)).cloned().ok_or_else(
                            || {
                                TypeError::custom(
                                    format!("struct '{}' has no field '{}'", name, member),
                                    e.span,
                                )
                            },
                        )?
                    }
                    Ty::Class(name) => {
                        self.classes.get(name).and_then(|ci| ci.field_ty(member)).cloned().ok_or_else(
                            || {
                                TypeError::custom(
                                    format!("class '{}' has no field '{}'", name, member),
                                    e.span,
                                )
                            },
                        )?
                    }
                    other => {
                        return Err(TypeError::custom(
                            format!("member access on non-class type '{}'", other),
                            e.span,
                        ));
                    }
                };
                Ok(self.record(e, field_ty))
            }

            ExprKind::Index { obj, index } => {
                let obj_ty = self.check_expr(obj, None)?;
                let ty = match &obj_ty {
                    Ty::List(elem) => {
                        let idx_ty = self.check_expr(index, Some(&Ty::I64))?;
                        if idx_ty != Ty::I64 {
                            return Err(TypeError::custom(
                                format!("list index must be i64, got {}", idx_ty),
                                e.span,
                            ));
                        }
                        (**elem).clone()
                    }
                    Ty::Dict(key, val) => {
                        let idx_ty = self.check_expr(index, Some(key))?;
                        if idx_ty != **key {
                            return Err(TypeError::custom(
                                format!("dict key must be {}, got {}", key, idx_ty),
                                e.span,
                            ));
                        }
                        (**val).clone()
                    }
                    Ty::Str => {
                        let idx_ty = self.check_expr(index, Some(&Ty::I64))?;
                        if idx_ty != Ty::I64 {
                            return Err(TypeError::custom(
                                format!("string index must be i64, got {}", idx_ty),
                                e.span,
                            ));
                        }
                        Ty::I64
                    }
                    other => {
                        return Err(TypeError::custom(
                            format!("type '{}' does not support subscript []", other),
                            e.span,
                        ));
                    }
                };
                Ok(self.record(e, ty))
            }

            ExprKind::Tuple(elems) => {
                let target_elems = match target {
                    Some(Ty::Tuple(tys)) => {
                        if tys.len() != elems.len() {
                            return Err(TypeError::custom(
                                format!(
                                    "tuple has {} elements, target type expects {}",
                                    elems.len(),
                                    tys.len()
                                ),
                                e.span,
                            ));
                        }
                        Some(tys.clone())
                    }
                    _ => None,
                };
                let mut elem_tys = Vec::new();
                for (i, elem) in elems.iter().enumerate() {
                    let elem_target = target_elems.as_ref().map(|t| &t[i]);
                    let ety = self.check_expr(elem, elem_target)?;
                    if let Some(want) = elem_target {
                        if !self.assignable(&ety, want) {
                            return Err(TypeError::custom(
                                format!("tuple element {} has type {}, expected {}", i, ety, want),
                                elem.span,
                            ));
                        }
                        elem_tys.push(want.clone());
                    } else {
                        elem_tys.push(ety);
                    }
                }
                Ok(self.record(e, Ty::Tuple(elem_tys)))
            }

            ExprKind::ListLit { elem_ty, elems } => {
                let tp = self.resolve_type(elem_ty)?;
                for (i, elem) in elems.iter().enumerate() {
                    let ety = self.check_expr(elem, Some(&tp))?;
                    if !self.assignable(&ety, &tp) {
                        return Err(TypeError::custom(
                            format!("list literal element {} has type {}, expected {}", i + 1, ety, tp),
                            elem.span,
                        ));
                    }
                }
                Ok(self.record(e, Ty::List(Box::new(tp))))
            }

            ExprKind::DictLit { key_ty, val_ty, entries } => {
                let ktp = self.resolve_type(key_ty)?;
                if !ktp.is_dict_key() {
                    return Err(TypeError::new(
                        TypeErrorKind::BadDictKey { found: ktp },
                        key_ty.span,
                    ));
                }
                let vtp = self.resolve_type(val_ty)?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    let kty = self.check_expr(k, Some(&ktp))?;
                    if kty != ktp {
                        return Err(TypeError::custom(
                            format!("dict literal key {} must be {}, got {}", i + 1, ktp, kty),
                            k.span,
                        ));
                    }
                    let vty = self.check_expr(v, Some(&vtp))?;
                    if !self.assignable(&vty, &vtp) {
                        return Err(TypeError::custom(
                            format!("dict literal value {} has type {}, expected {}", i + 1, vty, vtp),
                            v.span,
                        ));
                    }
                }
                Ok(self.record(e, Ty::Dict(Box::new(ktp), Box::new(vtp))))
            }
        }
    }

    fn check_binary(&mut self, span: Span, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> TypeResult<Ty> {
        let mut a = self.check_expr(lhs, None)?;
        // Let integer/float literals adapt to the other operand's type.
        let rhs_is_int_lit = matches!(rhs.kind, ExprKind::Int { .. } | ExprKind::Char(_));
        let rhs_is_float_lit = matches!(rhs.kind, ExprKind::Float(_));
        let b = if a.is_int() && rhs_is_int_lit {
            self.check_expr(rhs, Some(&a))?
        } else if a.is_float() && rhs_is_float_lit {
            self.check_expr(rhs, Some(&a))?
        } else {
            self.check_expr(rhs, None)?
        };
        // Symmetric: the LHS literal adapts when the RHS resolved first.
        let lhs_is_int_lit = matches!(lhs.kind, ExprKind::Int { .. } | ExprKind::Char(_));
        let lhs_is_float_lit = matches!(lhs.kind, ExprKind::Float(_));
        if b.is_int() && a == Ty::I64 && lhs_is_int_lit && b != Ty::I64 {
            a = self.check_expr(lhs, Some(&b))?;
        } else if b.is_float() && a == Ty::F64 && lhs_is_float_lit && b != Ty::F64 {
            a = self.check_expr(lhs, Some(&b))?;
        }

        let ra = a.resolve_enum();
        let rb = b.resolve_enum();

        if op.is_arith() {
            if op == BinaryOp::Add && a == Ty::Str && b == Ty::Str {
                return Ok(Ty::Str);
            }
            if !ra.is_numeric() || !rb.is_numeric() {
                return Err(TypeError::new(
                    TypeErrorKind::BinaryMismatch {
                        op: op.symbol(),
                        requirement: "numeric operands",
                        left: a,
                        right: b,
                    },
                    span,
                ));
            }
            if ra != rb {
                return Err(TypeError::new(
                    TypeErrorKind::BinaryMismatch {
                        op: op.symbol(),
                        requirement: "operands of the same numeric type",
                        left: a,
                        right: b,
                    },
                    span,
                ));
            }
            return Ok(a);
        }

        if op.is_bitwise() {
            if !ra.is_int() || !rb.is_int() || ra != rb {
                return Err(TypeError::new(
                    TypeErrorKind::BinaryMismatch {
                        op: op.symbol(),
                        requirement: "integer operands of the same type",
                        left: a,
                        right: b,
                    },
                    span,
                ));
            }
            return Ok(a);
        }

        if op.is_ordering() {
            if !ra.is_numeric() || !rb.is_numeric() || ra != rb {
                return Err(TypeError::new(
                    TypeErrorKind::BinaryMismatch {
                        op: op.symbol(),
                        requirement: "numeric operands of the same type",
                        left: a,
                        right: b,
                    },
                    span,
                ));
            }
            return Ok(Ty::Bool);
        }

        if op.is_equality() {
            if a == Ty::None && b.is_ref_kind() {
                return Ok(Ty::Bool);
            }
            if b == Ty::None && a.is_ref_kind() {
                return Ok(Ty::Bool);
            }
            if ra != rb {
                return Err(TypeError::new(
                    TypeErrorKind::BinaryMismatch {
                        op: op.symbol(),
                        requirement: "operands of the same type",
                        left: a,
                        right: b,
                    },
                    span,
                ));
            }
            return Ok(Ty::Bool);
        }

        // and / or
        if !a.is_truthy() {
            return Err(TypeError::truthiness("operand of 'and'/'or'", a, span));
        }
        if !b.is_truthy() {
            return Err(TypeError::truthiness("operand of 'and'/'or'", b, span));
        }
        Ok(Ty::Bool)
    }

    // -------------------------
    // Calls
    // -------------------------

    fn check_call(&mut self, e: &Expr) -> TypeResult<Ty> {
        let (callee, args, type_args) = match &e.kind {
            ExprKind::Call { callee, args, type_args } => (callee, args, type_args),
            _ => unreachable!(),
        };

        // Method call: obj.method(args)
        if let ExprKind::Member { obj, member } = &callee.kind {
            // Enum variant access is never callable.
            let is_enum_access = matches!(&obj.kind, ExprKind::Var(n) if self.enums.contains_key(n));
            if !is_enum_access {
                let obj_ty = self.check_expr(obj, None)?;
                let sig = match &obj_ty {
                    Ty::Iface(name) => self.interfaces.get(name).and_then(|i| i.methods.get(member)).cloned(),
                    Ty::Struct(name) => self.structs.get(name).and_then(|s| s.methods.get(member)).cloned(),
                    Ty::Class(name) => self.classes.get(name).and_then(|c| c.methods.get(member)).cloned(),
                    other => {
                        return Err(TypeError::custom(
                            format!("method call on non-class type '{}'", other),
                            e.span,
                        ));
                    }
                };
                let (param_tys, ret_ty) = sig.ok_or_else(|| {
                    TypeError::custom(format!("'{}' has no method '{}'", obj_ty, member), e.span)
                })?;
                self.check_args(member, &param_tys, args, e.span)?;
                return Ok(ret_ty);
            }
        }

        // Expression-based function pointer call: ops[0](3, 4)
        let name = match &callee.kind {
            ExprKind::Var(name) => name.clone(),
            _ => {
                let callee_ty = self.check_expr(callee, None)?;
                if let Ty::Fn(param_tys, ret_ty) = callee_ty {
                    self.check_args("function pointer", &param_tys, args, e.span)?;
                    return Ok(*ret_ty);
                }
                return Err(TypeError::custom("callee must be identifier", e.span));
            }
        };

        // A variable holding a function pointer shadows nothing below.
        let is_known_callee = self.funcs.contains_key(&name)
            || self.generic_funcs.contains_key(&name)
            || self.classes.contains_key(&name)
            || self.structs.contains_key(&name)
            || self.interfaces.contains_key(&name)
            || CAST_NAMES.contains(&name.as_str())
            || matches!(name.as_str(), "print" | "format" | "range" | "keys" | "len")
            || matches!(name.as_str(), "List" | "Dict")
            || LIST_OPS.contains(&name.as_str())
            || DICT_OPS.contains(&name.as_str());
        if !is_known_callee {
            if let Ok(vi) = self.lookup(&name, e.span) {
                if let Ty::Fn(param_tys, ret_ty) = vi.ty {
                    self.check_args(&name, &param_tys, args, e.span)?;
                    // Annotate the callee so the emitter can route the call.
                    self.expr_tys.insert(callee.id, Ty::Fn(param_tys, ret_ty.clone()));
                    return Ok(*ret_ty);
                }
            }
        }

        // Type cast builtins: i8(x) ... f64(x)
        if CAST_NAMES.contains(&name.as_str()) {
            if args.len() != 1 {
                return Err(TypeError::arity_mismatch(&name, 1, args.len(), e.span));
            }
            let aty = self.check_expr(&args[0], None)?;
            if !aty.resolve_enum().is_numeric() {
                return Err(TypeError::custom(
                    format!("{}() requires a numeric argument, got {}", name, aty),
                    e.span,
                ));
            }
            return Ok(Ty::from_prim_name(&name).expect("cast name is primitive"));
        }

        // print is overloaded by argument type
        if name == "print" {
            if args.len() != 1 {
                return Err(TypeError::arity_mismatch("print", 1, args.len(), e.span));
            }
            let aty = self.check_expr(&args[0], None)?;
            let r = aty.resolve_enum();
            if !r.is_numeric() && r != Ty::Bool && r != Ty::Str {
                return Err(TypeError::custom(
                    format!("print() does not support type {}", aty),
                    e.span,
                ));
            }
            return Ok(Ty::Void);
        }

        // format(): variadic string formatting
        if name == "format" {
            if args.is_empty() {
                return Err(TypeError::custom(
                    "format() expects at least 1 argument (the format string)",
                    e.span,
                ));
            }
            let fmt_ty = self.check_expr(&args[0], None)?;
            if fmt_ty != Ty::Str {
                return Err(TypeError::custom(
                    format!("format() first argument must be str, got {}", fmt_ty),
                    args[0].span,
                ));
            }
            for (i, arg) in args.iter().enumerate().skip(1) {
                let aty = self.check_expr(arg, None)?;
                let r = aty.resolve_enum();
                if !r.is_numeric() && r != Ty::Bool && r != Ty::Str {
                    return Err(TypeError::custom(
                        format!("format() argument {} has unsupported type {}", i + 1, aty),
                        arg.span,
                    ));
                }
            }
            return Ok(Ty::Str);
        }

        // range(start?, end, step?) -> List[i64]
        if name == "range" {
            if args.is_empty() || args.len() > 3 {
                return Err(TypeError::custom(
                    format!("range() expects 1-3 arguments, got {}", args.len()),
                    e.span,
                ));
            }
            for (i, arg) in args.iter().enumerate() {
                let aty = self.check_expr(arg, None)?;
                if aty != Ty::I64 {
                    return Err(TypeError::arg_mismatch(i + 1, "range", Ty::I64, aty, arg.span));
                }
            }
            return Ok(Ty::List(Box::new(Ty::I64)));
        }

        // keys(dict) -> List[K]
        if name == "keys" {
            if args.len() != 1 {
                return Err(TypeError::arity_mismatch("keys", 1, args.len(), e.span));
            }
            let aty = self.check_expr(&args[0], None)?;
            match aty {
                Ty::Dict(k, _) => return Ok(Ty::List(k)),
                other => {
                    return Err(TypeError::custom(
                        format!("keys() requires a dict type, got {}", other),
                        e.span,
                    ));
                }
            }
        }

        // len(list|dict|str) -> i64
        if name == "len" {
            if args.len() != 1 {
                return Err(TypeError::arity_mismatch("len", 1, args.len(), e.span));
            }
            let aty = self.check_expr(&args[0], None)?;
            if matches!(aty, Ty::List(_) | Ty::Dict(_, _) | Ty::Str) {
                return Ok(Ty::I64);
            }
            return Err(TypeError::custom(format!("len() does not support type {}", aty), e.span));
        }

        // Generic container operations
        let is_list_op = name == "List" || LIST_OPS.contains(&name.as_str());
        let is_dict_op = name == "Dict" || DICT_OPS.contains(&name.as_str());
        if is_list_op || is_dict_op {
            return self.check_container_op(e, &name, args, type_args, is_dict_op);
        }

        // Interfaces cannot be constructed
        if self.interfaces.contains_key(&name) {
            return Err(TypeError::custom(
                format!("cannot construct interface '{}' (only classes can be instantiated)", name),
                e.span,
            ));
        }

        // Constructor call: ClassName(args)
        if let Some(info) = self.classes.get(&name) {
            let init_params = info.init_params.clone();
            self.check_args(&name, &init_params, args, e.span)?;
            return Ok(Ty::Class(name));
        }

        // Struct construction: StructName(field1, field2, ...)
        if let Some(info) = self.structs.get(&name) {
            let fields = info.fields.clone();
            if fields.len() != args.len() {
                return Err(TypeError::custom(
                    format!("struct '{}' has {} fields, got {} arguments", name, fields.len(), args.len()),
                    e.span,
                ));
            }
            for ((fname, fty), arg) in fields.iter().zip(args) {
                let aty = self.check_expr(arg, Some(fty))?;
                if !self.assignable(&aty, fty) {
                    return Err(TypeError::custom(
                        format!("field '{}' of struct '{}' expected {}, got {}", fname, name, fty, aty),
                        arg.span,
                    ));
                }
            }
            return Ok(Ty::Struct(name));
        }

        // User-defined generic function
        if self.generic_funcs.contains_key(&name) {
            return self.check_generic_call(e, &name, args, type_args);
        }

        // Plain user function
        let (param_tys, ret_ty) = self
            .funcs
            .get(&name)
            .cloned()
            .ok_or_else(|| TypeError::unknown_function(&name, e.span))?;
        self.check_args(&name, &param_tys, args, e.span)?;
        Ok(ret_ty)
    }

    fn check_args(
        &mut self,
        callee: &str,
        param_tys: &[Ty],
        args: &[Expr],
        span: Span,
    ) -> TypeResult<()> {
        if param_tys.len() != args.len() {
            return Err(TypeError::arity_mismatch(callee, param_tys.len(), args.len(), span));
        }
        for (i, (pt, arg)) in param_tys.iter().zip(args).enumerate() {
            let at = self.check_expr(arg, Some(pt))?;
            if !self.assignable(&at, pt) {
                return Err(TypeError::arg_mismatch(i + 1, callee, pt.clone(), at, arg.span));
            }
        }
        Ok(())
    }

    /// Container ops take `[T]` / `[K,V]` explicitly or infer the binding
    /// from their first argument.
    fn check_container_op(
        &mut self,
        e: &Expr,
        name: &str,
        args: &[Expr],
        type_args: &[TypeRef],
        is_dict_op: bool,
    ) -> TypeResult<Ty> {
        let bound: Vec<Ty> = if !type_args.is_empty() {
            let want = if is_dict_op { 2 } else { 1 };
            if type_args.len() != want {
                return Err(TypeError::custom(
                    format!("'{}' takes {} type parameter(s), got {}", name, want, type_args.len()),
                    e.span,
                ));
            }
            let mut out = Vec::new();
            for tr in type_args {
                out.push(self.resolve_type(tr)?);
            }
            if is_dict_op && !out[0].is_dict_key() {
                return Err(TypeError::new(
                    TypeErrorKind::BadDictKey { found: out[0].clone() },
                    type_args[0].span,
                ));
            }
            out
        } else {
            // Infer from the first argument.
            if name == "List" || name == "Dict" {
                return Err(TypeError::custom(
                    format!("'{}' requires explicit type parameters, e.g. {}[...]()", name, name),
                    e.span,
                ));
            }
            if args.is_empty() {
                return Err(TypeError::custom(
                    format!("cannot infer type parameters for '{}' without arguments", name),
                    e.span,
                ));
            }
            let first_ty = self.check_expr(&args[0], None)?;
            match (&first_ty, is_dict_op) {
                (Ty::List(elem), false) => vec![(**elem).clone()],
                (Ty::Dict(k, v), true) => vec![(**k).clone(), (**v).clone()],
                _ => {
                    return Err(TypeError::custom(
                        format!(
                            "'{}' requires a {} argument, got {}",
                            name,
                            if is_dict_op { "dict" } else { "list" },
                            first_ty
                        ),
                        args[0].span,
                    ));
                }
            }
        };

        let (param_tys, ret_ty): (Vec<Ty>, Ty) = if is_dict_op {
            let key = bound[0].clone();
            let val = bound[1].clone();
            let dict = Ty::Dict(Box::new(key.clone()), Box::new(val.clone()));
            match name {
                "Dict" => (vec![], dict),
                "put" => (vec![dict, key, val], Ty::Void),
                "lookup" => (vec![dict, key], val),
                "has" => (vec![dict, key], Ty::Bool),
                _ => unreachable!(),
            }
        } else {
            let elem = bound[0].clone();
            let list = Ty::List(Box::new(elem.clone()));
            match name {
                "List" => (vec![], list),
                "append" => (vec![list, elem], Ty::Void),
                "get" => (vec![list, Ty::I64], elem),
                "set" => (vec![list, Ty::I64, elem], Ty::Void),
                "pop" => (vec![list], elem),
                "remove" => (vec![list, Ty::I64], Ty::Void),
                _ => unreachable!(),
            }
        };

        self.check_args(name, &param_tys, args, e.span)?;
        self.call_args.insert(e.id, bound);
        Ok(ret_ty)
    }
}
