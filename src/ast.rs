//! Abstract Syntax Tree for Bismut
//!
//! One `Program` is a flat compilation unit: after import resolution every
//! loaded module has been merged in with mangled names, so the type checker
//! and emitter never see module boundaries. Declarations are plain structs;
//! statements and expressions are tagged enums with exhaustive matching.
//!
//! Every expression and statement carries a `NodeId` so later stages can
//! attach resolved types without mutating the tree.

use crate::span::Span;
use std::collections::HashMap;
use std::path::PathBuf;

/// A unique identifier for AST nodes within one compilation.
pub type NodeId = u32;

/// Allocates `NodeId`s across every file of a compilation.
#[derive(Debug, Default)]
pub struct IdGen {
    next: NodeId,
}

impl IdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> NodeId {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// A complete Bismut program (compilation unit)
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub imports: Vec<ImportDecl>,
    pub externs: Vec<ExternDecl>,
    pub funcs: Vec<FuncDecl>,
    pub classes: Vec<ClassDecl>,
    pub structs: Vec<StructDecl>,
    pub interfaces: Vec<InterfaceDecl>,
    pub enums: Vec<EnumDecl>,
    /// Top-level statements (scripts); run from `main` in source order.
    pub stmts: Vec<Stmt>,

    /// Absolute paths of extern-library C sources to `#include`.
    pub extern_includes: Vec<PathBuf>,
    pub extern_cflags: Vec<String>,
    pub extern_ldflags: Vec<String>,
    /// Mangled extern type name -> (C type, optional C destructor).
    pub extern_types: HashMap<String, ExternTypeInfo>,
    /// Mangled extern constant name -> (C expression, declared type name).
    pub extern_consts: HashMap<String, ExternConstInfo>,
}

#[derive(Debug, Clone)]
pub struct ExternTypeInfo {
    pub c_type: String,
    pub c_dtor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExternConstInfo {
    pub c_expr: String,
    pub ty: TypeRef,
}

// ============ Types (syntactic) ============

/// A syntactic type reference. Resolution to a semantic type happens in the
/// type checker, once every declaration is known.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeRef {
    pub span: Span,
    pub ty: TyExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TyExpr {
    /// Named type: `i64`, `str`, `Circle`, `shapes__Circle`
    Name(String),
    /// `List[T]`
    List(Box<TyExpr>),
    /// `Dict[K,V]`
    Dict(Box<TyExpr>, Box<TyExpr>),
    /// `(T1, T2, ...)`, at least 2 elements
    Tuple(Vec<TyExpr>),
    /// `Fn(T1, T2) -> R`
    Fn(Vec<TyExpr>, Box<TyExpr>),
}

impl TyExpr {
    pub fn name(s: impl Into<String>) -> Self {
        TyExpr::Name(s.into())
    }
}

impl std::fmt::Display for TyExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TyExpr::Name(n) => write!(f, "{}", n),
            TyExpr::List(t) => write!(f, "List[{}]", t),
            TyExpr::Dict(k, v) => write!(f, "Dict[{},{}]", k, v),
            TyExpr::Tuple(ts) => {
                write!(f, "(")?;
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, ")")
            }
            TyExpr::Fn(params, ret) => {
                write!(f, "Fn(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ")->{}", ret)
            }
        }
    }
}

// ============ Declarations ============

#[derive(Debug, Clone)]
pub struct Param {
    pub span: Span,
    pub name: String,
    pub ty: TypeRef,
}

#[derive(Debug, Clone)]
pub struct FuncDecl {
    pub span: Span,
    pub name: String,
    /// Type parameters for generic functions: `def id[T](...)`.
    pub type_params: Vec<String>,
    pub params: Vec<Param>,
    pub ret: TypeRef,
    pub body: Block,
    /// C function name for extern-library functions (no body emitted).
    pub extern_c_name: Option<String>,
    /// Doc comment text (consecutive `#` lines above the declaration).
    pub doc: String,
}

/// A method signature without a body (interface member).
#[derive(Debug, Clone)]
pub struct MethodSig {
    pub span: Span,
    pub name: String,
    /// Includes `self` as the first parameter.
    pub params: Vec<Param>,
    pub ret: TypeRef,
}

#[derive(Debug, Clone)]
pub struct InterfaceDecl {
    pub span: Span,
    pub name: String,
    pub methods: Vec<MethodSig>,
    pub doc: String,
}

#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub span: Span,
    pub name: String,
    pub ty: TypeRef,
}

#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub span: Span,
    pub name: String,
    pub fields: Vec<FieldDecl>,
    /// Methods, including `init`.
    pub methods: Vec<FuncDecl>,
    /// Names of implemented interfaces.
    pub implements: Vec<String>,
    pub doc: String,
}

#[derive(Debug, Clone)]
pub struct StructDecl {
    pub span: Span,
    pub name: String,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<FuncDecl>,
    pub doc: String,
}

#[derive(Debug, Clone)]
pub struct EnumVariant {
    pub span: Span,
    pub name: String,
    /// Explicit `= N` value; `None` auto-increments from the previous one.
    pub value: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct EnumDecl {
    pub span: Span,
    pub name: String,
    pub variants: Vec<EnumVariant>,
    pub doc: String,
}

#[derive(Debug, Clone)]
pub struct ImportDecl {
    pub span: Span,
    /// Dotted module path, e.g. `lib.shapes`.
    pub module: String,
    /// Binding alias; defaults to the last path segment.
    pub alias: String,
}

#[derive(Debug, Clone)]
pub struct ExternDecl {
    pub span: Span,
    /// Library name, e.g. `pxmath`.
    pub name: String,
    pub alias: String,
}

// ============ Statements ============

#[derive(Debug, Clone)]
pub struct Block {
    pub span: Span,
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub id: NodeId,
    pub span: Span,
    pub kind: StmtKind,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    /// `name: Type = expr`, `name := expr`, `const ...`, `static ...`
    VarDecl {
        name: String,
        /// `None` for `:=` (inferred from the RHS).
        ty: Option<TypeRef>,
        value: Expr,
        is_const: bool,
        is_static: bool,
    },
    /// `a, b := expr` destructuring a tuple into fresh bindings.
    Destructure { names: Vec<String>, value: Expr },
    /// `name op= expr`
    Assign { name: String, op: AssignOp, value: Expr },
    /// `obj.member op= expr`
    MemberAssign { obj: Expr, member: String, op: AssignOp, value: Expr },
    /// `obj[index] op= expr`
    IndexAssign { obj: Expr, index: Expr, op: AssignOp, value: Expr },
    Expr(Expr),
    Return(Option<Expr>),
    Break,
    Continue,
    If { arms: Vec<IfArm> },
    While { cond: Expr, body: Block },
    /// `for name:Type in expr ... end`
    For { var: String, var_ty: TypeRef, iterable: Expr, body: Block },
}

#[derive(Debug, Clone)]
pub struct IfArm {
    pub span: Span,
    /// `None` for the `else` arm.
    pub cond: Option<Expr>,
    pub block: Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl AssignOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            AssignOp::Assign => "=",
            AssignOp::Add => "+=",
            AssignOp::Sub => "-=",
            AssignOp::Mul => "*=",
            AssignOp::Div => "/=",
            AssignOp::Rem => "%=",
            AssignOp::BitAnd => "&=",
            AssignOp::BitOr => "|=",
            AssignOp::BitXor => "^=",
            AssignOp::Shl => "<<=",
            AssignOp::Shr => ">>=",
        }
    }

    pub fn is_arith(&self) -> bool {
        matches!(self, AssignOp::Add | AssignOp::Sub | AssignOp::Mul | AssignOp::Div | AssignOp::Rem)
    }

    pub fn is_bitwise(&self) -> bool {
        matches!(
            self,
            AssignOp::BitAnd | AssignOp::BitOr | AssignOp::BitXor | AssignOp::Shl | AssignOp::Shr
        )
    }

    /// The underlying C operator for compound forms, e.g. `+` for `+=`.
    pub fn base_symbol(&self) -> &'static str {
        let s = self.symbol();
        &s[..s.len() - 1]
    }
}

// ============ Expressions ============

#[derive(Debug, Clone)]
pub struct Expr {
    pub id: NodeId,
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Integer literal with the radix it was written in (for diagnostics).
    Int { value: i64, radix: u32 },
    Float(f64),
    /// Decoded string content.
    Str(String),
    /// Char literal as its integer code.
    Char(i64),
    Bool(bool),
    None,
    Var(String),
    Unary { op: UnaryOp, rhs: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    /// `callee(args)` or a generic call `callee[T, ...](args)`.
    Call { callee: Box<Expr>, args: Vec<Expr>, type_args: Vec<TypeRef> },
    Member { obj: Box<Expr>, member: String },
    Index { obj: Box<Expr>, index: Box<Expr> },
    /// `expr is Type`; `target` is `None` for `expr is None`.
    Is { expr: Box<Expr>, target: Option<TypeRef> },
    /// `expr as Class`, a checked interface downcast.
    As { expr: Box<Expr>, target: TypeRef },
    /// `(a, b, ...)`, at least 2 elements.
    Tuple(Vec<Expr>),
    /// `List[T]() { e1, e2, ... }`
    ListLit { elem_ty: TypeRef, elems: Vec<Expr> },
    /// `Dict[K,V]() { k: v, ... }`
    DictLit { key_ty: TypeRef, val_ty: TypeRef, entries: Vec<(Expr, Expr)> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "not",
            UnaryOp::BitNot => "~",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitXor => "^",
            BinaryOp::BitOr => "|",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }

    pub fn is_arith(&self) -> bool {
        matches!(self, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem)
    }

    pub fn is_bitwise(&self) -> bool {
        matches!(
            self,
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr
        )
    }

    pub fn is_ordering(&self) -> bool {
        matches!(self, BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge)
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, BinaryOp::Eq | BinaryOp::Ne)
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}
