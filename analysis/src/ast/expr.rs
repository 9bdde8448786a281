//! Typed expressions and statements consumed by the transfer function
//!
//! This is the slice of a C-family syntax tree that lifetime analysis
//! observes: variable references, address-of, dereference, member and
//! base-subobject access, pointer arithmetic, calls, and assignment.
//! Anything else a real frontend produces is expected to be lowered away
//! or to appear here as an opaque scalar operation.

use crate::ast::ids::{ExprId, FieldId, FuncId, RecordId, TypeId, VarId};
use crate::ast::SourceLocation;

/// A typed expression node
#[derive(Debug, Clone)]
pub struct Expr {
    pub id: ExprId,
    pub ty: TypeId,
    pub loc: SourceLocation,
    pub kind: ExprKind,
}

/// Scalar binary operators; operand lifetimes never flow through these
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Eq,
    Lt,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    /// A named parameter or local
    VarRef(VarId),
    /// The implicit `this` pointer of a method body
    This,
    IntLiteral(i64),
    /// Null pointer constant; points at nothing
    NullPtr,
    /// `&e` — evaluates to the object(s) `e` denotes
    AddressOf(Box<Expr>),
    /// `*e`
    Deref(Box<Expr>),
    /// `e.field` (for `e->field`, wrap `e` in [`ExprKind::Deref`])
    Member { base: Box<Expr>, field: FieldId },
    /// A record lvalue viewed as one of its base-class subobjects
    BaseOf { base: Box<Expr>, record: RecordId },
    /// Pointer arithmetic; the result aliases the original pointees
    PtrOffset { base: Box<Expr>, offset: Box<Expr> },
    /// Scalar arithmetic or comparison
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Direct or virtual call. `callee` names the statically resolved
    /// declaration; for virtual dispatch that is the base method.
    Call {
        callee: FuncId,
        receiver: Option<Box<Expr>>,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Visit this expression and all subexpressions, pre-order
    pub fn walk(&self, visit: &mut impl FnMut(&Expr)) {
        visit(self);
        match &self.kind {
            ExprKind::VarRef(_)
            | ExprKind::This
            | ExprKind::IntLiteral(_)
            | ExprKind::NullPtr => {}
            ExprKind::AddressOf(inner) | ExprKind::Deref(inner) => inner.walk(visit),
            ExprKind::Member { base, .. } | ExprKind::BaseOf { base, .. } => base.walk(visit),
            ExprKind::PtrOffset { base, offset } => {
                base.walk(visit);
                offset.walk(visit);
            }
            ExprKind::Binary { lhs, rhs, .. } => {
                lhs.walk(visit);
                rhs.walk(visit);
            }
            ExprKind::Call { receiver, args, .. } => {
                if let Some(receiver) = receiver {
                    receiver.walk(visit);
                }
                for arg in args {
                    arg.walk(visit);
                }
            }
        }
    }
}

/// One statement within a basic block
#[derive(Debug, Clone)]
pub enum Stmt {
    /// Local declaration, optionally with an initializer
    Decl { var: VarId, init: Option<Expr> },
    /// `lhs = rhs`
    Assign { lhs: Expr, rhs: Expr },
    /// Expression evaluated for its effects (typically a call)
    Expr(Expr),
    /// In-place construction of `target` by constructor `ctor`
    Construct {
        target: Expr,
        ctor: FuncId,
        args: Vec<Expr>,
    },
}

impl Stmt {
    /// Visit every expression in this statement
    pub fn walk_exprs(&self, visit: &mut impl FnMut(&Expr)) {
        match self {
            Stmt::Decl { init, .. } => {
                if let Some(init) = init {
                    init.walk(visit);
                }
            }
            Stmt::Assign { lhs, rhs } => {
                lhs.walk(visit);
                rhs.walk(visit);
            }
            Stmt::Expr(expr) => expr.walk(visit),
            Stmt::Construct { target, args, .. } => {
                target.walk(visit);
                for arg in args {
                    arg.walk(visit);
                }
            }
        }
    }
}

/// A constructor member-initializer entry (`: field(expr)`)
#[derive(Debug, Clone)]
pub struct MemberInit {
    pub field: FieldId,
    pub value: Expr,
}
