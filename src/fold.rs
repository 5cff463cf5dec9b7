//! Constant evaluation and folding.
//!
//! Evaluation follows C semantics closely enough for the transformations in
//! this crate (integer results wrap to the width of their type, integer
//! division truncates), and gives up (`None`) on anything with side effects,
//! on division by zero, and on anything it doesn't know the value of.

use crate::transform::StmtChildMut;
use crate::{
    BinOp, Context, Expr, ExprDef, ExprKind, FuncDefBody, ScalarType, Stmt, StmtKind, Type,
    TypeKind, UnOp,
};

/// Value of a constant expression.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Const {
    Int(i64),
    Float(f64),
}

impl Const {
    pub fn is_truthy(self) -> bool {
        match self {
            Const::Int(v) => v != 0,
            Const::Float(v) => v != 0.0,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Const::Int(v) => v as f64,
            Const::Float(v) => v,
        }
    }

    /// Convert to a value of (scalar) type `ty`, or `None` for non-scalar types.
    fn convert_to(self, cx: &Context, ty: Type) -> Option<Self> {
        let scalar = cx[ty].kind.scalar()?;
        Some(match (self, scalar) {
            (_, ScalarType::Float) => Const::Float(self.as_f64() as f32 as f64),
            (_, ScalarType::Double) => Const::Float(self.as_f64()),
            (Const::Float(v), _) => {
                if !v.is_finite() {
                    return None;
                }
                Const::Int(wrap_to(v.trunc() as i64, scalar))
            }
            (Const::Int(v), _) => Const::Int(wrap_to(v, scalar)),
        })
    }
}

/// Truncate `v` to the width of the integer type `scalar`, sign-extending back.
fn wrap_to(v: i64, scalar: ScalarType) -> i64 {
    match scalar {
        ScalarType::Char => v as i8 as i64,
        ScalarType::Short => v as i16 as i64,
        ScalarType::Int => v as i32 as i64,
        ScalarType::Long | ScalarType::Float | ScalarType::Double => v,
    }
}

/// Size in bytes of `ty` (`None` for `void` and SIMD types), with C-like
/// struct layout (each field aligned to its own size, capped at 8).
pub fn byte_size(cx: &Context, ty: Type) -> Option<u32> {
    Some(match &cx[ty].kind {
        TypeKind::Void | TypeKind::Simd { .. } => return None,
        TypeKind::Scalar(scalar) => scalar.byte_size(),
        TypeKind::Ptr(_) => 8,
        &TypeKind::Array { elem, len } => byte_size(cx, elem)?.checked_mul(len)?,
        TypeKind::Struct { fields, .. } => {
            let mut size = 0u32;
            let mut max_align = 1;
            for &(_, field_ty) in fields {
                let field_size = byte_size(cx, field_ty)?;
                let align = byte_align(cx, field_ty);
                max_align = max_align.max(align);
                size = size.next_multiple_of(align) + field_size;
            }
            size.next_multiple_of(max_align)
        }
    })
}

fn byte_align(cx: &Context, ty: Type) -> u32 {
    match &cx[ty].kind {
        TypeKind::Void | TypeKind::Simd { .. } => 1,
        TypeKind::Scalar(scalar) => scalar.byte_size(),
        TypeKind::Ptr(_) => 8,
        &TypeKind::Array { elem, .. } => byte_align(cx, elem),
        TypeKind::Struct { fields, .. } => {
            fields.iter().map(|&(_, field_ty)| byte_align(cx, field_ty)).max().unwrap_or(1)
        }
    }
}

/// Evaluate `expr` as a constant, if possible.
pub fn eval(cx: &Context, func: &FuncDefBody, expr: Expr) -> Option<Const> {
    let ExprDef { ty, kind } = &func.exprs[expr];
    let ty = *ty;
    match *kind {
        ExprKind::IntLit(v) => Some(Const::Int(v)),
        ExprKind::FloatLit(v) => Some(Const::Float(v)),
        ExprKind::EnumConst { name: _, value } => Some(Const::Int(value)),
        ExprKind::SizeOf(operand_ty) => Some(Const::Int(byte_size(cx, operand_ty)?.into())),
        ExprKind::Paren(inner) => eval(cx, func, inner),
        ExprKind::Cast { operand, implicit: _ } => eval(cx, func, operand)?.convert_to(cx, ty),

        ExprKind::Unary(op, operand) => {
            let v = eval(cx, func, operand)?;
            let r = match (op, v) {
                (UnOp::Plus, _) => v,
                (UnOp::Neg, Const::Int(v)) => Const::Int(v.wrapping_neg()),
                (UnOp::Neg, Const::Float(v)) => Const::Float(-v),
                (UnOp::Not, _) => Const::Int((!v.is_truthy()).into()),
                (UnOp::BitNot, Const::Int(v)) => Const::Int(!v),
                _ => return None,
            };
            r.convert_to(cx, ty)
        }

        ExprKind::Binary(op @ (BinOp::LogAnd | BinOp::LogOr), a, b) => {
            let (a, b) = (eval(cx, func, a)?.is_truthy(), eval(cx, func, b)?.is_truthy());
            let r = if op == BinOp::LogAnd { a && b } else { a || b };
            Some(Const::Int(r.into()))
        }
        ExprKind::Binary(op, a, b) => {
            let (a, b) = (eval(cx, func, a)?, eval(cx, func, b)?);
            eval_binary(op, a, b)?.convert_to(cx, ty)
        }

        ExprKind::Cond { cond, then_expr, else_expr } => {
            let taken = if eval_bool(cx, func, cond)? { then_expr } else { else_expr };
            eval(cx, func, taken)?.convert_to(cx, ty)
        }

        ExprKind::Comma(a, b) => {
            eval(cx, func, a)?;
            eval(cx, func, b)
        }

        ExprKind::Var(_)
        | ExprKind::GlobalVar(_)
        | ExprKind::Func(_)
        | ExprKind::Assign { .. }
        | ExprKind::Call { .. }
        | ExprKind::Index { .. }
        | ExprKind::Member { .. }
        | ExprKind::Intrinsic { .. } => None,
    }
}

fn eval_binary(op: BinOp, a: Const, b: Const) -> Option<Const> {
    use BinOp as B;

    if op.is_comparison() {
        let r = match (a, b) {
            (Const::Int(a), Const::Int(b)) => match op {
                B::Lt => a < b,
                B::Gt => a > b,
                B::Le => a <= b,
                B::Ge => a >= b,
                B::Eq => a == b,
                _ => a != b,
            },
            _ => {
                let (a, b) = (a.as_f64(), b.as_f64());
                match op {
                    B::Lt => a < b,
                    B::Gt => a > b,
                    B::Le => a <= b,
                    B::Ge => a >= b,
                    B::Eq => a == b,
                    _ => a != b,
                }
            }
        };
        return Some(Const::Int(r.into()));
    }

    match (a, b) {
        (Const::Int(a), Const::Int(b)) => Some(Const::Int(match op {
            B::Add => a.wrapping_add(b),
            B::Sub => a.wrapping_sub(b),
            B::Mul => a.wrapping_mul(b),
            B::Div => a.checked_div(b)?,
            B::Rem => a.checked_rem(b)?,
            B::Shl => a.checked_shl(u32::try_from(b).ok()?)?,
            B::Shr => a.checked_shr(u32::try_from(b).ok()?)?,
            B::BitAnd => a & b,
            B::BitXor => a ^ b,
            B::BitOr => a | b,
            _ => return None,
        })),
        _ => {
            let (a, b) = (a.as_f64(), b.as_f64());
            Some(Const::Float(match op {
                B::Add => a + b,
                B::Sub => a - b,
                B::Mul => a * b,
                B::Div => a / b,
                _ => return None,
            }))
        }
    }
}

/// Evaluate `expr` as an integer constant (`None` for floating-point ones).
pub fn eval_int(cx: &Context, func: &FuncDefBody, expr: Expr) -> Option<i64> {
    match eval(cx, func, expr)? {
        Const::Int(v) => Some(v),
        Const::Float(_) => None,
    }
}

/// Evaluate `expr` as a condition: `Some(true)`/`Some(false)` when its truth
/// value is statically known, `None` otherwise.
///
/// Unlike [`eval`], `&&` and `||` only need their left operand to be known
/// when it short-circuits (e.g. `0 && f()` is known to be false).
pub fn eval_bool(cx: &Context, func: &FuncDefBody, expr: Expr) -> Option<bool> {
    match func.exprs[expr].kind {
        ExprKind::Paren(inner) | ExprKind::Cast { operand: inner, implicit: true } => {
            eval_bool(cx, func, inner)
        }
        ExprKind::Unary(UnOp::Not, operand) => eval_bool(cx, func, operand).map(|v| !v),
        ExprKind::Binary(BinOp::LogAnd, a, b) => match eval_bool(cx, func, a)? {
            false => Some(false),
            true => eval_bool(cx, func, b),
        },
        ExprKind::Binary(BinOp::LogOr, a, b) => match eval_bool(cx, func, a)? {
            true => Some(true),
            false => eval_bool(cx, func, b),
        },
        _ => eval(cx, func, expr).map(Const::is_truthy),
    }
}

/// Build a literal expression of type `ty` with value `v`.
pub fn new_const(func: &mut FuncDefBody, cx: &Context, ty: Type, v: Const) -> Expr {
    let kind = literal_kind(cx, ty, v);
    func.new_expr(ty, kind)
}

fn literal_kind(cx: &Context, ty: Type, v: Const) -> ExprKind {
    match (cx[ty].kind.scalar().is_some_and(ScalarType::is_float), v) {
        (true, _) => ExprKind::FloatLit(v.as_f64()),
        (false, Const::Int(v)) => ExprKind::IntLit(v),
        (false, Const::Float(v)) => ExprKind::IntLit(v as i64),
    }
}

/// Fold every constant sub-expression of `expr` (including `expr` itself)
/// into a literal, simplify `x + 0`, `x - 0` and `x * 1`, and collapse `?:`
/// with a statically known condition.
///
/// Handles are kept (definitions are overwritten), so parents stay valid.
pub fn fold_expr_in_place(cx: &Context, func: &mut FuncDefBody, expr: Expr) {
    let mut kind = func.exprs[expr].kind.clone();
    kind.for_each_operand_mut(|&mut operand| fold_expr_in_place(cx, func, operand));

    match kind {
        ExprKind::IntLit(_)
        | ExprKind::FloatLit(_)
        | ExprKind::Var(_)
        | ExprKind::GlobalVar(_)
        | ExprKind::Func(_)
        | ExprKind::Assign { .. }
        | ExprKind::Call { .. }
        | ExprKind::Intrinsic { .. }
        | ExprKind::Comma(..) => return,
        ExprKind::Unary(op, _) if op.is_inc_dec() => return,

        ExprKind::Cond { cond, then_expr, else_expr } => {
            if let Some(taken) = eval_bool(cx, func, cond) {
                let taken = if taken { then_expr } else { else_expr };
                func.exprs[expr] = func.exprs[taken].clone();
            }
            return;
        }
        _ => {}
    }

    let ty = func.exprs[expr].ty;
    if let Some(v) = eval(cx, func, expr) {
        func.exprs[expr].kind = literal_kind(cx, ty, v);
        return;
    }

    let identity_operand = match kind {
        ExprKind::Binary(BinOp::Add, x, zero) | ExprKind::Binary(BinOp::Add, zero, x)
            if is_literal(func, zero, 0) =>
        {
            Some(x)
        }
        ExprKind::Binary(BinOp::Sub, x, zero) if is_literal(func, zero, 0) => Some(x),
        ExprKind::Binary(BinOp::Mul, x, one) | ExprKind::Binary(BinOp::Mul, one, x)
            if is_literal(func, one, 1) =>
        {
            Some(x)
        }
        _ => None,
    };
    if let Some(x) = identity_operand
        && func.exprs[x].ty == ty
    {
        func.exprs[expr] = func.exprs[x].clone();
    }
}

fn is_literal(func: &FuncDefBody, expr: Expr, v: i64) -> bool {
    match func.at(expr).strip_parens_and_implicit_casts().def().kind {
        ExprKind::IntLit(x) => x == v,
        ExprKind::FloatLit(x) => x == v as f64,
        _ => false,
    }
}

/// Fold every expression in `stmt` (see [`fold_expr_in_place`]), and collapse
/// `if` statements with a statically known condition into the taken branch.
pub fn fold_stmt_in_place(cx: &Context, func: &mut FuncDefBody, stmt: Stmt) {
    let mut kind = func.stmts[stmt].kind.clone();
    kind.for_each_child_mut(|child| match child {
        StmtChildMut::Expr(&mut expr) => fold_expr_in_place(cx, func, expr),
        StmtChildMut::Stmt(&mut child) => fold_stmt_in_place(cx, func, child),
    });

    match kind {
        StmtKind::If { cond, then_stmt, else_stmt } => {
            if let Some(taken) = eval_bool(cx, func, cond) {
                let taken = if taken { Some(then_stmt) } else { else_stmt };
                let mut new_def = match taken {
                    Some(taken) => func.stmts[taken].clone(),
                    None => StmtKind::Null.into(),
                };
                let old_def = &func.stmts[stmt];
                new_def.comments.insert_many(0, old_def.comments.iter().cloned());
                func.stmts[stmt] = new_def;
            }
        }
        StmtKind::Compound(children) => {
            let children = children
                .into_iter()
                .filter(|&child| {
                    let def = &func.stmts[child];
                    !(matches!(def.kind, StmtKind::Null) && def.comments.is_empty())
                })
                .collect();
            func.stmts[stmt].kind = StmtKind::Compound(children);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests;
