//! Immutable AST traversal.

use crate::func_at::FuncAt;
use crate::{
    Expr, ExprDef, ExprKind, Func, GlobalVar, LocalDecl, Stmt, StmtDef, StmtKind, Type, Var,
};

// FIXME `Sized` bound shouldn't be needed but removing it requires
// writing `impl Visitor<'a> + ?Sized` in `fn inner_visit_with` signatures.
pub trait Visitor<'a>: Sized {
    // Leaves (noop default behavior).
    fn visit_var_use(&mut self, _var: Var) {}
    fn visit_global_var_use(&mut self, _gv: GlobalVar) {}
    fn visit_func_use(&mut self, _func: Func) {}
    fn visit_type_use(&mut self, _ty: Type) {}

    // Non-leaves (defaulting to calling `.inner_visit_with(self)`).
    fn visit_stmt_use(&mut self, func_at_stmt: FuncAt<'a, Stmt>) {
        func_at_stmt.inner_visit_with(self);
    }
    fn visit_expr_use(&mut self, func_at_expr: FuncAt<'a, Expr>) {
        func_at_expr.inner_visit_with(self);
    }
}

// FIXME this can't implement an `InnerVisit` trait because of the `&'a self`
// requirement, whereas this has `'a` in `self: FuncAt<'a, Stmt>`.
impl<'a> FuncAt<'a, Stmt> {
    pub fn inner_visit_with(self, visitor: &mut impl Visitor<'a>) {
        // NOTE pragma argument expressions are "inert data", and not visited.
        let StmtDef { kind, pragmas: _, comments: _ } = self.def();

        match kind {
            StmtKind::Null
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Goto(_)
            | StmtKind::Return(None) => {}

            &StmtKind::Expr(expr) | &StmtKind::Return(Some(expr)) => {
                visitor.visit_expr_use(self.at(expr));
            }
            StmtKind::Decl(decls) => {
                for &LocalDecl { var, init } in decls {
                    visitor.visit_var_use(var);
                    if let Some(init) = init {
                        visitor.visit_expr_use(self.at(init));
                    }
                }
            }
            StmtKind::Compound(children) => {
                for &child in children {
                    visitor.visit_stmt_use(self.at(child));
                }
            }
            &StmtKind::If { cond, then_stmt, else_stmt } => {
                visitor.visit_expr_use(self.at(cond));
                visitor.visit_stmt_use(self.at(then_stmt));
                if let Some(else_stmt) = else_stmt {
                    visitor.visit_stmt_use(self.at(else_stmt));
                }
            }
            &StmtKind::For { init, cond, step, body } => {
                if let Some(init) = init {
                    visitor.visit_stmt_use(self.at(init));
                }
                if let Some(cond) = cond {
                    visitor.visit_expr_use(self.at(cond));
                }
                visitor.visit_stmt_use(self.at(body));
                if let Some(step) = step {
                    visitor.visit_expr_use(self.at(step));
                }
            }
            &StmtKind::While { cond, body } | &StmtKind::Switch { cond, body } => {
                visitor.visit_expr_use(self.at(cond));
                visitor.visit_stmt_use(self.at(body));
            }
            &StmtKind::DoWhile { body, cond } => {
                visitor.visit_stmt_use(self.at(body));
                visitor.visit_expr_use(self.at(cond));
            }
            &StmtKind::Case { value, stmt } => {
                visitor.visit_expr_use(self.at(value));
                visitor.visit_stmt_use(self.at(stmt));
            }
            &StmtKind::Default(stmt) | &StmtKind::Label { name: _, stmt } => {
                visitor.visit_stmt_use(self.at(stmt));
            }
        }
    }
}

// FIXME this can't implement an `InnerVisit` trait because of the `&'a self`
// requirement, whereas this has `'a` in `self: FuncAt<'a, Expr>`.
impl<'a> FuncAt<'a, Expr> {
    pub fn inner_visit_with(self, visitor: &mut impl Visitor<'a>) {
        let ExprDef { ty, kind } = self.def();

        visitor.visit_type_use(*ty);
        match kind {
            ExprKind::IntLit(_) | ExprKind::FloatLit(_) | ExprKind::EnumConst { .. } => {}
            &ExprKind::Var(var) => visitor.visit_var_use(var),
            &ExprKind::GlobalVar(gv) => visitor.visit_global_var_use(gv),
            &ExprKind::Func(func) => visitor.visit_func_use(func),
            &ExprKind::SizeOf(ty) => visitor.visit_type_use(ty),

            &ExprKind::Unary(_, operand)
            | &ExprKind::Paren(operand)
            | &ExprKind::Cast { operand, implicit: _ }
            | &ExprKind::Member { base: operand, field: _, arrow: _ } => {
                visitor.visit_expr_use(self.at(operand));
            }
            &ExprKind::Binary(_, a, b)
            | &ExprKind::Comma(a, b)
            | &ExprKind::Index { base: a, index: b } => {
                visitor.visit_expr_use(self.at(a));
                visitor.visit_expr_use(self.at(b));
            }
            // NOTE `rhs` is evaluated first, which matters to analyses that
            // care about the order of reads and writes.
            &ExprKind::Assign { op: _, lhs, rhs } => {
                visitor.visit_expr_use(self.at(rhs));
                visitor.visit_expr_use(self.at(lhs));
            }
            &ExprKind::Cond { cond, then_expr, else_expr } => {
                visitor.visit_expr_use(self.at(cond));
                visitor.visit_expr_use(self.at(then_expr));
                visitor.visit_expr_use(self.at(else_expr));
            }
            ExprKind::Call { callee, args } => {
                visitor.visit_expr_use(self.at(*callee));
                for &arg in args {
                    visitor.visit_expr_use(self.at(arg));
                }
            }
            ExprKind::Intrinsic { template: _, args } => {
                for &arg in args {
                    visitor.visit_expr_use(self.at(arg));
                }
            }
        }
    }
}

/// Collect every local variable used (read or written) anywhere in a subtree.
#[derive(Default)]
pub struct VarUseCollector {
    pub vars: crate::FxIndexSet<Var>,
    pub global_vars: crate::FxIndexSet<GlobalVar>,
}

impl Visitor<'_> for VarUseCollector {
    fn visit_var_use(&mut self, var: Var) {
        self.vars.insert(var);
    }
    fn visit_global_var_use(&mut self, gv: GlobalVar) {
        self.global_vars.insert(gv);
    }
}
