//! Mutable AST traversal: deep cloning (with substitutions) and in-place rewriting.

use crate::{Expr, ExprDef, ExprKind, FuncDefBody, LocalDecl, Stmt, StmtDef, StmtKind};

/// The result of a transformation (which is not in-place).
#[must_use]
#[derive(Copy, Clone)]
pub enum Transformed<T> {
    /// The original `T` value remains as it was, at no cost.
    Unchanged,

    /// Some part of the original `T` value was transformed, and a new `T` value
    /// had to be constructed. This change will propagate in any "outer" value.
    Changed(T),
}

/// Substitution hooks, consulted for every node *before* its children.
///
/// Returning [`Transformed::Changed`] replaces the node wholesale (and its
/// children are not traversed), e.g. to replace a variable use with a fresh
/// expression, or a statement with its already-generated replacement.
pub trait Transformer {
    fn transform_expr_use(&mut self, _func: &mut FuncDefBody, _expr: Expr) -> Transformed<Expr> {
        Transformed::Unchanged
    }
    fn transform_stmt_use(&mut self, _func: &mut FuncDefBody, _stmt: Stmt) -> Transformed<Stmt> {
        Transformed::Unchanged
    }
}

/// Identity [`Transformer`], for plain deep clones.
pub struct NoTransform;

impl Transformer for NoTransform {}

/// Mutable reference to one child of a [`StmtKind`].
pub enum StmtChildMut<'a> {
    Expr(&'a mut Expr),
    Stmt(&'a mut Stmt),
}

impl ExprKind {
    /// Call `f` on every operand handle, in evaluation order.
    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut Expr)) {
        match self {
            ExprKind::IntLit(_)
            | ExprKind::FloatLit(_)
            | ExprKind::EnumConst { .. }
            | ExprKind::Var(_)
            | ExprKind::GlobalVar(_)
            | ExprKind::Func(_)
            | ExprKind::SizeOf(_) => {}

            ExprKind::Unary(_, operand)
            | ExprKind::Paren(operand)
            | ExprKind::Cast { operand, implicit: _ }
            | ExprKind::Member { base: operand, field: _, arrow: _ } => f(operand),
            ExprKind::Binary(_, a, b)
            | ExprKind::Comma(a, b)
            | ExprKind::Index { base: a, index: b } => {
                f(a);
                f(b);
            }
            ExprKind::Assign { op: _, lhs, rhs } => {
                f(rhs);
                f(lhs);
            }
            ExprKind::Cond { cond, then_expr, else_expr } => {
                f(cond);
                f(then_expr);
                f(else_expr);
            }
            ExprKind::Call { callee, args } => {
                f(callee);
                args.iter_mut().for_each(f);
            }
            ExprKind::Intrinsic { template: _, args } => args.iter_mut().for_each(f),
        }
    }
}

impl StmtKind {
    /// Call `f` on every child handle (expressions and statements), in order.
    pub fn for_each_child_mut(&mut self, mut f: impl FnMut(StmtChildMut<'_>)) {
        match self {
            StmtKind::Null
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Goto(_)
            | StmtKind::Return(None) => {}

            StmtKind::Expr(expr) | StmtKind::Return(Some(expr)) => f(StmtChildMut::Expr(expr)),
            StmtKind::Decl(decls) => {
                for LocalDecl { var: _, init } in decls {
                    if let Some(init) = init {
                        f(StmtChildMut::Expr(init));
                    }
                }
            }
            StmtKind::Compound(children) => {
                for child in children {
                    f(StmtChildMut::Stmt(child));
                }
            }
            StmtKind::If { cond, then_stmt, else_stmt } => {
                f(StmtChildMut::Expr(cond));
                f(StmtChildMut::Stmt(then_stmt));
                if let Some(else_stmt) = else_stmt {
                    f(StmtChildMut::Stmt(else_stmt));
                }
            }
            StmtKind::For { init, cond, step, body } => {
                if let Some(init) = init {
                    f(StmtChildMut::Stmt(init));
                }
                if let Some(cond) = cond {
                    f(StmtChildMut::Expr(cond));
                }
                f(StmtChildMut::Stmt(body));
                if let Some(step) = step {
                    f(StmtChildMut::Expr(step));
                }
            }
            StmtKind::While { cond, body } | StmtKind::Switch { cond, body } => {
                f(StmtChildMut::Expr(cond));
                f(StmtChildMut::Stmt(body));
            }
            StmtKind::DoWhile { body, cond } => {
                f(StmtChildMut::Stmt(body));
                f(StmtChildMut::Expr(cond));
            }
            StmtKind::Case { value, stmt } => {
                f(StmtChildMut::Expr(value));
                f(StmtChildMut::Stmt(stmt));
            }
            StmtKind::Default(stmt) | StmtKind::Label { name: _, stmt } => {
                f(StmtChildMut::Stmt(stmt));
            }
        }
    }
}

impl FuncDefBody {
    /// Deep-clone `expr`, giving `transformer` the chance to substitute any
    /// sub-expression (which is then used as-is, without being cloned).
    pub fn deep_clone_expr(&mut self, expr: Expr, transformer: &mut impl Transformer) -> Expr {
        if let Transformed::Changed(new) = transformer.transform_expr_use(self, expr) {
            return new;
        }
        let ExprDef { ty, mut kind } = self.exprs[expr].clone();
        kind.for_each_operand_mut(|operand| *operand = self.deep_clone_expr(*operand, transformer));
        self.new_expr(ty, kind)
    }

    /// Deep-clone `stmt`, giving `transformer` the chance to substitute any
    /// sub-statement or expression (which is then used as-is).
    ///
    /// Pragmas are kept (their argument expressions are shared, not cloned).
    pub fn deep_clone_stmt(&mut self, stmt: Stmt, transformer: &mut impl Transformer) -> Stmt {
        if let Transformed::Changed(new) = transformer.transform_stmt_use(self, stmt) {
            return new;
        }
        let StmtDef { mut kind, pragmas, comments } = self.stmts[stmt].clone();
        kind.for_each_child_mut(|child| match child {
            StmtChildMut::Expr(expr) => *expr = self.deep_clone_expr(*expr, transformer),
            StmtChildMut::Stmt(stmt) => *stmt = self.deep_clone_stmt(*stmt, transformer),
        });
        self.stmts.define(StmtDef { kind, pragmas, comments })
    }

    /// Rewrite the operands of `expr` in place (`expr` itself keeps its handle).
    pub fn transform_expr_in_place(&mut self, expr: Expr, transformer: &mut impl Transformer) {
        let mut kind = self.exprs[expr].kind.clone();
        kind.for_each_operand_mut(|operand| {
            match transformer.transform_expr_use(self, *operand) {
                Transformed::Changed(new) => *operand = new,
                Transformed::Unchanged => self.transform_expr_in_place(*operand, transformer),
            }
        });
        self.exprs[expr].kind = kind;
    }

    /// Rewrite the children of `stmt` in place (`stmt` itself keeps its handle).
    pub fn transform_stmt_in_place(&mut self, stmt: Stmt, transformer: &mut impl Transformer) {
        let mut kind = self.stmts[stmt].kind.clone();
        kind.for_each_child_mut(|child| match child {
            StmtChildMut::Expr(expr) => match transformer.transform_expr_use(self, *expr) {
                Transformed::Changed(new) => *expr = new,
                Transformed::Unchanged => self.transform_expr_in_place(*expr, transformer),
            },
            StmtChildMut::Stmt(child) => match transformer.transform_stmt_use(self, *child) {
                Transformed::Changed(new) => *child = new,
                Transformed::Unchanged => self.transform_stmt_in_place(*child, transformer),
            },
        });
        self.stmts[stmt].kind = kind;
    }
}
