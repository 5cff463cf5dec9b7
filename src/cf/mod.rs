//! Loop restructuring passes, and the loop-shape helpers they share.

use crate::func_at::FuncAt;
use crate::transform::{StmtChildMut, Transformed, Transformer};
use crate::visit::Visitor;
use crate::{
    BinOp, Context, Expr, ExprKind, FuncDefBody, LocalDecl, Stmt, StmtKind, TypeKind, UnOp, Var,
};
use rustc_hash::FxHashSet;

// NOTE all the modules are declared here, but they're documented "inside"
// (i.e. using inner doc comments).
pub mod blocking;
pub mod invariant_if;
pub mod split;
pub mod unroll;

/// A loop in the "Fortran" shape, i.e. `for (var = start; var REL end; ++var)`,
/// with `REL` being one of `<`, `<=` or `!=`.
///
/// The step may also be spelled `var++`, `var += 1` or `var = var + 1`.
#[derive(Copy, Clone)]
pub struct CountedLoop {
    pub var: Var,
    pub start: Expr,
    pub end: Expr,
    pub rel: BinOp,

    /// `for (int i = ...; ...)`, as opposed to `for (i = ...; ...)`.
    pub declares_var: bool,

    pub body: Stmt,
}

impl CountedLoop {
    /// Match `stmt` against the counted loop shape, or explain why it doesn't.
    pub fn match_for(cx: &Context, func: &FuncDefBody, stmt: Stmt) -> Result<Self, &'static str> {
        let StmtKind::For { init, cond, step, body } = func.stmts[stmt].kind else {
            return Err("not a for-loop");
        };

        let (var, start, declares_var) = match init.map(|init| &func.stmts[init].kind) {
            Some(&StmtKind::Expr(init)) => match func.exprs[init].kind {
                ExprKind::Assign { op: None, lhs, rhs } => match func.at(lhs).as_var() {
                    Some(var) => (var, rhs, false),
                    None => return Err("for-init must assign to a local variable"),
                },
                _ => return Err("for-init must be an assignment"),
            },
            Some(StmtKind::Decl(decls)) => match decls[..] {
                [LocalDecl { var, init: Some(start) }] => (var, start, true),
                _ => return Err("for-init must declare exactly one initialized variable"),
            },
            _ => return Err("for-init missing"),
        };
        if !is_integer_type(cx, func.vars[var].ty) {
            return Err("loop variable must have integer type");
        }

        let (rel, end) = match cond.map(|cond| &func.exprs[cond].kind) {
            Some(&ExprKind::Binary(rel @ (BinOp::Lt | BinOp::Le | BinOp::Ne), lhs, rhs))
                if func.at(lhs).as_var() == Some(var) =>
            {
                (rel, rhs)
            }
            Some(ExprKind::Binary(..)) => {
                return Err("for-cond must compare the loop variable using <, <= or !=");
            }
            _ => return Err("for-cond must be a comparison"),
        };

        let is_unit_step = step.is_some_and(|step| match func.exprs[step].kind {
            ExprKind::Unary(UnOp::PreInc | UnOp::PostInc, operand) => {
                func.at(operand).as_var() == Some(var)
            }
            ExprKind::Assign { op: Some(BinOp::Add), lhs, rhs } => {
                func.at(lhs).as_var() == Some(var) && is_int_literal(func, rhs, 1)
            }
            ExprKind::Assign { op: None, lhs, rhs } => {
                func.at(lhs).as_var() == Some(var)
                    && match func.at(rhs).strip_parens_and_implicit_casts().def().kind {
                        ExprKind::Binary(BinOp::Add, a, b) => {
                            (func.at(a).as_var() == Some(var) && is_int_literal(func, b, 1))
                                || (func.at(b).as_var() == Some(var) && is_int_literal(func, a, 1))
                        }
                        _ => false,
                    }
            }
            _ => false,
        });
        if !is_unit_step {
            return Err("for-increment must increment the loop variable by 1");
        }

        Ok(Self { var, start, end, rel, declares_var, body })
    }

    /// The exclusive upper bound, i.e. `end + 1` for `<=`, and `end` otherwise.
    pub fn exclusive_end(&self, cx: &Context, func: &FuncDefBody) -> Option<i64> {
        let end = crate::fold::eval_int(cx, func, self.end)?;
        match self.rel {
            BinOp::Le => end.checked_add(1),
            _ => Some(end),
        }
    }

    /// The number of iterations, when both bounds are compile-time constants.
    pub fn trip_count(&self, cx: &Context, func: &FuncDefBody) -> Option<i64> {
        let start = crate::fold::eval_int(cx, func, self.start)?;
        let end = self.exclusive_end(cx, func)?;
        // `!=` loops that start past their end would never terminate normally.
        if self.rel == BinOp::Ne && start > end {
            return None;
        }
        Some(end.saturating_sub(start).max(0))
    }
}

fn is_int_literal(func: &FuncDefBody, expr: Expr, v: i64) -> bool {
    let kind = &func.at(expr).strip_parens_and_implicit_casts().def().kind;
    matches!(*kind, ExprKind::IntLit(x) if x == v)
}

/// [`Transformer`] replacing every use of `var` with a fresh expression built by
/// `replacement` (which also receives the replaced use, e.g. for its type).
pub struct ReplaceVar<F: FnMut(&mut FuncDefBody, Expr) -> Expr> {
    pub var: Var,
    pub replacement: F,
}

impl<F: FnMut(&mut FuncDefBody, Expr) -> Expr> Transformer for ReplaceVar<F> {
    fn transform_expr_use(&mut self, func: &mut FuncDefBody, expr: Expr) -> Transformed<Expr> {
        match func.exprs[expr].kind {
            ExprKind::Var(var) if var == self.var => {
                Transformed::Changed((self.replacement)(func, expr))
            }
            _ => Transformed::Unchanged,
        }
    }
}

/// Splice the children of nested blocks into their parent block, for every
/// block reachable from `root`, and drop (comment-less) `;` statements.
///
/// Blocks that declare variables, or carry pragmas, are kept as they are.
pub fn flatten_blocks(func: &mut FuncDefBody, root: Stmt) {
    let mut kind = func.stmts[root].kind.clone();
    kind.for_each_child_mut(|child| {
        if let StmtChildMut::Stmt(&mut child) = child {
            flatten_blocks(func, child);
        }
    });

    let StmtKind::Compound(children) = kind else {
        return;
    };
    let mut flattened = Vec::with_capacity(children.len());
    for child in children {
        let def = &func.stmts[child];
        match &def.kind {
            StmtKind::Null if def.comments.is_empty() => {}
            StmtKind::Compound(grandchildren)
                if def.pragmas.is_empty()
                    && !grandchildren
                        .iter()
                        .any(|&s| matches!(func.stmts[s].kind, StmtKind::Decl(_))) =>
            {
                let grandchildren = grandchildren.clone();
                let comments = def.comments.clone();
                if let Some(&first) = grandchildren.first() {
                    func.stmts[first].comments.insert_many(0, comments);
                }
                flattened.extend(grandchildren);
            }
            _ => flattened.push(child),
        }
    }
    func.stmts[root].kind = StmtKind::Compound(flattened);
}

/// Replace `stmt` (a block without pragmas or declarations) in its parent block
/// by its own children, moving its comments to the first of them.
pub fn splice_into_parent(func: &mut FuncDefBody, stmt: Stmt) {
    let def = &func.stmts[stmt];
    let StmtKind::Compound(children) = &def.kind else {
        return;
    };
    if !def.pragmas.is_empty()
        || children.iter().any(|&child| matches!(func.stmts[child].kind, StmtKind::Decl(_)))
    {
        return;
    }
    let Some(crate::Node::Stmt(parent)) = func.parents().parent_of(stmt) else {
        return;
    };
    let StmtKind::Compound(siblings) = &func.stmts[parent].kind else {
        return;
    };
    let Some(idx) = siblings.iter().position(|&sibling| sibling == stmt) else {
        return;
    };

    let children = children.clone();
    let comments = std::mem::take(&mut func.stmts[stmt].comments);
    if let Some(&first) = children.first() {
        func.stmts[first].comments.insert_many(0, comments);
    }
    if let StmtKind::Compound(siblings) = &mut func.stmts[parent].kind {
        siblings.splice(idx..=idx, children);
    }
}

/// Find every `for` loop reachable from `root`, outer loops before the
/// loops nested in them.
pub fn collect_loops(func: &FuncDefBody, root: Stmt) -> Vec<Stmt> {
    struct LoopCollector {
        loops: Vec<Stmt>,
    }
    impl<'a> Visitor<'a> for LoopCollector {
        fn visit_stmt_use(&mut self, func_at_stmt: FuncAt<'a, Stmt>) {
            if let StmtKind::For { .. } = func_at_stmt.def().kind {
                self.loops.push(func_at_stmt.position);
            }
            func_at_stmt.inner_visit_with(self);
        }
    }
    let mut collector = LoopCollector { loops: vec![] };
    collector.visit_stmt_use(func.at(root));
    collector.loops
}

/// Variables that may change while `stmt` runs: written to, incremented,
/// having their address taken, or declared (anywhere in `stmt`).
pub(crate) fn vars_changed_in(func: &FuncDefBody, stmt: Stmt) -> FxHashSet<Var> {
    #[derive(Default)]
    struct WriteCollector {
        vars: FxHashSet<Var>,
    }
    impl<'a> Visitor<'a> for WriteCollector {
        fn visit_stmt_use(&mut self, func_at_stmt: FuncAt<'a, Stmt>) {
            if let StmtKind::Decl(decls) = &func_at_stmt.def().kind {
                self.vars.extend(decls.iter().map(|decl| decl.var));
            }
            func_at_stmt.inner_visit_with(self);
        }
        fn visit_expr_use(&mut self, func_at_expr: FuncAt<'a, Expr>) {
            let written = match func_at_expr.def().kind {
                ExprKind::Assign { lhs, .. } => Some(lhs),
                ExprKind::Unary(op, operand) if op.is_inc_dec() || op == UnOp::AddrOf => {
                    Some(operand)
                }
                _ => None,
            };
            if let Some(var) = written.and_then(|lvalue| func_at_expr.at(lvalue).as_var()) {
                self.vars.insert(var);
            }
            func_at_expr.inner_visit_with(self);
        }
    }
    let mut collector = WriteCollector::default();
    collector.visit_stmt_use(func.at(stmt));
    collector.vars
}

/// Whether cloning `body` (as one iteration of its loop) would break it, i.e.
/// it contains a `break`/`continue` for that loop, or any label.
pub(crate) fn has_iteration_escapes(func: &FuncDefBody, body: Stmt) -> bool {
    struct EscapeFinder {
        loop_depth: u32,
        switch_depth: u32,
        found: bool,
    }
    impl<'a> Visitor<'a> for EscapeFinder {
        fn visit_stmt_use(&mut self, func_at_stmt: FuncAt<'a, Stmt>) {
            match func_at_stmt.def().kind {
                StmtKind::Break if self.loop_depth == 0 && self.switch_depth == 0 => {
                    self.found = true;
                }
                StmtKind::Continue if self.loop_depth == 0 => self.found = true,
                StmtKind::Label { .. } => self.found = true,
                StmtKind::For { .. } | StmtKind::While { .. } | StmtKind::DoWhile { .. } => {
                    self.loop_depth += 1;
                    func_at_stmt.inner_visit_with(self);
                    self.loop_depth -= 1;
                }
                StmtKind::Switch { .. } => {
                    self.switch_depth += 1;
                    func_at_stmt.inner_visit_with(self);
                    self.switch_depth -= 1;
                }
                _ => func_at_stmt.inner_visit_with(self),
            }
        }
    }
    let mut finder = EscapeFinder { loop_depth: 0, switch_depth: 0, found: false };
    finder.visit_stmt_use(func.at(body));
    finder.found
}

/// Remove the first pragma matching `domain` and `action` from `stmt`.
pub(crate) fn take_pragma(
    cx: &Context,
    func: &mut FuncDefBody,
    stmt: Stmt,
    domain: crate::pragma::PragmaDomain,
    action: &str,
) -> Option<crate::pragma::Pragma> {
    let pragmas = &mut func.stmts[stmt].pragmas;
    let idx = pragmas.iter().position(|pragma| pragma.is(cx, domain, action))?;
    Some(pragmas.remove(idx))
}

/// Whether `ty` is an integer scalar type (loop counters, tile bounds, etc.).
pub(crate) fn is_integer_type(cx: &Context, ty: crate::Type) -> bool {
    matches!(cx[ty].kind, TypeKind::Scalar(scalar) if !scalar.is_float())
}

#[cfg(test)]
mod tests;
