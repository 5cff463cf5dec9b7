//! Traversal helpers for intra-function entities.
//!
//! [`FuncAt<P>`] is like `(&FuncDefBody, P)` (where `P` is some type describing
//! a "position" in the function), except:
//! * it only borrows the [`EntityDefs`] fields of [`FuncDefBody`]
//!   * this can prevent borrow conflicts, especially when mutating other fields
//!   * it also avoids accidentally accessing parts of the function definition
//!     without going through `P` (as [`EntityDefs`] requires keys for any access)
//! * it's a dedicated type with inherent methods and trait `impl`s

use crate::visit::Visitor;
use crate::{
    BinOp, Context, Diag, EntityDefs, Expr, ExprDef, ExprKind, FuncDefBody, InternedStr, Node,
    ScalarType, Stmt, StmtDef, StmtKind, Type, TypeKind, UnOp, Var, VarDecl, VarKind,
};
use rustc_hash::FxHashMap;
use std::borrow::Cow;

/// Immutable traversal (i.e. visiting) helper for intra-function entities.
///
/// The point/position type `P` should be an entity (e.g. [`Expr`], [`Stmt`]).
#[derive(Copy, Clone)]
pub struct FuncAt<'a, P: Copy> {
    pub vars: &'a EntityDefs<Var>,
    pub exprs: &'a EntityDefs<Expr>,
    pub stmts: &'a EntityDefs<Stmt>,

    pub position: P,
}

impl<'a, P: Copy> FuncAt<'a, P> {
    /// Reposition to `new_position`.
    pub fn at<P2: Copy>(self, new_position: P2) -> FuncAt<'a, P2> {
        FuncAt { vars: self.vars, exprs: self.exprs, stmts: self.stmts, position: new_position }
    }
}

impl<'a> FuncAt<'a, Expr> {
    pub fn def(self) -> &'a ExprDef {
        &self.exprs[self.position]
    }

    /// Look through parentheses and implicit casts, which never change the
    /// meaning of an expression (for the purposes of pattern-matching it).
    pub fn strip_parens_and_implicit_casts(self) -> FuncAt<'a, Expr> {
        let mut expr = self.position;
        loop {
            match self.exprs[expr].kind {
                ExprKind::Paren(inner) | ExprKind::Cast { operand: inner, implicit: true } => {
                    expr = inner;
                }
                _ => return self.at(expr),
            }
        }
    }

    /// The variable this expression refers to, if it's just a variable use.
    pub fn as_var(self) -> Option<Var> {
        match self.strip_parens_and_implicit_casts().def().kind {
            ExprKind::Var(var) => Some(var),
            _ => None,
        }
    }

    /// Whether evaluating this expression can have any side effects
    /// (assignments, increments/decrements, or calls to anything).
    pub fn has_side_effects(self) -> bool {
        struct SideEffectFinder {
            found: bool,
        }
        impl<'a> Visitor<'a> for SideEffectFinder {
            fn visit_expr_use(&mut self, func_at_expr: FuncAt<'a, Expr>) {
                match func_at_expr.def().kind {
                    ExprKind::Assign { .. }
                    | ExprKind::Call { .. }
                    | ExprKind::Intrinsic { .. } => {
                        self.found = true;
                    }
                    ExprKind::Unary(op, _) if op.is_inc_dec() => self.found = true,
                    _ => func_at_expr.inner_visit_with(self),
                }
            }
        }
        let mut finder = SideEffectFinder { found: false };
        finder.visit_expr_use(self);
        finder.found
    }
}

impl<'a> FuncAt<'a, Stmt> {
    pub fn def(self) -> &'a StmtDef {
        &self.stmts[self.position]
    }

    /// The children of a compound statement, or just the statement itself
    /// (for e.g. `for (...) a[i] = 0;` loop bodies without braces).
    pub fn compound_children(self) -> Cow<'a, [Stmt]> {
        match &self.def().kind {
            StmtKind::Compound(children) => Cow::Borrowed(children),
            _ => Cow::Owned(vec![self.position]),
        }
    }
}

impl Default for FuncDefBody {
    fn default() -> Self {
        Self::new()
    }
}

impl FuncDefBody {
    /// Create an empty function body (i.e. `{}`, with no parameters).
    pub fn new() -> Self {
        let mut stmts = EntityDefs::new();
        let body = stmts.define(StmtKind::Compound(vec![]).into());
        Self {
            vars: EntityDefs::new(),
            exprs: EntityDefs::new(),
            stmts,
            params: Default::default(),
            body,
            diags: vec![],
            next_artificial_idx: 0,
        }
    }

    /// Start immutably traversing the function at `position`.
    pub fn at<P: Copy>(&self, position: P) -> FuncAt<'_, P> {
        FuncAt { vars: &self.vars, exprs: &self.exprs, stmts: &self.stmts, position }
    }

    /// Shorthand for `func_def_body.at(func_def_body.body)`.
    pub fn at_body(&self) -> FuncAt<'_, Stmt> {
        self.at(self.body)
    }

    pub fn new_expr(&mut self, ty: Type, kind: ExprKind) -> Expr {
        self.exprs.define(ExprDef { ty, kind })
    }

    pub fn new_stmt(&mut self, kind: StmtKind) -> Stmt {
        self.stmts.define(kind.into())
    }

    /// Build a `Compound` statement, flattening any `Null` statements away.
    pub fn new_compound(&mut self, children: impl IntoIterator<Item = Stmt>) -> Stmt {
        let children = children
            .into_iter()
            .filter(|&stmt| !matches!(self.stmts[stmt].kind, StmtKind::Null))
            .collect();
        self.new_stmt(StmtKind::Compound(children))
    }

    /// Shorthand for an expression statement, `expr;`.
    pub fn new_expr_stmt(&mut self, expr: Expr) -> Stmt {
        self.new_stmt(StmtKind::Expr(expr))
    }

    pub fn new_var_use(&mut self, var: Var) -> Expr {
        let ty = self.vars[var].ty;
        self.new_expr(ty, ExprKind::Var(var))
    }

    /// Build `lhs = rhs` (typed as `lhs`).
    pub fn new_assign(&mut self, lhs: Expr, rhs: Expr) -> Expr {
        let ty = self.exprs[lhs].ty;
        self.new_expr(ty, ExprKind::Assign { op: None, lhs, rhs })
    }

    /// Build `expr` implicitly converted to `ty` (just `expr`, if already a `ty`).
    pub fn new_implicit_cast(&mut self, ty: Type, expr: Expr) -> Expr {
        if self.exprs[expr].ty == ty {
            return expr;
        }
        self.new_expr(ty, ExprKind::Cast { operand: expr, implicit: true })
    }

    /// Build the value `lhs op= rhs` stores into `lhs`, given `old` (a use of
    /// `lhs`), i.e. `old op rhs` computed in the common type of both sides
    /// (only promoting `old`, for shifts), then converted back to `old`'s type.
    pub fn new_compound_value(&mut self, cx: &Context, op: BinOp, old: Expr, rhs: Expr) -> Expr {
        let ty = self.exprs[old].ty;
        let scalars = (cx[ty].kind.scalar(), cx[self.exprs[rhs].ty].kind.scalar());
        let (Some(lhs_scalar), Some(rhs_scalar)) = scalars else {
            // Pointer arithmetic.
            return self.new_expr(ty, ExprKind::Binary(op, old, rhs));
        };
        let is_shift = matches!(op, BinOp::Shl | BinOp::Shr);
        let computation = if is_shift {
            lhs_scalar.max(ScalarType::Int)
        } else {
            lhs_scalar.common(rhs_scalar)
        };
        let computation_ty = cx.intern(TypeKind::Scalar(computation));
        let old = self.new_implicit_cast(computation_ty, old);
        let rhs = if is_shift { rhs } else { self.new_implicit_cast(computation_ty, rhs) };
        let value = self.new_expr(computation_ty, ExprKind::Binary(op, old, rhs));
        self.new_implicit_cast(ty, value)
    }

    /// Build `&lvalue` (typed as `ptr_ty`).
    pub fn new_addr_of(&mut self, ptr_ty: Type, lvalue: Expr) -> Expr {
        self.new_expr(ptr_ty, ExprKind::Unary(UnOp::AddrOf, lvalue))
    }

    /// Declare a new artificial local variable, with a name derived from
    /// `prefix` that can't collide with any other artificial variable.
    pub fn new_artificial_var(&mut self, cx: &Context, prefix: &str, ty: Type) -> Var {
        let idx = self.next_artificial_idx;
        self.next_artificial_idx += 1;
        let name: InternedStr = cx.intern(format!("{prefix}{idx}"));
        self.vars.define(VarDecl {
            name,
            ty,
            kind: VarKind::Local,
            is_volatile: false,
            is_artificial: true,
        })
    }

    /// Replace the definition of `stmt` (keeping the handle, and therefore its
    /// position in its parent, unchanged), returning the old definition.
    pub fn replace_stmt_def(&mut self, stmt: Stmt, new_def: StmtDef) -> StmtDef {
        std::mem::replace(&mut self.stmts[stmt], new_def)
    }

    /// Move the definition of `stmt` to a new handle (e.g. so that `stmt`'s
    /// position can be reused for a statement wrapping the old definition).
    pub fn relocate_stmt(&mut self, stmt: Stmt) -> Stmt {
        let def = self.replace_stmt_def(stmt, StmtKind::Null.into());
        self.stmts.define(def)
    }

    pub fn attach_diag(&mut self, node: impl Into<Node>, diag: Diag) {
        self.diags.push((node.into(), diag));
    }

    /// Compute the parent of every statement and expression reachable from the body.
    pub fn parents(&self) -> Parents {
        struct ParentCollector {
            stack: Vec<Node>,
            parents: FxHashMap<Node, Node>,
        }
        impl ParentCollector {
            fn enter(&mut self, node: Node) {
                if let Some(&parent) = self.stack.last() {
                    self.parents.insert(node, parent);
                }
                self.stack.push(node);
            }
        }
        impl<'a> Visitor<'a> for ParentCollector {
            fn visit_expr_use(&mut self, func_at_expr: FuncAt<'a, Expr>) {
                self.enter(Node::Expr(func_at_expr.position));
                func_at_expr.inner_visit_with(self);
                self.stack.pop();
            }
            fn visit_stmt_use(&mut self, func_at_stmt: FuncAt<'a, Stmt>) {
                self.enter(Node::Stmt(func_at_stmt.position));
                func_at_stmt.inner_visit_with(self);
                self.stack.pop();
            }
        }
        let mut collector = ParentCollector { stack: vec![], parents: FxHashMap::default() };
        collector.visit_stmt_use(self.at_body());
        Parents { parents: collector.parents }
    }
}

/// Parent links for one [`FuncDefBody`], as computed by [`FuncDefBody::parents`].
///
/// Only valid until the next structural change to the function.
pub struct Parents {
    parents: FxHashMap<Node, Node>,
}

impl Parents {
    pub fn parent_of(&self, node: impl Into<Node>) -> Option<Node> {
        self.parents.get(&node.into()).copied()
    }
}
