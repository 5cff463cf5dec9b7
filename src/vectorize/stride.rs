//! Stride classification of expressions (see [`StridedExprResult`]).
//!
//! Every expression is classified by how its value varies between iterations
//! of the loop being vectorized, and lvalues additionally by how their address
//! varies (i.e. the identity of the [`MemRegion`] they designate), e.g. in
//! `a[i * 2]` the address is `Stride1` (with stride `2`), but the value read is
//! only `Stride1Dependent` (nothing is known about the contents of `a`).

use super::collect::Analyzer;
use super::info::{Stride, StrideKind, StridedExprResult};
use super::live::{Binding, MemRegion};
use crate::cf::is_integer_type;
use crate::fold;
use crate::pragma::{self, PragmaDomain, StorageRoot};
use crate::print::{expr_to_string, structural_key};
use crate::{BinOp, Context, Expr, ExprKind, FuncDefBody, Type, TypeKind, UnOp};
use smallvec::SmallVec;

impl Analyzer<'_> {
    /// Classify the value of `expr` (memoized for the whole analysis).
    pub fn classify(&mut self, expr: Expr) -> StridedExprResult {
        if let Some(result) = self.info.results.get(&expr) {
            return result.clone();
        }
        let result = self.classify_uncached(expr);
        log::trace!(
            target: "vectorize",
            "`{}`: {result:?}",
            expr_to_string(self.mcx, self.func, expr)
        );
        self.info.results.insert(expr, result.clone());
        result
    }

    fn classify_uncached(&mut self, expr: Expr) -> StridedExprResult {
        let cx = self.mcx.cx;
        match self.func.exprs[expr].kind {
            ExprKind::IntLit(_)
            | ExprKind::FloatLit(_)
            | ExprKind::EnumConst { .. }
            | ExprKind::SizeOf(_)
            | ExprKind::Func(_) => StridedExprResult::constant(),

            ExprKind::Var(var) if var == self.info.counted.var => {
                StridedExprResult::stride1(Stride::one())
            }
            ExprKind::Var(var) if self.info.inner_loop_vars.contains(&var) => {
                StridedExprResult::constant().with_inner_loop_variant(true)
            }
            ExprKind::Var(_)
            | ExprKind::GlobalVar(_)
            | ExprKind::Index { .. }
            | ExprKind::Member { .. } => self.classify_read(expr),

            ExprKind::Paren(inner) => self.classify(inner),

            ExprKind::Cast { operand, implicit } => {
                let result = self.classify(operand);
                let (from, to) = (self.func.exprs[operand].ty, self.func.exprs[expr].ty);
                if implicit || is_promotion(cx, from, to) { result } else { result.degrade() }
            }

            ExprKind::Unary(op, operand) => match op {
                UnOp::Plus => self.classify(operand),
                UnOp::Neg => negate(self.classify(operand)),
                UnOp::Not | UnOp::BitNot => self.classify(operand).degrade(),
                UnOp::Deref => self.classify_read(expr),
                // `&a[i]` varies like the address of `a[i]`, not its contents.
                UnOp::AddrOf => match self.classify_lvalue(operand) {
                    Some((_, identity)) => identity,
                    None => StridedExprResult::not_analyzed(),
                },
                UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec => {
                    self.info.note(expr, "increment/decrement not supported inside expressions");
                    StridedExprResult::not_analyzed()
                }
            },

            ExprKind::Binary(op, a, b) => {
                let (ra, rb) = (self.classify(a), self.classify(b));
                if ra.is_not_analyzed() || rb.is_not_analyzed() {
                    return StridedExprResult::not_analyzed();
                }
                let inner_loop_variant = ra.inner_loop_variant || rb.inner_loop_variant;
                match op {
                    BinOp::Add => combine_additive(ra, rb),
                    BinOp::Sub => combine_additive(ra, negate(rb)),
                    BinOp::Mul => self.combine_multiplicative((a, ra), (b, rb)),
                    _ if ra.is_constant() && rb.is_constant() => {
                        StridedExprResult::constant().with_inner_loop_variant(inner_loop_variant)
                    }
                    _ => StridedExprResult::dependent().with_inner_loop_variant(inner_loop_variant),
                }
            }

            ExprKind::Cond { cond, then_expr, else_expr } => {
                let rc = self.classify(cond);
                let rt = self.classify(then_expr);
                let re = self.classify(else_expr);
                if rc.is_not_analyzed() || rt.is_not_analyzed() || re.is_not_analyzed() {
                    return StridedExprResult::not_analyzed();
                }
                let inner_loop_variant =
                    rc.inner_loop_variant || rt.inner_loop_variant || re.inner_loop_variant;
                if rc.is_absolute_constant() {
                    if rt.is_absolute_constant() && re.is_absolute_constant() {
                        return StridedExprResult::constant();
                    }
                    // Only the statement containing this `?:` can act on it,
                    // by splitting the loop on its condition.
                    if !self.func.at(cond).has_side_effects() {
                        self.info.pending_constant_cond.get_or_insert(cond);
                    }
                }
                StridedExprResult::dependent().with_inner_loop_variant(inner_loop_variant)
            }

            ExprKind::Call { callee, ref args } => {
                let args = args.clone();
                let ExprKind::Func(callee) =
                    self.func.at(callee).strip_parens_and_implicit_casts().def().kind
                else {
                    self.info.note(expr, "variable function pointers not supported");
                    return StridedExprResult::not_analyzed();
                };
                let results: SmallVec<[_; 4]> =
                    args.iter().map(|&arg| self.classify(arg)).collect();
                if results.iter().any(StridedExprResult::is_not_analyzed) {
                    return StridedExprResult::not_analyzed();
                }
                let inner_loop_variant = results.iter().any(|r| r.inner_loop_variant);
                if results.iter().all(StridedExprResult::is_constant) {
                    return StridedExprResult::constant()
                        .with_inner_loop_variant(inner_loop_variant);
                }
                let is_dummy = pragma::find(
                    cx,
                    &self.mcx.funcs[callee].pragmas,
                    PragmaDomain::Function,
                    "dummy",
                )
                .is_some();
                match results.into_iter().find(|r| !r.is_constant()) {
                    Some(passed_through) if is_dummy => {
                        passed_through.with_inner_loop_variant(inner_loop_variant)
                    }
                    _ => StridedExprResult::dependent().with_inner_loop_variant(inner_loop_variant),
                }
            }

            ExprKind::Assign { .. } => {
                self.info.note(expr, "assignment not supported inside expressions");
                StridedExprResult::not_analyzed()
            }
            ExprKind::Comma(..) => {
                self.info.note(expr, "comma operator not supported");
                StridedExprResult::not_analyzed()
            }
            ExprKind::Intrinsic { .. } => {
                self.info.note(expr, "loop already contains vector intrinsics");
                StridedExprResult::not_analyzed()
            }
        }
    }

    /// `Constant * Stride1` scales the stride, by a compile-time constant, or
    /// symbolically by a loop-invariant integer.
    fn combine_multiplicative(
        &self,
        (a, ra): (Expr, StridedExprResult),
        (b, rb): (Expr, StridedExprResult),
    ) -> StridedExprResult {
        let cx = self.mcx.cx;
        let inner_loop_variant = ra.inner_loop_variant || rb.inner_loop_variant;
        if ra.is_constant() && rb.is_constant() {
            return StridedExprResult::constant().with_inner_loop_variant(inner_loop_variant);
        }
        let (factor, factor_result, strided) = match (ra.kind, rb.kind) {
            (StrideKind::Constant, StrideKind::Stride1) => (a, ra, rb),
            (StrideKind::Stride1, StrideKind::Constant) => (b, rb, ra),
            _ => return StridedExprResult::dependent().with_inner_loop_variant(inner_loop_variant),
        };

        let stride = strided.stride_or_one();
        let scaled = match fold::eval_int(cx, self.func, factor) {
            Some(factor) => Some(stride.scale(factor)),
            None if factor_result.is_absolute_constant()
                && is_integer_type(cx, self.func.exprs[factor].ty)
                && !self.func.at(factor).has_side_effects() =>
            {
                stride.scale_by(factor)
            }
            None => None,
        };
        match scaled {
            Some(stride) => {
                StridedExprResult::stride1(stride).with_inner_loop_variant(inner_loop_variant)
            }
            None => StridedExprResult::dependent().with_inner_loop_variant(inner_loop_variant),
        }
    }

    /// Classify reading the value stored in the lvalue `expr`.
    fn classify_read(&mut self, expr: Expr) -> StridedExprResult {
        let Some((region, identity)) = self.classify_lvalue(expr) else {
            return StridedExprResult::not_analyzed();
        };

        // Arrays decay to the address of their first element.
        if let TypeKind::Array { .. } = self.mcx.cx[self.func.exprs[expr].ty].kind {
            return identity;
        }
        if self.is_volatile(expr) {
            self.info.note(expr, "volatile variables are not supported");
            return StridedExprResult::not_analyzed();
        }

        let binding = self.info.live.read(region, expr);
        let key = self.info.live.def(region).key.clone();
        let carried = identity.is_constant()
            && match binding {
                Some(Binding::Bound(_)) => false,
                Some(Binding::Partial) => true,
                None => self.info.live.is_written(&key),
            };
        match binding {
            Some(Binding::Bound(content)) => content,

            // Lane-unrolled statements run one lane after the other, so they
            // can see the previous lane's value, as long as nothing else can.
            _ if carried && self.in_sequential_scope(&key) => StridedExprResult::dependent(),
            _ if carried => {
                self.info.note(expr, "local variable carries dependency between iterations");
                StridedExprResult::not_analyzed()
            }

            None if identity.is_constant() => {
                StridedExprResult::constant().with_inner_loop_variant(identity.inner_loop_variant)
            }
            _ => {
                StridedExprResult::dependent().with_inner_loop_variant(identity.inner_loop_variant)
            }
        }
    }

    /// Classify the address of the lvalue `expr`, finding (or minting) the
    /// memory region it designates.
    pub fn classify_lvalue(&mut self, expr: Expr) -> Option<(MemRegion, StridedExprResult)> {
        let cx = self.mcx.cx;
        let expr = strip_parens(self.func, expr);
        if let Some(&region) = self.info.lvalue_regions.get(&expr) {
            return Some((region, self.info.live.def(region).identity.clone()));
        }

        let is_array = |ty: Type| matches!(cx[ty].kind, TypeKind::Array { .. });
        let identity = match self.func.exprs[expr].kind {
            ExprKind::Var(_) | ExprKind::GlobalVar(_) => StridedExprResult::constant(),
            ExprKind::Index { base, index } => {
                let base_result = if is_array(self.func.exprs[base].ty) {
                    self.classify_lvalue(base)?.1
                } else {
                    self.classify(base)
                };
                let index_result = self.classify(index);
                combine_index(base_result, index_result)
            }
            ExprKind::Member { base, arrow, .. } => {
                let base_result =
                    if arrow { self.classify(base) } else { self.classify_lvalue(base)?.1 };
                base_result.degrade()
            }
            ExprKind::Unary(UnOp::Deref, pointer) => self.classify(pointer),
            _ => {
                self.info.note(expr, "expression does not designate a known memory region");
                return None;
            }
        };
        if identity.is_not_analyzed() {
            return None;
        }

        // Steps over whole (sub-)arrays are counted in their scalar elements.
        let ty = self.func.exprs[expr].ty;
        let identity = match (identity.kind, array_elem_count(cx, ty)) {
            (StrideKind::Stride1, Some(count)) if count > 1 => {
                StridedExprResult::stride1(identity.stride_or_one().scale(count))
                    .with_inner_loop_variant(identity.inner_loop_variant)
            }
            _ => identity,
        };

        let key = structural_key(self.mcx, self.func, expr);
        let root = storage_root(cx, self.func, expr);
        let region = self.info.live.region(key, expr, identity, root, ty);
        self.info.lvalue_regions.insert(expr, region);
        Some((region, self.info.live.def(region).identity.clone()))
    }

    fn is_volatile(&self, expr: Expr) -> bool {
        match self.func.exprs[expr].kind {
            ExprKind::Var(var) => self.func.vars[var].is_volatile,
            ExprKind::GlobalVar(gv) => self.mcx.global_vars[gv].is_volatile,
            _ => false,
        }
    }
}

fn negate(result: StridedExprResult) -> StridedExprResult {
    match result.kind {
        StrideKind::Stride1 => StridedExprResult::stride1(result.stride_or_one().neg())
            .with_inner_loop_variant(result.inner_loop_variant),
        _ => result,
    }
}

fn combine_additive(a: StridedExprResult, b: StridedExprResult) -> StridedExprResult {
    let inner_loop_variant = a.inner_loop_variant || b.inner_loop_variant;
    match (a.kind, b.kind) {
        (StrideKind::NotAnalyzed, _) | (_, StrideKind::NotAnalyzed) => {
            StridedExprResult::not_analyzed()
        }
        (StrideKind::Constant, _) => b.with_inner_loop_variant(inner_loop_variant),
        (_, StrideKind::Constant) => a.with_inner_loop_variant(inner_loop_variant),
        (StrideKind::Stride1, StrideKind::Stride1) => {
            StridedExprResult::stride1(a.stride_or_one().add(b.stride_or_one()))
                .with_inner_loop_variant(inner_loop_variant)
        }
        _ => StridedExprResult::dependent().with_inner_loop_variant(inner_loop_variant),
    }
}

/// The address of `base[index]`, given those of `base` and `index`.
fn combine_index(base: StridedExprResult, index: StridedExprResult) -> StridedExprResult {
    let inner_loop_variant = base.inner_loop_variant || index.inner_loop_variant;
    match (base.kind, index.kind) {
        (StrideKind::NotAnalyzed, _) | (_, StrideKind::NotAnalyzed) => {
            StridedExprResult::not_analyzed()
        }
        (StrideKind::Constant, _) => index.with_inner_loop_variant(inner_loop_variant),
        (StrideKind::Stride1, StrideKind::Constant) => {
            base.with_inner_loop_variant(inner_loop_variant)
        }
        _ => StridedExprResult::dependent().with_inner_loop_variant(inner_loop_variant),
    }
}

/// Conversions that can't lose information (e.g. `char` to `int`).
fn is_promotion(cx: &Context, from: Type, to: Type) -> bool {
    match (cx[from].kind.scalar(), cx[to].kind.scalar()) {
        (Some(from), Some(to)) => from.is_float() == to.is_float() && from <= to,
        _ => false,
    }
}

/// Number of scalar elements in `ty`, if it's an array (of arrays).
fn array_elem_count(cx: &Context, ty: Type) -> Option<i64> {
    match cx[ty].kind {
        TypeKind::Array { elem, len } => {
            Some(i64::from(len) * array_elem_count(cx, elem).unwrap_or(1))
        }
        _ => None,
    }
}

pub(super) fn strip_parens(func: &FuncDefBody, mut expr: Expr) -> Expr {
    while let ExprKind::Paren(inner) = func.exprs[expr].kind {
        expr = inner;
    }
    expr
}

/// The variable whose storage (or pointee) `expr` accesses, e.g. `a` in
/// `a[i].x`, `*(a + i)` or `&a[i]`.
pub(super) fn storage_root(cx: &Context, func: &FuncDefBody, expr: Expr) -> Option<StorageRoot> {
    let is_address = |expr: Expr| {
        matches!(cx[func.exprs[expr].ty].kind, TypeKind::Ptr(_) | TypeKind::Array { .. })
    };
    match func.exprs[expr].kind {
        ExprKind::Var(var) => Some(StorageRoot::Var(var)),
        ExprKind::GlobalVar(gv) => Some(StorageRoot::GlobalVar(gv)),
        ExprKind::Paren(inner)
        | ExprKind::Cast { operand: inner, .. }
        | ExprKind::Index { base: inner, .. }
        | ExprKind::Member { base: inner, .. }
        | ExprKind::Unary(UnOp::Deref | UnOp::AddrOf, inner) => storage_root(cx, func, inner),
        ExprKind::Binary(BinOp::Add | BinOp::Sub, a, b) => {
            if is_address(a) {
                storage_root(cx, func, a)
            } else if is_address(b) {
                storage_root(cx, func, b)
            } else {
                None
            }
        }
        _ => None,
    }
}
