//! Collection of the statements of a loop body into [`TopLevelStmt`]s,
//! deciding along the way how each one (and every `if`) gets vectorized.

use super::info::{
    AnalyzeResult, Reduction, ReductionOp, StrideKind, StridedExprResult, TopLevelStmt,
    VectorizeInfo, VectorizeMode,
};
use super::live::{BranchTag, LvalueRefs, MemRegion};
use super::stride::strip_parens;
use crate::cf::vars_changed_in;
use crate::fold::{self, Const};
use crate::func_at::FuncAt;
use crate::intrinsics::{IntrinsicOracle, SimdType, ops};
use crate::pragma::StorageRoot;
use crate::print::structural_key;
use crate::visit::{VarUseCollector, Visitor};
use crate::{
    BinOp, Context, Expr, ExprDef, ExprKind, FuncDefBody, LocalDecl, ModuleCx, Node, Stmt, StmtKind,
    TypeKind, UnOp,
};
use rustc_hash::FxHashSet;

/// What to do with a statement, after visiting it (but not its children).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CollectorResult {
    NotVectorizable,
    SkipChildren,

    /// Collect the children of a `{...}` block in its place.
    DiveIn,

    SplitInvariantIf { cond: Expr, static_result: Option<bool> },

    /// `if` guarding the loop body, to be turned into a mask.
    TransformGuardingIf,

    /// `if` with a lane-dependent condition, to be emitted once per lane.
    UnrollVariantIf,

    DiveInLoop,
}

pub struct Analyzer<'a> {
    pub mcx: ModuleCx<'a>,
    pub func: &'a FuncDefBody,
    pub oracle: &'a dyn IntrinsicOracle,
    pub info: VectorizeInfo,

    /// Depth of nested loops around the statement being collected.
    nest: u32,

    /// Inside an `if` whose arms are emitted once per lane.
    in_unrolled_if: bool,

    /// References of the outermost statement being unrolled lane by lane,
    /// in which every lane sees the values written by the previous lanes.
    sequential_scope: Option<LvalueRefs>,

    guard: Option<Stmt>,
}

impl<'a> Analyzer<'a> {
    pub fn new(
        mcx: ModuleCx<'a>,
        func: &'a FuncDefBody,
        oracle: &'a dyn IntrinsicOracle,
        info: VectorizeInfo,
    ) -> Self {
        Self {
            mcx,
            func,
            oracle,
            info,
            nest: 0,
            in_unrolled_if: false,
            sequential_scope: None,
            guard: None,
        }
    }

    pub fn analyze(mut self) -> (AnalyzeResult, VectorizeInfo) {
        let result = self.analyze_loop();
        log::debug!(target: "vectorize", "analysis result: {result:?}");
        if let AnalyzeResult::Vectorize | AnalyzeResult::GuardingIf { .. } = result {
            let info = &mut self.info;
            let (reductions, vectorized_stmts) = (&info.reductions, &info.vectorized_stmts);
            info.live.finalize(
                |region| reductions.contains_key(&region),
                |stmt_index| vectorized_stmts.contains(&stmt_index),
            );
        }
        (result, self.info)
    }

    fn analyze_loop(&mut self) -> AnalyzeResult {
        let counted = self.info.counted;
        let loop_stmt = self.info.loop_stmt;

        let changed = vars_changed_in(self.func, counted.body);
        if changed.contains(&counted.var) {
            self.info.note(loop_stmt, "loop variable is modified in the loop body");
            return AnalyzeResult::DontVectorize;
        }
        let mut end_uses = VarUseCollector::default();
        end_uses.visit_expr_use(self.func.at(counted.end));
        if end_uses.vars.iter().any(|var| changed.contains(var))
            || self.func.at(counted.end).has_side_effects()
            || !self.classify(counted.end).is_absolute_constant()
        {
            self.info.note(counted.end, "loop bound may change between iterations");
            return AnalyzeResult::DontVectorize;
        }

        let body = self.func.at(counted.body).compound_children().into_owned();
        let mut top_level = vec![];
        if let Err(result) = self.collect_stmts(&body, &mut top_level) {
            return result;
        }

        if self.info.width.is_none() {
            self.info.note(loop_stmt, "no vector type available for the loop's assignments");
            return AnalyzeResult::DontVectorize;
        }
        if self.info.mode != VectorizeMode::Unroll && !has_vector_entries(&top_level) {
            self.info.note(loop_stmt, "loop body has no vectorizable assignments");
            return AnalyzeResult::DontVectorize;
        }
        self.info.top_level = top_level;

        if self.info.mode != VectorizeMode::Force
            && let Some((lvalue, root)) = self.find_memory_dependency()
        {
            let name = match root {
                StorageRoot::Var(var) => self.func.vars[var].name,
                StorageRoot::GlobalVar(gv) => self.mcx.global_vars[gv].name,
            };
            let reason = format!(
                "possible loop-carried dependency through `{}` \
                 (use `loop vectorize force` to vectorize anyway)",
                &self.mcx.cx[name]
            );
            self.info.note(lvalue, reason);
            return AnalyzeResult::DontVectorize;
        }

        match self.guard {
            Some(target) => AnalyzeResult::GuardingIf { target },
            None => AnalyzeResult::Vectorize,
        }
    }

    fn collect_stmts(
        &mut self,
        stmts: &[Stmt],
        out: &mut Vec<TopLevelStmt>,
    ) -> Result<(), AnalyzeResult> {
        for &stmt in stmts {
            if self.sequential_scope.is_none() {
                self.info.live.current_stmt += 1;
            }
            match self.visit_stmt(stmt, out) {
                CollectorResult::NotVectorizable => return Err(AnalyzeResult::DontVectorize),
                CollectorResult::SkipChildren => {}
                CollectorResult::DiveIn => {
                    let children = self.func.at(stmt).compound_children().into_owned();
                    self.collect_stmts(&children, out)?;
                }
                CollectorResult::SplitInvariantIf { cond, static_result } => {
                    return Err(AnalyzeResult::SplitIf { target: cond, static_result });
                }
                CollectorResult::TransformGuardingIf => self.collect_guarding_if(stmt, out)?,
                CollectorResult::UnrollVariantIf => self.collect_variant_if(stmt, out)?,
                CollectorResult::DiveInLoop => self.collect_nested_loop(stmt, out)?,
            }
        }
        Ok(())
    }

    fn reject(&mut self, node: impl Into<Node>, reason: &'static str) -> CollectorResult {
        self.info.note(node, reason);
        CollectorResult::NotVectorizable
    }

    fn visit_stmt(&mut self, stmt: Stmt, out: &mut Vec<TopLevelStmt>) -> CollectorResult {
        log::debug!(
            target: "vectorize",
            "collecting `{}`",
            crate::print::stmt_to_string(self.mcx, self.func, stmt).trim_end()
        );
        match self.func.stmts[stmt].kind {
            StmtKind::Null => CollectorResult::SkipChildren,
            StmtKind::Compound(_) => CollectorResult::DiveIn,
            StmtKind::Expr(expr) => self.visit_expr_stmt(stmt, expr, out),
            StmtKind::If { cond, else_stmt, .. } => {
                self.visit_if(cond, else_stmt.is_some(), out.is_empty())
            }
            StmtKind::For { .. } => self.visit_nested_for(stmt),
            StmtKind::Decl(_) => {
                self.reject(stmt, "declarations inside vectorized loops are not supported")
            }
            StmtKind::While { .. } => self.reject(stmt, "`while` in loop body"),
            StmtKind::DoWhile { .. } => self.reject(stmt, "`do`-`while` in loop body"),
            StmtKind::Switch { .. } => self.reject(stmt, "`switch` in loop body"),
            StmtKind::Case { .. } | StmtKind::Default(_) => {
                self.reject(stmt, "`case` label in loop body")
            }
            StmtKind::Break => self.reject(stmt, "`break` in loop body"),
            StmtKind::Continue => self.reject(stmt, "`continue` in loop body"),
            StmtKind::Return(_) => self.reject(stmt, "`return` in loop body"),
            StmtKind::Goto(_) => self.reject(stmt, "`goto` in loop body"),
            StmtKind::Label { .. } => self.reject(stmt, "label in loop body"),
        }
    }

    /// A `?:` with a loop-invariant condition was found in the statement just
    /// classified, which has to be split on first.
    fn take_pending_split(&mut self) -> Option<CollectorResult> {
        let cond = self.info.pending_constant_cond.take()?;
        let static_result = fold::eval_bool(self.mcx.cx, self.func, cond);
        Some(CollectorResult::SplitInvariantIf { cond, static_result })
    }

    fn visit_expr_stmt(
        &mut self,
        stmt: Stmt,
        expr: Expr,
        out: &mut Vec<TopLevelStmt>,
    ) -> CollectorResult {
        match self.func.exprs[expr].kind {
            ExprKind::Assign { op: None, lhs, rhs } => self.visit_assign(stmt, expr, lhs, rhs, out),
            ExprKind::Assign { op: Some(_), .. } => {
                self.reject(expr, "compound assignment to an lvalue with side effects")
            }
            _ => {
                if self.classify(expr).is_not_analyzed() {
                    return CollectorResult::NotVectorizable;
                }
                if let Some(split) = self.take_pending_split() {
                    return split;
                }
                out.push(TopLevelStmt::Unroll { stmt });
                CollectorResult::SkipChildren
            }
        }
    }

    fn visit_assign(
        &mut self,
        stmt: Stmt,
        assign: Expr,
        lhs: Expr,
        rhs: Expr,
        out: &mut Vec<TopLevelStmt>,
    ) -> CollectorResult {
        let counted_var = self.info.counted.var;
        let Some((region, identity)) = self.classify_lvalue(lhs) else {
            return CollectorResult::NotVectorizable;
        };
        if identity.is_constant() && identity.inner_loop_variant {
            return self.reject(lhs, "lhs expression depends on nested loop var only");
        }
        if let Some(var) = self.func.at(lhs).as_var()
            && (var == counted_var || self.info.inner_loop_vars.contains(&var))
        {
            return self.reject(lhs, "loop variable is assigned in the loop body");
        }

        let simd = self.simd_for(lhs);

        let scope_entered =
            self.info.mode == VectorizeMode::Unroll && self.sequential_scope.is_none();
        if scope_entered {
            self.sequential_scope = Some(LvalueRefs::collect(self.mcx, self.func, stmt));
        }
        let reduction = match simd {
            Some(simd) if !self.in_unrolled_if && self.info.mode != VectorizeMode::Unroll => {
                self.match_reduction(stmt, lhs, rhs, &identity, simd)
            }
            _ => None,
        };
        let content = match reduction {
            Some(reduction) => {
                self.info.reductions.insert(region, reduction);
                let operand = self.classify(reduction.operand);
                if operand.is_not_analyzed() { operand } else { StridedExprResult::dependent() }
            }
            None => self.classify(rhs),
        };
        if scope_entered {
            self.sequential_scope = None;
        }

        if content.is_not_analyzed() {
            return CollectorResult::NotVectorizable;
        }
        if let Some(split) = self.take_pending_split() {
            return split;
        }

        self.info.live.write(region, lhs, content.clone());
        self.info.results.insert(assign, content);

        out.push(match simd {
            Some(simd) if self.info.mode != VectorizeMode::Unroll => {
                if self.sequential_scope.is_none() && !self.in_unrolled_if {
                    self.info.vectorized_stmts.insert(self.info.live.current_stmt);
                }
                TopLevelStmt::Vectorize { stmt, simd }
            }
            _ => TopLevelStmt::ForceUnroll { stmt },
        });
        CollectorResult::SkipChildren
    }

    /// The vector type for assignments to `lhs`, fixing the loop's width on
    /// the first one.
    fn simd_for(&mut self, lhs: Expr) -> Option<SimdType> {
        let elem = self.mcx.cx[self.func.exprs[lhs].ty].kind.scalar()?;
        let width = match self.info.width {
            Some(width) => width,
            None => {
                let width = self.oracle.preferred_width(elem)?;
                log::debug!(target: "vectorize", "vector width {width} (from `{}`)", elem.c_name());
                self.info.width = Some(width);
                width
            }
        };
        let simd = SimdType { elem, width };
        self.oracle.element_storage_type(self.mcx.cx, simd).map(|_| simd)
    }

    fn key(&self, expr: Expr) -> String {
        let expr = self.func.at(expr).strip_parens_and_implicit_casts().position;
        structural_key(self.mcx, self.func, expr)
    }

    /// Whether every reference to the lvalue with `key` is inside the current
    /// sequential (lane-unrolled) statement.
    pub(super) fn in_sequential_scope(&self, key: &str) -> bool {
        self.sequential_scope
            .as_ref()
            .is_some_and(|scope| scope.count(key) == self.info.live.ref_count(key))
    }

    /// Recognize `acc = acc op x` (or `acc = x op acc`, for commutative `op`),
    /// and `acc = acc < x ? acc : x` (and the other `min`/`max` spellings).
    fn match_reduction(
        &self,
        stmt: Stmt,
        lhs: Expr,
        rhs: Expr,
        identity: &StridedExprResult,
        simd: SimdType,
    ) -> Option<Reduction> {
        if !identity.is_absolute_constant() {
            return None;
        }
        let acc = self.key(lhs);
        let is_acc = |expr: Expr| self.key(expr) == acc;

        let rhs = self.func.at(rhs).strip_parens_and_implicit_casts();
        let (op, operand, expected_refs) = match rhs.def().kind {
            ExprKind::Binary(BinOp::Add, a, b) if is_acc(a) => (ReductionOp::Add, b, 2),
            ExprKind::Binary(BinOp::Add, a, b) if is_acc(b) => (ReductionOp::Add, a, 2),
            ExprKind::Binary(BinOp::Sub, a, b) if is_acc(a) => (ReductionOp::Sub, b, 2),
            ExprKind::Binary(BinOp::Mul, a, b) if is_acc(a) => (ReductionOp::Mul, b, 2),
            ExprKind::Binary(BinOp::Mul, a, b) if is_acc(b) => (ReductionOp::Mul, a, 2),
            ExprKind::Cond { cond, then_expr, else_expr } => {
                let ExprKind::Binary(rel @ (BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge), x, y) =
                    self.func.at(cond).strip_parens_and_implicit_casts().def().kind
                else {
                    return None;
                };
                let op = minmax_op(rel, [x, y, then_expr, else_expr].map(|e| self.key(e)))?;
                let operand = if is_acc(x) {
                    y
                } else if is_acc(y) {
                    x
                } else {
                    return None;
                };
                let op = match op {
                    ops::MIN => ReductionOp::Min,
                    _ => ReductionOp::Max,
                };
                (op, operand, 3)
            }
            _ => return None,
        };
        // Accumulating in another type rounds (or truncates) every iteration.
        let acc_ty = self.func.exprs[lhs].ty;
        if rhs.def().ty != acc_ty || self.func.exprs[operand].ty != acc_ty {
            return None;
        }
        if self.info.live.ref_count(&acc) != expected_refs {
            return None;
        }

        let cx = self.mcx.cx;
        let op_name = reduction_op_name(op);
        let available = [op_name, ops::SPLAT]
            .into_iter()
            .all(|op| self.oracle.resolve(cx, op, simd, None).is_some())
            && (0..simd.width)
                .all(|lane| self.oracle.resolve(cx, ops::EXTRACT, simd, Some(lane)).is_some());
        if !available {
            log::debug!(
                target: "vectorize",
                "`{acc}` looks like a reduction, but `{op_name}` is missing"
            );
            return None;
        }
        log::debug!(target: "vectorize", "reduction into `{acc}` ({op:?})");
        Some(Reduction { op, stmt, operand, simd })
    }

    fn visit_if(&mut self, cond: Expr, has_else: bool, first_in_body: bool) -> CollectorResult {
        let result = self.classify(cond);
        if result.is_not_analyzed() {
            return CollectorResult::NotVectorizable;
        }
        if let Some(split) = self.take_pending_split() {
            return split;
        }
        if result.is_absolute_constant() && !self.func.at(cond).has_side_effects() {
            let static_result = fold::eval_bool(self.mcx.cx, self.func, cond);
            return CollectorResult::SplitInvariantIf { cond, static_result };
        }

        let is_comparison = matches!(
            self.func.at(cond).strip_parens_and_implicit_casts().def().kind,
            ExprKind::Binary(BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge, ..)
        );
        let guards_body = !has_else
            && first_in_body
            && self.nest == 0
            && self.sequential_scope.is_none()
            && !self.in_unrolled_if
            && self.guard.is_none()
            && self.info.mode != VectorizeMode::Unroll
            && is_comparison
            && !result.is_constant();
        if guards_body {
            CollectorResult::TransformGuardingIf
        } else {
            CollectorResult::UnrollVariantIf
        }
    }

    /// Collect both arms of the `if` statement `stmt`, tagging their uses,
    /// and joining their bindings afterwards.
    fn collect_if_arms(
        &mut self,
        stmt: Stmt,
        out: &mut Vec<TopLevelStmt>,
    ) -> Result<(), AnalyzeResult> {
        let StmtKind::If { then_stmt, else_stmt, .. } = self.func.stmts[stmt].kind else {
            return Err(AnalyzeResult::DontVectorize);
        };
        let before = self.info.live.snapshot();

        let previous = self.info.live.enter_branch(BranchTag { stmt, then: true });
        let then_children = self.func.at(then_stmt).compound_children().into_owned();
        let then_result = self.collect_stmts(&then_children, out);
        let then_bindings = self.info.live.snapshot();

        self.info.live.restore(before);
        self.info.live.enter_branch(BranchTag { stmt, then: false });
        let else_result = match else_stmt {
            Some(else_stmt) if then_result.is_ok() => {
                let else_children = self.func.at(else_stmt).compound_children().into_owned();
                self.collect_stmts(&else_children, out)
            }
            _ => Ok(()),
        };
        let else_bindings = self.info.live.snapshot();
        self.info.live.leave_branch(previous);

        then_result?;
        else_result?;
        self.info.live.merge_branches(then_bindings, else_bindings);
        Ok(())
    }

    fn collect_variant_if(
        &mut self,
        stmt: Stmt,
        out: &mut Vec<TopLevelStmt>,
    ) -> Result<(), AnalyzeResult> {
        let outermost = self.sequential_scope.is_none();
        if outermost {
            self.sequential_scope = Some(LvalueRefs::collect(self.mcx, self.func, stmt));
        }
        let was_unrolled = std::mem::replace(&mut self.in_unrolled_if, true);

        // Entries for the arms only matter for their analysis side effects, as
        // the whole `if` is emitted once per lane.
        let mut arms = vec![];
        let result = self.collect_if_arms(stmt, &mut arms);

        self.in_unrolled_if = was_unrolled;
        if outermost {
            self.sequential_scope = None;
        }
        result?;
        out.push(TopLevelStmt::Unroll { stmt });
        Ok(())
    }

    fn collect_guarding_if(
        &mut self,
        stmt: Stmt,
        out: &mut Vec<TopLevelStmt>,
    ) -> Result<(), AnalyzeResult> {
        self.sequential_scope = Some(LvalueRefs::collect(self.mcx, self.func, stmt));
        let reductions_before: FxHashSet<MemRegion> =
            self.info.reductions.keys().copied().collect();

        let mut body = vec![];
        let result = self.collect_if_arms(stmt, &mut body);
        self.sequential_scope = None;
        result?;

        if self.is_blendable(stmt, &body) {
            log::debug!(target: "vectorize", "guarding `if` turned into a mask");
            self.guard = Some(stmt);
            out.push(TopLevelStmt::Guarded { stmt, body });
        } else {
            log::debug!(target: "vectorize", "guarding `if` can't be masked, unrolling it");
            self.info.reductions.retain(|region, _| reductions_before.contains(region));
            out.push(TopLevelStmt::Unroll { stmt });
        }
        Ok(())
    }

    /// Whether every statement guarded by the `if` statement `stmt` can be
    /// emitted as a blend between its new and old value: reductions, and
    /// unit-stride stores, of the same element type as the condition, whose
    /// values are safe to compute in lanes where the condition is false.
    fn is_blendable(&self, stmt: Stmt, body: &[TopLevelStmt]) -> bool {
        let StmtKind::If { cond, .. } = self.func.stmts[stmt].kind else {
            return false;
        };
        let ExprKind::Binary(_, a, _) =
            self.func.at(cond).strip_parens_and_implicit_casts().def().kind
        else {
            return false;
        };
        let Some(cond_elem) = self.mcx.cx[self.func.exprs[a].ty].kind.scalar() else {
            return false;
        };

        !body.is_empty()
            && body.iter().all(|entry| match *entry {
                TopLevelStmt::Vectorize { stmt, simd } if simd.elem == cond_elem => {
                    let StmtKind::Expr(assign) = self.func.stmts[stmt].kind else {
                        return false;
                    };
                    let ExprKind::Assign { lhs, rhs, .. } = self.func.exprs[assign].kind else {
                        return false;
                    };
                    let Some(&region) =
                        self.info.lvalue_regions.get(&strip_parens(self.func, lhs))
                    else {
                        return false;
                    };
                    let is_reduction =
                        self.info.reductions.get(&region).is_some_and(|r| r.stmt == stmt);
                    (is_reduction || self.is_unit_stride(region)) && self.is_speculatable(rhs)
                }
                _ => false,
            })
    }

    fn is_unit_stride(&self, region: MemRegion) -> bool {
        let identity = &self.info.live.def(region).identity;
        identity.kind == StrideKind::Stride1 && identity.stride.is_none()
    }

    /// Whether `expr` can be evaluated in a lane the original loop wouldn't
    /// evaluate it in: no side effects, no integer division (which may trap
    /// on a zero divisor), and only reading memory the vector loop reads in
    /// every lane anyway (unit-stride accesses, or plain variables).
    fn is_speculatable(&self, expr: Expr) -> bool {
        let cx = self.mcx.cx;
        let def = &self.func.exprs[expr];
        match def.kind {
            ExprKind::IntLit(_)
            | ExprKind::FloatLit(_)
            | ExprKind::EnumConst { .. }
            | ExprKind::SizeOf(_)
            | ExprKind::Var(_)
            | ExprKind::GlobalVar(_) => true,

            ExprKind::Binary(BinOp::Div | BinOp::Rem, ..)
                if !cx[def.ty].kind.scalar().is_some_and(|scalar| scalar.is_float()) =>
            {
                false
            }
            ExprKind::Binary(_, a, b) => self.is_speculatable(a) && self.is_speculatable(b),
            ExprKind::Unary(UnOp::Plus | UnOp::Neg | UnOp::Not | UnOp::BitNot, operand)
            | ExprKind::Cast { operand, .. }
            | ExprKind::Paren(operand)
            | ExprKind::Member { base: operand, arrow: false, .. } => {
                self.is_speculatable(operand)
            }
            ExprKind::Cond { cond, then_expr, else_expr } => {
                self.is_speculatable(cond)
                    && self.is_speculatable(then_expr)
                    && self.is_speculatable(else_expr)
            }

            ExprKind::Index { .. }
            | ExprKind::Member { arrow: true, .. }
            | ExprKind::Unary(UnOp::Deref, _) => self
                .info
                .lvalue_regions
                .get(&expr)
                .is_some_and(|&region| self.is_unit_stride(region)),

            // Side effects, or memory accesses the loop can't see.
            ExprKind::Unary(..)
            | ExprKind::Assign { .. }
            | ExprKind::Call { .. }
            | ExprKind::Comma(..)
            | ExprKind::Func(_)
            | ExprKind::Intrinsic { .. } => false,
        }
    }

    /// Check the header of a nested `for`, which must run the same iterations
    /// in every lane (its variable becoming an "inner loop variable").
    fn visit_nested_for(&mut self, stmt: Stmt) -> CollectorResult {
        let StmtKind::For { init, cond, step, body } = self.func.stmts[stmt].kind else {
            return CollectorResult::NotVectorizable;
        };

        let header = match init.map(|init| &self.func.stmts[init].kind) {
            Some(&StmtKind::Expr(init)) => match self.func.exprs[init].kind {
                ExprKind::Assign { op: None, lhs, rhs } => {
                    self.func.at(lhs).as_var().zip(Some(rhs))
                }
                _ => None,
            },
            Some(StmtKind::Decl(decls)) => match decls[..] {
                [LocalDecl { var, init: Some(start) }] => Some((var, start)),
                _ => None,
            },
            _ => None,
        };
        let Some((var, start)) = header else {
            return self.reject(stmt, "nested loop must initialize a single loop variable");
        };
        if var == self.info.counted.var {
            return self.reject(stmt, "nested loop reuses the vectorized loop's variable");
        }
        if !self.classify(start).is_constant() {
            return self.reject(start, "nested loop start differs between lanes");
        }
        self.info.inner_loop_vars.insert(var);

        let Some(cond) = cond else {
            return self.reject(stmt, "nested loop without condition");
        };
        if !self.classify(cond).is_constant() {
            return self.reject(cond, "nested loop condition differs between lanes");
        }

        let step_ok = step.is_some_and(|step| match self.func.exprs[step].kind {
            ExprKind::Unary(op, operand) if op.is_inc_dec() => {
                self.func.at(operand).as_var() == Some(var)
            }
            ExprKind::Assign { lhs, rhs, .. } => {
                self.func.at(lhs).as_var() == Some(var) && !self.func.at(rhs).has_side_effects()
            }
            _ => false,
        });
        if !step_ok {
            return self.reject(stmt, "nested loop step must only update its loop variable");
        }
        if let Some(step) = step
            && let ExprKind::Assign { rhs, .. } = self.func.exprs[step].kind
            && !self.classify(rhs).is_constant()
        {
            return self.reject(step, "nested loop step differs between lanes");
        }
        if vars_changed_in(self.func, body).contains(&var) {
            return self.reject(stmt, "nested loop variable is modified in its body");
        }
        CollectorResult::DiveInLoop
    }

    fn collect_nested_loop(
        &mut self,
        stmt: Stmt,
        out: &mut Vec<TopLevelStmt>,
    ) -> Result<(), AnalyzeResult> {
        let StmtKind::For { body, .. } = self.func.stmts[stmt].kind else {
            return Err(AnalyzeResult::DontVectorize);
        };
        let before = self.info.live.snapshot();
        let children = self.func.at(body).compound_children().into_owned();

        self.nest += 1;
        let mut entries = vec![];
        let result = self.collect_stmts(&children, &mut entries);
        self.nest -= 1;
        result?;

        self.info.live.merge_loop_exit(&before);
        out.push(TopLevelStmt::Loop { stmt, body: entries });
        Ok(())
    }

    /// Find two accesses through the same array (or pointer) that could
    /// alias across iterations, e.g. writing `a[i]` and reading `a[i + 1]`.
    fn find_memory_dependency(&self) -> Option<(Expr, StorageRoot)> {
        let cx = self.mcx.cx;
        let indirect: Vec<_> = self
            .info
            .live
            .regions()
            .filter(|(_, def)| {
                let lvalue_kind = &self.func.exprs[def.lvalue].kind;
                !matches!(lvalue_kind, ExprKind::Var(_) | ExprKind::GlobalVar(_))
                    && !matches!(cx[def.ty].kind, TypeKind::Array { .. })
                    && def.root.is_some()
                    && !def.uses.is_empty()
            })
            .collect();
        for &(region, def) in &indirect {
            if !self.info.live.is_written(&def.key) {
                continue;
            }
            let conflict = indirect.iter().find(|&&(other_region, other)| {
                other_region != region
                    && other.root == def.root
                    && (!def.identity.is_constant() || !other.identity.is_constant())
            });
            if conflict.is_some() {
                return def.root.map(|root| (def.lvalue, root));
            }
        }
        None
    }
}

fn has_vector_entries(entries: &[TopLevelStmt]) -> bool {
    entries.iter().any(|entry| match entry {
        TopLevelStmt::Vectorize { .. } | TopLevelStmt::Guarded { .. } => true,
        TopLevelStmt::Loop { body, .. } => has_vector_entries(body),
        TopLevelStmt::ForceUnroll { .. } | TopLevelStmt::Unroll { .. } => false,
    })
}

pub(super) fn reduction_op_name(op: ReductionOp) -> &'static str {
    match op {
        ReductionOp::Add => ops::ADD,
        ReductionOp::Sub => ops::SUB,
        ReductionOp::Mul => ops::MUL,
        ReductionOp::Min => ops::MIN,
        ReductionOp::Max => ops::MAX,
    }
}

/// `x REL y ? then : else` as `min(x, y)`/`max(x, y)`, given the keys of
/// `[x, y, then, else]`.
pub(super) fn minmax_op(
    rel: BinOp,
    [x, y, then_key, else_key]: [String; 4],
) -> Option<&'static str> {
    let lt = match rel {
        BinOp::Lt | BinOp::Le => true,
        BinOp::Gt | BinOp::Ge => false,
        _ => return None,
    };
    if then_key == x && else_key == y {
        Some(if lt { ops::MIN } else { ops::MAX })
    } else if then_key == y && else_key == x {
        Some(if lt { ops::MAX } else { ops::MIN })
    } else {
        None
    }
}

/// Rewrite `lhs op= rhs` into `lhs = lhs op rhs`, and statements `x++;` (and
/// the other increments/decrements) into `x = x + 1;`, throughout `stmt`.
///
/// Only lvalues without side effects are expanded (as they get duplicated).
/// Returns the replaced definitions, for [`undo_expansion`].
pub(super) fn expand_compound_assignments(
    cx: &Context,
    func: &mut FuncDefBody,
    stmt: Stmt,
) -> Vec<(Expr, ExprDef)> {
    #[derive(Default)]
    struct Candidates {
        compound: Vec<Expr>,
        inc_dec: Vec<Expr>,
    }
    impl<'a> Visitor<'a> for Candidates {
        fn visit_stmt_use(&mut self, func_at_stmt: FuncAt<'a, Stmt>) {
            if let StmtKind::Expr(expr) = func_at_stmt.def().kind {
                let expr = func_at_stmt.at(expr).strip_parens_and_implicit_casts();
                if let ExprKind::Unary(op, lvalue) = expr.def().kind
                    && op.is_inc_dec()
                    && !expr.at(lvalue).has_side_effects()
                {
                    self.inc_dec.push(expr.position);
                }
            }
            func_at_stmt.inner_visit_with(self);
        }
        fn visit_expr_use(&mut self, func_at_expr: FuncAt<'a, Expr>) {
            if let ExprKind::Assign { op: Some(_), lhs, .. } = func_at_expr.def().kind
                && !func_at_expr.at(lhs).has_side_effects()
            {
                self.compound.push(func_at_expr.position);
            }
            func_at_expr.inner_visit_with(self);
        }
    }
    let mut candidates = Candidates::default();
    candidates.visit_stmt_use(func.at(stmt));

    let mut replaced = Vec::with_capacity(candidates.compound.len() + candidates.inc_dec.len());
    for expr in candidates.compound {
        let ExprKind::Assign { op: Some(op), lhs, rhs } = func.exprs[expr].kind else {
            continue;
        };
        let old = func.deep_clone_expr(lhs, &mut crate::transform::NoTransform);
        let value = func.new_compound_value(cx, op, old, rhs);
        let new_def = ExprDef {
            ty: func.exprs[expr].ty,
            kind: ExprKind::Assign { op: None, lhs, rhs: value },
        };
        replaced.push((expr, std::mem::replace(&mut func.exprs[expr], new_def)));
    }

    for expr in candidates.inc_dec {
        let ExprKind::Unary(op, lhs) = func.exprs[expr].kind else {
            continue;
        };
        let ty = func.exprs[lhs].ty;
        let one = match cx[ty].kind {
            TypeKind::Scalar(_) => fold::new_const(func, cx, ty, Const::Int(1)),
            _ => {
                let int = cx.intern(TypeKind::Scalar(crate::ScalarType::Int));
                func.new_expr(int, ExprKind::IntLit(1))
            }
        };
        let bin_op = match op {
            UnOp::PreInc | UnOp::PostInc => BinOp::Add,
            _ => BinOp::Sub,
        };
        let old = func.deep_clone_expr(lhs, &mut crate::transform::NoTransform);
        let value = func.new_expr(ty, ExprKind::Binary(bin_op, old, one));
        let new_def = ExprDef { ty, kind: ExprKind::Assign { op: None, lhs, rhs: value } };
        replaced.push((expr, std::mem::replace(&mut func.exprs[expr], new_def)));
    }
    replaced
}

/// Restore the definitions replaced by [`expand_compound_assignments`], for
/// loops left as they were.
pub(super) fn undo_expansion(func: &mut FuncDefBody, replaced: Vec<(Expr, ExprDef)>) {
    for (expr, old_def) in replaced.into_iter().rev() {
        func.exprs[expr] = old_def;
    }
}
