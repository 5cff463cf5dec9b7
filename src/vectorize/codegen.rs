//! Vector code generation, from the [`TopLevelStmt`]s of an analyzed loop.
//!
//! The loop is replaced (keeping its handle) with a block holding, in order:
//! - the loop variable's declaration (for `for (int i = ...; ...)`)
//! - declarations of vector temporaries, hoisted splats and gather indices,
//!   and reduction accumulators
//! - the vector loop, advancing by the vector width, while a whole vector of
//!   iterations remains
//! - horizontal reductions of the accumulators
//! - the original loop (minus its `init`) as the scalar tail
//!
//! Nothing is modified until the whole vector loop has been generated, so any
//! failure (i.e. a missing target operation) leaves the original loop intact.

use super::info::{ReductionOp, StrideKind, StridedExprResult, TopLevelStmt, VectorizeInfo};
use super::live::{MemRegion, RegionUsage};
use super::collect::{minmax_op, reduction_op_name};
use super::stride::strip_parens;
use crate::fold::{self, Const};
use crate::func_at::FuncAt;
use crate::intrinsics::{IntrinsicOracle, SimdType, ops};
use crate::pragma::StorageRoot;
use crate::print::structural_key;
use crate::transform::{NoTransform, Transformed, Transformer};
use crate::visit::Visitor;
use crate::{
    BinOp, Expr, ExprKind, FuncDefBody, LocalDecl, ModuleCx, ScalarType, Stmt, StmtDef,
    StmtKind, Type, TypeKind, UnOp, Var,
};
use smallvec::{SmallVec, smallvec};
use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum CodegenError {
    #[error("`{op}` is not available for `{simd}` vectors on this target")]
    MissingOp { op: String, simd: SimdType },

    #[error("{0}")]
    Unsupported(&'static str),

    /// Analysis and codegen disagree (never expected to happen).
    #[error("{0}")]
    Internal(&'static str),
}

type Result<T> = std::result::Result<T, CodegenError>;

/// State restored when falling back from vectorizing a single statement.
struct Checkpoint {
    temp_decls: usize,
    pre_loop: usize,
    invariants: usize,
    gs_indices: usize,
    stats: super::info::Statistics,
}

struct CodeGen<'a> {
    mcx: ModuleCx<'a>,
    oracle: &'a dyn IntrinsicOracle,
    info: &'a mut VectorizeInfo,
    width: u32,
    int_ty: Type,

    /// Uninitialized vector temporaries.
    temp_decls: SmallVec<[LocalDecl; 4]>,

    /// Initialized declarations ahead of the vector loop.
    pre_loop: Vec<Stmt>,

    post_loop: Vec<Stmt>,
}

/// Replace the analyzed loop with its vectorized form.
pub(super) fn generate(
    mcx: ModuleCx<'_>,
    func: &mut FuncDefBody,
    oracle: &dyn IntrinsicOracle,
    info: &mut VectorizeInfo,
) -> Result<()> {
    let Some(width) = info.width else {
        return Err(CodegenError::Unsupported("no vector width"));
    };
    let int_ty = mcx.cx.intern(TypeKind::Scalar(ScalarType::Int));
    let mut codegen = CodeGen {
        mcx,
        oracle,
        info,
        width,
        int_ty,
        temp_decls: SmallVec::new(),
        pre_loop: vec![],
        post_loop: vec![],
    };

    codegen.declare_temps(func)?;
    let top_level = std::mem::take(&mut codegen.info.top_level);
    let result = codegen.gen_entries(func, &top_level);
    codegen.info.top_level = top_level;
    let mut body = result?;
    body.extend(codegen.write_backs(func)?);
    codegen.replace_loop(func, body)
}

impl CodeGen<'_> {
    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            temp_decls: self.temp_decls.len(),
            pre_loop: self.pre_loop.len(),
            invariants: self.info.invariants.len(),
            gs_indices: self.info.gs_indices.len(),
            stats: self.info.stats,
        }
    }

    fn rollback(&mut self, checkpoint: Checkpoint) {
        self.temp_decls.truncate(checkpoint.temp_decls);
        self.pre_loop.truncate(checkpoint.pre_loop);
        self.info.invariants.truncate(checkpoint.invariants);
        self.info.gs_indices.truncate(checkpoint.gs_indices);
        self.info.stats = checkpoint.stats;
    }

    fn vector_type(&self, simd: SimdType) -> Result<Type> {
        self.oracle
            .element_storage_type(self.mcx.cx, simd)
            .ok_or_else(|| CodegenError::MissingOp { op: "type".into(), simd })
    }

    fn has_op(&self, op: &str, simd: SimdType) -> bool {
        self.oracle.resolve(self.mcx.cx, op, simd, None).is_some()
    }

    fn intrinsic(
        &self,
        func: &mut FuncDefBody,
        op: &str,
        simd: SimdType,
        lane: Option<u32>,
        ty: Type,
        args: impl IntoIterator<Item = Expr>,
    ) -> Result<Expr> {
        let intrinsic = self
            .oracle
            .resolve(self.mcx.cx, op, simd, lane)
            .ok_or_else(|| CodegenError::MissingOp { op: op.into(), simd })?;
        let args = args.into_iter().collect();
        Ok(func.new_expr(ty, ExprKind::Intrinsic { template: intrinsic.template, args }))
    }

    fn simd_of_var(&self, func: &FuncDefBody, var: Var) -> Result<SimdType> {
        match self.mcx.cx[func.vars[var].ty].kind {
            TypeKind::Simd { elem, width, .. } => Ok(SimdType { elem, width }),
            _ => Err(CodegenError::Internal("vector temporary without a vector type")),
        }
    }

    fn lane_index(&self, func: &mut FuncDefBody, lane: u32) -> Expr {
        func.new_expr(self.int_ty, ExprKind::IntLit(lane.into()))
    }

    fn extract(&self, func: &mut FuncDefBody, vector: Var, lane: u32) -> Result<Expr> {
        let simd = self.simd_of_var(func, vector)?;
        let elem_ty = self.mcx.cx.intern(TypeKind::Scalar(simd.elem));
        let vector = func.new_var_use(vector);
        let lane_index = self.lane_index(func, lane);
        self.intrinsic(func, ops::EXTRACT, simd, Some(lane), elem_ty, [vector, lane_index])
    }

    fn new_temp(&mut self, func: &mut FuncDefBody, simd: SimdType) -> Result<Var> {
        let ty = self.vector_type(simd)?;
        let var = func.new_artificial_var(self.mcx.cx, "__v", ty);
        self.temp_decls.push(LocalDecl { var, init: None });
        Ok(var)
    }

    fn new_initialized_temp(
        &mut self,
        func: &mut FuncDefBody,
        prefix: &str,
        ty: Type,
        init: Expr,
    ) -> Var {
        let var = func.new_artificial_var(self.mcx.cx, prefix, ty);
        let decl = func.new_stmt(StmtKind::Decl(smallvec![LocalDecl { var, init: Some(init) }]));
        self.pre_loop.push(decl);
        var
    }

    fn assign_stmt(&self, func: &mut FuncDefBody, lhs: Expr, rhs: Expr) -> Stmt {
        let assign = func.new_assign(lhs, rhs);
        func.new_expr_stmt(assign)
    }

    /// Vector temporaries for regions kept in registers, and accumulators
    /// (with their final horizontal reduction) for reductions.
    fn declare_temps(&mut self, func: &mut FuncDefBody) -> Result<()> {
        let regions: Vec<(MemRegion, RegionUsage, Type, Expr)> = self
            .info
            .live
            .regions()
            .map(|(region, def)| (region, def.usage, def.ty, def.lvalue))
            .collect();
        for (region, usage, ty, lvalue) in regions {
            match usage {
                RegionUsage::VectorTemp => {
                    let Some(elem) = self.mcx.cx[ty].kind.scalar() else {
                        return Err(CodegenError::Unsupported(
                            "only scalars can be kept in vector registers",
                        ));
                    };
                    let temp = self.new_temp(func, SimdType { elem, width: self.width })?;
                    self.info.temps.insert(region, temp);
                }
                RegionUsage::Reduction => {
                    let Some(reduction) = self.info.reductions.get(&region).copied() else {
                        continue;
                    };
                    let simd = reduction.simd;
                    let vec_ty = self.vector_type(simd)?;
                    let elem_ty = self.mcx.cx.intern(TypeKind::Scalar(simd.elem));
                    let initial = match reduction.op {
                        ReductionOp::Add | ReductionOp::Sub => {
                            fold::new_const(func, self.mcx.cx, elem_ty, Const::Int(0))
                        }
                        ReductionOp::Mul => {
                            fold::new_const(func, self.mcx.cx, elem_ty, Const::Int(1))
                        }
                        ReductionOp::Min | ReductionOp::Max => {
                            func.deep_clone_expr(lvalue, &mut NoTransform)
                        }
                    };
                    let init = self.intrinsic(func, ops::SPLAT, simd, None, vec_ty, [initial])?;
                    let acc = self.new_initialized_temp(func, "__v", vec_ty, init);
                    self.info.temps.insert(region, acc);
                    self.reduce_horizontally(func, reduction.op, lvalue, acc)?;
                }
                RegionUsage::InMemory | RegionUsage::Scalar => {}
            }
        }
        Ok(())
    }

    /// Fold the lanes of the accumulator `acc` into the scalar `lvalue`.
    fn reduce_horizontally(
        &mut self,
        func: &mut FuncDefBody,
        op: ReductionOp,
        lvalue: Expr,
        acc: Var,
    ) -> Result<()> {
        let ty = func.exprs[lvalue].ty;
        match op {
            ReductionOp::Add | ReductionOp::Sub | ReductionOp::Mul => {
                let bin_op = if op == ReductionOp::Mul { BinOp::Mul } else { BinOp::Add };
                let mut total = func.deep_clone_expr(lvalue, &mut NoTransform);
                for lane in 0..self.width {
                    let lane_value = self.extract(func, acc, lane)?;
                    total = func.new_expr(ty, ExprKind::Binary(bin_op, total, lane_value));
                }
                let lhs = func.deep_clone_expr(lvalue, &mut NoTransform);
                let stmt = self.assign_stmt(func, lhs, total);
                self.post_loop.push(stmt);
            }
            ReductionOp::Min | ReductionOp::Max => {
                let rel = if op == ReductionOp::Min { BinOp::Lt } else { BinOp::Gt };
                for lane in 0..self.width {
                    let [candidate, chosen] = [(); 2].map(|()| self.extract(func, acc, lane));
                    let (candidate, chosen) = (candidate?, chosen?);
                    let current = func.deep_clone_expr(lvalue, &mut NoTransform);
                    let kept = func.deep_clone_expr(lvalue, &mut NoTransform);
                    let cond =
                        func.new_expr(self.int_ty, ExprKind::Binary(rel, candidate, current));
                    let value = func.new_expr(
                        ty,
                        ExprKind::Cond { cond, then_expr: chosen, else_expr: kept },
                    );
                    let lhs = func.deep_clone_expr(lvalue, &mut NoTransform);
                    let stmt = self.assign_stmt(func, lhs, value);
                    self.post_loop.push(stmt);
                }
            }
        }
        Ok(())
    }

    fn gen_entries(
        &mut self,
        func: &mut FuncDefBody,
        entries: &[TopLevelStmt],
    ) -> Result<Vec<Stmt>> {
        let mut out = vec![];
        for entry in entries {
            match *entry {
                TopLevelStmt::Vectorize { stmt, simd } => {
                    let checkpoint = self.checkpoint();
                    match self.gen_vector_assign(func, stmt, simd) {
                        Ok(stmts) => out.extend(stmts),
                        Err(err) => {
                            log::debug!(target: "vectorize", "unrolling statement instead: {err}");
                            self.rollback(checkpoint);
                            out.extend(self.unroll_stmt(func, stmt)?);
                        }
                    }
                }
                TopLevelStmt::ForceUnroll { stmt } | TopLevelStmt::Unroll { stmt } => {
                    out.extend(self.unroll_stmt(func, stmt)?);
                }
                TopLevelStmt::Loop { stmt, ref body } => {
                    out.push(self.gen_nested_loop(func, stmt, body)?);
                }
                TopLevelStmt::Guarded { stmt, ref body } => {
                    let checkpoint = self.checkpoint();
                    match self.gen_guarded(func, stmt, body) {
                        Ok(stmts) => out.extend(stmts),
                        Err(err) => {
                            log::debug!(
                                target: "vectorize",
                                "unrolling guarding `if` instead: {err}"
                            );
                            self.rollback(checkpoint);
                            out.extend(self.unroll_stmt(func, stmt)?);
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    /// The parts of the assignment statement `stmt`, and the region it writes.
    fn assignment(&self, func: &FuncDefBody, stmt: Stmt) -> Result<(Expr, Expr, MemRegion)> {
        let bad = CodegenError::Unsupported("expected an assignment statement");
        let StmtKind::Expr(assign) = func.stmts[stmt].kind else {
            return Err(bad);
        };
        let ExprKind::Assign { op: None, lhs, rhs } = func.exprs[assign].kind else {
            return Err(bad);
        };
        let lhs = strip_parens(func, lhs);
        let region = self.info.lvalue_regions.get(&lhs).copied().ok_or(bad)?;
        Ok((lhs, rhs, region))
    }

    fn gen_vector_assign(
        &mut self,
        func: &mut FuncDefBody,
        stmt: Stmt,
        simd: SimdType,
    ) -> Result<Vec<Stmt>> {
        let (lhs, rhs, region) = self.assignment(func, stmt)?;
        let def = self.info.live.def(region);
        let (usage, identity, root) = (def.usage, def.identity.clone(), def.root);
        let vec_ty = self.vector_type(simd)?;

        match usage {
            RegionUsage::Reduction => {
                let reduction = self.info.reductions.get(&region).copied();
                let (Some(reduction), Some(&acc)) = (reduction, self.info.temps.get(&region))
                else {
                    return Err(CodegenError::Unsupported("reduction without an accumulator"));
                };
                let value = self.vexpr(func, reduction.operand, simd)?;
                let acc_use = func.new_var_use(acc);
                let combined = self.intrinsic(
                    func,
                    reduction_op_name(reduction.op),
                    simd,
                    None,
                    vec_ty,
                    [acc_use, value],
                )?;
                self.info.stats.packed_ops += 1;
                let acc_lhs = func.new_var_use(acc);
                Ok(vec![self.assign_stmt(func, acc_lhs, combined)])
            }
            RegionUsage::VectorTemp => {
                let Some(&temp) = self.info.temps.get(&region) else {
                    return Err(CodegenError::Internal("vector temporary missing"));
                };
                let value = self.vexpr(func, rhs, simd)?;
                let temp_lhs = func.new_var_use(temp);
                Ok(vec![self.assign_stmt(func, temp_lhs, value)])
            }
            RegionUsage::InMemory | RegionUsage::Scalar => {
                let value = self.vexpr(func, rhs, simd)?;
                self.store(func, lhs, &identity, root, simd, value)
            }
        }
    }

    fn is_aligned(&self, func: &FuncDefBody, root: Option<StorageRoot>, simd: SimdType) -> bool {
        let Some(root) = root else {
            return false;
        };
        if !self.info.aligned.contains(&root) {
            return false;
        }
        // Aligned accesses need the first vector iteration to start aligned.
        let start = fold::eval_int(self.mcx.cx, func, self.info.counted.start);
        match (start, self.oracle.byte_alignment(simd)) {
            (Some(start), Some(alignment)) if alignment > 0 => {
                (start * i64::from(simd.elem.byte_size())) % i64::from(alignment) == 0
            }
            _ => true,
        }
    }

    fn store(
        &mut self,
        func: &mut FuncDefBody,
        lhs: Expr,
        identity: &StridedExprResult,
        root: Option<StorageRoot>,
        simd: SimdType,
        value: Expr,
    ) -> Result<Vec<Stmt>> {
        let void = self.mcx.cx.intern(TypeKind::Void);
        let elem_matches = self.mcx.cx[func.exprs[lhs].ty].kind.scalar() == Some(simd.elem);
        if identity.kind == StrideKind::Stride1 && elem_matches {
            match &identity.stride {
                None => {
                    let op = if root.is_some_and(|root| self.info.nontemporal.contains(&root)) {
                        ops::STORE_NT
                    } else if self.is_aligned(func, root, simd) {
                        ops::STORE_ALIGNED
                    } else {
                        ops::STORE_UNALIGNED
                    };
                    if self.has_op(op, simd) {
                        let address = self.lane0_address(func, lhs)?;
                        let store = self.intrinsic(func, op, simd, None, void, [address, value])?;
                        self.info.stats.stores += 1;
                        return Ok(vec![func.new_expr_stmt(store)]);
                    }
                }
                Some(stride) if self.can_gather_scatter(ops::SCATTER, simd) => {
                    let indices = self.gs_index(func, simd, stride)?;
                    let address = self.lane0_address(func, lhs)?;
                    let scatter = self.intrinsic(
                        func,
                        ops::SCATTER,
                        simd,
                        None,
                        void,
                        [address, indices, value],
                    )?;
                    self.info.stats.stores += 1;
                    return Ok(vec![func.new_expr_stmt(scatter)]);
                }
                Some(_) => {}
            }
        }

        // Store lane by lane, from a temporary holding the whole vector.
        let temp = self.new_temp(func, simd)?;
        let temp_lhs = func.new_var_use(temp);
        let mut stmts = vec![self.assign_stmt(func, temp_lhs, value)];
        for lane in 0..self.width {
            let lane_lhs = self.lane_clone_expr(func, lhs, lane)?;
            let lane_value = self.extract(func, temp, lane)?;
            stmts.push(self.assign_stmt(func, lane_lhs, lane_value));
        }
        Ok(stmts)
    }

    fn can_gather_scatter(&self, op: &str, simd: SimdType) -> bool {
        self.has_op(op, simd)
            && self.has_op(ops::GET_UNIFORM_GS_INDEX, simd)
            && self.oracle.gs_index_type(self.mcx.cx, simd).is_some()
    }

    /// `&lvalue` for the first lane.
    fn lane0_address(&mut self, func: &mut FuncDefBody, lvalue: Expr) -> Result<Expr> {
        let lane0 = self.lane_clone_expr(func, lvalue, 0)?;
        let ptr_ty = self.mcx.cx.intern(TypeKind::Ptr(func.exprs[lvalue].ty));
        Ok(func.new_addr_of(ptr_ty, lane0))
    }

    /// The distance between consecutive lanes' elements, as an expression.
    fn stride_expr(&self, func: &mut FuncDefBody, stride: &super::info::Stride) -> Expr {
        let cx = self.mcx.cx;
        let mut terms: SmallVec<[Expr; 2]> = SmallVec::new();
        for &(term, factor) in &stride.terms {
            let term = func.deep_clone_expr(term, &mut NoTransform);
            terms.push(if factor == 1 {
                term
            } else {
                let factor = func.new_expr(self.int_ty, ExprKind::IntLit(factor));
                func.new_expr(self.int_ty, ExprKind::Binary(BinOp::Mul, factor, term))
            });
        }
        if stride.constant != 0 || terms.is_empty() {
            terms.push(func.new_expr(self.int_ty, ExprKind::IntLit(stride.constant)));
        }
        let mut terms = terms.into_iter();
        let first = terms.next().unwrap_or_else(|| func.new_expr(self.int_ty, ExprKind::IntLit(0)));
        let distance = terms.fold(first, |sum, term| {
            func.new_expr(self.int_ty, ExprKind::Binary(BinOp::Add, sum, term))
        });
        fold::fold_expr_in_place(cx, func, distance);
        distance
    }

    /// Index vector for gathering/scattering with `stride`, hoisted out of
    /// the loop (and shared by all accesses with the same distance).
    fn gs_index(
        &mut self,
        func: &mut FuncDefBody,
        simd: SimdType,
        stride: &super::info::Stride,
    ) -> Result<Expr> {
        let Some(index_ty) = self.oracle.gs_index_type(self.mcx.cx, simd) else {
            return Err(CodegenError::MissingOp { op: "gs_index_type".into(), simd });
        };
        let distance = self.stride_expr(func, stride);
        let key = (simd, structural_key(self.mcx, func, distance));
        if let Some(&var) = self.info.gs_indices.get(&key) {
            return Ok(func.new_var_use(var));
        }
        let init =
            self.intrinsic(func, ops::GET_UNIFORM_GS_INDEX, simd, None, index_ty, [distance])?;
        let var = self.new_initialized_temp(func, "__gs", index_ty, init);
        self.info.gs_indices.insert(key, var);
        Ok(func.new_var_use(var))
    }

    /// Vector value of `expr`, in lanes of `simd`.
    fn vexpr(&mut self, func: &mut FuncDefBody, expr: Expr, simd: SimdType) -> Result<Expr> {
        let cx = self.mcx.cx;
        let expr = strip_parens(func, expr);
        let vec_ty = self.vector_type(simd)?;

        if let Some(temp) = self.vector_temp_of(func, expr) {
            return Ok(func.new_var_use(temp));
        }
        let Some(result) = self.info.results.get(&expr).cloned() else {
            return self.lanewise(func, expr, simd);
        };
        let mapped_call = self.mapped_call(func, expr, simd);
        if result.is_constant() && mapped_call.is_none() {
            return self.splat(func, expr, simd, &result);
        }
        if cx[func.exprs[expr].ty].kind.scalar() != Some(simd.elem) {
            return self.lanewise(func, expr, simd);
        }

        let binary_op = |op: BinOp| match op {
            BinOp::Add => Some(ops::ADD),
            BinOp::Sub => Some(ops::SUB),
            BinOp::Mul => Some(ops::MUL),
            BinOp::Div => Some(ops::DIV),
            _ => None,
        };
        let vector = match func.exprs[expr].kind {
            ExprKind::Var(_)
            | ExprKind::GlobalVar(_)
            | ExprKind::Index { .. }
            | ExprKind::Member { .. }
            | ExprKind::Unary(UnOp::Deref, _) => return self.vload(func, expr, simd),
            ExprKind::Unary(UnOp::Plus, operand) => return self.vexpr(func, operand, simd),
            ExprKind::Cast { operand, .. }
                if cx[func.exprs[operand].ty].kind.scalar() == Some(simd.elem) =>
            {
                return self.vexpr(func, operand, simd);
            }

            ExprKind::Unary(UnOp::Neg, operand) if self.has_op(ops::NEG, simd) => {
                let operand = self.vexpr(func, operand, simd)?;
                Some(self.intrinsic(func, ops::NEG, simd, None, vec_ty, [operand])?)
            }
            ExprKind::Binary(op, a, b) => match binary_op(op) {
                Some(op) if self.has_op(op, simd) => {
                    let a = self.vexpr(func, a, simd)?;
                    let b = self.vexpr(func, b, simd)?;
                    Some(self.intrinsic(func, op, simd, None, vec_ty, [a, b])?)
                }
                _ => None,
            },
            ExprKind::Cond { cond, then_expr, else_expr } => {
                self.vcond(func, cond, then_expr, else_expr, simd)?
            }
            ExprKind::Call { .. } => match mapped_call {
                Some((name, args)) => {
                    let mut vector_args = SmallVec::<[Expr; 4]>::new();
                    for arg in args {
                        vector_args.push(self.vexpr(func, arg, simd)?);
                    }
                    Some(self.intrinsic(func, &name, simd, None, vec_ty, vector_args)?)
                }
                None => None,
            },
            _ => None,
        };
        match vector {
            Some(vector) => {
                self.info.stats.packed_ops += 1;
                Ok(vector)
            }
            None => self.lanewise(func, expr, simd),
        }
    }

    /// `min`/`max`, or a lanewise select, for `a REL b ? then : else`.
    fn vcond(
        &mut self,
        func: &mut FuncDefBody,
        cond: Expr,
        then_expr: Expr,
        else_expr: Expr,
        simd: SimdType,
    ) -> Result<Option<Expr>> {
        let cx = self.mcx.cx;
        let vec_ty = self.vector_type(simd)?;
        let ExprKind::Binary(rel, a, b) = func.at(cond).strip_parens_and_implicit_casts().def().kind
        else {
            return Ok(None);
        };
        if cx[func.exprs[a].ty].kind.scalar() != Some(simd.elem) {
            return Ok(None);
        }

        let keys = [a, b, then_expr, else_expr].map(|expr| {
            let expr = func.at(expr).strip_parens_and_implicit_casts().position;
            structural_key(self.mcx, func, expr)
        });
        if let Some(op) = minmax_op(rel, keys)
            && self.has_op(op, simd)
        {
            let a = self.vexpr(func, a, simd)?;
            let b = self.vexpr(func, b, simd)?;
            return Ok(Some(self.intrinsic(func, op, simd, None, vec_ty, [a, b])?));
        }

        let Some(op) = condition_op(rel) else {
            return Ok(None);
        };
        if !self.has_op(op, simd) {
            return Ok(None);
        }
        let args = [a, b, then_expr, else_expr];
        let mut vector_args = SmallVec::<[Expr; 4]>::new();
        for arg in args {
            vector_args.push(self.vexpr(func, arg, simd)?);
        }
        Ok(Some(self.intrinsic(func, op, simd, None, vec_ty, vector_args)?))
    }

    /// The name and arguments of a call to a function with a vector version.
    fn mapped_call(
        &self,
        func: &FuncDefBody,
        expr: Expr,
        simd: SimdType,
    ) -> Option<(String, SmallVec<[Expr; 4]>)> {
        let cx = self.mcx.cx;
        let ExprKind::Call { callee, ref args } = func.exprs[expr].kind else {
            return None;
        };
        let ExprKind::Func(callee) = func.at(callee).strip_parens_and_implicit_casts().def().kind
        else {
            return None;
        };
        let name = &cx[self.mcx.funcs[callee].name];
        if ops::arity(name).is_some() || self.oracle.resolve(cx, name, simd, None).is_none() {
            return None;
        }
        Some((name.to_string(), args.clone()))
    }

    fn vload(&mut self, func: &mut FuncDefBody, expr: Expr, simd: SimdType) -> Result<Expr> {
        let Some(&region) = self.info.lvalue_regions.get(&expr) else {
            return self.lanewise(func, expr, simd);
        };
        let def = self.info.live.def(region);
        let (identity, root) = (def.identity.clone(), def.root);
        let vec_ty = self.vector_type(simd)?;
        if identity.kind != StrideKind::Stride1 {
            return self.lanewise(func, expr, simd);
        }
        match &identity.stride {
            None => {
                let aligned =
                    self.is_aligned(func, root, simd) && self.has_op(ops::LOAD_ALIGNED, simd);
                let op = if aligned {
                    ops::LOAD_ALIGNED
                } else {
                    ops::LOAD_UNALIGNED
                };
                if !self.has_op(op, simd) {
                    return self.lanewise(func, expr, simd);
                }
                let address = self.lane0_address(func, expr)?;
                self.info.stats.loads += 1;
                self.intrinsic(func, op, simd, None, vec_ty, [address])
            }
            Some(stride) if self.can_gather_scatter(ops::GATHER, simd) => {
                let indices = self.gs_index(func, simd, stride)?;
                let address = self.lane0_address(func, expr)?;
                self.info.stats.loads += 1;
                self.intrinsic(func, ops::GATHER, simd, None, vec_ty, [address, indices])
            }
            Some(_) => self.lanewise(func, expr, simd),
        }
    }

    /// Whether `expr` can be computed once, ahead of the loop.
    fn is_hoistable(&self, func: &FuncDefBody, expr: Expr, result: &StridedExprResult) -> bool {
        struct LoopStateFinder<'a> {
            mcx: ModuleCx<'a>,
            func: &'a FuncDefBody,
            info: &'a VectorizeInfo,
            found: bool,
        }
        impl<'a> Visitor<'a> for LoopStateFinder<'_> {
            fn visit_expr_use(&mut self, func_at_expr: FuncAt<'a, Expr>) {
                match func_at_expr.def().kind {
                    ExprKind::Var(var)
                        if var == self.info.counted.var
                            || self.info.inner_loop_vars.contains(&var) =>
                    {
                        self.found = true;
                    }
                    ExprKind::Var(_)
                    | ExprKind::GlobalVar(_)
                    | ExprKind::Index { .. }
                    | ExprKind::Member { .. }
                    | ExprKind::Unary(UnOp::Deref, _) => {
                        let key = structural_key(self.mcx, self.func, func_at_expr.position);
                        self.found |= self.info.live.is_written(&key);
                    }
                    _ => {}
                }
                func_at_expr.inner_visit_with(self);
            }
        }

        if !result.is_absolute_constant() || func.at(expr).has_side_effects() {
            return false;
        }
        let mut finder = LoopStateFinder { mcx: self.mcx, func, info: self.info, found: false };
        finder.visit_expr_use(func.at(expr));
        !finder.found
    }

    /// The same value in every lane.
    fn splat(
        &mut self,
        func: &mut FuncDefBody,
        expr: Expr,
        simd: SimdType,
        result: &StridedExprResult,
    ) -> Result<Expr> {
        let vec_ty = self.vector_type(simd)?;
        if self.is_hoistable(func, expr, result) {
            let key = (simd, structural_key(self.mcx, func, expr));
            if let Some(&var) = self.info.invariants.get(&key) {
                return Ok(func.new_var_use(var));
            }
            let scalar = func.deep_clone_expr(expr, &mut NoTransform);
            fold::fold_expr_in_place(self.mcx.cx, func, scalar);
            let init = self.intrinsic(func, ops::SPLAT, simd, None, vec_ty, [scalar])?;
            let var = self.new_initialized_temp(func, "__v", vec_ty, init);
            self.info.invariants.insert(key, var);
            return Ok(func.new_var_use(var));
        }
        let scalar = self.lane_clone_expr(func, expr, 0)?;
        self.intrinsic(func, ops::SPLAT, simd, None, vec_ty, [scalar])
    }

    /// Build the vector from per-lane copies of `expr`.
    fn lanewise(&mut self, func: &mut FuncDefBody, expr: Expr, simd: SimdType) -> Result<Expr> {
        let vec_ty = self.vector_type(simd)?;
        if !self.has_op(ops::SET, simd) {
            return Err(CodegenError::MissingOp { op: ops::SET.into(), simd });
        }
        let mut lanes = SmallVec::<[Expr; 4]>::new();
        for lane in 0..self.width {
            lanes.push(self.lane_clone_expr(func, expr, lane)?);
        }
        self.intrinsic(func, ops::SET, simd, None, vec_ty, lanes)
    }

    /// The vector temporary holding the region `lvalue` designates, if any.
    fn vector_temp_of(&self, func: &FuncDefBody, lvalue: Expr) -> Option<Var> {
        let region = *self.info.lvalue_regions.get(&strip_parens(func, lvalue))?;
        if self.info.live.def(region).usage != RegionUsage::VectorTemp {
            return None;
        }
        self.info.temps.get(&region).copied()
    }

    /// Substitution for `expr` in the copy of an expression for `lane`.
    fn lane_substitute(
        &mut self,
        func: &mut FuncDefBody,
        expr: Expr,
        lane: u32,
    ) -> Result<Option<Expr>> {
        let cx = self.mcx.cx;
        match func.exprs[expr].kind {
            ExprKind::Var(var) if var == self.info.counted.var => {
                let var_use = func.new_var_use(var);
                if lane == 0 {
                    return Ok(Some(var_use));
                }
                let ty = func.vars[var].ty;
                let offset = fold::new_const(func, cx, ty, Const::Int(lane.into()));
                Ok(Some(func.new_expr(ty, ExprKind::Binary(BinOp::Add, var_use, offset))))
            }

            // Writes to a register-resident region update one of its lanes.
            ExprKind::Assign { op, lhs, rhs } => {
                let Some(temp) = self.vector_temp_of(func, lhs) else {
                    return Ok(None);
                };
                let simd = self.simd_of_var(func, temp)?;
                let mut value = self.lane_clone_expr(func, rhs, lane)?;
                if let Some(op) = op {
                    let old = self.extract(func, temp, lane)?;
                    value = func.new_compound_value(cx, op, old, value);
                }
                let vec_ty = func.vars[temp].ty;
                let temp_use = func.new_var_use(temp);
                let lane_index = self.lane_index(func, lane);
                let inserted = self.intrinsic(
                    func,
                    ops::INSERT,
                    simd,
                    Some(lane),
                    vec_ty,
                    [temp_use, value, lane_index],
                )?;
                let temp_lhs = func.new_var_use(temp);
                Ok(Some(func.new_assign(temp_lhs, inserted)))
            }
            ExprKind::Unary(
                UnOp::AddrOf | UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec,
                operand,
            ) if self.vector_temp_of(func, operand).is_some() =>
            {
                Err(CodegenError::Unsupported("value kept in a vector register used as an lvalue"))
            }

            ExprKind::Var(_)
            | ExprKind::GlobalVar(_)
            | ExprKind::Index { .. }
            | ExprKind::Member { .. }
            | ExprKind::Unary(UnOp::Deref, _) => match self.vector_temp_of(func, expr) {
                Some(temp) => Ok(Some(self.extract(func, temp, lane)?)),
                None => Ok(None),
            },
            _ => Ok(None),
        }
    }

    /// Copy of `expr` computing the value for `lane` (i.e. iteration `i + lane`).
    fn lane_clone_expr(&mut self, func: &mut FuncDefBody, expr: Expr, lane: u32) -> Result<Expr> {
        let mut transformer = LaneTransformer { codegen: self, lane, error: None };
        let clone = func.deep_clone_expr(expr, &mut transformer);
        if let Some(err) = transformer.error {
            return Err(err);
        }
        fold::fold_expr_in_place(self.mcx.cx, func, clone);
        Ok(clone)
    }

    fn lane_clone_stmt(&mut self, func: &mut FuncDefBody, stmt: Stmt, lane: u32) -> Result<Stmt> {
        let mut transformer = LaneTransformer { codegen: self, lane, error: None };
        let clone = func.deep_clone_stmt(stmt, &mut transformer);
        if let Some(err) = transformer.error {
            return Err(err);
        }
        fold::fold_stmt_in_place(self.mcx.cx, func, clone);
        Ok(clone)
    }

    fn unroll_stmt(&mut self, func: &mut FuncDefBody, stmt: Stmt) -> Result<Vec<Stmt>> {
        (0..self.width).map(|lane| self.lane_clone_stmt(func, stmt, lane)).collect()
    }

    fn gen_nested_loop(
        &mut self,
        func: &mut FuncDefBody,
        stmt: Stmt,
        entries: &[TopLevelStmt],
    ) -> Result<Stmt> {
        let StmtKind::For { init, cond, step, .. } = func.stmts[stmt].kind else {
            return Err(CodegenError::Unsupported("expected a nested `for` loop"));
        };
        let init = init.map(|init| self.lane_clone_stmt(func, init, 0)).transpose()?;
        let cond = cond.map(|cond| self.lane_clone_expr(func, cond, 0)).transpose()?;
        let step = step.map(|step| self.lane_clone_expr(func, step, 0)).transpose()?;
        let body = self.gen_entries(func, entries)?;
        let body = func.new_compound(body);
        Ok(func.new_stmt(StmtKind::For { init, cond, step, body }))
    }

    /// Blend the guarded statements' results with the previous values, under
    /// the vectorized condition of the guarding `if` statement `stmt`.
    fn gen_guarded(
        &mut self,
        func: &mut FuncDefBody,
        stmt: Stmt,
        entries: &[TopLevelStmt],
    ) -> Result<Vec<Stmt>> {
        let unsupported = CodegenError::Unsupported("guarded statement can't be masked");
        let StmtKind::If { cond, .. } = func.stmts[stmt].kind else {
            return Err(unsupported);
        };
        let ExprKind::Binary(rel, a, b) = func.at(cond).strip_parens_and_implicit_casts().def().kind
        else {
            return Err(unsupported);
        };
        let Some(cond_op) = condition_op(rel) else {
            return Err(unsupported);
        };
        let Some(&TopLevelStmt::Vectorize { simd, .. }) = entries.first() else {
            return Err(unsupported);
        };
        if !self.has_op(cond_op, simd) {
            return Err(CodegenError::MissingOp { op: cond_op.into(), simd });
        }
        let vec_ty = self.vector_type(simd)?;

        let mut stmts = vec![];
        let operands = [
            self.materialize(func, a, simd, &mut stmts)?,
            self.materialize(func, b, simd, &mut stmts)?,
        ];

        for entry in entries {
            let &TopLevelStmt::Vectorize { stmt, simd: entry_simd } = entry else {
                return Err(CodegenError::Unsupported("guarded statement can't be masked"));
            };
            if entry_simd != simd {
                return Err(CodegenError::Unsupported("guarded statements of mixed types"));
            }
            let (lhs, rhs, region) = self.assignment(func, stmt)?;
            let usage = self.info.live.def(region).usage;
            match (usage, self.info.reductions.get(&region).copied()) {
                (RegionUsage::Reduction, Some(reduction)) => {
                    let Some(&acc) = self.info.temps.get(&region) else {
                        return Err(CodegenError::Unsupported("reduction without an accumulator"));
                    };
                    let value = self.vexpr(func, reduction.operand, simd)?;
                    let acc_use = func.new_var_use(acc);
                    let op = reduction_op_name(reduction.op);
                    let combined = self.intrinsic(func, op, simd, None, vec_ty, [acc_use, value])?;
                    let acc_use = func.new_var_use(acc);
                    let blended = self.select(func, cond_op, simd, operands, combined, acc_use)?;
                    let acc_lhs = func.new_var_use(acc);
                    stmts.push(self.assign_stmt(func, acc_lhs, blended));
                }
                (RegionUsage::InMemory, _) => {
                    let value = self.vexpr(func, rhs, simd)?;
                    let load_address = self.lane0_address(func, lhs)?;
                    let old = self.intrinsic(
                        func,
                        ops::LOAD_UNALIGNED,
                        simd,
                        None,
                        vec_ty,
                        [load_address],
                    )?;
                    let blended = self.select(func, cond_op, simd, operands, value, old)?;
                    let store_address = self.lane0_address(func, lhs)?;
                    let void = self.mcx.cx.intern(TypeKind::Void);
                    let store = self.intrinsic(
                        func,
                        ops::STORE_UNALIGNED,
                        simd,
                        None,
                        void,
                        [store_address, blended],
                    )?;
                    self.info.stats.loads += 1;
                    self.info.stats.stores += 1;
                    stmts.push(func.new_expr_stmt(store));
                }
                _ => return Err(CodegenError::Unsupported("guarded statement can't be masked")),
            }
        }
        Ok(stmts)
    }

    /// Compute the vector value of `expr` into a new temporary.
    fn materialize(
        &mut self,
        func: &mut FuncDefBody,
        expr: Expr,
        simd: SimdType,
        stmts: &mut Vec<Stmt>,
    ) -> Result<Var> {
        let value = self.vexpr(func, expr, simd)?;
        let temp = self.new_temp(func, simd)?;
        let temp_lhs = func.new_var_use(temp);
        stmts.push(self.assign_stmt(func, temp_lhs, value));
        Ok(temp)
    }

    /// `a REL b ? if_true : if_false`, lanewise, with `[a, b]` in temporaries.
    fn select(
        &mut self,
        func: &mut FuncDefBody,
        cond_op: &str,
        simd: SimdType,
        [a, b]: [Var; 2],
        if_true: Expr,
        if_false: Expr,
    ) -> Result<Expr> {
        let vec_ty = self.vector_type(simd)?;
        let (a, b) = (func.new_var_use(a), func.new_var_use(b));
        self.info.stats.packed_ops += 1;
        self.intrinsic(func, cond_op, simd, None, vec_ty, [a, b, if_true, if_false])
    }

    /// Copy the last lane of every vector temporary back to its storage.
    fn write_backs(&mut self, func: &mut FuncDefBody) -> Result<Vec<Stmt>> {
        let temps: Vec<(Expr, Var)> = self
            .info
            .live
            .regions()
            .filter(|(_, def)| def.usage == RegionUsage::VectorTemp)
            .filter_map(|(region, def)| Some((def.lvalue, *self.info.temps.get(&region)?)))
            .collect();
        let mut stmts = vec![];
        for (lvalue, temp) in temps {
            let lhs = func.deep_clone_expr(lvalue, &mut NoTransform);
            let last = self.extract(func, temp, self.width - 1)?;
            stmts.push(self.assign_stmt(func, lhs, last));
        }
        Ok(stmts)
    }

    /// Replace the loop with the vector loop (around `body`), followed by the
    /// original loop, for the remaining iterations.
    fn replace_loop(self, func: &mut FuncDefBody, body: Vec<Stmt>) -> Result<()> {
        let cx = self.mcx.cx;
        let counted = self.info.counted;
        let loop_stmt = self.info.loop_stmt;
        let StmtKind::For { init, cond, step, body: scalar_body } = func.stmts[loop_stmt].kind
        else {
            return Err(CodegenError::Unsupported("vectorized loop is not a `for` loop"));
        };

        let mut block = vec![];

        // `for (int i = ...)` has its declaration moved out, to be shared by
        // both loops.
        let vector_init = match init {
            Some(init) if counted.declares_var => {
                block.push(init);
                None
            }
            init => init.map(|init| func.deep_clone_stmt(init, &mut NoTransform)),
        };
        for decl in self.temp_decls {
            block.push(func.new_stmt(StmtKind::Decl(smallvec![decl])));
        }
        block.extend(self.pre_loop);

        let var_ty = func.vars[counted.var].ty;
        let last_lane = {
            let var_use = func.new_var_use(counted.var);
            let offset = fold::new_const(func, cx, var_ty, Const::Int(i64::from(self.width) - 1));
            func.new_expr(var_ty, ExprKind::Binary(BinOp::Add, var_use, offset))
        };
        let end = func.deep_clone_expr(counted.end, &mut NoTransform);
        let rel = if counted.rel == BinOp::Le { BinOp::Le } else { BinOp::Lt };
        let vector_cond = func.new_expr(self.int_ty, ExprKind::Binary(rel, last_lane, end));
        let vector_step = {
            let var_use = func.new_var_use(counted.var);
            let width = fold::new_const(func, cx, var_ty, Const::Int(self.width.into()));
            func.new_expr(
                var_ty,
                ExprKind::Assign { op: Some(BinOp::Add), lhs: var_use, rhs: width },
            )
        };
        let vector_body = func.new_compound(body);
        block.push(func.new_stmt(StmtKind::For {
            init: vector_init,
            cond: Some(vector_cond),
            step: Some(vector_step),
            body: vector_body,
        }));
        block.extend(self.post_loop);
        block.push(func.new_stmt(StmtKind::For { init: None, cond, step, body: scalar_body }));

        let comments = std::mem::take(&mut func.stmts[loop_stmt].comments);
        let mut new_def = StmtDef::from(StmtKind::Compound(block));
        new_def.comments = comments;
        func.replace_stmt_def(loop_stmt, new_def);
        Ok(())
    }
}

fn condition_op(rel: BinOp) -> Option<&'static str> {
    Some(match rel {
        BinOp::Lt => ops::CONDITION_LT,
        BinOp::Le => ops::CONDITION_LE,
        BinOp::Gt => ops::CONDITION_GT,
        BinOp::Ge => ops::CONDITION_GE,
        _ => return None,
    })
}

/// Copies expressions/statements for one lane (see [`CodeGen::lane_substitute`]).
struct LaneTransformer<'a, 'b> {
    codegen: &'a mut CodeGen<'b>,
    lane: u32,
    error: Option<CodegenError>,
}

impl Transformer for LaneTransformer<'_, '_> {
    fn transform_expr_use(&mut self, func: &mut FuncDefBody, expr: Expr) -> Transformed<Expr> {
        if self.error.is_some() {
            return Transformed::Unchanged;
        }
        match self.codegen.lane_substitute(func, expr, self.lane) {
            Ok(Some(new)) => Transformed::Changed(new),
            Ok(None) => Transformed::Unchanged,
            Err(err) => {
                self.error = Some(err);
                Transformed::Unchanged
            }
        }
    }
}
