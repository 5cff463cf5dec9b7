//! Loop tiling (`#pragma scout loop block size(N)`).
//!
//! ```c
//! #pragma scout loop block size(64)
//! #pragma scout loop vectorize
//! for (i = 0; i < n; ++i)
//!     a[i] = b[i];
//! ```
//! becomes (with any other pragmas moving to the inner loop):
//! ```c
//! {
//!     int __i_bound0 = n;
//!     int __tile1, __tile_bound2;
//!     for (i = 0; i < __i_bound0; i += 64)
//!     {
//!         __tile_bound2 = __i_bound0 - i;
//!         __tile_bound2 = __tile_bound2 < 64 ? __tile_bound2 : 64;
//!         #pragma scout loop vectorize
//!         for (__tile1 = 0; __tile1 < __tile_bound2; ++__tile1)
//!             a[i + __tile1] = b[i + __tile1];
//!     }
//! }
//! ```

use crate::cf::{CountedLoop, ReplaceVar, collect_loops, take_pragma, vars_changed_in};
use crate::fold::{self, Const};
use crate::pragma::{self, PragmaDomain};
use crate::{
    BinOp, Diag, ExprKind, FuncDefBody, LocalDecl, ModuleCx, ScalarType, Stmt, StmtDef, StmtKind,
    TypeKind, UnOp,
};
use rustc_hash::FxHashSet;
use smallvec::smallvec;

/// Tile `loop_stmt` (in place) by `tile_size` iterations.
fn block_loop(
    mcx: ModuleCx<'_>,
    func: &mut FuncDefBody,
    loop_stmt: Stmt,
    counted: CountedLoop,
    tile_size: i64,
) {
    let cx = mcx.cx;
    let int_ty = cx.intern(TypeKind::Scalar(ScalarType::Int));
    let var = counted.var;
    let var_ty = func.vars[var].ty;
    let var_name = cx[func.vars[var].name].to_string();

    let bound = func.new_artificial_var(cx, &format!("__{var_name}_bound"), var_ty);
    let tile = func.new_artificial_var(cx, "__tile", int_ty);
    let tile_bound = func.new_artificial_var(cx, "__tile_bound", int_ty);

    // `bound = end` (or `end + 1`, for `<=`).
    let bound_init = match counted.rel {
        BinOp::Le => {
            let one = fold::new_const(func, cx, var_ty, Const::Int(1));
            func.new_expr(var_ty, ExprKind::Binary(BinOp::Add, counted.end, one))
        }
        _ => counted.end,
    };
    let bound_decl = func.new_stmt(StmtKind::Decl(smallvec![LocalDecl {
        var: bound,
        init: Some(bound_init),
    }]));
    let tile_decls = func.new_stmt(StmtKind::Decl(smallvec![
        LocalDecl { var: tile, init: None },
        LocalDecl { var: tile_bound, init: None },
    ]));

    // Inner loop: `for (tile = 0; tile < tile_bound; ++tile) body[var -> var + tile]`.
    func.transform_stmt_in_place(
        counted.body,
        &mut ReplaceVar {
            var,
            replacement: |func: &mut FuncDefBody, var_use| {
                let ty = func.exprs[var_use].ty;
                let var_use = func.new_var_use(var);
                let tile_use = func.new_var_use(tile);
                func.new_expr(ty, ExprKind::Binary(BinOp::Add, var_use, tile_use))
            },
        },
    );
    let tile_init = {
        let tile_use = func.new_var_use(tile);
        let zero = fold::new_const(func, cx, int_ty, Const::Int(0));
        let assign = func.new_assign(tile_use, zero);
        func.new_expr_stmt(assign)
    };
    let tile_cond = {
        let tile_use = func.new_var_use(tile);
        let tile_bound_use = func.new_var_use(tile_bound);
        func.new_expr(int_ty, ExprKind::Binary(BinOp::Lt, tile_use, tile_bound_use))
    };
    let tile_step = {
        let tile_use = func.new_var_use(tile);
        func.new_expr(int_ty, ExprKind::Unary(UnOp::PreInc, tile_use))
    };
    let old_def = func.replace_stmt_def(loop_stmt, StmtKind::Null.into());
    let inner_loop = func.stmts.define(StmtDef {
        kind: StmtKind::For {
            init: Some(tile_init),
            cond: Some(tile_cond),
            step: Some(tile_step),
            body: counted.body,
        },
        pragmas: old_def.pragmas,
        comments: smallvec![],
    });

    // `tile_bound = bound - var; tile_bound = tile_bound < N ? tile_bound : N;`
    let clamp_stmts = {
        let lhs = func.new_var_use(tile_bound);
        let bound_use = func.new_var_use(bound);
        let var_use = func.new_var_use(var);
        let remaining = func.new_expr(var_ty, ExprKind::Binary(BinOp::Sub, bound_use, var_use));
        let first = func.new_assign(lhs, remaining);

        let lhs = func.new_var_use(tile_bound);
        let a = func.new_var_use(tile_bound);
        let n = fold::new_const(func, cx, int_ty, Const::Int(tile_size));
        let lt = func.new_expr(int_ty, ExprKind::Binary(BinOp::Lt, a, n));
        let then_expr = func.new_var_use(tile_bound);
        let else_expr = fold::new_const(func, cx, int_ty, Const::Int(tile_size));
        let clamped = func.new_expr(int_ty, ExprKind::Cond { cond: lt, then_expr, else_expr });
        let second = func.new_assign(lhs, clamped);
        [func.new_expr_stmt(first), func.new_expr_stmt(second)]
    };
    let outer_body = func.new_compound(clamp_stmts.into_iter().chain([inner_loop]));

    // Outer loop: `for (init; var < bound; var += N)`.
    let StmtKind::For { init, .. } = old_def.kind else {
        unreachable!("`CountedLoop` only matches `for` loops");
    };
    let outer_cond = {
        let var_use = func.new_var_use(var);
        let bound_use = func.new_var_use(bound);
        func.new_expr(int_ty, ExprKind::Binary(BinOp::Lt, var_use, bound_use))
    };
    let outer_step = {
        let var_use = func.new_var_use(var);
        let n = fold::new_const(func, cx, var_ty, Const::Int(tile_size));
        func.new_expr(var_ty, ExprKind::Assign { op: Some(BinOp::Add), lhs: var_use, rhs: n })
    };
    let outer_loop = func.new_stmt(StmtKind::For {
        init,
        cond: Some(outer_cond),
        step: Some(outer_step),
        body: outer_body,
    });

    func.stmts[loop_stmt] = StmtDef {
        kind: StmtKind::Compound(vec![bound_decl, tile_decls, outer_loop]),
        pragmas: smallvec![],
        comments: old_def.comments,
    };
}

/// Tile every loop annotated with `#pragma scout loop block size(N)`.
///
/// Returns the number of loops tiled.
pub fn block_loops(mcx: ModuleCx<'_>, func: &mut FuncDefBody) -> usize {
    let cx = mcx.cx;
    let mut blocked = 0;
    let mut rejected = FxHashSet::default();

    'restart: loop {
        for loop_stmt in collect_loops(func, func.body) {
            let Some(block_pragma) =
                pragma::find(cx, &func.stmts[loop_stmt].pragmas, PragmaDomain::Loop, "block")
            else {
                continue;
            };
            if rejected.contains(&loop_stmt) {
                continue;
            }

            let tile_size = block_pragma.value_for_argument(cx, func, "size").filter(|&n| n > 0);
            let checked = match tile_size {
                None => Err("block pragma doesn't specify tile size or tile size is 0".to_string()),
                Some(tile_size) => CountedLoop::match_for(cx, func, loop_stmt)
                    .map_err(|reason| format!("loop blocking: {reason}"))
                    .and_then(|counted| {
                        if vars_changed_in(func, counted.body).contains(&counted.var) {
                            Err("loop blocking: loop variable is modified in the loop body".into())
                        } else {
                            Ok((counted, tile_size))
                        }
                    }),
            };
            match checked {
                Ok((counted, tile_size)) => {
                    log::debug!(target: "loop-block", "tiling loop by {tile_size}");
                    take_pragma(cx, func, loop_stmt, PragmaDomain::Loop, "block");
                    block_loop(mcx, func, loop_stmt, counted, tile_size);
                    blocked += 1;
                    continue 'restart;
                }
                Err(reason) => {
                    rejected.insert(loop_stmt);
                    func.attach_diag(loop_stmt, Diag::warn([reason.into()]));
                }
            }
        }
        break;
    }

    if blocked > 0 {
        log::info!(target: "loop-block", "tiled {blocked} loop(s)");
    }
    blocked
}
