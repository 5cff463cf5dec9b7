//! Full unrolling of short counted loops (`#pragma scout loop unroll`).
//!
//! ```c
//! #pragma scout loop unroll
//! for (i = 0; i < 3; ++i)
//!     a[i] += i * 2;
//! ```
//! becomes one copy of the body per iteration, with the loop variable replaced
//! by its value in that iteration (and everything then constant-folded):
//! ```c
//! a[0] += 0;
//! a[1] += 2;
//! a[2] += 4;
//! i = 3;
//! ```

use crate::cf::{
    CountedLoop, ReplaceVar, collect_loops, flatten_blocks, has_iteration_escapes,
    splice_into_parent, take_pragma, vars_changed_in,
};
use crate::fold::{self, Const};
use crate::pragma::{self, PragmaDomain};
use crate::{Diag, FuncDefBody, ModuleCx, Stmt, StmtKind};
use rustc_hash::FxHashSet;

/// Trip counts above this are never fully unrolled.
pub const DEFAULT_THRESHOLD: u32 = 10;

/// Why `loop_stmt` can't be unrolled, if it can't.
fn check_unrollable(
    mcx: ModuleCx<'_>,
    func: &FuncDefBody,
    loop_stmt: Stmt,
    threshold: u32,
) -> Result<(CountedLoop, i64, i64), String> {
    let cx = mcx.cx;
    let counted = CountedLoop::match_for(cx, func, loop_stmt)?;
    let (Some(start), Some(trip_count)) =
        (fold::eval_int(cx, func, counted.start), counted.trip_count(cx, func))
    else {
        return Err("loop bounds must be compile-time constants".into());
    };
    if trip_count > i64::from(threshold) {
        return Err(format!("{trip_count} iterations exceed the unroll threshold ({threshold})"));
    }
    if vars_changed_in(func, counted.body).contains(&counted.var) {
        return Err("loop variable is modified in the loop body".into());
    }
    if has_iteration_escapes(func, counted.body) {
        return Err("loop body contains `break`, `continue` or labels".into());
    }
    Ok((counted, start, trip_count))
}

/// Replace `loop_stmt` (in place, i.e. keeping its handle) by one folded copy
/// of its body per iteration.
fn unroll(
    mcx: ModuleCx<'_>,
    func: &mut FuncDefBody,
    loop_stmt: Stmt,
    counted: CountedLoop,
    start: i64,
    trip_count: i64,
) {
    let cx = mcx.cx;
    let var_ty = func.vars[counted.var].ty;

    let mut iterations: Vec<Stmt> = (start..start + trip_count)
        .map(|v| {
            let mut replace_var = ReplaceVar {
                var: counted.var,
                replacement: |func: &mut FuncDefBody, _| {
                    fold::new_const(func, cx, var_ty, Const::Int(v))
                },
            };
            let iteration = func.deep_clone_stmt(counted.body, &mut replace_var);
            let iteration = match func.stmts[iteration].kind {
                StmtKind::Compound(_) => iteration,
                _ => func.new_compound([iteration]),
            };
            fold::fold_stmt_in_place(cx, func, iteration);
            iteration
        })
        .collect();

    // The loop variable outlives the loop, unless the loop declared it.
    if !counted.declares_var {
        let var_use = func.new_var_use(counted.var);
        let final_value = fold::new_const(func, cx, var_ty, Const::Int(start + trip_count));
        let assign = func.new_assign(var_use, final_value);
        iterations.push(func.new_expr_stmt(assign));
    }

    let old_def = func.replace_stmt_def(loop_stmt, StmtKind::Compound(iterations).into());
    func.stmts[loop_stmt].comments = old_def.comments;
    flatten_blocks(func, loop_stmt);
    splice_into_parent(func, loop_stmt);
}

/// Unroll every loop annotated with `#pragma scout loop unroll`, warning about
/// (and leaving alone) those that can't be.
///
/// Returns the number of loops unrolled.
pub fn unroll_loops(mcx: ModuleCx<'_>, func: &mut FuncDefBody, threshold: u32) -> usize {
    let cx = mcx.cx;
    let mut unrolled = 0;
    let mut rejected = FxHashSet::default();

    'restart: loop {
        // Innermost loops first, so that their unrolled copies get cloned instead.
        let loops = collect_loops(func, func.body);
        for loop_stmt in loops.into_iter().rev() {
            let wants_unroll = pragma::find(
                cx,
                &func.stmts[loop_stmt].pragmas,
                PragmaDomain::Loop,
                "unroll",
            )
            .is_some();
            if !wants_unroll || rejected.contains(&loop_stmt) {
                continue;
            }

            match check_unrollable(mcx, func, loop_stmt, threshold) {
                Ok((counted, start, trip_count)) => {
                    log::debug!(target: "loop-unroll", "unrolling {trip_count} iteration(s)");
                    take_pragma(cx, func, loop_stmt, PragmaDomain::Loop, "unroll");
                    unroll(mcx, func, loop_stmt, counted, start, trip_count);
                    unrolled += 1;
                    continue 'restart;
                }
                Err(reason) => {
                    log::debug!(target: "loop-unroll", "not unrolling: {reason}");
                    rejected.insert(loop_stmt);
                    func.attach_diag(
                        loop_stmt,
                        Diag::warn(["loop unroll: ".into(), reason.into()]),
                    );
                }
            }
        }
        break;
    }

    if unrolled > 0 {
        log::info!(target: "loop-unroll", "unrolled {unrolled} loop(s)");
    }
    unrolled
}
