//! Loop fission at annotated statements (`#pragma scout loop split`).
//!
//! ```c
//! for (i = 0; i < n; ++i) {
//!     a[i] = b[i];
//!     #pragma scout loop split
//!     c[i] = a[i + 1];
//! }
//! ```
//! becomes two loops over the same iteration space, the second one starting
//! at the annotated statement.

use crate::cf::{collect_loops, splice_into_parent, take_pragma};
use crate::pragma::{self, PragmaDomain};
use crate::transform::NoTransform;
use crate::{Diag, FuncDefBody, ModuleCx, Stmt, StmtDef, StmtKind};
use rustc_hash::FxHashSet;
use smallvec::smallvec;
use std::borrow::Cow;

/// Split `loop_stmt` (in place) before the `split_at`-th statement of its body.
fn split_loop(func: &mut FuncDefBody, loop_stmt: Stmt, split_at: usize) {
    let StmtKind::For { init, cond, step, body } = func.stmts[loop_stmt].kind else {
        return;
    };
    let StmtKind::Compound(children) = &func.stmts[body].kind else {
        return;
    };
    let (first_half, second_half) = children.split_at(split_at);
    let (first_half, second_half) = (first_half.to_vec(), second_half.to_vec());
    func.stmts[body].kind = StmtKind::Compound(first_half);

    let second_body = func.new_stmt(StmtKind::Compound(second_half));
    let second_init = init.map(|init| func.deep_clone_stmt(init, &mut NoTransform));
    let second_cond = cond.map(|cond| func.deep_clone_expr(cond, &mut NoTransform));
    let second_step = step.map(|step| func.deep_clone_expr(step, &mut NoTransform));
    let pragmas = func.stmts[loop_stmt].pragmas.clone();
    let second_loop = func.stmts.define(StmtDef {
        kind: StmtKind::For {
            init: second_init,
            cond: second_cond,
            step: second_step,
            body: second_body,
        },
        pragmas,
        comments: smallvec![Cow::Borrowed("start of splitted loop")],
    });

    let first_loop = func.relocate_stmt(loop_stmt);
    func.stmts[loop_stmt].kind = StmtKind::Compound(vec![first_loop, second_loop]);
    func.attach_diag(first_loop, Diag::note(["loop splitted due to pragma".into()]));
    splice_into_parent(func, loop_stmt);
}

/// Split every loop containing statements annotated with `#pragma scout loop split`.
///
/// Returns the number of splits performed.
pub fn split_loops(mcx: ModuleCx<'_>, func: &mut FuncDefBody) -> usize {
    let cx = mcx.cx;
    let mut splits = 0;
    let mut rejected = FxHashSet::default();

    'restart: loop {
        for loop_stmt in collect_loops(func, func.body) {
            let StmtKind::For { body, .. } = func.stmts[loop_stmt].kind else {
                continue;
            };
            let StmtKind::Compound(children) = &func.stmts[body].kind else {
                continue;
            };
            let annotated = children.iter().position(|&child| {
                !rejected.contains(&child)
                    && pragma::find(cx, &func.stmts[child].pragmas, PragmaDomain::Loop, "split")
                        .is_some()
            });
            match annotated {
                None => {}
                Some(0) => {
                    let child = children[0];
                    rejected.insert(child);
                    func.attach_diag(
                        child,
                        Diag::warn(["split pragma at start of compound, nothing to split".into()]),
                    );
                    continue 'restart;
                }
                Some(split_at) => {
                    let child = children[split_at];
                    take_pragma(cx, func, child, PragmaDomain::Loop, "split");
                    log::debug!(
                        target: "loop-split",
                        "splitting loop before statement #{split_at}"
                    );
                    split_loop(func, loop_stmt, split_at);
                    splits += 1;
                    continue 'restart;
                }
            }
        }
        break;
    }

    if splits > 0 {
        log::info!(target: "loop-split", "split {splits} loop(s)");
    }
    splits
}
